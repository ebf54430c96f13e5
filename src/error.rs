use thiserror::Error;

/// Failures reported by the document store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("collection '{0}' does not exist")]
    UnknownCollection(String),
    #[error("document '{0}' not found")]
    NotFound(String),
    #[error("document '{id}' update conflict (expected rev {expected:?})")]
    Conflict { id: String, expected: Option<String> },
    #[error("index '{0}' is not defined")]
    UnknownIndex(String),
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("invalid document: {0}")]
    InvalidDocument(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    /// Busy/locked database: worth retrying after a short wait.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

/// Malformed filtered dump stream.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("line {line}: link '{text}' appears before any title")]
    LinkBeforeTitle { line: usize, text: String },
}

#[derive(Debug, Error)]
pub enum PagerError {
    #[error("page size must be at least 1")]
    InvalidPageSize,
    #[error("cursor did not advance past key {key} (doc {id})")]
    Stalled { key: String, id: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}
