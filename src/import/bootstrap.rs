use tracing::{info, warn};

use crate::db::views::{DesignDocument, EmitValue, IndexDefinition};
use crate::db::Store;
use crate::error::StoreError;

pub const DESIGN_NAME: &str = "langs";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseStatus {
    Created,
    AlreadyExists,
}

/// State of the design document after bootstrap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexStatus {
    Created,
    AlreadyPresent,
    /// Stored definitions differ from the declared ones. Left untouched.
    Drifted {
        missing: Vec<String>,
        changed: Vec<String>,
    },
}

/// Every index the importer and the lookups rely on.
pub fn lexicon_design() -> DesignDocument {
    DesignDocument::new(DESIGN_NAME)
        .with_view(
            "count",
            IndexDefinition::new(["target_language"], EmitValue::One).with_sum(),
        )
        .with_view(
            "translation-count",
            IndexDefinition::new(["source_word"], EmitValue::One).with_sum(),
        )
        .with_view(
            "link-count",
            IndexDefinition::new(["source_language", "target_language"], EmitValue::One)
                .with_sum(),
        )
        .with_view("by_source", IndexDefinition::new(["source_word"], EmitValue::Doc))
        .with_view("by_target", IndexDefinition::new(["target_word"], EmitValue::Doc))
        .with_view(
            "by_target_lang",
            IndexDefinition::new(["target_language"], EmitValue::Doc),
        )
        .with_view(
            "by_source_and_target",
            IndexDefinition::new(
                ["source_language", "target_language", "source_word"],
                EmitValue::Doc,
            ),
        )
}

pub fn ensure_database<S: Store>(store: &S, name: &str) -> Result<DatabaseStatus, StoreError> {
    if store.collection_exists(name)? {
        return Ok(DatabaseStatus::AlreadyExists);
    }
    store.create_collection(name)?;
    info!("Created database {}", name);
    Ok(DatabaseStatus::Created)
}

/// Create the design document if absent. An existing one is never modified.
pub fn ensure_indexes<S: Store>(
    store: &S,
    db: &str,
    design: &DesignDocument,
) -> Result<IndexStatus, StoreError> {
    let stored = match store.get_document(db, &design.id) {
        Ok(doc) => DesignDocument::from_value(doc)?,
        Err(StoreError::NotFound(_)) => {
            let mut fresh = design.clone();
            fresh.rev = None;
            store.insert(db, &fresh.to_value()?)?;
            info!("Created design {} with {} indexes", design.name(), design.views.len());
            return Ok(IndexStatus::Created);
        }
        Err(e) => return Err(e),
    };

    let mut missing = Vec::new();
    let mut changed = Vec::new();
    for (name, def) in &design.views {
        match stored.views.get(name) {
            None => missing.push(name.clone()),
            Some(existing) if existing != def => changed.push(name.clone()),
            Some(_) => {}
        }
    }

    if missing.is_empty() && changed.is_empty() {
        return Ok(IndexStatus::AlreadyPresent);
    }
    warn!(
        "{} differs from the declared indexes (missing: {:?}, changed: {:?}); leaving it unchanged",
        design.id, missing, changed
    );
    Ok(IndexStatus::Drifted { missing, changed })
}

/// Database and indexes, in that order. Runs once before any load.
pub fn bootstrap<S: Store>(store: &S, db: &str) -> Result<IndexStatus, StoreError> {
    ensure_database(store, db)?;
    ensure_indexes(store, db, &lexicon_design())
}
