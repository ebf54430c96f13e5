pub mod sqlite;
#[cfg(test)]
pub mod testing;
pub mod views;

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreError;

pub use sqlite::SqliteStore;

/// Document store the importer and pager talk to.
///
/// Documents are JSON objects carrying `_id` and `_rev`. Every document
/// operation names the collection it works on.
pub trait Store {
    /// Cheap round trip used to fail fast when storage is unreachable.
    fn ping(&self) -> Result<(), StoreError>;

    fn collection_exists(&self, name: &str) -> Result<bool, StoreError>;

    fn create_collection(&self, name: &str) -> Result<(), StoreError>;

    /// Insert all documents or none of them.
    fn bulk_insert(&self, db: &str, docs: &[Value]) -> Result<BulkAck, StoreError>;

    /// Create a document, or update it when `_id` and the current `_rev` are given.
    fn insert(&self, db: &str, doc: &Value) -> Result<DocMeta, StoreError>;

    fn get_document(&self, db: &str, id: &str) -> Result<Value, StoreError>;

    /// Documents ordered by id, starting at `startkey` (inclusive).
    fn list_documents(
        &self,
        db: &str,
        startkey: Option<&str>,
        count: usize,
    ) -> Result<Vec<DocRow>, StoreError>;

    /// Query a view named `design/view`.
    fn query_index(
        &self,
        db: &str,
        index: &str,
        query: &ViewQuery,
    ) -> Result<Vec<ViewRow>, StoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocMeta {
    pub id: String,
    pub rev: String,
}

#[derive(Debug, Clone, Default)]
pub struct BulkAck {
    pub docs: Vec<DocMeta>,
}

/// One row of the all-documents listing. The key is the document id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocRow {
    pub key: String,
    pub id: String,
    pub rev: String,
}

/// One row of a view. Reduced rows carry no id; a total reduce carries no key.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewRow {
    pub key: Option<ViewKey>,
    pub value: Value,
    pub id: Option<String>,
    pub doc: Option<Value>,
}

// ── Keys ──

/// Ordered tuple of strings. Sorts component by component; a prefix sorts first.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "KeyRepr", into = "KeyRepr")]
pub struct ViewKey(Vec<String>);

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum KeyRepr {
    One(String),
    Many(Vec<String>),
}

impl From<KeyRepr> for ViewKey {
    fn from(repr: KeyRepr) -> Self {
        match repr {
            KeyRepr::One(s) => ViewKey::text(s),
            KeyRepr::Many(parts) => ViewKey::tuple(parts),
        }
    }
}

impl From<ViewKey> for KeyRepr {
    fn from(key: ViewKey) -> Self {
        let mut parts = key.0;
        if parts.len() == 1 {
            KeyRepr::One(parts.remove(0))
        } else {
            KeyRepr::Many(parts)
        }
    }
}

impl ViewKey {
    pub fn text(s: impl Into<String>) -> Self {
        ViewKey(vec![clean_component(s.into())])
    }

    pub fn tuple<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ViewKey(parts.into_iter().map(|p| clean_component(p.into())).collect())
    }

    pub fn parts(&self) -> &[String] {
        &self.0
    }

    /// Order-preserving binary form: components joined by NUL.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (i, part) in self.0.iter().enumerate() {
            if i > 0 {
                out.push(0);
            }
            out.extend_from_slice(part.as_bytes());
        }
        out
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_json(s: &str) -> Result<Self, StoreError> {
        serde_json::from_str(s).map_err(|e| StoreError::InvalidKey(format!("{}: {}", s, e)))
    }
}

// NUL is the component separator in the encoded form.
fn clean_component(s: String) -> String {
    if s.contains('\0') {
        s.replace('\0', "")
    } else {
        s
    }
}

impl fmt::Display for ViewKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_json())
    }
}

// ── Queries ──

/// Options for `Store::query_index`.
#[derive(Debug, Clone, Default)]
pub struct ViewQuery {
    pub key: Option<ViewKey>,
    pub startkey: Option<ViewKey>,
    pub startkey_docid: Option<String>,
    /// Exclusive upper bound.
    pub endkey: Option<ViewKey>,
    pub limit: Option<usize>,
    /// `None` reduces whenever the view defines a reduce rule.
    pub reduce: Option<bool>,
    pub group: bool,
    pub include_docs: bool,
}

impl ViewQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(mut self, key: ViewKey) -> Self {
        self.key = Some(key);
        self
    }

    pub fn startkey(mut self, key: Option<ViewKey>) -> Self {
        self.startkey = key;
        self
    }

    pub fn startkey_docid(mut self, id: impl Into<String>) -> Self {
        self.startkey_docid = Some(id.into());
        self
    }

    pub fn endkey(mut self, key: Option<ViewKey>) -> Self {
        self.endkey = key;
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn reduce(mut self, on: bool) -> Self {
        self.reduce = Some(on);
        self
    }

    pub fn group(mut self, on: bool) -> Self {
        self.group = on;
        self
    }

    pub fn include_docs(mut self, on: bool) -> Self {
        self.include_docs = on;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_key_serializes_as_string() {
        assert_eq!(ViewKey::text("en").to_json(), "\"en\"");
        assert_eq!(ViewKey::tuple(["en", "pt"]).to_json(), "[\"en\",\"pt\"]");
        assert_eq!(ViewKey::from_json("\"en\"").unwrap(), ViewKey::text("en"));
        assert_eq!(
            ViewKey::from_json("[\"en\",\"pt\"]").unwrap(),
            ViewKey::tuple(["en", "pt"])
        );
        assert!(ViewKey::from_json("42").is_err());
    }

    #[test]
    fn encoding_preserves_order() {
        let keys = [
            ViewKey::tuple(["a"]),
            ViewKey::tuple(["a", "b"]),
            ViewKey::tuple(["a", "c"]),
            ViewKey::tuple(["ab"]),
            ViewKey::tuple(["b"]),
        ];
        for pair in keys.windows(2) {
            assert!(pair[0] < pair[1]);
            assert!(pair[0].encode() < pair[1].encode(), "{} vs {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn nul_is_stripped() {
        assert_eq!(ViewKey::text("a\0b").parts(), ["ab".to_string()]);
    }
}
