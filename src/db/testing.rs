//! Store wrapper that injects failures, for loader and pipeline tests.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;

use serde_json::Value;

use super::{BulkAck, DocMeta, DocRow, SqliteStore, Store, ViewQuery, ViewRow};
use crate::error::StoreError;

pub fn busy() -> StoreError {
    StoreError::Sqlite(rusqlite::Error::SqliteFailure(
        rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
        None,
    ))
}

pub struct FlakyStore {
    pub inner: SqliteStore,
    pub fail_bulk: Cell<bool>,
    pub fail_queries: Cell<bool>,
    /// Single inserts whose `target_word` is listed here always fail.
    pub poisoned_words: RefCell<HashSet<String>>,
    /// Transient failures to return before single inserts start succeeding.
    pub busy_inserts: Cell<u32>,
    pub bulk_calls: Cell<usize>,
    pub insert_calls: Cell<usize>,
    pub query_calls: Cell<usize>,
}

impl FlakyStore {
    pub fn new(collection: &str) -> Self {
        let inner = SqliteStore::open_in_memory().unwrap();
        inner.create_collection(collection).unwrap();
        FlakyStore {
            inner,
            fail_bulk: Cell::new(false),
            fail_queries: Cell::new(false),
            poisoned_words: RefCell::new(HashSet::new()),
            busy_inserts: Cell::new(0),
            bulk_calls: Cell::new(0),
            insert_calls: Cell::new(0),
            query_calls: Cell::new(0),
        }
    }

    pub fn poison(&self, word: &str) {
        self.poisoned_words.borrow_mut().insert(word.to_string());
    }
}

impl Store for FlakyStore {
    fn ping(&self) -> Result<(), StoreError> {
        self.inner.ping()
    }

    fn collection_exists(&self, name: &str) -> Result<bool, StoreError> {
        self.inner.collection_exists(name)
    }

    fn create_collection(&self, name: &str) -> Result<(), StoreError> {
        self.inner.create_collection(name)
    }

    fn bulk_insert(&self, db: &str, docs: &[Value]) -> Result<BulkAck, StoreError> {
        self.bulk_calls.set(self.bulk_calls.get() + 1);
        if self.fail_bulk.get() {
            return Err(StoreError::InvalidDocument("bulk rejected".into()));
        }
        self.inner.bulk_insert(db, docs)
    }

    fn insert(&self, db: &str, doc: &Value) -> Result<DocMeta, StoreError> {
        self.insert_calls.set(self.insert_calls.get() + 1);
        if self.busy_inserts.get() > 0 {
            self.busy_inserts.set(self.busy_inserts.get() - 1);
            return Err(busy());
        }
        let word = doc.get("target_word").and_then(Value::as_str).unwrap_or_default();
        if self.poisoned_words.borrow().contains(word) {
            return Err(StoreError::InvalidDocument(format!("poisoned {}", word)));
        }
        self.inner.insert(db, doc)
    }

    fn get_document(&self, db: &str, id: &str) -> Result<Value, StoreError> {
        self.inner.get_document(db, id)
    }

    fn list_documents(
        &self,
        db: &str,
        startkey: Option<&str>,
        count: usize,
    ) -> Result<Vec<DocRow>, StoreError> {
        self.inner.list_documents(db, startkey, count)
    }

    fn query_index(
        &self,
        db: &str,
        index: &str,
        query: &ViewQuery,
    ) -> Result<Vec<ViewRow>, StoreError> {
        self.query_calls.set(self.query_calls.get() + 1);
        if self.fail_queries.get() {
            return Err(busy());
        }
        self.inner.query_index(db, index, query)
    }
}
