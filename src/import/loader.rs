use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use super::assemble::TranslationRecord;
use crate::config::ImportConfig;
use crate::db::{DocMeta, Store, ViewQuery};
use crate::error::StoreError;
use crate::progress::{ImportProgress, Marker};

/// Result of loading one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkOutcome {
    /// Stored by a single bulk call.
    AllSucceeded { count: usize },
    /// Bulk call failed; records were inserted one by one.
    PartialFailure { succeeded: usize, failed: usize },
}

impl BulkOutcome {
    pub fn succeeded(&self) -> usize {
        match *self {
            BulkOutcome::AllSucceeded { count } => count,
            BulkOutcome::PartialFailure { succeeded, .. } => succeeded,
        }
    }

    pub fn failed(&self) -> usize {
        match *self {
            BulkOutcome::AllSucceeded { .. } => 0,
            BulkOutcome::PartialFailure { failed, .. } => failed,
        }
    }
}

/// Writes batches to the store, falling back to per-record inserts when a
/// bulk call is rejected. Storage errors never escape `load`.
pub struct BulkLoader<'a, S: Store> {
    store: &'a S,
    collection: &'a str,
    refresh_index: &'a str,
    retries: u32,
    base_backoff: Duration,
    progress: &'a ImportProgress,
}

impl<'a, S: Store> BulkLoader<'a, S> {
    pub fn new(store: &'a S, config: &'a ImportConfig, progress: &'a ImportProgress) -> Self {
        BulkLoader {
            store,
            collection: &config.collection,
            refresh_index: &config.refresh_index,
            retries: config.retries,
            base_backoff: config.base_backoff,
            progress,
        }
    }

    pub fn load(&self, batch: &[TranslationRecord]) -> BulkOutcome {
        if batch.is_empty() {
            return BulkOutcome::AllSucceeded { count: 0 };
        }
        let docs: Vec<Value> = batch.iter().map(TranslationRecord::to_document).collect();

        let outcome = match self.store.bulk_insert(self.collection, &docs) {
            Ok(ack) => {
                debug!("Bulk stored {} records", ack.docs.len());
                self.progress.mark(Marker::Batch, batch.len() as u64);
                BulkOutcome::AllSucceeded { count: batch.len() }
            }
            Err(e) => {
                warn!(
                    "Bulk insert of {} records failed, inserting individually: {}",
                    batch.len(),
                    e
                );
                self.load_each(batch, &docs)
            }
        };

        if outcome.succeeded() > 0 {
            self.refresh();
        }
        outcome
    }

    fn load_each(&self, batch: &[TranslationRecord], docs: &[Value]) -> BulkOutcome {
        let mut succeeded = 0usize;
        let mut failed = 0usize;

        for (record, doc) in batch.iter().zip(docs) {
            match self.insert_with_retry(doc) {
                Ok(meta) => {
                    debug!("Stored {} as {} ({})", record.target_word, meta.id, meta.rev);
                    succeeded += 1;
                    self.progress.mark(Marker::Record, 1);
                }
                Err(e) => {
                    failed += 1;
                    warn!(
                        "Failed to store {} -> {}:{}: {}",
                        record.source_word, record.target_language, record.target_word, e
                    );
                    self.progress.mark(Marker::Failed, 1);
                }
            }
        }

        BulkOutcome::PartialFailure { succeeded, failed }
    }

    fn insert_with_retry(&self, doc: &Value) -> Result<DocMeta, StoreError> {
        let mut attempt = 0u32;
        loop {
            match self.store.insert(self.collection, doc) {
                Err(e) if e.is_transient() && attempt < self.retries => {
                    let backoff = self.base_backoff.saturating_mul(2u32.saturating_pow(attempt));
                    attempt += 1;
                    warn!(
                        "Storage busy (attempt {}/{}), backing off {:.1}s",
                        attempt,
                        self.retries,
                        backoff.as_secs_f64()
                    );
                    std::thread::sleep(backoff);
                }
                result => return result,
            }
        }
    }

    /// Query the aggregate view so its rows stay current. Failures are ignored.
    fn refresh(&self) {
        let query = ViewQuery::new().group(true).limit(1);
        if let Err(e) = self.store.query_index(self.collection, self.refresh_index, &query) {
            debug!("Refresh of {} skipped: {}", self.refresh_index, e);
        }
    }
}
