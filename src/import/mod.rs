pub mod assemble;
pub mod bootstrap;
pub mod dump;
pub mod extract;
pub mod loader;
pub mod source;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::config::{ImportConfig, StoreConfig};
use crate::db::{SqliteStore, Store};
use crate::progress::ImportProgress;
use assemble::RecordAssembler;
use bootstrap::{bootstrap, IndexStatus};
use extract::LineExtractor;
use loader::{BulkLoader, BulkOutcome};
use source::DumpSource;

/// Totals for one import run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub lines: usize,
    pub titles: usize,
    pub records: usize,
    pub batches: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped_lines: usize,
}

impl ImportSummary {
    pub fn print(&self) {
        println!(
            "Read {} lines ({} titles, {} skipped).",
            self.lines, self.titles, self.skipped_lines
        );
        println!(
            "Stored {} of {} records in {} batches ({} failed).",
            self.succeeded, self.records, self.batches, self.failed
        );
    }

    fn add(&mut self, outcome: BulkOutcome) {
        self.batches += 1;
        self.succeeded += outcome.succeeded();
        self.failed += outcome.failed();
    }
}

/// Extract, assemble and load every line. Single pass; one batch in flight.
///
/// `summary` is filled in as the run progresses, so it is meaningful even
/// when a malformed line ends the run early.
pub fn load_stream<I, S>(
    lines: I,
    store: &S,
    config: &ImportConfig,
    progress: &ImportProgress,
    summary: &mut ImportSummary,
) -> Result<()>
where
    I: Iterator<Item = String>,
    S: Store,
{
    let mut extractor = LineExtractor::new(lines);
    let mut assembler = RecordAssembler::new(&config.source_language, config.batch_size);
    let loader = BulkLoader::new(store, config, progress);

    let store_batch = |batch: assemble::Batch, summary: &mut ImportSummary| {
        summary.add(loader.load(&batch));
        if config.milestone_every > 0 && summary.batches % config.milestone_every == 0 {
            progress.milestone(format!(
                "{} batches, {} records stored, {} failed",
                summary.batches, summary.succeeded, summary.failed
            ));
        }
    };

    let result = loop {
        let link = match extractor.next() {
            Some(Ok(link)) => link,
            Some(Err(e)) => break Err(anyhow::Error::new(e).context("Malformed input")),
            None => break Ok(()),
        };
        if let Some(batch) = assembler.push(link) {
            store_batch(batch, summary);
        }
    };

    // Final partial batch, stored even when the stream ended in an error.
    if let Some(batch) = assembler.finish() {
        store_batch(batch, summary);
    }

    summary.lines = extractor.lines_read();
    summary.titles = extractor.titles();
    summary.skipped_lines = extractor.skipped();
    summary.records = assembler.produced();
    result
}

/// Full import: open storage, bootstrap indexes, then stream the dump into it.
///
/// The partial summary is printed before any error is returned.
pub async fn run(
    store_config: StoreConfig,
    config: ImportConfig,
    source: DumpSource,
) -> Result<ImportSummary> {
    let store = SqliteStore::open(&store_config)
        .with_context(|| format!("Failed to open store {}", store_config.path.display()))?;
    store.ping().context("Storage is unreachable")?;

    match bootstrap(&store, &config.collection).context("Index bootstrap failed")? {
        IndexStatus::Drifted { .. } => warn!("Importing with the stored index definitions"),
        status => info!("Indexes: {:?}", status),
    }

    info!(
        "Importing {} (source language {}, batches of {})",
        source, config.source_language, config.batch_size
    );
    let (feed, feeder) = source::spawn(source, &config.filter_command);

    let pipeline = tokio::task::spawn_blocking(move || {
        let progress = ImportProgress::new();
        progress.milestone("START!");
        let mut summary = ImportSummary::default();
        let result = load_stream(feed, &store, &config, &progress, &mut summary);
        progress.milestone("DING!");
        progress.finish();
        (summary, result)
    });

    let (summary, result) = pipeline.await.context("Import pipeline panicked")?;
    let fed = feeder.await.context("Input task panicked")?;

    if let Err(e) = result.and(fed.context("Reading the dump failed").map(|_| ())) {
        summary.print();
        return Err(e);
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::FlakyStore;
    use crate::db::{ViewKey, ViewQuery};
    use crate::error::ExtractError;
    use serde_json::json;

    const DB: &str = "lexicon";

    fn config(batch_size: usize) -> ImportConfig {
        let mut config = ImportConfig::new("pt");
        config.batch_size = batch_size;
        config.base_backoff = std::time::Duration::from_millis(1);
        config
    }

    fn lines(text: &str) -> impl Iterator<Item = String> + '_ {
        text.lines().map(String::from)
    }

    fn ready_store() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        bootstrap(&store, DB).unwrap();
        store
    }

    const INPUT: &str = "TITLE:Gato\nen:Cat\nfr:Chat\nde:Katze\nTITLE:Cachorro\nen:Dog\nfr:Chien\n";

    #[test]
    fn loads_every_record_in_batches() {
        let store = ready_store();
        let mut summary = ImportSummary::default();
        load_stream(lines(INPUT), &store, &config(2), &ImportProgress::hidden(), &mut summary)
            .unwrap();

        assert_eq!(
            summary,
            ImportSummary {
                lines: 7,
                titles: 2,
                records: 5,
                batches: 3,
                succeeded: 5,
                failed: 0,
                skipped_lines: 0,
            }
        );

        let counts = store
            .query_index(DB, "langs/count", &ViewQuery::new().group(true))
            .unwrap();
        let flat: Vec<_> = counts
            .iter()
            .map(|r| (r.key.clone().unwrap(), r.value.clone()))
            .collect();
        assert_eq!(
            flat,
            [
                (ViewKey::text("de"), json!(1)),
                (ViewKey::text("en"), json!(2)),
                (ViewKey::text("fr"), json!(2)),
            ]
        );
    }

    #[test]
    fn empty_title_does_not_stop_the_run() {
        let store = ready_store();
        let mut summary = ImportSummary::default();
        load_stream(
            lines("TITLE:Cat\nen:Gato\nTITLE:''\nen:X\nTITLE:Dog\nfr:Chien\n"),
            &store,
            &config(10),
            &ImportProgress::hidden(),
            &mut summary,
        )
        .unwrap();

        assert_eq!(summary.lines, 6);
        assert_eq!(summary.titles, 3);
        assert_eq!(summary.skipped_lines, 1);
        assert_eq!(summary.records, 2);
        assert_eq!(summary.succeeded, 2);
        let rows = store
            .query_index(DB, "langs/by_source", &ViewQuery::new().key(ViewKey::text("Dog")))
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn link_before_first_title_stops_the_run() {
        let store = ready_store();
        let mut summary = ImportSummary::default();
        let err = load_stream(
            lines("\nfr:Chat\nTITLE:Gato\nen:Cat\n"),
            &store,
            &config(10),
            &ImportProgress::hidden(),
            &mut summary,
        )
        .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<ExtractError>(),
            Some(ExtractError::LinkBeforeTitle { line: 2, .. })
        ));
        assert_eq!(summary.lines, 2);
        assert_eq!(summary.records, 0);
        assert_eq!(summary.batches, 0);
        // Only the design document.
        assert_eq!(store.list_documents(DB, None, 100).unwrap().len(), 1);
    }

    #[test]
    fn bulk_failures_fall_back_per_record() {
        let store = FlakyStore::new(DB);
        store.fail_bulk.set(true);
        store.poison("Chat");
        store.poison("Dog");
        let mut summary = ImportSummary::default();
        load_stream(lines(INPUT), &store, &config(2), &ImportProgress::hidden(), &mut summary)
            .unwrap();

        assert_eq!(store.insert_calls.get(), 5);
        assert_eq!(summary.succeeded, 3);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.succeeded + summary.failed, summary.records);
    }

    #[tokio::test]
    async fn run_imports_a_local_file() {
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        let dump = dir.path().join("dump.txt");
        std::fs::File::create(&dump)
            .unwrap()
            .write_all(INPUT.as_bytes())
            .unwrap();
        let store_config = StoreConfig {
            path: dir.path().join("db").join("lexicon.sqlite"),
            ..StoreConfig::default()
        };
        let mut config = config(4);
        config.filter_command = "cat".into();

        let summary = run(store_config.clone(), config, DumpSource::File(dump))
            .await
            .unwrap();
        assert_eq!(summary.records, 5);
        assert_eq!(summary.batches, 2);

        let store = SqliteStore::open(&store_config).unwrap();
        let rows = store
            .query_index(DB, "langs/by_source", &ViewQuery::new().key(ViewKey::text("Cachorro")))
            .unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn run_stops_before_reading_when_bootstrap_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store_config = StoreConfig {
            path: dir.path().join("lexicon.sqlite"),
            ..StoreConfig::default()
        };
        {
            let store = SqliteStore::open(&store_config).unwrap();
            store.create_collection(DB).unwrap();
            store
                .insert(DB, &json!({"_id": "_design/langs", "views": "unreadable"}))
                .unwrap();
        }
        let started = dir.path().join("filter-started");
        let mut config = config(4);
        config.filter_command = format!("touch '{}'; cat", started.display());

        let err = run(store_config, config, DumpSource::File(dir.path().join("dump.txt")))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Index bootstrap failed"), "{}", err);
        assert!(!started.exists());
    }

    #[tokio::test]
    async fn run_reports_filter_failure() {
        let dir = tempfile::tempdir().unwrap();
        let store_config = StoreConfig {
            path: dir.path().join("lexicon.sqlite"),
            ..StoreConfig::default()
        };
        let mut config = config(4);
        config.filter_command = "exit 2".into();

        let err = run(
            store_config,
            config,
            DumpSource::File(dir.path().join("missing.bz2")),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("Reading the dump failed"), "{}", err);
    }
}
