mod config;
mod db;
mod error;
mod import;
mod pager;
mod progress;
mod queries;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};

use config::{ImportConfig, StoreConfig};
use db::{SqliteStore, Store, ViewKey, ViewRow};
use import::source::DumpSource;
use pager::Pager;
use queries::Lookup;

#[derive(Parser)]
#[command(name = "lexicon", about = "Wiki interlanguage-link importer and lexicon queries")]
struct Cli {
    #[command(flatten)]
    store: StoreArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct StoreArgs {
    /// SQLite database file
    #[arg(long, env = "LEXICON_DB", default_value = config::DEFAULT_DB_PATH, global = true)]
    db: PathBuf,
    /// Collection holding the lexicon
    #[arg(long, env = "LEXICON_COLLECTION", default_value = config::DEFAULT_COLLECTION, global = true)]
    collection: String,
    /// Milliseconds to wait on a locked database
    #[arg(long, default_value_t = config::DEFAULT_BUSY_TIMEOUT_MS, global = true)]
    busy_timeout_ms: u64,
}

impl StoreArgs {
    fn config(&self) -> StoreConfig {
        StoreConfig {
            path: self.db.clone(),
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
        }
    }

    fn open(&self) -> anyhow::Result<SqliteStore> {
        let store = SqliteStore::open(&self.config())
            .with_context(|| format!("Failed to open store {}", self.db.display()))?;
        store.ping().context("Storage is unreachable")?;
        Ok(store)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Import translations from a wiki dump
    Import {
        /// Wiki language code of the dump (e.g. "pt")
        source_language: String,
        /// Dump file or URL (default: latest pages-articles dump for the language)
        dump: Option<String>,
        /// Records per bulk insert
        #[arg(short = 'b', long, env = "LEXICON_BATCH_SIZE", default_value_t = config::DEFAULT_BATCH_SIZE)]
        batch_size: usize,
        /// Shell command turning the raw dump on stdin into title/link lines
        #[arg(long, env = "LEXICON_FILTER", default_value = config::DEFAULT_FILTER, hide_default_value = true)]
        filter: String,
        /// Retries for a busy database during per-record inserts
        #[arg(long, default_value_t = config::DEFAULT_RETRIES)]
        retries: u32,
        /// Batches between timestamped milestones (0 disables them)
        #[arg(long, default_value_t = config::DEFAULT_MILESTONE_EVERY)]
        milestone_every: usize,
    },
    /// Number of translations into a language
    Counts {
        language: String,
    },
    /// Number of links from one language into another
    LinkCounts {
        source: String,
        target: String,
    },
    /// Translations of a term into a language
    Link {
        source: String,
        target: String,
        term: String,
    },
    /// Per-language record counts, grouped page by page
    Stats {
        /// First target language (inclusive)
        #[arg(long)]
        from: Option<String>,
        /// Last target language (exclusive)
        #[arg(long)]
        to: Option<String>,
        /// Rows fetched per page
        #[arg(short = 'n', long, default_value = "1000")]
        page_size: usize,
    },
    /// List every document id and revision, or every row of one view
    Dump {
        /// View to list instead of documents (e.g. "langs/by_source")
        #[arg(long)]
        view: Option<String>,
        /// Rows fetched per page
        #[arg(short = 'n', long, default_value = "1000")]
        page_size: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let collection = cli.store.collection.as_str();

    let result = match &cli.command {
        Commands::Import {
            source_language,
            dump,
            batch_size,
            filter,
            retries,
            milestone_every,
        } => {
            let mut config = ImportConfig::new(source_language);
            config.collection = collection.to_string();
            config.batch_size = *batch_size;
            config.filter_command = filter.clone();
            config.retries = *retries;
            config.milestone_every = *milestone_every;
            let source = DumpSource::resolve(source_language, dump.as_deref());

            let summary = import::run(cli.store.config(), config, source).await?;
            summary.print();
            Ok(())
        }
        Commands::Counts { language } => {
            let store = cli.store.open()?;
            let lookup = Lookup::Counts {
                language: language.clone(),
            };
            print_rows(&lookup.run(&store, collection)?);
            Ok(())
        }
        Commands::LinkCounts { source, target } => {
            let store = cli.store.open()?;
            let lookup = Lookup::LinkCounts {
                source: source.clone(),
                target: target.clone(),
            };
            print_rows(&lookup.run(&store, collection)?);
            Ok(())
        }
        Commands::Link {
            source,
            target,
            term,
        } => {
            let store = cli.store.open()?;
            let lookup = Lookup::Link {
                source: source.clone(),
                target: target.clone(),
                term: term.clone(),
            };
            print_rows(&lookup.run(&store, collection)?);
            Ok(())
        }
        Commands::Stats {
            from,
            to,
            page_size,
        } => {
            let store = cli.store.open()?;
            let lastkey = to.as_deref().map(ViewKey::text);

            println!("{:<10} | {:>10}", "Language", "Records");
            println!("{}", "-".repeat(23));
            let mut total = 0usize;
            let languages = Pager::new(&store, collection).walk_groups(
                "langs/by_target_lang",
                *page_size,
                from.as_deref().map(ViewKey::text),
                lastkey.as_ref(),
                |key, values| {
                    let lang = key.parts().first().cloned().unwrap_or_default();
                    println!("{:<10} | {:>10}", truncate(&lang, 10), values.len());
                    total += values.len();
                },
            )?;
            println!("\n{} languages, {} records", languages, total);
            Ok(())
        }
        Commands::Dump { view, page_size } => {
            let store = cli.store.open()?;
            let pager = Pager::new(&store, collection);
            let rows = match view {
                Some(index) => pager.walk_view(index, *page_size, |page| {
                    for row in page {
                        let key = row.key.as_ref().map(ViewKey::to_json).unwrap_or_default();
                        println!("{}\t{}", key, row.id.as_deref().unwrap_or("-"));
                    }
                })?,
                None => pager.walk_all(*page_size, |page| {
                    for row in page {
                        println!("{}\t{}", row.id, row.rev);
                    }
                })?,
            };
            eprintln!("{} rows", rows);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn print_rows(rows: &[ViewRow]) {
    if rows.is_empty() {
        println!("No rows.");
        return;
    }
    for row in rows {
        let key = row.key.as_ref().map(ViewKey::to_json).unwrap_or_else(|| "null".into());
        match &row.doc {
            Some(doc) => println!("{}\t{}", key, doc),
            None => println!("{}\t{}", key, row.value),
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn import_requires_a_language() {
        assert!(Cli::try_parse_from(["lexicon", "import"]).is_err());
        let cli = Cli::try_parse_from(["lexicon", "import", "pt", "dump.xml", "-b", "10"]).unwrap();
        match cli.command {
            Commands::Import {
                source_language,
                dump,
                batch_size,
                ..
            } => {
                assert_eq!(source_language, "pt");
                assert_eq!(dump.as_deref(), Some("dump.xml"));
                assert_eq!(batch_size, 10);
            }
            _ => panic!("expected import"),
        }
    }

    #[test]
    fn formats_durations() {
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.5s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1h 2m 5s");
    }

    #[test]
    fn truncates_long_values() {
        assert_eq!(truncate("pt", 10), "pt");
        assert_eq!(truncate("abcdef", 3), "abc...");
    }
}
