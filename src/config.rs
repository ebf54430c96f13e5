use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_DB_PATH: &str = "data/lexicon.sqlite";
pub const DEFAULT_COLLECTION: &str = "lexicon";
pub const DEFAULT_BATCH_SIZE: usize = 2500;
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_RETRIES: u32 = 3;
pub const BASE_BACKOFF_MS: u64 = 200;
/// Batches between timestamped progress milestones.
pub const DEFAULT_MILESTONE_EVERY: usize = 40;
/// Aggregate view queried after each stored batch to keep it warm.
pub const REFRESH_INDEX: &str = "langs/count";

/// Latest pages-articles dump for a wiki language code.
pub const DUMP_URL_TEMPLATE: &str =
    "https://dumps.wikimedia.org/{lang}wiki/latest/{lang}wiki-latest-pages-articles.xml.bz2";

/// Reads a raw (bzip2) dump on stdin, writes `TITLE:` and `<lang>:<word>` lines.
pub const DEFAULT_FILTER: &str = r#"bzegrep '(^\[\[[a-z]{2,3}:(.*?)\]\])|<title>' | sed 's/<title>/TITLE:/g' | sed 's/<\/title>//g' | egrep '(^\[\[[a-z]{2,3}:(.*?)\]\])|TITLE' | sed 's/\[\[//g' | sed 's/\]\]//g' | sed 's/ *TITLE/TITLE/g' | sed 's/<\/text>//g'"#;

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub path: PathBuf,
    pub busy_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            path: PathBuf::from(DEFAULT_DB_PATH),
            busy_timeout: Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImportConfig {
    pub collection: String,
    pub source_language: String,
    pub batch_size: usize,
    pub filter_command: String,
    pub retries: u32,
    pub base_backoff: Duration,
    pub milestone_every: usize,
    pub refresh_index: String,
}

impl ImportConfig {
    pub fn new(source_language: &str) -> Self {
        ImportConfig {
            collection: DEFAULT_COLLECTION.to_string(),
            source_language: source_language.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            filter_command: DEFAULT_FILTER.to_string(),
            retries: DEFAULT_RETRIES,
            base_backoff: Duration::from_millis(BASE_BACKOFF_MS),
            milestone_every: DEFAULT_MILESTONE_EVERY,
            refresh_index: REFRESH_INDEX.to_string(),
        }
    }
}

pub fn dump_url(lang: &str) -> String {
    DUMP_URL_TEMPLATE.replace("{lang}", lang)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dump_url_uses_language_twice() {
        assert_eq!(
            dump_url("pt"),
            "https://dumps.wikimedia.org/ptwiki/latest/ptwiki-latest-pages-articles.xml.bz2"
        );
    }
}
