use crate::db::{Store, ViewKey, ViewQuery, ViewRow};
use crate::error::StoreError;

/// Read-side lookups over the lexicon indexes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// Translations into one language.
    Counts { language: String },
    /// Links from a source language into a target language.
    LinkCounts { source: String, target: String },
    /// Translations of one term, with their documents.
    Link {
        source: String,
        target: String,
        term: String,
    },
}

impl Lookup {
    pub fn index(&self) -> &'static str {
        match self {
            Lookup::Counts { .. } => "langs/count",
            Lookup::LinkCounts { .. } => "langs/link-count",
            Lookup::Link { .. } => "langs/by_source_and_target",
        }
    }

    pub fn query(&self) -> ViewQuery {
        match self {
            Lookup::Counts { language } => {
                ViewQuery::new().key(ViewKey::text(language.as_str())).group(true)
            }
            Lookup::LinkCounts { source, target } => ViewQuery::new()
                .key(ViewKey::tuple([source.as_str(), target.as_str()]))
                .group(true),
            Lookup::Link {
                source,
                target,
                term,
            } => ViewQuery::new()
                .key(ViewKey::tuple([source.as_str(), target.as_str(), term.as_str()]))
                .include_docs(true),
        }
    }

    pub fn run<S: Store>(&self, store: &S, db: &str) -> Result<Vec<ViewRow>, StoreError> {
        store.query_index(db, self.index(), &self.query())
    }
}
