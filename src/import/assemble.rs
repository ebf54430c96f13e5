use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::extract::Link;

/// One source-language term and its translation into another wiki language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationRecord {
    pub source_language: String,
    pub source_word: String,
    pub target_language: String,
    pub target_word: String,
}

impl TranslationRecord {
    pub fn to_document(&self) -> Value {
        json!({
            "source_language": self.source_language,
            "source_word": self.source_word,
            "target_language": self.target_language,
            "target_word": self.target_word,
        })
    }
}

pub type Batch = Vec<TranslationRecord>;

/// Builds records for one source language and groups them into fixed-size batches.
pub struct RecordAssembler {
    source_language: String,
    batch_size: usize,
    batch: Batch,
    produced: usize,
}

impl RecordAssembler {
    pub fn new(source_language: &str, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        RecordAssembler {
            source_language: source_language.to_string(),
            batch_size,
            batch: Vec::with_capacity(batch_size),
            produced: 0,
        }
    }

    /// Add a record; returns the batch once it is full.
    pub fn push(&mut self, link: Link) -> Option<Batch> {
        self.batch.push(TranslationRecord {
            source_language: self.source_language.clone(),
            source_word: link.source_word,
            target_language: link.target_language,
            target_word: link.target_word,
        });
        self.produced += 1;

        if self.batch.len() >= self.batch_size {
            Some(std::mem::replace(
                &mut self.batch,
                Vec::with_capacity(self.batch_size),
            ))
        } else {
            None
        }
    }

    /// Remaining partial batch at end of stream.
    pub fn finish(&mut self) -> Option<Batch> {
        if self.batch.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.batch))
        }
    }

    pub fn produced(&self) -> usize {
        self.produced
    }
}
