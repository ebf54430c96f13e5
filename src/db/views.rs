//! Index definitions: how a document maps to view rows.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ViewKey;
use crate::error::StoreError;

pub const DESIGN_PREFIX: &str = "_design/";

/// What a view emits as the row value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmitValue {
    /// The integer 1, for counting views.
    #[default]
    One,
    /// The whole document.
    Doc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reduce {
    Sum,
}

/// A secondary index: key fields, emitted value, optional reduce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub key: Vec<String>,
    #[serde(default)]
    pub value: EmitValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reduce: Option<Reduce>,
}

impl IndexDefinition {
    pub fn new<I, S>(key: I, value: EmitValue) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        IndexDefinition {
            key: key.into_iter().map(Into::into).collect(),
            value,
            reduce: None,
        }
    }

    pub fn with_sum(mut self) -> Self {
        self.reduce = Some(Reduce::Sum);
        self
    }

    /// The row this document contributes, if every key field is a string.
    pub fn emit(&self, doc: &Value) -> Option<(ViewKey, Value)> {
        let mut parts = Vec::with_capacity(self.key.len());
        for field in &self.key {
            parts.push(doc.get(field)?.as_str()?);
        }
        let value = match self.value {
            EmitValue::One => Value::from(1),
            EmitValue::Doc => doc.clone(),
        };
        Some((ViewKey::tuple(parts), value))
    }

    /// Stable fingerprint; a changed definition invalidates materialized rows.
    pub fn signature(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_default();
        format!("{:x}", md5::compute(json))
    }
}

/// A stored set of index definitions under `_design/<name>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesignDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    pub views: BTreeMap<String, IndexDefinition>,
}

impl DesignDocument {
    pub fn new(name: &str) -> Self {
        DesignDocument {
            id: format!("{}{}", DESIGN_PREFIX, name),
            rev: None,
            views: BTreeMap::new(),
        }
    }

    pub fn with_view(mut self, name: &str, def: IndexDefinition) -> Self {
        self.views.insert(name.to_string(), def);
        self
    }

    pub fn name(&self) -> &str {
        self.id.strip_prefix(DESIGN_PREFIX).unwrap_or(&self.id)
    }

    pub fn to_value(&self) -> Result<Value, StoreError> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_value(doc: Value) -> Result<Self, StoreError> {
        Ok(serde_json::from_value(doc)?)
    }
}

/// Split `design/view` into the design document id and the view name.
pub fn split_index(index: &str) -> Result<(String, &str), StoreError> {
    match index.split_once('/') {
        Some((design, view)) if !design.is_empty() && !view.is_empty() => {
            Ok((format!("{}{}", DESIGN_PREFIX, design), view))
        }
        _ => Err(StoreError::UnknownIndex(index.to_string())),
    }
}

pub fn is_design_id(id: &str) -> bool {
    id.starts_with(DESIGN_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn emits_tuple_key() {
        let def = IndexDefinition::new(["source_language", "target_language"], EmitValue::One);
        let doc = json!({"source_language": "pt", "target_language": "en", "source_word": "Gato"});
        let (key, value) = def.emit(&doc).unwrap();
        assert_eq!(key, ViewKey::tuple(["pt", "en"]));
        assert_eq!(value, json!(1));
    }

    #[test]
    fn skips_docs_missing_a_field() {
        let def = IndexDefinition::new(["target_word"], EmitValue::Doc);
        assert!(def.emit(&json!({"source_word": "Cat"})).is_none());
        assert!(def.emit(&json!({"target_word": 7})).is_none());
    }

    #[test]
    fn design_document_round_trips_through_json() {
        let design = DesignDocument::new("langs")
            .with_view("count", IndexDefinition::new(["target_language"], EmitValue::One).with_sum());
        let value = design.to_value().unwrap();
        assert_eq!(value["_id"], "_design/langs");
        assert_eq!(value["views"]["count"]["reduce"], "sum");
        assert!(value.get("_rev").is_none());
        assert_eq!(DesignDocument::from_value(value).unwrap(), design);
        assert_eq!(design.name(), "langs");
    }

    #[test]
    fn splits_index_names() {
        let (design, view) = split_index("langs/count").unwrap();
        assert_eq!(design, "_design/langs");
        assert_eq!(view, "count");
        assert!(split_index("count").is_err());
        assert!(split_index("/count").is_err());
    }
}
