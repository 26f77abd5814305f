//! Core data types shared across the engine
//!
//! - [`Record`] and its scalar [`MetadataValue`] map
//! - Request shapes ([`Include`], [`Sort`]) and result shapes ([`GetResult`],
//!   [`QueryResult`], [`WriteOutcome`])
//! - [`EmbeddingFunction`], the injected text-to-vector capability
//! - Normalization of untyped JSON embeddings into `f32` vectors

use crate::error::{QuiverError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

// ============================================================================
// Metadata
// ============================================================================

/// Scalar metadata value
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum MetadataValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

/// Metadata map attached to a record or a collection
pub type Metadata = BTreeMap<String, MetadataValue>;

impl MetadataValue {
    /// Convert a JSON scalar; arrays, objects and null are rejected
    pub fn from_json(value: &Value) -> Result<Self> {
        match value {
            Value::String(s) => Ok(MetadataValue::Str(s.clone())),
            Value::Bool(b) => Ok(MetadataValue::Bool(*b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(MetadataValue::Int(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(MetadataValue::Float(f))
                } else {
                    Err(QuiverError::invalid_argument(format!(
                        "Unsupported metadata number {}",
                        n
                    )))
                }
            }
            other => Err(QuiverError::invalid_argument(format!(
                "Expected metadata value to be a str, int, float or bool, got {}",
                other
            ))),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            MetadataValue::Str(s) => Value::String(s.clone()),
            MetadataValue::Int(i) => Value::from(*i),
            MetadataValue::Float(f) => Value::from(*f),
            MetadataValue::Bool(b) => Value::Bool(*b),
        }
    }

    /// Numeric view; ints and floats compare on one scale
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetadataValue::Int(i) => Some(*i as f64),
            MetadataValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MetadataValue::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        MetadataValue::Str(s.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        MetadataValue::Str(s)
    }
}

impl From<i64> for MetadataValue {
    fn from(i: i64) -> Self {
        MetadataValue::Int(i)
    }
}

impl From<f64> for MetadataValue {
    fn from(f: f64) -> Self {
        MetadataValue::Float(f)
    }
}

impl From<bool> for MetadataValue {
    fn from(b: bool) -> Self {
        MetadataValue::Bool(b)
    }
}

/// Parse a JSON object into a metadata map
pub fn metadata_from_json(value: &Value) -> Result<Metadata> {
    let object = value.as_object().ok_or_else(|| {
        QuiverError::invalid_argument(format!("Expected metadata to be an object, got {}", value))
    })?;
    object
        .iter()
        .map(|(k, v)| Ok((k.clone(), MetadataValue::from_json(v)?)))
        .collect()
}

/// Render a metadata map as a JSON object
pub fn metadata_to_json(metadata: &Metadata) -> Value {
    Value::Object(
        metadata
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect(),
    )
}

// ============================================================================
// Records
// ============================================================================

/// A stored record
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub embedding: Vec<f32>,
    pub metadata: Option<Metadata>,
    pub document: Option<String>,
}

/// Embedding function bound to a collection
///
/// Only called for `query_texts` and for writes that carry documents without
/// embeddings; the engine never runs a model itself.
pub trait EmbeddingFunction: Send + Sync {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn name(&self) -> &str;
}

/// Convert untyped JSON embeddings to `f32` vectors
///
/// Integers and floats are accepted; booleans, strings and empty vectors are not.
pub fn normalize_embeddings(values: &[Value]) -> Result<Vec<Vec<f32>>> {
    values
        .iter()
        .map(|embedding| {
            let items = embedding.as_array().ok_or_else(|| {
                QuiverError::invalid_argument(format!(
                    "Expected each embedding in the embeddings to be a list, got {}",
                    embedding
                ))
            })?;
            if items.is_empty() {
                return Err(QuiverError::invalid_argument(
                    "Expected each embedding in the embeddings to be a non-empty list",
                ));
            }
            items
                .iter()
                .map(|item| match item {
                    Value::Number(n) => n.as_f64().map(|f| f as f32).ok_or_else(|| {
                        QuiverError::invalid_argument(format!(
                            "Expected each value in the embedding to be a int or float, got {}",
                            n
                        ))
                    }),
                    other => Err(QuiverError::invalid_argument(format!(
                        "Expected each value in the embedding to be a int or float, got {}",
                        other
                    ))),
                })
                .collect()
        })
        .collect()
}

// ============================================================================
// Request shapes
// ============================================================================

/// Optional fields a read may return
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Include {
    Embeddings,
    Metadatas,
    Documents,
    Distances,
}

impl Include {
    /// Fields returned by `get` when the caller does not choose
    pub fn default_get() -> Vec<Include> {
        vec![Include::Metadatas, Include::Documents]
    }

    /// Fields returned by `query` when the caller does not choose
    pub fn default_query() -> Vec<Include> {
        vec![Include::Metadatas, Include::Documents, Include::Distances]
    }

    /// Every field; `peek` returns records in full
    pub fn all() -> Vec<Include> {
        vec![Include::Embeddings, Include::Metadatas, Include::Documents]
    }

    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "embeddings" => Ok(Include::Embeddings),
            "metadatas" => Ok(Include::Metadatas),
            "documents" => Ok(Include::Documents),
            "distances" => Ok(Include::Distances),
            other => Err(QuiverError::invalid_argument(format!(
                "Expected include item to be one of embeddings, metadatas, documents, distances, got {}",
                other
            ))),
        }
    }
}

/// Ordering applied to `get` before offset/limit
#[derive(Clone, Debug, PartialEq)]
pub enum SortKey {
    /// Lexicographic by id
    Id,
    /// By a metadata field; records missing it sort last
    Metadata(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Sort {
    pub key: SortKey,
    pub descending: bool,
}

impl Sort {
    pub fn by_id() -> Self {
        Self {
            key: SortKey::Id,
            descending: false,
        }
    }

    pub fn by_metadata(field: impl Into<String>) -> Self {
        Self {
            key: SortKey::Metadata(field.into()),
            descending: false,
        }
    }

    pub fn descending(mut self) -> Self {
        self.descending = true;
        self
    }
}

// ============================================================================
// Result shapes
// ============================================================================

/// Result of add/update/upsert: which ids were written and which were skipped
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct WriteOutcome {
    pub written: Vec<String>,
    pub skipped: Vec<String>,
}

/// Result of `get`; optional columns are present only when included
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct GetResult {
    pub ids: Vec<String>,
    pub embeddings: Option<Vec<Vec<f32>>>,
    pub metadatas: Option<Vec<Option<Metadata>>>,
    pub documents: Option<Vec<Option<String>>>,
}

impl GetResult {
    pub fn empty(include: &[Include]) -> Self {
        Self {
            ids: Vec::new(),
            embeddings: include.contains(&Include::Embeddings).then(Vec::new),
            metadatas: include.contains(&Include::Metadatas).then(Vec::new),
            documents: include.contains(&Include::Documents).then(Vec::new),
        }
    }

    pub(crate) fn push(&mut self, record: &Record) {
        self.ids.push(record.id.clone());
        if let Some(embeddings) = self.embeddings.as_mut() {
            embeddings.push(record.embedding.clone());
        }
        if let Some(metadatas) = self.metadatas.as_mut() {
            metadatas.push(record.metadata.clone());
        }
        if let Some(documents) = self.documents.as_mut() {
            documents.push(record.document.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Result of `query`: one inner list per query vector
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct QueryResult {
    pub ids: Vec<Vec<String>>,
    pub distances: Option<Vec<Vec<f32>>>,
    pub embeddings: Option<Vec<Vec<Vec<f32>>>>,
    pub metadatas: Option<Vec<Vec<Option<Metadata>>>>,
    pub documents: Option<Vec<Vec<Option<String>>>>,
}

impl QueryResult {
    /// `n_queries` empty rows for every included column
    pub fn empty(n_queries: usize, include: &[Include]) -> Self {
        fn rows<T: Clone>(n: usize) -> Vec<Vec<T>> {
            vec![Vec::new(); n]
        }
        Self {
            ids: rows(n_queries),
            distances: include.contains(&Include::Distances).then(|| rows(n_queries)),
            embeddings: include.contains(&Include::Embeddings).then(|| rows(n_queries)),
            metadatas: include.contains(&Include::Metadatas).then(|| rows(n_queries)),
            documents: include.contains(&Include::Documents).then(|| rows(n_queries)),
        }
    }

    pub(crate) fn push(&mut self, query: usize, record: &Record, distance: f32) {
        self.ids[query].push(record.id.clone());
        if let Some(distances) = self.distances.as_mut() {
            distances[query].push(distance);
        }
        if let Some(embeddings) = self.embeddings.as_mut() {
            embeddings[query].push(record.embedding.clone());
        }
        if let Some(metadatas) = self.metadatas.as_mut() {
            metadatas[query].push(record.metadata.clone());
        }
        if let Some(documents) = self.documents.as_mut() {
            documents[query].push(record.document.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_embeddings_casts_ints() {
        let normalized = normalize_embeddings(&[json!([1, 2.5, -3])]).unwrap();
        assert_eq!(normalized, vec![vec![1.0, 2.5, -3.0]]);
    }

    #[test]
    fn test_normalize_embeddings_rejects_bool_and_str() {
        let err = normalize_embeddings(&[json!([1.0, true])]).unwrap_err();
        assert_eq!(err.kind(), "InvalidArgument");
        assert!(err.to_string().contains("int or float"));

        let err = normalize_embeddings(&[json!(["1.0"])]).unwrap_err();
        assert!(err.to_string().contains("int or float"));
    }

    #[test]
    fn test_normalize_embeddings_rejects_empty() {
        let err = normalize_embeddings(&[json!([])]).unwrap_err();
        assert!(err.to_string().contains("non-empty list"));
    }

    #[test]
    fn test_metadata_json_conversion() {
        let metadata = metadata_from_json(&json!({"a": 1, "b": 1.5, "c": "x", "d": false})).unwrap();
        assert_eq!(metadata["a"], MetadataValue::Int(1));
        assert_eq!(metadata["b"], MetadataValue::Float(1.5));
        assert_eq!(metadata["c"], MetadataValue::Str("x".into()));
        assert_eq!(metadata["d"], MetadataValue::Bool(false));
        assert_eq!(metadata_to_json(&metadata), json!({"a": 1, "b": 1.5, "c": "x", "d": false}));

        assert!(metadata_from_json(&json!({"a": [1, 2]})).is_err());
        assert!(metadata_from_json(&json!({"a": null})).is_err());
    }

    #[test]
    fn test_empty_query_result_shape() {
        let result = QueryResult::empty(2, &Include::default_query());
        assert_eq!(result.ids, vec![Vec::<String>::new(), Vec::new()]);
        assert_eq!(result.distances.as_ref().map(Vec::len), Some(2));
        assert_eq!(result.metadatas.as_ref().map(Vec::len), Some(2));
        assert_eq!(result.documents.as_ref().map(Vec::len), Some(2));
        assert_eq!(result.distances.unwrap()[1], Vec::<f32>::new());
        assert!(result.embeddings.is_none());
    }

    #[test]
    fn test_include_parse() {
        assert_eq!(Include::parse("embeddings").unwrap(), Include::Embeddings);
        assert!(Include::parse("uris").is_err());
    }
}
