//! Call payloads for collection operations
//!
//! Predicates arrive as `serde_json::Value` the way a transport layer hands them
//! over; they are parsed (and rejected if malformed) before anything runs.

use crate::defaults::DEFAULT_N_RESULTS;
use crate::types::{Include, Metadata, Sort};
use serde_json::Value;

/// Parallel arrays for add/update/upsert
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RecordBatch {
    pub ids: Vec<String>,
    pub embeddings: Option<Vec<Vec<f32>>>,
    pub metadatas: Option<Vec<Option<Metadata>>>,
    pub documents: Option<Vec<Option<String>>>,
}

impl RecordBatch {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: ids.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn embeddings(mut self, embeddings: Vec<Vec<f32>>) -> Self {
        self.embeddings = Some(embeddings);
        self
    }

    pub fn metadatas(mut self, metadatas: Vec<Option<Metadata>>) -> Self {
        self.metadatas = Some(metadatas);
        self
    }

    pub fn documents<I, S>(mut self, documents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.documents = Some(documents.into_iter().map(|d| Some(d.into())).collect());
        self
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Arguments of `get`
#[derive(Clone, Debug, Default)]
pub struct GetRequest {
    pub ids: Option<Vec<String>>,
    pub where_: Option<Value>,
    pub where_document: Option<Value>,
    pub sort: Option<Sort>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    /// Defaults to metadatas + documents
    pub include: Option<Vec<Include>>,
}

impl GetRequest {
    pub fn ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: Some(ids.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    pub fn filter(where_: Value) -> Self {
        Self {
            where_: Some(where_),
            ..Self::default()
        }
    }

    pub fn include(mut self, include: Vec<Include>) -> Self {
        self.include = Some(include);
        self
    }
}

/// Arguments of `delete`; at least one selector must be present
#[derive(Clone, Debug, Default)]
pub struct DeleteRequest {
    pub ids: Option<Vec<String>>,
    pub where_: Option<Value>,
    pub where_document: Option<Value>,
}

impl DeleteRequest {
    pub fn ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: Some(ids.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    pub fn filter(where_: Value) -> Self {
        Self {
            where_: Some(where_),
            ..Self::default()
        }
    }

    pub fn document_filter(where_document: Value) -> Self {
        Self {
            where_document: Some(where_document),
            ..Self::default()
        }
    }
}

/// Arguments of `query`; exactly one of embeddings or texts
#[derive(Clone, Debug)]
pub struct QueryRequest {
    pub query_embeddings: Option<Vec<Vec<f32>>>,
    pub query_texts: Option<Vec<String>>,
    pub n_results: usize,
    pub where_: Option<Value>,
    pub where_document: Option<Value>,
    /// Defaults to metadatas + documents + distances
    pub include: Option<Vec<Include>>,
}

impl Default for QueryRequest {
    fn default() -> Self {
        Self {
            query_embeddings: None,
            query_texts: None,
            n_results: DEFAULT_N_RESULTS,
            where_: None,
            where_document: None,
            include: None,
        }
    }
}

impl QueryRequest {
    pub fn embeddings(query_embeddings: Vec<Vec<f32>>, n_results: usize) -> Self {
        Self {
            query_embeddings: Some(query_embeddings),
            n_results,
            ..Self::default()
        }
    }

    pub fn texts<I, S>(texts: I, n_results: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            query_texts: Some(texts.into_iter().map(Into::into).collect()),
            n_results,
            ..Self::default()
        }
    }

    pub fn filter(mut self, where_: Value) -> Self {
        self.where_ = Some(where_);
        self
    }

    pub fn document_filter(mut self, where_document: Value) -> Self {
        self.where_document = Some(where_document);
        self
    }

    pub fn include(mut self, include: Vec<Include>) -> Self {
        self.include = Some(include);
        self
    }
}
