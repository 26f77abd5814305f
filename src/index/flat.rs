//! Exact index
//!
//! Scans every stored vector. Backs the synchronizer's pending buffer and any
//! collection configured with `index_type = "flat"`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{QuiverError, Result};

use super::config::Space;
use super::hnsw_adapter::sort_neighbors;
use super::r#trait::{CandidateSet, Neighbor};
use super::AnnIndex;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlatIndex {
    space: Space,
    vectors: HashMap<String, Vec<f32>>,
    dims: Option<usize>,
    version: u64,
}

impl FlatIndex {
    pub fn new(space: Space) -> Self {
        Self {
            space,
            vectors: HashMap::new(),
            dims: None,
            version: 0,
        }
    }

    pub fn from_bytes(space: Space, data: &[u8]) -> Result<Self> {
        let index: FlatIndex = bincode::deserialize(data)?;
        if index.space != space {
            return Err(QuiverError::index(format!(
                "persisted space {} differs from configured {}",
                index.space.name(),
                space.name()
            )));
        }
        Ok(index)
    }

    /// Stored vector for `id`
    pub fn vector(&self, id: &str) -> Option<&[f32]> {
        self.vectors.get(id).map(Vec::as_slice)
    }
}

impl AnnIndex for FlatIndex {
    fn insert_or_replace(&mut self, id: &str, embedding: &[f32]) -> Result<()> {
        match self.dims {
            Some(dims) if dims != embedding.len() => {
                return Err(QuiverError::dimension_mismatch(dims, embedding.len()));
            }
            Some(_) => {}
            None => self.dims = Some(embedding.len()),
        }
        self.vectors.insert(id.to_string(), embedding.to_vec());
        Ok(())
    }

    fn remove(&mut self, id: &str) -> bool {
        self.vectors.remove(id).is_some()
    }

    fn search(&self, query: &[f32], k: usize, candidates: Option<&CandidateSet>) -> Vec<Neighbor> {
        if k == 0 {
            return Vec::new();
        }
        let score = |(id, vector): (&String, &Vec<f32>)| Neighbor {
            id: id.clone(),
            distance: self.space.distance(query, vector),
        };
        let mut scored: Vec<Neighbor> = match candidates {
            Some(set) if set.len() < self.vectors.len() => set
                .iter()
                .filter_map(|id| self.vectors.get_key_value(id))
                .map(score)
                .collect(),
            Some(set) => self
                .vectors
                .iter()
                .filter(|(id, _)| set.contains(*id))
                .map(score)
                .collect(),
            None => self.vectors.iter().map(score).collect(),
        };
        sort_neighbors(&mut scored);
        scored.truncate(k);
        scored
    }

    fn contains(&self, id: &str) -> bool {
        self.vectors.contains_key(id)
    }

    fn len(&self) -> usize {
        self.vectors.len()
    }

    fn dimensions(&self) -> Option<usize> {
        self.dims
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    fn index_type_name(&self) -> &'static str {
        "Flat"
    }
}
