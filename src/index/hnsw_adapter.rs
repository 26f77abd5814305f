//! HNSW Adapter
//!
//! Wraps [`HnswIndex`] to implement the [`AnnIndex`] trait. The graph works in
//! slots; the adapter owns the id <-> slot labels. Replacing an id tombstones
//! its old slot and inserts a fresh one; once tombstones exceed the compaction
//! ratio the graph is rebuilt from its live vectors.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::defaults::COMPACTION_TOMBSTONE_RATIO;
use crate::error::{QuiverError, Result};
use crate::hnsw::{persistence, HnswIndex};

use super::config::AnnIndexConfig;
use super::r#trait::{CandidateSet, Neighbor};
use super::AnnIndex;

/// Adapter that wraps HnswIndex to implement AnnIndex trait
pub struct HnswAdapter {
    inner: HnswIndex,
    config: AnnIndexConfig,
    /// id -> live slot
    slots: HashMap<String, u32>,
    /// slot -> id, `None` for tombstones
    labels: Vec<Option<String>>,
    dims: Option<usize>,
    version: u64,
}

/// Persisted adapter state; the graph is nested in its own encoding
#[derive(Serialize, Deserialize)]
struct AdapterState {
    version: u64,
    dims: Option<usize>,
    labels: Vec<Option<String>>,
    graph: Vec<u8>,
}

impl fmt::Debug for HnswAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HnswAdapter")
            .field("len", &self.slots.len())
            .field("tombstones", &self.inner.deleted_count())
            .field("version", &self.version)
            .field("params", &self.config.hnsw)
            .finish()
    }
}

impl HnswAdapter {
    /// Create a new HNSW adapter with the given configuration
    pub fn new(config: AnnIndexConfig) -> Self {
        Self {
            inner: HnswIndex::new(config.hnsw.clone(), config.space),
            config,
            slots: HashMap::new(),
            labels: Vec::new(),
            dims: None,
            version: 0,
        }
    }

    /// Restore from bytes produced by [`AnnIndex::to_bytes`]
    pub fn from_bytes(config: AnnIndexConfig, data: &[u8]) -> Result<Self> {
        let state: AdapterState = bincode::deserialize(data)?;
        let inner = persistence::decode_index(&state.graph)?;
        if inner.len() != state.labels.len() {
            return Err(QuiverError::index(format!(
                "label table has {} entries for {} graph nodes",
                state.labels.len(),
                inner.len()
            )));
        }
        if inner.space() != config.space {
            return Err(QuiverError::index(format!(
                "persisted space {} differs from configured {}",
                inner.space().name(),
                config.space.name()
            )));
        }

        let mut slots = HashMap::with_capacity(state.labels.len());
        for (slot, label) in state.labels.iter().enumerate() {
            if let Some(id) = label {
                if inner.is_deleted(slot as u32) || slots.insert(id.clone(), slot as u32).is_some() {
                    return Err(QuiverError::index(format!("inconsistent label for {}", id)));
                }
            }
        }

        Ok(Self {
            inner,
            config,
            slots,
            labels: state.labels,
            dims: state.dims,
            version: state.version,
        })
    }

    /// Get the underlying graph
    pub fn inner(&self) -> &HnswIndex {
        &self.inner
    }

    /// Tombstoned slots still held by the graph
    pub fn tombstones(&self) -> usize {
        self.inner.deleted_count()
    }

    fn tombstone(&mut self, slot: u32) {
        self.inner.mark_deleted(slot);
        if let Some(label) = self.labels.get_mut(slot as usize) {
            *label = None;
        }
    }

    /// Rebuild the graph from live vectors once tombstones dominate
    fn maybe_compact(&mut self) {
        let total = self.inner.len();
        if total == 0 {
            return;
        }
        let ratio = self.inner.deleted_count() as f64 / total as f64;
        if ratio <= COMPACTION_TOMBSTONE_RATIO {
            return;
        }

        tracing::debug!(
            live = self.slots.len(),
            tombstones = self.inner.deleted_count(),
            "Compacting HNSW graph"
        );

        let mut graph = HnswIndex::new(self.config.hnsw.clone(), self.config.space);
        let mut labels = Vec::with_capacity(self.slots.len());
        let mut slots = HashMap::with_capacity(self.slots.len());
        for (old_slot, label) in self.labels.iter().enumerate() {
            let Some(id) = label else { continue };
            let Some(vector) = self.inner.vector(old_slot as u32) else { continue };
            let slot = graph.insert(vector.to_vec());
            labels.push(Some(id.clone()));
            slots.insert(id.clone(), slot);
        }

        self.inner = graph;
        self.labels = labels;
        self.slots = slots;
    }

    /// Exact scan over the candidate ids
    fn brute_force(&self, query: &[f32], k: usize, candidates: &CandidateSet) -> Vec<Neighbor> {
        let space = self.config.space;
        let mut scored: Vec<Neighbor> = candidates
            .iter()
            .filter_map(|id| {
                let slot = *self.slots.get(id)?;
                let vector = self.inner.vector(slot)?;
                Some(Neighbor {
                    id: id.clone(),
                    distance: space.distance(query, vector),
                })
            })
            .collect();
        sort_neighbors(&mut scored);
        scored.truncate(k);
        scored
    }
}

/// Ascending distance, ties broken by id
pub(crate) fn sort_neighbors(neighbors: &mut [Neighbor]) {
    neighbors.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
}

impl AnnIndex for HnswAdapter {
    fn insert_or_replace(&mut self, id: &str, embedding: &[f32]) -> Result<()> {
        match self.dims {
            Some(dims) if dims != embedding.len() => {
                return Err(QuiverError::dimension_mismatch(dims, embedding.len()));
            }
            Some(_) => {}
            None => self.dims = Some(embedding.len()),
        }

        if let Some(old) = self.slots.remove(id) {
            self.tombstone(old);
        }
        let slot = self.inner.insert(embedding.to_vec());
        debug_assert_eq!(slot as usize, self.labels.len());
        self.labels.push(Some(id.to_string()));
        self.slots.insert(id.to_string(), slot);

        self.maybe_compact();
        Ok(())
    }

    fn remove(&mut self, id: &str) -> bool {
        match self.slots.remove(id) {
            Some(slot) => {
                self.tombstone(slot);
                self.maybe_compact();
                true
            }
            None => false,
        }
    }

    fn search(&self, query: &[f32], k: usize, candidates: Option<&CandidateSet>) -> Vec<Neighbor> {
        if k == 0 || self.slots.is_empty() {
            return Vec::new();
        }
        if let Some(candidates) = candidates {
            if candidates.len() <= self.config.brute_force_threshold || candidates.len() <= k {
                return self.brute_force(query, k, candidates);
            }
        }

        let labels = &self.labels;
        let allow = |slot: u32| match (candidates, labels.get(slot as usize)) {
            (_, None) | (_, Some(None)) => false,
            (None, Some(Some(_))) => true,
            (Some(set), Some(Some(id))) => set.contains(id),
        };

        let mut neighbors: Vec<Neighbor> = self
            .inner
            .search(query, k, None, &allow)
            .into_iter()
            .filter_map(|(slot, distance)| {
                let id = labels.get(slot as usize)?.as_ref()?;
                Some(Neighbor {
                    id: id.clone(),
                    distance,
                })
            })
            .collect();
        sort_neighbors(&mut neighbors);
        neighbors
    }

    fn contains(&self, id: &str) -> bool {
        self.slots.contains_key(id)
    }

    fn len(&self) -> usize {
        self.slots.len()
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
        let state = AdapterState {
            version: self.version,
            dims: self.dims,
            labels: self.labels.clone(),
            graph: persistence::encode_index(&self.inner)?,
        };
        Ok(bincode::serialize(&state)?)
    }

    fn index_type_name(&self) -> &'static str {
        "HNSW"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::HnswParams;

    fn adapter() -> HnswAdapter {
        HnswAdapter::new(AnnIndexConfig::hnsw().with_hnsw(HnswParams::with_m(4)))
    }

    fn ids(neighbors: &[Neighbor]) -> Vec<&str> {
        neighbors.iter().map(|n| n.id.as_str()).collect()
    }

    #[test]
    fn test_hnsw_adapter_insert_and_search() {
        let mut index = adapter();
        for i in 0..10 {
            index.insert_or_replace(&format!("id{}", i), &[i as f32, 0.0]).unwrap();
        }

        assert_eq!(index.len(), 10);
        assert!(index.contains("id3"));

        let results = index.search(&[3.1, 0.0], 3, None);
        assert_eq!(ids(&results), vec!["id3", "id4", "id2"]);
    }

    #[test]
    fn test_replace_moves_vector() {
        let mut index = adapter();
        index.insert_or_replace("a", &[0.0, 0.0]).unwrap();
        index.insert_or_replace("b", &[10.0, 0.0]).unwrap();
        index.insert_or_replace("a", &[20.0, 0.0]).unwrap();

        assert_eq!(index.len(), 2);
        let results = index.search(&[19.0, 0.0], 2, None);
        assert_eq!(ids(&results), vec!["a", "b"]);
        assert_eq!(results[0].distance, 1.0);
    }

    #[test]
    fn test_remove_then_reinsert() {
        let mut index = adapter();
        index.insert_or_replace("a", &[1.0, 1.0]).unwrap();
        assert!(index.remove("a"));
        assert!(!index.remove("a"));
        assert!(index.search(&[1.0, 1.0], 1, None).is_empty());

        index.insert_or_replace("a", &[2.0, 2.0]).unwrap();
        let results = index.search(&[2.0, 2.0], 1, None);
        assert_eq!(ids(&results), vec!["a"]);
        assert_eq!(results[0].distance, 0.0);
    }

    #[test]
    fn test_compaction_drops_tombstones() {
        let mut index = adapter();
        for round in 0..5 {
            for i in 0..20 {
                index
                    .insert_or_replace(&format!("id{}", i), &[i as f32, round as f32])
                    .unwrap();
            }
        }
        assert_eq!(index.len(), 20);
        assert!(index.tombstones() * 2 <= index.inner().len());
        let results = index.search(&[5.0, 4.0], 1, None);
        assert_eq!(ids(&results), vec!["id5"]);
    }

    #[test]
    fn test_candidate_filter() {
        let mut index = adapter();
        for i in 0..50 {
            index.insert_or_replace(&format!("id{}", i), &[i as f32]).unwrap();
        }
        let candidates: CandidateSet = ["id40".to_string(), "id45".to_string()].into();
        let results = index.search(&[0.0], 10, Some(&candidates));
        assert_eq!(ids(&results), vec!["id40", "id45"]);

        let empty = CandidateSet::new();
        assert!(index.search(&[0.0], 10, Some(&empty)).is_empty());
    }

    #[test]
    fn test_dimension_pinned() {
        let mut index = adapter();
        index.insert_or_replace("a", &[1.0, 2.0]).unwrap();
        let err = index.insert_or_replace("b", &[1.0]).unwrap_err();
        assert_eq!(err.kind(), "InvalidDimension");
        assert_eq!(index.dimensions(), Some(2));
    }

    #[test]
    fn test_hnsw_adapter_persistence() {
        let mut index = adapter();
        for i in 0..30 {
            index.insert_or_replace(&format!("id{}", i), &[i as f32, 1.0]).unwrap();
        }
        index.remove("id7");
        index.set_version(42);

        let bytes = index.to_bytes().unwrap();
        let loaded = HnswAdapter::from_bytes(index.config.clone(), &bytes).unwrap();

        assert_eq!(loaded.len(), 29);
        assert_eq!(loaded.version(), 42);
        assert!(!loaded.contains("id7"));
        assert_eq!(loaded.index_type_name(), "HNSW");
        assert_eq!(
            ids(&loaded.search(&[7.0, 1.0], 2, None)),
            ids(&index.search(&[7.0, 1.0], 2, None))
        );
    }
}
