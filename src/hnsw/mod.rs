//! HNSW (Hierarchical Navigable Small World) index
//!
//! Key features:
//! - Vectors live in the graph nodes
//! - Tombstones for removal; the owner rebuilds once they dominate
//! - Filtered base-layer search that traverses rejected nodes
//! - Plain `&mut self` writes; callers provide the locking

pub mod insert;
pub mod node;
pub mod persistence;
pub mod search;

use crate::index::{HnswParams, Space};
use node::HnswNode;

/// HNSW configuration - alias for HnswParams (single source of truth)
pub type HnswConfig = HnswParams;

/// HNSW graph over owned vectors
#[derive(Clone, Debug)]
pub struct HnswIndex {
    config: HnswConfig,
    space: Space,
    /// All nodes in the graph, tombstones included
    nodes: Vec<HnswNode>,
    /// Entry point (node with highest level)
    entry_point: Option<u32>,
    /// Maximum level in the graph
    max_level: usize,
    deleted: usize,
}

impl HnswIndex {
    /// Create new empty index
    pub fn new(config: HnswConfig, space: Space) -> Self {
        Self {
            config,
            space,
            nodes: Vec::new(),
            entry_point: None,
            max_level: 0,
            deleted: 0,
        }
    }

    /// Insert a vector, returning its slot
    pub fn insert(&mut self, vector: Vec<f32>) -> u32 {
        insert::insert_node(self, vector)
    }

    /// Tombstone a slot; returns false if it was missing or already deleted
    pub fn mark_deleted(&mut self, slot: u32) -> bool {
        match self.nodes.get_mut(slot as usize) {
            Some(node) if !node.deleted => {
                node.deleted = true;
                self.deleted += 1;
                true
            }
            _ => false,
        }
    }

    /// Search for k nearest live slots accepted by `allow`
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        ef: Option<usize>,
        allow: &dyn Fn(u32) -> bool,
    ) -> Vec<(u32, f32)> {
        if k == 0 || self.live_len() == 0 {
            return Vec::new();
        }
        search::search_knn(self, query, k, ef.unwrap_or(self.config.ef_search), allow)
    }

    /// Vector stored at a slot
    pub fn vector(&self, slot: u32) -> Option<&[f32]> {
        self.nodes.get(slot as usize).map(|n| n.vector.as_slice())
    }

    pub fn is_deleted(&self, slot: u32) -> bool {
        self.nodes.get(slot as usize).map_or(true, |n| n.deleted)
    }

    /// Number of nodes in the graph, tombstones included
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if index is empty
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes that can still be returned by a search
    pub fn live_len(&self) -> usize {
        self.nodes.len() - self.deleted
    }

    pub fn deleted_count(&self) -> usize {
        self.deleted
    }

    pub fn space(&self) -> Space {
        self.space
    }

    pub fn config(&self) -> &HnswConfig {
        &self.config
    }

    // Accessors for internal modules
    pub(crate) fn nodes(&self) -> &[HnswNode] {
        &self.nodes
    }

    pub(crate) fn nodes_mut(&mut self) -> &mut Vec<HnswNode> {
        &mut self.nodes
    }

    pub(crate) fn entry_point(&self) -> Option<u32> {
        self.entry_point
    }

    pub(crate) fn set_entry_point(&mut self, ep: u32) {
        self.entry_point = Some(ep);
    }

    pub(crate) fn max_level(&self) -> usize {
        self.max_level
    }

    pub(crate) fn set_max_level(&mut self, level: usize) {
        self.max_level = level;
    }
}
