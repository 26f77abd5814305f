//! HNSW node representation

use serde::{Deserialize, Serialize};

/// A node in the HNSW graph
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HnswNode {
    /// The vector this node stands for
    pub vector: Vec<f32>,
    /// Maximum level this node exists at
    pub level: usize,
    /// Neighbors at each level (level 0 is index 0)
    pub neighbors: Vec<Vec<u32>>,
    /// Tombstoned nodes stay traversable but are never returned
    pub deleted: bool,
}

impl HnswNode {
    pub fn new(vector: Vec<f32>, level: usize) -> Self {
        Self {
            vector,
            level,
            neighbors: (0..=level).map(|_| Vec::new()).collect(),
            deleted: false,
        }
    }

    /// Get neighbors at a specific level
    pub fn neighbors_at(&self, level: usize) -> &[u32] {
        if level < self.neighbors.len() {
            &self.neighbors[level]
        } else {
            &[]
        }
    }

    /// Add a neighbor at a specific level
    pub fn add_neighbor(&mut self, level: usize, neighbor: u32) {
        if let Some(list) = self.neighbors.get_mut(level) {
            if !list.contains(&neighbor) {
                list.push(neighbor);
            }
        }
    }

    /// Set neighbors at a specific level
    pub fn set_neighbors(&mut self, level: usize, neighbors: Vec<u32>) {
        if let Some(list) = self.neighbors.get_mut(level) {
            *list = neighbors;
        }
    }
}
