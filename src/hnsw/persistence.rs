//! HNSW index persistence

use super::node::HnswNode;
use super::{HnswConfig, HnswIndex};
use crate::error::{QuiverError, Result};
use crate::index::Space;
use serde::{Deserialize, Serialize};

/// Serializable HNSW state
#[derive(Serialize, Deserialize)]
pub(crate) struct HnswState {
    config: HnswConfig,
    space: Space,
    entry_point: Option<u32>,
    max_level: usize,
    nodes: Vec<HnswNode>,
}

impl HnswState {
    pub(crate) fn capture(index: &HnswIndex) -> Self {
        Self {
            config: index.config().clone(),
            space: index.space(),
            entry_point: index.entry_point(),
            max_level: index.max_level(),
            nodes: index.nodes().to_vec(),
        }
    }

    /// Rebuild the index, checking the graph's internal references
    pub(crate) fn restore(self) -> Result<HnswIndex> {
        let len = self.nodes.len();
        if let Some(ep) = self.entry_point {
            if ep as usize >= len {
                return Err(QuiverError::index(format!(
                    "entry point {} outside graph of {} nodes",
                    ep, len
                )));
            }
        } else if len > 0 {
            return Err(QuiverError::index("non-empty graph without entry point"));
        }
        for node in &self.nodes {
            if node.neighbors.iter().flatten().any(|&n| n as usize >= len) {
                return Err(QuiverError::index("neighbor reference outside graph"));
            }
        }

        let deleted = self.nodes.iter().filter(|n| n.deleted).count();
        let mut index = HnswIndex::new(self.config, self.space);
        *index.nodes_mut() = self.nodes;
        if let Some(ep) = self.entry_point {
            index.set_entry_point(ep);
        }
        index.set_max_level(self.max_level);
        index.deleted = deleted;
        Ok(index)
    }
}

/// Encode a graph with bincode
pub fn encode_index(index: &HnswIndex) -> Result<Vec<u8>> {
    Ok(bincode::serialize(&HnswState::capture(index))?)
}

/// Decode a graph written by [`encode_index`]
pub fn decode_index(data: &[u8]) -> Result<HnswIndex> {
    let state: HnswState = bincode::deserialize(data)?;
    state.restore()
}
