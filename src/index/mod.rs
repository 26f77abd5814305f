//! ANN Index abstraction layer
//!
//! This module provides a trait-based abstraction over the ANN (Approximate
//! Nearest Neighbor) index implementations a collection can use:
//!
//! - **HNSW** (default): in-memory Hierarchical Navigable Small World graph
//! - **Flat**: exact scan, also used for the synchronizer's pending buffer
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    BatchSynchronizer                        │
//! │  ┌─────────────────────────────────────────────────────────┐│
//! │  │           RwLock<Box<dyn AnnIndex>>                     ││
//! │  │  ┌───────────────────┐  ┌───────────────────────────┐  ││
//! │  │  │   HnswAdapter     │  │   FlatIndex               │  ││
//! │  │  │   (wraps HNSW)    │  │   (exact)                 │  ││
//! │  │  └───────────────────┘  └───────────────────────────┘  ││
//! │  └─────────────────────────────────────────────────────────┘│
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Artifact format
//!
//! `index.bin` is a CRC32 (`u32`, little-endian) followed by the index's own
//! bincode encoding. A checksum mismatch is reported as an index error so the
//! caller can rebuild from the record store.

mod config;
mod flat;
mod hnsw_adapter;
mod r#trait;

pub use config::{AnnIndexConfig, HnswParams, IndexType, Space};
pub use flat::FlatIndex;
pub use hnsw_adapter::HnswAdapter;
pub use r#trait::{AnnIndex, CandidateSet, Neighbor};
pub(crate) use hnsw_adapter::sort_neighbors;

use crate::error::{QuiverError, Result};
use crate::storage::{self, BlockStorage};

/// Create a new, empty ANN index from configuration
pub fn create_index(config: &AnnIndexConfig) -> Box<dyn AnnIndex> {
    match config.index_type {
        IndexType::Hnsw => Box::new(HnswAdapter::new(config.clone())),
        IndexType::Flat => Box::new(FlatIndex::new(config.space)),
    }
}

/// Frame index bytes with a checksum
pub fn encode_artifact(index: &dyn AnnIndex) -> Result<Vec<u8>> {
    let body = index.to_bytes()?;
    let mut data = Vec::with_capacity(body.len() + 4);
    data.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
    data.extend_from_slice(&body);
    Ok(data)
}

/// Decode an artifact written by [`encode_artifact`]
pub fn decode_artifact(config: &AnnIndexConfig, data: &[u8]) -> Result<Box<dyn AnnIndex>> {
    if data.len() < 4 {
        return Err(QuiverError::index("index artifact shorter than its checksum"));
    }
    let (crc, body) = data.split_at(4);
    let stored = u32::from_le_bytes([crc[0], crc[1], crc[2], crc[3]]);
    if stored != crc32fast::hash(body) {
        return Err(QuiverError::index("index artifact checksum mismatch"));
    }
    Ok(match config.index_type {
        IndexType::Hnsw => Box::new(HnswAdapter::from_bytes(config.clone(), body)?),
        IndexType::Flat => Box::new(FlatIndex::from_bytes(config.space, body)?),
    })
}

/// Persist an index artifact atomically
pub async fn save_index(storage: &dyn BlockStorage, path: &str, data: &[u8]) -> Result<()> {
    storage::write_atomic(storage, path, data).await?;
    Ok(())
}

/// Load an ANN index from storage; `Ok(None)` when no artifact exists
pub async fn load_index(
    config: &AnnIndexConfig,
    storage: &dyn BlockStorage,
    path: &str,
) -> Result<Option<Box<dyn AnnIndex>>> {
    if !storage.exists(path).await? {
        return Ok(None);
    }
    let data = storage.read(path).await?;
    decode_artifact(config, &data).map(Some)
}
