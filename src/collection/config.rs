//! Per-collection configuration carried in collection metadata
//!
//! Keys understood here (all others are plain user metadata):
//!
//! | key                 | value                       |
//! |---------------------|-----------------------------|
//! | `hnsw:space`        | `"l2"`, `"ip"` or `"cosine"`|
//! | `hnsw:M`            | positive int                |
//! | `hnsw:construction_ef` | positive int             |
//! | `hnsw:search_ef`    | positive int                |
//! | `hnsw:batch_size`   | positive int                |
//! | `hnsw:sync_threshold` | int ≥ `hnsw:batch_size`   |

use crate::config::EngineConfig;
use crate::error::{QuiverError, Result};
use crate::index::{AnnIndexConfig, HnswParams, Space};
use crate::sync::SyncConfig;
use crate::types::{Metadata, MetadataValue};

pub const SPACE_KEY: &str = "hnsw:space";
pub const M_KEY: &str = "hnsw:M";
pub const CONSTRUCTION_EF_KEY: &str = "hnsw:construction_ef";
pub const SEARCH_EF_KEY: &str = "hnsw:search_ef";
pub const BATCH_SIZE_KEY: &str = "hnsw:batch_size";
pub const SYNC_THRESHOLD_KEY: &str = "hnsw:sync_threshold";

const RESERVED_PREFIX: &str = "hnsw:";

/// Resolved index and synchronizer settings of one collection
#[derive(Clone, Debug, PartialEq)]
pub struct CollectionConfig {
    pub index: AnnIndexConfig,
    pub sync: SyncConfig,
}

impl CollectionConfig {
    /// Resolve from collection metadata over the engine defaults
    pub fn from_metadata(metadata: Option<&Metadata>, defaults: &EngineConfig) -> Result<Self> {
        let mut index = defaults.index_config();
        let mut sync = SyncConfig {
            batch_size: defaults.batch_size,
            sync_threshold: defaults.sync_threshold,
        };

        let Some(metadata) = metadata else {
            sync.validate()?;
            return Ok(Self { index, sync });
        };

        for key in metadata.keys().filter(|k| k.starts_with(RESERVED_PREFIX)) {
            if ![
                SPACE_KEY,
                M_KEY,
                CONSTRUCTION_EF_KEY,
                SEARCH_EF_KEY,
                BATCH_SIZE_KEY,
                SYNC_THRESHOLD_KEY,
            ]
            .contains(&key.as_str())
            {
                return Err(QuiverError::invalid_argument(format!(
                    "Unknown collection setting {}",
                    key
                )));
            }
        }

        if let Some(value) = metadata.get(SPACE_KEY) {
            let name = value.as_str().ok_or_else(|| {
                QuiverError::invalid_argument(format!("{} must be a string", SPACE_KEY))
            })?;
            index.space = Space::parse(name)?;
        }

        let m = positive(metadata, M_KEY)?.unwrap_or(index.hnsw.m);
        let ef_construction =
            positive(metadata, CONSTRUCTION_EF_KEY)?.unwrap_or(index.hnsw.ef_construction);
        let ef_search = positive(metadata, SEARCH_EF_KEY)?.unwrap_or(index.hnsw.ef_search);
        index.hnsw = HnswParams::new(m, ef_construction, ef_search);

        if let Some(batch_size) = positive(metadata, BATCH_SIZE_KEY)? {
            sync.batch_size = batch_size;
        }
        if let Some(sync_threshold) = positive(metadata, SYNC_THRESHOLD_KEY)? {
            sync.sync_threshold = sync_threshold;
        }
        sync.validate()?;

        Ok(Self { index, sync })
    }
}

fn positive(metadata: &Metadata, key: &str) -> Result<Option<usize>> {
    match metadata.get(key) {
        None => Ok(None),
        Some(MetadataValue::Int(v)) if *v > 0 => Ok(Some(*v as usize)),
        Some(other) => Err(QuiverError::invalid_argument(format!(
            "{} must be a positive integer, got {:?}",
            key, other
        ))),
    }
}

/// Metadata for a modify call
///
/// `hnsw:` keys in `new` must equal the current ones; keys it omits carry over.
pub fn carry_settings(old: Option<&Metadata>, mut new: Metadata) -> Result<Metadata> {
    for (key, value) in new.iter().filter(|(k, _)| k.starts_with(RESERVED_PREFIX)) {
        if old.and_then(|m| m.get(key)) != Some(value) {
            return Err(QuiverError::invalid_argument(format!(
                "Changing {} of an existing collection is not supported",
                key
            )));
        }
    }
    if let Some(old) = old {
        for (key, value) in old.iter().filter(|(k, _)| k.starts_with(RESERVED_PREFIX)) {
            new.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }
    Ok(new)
}
