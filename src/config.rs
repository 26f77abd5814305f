//! Configuration module

use crate::defaults::*;
use crate::index::{AnnIndexConfig, HnswParams, IndexType};
use crate::storage::{BlockStorage, FsBlockStorage, FsStorageConfig, MemoryBlockStorage};
use crate::sync::SyncConfig;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

/// Main configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    pub engine: EngineConfig,
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false)
}

impl Config {
    /// Load config from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        let storage_mode = std::env::var("STORAGE_MODE").unwrap_or_else(|_| "fs".to_string());

        let storage = match storage_mode.as_str() {
            "fs" => StorageConfig::Fs {
                root: std::env::var("DATA_ROOT")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from(DEFAULT_DATA_ROOT)),
                simulate_latency: env_flag("SIMULATE_LATENCY"),
            },
            "memory" => StorageConfig::Memory,
            _ => anyhow::bail!("Unknown storage mode: {}", storage_mode),
        };

        let index_type = std::env::var("INDEX_TYPE").unwrap_or_else(|_| "hnsw".to_string());
        let engine = EngineConfig {
            max_concurrency: env_or("MAX_CONCURRENCY", DEFAULT_MAX_CONCURRENCY),
            max_batch_size: env_or("MAX_BATCH_SIZE", DEFAULT_MAX_BATCH_SIZE),
            batch_size: env_or("DEFAULT_BATCH_SIZE", DEFAULT_BATCH_SIZE),
            sync_threshold: env_or("DEFAULT_SYNC_THRESHOLD", DEFAULT_SYNC_THRESHOLD),
            hnsw_m: env_or("HNSW_M", DEFAULT_HNSW_M),
            hnsw_ef_construction: env_or("HNSW_EF_CONSTRUCTION", DEFAULT_HNSW_EF_CONSTRUCTION),
            hnsw_ef_search: env_or("HNSW_EF_SEARCH", DEFAULT_HNSW_EF_SEARCH),
            index_type: IndexType::parse(&index_type)?,
            wal_checkpoint_entries: env_or("WAL_CHECKPOINT_ENTRIES", DEFAULT_WAL_CHECKPOINT_ENTRIES),
            allow_reset: env_flag("ALLOW_RESET"),
        };
        engine.validate()?;

        Ok(Self { storage, engine })
    }
}

/// Storage configuration
#[derive(Debug, Clone)]
pub enum StorageConfig {
    /// Local files under `root`
    Fs { root: PathBuf, simulate_latency: bool },
    /// Ephemeral, nothing survives the process
    Memory,
}

impl StorageConfig {
    /// Create storage backend from config
    pub fn create_backend(&self) -> anyhow::Result<Arc<dyn BlockStorage>> {
        match self {
            StorageConfig::Fs {
                root,
                simulate_latency,
            } => {
                let config = if *simulate_latency {
                    FsStorageConfig::realistic()
                } else {
                    FsStorageConfig::fast()
                };
                Ok(Arc::new(FsBlockStorage::new(root, config)?))
            }
            StorageConfig::Memory => Ok(Arc::new(MemoryBlockStorage::new())),
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Engine calls admitted at once
    pub max_concurrency: usize,
    /// Largest add/update/upsert batch
    pub max_batch_size: usize,
    /// Default `hnsw:batch_size` for new collections
    pub batch_size: usize,
    /// Default `hnsw:sync_threshold` for new collections
    pub sync_threshold: usize,
    pub hnsw_m: usize,
    pub hnsw_ef_construction: usize,
    pub hnsw_ef_search: usize,
    /// Index type selection (hnsw or flat)
    pub index_type: IndexType,
    pub wal_checkpoint_entries: usize,
    /// Whether `Engine::reset` may wipe everything
    pub allow_reset: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            batch_size: DEFAULT_BATCH_SIZE,
            sync_threshold: DEFAULT_SYNC_THRESHOLD,
            hnsw_m: DEFAULT_HNSW_M,
            hnsw_ef_construction: DEFAULT_HNSW_EF_CONSTRUCTION,
            hnsw_ef_search: DEFAULT_HNSW_EF_SEARCH,
            index_type: IndexType::Hnsw,
            wal_checkpoint_entries: DEFAULT_WAL_CHECKPOINT_ENTRIES,
            allow_reset: false,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.max_concurrency > 0, "MAX_CONCURRENCY must be positive");
        anyhow::ensure!(self.max_batch_size > 0, "MAX_BATCH_SIZE must be positive");
        anyhow::ensure!(self.wal_checkpoint_entries > 0, "WAL_CHECKPOINT_ENTRIES must be positive");
        self.sync_config()?;
        Ok(())
    }

    /// Index configuration new collections start from
    pub fn index_config(&self) -> AnnIndexConfig {
        AnnIndexConfig {
            index_type: self.index_type,
            hnsw: HnswParams::new(self.hnsw_m, self.hnsw_ef_construction, self.hnsw_ef_search),
            ..AnnIndexConfig::default()
        }
    }

    /// Synchronizer thresholds new collections start from
    pub fn sync_config(&self) -> crate::error::Result<SyncConfig> {
        SyncConfig::new(self.batch_size, self.sync_threshold)
    }
}
