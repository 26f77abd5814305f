//! Shared test utilities for Quiver integration tests
//!
//! This module provides:
//! - Seeded vector generation and brute-force ground truth
//! - Temporary engines on disk (reopenable) or in memory
//! - A storage wrapper for failure injection

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

use quiver::storage::{
    BlockStorage, FsBlockStorage, FsStorageConfig, MemoryBlockStorage, StorageError,
    StorageResult,
};
use quiver::{Collection, Engine, EngineConfig, Metadata, MetadataValue, Scope, Space};

/// Generate a random normalized vector
pub fn random_vector(dims: usize) -> Vec<f32> {
    let mut rng = rand::thread_rng();
    let v: Vec<f32> = (0..dims).map(|_| rng.gen::<f32>() * 2.0 - 1.0).collect();
    normalize(&v)
}

/// Generate a deterministic vector based on seed
pub fn seeded_vector(dims: usize, seed: u64) -> Vec<f32> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let v: Vec<f32> = (0..dims).map(|_| rng.gen::<f32>() * 2.0 - 1.0).collect();
    normalize(&v)
}

/// Normalize a vector to unit length
pub fn normalize(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter().map(|x| x / norm).collect()
    } else {
        v.to_vec()
    }
}

/// `count` seeded vectors with ids `"{prefix}{i}"`
pub fn seeded_corpus(prefix: &str, count: usize, dims: usize, base_seed: u64) -> Vec<(String, Vec<f32>)> {
    (0..count)
        .map(|i| (format!("{}{}", prefix, i), seeded_vector(dims, base_seed + i as u64)))
        .collect()
}

/// Brute force k-nearest neighbor search for ground truth
pub fn brute_force_knn(
    space: Space,
    query: &[f32],
    vectors: &[(String, Vec<f32>)],
    k: usize,
) -> Vec<String> {
    let mut distances: Vec<(&str, f32)> = vectors
        .iter()
        .map(|(id, v)| (id.as_str(), space.distance(query, v)))
        .collect();
    distances.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
    distances.into_iter().take(k).map(|(id, _)| id.to_string()).collect()
}

/// Calculate recall@k between search results and ground truth
pub fn recall(results: &[String], ground_truth: &[String]) -> f64 {
    if ground_truth.is_empty() {
        return 1.0;
    }
    let truth: std::collections::HashSet<_> = ground_truth.iter().collect();
    let hits = results.iter().filter(|id| truth.contains(id)).count();
    hits as f64 / ground_truth.len() as f64
}

/// Build a metadata map from (key, value) pairs
pub fn metadata<V: Into<MetadataValue>>(pairs: impl IntoIterator<Item = (&'static str, V)>) -> Metadata {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.into()))
        .collect()
}

/// Engine config with small batches so tests cross flush/persist boundaries
pub fn test_engine_config() -> EngineConfig {
    EngineConfig {
        batch_size: 10,
        sync_threshold: 20,
        wal_checkpoint_entries: 50,
        allow_reset: true,
        ..EngineConfig::default()
    }
}

/// On-disk storage in a fresh temp directory, with the path for reopening
pub fn temp_storage_with_path() -> (TempDir, PathBuf, Arc<FsBlockStorage>) {
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().to_path_buf();
    let storage = Arc::new(FsBlockStorage::new(&path, FsStorageConfig::fast()).unwrap());
    (temp_dir, path, storage)
}

/// Reopen storage at the same path
pub fn reopen_storage(path: &Path) -> Arc<FsBlockStorage> {
    Arc::new(FsBlockStorage::new(path, FsStorageConfig::fast()).unwrap())
}

/// Engine over a fresh temp directory
pub async fn temp_engine(config: EngineConfig) -> (TempDir, PathBuf, Arc<Engine>) {
    let (dir, path, storage) = temp_storage_with_path();
    let engine = Engine::open(config, storage).await.unwrap();
    (dir, path, engine)
}

/// Engine over a previously used directory
pub async fn reopen_engine(config: EngineConfig, path: &Path) -> Arc<Engine> {
    Engine::open(config, reopen_storage(path)).await.unwrap()
}

/// Engine in ephemeral mode
pub async fn memory_engine(config: EngineConfig) -> Arc<Engine> {
    Engine::open(config, Arc::new(MemoryBlockStorage::new()))
        .await
        .unwrap()
}

/// A collection in the default scope of a fresh in-memory engine
pub async fn memory_collection(name: &str, metadata: Option<Metadata>) -> Arc<Collection> {
    let engine = memory_engine(test_engine_config()).await;
    engine
        .create_collection(&Scope::default(), name, metadata, None, false)
        .await
        .unwrap()
}

fn io_error(msg: &str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, msg)
}

/// Storage wrapper that fails writes while armed
///
/// `fail_writes` fails every mutating operation. `fail_on` fails a single
/// operation kind on paths ending with a suffix, e.g. only `sync` of `wal.log`;
/// `fail_once` does the same for the next matching call only.
pub struct FailingStorage {
    inner: Arc<dyn BlockStorage>,
    fail_writes: AtomicBool,
    targeted: Mutex<Option<Fault>>,
}

#[derive(Clone, Copy)]
struct Fault {
    op: &'static str,
    path_suffix: &'static str,
    once: bool,
}

impl FailingStorage {
    pub fn new(inner: Arc<dyn BlockStorage>) -> Self {
        Self {
            inner,
            fail_writes: AtomicBool::new(false),
            targeted: Mutex::new(None),
        }
    }

    pub fn fail_writes(&self, enabled: bool) {
        self.fail_writes.store(enabled, Ordering::SeqCst);
    }

    pub fn fail_on(&self, op: &'static str, path_suffix: &'static str) {
        *self.targeted.lock() = Some(Fault { op, path_suffix, once: false });
    }

    pub fn fail_once(&self, op: &'static str, path_suffix: &'static str) {
        *self.targeted.lock() = Some(Fault { op, path_suffix, once: true });
    }

    pub fn heal(&self) {
        self.fail_writes(false);
        *self.targeted.lock() = None;
    }

    fn check(&self, op: &str, path: &str) -> StorageResult<()> {
        let targeted = {
            let mut fault = self.targeted.lock();
            let current = *fault;
            match current {
                Some(f) if f.op == op && path.ends_with(f.path_suffix) => {
                    if f.once {
                        *fault = None;
                    }
                    true
                }
                _ => false,
            }
        };
        if targeted || self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Io(io_error(&format!(
                "Injected {} failure on {}",
                op, path
            ))));
        }
        Ok(())
    }
}

#[async_trait]
impl BlockStorage for FailingStorage {
    async fn write(&self, path: &str, data: &[u8]) -> StorageResult<()> {
        self.check("write", path)?;
        self.inner.write(path, data).await
    }

    async fn truncate(&self, path: &str, len: u64) -> StorageResult<()> {
        self.check("truncate", path)?;
        self.inner.truncate(path, len).await
    }

    async fn append(&self, path: &str, data: &[u8]) -> StorageResult<u64> {
        self.check("append", path)?;
        self.inner.append(path, data).await
    }

    async fn read(&self, path: &str) -> StorageResult<Vec<u8>> {
        self.inner.read(path).await
    }

    async fn exists(&self, path: &str) -> StorageResult<bool> {
        self.inner.exists(path).await
    }

    async fn size(&self, path: &str) -> StorageResult<u64> {
        self.inner.size(path).await
    }

    async fn sync(&self, path: &str) -> StorageResult<()> {
        self.check("sync", path)?;
        self.inner.sync(path).await
    }

    async fn delete(&self, path: &str) -> StorageResult<()> {
        self.inner.delete(path).await
    }

    async fn delete_dir(&self, path: &str) -> StorageResult<()> {
        self.inner.delete_dir(path).await
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        self.inner.list(prefix).await
    }

    async fn rename(&self, from: &str, to: &str) -> StorageResult<()> {
        self.check("rename", from)?;
        self.inner.rename(from, to).await
    }

    async fn create_dir(&self, path: &str) -> StorageResult<()> {
        self.inner.create_dir(path).await
    }

    fn root_path(&self) -> &Path {
        self.inner.root_path()
    }
}
