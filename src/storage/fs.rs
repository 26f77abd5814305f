//! Local filesystem storage
//!
//! Features:
//! - Uses local filesystem
//! - Simulates block-device fsync/read latency (configurable)
//! - Temp-directory constructor for tests and the simulation runner

use super::*;
use async_trait::async_trait;
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::sleep;

/// Configuration for filesystem storage behavior
#[derive(Debug, Clone)]
pub struct FsStorageConfig {
    /// Simulated fsync latency
    pub fsync_latency: Duration,
    /// Simulated read latency
    pub read_latency: Duration,
    /// Random latency variance (0.0 - 1.0)
    pub latency_variance: f64,
}

impl Default for FsStorageConfig {
    fn default() -> Self {
        Self {
            // Network block device (gp3-like) latencies
            fsync_latency: Duration::from_millis(3),
            read_latency: Duration::from_micros(100),
            latency_variance: 0.2,
        }
    }
}

impl FsStorageConfig {
    /// Config for fast tests (no artificial latency)
    pub fn fast() -> Self {
        Self {
            fsync_latency: Duration::ZERO,
            read_latency: Duration::ZERO,
            latency_variance: 0.0,
        }
    }

    /// Config for realistic simulation
    pub fn realistic() -> Self {
        Self::default()
    }
}

/// Block storage rooted at a local directory
pub struct FsBlockStorage {
    root: PathBuf,
    config: FsStorageConfig,
}

impl FsBlockStorage {
    pub fn new(root: impl Into<PathBuf>, config: FsStorageConfig) -> std::io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;

        Ok(Self { root, config })
    }

    /// Create with temp directory (for tests)
    pub fn temp(config: FsStorageConfig) -> std::io::Result<Self> {
        let temp_dir = tempfile::tempdir()?.into_path();
        Self::new(temp_dir, config)
    }

    fn full_path(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }

    async fn simulate_latency(&self, base: Duration) {
        // Always yield so single-threaded runtimes interleave storage calls
        tokio::task::yield_now().await;

        if base.is_zero() {
            return;
        }

        let variance = self.config.latency_variance;
        let jitter = if variance > 0.0 {
            let factor = 1.0 + (rand::random::<f64>() * 2.0 - 1.0) * variance;
            base.mul_f64(factor)
        } else {
            base
        };

        sleep(jitter).await;
    }

    fn ensure_parent(full_path: &Path) -> std::io::Result<()> {
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

#[async_trait]
impl BlockStorage for FsBlockStorage {
    async fn write(&self, path: &str, data: &[u8]) -> StorageResult<()> {
        tokio::task::yield_now().await;
        let full_path = self.full_path(path);
        Self::ensure_parent(&full_path)?;

        let mut file = File::create(&full_path)?;
        file.write_all(data)?;

        Ok(())
    }

    async fn truncate(&self, path: &str, len: u64) -> StorageResult<()> {
        tokio::task::yield_now().await;
        let full_path = self.full_path(path);
        if !full_path.exists() {
            return Err(StorageError::NotFound {
                key: path.to_string(),
            });
        }

        let file = OpenOptions::new().write(true).open(&full_path)?;
        if file.metadata()?.len() > len {
            file.set_len(len)?;
        }

        Ok(())
    }

    async fn append(&self, path: &str, data: &[u8]) -> StorageResult<u64> {
        tokio::task::yield_now().await;
        let full_path = self.full_path(path);
        Self::ensure_parent(&full_path)?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&full_path)?;

        let offset = file.seek(SeekFrom::End(0))?;
        file.write_all(data)?;

        Ok(offset)
    }

    async fn read(&self, path: &str) -> StorageResult<Vec<u8>> {
        self.simulate_latency(self.config.read_latency).await;

        let full_path = self.full_path(path);
        if !full_path.exists() {
            return Err(StorageError::NotFound {
                key: path.to_string(),
            });
        }

        Ok(fs::read(&full_path)?)
    }

    async fn exists(&self, path: &str) -> StorageResult<bool> {
        tokio::task::yield_now().await;
        Ok(self.full_path(path).exists())
    }

    async fn size(&self, path: &str) -> StorageResult<u64> {
        let full_path = self.full_path(path);
        if !full_path.exists() {
            return Err(StorageError::NotFound {
                key: path.to_string(),
            });
        }
        Ok(fs::metadata(&full_path)?.len())
    }

    async fn sync(&self, path: &str) -> StorageResult<()> {
        // Simulated latency lands here: fsync is the durability point
        self.simulate_latency(self.config.fsync_latency).await;

        let full_path = self.full_path(path);
        if full_path.exists() {
            let file = File::open(&full_path)?;
            file.sync_all()?;
        }

        Ok(())
    }

    async fn delete(&self, path: &str) -> StorageResult<()> {
        let full_path = self.full_path(path);
        if full_path.exists() {
            fs::remove_file(&full_path)?;
        }
        Ok(())
    }

    async fn delete_dir(&self, path: &str) -> StorageResult<()> {
        let full_path = self.full_path(path);
        if full_path.is_dir() {
            fs::remove_dir_all(&full_path)?;
        }
        Ok(())
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let full_path = self.full_path(prefix);
        let mut results = Vec::new();

        if full_path.is_dir() {
            for entry in fs::read_dir(&full_path)? {
                let entry = entry?;
                let name = entry.file_name().to_string_lossy().to_string();
                results.push(format!("{}/{}", prefix.trim_end_matches('/'), name));
            }
        }
        results.sort();

        Ok(results)
    }

    async fn rename(&self, from: &str, to: &str) -> StorageResult<()> {
        let from_path = self.full_path(from);
        let to_path = self.full_path(to);
        if !from_path.exists() {
            return Err(StorageError::NotFound {
                key: from.to_string(),
            });
        }
        Self::ensure_parent(&to_path)?;
        fs::rename(&from_path, &to_path)?;
        Ok(())
    }

    async fn create_dir(&self, path: &str) -> StorageResult<()> {
        fs::create_dir_all(self.full_path(path))?;
        Ok(())
    }

    fn root_path(&self) -> &Path {
        &self.root
    }
}
