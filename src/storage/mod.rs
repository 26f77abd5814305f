//! Storage abstraction layer
//!
//! Collections persist three artifacts through a [`BlockStorage`]:
//! - `wal.log` (append-only write-ahead log)
//! - `records.snap` (record table snapshot)
//! - `index.bin` (serialized ANN index)
//!
//! Two backends are provided: [`fs::FsBlockStorage`] for local files (with optional
//! simulated device latency) and [`memory::MemoryBlockStorage`] for ephemeral mode.

pub mod fs;
pub mod memory;

use async_trait::async_trait;
use std::path::Path;

pub use fs::{FsBlockStorage, FsStorageConfig};
pub use memory::MemoryBlockStorage;

/// Error type for storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Object not found: {key}")]
    NotFound { key: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Checksum mismatch")]
    ChecksumMismatch,

    #[error("Storage backend error: {0}")]
    Backend(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Block storage trait
///
/// Models a persistent block device with:
/// - Whole-file writes, appends and truncation
/// - fsync for durability
/// - File-based operations
#[async_trait]
pub trait BlockStorage: Send + Sync + 'static {
    /// Write data to a file path (relative to storage root), replacing any previous contents
    /// Does NOT guarantee durability until sync() is called
    async fn write(&self, path: &str, data: &[u8]) -> StorageResult<()>;

    /// Cut a file down to its first `len` bytes
    /// Does NOT guarantee durability until sync() is called
    async fn truncate(&self, path: &str, len: u64) -> StorageResult<()>;

    /// Append data to a file, returns the offset where data was written
    async fn append(&self, path: &str, data: &[u8]) -> StorageResult<u64>;

    /// Read entire file
    async fn read(&self, path: &str) -> StorageResult<Vec<u8>>;

    /// Check if file exists
    async fn exists(&self, path: &str) -> StorageResult<bool>;

    /// Get file size
    async fn size(&self, path: &str) -> StorageResult<u64>;

    /// Sync file to durable storage (fsync)
    async fn sync(&self, path: &str) -> StorageResult<()>;

    /// Delete file (missing files are not an error)
    async fn delete(&self, path: &str) -> StorageResult<()>;

    /// Recursively delete a directory and everything below it
    async fn delete_dir(&self, path: &str) -> StorageResult<()>;

    /// List entries directly inside a directory
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>>;

    /// Atomically move a file over another path
    async fn rename(&self, from: &str, to: &str) -> StorageResult<()>;

    /// Create directory
    async fn create_dir(&self, path: &str) -> StorageResult<()>;

    /// Get the root path (for diagnostics)
    fn root_path(&self) -> &Path;
}

/// Write a file through a temporary sibling so readers never observe a torn artifact
pub async fn write_atomic(
    storage: &dyn BlockStorage,
    path: &str,
    data: &[u8],
) -> StorageResult<()> {
    let tmp = format!("{}.tmp", path);
    storage.write(&tmp, data).await?;
    storage.sync(&tmp).await?;
    storage.rename(&tmp, path).await
}
