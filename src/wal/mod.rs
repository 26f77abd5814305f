//! Write-Ahead Log
//!
//! Provides durability guarantees:
//! - One entry per mutating call, written atomically
//! - fsync ensures persistence before acknowledgment
//! - CRC32 detects corruption during replay
//! - A failed append is rolled back so an unacknowledged entry is never replayed
//! - Checkpointing truncates the log once the record table is snapshotted

pub mod entry;
pub mod reader;

use crate::storage::BlockStorage;
use entry::{WalEntry, WalError, WalOp};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Write-Ahead Log
pub struct Wal {
    storage: Arc<dyn BlockStorage>,
    path: String,
    next_sequence: AtomicU64,
    entries_since_checkpoint: AtomicUsize,
    /// Bytes of acknowledged entries
    durable_len: AtomicU64,
    /// Set when a failed append could not be rolled back
    poisoned: AtomicBool,
    write_lock: Mutex<()>,
}

impl Wal {
    /// Open or create a WAL
    ///
    /// `floor` is the highest sequence already captured elsewhere (the snapshot
    /// version); new sequences always start above it. A torn or corrupt tail is
    /// cut off so later appends land directly after the valid prefix.
    pub async fn open(
        storage: Arc<dyn BlockStorage>,
        path: impl Into<String>,
        floor: u64,
    ) -> Result<Self, WalError> {
        let path = path.into();

        let (last_sequence, entries, durable_len) = if storage.exists(&path).await? {
            let data = storage.read(&path).await?;
            let outcome = reader::replay_from_bytes(&data, 0);
            if outcome.valid_len < data.len() {
                tracing::warn!(
                    path = %path,
                    valid = outcome.valid_len,
                    total = data.len(),
                    "Truncating WAL to its valid prefix"
                );
                storage.truncate(&path, outcome.valid_len as u64).await?;
                storage.sync(&path).await?;
            }
            (
                outcome.last_sequence,
                outcome.entries.len(),
                outcome.valid_len as u64,
            )
        } else {
            storage.write(&path, &[]).await?;
            (0, 0, 0)
        };

        Ok(Self {
            storage,
            path,
            next_sequence: AtomicU64::new(last_sequence.max(floor) + 1),
            entries_since_checkpoint: AtomicUsize::new(entries),
            durable_len: AtomicU64::new(durable_len),
            poisoned: AtomicBool::new(false),
            write_lock: Mutex::new(()),
        })
    }

    /// Append one entry to the WAL
    /// Returns the sequence number assigned to this entry
    ///
    /// GUARANTEE: When this returns Ok, the data is durable on disk. When it
    /// returns Err, the log is cut back to its last acknowledged entry; if even
    /// that fails the WAL refuses further appends until reopened.
    pub async fn append(&self, op: WalOp) -> Result<u64, WalError> {
        let _guard = self.write_lock.lock().await;
        if self.poisoned.load(Ordering::SeqCst) {
            return Err(WalError::Poisoned);
        }

        let sequence = self.next_sequence.load(Ordering::SeqCst);
        let data = WalEntry { sequence, op }.serialize()?;

        if let Err(e) = self.write_durably(&data).await {
            self.roll_back().await;
            return Err(e);
        }

        // Only consume the sequence once the entry is durable
        self.next_sequence.store(sequence + 1, Ordering::SeqCst);
        self.durable_len.fetch_add(data.len() as u64, Ordering::SeqCst);
        self.entries_since_checkpoint.fetch_add(1, Ordering::SeqCst);

        Ok(sequence)
    }

    async fn write_durably(&self, data: &[u8]) -> Result<(), WalError> {
        self.storage.append(&self.path, data).await?;
        self.storage.sync(&self.path).await?;
        Ok(())
    }

    /// Cut the log back to its last acknowledged entry
    async fn roll_back(&self) {
        let len = self.durable_len.load(Ordering::SeqCst);
        let restored = match self.storage.truncate(&self.path, len).await {
            Ok(()) => self.storage.sync(&self.path).await,
            Err(e) => Err(e),
        };
        if let Err(e) = restored {
            tracing::error!(
                path = %self.path,
                error = %e,
                "Could not roll back failed WAL append; refusing further writes"
            );
            self.poisoned.store(true, Ordering::SeqCst);
        }
    }

    /// Whether a failed append left the log in an unknown state
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::SeqCst)
    }

    /// Get current sequence number (last written)
    pub fn current_sequence(&self) -> u64 {
        self.next_sequence.load(Ordering::SeqCst).saturating_sub(1)
    }

    /// Entries appended since the last checkpoint (or since open)
    pub fn entries_since_checkpoint(&self) -> usize {
        self.entries_since_checkpoint.load(Ordering::SeqCst)
    }

    /// Replay all entries from the WAL
    pub async fn replay_all(&self) -> Result<Vec<WalEntry>, WalError> {
        self.replay_from(0).await
    }

    /// Replay entries after a given sequence number
    pub async fn replay_from(&self, after_sequence: u64) -> Result<Vec<WalEntry>, WalError> {
        Ok(reader::replay_wal(&*self.storage, &self.path, after_sequence)
            .await?
            .entries)
    }

    /// Discard every entry; the caller must already have captured them in a snapshot
    pub async fn checkpoint(&self) -> Result<(), WalError> {
        let _guard = self.write_lock.lock().await;
        self.storage.write(&self.path, &[]).await?;
        self.storage.sync(&self.path).await?;
        self.durable_len.store(0, Ordering::SeqCst);
        self.entries_since_checkpoint.store(0, Ordering::SeqCst);
        Ok(())
    }

    /// Get WAL file path
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Get WAL file size
    pub async fn size(&self) -> Result<u64, WalError> {
        Ok(self.storage.size(&self.path).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FsBlockStorage, FsStorageConfig};

    fn remove(id: &str) -> WalOp {
        WalOp::Remove(vec![id.to_string()])
    }

    #[tokio::test]
    async fn test_wal_append_and_replay() {
        let storage = Arc::new(FsBlockStorage::temp(FsStorageConfig::fast()).unwrap());
        let wal = Wal::open(storage, "wal.log", 0).await.unwrap();

        let seq1 = wal.append(remove("a")).await.unwrap();
        let seq2 = wal.append(remove("b")).await.unwrap();

        assert_eq!(seq1, 1);
        assert_eq!(seq2, 2);

        let entries = wal.replay_all().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].op, remove("b"));
        assert_eq!(wal.entries_since_checkpoint(), 2);
    }

    #[tokio::test]
    async fn test_wal_checkpoint_keeps_sequence() {
        let storage = Arc::new(FsBlockStorage::temp(FsStorageConfig::fast()).unwrap());
        let wal = Wal::open(storage, "wal.log", 0).await.unwrap();

        wal.append(remove("a")).await.unwrap();
        wal.append(remove("b")).await.unwrap();
        wal.checkpoint().await.unwrap();

        assert!(wal.replay_all().await.unwrap().is_empty());
        assert_eq!(wal.size().await.unwrap(), 0);
        assert_eq!(wal.append(remove("c")).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_wal_recovery() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().to_path_buf();

        {
            let storage = Arc::new(FsBlockStorage::new(&path, FsStorageConfig::fast()).unwrap());
            let wal = Wal::open(storage, "wal.log", 0).await.unwrap();
            wal.append(remove("a")).await.unwrap();
            wal.append(remove("b")).await.unwrap();
        }

        {
            let storage = Arc::new(FsBlockStorage::new(&path, FsStorageConfig::fast()).unwrap());
            let wal = Wal::open(storage, "wal.log", 0).await.unwrap();

            assert_eq!(wal.current_sequence(), 2);
            assert_eq!(wal.replay_all().await.unwrap().len(), 2);
        }

        // A snapshot floor above the log moves the sequence forward
        {
            let storage = Arc::new(FsBlockStorage::new(&path, FsStorageConfig::fast()).unwrap());
            let wal = Wal::open(storage, "wal.log", 10).await.unwrap();
            assert_eq!(wal.append(remove("c")).await.unwrap(), 11);
        }
    }

    #[tokio::test]
    async fn test_wal_open_truncates_torn_tail() {
        let storage: Arc<dyn BlockStorage> =
            Arc::new(FsBlockStorage::temp(FsStorageConfig::fast()).unwrap());
        {
            let wal = Wal::open(storage.clone(), "wal.log", 0).await.unwrap();
            wal.append(remove("a")).await.unwrap();
        }
        storage.append("wal.log", &[0x32, 0x4C, 0x41]).await.unwrap();

        let wal = Wal::open(storage.clone(), "wal.log", 0).await.unwrap();
        assert_eq!(wal.append(remove("b")).await.unwrap(), 2);
        assert_eq!(wal.replay_all().await.unwrap().len(), 2);
    }
}
