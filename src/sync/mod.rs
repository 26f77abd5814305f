//! Batch synchronizer
//!
//! Decides when record store mutations reach the ANN index and when the index
//! is written to storage:
//! - Deltas are staged in a pending buffer, coalesced by id (latest op wins)
//! - Reaching `batch_size` staged deltas flushes the whole buffer into the index
//! - Reaching `sync_threshold` flushed deltas persists the index artifact
//!
//! Searches merge the pending buffer with the index, the pending entry taking
//! precedence for any id present in both. Lock order is pending, then index;
//! neither is held across an `.await`.

use crate::error::{QuiverError, Result};
use crate::index::{
    self, create_index, sort_neighbors, AnnIndex, AnnIndexConfig, CandidateSet, FlatIndex,
    Neighbor,
};
use crate::storage::BlockStorage;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// One index change implied by a durable mutation
#[derive(Clone, Debug, PartialEq)]
pub enum Delta {
    Upsert { id: String, embedding: Vec<f32> },
    Delete { id: String },
}

impl Delta {
    pub fn id(&self) -> &str {
        match self {
            Delta::Upsert { id, .. } | Delta::Delete { id } => id,
        }
    }
}

/// Flush and persistence thresholds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct SyncConfig {
    pub batch_size: usize,
    pub sync_threshold: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: crate::defaults::DEFAULT_BATCH_SIZE,
            sync_threshold: crate::defaults::DEFAULT_SYNC_THRESHOLD,
        }
    }
}

impl SyncConfig {
    pub fn new(batch_size: usize, sync_threshold: usize) -> Result<Self> {
        let config = Self {
            batch_size,
            sync_threshold,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(QuiverError::invalid_argument("hnsw:batch_size must be at least 1"));
        }
        if self.batch_size > self.sync_threshold {
            return Err(QuiverError::invalid_argument(format!(
                "hnsw:batch_size ({}) must be less than or equal to hnsw:sync_threshold ({})",
                self.batch_size, self.sync_threshold
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum SyncState {
    /// Pending deltas below `batch_size`
    Accumulating,
    /// `batch_size` reached, buffer not yet applied
    FlushPending,
    /// Applied to the index, artifact not yet written
    FlushedUnpersisted,
    /// Artifact matches the index, nothing pending
    Persisted,
}

/// Point-in-time view of the synchronizer
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SyncStats {
    pub state: SyncState,
    pub pending: usize,
    pub unpersisted: usize,
    pub index_version: u64,
    pub persisted_version: u64,
    pub index_len: usize,
}

#[derive(Clone, Debug)]
enum PendingOp {
    Upsert,
    Delete,
}

/// Coalesced deltas since the last flush
#[derive(Debug)]
struct PendingBatch {
    /// id -> (latest op, sequence that staged it)
    ops: HashMap<String, (PendingOp, u64)>,
    /// Vectors of pending upserts, searched exactly
    vectors: FlatIndex,
    /// Deltas staged since the last flush, before coalescing
    staged: usize,
    max_sequence: u64,
}

impl PendingBatch {
    fn new(space: crate::index::Space) -> Self {
        Self {
            ops: HashMap::new(),
            vectors: FlatIndex::new(space),
            staged: 0,
            max_sequence: 0,
        }
    }
}

/// Owns a collection's ANN index and its pending buffer
pub struct BatchSynchronizer {
    config: SyncConfig,
    index_config: AnnIndexConfig,
    storage: Arc<dyn BlockStorage>,
    index_path: String,
    index: RwLock<Box<dyn AnnIndex>>,
    pending: Mutex<PendingBatch>,
    unpersisted: AtomicUsize,
    persisted_version: AtomicU64,
    needs_rebuild: AtomicBool,
    persist_lock: tokio::sync::Mutex<()>,
}

impl BatchSynchronizer {
    pub fn new(
        config: SyncConfig,
        index_config: AnnIndexConfig,
        storage: Arc<dyn BlockStorage>,
        index_path: impl Into<String>,
        index: Box<dyn AnnIndex>,
        persisted_version: u64,
    ) -> Self {
        let space = index_config.space;
        Self {
            config,
            index_config,
            storage,
            index_path: index_path.into(),
            index: RwLock::new(index),
            pending: Mutex::new(PendingBatch::new(space)),
            unpersisted: AtomicUsize::new(0),
            persisted_version: AtomicU64::new(persisted_version),
            needs_rebuild: AtomicBool::new(false),
            persist_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> SyncConfig {
        self.config
    }

    pub fn index_config(&self) -> &AnnIndexConfig {
        &self.index_config
    }

    // ========================================================================
    // Staging
    // ========================================================================

    /// Stage the deltas of the durable entry `sequence`
    ///
    /// Runs under the record table write guard; never blocks on the index.
    pub fn stage(&self, sequence: u64, deltas: Vec<Delta>) {
        let mut pending = self.pending.lock();
        pending.max_sequence = pending.max_sequence.max(sequence);
        for delta in deltas {
            pending.staged += 1;
            match delta {
                Delta::Upsert { id, embedding } => {
                    if let Err(e) = pending.vectors.insert_or_replace(&id, &embedding) {
                        // Dimensions are validated upstream, so this is a divergence
                        tracing::warn!(id = %id, error = %e, "Pending buffer rejected a vector");
                        self.needs_rebuild.store(true, Ordering::SeqCst);
                    }
                    pending.ops.insert(id, (PendingOp::Upsert, sequence));
                }
                Delta::Delete { id } => {
                    pending.vectors.remove(&id);
                    pending.ops.insert(id, (PendingOp::Delete, sequence));
                }
            }
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().staged
    }

    pub fn flush_due(&self) -> bool {
        self.pending.lock().staged >= self.config.batch_size
    }

    pub fn persist_due(&self) -> bool {
        self.unpersisted.load(Ordering::SeqCst) >= self.config.sync_threshold
    }

    // ========================================================================
    // Flush / persist
    // ========================================================================

    /// Apply the whole pending buffer to the index
    ///
    /// The batch is applied under the index write lock and drained afterwards,
    /// so a concurrent search sees every pending id in at least one place.
    /// Returns the number of staged deltas flushed.
    pub fn flush(&self) -> Result<usize> {
        let (batch, staged, max_sequence) = {
            let pending = self.pending.lock();
            if pending.ops.is_empty() && pending.staged == 0 {
                // Entries without deltas (metadata-only writes) still move the version
                let mut index = self.index.write();
                let version = index.version().max(pending.max_sequence);
                index.set_version(version);
                return Ok(0);
            }
            let batch: Vec<(String, Option<Vec<f32>>, u64)> = pending
                .ops
                .iter()
                .map(|(id, (op, seq))| {
                    let vector = match op {
                        PendingOp::Upsert => pending.vectors.vector(id).map(<[f32]>::to_vec),
                        PendingOp::Delete => None,
                    };
                    (id.clone(), vector, *seq)
                })
                .collect();
            (batch, pending.staged, pending.max_sequence)
        };

        let applied = {
            let mut index = self.index.write();
            let mut failure = None;
            for (id, vector, _) in &batch {
                match vector {
                    Some(vector) => {
                        if let Err(e) = index.insert_or_replace(id, vector) {
                            failure = Some(e);
                            break;
                        }
                    }
                    None => {
                        index.remove(id);
                    }
                }
            }
            if failure.is_none() {
                let version = index.version().max(max_sequence);
                index.set_version(version);
                self.unpersisted.fetch_add(staged, Ordering::SeqCst);
            }
            failure
        };

        if let Some(e) = applied {
            tracing::warn!(error = %e, "Flush diverged from the record store; index marked for rebuild");
            self.needs_rebuild.store(true, Ordering::SeqCst);
            return Err(QuiverError::Inconsistent(format!("flush failed: {}", e)));
        }

        let mut pending = self.pending.lock();
        for (id, _, seq) in &batch {
            if let Some((_, current)) = pending.ops.get(id) {
                if current == seq {
                    pending.ops.remove(id);
                    pending.vectors.remove(id);
                }
            }
        }
        pending.staged = pending.staged.saturating_sub(staged);

        tracing::debug!(count = staged, version = max_sequence, "Flushed pending deltas");
        Ok(staged)
    }

    /// Write the index artifact
    pub async fn persist(&self) -> Result<()> {
        let _guard = self.persist_lock.lock().await;
        let (data, version, unpersisted) = {
            let index = self.index.read();
            (
                index::encode_artifact(&**index)?,
                index.version(),
                self.unpersisted.load(Ordering::SeqCst),
            )
        };
        index::save_index(&*self.storage, &self.index_path, &data).await?;
        self.persisted_version.store(version, Ordering::SeqCst);
        self.unpersisted.fetch_sub(unpersisted, Ordering::SeqCst);
        tracing::info!(version, path = %self.index_path, "Persisted index");
        Ok(())
    }

    /// Flush and persist when the thresholds say so
    ///
    /// Failures are logged; the mutation that got here is already durable in the WAL.
    pub async fn maybe_sync(&self) {
        if self.flush_due() {
            if let Err(e) = self.flush() {
                tracing::error!(error = %e, "Background flush failed");
                return;
            }
        }
        if self.persist_due() {
            if let Err(e) = self.persist().await {
                tracing::error!(error = %e, "Background index persistence failed");
            }
        }
    }

    // ========================================================================
    // Search
    // ========================================================================

    /// k nearest ids among `candidates` (all live ids when `None`)
    pub fn search(&self, query: &[f32], k: usize, candidates: Option<&CandidateSet>) -> Vec<Neighbor> {
        let (mut hits, shadowed) = {
            let pending = self.pending.lock();
            let hits = pending.vectors.search(query, k, candidates);
            let shadowed: HashSet<String> = pending.ops.keys().cloned().collect();
            (hits, shadowed)
        };

        {
            let index = self.index.read();
            hits.extend(
                index
                    .search(query, k + shadowed.len(), candidates)
                    .into_iter()
                    .filter(|n| !shadowed.contains(&n.id)),
            );
        }

        sort_neighbors(&mut hits);
        hits.truncate(k);
        hits
    }

    // ========================================================================
    // Recovery
    // ========================================================================

    /// A flush or query found the index out of step with the record store
    pub fn needs_rebuild(&self) -> bool {
        self.needs_rebuild.load(Ordering::SeqCst)
    }

    pub fn mark_for_rebuild(&self) {
        self.needs_rebuild.store(true, Ordering::SeqCst);
    }

    /// Replace the index with one built from `records`, discarding pending deltas
    pub fn rebuild<'a, I>(&self, records: I, version: u64) -> Result<()>
    where
        I: IntoIterator<Item = (&'a str, &'a [f32])>,
    {
        let mut fresh = create_index(&self.index_config);
        let mut count = 0usize;
        for (id, embedding) in records {
            fresh.insert_or_replace(id, embedding)?;
            count += 1;
        }
        fresh.set_version(version);

        let mut pending = self.pending.lock();
        let mut index = self.index.write();
        *index = fresh;
        *pending = PendingBatch::new(self.index_config.space);
        self.unpersisted.store(count, Ordering::SeqCst);
        self.needs_rebuild.store(false, Ordering::SeqCst);

        tracing::info!(count, version, "Rebuilt index from record store");
        Ok(())
    }

    pub fn index_version(&self) -> u64 {
        self.index.read().version()
    }

    pub fn index_len(&self) -> usize {
        self.index.read().len()
    }

    pub fn stats(&self) -> SyncStats {
        let (pending, coalesced) = {
            let p = self.pending.lock();
            (p.staged, p.ops.len())
        };
        let (index_version, index_len) = {
            let index = self.index.read();
            (index.version(), index.len())
        };
        let unpersisted = self.unpersisted.load(Ordering::SeqCst);
        let state = if pending >= self.config.batch_size {
            SyncState::FlushPending
        } else if pending > 0 || coalesced > 0 {
            SyncState::Accumulating
        } else if unpersisted > 0 {
            SyncState::FlushedUnpersisted
        } else {
            SyncState::Persisted
        };
        SyncStats {
            state,
            pending,
            unpersisted,
            index_version,
            persisted_version: self.persisted_version.load(Ordering::SeqCst),
            index_len,
        }
    }
}
