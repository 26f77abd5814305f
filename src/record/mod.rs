//! Record store
//!
//! The authoritative table of a collection's records:
//! - In-memory table behind a `parking_lot::RwLock`, ordered by insertion
//! - Every mutating call becomes one WAL entry holding its post-images or
//!   removed ids, applied to the table after the entry is durable
//! - Periodic snapshots (`records.snap`) let the WAL be truncated
//!
//! Callers serialize writers per collection; reads take the table read guard
//! for the whole call and see a consistent snapshot.

use crate::error::{QuiverError, Result};
use crate::filter::{Where, WhereDocument};
use crate::storage::{self, BlockStorage};
use crate::sync::Delta;
use crate::types::{Metadata, MetadataValue, Record, Sort, SortKey};
use crate::wal::entry::WalOp;
use crate::wal::Wal;
use parking_lot::{RwLock, RwLockReadGuard};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

// ============================================================================
// Table
// ============================================================================

#[derive(Debug, Clone)]
struct StoredRecord {
    order: u64,
    record: Record,
}

/// Field changes for one id in an update/upsert
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordUpdate {
    pub id: String,
    pub embedding: Option<Vec<f32>>,
    pub metadata: Option<Metadata>,
    pub document: Option<String>,
}

/// Which records a read or delete addresses; all parts must match
#[derive(Debug, Clone, Default)]
pub struct Selector {
    pub ids: Option<Vec<String>>,
    pub where_: Option<Where>,
    pub where_document: Option<WhereDocument>,
}

impl Selector {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn ids(ids: Vec<String>) -> Self {
        Self {
            ids: Some(ids),
            ..Self::default()
        }
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.where_
            .as_ref()
            .map_or(true, |w| w.matches(record.metadata.as_ref()))
            && self
                .where_document
                .as_ref()
                .map_or(true, |w| w.matches(record.document.as_deref()))
    }
}

/// In-memory record table
#[derive(Debug, Default)]
pub struct RecordTable {
    records: HashMap<String, StoredRecord>,
    order: BTreeMap<u64, String>,
    next_order: u64,
    version: u64,
    dims: Option<usize>,
}

/// Serialized form of a table
#[derive(Serialize, Deserialize)]
struct TableSnapshot {
    version: u64,
    next_order: u64,
    dims: Option<usize>,
    records: Vec<(u64, Record)>,
}

impl RecordTable {
    /// Live record count
    pub fn count(&self) -> usize {
        self.records.len()
    }

    /// Sequence of the last applied WAL entry
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Pinned dimensionality
    pub fn dimensions(&self) -> Option<usize> {
        self.dims
    }

    pub fn get(&self, id: &str) -> Option<&Record> {
        self.records.get(id).map(|s| &s.record)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    /// Records in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &Record> + '_ {
        self.order
            .values()
            .filter_map(move |id| self.records.get(id).map(|s| &s.record))
    }

    /// Split an insert batch into new records and ids that already exist
    pub fn plan_insert(&self, records: Vec<Record>) -> (Vec<Record>, Vec<String>) {
        let mut skipped = Vec::new();
        let mut written = Vec::with_capacity(records.len());
        for record in records {
            if self.contains(&record.id) {
                skipped.push(record.id);
            } else {
                written.push(record);
            }
        }
        (written, skipped)
    }

    /// Post-images for updates of existing ids; unknown ids are returned as skipped
    pub fn plan_update(&self, updates: Vec<RecordUpdate>) -> (Vec<Record>, Vec<String>) {
        let mut skipped = Vec::new();
        let mut written = Vec::with_capacity(updates.len());
        for update in updates {
            match self.get(&update.id) {
                Some(existing) => written.push(merge(existing, update)),
                None => skipped.push(update.id),
            }
        }
        (written, skipped)
    }

    /// Post-images for an upsert; new ids need an embedding
    pub fn plan_upsert(&self, updates: Vec<RecordUpdate>) -> Result<Vec<Record>> {
        updates
            .into_iter()
            .map(|update| match self.get(&update.id) {
                Some(existing) => Ok(merge(existing, update)),
                None => {
                    let embedding = update.embedding.ok_or_else(|| {
                        QuiverError::invalid_argument(format!(
                            "Record {} does not exist and no embedding was provided",
                            update.id
                        ))
                    })?;
                    Ok(Record {
                        id: update.id,
                        embedding,
                        metadata: update.metadata,
                        document: update.document,
                    })
                }
            })
            .collect()
    }

    /// Matching records in insertion order
    pub fn select(&self, selector: &Selector) -> Vec<&Record> {
        match &selector.ids {
            Some(ids) => {
                let mut seen = HashSet::with_capacity(ids.len());
                let mut hits: Vec<&StoredRecord> = ids
                    .iter()
                    .filter(|id| seen.insert(id.as_str()))
                    .filter_map(|id| self.records.get(id))
                    .filter(|s| selector.matches(&s.record))
                    .collect();
                hits.sort_by_key(|s| s.order);
                hits.into_iter().map(|s| &s.record).collect()
            }
            None => self.iter().filter(|r| selector.matches(r)).collect(),
        }
    }

    /// Select, order, then paginate
    pub fn query(
        &self,
        selector: &Selector,
        sort: Option<&Sort>,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Vec<&Record> {
        let mut hits = self.select(selector);
        if let Some(sort) = sort {
            sort_records(&mut hits, sort);
        }
        hits.into_iter()
            .skip(offset.unwrap_or(0))
            .take(limit.unwrap_or(usize::MAX))
            .collect()
    }

    /// Apply a durable WAL entry, returning the index deltas it implies
    pub fn apply(&mut self, sequence: u64, op: &WalOp) -> Vec<Delta> {
        let mut deltas = Vec::new();
        match op {
            WalOp::Put(records) => {
                for record in records {
                    if self.dims.is_none() {
                        self.dims = Some(record.embedding.len());
                    }
                    match self.records.get_mut(&record.id) {
                        Some(stored) => {
                            if stored.record.embedding != record.embedding {
                                deltas.push(Delta::Upsert {
                                    id: record.id.clone(),
                                    embedding: record.embedding.clone(),
                                });
                            }
                            stored.record = record.clone();
                        }
                        None => {
                            let order = self.next_order;
                            self.next_order += 1;
                            self.order.insert(order, record.id.clone());
                            self.records.insert(
                                record.id.clone(),
                                StoredRecord {
                                    order,
                                    record: record.clone(),
                                },
                            );
                            deltas.push(Delta::Upsert {
                                id: record.id.clone(),
                                embedding: record.embedding.clone(),
                            });
                        }
                    }
                }
            }
            WalOp::Remove(ids) => {
                for id in ids {
                    if let Some(stored) = self.records.remove(id) {
                        self.order.remove(&stored.order);
                        deltas.push(Delta::Delete { id: id.clone() });
                    }
                }
            }
        }
        self.version = self.version.max(sequence);
        deltas
    }

    /// Current state of `ids` expressed as deltas
    pub fn deltas_for(&self, ids: impl IntoIterator<Item = String>) -> Vec<Delta> {
        ids.into_iter()
            .map(|id| match self.get(&id) {
                Some(record) => Delta::Upsert {
                    embedding: record.embedding.clone(),
                    id,
                },
                None => Delta::Delete { id },
            })
            .collect()
    }

    fn snapshot(&self) -> Result<Vec<u8>> {
        let snapshot = TableSnapshot {
            version: self.version,
            next_order: self.next_order,
            dims: self.dims,
            records: self
                .order
                .iter()
                .filter_map(|(order, id)| Some((*order, self.records.get(id)?.record.clone())))
                .collect(),
        };
        let body = bincode::serialize(&snapshot)?;
        let mut data = Vec::with_capacity(body.len() + 4);
        data.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
        data.extend_from_slice(&body);
        Ok(data)
    }

    fn restore(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(QuiverError::serialization("record snapshot is truncated"));
        }
        let (crc, body) = data.split_at(4);
        if u32::from_le_bytes([crc[0], crc[1], crc[2], crc[3]]) != crc32fast::hash(body) {
            return Err(QuiverError::serialization("record snapshot checksum mismatch"));
        }
        let snapshot: TableSnapshot = bincode::deserialize(body)?;
        let mut table = RecordTable {
            version: snapshot.version,
            next_order: snapshot.next_order,
            dims: snapshot.dims,
            ..RecordTable::default()
        };
        for (order, record) in snapshot.records {
            table.order.insert(order, record.id.clone());
            table
                .records
                .insert(record.id.clone(), StoredRecord { order, record });
        }
        Ok(table)
    }
}

/// Overwrite supplied fields; metadata keys merge into the existing map
fn merge(existing: &Record, update: RecordUpdate) -> Record {
    let metadata = match (existing.metadata.clone(), update.metadata) {
        (Some(mut current), Some(supplied)) => {
            current.extend(supplied);
            Some(current)
        }
        (None, Some(supplied)) => Some(supplied),
        (current, None) => current,
    };
    Record {
        id: update.id,
        embedding: update.embedding.unwrap_or_else(|| existing.embedding.clone()),
        metadata,
        document: update.document.or_else(|| existing.document.clone()),
    }
}

fn sort_records(records: &mut [&Record], sort: &Sort) {
    match &sort.key {
        SortKey::Id => records.sort_by(|a, b| {
            let ord = a.id.cmp(&b.id);
            if sort.descending {
                ord.reverse()
            } else {
                ord
            }
        }),
        SortKey::Metadata(field) => records.sort_by(|a, b| {
            let left = a.metadata.as_ref().and_then(|m| m.get(field));
            let right = b.metadata.as_ref().and_then(|m| m.get(field));
            match (left, right) {
                (Some(x), Some(y)) => {
                    let ord = compare_metadata(x, y);
                    if sort.descending {
                        ord.reverse()
                    } else {
                        ord
                    }
                }
                // Missing values sort last in both directions
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            }
        }),
    }
}

/// Total order over metadata values: numbers, then strings, then bools
fn compare_metadata(a: &MetadataValue, b: &MetadataValue) -> Ordering {
    fn rank(v: &MetadataValue) -> u8 {
        match v {
            MetadataValue::Int(_) | MetadataValue::Float(_) => 0,
            MetadataValue::Str(_) => 1,
            MetadataValue::Bool(_) => 2,
        }
    }
    match (a, b) {
        (MetadataValue::Str(x), MetadataValue::Str(y)) => x.cmp(y),
        (MetadataValue::Bool(x), MetadataValue::Bool(y)) => x.cmp(y),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => rank(a).cmp(&rank(b)),
        },
    }
}

// ============================================================================
// Durable store
// ============================================================================

/// Durable record store for one collection
pub struct RecordStore {
    storage: Arc<dyn BlockStorage>,
    snapshot_path: String,
    wal: Wal,
    table: RwLock<RecordTable>,
    /// Version captured by the snapshot on disk; the WAL covers everything after it
    snapshot_version: parking_lot::Mutex<u64>,
    checkpoint_entries: usize,
}

impl RecordStore {
    /// Open or create the store under `dir`, restoring snapshot + WAL
    pub async fn open(
        storage: Arc<dyn BlockStorage>,
        dir: &str,
        checkpoint_entries: usize,
    ) -> Result<Self> {
        storage.create_dir(dir).await?;
        let snapshot_path = format!("{}/records.snap", dir);
        let wal_path = format!("{}/wal.log", dir);

        let mut table = if storage.exists(&snapshot_path).await? {
            RecordTable::restore(&storage.read(&snapshot_path).await?)?
        } else {
            RecordTable::default()
        };
        let snapshot_version = table.version();

        let wal = Wal::open(storage.clone(), wal_path, snapshot_version).await?;
        let entries = wal.replay_from(snapshot_version).await?;
        let replayed = entries.len();
        for entry in entries {
            table.apply(entry.sequence, &entry.op);
        }

        tracing::info!(
            dir = %dir,
            count = table.count(),
            version = table.version(),
            replayed,
            "Opened record store"
        );

        Ok(Self {
            storage,
            snapshot_path,
            wal,
            table: RwLock::new(table),
            snapshot_version: parking_lot::Mutex::new(snapshot_version),
            checkpoint_entries: checkpoint_entries.max(1),
        })
    }

    /// Read guard over the table; hold it for the whole read
    pub fn read(&self) -> RwLockReadGuard<'_, RecordTable> {
        self.table.read()
    }

    pub fn count(&self) -> usize {
        self.table.read().count()
    }

    pub fn version(&self) -> u64 {
        self.table.read().version()
    }

    /// Write `op` to the WAL, then apply it to the table
    ///
    /// `stage` runs under the table write guard with the entry's deltas, so
    /// readers never see the table ahead of the staged deltas. Callers must
    /// hold the collection's writer lock.
    pub async fn commit<F>(&self, op: WalOp, stage: F) -> Result<u64>
    where
        F: FnOnce(u64, Vec<Delta>),
    {
        let sequence = self.wal.append(op.clone()).await?;
        {
            let mut table = self.table.write();
            let deltas = table.apply(sequence, &op);
            stage(sequence, deltas);
        }
        // The entry is durable and applied; a failed checkpoint only leaves a longer WAL
        if self.wal.entries_since_checkpoint() >= self.checkpoint_entries {
            if let Err(e) = self.checkpoint().await {
                tracing::error!(sequence, error = %e, "Record store checkpoint failed");
            }
        }
        Ok(sequence)
    }

    /// Snapshot the table and truncate the WAL
    pub async fn checkpoint(&self) -> Result<()> {
        let (data, version) = {
            let table = self.table.read();
            (table.snapshot()?, table.version())
        };
        storage::write_atomic(&*self.storage, &self.snapshot_path, &data).await?;
        self.wal.checkpoint().await?;
        *self.snapshot_version.lock() = version;
        tracing::debug!(version, "Checkpointed record store");
        Ok(())
    }

    /// Ids touched by WAL entries after `version`
    ///
    /// `None` when the WAL no longer covers that range (it was checkpointed past it).
    pub async fn touched_since(&self, version: u64) -> Result<Option<Vec<String>>> {
        if version < *self.snapshot_version.lock() {
            return Ok(None);
        }
        let entries = self.wal.replay_from(version).await?;
        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        for entry in &entries {
            for id in entry.op.ids() {
                if seen.insert(id.to_string()) {
                    ids.push(id.to_string());
                }
            }
        }
        Ok(Some(ids))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FsBlockStorage, FsStorageConfig, MemoryBlockStorage};
    use serde_json::json;

    fn record(id: &str, x: f32) -> Record {
        Record {
            id: id.to_string(),
            embedding: vec![x, x],
            metadata: None,
            document: None,
        }
    }

    fn meta(value: serde_json::Value) -> Metadata {
        crate::types::metadata_from_json(&value).unwrap()
    }

    #[test]
    fn test_merge_keeps_unmentioned_keys() {
        let mut table = RecordTable::default();
        let mut r = record("a", 1.0);
        r.metadata = Some(meta(json!({"k1": "v1"})));
        r.document = Some("doc".into());
        table.apply(1, &WalOp::Put(vec![r]));

        let (post, skipped) = table.plan_update(vec![
            RecordUpdate {
                id: "a".into(),
                metadata: Some(meta(json!({"k2": "v2"}))),
                ..Default::default()
            },
            RecordUpdate {
                id: "ghost".into(),
                ..Default::default()
            },
        ]);
        assert_eq!(skipped, vec!["ghost".to_string()]);
        assert_eq!(post[0].metadata, Some(meta(json!({"k1": "v1", "k2": "v2"}))));
        assert_eq!(post[0].document.as_deref(), Some("doc"));
        assert_eq!(post[0].embedding, vec![1.0, 1.0]);
    }

    #[test]
    fn test_apply_emits_deltas_only_for_vector_changes() {
        let mut table = RecordTable::default();
        let deltas = table.apply(1, &WalOp::Put(vec![record("a", 1.0)]));
        assert_eq!(deltas.len(), 1);

        let mut same_vector = record("a", 1.0);
        same_vector.document = Some("text".into());
        assert!(table.apply(2, &WalOp::Put(vec![same_vector])).is_empty());

        let deltas = table.apply(3, &WalOp::Remove(vec!["a".into(), "zzz".into()]));
        assert_eq!(deltas, vec![Delta::Delete { id: "a".into() }]);
        assert_eq!(table.version(), 3);
        assert_eq!(table.dimensions(), Some(2));
    }

    #[test]
    fn test_select_keeps_insertion_order() {
        let mut table = RecordTable::default();
        table.apply(1, &WalOp::Put(vec![record("c", 1.0), record("a", 2.0), record("b", 3.0)]));

        let ids = |records: Vec<&Record>| records.iter().map(|r| r.id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(table.select(&Selector::all())), vec!["c", "a", "b"]);
        assert_eq!(
            ids(table.select(&Selector::ids(vec!["b".into(), "c".into(), "b".into(), "x".into()]))),
            vec!["c", "b"]
        );
        assert_eq!(
            ids(table.query(&Selector::all(), Some(&Sort::by_id()), Some(2), Some(1))),
            vec!["b", "c"]
        );
    }

    #[test]
    fn test_sort_by_metadata_missing_last() {
        let mut table = RecordTable::default();
        let mut a = record("a", 1.0);
        a.metadata = Some(meta(json!({"rank": 2})));
        let mut b = record("b", 1.0);
        b.metadata = Some(meta(json!({"rank": 1.5})));
        let c = record("c", 1.0);
        table.apply(1, &WalOp::Put(vec![a, b, c]));

        let ids = |records: Vec<&Record>| records.iter().map(|r| r.id.clone()).collect::<Vec<_>>();
        assert_eq!(
            ids(table.query(&Selector::all(), Some(&Sort::by_metadata("rank")), None, None)),
            vec!["b", "a", "c"]
        );
        assert_eq!(
            ids(table.query(&Selector::all(), Some(&Sort::by_metadata("rank").descending()), None, None)),
            vec!["a", "b", "c"]
        );
    }

    #[tokio::test]
    async fn test_store_recovers_from_wal_and_snapshot() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().to_path_buf();

        {
            let storage = Arc::new(FsBlockStorage::new(&path, FsStorageConfig::fast()).unwrap());
            let store = RecordStore::open(storage, "c1", 2).await.unwrap();
            store.commit(WalOp::Put(vec![record("a", 1.0)]), |_, _| {}).await.unwrap();
            // Second entry reaches the checkpoint threshold
            store.commit(WalOp::Put(vec![record("b", 2.0)]), |_, _| {}).await.unwrap();
            store.commit(WalOp::Remove(vec!["a".into()]), |_, _| {}).await.unwrap();
        }

        let storage = Arc::new(FsBlockStorage::new(&path, FsStorageConfig::fast()).unwrap());
        let store = RecordStore::open(storage, "c1", 2).await.unwrap();
        assert_eq!(store.count(), 1);
        assert_eq!(store.version(), 3);
        assert!(store.read().get("b").is_some());

        assert_eq!(store.touched_since(2).await.unwrap(), Some(vec!["a".to_string()]));
        assert_eq!(store.touched_since(0).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_commit_stages_under_write_guard() {
        let store = RecordStore::open(Arc::new(MemoryBlockStorage::new()), "c", 100)
            .await
            .unwrap();
        let mut staged = Vec::new();
        let seq = store
            .commit(WalOp::Put(vec![record("a", 1.0)]), |seq, deltas| staged.push((seq, deltas)))
            .await
            .unwrap();
        assert_eq!(seq, 1);
        assert_eq!(staged.len(), 1);
        assert_eq!(staged[0].1.len(), 1);
    }
}
