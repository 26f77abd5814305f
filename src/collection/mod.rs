//! Collection engine
//!
//! One collection owns:
//! - A durable record store (WAL + snapshot)
//! - A batch synchronizer holding the ANN index and its pending buffer
//! - A writer mutex serializing mutations
//!
//! Mutations run: validate -> WAL append -> table apply + delta staging (one
//! critical section) -> flush/persist when thresholds are reached. Reads take
//! the table read guard for the whole call.

pub mod config;
pub mod query;
pub mod request;

pub use config::CollectionConfig;
pub use query::CancelToken;
pub use request::{DeleteRequest, GetRequest, QueryRequest, RecordBatch};

use crate::config::EngineConfig;
use crate::error::{QuiverError, Result};
use crate::filter::{Where, WhereDocument};
use crate::index::{self, create_index, AnnIndex};
use crate::record::{RecordStore, RecordUpdate, Selector};
use crate::storage::BlockStorage;
use crate::sync::{BatchSynchronizer, SyncStats};
use crate::types::{EmbeddingFunction, GetResult, Include, Metadata, QueryResult, Record, WriteOutcome};
use crate::validation;
use crate::wal::entry::WalOp;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore, SemaphorePermit};
use uuid::Uuid;

/// Catalog entry of a collection
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub id: Uuid,
    pub name: String,
    pub tenant: String,
    pub database: String,
    pub metadata: Option<Metadata>,
    pub created_at: DateTime<Utc>,
}

/// Counters for one collection
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CollectionStats {
    pub count: usize,
    pub dimension: Option<usize>,
    pub version: u64,
    pub sync: SyncStats,
}

/// Storage directory of a collection
pub fn collection_dir(id: &Uuid) -> String {
    format!("collections/{}", id)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum WriteMode {
    Add,
    Update,
    Upsert,
}

/// A handle to one collection
pub struct Collection {
    info: parking_lot::RwLock<CollectionInfo>,
    config: CollectionConfig,
    store: RecordStore,
    sync: BatchSynchronizer,
    writer: Mutex<()>,
    embedding_function: parking_lot::RwLock<Option<Arc<dyn EmbeddingFunction>>>,
    limiter: Arc<Semaphore>,
    max_batch_size: usize,
    dropped: AtomicBool,
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let info = self.info.read();
        f.debug_struct("Collection")
            .field("id", &info.id)
            .field("name", &info.name)
            .field("count", &self.store.count())
            .finish()
    }
}

impl Collection {
    /// Open (or create) a collection's storage and recover its index
    pub async fn open(
        info: CollectionInfo,
        storage: Arc<dyn BlockStorage>,
        defaults: &EngineConfig,
        limiter: Arc<Semaphore>,
        embedding_function: Option<Arc<dyn EmbeddingFunction>>,
    ) -> Result<Arc<Self>> {
        let config = CollectionConfig::from_metadata(info.metadata.as_ref(), defaults)?;
        let dir = collection_dir(&info.id);
        let store = RecordStore::open(storage.clone(), &dir, defaults.wal_checkpoint_entries).await?;
        let index_path = format!("{}/index.bin", dir);

        let loaded = match index::load_index(&config.index, &*storage, &index_path).await {
            Ok(loaded) => loaded,
            Err(e) => {
                tracing::warn!(collection = %info.name, error = %e, "Discarding unreadable index artifact");
                None
            }
        };

        let table_version = store.version();
        let count = store.count();
        let (index, replay): (Box<dyn AnnIndex>, Option<Vec<String>>) = match loaded {
            Some(index) if index.version() == table_version && index.len() == count => {
                (index, Some(Vec::new()))
            }
            Some(index) if index.version() < table_version => {
                match store.touched_since(index.version()).await? {
                    Some(ids) => (index, Some(ids)),
                    None => (create_index(&config.index), None),
                }
            }
            Some(index) => {
                tracing::warn!(
                    collection = %info.name,
                    version = index.version(),
                    table_version,
                    "Index artifact diverged from the record store"
                );
                (create_index(&config.index), None)
            }
            None if count == 0 => (create_index(&config.index), Some(Vec::new())),
            None => (create_index(&config.index), None),
        };
        let persisted_version = index.version();

        let sync = BatchSynchronizer::new(
            config.sync,
            config.index.clone(),
            storage,
            index_path,
            index,
            persisted_version,
        );

        let collection = Arc::new(Self {
            info: parking_lot::RwLock::new(info),
            config,
            store,
            sync,
            writer: Mutex::new(()),
            embedding_function: parking_lot::RwLock::new(embedding_function),
            limiter,
            max_batch_size: defaults.max_batch_size,
            dropped: AtomicBool::new(false),
        });

        match replay {
            Some(ids) if ids.is_empty() => {}
            Some(ids) => {
                let deltas = {
                    let table = collection.store.read();
                    table.deltas_for(ids)
                };
                collection.sync.stage(table_version, deltas);
                if collection.sync.flush().is_err() || collection.sync.index_len() != count {
                    collection.sync.mark_for_rebuild();
                }
            }
            None => collection.sync.mark_for_rebuild(),
        }
        collection.rebuild_if_needed().await?;

        tracing::info!(
            collection = %collection.name(),
            count,
            version = table_version,
            "Opened collection"
        );
        Ok(collection)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn id(&self) -> Uuid {
        self.info.read().id
    }

    pub fn name(&self) -> String {
        self.info.read().name.clone()
    }

    pub fn metadata(&self) -> Option<Metadata> {
        self.info.read().metadata.clone()
    }

    pub fn info(&self) -> CollectionInfo {
        self.info.read().clone()
    }

    pub fn config(&self) -> &CollectionConfig {
        &self.config
    }

    /// Pinned dimensionality, once the first write happened
    pub fn dimension(&self) -> Option<usize> {
        self.store.read().dimensions()
    }

    pub fn embedding_function(&self) -> Option<Arc<dyn EmbeddingFunction>> {
        self.embedding_function.read().clone()
    }

    /// Bind (or replace) the function used for documents without embeddings
    pub fn bind_embedding_function(&self, function: Arc<dyn EmbeddingFunction>) {
        *self.embedding_function.write() = Some(function);
    }

    pub(crate) fn rename(&self, name: String) {
        self.info.write().name = name;
    }

    pub(crate) fn replace_metadata(&self, metadata: Option<Metadata>) {
        self.info.write().metadata = metadata;
    }

    pub(crate) fn mark_dropped(&self) {
        self.dropped.store(true, Ordering::SeqCst);
    }

    /// Wait for in-flight mutations and block new ones while the guard lives
    pub(crate) async fn lock_writer(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.writer.lock().await
    }

    /// Writer lock for a mutation; the collection may have been dropped while we queued
    async fn lock_live_writer(&self) -> Result<tokio::sync::MutexGuard<'_, ()>> {
        let guard = self.writer.lock().await;
        self.ensure_live()?;
        Ok(guard)
    }

    fn ensure_live(&self) -> Result<()> {
        if self.dropped.load(Ordering::SeqCst) {
            return Err(QuiverError::not_found(format!("Collection {}", self.name())));
        }
        Ok(())
    }

    async fn acquire(&self) -> Result<SemaphorePermit<'_>> {
        self.ensure_live()?;
        self.limiter
            .acquire()
            .await
            .map_err(|_| QuiverError::Cancelled("engine is shut down".to_string()))
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Insert new records; ids that already exist are skipped
    pub async fn add(&self, batch: RecordBatch) -> Result<WriteOutcome> {
        let _permit = self.acquire().await?;
        let _writer = self.lock_live_writer().await?;
        self.rebuild_if_needed().await?;

        let updates = self.prepare(batch, WriteMode::Add)?;
        let records = updates
            .into_iter()
            .map(|u| {
                let embedding = u.embedding.ok_or_else(|| {
                    QuiverError::invalid_argument(format!("Missing embedding for {}", u.id))
                })?;
                Ok(Record {
                    id: u.id,
                    embedding,
                    metadata: u.metadata,
                    document: u.document,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let (written, skipped) = self.store.read().plan_insert(records);

        let outcome = WriteOutcome {
            written: written.iter().map(|r| r.id.clone()).collect(),
            skipped,
        };
        if !written.is_empty() {
            self.commit(WalOp::Put(written)).await?;
        }
        Ok(outcome)
    }

    /// Update existing records with merge semantics; unknown ids are skipped
    pub async fn update(&self, batch: RecordBatch) -> Result<WriteOutcome> {
        let _permit = self.acquire().await?;
        let _writer = self.lock_live_writer().await?;
        self.rebuild_if_needed().await?;

        let updates = self.prepare(batch, WriteMode::Update)?;
        let (written, skipped) = self.store.read().plan_update(updates);

        let outcome = WriteOutcome {
            written: written.iter().map(|r| r.id.clone()).collect(),
            skipped,
        };
        if !written.is_empty() {
            self.commit(WalOp::Put(written)).await?;
        }
        Ok(outcome)
    }

    /// Update existing ids, insert new ones
    pub async fn upsert(&self, batch: RecordBatch) -> Result<WriteOutcome> {
        let _permit = self.acquire().await?;
        let _writer = self.lock_live_writer().await?;
        self.rebuild_if_needed().await?;

        let updates = self.prepare(batch, WriteMode::Upsert)?;
        let written = self.store.read().plan_upsert(updates)?;

        let outcome = WriteOutcome {
            written: written.iter().map(|r| r.id.clone()).collect(),
            skipped: Vec::new(),
        };
        if !written.is_empty() {
            self.commit(WalOp::Put(written)).await?;
        }
        Ok(outcome)
    }

    /// Remove matching records, returning the removed ids
    pub async fn delete(&self, request: DeleteRequest) -> Result<Vec<String>> {
        if request.ids.is_none() && request.where_.is_none() && request.where_document.is_none() {
            return Err(QuiverError::invalid_argument(
                "You must provide either ids, where, or where_document to delete.",
            ));
        }
        let where_ = parse_where(request.where_.as_ref())?;
        let where_document = parse_where_document(request.where_document.as_ref())?;

        let _permit = self.acquire().await?;
        let _writer = self.lock_live_writer().await?;
        self.rebuild_if_needed().await?;

        // Present but empty selectors constrain nothing, so they match nothing
        if matches!(&request.ids, Some(ids) if ids.is_empty()) {
            return Ok(Vec::new());
        }
        if request.ids.is_none() && where_.is_none() && where_document.is_none() {
            return Ok(Vec::new());
        }

        let selector = Selector {
            ids: request.ids,
            where_,
            where_document,
        };
        let removed: Vec<String> = self
            .store
            .read()
            .select(&selector)
            .into_iter()
            .map(|r| r.id.clone())
            .collect();
        if !removed.is_empty() {
            self.commit(WalOp::Remove(removed.clone())).await?;
            tracing::debug!(collection = %self.name(), count = removed.len(), "Deleted records");
        }
        Ok(removed)
    }

    /// Validate a write batch and resolve its embeddings
    fn prepare(&self, batch: RecordBatch, mode: WriteMode) -> Result<Vec<RecordUpdate>> {
        validation::validate_batch_size(batch.len(), self.max_batch_size)?;
        validation::validate_ids(&batch.ids)?;
        validation::validate_lengths(
            batch.len(),
            batch.embeddings.as_ref().map(Vec::len),
            batch.metadatas.as_ref().map(Vec::len),
            batch.documents.as_ref().map(Vec::len),
        )?;
        if let Some(metadatas) = &batch.metadatas {
            for metadata in metadatas.iter().flatten() {
                validation::validate_metadata(metadata)?;
            }
        }

        let function = self.embedding_function();
        let embeddings = match (batch.embeddings, &batch.documents, &function) {
            (Some(embeddings), _, _) => Some(embeddings),
            (None, Some(documents), Some(function)) => {
                let texts = documents
                    .iter()
                    .map(|d| {
                        d.clone().ok_or_else(|| {
                            QuiverError::invalid_argument(
                                "Every record needs a document to compute its embedding",
                            )
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                let computed = function.embed(&texts)?;
                if computed.len() != texts.len() {
                    return Err(QuiverError::invalid_argument(format!(
                        "Embedding function {} returned {} embeddings for {} documents",
                        function.name(),
                        computed.len(),
                        texts.len()
                    )));
                }
                Some(computed)
            }
            (None, _, _) if mode == WriteMode::Add => {
                return Err(QuiverError::invalid_argument(
                    "You must provide embeddings, or documents and an embedding function",
                ));
            }
            (None, _, _) => None,
        };

        if let Some(embeddings) = &embeddings {
            let pinned = self.store.read().dimensions();
            validation::validate_dimensions(embeddings, pinned)?;
        }

        let n = batch.ids.len();
        let mut embeddings = embeddings.map(Vec::into_iter);
        let mut metadatas = batch.metadatas.map(Vec::into_iter);
        let mut documents = batch.documents.map(Vec::into_iter);
        let mut updates = Vec::with_capacity(n);
        for id in batch.ids {
            updates.push(RecordUpdate {
                id,
                embedding: embeddings.as_mut().and_then(Iterator::next),
                metadata: metadatas.as_mut().and_then(Iterator::next).flatten(),
                document: documents.as_mut().and_then(Iterator::next).flatten(),
            });
        }
        Ok(updates)
    }

    /// Durably apply one operation and stage its deltas; caller holds the writer lock
    async fn commit(&self, op: WalOp) -> Result<u64> {
        let sequence = self
            .store
            .commit(op, |sequence, deltas| self.sync.stage(sequence, deltas))
            .await?;
        self.sync.maybe_sync().await;
        Ok(sequence)
    }

    /// Rebuild the index from the table if a divergence was detected
    async fn rebuild_if_needed(&self) -> Result<()> {
        if !self.sync.needs_rebuild() {
            return Ok(());
        }
        {
            let table = self.store.read();
            self.sync.rebuild(
                table.iter().map(|r| (r.id.as_str(), r.embedding.as_slice())),
                table.version(),
            )?;
        }
        if let Err(e) = self.sync.persist().await {
            tracing::error!(collection = %self.name(), error = %e, "Failed to persist rebuilt index");
        }
        Ok(())
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Records matching the selectors, ordered and paginated
    pub async fn get(&self, request: GetRequest) -> Result<GetResult> {
        let where_ = parse_where(request.where_.as_ref())?;
        let where_document = parse_where_document(request.where_document.as_ref())?;
        let include = request.include.unwrap_or_else(Include::default_get);
        if include.contains(&Include::Distances) {
            return Err(QuiverError::invalid_argument(
                "distances can only be included in query results",
            ));
        }

        let _permit = self.acquire().await?;
        let mut result = GetResult::empty(&include);
        let selector = Selector {
            ids: request.ids,
            where_,
            where_document,
        };
        let table = self.store.read();
        for record in table.query(&selector, request.sort.as_ref(), request.limit, request.offset) {
            result.push(record);
        }
        Ok(result)
    }

    /// Live record count
    pub async fn count(&self) -> Result<usize> {
        let _permit = self.acquire().await?;
        Ok(self.store.count())
    }

    /// First `limit` records in insertion order, every field included
    pub async fn peek(&self, limit: usize) -> Result<GetResult> {
        self.get(GetRequest {
            limit: Some(limit),
            include: Some(Include::all()),
            ..GetRequest::default()
        })
        .await
    }

    /// Nearest neighbors per query vector
    pub async fn query(self: &Arc<Self>, request: QueryRequest) -> Result<QueryResult> {
        self.query_with_cancel(request, CancelToken::new()).await
    }

    /// Query that stops with `Cancelled` once `cancel` fires
    pub async fn query_with_cancel(
        self: &Arc<Self>,
        request: QueryRequest,
        cancel: CancelToken,
    ) -> Result<QueryResult> {
        validation::validate_n_results(request.n_results)?;
        let where_ = parse_where(request.where_.as_ref())?;
        let where_document = parse_where_document(request.where_document.as_ref())?;
        let include = request.include.unwrap_or_else(Include::default_query);

        let queries = match (request.query_embeddings, request.query_texts) {
            (Some(_), Some(_)) => {
                return Err(QuiverError::invalid_argument(
                    "You can only provide query_embeddings or query_texts, not both",
                ));
            }
            (Some(embeddings), None) => embeddings,
            (None, Some(texts)) => {
                let function = self.embedding_function().ok_or_else(|| {
                    QuiverError::invalid_argument(
                        "query_texts need an embedding function bound to the collection",
                    )
                })?;
                function.embed(&texts)?
            }
            (None, None) => {
                return Err(QuiverError::invalid_argument(
                    "You must provide either query_embeddings or query_texts",
                ));
            }
        };
        if queries.iter().any(Vec::is_empty) {
            return Err(QuiverError::invalid_argument(
                "Expected each query embedding to be a non-empty list",
            ));
        }

        let _permit = self.acquire().await?;
        let collection = Arc::clone(self);
        let n_results = request.n_results;
        tokio::task::spawn_blocking(move || {
            let table = collection.store.read();
            let plan = query::QueryPlan {
                queries: &queries,
                n_results,
                where_: where_.as_ref(),
                where_document: where_document.as_ref(),
                include: &include,
            };
            query::execute(&collection.name(), &table, &collection.sync, &plan, &cancel)
        })
        .await
        .map_err(|e| QuiverError::Cancelled(format!("query task failed: {}", e)))?
    }

    /// Query cancelled cooperatively when `timeout` passes
    pub async fn query_with_timeout(
        self: &Arc<Self>,
        request: QueryRequest,
        timeout: Duration,
    ) -> Result<QueryResult> {
        let cancel = CancelToken::new();
        match tokio::time::timeout(timeout, self.query_with_cancel(request, cancel.clone())).await {
            Ok(result) => result,
            Err(_) => {
                cancel.cancel();
                Err(QuiverError::Cancelled(format!(
                    "query exceeded its deadline of {:?}",
                    timeout
                )))
            }
        }
    }

    // ========================================================================
    // Synchronizer control
    // ========================================================================

    /// Apply every pending delta to the index
    pub async fn flush(&self) -> Result<usize> {
        let _writer = self.lock_live_writer().await?;
        self.rebuild_if_needed().await?;
        self.sync.flush()
    }

    /// Flush, then write the index artifact
    pub async fn persist(&self) -> Result<()> {
        let _writer = self.lock_live_writer().await?;
        self.rebuild_if_needed().await?;
        self.sync.flush()?;
        self.sync.persist().await
    }

    pub fn stats(&self) -> CollectionStats {
        let (count, dimension, version) = {
            let table = self.store.read();
            (table.count(), table.dimensions(), table.version())
        };
        CollectionStats {
            count,
            dimension,
            version,
            sync: self.sync.stats(),
        }
    }
}

fn parse_where(value: Option<&serde_json::Value>) -> Result<Option<Where>> {
    Ok(match value {
        Some(value) => Where::parse(value)?,
        None => None,
    })
}

fn parse_where_document(value: Option<&serde_json::Value>) -> Result<Option<WhereDocument>> {
    Ok(match value {
        Some(value) => WhereDocument::parse(value)?,
        None => None,
    })
}
