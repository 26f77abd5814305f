//! Quiver Engine
//!
//! Top-level orchestration of all components:
//! - Collection registry scoped by (tenant, database), persisted as `catalog.json`
//! - A shared concurrency limiter every call passes through
//! - Shutdown flushing and persisting every collection

use crate::collection::config::carry_settings;
use crate::collection::{collection_dir, Collection, CollectionConfig, CollectionInfo};
use crate::config::{Config, EngineConfig};
use crate::defaults::{DEFAULT_DATABASE, DEFAULT_TENANT};
use crate::error::{QuiverError, Result};
use crate::storage::{self, BlockStorage};
use crate::types::{EmbeddingFunction, Metadata};
use crate::validation;
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{Mutex, Semaphore, SemaphorePermit};
use uuid::Uuid;

const CATALOG_PATH: &str = "catalog.json";

/// Tenant and database a collection lives in
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub tenant: String,
    pub database: String,
}

impl Default for Scope {
    fn default() -> Self {
        Self::new(DEFAULT_TENANT, DEFAULT_DATABASE)
    }
}

impl Scope {
    pub fn new(tenant: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            database: database.into(),
        }
    }
}

#[derive(Default, Serialize, Deserialize)]
struct Catalog {
    collections: Vec<CollectionInfo>,
}

/// Embedding collection engine
pub struct Engine {
    config: EngineConfig,
    storage: Arc<dyn BlockStorage>,
    limiter: Arc<Semaphore>,
    collections: DashMap<Uuid, Arc<Collection>>,
    /// (scope, name) -> id
    names: DashMap<(Scope, String), Uuid>,
    /// Serializes catalog changes and `catalog.json` writes
    catalog_lock: Mutex<()>,
}

impl Engine {
    /// Open an engine over `storage`, reopening every cataloged collection
    pub async fn open(config: EngineConfig, storage: Arc<dyn BlockStorage>) -> Result<Arc<Self>> {
        config
            .validate()
            .map_err(|e| QuiverError::config(e.to_string()))?;

        let engine = Arc::new(Self {
            limiter: Arc::new(Semaphore::new(config.max_concurrency)),
            config,
            storage,
            collections: DashMap::new(),
            names: DashMap::new(),
            catalog_lock: Mutex::new(()),
        });

        let catalog: Catalog = if engine.storage.exists(CATALOG_PATH).await? {
            serde_json::from_slice(&engine.storage.read(CATALOG_PATH).await?)?
        } else {
            Catalog::default()
        };

        for info in catalog.collections {
            let scope = Scope::new(info.tenant.clone(), info.database.clone());
            let name = info.name.clone();
            let collection = Collection::open(
                info,
                engine.storage.clone(),
                &engine.config,
                engine.limiter.clone(),
                None,
            )
            .await?;
            engine.names.insert((scope, name), collection.id());
            engine.collections.insert(collection.id(), collection);
        }

        tracing::info!(
            root = %engine.storage.root_path().display(),
            collections = engine.collections.len(),
            "Engine started"
        );
        Ok(engine)
    }

    /// Open an engine from environment-derived configuration
    pub async fn from_config(config: &Config) -> anyhow::Result<Arc<Self>> {
        let storage = config.storage.create_backend()?;
        Ok(Self::open(config.engine.clone(), storage).await?)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    async fn acquire(&self) -> Result<SemaphorePermit<'_>> {
        self.limiter
            .acquire()
            .await
            .map_err(|_| QuiverError::Cancelled("engine is shut down".to_string()))
    }

    // ========================================================================
    // Collections
    // ========================================================================

    /// Create a collection; with `get_or_create` an existing one is returned instead
    pub async fn create_collection(
        &self,
        scope: &Scope,
        name: &str,
        metadata: Option<Metadata>,
        embedding_function: Option<Arc<dyn EmbeddingFunction>>,
        get_or_create: bool,
    ) -> Result<Arc<Collection>> {
        validation::validate_collection_name(name)?;
        if let Some(metadata) = &metadata {
            validation::validate_metadata(metadata)?;
        }
        CollectionConfig::from_metadata(metadata.as_ref(), &self.config)?;

        let _permit = self.acquire().await?;
        let _catalog = self.catalog_lock.lock().await;

        if let Some(existing) = self.lookup(scope, name) {
            if !get_or_create {
                return Err(QuiverError::AlreadyExists(format!("Collection {}", name)));
            }
            if let Some(function) = embedding_function {
                existing.bind_embedding_function(function);
            }
            return Ok(existing);
        }

        let info = CollectionInfo {
            id: Uuid::new_v4(),
            name: name.to_string(),
            tenant: scope.tenant.clone(),
            database: scope.database.clone(),
            metadata,
            created_at: Utc::now(),
        };
        let collection = Collection::open(
            info,
            self.storage.clone(),
            &self.config,
            self.limiter.clone(),
            embedding_function,
        )
        .await?;

        self.names
            .insert((scope.clone(), name.to_string()), collection.id());
        self.collections.insert(collection.id(), collection.clone());
        if let Err(e) = self.save_catalog().await {
            self.names.remove(&(scope.clone(), name.to_string()));
            self.collections.remove(&collection.id());
            return Err(e);
        }

        tracing::info!(collection = %name, id = %collection.id(), "Created collection");
        Ok(collection)
    }

    pub async fn get_or_create_collection(
        &self,
        scope: &Scope,
        name: &str,
        metadata: Option<Metadata>,
        embedding_function: Option<Arc<dyn EmbeddingFunction>>,
    ) -> Result<Arc<Collection>> {
        self.create_collection(scope, name, metadata, embedding_function, true)
            .await
    }

    pub async fn get_collection(&self, scope: &Scope, name: &str) -> Result<Arc<Collection>> {
        let _permit = self.acquire().await?;
        self.lookup(scope, name)
            .ok_or_else(|| QuiverError::not_found(format!("Collection {}", name)))
    }

    pub fn get_collection_by_id(&self, id: &Uuid) -> Option<Arc<Collection>> {
        self.collections.get(id).map(|c| c.value().clone())
    }

    fn lookup(&self, scope: &Scope, name: &str) -> Option<Arc<Collection>> {
        let id = *self.names.get(&(scope.clone(), name.to_string()))?;
        self.get_collection_by_id(&id)
    }

    /// Collections in a scope, oldest first
    pub async fn list_collections(
        &self,
        scope: &Scope,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Result<Vec<CollectionInfo>> {
        let _permit = self.acquire().await?;
        let mut infos: Vec<CollectionInfo> = self
            .collections
            .iter()
            .map(|c| c.value().info())
            .filter(|info| info.tenant == scope.tenant && info.database == scope.database)
            .collect();
        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.name.cmp(&b.name)));
        Ok(infos
            .into_iter()
            .skip(offset.unwrap_or(0))
            .take(limit.unwrap_or(usize::MAX))
            .collect())
    }

    pub async fn count_collections(&self, scope: &Scope) -> Result<usize> {
        let _permit = self.acquire().await?;
        Ok(self
            .names
            .iter()
            .filter(|entry| &entry.key().0 == scope)
            .count())
    }

    /// Rename and/or replace the metadata of a collection
    ///
    /// `hnsw:` settings cannot change; omitted ones are kept.
    pub async fn modify_collection(
        &self,
        id: &Uuid,
        new_name: Option<&str>,
        new_metadata: Option<Metadata>,
    ) -> Result<()> {
        if let Some(name) = new_name {
            validation::validate_collection_name(name)?;
        }
        if let Some(metadata) = &new_metadata {
            validation::validate_metadata(metadata)?;
        }

        let _permit = self.acquire().await?;
        let _catalog = self.catalog_lock.lock().await;

        let collection = self
            .get_collection_by_id(id)
            .ok_or_else(|| QuiverError::not_found(format!("Collection {}", id)))?;
        let info = collection.info();
        let scope = Scope::new(info.tenant.clone(), info.database.clone());

        let metadata = match new_metadata {
            Some(metadata) => Some(carry_settings(info.metadata.as_ref(), metadata)?),
            None => None,
        };
        if let Some(name) = new_name {
            if name != info.name && self.names.contains_key(&(scope.clone(), name.to_string())) {
                return Err(QuiverError::AlreadyExists(format!("Collection {}", name)));
            }
        }

        // Exclusive access: no mutation runs while the catalog entry changes
        let _writer = collection.lock_writer().await;
        if let Some(name) = new_name {
            self.names.remove(&(scope.clone(), info.name.clone()));
            self.names.insert((scope.clone(), name.to_string()), *id);
            collection.rename(name.to_string());
        }
        if let Some(metadata) = metadata {
            collection.replace_metadata(Some(metadata));
        }
        self.save_catalog().await?;

        tracing::info!(collection = %collection.name(), id = %id, "Modified collection");
        Ok(())
    }

    /// Unregister a collection, then remove its files
    pub async fn delete_collection(&self, scope: &Scope, name: &str) -> Result<()> {
        let _permit = self.acquire().await?;
        let _catalog = self.catalog_lock.lock().await;

        let collection = self
            .lookup(scope, name)
            .ok_or_else(|| QuiverError::not_found(format!("Collection {}", name)))?;
        let id = collection.id();

        let _writer = collection.lock_writer().await;
        collection.mark_dropped();
        self.names.remove(&(scope.clone(), name.to_string()));
        self.collections.remove(&id);
        self.save_catalog().await?;
        self.storage.delete_dir(&collection_dir(&id)).await?;

        tracing::info!(collection = %name, id = %id, "Deleted collection");
        Ok(())
    }

    /// Drop every collection; refused unless `allow_reset` is set
    pub async fn reset(&self) -> Result<()> {
        if !self.config.allow_reset {
            return Err(QuiverError::invalid_argument(
                "Resetting is not allowed by this configuration (set ALLOW_RESET=true to enable it)",
            ));
        }
        let _permit = self.acquire().await?;
        let _catalog = self.catalog_lock.lock().await;

        let collections: Vec<Arc<Collection>> =
            self.collections.iter().map(|c| c.value().clone()).collect();
        for collection in &collections {
            let _writer = collection.lock_writer().await;
            collection.mark_dropped();
            self.storage.delete_dir(&collection_dir(&collection.id())).await?;
        }
        self.collections.clear();
        self.names.clear();
        self.save_catalog().await?;

        tracing::info!(count = collections.len(), "Reset engine");
        Ok(())
    }

    async fn save_catalog(&self) -> Result<()> {
        let mut collections: Vec<CollectionInfo> =
            self.collections.iter().map(|c| c.value().info()).collect();
        collections.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        let data = serde_json::to_vec_pretty(&Catalog { collections })?;
        storage::write_atomic(&*self.storage, CATALOG_PATH, &data).await?;
        Ok(())
    }

    // ========================================================================
    // Server-level
    // ========================================================================

    /// Nanoseconds since the Unix epoch
    pub fn heartbeat(&self) -> u128 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0)
    }

    pub fn version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    /// Largest batch a single add/update/upsert may carry
    pub fn max_batch_size(&self) -> usize {
        self.config.max_batch_size
    }

    /// Flush and persist every collection, then refuse new calls
    pub async fn shutdown(&self) -> Result<()> {
        let collections: Vec<Arc<Collection>> =
            self.collections.iter().map(|c| c.value().clone()).collect();

        let mut first_error = None;
        for collection in collections {
            match collection.persist().await {
                Ok(()) => {}
                // Deleted concurrently; nothing left to persist
                Err(QuiverError::NotFound(_)) => {}
                Err(e) => {
                    tracing::error!(
                        collection = %collection.name(),
                        error = %e,
                        "Failed to persist collection during shutdown"
                    );
                    first_error.get_or_insert(e);
                }
            }
        }
        self.limiter.close();

        tracing::info!("Engine shut down");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
