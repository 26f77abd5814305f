//! # Quiver
//!
//! An embedding collection engine: durable records, an HNSW index kept in step
//! with them by a batch synchronizer, and filtered nearest-neighbor queries.
//!
//! ## Architecture
//!
//! ```text
//! Engine (collection registry, concurrency limiter, catalog.json)
//!     │
//!     ▼
//! Collection (writer mutex, query planner)
//!     ├── RecordStore (WAL + snapshot, authoritative)
//!     └── BatchSynchronizer
//!             ├── pending buffer (exact, coalesced by id)
//!             └── AnnIndex (HNSW or flat, persisted as index.bin)
//! ```
//!
//! ## Features
//!
//! - **Durable writes**: one CRC32-checked WAL entry per call, replayed on open
//! - **Merge semantics**: updates merge metadata instead of replacing it
//! - **Filtered search**: `where` / `where_document` predicates restrict ANN candidates
//! - **Crash recovery**: the index is a versioned projection, replayed or rebuilt from records
//! - **Pluggable storage**: local files or memory behind `BlockStorage`
//!
//! ## Quick Start
//!
//! ```ignore
//! use quiver::{Engine, EngineConfig, RecordBatch, QueryRequest, Scope};
//!
//! let engine = Engine::open(EngineConfig::default(), storage).await?;
//! let docs = engine.create_collection(&Scope::default(), "docs", None, None, false).await?;
//! docs.add(RecordBatch::new(["a"]).embeddings(vec![vec![0.1, 0.2]])).await?;
//! let hits = docs.query(QueryRequest::embeddings(vec![vec![0.1, 0.2]], 1)).await?;
//! ```

pub mod defaults;
pub mod error;
pub mod config;
pub mod storage;
pub mod wal;
pub mod types;
pub mod validation;
pub mod filter;
pub mod record;
pub mod hnsw;
pub mod index;
pub mod sync;
pub mod collection;
pub mod engine;
pub mod simulation;

pub use collection::{
    CancelToken, Collection, CollectionInfo, CollectionStats, DeleteRequest, GetRequest,
    QueryRequest, RecordBatch,
};
pub use config::{Config, EngineConfig, StorageConfig};
pub use engine::{Engine, Scope};
pub use error::{QuiverError, Result};
pub use filter::{Where, WhereDocument};
pub use index::{AnnIndex, AnnIndexConfig, IndexType, Space};
pub use sync::{SyncState, SyncStats};
pub use types::{
    EmbeddingFunction, GetResult, Include, Metadata, MetadataValue, QueryResult, Record, Sort,
    WriteOutcome,
};
