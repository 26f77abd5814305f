//! Centralized default values and constants
//!
//! This module consolidates all magic numbers and default values used throughout
//! the codebase, making them easy to find, modify, and document.

// ============================================================================
// Scope
// ============================================================================

/// Tenant used when the caller does not name one
pub const DEFAULT_TENANT: &str = "default_tenant";

/// Database used when the caller does not name one
pub const DEFAULT_DATABASE: &str = "default_database";

// ============================================================================
// HNSW Index Parameters
// ============================================================================

/// Default number of bidirectional links per node (M parameter)
/// Higher values improve recall but increase memory and build time
pub const DEFAULT_HNSW_M: usize = 16;

/// Default ef value during construction
/// Higher values improve index quality but slow down builds
pub const DEFAULT_HNSW_EF_CONSTRUCTION: usize = 200;

/// Default ef value during search
/// Higher values improve recall but slow down queries
pub const DEFAULT_HNSW_EF_SEARCH: usize = 100;

/// Candidate sets at or below this size are answered by exact scan
pub const DEFAULT_BRUTE_FORCE_THRESHOLD: usize = 256;

/// Fraction of tombstoned graph nodes that triggers a compaction
pub const COMPACTION_TOMBSTONE_RATIO: f64 = 0.5;

// ============================================================================
// Batch Synchronizer
// ============================================================================

/// Pending mutations accumulated before they are applied to the index
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Applied mutations accumulated before the index is persisted
pub const DEFAULT_SYNC_THRESHOLD: usize = 1000;

// ============================================================================
// WAL (Write-Ahead Log) Constants
// ============================================================================

/// WAL entry magic number ("WAL2" in big-endian ASCII)
pub const WAL_MAGIC: u32 = 0x57414C32;

/// WAL entry header size in bytes (magic + crc + sequence + payload length)
pub const WAL_HEADER_SIZE: usize = 20;

/// WAL entries written before the record table is snapshotted and the log truncated
pub const DEFAULT_WAL_CHECKPOINT_ENTRIES: usize = 1000;

// ============================================================================
// Engine Configuration
// ============================================================================

/// Engine calls allowed to run at the same time; the rest queue on the limiter
pub const DEFAULT_MAX_CONCURRENCY: usize = 40;

/// Largest number of records accepted by a single add/update/upsert call
pub const DEFAULT_MAX_BATCH_SIZE: usize = 41_666;

/// Default storage root for file-backed mode
pub const DEFAULT_DATA_ROOT: &str = "/tmp/quiver";

// ============================================================================
// Search Parameters
// ============================================================================

/// Default number of results per query
pub const DEFAULT_N_RESULTS: usize = 10;

/// Default number of records returned by peek
pub const DEFAULT_PEEK_LIMIT: usize = 10;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants_are_valid() {
        assert!(DEFAULT_HNSW_M > 0);
        assert!(DEFAULT_HNSW_EF_CONSTRUCTION > DEFAULT_HNSW_M);
        assert!(DEFAULT_HNSW_EF_SEARCH > 0);

        // The synchronizer requires persistence to be no more frequent than flushing
        assert!(DEFAULT_SYNC_THRESHOLD >= DEFAULT_BATCH_SIZE);

        assert!(DEFAULT_MAX_CONCURRENCY > 0);
        assert!(DEFAULT_MAX_BATCH_SIZE >= DEFAULT_BATCH_SIZE);
        assert!(COMPACTION_TOMBSTONE_RATIO > 0.0 && COMPACTION_TOMBSTONE_RATIO < 1.0);
    }

    #[test]
    fn test_wal_magic_is_ascii() {
        assert_eq!(&WAL_MAGIC.to_be_bytes(), b"WAL2");
        assert_eq!(&WAL_MAGIC.to_le_bytes(), b"2LAW");
    }
}
