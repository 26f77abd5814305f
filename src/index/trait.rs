//! ANN Index trait abstraction
//!
//! Provides a common interface for the ANN (Approximate Nearest Neighbor) index
//! implementations, allowing a collection to switch between HNSW and exact scan.

use std::collections::HashSet;
use std::fmt::Debug;

use crate::error::Result;

/// Eligible ids for a filtered search
pub type CandidateSet = HashSet<String>;

/// One search hit
#[derive(Clone, Debug, PartialEq)]
pub struct Neighbor {
    pub id: String,
    pub distance: f32,
}

/// Common interface for all ANN index implementations
///
/// Indexes are keyed by record id and are a rebuildable projection of the
/// record store. Writers hold `&mut self`; the owner supplies the locking.
pub trait AnnIndex: Send + Sync + Debug + 'static {
    /// Insert a vector, replacing any previous vector under the same id
    fn insert_or_replace(&mut self, id: &str, embedding: &[f32]) -> Result<()>;

    /// Remove an id; returns whether it was present
    fn remove(&mut self, id: &str) -> bool;

    /// Search for k nearest neighbors
    ///
    /// # Arguments
    /// * `query` - The query vector
    /// * `k` - Number of nearest neighbors to return
    /// * `candidates` - When set, only these ids may be returned
    ///
    /// # Returns
    /// Neighbors sorted by distance ascending
    fn search(&self, query: &[f32], k: usize, candidates: Option<&CandidateSet>) -> Vec<Neighbor>;

    fn contains(&self, id: &str) -> bool;

    /// Live vectors in the index
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dimensionality of the stored vectors, once known
    fn dimensions(&self) -> Option<usize>;

    /// Highest store sequence whose deltas have been applied
    fn version(&self) -> u64;

    fn set_version(&mut self, version: u64);

    /// Serialize for persistence
    fn to_bytes(&self) -> Result<Vec<u8>>;

    /// Get the name of this index type (for logging/debugging)
    fn index_type_name(&self) -> &'static str;
}
