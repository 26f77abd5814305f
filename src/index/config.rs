//! Index configuration types
//!
//! Provides the distance space, HNSW parameters and backend selection.

use crate::defaults::{
    DEFAULT_BRUTE_FORCE_THRESHOLD, DEFAULT_HNSW_EF_CONSTRUCTION, DEFAULT_HNSW_EF_SEARCH,
    DEFAULT_HNSW_M,
};
use crate::error::{QuiverError, Result};
use serde::{Deserialize, Serialize};

/// Distance space; smaller is closer in every space
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Space {
    /// Squared euclidean distance
    #[default]
    L2,
    /// 1 - dot product
    Ip,
    /// 1 - cosine similarity
    Cosine,
}

impl Space {
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "l2" => Ok(Space::L2),
            "ip" => Ok(Space::Ip),
            "cosine" => Ok(Space::Cosine),
            other => Err(QuiverError::invalid_argument(format!(
                "Expected hnsw:space to be one of l2, ip, cosine, got {}",
                other
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Space::L2 => "l2",
            Space::Ip => "ip",
            Space::Cosine => "cosine",
        }
    }

    #[inline]
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Space::L2 => a
                .iter()
                .zip(b.iter())
                .map(|(x, y)| {
                    let d = x - y;
                    d * d
                })
                .sum(),
            Space::Ip => 1.0 - dot(a, b),
            Space::Cosine => {
                let norms = dot(a, a).sqrt() * dot(b, b).sqrt();
                if norms == 0.0 {
                    1.0
                } else {
                    1.0 - dot(a, b) / norms
                }
            }
        }
    }
}

#[inline]
fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Which [`AnnIndex`](super::AnnIndex) implementation backs a collection
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexType {
    /// Hierarchical navigable small world graph
    #[default]
    Hnsw,
    /// Exact scan
    Flat,
}

impl IndexType {
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "hnsw" => Ok(IndexType::Hnsw),
            "flat" => Ok(IndexType::Flat),
            other => Err(QuiverError::config(format!(
                "Unknown index type {}, expected hnsw or flat",
                other
            ))),
        }
    }

    pub fn index_type_name(&self) -> &'static str {
        match self {
            IndexType::Hnsw => "HNSW",
            IndexType::Flat => "Flat",
        }
    }
}

/// Configuration for ANN index backends
#[derive(Clone, Debug, PartialEq)]
pub struct AnnIndexConfig {
    pub index_type: IndexType,
    pub space: Space,
    pub hnsw: HnswParams,
    /// Candidate sets at or below this size are scanned exactly
    pub brute_force_threshold: usize,
}

impl Default for AnnIndexConfig {
    fn default() -> Self {
        Self {
            index_type: IndexType::Hnsw,
            space: Space::L2,
            hnsw: HnswParams::default(),
            brute_force_threshold: DEFAULT_BRUTE_FORCE_THRESHOLD,
        }
    }
}

impl AnnIndexConfig {
    /// HNSW config with default parameters
    pub fn hnsw() -> Self {
        Self::default()
    }

    /// Exact scan config
    pub fn flat() -> Self {
        Self {
            index_type: IndexType::Flat,
            ..Self::default()
        }
    }

    pub fn with_space(mut self, space: Space) -> Self {
        self.space = space;
        self
    }

    pub fn with_hnsw(mut self, params: HnswParams) -> Self {
        self.hnsw = params;
        self
    }

    /// Get the index type name
    pub fn index_type_name(&self) -> &'static str {
        self.index_type.index_type_name()
    }
}

/// HNSW index parameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HnswParams {
    /// Max connections per node (M parameter)
    pub m: usize,
    /// Max connections at layer 0 (usually 2*M)
    pub m_max0: usize,
    /// Search width during construction
    pub ef_construction: usize,
    /// Level multiplier (1/ln(M))
    pub ml: f64,
    /// Search width during queries
    pub ef_search: usize,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self::new(DEFAULT_HNSW_M, DEFAULT_HNSW_EF_CONSTRUCTION, DEFAULT_HNSW_EF_SEARCH)
    }
}

impl HnswParams {
    pub fn new(m: usize, ef_construction: usize, ef_search: usize) -> Self {
        let m = m.max(2);
        Self {
            m,
            m_max0: m * 2,
            ef_construction,
            ml: 1.0 / (m as f64).ln(),
            ef_search,
        }
    }

    /// Create with custom M parameter
    pub fn with_m(m: usize) -> Self {
        Self::new(m, DEFAULT_HNSW_EF_CONSTRUCTION, DEFAULT_HNSW_EF_SEARCH)
    }
}
