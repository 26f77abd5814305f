//! Simulation Framework for Quiver Benchmarks
//!
//! Creates one collection, adds random vectors in batches, runs random queries
//! and reports:
//! - Add and query latency percentiles
//! - Measured recall@k against an exact scan of the same vectors

use crate::collection::{QueryRequest, RecordBatch};
use crate::config::EngineConfig;
use crate::engine::{Engine, Scope};
use crate::index::Space;
use crate::storage::{BlockStorage, FsBlockStorage, FsStorageConfig, MemoryBlockStorage};
use crate::types::{metadata_from_json, Include};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

/// Storage type for simulation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    /// Local temp directory
    Fs,
    /// Nothing touches disk
    Memory,
}

impl std::str::FromStr for StorageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fs" | "file" => Ok(StorageType::Fs),
            "memory" | "mem" => Ok(StorageType::Memory),
            _ => Err(format!("Unknown storage type: {}", s)),
        }
    }
}

/// Configuration for simulation
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Number of vectors to insert
    pub vector_count: usize,
    /// Vector dimensions
    pub dimensions: usize,
    /// Records per add call
    pub batch_size: usize,
    /// Number of queries to run
    pub search_queries: usize,
    /// Top-k results to retrieve
    pub k: usize,
    /// Search ef parameter
    pub ef_search: usize,
    pub space: Space,
    /// Collection `hnsw:batch_size`
    pub sync_batch_size: usize,
    /// Collection `hnsw:sync_threshold`
    pub sync_threshold: usize,
    /// Storage backend type
    pub storage_type: StorageType,
    /// Add simulated fsync/read latency to file storage
    pub simulate_latency: bool,
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            vector_count: 10_000,
            dimensions: 128,
            batch_size: 500,
            search_queries: 200,
            k: 10,
            ef_search: 100,
            space: Space::L2,
            sync_batch_size: 100,
            sync_threshold: 1000,
            storage_type: StorageType::Fs,
            simulate_latency: false,
            seed: 42,
        }
    }
}

/// Results from a simulation run
#[derive(Debug, Clone)]
pub struct SimulationResults {
    /// Total vectors inserted
    pub vectors_inserted: usize,
    /// Add throughput (vectors/sec)
    pub add_throughput: f64,
    pub add_latency: LatencySummary,
    /// Total queries executed
    pub search_queries: usize,
    /// Query throughput (queries/sec)
    pub search_throughput: f64,
    pub search_latency: LatencySummary,
    /// Mean fraction of the exact top-k returned
    pub recall_at_k: f64,
    /// Total simulation duration
    pub total_duration: Duration,
}

/// Percentiles of a latency sample
#[derive(Debug, Clone, Copy, Default)]
pub struct LatencySummary {
    pub avg: Duration,
    pub p50: Duration,
    pub p95: Duration,
    pub p99: Duration,
}

impl LatencySummary {
    pub fn from_samples(samples: &[Duration]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let mut sorted = samples.to_vec();
        sorted.sort();
        let at = |q: f64| sorted[((sorted.len() as f64 * q) as usize).min(sorted.len() - 1)];
        Self {
            avg: sorted.iter().sum::<Duration>() / sorted.len() as u32,
            p50: at(0.50),
            p95: at(0.95),
            p99: at(0.99),
        }
    }
}

impl SimulationResults {
    /// Print results in a formatted way
    pub fn print_summary(&self) {
        println!("\n╔══════════════════════════════════════════════════════════════╗");
        println!("║                    SIMULATION RESULTS                         ║");
        println!("╠══════════════════════════════════════════════════════════════╣");
        println!("║ Vectors Inserted:     {:>10}                             ║", self.vectors_inserted);
        println!("║ Queries:              {:>10}                             ║", self.search_queries);
        println!("║ Total Duration:       {:>10.2?}                         ║", self.total_duration);
        println!("╠══════════════════════════════════════════════════════════════╣");
        println!("║                        ADD METRICS                            ║");
        println!("╠══════════════════════════════════════════════════════════════╣");
        println!("║ Throughput:           {:>10.2} vectors/sec                 ║", self.add_throughput);
        println!("║ Avg Latency:          {:>10.2?}                         ║", self.add_latency.avg);
        println!("║ P50 Latency:          {:>10.2?}                         ║", self.add_latency.p50);
        println!("║ P99 Latency:          {:>10.2?}                         ║", self.add_latency.p99);
        println!("╠══════════════════════════════════════════════════════════════╣");
        println!("║                       QUERY METRICS                           ║");
        println!("╠══════════════════════════════════════════════════════════════╣");
        println!("║ Throughput:           {:>10.2} queries/sec                 ║", self.search_throughput);
        println!("║ Avg Latency:          {:>10.2?}                         ║", self.search_latency.avg);
        println!("║ P50 Latency:          {:>10.2?}                         ║", self.search_latency.p50);
        println!("║ P95 Latency:          {:>10.2?}                         ║", self.search_latency.p95);
        println!("║ P99 Latency:          {:>10.2?}                         ║", self.search_latency.p99);
        println!("║ Recall@k:             {:>10.4}                             ║", self.recall_at_k);
        println!("╚══════════════════════════════════════════════════════════════╝");
    }
}

/// Simulation runner
pub struct SimulationRunner {
    config: SimulationConfig,
    rng: StdRng,
}

impl SimulationRunner {
    /// Create a new simulation runner
    pub fn new(config: SimulationConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self { config, rng }
    }

    /// Run the simulation
    pub async fn run(&mut self) -> anyhow::Result<SimulationResults> {
        let start_time = Instant::now();
        info!(config = ?self.config, "Starting simulation");
        anyhow::ensure!(self.config.batch_size > 0, "batch size must be positive");
        anyhow::ensure!(self.config.k > 0, "k must be positive");

        let storage = self.create_storage()?;
        let engine_config = EngineConfig {
            hnsw_ef_search: self.config.ef_search,
            ..EngineConfig::default()
        };
        let engine = Engine::open(engine_config, storage).await?;

        let metadata = metadata_from_json(&serde_json::json!({
            "hnsw:space": self.config.space.name(),
            "hnsw:batch_size": self.config.sync_batch_size,
            "hnsw:sync_threshold": self.config.sync_threshold,
        }))?;
        let collection = engine
            .create_collection(&Scope::default(), "simulation", Some(metadata), None, false)
            .await?;

        // Add benchmark
        let vectors: Vec<Vec<f32>> = (0..self.config.vector_count)
            .map(|_| random_vector(&mut self.rng, self.config.dimensions))
            .collect();
        let mut add_latencies = Vec::new();
        let num_batches = vectors.len().div_ceil(self.config.batch_size);
        for (batch_idx, chunk) in vectors.chunks(self.config.batch_size).enumerate() {
            let offset = batch_idx * self.config.batch_size;
            let batch = RecordBatch::new((offset..offset + chunk.len()).map(|i| format!("v{}", i)))
                .embeddings(chunk.to_vec());

            let start = Instant::now();
            collection.add(batch).await?;
            add_latencies.push(start.elapsed());

            if (batch_idx + 1) % 10 == 0 {
                info!(
                    progress = format!("{}/{}", batch_idx + 1, num_batches),
                    vectors = offset + chunk.len(),
                    "Add progress"
                );
            }
        }

        // Query benchmark
        let mut search_latencies = Vec::new();
        let mut recall_sum = 0.0;
        for i in 0..self.config.search_queries {
            let query = random_vector(&mut self.rng, self.config.dimensions);
            let request = QueryRequest::embeddings(vec![query.clone()], self.config.k)
                .include(vec![Include::Distances]);

            let start = Instant::now();
            let result = collection.query(request).await?;
            search_latencies.push(start.elapsed());

            let truth = exact_top_k(self.config.space, &vectors, &query, self.config.k);
            let found: HashSet<&str> = result.ids[0].iter().map(String::as_str).collect();
            let hits = truth.iter().filter(|id| found.contains(id.as_str())).count();
            recall_sum += hits as f64 / truth.len().max(1) as f64;

            if (i + 1) % 100 == 0 {
                info!(
                    progress = format!("{}/{}", i + 1, self.config.search_queries),
                    "Query progress"
                );
            }
        }

        engine.shutdown().await?;

        let add_total: Duration = add_latencies.iter().sum();
        let search_total: Duration = search_latencies.iter().sum();
        Ok(SimulationResults {
            vectors_inserted: vectors.len(),
            add_throughput: vectors.len() as f64 / add_total.as_secs_f64().max(f64::EPSILON),
            add_latency: LatencySummary::from_samples(&add_latencies),
            search_queries: self.config.search_queries,
            search_throughput: self.config.search_queries as f64
                / search_total.as_secs_f64().max(f64::EPSILON),
            search_latency: LatencySummary::from_samples(&search_latencies),
            recall_at_k: if self.config.search_queries == 0 {
                1.0
            } else {
                recall_sum / self.config.search_queries as f64
            },
            total_duration: start_time.elapsed(),
        })
    }

    fn create_storage(&self) -> anyhow::Result<Arc<dyn BlockStorage>> {
        Ok(match self.config.storage_type {
            StorageType::Fs => {
                let config = if self.config.simulate_latency {
                    FsStorageConfig::realistic()
                } else {
                    FsStorageConfig::fast()
                };
                let storage = FsBlockStorage::temp(config)?;
                info!(root = %storage.root_path().display(), "Using file storage");
                Arc::new(storage)
            }
            StorageType::Memory => {
                info!("Using in-memory storage");
                Arc::new(MemoryBlockStorage::new())
            }
        })
    }
}

/// Ids (`v{index}`) of the exact k nearest vectors
fn exact_top_k(space: Space, vectors: &[Vec<f32>], query: &[f32], k: usize) -> Vec<String> {
    let mut scored: Vec<(f32, usize)> = vectors
        .iter()
        .enumerate()
        .map(|(i, v)| (space.distance(query, v), i))
        .collect();
    scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.into_iter().take(k).map(|(_, i)| format!("v{}", i)).collect()
}

/// Generate a random normalized vector
fn random_vector(rng: &mut StdRng, dims: usize) -> Vec<f32> {
    let v: Vec<f32> = (0..dims).map(|_| rng.gen::<f32>() * 2.0 - 1.0).collect();
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter().map(|x| x / norm).collect()
    } else {
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_summary() {
        let samples: Vec<Duration> = (1..=100).map(Duration::from_millis).collect();
        let summary = LatencySummary::from_samples(&samples);
        assert_eq!(summary.p50, Duration::from_millis(51));
        assert_eq!(summary.p99, Duration::from_millis(100));
        assert_eq!(LatencySummary::from_samples(&[]).p99, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_small_simulation_has_high_recall() {
        let mut runner = SimulationRunner::new(SimulationConfig {
            vector_count: 300,
            dimensions: 8,
            batch_size: 64,
            search_queries: 20,
            k: 5,
            storage_type: StorageType::Memory,
            sync_batch_size: 50,
            sync_threshold: 100,
            ..SimulationConfig::default()
        });
        let results = runner.run().await.unwrap();
        assert_eq!(results.vectors_inserted, 300);
        assert!(results.recall_at_k >= 0.95, "recall {}", results.recall_at_k);
    }
}
