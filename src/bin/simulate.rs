//! Quiver Simulation CLI
//!
//! Adds random vectors to a collection, runs queries, and reports latency
//! percentiles and recall@k.
//!
//! Usage:
//!   cargo run --release --bin simulate -- --vectors 100000 --dimensions 128
//!   RUST_LOG=quiver=debug cargo run --bin simulate -- --storage memory

use clap::Parser;
use quiver::simulation::{SimulationConfig, SimulationRunner, StorageType};
use quiver::Space;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "quiver-simulate")]
#[command(about = "Benchmark a Quiver collection: add latency, query latency and recall")]
#[command(version)]
struct Args {
    /// Number of vectors to insert
    #[arg(long, default_value = "10000")]
    vectors: usize,

    /// Vector dimensions
    #[arg(long, default_value = "128")]
    dimensions: usize,

    /// Records per add call
    #[arg(long, default_value = "500")]
    batch_size: usize,

    /// Number of queries to run
    #[arg(long, default_value = "200")]
    search_queries: usize,

    /// Top-k results to retrieve
    #[arg(long, default_value = "10")]
    k: usize,

    /// Search ef parameter (higher = more accurate, slower)
    #[arg(long, default_value = "100")]
    ef: usize,

    /// Distance space: l2, ip, cosine
    #[arg(long, default_value = "l2")]
    space: String,

    /// Collection hnsw:batch_size
    #[arg(long, default_value = "100")]
    sync_batch_size: usize,

    /// Collection hnsw:sync_threshold
    #[arg(long, default_value = "1000")]
    sync_threshold: usize,

    /// Storage backend: fs, memory
    #[arg(long, default_value = "fs")]
    storage: String,

    /// Simulate block-device fsync/read latency (fs storage only)
    #[arg(long)]
    simulate_latency: bool,

    /// RNG seed for vectors and queries
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Enable verbose logging
    #[arg(long, short)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Setup logging
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| format!("quiver={},simulate={}", log_level, log_level)),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let storage_type: StorageType = args.storage.parse().map_err(anyhow::Error::msg)?;
    let space = Space::parse(&args.space)?;

    let config = SimulationConfig {
        vector_count: args.vectors,
        dimensions: args.dimensions,
        batch_size: args.batch_size,
        search_queries: args.search_queries,
        k: args.k,
        ef_search: args.ef,
        space,
        sync_batch_size: args.sync_batch_size,
        sync_threshold: args.sync_threshold,
        storage_type,
        simulate_latency: args.simulate_latency,
        seed: args.seed,
    };

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                  QUIVER COLLECTION SIMULATION                 ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║ Vectors:              {:>10}                             ║", config.vector_count);
    println!("║ Dimensions:           {:>10}                             ║", config.dimensions);
    println!("║ Add Batch Size:       {:>10}                             ║", config.batch_size);
    println!("║ Queries:              {:>10}                             ║", config.search_queries);
    println!("║ Top-K:                {:>10}                             ║", config.k);
    println!("║ EF Search:            {:>10}                             ║", config.ef_search);
    println!("║ Space:                {:>10}                             ║", config.space.name());
    println!("║ Storage:              {:>10?}                            ║", config.storage_type);
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    let mut runner = SimulationRunner::new(config);
    let results = runner.run().await?;

    results.print_summary();

    Ok(())
}
