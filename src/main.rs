//! Bucket bridge demo CLI.
//!
//! Drives the bridge against the in-process loopback engine: single meta
//! operations, random reads, and a concurrent soak of async futures.

use clap::{Parser, Subcommand};
use futures_util::future::join_all;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bucket_bridge::config::{load_config, BridgeConfig};
use bucket_bridge::engine::MemoryEngine;
use bucket_bridge::observability::{logging, metrics};
use bucket_bridge::{Bucket, Cas};

#[derive(Parser)]
#[command(name = "bucket-bridge")]
#[command(about = "Exercise the bucket bridge against a loopback engine", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Simulated engine latency in milliseconds.
    #[arg(long, default_value_t = 0)]
    latency_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a document with replication metadata
    UpsertMeta {
        key: String,
        value: String,
        #[arg(long, default_value_t = 0)]
        cas: u64,
        #[arg(long, default_value_t = 1)]
        rev_seqno: u64,
        #[arg(long, default_value_t = 0)]
        expiry: u32,
    },
    /// Store then remove a document with replication metadata
    RemoveMeta {
        key: String,
        #[arg(long, default_value_t = 1)]
        rev_seqno: u64,
    },
    /// Seed a few documents and read one at random
    GetRandom {
        #[arg(long, default_value_t = 5)]
        seed: usize,
    },
    /// Issue many async meta upserts and wait for all of them
    Soak {
        #[arg(long, default_value_t = 1000)]
        ops: usize,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => BridgeConfig::default(),
    };

    logging::init_logging(&config.observability.log_level);
    tracing::info!(
        bucket = %config.bucket.name,
        operation_timeout_ms = config.bucket.operation_timeout_ms,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let engine = Arc::new(MemoryEngine::new());
    engine.set_latency(Duration::from_millis(cli.latency_ms));
    let bucket = Bucket::from_config(&config, engine.clone());
    let internal = bucket.internal();

    match cli.command {
        Commands::UpsertMeta { key, value, cas, rev_seqno, expiry } => {
            let cas = internal.upsert_meta(&key, value.as_bytes(), &[], 0, expiry, Cas(cas), rev_seqno)?;
            println!("{key} stored, cas {cas}");
        }
        Commands::RemoveMeta { key, rev_seqno } => {
            let cas = internal.upsert_meta(&key, b"{}", &[], 0, 0, Cas::ZERO, rev_seqno)?;
            let removed = internal.remove_meta(&key, &[], 0, 0, cas, rev_seqno + 1)?;
            println!("{key} removed, cas {removed}");
        }
        Commands::GetRandom { seed } => {
            for i in 0..seed {
                bucket.upsert(&format!("doc::{i}"), &serde_json::json!({ "n": i }), 0, Cas::ZERO)?;
            }
            let mut value = serde_json::Value::Null;
            let (key, cas) = internal.get_random(&mut value)?;
            println!("{key} (cas {cas}): {value}");
        }
        Commands::Soak { ops } => {
            let runtime = tokio::runtime::Runtime::new()?;
            let started = Instant::now();
            let futures: Vec<_> = (0..ops)
                .map(|i| {
                    internal.async_upsert_meta(&format!("soak::{i}"), b"{}", &[], 0, 0, Cas::ZERO, 1)
                })
                .collect();

            let wait = bucket.wait_options();
            let results = runtime.block_on(join_all(futures.iter().map(|f| f.wait_async_with(wait))));
            let failed = results.iter().filter(|r| r.is_err()).count();
            println!(
                "{} ops in {:?}: {} ok, {} failed, {} documents",
                ops,
                started.elapsed(),
                ops - failed,
                failed,
                engine.len()
            );
        }
    }

    Ok(())
}
