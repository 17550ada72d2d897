use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use clap::Parser;
use dispatch_core::MatchingEngine;
use dispatch_replay::{load_config, load_fleet, load_requests, replay};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Replay a fleet feed and a batch of trip requests through the matching engine.
///
/// Results are written to stdout as one JSON object per line, in request order.
/// Logs go to stderr; set `RUST_LOG` to change the level.
#[derive(Parser, Debug)]
#[command(name = "dispatch_replay", version)]
struct Args {
    /// JSON-lines fleet feed (upsert / remove / availability ops)
    #[arg(long)]
    fleet: PathBuf,
    /// JSON array of trip requests
    #[arg(long)]
    requests: PathBuf,
    /// Matching config as JSON; defaults apply when omitted
    #[arg(long)]
    config: Option<PathBuf>,
    /// Worker threads (default: one per core)
    #[arg(long)]
    threads: Option<usize>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .with_target(false)
        .init();

    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;
    let (store, report) = load_fleet(&args.fleet, &config)?;
    info!(
        drivers = store.len(),
        applied = report.applied,
        stale = report.stale,
        rejected = report.rejected,
        "fleet loaded"
    );

    let requests = load_requests(&args.requests)?;
    let engine = MatchingEngine::new(config, store)?;
    let results = replay(&engine, &requests, args.threads)?;

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    for result in &results {
        serde_json::to_writer(&mut out, result)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;

    let stats = engine.stats();
    info!(
        requests = stats.requests,
        computed = stats.computations,
        no_drivers = stats.no_drivers,
        invalid = stats.invalid,
        cache_hit_rate = stats.cache_hit_rate(),
        "replay finished"
    );
    Ok(())
}
