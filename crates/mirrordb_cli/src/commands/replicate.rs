//! Replicate command implementation.

use crate::Context;
use mirrordb_core::Locator;
use mirrordb_repl::{
    run_replication_loop, spawn_replication_loop, stop_channel, ExchangeEngine, LoopConfig,
    LoopSummary,
};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::info;

/// Runs the replication loop with `peer`, for `duration_ms` if given.
pub fn run(
    ctx: &Context,
    locator: &Locator,
    peer: &str,
    interval_ms: u64,
    duration_ms: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let engine = Arc::new(ExchangeEngine::with_environment(&ctx.env, ctx.open(locator)?));
    let config = LoopConfig::new(Duration::from_millis(interval_ms));

    let summary = match duration_ms {
        Some(ms) => {
            let handle = spawn_replication_loop(engine, peer, config)?;
            thread::sleep(Duration::from_millis(ms));
            info!(peer, "duration elapsed, stopping");
            handle.shutdown()?
        }
        None => {
            // nothing ever stops this loop; it ends with the process or a fatal error
            let (_stop, signal) = stop_channel();
            run_replication_loop(&engine, peer, &config, &signal)?
        }
    };
    print_summary(peer, &summary);
    Ok(())
}

fn print_summary(peer: &str, summary: &LoopSummary) {
    println!("✓ Replication with {peer} stopped");
    println!("  Rounds: {} ({} failed)", summary.rounds, summary.failed_rounds);
    println!("  Pushed: {}", summary.pushed);
    println!("  Pulled: {}", summary.pulled);
    println!("  Conflicts: {}", summary.conflicts);
}
