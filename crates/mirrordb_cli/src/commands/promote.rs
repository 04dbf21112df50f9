//! Promote command implementation.

use crate::Context;
use mirrordb_core::Locator;
use mirrordb_repl::{FailoverOrchestrator, OrchestratorConfig};

/// Materializes `new_primary` from `secondary` and makes the secondary
/// follow it.
pub fn run(
    ctx: &Context,
    secondary: &Locator,
    new_primary: &Locator,
    peer: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = OrchestratorConfig::new()
        .with_peer_name(peer)
        .with_keys(ctx.key.clone(), ctx.key.clone());
    let mut orchestrator =
        FailoverOrchestrator::after_primary_loss(ctx.env.clone(), config, secondary.clone());
    let report = orchestrator.promote_secondary(secondary, new_primary)?;

    println!("✓ Secondary promoted");
    println!("  New primary: {new_primary} (@{})", report.address);
    if let Some(lost) = &report.dropped_peer {
        println!("  Dropped peer: {peer} -> {}", lost.remote_locator);
    }
    println!("  Rows copied: {}", report.backup.rows);
    println!("  Sequence resumes after: {}", report.resumed_after);
    println!("  {secondary} now follows {new_primary} as {peer}");
    Ok(())
}
