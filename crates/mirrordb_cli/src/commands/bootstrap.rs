//! Bootstrap command implementation.

use crate::Context;
use mirrordb_core::Locator;
use mirrordb_repl::{FailoverOrchestrator, OrchestratorConfig};

/// Creates `secondary` as a follower of `primary`.
pub fn run(
    ctx: &Context,
    primary: &Locator,
    secondary: &Locator,
    secondary_address: u32,
    peer: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let primary_address = ctx
        .open(primary)?
        .address()
        .map_or(1, |address| address.get());
    let config = OrchestratorConfig::new()
        .with_addresses(primary_address, secondary_address)
        .with_peer_name(peer)
        .with_keys(ctx.key.clone(), ctx.key.clone());

    let mut orchestrator = FailoverOrchestrator::new(ctx.env.clone(), config);
    let report = orchestrator.bootstrap_secondary(primary, secondary)?;

    println!("✓ Secondary created");
    println!("  Primary: {primary} (@{})", report.primary_address);
    println!("  Secondary: {secondary} (@{})", report.secondary_address);
    println!("  Tables: {}", report.tables.join(", "));
    println!("  Rows copied: {}", report.backup.rows);
    println!("  Copied through: {}", report.backup.sequence);
    Ok(())
}
