//! Snapshot command implementation.

use crate::Context;
use mirrordb_core::Locator;
use mirrordb_repl::ExchangeEngine;

/// Replaces the local `table` with the peer's rows.
pub fn run(
    ctx: &Context,
    locator: &Locator,
    peer: &str,
    table: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let engine = ExchangeEngine::with_environment(&ctx.env, ctx.open(locator)?);
    let rows = engine.snapshot_in(peer, table)?;
    println!("✓ Snapshot of {table} from {peer}: {rows} rows");
    Ok(())
}
