//! Exchange command implementation.

use crate::Context;
use mirrordb_core::Locator;
use mirrordb_repl::{ConflictOutcome, ExchangeEngine};

/// Runs one exchange round between `locator` and `peer`.
pub fn run(ctx: &Context, locator: &Locator, peer: &str) -> Result<(), Box<dyn std::error::Error>> {
    let engine = ExchangeEngine::with_environment(&ctx.env, ctx.open(locator)?);
    let result = engine.exchange(peer)?;

    println!("✓ Exchange with {peer} complete");
    println!("  Pushed: {}", result.pushed);
    println!("  Pulled: {}", result.pulled);
    println!("  Conflicts: {} ({} rejected)", result.conflicts.len(), result.rejected());
    for conflict in &result.conflicts {
        let outcome = match conflict.outcome {
            ConflictOutcome::KeptLocal => "kept local",
            ConflictOutcome::AcceptedIncoming => "accepted incoming",
        };
        println!(
            "    {}[{}] from {}: {outcome}",
            conflict.table, conflict.key, conflict.origin
        );
    }
    Ok(())
}
