//! Backup command implementation.

use crate::Context;
use mirrordb_core::{BackupOptions, Locator};

/// Copies `source` to `destination`.
pub fn run(
    ctx: &Context,
    source: &Locator,
    destination: &Locator,
    reset: bool,
    overwrite: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let options = BackupOptions::new()
        .source_key(ctx.key.clone())
        .destination_key(ctx.key.clone())
        .reset_replication(reset)
        .overwrite(overwrite);
    let info = ctx.env.backup(source, destination, &options)?;

    println!("✓ Backup created successfully");
    println!("  Destination: {destination}");
    println!("  Size: {} bytes", info.bytes);
    println!("  Tables: {}", info.tables);
    println!("  Rows: {}", info.rows);
    println!("  Sequence: {}", info.sequence.as_u64());
    Ok(())
}
