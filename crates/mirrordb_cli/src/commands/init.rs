//! Init command implementation.

use crate::Context;
use mirrordb_core::{ColumnType, Config, ConflictResolution, Locator, ReplicationMode, TableDef, TxnMode};
use mirrordb_repl::Identity;

/// Creates `tables` as `(id, data)` tables, assigns `address` and publishes
/// the tables. Existing tables are kept.
pub fn run(
    ctx: &Context,
    locator: &Locator,
    address: u32,
    tables: &[String],
) -> Result<(), Box<dyn std::error::Error>> {
    let db = ctx
        .env
        .open(locator, Config::new().with_optional_key(ctx.key.clone()))?;

    let created = db.transaction(TxnMode::Exclusive, |txn| {
        let mut created = 0;
        for name in tables {
            if txn.has_table(name) {
                continue;
            }
            txn.create_table(
                TableDef::new(name.as_str())
                    .column("id", ColumnType::Integer)
                    .column("data", ColumnType::Text),
            )?;
            created += 1;
        }
        Ok(created)
    })?;

    let identity = Identity::new(&db);
    let address = identity.configure_identity(address)?;
    for name in tables {
        identity.set_table_mode(name, ReplicationMode::Out, ConflictResolution::AcceptIncoming)?;
    }

    println!("✓ Initialized {locator}");
    println!("  Address: {address}");
    println!("  Tables created: {created}");
    println!("  Publishing: {}", tables.join(", "));
    Ok(())
}
