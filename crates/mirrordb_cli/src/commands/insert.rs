//! Insert command implementation.

use crate::Context;
use mirrordb_core::{Locator, TxnMode, Value};

/// Writes `(id, data)` into `table`, replacing an existing row.
pub fn run(
    ctx: &Context,
    locator: &Locator,
    table: &str,
    id: i64,
    data: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let db = ctx.open(locator)?;
    let mut txn = db.begin(TxnMode::Shared)?;
    txn.put(table, vec![Value::Integer(id), Value::text(data)])?;
    let info = txn.commit()?;
    println!(
        "✓ Wrote {table}[{id}] ({} logged, last sequence {})",
        info.logged, info.last_sequence
    );
    Ok(())
}
