//! Dump command implementation.

use crate::Context;
use mirrordb_core::{Locator, Value};
use serde::Serialize;

/// Database content and replication settings.
#[derive(Debug, Serialize)]
pub struct DumpResult {
    /// Database locator.
    pub locator: String,
    /// Replication address, if configured.
    pub address: Option<u32>,
    /// Highest sequence number issued.
    pub last_sequence: u64,
    /// Tables with their rows.
    pub tables: Vec<TableDump>,
    /// Registered peers.
    pub peers: Vec<PeerDump>,
}

/// One table.
#[derive(Debug, Serialize)]
pub struct TableDump {
    /// Table name.
    pub name: String,
    /// Replication mode.
    pub mode: String,
    /// Conflict policy.
    pub resolution: String,
    /// Rows in key order.
    pub rows: Vec<Vec<serde_json::Value>>,
}

/// One peer.
#[derive(Debug, Serialize)]
pub struct PeerDump {
    /// Peer name.
    pub name: String,
    /// Peer locator.
    pub locator: String,
    /// Peer address.
    pub address: u32,
    /// `(table, pushed, pulled)` checkpoints.
    pub checkpoints: Vec<(String, u64, u64)>,
}

/// Runs the dump command.
pub fn run(ctx: &Context, locator: &Locator, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let db = ctx.open(locator)?;
    let catalog = db.catalog();

    let mut tables = Vec::new();
    for name in db.table_names() {
        let info = catalog.table_info(&name);
        let rows = db
            .scan(&name)?
            .into_iter()
            .map(|(_, values)| values.iter().map(json_value).collect())
            .collect();
        tables.push(TableDump {
            mode: format!("{:?}", info.mode),
            resolution: format!("{:?}", info.resolution),
            name,
            rows,
        });
    }

    let peers = catalog
        .peers()
        .map(|peer| PeerDump {
            name: peer.name.clone(),
            locator: peer.definition.remote_locator.to_string(),
            address: peer.definition.remote_address.get(),
            checkpoints: tables
                .iter()
                .map(|t| {
                    let cp = peer.checkpoint(&t.name);
                    (t.name.clone(), cp.pushed.as_u64(), cp.pulled.as_u64())
                })
                .collect(),
        })
        .collect();

    let result = DumpResult {
        locator: locator.to_string(),
        address: catalog.address().map(|a| a.get()),
        last_sequence: db.last_sequence().as_u64(),
        tables,
        peers,
    };

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text(&result),
    }
    Ok(())
}

fn json_value(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Integer(i) => serde_json::json!(i),
        Value::Real(r) => serde_json::json!(r),
        Value::Text(s) => serde_json::json!(s),
        Value::Blob(b) => serde_json::json!(b),
    }
}

fn print_text(result: &DumpResult) {
    println!("Database: {}", result.locator);
    match result.address {
        Some(address) => println!("  Address: {address}"),
        None => println!("  Address: (none)"),
    }
    println!("  Last sequence: {}", result.last_sequence);
    for table in &result.tables {
        println!();
        println!(
            "Table {} [{} / {}] - {} rows",
            table.name,
            table.mode,
            table.resolution,
            table.rows.len()
        );
        for row in &table.rows {
            let cells: Vec<String> = row.iter().map(ToString::to_string).collect();
            println!("  {}", cells.join(" | "));
        }
    }
    if !result.peers.is_empty() {
        println!();
        println!("Peers:");
        for peer in &result.peers {
            println!("  {} -> {} (@{})", peer.name, peer.locator, peer.address);
            for (table, pushed, pulled) in &peer.checkpoints {
                println!("    {table}: pushed {pushed}, pulled {pulled}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_become_plain_json() {
        assert_eq!(json_value(&Value::Null), serde_json::Value::Null);
        assert_eq!(json_value(&Value::Integer(7)), serde_json::json!(7));
        assert_eq!(json_value(&Value::text("x")), serde_json::json!("x"));
        assert_eq!(json_value(&Value::Blob(vec![1, 2])), serde_json::json!([1, 2]));
    }
}
