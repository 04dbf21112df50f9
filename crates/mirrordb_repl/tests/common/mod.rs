#![allow(dead_code)]

use mirrordb_core::{
    Address, ColumnType, Config, ConflictResolution, Database, Environment, Locator,
    PeerDefinition, ReplicationMode, RowKey, TableDef, TxnMode, Value,
};
use mirrordb_repl::{ExchangeEngine, Identity, PeerRegistry};
use std::sync::Arc;

pub const PEER: &str = "main";

pub fn addr(n: u32) -> Address {
    Address::new(n).unwrap()
}

pub fn row(id: i64, data: &str) -> Vec<Value> {
    vec![Value::Integer(id), Value::text(data)]
}

pub fn table(name: &str) -> TableDef {
    TableDef::new(name)
        .column("id", ColumnType::Integer)
        .column("data", ColumnType::Text)
}

/// Opens `locator` and creates tables `t1` and `t2`.
pub fn demo_db(env: &Environment, locator: &Locator) -> Arc<Database> {
    let db = env.open(locator, Config::default()).unwrap();
    db.transaction(TxnMode::Exclusive, |txn| {
        txn.create_table(table("t1"))?;
        txn.create_table(table("t2"))
    })
    .unwrap();
    db
}

pub fn insert_rows(db: &Database, table: &str, ids: impl IntoIterator<Item = i64>) {
    db.transaction(TxnMode::Shared, |txn| {
        for id in ids {
            txn.put(table, row(id, &format!("row {id}")))?;
        }
        Ok(())
    })
    .unwrap();
}

pub fn put(db: &Database, table: &str, id: i64, data: &str) {
    db.transaction(TxnMode::Shared, |txn| txn.put(table, row(id, data)))
        .unwrap();
}

pub fn delete(db: &Database, table: &str, id: RowKey) {
    db.transaction(TxnMode::Shared, |txn| txn.delete(table, id))
        .unwrap();
}

pub fn data(db: &Database, table: &str, id: RowKey) -> Option<String> {
    db.get(table, id)
        .unwrap()
        .map(|values| values[1].as_text().unwrap().to_string())
}

pub fn configure(
    db: &Database,
    address: u32,
    mode: ReplicationMode,
    resolution: ConflictResolution,
) {
    let identity = Identity::new(db);
    identity.configure_identity(address).unwrap();
    for t in ["t1", "t2"] {
        identity.set_table_mode(t, mode, resolution).unwrap();
    }
}

/// A publishing primary at `memory:primary` and a subscribing secondary at
/// `memory:secondary` whose peer `main` is the primary.
pub struct Pair {
    pub env: Environment,
    pub primary_at: Locator,
    pub primary: Arc<Database>,
    pub secondary: Arc<Database>,
    pub engine: ExchangeEngine,
}

impl Pair {
    pub fn new(resolution: ConflictResolution) -> Self {
        Self::with_addresses(1, 2, ReplicationMode::Out, ReplicationMode::In, resolution)
    }

    pub fn with_addresses(
        primary_address: u32,
        secondary_address: u32,
        primary_mode: ReplicationMode,
        secondary_mode: ReplicationMode,
        resolution: ConflictResolution,
    ) -> Self {
        let env = Environment::new();
        let primary_at = Locator::memory("primary");
        let primary = demo_db(&env, &primary_at);
        configure(&primary, primary_address, primary_mode, resolution);
        let secondary = demo_db(&env, &Locator::memory("secondary"));
        configure(&secondary, secondary_address, secondary_mode, resolution);
        PeerRegistry::new(&secondary)
            .create_peer(
                PEER,
                PeerDefinition::ad_hoc(addr(primary_address), primary_at.clone()),
            )
            .unwrap();
        let engine = ExchangeEngine::with_environment(&env, secondary.clone());
        Self {
            env,
            primary_at,
            primary,
            secondary,
            engine,
        }
    }
}
