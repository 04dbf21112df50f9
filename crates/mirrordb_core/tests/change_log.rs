//! Integration tests for the committed change log and backups.

use mirrordb_core::{
    Address, BackupOptions, ColumnType, Config, ConflictResolution, CoreError, EncryptionKey,
    Environment, Locator, OpenMode, ReplicationMode, SequenceNumber, TableDef,
    TableReplicationInfo, TxnMode, Value,
};
use proptest::prelude::*;
use tempfile::tempdir;

fn addr(n: u32) -> Address {
    Address::new(n).unwrap()
}

fn row(id: i64, data: &str) -> Vec<Value> {
    vec![Value::Integer(id), Value::text(data)]
}

fn demo_db(env: &Environment, locator: &Locator) -> std::sync::Arc<mirrordb_core::Database> {
    let db = env.open(locator, Config::default()).unwrap();
    db.transaction(TxnMode::Exclusive, |txn| {
        for name in ["t1", "t2"] {
            txn.create_table(
                TableDef::new(name)
                    .column("id", ColumnType::Integer)
                    .column("data", ColumnType::Text),
            )?;
        }
        Ok(())
    })
    .unwrap();
    db
}

fn publish(db: &mirrordb_core::Database, address: u32, table: &str, mode: ReplicationMode) {
    db.transaction(TxnMode::Exclusive, |txn| {
        let catalog = txn.catalog_mut();
        catalog.set_address(Some(addr(address)));
        catalog.set_table_info(
            table,
            TableReplicationInfo {
                mode,
                resolution: ConflictResolution::AcceptIncoming,
            },
        );
        Ok(())
    })
    .unwrap();
}

#[test]
fn only_publishing_tables_are_logged() {
    let env = Environment::new();
    let db = demo_db(&env, &Locator::memory("main"));
    publish(&db, 1, "t1", ReplicationMode::Out);

    db.transaction(TxnMode::Shared, |txn| {
        txn.put("t1", row(1, "logged"))?;
        txn.put("t2", row(1, "not logged"))?;
        Ok(())
    })
    .unwrap();

    assert_eq!(db.last_sequence(), SequenceNumber::new(1));
    let changes = db.changes_since("t1", addr(1), SequenceNumber::ZERO);
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].key, 1);
    assert_eq!(changes[0].after, Some(row(1, "logged")));
    assert!(db
        .changes_since("t2", addr(1), SequenceNumber::ZERO)
        .is_empty());
}

#[test]
fn subscribe_only_tables_are_not_logged() {
    let env = Environment::new();
    let db = demo_db(&env, &Locator::memory("mirror"));
    publish(&db, 2, "t1", ReplicationMode::In);
    db.transaction(TxnMode::Shared, |txn| txn.put("t1", row(1, "x")))
        .unwrap();
    assert_eq!(db.last_sequence(), SequenceNumber::ZERO);
}

#[test]
fn replicated_writes_are_not_logged() {
    let env = Environment::new();
    let db = demo_db(&env, &Locator::memory("both"));
    publish(&db, 2, "t1", ReplicationMode::Both);

    db.transaction(TxnMode::Shared, |txn| {
        txn.put_replicated("t1", row(7, "from peer"), addr(1))
    })
    .unwrap();
    assert_eq!(db.last_sequence(), SequenceNumber::ZERO);

    let row7 = db
        .transaction(TxnMode::Shared, |txn| txn.get_row("t1", 7))
        .unwrap()
        .unwrap();
    assert_eq!(row7.origin, Some(addr(1)));
}

#[test]
fn pre_existing_rows_are_never_logged() {
    let env = Environment::new();
    let db = demo_db(&env, &Locator::memory("late"));
    db.transaction(TxnMode::Exclusive, |txn| txn.put("t1", row(1, "before")))
        .unwrap();
    publish(&db, 1, "t1", ReplicationMode::Out);
    assert_eq!(db.last_sequence(), SequenceNumber::ZERO);

    db.transaction(TxnMode::Exclusive, |txn| txn.put("t1", row(2, "after")))
        .unwrap();
    let keys: Vec<_> = db
        .changes_since("t1", addr(1), SequenceNumber::ZERO)
        .iter()
        .map(|c| c.key)
        .collect();
    assert_eq!(keys, vec![2]);
}

#[test]
fn deletes_are_logged_as_tombstones() {
    let env = Environment::new();
    let db = demo_db(&env, &Locator::memory("del"));
    publish(&db, 1, "t1", ReplicationMode::Out);
    db.transaction(TxnMode::Exclusive, |txn| txn.put("t1", row(1, "x")))
        .unwrap();
    let deleted = db
        .transaction(TxnMode::Exclusive, |txn| {
            let first = txn.delete("t1", 1)?;
            let second = txn.delete("t1", 1)?;
            Ok((first, second))
        })
        .unwrap();
    assert_eq!(deleted, (true, false));
    let changes = db.changes_since("t1", addr(1), SequenceNumber::ZERO);
    assert_eq!(changes.len(), 2);
    assert!(changes[1].is_tombstone());
}

#[test]
fn environment_shares_handles() {
    let env = Environment::new();
    let locator = Locator::memory("shared");
    let a = demo_db(&env, &locator);
    let b = env
        .open(&locator, Config::new().open_mode(OpenMode::OpenExisting))
        .unwrap();
    a.transaction(TxnMode::Exclusive, |txn| txn.put("t1", row(1, "seen")))
        .unwrap();
    assert_eq!(b.get("t1", 1).unwrap(), Some(row(1, "seen")));
    assert!(env.exists(&locator));

    assert!(env.remove(&locator).unwrap());
    assert!(!env.exists(&locator));
    assert!(a.is_closed());
    let err = env
        .open(&locator, Config::new().open_mode(OpenMode::OpenExisting))
        .unwrap_err();
    assert!(matches!(err, CoreError::DatabaseNotFound { .. }));
}

#[test]
fn backup_copies_rows_and_sequence() {
    let env = Environment::new();
    let main = Locator::memory("main");
    let copy = Locator::memory("copy");
    let db = demo_db(&env, &main);
    publish(&db, 1, "t1", ReplicationMode::Out);
    db.transaction(TxnMode::Exclusive, |txn| {
        for id in 1..=10 {
            txn.put("t1", row(id, "data"))?;
        }
        Ok(())
    })
    .unwrap();

    let info = env.backup(&main, &copy, &BackupOptions::new()).unwrap();
    assert_eq!(info.sequence, SequenceNumber::new(10));
    assert_eq!(info.rows, 10);
    assert_eq!(info.tables, 2);

    let copied = env
        .open(&copy, Config::new().open_mode(OpenMode::OpenExisting))
        .unwrap();
    assert_eq!(copied.scan("t1").unwrap(), db.scan("t1").unwrap());
    assert_eq!(copied.address(), Some(addr(1)));
}

#[test]
fn backup_with_reset_clears_identity_but_keeps_sequence() {
    let env = Environment::new();
    let main = Locator::memory("main");
    let copy = Locator::memory("copy");
    let db = demo_db(&env, &main);
    publish(&db, 1, "t1", ReplicationMode::Out);
    db.transaction(TxnMode::Exclusive, |txn| txn.put("t1", row(1, "x")))
        .unwrap();

    env.backup(&main, &copy, &BackupOptions::new().reset_replication(true))
        .unwrap();
    let copied = env
        .open(&copy, Config::new().open_mode(OpenMode::OpenExisting))
        .unwrap();
    assert_eq!(copied.address(), None);
    assert!(!copied.catalog().has_replicated_tables());
    assert_eq!(copied.last_sequence(), SequenceNumber::new(1));
    assert!(copied
        .changes_since("t1", addr(1), SequenceNumber::ZERO)
        .is_empty());
}

#[test]
fn backup_refuses_existing_destination() {
    let env = Environment::new();
    let main = Locator::memory("main");
    let copy = Locator::memory("copy");
    demo_db(&env, &main);
    demo_db(&env, &copy);
    let err = env
        .backup(&main, &copy, &BackupOptions::new())
        .unwrap_err();
    assert!(matches!(err, CoreError::DatabaseExists { .. }));
    assert!(env
        .backup(&main, &copy, &BackupOptions::new().overwrite(true))
        .is_ok());
    assert!(env.backup(&main, &main, &BackupOptions::new()).is_err());
}

#[test]
fn backup_to_file_with_different_key() {
    let dir = tempdir().unwrap();
    let env = Environment::new();
    let main = Locator::file(dir.path().join("main.mdb"));
    let backup = Locator::file(dir.path().join("backup.mdb"));
    let main_key = EncryptionKey::from_bytes(&[1u8; 32]).unwrap();
    let backup_key = EncryptionKey::from_bytes(&[2u8; 32]).unwrap();

    let db = env
        .open(&main, Config::new().encryption_key(main_key.clone()))
        .unwrap();
    db.transaction(TxnMode::Exclusive, |txn| {
        txn.create_table(
            TableDef::new("t1")
                .column("id", ColumnType::Integer)
                .column("data", ColumnType::Text),
        )?;
        txn.put("t1", row(1, "secret"))
    })
    .unwrap();

    env.backup(
        &main,
        &backup,
        &BackupOptions::new().destination_key(Some(backup_key.clone())),
    )
    .unwrap();
    env.close(&backup);
    env.close(&main);

    let wrong = env.open(
        &backup,
        Config::new()
            .open_mode(OpenMode::OpenExisting)
            .encryption_key(main_key),
    );
    assert!(matches!(wrong, Err(CoreError::Storage(_))));

    let plain = env.open(&backup, Config::new().open_mode(OpenMode::OpenExisting));
    assert!(plain.is_err());

    let right = env
        .open(
            &backup,
            Config::new()
                .open_mode(OpenMode::OpenExisting)
                .encryption_key(backup_key),
        )
        .unwrap();
    assert_eq!(right.get("t1", 1).unwrap(), Some(row(1, "secret")));
}

#[test]
fn create_always_replaces_file() {
    let dir = tempdir().unwrap();
    let env = Environment::new();
    let locator = Locator::file(dir.path().join("db.mdb"));
    demo_db(&env, &locator);
    let fresh = env
        .open(&locator, Config::new().open_mode(OpenMode::CreateAlways))
        .unwrap();
    assert!(fresh.table_names().is_empty());
}

#[test]
fn rows_carry_their_logged_sequence() {
    let env = Environment::new();
    let db = demo_db(&env, &Locator::memory("stamped"));
    db.transaction(TxnMode::Exclusive, |txn| txn.put("t1", row(1, "before")))
        .unwrap();
    publish(&db, 1, "t1", ReplicationMode::Both);
    db.transaction(TxnMode::Shared, |txn| {
        txn.put("t1", row(2, "local"))?;
        txn.put_replicated("t1", row(3, "remote"), addr(9))?;
        Ok(())
    })
    .unwrap();

    db.transaction(TxnMode::Shared, |txn| {
        assert_eq!(txn.get_row("t1", 1)?.unwrap().sequence, None);
        assert_eq!(
            txn.get_row("t1", 2)?.unwrap().sequence,
            Some(SequenceNumber::new(1))
        );
        assert_eq!(txn.get_row("t1", 3)?.unwrap().sequence, None);
        txn.put("t1", row(2, "pending"))?;
        assert_eq!(txn.get_row("t1", 2)?.unwrap().sequence, None);
        Ok(())
    })
    .unwrap();
    assert_eq!(db.last_sequence(), SequenceNumber::new(2));
}

#[test]
fn raised_sequence_continues_above_floor() {
    let env = Environment::new();
    let db = demo_db(&env, &Locator::memory("raised"));
    publish(&db, 1, "t1", ReplicationMode::Out);
    db.transaction(TxnMode::Exclusive, |txn| {
        txn.raise_sequence(SequenceNumber::new(6));
        txn.raise_sequence(SequenceNumber::new(4));
        Ok(())
    })
    .unwrap();
    assert_eq!(db.last_sequence(), SequenceNumber::new(6));

    db.transaction(TxnMode::Exclusive, |txn| {
        txn.raise_sequence(SequenceNumber::new(2));
        txn.put("t1", row(1, "x"))
    })
    .unwrap();
    let changes = db.changes_since("t1", addr(1), SequenceNumber::ZERO);
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].sequence, SequenceNumber::new(7));
}

#[test]
fn trimmed_log_keeps_later_records_and_floor() {
    let dir = tempdir().unwrap();
    let env = Environment::new();
    let locator = Locator::file(dir.path().join("trim.mdb"));
    let db = demo_db(&env, &locator);
    publish(&db, 1, "t1", ReplicationMode::Out);
    publish(&db, 1, "t2", ReplicationMode::Out);
    for id in 1..=4 {
        db.transaction(TxnMode::Shared, |txn| {
            txn.put("t1", row(id, "a"))?;
            txn.put("t2", row(id, "b"))?;
            Ok(())
        })
        .unwrap();
    }

    db.transaction(TxnMode::Exclusive, |txn| {
        txn.trim_change_log("t1", SequenceNumber::new(5))
    })
    .unwrap();
    assert_eq!(db.log_floor("t1"), SequenceNumber::new(5));
    assert_eq!(db.log_floor("t2"), SequenceNumber::ZERO);
    let keys: Vec<_> = db
        .changes_since("t1", addr(1), SequenceNumber::ZERO)
        .iter()
        .map(|c| c.key)
        .collect();
    assert_eq!(keys, vec![4]);
    assert_eq!(db.changes_since("t2", addr(1), SequenceNumber::ZERO).len(), 4);

    // A lower trim is a no-op; a trim past the counter stops at the counter.
    db.transaction(TxnMode::Exclusive, |txn| {
        txn.trim_change_log("t1", SequenceNumber::new(2))?;
        txn.trim_change_log("t2", SequenceNumber::new(99))
    })
    .unwrap();
    assert_eq!(db.log_floor("t1"), SequenceNumber::new(5));
    assert_eq!(db.log_floor("t2"), SequenceNumber::new(8));
    assert!(matches!(
        db.transaction(TxnMode::Exclusive, |txn| {
            txn.trim_change_log("missing", SequenceNumber::new(1))
        }),
        Err(CoreError::TableNotFound { .. })
    ));

    env.close(&locator);
    drop(db);
    let db = env.open(&locator, Config::default()).unwrap();
    assert_eq!(db.log_floor("t1"), SequenceNumber::new(5));
    assert_eq!(db.changes_since("t1", addr(1), SequenceNumber::ZERO).len(), 1);
    assert!(db.changes_since("t2", addr(1), SequenceNumber::ZERO).is_empty());
}

proptest! {
    #[test]
    fn sequence_numbers_strictly_increase(keys in proptest::collection::vec(0i64..20, 1..40)) {
        let env = Environment::new();
        let db = demo_db(&env, &Locator::memory("prop"));
        publish(&db, 1, "t1", ReplicationMode::Out);
        for key in &keys {
            db.transaction(TxnMode::Shared, |txn| txn.put("t1", row(*key, "v"))).unwrap();
        }
        let changes = db.changes_since("t1", addr(1), SequenceNumber::ZERO);
        prop_assert_eq!(changes.len(), keys.len());
        for pair in changes.windows(2) {
            prop_assert!(pair[0].sequence < pair[1].sequence);
        }
        prop_assert_eq!(db.last_sequence(), SequenceNumber::new(keys.len() as u64));
    }
}
