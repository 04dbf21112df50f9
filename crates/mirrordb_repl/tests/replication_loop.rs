//! Integration tests for the periodic replication loop.

mod common;

use common::*;
use mirrordb_core::{ConflictResolution, Locator, PeerDefinition, TxnMode};
use mirrordb_repl::{
    run_replication_loop, spawn_replication_loop, stop_channel, ErrorKind, ExchangeEngine,
    LoopConfig, PeerRegistry, RetryConfig,
};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn fast_loop() -> LoopConfig {
    LoopConfig::new(Duration::from_millis(5)).with_retry(
        RetryConfig::new(Duration::from_millis(5)).with_max_delay(Duration::from_millis(20)),
    )
}

fn wait_for(mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn loop_follows_concurrent_writer() {
    let pair = Pair::new(ConflictResolution::AcceptIncoming);
    let engine = Arc::new(ExchangeEngine::with_environment(
        &pair.env,
        pair.secondary.clone(),
    ));
    let handle = spawn_replication_loop(engine.clone(), PEER, fast_loop()).unwrap();

    let primary = pair.primary.clone();
    let writer = thread::spawn(move || {
        for id in 1..=50 {
            primary
                .transaction(TxnMode::Shared, |txn| {
                    txn.put("t1", row(id, "w"))?;
                    txn.put("t2", row(id, "w"))
                })
                .unwrap();
            thread::sleep(Duration::from_millis(1));
        }
    });
    writer.join().unwrap();

    assert!(wait_for(|| pair.secondary.scan("t2").unwrap().len() == 50));
    let summary = handle.shutdown().unwrap();
    assert!(summary.rounds >= 1);
    assert_eq!(summary.pulled, 100);
    assert_eq!(pair.secondary.scan("t1").unwrap(), pair.primary.scan("t1").unwrap());
    assert_eq!(engine.stats().rows_pulled, 100);
}

#[test]
fn transport_failures_do_not_end_loop() {
    let pair = Pair::new(ConflictResolution::AcceptIncoming);
    PeerRegistry::new(&pair.secondary)
        .create_peer("gone", PeerDefinition::ad_hoc(addr(9), Locator::memory("gone")))
        .unwrap();
    let engine = Arc::new(ExchangeEngine::with_environment(
        &pair.env,
        pair.secondary.clone(),
    ));
    let handle = spawn_replication_loop(engine.clone(), "gone", fast_loop()).unwrap();

    assert!(wait_for(|| engine.stats().rounds_failed >= 3));
    assert!(!handle.is_finished());
    let summary = handle.shutdown().unwrap();
    assert_eq!(summary.rounds, 0);
    assert!(summary.failed_rounds >= 3);
}

#[test]
fn integrity_error_ends_loop() {
    let pair = Pair::new(ConflictResolution::AcceptIncoming);
    PeerRegistry::new(&pair.secondary)
        .create_peer("imposter", PeerDefinition::ad_hoc(addr(5), pair.primary_at.clone()))
        .unwrap();
    let engine = Arc::new(ExchangeEngine::with_environment(
        &pair.env,
        pair.secondary.clone(),
    ));
    let handle = spawn_replication_loop(engine, "imposter", fast_loop()).unwrap();

    assert!(wait_for(|| handle.is_finished()));
    let err = handle.shutdown().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Integrity);
}

#[test]
fn stop_before_first_round() {
    let pair = Pair::new(ConflictResolution::AcceptIncoming);
    insert_rows(&pair.primary, "t1", 1..=3);
    let (stop, signal) = stop_channel();
    stop.stop();

    let summary = run_replication_loop(&pair.engine, PEER, &fast_loop(), &signal).unwrap();
    assert_eq!(summary.rounds, 0);
    assert!(pair.secondary.scan("t1").unwrap().is_empty());
}

#[test]
fn stop_from_another_thread() {
    let pair = Pair::new(ConflictResolution::AcceptIncoming);
    insert_rows(&pair.primary, "t1", 1..=3);
    let (stop, signal) = stop_channel();
    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        stop.stop();
    });

    let summary = run_replication_loop(
        &pair.engine,
        PEER,
        &LoopConfig::new(Duration::from_millis(10)),
        &signal,
    )
    .unwrap();
    stopper.join().unwrap();
    assert!(summary.rounds >= 1);
    assert_eq!(summary.pulled, 3);
}

#[test]
fn dropping_handle_stops_loop() {
    let pair = Pair::new(ConflictResolution::AcceptIncoming);
    let engine = Arc::new(ExchangeEngine::with_environment(
        &pair.env,
        pair.secondary.clone(),
    ));
    let handle = spawn_replication_loop(engine.clone(), PEER, fast_loop()).unwrap();
    assert!(wait_for(|| engine.stats().rounds_completed >= 1));
    drop(handle);

    let rounds = engine.stats().rounds_completed;
    thread::sleep(Duration::from_millis(30));
    assert_eq!(engine.stats().rounds_completed, rounds);
}
