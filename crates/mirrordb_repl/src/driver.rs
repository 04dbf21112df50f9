//! The periodic replication loop.
//!
//! A loop repeatedly runs [`ExchangeEngine::exchange`] with one peer and
//! then waits for the configured interval. Stopping is cooperative: the
//! stop signal is checked between rounds only, so a round is never cut
//! short. Transport and storage failures are logged and retried with
//! backoff; integrity and configuration failures end the loop.

use crate::config::LoopConfig;
use crate::error::{ReplError, ReplResult};
use crate::exchange::ExchangeEngine;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::cell::Cell;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Sending half of a stop channel.
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Sender<()>,
}

impl StopHandle {
    /// Asks the loop to stop after the current round.
    pub fn stop(&self) {
        let _ = self.tx.send(());
    }
}

/// Receiving half of a stop channel.
///
/// Once a stop is observed, or every [`StopHandle`] is gone, the signal
/// stays stopped.
#[derive(Debug)]
pub struct StopSignal {
    rx: Receiver<()>,
    stopped: Cell<bool>,
}

impl StopSignal {
    /// Returns true if a stop was requested.
    pub fn is_stopped(&self) -> bool {
        if self.stopped.get() {
            return true;
        }
        match self.rx.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => {
                self.stopped.set(true);
                true
            }
            Err(TryRecvError::Empty) => false,
        }
    }

    /// Sleeps for `timeout` or until a stop is requested. Returns true if
    /// a stop was requested.
    pub fn wait(&self, timeout: Duration) -> bool {
        if self.stopped.get() {
            return true;
        }
        match self.rx.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                self.stopped.set(true);
                true
            }
            Err(RecvTimeoutError::Timeout) => false,
        }
    }
}

/// Creates a connected stop handle and signal.
#[must_use]
pub fn stop_channel() -> (StopHandle, StopSignal) {
    let (tx, rx) = channel::unbounded();
    (
        StopHandle { tx },
        StopSignal {
            rx,
            stopped: Cell::new(false),
        },
    )
}

/// What a loop did before it stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopSummary {
    /// Rounds that committed.
    pub rounds: u64,
    /// Rounds that failed and were retried.
    pub failed_rounds: u64,
    /// Records pushed over all rounds.
    pub pushed: u64,
    /// Records pulled over all rounds.
    pub pulled: u64,
    /// Collisions over all rounds.
    pub conflicts: u64,
}

/// Runs exchange rounds with `peer` until `stop` fires.
///
/// # Errors
///
/// Returns the first error for which [`ReplError::is_loop_fatal`] holds.
pub fn run_replication_loop(
    engine: &ExchangeEngine,
    peer: &str,
    config: &LoopConfig,
    stop: &StopSignal,
) -> ReplResult<LoopSummary> {
    info!(peer, interval_ms = config.interval.as_millis() as u64, "replication loop started");
    let mut summary = LoopSummary::default();
    let mut failures: u32 = 0;

    while !stop.is_stopped() {
        match engine.exchange(peer) {
            Ok(result) => {
                failures = 0;
                summary.rounds += 1;
                summary.pushed += result.pushed as u64;
                summary.pulled += result.pulled as u64;
                summary.conflicts += result.conflicts.len() as u64;
            }
            Err(e) if e.is_loop_fatal() => {
                error!(peer, error = %e, "replication loop stopped by fatal error");
                return Err(e);
            }
            Err(e) => {
                failures = failures.saturating_add(1);
                summary.failed_rounds += 1;
                warn!(peer, error = %e, failures, "exchange round failed, will retry");
            }
        }
        let wait = config.next_wait(failures);
        debug!(peer, wait_ms = wait.as_millis() as u64, "waiting for next round");
        if stop.wait(wait) {
            break;
        }
    }

    info!(
        peer,
        rounds = summary.rounds,
        failed = summary.failed_rounds,
        "replication loop stopped"
    );
    Ok(summary)
}

/// A replication loop running on its own thread.
///
/// Dropping the handle stops the loop and waits for the running round.
#[derive(Debug)]
pub struct ReplicationHandle {
    stop: StopHandle,
    thread: Option<JoinHandle<ReplResult<LoopSummary>>>,
}

impl ReplicationHandle {
    /// Asks the loop to stop without waiting.
    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Returns true if the loop thread has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Stops the loop and waits for it.
    ///
    /// # Errors
    ///
    /// Returns the fatal error that ended the loop, or `LoopPanicked`.
    pub fn shutdown(mut self) -> ReplResult<LoopSummary> {
        self.stop.stop();
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| ReplError::LoopPanicked)?,
            None => Ok(LoopSummary::default()),
        }
    }
}

impl Drop for ReplicationHandle {
    fn drop(&mut self) {
        self.stop.stop();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Starts a replication loop with `peer` on a new thread.
///
/// # Errors
///
/// Returns `Io` if the thread cannot be spawned.
pub fn spawn_replication_loop(
    engine: Arc<ExchangeEngine>,
    peer: impl Into<String>,
    config: LoopConfig,
) -> ReplResult<ReplicationHandle> {
    let peer = peer.into();
    let (handle, signal) = stop_channel();
    let thread = thread::Builder::new()
        .name(format!("mirrordb-repl-{peer}"))
        .spawn(move || run_replication_loop(&engine, &peer, &config, &signal))?;
    Ok(ReplicationHandle {
        stop: handle,
        thread: Some(thread),
    })
}
