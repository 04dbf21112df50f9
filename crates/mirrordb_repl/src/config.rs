//! Replication configuration.

use mirrordb_core::{ConflictResolution, EncryptionKey};
use rand::Rng;
use std::time::Duration;

/// Configuration for a single exchange round.
#[derive(Debug, Clone, Default)]
pub struct ExchangeConfig {
    /// Maximum records transferred per table and direction in one round.
    /// `None` transfers everything pending.
    pub batch_limit: Option<usize>,
}

impl ExchangeConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Limits the records transferred per table and direction.
    #[must_use]
    pub fn with_batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = Some(limit.max(1));
        self
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a retry configuration with the given initial delay.
    pub fn new(initial_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, add_jitter: bool) -> Self {
        self.add_jitter = add_jitter;
        self
    }

    /// Calculates the delay after a number of consecutive failures.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_delay = self.initial_delay.as_secs_f64()
            * self
                .backoff_multiplier
                .powi(attempt.saturating_sub(1).min(63) as i32);

        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            // Add up to 25% jitter
            let jitter = delay_secs * 0.25 * rand::thread_rng().gen::<f64>();
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

/// Configuration for the periodic replication loop.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Wait between successful rounds.
    pub interval: Duration,
    /// Backoff after failed rounds.
    pub retry: RetryConfig,
}

impl LoopConfig {
    /// Creates a loop configuration with the given interval.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            retry: RetryConfig::default(),
        }
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Wait before the next round after `failures` consecutive failures.
    pub fn next_wait(&self, failures: u32) -> Duration {
        self.interval.max(self.retry.delay_for_attempt(failures))
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

/// Configuration for the failover orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Address given to the primary if it has none.
    pub primary_address: u32,
    /// Address given to the secondary.
    pub secondary_address: u32,
    /// Name of the peer the secondary uses for the primary.
    pub peer_name: String,
    /// Conflict policy on the secondary's tables.
    pub resolution: ConflictResolution,
    /// Tables to replicate. `None` means every table of the primary.
    pub tables: Option<Vec<String>>,
    /// Replication loop settings.
    pub replication: LoopConfig,
    /// Encryption key of the primary database.
    pub primary_key: Option<EncryptionKey>,
    /// Encryption key of the secondary database.
    pub secondary_key: Option<EncryptionKey>,
}

impl OrchestratorConfig {
    /// Creates the default configuration: addresses 1 and 2, peer "main",
    /// accept-incoming resolution, all tables.
    pub fn new() -> Self {
        Self {
            primary_address: 1,
            secondary_address: 2,
            peer_name: "main".to_string(),
            resolution: ConflictResolution::AcceptIncoming,
            tables: None,
            replication: LoopConfig::default(),
            primary_key: None,
            secondary_key: None,
        }
    }

    /// Sets the two addresses.
    pub fn with_addresses(mut self, primary: u32, secondary: u32) -> Self {
        self.primary_address = primary;
        self.secondary_address = secondary;
        self
    }

    /// Sets the peer name.
    pub fn with_peer_name(mut self, name: impl Into<String>) -> Self {
        self.peer_name = name.into();
        self
    }

    /// Sets the conflict policy.
    pub fn with_resolution(mut self, resolution: ConflictResolution) -> Self {
        self.resolution = resolution;
        self
    }

    /// Restricts replication to the given tables.
    pub fn with_tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tables = Some(tables.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the replication loop settings.
    pub fn with_replication(mut self, replication: LoopConfig) -> Self {
        self.replication = replication;
        self
    }

    /// Sets the encryption keys.
    pub fn with_keys(
        mut self,
        primary: Option<EncryptionKey>,
        secondary: Option<EncryptionKey>,
    ) -> Self {
        self.primary_key = primary;
        self.secondary_key = secondary;
        self
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::new()
    }
}
