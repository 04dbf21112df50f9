//! The database environment: an explicit registry of open databases.

use crate::config::{Config, OpenMode};
use crate::database::Database;
use crate::error::{CoreError, CoreResult};
use crate::locator::Locator;
use crate::types::SequenceNumber;
use mirrordb_storage::{EncryptionKey, FileBackend, StorageBackend};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Options for [`Environment::backup`].
#[derive(Debug, Clone, Default)]
pub struct BackupOptions {
    /// Key of the source database, if it is encrypted and not yet open.
    pub source_key: Option<EncryptionKey>,
    /// Key for the destination. `None` writes an unencrypted copy.
    pub destination_key: Option<EncryptionKey>,
    /// Give the copy a fresh replication identity.
    pub reset_replication: bool,
    /// Replace an existing destination.
    pub overwrite: bool,
}

impl BackupOptions {
    /// Creates default options: plain copy, no overwrite.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the source key.
    #[must_use]
    pub fn source_key(mut self, key: Option<EncryptionKey>) -> Self {
        self.source_key = key;
        self
    }

    /// Sets the destination key.
    #[must_use]
    pub fn destination_key(mut self, key: Option<EncryptionKey>) -> Self {
        self.destination_key = key;
        self
    }

    /// Clears replication identity in the copy.
    #[must_use]
    pub const fn reset_replication(mut self, value: bool) -> Self {
        self.reset_replication = value;
        self
    }

    /// Allows replacing an existing destination.
    #[must_use]
    pub const fn overwrite(mut self, value: bool) -> Self {
        self.overwrite = value;
        self
    }
}

/// Summary of a completed backup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackupInfo {
    /// Source sequence number captured by the copy.
    pub sequence: SequenceNumber,
    /// Number of tables copied.
    pub tables: usize,
    /// Number of rows copied.
    pub rows: usize,
    /// Size of the written image.
    pub bytes: u64,
}

/// Registry of open databases keyed by locator.
///
/// Every locator maps to at most one shared [`Database`] handle, so all
/// users of an environment observe the same committed state. `memory:`
/// databases exist only inside the environment that created them.
/// Cloning an environment shares the registry.
#[derive(Clone, Default)]
pub struct Environment {
    open: Arc<Mutex<HashMap<Locator, Arc<Database>>>>,
}

impl Environment {
    /// Creates an empty environment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a database, sharing an already open handle if there is one.
    ///
    /// `CreateAlways` on an open database removes it first. The encryption
    /// key in `config` is ignored when an open handle is reused.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseNotFound` for `OpenExisting` on a missing database
    /// and any error from [`Database::open`].
    pub fn open(&self, locator: &Locator, config: Config) -> CoreResult<Arc<Database>> {
        let mut open = self.open.lock();
        if let Some(db) = open.get(locator).cloned() {
            if db.is_closed() {
                open.remove(locator);
            } else if config.open_mode == OpenMode::CreateAlways {
                db.destroy()?;
                open.remove(locator);
            } else {
                return Ok(db);
            }
        }
        if matches!(locator, Locator::Memory(_)) && config.open_mode == OpenMode::OpenExisting {
            return Err(CoreError::DatabaseNotFound {
                locator: locator.to_string(),
            });
        }
        let db = Arc::new(Database::open(locator, &config)?);
        open.insert(locator.clone(), Arc::clone(&db));
        Ok(db)
    }

    /// Returns true if a database exists at `locator`.
    #[must_use]
    pub fn exists(&self, locator: &Locator) -> bool {
        let is_open = self
            .open
            .lock()
            .get(locator)
            .is_some_and(|db| !db.is_closed());
        is_open || locator.path().is_some_and(FileBackend::exists)
    }

    /// Closes a database and forgets its handle. Files stay on disk;
    /// `memory:` databases are lost.
    pub fn close(&self, locator: &Locator) -> bool {
        match self.open.lock().remove(locator) {
            Some(db) => {
                db.close();
                true
            }
            None => false,
        }
    }

    /// Closes a database and deletes it. Returns false if nothing existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be deleted.
    pub fn remove(&self, locator: &Locator) -> CoreResult<bool> {
        let mut open = self.open.lock();
        let removed = match open.remove(locator) {
            Some(db) => {
                let was_open = !db.is_closed();
                db.destroy()?;
                was_open
            }
            None => false,
        };
        if let Some(path) = locator.path() {
            if FileBackend::exists(path) {
                FileBackend::open(path)?.destroy()?;
                info!(locator = %locator, "removed database file");
                return Ok(true);
            }
        }
        Ok(removed)
    }

    /// Locators of all open databases.
    #[must_use]
    pub fn open_locators(&self) -> Vec<Locator> {
        self.open.lock().keys().cloned().collect()
    }

    /// Copies the committed state of `source` to `destination`.
    ///
    /// The copy is taken atomically with respect to commits on the source.
    /// The destination is left open in this environment.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseNotFound` if the source does not exist,
    /// `DatabaseExists` if the destination exists and `overwrite` is not
    /// set, or a storage error if the copy cannot be written.
    pub fn backup(
        &self,
        source: &Locator,
        destination: &Locator,
        options: &BackupOptions,
    ) -> CoreResult<BackupInfo> {
        if source == destination {
            return Err(CoreError::invalid_operation(
                "backup source and destination are the same",
            ));
        }
        let src = self.open(
            source,
            Config::new()
                .open_mode(OpenMode::OpenExisting)
                .with_optional_key(options.source_key.clone()),
        )?;
        let mut image = src.capture();
        let sequence = image.last_sequence;
        if options.reset_replication {
            image.reset_replication();
        }

        if self.exists(destination) {
            if !options.overwrite {
                return Err(CoreError::DatabaseExists {
                    locator: destination.to_string(),
                });
            }
            warn!(destination = %destination, "overwriting existing database");
            self.remove(destination)?;
        }

        let tables = image.tables.len();
        let rows = image.row_count();
        let config = Config::new()
            .open_mode(OpenMode::CreateAlways)
            .with_optional_key(options.destination_key.clone());
        let copy = Arc::new(Database::create_from_image(destination, &config, image)?);
        let info = BackupInfo {
            sequence,
            tables,
            rows,
            bytes: copy.size_on_disk(),
        };
        self.open.lock().insert(destination.clone(), copy);
        info!(
            source = %source,
            destination = %destination,
            sequence = %sequence,
            rows,
            reset = options.reset_replication,
            encrypted = options.destination_key.is_some(),
            "backup complete"
        );
        Ok(info)
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("open", &self.open.lock().len())
            .finish()
    }
}
