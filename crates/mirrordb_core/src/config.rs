//! Database configuration.

use mirrordb_storage::EncryptionKey;

/// How [`Environment::open`](crate::Environment::open) treats an existing
/// or missing database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenMode {
    /// Always start from an empty database, replacing any existing one.
    CreateAlways,
    /// Fail with `DatabaseNotFound` if the database does not exist.
    OpenExisting,
    /// Open the database, creating it if missing.
    #[default]
    OpenOrCreate,
}

/// Configuration for opening a database.
#[derive(Debug, Clone)]
pub struct Config {
    /// Open behaviour.
    pub open_mode: OpenMode,

    /// Whether to sync the image file on every commit (safer but slower).
    pub sync_on_commit: bool,

    /// Key for encryption at rest, if any.
    pub encryption_key: Option<EncryptionKey>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            open_mode: OpenMode::default(),
            sync_on_commit: true,
            encryption_key: None,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the open mode.
    #[must_use]
    pub const fn open_mode(mut self, mode: OpenMode) -> Self {
        self.open_mode = mode;
        self
    }

    /// Sets whether to sync the image on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Enables encryption at rest with the given key.
    #[must_use]
    pub fn encryption_key(mut self, key: EncryptionKey) -> Self {
        self.encryption_key = Some(key);
        self
    }

    /// Sets or clears the encryption key.
    #[must_use]
    pub fn with_optional_key(mut self, key: Option<EncryptionKey>) -> Self {
        self.encryption_key = key;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.open_mode, OpenMode::OpenOrCreate);
        assert!(config.sync_on_commit);
        assert!(config.encryption_key.is_none());
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .open_mode(OpenMode::OpenExisting)
            .sync_on_commit(false)
            .encryption_key(EncryptionKey::generate());
        assert_eq!(config.open_mode, OpenMode::OpenExisting);
        assert!(!config.sync_on_commit);
        assert!(config.encryption_key.is_some());
    }
}
