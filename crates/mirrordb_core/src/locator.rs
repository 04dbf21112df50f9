//! Database locators.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Where a database lives.
///
/// Parsed from `file:<path>`, a bare path, or `memory:<name>`. Network
/// schemes such as `tcp://host` are recognized and rejected with
/// [`CoreError::UnsupportedScheme`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Locator {
    /// A database file on the local filesystem.
    File(PathBuf),
    /// A named in-process database, shared through an [`Environment`](crate::Environment).
    Memory(String),
}

impl Locator {
    /// Creates a file locator.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Locator::File(path.into())
    }

    /// Creates an in-memory locator.
    pub fn memory(name: impl Into<String>) -> Self {
        Locator::Memory(name.into())
    }

    /// Returns the file path for file locators.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Locator::File(p) => Some(p),
            Locator::Memory(_) => None,
        }
    }

    /// Parses a locator string.
    ///
    /// # Errors
    ///
    /// Returns `InvalidLocator` for empty input and `UnsupportedScheme` for
    /// any scheme other than `file` and `memory`.
    pub fn parse(s: &str) -> CoreResult<Self> {
        if s.is_empty() {
            return Err(CoreError::invalid_locator("empty locator"));
        }
        if let Some(rest) = s.strip_prefix("memory:") {
            if rest.is_empty() {
                return Err(CoreError::invalid_locator("memory locator needs a name"));
            }
            return Ok(Locator::Memory(rest.to_string()));
        }
        if let Some(rest) = s.strip_prefix("file:") {
            let rest = rest.strip_prefix("//").unwrap_or(rest);
            if rest.is_empty() {
                return Err(CoreError::invalid_locator("file locator needs a path"));
            }
            return Ok(Locator::File(PathBuf::from(rest)));
        }
        if let Some((scheme, _)) = s.split_once(':') {
            // A single letter is a drive prefix, not a scheme.
            let is_scheme = scheme.len() > 1
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
            if is_scheme {
                return Err(CoreError::UnsupportedScheme {
                    scheme: scheme.to_string(),
                });
            }
        }
        Ok(Locator::File(PathBuf::from(s)))
    }
}

impl FromStr for Locator {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Locator::parse(s)
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::File(p) => write!(f, "file:{}", p.display()),
            Locator::Memory(name) => write!(f, "memory:{name}"),
        }
    }
}
