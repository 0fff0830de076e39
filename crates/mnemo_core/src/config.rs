//! Store configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for opening a [`DatomStore`](crate::DatomStore).
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory holding the store; `None` keeps everything in memory.
    pub path: Option<PathBuf>,

    /// How long `PendingTransaction::wait` blocks before reporting a timeout.
    pub transaction_timeout: Duration,

    /// Whether to fsync the commit log on every commit (safer but slower).
    pub sync_on_commit: bool,

    /// Whether to create the directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Number of recent revisions kept for polling.
    pub revision_history: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            transaction_timeout: Duration::from_secs(10),
            sync_on_commit: true,
            create_if_missing: true,
            revision_history: 64,
        }
    }
}

impl StoreConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the store directory.
    #[must_use]
    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Sets the caller-side deadline for transactions.
    #[must_use]
    pub fn transaction_timeout(mut self, timeout: Duration) -> Self {
        self.transaction_timeout = timeout;
        self
    }

    /// Sets whether to fsync on every commit.
    #[must_use]
    pub fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets whether to create the directory if missing.
    #[must_use]
    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets how many recent revisions are kept for polling.
    #[must_use]
    pub fn revision_history(mut self, count: usize) -> Self {
        self.revision_history = count;
        self
    }
}
