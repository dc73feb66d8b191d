//! Error types for codex-store
//!
//! Four families matter to callers:
//! - configuration errors are fatal at startup (a broken catalog never runs),
//! - storage errors are recoverable and retried by the flush scheduler,
//! - inconsistency errors refuse the operation and leave state untouched,
//! - not-ready errors are the expected transient state while a player loads.

use thiserror::Error;

use crate::progress::PlayerKey;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// codex-store error types
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed configuration or catalog definition
    #[error("Config error: {0}")]
    Config(String),

    /// Entry key is not of the form `namespace:id`
    #[error("Invalid entry key '{0}': expected lowercase 'namespace:id'")]
    InvalidKey(String),

    /// The same entry key (or namespace) was declared twice
    #[error("Duplicate entry definition: {0}")]
    DuplicateEntry(String),

    /// YAML parse error (config or catalog)
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Storage backend failure (connection, query, file)
    #[error("Storage error: {0}")]
    Storage(String),

    /// A storage call exceeded its deadline
    #[error("Storage call timed out after {0} ms")]
    StorageTimeout(u64),

    /// No pooled connection became available in time
    #[error("Connection pool exhausted: no connection within {0} ms")]
    PoolTimeout(u64),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// SQLite error
    #[cfg(feature = "sqlite")]
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Invariant violation; the operation was refused
    #[error("Inconsistency for player {player}: {detail}\nState was left untouched. Please report this issue.")]
    Inconsistency {
        /// Player whose state was involved
        player: PlayerKey,
        /// What went wrong
        detail: String,
    },

    /// The player's progress is still loading
    #[error("Progress for player {0} is still loading")]
    NotReady(PlayerKey),

    /// The player has no resident progress (not connected)
    #[error("No resident progress for player {0}")]
    NotResident(PlayerKey),

    /// Entry key is not in the current registry
    #[error("Unknown entry: {0}")]
    UnknownEntry(String),

    /// Entry does not allow replay
    #[error("Entry {0} cannot be replayed")]
    ReplayNotAllowed(String),

    /// Replay attempted on a locked entry
    #[error("Entry {0} is not unlocked")]
    NotUnlocked(String),

    /// Background worker pool is gone
    #[error("Worker pool unavailable: {0}")]
    WorkerPool(String),
}

impl Error {
    /// Errors raised while loading configuration or the catalog.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::InvalidKey(_) | Self::DuplicateEntry(_) | Self::Yaml(_)
        )
    }

    /// Recoverable storage failures, retried by the scheduler.
    #[must_use]
    pub fn is_storage(&self) -> bool {
        #[cfg(feature = "sqlite")]
        if matches!(self, Self::Sqlite(_)) {
            return true;
        }
        matches!(
            self,
            Self::Storage(_)
                | Self::StorageTimeout(_)
                | Self::PoolTimeout(_)
                | Self::Io(_)
                | Self::Json(_)
        )
    }

    /// Expected transient state: the player's data is not available yet.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::NotReady(_) | Self::NotResident(_))
    }
}
