//! Storage Backend - durable player progress
//!
//! Provides the system of record for unlocks:
//! - async-first [`ProgressBackend`] trait keyed by player
//! - SQLite rows behind a bounded connection pool (default)
//! - flat-file JSON documents, one per player
//! - in-memory `DashMap` store for tests and throwaway servers
//!
//! Every backend honours the same contract: `save_progress` replaces the
//! player's durable state with exactly the given unlock set (so a retry of
//! the same save is harmless), and `load_progress` returns that set back.
//!
//! # Example
//!
//! ```rust,no_run
//! use codex_store::progress::{PlayerKey, PlayerProgress};
//! use codex_store::storage::{MemoryBackend, ProgressBackend};
//!
//! # async fn example() -> codex_store::Result<()> {
//! let backend = MemoryBackend::new();
//! let player = PlayerKey::new_random();
//!
//! assert!(backend.load_progress(player).await?.is_none());
//! backend.save_progress(player, &PlayerProgress::new()).await?;
//! assert!(backend.load_progress(player).await?.is_some());
//! # Ok(())
//! # }
//! ```

mod json;
mod memory;
#[cfg(feature = "sqlite")]
mod pool;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use json::JsonFileBackend;
pub use memory::MemoryBackend;
pub use crate::config::PoolConfig;
#[cfg(feature = "sqlite")]
pub use pool::{ConnectionPool, PooledConnection};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteBackend;

use std::future::Future;
use std::path::Path;

use tracing::info;

use crate::config::{BackendKind, StorageConfig};
use crate::progress::{PlayerKey, PlayerProgress};
use crate::Result;

/// Per-item outcome of a batch save.
pub type BatchResult = Vec<(PlayerKey, Result<()>)>;

/// Durable persistence keyed by player.
///
/// Implementations are shared across worker tasks (`Arc<B>`), so every
/// method takes `&self` and returned futures are `Send`.
pub trait ProgressBackend: Send + Sync + 'static {
    /// Load a player's progress.
    ///
    /// Returns `None` for a player with no durable record (a new player).
    fn load_progress(
        &self,
        player: PlayerKey,
    ) -> impl Future<Output = Result<Option<PlayerProgress>>> + Send;

    /// Replace the player's durable progress with `progress`.
    ///
    /// Idempotent: saving the same state twice yields the same durable result.
    fn save_progress(
        &self,
        player: PlayerKey,
        progress: &PlayerProgress,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Remove every durable record of the player.
    ///
    /// No-op if the player has no record.
    fn delete_progress(&self, player: PlayerKey) -> impl Future<Output = Result<()>> + Send;

    /// Save several players; each item succeeds or fails on its own.
    ///
    /// Results are returned in input order.
    fn save_batch(
        &self,
        batch: Vec<(PlayerKey, PlayerProgress)>,
    ) -> impl Future<Output = BatchResult> + Send {
        async move {
            let mut results = Vec::with_capacity(batch.len());
            for (player, progress) in &batch {
                results.push((*player, self.save_progress(*player, progress).await));
            }
            results
        }
    }
}

/// Backend chosen at runtime from configuration.
#[derive(Debug)]
pub enum AnyBackend {
    /// In-memory map
    Memory(MemoryBackend),
    /// One JSON document per player
    JsonFile(JsonFileBackend),
    /// Pooled SQLite rows
    #[cfg(feature = "sqlite")]
    Sqlite(SqliteBackend),
}

impl AnyBackend {
    /// Build the backend selected by `config`, resolving relative paths
    /// against `data_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage location cannot be prepared (directory
    /// creation, database open, schema creation).
    pub fn from_config(config: &StorageConfig, data_dir: &Path) -> Result<Self> {
        match config.backend {
            BackendKind::Memory => {
                info!("Using in-memory codex storage (progress is lost on restart)");
                Ok(Self::Memory(MemoryBackend::new()))
            }
            BackendKind::Flatfile => {
                let dir = data_dir.join(&config.flatfile.dir);
                info!(dir = %dir.display(), "Using flat-file codex storage (JSON)");
                Ok(Self::JsonFile(JsonFileBackend::open(dir)?))
            }
            #[cfg(feature = "sqlite")]
            BackendKind::Sqlite => {
                let path = data_dir.join(&config.sql.path);
                info!(path = %path.display(), "Using SQLite codex storage");
                Ok(Self::Sqlite(SqliteBackend::open(path, config.sql.pool.clone())?))
            }
            #[cfg(not(feature = "sqlite"))]
            BackendKind::Sqlite => {
                let dir = data_dir.join(&config.flatfile.dir);
                tracing::warn!(
                    dir = %dir.display(),
                    "SQLite support not compiled in, falling back to flat-file storage"
                );
                Ok(Self::JsonFile(JsonFileBackend::open(dir)?))
            }
        }
    }
}

impl ProgressBackend for AnyBackend {
    async fn load_progress(&self, player: PlayerKey) -> Result<Option<PlayerProgress>> {
        match self {
            Self::Memory(b) => b.load_progress(player).await,
            Self::JsonFile(b) => b.load_progress(player).await,
            #[cfg(feature = "sqlite")]
            Self::Sqlite(b) => b.load_progress(player).await,
        }
    }

    async fn save_progress(&self, player: PlayerKey, progress: &PlayerProgress) -> Result<()> {
        match self {
            Self::Memory(b) => b.save_progress(player, progress).await,
            Self::JsonFile(b) => b.save_progress(player, progress).await,
            #[cfg(feature = "sqlite")]
            Self::Sqlite(b) => b.save_progress(player, progress).await,
        }
    }

    async fn delete_progress(&self, player: PlayerKey) -> Result<()> {
        match self {
            Self::Memory(b) => b.delete_progress(player).await,
            Self::JsonFile(b) => b.delete_progress(player).await,
            #[cfg(feature = "sqlite")]
            Self::Sqlite(b) => b.delete_progress(player).await,
        }
    }

    async fn save_batch(&self, batch: Vec<(PlayerKey, PlayerProgress)>) -> BatchResult {
        match self {
            Self::Memory(b) => b.save_batch(batch).await,
            Self::JsonFile(b) => b.save_batch(batch).await,
            #[cfg(feature = "sqlite")]
            Self::Sqlite(b) => b.save_batch(batch).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::now_millis;
    use crate::registry::EntryKey;
    use std::collections::HashSet;

    fn progress_with(keys: &[&str]) -> PlayerProgress {
        let now = now_millis();
        let mut progress = PlayerProgress::new();
        for raw in keys {
            progress.insert(EntryKey::parse(raw).unwrap(), now);
        }
        progress
    }

    fn key_set(progress: &PlayerProgress) -> HashSet<String> {
        progress.keys().map(ToString::to_string).collect()
    }

    async fn exercise_contract<B: ProgressBackend>(backend: &B) {
        let p1 = PlayerKey::new_random();
        let p2 = PlayerKey::new_random();

        assert!(backend.load_progress(p1).await.unwrap().is_none());

        let first = progress_with(&["notes:a", "notes:b", "relics:bell"]);
        backend.save_progress(p1, &first).await.unwrap();
        // Re-saving is harmless
        backend.save_progress(p1, &first).await.unwrap();
        let loaded = backend.load_progress(p1).await.unwrap().unwrap();
        assert_eq!(key_set(&loaded), key_set(&first));

        // A shrinking save replaces, never merges
        let second = progress_with(&["notes:b"]);
        backend.save_progress(p1, &second).await.unwrap();
        let loaded = backend.load_progress(p1).await.unwrap().unwrap();
        assert_eq!(key_set(&loaded), key_set(&second));

        let results = backend
            .save_batch(vec![(p1, first.clone()), (p2, second.clone())])
            .await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|(_, r)| r.is_ok()));
        assert_eq!(results[0].0, p1);
        assert_eq!(results[1].0, p2);

        backend.delete_progress(p1).await.unwrap();
        assert!(backend.load_progress(p1).await.unwrap().is_none());
        assert!(backend.load_progress(p2).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_memory_backend_contract() {
        exercise_contract(&MemoryBackend::new()).await;
    }

    #[tokio::test]
    async fn test_json_backend_contract() {
        let dir = tempfile::tempdir().unwrap();
        exercise_contract(&JsonFileBackend::open(dir.path()).unwrap()).await;
    }

    #[cfg(feature = "sqlite")]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_sqlite_backend_contract() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SqliteBackend::open(dir.path().join("codex.db"), PoolConfig::default()).unwrap();
        exercise_contract(&backend).await;
    }

    #[tokio::test]
    async fn test_any_backend_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = StorageConfig::default();
        config.backend = BackendKind::Flatfile;
        let backend = AnyBackend::from_config(&config, dir.path()).unwrap();
        assert!(matches!(backend, AnyBackend::JsonFile(_)));
        exercise_contract(&backend).await;
    }
}
