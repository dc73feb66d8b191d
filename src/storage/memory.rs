//! In-memory progress backend using `DashMap`.
//!
//! Data is lost on process restart. Used by tests and by servers that opt
//! into the `memory` storage backend.

use super::ProgressBackend;
use crate::progress::{PlayerKey, PlayerProgress};
use crate::Result;
use dashmap::DashMap;

/// In-memory progress store using a lock-free concurrent hashmap.
///
/// # Example
///
/// ```rust
/// use codex_store::progress::{PlayerKey, PlayerProgress};
/// use codex_store::storage::{MemoryBackend, ProgressBackend};
///
/// # async fn example() -> codex_store::Result<()> {
/// let store = MemoryBackend::new();
/// let player = PlayerKey::new_random();
/// store.save_progress(player, &PlayerProgress::new()).await?;
/// assert_eq!(store.len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct MemoryBackend {
    store: DashMap<PlayerKey, PlayerProgress>,
}

impl MemoryBackend {
    /// Create a new in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self {
            store: DashMap::new(),
        }
    }

    /// Create with pre-allocated capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            store: DashMap::with_capacity(capacity),
        }
    }

    /// Number of players with a durable record.
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// True if no player has a durable record.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Synchronous peek at a stored record (inspection/testing).
    #[must_use]
    pub fn snapshot(&self, player: PlayerKey) -> Option<PlayerProgress> {
        self.store.get(&player).map(|v| v.value().clone())
    }

    /// Drop every record.
    pub fn clear(&self) {
        self.store.clear();
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressBackend for MemoryBackend {
    async fn load_progress(&self, player: PlayerKey) -> Result<Option<PlayerProgress>> {
        Ok(self.snapshot(player))
    }

    async fn save_progress(&self, player: PlayerKey, progress: &PlayerProgress) -> Result<()> {
        self.store.insert(player, progress.clone());
        Ok(())
    }

    async fn delete_progress(&self, player: PlayerKey) -> Result<()> {
        self.store.remove(&player);
        Ok(())
    }
}
