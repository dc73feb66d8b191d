//! Progress Cache - resident player progress with dirty tracking
//!
//! The cache is the single owner of every resident [`PlayerProgress`] and the
//! only code that mutates one. It is driven from the main context only
//! (`&mut self`), so it needs no internal locking, and it never performs I/O:
//! loading and flushing are the scheduler's job.
//!
//! ## Dirty tracking
//!
//! Each resident player carries a [`DirtyMarker`] made of two counters.
//! Every mutation bumps `version`; a confirmed write acknowledges the version
//! it wrote. The player is dirty while `version > flushed`, so a mutation
//! made while a save is in flight keeps the player dirty after that save is
//! acknowledged.

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap as HashMap;

use crate::progress::{PlayerKey, PlayerProgress, UnlockEvent, UnlockResult};
use crate::registry::EntryKey;
use crate::{Error, Result};

/// Unflushed-change marker for one player.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirtyMarker {
    version: u64,
    flushed: u64,
}

impl DirtyMarker {
    /// True while a change has not been confirmed durable.
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.version > self.flushed
    }

    /// Version of the latest change.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    fn bump(&mut self) {
        self.version += 1;
    }

    fn acknowledge(&mut self, version: u64) {
        self.flushed = self.flushed.max(version.min(self.version));
    }
}

#[derive(Debug)]
enum Slot {
    Pending,
    Resident {
        progress: PlayerProgress,
        dirty: DirtyMarker,
    },
}

/// Dirty player captured for a flush.
#[derive(Debug, Clone)]
pub struct DirtySnapshot {
    /// Player
    pub player: PlayerKey,
    /// Marker version the snapshot corresponds to
    pub version: u64,
    /// Copy of the progress at that version
    pub progress: PlayerProgress,
}

/// In-memory mapping of player to resident progress.
#[derive(Debug, Default)]
pub struct ProgressCache {
    slots: HashMap<PlayerKey, Slot>,
}

impl ProgressCache {
    /// Empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a pending slot for a player whose load is about to start.
    ///
    /// Returns `false` if the player already has a slot (pending or
    /// resident), in which case nothing changes.
    pub fn begin_load(&mut self, player: PlayerKey) -> bool {
        if self.slots.contains_key(&player) {
            return false;
        }
        self.slots.insert(player, Slot::Pending);
        true
    }

    /// Make a pending player resident with freshly loaded progress.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Inconsistency`] if the player is not pending; the
    /// existing state is left untouched.
    pub fn install(&mut self, player: PlayerKey, progress: PlayerProgress) -> Result<()> {
        let Some(slot) = self.slots.get_mut(&player) else {
            return Err(Error::Inconsistency {
                player,
                detail: "load completed for a player with no pending slot".into(),
            });
        };
        if matches!(slot, Slot::Resident { .. }) {
            return Err(Error::Inconsistency {
                player,
                detail: "load completed for a player that is already resident".into(),
            });
        }
        *slot = Slot::Resident {
            progress,
            dirty: DirtyMarker::default(),
        };
        Ok(())
    }

    /// Drop a pending slot (player left before the load finished).
    ///
    /// Returns `true` if a pending slot was removed.
    pub fn discard_pending(&mut self, player: PlayerKey) -> bool {
        if matches!(self.slots.get(&player), Some(Slot::Pending)) {
            self.slots.remove(&player);
            return true;
        }
        false
    }

    /// Resident progress.
    ///
    /// # Errors
    ///
    /// [`Error::NotReady`] while loading, [`Error::NotResident`] if absent.
    pub fn get(&self, player: PlayerKey) -> Result<&PlayerProgress> {
        match self.slots.get(&player) {
            Some(Slot::Resident { progress, .. }) => Ok(progress),
            Some(Slot::Pending) => Err(Error::NotReady(player)),
            None => Err(Error::NotResident(player)),
        }
    }

    /// O(1) membership check.
    ///
    /// # Errors
    ///
    /// Same as [`ProgressCache::get`].
    pub fn is_unlocked(&self, player: PlayerKey, key: &EntryKey) -> Result<bool> {
        self.get(player).map(|progress| progress.is_unlocked(key))
    }

    /// Unlock `key`. Idempotent: a second call reports
    /// [`UnlockResult::AlreadyUnlocked`] and leaves the marker alone.
    ///
    /// # Errors
    ///
    /// Same as [`ProgressCache::get`].
    pub fn unlock(
        &mut self,
        player: PlayerKey,
        key: &EntryKey,
        at: DateTime<Utc>,
    ) -> Result<UnlockResult> {
        let (progress, dirty) = self.resident_mut(player)?;
        if !progress.insert(key.clone(), at) {
            return Ok(UnlockResult::AlreadyUnlocked);
        }
        dirty.bump();
        Ok(UnlockResult::NewlyUnlocked(UnlockEvent {
            player,
            entry: key.clone(),
            at,
        }))
    }

    /// Record a replay of an unlocked entry.
    ///
    /// # Errors
    ///
    /// [`Error::NotUnlocked`] if the entry is locked, otherwise same as
    /// [`ProgressCache::get`].
    pub fn replay(&mut self, player: PlayerKey, key: &EntryKey, at: DateTime<Utc>) -> Result<()> {
        let (progress, dirty) = self.resident_mut(player)?;
        if !progress.mark_replay(key, at) {
            return Err(Error::NotUnlocked(key.to_string()));
        }
        dirty.bump();
        Ok(())
    }

    /// Clear every unlock for `player`; returns how many were removed.
    ///
    /// # Errors
    ///
    /// Same as [`ProgressCache::get`].
    pub fn reset(&mut self, player: PlayerKey, at: DateTime<Utc>) -> Result<usize> {
        let (progress, dirty) = self.resident_mut(player)?;
        let removed = progress.clear(at);
        if removed > 0 {
            dirty.bump();
        }
        Ok(removed)
    }

    /// Dirty marker of a resident player.
    #[must_use]
    pub fn marker(&self, player: PlayerKey) -> Option<DirtyMarker> {
        match self.slots.get(&player) {
            Some(Slot::Resident { dirty, .. }) => Some(*dirty),
            _ => None,
        }
    }

    /// True if `player` is resident with unflushed changes.
    #[must_use]
    pub fn is_dirty(&self, player: PlayerKey) -> bool {
        self.marker(player).is_some_and(|m| m.is_dirty())
    }

    /// Snapshot of one dirty player, if dirty.
    #[must_use]
    pub fn dirty_snapshot(&self, player: PlayerKey) -> Option<DirtySnapshot> {
        match self.slots.get(&player) {
            Some(Slot::Resident { progress, dirty }) if dirty.is_dirty() => Some(DirtySnapshot {
                player,
                version: dirty.version(),
                progress: progress.clone(),
            }),
            _ => None,
        }
    }

    /// Snapshots of every dirty resident player.
    #[must_use]
    pub fn dirty_snapshots(&self) -> Vec<DirtySnapshot> {
        self.slots
            .keys()
            .filter_map(|player| self.dirty_snapshot(*player))
            .collect()
    }

    /// Dirty resident players.
    #[must_use]
    pub fn dirty_players(&self) -> Vec<PlayerKey> {
        self.slots
            .iter()
            .filter_map(|(player, slot)| match slot {
                Slot::Resident { dirty, .. } if dirty.is_dirty() => Some(*player),
                _ => None,
            })
            .collect()
    }

    /// Confirm that `version` of `player`'s progress is durable.
    ///
    /// Returns `true` if the player is now clean. A no-op for players that
    /// are no longer resident.
    pub fn acknowledge(&mut self, player: PlayerKey, version: u64) -> bool {
        match self.slots.get_mut(&player) {
            Some(Slot::Resident { dirty, .. }) => {
                dirty.acknowledge(version);
                !dirty.is_dirty()
            }
            _ => false,
        }
    }

    /// Remove a clean resident player.
    ///
    /// # Errors
    ///
    /// [`Error::Inconsistency`] if the player still has unflushed changes
    /// (nothing is removed), [`Error::NotReady`] / [`Error::NotResident`]
    /// otherwise.
    pub fn evict(&mut self, player: PlayerKey) -> Result<PlayerProgress> {
        let marker = match self.slots.get(&player) {
            Some(Slot::Resident { dirty, .. }) => *dirty,
            Some(Slot::Pending) => return Err(Error::NotReady(player)),
            None => return Err(Error::NotResident(player)),
        };
        if marker.is_dirty() {
            return Err(Error::Inconsistency {
                player,
                detail: format!(
                    "eviction refused: version {} not yet flushed",
                    marker.version()
                ),
            });
        }
        match self.slots.remove(&player) {
            Some(Slot::Resident { progress, .. }) => Ok(progress),
            _ => Err(Error::NotResident(player)),
        }
    }

    /// True if the player has resident progress.
    #[must_use]
    pub fn is_resident(&self, player: PlayerKey) -> bool {
        matches!(self.slots.get(&player), Some(Slot::Resident { .. }))
    }

    /// True if the player's load is pending.
    #[must_use]
    pub fn is_pending(&self, player: PlayerKey) -> bool {
        matches!(self.slots.get(&player), Some(Slot::Pending))
    }

    /// Pending players.
    #[must_use]
    pub fn pending_players(&self) -> Vec<PlayerKey> {
        self.slots
            .iter()
            .filter_map(|(player, slot)| matches!(slot, Slot::Pending).then_some(*player))
            .collect()
    }

    /// Number of resident players.
    #[must_use]
    pub fn resident_count(&self) -> usize {
        self.slots
            .values()
            .filter(|slot| matches!(slot, Slot::Resident { .. }))
            .count()
    }

    fn resident_mut(&mut self, player: PlayerKey) -> Result<(&mut PlayerProgress, &mut DirtyMarker)> {
        match self.slots.get_mut(&player) {
            Some(Slot::Resident { progress, dirty }) => Ok((progress, dirty)),
            Some(Slot::Pending) => Err(Error::NotReady(player)),
            None => Err(Error::NotResident(player)),
        }
    }
}
