//! Progress Store - the facade collaborators talk to
//!
//! [`ProgressStore`] composes the registry, the cache and the flush
//! scheduler. It is owned by the main context: every method takes `&self`
//! or `&mut self` and is either a synchronous cache operation or a
//! non-blocking submission to the worker pool. Only [`ProgressStore::settle`]
//! and [`ProgressStore::shutdown`] block, and both are bounded.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use codex_store::config::FlushConfig;
//! use codex_store::diagnostics::DiagnosticChannel;
//! use codex_store::progress::PlayerKey;
//! use codex_store::registry::{CategoryDefinition, EntryDefinition, EntryKey, Registry, RegistryHandle};
//! use codex_store::storage::MemoryBackend;
//! use codex_store::ProgressStore;
//!
//! # fn main() -> codex_store::Result<()> {
//! let catalog = Registry::load(vec![
//!     CategoryDefinition::new("notes").with_entry(EntryDefinition::new("first")),
//! ])?;
//! let mut store = ProgressStore::new(
//!     Arc::new(RegistryHandle::new(catalog)),
//!     MemoryBackend::new(),
//!     FlushConfig::default(),
//!     DiagnosticChannel::new(),
//! )?;
//!
//! let player = PlayerKey::new_random();
//! store.on_player_connect(player);
//! store.settle(Duration::from_secs(1));
//!
//! let first = EntryKey::parse("notes:first")?;
//! assert!(store.unlock(player, &first)?.is_new());
//! assert!(store.is_unlocked(player, &first)?);
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::cache::ProgressCache;
use crate::config::{CodexConfig, FlushConfig};
use crate::diagnostics::{Diagnostic, DiagnosticChannel};
use crate::progress::{now_millis, PlayerKey, UnlockResult};
use crate::registry::{Entry, EntryKey, Registry, RegistryHandle};
use crate::scheduler::{FlushScheduler, ShutdownReport};
use crate::storage::{AnyBackend, ProgressBackend};
use crate::{Error, Result};

/// Unlocked vs. total entries of a category (or the whole catalog).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CategoryProgress {
    /// Unlocked entries that are still in the catalog
    pub unlocked: usize,
    /// Entries in the catalog
    pub total: usize,
}

impl CategoryProgress {
    /// Whole-number completion percentage (0 for an empty category).
    #[must_use]
    pub const fn percent(&self) -> usize {
        if self.total == 0 {
            0
        } else {
            self.unlocked * 100 / self.total
        }
    }

    /// True when every entry is unlocked (and there is at least one).
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.total > 0 && self.unlocked == self.total
    }
}

/// Whether a player's progress can be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Not connected (or already evicted)
    Offline,
    /// Load in progress; reads return `NotReady`
    Loading,
    /// Resident; reads are served from the cache
    Ready,
}

/// The codex progress store.
pub struct ProgressStore<B: ProgressBackend = AnyBackend> {
    registry: Arc<RegistryHandle>,
    cache: ProgressCache,
    scheduler: FlushScheduler<B>,
    diagnostics: DiagnosticChannel,
    catalog_dir: Option<PathBuf>,
}

impl<B: ProgressBackend> std::fmt::Debug for ProgressStore<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressStore")
            .field("registry", &self.registry)
            .field("resident", &self.cache.resident_count())
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

impl ProgressStore<AnyBackend> {
    /// Build everything from configuration: catalog, backend, worker pool.
    ///
    /// A missing catalog directory is created and yields an empty catalog.
    ///
    /// # Errors
    ///
    /// Returns a config error for a broken catalog, or a storage error if
    /// the backend cannot be opened.
    pub fn open(config: &CodexConfig) -> Result<Self> {
        config.validate()?;

        let catalog_dir = config.catalog_path();
        let registry = load_catalog(&catalog_dir)?;
        let backend = AnyBackend::from_config(&config.storage, &config.data_dir)?;

        Ok(Self::new(
            Arc::new(RegistryHandle::new(registry)),
            backend,
            config.flush.clone(),
            DiagnosticChannel::new(),
        )?
        .with_catalog_dir(catalog_dir))
    }
}

fn load_catalog(dir: &Path) -> Result<Registry> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
        warn!(dir = %dir.display(), "Catalog directory was missing, starting with an empty catalog");
        return Ok(Registry::empty());
    }
    Registry::load_dir(dir)
}

impl<B: ProgressBackend> ProgressStore<B> {
    /// Compose a store from its parts.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush configuration is invalid or the worker
    /// pool cannot start.
    pub fn new(
        registry: Arc<RegistryHandle>,
        backend: B,
        flush: FlushConfig,
        diagnostics: DiagnosticChannel,
    ) -> Result<Self> {
        let scheduler = FlushScheduler::new(Arc::new(backend), flush, diagnostics.clone())?;
        Ok(Self {
            registry,
            cache: ProgressCache::new(),
            scheduler,
            diagnostics,
            catalog_dir: None,
        })
    }

    /// Remember the directory [`ProgressStore::reload_catalog`] reads.
    #[must_use]
    pub fn with_catalog_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.catalog_dir = Some(dir.into());
        self
    }

    /// Catalog directory, if the store knows one.
    #[must_use]
    pub fn catalog_dir(&self) -> Option<&Path> {
        self.catalog_dir.as_deref()
    }

    /// O(1) unlock check.
    ///
    /// # Errors
    ///
    /// [`Error::NotReady`] while loading, [`Error::NotResident`] if the
    /// player is not connected.
    pub fn is_unlocked(&self, player: PlayerKey, key: &EntryKey) -> Result<bool> {
        self.cache.is_unlocked(player, key)
    }

    /// Unlock an entry. Idempotent.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownEntry`] if `key` is not in the current catalog, or a
    /// not-ready error.
    pub fn unlock(&mut self, player: PlayerKey, key: &EntryKey) -> Result<UnlockResult> {
        if !self.registry.load().contains(key) {
            return Err(Error::UnknownEntry(key.to_string()));
        }
        let result = self.cache.unlock(player, key, now_millis())?;
        if result.is_new() {
            debug!(player = %player, entry = %key, "Entry unlocked");
        }
        Ok(result)
    }

    /// Record a replay of an unlocked, replayable entry.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownEntry`], [`Error::ReplayNotAllowed`],
    /// [`Error::NotUnlocked`], or a not-ready error.
    pub fn replay(&mut self, player: PlayerKey, key: &EntryKey) -> Result<()> {
        let registry = self.registry.load();
        let entry = registry
            .get(key)
            .ok_or_else(|| Error::UnknownEntry(key.to_string()))?;
        if !entry.allow_replay() {
            return Err(Error::ReplayNotAllowed(key.to_string()));
        }
        self.cache.replay(player, key, now_millis())?;
        debug!(player = %player, entry = %key, "Entry replayed");
        Ok(())
    }

    /// Clear every unlock of the player; returns how many were removed.
    ///
    /// # Errors
    ///
    /// A not-ready error if the player is not resident.
    pub fn reset(&mut self, player: PlayerKey) -> Result<usize> {
        let removed = self.cache.reset(player, now_millis())?;
        info!(player = %player, removed, "Codex progress reset");
        Ok(removed)
    }

    /// Unlocked entries in catalog order. Unlocked ids no longer in the
    /// catalog are skipped.
    ///
    /// # Errors
    ///
    /// A not-ready error if the player is not resident.
    pub fn get_snapshot(&self, player: PlayerKey) -> Result<Vec<Arc<Entry>>> {
        let progress = self.cache.get(player)?;
        let registry = self.registry.load();
        Ok(registry
            .all()
            .iter()
            .filter(|entry| progress.is_unlocked(entry.key()))
            .cloned()
            .collect())
    }

    /// [`ProgressStore::get_snapshot`] restricted to one namespace. An
    /// unknown namespace yields an empty list.
    ///
    /// # Errors
    ///
    /// A not-ready error if the player is not resident.
    pub fn snapshot_in(&self, player: PlayerKey, namespace: &str) -> Result<Vec<Arc<Entry>>> {
        let progress = self.cache.get(player)?;
        let registry = self.registry.load();
        Ok(registry
            .category(namespace)
            .map(|category| {
                category
                    .entries()
                    .iter()
                    .filter(|entry| progress.is_unlocked(entry.key()))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Unlocked/total counts for one namespace.
    ///
    /// # Errors
    ///
    /// A not-ready error if the player is not resident.
    pub fn progress(&self, player: PlayerKey, namespace: &str) -> Result<CategoryProgress> {
        let progress = self.cache.get(player)?;
        let registry = self.registry.load();
        Ok(registry
            .category(namespace)
            .map(|category| CategoryProgress {
                unlocked: category
                    .entries()
                    .iter()
                    .filter(|entry| progress.is_unlocked(entry.key()))
                    .count(),
                total: category.len(),
            })
            .unwrap_or_default())
    }

    /// Unlocked/total counts over the whole catalog.
    ///
    /// # Errors
    ///
    /// A not-ready error if the player is not resident.
    pub fn overall_progress(&self, player: PlayerKey) -> Result<CategoryProgress> {
        let progress = self.cache.get(player)?;
        let registry = self.registry.load();
        Ok(CategoryProgress {
            unlocked: registry
                .all()
                .iter()
                .filter(|entry| progress.is_unlocked(entry.key()))
                .count(),
            total: registry.len(),
        })
    }

    /// Where the player's progress stands.
    #[must_use]
    pub fn readiness(&self, player: PlayerKey) -> Readiness {
        if self.cache.is_resident(player) {
            Readiness::Ready
        } else if self.cache.is_pending(player) {
            Readiness::Loading
        } else {
            Readiness::Offline
        }
    }

    /// True if the player has changes not yet confirmed durable.
    #[must_use]
    pub fn is_dirty(&self, player: PlayerKey) -> bool {
        self.cache.is_dirty(player)
    }

    /// Number of players with resident progress.
    #[must_use]
    pub fn resident_count(&self) -> usize {
        self.cache.resident_count()
    }

    /// Number of players with unflushed changes.
    #[must_use]
    pub fn dirty_count(&self) -> usize {
        self.cache.dirty_players().len()
    }

    /// Consecutive failed saves for the player.
    #[must_use]
    pub fn save_failures(&self, player: PlayerKey) -> u32 {
        self.scheduler.failures(player)
    }

    /// Start loading a joining player.
    pub fn on_player_connect(&mut self, player: PlayerKey) {
        self.scheduler.connect(&mut self.cache, player);
    }

    /// Save (if needed) and evict a leaving player.
    pub fn on_player_disconnect(&mut self, player: PlayerKey) {
        self.scheduler.disconnect(&mut self.cache, player);
    }

    /// Apply finished background work; sweeps when the interval elapsed.
    /// Call once per server tick.
    pub fn tick(&mut self) {
        self.scheduler.tick(&mut self.cache);
    }

    /// Sweep every dirty player now.
    pub fn flush_now(&mut self) {
        self.scheduler.flush_now(&mut self.cache);
    }

    /// Block until no background operation is in flight, at most `timeout`.
    /// Returns `true` if fully settled.
    ///
    /// Must not be called from inside an async runtime.
    pub fn settle(&mut self, timeout: Duration) -> bool {
        self.scheduler.settle(&mut self.cache, timeout)
    }

    /// Drain dirty progress within `grace` and report whatever could not be
    /// saved.
    ///
    /// Must not be called from inside an async runtime.
    pub fn shutdown(&mut self, grace: Duration) -> ShutdownReport {
        self.scheduler.shutdown(&mut self.cache, grace)
    }

    /// [`ProgressStore::shutdown`] with the configured grace period.
    pub fn shutdown_default(&mut self) -> ShutdownReport {
        let grace = self.scheduler.config().shutdown_grace();
        self.shutdown(grace)
    }

    /// Snapshot of the current catalog.
    #[must_use]
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.load()
    }

    /// Shared registry handle.
    #[must_use]
    pub const fn registry_handle(&self) -> &Arc<RegistryHandle> {
        &self.registry
    }

    /// Swap in a new catalog; returns the previous one.
    ///
    /// Unlocks of entries missing from the new catalog stay stored and are
    /// simply not shown.
    pub fn reload_registry(&self, registry: Registry) -> Arc<Registry> {
        let previous = self.registry.swap(registry);
        info!(
            previous = previous.len(),
            current = self.registry.load().len(),
            "Codex catalog swapped"
        );
        previous
    }

    /// Rebuild the catalog from a directory; the old one stays on failure.
    ///
    /// # Errors
    ///
    /// Any error from [`Registry::load_dir`].
    pub fn reload_registry_from_dir<P: AsRef<Path>>(&self, dir: P) -> Result<Arc<Registry>> {
        self.registry.reload_from_dir(dir)
    }

    /// Rebuild the catalog from the configured catalog directory.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if no catalog directory is known, otherwise any
    /// error from [`Registry::load_dir`]. The old catalog stays on failure.
    pub fn reload_catalog(&self) -> Result<Arc<Registry>> {
        let dir = self
            .catalog_dir
            .as_deref()
            .ok_or_else(|| Error::Config("no catalog directory configured".into()))?;
        self.reload_registry_from_dir(dir)
    }

    /// Receive persistence diagnostics from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Diagnostic> {
        self.diagnostics.subscribe()
    }

    /// Shared backend.
    #[must_use]
    pub const fn backend(&self) -> &Arc<B> {
        self.scheduler.backend()
    }
}
