//! Flush Scheduler - background loads and saves
//!
//! All storage I/O runs on a dedicated multi-thread tokio runtime (the
//! worker pool). Finished operations come back as completions over an mpsc
//! channel and are applied to the cache only when the main context calls
//! [`FlushScheduler::tick`], [`FlushScheduler::flush_now`],
//! [`FlushScheduler::settle`] or [`FlushScheduler::shutdown`].
//!
//! Per player at most one operation (load or save) is in flight. Sweeps
//! skip busy players; a disconnect waits for the in-flight save before
//! deciding whether another save is needed and whether the player can be
//! evicted.
//!
//! A save that exceeds the storage timeout is reported as a failed attempt
//! straight away, but the player stays busy until the write itself returns.
//! A late write therefore never lands after a newer save of the same player.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cache::ProgressCache;
use crate::config::FlushConfig;
use crate::diagnostics::{Diagnostic, DiagnosticChannel};
use crate::progress::{PlayerKey, PlayerProgress};
use crate::storage::{BatchResult, ProgressBackend};
use crate::{Error, Result};

/// Finished background operation, applied on the main context.
#[derive(Debug)]
enum Completion {
    Loaded {
        player: PlayerKey,
        generation: u64,
        result: Result<Option<PlayerProgress>>,
    },
    Saved {
        results: Vec<(PlayerKey, u64, Result<()>)>,
        phase: SavePhase,
    },
}

/// Where a batch save stands when its completion is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SavePhase {
    /// The backend returned within the storage timeout
    Finished,
    /// The timeout fired; the write is still running and the players stay busy
    Expired,
    /// The write behind an earlier `Expired` completion has now returned
    LateFinished,
}

#[derive(Debug, Default)]
struct PlayerState {
    generation: u64,
    in_flight: bool,
    leaving: bool,
    load_failed: bool,
    /// A newer load is wanted once the stale one in flight returns
    reload: bool,
    failures: u32,
    escalated: bool,
}

/// Outcome of [`FlushScheduler::shutdown`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Players confirmed durable during shutdown
    pub flushed: usize,
    /// Players still dirty when shutdown gave up
    pub unsaved: Vec<PlayerKey>,
    /// Time spent draining
    pub elapsed: Duration,
}

impl ShutdownReport {
    /// True if every dirty player was saved.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.unsaved.is_empty()
    }
}

/// Drives loads and flushes for a [`ProgressCache`] against a backend.
pub struct FlushScheduler<B: ProgressBackend> {
    backend: Arc<B>,
    runtime: Runtime,
    tx: mpsc::UnboundedSender<Completion>,
    rx: mpsc::UnboundedReceiver<Completion>,
    players: HashMap<PlayerKey, PlayerState>,
    outstanding: usize,
    last_sweep: Instant,
    config: FlushConfig,
    diagnostics: DiagnosticChannel,
}

impl<B: ProgressBackend> std::fmt::Debug for FlushScheduler<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlushScheduler")
            .field("tracked_players", &self.players.len())
            .field("outstanding", &self.outstanding)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<B: ProgressBackend> FlushScheduler<B> {
    /// Start the worker pool.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for invalid limits, or
    /// [`Error::WorkerPool`] if the runtime cannot be built.
    pub fn new(backend: Arc<B>, config: FlushConfig, diagnostics: DiagnosticChannel) -> Result<Self> {
        config.validate()?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.worker_threads)
            .thread_name("codex-storage")
            .enable_all()
            .build()
            .map_err(|e| Error::WorkerPool(format!("failed to start storage runtime: {e}")))?;
        let (tx, rx) = mpsc::unbounded_channel();

        info!(
            worker_threads = config.worker_threads,
            interval_ms = config.interval_ms,
            max_batch_size = config.max_batch_size,
            "Flush scheduler started"
        );

        Ok(Self {
            backend,
            runtime,
            tx,
            rx,
            players: HashMap::default(),
            outstanding: 0,
            last_sweep: Instant::now(),
            config,
            diagnostics,
        })
    }

    /// Shared backend.
    #[must_use]
    pub const fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Active tuning.
    #[must_use]
    pub const fn config(&self) -> &FlushConfig {
        &self.config
    }

    /// Background operations not yet applied.
    #[must_use]
    pub const fn outstanding(&self) -> usize {
        self.outstanding
    }

    /// True while the player is disconnecting and waiting on a save.
    #[must_use]
    pub fn is_leaving(&self, player: PlayerKey) -> bool {
        self.players.get(&player).is_some_and(|s| s.leaving)
    }

    /// Consecutive save failures for the player.
    #[must_use]
    pub fn failures(&self, player: PlayerKey) -> u32 {
        self.players.get(&player).map_or(0, |s| s.failures)
    }

    /// Player joined: start loading, or cancel a pending eviction.
    pub fn connect(&mut self, cache: &mut ProgressCache, player: PlayerKey) {
        let state = self.players.entry(player).or_default();
        if state.leaving {
            state.leaving = false;
            debug!(player = %player, "Reconnected while leaving, keeping resident progress");
            return;
        }
        if !cache.begin_load(player) {
            return;
        }

        state.generation += 1;
        state.load_failed = false;
        if state.in_flight {
            // The stale load still in flight triggers the fresh one
            state.reload = true;
            return;
        }
        let generation = state.generation;
        self.submit_load(player, generation);
    }

    /// Player left: save if needed, evict once clean.
    pub fn disconnect(&mut self, cache: &mut ProgressCache, player: PlayerKey) {
        if cache.discard_pending(player) {
            if let Some(state) = self.players.get_mut(&player) {
                state.generation += 1;
                state.reload = false;
                if !state.in_flight {
                    self.players.remove(&player);
                }
            }
            debug!(player = %player, "Left before load completed");
            return;
        }
        if !cache.is_resident(player) {
            return;
        }

        let state = self.players.entry(player).or_default();
        state.leaving = true;
        if state.in_flight {
            return;
        }
        self.finish_leave(cache, player);
    }

    /// Apply finished work and run a sweep if the interval elapsed.
    pub fn tick(&mut self, cache: &mut ProgressCache) {
        self.drain(cache);
        if self.last_sweep.elapsed() >= self.config.interval() {
            self.sweep(cache);
        }
    }

    /// Apply finished work and sweep immediately.
    pub fn flush_now(&mut self, cache: &mut ProgressCache) {
        self.drain(cache);
        self.sweep(cache);
    }

    /// Block until nothing is in flight or `timeout` passes, applying
    /// completions as they arrive. Returns `true` if fully settled.
    ///
    /// Must not be called from inside an async runtime.
    pub fn settle(&mut self, cache: &mut ProgressCache, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.drain(cache);
            if self.outstanding == 0 {
                return true;
            }
            if !self.wait_one(cache, deadline) {
                return false;
            }
        }
    }

    /// Drain every dirty player within `grace`, giving each at most
    /// `max_retries` attempts, and report whoever is left.
    ///
    /// Must not be called from inside an async runtime.
    pub fn shutdown(&mut self, cache: &mut ProgressCache, grace: Duration) -> ShutdownReport {
        let started = Instant::now();
        let deadline = started + grace;
        let initially_dirty: HashSet<PlayerKey> = cache.dirty_players().into_iter().collect();
        let mut attempts: HashMap<PlayerKey, u32> = HashMap::default();

        info!(dirty = initially_dirty.len(), grace_ms = grace.as_millis(), "Draining progress for shutdown");

        loop {
            self.drain(cache);

            let ready: Vec<PlayerKey> = cache
                .dirty_players()
                .into_iter()
                .filter(|p| !self.players.get(p).is_some_and(|s| s.in_flight))
                .filter(|p| attempts.get(p).copied().unwrap_or(0) < self.config.max_retries)
                .collect();
            for player in &ready {
                *attempts.entry(*player).or_default() += 1;
            }
            self.submit_saves(cache, &ready);

            if self.outstanding == 0 {
                break;
            }
            if !self.wait_one(cache, deadline) {
                break;
            }
        }

        let mut unsaved = cache.dirty_players();
        unsaved.sort();
        let flushed = initially_dirty
            .iter()
            .filter(|p| !cache.is_dirty(**p))
            .count();
        if !unsaved.is_empty() {
            self.diagnostics.emit(Diagnostic::ShutdownIncomplete {
                unsaved: unsaved.clone(),
            });
        }

        let report = ShutdownReport {
            flushed,
            unsaved,
            elapsed: started.elapsed(),
        };
        info!(
            flushed = report.flushed,
            unsaved = report.unsaved.len(),
            elapsed_ms = report.elapsed.as_millis(),
            "Shutdown drain finished"
        );
        report
    }

    /// Save every idle dirty player and retry failed loads.
    fn sweep(&mut self, cache: &mut ProgressCache) {
        self.last_sweep = Instant::now();

        let reloads: Vec<(PlayerKey, u64)> = self
            .players
            .iter()
            .filter(|(player, s)| s.load_failed && !s.in_flight && cache.is_pending(**player))
            .map(|(player, s)| (*player, s.generation))
            .collect();
        for (player, generation) in reloads {
            self.submit_load(player, generation);
        }

        let idle_dirty: Vec<PlayerKey> = cache
            .dirty_players()
            .into_iter()
            .filter(|p| !self.players.get(p).is_some_and(|s| s.in_flight))
            .collect();
        if !idle_dirty.is_empty() {
            debug!(players = idle_dirty.len(), "Flush sweep");
        }
        self.submit_saves(cache, &idle_dirty);
    }

    fn finish_leave(&mut self, cache: &mut ProgressCache, player: PlayerKey) {
        if cache.is_dirty(player) {
            self.submit_saves(cache, &[player]);
            return;
        }
        match cache.evict(player) {
            Ok(_) => {
                self.players.remove(&player);
                debug!(player = %player, "Evicted clean progress");
            }
            Err(Error::Inconsistency { player, detail }) => {
                self.diagnostics
                    .emit(Diagnostic::Inconsistency { player, detail });
            }
            Err(_) => {
                self.players.remove(&player);
            }
        }
    }

    fn submit_load(&mut self, player: PlayerKey, generation: u64) {
        let state = self.players.entry(player).or_default();
        state.in_flight = true;
        state.load_failed = false;
        self.outstanding += 1;

        let backend = Arc::clone(&self.backend);
        let tx = self.tx.clone();
        let limit = self.config.storage_timeout();
        let limit_ms = self.config.storage_timeout_ms;
        self.runtime.spawn(async move {
            let result = match tokio::time::timeout(limit, backend.load_progress(player)).await {
                Ok(result) => result,
                Err(_) => Err(Error::StorageTimeout(limit_ms)),
            };
            // Receiver gone means the scheduler was dropped
            let _ = tx.send(Completion::Loaded {
                player,
                generation,
                result,
            });
        });
    }

    fn submit_saves(&mut self, cache: &ProgressCache, players: &[PlayerKey]) {
        let snapshots: Vec<_> = players
            .iter()
            .filter_map(|p| cache.dirty_snapshot(*p))
            .collect();

        for chunk in snapshots.chunks(self.config.max_batch_size) {
            let mut versions = Vec::with_capacity(chunk.len());
            let mut items = Vec::with_capacity(chunk.len());
            for snapshot in chunk {
                self.players.entry(snapshot.player).or_default().in_flight = true;
                versions.push((snapshot.player, snapshot.version));
                items.push((snapshot.player, snapshot.progress.clone()));
            }
            self.outstanding += 1;

            let backend = Arc::clone(&self.backend);
            let tx = self.tx.clone();
            let limit = self.config.storage_timeout();
            let limit_ms = self.config.storage_timeout_ms;
            self.runtime.spawn(async move {
                // A timeout reports failure but never drops the running write;
                // the players stay busy until it returns.
                let mut save = tokio::spawn(async move { backend.save_batch(items).await });
                let (joined, phase) = match tokio::time::timeout(limit, &mut save).await {
                    Ok(joined) => (joined, SavePhase::Finished),
                    Err(_) => {
                        let expired = versions
                            .iter()
                            .map(|&(player, version)| {
                                (player, version, Err(Error::StorageTimeout(limit_ms)))
                            })
                            .collect();
                        let _ = tx.send(Completion::Saved {
                            results: expired,
                            phase: SavePhase::Expired,
                        });
                        (save.await, SavePhase::LateFinished)
                    }
                };
                let results = match_results(versions, joined);
                let _ = tx.send(Completion::Saved { results, phase });
            });
        }
    }

    fn drain(&mut self, cache: &mut ProgressCache) {
        while let Ok(completion) = self.rx.try_recv() {
            self.apply(cache, completion);
        }
    }

    /// Wait for one completion until `deadline`; `false` on timeout.
    fn wait_one(&mut self, cache: &mut ProgressCache, deadline: Instant) -> bool {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return false;
        }
        let rx = &mut self.rx;
        let received = self
            .runtime
            .block_on(async { tokio::time::timeout(remaining, rx.recv()).await });
        match received {
            Ok(Some(completion)) => {
                self.apply(cache, completion);
                true
            }
            // Channel closed cannot happen while we hold a sender
            Ok(None) | Err(_) => false,
        }
    }

    fn apply(&mut self, cache: &mut ProgressCache, completion: Completion) {
        // An expired save is still running and stays outstanding
        if !matches!(
            completion,
            Completion::Saved {
                phase: SavePhase::Expired,
                ..
            }
        ) {
            self.outstanding = self.outstanding.saturating_sub(1);
        }
        match completion {
            Completion::Loaded {
                player,
                generation,
                result,
            } => self.apply_load(cache, player, generation, result),
            Completion::Saved { results, phase } => {
                for (player, version, result) in results {
                    self.apply_save(cache, player, version, result, phase);
                }
            }
        }
    }

    fn apply_load(
        &mut self,
        cache: &mut ProgressCache,
        player: PlayerKey,
        generation: u64,
        result: Result<Option<PlayerProgress>>,
    ) {
        let Some(state) = self.players.get_mut(&player) else {
            return;
        };
        state.in_flight = false;

        if generation != state.generation {
            debug!(player = %player, generation, current = state.generation, "Ignoring stale load");
            if state.reload {
                state.reload = false;
                let current = state.generation;
                self.submit_load(player, current);
            } else if !cache.is_pending(player) && !cache.is_resident(player) {
                self.players.remove(&player);
            }
            return;
        }

        match result {
            Ok(stored) => {
                let progress = stored.unwrap_or_default();
                let count = progress.len();
                match cache.install(player, progress) {
                    Ok(()) => debug!(player = %player, unlocked = count, "Progress loaded"),
                    Err(Error::Inconsistency { player, detail }) => {
                        self.diagnostics
                            .emit(Diagnostic::Inconsistency { player, detail });
                    }
                    Err(e) => warn!(player = %player, error = %e, "Could not install loaded progress"),
                }
            }
            Err(e) => {
                state.load_failed = true;
                self.diagnostics.emit(Diagnostic::LoadFailed {
                    player,
                    error: e.to_string(),
                });
            }
        }
    }

    fn apply_save(
        &mut self,
        cache: &mut ProgressCache,
        player: PlayerKey,
        version: u64,
        result: Result<()>,
        phase: SavePhase,
    ) {
        let max_retries = self.config.max_retries;
        let state = self.players.entry(player).or_default();
        state.in_flight = phase == SavePhase::Expired;

        match (result, phase) {
            (Ok(()), _) => {
                state.failures = 0;
                state.escalated = false;
                let clean = cache.acknowledge(player, version);
                debug!(player = %player, version, clean, late = phase == SavePhase::LateFinished, "Progress saved");
            }
            (Err(e), SavePhase::LateFinished) => {
                // Already counted when the call expired
                debug!(player = %player, version, error = %e, "Timed out save finished with an error");
                return;
            }
            (Err(e), _) => {
                state.failures += 1;
                let failures = state.failures;
                let error = e.to_string();
                self.diagnostics.emit(Diagnostic::SaveFailed {
                    player,
                    attempt: failures,
                    error: error.clone(),
                });
                if failures >= max_retries && !state.escalated {
                    state.escalated = true;
                    self.diagnostics.emit(Diagnostic::PersistenceDegraded {
                        player,
                        failures,
                        error,
                    });
                }
                // Leaving players wait for the next sweep to retry
                return;
            }
        }

        if state.leaving {
            self.finish_leave(cache, player);
        }
    }
}

/// Pair each submitted (player, version) with its batch outcome.
fn match_results(
    versions: Vec<(PlayerKey, u64)>,
    joined: std::result::Result<BatchResult, tokio::task::JoinError>,
) -> Vec<(PlayerKey, u64, Result<()>)> {
    let (mut outcome, lost): (HashMap<PlayerKey, Result<()>>, Option<String>) = match joined {
        Ok(results) => (results.into_iter().collect(), None),
        Err(e) => (HashMap::default(), Some(e.to_string())),
    };
    versions
        .into_iter()
        .map(|(player, version)| {
            let result = outcome.remove(&player).unwrap_or_else(|| {
                Err(Error::WorkerPool(
                    lost.clone()
                        .unwrap_or_else(|| "save result missing from batch".to_string()),
                ))
            });
            (player, version, result)
        })
        .collect()
}
