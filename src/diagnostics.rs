//! Diagnostic channel for persistence problems.
//!
//! Every [`Diagnostic`] is logged through `tracing` at a matching level and
//! broadcast to subscribers. Nobody has to listen; with no receivers a
//! diagnostic is only logged.

use tokio::sync::broadcast;
use tracing::{error, warn};

use crate::progress::PlayerKey;

/// Buffered diagnostics per subscriber before the oldest are dropped.
const CHANNEL_CAPACITY: usize = 256;

/// Something an operator should know about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// One save attempt failed; the player stays dirty and is retried
    SaveFailed {
        /// Affected player
        player: PlayerKey,
        /// Consecutive failures so far
        attempt: u32,
        /// Error text
        error: String,
    },
    /// A player reached the retry threshold; retrying continues
    PersistenceDegraded {
        /// Affected player
        player: PlayerKey,
        /// Consecutive failures so far
        failures: u32,
        /// Last error text
        error: String,
    },
    /// Loading a player's progress failed; the load is retried
    LoadFailed {
        /// Affected player
        player: PlayerKey,
        /// Error text
        error: String,
    },
    /// An invariant was violated and the operation refused
    Inconsistency {
        /// Affected player
        player: PlayerKey,
        /// What went wrong
        detail: String,
    },
    /// Shutdown gave up on these players
    ShutdownIncomplete {
        /// Players whose progress was not confirmed durable
        unsaved: Vec<PlayerKey>,
    },
}

/// Broadcast sender plus logging.
#[derive(Debug, Clone)]
pub struct DiagnosticChannel {
    tx: broadcast::Sender<Diagnostic>,
}

impl DiagnosticChannel {
    /// New channel with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Log and broadcast `diagnostic`.
    pub fn emit(&self, diagnostic: Diagnostic) {
        match &diagnostic {
            Diagnostic::SaveFailed {
                player,
                attempt,
                error,
            } => warn!(player = %player, attempt, error = %error, "Progress save failed, will retry"),
            Diagnostic::PersistenceDegraded {
                player,
                failures,
                error,
            } => error!(
                player = %player,
                failures,
                error = %error,
                "Progress persistence degraded, retrying in background"
            ),
            Diagnostic::LoadFailed { player, error } => {
                warn!(player = %player, error = %error, "Progress load failed, will retry");
            }
            Diagnostic::Inconsistency { player, detail } => {
                error!(player = %player, detail = %detail, "Progress inconsistency, operation refused");
            }
            Diagnostic::ShutdownIncomplete { unsaved } => {
                error!(count = unsaved.len(), players = ?unsaved, "Shutdown left progress unsaved");
            }
        }
        // Err only means nobody is subscribed
        let _ = self.tx.send(diagnostic);
    }

    /// New receiver for diagnostics emitted from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Diagnostic> {
        self.tx.subscribe()
    }
}

impl Default for DiagnosticChannel {
    fn default() -> Self {
        Self::new()
    }
}
