//! Admin/status command adapter.
//!
//! Parses already-tokenised arguments into a [`CodexCommand`] and runs it
//! against a [`ProgressStore`]. Permission checks and argument tokenising
//! belong to the host; every failure here ends up as a message in the
//! [`CommandReply`].

use std::path::PathBuf;

use thiserror::Error;

use crate::progress::{PlayerKey, UnlockResult};
use crate::registry::EntryKey;
use crate::storage::ProgressBackend;
use crate::store::{ProgressStore, Readiness};
use crate::Error;

/// Usage lines, one per sub-command.
pub const USAGE: &[&str] = &[
    "codex unlock <player-uuid> <namespace:id>",
    "codex replay <player-uuid> <namespace:id>",
    "codex status <player-uuid> [namespace]",
    "codex list <player-uuid> [namespace]",
    "codex reset <player-uuid>",
    "codex flush",
    "codex reload [catalog-dir]",
];

/// Why arguments could not be parsed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// No sub-command given
    #[error("Missing sub-command")]
    Empty,

    /// Sub-command not recognised
    #[error("Unknown sub-command '{0}'")]
    UnknownSubcommand(String),

    /// Wrong number of arguments
    #[error("Usage: {0}")]
    Usage(&'static str),

    /// Player argument is not a UUID
    #[error("Invalid player uuid '{0}'")]
    InvalidPlayer(String),

    /// Entry argument is not `namespace:id`
    #[error("Invalid entry key '{0}'")]
    InvalidKey(String),
}

/// A parsed codex command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodexCommand {
    /// Unlock one entry
    Unlock {
        /// Target player
        player: PlayerKey,
        /// Entry to unlock
        key: EntryKey,
    },
    /// Replay one unlocked entry
    Replay {
        /// Target player
        player: PlayerKey,
        /// Entry to replay
        key: EntryKey,
    },
    /// Show completion counts
    Status {
        /// Target player
        player: PlayerKey,
        /// Restrict to one category
        namespace: Option<String>,
    },
    /// List unlocked entries
    List {
        /// Target player
        player: PlayerKey,
        /// Restrict to one category
        namespace: Option<String>,
    },
    /// Clear every unlock of a player
    Reset {
        /// Target player
        player: PlayerKey,
    },
    /// Sweep dirty progress now
    Flush,
    /// Rebuild the catalog; the current one stays if the new one is broken
    Reload {
        /// Directory to read instead of the configured catalog directory
        dir: Option<PathBuf>,
    },
}

/// Result of running a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReply {
    /// False if the command failed
    pub success: bool,
    /// Lines to show the sender
    pub lines: Vec<String>,
}

impl CommandReply {
    fn ok(lines: Vec<String>) -> Self {
        Self {
            success: true,
            lines,
        }
    }

    fn fail(line: impl Into<String>) -> Self {
        Self {
            success: false,
            lines: vec![line.into()],
        }
    }
}

impl CodexCommand {
    /// Parse tokenised arguments (sub-command first).
    ///
    /// # Errors
    ///
    /// Returns a [`ParseError`] describing the first problem.
    pub fn parse(args: &[&str]) -> Result<Self, ParseError> {
        let (&sub, rest) = args.split_first().ok_or(ParseError::Empty)?;
        match (sub.to_ascii_lowercase().as_str(), rest) {
            ("unlock", [player, key]) => Ok(Self::Unlock {
                player: parse_player(player)?,
                key: parse_key(key)?,
            }),
            ("replay", [player, key]) => Ok(Self::Replay {
                player: parse_player(player)?,
                key: parse_key(key)?,
            }),
            ("status", [player, namespace @ ..]) if namespace.len() <= 1 => Ok(Self::Status {
                player: parse_player(player)?,
                namespace: namespace.first().map(ToString::to_string),
            }),
            ("list", [player, namespace @ ..]) if namespace.len() <= 1 => Ok(Self::List {
                player: parse_player(player)?,
                namespace: namespace.first().map(ToString::to_string),
            }),
            ("reset", [player]) => Ok(Self::Reset {
                player: parse_player(player)?,
            }),
            ("flush", []) => Ok(Self::Flush),
            ("reload", [dir @ ..]) if dir.len() <= 1 => Ok(Self::Reload {
                dir: dir.first().map(PathBuf::from),
            }),
            ("unlock", _) => Err(ParseError::Usage(USAGE[0])),
            ("replay", _) => Err(ParseError::Usage(USAGE[1])),
            ("status", _) => Err(ParseError::Usage(USAGE[2])),
            ("list", _) => Err(ParseError::Usage(USAGE[3])),
            ("reset", _) => Err(ParseError::Usage(USAGE[4])),
            ("flush", _) => Err(ParseError::Usage(USAGE[5])),
            ("reload", _) => Err(ParseError::Usage(USAGE[6])),
            _ => Err(ParseError::UnknownSubcommand(sub.to_string())),
        }
    }

    /// Parse and execute; parse failures become a failed reply with usage.
    pub fn run<B: ProgressBackend>(args: &[&str], store: &mut ProgressStore<B>) -> CommandReply {
        match Self::parse(args) {
            Ok(command) => command.execute(store),
            Err(e) => {
                let mut lines = vec![e.to_string()];
                if matches!(e, ParseError::Empty | ParseError::UnknownSubcommand(_)) {
                    lines.extend(USAGE.iter().map(|u| (*u).to_string()));
                }
                CommandReply {
                    success: false,
                    lines,
                }
            }
        }
    }

    /// Run against `store`.
    pub fn execute<B: ProgressBackend>(&self, store: &mut ProgressStore<B>) -> CommandReply {
        match self {
            Self::Unlock { player, key } => match store.unlock(*player, key) {
                Ok(UnlockResult::NewlyUnlocked(_)) => {
                    CommandReply::ok(vec![format!("Unlocked {key} for {player}")])
                }
                Ok(UnlockResult::AlreadyUnlocked) => {
                    CommandReply::ok(vec![format!("{player} already has {key}")])
                }
                Err(e) => render_error(&e),
            },
            Self::Replay { player, key } => match store.replay(*player, key) {
                Ok(()) => CommandReply::ok(vec![format!("Replayed {key} for {player}")]),
                Err(e) => render_error(&e),
            },
            Self::Status { player, namespace } => status(store, *player, namespace.as_deref()),
            Self::List { player, namespace } => list(store, *player, namespace.as_deref()),
            Self::Reset { player } => match store.reset(*player) {
                Ok(removed) => {
                    CommandReply::ok(vec![format!("Reset {removed} unlock(s) for {player}")])
                }
                Err(e) => render_error(&e),
            },
            Self::Flush => {
                let dirty = store.dirty_count();
                store.flush_now();
                CommandReply::ok(vec![format!("Flush requested for {dirty} dirty player(s)")])
            }
            Self::Reload { dir } => {
                let reloaded = match dir {
                    Some(dir) => store.reload_registry_from_dir(dir),
                    None => store.reload_catalog(),
                };
                match reloaded {
                    Ok(registry) => CommandReply::ok(vec![format!(
                        "Reloaded catalog: {} entries in {} categories",
                        registry.len(),
                        registry.categories().len()
                    )]),
                    Err(e) => CommandReply::fail(format!(
                        "Catalog reload failed, keeping the current catalog: {e}"
                    )),
                }
            }
        }
    }
}

fn parse_player(raw: &str) -> Result<PlayerKey, ParseError> {
    raw.parse()
        .map_err(|_| ParseError::InvalidPlayer(raw.to_string()))
}

fn parse_key(raw: &str) -> Result<EntryKey, ParseError> {
    EntryKey::parse(raw).map_err(|_| ParseError::InvalidKey(raw.to_string()))
}

fn render_error(err: &Error) -> CommandReply {
    match err {
        Error::NotReady(player) => {
            CommandReply::fail(format!("Progress for {player} is still loading, try again shortly"))
        }
        Error::NotResident(player) => CommandReply::fail(format!("{player} is not online")),
        other => CommandReply::fail(other.to_string()),
    }
}

fn status<B: ProgressBackend>(
    store: &ProgressStore<B>,
    player: PlayerKey,
    namespace: Option<&str>,
) -> CommandReply {
    match store.readiness(player) {
        Readiness::Offline => return CommandReply::fail(format!("{player} is not online")),
        Readiness::Loading => return render_error(&Error::NotReady(player)),
        Readiness::Ready => {}
    }

    let registry = store.registry();
    let namespaces: Vec<&str> = match namespace {
        Some(ns) if registry.category(ns).is_none() => {
            return CommandReply::fail(format!("Unknown category '{ns}'"));
        }
        Some(ns) => vec![ns],
        None => registry.categories().iter().map(|c| c.namespace()).collect(),
    };

    let mut lines = Vec::with_capacity(namespaces.len() + 2);
    if namespace.is_none() {
        match store.overall_progress(player) {
            Ok(p) => lines.push(format!(
                "Codex for {player}: {}/{} ({}%)",
                p.unlocked,
                p.total,
                p.percent()
            )),
            Err(e) => return render_error(&e),
        }
    }
    for ns in namespaces {
        match store.progress(player, ns) {
            Ok(p) => lines.push(format!("  {ns}: {}/{} ({}%)", p.unlocked, p.total, p.percent())),
            Err(e) => return render_error(&e),
        }
    }

    let failures = store.save_failures(player);
    let persistence = match (store.is_dirty(player), failures) {
        (false, _) => "saved".to_string(),
        (true, 0) => "pending save".to_string(),
        (true, n) => format!("pending save ({n} failed attempt(s))"),
    };
    lines.push(format!("  persistence: {persistence}"));

    CommandReply::ok(lines)
}

fn list<B: ProgressBackend>(
    store: &ProgressStore<B>,
    player: PlayerKey,
    namespace: Option<&str>,
) -> CommandReply {
    let entries = match namespace {
        Some(ns) => store.snapshot_in(player, ns),
        None => store.get_snapshot(player),
    };
    match entries {
        Ok(entries) if entries.is_empty() => CommandReply::ok(vec![format!("{player} has no unlocks")]),
        Ok(entries) => {
            let mut lines = Vec::with_capacity(entries.len() + 1);
            lines.push(format!("{player} has {} unlock(s):", entries.len()));
            lines.extend(
                entries
                    .iter()
                    .map(|e| format!("  {} - {}", e.key(), e.display().name)),
            );
            CommandReply::ok(lines)
        }
        Err(e) => render_error(&e),
    }
}
