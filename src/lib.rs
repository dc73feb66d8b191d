//! # codex-store: Collectable Codex Progress Store
//!
//! **Version**: 0.1.0
//!
//! codex-store keeps a game server's catalog of collectable entries and
//! each player's record of which entries they have unlocked. Reads are
//! served from an in-memory cache; writes are flushed to durable storage
//! in the background, so no disk or network I/O ever blocks the game loop.
//!
//! ## Design Principles
//!
//! - **Single writer**: the main context owns the [`ProgressStore`]; the
//!   cache needs no locks
//! - **Never lose progress**: a player stays dirty until the exact version
//!   written is confirmed durable, and failed saves are retried forever
//! - **Bounded blocking**: only `settle` and `shutdown` block, both with a
//!   deadline
//! - **Atomic catalog reload**: readers see the old or the new registry,
//!   never a mix
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use codex_store::{CodexConfig, ProgressStore};
//! use codex_store::progress::PlayerKey;
//! use codex_store::registry::EntryKey;
//!
//! let config = CodexConfig::load("plugins/codex/config.yml")?;
//! codex_store::logging::init(&config.log_filter)?;
//! let mut store = ProgressStore::open(&config)?;
//!
//! let player = PlayerKey::new_random();
//! store.on_player_connect(player);
//! // ... each server tick:
//! store.tick();
//!
//! if store.is_unlocked(player, &EntryKey::parse("notes:first_page")?)? {
//!     println!("already found");
//! }
//!
//! let report = store.shutdown(Duration::from_secs(10));
//! assert!(report.is_complete());
//! # Ok::<(), codex_store::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod cache;
pub mod command;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod logging;
pub mod placeholder;
pub mod progress;
pub mod registry;
pub mod scheduler;
pub mod storage;
pub mod store;

pub use config::CodexConfig;
pub use error::{Error, Result};
pub use store::{CategoryProgress, ProgressStore, Readiness};
