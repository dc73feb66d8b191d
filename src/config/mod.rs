//! Configuration - YAML settings for storage, flushing and placeholders
//!
//! Every field has a default, so an empty file (or no file) is a valid
//! configuration. Before parsing, `${VAR[:default]}` tokens are expanded
//! (see [`interpolate`]); the built-in variable `data` names the data
//! directory.
//!
//! ```yaml
//! data_dir: ${CODEX_DATA:.}
//! catalog_dir: catalog
//! log_filter: info
//! storage:
//!   backend: sqlite
//!   sql:
//!     path: ${data}/codex.db
//!     pool: { max_size: 6, min_idle: 2, acquire_timeout_ms: 5000 }
//! flush:
//!   interval_ms: 5000
//!   max_retries: 5
//! ```

mod interpolate;

pub use interpolate::{interpolate, interpolate_with};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, Result};

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CodexConfig {
    /// Base directory for relative storage paths
    pub data_dir: PathBuf,
    /// Directory of catalog files, relative to `data_dir` unless absolute
    pub catalog_dir: PathBuf,
    /// Default `tracing` filter; `RUST_LOG` overrides it
    pub log_filter: String,
    /// Durable storage selection
    pub storage: StorageConfig,
    /// Flush scheduler tuning
    pub flush: FlushConfig,
    /// Placeholder adapter settings
    pub placeholder: PlaceholderConfig,
}

impl Default for CodexConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            catalog_dir: PathBuf::from("catalog"),
            log_filter: "info".to_string(),
            storage: StorageConfig::default(),
            flush: FlushConfig::default(),
            placeholder: PlaceholderConfig::default(),
        }
    }
}

impl CodexConfig {
    /// Parse configuration text, with `data` bound to the current directory.
    ///
    /// # Errors
    ///
    /// Returns a config error if the YAML is malformed or a limit is invalid.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        Self::from_yaml_with_data(text, Path::new("."))
    }

    /// Parse configuration text with an explicit `data` variable.
    ///
    /// # Errors
    ///
    /// Returns a config error if the YAML is malformed or a limit is invalid.
    pub fn from_yaml_with_data(text: &str, data: &Path) -> Result<Self> {
        let builtins = HashMap::from([("data".to_string(), data.display().to_string())]);
        let expanded = interpolate(text, &builtins);
        let config: Self = if expanded.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(&expanded)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Load from a file. `data` and relative `data_dir` values resolve
    /// against the file's directory.
    ///
    /// # Errors
    ///
    /// Returns a config error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));

        let mut config = Self::from_yaml_with_data(&text, base)?;
        if config.data_dir.is_relative() {
            config.data_dir = base.join(&config.data_dir);
        }
        debug!(path = %path.display(), data_dir = %config.data_dir.display(), "Loaded codex config");
        Ok(config)
    }

    /// Catalog directory with `data_dir` applied.
    #[must_use]
    pub fn catalog_path(&self) -> PathBuf {
        self.data_dir.join(&self.catalog_dir)
    }

    /// Check every numeric limit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        self.storage.sql.pool.validate()?;
        self.flush.validate()
    }
}

/// Which durable store to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-memory only (lost on restart)
    Memory,
    /// One JSON document per player
    #[default]
    Flatfile,
    /// Pooled SQLite database
    Sqlite,
}

/// `storage` section.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// Selected backend
    pub backend: BackendKind,
    /// Flat-file settings
    pub flatfile: FlatfileConfig,
    /// SQL settings
    pub sql: SqlConfig,
}

/// `storage.flatfile` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FlatfileConfig {
    /// Document directory, relative to `data_dir` unless absolute
    pub dir: PathBuf,
}

impl Default for FlatfileConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("playerdata/codex"),
        }
    }
}

/// `storage.sql` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SqlConfig {
    /// Database file, relative to `data_dir` unless absolute
    pub path: PathBuf,
    /// Connection pool limits
    pub pool: PoolConfig,
}

impl Default for SqlConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("codex.db"),
            pool: PoolConfig::default(),
        }
    }
}

/// `storage.sql.pool` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolConfig {
    /// Maximum simultaneously open connections
    pub max_size: usize,
    /// Connections opened eagerly at startup
    pub min_idle: usize,
    /// Longest wait for a free connection
    pub acquire_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 6,
            min_idle: 2,
            acquire_timeout_ms: 5_000,
        }
    }
}

impl PoolConfig {
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `max_size` is zero or below `min_idle`.
    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(Error::Config("storage.sql.pool.max_size must be at least 1".into()));
        }
        if self.min_idle > self.max_size {
            return Err(Error::Config(format!(
                "storage.sql.pool.min_idle ({}) exceeds max_size ({})",
                self.min_idle, self.max_size
            )));
        }
        Ok(())
    }
}

/// `flush` section: scheduler and worker pool tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FlushConfig {
    /// Time between periodic sweeps
    pub interval_ms: u64,
    /// Consecutive failures before a player is reported degraded; also the
    /// per-player attempt budget at shutdown
    pub max_retries: u32,
    /// Players per `save_batch` call
    pub max_batch_size: usize,
    /// Time allowed to drain dirty players at shutdown
    pub shutdown_grace_ms: u64,
    /// Threads in the background storage runtime
    pub worker_threads: usize,
    /// Deadline for one storage call (a load, or a whole batch)
    pub storage_timeout_ms: u64,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5_000,
            max_retries: 5,
            max_batch_size: 64,
            shutdown_grace_ms: 10_000,
            worker_threads: 2,
            storage_timeout_ms: 10_000,
        }
    }
}

impl FlushConfig {
    /// Periodic sweep interval.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Shutdown drain budget.
    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Per-call storage deadline.
    #[must_use]
    pub const fn storage_timeout(&self) -> Duration {
        Duration::from_millis(self.storage_timeout_ms)
    }

    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first zero limit.
    pub fn validate(&self) -> Result<()> {
        let checks = [
            ("flush.interval_ms", self.interval_ms == 0),
            ("flush.max_retries", self.max_retries == 0),
            ("flush.max_batch_size", self.max_batch_size == 0),
            ("flush.worker_threads", self.worker_threads == 0),
            ("flush.storage_timeout_ms", self.storage_timeout_ms == 0),
        ];
        match checks.iter().find(|(_, zero)| *zero) {
            Some((field, _)) => Err(Error::Config(format!("{field} must be greater than zero"))),
            None => Ok(()),
        }
    }
}

/// `placeholder` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlaceholderConfig {
    /// Text returned while a player's progress is loading
    pub loading_text: String,
}

impl Default for PlaceholderConfig {
    fn default() -> Self {
        Self {
            loading_text: "Loading...".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_text_is_default() {
        let config = CodexConfig::from_yaml_str("").unwrap();
        assert_eq!(config, CodexConfig::default());
        assert_eq!(config.storage.backend, BackendKind::Flatfile);
        assert_eq!(config.storage.sql.pool.max_size, 6);
        assert_eq!(config.storage.sql.pool.min_idle, 2);
    }

    #[test]
    fn test_partial_sections_keep_defaults() {
        let yaml = r"
storage:
  backend: sqlite
  sql:
    pool:
      max_size: 3
flush:
  interval_ms: 250
";
        let config = CodexConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.storage.backend, BackendKind::Sqlite);
        assert_eq!(config.storage.sql.pool.max_size, 3);
        assert_eq!(config.storage.sql.pool.min_idle, 2);
        assert_eq!(config.flush.interval(), Duration::from_millis(250));
        assert_eq!(config.flush.max_retries, 5);
    }

    #[test]
    fn test_data_builtin_interpolated() {
        let yaml = "storage:\n  sql:\n    path: ${data}/codex.db\n";
        let config = CodexConfig::from_yaml_with_data(yaml, Path::new("/srv/mc")).unwrap();
        assert_eq!(config.storage.sql.path, PathBuf::from("/srv/mc/codex.db"));
    }

    #[test]
    fn test_invalid_limits_rejected() {
        let err = CodexConfig::from_yaml_str("flush:\n  max_batch_size: 0\n").unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("flush.max_batch_size"));

        let err = CodexConfig::from_yaml_str(
            "storage:\n  sql:\n    pool:\n      max_size: 1\n      min_idle: 2\n",
        )
        .unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = CodexConfig::from_yaml_str("flush:\n  interval: 5\n").unwrap_err();
        assert!(matches!(err, Error::Yaml(_)));
    }

    #[test]
    fn test_load_resolves_relative_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("codex.yml");
        std::fs::write(&path, "data_dir: state\nstorage:\n  backend: memory\n").unwrap();

        let config = CodexConfig::load(&path).unwrap();
        assert_eq!(config.data_dir, dir.path().join("state"));
        assert_eq!(config.catalog_path(), dir.path().join("state").join("catalog"));
        assert_eq!(config.storage.backend, BackendKind::Memory);
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = CodexConfig::load("/definitely/not/here.yml").unwrap_err();
        assert!(err.is_config());
    }
}
