//! `tracing` subscriber setup for hosts without their own.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{Error, Result};

/// Install a global fmt subscriber.
///
/// `RUST_LOG` wins over `default_filter` (usually `CodexConfig::log_filter`).
///
/// # Errors
///
/// Returns [`Error::Config`] if `default_filter` does not parse or a global
/// subscriber is already installed.
pub fn init(default_filter: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_filter)
            .map_err(|e| Error::Config(format!("invalid log filter '{default_filter}': {e}")))?,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()
        .map_err(|e| Error::Config(format!("logging already initialised: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_filter_rejected_or_env_wins() {
        // With RUST_LOG set the default filter is never parsed
        if std::env::var_os("RUST_LOG").is_none() {
            let err = init("codex_store=notalevel").unwrap_err();
            assert!(err.is_config());
        }
    }

    #[test]
    fn test_second_init_fails() {
        let _ = init("info");
        assert!(init("info").is_err());
    }
}
