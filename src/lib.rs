//! SoulBrowser structural observation.
//!
//! Connects to a running browser, observes one page at a time and hands out
//! indexed page text plus read-only queries over the same snapshot.

pub mod config;
pub mod observer;

use anyhow::{Context, Result};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub use config::{apply_env_overrides, load_config, LoadedConfig, ObserveConfig};
pub use observer::{Observation, Observer};
pub use perceiver_structural as perceiver;

pub fn init_logging(level: &str, debug: bool) -> Result<()> {
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        level.parse().context("Invalid log level")?
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string())),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .context("Logging already initialized")?;

    Ok(())
}

/// Registers the inspection channel's command metrics on `registry`.
pub fn register_metrics(registry: &prometheus::Registry) {
    cdp_adapter::metrics::register_metrics(registry);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn unknown_level_is_rejected() {
        assert!(init_logging("chatty", false).is_err());
    }

    #[test]
    #[serial]
    fn logging_initializes_once() {
        let _ = init_logging("info", false);
        assert!(init_logging("info", true).is_err());
    }
}
