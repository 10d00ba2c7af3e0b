//! Configuration loading.
//!
//! YAML file first (`config/observe.yaml` unless a path is given), then
//! `SOUL_OBSERVE_*` environment overrides, then validation.

use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use cdp_adapter::CdpConfig;
use perceiver_structural::policy::SerializeMode;
use perceiver_structural::ObservePolicy;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub const DEFAULT_CONFIG_PATH: &str = "config/observe.yaml";

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ObserveConfig {
    pub log_level: String,
    pub cdp: CdpConfig,
    pub observe: ObservePolicy,
}

impl Default for ObserveConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            cdp: CdpConfig::default(),
            observe: ObservePolicy::default(),
        }
    }
}

pub struct LoadedConfig {
    pub config: ObserveConfig,
    pub path: PathBuf,
}

pub fn load_config(config_path: Option<&Path>) -> Result<LoadedConfig> {
    let config_path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    let mut config = if config_path.exists() {
        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file {}", config_path.display()))?;
        let config: ObserveConfig =
            serde_yaml::from_str(&content).context("Failed to parse config file")?;
        info!("Loaded configuration from: {}", config_path.display());
        config
    } else {
        warn!(
            "Config file not found, using defaults: {}",
            config_path.display()
        );
        ObserveConfig::default()
    };

    apply_env_overrides(&mut config)?;
    config
        .observe
        .validate()
        .context("Invalid observation policy")?;
    Ok(LoadedConfig {
        config,
        path: config_path,
    })
}

fn env_value(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_env<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env_value(name)
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|err| anyhow!("{name}={raw:?} is invalid: {err}"))
        })
        .transpose()
}

fn parse_flag(name: &str) -> Result<Option<bool>> {
    env_value(name)
        .map(|raw| match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(anyhow!("{name}={raw:?} is not a boolean")),
        })
        .transpose()
}

pub fn apply_env_overrides(config: &mut ObserveConfig) -> Result<()> {
    if let Some(mode) = parse_env::<SerializeMode>("SOUL_OBSERVE_MODE")? {
        config.observe.serialize.mode = mode;
    }
    if let Some(max_chars) = parse_env::<usize>("SOUL_OBSERVE_MAX_CHARS")? {
        config.observe.serialize.max_chars = max_chars;
    }
    if let Some(threshold) = parse_env::<f64>("SOUL_OBSERVE_VIEWPORT_THRESHOLD")? {
        config.observe.filter.viewport_threshold_px = threshold;
    }
    if let Some(enabled) = parse_flag("SOUL_OBSERVE_CROSS_ORIGIN_IFRAMES")? {
        config.observe.collect.cross_origin_iframes = enabled;
    }
    if let Some(timeout_ms) = parse_env::<u64>("SOUL_OBSERVE_TIMEOUT_MS")? {
        config.observe.collect.timeout_ms = timeout_ms;
    }
    if let Some(url) = env_value("SOULBROWSER_WS_URL") {
        config.cdp.websocket_url = Some(url);
    }
    Ok(())
}
