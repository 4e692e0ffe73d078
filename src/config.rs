//! Provider configuration and the desired-resource file
//!
//! Both are TOML. The provider config carries credentials and tuning for
//! the API adapter; the resource file declares what should exist:
//!
//! ```toml
//! [[resource]]
//! kind = "monitor"
//! name = "cpu"
//!
//! [resource.attributes]
//! name = "High CPU"
//! type = "metric alert"
//! query = "avg(last_5m):avg:system.cpu.user{*} > 90"
//! message = "CPU is high @pagerduty"
//! ```

use crate::paths;
use crate::provider::client::DEFAULT_API_URL;
use anyhow::{Context, Result, bail};
use declarative::{
    AdapterConfig, ConfirmConfig, DesiredConfig, RateLimitConfig, ResourceAddress, RetryConfig,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_JOBS: usize = 4;
const DEFAULT_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// Provider Config
// ============================================================================

/// Contents of `config.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProviderConfig {
    /// Datadog site, e.g. `https://api.datadoghq.eu`
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub app_key: Option<String>,
    /// Parallel workers during apply
    pub jobs: Option<usize>,
    /// Per-request HTTP timeout
    pub timeout_secs: Option<u64>,
    pub state_path: Option<String>,
    pub retry: RetrySection,
    pub rate_limit: RateLimitSection,
    pub confirm: ConfirmSection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySection {
    pub max_attempts: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub backoff_factor: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateLimitSection {
    pub capacity: Option<u32>,
    pub refill_per_sec: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfirmSection {
    pub attempts: Option<u32>,
    pub interval_ms: Option<u64>,
}

impl ProviderConfig {
    /// Load the config file.
    ///
    /// An explicitly given path must exist; a missing default config file
    /// just means "all defaults".
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => {
                let path = paths::config_file()?;
                if !path.exists() {
                    log::debug!("No config at {}, using defaults", path.display());
                    return Ok(Self::default());
                }
                path
            }
        };

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn api_url(&self) -> &str {
        self.api_url.as_deref().unwrap_or(DEFAULT_API_URL)
    }

    pub fn jobs(&self) -> usize {
        self.jobs.unwrap_or(DEFAULT_JOBS).max(1)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS))
    }

    /// State file location, `~` and variables expanded
    pub fn state_path(&self) -> Result<PathBuf> {
        match &self.state_path {
            Some(path) => Ok(paths::expand(path)),
            None => paths::state_file(),
        }
    }

    /// Pick credentials, preferring the ones given on the command line or
    /// in the environment over the config file.
    pub fn credentials(&self, api_key: Option<&str>, app_key: Option<&str>) -> Result<(String, String)> {
        let api_key = api_key.or(self.api_key.as_deref()).filter(|k| !k.is_empty());
        let app_key = app_key.or(self.app_key.as_deref()).filter(|k| !k.is_empty());

        match (api_key, app_key) {
            (Some(api), Some(app)) => Ok((api.to_string(), app.to_string())),
            (None, _) => bail!("No API key: set DATADOG_API_KEY or api_key in the config file"),
            (_, None) => bail!("No application key: set DATADOG_APP_KEY or app_key in the config file"),
        }
    }

    /// Adapter settings, unset keys falling back to the engine defaults
    pub fn adapter_config(&self) -> AdapterConfig {
        let retry_defaults = RetryConfig::default();
        let rate_defaults = RateLimitConfig::default();
        let confirm_defaults = ConfirmConfig::default();

        AdapterConfig {
            retry: RetryConfig {
                max_attempts: self.retry.max_attempts.unwrap_or(retry_defaults.max_attempts).max(1),
                base_delay: self
                    .retry
                    .base_delay_ms
                    .map_or(retry_defaults.base_delay, Duration::from_millis),
                backoff_factor: self
                    .retry
                    .backoff_factor
                    .unwrap_or(retry_defaults.backoff_factor),
                max_delay: self
                    .retry
                    .max_delay_ms
                    .map_or(retry_defaults.max_delay, Duration::from_millis),
                jitter: retry_defaults.jitter,
            },
            rate_limit: RateLimitConfig {
                capacity: self.rate_limit.capacity.unwrap_or(rate_defaults.capacity).max(1),
                refill_per_sec: self
                    .rate_limit
                    .refill_per_sec
                    .unwrap_or(rate_defaults.refill_per_sec),
            },
            confirm: ConfirmConfig {
                attempts: self.confirm.attempts.unwrap_or(confirm_defaults.attempts),
                interval: self
                    .confirm
                    .interval_ms
                    .map_or(confirm_defaults.interval, Duration::from_millis),
            },
        }
    }
}

// ============================================================================
// Resource File
// ============================================================================

/// Problems with the desired-resource file itself
#[derive(Debug, thiserror::Error)]
pub enum ResourceFileError {
    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("resource {index}: {message}")]
    InvalidEntry { index: usize, message: String },

    #[error("{0} is declared more than once")]
    Duplicate(ResourceAddress),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ResourceFile {
    #[serde(default)]
    resource: Vec<ResourceEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ResourceEntry {
    kind: String,
    name: String,
    #[serde(default)]
    attributes: serde_json::Map<String, serde_json::Value>,
}

/// Read the desired-resource file
pub fn load_resources(path: &Path) -> Result<Vec<DesiredConfig>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read resource file: {}", path.display()))?;
    let resources = parse_resources(&content)
        .with_context(|| format!("Invalid resource file: {}", path.display()))?;
    log::info!("Loaded {} resources from {}", resources.len(), path.display());
    Ok(resources)
}

/// Parse `[[resource]]` tables into desired configs, in file order
pub fn parse_resources(content: &str) -> Result<Vec<DesiredConfig>, ResourceFileError> {
    let file: ResourceFile = toml::from_str(content)?;
    let mut seen = HashSet::new();
    let mut resources = Vec::with_capacity(file.resource.len());

    for (index, entry) in file.resource.into_iter().enumerate() {
        for (field, value) in [("kind", &entry.kind), ("name", &entry.name)] {
            if value.is_empty() || value.contains('.') {
                return Err(ResourceFileError::InvalidEntry {
                    index,
                    message: format!("{field} '{value}' must be non-empty and contain no '.'"),
                });
            }
        }

        let address = ResourceAddress::new(entry.kind, entry.name);
        if !seen.insert(address.clone()) {
            return Err(ResourceFileError::Duplicate(address));
        }
        resources.push(DesiredConfig::new(address, entry.attributes));
    }

    Ok(resources)
}
