//! Configuration management for the TCC coordinator
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub participant: ParticipantConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Identity of this process; feeds the endpoint identifier.
#[derive(Debug, Clone, Deserialize)]
pub struct CoordinatorConfig {
    pub application_name: String,
    /// Detected from the local network interface when absent.
    pub host: Option<String>,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub interval_ms: u64,
    pub delay_of_stopping_ms: u64,
    pub tick_ms: u64,
    /// Base URL of the transaction-log service driven by the recovery worker.
    pub endpoint: Option<String>,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            interval_ms: 60_000,
            delay_of_stopping_ms: 15_000,
            tick_ms: 100,
            endpoint: None,
        }
    }
}

impl RecoveryConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn delay_of_stopping(&self) -> Duration {
        Duration::from_millis(self.delay_of_stopping_ms)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Resolve a fresh handle per identifier instead of caching per application.
    pub stateful: bool,
    /// Lifetime of a cached stateless handle; 0 keeps it for the process lifetime.
    pub stateless_ttl_secs: u64,
}

impl ResolverConfig {
    pub fn stateless_ttl(&self) -> Option<Duration> {
        (self.stateless_ttl_secs > 0).then(|| Duration::from_secs(self.stateless_ttl_secs))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub rule: BalancerRule,
    pub empty_affinity_policy: EmptyAffinityPolicy,
    /// Static instance list per service, as `host:port` entries
    pub services: HashMap<String, Vec<String>>,
}

/// Built-in load-balancing rule applied under the affinity filter
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BalancerRule {
    #[default]
    RoundRobin,
    /// Same key, same instance; keyless calls fall back to round robin.
    KeyHash,
}

/// What the router does when the recorded instance is no longer a candidate
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmptyAffinityPolicy {
    /// Select nothing; confirm/cancel must not land on another instance.
    #[default]
    Fail,
    /// Select from the unfiltered candidate set.
    Fallback,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ParticipantConfig {
    pub scheme: String,
    pub request_timeout_ms: u64,
}

impl Default for ParticipantConfig {
    fn default() -> Self {
        Self {
            scheme: "http".to_string(),
            request_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8081,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 9090,
        }
    }
}

impl Settings {
    /// Load settings from configuration files
    pub fn load() -> Result<Self> {
        let config_path = env::var("TCC_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from a specific file
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::from_toml_str(&config_str)
    }

    /// Parse and validate settings from TOML text
    pub fn from_toml_str(input: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(input);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.coordinator.application_name.trim().is_empty() {
            anyhow::bail!("coordinator.application_name must not be blank");
        }

        let recovery = &self.recovery;
        if recovery.tick_ms == 0 || recovery.interval_ms == 0 {
            anyhow::bail!("recovery.tick_ms and recovery.interval_ms must be positive");
        }
        if recovery.tick_ms > recovery.interval_ms {
            anyhow::bail!(
                "recovery.tick_ms ({}) exceeds recovery.interval_ms ({})",
                recovery.tick_ms,
                recovery.interval_ms
            );
        }

        if recovery.endpoint.as_deref().map_or(true, |e| e.trim().is_empty()) {
            tracing::warn!("recovery.endpoint not configured - recovery passes will be refused");
        }

        Ok(())
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    lazy_static::lazy_static! {
        static ref ENV_VAR: regex::Regex =
            regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("static regex");
    }

    ENV_VAR
        .replace_all(input, |cap: &regex::Captures| {
            env::var(&cap[1]).unwrap_or_default()
        })
        .into_owned()
}
