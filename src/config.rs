//! Collector configuration.
//!
//! Loaded from an optional YAML file; every key has a default. The binary
//! applies command-line overrides on top of the loaded value before
//! resolving targets and the catalog.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::catalog::{CatalogError, MetricCatalog, MetricDefinition};
use crate::driver::DEFAULT_CONNECT_TIMEOUT;
use crate::scheduler::{DEFAULT_DRAIN_TIMEOUT, DEFAULT_PERIOD, OverlapPolicy};
use crate::sink::SinkConfig;
use crate::target::{Target, TargetSpec};
use crate::util::deserialize_duration;

/// Smallest accepted collection period.
pub const MIN_PERIOD: Duration = Duration::from_secs(1);

/// Environment variable consulted when no target is configured.
pub const DEFAULT_TARGET_ENV: &str = "DATA_SOURCE_NAME";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("invalid metric catalog: {0}")]
    Catalog(#[from] CatalogError),

    #[error("no targets configured and ${0} is not set")]
    NoTargets(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    #[serde(deserialize_with = "deserialize_duration")]
    pub period: Duration,
    pub targets: Vec<TargetSpec>,
    /// Variable holding a fallback descriptor when `targets` is empty.
    pub default_target_env: String,
    pub overlap: OverlapPolicy,
    #[serde(deserialize_with = "deserialize_duration")]
    pub drain_timeout: Duration,
    #[serde(deserialize_with = "deserialize_duration")]
    pub connect_timeout: Duration,
    pub sink: SinkConfig,
    /// Replaces the built-in catalog when present.
    pub metrics: Option<Vec<MetricDefinition>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            period: DEFAULT_PERIOD,
            targets: Vec::new(),
            default_target_env: DEFAULT_TARGET_ENV.to_string(),
            overlap: OverlapPolicy::default(),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            sink: SinkConfig::default(),
            metrics: None,
        }
    }
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_yaml_str(&content)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Parses a YAML document. An empty document yields the defaults.
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Collection period, raised to [`MIN_PERIOD`] if configured lower.
    pub fn effective_period(&self) -> Duration {
        if self.period < MIN_PERIOD {
            warn!(
                "Period {:?} is below the minimum, using {:?}",
                self.period, MIN_PERIOD
            );
            MIN_PERIOD
        } else {
            self.period
        }
    }

    /// Targets to poll, falling back to the environment when none are
    /// configured.
    pub fn resolve_targets(&self) -> Result<Vec<Target>, ConfigError> {
        self.resolve_targets_with(|key| std::env::var(key).ok())
    }

    /// Same as [`resolve_targets`](Self::resolve_targets) with an explicit
    /// environment lookup.
    pub fn resolve_targets_with<F>(&self, lookup: F) -> Result<Vec<Target>, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.targets.is_empty() {
            let descriptor = lookup(&self.default_target_env)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .ok_or_else(|| ConfigError::NoTargets(self.default_target_env.clone()))?;
            info!("No targets configured, using ${}", self.default_target_env);
            return Ok(vec![Target::new(descriptor)]);
        }

        let targets: Vec<Target> = self.targets.iter().cloned().map(Target::from).collect();
        if let Some(idx) = targets.iter().position(|t| t.descriptor().trim().is_empty()) {
            return Err(ConfigError::Invalid(format!("target #{} has an empty descriptor", idx + 1)));
        }
        Ok(targets)
    }

    /// The configured catalog, or the built-in one.
    pub fn catalog(&self) -> Result<MetricCatalog, ConfigError> {
        match &self.metrics {
            Some(metrics) => Ok(MetricCatalog::new(metrics.clone())?),
            None => Ok(MetricCatalog::builtin()),
        }
    }
}
