//! ---
//! rao_section: "01-core-functionality"
//! rao_subsection: "module"
//! rao_type: "source"
//! rao_scope: "code"
//! rao_description: "Shared primitives and utilities for the pipeline runtime."
//! rao_version: "v0.0.0-prealpha"
//! rao_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9898))
}

fn default_max_concurrent_cases() -> usize {
    1
}

fn default_required_profiles() -> Vec<String> {
    ["CO", "AE", "RA", "FL"]
        .iter()
        .map(|k| (*k).to_owned())
        .collect()
}

/// Primary configuration object for the pipeline daemon.
///
/// `storage`, `parameters`, `dispatch` and `engine` carry no defaults: a
/// deployment must state them explicitly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    pub storage: StorageConfig,
    pub parameters: ParametersConfig,
    pub dispatch: DispatchConfig,
    pub engine: EngineConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "RAO_CONFIG";

    /// Load configuration from disk, respecting the `RAO_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.dispatch.validate()?;
        self.engine.validate()?;
        self.pipeline.validate()?;
        self.parameters.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
    /// Filter directive used when `RAO_LOG` is unset.
    #[serde(default)]
    pub level: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
            level: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            listen: default_metrics_listen(),
        }
    }
}

/// Where profiles are fetched from and where results and run status land.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub input_root: PathBuf,
    pub output_root: PathBuf,
    pub journal_path: PathBuf,
}

/// Location of the versioned optimisation parameter document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParametersConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub override_path: Option<PathBuf>,
    #[serde(default)]
    pub expected_version: Option<String>,
    #[serde(default)]
    pub horizon_overrides: Vec<HorizonOverride>,
}

impl ParametersConfig {
    pub fn validate(&self) -> Result<()> {
        for entry in &self.horizon_overrides {
            if entry.time_horizon.trim().is_empty() {
                return Err(anyhow!("parameter horizon override requires a time_horizon"));
            }
            if entry.path.split('.').any(|segment| segment.is_empty()) {
                return Err(anyhow!(
                    "parameter horizon override for '{}' has an invalid path '{}'",
                    entry.time_horizon,
                    entry.path
                ));
            }
        }
        Ok(())
    }

    /// Overrides that apply to the provided time horizon, in declaration order.
    pub fn overrides_for<'a>(
        &'a self,
        time_horizon: &'a str,
    ) -> impl Iterator<Item = &'a HorizonOverride> + 'a {
        self.horizon_overrides
            .iter()
            .filter(move |entry| entry.time_horizon == time_horizon)
    }
}

/// A single dotted-path parameter replacement applied for one time horizon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HorizonOverride {
    pub time_horizon: String,
    pub path: String,
    pub value: serde_json::Value,
}

/// Dispatch timeout and retry policy. Every numeric field is required.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(rename = "timeout_secs")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub timeout: Duration,
    pub retry_budget: u32,
    #[serde(rename = "backoff_base_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub backoff_base: Duration,
    #[serde(rename = "backoff_max_ms", default)]
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    pub backoff_max: Option<Duration>,
    #[serde(rename = "jitter_ms", default)]
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    pub jitter: Option<Duration>,
    #[serde(rename = "poll_interval_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub poll_interval: Duration,
    #[serde(rename = "late_result_horizon_secs")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub late_result_horizon: Duration,
}

impl DispatchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(anyhow!("dispatch.timeout_secs must be greater than zero"));
        }
        if self.poll_interval.is_zero() {
            return Err(anyhow!("dispatch.poll_interval_ms must be greater than zero"));
        }
        if self.poll_interval >= self.timeout {
            return Err(anyhow!(
                "dispatch.poll_interval_ms ({:?}) must be shorter than the timeout ({:?})",
                self.poll_interval,
                self.timeout
            ));
        }
        if let Some(max) = self.backoff_max {
            if max < self.backoff_base {
                return Err(anyhow!(
                    "dispatch.backoff_max_ms must not be smaller than backoff_base_ms"
                ));
            }
        }
        Ok(())
    }
}

/// External optimisation engine invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    #[serde(default)]
    pub env: IndexMap<String, String>,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.command.trim().is_empty() {
            return Err(anyhow!("engine.command must not be empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_max_concurrent_cases")]
    pub max_concurrent_cases: usize,
    /// Header keywords that must be present among a case's fetched documents.
    #[serde(default = "default_required_profiles")]
    pub required_profiles: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_cases: default_max_concurrent_cases(),
            required_profiles: default_required_profiles(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_cases == 0 {
            return Err(anyhow!("pipeline.max_concurrent_cases must be at least 1"));
        }
        if self.required_profiles.is_empty() {
            return Err(anyhow!("pipeline.required_profiles must not be empty"));
        }
        Ok(())
    }
}
