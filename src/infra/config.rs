//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use crate::domain::geo::DistanceBackend;
use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct GpsdConfig {
    #[serde(default = "default_gpsd_host")]
    pub host: String,
    #[serde(default = "default_gpsd_port")]
    pub port: u16,
}

fn default_gpsd_host() -> String {
    "localhost".to_string()
}

fn default_gpsd_port() -> u16 {
    2947
}

impl Default for GpsdConfig {
    fn default() -> Self {
        Self { host: default_gpsd_host(), port: default_gpsd_port() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollConfig {
    /// How long to wait for data before reporting a timeout
    #[serde(default = "default_poll_timeout_ms")]
    pub timeout_ms: u64,
    /// Pacing delay after every poll cycle
    #[serde(default = "default_poll_sleep_ms")]
    pub sleep_ms: u64,
}

fn default_poll_timeout_ms() -> u64 {
    2000
}

fn default_poll_sleep_ms() -> u64 {
    500
}

impl Default for PollConfig {
    fn default() -> Self {
        Self { timeout_ms: default_poll_timeout_ms(), sleep_ms: default_poll_sleep_ms() }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct GeoConfig {
    #[serde(default)]
    pub backend: DistanceBackend,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplayConfig {
    /// JSON-lines file of gpsd reports
    pub file: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
}

fn default_metrics_interval() -> u64 {
    30
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval() }
    }
}

/// One configured geofence
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WatchConfig {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    pub radius_m: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub gpsd: GpsdConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub geo: GeoConfig,
    #[serde(default)]
    pub replay: Option<ReplayConfig>,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub watches: Vec<WatchConfig>,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    gpsd_host: String,
    gpsd_port: u16,
    poll_timeout_ms: u64,
    poll_sleep_ms: u64,
    distance_backend: DistanceBackend,
    replay_file: Option<String>,
    metrics_interval_secs: u64,
    watches: Vec<WatchConfig>,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gpsd_host: default_gpsd_host(),
            gpsd_port: default_gpsd_port(),
            poll_timeout_ms: default_poll_timeout_ms(),
            poll_sleep_ms: default_poll_sleep_ms(),
            distance_backend: DistanceBackend::default(),
            replay_file: None,
            metrics_interval_secs: default_metrics_interval(),
            watches: Vec::new(),
            config_file: "default".to_string(),
        }
    }
}

impl Config {
    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    return path.clone();
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                return path.to_string();
            }
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self {
            gpsd_host: toml_config.gpsd.host,
            gpsd_port: toml_config.gpsd.port,
            poll_timeout_ms: toml_config.poll.timeout_ms,
            poll_sleep_ms: toml_config.poll.sleep_ms,
            distance_backend: toml_config.geo.backend,
            replay_file: toml_config.replay.map(|r| r.file),
            metrics_interval_secs: toml_config.metrics.interval_secs,
            watches: toml_config.watches,
            config_file: path.display().to_string(),
        })
    }

    /// Load configuration from a path, falling back to defaults on error
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(error = %format!("{:#}", e), "config_load_failed_using_defaults");
                Self::default()
            }
        }
    }

    pub fn gpsd_host(&self) -> &str {
        &self.gpsd_host
    }

    pub fn gpsd_port(&self) -> u16 {
        self.gpsd_port
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn poll_sleep(&self) -> Duration {
        Duration::from_millis(self.poll_sleep_ms)
    }

    pub fn distance_backend(&self) -> DistanceBackend {
        self.distance_backend
    }

    pub fn replay_file(&self) -> Option<&str> {
        self.replay_file.as_deref()
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn watches(&self) -> &[WatchConfig] {
        &self.watches
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method to override the gpsd endpoint
    pub fn with_gpsd(mut self, host: impl Into<String>, port: u16) -> Self {
        self.gpsd_host = host.into();
        self.gpsd_port = port;
        self
    }

    /// Builder method to override poll timing
    pub fn with_poll(mut self, timeout: Duration, sleep: Duration) -> Self {
        self.poll_timeout_ms = timeout.as_millis() as u64;
        self.poll_sleep_ms = sleep.as_millis() as u64;
        self
    }
}
