use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Top-level configuration loaded from a TOML file, with environment
/// variables (`FFMPEG_PATH`, `JWT_SECRET`, `ENC_KEY`, `MEDIA_BASE_URL`,
/// `ANPR_ENABLED`) layered on top at startup.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub transcoder: TranscoderConfig,
    #[serde(default)]
    pub anpr: AnprConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_live_segment_secs")]
    pub live_segment_secs: u32,
    #[serde(default = "default_live_window")]
    pub live_window_segments: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            live_segment_secs: default_live_segment_secs(),
            live_window_segments: default_live_window(),
        }
    }
}

fn default_data_dir() -> String {
    "data".to_string()
}
fn default_live_segment_secs() -> u32 {
    2
}
fn default_live_window() -> u32 {
    6
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HealthConfig {
    #[serde(default = "default_health_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_health_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_health_interval_secs(),
            timeout_secs: default_health_timeout_secs(),
        }
    }
}

fn default_health_interval_secs() -> u64 {
    30
}
fn default_health_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TranscoderConfig {
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,
    #[serde(default = "default_restart_initial_backoff_secs")]
    pub restart_initial_backoff_secs: u64,
    #[serde(default = "default_restart_max_backoff_secs")]
    pub restart_max_backoff_secs: u64,
    /// Consecutive failed restarts tolerated before the supervisor gives up
    /// and transitions to `Failed` instead of retrying again.
    #[serde(default = "default_restart_max_attempts")]
    pub restart_max_attempts: u32,
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: default_grace_period_secs(),
            restart_initial_backoff_secs: default_restart_initial_backoff_secs(),
            restart_max_backoff_secs: default_restart_max_backoff_secs(),
            restart_max_attempts: default_restart_max_attempts(),
        }
    }
}

fn default_grace_period_secs() -> u64 {
    2
}
fn default_restart_initial_backoff_secs() -> u64 {
    5
}
fn default_restart_max_backoff_secs() -> u64 {
    60
}
fn default_restart_max_attempts() -> u32 {
    8
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AnprConfig {
    #[serde(default = "default_extract_timeout_secs")]
    pub extract_timeout_secs: u64,
    #[serde(default = "default_inference_timeout_secs")]
    pub inference_timeout_secs: u64,
    #[serde(default = "default_dedup_window_secs")]
    pub dedup_window_secs: u64,
    #[serde(default = "default_dedup_prune_interval_secs")]
    pub dedup_prune_interval_secs: u64,
}

impl Default for AnprConfig {
    fn default() -> Self {
        Self {
            extract_timeout_secs: default_extract_timeout_secs(),
            inference_timeout_secs: default_inference_timeout_secs(),
            dedup_window_secs: default_dedup_window_secs(),
            dedup_prune_interval_secs: default_dedup_prune_interval_secs(),
        }
    }
}

fn default_extract_timeout_secs() -> u64 {
    5
}
fn default_inference_timeout_secs() -> u64 {
    15
}
fn default_dedup_window_secs() -> u64 {
    5
}
fn default_dedup_prune_interval_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RetentionConfig {
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

fn default_sweep_interval_secs() -> u64 {
    24 * 3600
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            health: HealthConfig::default(),
            transcoder: TranscoderConfig::default(),
            anpr: AnprConfig::default(),
            retention: RetentionConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file at `path`.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: Config = toml::from_str(&content).context("parsing config TOML")?;
        config.validate().context("validating config")?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("server.port must be nonzero");
        }
        if self.storage.live_segment_secs == 0 {
            anyhow::bail!("storage.live-segment-secs must be > 0");
        }
        if self.storage.live_window_segments == 0 {
            anyhow::bail!("storage.live-window-segments must be > 0");
        }
        if self.health.interval_secs == 0 {
            anyhow::bail!("health.interval-secs must be > 0");
        }
        if self.transcoder.restart_max_attempts == 0 {
            anyhow::bail!("transcoder.restart-max-attempts must be > 0");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn from_file_reads_minimal_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vms.toml");
        std::fs::write(&path, "[server]\nport = 9090\n").unwrap();
        let cfg = Config::from_file(&path).unwrap();
        assert_eq!(cfg.server.port, 9090);
        assert_eq!(cfg.storage.live_segment_secs, 2);
    }

    #[test]
    fn from_file_rejects_zero_interval() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vms.toml");
        std::fs::write(&path, "[health]\ninterval-secs = 0\n").unwrap();
        assert!(Config::from_file(&path).is_err());
    }
}
