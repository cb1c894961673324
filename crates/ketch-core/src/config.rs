use crate::model::SpeedLimit;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Engine configuration, loaded from `~/.config/ketch/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KetchConfig {
    /// Where bare-name destinations land.
    pub default_download_dir: PathBuf,
    /// Tasks allowed in the downloading phase at once.
    pub max_concurrent_downloads: usize,
    /// Downloading tasks allowed per host (lowercased URL authority).
    pub max_connections_per_host: usize,
    /// Parallel connections per task when the request does not say.
    pub default_connections: u32,
    /// Retries per unit of forward progress.
    pub retry_count: u32,
    /// Base backoff delay in milliseconds.
    pub retry_delay_ms: u64,
    /// Minimum interval between progress notifications.
    pub progress_interval_ms: u64,
    /// Per-segment idle-read timeout.
    pub read_timeout_secs: u64,
    /// When false, enqueued tasks stay QUEUED until explicitly resumed.
    pub auto_start: bool,
    /// Process-wide rate cap shared by all tasks.
    pub global_speed_limit: SpeedLimit,
}

impl Default for KetchConfig {
    fn default() -> Self {
        let home = std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            default_download_dir: home.join("Downloads"),
            max_concurrent_downloads: 3,
            max_connections_per_host: 4,
            default_connections: 4,
            retry_count: 3,
            retry_delay_ms: 500,
            progress_interval_ms: 200,
            read_timeout_secs: 30,
            auto_start: true,
            global_speed_limit: SpeedLimit::Unlimited,
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("ketch")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, writing a default file on first run.
pub fn load_or_init() -> Result<KetchConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = KetchConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: KetchConfig = toml::from_str(&data)?;
    Ok(cfg)
}
