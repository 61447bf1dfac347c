use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub playback: PlaybackConfig,

    #[serde(default)]
    pub download: DownloadConfig,

    #[serde(default)]
    pub backend: BackendConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PathsConfig {
    /// Base directory for all agent state. Defaults to the platform data
    /// directory, falling back to the current working directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Supervisor poll interval in seconds
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: f64,

    /// Display duration for images without an item duration, in seconds
    #[serde(default = "default_image_duration")]
    pub image_display_secs: u64,

    /// Whether to show the default screen when no playlist is available
    #[serde(default = "default_true")]
    pub show_default_screen: bool,

    /// Seconds without playable content before the default screen appears
    #[serde(default = "default_screen_timeout")]
    pub default_screen_timeout_secs: f64,

    /// Grace period after SIGTERM before the player process group is killed
    #[serde(default = "default_stop_grace")]
    pub stop_grace_secs: f64,

    /// Bounded wait for exit confirmation after SIGKILL
    #[serde(default = "default_stop_kill_wait")]
    pub stop_kill_wait_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Connect and read-inactivity timeout in seconds. Bounds how long a
    /// transfer may stall, not its total duration.
    #[serde(default = "default_download_timeout")]
    pub timeout_secs: u64,

    /// Number of parallel download workers
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Digest algorithm for cache verification ("sha256" or "sha512")
    #[serde(default = "default_checksum_algorithm")]
    pub checksum_algorithm: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub base_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_device_id")]
    pub device_id: String,

    /// Seconds between playlist refresh / cache sync cycles
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: f64,

    /// Seconds after startup before the built-in sample playlist is used
    /// as a last resort
    #[serde(default = "default_playlist_delay")]
    pub default_playlist_delay_secs: f64,

    /// HTTP timeout for backend playlist requests, in seconds
    #[serde(default = "default_backend_timeout")]
    pub timeout_secs: u64,
}

fn default_check_interval() -> f64 {
    1.0
}

fn default_image_duration() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

fn default_screen_timeout() -> f64 {
    30.0
}

fn default_stop_grace() -> f64 {
    2.0
}

fn default_stop_kill_wait() -> f64 {
    5.0
}

fn default_download_timeout() -> u64 {
    30
}

fn default_max_concurrent() -> usize {
    3
}

fn default_checksum_algorithm() -> String {
    "sha256".to_string()
}

fn default_device_id() -> String {
    "MARQUEE-001".to_string()
}

fn default_refresh_interval() -> f64 {
    60.0
}

fn default_playlist_delay() -> f64 {
    120.0
}

fn default_backend_timeout() -> u64 {
    10
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval(),
            image_display_secs: default_image_duration(),
            show_default_screen: true,
            default_screen_timeout_secs: default_screen_timeout(),
            stop_grace_secs: default_stop_grace(),
            stop_kill_wait_secs: default_stop_kill_wait(),
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_download_timeout(),
            max_concurrent: default_max_concurrent(),
            checksum_algorithm: default_checksum_algorithm(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: String::new(),
            api_key: None,
            device_id: default_device_id(),
            refresh_interval_secs: default_refresh_interval(),
            default_playlist_delay_secs: default_playlist_delay(),
            timeout_secs: default_backend_timeout(),
        }
    }
}

impl PlaybackConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs_f64(self.check_interval_secs)
    }

    pub fn default_screen_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.default_screen_timeout_secs)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs_f64(self.stop_grace_secs)
    }

    pub fn stop_kill_wait(&self) -> Duration {
        Duration::from_secs_f64(self.stop_kill_wait_secs)
    }
}

impl BackendConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs_f64(self.refresh_interval_secs)
    }

    pub fn default_playlist_delay(&self) -> Duration {
        Duration::from_secs_f64(self.default_playlist_delay_secs)
    }
}

impl Config {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_config_path()?,
        };

        if config_path.exists() {
            debug!("Loading config from {:?}", config_path);
            let contents = fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config file {:?}", config_path))?;
            let config: Config =
                toml::from_str(&contents).context("Failed to parse config file")?;
            info!("Config loaded from {:?}", config_path);
            Ok(config)
        } else {
            info!("No config file found, using defaults");
            Ok(Config::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {:?}", parent))?;
        }
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file {:?}", path))?;
        Ok(())
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Failed to get config directory"))?;
        Ok(config_dir.join("marquee").join("config.toml"))
    }

    pub fn base_dir(&self) -> PathBuf {
        if let Some(ref dir) = self.paths.base_dir {
            return dir.clone();
        }
        dirs::data_local_dir()
            .map(|d| d.join("marquee"))
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn media_cache_dir(&self) -> PathBuf {
        self.base_dir().join("media_cache")
    }

    pub fn playlist_file(&self) -> PathBuf {
        self.base_dir().join("current_playlist.json")
    }

    pub fn playlist_backup_file(&self) -> PathBuf {
        self.base_dir().join("current_playlist.json.backup")
    }

    pub fn playback_state_file(&self) -> PathBuf {
        self.base_dir().join("playback_state.json")
    }

    pub fn default_screen_path(&self) -> PathBuf {
        self.base_dir().join("default_assets").join("default_screen.png")
    }

    pub fn media_path(&self, filename: &str) -> PathBuf {
        self.media_cache_dir().join(filename)
    }

    /// Create the directory layout the agent expects.
    pub fn ensure_directories(&self) -> Result<usize> {
        let dirs = [
            self.base_dir(),
            self.media_cache_dir(),
            self.base_dir().join("default_assets"),
        ];
        for dir in &dirs {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory {:?}", dir))?;
        }
        Ok(dirs.len())
    }
}
