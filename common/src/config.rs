use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    /// TLS is optional so the server can run over plain HTTP on a bench.
    #[serde(default)]
    pub tls: Option<TlsConfig>,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub pantilt: PanTiltConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
    #[serde(default = "default_index_file")]
    pub index_file: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    #[serde(default = "default_camera_driver")]
    pub driver: String,
    #[serde(default = "default_camera_command")]
    pub command: String,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_framerate")]
    pub framerate: u32,
    #[serde(default = "default_true")]
    pub hflip: bool,
    #[serde(default = "default_true")]
    pub vflip: bool,
    /// Delay between opening the sensor and streaming, lets auto-exposure settle.
    #[serde(default = "default_warmup_ms")]
    pub warmup_ms: u64,
    /// Upper bound on how long a stop request waits to be noticed.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub replay_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PanTiltConfig {
    #[serde(default = "default_pantilt_driver")]
    pub driver: String,
    #[serde(default = "default_i2c_device")]
    pub i2c_device: PathBuf,
    #[serde(default = "default_i2c_address")]
    pub address: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            static_dir: default_static_dir(),
            index_file: default_index_file(),
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            driver: default_camera_driver(),
            command: default_camera_command(),
            width: default_width(),
            height: default_height(),
            framerate: default_framerate(),
            hflip: true,
            vflip: true,
            warmup_ms: default_warmup_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            replay_path: None,
        }
    }
}

impl CameraConfig {
    pub fn warmup(&self) -> Duration {
        Duration::from_millis(self.warmup_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl Default for PanTiltConfig {
    fn default() -> Self {
        Self {
            driver: default_pantilt_driver(),
            i2c_device: default_i2c_device(),
            address: default_i2c_address(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
}

// Default value functions
fn default_bind() -> String {
    "0.0.0.0:443".into()
}
fn default_static_dir() -> PathBuf {
    PathBuf::from("static")
}
fn default_index_file() -> String {
    "index.html".into()
}
fn default_camera_driver() -> String {
    "rpicam".into()
}
fn default_camera_command() -> String {
    "rpicam-vid".into()
}
fn default_width() -> u32 {
    320
}
fn default_height() -> u32 {
    240
}
fn default_framerate() -> u32 {
    10
}
fn default_true() -> bool {
    true
}
fn default_warmup_ms() -> u64 {
    2000
}
fn default_poll_interval_ms() -> u64 {
    200
}
fn default_pantilt_driver() -> String {
    "hat".into()
}
fn default_i2c_device() -> PathBuf {
    PathBuf::from("/dev/i2c-1")
}
fn default_i2c_address() -> u16 {
    0x15
}
fn default_log_level() -> String {
    "info".into()
}
