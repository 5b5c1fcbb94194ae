use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

pub const SETTINGS_FILE: &str = "settings.toml";
pub const STATS_FILE: &str = "stats.jsonl";
pub const SOCKET_FILE: &str = "facewatch.socket";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("detect_interval_ms must be greater than zero")]
    ZeroInterval,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_port")]
    pub port: u16,
}

fn default_http_port() -> u16 {
    8080
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: default_http_port(),
        }
    }
}

fn default_detect_interval_ms() -> u64 {
    5000
}

fn default_max_probe() -> u32 {
    10
}

fn default_cascade_path() -> PathBuf {
    PathBuf::from("haarcascade_frontalface_default.xml")
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    /// Minimum spacing between two processed frames.
    #[serde(default = "default_detect_interval_ms")]
    pub detect_interval_ms: u64,
    /// Camera indices `0..max_probe` are probed at startup.
    #[serde(default = "default_max_probe")]
    pub max_probe: u32,
    #[serde(default = "default_cascade_path")]
    pub cascade_path: PathBuf,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            detect_interval_ms: default_detect_interval_ms(),
            max_probe: default_max_probe(),
            cascade_path: default_cascade_path(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".")
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub broken: bool,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub camera: CameraConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            broken: false,
            http: HttpConfig::default(),
            camera: CameraConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// A missing file yields the defaults; an unreadable or invalid one is an error.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;

        if config.camera.detect_interval_ms == 0 {
            return Err(ConfigError::ZeroInterval);
        }

        Ok(config)
    }

    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join(SETTINGS_FILE)
    }

    pub fn stats_path(&self) -> PathBuf {
        self.data_dir.join(STATS_FILE)
    }

    pub fn socket_path(&self) -> PathBuf {
        self.data_dir.join(SOCKET_FILE)
    }
}
