use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::domain::Cadence;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Values that may come from the optional TOML file
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    port: Option<u16>,
    bind: Option<String>,
    cadence_ms: Option<u64>,
    docker_bin: Option<String>,
    static_dir: Option<PathBuf>,
    log_level: Option<String>,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub cadence_ms: u64,
    pub docker_bin: String,
    pub static_dir: PathBuf,
    pub log_level: String,
}

impl Config {
    /// Load from `STATSTREAM_CONFIG` (if set) and then the environment, which wins.
    pub fn load() -> Result<Self, ConfigError> {
        let file = match env::var("STATSTREAM_CONFIG") {
            Ok(path) => Self::read_file(Path::new(&path))?,
            Err(_) => FileConfig::default(),
        };
        Ok(Self::from_sources(file, |key| env::var(key).ok()))
    }

    fn read_file(path: &Path) -> Result<FileConfig, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn from_sources(file: FileConfig, var: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            port: var("STATSTREAM_PORT")
                .and_then(|s| s.parse().ok())
                .or(file.port)
                .unwrap_or(3000),
            bind: var("STATSTREAM_BIND")
                .or(file.bind)
                .unwrap_or_else(|| "0.0.0.0".to_string()),
            cadence_ms: var("STATSTREAM_CADENCE_MS")
                .and_then(|s| s.parse().ok())
                .or(file.cadence_ms)
                .filter(|ms| *ms > 0)
                .unwrap_or(Cadence::DEFAULT_MILLIS),
            docker_bin: var("STATSTREAM_DOCKER_BIN")
                .or(file.docker_bin)
                .unwrap_or_else(|| "docker".to_string()),
            static_dir: var("STATSTREAM_STATIC_DIR")
                .map(PathBuf::from)
                .or(file.static_dir)
                .unwrap_or_else(|| PathBuf::from("public")),
            log_level: var("STATSTREAM_LOG_LEVEL")
                .or(file.log_level)
                .unwrap_or_else(|| "info".to_string()),
        }
    }

    pub fn default_cadence(&self) -> Cadence {
        Cadence::from_millis(self.cadence_ms)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}
