//! Server configuration.

use std::path::{Path, PathBuf};

use concord_vision::VisionConfig;
use serde::{Deserialize, Serialize};

/// Top-level service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Port the HTTP API binds to.
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Directory holding per-run artifacts, the run history log and the trend chart.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Finished jobs retained in the registry before the oldest are evicted.
    #[serde(default = "default_max_jobs")]
    pub max_jobs: usize,
    /// Model paths and proposer thresholds.
    #[serde(default)]
    pub vision: VisionConfig,
}

fn default_http_port() -> u16 {
    8080
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_max_jobs() -> usize {
    64
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            http_port: default_http_port(),
            data_dir: default_data_dir(),
            max_jobs: default_max_jobs(),
            vision: VisionConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Loads a TOML configuration file. Missing keys fall back to defaults.
    pub fn from_file(path: &Path) -> Result<ServerConfig, String> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read config file {}: {}", path.display(), e))?;
        toml::from_str(&raw).map_err(|e| format!("invalid config file {}: {}", path.display(), e))
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.http_port == 0 {
            return Err("http_port must be non-zero".to_string());
        }
        if self.max_jobs == 0 {
            return Err("max_jobs must be at least 1".to_string());
        }
        self.vision.validate()
    }
}
