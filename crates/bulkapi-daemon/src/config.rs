//! Process configuration: a serde struct with per-field defaults, overlaid by environment
//! variables. No config file format is supported — every knob this deployment needs is a
//! single environment variable.

use bulkapi_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,

    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,

    #[serde(default = "default_preview_endpoint")]
    pub preview_endpoint: Option<String>,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_base_dir() -> PathBuf {
    PathBuf::from("./bulk-data")
}

fn default_bind_addr() -> SocketAddr {
    "0.0.0.0:8080".parse().expect("static default must parse")
}

fn default_preview_endpoint() -> Option<String> {
    None
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            bind_addr: default_bind_addr(),
            preview_endpoint: default_preview_endpoint(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Overlay environment variables (`BULKAPI_BASE_DIR`, `BULKAPI_BIND_ADDR`,
    /// `BULKAPI_PREVIEW_ENDPOINT`, `BULKAPI_LOG_LEVEL`) onto the defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();
        if let Ok(v) = std::env::var("BULKAPI_BASE_DIR") {
            config.base_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("BULKAPI_BIND_ADDR") {
            config.bind_addr = v
                .parse()
                .map_err(|e| Error::Config(format!("BULKAPI_BIND_ADDR: {e}")))?;
        }
        if let Ok(v) = std::env::var("BULKAPI_PREVIEW_ENDPOINT") {
            config.preview_endpoint = Some(v);
        }
        if let Ok(v) = std::env::var("BULKAPI_LOG_LEVEL") {
            config.log_level = v;
        }
        Ok(config)
    }
}
