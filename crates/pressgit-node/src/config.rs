//! Node configuration types.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for the pressgit node.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct NodeConfig {
    /// HTTP listen address for `serve`.
    pub listen_addr: SocketAddr,
    /// Repository directory.
    pub data_dir: PathBuf,
    /// Log level.
    pub log_level: String,
    /// `pretty` or `json`.
    pub log_format: String,
    /// Timeout for each request to a remote.
    pub request_timeout_secs: u64,
    /// Identity written into new repositories.
    pub user_name: Option<String>,
    /// Email written into new repositories.
    pub user_email: Option<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            data_dir: PathBuf::from("./data"),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            request_timeout_secs: 30,
            user_name: None,
            user_email: None,
        }
    }
}

impl NodeConfig {
    /// Loads `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
            .map_err(|e| anyhow::anyhow!("invalid config {}: {}", path.display(), e))
    }

    /// Parses YAML; missing keys keep their defaults.
    pub fn parse(text: &str) -> Result<Self, serde_yaml::Error> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text)
    }

    /// Request timeout as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
