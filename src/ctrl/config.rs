use std::path::Path;
use std::time::Duration;
use std::{fs, io};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::rdma::context::DeviceConfig;

/// Configuration loading error type.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file cannot be read.
    #[error("cannot read configuration: {0}")]
    Io(#[from] io::Error),

    /// The configuration is not valid TOML or has malformed fields.
    #[error("bad configuration: {0}")]
    Toml(#[from] toml::de::Error),

    /// There is no `[ccverbs]` table.
    #[error("ccverbs configuration not found")]
    MissingSection,
}

/// Sizing and timing of a managed-receive scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    /// Receive queue depth of the managed QP.
    pub qp_rx_depth: u32,

    /// Send queue depth of the managed QP and the managing QP.
    pub qp_tx_depth: u32,

    /// Depth of the send CQ.
    pub cq_tx_depth: u32,

    /// Depth of the receive CQ.
    pub cq_rx_depth: u32,

    /// Depth of the managing CQ.
    pub cq_mgmt_depth: u32,

    /// Number of steps a scenario drives.
    pub send_count: u64,

    /// How long a scenario keeps polling after its last post, in
    /// milliseconds.
    pub poll_timeout_ms: u64,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            qp_rx_depth: 64,
            qp_tx_depth: 64,
            cq_tx_depth: 128,
            cq_rx_depth: 128,
            cq_mgmt_depth: 16,
            send_count: 10,
            poll_timeout_ms: 100,
        }
    }
}

impl ScenarioConfig {
    /// Polling timeout as a [`Duration`].
    #[inline]
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

/// Top-level configuration, read from the `[ccverbs]` table of a TOML
/// document.
///
/// ```toml
/// [ccverbs.device]
/// max_qp = 16
///
/// [ccverbs.scenario]
/// send_count = 10
/// poll_timeout_ms = 50
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub device: DeviceConfig,
    pub scenario: ScenarioConfig,
}

impl Config {
    /// Load the configuration from a TOML file.
    pub fn load_toml(config_file: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let toml_str = fs::read_to_string(config_file)?;
        Self::from_toml_str(&toml_str)
    }

    /// Parse the configuration from a TOML string.
    pub fn from_toml_str(toml_str: &str) -> Result<Self, ConfigError> {
        let mut toml: toml::Table = toml::from_str(toml_str)?;
        let section = toml.remove("ccverbs").ok_or(ConfigError::MissingSection)?;
        Ok(section.try_into::<Config>()?)
    }
}
