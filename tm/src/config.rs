//! Configuration types and loading

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{Context, Result};
use muxcore::MuxConfig;
use serde::{Deserialize, Serialize};

use crate::framing::LengthHeader;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Multiplexing engine settings
    pub mux: MuxConfig,

    /// Socket settings shared by client and server
    pub network: NetworkConfig,

    /// Echo service settings
    pub echo: EchoConfig,
}

impl Config {
    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        self.mux.validate().context("Invalid mux configuration")?;
        if self.network.host.is_empty() {
            eyre::bail!("network.host must not be empty");
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .tcpmux.yml
        let local_config = PathBuf::from(".tcpmux.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/tcpmux/tcpmux.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("tcpmux").join("tcpmux.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        config.validate()?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Host the server binds to and the client connects to
    pub host: String,

    pub port: u16,

    /// Width of the frame length header in bytes (1, 2 or 4)
    #[serde(rename = "length-header-bytes")]
    pub length_header: LengthHeader,

    #[serde(rename = "connect-timeout-ms")]
    pub connect_timeout_ms: u64,
}

impl NetworkConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 10000,
            length_header: LengthHeader::One,
            connect_timeout_ms: 5000,
        }
    }
}

/// Echo service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EchoConfig {
    /// Delay before answering `TIMEOUT_TEST...` inputs
    #[serde(rename = "slow-delay-ms")]
    pub slow_delay_ms: u64,
}

impl EchoConfig {
    pub fn slow_delay(&self) -> Duration {
        Duration::from_millis(self.slow_delay_ms)
    }
}

impl Default for EchoConfig {
    fn default() -> Self {
        Self { slow_delay_ms: 3000 }
    }
}
