use config::ConfigError as ConfigLibError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::common::utils::seconds;
use crate::probe::{Endpoint, InputError, ProbeOptions};

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse config file: {0}")]
    ParseError(String),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(#[from] InputError),
    #[error("Config library error: {0}")]
    ConfigLibError(#[from] ConfigLibError),
}

/// Configuration structure
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// Address of the SOCKS5 listener under test
    #[serde(default = "default_proxy_address")]
    pub proxy_address: String,
    /// Destinations to request via CONNECT, one probe each
    #[serde(default = "default_targets")]
    pub targets: Vec<String>,
    /// TCP connect timeout (seconds)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
    /// Per read/write timeout (seconds)
    #[serde(default = "default_io_timeout")]
    pub io_timeout: u64,
    /// Fail the greeting unless the proxy selects "no authentication"
    #[serde(default)]
    pub strict_method: bool,
    /// Log configuration
    #[serde(default)]
    pub log: LoggerConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggerConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log file path; console only when unset
    #[serde(default)]
    pub path: Option<String>,
    /// Log file archive pattern
    #[serde(default = "default_archive_pattern")]
    pub archive_pattern: String,
    /// Number of log files to keep
    #[serde(default = "default_file_count")]
    pub file_count: u32,
    /// Size of each log file (MB)
    #[serde(default = "default_file_size")]
    pub file_size: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            proxy_address: default_proxy_address(),
            targets: default_targets(),
            connect_timeout: default_connect_timeout(),
            io_timeout: default_io_timeout(),
            strict_method: false,
            log: LoggerConfig::default(),
        }
    }
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            path: None,
            archive_pattern: default_archive_pattern(),
            file_count: default_file_count(),
            file_size: default_file_size(),
        }
    }
}

fn default_proxy_address() -> String {
    "127.0.0.1:10808".to_string()
}

fn default_targets() -> Vec<String> {
    vec!["8.8.8.8:53".to_string()]
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_io_timeout() -> u64 {
    10
}

fn default_log_level() -> String {
    "Info".to_string()
}

fn default_archive_pattern() -> String {
    "logs/archive/socks-probe-{}.log".to_string()
}

fn default_file_count() -> u32 {
    5
}

/// Default file size in MB
fn default_file_size() -> u64 {
    10
}

impl Config {
    /// Load configuration from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .build()
            .map_err(ConfigError::ConfigLibError)?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate if configuration is valid
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.proxy()?;

        if self.targets.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "At least one target is required".to_string(),
            ));
        }
        self.target_endpoints()?;

        if seconds(self.connect_timeout).is_none() {
            return Err(ConfigError::InvalidConfig(
                "Connect timeout must be at least 1 second".to_string(),
            ));
        }
        if seconds(self.io_timeout).is_none() {
            return Err(ConfigError::InvalidConfig(
                "I/O timeout must be at least 1 second".to_string(),
            ));
        }

        Ok(())
    }

    pub fn proxy(&self) -> Result<Endpoint, ConfigError> {
        let proxy: Endpoint = self.proxy_address.parse()?;
        Ok(proxy.require_listening_port()?)
    }

    pub fn target_endpoints(&self) -> Result<Vec<Endpoint>, ConfigError> {
        self.targets
            .iter()
            .map(|t| t.parse::<Endpoint>().map_err(ConfigError::from))
            .collect()
    }

    pub fn probe_options(&self) -> Result<ProbeOptions, ConfigError> {
        let invalid =
            |name: &str| ConfigError::InvalidConfig(format!("{} must be non-zero", name));
        Ok(ProbeOptions {
            connect_timeout: seconds(self.connect_timeout)
                .ok_or_else(|| invalid("connect_timeout"))?,
            io_timeout: seconds(self.io_timeout).ok_or_else(|| invalid("io_timeout"))?,
            strict_method: self.strict_method,
        })
    }
}
