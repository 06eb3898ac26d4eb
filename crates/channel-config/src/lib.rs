//! # Channel Configuration
//!
//! YAML configuration for command channels.
//!
//! This crate parses a file of named targets and channel settings and turns the
//! targets into ready [`command_channel::Connection`]s.

#![warn(missing_docs)]

use command_channel::{ContainerConfig, SshConfig, TerminalConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

pub mod parser;
pub mod resolver;

pub use resolver::ConfigResolver;

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse YAML
    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    /// Environment variable not found
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    /// Target reference not found
    #[error("Target '{0}' not found")]
    TargetNotFound(String),
}

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Configuration version
    pub version: String,

    /// Global settings
    #[serde(default, skip_serializing_if = "Settings::is_default")]
    pub settings: Settings,

    /// Target definitions by name
    #[serde(default)]
    pub targets: BTreeMap<String, TargetSpec>,
}

/// Global settings
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Settings {
    /// Default log level
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// Timeout for helper commands, in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_timeout_ms: Option<u64>,

    /// Wait for each PID of the FIFO handshake, in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handshake_timeout_secs: Option<u64>,

    /// Terminal hosting FIFO-bridged debuggers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminal: Option<TerminalConfig>,
}

impl Settings {
    /// Check if settings are default (all None)
    fn is_default(&self) -> bool {
        self == &Settings::default()
    }

    /// Log level, `info` unless configured
    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }

    /// Timeout for helper commands
    pub fn command_timeout(&self) -> Duration {
        self.command_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(command_channel::connection::DEFAULT_COMMAND_TIMEOUT)
    }

    /// Wait for each PID of the FIFO handshake
    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(command_channel::transport::DEFAULT_HANDSHAKE_TIMEOUT)
    }

    /// Terminal config, the platform default unless configured
    pub fn terminal(&self) -> TerminalConfig {
        self.terminal.clone().unwrap_or_default()
    }
}

/// Target type variants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TargetSpec {
    /// The local machine
    Local,

    /// Remote host over SSH
    Ssh(SshConfig),

    /// Docker container
    Container {
        /// Container settings
        #[serde(flatten)]
        config: ContainerConfig,
        /// Target hosting the container (local machine if absent)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        via: Option<String>,
    },
}

impl TargetSpec {
    /// Name of the target this one is reached through
    pub fn via(&self) -> Option<&str> {
        match self {
            TargetSpec::Container { via, .. } => via.as_deref(),
            _ => None,
        }
    }
}
