//! Configuration module for the echo server.
//!
//! Supports both command-line arguments and an optional TOML configuration
//! file. CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::PathBuf;

/// Port used when neither the command line nor the config file names one.
pub const DEFAULT_PORT: u16 = 80;

/// Command-line arguments for the echo server
#[derive(Parser, Debug)]
#[command(name = "echo-server")]
#[command(about = "A line-oriented TCP echo server", long_about = None)]
#[command(disable_help_flag = true, disable_version_flag = true)]
pub struct CliArgs {
    /// Listen on this port (default 80)
    #[arg(short = 'p', long, value_parser = clap::value_parser!(u16).range(1..))]
    pub port: Option<u16>,

    /// Verbose: print each received line
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level for diagnostics (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// Log every received line to stdout
    #[serde(default)]
    pub verbose: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            verbose: false,
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub verbose: bool,
    pub log_level: String,
}

impl Config {
    /// Load configuration from the process arguments and optional TOML file.
    ///
    /// Invalid arguments make clap print usage and exit the process.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::parse())
    }

    /// Resolve parsed CLI arguments against the optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            let parsed: TomlConfig = toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?;
            if parsed.server.port == 0 {
                return Err(ConfigError::InvalidPort(config_path.clone()));
            }
            parsed
        } else {
            TomlConfig::default()
        };

        Ok(Config {
            port: cli.port.unwrap_or(toml_config.server.port),
            verbose: cli.verbose || toml_config.server.verbose,
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }

    /// IPv4 wildcard address on the configured port.
    pub fn listen_addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, self.port)
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    InvalidPort(PathBuf),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::InvalidPort(path) => {
                write!(
                    f,
                    "Invalid port number (out of range) in config file '{}': 0",
                    path.display()
                )
            }
        }
    }
}

impl std::error::Error for ConfigError {}
