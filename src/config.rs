//! Configuration module for caret-echo.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments for the echo server
#[derive(Parser, Debug, Default)]
#[command(name = "caret-echo")]
#[command(author = "caret-echo authors")]
#[command(version = "0.1.0")]
#[command(about = "A marker-framed TCP echo server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0:9090)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Port to listen on, overriding the port in --listen
    #[arg(short = 'p', long)]
    pub port: Option<u16>,

    /// Number of worker threads, at least 1 (defaults to number of CPU cores)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Seconds to wait for open connections on shutdown (unset = wait forever)
    #[arg(long = "drain-timeout")]
    pub drain_timeout_secs: Option<u64>,

    /// Log level (trace, debug, info, warn, error) [default: info]
    #[arg(long)]
    pub log_level: Option<String>,
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
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Port override for `listen`
    pub port: Option<u16>,
    /// Listen backlog
    #[serde(default = "default_backlog")]
    pub backlog: u32,
    /// Number of worker threads
    pub workers: Option<usize>,
    /// Upper bound on the shutdown drain, in seconds
    pub drain_timeout_secs: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            port: None,
            backlog: default_backlog(),
            workers: None,
            drain_timeout_secs: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level
    pub level: Option<String>,
}

fn default_listen() -> String {
    "0.0.0.0:9090".to_string()
}

fn default_backlog() -> u32 {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub backlog: u32,
    pub workers: Option<usize>,
    pub drain_timeout: Option<Duration>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    /// Merge CLI args over TOML values (CLI takes precedence).
    pub fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let server = toml_config.server;

        // The file's port only refines the file's address; --listen replaces both.
        let mut listen = match cli.listen {
            Some(addr) => parse_listen(addr)?,
            None => {
                let mut addr = parse_listen(server.listen)?;
                if let Some(port) = server.port {
                    addr.set_port(port);
                }
                addr
            }
        };
        if let Some(port) = cli.port {
            listen.set_port(port);
        }

        let workers = cli.workers.or(server.workers);
        if workers == Some(0) {
            return Err(ConfigError::InvalidWorkers);
        }

        Ok(Config {
            listen,
            backlog: server.backlog,
            workers,
            drain_timeout: cli
                .drain_timeout_secs
                .or(server.drain_timeout_secs)
                .map(Duration::from_secs),
            log_level: cli
                .log_level
                .or(toml_config.logging.level)
                .unwrap_or_else(default_log_level),
        })
    }

    /// Resolved worker thread count.
    pub fn worker_threads(&self) -> usize {
        self.workers.unwrap_or_else(num_cpus)
    }
}

fn parse_listen(addr: String) -> Result<SocketAddr, ConfigError> {
    addr.parse().map_err(|_| ConfigError::InvalidListen(addr))
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    InvalidListen(String),
    InvalidWorkers,
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
            ConfigError::InvalidListen(addr) => {
                write!(f, "Invalid listen address '{addr}'")
            }
            ConfigError::InvalidWorkers => {
                write!(f, "Worker thread count must be at least 1")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
impl Config {
    /// Loopback config on an ephemeral port.
    pub fn for_tests() -> Self {
        Config {
            listen: "127.0.0.1:0".parse().unwrap(),
            backlog: 128,
            workers: Some(2),
            drain_timeout: None,
            log_level: "debug".to_string(),
        }
    }
}
