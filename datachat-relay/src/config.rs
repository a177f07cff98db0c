//! Configuration system for the `DataChat` relay server.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/datachat-relay/config.toml`)
//! 4. Compiled defaults

use std::path::PathBuf;

use datachat_proto::frame::{DEFAULT_BROADCAST_TOKEN, DEFAULT_MAX_PAYLOAD, MAX_DATAGRAM_SIZE};

use crate::dispatcher::{DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKERS, PoolSettings};
use crate::router::RouterSettings;

/// Errors that can occur when loading relay configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// A resolved value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure for the relay.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct RelayConfigFile {
    server: ServerFileConfig,
    log: LogFileConfig,
}

/// `[server]` section of the relay config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    bind_addr: Option<String>,
    max_payload_size: Option<usize>,
    workers: Option<usize>,
    queue_capacity: Option<usize>,
    broadcast_token: Option<String>,
}

/// `[log]` section of the relay config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct LogFileConfig {
    file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// CLI arguments for the relay server.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "DataChat UDP relay server")]
pub struct RelayCliArgs {
    /// UDP address to bind the relay to.
    #[arg(short, long, env = "DATACHAT_ADDR")]
    pub bind: Option<String>,

    /// Path to config file (default: `~/.config/datachat-relay/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Largest binary payload relayed, in bytes.
    #[arg(long)]
    pub max_payload_size: Option<usize>,

    /// Number of worker tasks decoding and routing datagrams.
    #[arg(long)]
    pub workers: Option<usize>,

    /// Datagrams that may wait for a worker before new ones are dropped.
    #[arg(long)]
    pub queue_capacity: Option<usize>,

    /// Destination name meaning "everyone except the sender".
    #[arg(long)]
    pub broadcast_token: Option<String>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "DATACHAT_LOG")]
    pub log_level: String,

    /// Write logs to this file instead of stderr.
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved relay server configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind the UDP socket to (e.g., `0.0.0.0:5000`).
    pub bind_addr: String,
    /// Largest binary payload relayed, in bytes.
    pub max_payload_size: usize,
    /// Number of worker tasks.
    pub workers: usize,
    /// Bounded job queue length.
    pub queue_capacity: usize,
    /// Reserved broadcast destination.
    pub broadcast_token: String,
    /// Log level filter string.
    pub log_level: String,
    /// Optional log file; stderr when `None`.
    pub log_file: Option<PathBuf>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5000".to_string(),
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            broadcast_token: DEFAULT_BROADCAST_TOKEN.to_string(),
            log_level: "info".to_string(),
            log_file: None,
        }
    }
}

impl RelayConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// If no `--config` is given, the default path is tried and missing file
    /// is treated as empty config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed, or if a resolved value is out of range.
    pub fn load(cli: &RelayCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        let config = Self::resolve(cli, &file);
        config.validate()?;
        Ok(config)
    }

    /// Resolve a `RelayConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    #[must_use]
    fn resolve(cli: &RelayCliArgs, file: &RelayConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            bind_addr: cli
                .bind
                .clone()
                .or_else(|| file.server.bind_addr.clone())
                .unwrap_or(defaults.bind_addr),
            max_payload_size: cli
                .max_payload_size
                .or(file.server.max_payload_size)
                .unwrap_or(defaults.max_payload_size),
            workers: cli
                .workers
                .or(file.server.workers)
                .unwrap_or(defaults.workers),
            queue_capacity: cli
                .queue_capacity
                .or(file.server.queue_capacity)
                .unwrap_or(defaults.queue_capacity),
            broadcast_token: cli
                .broadcast_token
                .clone()
                .or_else(|| file.server.broadcast_token.clone())
                .unwrap_or(defaults.broadcast_token),
            log_level: cli.log_level.clone(),
            log_file: cli.log_file.clone().or_else(|| file.log.file.clone()),
        }
    }

    /// Checks that every value is usable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "queue_capacity must be at least 1".into(),
            ));
        }
        if self.max_payload_size > MAX_DATAGRAM_SIZE {
            return Err(ConfigError::Invalid(format!(
                "max_payload_size {} exceeds the UDP datagram limit of {MAX_DATAGRAM_SIZE}",
                self.max_payload_size
            )));
        }
        if self.broadcast_token.is_empty() {
            return Err(ConfigError::Invalid(
                "broadcast_token must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// Routing parameters for the [`Router`](crate::router::Router).
    #[must_use]
    pub fn router_settings(&self) -> RouterSettings {
        RouterSettings {
            max_payload: self.max_payload_size,
            broadcast_token: self.broadcast_token.clone(),
        }
    }

    /// Worker pool sizing for the [`Dispatcher`](crate::dispatcher::Dispatcher).
    #[must_use]
    pub const fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            workers: self.workers,
            queue_capacity: self.queue_capacity,
        }
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file for the relay.
fn load_config_file(
    explicit_path: Option<&std::path::Path>,
) -> Result<RelayConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(RelayConfigFile::default());
        };
        config_dir.join("datachat-relay").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RelayConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
