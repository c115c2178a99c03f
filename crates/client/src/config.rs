//! Configuration management for the tcpproto client.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/tcpproto/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tcpproto::{ReaderLimits, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_HEADER_SIZE, DEFAULT_MAX_MESSAGE_SIZE};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("host must not be empty")]
    EmptyHost,

    #[error("port must be between 1 and 65535, got {0}")]
    InvalidPort(u16),

    #[error("buffer_size must be between 1 and 16777216, got {0}")]
    InvalidBufferSize(usize),

    #[error("max_header_size must be at least 64 bytes, got {0}")]
    InvalidMaxHeaderSize(usize),

    #[error("max_message_size must be greater than 0, got {0}")]
    InvalidMaxMessageSize(usize),

    #[error("max_file_size must be greater than 0, got {0}")]
    InvalidMaxFileSize(u64),

    #[error("public key file does not exist: {0}")]
    MissingPublicKey(PathBuf),

    #[error("log level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Largest accepted read chunk (16 MB).
const MAX_BUFFER_SIZE: usize = 16 * 1024 * 1024;

/// Main configuration structure for the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Connection and framing limits.
    pub connection: ConnectionConfig,

    /// Public-key settings for staged secrets.
    pub security: SecurityConfig,

    /// File transfer settings.
    pub files: FileConfig,

    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Server host name or address.
    pub host: String,

    /// Server port.
    pub port: u16,

    /// Bytes requested per socket read.
    pub buffer_size: usize,

    /// Socket read timeout in seconds (0 = block indefinitely).
    pub read_timeout_secs: u64,

    /// Largest accepted header block in bytes.
    pub max_header_size: usize,

    /// Largest accepted message body in bytes.
    pub max_message_size: usize,
}

/// Security settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct SecurityConfig {
    /// PEM file holding the server's RSA public key.
    ///
    /// Without it, staged secrets are discarded instead of sent.
    pub public_key_path: Option<PathBuf>,
}

/// File transfer configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FileConfig {
    /// Directory received files are written to.
    pub download_dir: PathBuf,

    /// Maximum size of a file read for sending (default: 32MB).
    pub max_file_size: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub level: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 22392,
            buffer_size: DEFAULT_CHUNK_SIZE,
            read_timeout_secs: 0,
            max_header_size: DEFAULT_MAX_HEADER_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            max_file_size: 32 * 1024 * 1024, // 32MB
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl ConnectionConfig {
    /// `host:port` for socket connection.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Read timeout, `None` when disabled.
    pub fn read_timeout(&self) -> Option<Duration> {
        (self.read_timeout_secs > 0).then(|| Duration::from_secs(self.read_timeout_secs))
    }

    /// Stream reader limits derived from this configuration.
    pub fn reader_limits(&self) -> ReaderLimits {
        ReaderLimits {
            chunk_size: self.buffer_size,
            max_header_size: self.max_header_size,
            max_message_size: self.max_message_size,
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tcpproto")
        .join("config.toml")
}

/// Returns the default download directory.
fn default_download_dir() -> PathBuf {
    dirs::download_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tcpproto")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - TCPPROTO_HOST: Override server host
    /// - TCPPROTO_PORT: Override server port (ignored if not a number)
    /// - TCPPROTO_PUBLIC_KEY: Override public key path
    /// - TCPPROTO_LOG_LEVEL: Override log level
    pub fn apply_env_overrides(&mut self) {
        if let Some(host) = non_empty_env("TCPPROTO_HOST") {
            tracing::info!("Overriding host from environment: {}", host);
            self.connection.host = host;
        }

        if let Some(port) = non_empty_env("TCPPROTO_PORT") {
            match port.parse() {
                Ok(port) => {
                    tracing::info!("Overriding port from environment: {}", port);
                    self.connection.port = port;
                }
                Err(_) => tracing::warn!("Ignoring invalid TCPPROTO_PORT: {}", port),
            }
        }

        if let Some(path) = non_empty_env("TCPPROTO_PUBLIC_KEY") {
            tracing::info!("Overriding public_key_path from environment: {}", path);
            self.security.public_key_path = Some(PathBuf::from(path));
        }

        if let Some(level) = non_empty_env("TCPPROTO_LOG_LEVEL") {
            tracing::info!("Overriding log level from environment: {}", level);
            self.logging.level = level;
        }
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let conn = &self.connection;
        if conn.host.trim().is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if conn.port == 0 {
            return Err(ConfigError::InvalidPort(conn.port));
        }
        if conn.buffer_size == 0 || conn.buffer_size > MAX_BUFFER_SIZE {
            return Err(ConfigError::InvalidBufferSize(conn.buffer_size));
        }
        if conn.max_header_size < 64 {
            return Err(ConfigError::InvalidMaxHeaderSize(conn.max_header_size));
        }
        if conn.max_message_size == 0 {
            return Err(ConfigError::InvalidMaxMessageSize(conn.max_message_size));
        }
        if self.files.max_file_size == 0 {
            return Err(ConfigError::InvalidMaxFileSize(self.files.max_file_size));
        }
        if let Some(path) = &self.security.public_key_path {
            if !path.exists() {
                return Err(ConfigError::MissingPublicKey(path.clone()));
            }
        }

        let level = self.logging.level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.logging.level.clone()));
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file, creating parent directories.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
