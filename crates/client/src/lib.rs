//! # tcpproto client
//!
//! Blocking client endpoint for the tcpproto wire protocol.
//!
//! ## Overview
//!
//! - **Client**: one connection, one stream reader, one replicated session
//! - **Configuration**: TOML file with environment overrides
//! - **File Helpers**: reading attachments from disk and saving received ones
//! - **Telemetry**: `tracing` subscriber setup
//!
//! ## Example Usage
//!
//! ```no_run
//! use tcpproto::Message;
//! use tcpproto_client::{config::Config, files, telemetry, Client};
//!
//! let mut config = Config::load_default()?;
//! config.apply_env_overrides();
//! config.validate()?;
//! telemetry::init(&config.logging.level);
//!
//! let mut client = Client::connect(&config)?;
//! client.lock("api_token", "s3cret");
//!
//! let file = files::read_envelope("report.pdf", config.files.max_file_size)?;
//! let response = client.send(Message::request("SET").with_file(file))?;
//! if let Some(file) = response.file().filter(|f| f.is_present()) {
//!     files::write_envelope(file, &config.files.download_dir)?;
//! }
//! client.close()?;
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! ## Modules
//!
//! - [`connection`]: The client endpoint
//! - [`config`]: Configuration loading and validation
//! - [`files`]: Envelope file I/O
//! - [`telemetry`]: Logging setup
//! - [`error`]: Error types

pub mod config;
pub mod connection;
pub mod error;
pub mod files;
pub mod telemetry;

pub use config::{Config, ConfigError};
pub use connection::Client;
pub use error::{ClientError, Result};
