//! Error types for the client crate.

use std::path::PathBuf;

use tcpproto::ProtocolError;
use thiserror::Error;

/// Errors raised by the client endpoint and its file helpers.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Framing, session or crypto failure from the protocol layer.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The peer closed the connection where a response was expected.
    #[error("peer closed the connection before responding")]
    NoResponse,

    /// The envelope has no file to write.
    #[error("envelope does not carry a file")]
    NoFile,

    /// The envelope's filename would escape the target directory.
    #[error("refusing unsafe filename: {0:?}")]
    UnsafeFilename(String),

    /// File exceeds the configured size limit.
    #[error("file too large: {size} bytes exceeds limit of {limit} bytes")]
    FileTooLarge { size: u64, limit: u64 },

    /// The path has no final component to use as a filename.
    #[error("path has no file name: {0}")]
    NoFileName(PathBuf),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// Whether the connection must be abandoned.
    pub fn is_fatal(&self) -> bool {
        match self {
            ClientError::Protocol(e) => e.is_fatal(),
            ClientError::NoResponse | ClientError::Io(_) => true,
            _ => false,
        }
    }
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
