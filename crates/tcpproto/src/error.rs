//! Error types for the protocol crate.

use thiserror::Error;

/// Protocol error type covering all possible failure modes.
#[derive(Debug, Error)]
pub enum ProtocolError {
    // Framing errors
    /// The header block is missing its terminator or contains an unparsable line.
    #[error("malformed header: {0}")]
    MalformedHeader(String),

    /// A declared file envelope could not be located in the body.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// The transport closed before the declared body arrived.
    #[error("incomplete body: expected {expected} bytes, received {received}")]
    IncompleteBody {
        /// Declared content length.
        expected: usize,
        /// Bytes buffered when the transport closed.
        received: usize,
    },

    /// Declared content length exceeds the configured limit.
    #[error("message too large: {size} bytes exceeds maximum of {max} bytes")]
    MessageTooLarge {
        /// Declared size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    // Cryptographic errors
    /// Encryption operation failed.
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Decryption operation failed.
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// Invalid or malformed public key.
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    // Connection errors
    /// Connection was closed unexpectedly.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Operation timed out.
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// Any other transport failure.
    #[error("transport error: {0}")]
    Transport(String),
}

impl ProtocolError {
    /// Whether the error leaves the byte stream at an unknown position.
    ///
    /// The stream has no resynchronization marker, so after a fatal error the
    /// read loop must stop. A timeout leaves buffered bytes intact and the
    /// read may be retried.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            ProtocolError::Encryption(_)
                | ProtocolError::Decryption(_)
                | ProtocolError::InvalidPublicKey(_)
                | ProtocolError::Timeout(_)
        )
    }
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

impl From<std::io::Error> for ProtocolError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => ProtocolError::Timeout(err.to_string()),
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof => ProtocolError::ConnectionClosed(err.to_string()),
            _ => ProtocolError::Transport(err.to_string()),
        }
    }
}

impl From<rsa::Error> for ProtocolError {
    fn from(err: rsa::Error) -> Self {
        match err {
            rsa::Error::Decryption => ProtocolError::Decryption(err.to_string()),
            _ => ProtocolError::Encryption(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_header_display() {
        let err = ProtocolError::MalformedHeader("missing terminator".to_string());
        assert_eq!(err.to_string(), "malformed header: missing terminator");
    }

    #[test]
    fn test_malformed_frame_display() {
        let err = ProtocolError::MalformedFrame("boundary not found".to_string());
        assert_eq!(err.to_string(), "malformed frame: boundary not found");
    }

    #[test]
    fn test_incomplete_body_display() {
        let err = ProtocolError::IncompleteBody {
            expected: 22,
            received: 7,
        };
        assert_eq!(
            err.to_string(),
            "incomplete body: expected 22 bytes, received 7"
        );
    }

    #[test]
    fn test_message_too_large_display() {
        let err = ProtocolError::MessageTooLarge {
            size: 100_000,
            max: 65536,
        };
        assert_eq!(
            err.to_string(),
            "message too large: 100000 bytes exceeds maximum of 65536 bytes"
        );
    }

    #[test]
    fn test_encryption_error_display() {
        let err = ProtocolError::Encryption("message too long".to_string());
        assert_eq!(err.to_string(), "encryption failed: message too long");
    }

    #[test]
    fn test_connection_closed_display() {
        let err = ProtocolError::ConnectionClosed("peer disconnected".to_string());
        assert_eq!(err.to_string(), "connection closed: peer disconnected");
    }

    #[test]
    fn test_from_io_error_timeout() {
        let io_err = std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out");
        let protocol_err: ProtocolError = io_err.into();
        assert!(matches!(protocol_err, ProtocolError::Timeout(_)));
    }

    #[test]
    fn test_from_io_error_connection_closed() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let protocol_err: ProtocolError = io_err.into();
        assert!(matches!(protocol_err, ProtocolError::ConnectionClosed(_)));
    }

    #[test]
    fn test_from_io_error_other() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "not found");
        let protocol_err: ProtocolError = io_err.into();
        assert!(matches!(protocol_err, ProtocolError::Transport(_)));
    }

    #[test]
    fn test_framing_errors_are_fatal() {
        assert!(ProtocolError::MalformedHeader(String::new()).is_fatal());
        assert!(ProtocolError::MalformedFrame(String::new()).is_fatal());
        assert!(ProtocolError::IncompleteBody {
            expected: 1,
            received: 0
        }
        .is_fatal());
        assert!(!ProtocolError::Encryption(String::new()).is_fatal());
        assert!(!ProtocolError::Timeout(String::new()).is_fatal());
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ProtocolError>();
    }
}
