//! # tcpproto
//!
//! Wire protocol for exchanging commands, binary files and replicated
//! session state over one persistent byte-stream connection.
//!
//! ## Overview
//!
//! - **Header Codec**: `KEY:VALUE\r\n` header blocks closed by a blank line
//! - **File Envelopes**: binary attachments framed by boundary markers
//! - **Messages**: requests and responses with a derived `CONTENT_LENGTH`
//! - **Session State**: replicated cookies and vault, plus encrypted staged secrets
//! - **Stream Reader**: reassembly of messages from partial reads
//!
//! ## Wire Format
//!
//! ```text
//! CONTENT_LENGTH:<int>\r\n
//! COMMAND:<string>\r\n
//! [FILE_NAME / FILE_SIZE / FILE_BOUNDARY / HAS_FILE]
//! <caller headers>
//! [REMEMBER-<key>:<value>]
//! [VAULT-<key>:<value>]
//! [FORGET-<key>:]
//! \r\n
//! [--<boundary>--<file bytes>----<boundary>----]<content>
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use std::io::Cursor;
//! use tcpproto::{FileEnvelope, Message, SessionState, StreamReader};
//!
//! let request = Message::request("SET")
//!     .with_header("Content-Type", "text/plain")
//!     .with_content(b"hi".to_vec())
//!     .with_file(FileEnvelope::with_boundary("a.txt", b"AB".to_vec(), "B1"));
//! let bytes = request.generate().unwrap();
//!
//! let mut reader = StreamReader::new();
//! let mut session = SessionState::new();
//! let received = reader
//!     .read_message(&mut Cursor::new(bytes), &mut session)
//!     .unwrap()
//!     .unwrap();
//! assert_eq!(received.content(), b"hi");
//! assert_eq!(received.file().unwrap().data(), Some(&b"AB"[..]));
//! ```
//!
//! ## Modules
//!
//! - [`headers`]: Header map and header block codec
//! - [`envelope`]: File envelope encoding and extraction
//! - [`message`]: Request/response shape
//! - [`session`]: Session state routing
//! - [`reader`]: Stream reassembly state machine
//! - [`crypto`]: RSA-OAEP sealing of staged secrets
//! - [`error`]: Error types

pub mod crypto;
pub mod envelope;
pub mod error;
pub mod headers;
pub mod message;
pub mod reader;
pub mod session;

pub use crypto::{RsaOpener, RsaSealer, SecretOpener, SecretSealer};
pub use envelope::{FileEnvelope, DEFAULT_BOUNDARY};
pub use error::{ProtocolError, Result};
pub use headers::{decode_headers, encode_headers, HeaderMap, HEADER_TERMINATOR};
pub use message::Message;
pub use reader::{
    Frame, ReaderLimits, ReaderState, StreamReader, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_HEADER_SIZE,
    DEFAULT_MAX_MESSAGE_SIZE,
};
pub use session::SessionState;
