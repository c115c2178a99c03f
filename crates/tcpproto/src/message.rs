//! Requests and responses.
//!
//! Both directions share one shape: a command opcode (empty for responses),
//! caller headers, an optional [`FileEnvelope`], opaque content bytes, the
//! replicated `cookies` and `vault` maps, and the session keys the sender
//! wants forgotten.

use std::collections::{BTreeMap, BTreeSet};

use crate::envelope::FileEnvelope;
use crate::error::{ProtocolError, Result};
use crate::headers::{
    encode_headers, HeaderMap, COMMAND, CONTENT_LENGTH, FORGET_PREFIX, REMEMBER_PREFIX,
    RESERVED_HEADERS, VAULT_PREFIX,
};

/// A protocol message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    command: String,
    headers: HeaderMap,
    content: Vec<u8>,
    file: Option<FileEnvelope>,
    cookies: BTreeMap<String, String>,
    vault: BTreeMap<String, String>,
    forget: BTreeSet<String>,
}

impl Message {
    /// Create a request carrying `command`.
    pub fn request(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    /// Create a response. Responses carry an empty command.
    pub fn response() -> Self {
        Self::default()
    }

    /// Add a caller header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key, value);
        self
    }

    /// Set the content bytes.
    pub fn with_content(mut self, content: impl Into<Vec<u8>>) -> Self {
        self.content = content.into();
        self
    }

    /// Attach a file.
    pub fn with_file(mut self, file: FileEnvelope) -> Self {
        self.file = Some(file);
        self
    }

    /// Ask the receiver to drop `key` from its cookies and vault.
    pub fn with_forget(mut self, key: impl Into<String>) -> Self {
        self.forget.insert(key.into());
        self
    }

    /// Command opcode; empty for responses.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Caller headers, without reserved or session lines.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Mutable caller headers.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Content bytes, excluding any embedded file.
    pub fn content(&self) -> &[u8] {
        &self.content
    }

    /// Consume the message, keeping only its content.
    pub fn into_content(self) -> Vec<u8> {
        self.content
    }

    /// The attached file, if any.
    pub fn file(&self) -> Option<&FileEnvelope> {
        self.file.as_ref()
    }

    /// Detach and return the file.
    pub fn take_file(&mut self) -> Option<FileEnvelope> {
        self.file.take()
    }

    /// Replicated cookies, written as `REMEMBER-` lines.
    pub fn cookies(&self) -> &BTreeMap<String, String> {
        &self.cookies
    }

    /// Mutable replicated cookies.
    pub fn cookies_mut(&mut self) -> &mut BTreeMap<String, String> {
        &mut self.cookies
    }

    /// Replicated vault entries, written as `VAULT-` lines.
    pub fn vault(&self) -> &BTreeMap<String, String> {
        &self.vault
    }

    /// Mutable replicated vault entries.
    pub fn vault_mut(&mut self) -> &mut BTreeMap<String, String> {
        &mut self.vault
    }

    /// Session keys to forget, written as `FORGET-` lines.
    pub fn forgotten(&self) -> &BTreeSet<String> {
        &self.forget
    }

    /// Replace the replicated maps wholesale.
    pub fn set_session_maps(
        &mut self,
        cookies: BTreeMap<String, String>,
        vault: BTreeMap<String, String>,
    ) {
        self.cookies = cookies;
        self.vault = vault;
    }

    /// Number of body bytes following the header block.
    ///
    /// Content plus, when a file is present, the full encoded envelope.
    pub fn content_length(&self) -> usize {
        let file_len = self
            .file
            .as_ref()
            .filter(|f| f.is_present())
            .map_or(0, FileEnvelope::encoded_len);
        self.content.len() + file_len
    }

    /// Encode the message for the wire.
    pub fn generate(&self) -> Result<Vec<u8>> {
        let mut out = encode_headers(self)?;
        out.reserve(self.content_length());
        if let Some(file) = self.file.as_ref().filter(|f| f.is_present()) {
            out.extend_from_slice(&file.encode());
        }
        out.extend_from_slice(&self.content);
        Ok(out)
    }

    /// Rebuild a message from decoded headers and its exact body.
    ///
    /// Reserved headers are consumed, an embedded file is split out of the
    /// body, and any `REMEMBER-`/`VAULT-`/`FORGET-` headers still present move
    /// into the message's `cookies`/`vault`/forget set. Everything else stays
    /// a caller header.
    pub fn from_parts(mut headers: HeaderMap, body: Vec<u8>) -> Result<Self> {
        if let Some(declared) = headers.get(CONTENT_LENGTH) {
            let declared = parse_content_length(declared)?;
            if declared != body.len() {
                return Err(ProtocolError::MalformedFrame(format!(
                    "{CONTENT_LENGTH} declares {declared} bytes but body holds {}",
                    body.len()
                )));
            }
        }

        let (file, content) = FileEnvelope::decode(&headers, body)?;
        let command = headers.remove(COMMAND).unwrap_or_default();
        for reserved in RESERVED_HEADERS {
            headers.remove(reserved);
        }

        let cookies = headers.drain_prefixed(REMEMBER_PREFIX).into_iter().collect();
        let vault = headers.drain_prefixed(VAULT_PREFIX).into_iter().collect();
        let forget = headers
            .drain_prefixed(FORGET_PREFIX)
            .into_iter()
            .map(|(key, _)| key)
            .collect();

        Ok(Self {
            command,
            headers,
            content,
            file,
            cookies,
            vault,
            forget,
        })
    }
}

/// Parse a declared `CONTENT_LENGTH` value.
pub(crate) fn parse_content_length(value: &str) -> Result<usize> {
    value.trim().parse().map_err(|_| {
        ProtocolError::MalformedHeader(format!("invalid {CONTENT_LENGTH}: {value:?}"))
    })
}
