//! Textual header block codec.
//!
//! # Header Format
//!
//! A header block is a sequence of `KEY:VALUE\r\n` lines closed by an empty
//! line, so the block always ends with the 4-byte terminator `\r\n\r\n`.
//! Reserved lines come first in a fixed order, then caller headers in
//! insertion order, then the replicated session maps:
//!
//! ```text
//! CONTENT_LENGTH:<int>
//! COMMAND:<string>
//! [FILE_NAME, FILE_SIZE, FILE_BOUNDARY, HAS_FILE]   only with a file
//! <caller headers>
//! REMEMBER-<key>:<value>                            one per cookie
//! VAULT-<key>:<value>                               one per vault entry
//! FORGET-<key>:                                     one per forgotten key
//! ```
//!
//! Values may contain `:`; only the first colon on a line separates the key.

use crate::error::{ProtocolError, Result};
use crate::message::Message;

/// Terminator separating the header block from the body.
pub const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Line separator inside the header block.
pub const LINE_SEPARATOR: &str = "\r\n";

/// Declared body length in bytes.
pub const CONTENT_LENGTH: &str = "CONTENT_LENGTH";
/// Command opcode, empty for responses.
pub const COMMAND: &str = "COMMAND";
/// Name of the embedded file.
pub const FILE_NAME: &str = "FILE_NAME";
/// Size of the embedded file's raw bytes.
pub const FILE_SIZE: &str = "FILE_SIZE";
/// Boundary token framing the embedded file.
pub const FILE_BOUNDARY: &str = "FILE_BOUNDARY";
/// `true` when the body starts with a file envelope.
pub const HAS_FILE: &str = "HAS_FILE";

/// Headers generated by the codec itself. Callers may not set these.
pub const RESERVED_HEADERS: [&str; 6] = [
    CONTENT_LENGTH,
    COMMAND,
    FILE_NAME,
    FILE_SIZE,
    FILE_BOUNDARY,
    HAS_FILE,
];

/// Cookie replication prefix.
pub const REMEMBER_PREFIX: &str = "REMEMBER-";
/// Vault replication prefix.
pub const VAULT_PREFIX: &str = "VAULT-";
/// Encrypted staged-secret prefix.
pub const CLIENT_VAULT_PREFIX: &str = "CLIENT_VAULT-";
/// Session key removal prefix.
pub const FORGET_PREFIX: &str = "FORGET-";

/// Prefixes the codec writes from a message's session fields. A caller header
/// carrying one would be consumed as a session directive on receipt.
/// `CLIENT_VAULT-` is absent: sealed secrets travel as ordinary headers.
pub const SESSION_DIRECTIVE_PREFIXES: [&str; 3] = [REMEMBER_PREFIX, VAULT_PREFIX, FORGET_PREFIX];

/// Ordered string-to-string header map.
///
/// Keys are unique and case-sensitive. Insertion order is preserved so that
/// caller headers go out on the wire in the order they were set; replacing an
/// existing key keeps its original position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    entries: Vec<(String, String)>,
}

impl HeaderMap {
    /// Create an empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of headers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map holds no headers.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up a header value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Whether a header is set.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// Set a header, returning the previous value if there was one.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => Some(std::mem::replace(existing, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    /// Remove a header, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        let index = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(index).1)
    }

    /// Remove every header whose name starts with `prefix`.
    ///
    /// Returns `(suffix, value)` pairs in wire order, where `suffix` is the
    /// key with the prefix stripped.
    pub fn drain_prefixed(&mut self, prefix: &str) -> Vec<(String, String)> {
        let mut drained = Vec::new();
        self.entries.retain(|(k, v)| match k.strip_prefix(prefix) {
            Some(suffix) => {
                drained.push((suffix.to_string(), v.clone()));
                false
            }
            None => true,
        });
        drained
    }

    /// Iterate over `(key, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Iterate over keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for HeaderMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = HeaderMap::new();
        for (key, value) in iter {
            map.insert(key, value);
        }
        map
    }
}

impl IntoIterator for HeaderMap {
    type Item = (String, String);
    type IntoIter = std::vec::IntoIter<(String, String)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Find the first occurrence of `needle` in `haystack`.
pub(crate) fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Encode the header block for `message`, terminator included.
///
/// Fails with [`ProtocolError::MalformedHeader`] when a line cannot be
/// represented on the wire: an empty key, a key containing `:` or a line
/// break, a value containing a line break, a reserved caller key, or a caller
/// key carrying a `REMEMBER-`, `VAULT-` or `FORGET-` prefix. Those prefixes
/// are written from the message's `cookies`, `vault` and forget set instead.
///
/// The command, filename and boundary are values, so they may contain `:`
/// but not a line break.
pub fn encode_headers(message: &Message) -> Result<Vec<u8>> {
    let mut block = String::new();
    push_line(&mut block, CONTENT_LENGTH, &message.content_length().to_string());
    validate_value(COMMAND, message.command())?;
    push_line(&mut block, COMMAND, message.command());

    if let Some(file) = message.file().filter(|f| f.is_present()) {
        let filename = file.filename().unwrap_or_default();
        validate_value(FILE_NAME, filename)?;
        validate_value(FILE_BOUNDARY, file.boundary())?;
        push_line(&mut block, FILE_NAME, filename);
        push_line(&mut block, FILE_SIZE, &file.size().to_string());
        push_line(&mut block, FILE_BOUNDARY, file.boundary());
        push_line(&mut block, HAS_FILE, "true");
    }

    for (key, value) in message.headers().iter() {
        if RESERVED_HEADERS.contains(&key) {
            return Err(ProtocolError::MalformedHeader(format!(
                "header {key} is reserved"
            )));
        }
        if let Some(prefix) = SESSION_DIRECTIVE_PREFIXES
            .iter()
            .find(|prefix| key.starts_with(**prefix))
        {
            return Err(ProtocolError::MalformedHeader(format!(
                "caller header {key} uses the session prefix {prefix}"
            )));
        }
        validate_key(key)?;
        validate_value(key, value)?;
        push_line(&mut block, key, value);
    }

    for (key, value) in message.cookies() {
        let name = format!("{REMEMBER_PREFIX}{key}");
        validate_key(&name)?;
        validate_value(&name, value)?;
        push_line(&mut block, &name, value);
    }

    for (key, value) in message.vault() {
        let name = format!("{VAULT_PREFIX}{key}");
        validate_key(&name)?;
        validate_value(&name, value)?;
        push_line(&mut block, &name, value);
    }

    for key in message.forgotten() {
        let name = format!("{FORGET_PREFIX}{key}");
        validate_key(&name)?;
        push_line(&mut block, &name, "");
    }

    block.push_str(LINE_SEPARATOR);
    Ok(block.into_bytes())
}

/// Decode a header block.
///
/// Splits `data` on the first `\r\n\r\n` and returns the parsed headers plus
/// everything after the terminator. The remainder may be empty, a partial
/// body, or more than one message's worth of bytes when the peer pipelines.
pub fn decode_headers(data: &[u8]) -> Result<(HeaderMap, &[u8])> {
    let split = find_subslice(data, HEADER_TERMINATOR).ok_or_else(|| {
        ProtocolError::MalformedHeader("header terminator not found".to_string())
    })?;
    let (block, rest) = data.split_at(split);
    let remainder = &rest[HEADER_TERMINATOR.len()..];

    let block = std::str::from_utf8(block)
        .map_err(|e| ProtocolError::MalformedHeader(format!("header block is not UTF-8: {e}")))?;

    let mut headers = HeaderMap::new();
    for line in block.split(LINE_SEPARATOR).filter(|line| !line.is_empty()) {
        let (key, value) = line.split_once(':').ok_or_else(|| {
            ProtocolError::MalformedHeader(format!("header line without colon: {line:?}"))
        })?;
        headers.insert(key, value);
    }

    Ok((headers, remainder))
}

fn push_line(block: &mut String, key: &str, value: &str) {
    block.push_str(key);
    block.push(':');
    block.push_str(value);
    block.push_str(LINE_SEPARATOR);
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key.contains([':', '\r', '\n']) {
        return Err(ProtocolError::MalformedHeader(format!(
            "invalid header key: {key:?}"
        )));
    }
    Ok(())
}

fn validate_value(key: &str, value: &str) -> Result<()> {
    if value.contains(['\r', '\n']) {
        return Err(ProtocolError::MalformedHeader(format!(
            "value of header {key} contains a line break"
        )));
    }
    Ok(())
}
