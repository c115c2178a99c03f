//! File envelopes: binary attachments framed by boundary markers.
//!
//! # Envelope Format
//!
//! An embedded file is written at the start of the message body as
//!
//! ```text
//! --<boundary>--<raw file bytes>----<boundary>----
//! ```
//!
//! The raw bytes are inserted verbatim, with no escaping. Decoding takes the
//! shortest span between the first start marker and the next end marker, so
//! a file whose bytes contain its own end marker cannot be recovered. Use
//! [`FileEnvelope::collides`] to detect this before sending, or
//! [`FileEnvelope::with_random_boundary`] to make a collision unlikely.

use rand::Rng;

use crate::error::{ProtocolError, Result};
use crate::headers::{find_subslice, HeaderMap, FILE_BOUNDARY, FILE_NAME, FILE_SIZE, HAS_FILE};

/// Boundary used when none can be derived from a filename.
pub const DEFAULT_BOUNDARY: &str = "FILE_BORDER-FILE_BORDER";

/// An optional file attachment carried by a message.
///
/// Whether the envelope actually carries a file is decided once, at
/// construction: it is present only when the filename, the boundary and the
/// data are all non-empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEnvelope {
    filename: Option<String>,
    data: Option<Vec<u8>>,
    boundary: String,
    present: bool,
}

impl FileEnvelope {
    /// Create an envelope with the boundary derived from the filename.
    pub fn new(filename: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        let filename = filename.into();
        let boundary = Self::derive_boundary(&filename);
        Self::from_parts(Some(filename), Some(data.into()), boundary)
    }

    /// Create an envelope with an explicit boundary.
    pub fn with_boundary(
        filename: impl Into<String>,
        data: impl Into<Vec<u8>>,
        boundary: impl Into<String>,
    ) -> Self {
        Self::from_parts(Some(filename.into()), Some(data.into()), boundary)
    }

    /// Create an envelope whose boundary carries a random 64-bit component.
    ///
    /// Two files with the same name get distinct boundaries.
    pub fn with_random_boundary(filename: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        let filename = filename.into();
        let nonce: u64 = rand::thread_rng().gen();
        let boundary = format!("FILE_BORDER-{filename}-{nonce:016x}-FILE_BORDER");
        Self::from_parts(Some(filename), Some(data.into()), boundary)
    }

    /// Create an envelope from optional parts.
    ///
    /// Missing or empty parts yield an envelope that is not present.
    pub fn from_parts(
        filename: Option<String>,
        data: Option<Vec<u8>>,
        boundary: impl Into<String>,
    ) -> Self {
        let boundary = boundary.into();
        let present = filename.as_deref().is_some_and(|f| !f.is_empty())
            && data.as_deref().is_some_and(|d| !d.is_empty())
            && !boundary.is_empty();
        Self {
            filename,
            data,
            boundary,
            present,
        }
    }

    /// The boundary derived from a filename: `FILE_BORDER-<filename>-FILE_BORDER`.
    pub fn derive_boundary(filename: &str) -> String {
        if filename.is_empty() {
            DEFAULT_BOUNDARY.to_string()
        } else {
            format!("FILE_BORDER-{filename}-FILE_BORDER")
        }
    }

    /// The attached file's name.
    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    /// The attached file's raw bytes.
    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    /// Consume the envelope and return its raw bytes.
    pub fn into_data(self) -> Option<Vec<u8>> {
        self.data
    }

    /// The boundary token.
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Whether the envelope carries a file.
    pub fn is_present(&self) -> bool {
        self.present
    }

    /// Size of the raw file bytes.
    pub fn size(&self) -> usize {
        self.data.as_ref().map_or(0, Vec::len)
    }

    /// `--<boundary>--`
    pub fn start_marker(&self) -> Vec<u8> {
        start_marker(&self.boundary)
    }

    /// `----<boundary>----`
    pub fn end_marker(&self) -> Vec<u8> {
        end_marker(&self.boundary)
    }

    /// Length of [`encode`](Self::encode) output.
    pub fn encoded_len(&self) -> usize {
        // "--" + b + "--" and "----" + b + "----"
        2 * self.boundary.len() + 12 + self.size()
    }

    /// Whether either marker occurs inside the file bytes.
    pub fn collides(&self) -> bool {
        let Some(data) = self.data.as_deref() else {
            return false;
        };
        find_subslice(data, &self.start_marker()).is_some()
            || find_subslice(data, &self.end_marker()).is_some()
    }

    /// Encode as start marker, raw bytes, end marker.
    pub fn encode(&self) -> Vec<u8> {
        if self.collides() {
            tracing::warn!(
                boundary = %self.boundary,
                "file data contains its own boundary marker; the receiver will truncate it"
            );
        }
        let mut out = Vec::with_capacity(self.encoded_len());
        out.extend_from_slice(&self.start_marker());
        out.extend_from_slice(self.data.as_deref().unwrap_or_default());
        out.extend_from_slice(&self.end_marker());
        out
    }

    /// Split an embedded file out of a message body.
    ///
    /// Returns `(None, body)` unchanged unless `HAS_FILE` is `true`. Otherwise
    /// locates the first start marker and the first end marker after it and
    /// returns the envelope plus the body with the markers and file bytes
    /// removed.
    ///
    /// Fails with [`ProtocolError::MalformedFrame`] when the boundary header
    /// is missing, when either marker cannot be found, or when a declared
    /// `FILE_SIZE` disagrees with the recovered span.
    pub fn decode(headers: &HeaderMap, body: Vec<u8>) -> Result<(Option<Self>, Vec<u8>)> {
        if headers.get(HAS_FILE) != Some("true") {
            return Ok((None, body));
        }

        let boundary = headers.get(FILE_BOUNDARY).ok_or_else(|| {
            ProtocolError::MalformedFrame(format!("{HAS_FILE} set without {FILE_BOUNDARY}"))
        })?;
        let start = start_marker(boundary);
        let end = end_marker(boundary);

        let start_at = find_subslice(&body, &start).ok_or_else(|| {
            ProtocolError::MalformedFrame(format!("start boundary for {boundary:?} not found"))
        })?;
        let data_at = start_at + start.len();
        let data_len = find_subslice(&body[data_at..], &end).ok_or_else(|| {
            ProtocolError::MalformedFrame(format!("end boundary for {boundary:?} not found"))
        })?;
        let end_at = data_at + data_len + end.len();

        if let Some(declared) = headers.get(FILE_SIZE) {
            let declared: usize = declared.trim().parse().map_err(|_| {
                ProtocolError::MalformedFrame(format!("invalid {FILE_SIZE}: {declared:?}"))
            })?;
            if declared != data_len {
                return Err(ProtocolError::MalformedFrame(format!(
                    "{FILE_SIZE} declares {declared} bytes but boundary span holds {data_len}"
                )));
            }
        }

        let data = body[data_at..data_at + data_len].to_vec();
        let mut remaining = Vec::with_capacity(body.len() - (end_at - start_at));
        remaining.extend_from_slice(&body[..start_at]);
        remaining.extend_from_slice(&body[end_at..]);

        let filename = headers.get(FILE_NAME).map(str::to_string);
        tracing::debug!(
            filename = filename.as_deref().unwrap_or_default(),
            size = data.len(),
            "decoded file envelope"
        );

        Ok((
            Some(Self::from_parts(filename, Some(data), boundary)),
            remaining,
        ))
    }
}

fn start_marker(boundary: &str) -> Vec<u8> {
    format!("--{boundary}--").into_bytes()
}

fn end_marker(boundary: &str) -> Vec<u8> {
    format!("----{boundary}----").into_bytes()
}
