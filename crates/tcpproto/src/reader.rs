//! Stream reassembly.
//!
//! [`StreamReader`] turns an ordered byte stream into a sequence of messages.
//! It is an explicit two-state machine over a growing buffer:
//!
//! - **AwaitingHeader**: read chunks until the buffer holds `\r\n\r\n`, then
//!   decode the header block and its declared `CONTENT_LENGTH`.
//! - **AwaitingBody**: read chunks until the buffer holds `CONTENT_LENGTH`
//!   bytes. The leading `CONTENT_LENGTH` bytes are the body; anything after
//!   them is the start of the next message and stays buffered.
//!
//! One reader serves one connection and yields messages strictly in order.
//! After a fatal error the reader refuses further reads, because the stream
//! has no marker to resynchronize on.

use std::io::{ErrorKind, Read};

use bytes::BytesMut;
use tracing::{debug, trace};

use crate::error::{ProtocolError, Result};
use crate::headers::{decode_headers, find_subslice, HeaderMap, CONTENT_LENGTH, HEADER_TERMINATOR};
use crate::message::{parse_content_length, Message};
use crate::session::SessionState;

/// Default number of bytes requested per transport read.
pub const DEFAULT_CHUNK_SIZE: usize = 2048;

/// Default cap on a header block (64 KB).
pub const DEFAULT_MAX_HEADER_SIZE: usize = 64 * 1024;

/// Default cap on a declared body (64 MB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Buffer limits for a [`StreamReader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderLimits {
    /// Bytes requested per read.
    pub chunk_size: usize,
    /// Largest header block accepted, terminator excluded.
    pub max_header_size: usize,
    /// Largest `CONTENT_LENGTH` accepted.
    pub max_message_size: usize,
}

impl Default for ReaderLimits {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_header_size: DEFAULT_MAX_HEADER_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

/// Observable reader state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    /// Waiting for a complete header block.
    AwaitingHeader,
    /// Header decoded, waiting for the body.
    AwaitingBody {
        /// Declared body length.
        content_length: usize,
    },
    /// A fatal error occurred; no further messages will be read.
    Failed,
}

/// One message as it came off the wire: decoded headers and the exact body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

#[derive(Debug)]
enum State {
    AwaitingHeader,
    AwaitingBody {
        headers: HeaderMap,
        content_length: usize,
    },
    Failed,
}

/// Incremental message reader for one connection.
#[derive(Debug)]
pub struct StreamReader {
    buffer: BytesMut,
    state: State,
    limits: ReaderLimits,
    /// Buffer prefix already searched for the header terminator.
    scanned: usize,
}

impl Default for StreamReader {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamReader {
    /// Create a reader with default limits.
    pub fn new() -> Self {
        Self::with_limits(ReaderLimits::default())
    }

    /// Create a reader with explicit limits.
    pub fn with_limits(limits: ReaderLimits) -> Self {
        Self {
            buffer: BytesMut::with_capacity(limits.chunk_size),
            state: State::AwaitingHeader,
            limits: ReaderLimits {
                chunk_size: limits.chunk_size.max(1),
                ..limits
            },
            scanned: 0,
        }
    }

    /// Limits in effect, with `chunk_size` clamped to at least one byte.
    pub fn limits(&self) -> ReaderLimits {
        self.limits
    }

    /// Where the reader is in the current message.
    pub fn state(&self) -> ReaderState {
        match &self.state {
            State::AwaitingHeader => ReaderState::AwaitingHeader,
            State::AwaitingBody { content_length, .. } => ReaderState::AwaitingBody {
                content_length: *content_length,
            },
            State::Failed => ReaderState::Failed,
        }
    }

    /// Bytes received but not yet consumed by a message.
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    /// Read the next complete frame from `source`.
    ///
    /// Returns `Ok(None)` when the transport closes cleanly between
    /// messages. Bytes left over from a previous read are used before
    /// `source` is touched.
    pub fn next_frame<R: Read + ?Sized>(&mut self, source: &mut R) -> Result<Option<Frame>> {
        if matches!(self.state, State::Failed) {
            return Err(ProtocolError::ConnectionClosed(
                "reader stopped after a framing error".to_string(),
            ));
        }
        let result = self.advance(source);
        if let Err(e) = &result {
            if e.is_fatal() {
                self.state = State::Failed;
            }
        }
        result
    }

    /// Read the next message, applying session headers to `session`.
    ///
    /// Session headers are stripped before the message is built and applied
    /// to `session` only once the message has decoded, so a rejected message
    /// leaves the session untouched. The returned message carries a copy of
    /// the session's `cookies` and `vault` as they stand after this message.
    pub fn read_message<R: Read + ?Sized>(
        &mut self,
        source: &mut R,
        session: &mut SessionState,
    ) -> Result<Option<Message>> {
        let Some(Frame { mut headers, body }) = self.next_frame(source)? else {
            return Ok(None);
        };
        let mut session_headers = SessionState::split_session_headers(&mut headers);
        let mut message = Message::from_parts(headers, body).inspect_err(|e| {
            if e.is_fatal() {
                self.state = State::Failed;
            }
        })?;
        session.absorb(&mut session_headers);
        message.set_session_maps(session.cookies().clone(), session.vault().clone());
        Ok(Some(message))
    }

    fn advance<R: Read + ?Sized>(&mut self, source: &mut R) -> Result<Option<Frame>> {
        loop {
            let awaiting_body = match &self.state {
                State::AwaitingBody { content_length, .. } => Some(*content_length),
                _ => None,
            };

            match awaiting_body {
                None => {
                    if self.take_header()? {
                        continue;
                    }
                    if self.buffer.len() > self.limits.max_header_size {
                        return Err(ProtocolError::MalformedHeader(format!(
                            "header block exceeds {} bytes",
                            self.limits.max_header_size
                        )));
                    }
                    if self.fill(source)? == 0 {
                        if self.buffer.is_empty() {
                            debug!("transport closed between messages");
                            return Ok(None);
                        }
                        return Err(ProtocolError::ConnectionClosed(format!(
                            "transport closed with {} bytes of an unterminated header",
                            self.buffer.len()
                        )));
                    }
                }
                Some(content_length) => {
                    if self.buffer.len() >= content_length {
                        return Ok(Some(self.take_body(content_length)));
                    }
                    if self.fill(source)? == 0 {
                        return Err(ProtocolError::IncompleteBody {
                            expected: content_length,
                            received: self.buffer.len(),
                        });
                    }
                }
            }
        }
    }

    /// Split off and decode the header block if the buffer holds one.
    fn take_header(&mut self) -> Result<bool> {
        let from = self.scanned.saturating_sub(HEADER_TERMINATOR.len() - 1);
        let Some(at) = find_subslice(&self.buffer[from..], HEADER_TERMINATOR) else {
            self.scanned = self.buffer.len();
            return Ok(false);
        };
        if from + at > self.limits.max_header_size {
            return Err(ProtocolError::MalformedHeader(format!(
                "header block of {} bytes exceeds {}",
                from + at,
                self.limits.max_header_size
            )));
        }

        let block = self.buffer.split_to(from + at + HEADER_TERMINATOR.len());
        self.scanned = 0;

        let (headers, _) = decode_headers(&block)?;
        let declared = headers.get(CONTENT_LENGTH).ok_or_else(|| {
            ProtocolError::MalformedHeader(format!("missing {CONTENT_LENGTH}"))
        })?;
        let content_length = parse_content_length(declared)?;
        if content_length > self.limits.max_message_size {
            return Err(ProtocolError::MessageTooLarge {
                size: content_length,
                max: self.limits.max_message_size,
            });
        }

        debug!(
            header_bytes = block.len(),
            content_length,
            buffered = self.buffer.len(),
            "header block decoded"
        );
        self.state = State::AwaitingBody {
            headers,
            content_length,
        };
        Ok(true)
    }

    fn take_body(&mut self, content_length: usize) -> Frame {
        let body = self.buffer.split_to(content_length).to_vec();
        let headers = match std::mem::replace(&mut self.state, State::AwaitingHeader) {
            State::AwaitingBody { headers, .. } => headers,
            _ => HeaderMap::new(),
        };
        if !self.buffer.is_empty() {
            debug!(pipelined = self.buffer.len(), "retaining bytes of next message");
        }
        Frame { headers, body }
    }

    /// Append one chunk from `source`; returns the number of bytes read.
    fn fill<R: Read + ?Sized>(&mut self, source: &mut R) -> Result<usize> {
        let start = self.buffer.len();
        self.buffer.resize(start + self.limits.chunk_size, 0);
        let read = loop {
            match source.read(&mut self.buffer[start..]) {
                Ok(n) => break n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.buffer.truncate(start);
                    return Err(e.into());
                }
            }
        };
        self.buffer.truncate(start + read);
        trace!(read, buffered = self.buffer.len(), "chunk received");
        Ok(read)
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use proptest::prelude::*;

    use super::*;
    use crate::envelope::FileEnvelope;

    /// Serves `data` at most `chunk` bytes per read.
    struct ChunkedSource {
        data: Vec<u8>,
        pos: usize,
        chunk: usize,
        reads: usize,
    }

    impl ChunkedSource {
        fn new(data: Vec<u8>, chunk: usize) -> Self {
            Self {
                data,
                pos: 0,
                chunk,
                reads: 0,
            }
        }
    }

    impl Read for ChunkedSource {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.reads += 1;
            let n = self.chunk.min(buf.len()).min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    fn sample_message() -> Message {
        Message::request("SET")
            .with_header("Content-Type", "text/plain")
            .with_content(b"hi there\r\n\r\nstill content".to_vec())
            .with_file(FileEnvelope::with_boundary("a.txt", b"AB\r\nCD".to_vec(), "B1"))
    }

    fn read_all(reader: &mut StreamReader, source: &mut impl Read) -> Vec<Message> {
        let mut session = SessionState::new();
        let mut out = Vec::new();
        while let Some(message) = reader.read_message(source, &mut session).unwrap() {
            out.push(message);
        }
        out
    }

    #[test]
    fn test_single_message_one_chunk() {
        let message = sample_message();
        let encoded = message.generate().unwrap();
        let mut source = ChunkedSource::new(encoded.clone(), encoded.len());

        let messages = read_all(&mut StreamReader::new(), &mut source);
        assert_eq!(messages, vec![message]);
    }

    #[test]
    fn test_single_byte_chunks() {
        let message = sample_message();
        let mut source = ChunkedSource::new(message.generate().unwrap(), 1);

        let messages = read_all(&mut StreamReader::new(), &mut source);
        assert_eq!(messages, vec![message]);
    }

    #[test]
    fn test_small_chunk_size_limit() {
        let message = sample_message();
        let encoded = message.generate().unwrap();
        let mut source = ChunkedSource::new(encoded.clone(), encoded.len());
        let mut reader = StreamReader::with_limits(ReaderLimits {
            chunk_size: 3,
            ..ReaderLimits::default()
        });

        let messages = read_all(&mut reader, &mut source);
        assert_eq!(messages, vec![message]);
    }

    #[test]
    fn test_pipelined_messages_in_one_read() {
        let first = sample_message();
        let second = Message::response().with_content(b"second".to_vec());
        let mut data = first.generate().unwrap();
        data.extend_from_slice(&second.generate().unwrap());
        let total = data.len();

        let mut source = ChunkedSource::new(data, total);
        let mut reader = StreamReader::with_limits(ReaderLimits {
            chunk_size: total,
            ..ReaderLimits::default()
        });
        let mut session = SessionState::new();

        let a = reader.read_message(&mut source, &mut session).unwrap().unwrap();
        assert_eq!(source.reads, 1);
        assert_eq!(reader.state(), ReaderState::AwaitingHeader);
        assert!(!reader.buffered().is_empty());

        let b = reader.read_message(&mut source, &mut session).unwrap().unwrap();
        assert_eq!(source.reads, 1, "second message must come from the buffer");
        assert!(reader.buffered().is_empty());

        assert_eq!(a, first);
        assert_eq!(b, second);
        assert!(reader.read_message(&mut source, &mut session).unwrap().is_none());
    }

    #[test]
    fn test_body_is_leading_slice() {
        let mut data = b"CONTENT_LENGTH:5\r\nCOMMAND:\r\n\r\nhello".to_vec();
        data.extend_from_slice(b"CONTENT_LENGTH:3\r\nCOMMAND:\r\n\r\nbye");
        let total = data.len();
        let mut source = ChunkedSource::new(data, total);

        let mut reader = StreamReader::new();
        let first = reader.next_frame(&mut source).unwrap().unwrap();
        assert_eq!(first.body, b"hello");
        let second = reader.next_frame(&mut source).unwrap().unwrap();
        assert_eq!(second.body, b"bye");
    }

    #[test]
    fn test_empty_body() {
        let data = b"CONTENT_LENGTH:0\r\nCOMMAND:PING\r\n\r\n".to_vec();
        let mut source = ChunkedSource::new(data, 4);
        let frame = StreamReader::new().next_frame(&mut source).unwrap().unwrap();
        assert!(frame.body.is_empty());
        assert_eq!(frame.headers.get("COMMAND"), Some("PING"));
    }

    #[test]
    fn test_clean_close_returns_none() {
        let mut source = ChunkedSource::new(Vec::new(), 16);
        assert!(StreamReader::new().next_frame(&mut source).unwrap().is_none());
    }

    #[test]
    fn test_incomplete_body() {
        let data = b"CONTENT_LENGTH:10\r\nCOMMAND:\r\n\r\nabc".to_vec();
        let mut source = ChunkedSource::new(data, 64);
        let mut reader = StreamReader::new();

        let err = reader.next_frame(&mut source).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::IncompleteBody {
                expected: 10,
                received: 3
            }
        ));
        assert_eq!(reader.state(), ReaderState::Failed);
    }

    #[test]
    fn test_partial_header_then_close() {
        let mut source = ChunkedSource::new(b"CONTENT_LENGTH:1\r\nCOMM".to_vec(), 64);
        let err = StreamReader::new().next_frame(&mut source).unwrap_err();
        assert!(matches!(err, ProtocolError::ConnectionClosed(_)));
    }

    #[test]
    fn test_missing_content_length() {
        let mut source = ChunkedSource::new(b"COMMAND:GET\r\n\r\n".to_vec(), 64);
        let err = StreamReader::new().next_frame(&mut source).unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedHeader(_)));
    }

    #[test]
    fn test_header_too_large() {
        let mut data = b"X:".to_vec();
        data.extend(std::iter::repeat(b'a').take(200));
        let mut source = ChunkedSource::new(data, 64);
        let mut reader = StreamReader::with_limits(ReaderLimits {
            chunk_size: 64,
            max_header_size: 100,
            max_message_size: 1000,
        });
        let err = reader.next_frame(&mut source).unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedHeader(_)));
    }

    #[test]
    fn test_header_too_large_in_single_read() {
        let mut data = b"CONTENT_LENGTH:0\r\nX:".to_vec();
        data.extend(std::iter::repeat(b'a').take(500));
        data.extend_from_slice(b"\r\n\r\n");
        let mut source = ChunkedSource::new(data, 4096);
        let mut reader = StreamReader::with_limits(ReaderLimits {
            chunk_size: 4096,
            max_header_size: 100,
            max_message_size: 1000,
        });

        let err = reader.next_frame(&mut source).unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedHeader(_)));
        assert_eq!(source.reads, 1);
        assert_eq!(reader.state(), ReaderState::Failed);
    }

    #[test]
    fn test_header_at_limit_is_accepted() {
        let data = b"CONTENT_LENGTH:0\r\n\r\n".to_vec();
        let limit = data.len() - HEADER_TERMINATOR.len();
        let mut source = ChunkedSource::new(data, 4096);
        let mut reader = StreamReader::with_limits(ReaderLimits {
            chunk_size: 4096,
            max_header_size: limit,
            max_message_size: 1000,
        });
        assert!(reader.next_frame(&mut source).unwrap().is_some());
    }

    #[test]
    fn test_message_too_large() {
        let mut source = ChunkedSource::new(b"CONTENT_LENGTH:5000\r\n\r\n".to_vec(), 64);
        let mut reader = StreamReader::with_limits(ReaderLimits {
            max_message_size: 4096,
            ..ReaderLimits::default()
        });
        let err = reader.next_frame(&mut source).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::MessageTooLarge {
                size: 5000,
                max: 4096
            }
        ));
    }

    #[test]
    fn test_reader_refuses_after_failure() {
        let mut source = ChunkedSource::new(b"bogus line\r\n\r\n".to_vec(), 64);
        let mut reader = StreamReader::new();
        assert!(reader.next_frame(&mut source).is_err());
        let err = reader.next_frame(&mut source).unwrap_err();
        assert!(matches!(err, ProtocolError::ConnectionClosed(_)));
    }

    #[test]
    fn test_missing_file_markers_fail_reader() {
        let data = b"CONTENT_LENGTH:2\r\nHAS_FILE:true\r\nFILE_BOUNDARY:B\r\n\r\nxx".to_vec();
        let mut source = ChunkedSource::new(data, 64);
        let mut reader = StreamReader::new();
        let err = reader
            .read_message(&mut source, &mut SessionState::new())
            .unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedFrame(_)));
        assert_eq!(reader.state(), ReaderState::Failed);
    }

    #[test]
    fn test_rejected_message_leaves_session_untouched() {
        let data = b"CONTENT_LENGTH:2\r\nHAS_FILE:true\r\nFILE_BOUNDARY:B\r\nREMEMBER-sid:evil\r\nFORGET-theme:\r\n\r\nxx"
            .to_vec();
        let mut source = ChunkedSource::new(data, 64);
        let mut session = SessionState::new();
        let mut seed: HeaderMap = [("VAULT-theme", "dark")].into_iter().collect();
        session.absorb(&mut seed);
        let before = session.clone();

        let err = StreamReader::new()
            .read_message(&mut source, &mut session)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedFrame(_)));
        assert_eq!(session, before);
    }

    #[test]
    fn test_read_message_routes_session_headers() {
        let data =
            b"CONTENT_LENGTH:2\r\nCOMMAND:\r\nREMEMBER-sid:abc\r\nVAULT-theme:dark\r\nCLIENT_VAULT-pin:c2VjcmV0\r\nX:1\r\n\r\nok"
                .to_vec();
        let mut source = ChunkedSource::new(data, 7);
        let mut session = SessionState::new();

        let message = StreamReader::new()
            .read_message(&mut source, &mut session)
            .unwrap()
            .unwrap();

        assert_eq!(message.headers().keys().collect::<Vec<_>>(), vec!["X"]);
        assert_eq!(message.content(), b"ok");
        assert_eq!(message.cookies()["sid"], "abc");
        assert_eq!(message.vault()["theme"], "dark");
        assert_eq!(session.pending_secrets()["pin"], "c2VjcmV0");
    }

    #[test]
    fn test_interrupted_read_is_retried() {
        struct Flaky {
            inner: ChunkedSource,
            interrupted: bool,
        }
        impl Read for Flaky {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                if !self.interrupted {
                    self.interrupted = true;
                    return Err(io::Error::new(ErrorKind::Interrupted, "signal"));
                }
                self.inner.read(buf)
            }
        }

        let message = Message::request("GET");
        let mut source = Flaky {
            inner: ChunkedSource::new(message.generate().unwrap(), 8),
            interrupted: false,
        };
        let messages = read_all(&mut StreamReader::new(), &mut source);
        assert_eq!(messages, vec![message]);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Property: chunking never changes the reconstructed messages.
        #[test]
        fn prop_chunking_is_transparent(
            content in proptest::collection::vec(any::<u8>(), 0..256),
            file in proptest::collection::vec(any::<u8>(), 1..128),
            second in proptest::collection::vec(any::<u8>(), 0..64),
            chunk in 1usize..97,
        ) {
            let first = Message::request("PUT")
                .with_header("k", "v:w")
                .with_content(content)
                .with_file(FileEnvelope::with_random_boundary("f.bin", file));
            prop_assume!(!first.file().unwrap().collides());
            let second = Message::response().with_content(second);

            let mut data = first.generate().unwrap();
            data.extend_from_slice(&second.generate().unwrap());

            let mut source = ChunkedSource::new(data, chunk);
            let messages = read_all(&mut StreamReader::new(), &mut source);
            prop_assert_eq!(messages, vec![first, second]);
        }

        /// Property: any encodable message reads back unchanged.
        #[test]
        fn prop_message_round_trips(
            command in "[A-Z_]{0,10}",
            headers in proptest::collection::vec(("[a-z][A-Za-z0-9_-]{0,12}", "[ -~]{0,24}"), 0..6),
            cookies in proptest::collection::btree_map("[A-Za-z0-9_]{1,8}", "[ -~]{0,16}", 0..4),
            vault in proptest::collection::btree_map("[A-Za-z0-9_]{1,8}", "[ -~]{0,16}", 0..4),
            file in proptest::option::of(("[A-Za-z0-9._-]{1,16}", proptest::collection::vec(any::<u8>(), 0..64))),
            content in proptest::collection::vec(any::<u8>(), 0..128),
            chunk in 1usize..64,
        ) {
            let mut message = Message::request(command).with_content(content);
            for (key, value) in headers {
                message.headers_mut().insert(key, value);
            }
            if let Some((filename, data)) = file {
                let envelope = FileEnvelope::new(filename, data);
                prop_assume!(!envelope.collides());
                message = message.with_file(envelope);
            }
            *message.cookies_mut() = cookies;
            *message.vault_mut() = vault;

            let mut source = ChunkedSource::new(message.generate().unwrap(), chunk);
            let messages = read_all(&mut StreamReader::new(), &mut source);
            prop_assert_eq!(messages, vec![message]);
        }
    }
}
