//! Blocking client endpoint.
//!
//! A [`Client`] owns one transport, one [`StreamReader`] and one
//! [`SessionState`]. Every `send` writes one request and reads exactly one
//! response; the session maps it holds are echoed on every request and
//! updated from every response.

use std::fs;
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};

use tcpproto::{Message, ReaderLimits, RsaSealer, SecretSealer, SessionState, StreamReader};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{ClientError, Result};

/// A connection to a tcpproto server.
///
/// `send` takes `&mut self`, so staging secrets and draining them into a
/// request never interleave. Share a client across threads behind a `Mutex`.
pub struct Client<T: Read + Write = TcpStream> {
    transport: T,
    reader: StreamReader,
    session: SessionState,
    sealer: Option<Box<dyn SecretSealer + Send + Sync>>,
}

impl<T: Read + Write> std::fmt::Debug for Client<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("reader", &self.reader)
            .field("session", &self.session)
            .field("encrypts_secrets", &self.sealer.is_some())
            .finish_non_exhaustive()
    }
}

impl Client<TcpStream> {
    /// Connect using `config`.
    ///
    /// The public key is optional: if it is not configured or cannot be
    /// loaded, the client still connects but staged secrets are discarded
    /// instead of sent.
    pub fn connect(config: &Config) -> Result<Self> {
        let address = config.connection.address();
        let stream = TcpStream::connect(&address)?;
        stream.set_read_timeout(config.connection.read_timeout())?;
        stream.set_nodelay(true)?;
        info!(%address, "connected");

        let mut client = Self::new(stream, config.connection.reader_limits());
        if let Some(path) = &config.security.public_key_path {
            match fs::read_to_string(path)
                .map_err(ClientError::from)
                .and_then(|pem| Ok(RsaSealer::from_pem(&pem)?))
            {
                Ok(sealer) => client.set_sealer(sealer),
                Err(e) => warn!(
                    path = %path.display(),
                    error = %e,
                    "public key unavailable, staged secrets will not be sent"
                ),
            }
        }
        Ok(client)
    }

    /// Shut the socket down in both directions.
    pub fn close(self) -> Result<()> {
        debug!("closing connection");
        self.transport.shutdown(Shutdown::Both)?;
        Ok(())
    }
}

impl<T: Read + Write> Client<T> {
    /// Wrap an already connected transport.
    pub fn new(transport: T, limits: ReaderLimits) -> Self {
        Self {
            transport,
            reader: StreamReader::with_limits(limits),
            session: SessionState::new(),
            sealer: None,
        }
    }

    /// Encrypt staged secrets with `sealer` from now on.
    pub fn set_sealer(&mut self, sealer: impl SecretSealer + Send + Sync + 'static) {
        self.sealer = Some(Box::new(sealer));
    }

    /// Whether staged secrets will be encrypted and sent.
    pub fn encrypts_secrets(&self) -> bool {
        self.sealer.is_some()
    }

    /// Stage a secret for the next request only.
    pub fn lock(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.session.stage_secret(key, value);
    }

    /// The replicated session.
    pub fn session(&self) -> &SessionState {
        &self.session
    }

    /// Cookies the server has set so far.
    pub fn cookies(&self) -> &std::collections::BTreeMap<String, String> {
        self.session.cookies()
    }

    /// Vault entries the server has set so far.
    pub fn vault(&self) -> &std::collections::BTreeMap<String, String> {
        self.session.vault()
    }

    /// Send `request` and wait for the response.
    ///
    /// Staged secrets are cleared whether or not the write succeeds.
    pub fn send(&mut self, mut request: Message) -> Result<Message> {
        let sealer = self.sealer.as_deref().map(|s| s as &dyn SecretSealer);
        let sealed = self.session.prepare_outgoing(&mut request, sealer);
        let bytes = request.generate()?;
        debug!(
            command = request.command(),
            bytes = bytes.len(),
            sealed,
            "sending request"
        );
        self.transport.write_all(&bytes)?;
        self.transport.flush()?;
        self.receive()
    }

    /// Read the next message from the peer.
    pub fn receive(&mut self) -> Result<Message> {
        let message = self
            .reader
            .read_message(&mut self.transport, &mut self.session)?
            .ok_or(ClientError::NoResponse)?;
        debug!(
            content = message.content().len(),
            has_file = message.file().is_some_and(|f| f.is_present()),
            "received response"
        );
        Ok(message)
    }

    /// Give back the transport, dropping buffered bytes and session state.
    pub fn into_inner(self) -> T {
        self.transport
    }
}
