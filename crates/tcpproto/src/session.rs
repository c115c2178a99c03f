//! Replicated session state.
//!
//! A connection endpoint keeps three independent maps:
//!
//! - `cookies`: identity tokens assigned by the peer and echoed on every send
//! - `vault`: plaintext application state, replicated the same way
//! - `pending_secrets`: values staged for the next outgoing message only
//!
//! Inbound messages update the maps through prefixed headers which are
//! removed before the caller sees them:
//!
//! | Header           | Effect                                 |
//! |------------------|----------------------------------------|
//! | `REMEMBER-<k>`   | `cookies[k] = value`                   |
//! | `VAULT-<k>`      | `vault[k] = value`                     |
//! | `CLIENT_VAULT-<k>` | `pending_secrets[k] = value`         |
//! | `FORGET-<k>`     | remove `k` from `cookies` and `vault`  |

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::crypto::{seal_header_value, SecretSealer};
use crate::headers::{
    HeaderMap, CLIENT_VAULT_PREFIX, FORGET_PREFIX, REMEMBER_PREFIX, VAULT_PREFIX,
};
use crate::message::Message;

/// Session maps owned by one connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    cookies: BTreeMap<String, String>,
    vault: BTreeMap<String, String>,
    pending_secrets: BTreeMap<String, String>,
}

impl SessionState {
    /// Create an empty session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cookies learned from the peer.
    pub fn cookies(&self) -> &BTreeMap<String, String> {
        &self.cookies
    }

    /// Vault entries learned from the peer.
    pub fn vault(&self) -> &BTreeMap<String, String> {
        &self.vault
    }

    /// Secrets staged for the next outgoing message, or sealed secrets
    /// received from the peer.
    pub fn pending_secrets(&self) -> &BTreeMap<String, String> {
        &self.pending_secrets
    }

    /// Stage a secret to be encrypted into the next outgoing message.
    pub fn stage_secret(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.pending_secrets.insert(key.into(), value.into());
    }

    /// Remove `key` from both `cookies` and `vault`.
    ///
    /// Returns whether anything was removed. An unknown key is not an error.
    pub fn forget(&mut self, key: &str) -> bool {
        let cookie = self.cookies.remove(key).is_some();
        let vault = self.vault.remove(key).is_some();
        if !cookie && !vault {
            debug!(key, "forget for unknown session key");
        }
        cookie || vault
    }

    /// Drop all session state.
    pub fn clear(&mut self) {
        self.cookies.clear();
        self.vault.clear();
        self.pending_secrets.clear();
    }

    /// Prepare an outgoing message.
    ///
    /// With a sealer, every staged secret is encrypted and attached as a
    /// `CLIENT_VAULT-<key>` header; a secret that fails to encrypt is logged
    /// and left out. The staging map is emptied either way. The current
    /// `cookies` and `vault` are then copied onto the message.
    ///
    /// Returns the number of secrets attached.
    pub fn prepare_outgoing(
        &mut self,
        message: &mut Message,
        sealer: Option<&dyn SecretSealer>,
    ) -> usize {
        let pending = std::mem::take(&mut self.pending_secrets);
        let mut attached = 0;

        if let Some(sealer) = sealer {
            for (key, value) in pending {
                match seal_header_value(sealer, value.as_bytes()) {
                    Ok(sealed) => {
                        message
                            .headers_mut()
                            .insert(format!("{CLIENT_VAULT_PREFIX}{key}"), sealed);
                        attached += 1;
                    }
                    Err(e) => warn!(%key, error = %e, "dropping staged secret"),
                }
            }
        } else if !pending.is_empty() {
            debug!(
                count = pending.len(),
                "no public key configured, discarding staged secrets"
            );
        }

        message.set_session_maps(self.cookies.clone(), self.vault.clone());
        attached
    }

    /// Move every session header out of `headers`, keeping wire order.
    ///
    /// The result can be validated separately and later handed to
    /// [`absorb`](Self::absorb).
    pub fn split_session_headers(headers: &mut HeaderMap) -> HeaderMap {
        let session_keys: Vec<String> = headers
            .keys()
            .filter(|k| is_session_header(k))
            .map(str::to_string)
            .collect();

        let mut split = HeaderMap::new();
        for name in session_keys {
            if let Some(value) = headers.remove(&name) {
                split.insert(name, value);
            }
        }
        split
    }

    /// Apply session headers from an inbound message and strip them.
    ///
    /// Headers are processed in wire order, so a `FORGET-` after a
    /// `REMEMBER-` for the same key in one message wins.
    pub fn absorb(&mut self, headers: &mut HeaderMap) {
        for (name, value) in Self::split_session_headers(headers) {
            if let Some(key) = name.strip_prefix(REMEMBER_PREFIX) {
                self.cookies.insert(key.to_string(), value);
            } else if let Some(key) = name.strip_prefix(VAULT_PREFIX) {
                self.vault.insert(key.to_string(), value);
            } else if let Some(key) = name.strip_prefix(CLIENT_VAULT_PREFIX) {
                self.pending_secrets.insert(key.to_string(), value);
            } else if let Some(key) = name.strip_prefix(FORGET_PREFIX) {
                self.forget(key);
            }
        }
    }
}

fn is_session_header(name: &str) -> bool {
    [REMEMBER_PREFIX, VAULT_PREFIX, CLIENT_VAULT_PREFIX, FORGET_PREFIX]
        .iter()
        .any(|prefix| name.starts_with(prefix))
}
