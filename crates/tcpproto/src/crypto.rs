//! Public-key protection for staged secrets.
//!
//! Staged secrets travel as `CLIENT_VAULT-<key>` headers whose value is the
//! base64 of an RSA-OAEP ciphertext, with SHA-512 as both the OAEP hash and
//! the MGF1 hash. The sending side only needs the peer's public key; the
//! receiving side opens the value with the matching private key.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::rngs::OsRng;
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha512;

use crate::error::{ProtocolError, Result};

/// Encrypts a secret for the peer.
pub trait SecretSealer {
    /// Encrypt `plaintext`, returning raw ciphertext bytes.
    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>>;
}

/// Decrypts a secret sealed by a [`SecretSealer`].
pub trait SecretOpener {
    /// Decrypt raw ciphertext bytes.
    fn open(&self, ciphertext: &[u8]) -> Result<Vec<u8>>;
}

/// Seal `plaintext` and encode it as a header value.
pub fn seal_header_value(sealer: &dyn SecretSealer, plaintext: &[u8]) -> Result<String> {
    let ciphertext = sealer.seal(plaintext)?;
    Ok(STANDARD.encode(ciphertext))
}

/// Decode a header value produced by [`seal_header_value`] and open it.
pub fn open_header_value(opener: &dyn SecretOpener, value: &str) -> Result<Vec<u8>> {
    let ciphertext = STANDARD
        .decode(value.trim())
        .map_err(|e| ProtocolError::Decryption(format!("invalid base64: {e}")))?;
    opener.open(&ciphertext)
}

fn padding() -> Oaep {
    Oaep::new_with_mgf_hash::<Sha512, Sha512>()
}

/// RSA-OAEP (SHA-512) sealer holding the peer's public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RsaSealer {
    key: RsaPublicKey,
}

impl RsaSealer {
    /// Wrap an already parsed public key.
    pub fn new(key: RsaPublicKey) -> Self {
        Self { key }
    }

    /// Parse a PEM public key.
    ///
    /// Accepts both `PUBLIC KEY` (SubjectPublicKeyInfo) and
    /// `RSA PUBLIC KEY` (PKCS#1) documents.
    pub fn from_pem(pem: &str) -> Result<Self> {
        let key = RsaPublicKey::from_public_key_pem(pem)
            .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
            .map_err(|e| ProtocolError::InvalidPublicKey(e.to_string()))?;
        Ok(Self { key })
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.key
    }
}

impl SecretSealer for RsaSealer {
    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        Ok(self.key.encrypt(&mut OsRng, padding(), plaintext)?)
    }
}

/// RSA-OAEP (SHA-512) opener holding the local private key.
#[derive(Debug, Clone)]
pub struct RsaOpener {
    key: RsaPrivateKey,
}

impl RsaOpener {
    pub fn new(key: RsaPrivateKey) -> Self {
        Self { key }
    }

    /// Parse a PEM private key (PKCS#8 or PKCS#1).
    pub fn from_pem(pem: &str) -> Result<Self> {
        let key = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|e| ProtocolError::Decryption(format!("invalid private key: {e}")))?;
        Ok(Self { key })
    }

    /// The sealer matching this opener.
    pub fn sealer(&self) -> RsaSealer {
        RsaSealer::new(self.key.to_public_key())
    }
}

impl SecretOpener for RsaOpener {
    fn open(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        Ok(self.key.decrypt(padding(), ciphertext)?)
    }
}
