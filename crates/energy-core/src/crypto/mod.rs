//! Key material and the cryptographic building blocks of the transport.
//!
//! - [`authentication`] – HMAC-SHA256 over a timestamped random nonce.
//! - [`encryption`] – AES-256-CCM payloads carrying their own authentication.
//! - [`freshness`] – clock abstraction, skew window and nonce replay guard.
//!
//! Keys are provisioned out of band; this module only stores and uses them.

pub mod authentication;
pub mod encryption;
pub mod freshness;

use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Length of a [`PrivateKey`] in bytes.
pub const KEY_LEN: usize = 32;
/// Length of a [`Nonce`] in bytes.
pub const NONCE_LEN: usize = 16;
/// Length of an [`InitializationVector`] in bytes (the AES-CCM nonce size).
pub const IV_LEN: usize = 13;

/// A private key string could not be parsed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid private key: {0}")]
pub struct InvalidKey(pub String);

/// Symmetric secret shared between the controller and one device.
///
/// Used both as the HMAC key and as the AES-256 key.  Text form is 64
/// lowercase hex characters; `Debug` never prints the key bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKey([u8; KEY_LEN]);

impl PrivateKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Generates a new random key.
    pub fn generate() -> Self {
        Self(rand::random())
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(..)")
    }
}

impl FromStr for PrivateKey {
    type Err = InvalidKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.trim()).map_err(|e| InvalidKey(e.to_string()))?;
        let bytes: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|v: Vec<u8>| InvalidKey(format!("expected {KEY_LEN} bytes, got {}", v.len())))?;
        Ok(Self(bytes))
    }
}

impl Serialize for PrivateKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PrivateKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(de::Error::custom)
    }
}

/// Random value that makes every authentication message unique.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Nonce(pub [u8; NONCE_LEN]);

impl Nonce {
    pub fn generate() -> Self {
        Self(rand::random())
    }
}

/// Per-encryption random IV (AES-CCM nonce).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitializationVector(pub [u8; IV_LEN]);

impl InitializationVector {
    pub fn generate() -> Self {
        Self(rand::random())
    }
}
