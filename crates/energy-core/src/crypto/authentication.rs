//! HMAC-SHA256 authentication of a timestamped nonce.
//!
//! ```text
//! AuthenticationMessage  [timestamp_ms:8][nonce:16]
//! Authentication         [message:24][signature:32]
//! ```
//!
//! The signature is `HMAC-SHA256(key, encode(message))`.  Verification uses
//! the constant-time comparison provided by [`hmac::Mac::verify_slice`].

use std::time::{SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::{Nonce, PrivateKey, NONCE_LEN};
use crate::protocol::codec::{encode, ProtocolError, WireDecode, WireEncode, WireReader, WireWriter};

type HmacSha256 = Hmac<Sha256>;

/// Length of an HMAC-SHA256 signature in bytes.
pub const SIGNATURE_LEN: usize = 32;

/// The signed part of an [`Authentication`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticationMessage {
    /// Milliseconds since the Unix epoch at creation time.
    pub timestamp_ms: u64,
    pub nonce: Nonce,
}

impl AuthenticationMessage {
    /// A message stamped with the current wall-clock time and a fresh nonce.
    pub fn now() -> Self {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Self::at(timestamp_ms)
    }

    pub fn at(timestamp_ms: u64) -> Self {
        Self {
            timestamp_ms,
            nonce: Nonce::generate(),
        }
    }
}

/// An authentication message together with its HMAC signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Authentication {
    pub message: AuthenticationMessage,
    pub signature: [u8; SIGNATURE_LEN],
}

impl Authentication {
    /// Signs a freshly generated message.
    pub fn new(key: &PrivateKey) -> Self {
        authenticate(key, AuthenticationMessage::now())
    }

    /// Whether the signature matches the message under `key`.
    pub fn is_authentic(&self, key: &PrivateKey) -> bool {
        verify(key, self)
    }
}

/// Signs `message` with `key`.
pub fn authenticate(key: &PrivateKey, message: AuthenticationMessage) -> Authentication {
    let mut mac = keyed_mac(key);
    mac.update(&encode(&message));
    let mut signature = [0u8; SIGNATURE_LEN];
    signature.copy_from_slice(&mac.finalize().into_bytes());
    Authentication { message, signature }
}

/// Recomputes the signature under `key` and compares it in constant time.
pub fn verify(key: &PrivateKey, authentication: &Authentication) -> bool {
    let mut mac = keyed_mac(key);
    mac.update(&encode(&authentication.message));
    mac.verify_slice(&authentication.signature).is_ok()
}

/// Like [`verify`], but as a `Result` for use with `?`.
///
/// # Errors
///
/// Returns [`ProtocolError::AuthenticationFailed`] if the signature is wrong.
pub fn require_authentic(
    key: &PrivateKey,
    authentication: &Authentication,
) -> Result<(), ProtocolError> {
    if verify(key, authentication) {
        Ok(())
    } else {
        Err(ProtocolError::AuthenticationFailed)
    }
}

fn keyed_mac(key: &PrivateKey) -> HmacSha256 {
    // HMAC is defined for keys of any length, so this cannot fail.
    <HmacSha256 as Mac>::new_from_slice(key.as_bytes())
        .expect("HMAC-SHA256 accepts keys of any length")
}

// ── Wire encoding ─────────────────────────────────────────────────────────────

impl WireEncode for AuthenticationMessage {
    fn encode_to(&self, w: &mut WireWriter) {
        w.put_u64(self.timestamp_ms);
        w.put_raw(&self.nonce.0);
    }
}

impl WireDecode for AuthenticationMessage {
    fn decode_from(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        let timestamp_ms = r.read_u64("authentication timestamp")?;
        let nonce = Nonce(r.read_array::<NONCE_LEN>("authentication nonce")?);
        Ok(Self {
            timestamp_ms,
            nonce,
        })
    }
}

impl WireEncode for Authentication {
    fn encode_to(&self, w: &mut WireWriter) {
        self.message.encode_to(w);
        w.put_raw(&self.signature);
    }
}

impl WireDecode for Authentication {
    fn decode_from(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        let message = AuthenticationMessage::decode_from(r)?;
        let signature = r.read_array::<SIGNATURE_LEN>("authentication signature")?;
        Ok(Self { message, signature })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::codec::decode;

    #[test]
    fn test_authentication_verifies_under_signing_key() {
        // Arrange
        let key = PrivateKey::generate();

        // Act
        let auth = Authentication::new(&key);

        // Assert
        assert!(verify(&key, &auth));
        assert!(auth.is_authentic(&key));
    }

    #[test]
    fn test_authentication_fails_under_other_key() {
        let auth = Authentication::new(&PrivateKey::generate());
        assert!(!verify(&PrivateKey::generate(), &auth));
        assert_eq!(
            require_authentic(&PrivateKey::generate(), &auth),
            Err(ProtocolError::AuthenticationFailed)
        );
    }

    #[test]
    fn test_authenticate_is_deterministic_for_same_message() {
        let key = PrivateKey::from_bytes([7; 32]);
        let message = AuthenticationMessage {
            timestamp_ms: 1_700_000_000_000,
            nonce: Nonce([1; NONCE_LEN]),
        };
        assert_eq!(authenticate(&key, message), authenticate(&key, message));
    }

    #[test]
    fn test_any_bit_flip_in_serialized_authentication_fails_verification() {
        // Arrange
        let key = PrivateKey::generate();
        let bytes = encode(&Authentication::new(&key));
        assert_eq!(bytes.len(), 8 + NONCE_LEN + SIGNATURE_LEN);

        for bit in 0..bytes.len() * 8 {
            // Act
            let mut tampered = bytes.clone();
            tampered[bit / 8] ^= 1 << (bit % 8);
            let auth: Authentication = decode(&tampered).expect("fixed-size layout");

            // Assert
            assert_eq!(
                require_authentic(&key, &auth),
                Err(ProtocolError::AuthenticationFailed),
                "bit {bit} flipped but verification passed"
            );
        }
    }
}
