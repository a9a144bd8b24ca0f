//! AES-256-CCM encrypted payloads.
//!
//! Wire format:
//! ```text
//! [authentication:56][iv:13][ciphertext+tag:N]
//! ```
//! The ciphertext runs to the end of the buffer, so it carries no length
//! field.  The encoded authentication message is bound to the ciphertext as
//! AEAD associated data, which means a payload cannot be re-signed with a
//! different authentication block without the tag failing.

use aes::Aes256;
use ccm::aead::consts::{U13, U16};
use ccm::aead::generic_array::GenericArray;
use ccm::aead::{Aead, KeyInit, Payload};
use ccm::Ccm;
use tracing::debug;

use super::authentication::{require_authentic, Authentication};
use super::{InitializationVector, PrivateKey, IV_LEN};
use crate::protocol::codec::{encode, ProtocolError, WireDecode, WireEncode, WireReader, WireWriter};

type AesCcm = Ccm<Aes256, U16, U13>;

/// Length of the CCM authentication tag appended to the ciphertext.
pub const TAG_LEN: usize = 16;

/// Ciphertext together with the material needed to check and decrypt it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedPayload {
    pub authentication: Authentication,
    pub iv: InitializationVector,
    /// Ciphertext with the CCM tag appended.
    pub ciphertext: Vec<u8>,
}

/// Encrypts `plaintext` under `key` with a fresh IV and authentication.
///
/// # Errors
///
/// Returns [`ProtocolError::EncryptionFailed`] if the cipher rejects the
/// input (plaintext too long for the CCM length field).
pub fn encrypt(key: &PrivateKey, plaintext: &[u8]) -> Result<EncryptedPayload, ProtocolError> {
    let authentication = Authentication::new(key);
    let iv = InitializationVector::generate();
    let aad = encode(&authentication.message);

    let ciphertext = cipher(key)
        .encrypt(
            GenericArray::from_slice(&iv.0),
            Payload {
                msg: plaintext,
                aad: &aad,
            },
        )
        .map_err(|e| ProtocolError::EncryptionFailed(e.to_string()))?;

    Ok(EncryptedPayload {
        authentication,
        iv,
        ciphertext,
    })
}

/// Verifies the payload's authentication, then decrypts it.
///
/// # Errors
///
/// - [`ProtocolError::AuthenticationFailed`] if the HMAC does not verify (the
///   cipher is never invoked) or if the CCM tag does not verify.
/// - [`ProtocolError::DecryptionFailed`] if the ciphertext is too short to
///   contain a tag.
pub fn decrypt(key: &PrivateKey, payload: &EncryptedPayload) -> Result<Vec<u8>, ProtocolError> {
    require_authentic(key, &payload.authentication).map_err(|e| {
        debug!("encrypted payload authentication rejected");
        e
    })?;

    if payload.ciphertext.len() < TAG_LEN {
        return Err(ProtocolError::DecryptionFailed(format!(
            "ciphertext of {} bytes is shorter than the {TAG_LEN}-byte tag",
            payload.ciphertext.len()
        )));
    }

    let aad = encode(&payload.authentication.message);
    cipher(key)
        .decrypt(
            GenericArray::from_slice(&payload.iv.0),
            Payload {
                msg: &payload.ciphertext,
                aad: &aad,
            },
        )
        .map_err(|_| {
            debug!("encrypted payload tag rejected");
            ProtocolError::AuthenticationFailed
        })
}

impl EncryptedPayload {
    /// See [`decrypt`].
    ///
    /// # Errors
    ///
    /// Same as [`decrypt`].
    pub fn decrypt(&self, key: &PrivateKey) -> Result<Vec<u8>, ProtocolError> {
        decrypt(key, self)
    }
}

fn cipher(key: &PrivateKey) -> AesCcm {
    AesCcm::new(GenericArray::from_slice(key.as_bytes()))
}

// ── Wire encoding ─────────────────────────────────────────────────────────────

impl WireEncode for EncryptedPayload {
    fn encode_to(&self, w: &mut WireWriter) {
        self.authentication.encode_to(w);
        w.put_raw(&self.iv.0);
        w.put_raw(&self.ciphertext);
    }
}

impl WireDecode for EncryptedPayload {
    fn decode_from(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        let authentication = Authentication::decode_from(r)?;
        let iv = InitializationVector(r.read_array::<IV_LEN>("encryption iv")?);
        let ciphertext = r.read_rest().to_vec();
        Ok(Self {
            authentication,
            iv,
            ciphertext,
        })
    }
}
