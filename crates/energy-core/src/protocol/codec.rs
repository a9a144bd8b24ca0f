//! Deterministic binary codec shared by every EnergyKit message.
//!
//! Encoding rules:
//! ```text
//! integers  fixed width, little-endian
//! bool      0x00 | 0x01 (anything else is rejected)
//! uuid      16 raw bytes
//! string    [len:2][utf-8 bytes:len]
//! option    [present:1][value]        (value omitted when absent)
//! ```
//! There are no field tags and no padding, so encoding the same value twice
//! always yields the same bytes.  [`decode`] rejects trailing bytes.

use thiserror::Error;
use uuid::Uuid;

/// Errors produced by the secure transport codec.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The HMAC over the authentication message, or the AEAD tag over the
    /// ciphertext, did not verify under the expected key.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// The ciphertext could not be run through the cipher at all.
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    /// The cipher refused to encrypt the plaintext.
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// The bytes do not form a valid message (truncated, out-of-range field,
    /// inconsistent chunk set, trailing data ...).
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// The payload needs more chunks than the one-byte chunk header allows.
    #[error("payload of {size} bytes does not fit in {max} chunks")]
    PayloadTooLarge { size: usize, max: usize },

    /// The authentication timestamp is outside the accepted clock skew.
    #[error("authentication timestamp is {skew_ms} ms away from local time")]
    StaleAuthentication { skew_ms: u64 },

    /// The authentication nonce has already been accepted once.
    #[error("authentication nonce was already used")]
    Replayed,
}

/// A value with a wire encoding.
pub trait WireEncode {
    fn encode_to(&self, w: &mut WireWriter);
}

/// A value that can be read back from its wire encoding.
pub trait WireDecode: Sized {
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedMessage`] if the bytes are invalid.
    fn decode_from(r: &mut WireReader<'_>) -> Result<Self, ProtocolError>;
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes `value` into a fresh byte vector.
pub fn encode<T: WireEncode + ?Sized>(value: &T) -> Vec<u8> {
    let mut w = WireWriter::new();
    value.encode_to(&mut w);
    w.into_bytes()
}

/// Decodes a `T` that must occupy all of `bytes`.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedMessage`] if the bytes are invalid or if
/// any bytes remain after the value.
pub fn decode<T: WireDecode>(bytes: &[u8]) -> Result<T, ProtocolError> {
    let mut r = WireReader::new(bytes);
    let value = T::decode_from(&mut r)?;
    r.finish()?;
    Ok(value)
}

// ── Writer ────────────────────────────────────────────────────────────────────

/// Append-only output buffer.
#[derive(Debug, Default)]
pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn put_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_bool(&mut self, v: bool) {
        self.buf.push(u8::from(v));
    }

    pub fn put_uuid(&mut self, v: &Uuid) {
        self.buf.extend_from_slice(v.as_bytes());
    }

    /// Writes bytes with no length prefix.
    pub fn put_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Writes a 2-byte length prefix followed by the UTF-8 string bytes.
    ///
    /// Strings longer than `u16::MAX` bytes are truncated at a character
    /// boundary.
    pub fn put_string(&mut self, s: &str) {
        let mut end = s.len().min(u16::MAX as usize);
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        self.put_u16(end as u16);
        self.buf.extend_from_slice(&s.as_bytes()[..end]);
    }

    pub fn put_option<T>(&mut self, v: Option<T>, put: impl FnOnce(&mut Self, T)) {
        match v {
            Some(inner) => {
                self.put_u8(0x01);
                put(self, inner);
            }
            None => self.put_u8(0x00),
        }
    }
}

// ── Reader ────────────────────────────────────────────────────────────────────

/// Cursor over an input buffer.
#[derive(Debug)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Fails if unread bytes remain.
    pub fn finish(&self) -> Result<(), ProtocolError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(ProtocolError::MalformedMessage(format!(
                "{n} trailing bytes after message"
            ))),
        }
    }

    fn take(&mut self, needed: usize, context: &str) -> Result<&'a [u8], ProtocolError> {
        let buf: &'a [u8] = self.buf;
        require_len(&buf[self.pos..], needed, context)?;
        let slice = &buf[self.pos..self.pos + needed];
        self.pos += needed;
        Ok(slice)
    }

    pub fn read_u8(&mut self, context: &str) -> Result<u8, ProtocolError> {
        Ok(self.take(1, context)?[0])
    }

    pub fn read_u16(&mut self, context: &str) -> Result<u16, ProtocolError> {
        let b = self.read_array::<2>(context)?;
        Ok(u16::from_le_bytes(b))
    }

    pub fn read_u64(&mut self, context: &str) -> Result<u64, ProtocolError> {
        let b = self.read_array::<8>(context)?;
        Ok(u64::from_le_bytes(b))
    }

    pub fn read_bool(&mut self, context: &str) -> Result<bool, ProtocolError> {
        match self.read_u8(context)? {
            0x00 => Ok(false),
            0x01 => Ok(true),
            other => Err(ProtocolError::MalformedMessage(format!(
                "{context}: invalid boolean byte 0x{other:02X}"
            ))),
        }
    }

    pub fn read_array<const N: usize>(&mut self, context: &str) -> Result<[u8; N], ProtocolError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, context)?);
        Ok(out)
    }

    pub fn read_uuid(&mut self, context: &str) -> Result<Uuid, ProtocolError> {
        Ok(Uuid::from_bytes(self.read_array::<16>(context)?))
    }

    /// Reads a 2-byte length prefix and then that many UTF-8 bytes.
    pub fn read_string(&mut self, context: &str) -> Result<String, ProtocolError> {
        let len = self.read_u16(context)? as usize;
        let bytes = self.take(len, context)?;
        std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|e| ProtocolError::MalformedMessage(format!("{context}: invalid UTF-8: {e}")))
    }

    pub fn read_option<T>(
        &mut self,
        context: &str,
        read: impl FnOnce(&mut Self) -> Result<T, ProtocolError>,
    ) -> Result<Option<T>, ProtocolError> {
        if self.read_bool(context)? {
            read(self).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Consumes everything that is left.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let buf: &'a [u8] = self.buf;
        let rest = &buf[self.pos..];
        self.pos = buf.len();
        rest
    }
}

/// Maps a `TryFrom<u8>` failure to a malformed-message error naming the field.
pub fn read_enum<T: TryFrom<u8, Error = ()>>(
    r: &mut WireReader<'_>,
    context: &str,
) -> Result<T, ProtocolError> {
    let raw = r.read_u8(context)?;
    T::try_from(raw).map_err(|()| {
        ProtocolError::MalformedMessage(format!("{context}: unknown value 0x{raw:02X}"))
    })
}

fn require_len(buf: &[u8], needed: usize, context: &str) -> Result<(), ProtocolError> {
    if buf.len() < needed {
        Err(ProtocolError::MalformedMessage(format!(
            "{context}: need {needed} bytes, got {}",
            buf.len()
        )))
    } else {
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
