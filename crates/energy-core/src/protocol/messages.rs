//! Services, characteristics and the closed set of messages exchanged with a
//! device.
//!
//! Every device exposes the energy service (identity characteristics, read in
//! the clear) plus one kind-specific service with four slots:
//!
//! | Slot                  | Direction         | Content                                   |
//! |-----------------------|-------------------|-------------------------------------------|
//! | information request   | controller → dev  | [`InformationRequest`] (single write)     |
//! | information response  | dev → controller  | chunks of a sealed status                 |
//! | action request        | controller → dev  | chunks of a sealed target state           |
//! | action response       | dev → controller  | chunks of a sealed [`ActionResult`]       |
//!
//! "Sealed" means encode → encrypt → encode the [`EncryptedPayload`] → split
//! into [`Chunk`]s; [`open`] reverses it.  Which values may be sealed is fixed
//! by the [`Sealed`] trait.

use std::fmt;

use uuid::Uuid;

use super::chunk::{reassemble, split, Chunk};
use super::codec::{
    decode, encode, read_enum, ProtocolError, WireDecode, WireEncode, WireReader, WireWriter,
};
use crate::crypto::authentication::{Authentication, AuthenticationMessage};
use crate::crypto::encryption::{encrypt, EncryptedPayload};
use crate::crypto::PrivateKey;
use crate::domain::device::{DeviceId, DeviceKind, VoltageSystem};
use crate::domain::state::{AccessoryStatus, PowerSourceState, PowerSourceStatus, PowerState};

// ── Service and characteristic identifiers ────────────────────────────────────

/// Service advertised by every EnergyKit device; used to filter scans.
pub const ENERGY_SERVICE: Uuid = Uuid::from_u128(0x6F8A5763_BEE1_49F3_9BF4_AA02F3D7E570);
/// Readable: the device's [`DeviceId`] as 16 raw bytes.
pub const IDENTIFIER_CHARACTERISTIC: Uuid =
    Uuid::from_u128(0xA3B6C75A_7C19_4A20_BD1A_ED07059BD51E);
/// Readable: one [`DeviceKind`] byte.
pub const DEVICE_KIND_CHARACTERISTIC: Uuid =
    Uuid::from_u128(0x2759174B_495B_49EE_831A_B6C783D0FDE3);
/// Readable: the device name as UTF-8.
pub const DEVICE_NAME_CHARACTERISTIC: Uuid =
    Uuid::from_u128(0xE2966BF0_5215_46E8_BD92_ABFF342C3C30);

/// The kind-specific service that carries the encrypted exchanges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceService {
    PowerSource,
    Accessory,
}

impl DeviceService {
    /// The service a device of `kind` exposes, if any.
    pub fn for_kind(kind: DeviceKind) -> Option<Self> {
        match kind {
            DeviceKind::PowerSource => Some(DeviceService::PowerSource),
            DeviceKind::Accessory => Some(DeviceService::Accessory),
            DeviceKind::Controller => None,
        }
    }

    pub fn uuid(self) -> Uuid {
        match self {
            DeviceService::PowerSource => Uuid::from_u128(0x9565C26D_E717_4524_A38E_8DADA4C04909),
            DeviceService::Accessory => Uuid::from_u128(0xCFC0F8A3_DDF5_4D30_9CA3_1701C5E9064E),
        }
    }

    /// Characteristic carrying messages of `kind` on this service.
    pub fn slot(self, kind: MessageKind) -> Uuid {
        let raw = match (self, kind) {
            (DeviceService::PowerSource, MessageKind::InformationRequest) => {
                0xC430EFCE_604D_48F3_A241_5F7B781E4F90
            }
            (DeviceService::PowerSource, MessageKind::InformationResponse) => {
                0x6AFA0D36_4567_4486_BEE5_E14A622B805F
            }
            (DeviceService::PowerSource, MessageKind::ActionRequest) => {
                0xD28123FD_AB48_45E1_939E_D0D5F7CB0DD8
            }
            (DeviceService::PowerSource, MessageKind::ActionResponse) => {
                0xC7330D59_E08B_4B54_9639_5DC2121EC439
            }
            (DeviceService::Accessory, MessageKind::InformationRequest) => {
                0x3E1B5C0A_92D4_4F6E_8A7B_2C91D0E4F512
            }
            (DeviceService::Accessory, MessageKind::InformationResponse) => {
                0x7B20E4D1_5A3C_4B89_9E6F_41C8A2D7B033
            }
            (DeviceService::Accessory, MessageKind::ActionRequest) => {
                0x0F9C6A2E_B4D7_4C15_A830_6E5B91F2C7D4
            }
            (DeviceService::Accessory, MessageKind::ActionResponse) => {
                0x58D3A71F_0C6E_4E2B_B7A9_93F4E0C1D286
            }
        };
        Uuid::from_u128(raw)
    }
}

/// The four message kinds a device service carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    InformationRequest,
    InformationResponse,
    ActionRequest,
    ActionResponse,
}

impl MessageKind {
    /// Whether the message travels as chunks of an encrypted payload.
    pub fn is_sealed(self) -> bool {
        !matches!(self, MessageKind::InformationRequest)
    }

    /// The message a device answers this one with, if it is a request.
    pub fn response(self) -> Option<MessageKind> {
        match self {
            MessageKind::InformationRequest => Some(MessageKind::InformationResponse),
            MessageKind::ActionRequest => Some(MessageKind::ActionResponse),
            MessageKind::InformationResponse | MessageKind::ActionResponse => None,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageKind::InformationRequest => "information request",
            MessageKind::InformationResponse => "information response",
            MessageKind::ActionRequest => "action request",
            MessageKind::ActionResponse => "action response",
        };
        f.write_str(name)
    }
}

// ── Messages ──────────────────────────────────────────────────────────────────

/// Asks a device for its current status. Proves knowledge of the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InformationRequest {
    pub authentication: Authentication,
}

impl InformationRequest {
    pub fn new(key: &PrivateKey) -> Self {
        Self {
            authentication: Authentication::new(key),
        }
    }
}

/// Longest error description an [`ActionResult`] carries on the wire, in
/// UTF-8 bytes.  The string length prefix is a `u16`.
pub const MAX_DESCRIPTION_LEN: usize = u16::MAX as usize;

/// A device's answer to an action request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionResult {
    pub success: bool,
    /// At most [`MAX_DESCRIPTION_LEN`] bytes.  Longer text set directly on
    /// this field is cut at a character boundary when encoded; build results
    /// with [`ActionResult::failure`] to clamp before sealing.
    pub error_description: Option<String>,
}

impl ActionResult {
    pub fn success() -> Self {
        Self {
            success: true,
            error_description: None,
        }
    }

    /// A failed result whose description is clamped to
    /// [`MAX_DESCRIPTION_LEN`] bytes at a character boundary, so it encodes
    /// without loss.
    pub fn failure(description: impl Into<String>) -> Self {
        let mut description = description.into();
        if description.len() > MAX_DESCRIPTION_LEN {
            let mut end = MAX_DESCRIPTION_LEN;
            while !description.is_char_boundary(end) {
                end -= 1;
            }
            description.truncate(end);
        }
        Self {
            success: false,
            error_description: Some(description),
        }
    }
}

/// Identity characteristics of a device, readable without a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInformation {
    pub id: DeviceId,
    pub kind: DeviceKind,
    pub name: String,
}

impl DeviceInformation {
    /// Builds the identity from the raw values of the three characteristics.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedMessage`] if any value is invalid.
    pub fn from_characteristics(
        identifier: &[u8],
        kind: &[u8],
        name: &[u8],
    ) -> Result<Self, ProtocolError> {
        let mut reader = WireReader::new(identifier);
        let id = reader.read_uuid("identifier characteristic")?;
        reader.finish()?;
        let kind = decode::<DeviceKind>(kind)?;
        let name = String::from_utf8(name.to_vec()).map_err(|e| {
            ProtocolError::MalformedMessage(format!("device name characteristic: {e}"))
        })?;
        Ok(Self { id, kind, name })
    }

    /// Raw values for the identifier, kind and name characteristics.
    pub fn to_characteristics(&self) -> [Vec<u8>; 3] {
        [
            self.id.as_bytes().to_vec(),
            vec![self.kind as u8],
            self.name.as_bytes().to_vec(),
        ]
    }
}

// ── Sealed values ─────────────────────────────────────────────────────────────

/// A value that travels as a chunked encrypted characteristic.
pub trait Sealed: WireEncode + WireDecode {
    const KIND: MessageKind;
}

impl Sealed for PowerSourceStatus {
    const KIND: MessageKind = MessageKind::InformationResponse;
}

impl Sealed for AccessoryStatus {
    const KIND: MessageKind = MessageKind::InformationResponse;
}

impl Sealed for PowerSourceState {
    const KIND: MessageKind = MessageKind::ActionRequest;
}

impl Sealed for PowerState {
    const KIND: MessageKind = MessageKind::ActionRequest;
}

impl Sealed for ActionResult {
    const KIND: MessageKind = MessageKind::ActionResponse;
}

/// A decrypted value together with the authentication it arrived with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Opened<T> {
    pub value: T,
    pub authentication: AuthenticationMessage,
}

/// Encrypts `value` under `key` and splits it into chunks.
///
/// # Errors
///
/// Returns [`ProtocolError`] if encryption fails or the payload needs more
/// than 255 chunks of `max_chunk_payload` bytes.
pub fn seal<T: Sealed>(
    value: &T,
    key: &PrivateKey,
    max_chunk_payload: usize,
) -> Result<Vec<Chunk>, ProtocolError> {
    let payload = encrypt(key, &encode(value))?;
    split(&encode(&payload), max_chunk_payload)
}

/// Reassembles, verifies, decrypts and decodes a sealed value.
///
/// # Errors
///
/// Returns [`ProtocolError`] for an incomplete chunk set, a failed
/// authentication or an undecodable plaintext.
pub fn open<T: Sealed>(chunks: &[Chunk], key: &PrivateKey) -> Result<Opened<T>, ProtocolError> {
    open_reassembled(&reassemble(chunks)?, key)
}

/// Like [`open`] for bytes that have already been reassembled.
///
/// # Errors
///
/// Same as [`open`].
pub fn open_reassembled<T: Sealed>(
    bytes: &[u8],
    key: &PrivateKey,
) -> Result<Opened<T>, ProtocolError> {
    let payload: EncryptedPayload = decode(bytes)?;
    let plaintext = payload.decrypt(key)?;
    Ok(Opened {
        value: decode(&plaintext)?,
        authentication: payload.authentication.message,
    })
}

// ── Wire encoding ─────────────────────────────────────────────────────────────

impl WireEncode for InformationRequest {
    fn encode_to(&self, w: &mut WireWriter) {
        self.authentication.encode_to(w);
    }
}

impl WireDecode for InformationRequest {
    fn decode_from(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            authentication: Authentication::decode_from(r)?,
        })
    }
}

impl WireEncode for ActionResult {
    fn encode_to(&self, w: &mut WireWriter) {
        w.put_bool(self.success);
        w.put_option(self.error_description.as_deref(), WireWriter::put_string);
    }
}

impl WireDecode for ActionResult {
    fn decode_from(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        let success = r.read_bool("action result success")?;
        let error_description =
            r.read_option("action result error", |r| r.read_string("action result error"))?;
        Ok(Self {
            success,
            error_description,
        })
    }
}

impl WireEncode for DeviceKind {
    fn encode_to(&self, w: &mut WireWriter) {
        w.put_u8(*self as u8);
    }
}

impl WireDecode for DeviceKind {
    fn decode_from(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        read_enum(r, "device kind")
    }
}

impl WireEncode for PowerState {
    fn encode_to(&self, w: &mut WireWriter) {
        w.put_u8(*self as u8);
    }
}

impl WireDecode for PowerState {
    fn decode_from(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        read_enum(r, "power state")
    }
}

impl WireEncode for PowerSourceState {
    fn encode_to(&self, w: &mut WireWriter) {
        w.put_u8(*self as u8);
    }
}

impl WireDecode for PowerSourceState {
    fn decode_from(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        read_enum(r, "power source state")
    }
}

fn read_voltage(r: &mut WireReader<'_>) -> Result<VoltageSystem, ProtocolError> {
    let volts = r.read_u16("voltage system")?;
    VoltageSystem::try_from(volts).map_err(ProtocolError::MalformedMessage)
}

impl WireEncode for PowerSourceStatus {
    fn encode_to(&self, w: &mut WireWriter) {
        w.put_u16(self.voltage.volts());
        w.put_u8(self.category as u8);
        w.put_u8(self.state as u8);
        w.put_u16(self.active_power);
        w.put_u8(self.load_percent);
        w.put_option(self.battery_capacity, WireWriter::put_u8);
    }
}

impl WireDecode for PowerSourceStatus {
    fn decode_from(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            voltage: read_voltage(r)?,
            category: read_enum(r, "power source category")?,
            state: PowerSourceState::decode_from(r)?,
            active_power: r.read_u16("output active power")?,
            load_percent: r.read_u8("output load percent")?,
            battery_capacity: r.read_option("battery capacity", |r| r.read_u8("battery capacity"))?,
        })
    }
}

impl WireEncode for AccessoryStatus {
    fn encode_to(&self, w: &mut WireWriter) {
        w.put_u16(self.voltage.volts());
        w.put_u8(self.accessory_type as u8);
        w.put_u8(self.state as u8);
        w.put_u16(self.active_power);
    }
}

impl WireDecode for AccessoryStatus {
    fn decode_from(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            voltage: read_voltage(r)?,
            accessory_type: read_enum(r, "accessory type")?,
            state: PowerState::decode_from(r)?,
            active_power: r.read_u16("active power")?,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
