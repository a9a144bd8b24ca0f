//! Secure transport codec: binary encoding, chunking and message kinds.

pub mod chunk;
pub mod codec;
pub mod messages;

pub use chunk::{reassemble, split, Chunk, ChunkBuffer};
pub use codec::{decode, encode, ProtocolError, WireDecode, WireEncode};
pub use messages::{
    open, seal, ActionResult, DeviceInformation, DeviceService, InformationRequest, MessageKind,
    Opened, Sealed,
};
