//! voxwire-protocol – Wire-Formate
//!
//! ## Module
//! - [`frame`] – Media-Frame-Layout (Header, Extension, Nonce, Voice-Daten)
//! - [`signaling`] – Signaling-Nachrichten und Opcodes
//! - [`wire`] – Length-prefixed JSON Codec fuer den Control-Kanal
//! - [`datagram`] – Unterscheidung Media/Control bei Datagrammen

pub mod datagram;
pub mod error;
pub mod frame;
pub mod signaling;
pub mod wire;

pub use error::{ProtocolError, ProtocolResult};
pub use frame::{FrameInfo, FrameNonce, MediaFrame, MediaHeader, PacketType};
pub use signaling::{Opcode, RawFrame, SignalingMessage};
pub use wire::SignalingCodec;
