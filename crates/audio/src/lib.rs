//! # voxwire-audio
//!
//! Codec-Adapter fuer voxwire.
//!
//! ## Module
//! - `codec` - `VoiceCodec`/`CodecFactory` und PCM-Passthrough
//! - `opus` - Opus via audiopus (Feature `opus`)
//! - `error` - `CodecError` mit Status-Code und Fehlerstelle

pub mod codec;
pub mod error;
#[cfg(feature = "opus")]
pub mod opus;

pub use codec::{CodecFactory, CodecParameter, PcmCodec, PcmCodecFactory, VoiceCodec};
pub use error::{CodecError, CodecResult, CodecSite};
#[cfg(feature = "opus")]
pub use opus::{OpusCodecFactory, OpusDecoder, OpusEncoder};
