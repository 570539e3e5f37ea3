//! Codec-Adapter
//!
//! Der Kern sieht einen Codec nur als `encode(PCM) -> Bytes` und
//! `decode(Bytes) -> PCM`. Zustand ueber Frames hinweg (z.B. Opus PLC)
//! bleibt vollstaendig im Adapter. Pro eingehender SSRC wird ein eigener
//! Decoder erzeugt.

use tracing::debug;

use voxwire_core::config::MediaEinstellungen;

use crate::error::{CodecError, CodecResult};

/// Status-Codes nach libopus-Konvention
pub const STATUS_BAD_ARG: i32 = -1;
pub const STATUS_BUFFER_TOO_SMALL: i32 = -2;
pub const STATUS_INVALID_PACKET: i32 = -4;

/// Audio-Parameter eines Codecs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecParameter {
    pub sample_rate: u32,
    pub channels: u16,
    /// Samples pro Kanal und Frame
    pub frame_samples: usize,
}

impl CodecParameter {
    pub fn aus_config(config: &MediaEinstellungen) -> Self {
        Self {
            sample_rate: config.sample_rate,
            channels: config.channels,
            frame_samples: config.samples_pro_frame() as usize,
        }
    }

    /// Maximale Anzahl interleaved Samples pro Frame
    pub fn max_samples(&self) -> usize {
        self.frame_samples * self.channels as usize
    }
}

/// Opake Encode/Decode-Faehigkeit
pub trait VoiceCodec: Send {
    /// Kodiert interleaved PCM-Samples
    fn encode(&mut self, pcm: &[i16]) -> CodecResult<Vec<u8>>;

    /// Dekodiert einen komprimierten Frame zu interleaved PCM
    fn decode(&mut self, data: &[u8]) -> CodecResult<Vec<i16>>;

    fn name(&self) -> &'static str;
}

/// Erzeugt Encoder und Decoder einer Session
pub trait CodecFactory: Send + Sync {
    fn encoder(&self) -> CodecResult<Box<dyn VoiceCodec>>;

    /// Neuer Decoder fuer einen weiteren Sender
    fn decoder(&self) -> CodecResult<Box<dyn VoiceCodec>>;

    fn parameter(&self) -> CodecParameter;
}

// ---------------------------------------------------------------------------
// PCM-Passthrough
// ---------------------------------------------------------------------------

/// Verlustfreier "Codec": s16 Big-Endian
///
/// Fuer Tests und fuer Gegenstellen ohne Kompression.
#[derive(Debug, Clone)]
pub struct PcmCodec {
    parameter: CodecParameter,
}

impl PcmCodec {
    pub fn new(parameter: CodecParameter) -> Self {
        Self { parameter }
    }
}

impl VoiceCodec for PcmCodec {
    fn encode(&mut self, pcm: &[i16]) -> CodecResult<Vec<u8>> {
        let channels = self.parameter.channels as usize;
        if pcm.is_empty() || pcm.len() % channels != 0 {
            return Err(CodecError::encode(
                STATUS_BAD_ARG,
                format!("{} Samples passen nicht zu {channels} Kanaelen", pcm.len()),
            ));
        }
        if pcm.len() > self.parameter.max_samples() {
            return Err(CodecError::encode(
                STATUS_BUFFER_TOO_SMALL,
                format!(
                    "Frame zu lang: {} > {} Samples",
                    pcm.len(),
                    self.parameter.max_samples()
                ),
            ));
        }
        Ok(pcm.iter().flat_map(|s| s.to_be_bytes()).collect())
    }

    fn decode(&mut self, data: &[u8]) -> CodecResult<Vec<i16>> {
        if data.len() % 2 != 0 {
            return Err(CodecError::decode(
                STATUS_INVALID_PACKET,
                format!("Ungerade Paketlaenge {}", data.len()),
            ));
        }
        if data.len() / 2 > self.parameter.max_samples() {
            return Err(CodecError::decode(
                STATUS_INVALID_PACKET,
                format!("Paket zu lang: {} Bytes", data.len()),
            ));
        }
        Ok(data
            .chunks_exact(2)
            .map(|c| i16::from_be_bytes([c[0], c[1]]))
            .collect())
    }

    fn name(&self) -> &'static str {
        "pcm"
    }
}

/// Factory fuer `PcmCodec`
#[derive(Debug, Clone)]
pub struct PcmCodecFactory {
    parameter: CodecParameter,
}

impl PcmCodecFactory {
    pub fn new(parameter: CodecParameter) -> Self {
        Self { parameter }
    }
}

impl CodecFactory for PcmCodecFactory {
    fn encoder(&self) -> CodecResult<Box<dyn VoiceCodec>> {
        Ok(Box::new(PcmCodec::new(self.parameter)))
    }

    fn decoder(&self) -> CodecResult<Box<dyn VoiceCodec>> {
        debug!(channels = self.parameter.channels, "PCM-Decoder erstellt");
        Ok(Box::new(PcmCodec::new(self.parameter)))
    }

    fn parameter(&self) -> CodecParameter {
        self.parameter
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CodecSite;

    fn parameter() -> CodecParameter {
        CodecParameter::aus_config(&MediaEinstellungen::default())
    }

    #[test]
    fn parameter_aus_standard_config() {
        let p = parameter();
        assert_eq!(p.sample_rate, 48_000);
        assert_eq!(p.frame_samples, 960);
        assert_eq!(p.max_samples(), 1920);
    }

    #[test]
    fn pcm_ist_verlustfrei() {
        let mut codec = PcmCodec::new(parameter());
        let pcm: Vec<i16> = (0..1920).map(|i| (i * 17 - 9000) as i16).collect();
        let bytes = codec.encode(&pcm).unwrap();
        assert_eq!(bytes.len(), 3840);
        assert_eq!(codec.decode(&bytes).unwrap(), pcm);
    }

    #[test]
    fn ungerade_kanalzahl_ist_encode_fehler() {
        let mut codec = PcmCodec::new(parameter());
        let err = codec.encode(&[1, 2, 3]).unwrap_err();
        assert_eq!(err.site(), Some(CodecSite::Encode));
        assert_eq!(err.status(), Some(STATUS_BAD_ARG));
    }

    #[test]
    fn zu_langer_frame_wird_abgelehnt() {
        let mut codec = PcmCodec::new(parameter());
        let err = codec.encode(&vec![0i16; 4000]).unwrap_err();
        assert_eq!(err.status(), Some(STATUS_BUFFER_TOO_SMALL));
    }

    #[test]
    fn kaputtes_paket_ist_decode_fehler() {
        let mut codec = PcmCodec::new(parameter());
        let err = codec.decode(&[0x01, 0x02, 0x03]).unwrap_err();
        assert_eq!(err.site(), Some(CodecSite::Decode));
        assert_eq!(err.status(), Some(STATUS_INVALID_PACKET));
    }

    #[test]
    fn factory_erzeugt_unabhaengige_decoder() {
        let factory = PcmCodecFactory::new(parameter());
        let mut a = factory.decoder().unwrap();
        let mut b = factory.decoder().unwrap();
        assert_eq!(a.name(), "pcm");
        assert_eq!(a.decode(&[0, 1]).unwrap(), vec![1]);
        assert_eq!(b.decode(&[0xFF, 0xFF]).unwrap(), vec![-1]);
    }
}
