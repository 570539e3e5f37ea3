//! Opus-Adapter (Feature `opus`)
//!
//! Kapselt audiopus hinter `VoiceCodec`. Fehler von libopus behalten ihren
//! numerischen Status-Code.

use audiopus::{
    coder::{Decoder, Encoder},
    Application, Channels, SampleRate,
};
use tracing::debug;

use crate::codec::{CodecFactory, CodecParameter, VoiceCodec, STATUS_BAD_ARG};
use crate::error::{CodecError, CodecResult, CodecSite};

/// Obergrenze fuer einen kodierten Frame
const MAX_PAKET_BYTES: usize = 4000;

fn codec_fehler(site: CodecSite, fehler: audiopus::Error) -> CodecError {
    let message = fehler.to_string();
    let status = match fehler {
        audiopus::Error::Opus(code) => code as i32,
        _ => STATUS_BAD_ARG,
    };
    CodecError::CodecFailure {
        site,
        status,
        message,
    }
}

fn sample_rate(rate: u32) -> CodecResult<SampleRate> {
    match rate {
        8_000 => Ok(SampleRate::Hz8000),
        12_000 => Ok(SampleRate::Hz12000),
        16_000 => Ok(SampleRate::Hz16000),
        24_000 => Ok(SampleRate::Hz24000),
        48_000 => Ok(SampleRate::Hz48000),
        andere => Err(CodecError::Konfiguration(format!(
            "Abtastrate {andere} Hz wird von Opus nicht unterstuetzt"
        ))),
    }
}

fn channels(anzahl: u16) -> CodecResult<Channels> {
    match anzahl {
        1 => Ok(Channels::Mono),
        2 => Ok(Channels::Stereo),
        andere => Err(CodecError::Konfiguration(format!(
            "{andere} Kanaele werden von Opus nicht unterstuetzt"
        ))),
    }
}

/// Opus-Encoder
pub struct OpusEncoder {
    encoder: Encoder,
    parameter: CodecParameter,
}

impl OpusEncoder {
    pub fn new(parameter: CodecParameter) -> CodecResult<Self> {
        let encoder = Encoder::new(
            sample_rate(parameter.sample_rate)?,
            channels(parameter.channels)?,
            Application::Voip,
        )
        .map_err(|e| codec_fehler(CodecSite::Encode, e))?;

        debug!(
            sample_rate = parameter.sample_rate,
            channels = parameter.channels,
            frame_samples = parameter.frame_samples,
            "OpusEncoder erstellt"
        );
        Ok(Self { encoder, parameter })
    }
}

impl VoiceCodec for OpusEncoder {
    fn encode(&mut self, pcm: &[i16]) -> CodecResult<Vec<u8>> {
        if pcm.len() != self.parameter.max_samples() {
            return Err(CodecError::encode(
                STATUS_BAD_ARG,
                format!(
                    "PCM-Frame muss {} Samples lang sein, war {}",
                    self.parameter.max_samples(),
                    pcm.len()
                ),
            ));
        }
        let mut output = vec![0u8; MAX_PAKET_BYTES];
        let written = self
            .encoder
            .encode(pcm, &mut output)
            .map_err(|e| codec_fehler(CodecSite::Encode, e))?;
        output.truncate(written);
        Ok(output)
    }

    fn decode(&mut self, _data: &[u8]) -> CodecResult<Vec<i16>> {
        Err(CodecError::decode(
            STATUS_BAD_ARG,
            "OpusEncoder kann nicht dekodieren",
        ))
    }

    fn name(&self) -> &'static str {
        "opus"
    }
}

/// Opus-Decoder, einer pro Sender
pub struct OpusDecoder {
    decoder: Decoder,
    parameter: CodecParameter,
}

impl OpusDecoder {
    pub fn new(parameter: CodecParameter) -> CodecResult<Self> {
        let decoder = Decoder::new(
            sample_rate(parameter.sample_rate)?,
            channels(parameter.channels)?,
        )
        .map_err(|e| codec_fehler(CodecSite::Decode, e))?;
        Ok(Self { decoder, parameter })
    }
}

impl VoiceCodec for OpusDecoder {
    fn encode(&mut self, _pcm: &[i16]) -> CodecResult<Vec<u8>> {
        Err(CodecError::encode(
            STATUS_BAD_ARG,
            "OpusDecoder kann nicht kodieren",
        ))
    }

    fn decode(&mut self, data: &[u8]) -> CodecResult<Vec<i16>> {
        let mut output = vec![0i16; self.parameter.max_samples()];
        let decoded = self
            .decoder
            .decode(Some(data), &mut output, false)
            .map_err(|e| codec_fehler(CodecSite::Decode, e))?;
        output.truncate(decoded * self.parameter.channels as usize);
        Ok(output)
    }

    fn name(&self) -> &'static str {
        "opus"
    }
}

/// Factory fuer Opus-Encoder und -Decoder
#[derive(Debug, Clone)]
pub struct OpusCodecFactory {
    parameter: CodecParameter,
}

impl OpusCodecFactory {
    pub fn new(parameter: CodecParameter) -> CodecResult<Self> {
        sample_rate(parameter.sample_rate)?;
        channels(parameter.channels)?;
        Ok(Self { parameter })
    }
}

impl CodecFactory for OpusCodecFactory {
    fn encoder(&self) -> CodecResult<Box<dyn VoiceCodec>> {
        Ok(Box::new(OpusEncoder::new(self.parameter)?))
    }

    fn decoder(&self) -> CodecResult<Box<dyn VoiceCodec>> {
        Ok(Box::new(OpusDecoder::new(self.parameter)?))
    }

    fn parameter(&self) -> CodecParameter {
        self.parameter
    }
}
