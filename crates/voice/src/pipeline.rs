//! Media-Pipeline
//!
//! Ausgehend: Codec -> Key Ratchet (aktuelle Epoch) -> Frame-Layout.
//! Eingehend: Frame-Layout -> Key Ratchet (Epoch/Zaehler aus der Nonce,
//! Sender aus der SSRC) -> Codec. Die Pipeline selbst haelt keinen
//! Codec-Zustand; Decoder pro SSRC verwaltet der `DecoderSatz` des
//! jeweiligen Decode-Workers.

use std::collections::HashMap;
use std::sync::Arc;

use voxwire_audio::{CodecFactory, VoiceCodec};
use voxwire_core::types::{EpochId, Ssrc, UserId};
use voxwire_crypto::KeyRatchetManager;
use voxwire_protocol::frame::{self, FrameNonce, MediaFrame, PacketType, TAG_LAENGE};
use voxwire_protocol::ProtocolError;

use crate::error::{VoiceError, VoiceResult};
use crate::session::{SsrcVerzeichnis, VoiceSession};

/// Entschluesseltes eingehendes Paket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmpfangenesPaket {
    pub ssrc: Ssrc,
    pub user_id: UserId,
    pub sequence: u32,
    pub timestamp: u32,
    pub packet_type: PacketType,
    pub flags: u16,
    pub epoch: EpochId,
    /// Codec-Daten (Klartext)
    pub payload: Vec<u8>,
}

pub struct MediaPipeline {
    ratchet: Arc<KeyRatchetManager>,
    ssrcs: Arc<SsrcVerzeichnis>,
    max_payload: usize,
}

impl MediaPipeline {
    pub fn neu(ratchet: Arc<KeyRatchetManager>, ssrcs: Arc<SsrcVerzeichnis>, max_payload: usize) -> Self {
        Self {
            ratchet,
            ssrcs,
            max_payload,
        }
    }

    /// Verschluesselt Codec-Daten mit der aktuellen Epoch und baut das Paket
    pub fn versiegeln(
        &self,
        session: &mut VoiceSession,
        packet_type: PacketType,
        flags: u16,
        codec_daten: &[u8],
    ) -> VoiceResult<Vec<u8>> {
        if codec_daten.len() > self.max_payload {
            return Err(ProtocolError::malformed(format!(
                "Nutzdaten zu gross: {} > {} Bytes",
                codec_daten.len(),
                self.max_payload
            ))
            .into());
        }

        let header = session.naechster_header(packet_type, flags);
        let block = frame::header_block(&header, None)?;
        let sealed = self.ratchet.seal_outbound(&block, codec_daten)?;
        Ok(frame::assemble(
            &block,
            FrameNonce::new(sealed.epoch.inner(), sealed.counter),
            &sealed.ciphertext,
        ))
    }

    /// Layout pruefen und SSRC lesen, ohne zu entschluesseln
    pub fn vorpruefen(&self, datagramm: &[u8]) -> VoiceResult<Ssrc> {
        let frame = MediaFrame::parse(datagramm)?;
        self.groesse_pruefen(&frame)?;
        Ok(frame.header.ssrc)
    }

    /// Parst und entschluesselt ein Media-Datagramm
    pub fn oeffnen(&self, datagramm: &[u8]) -> VoiceResult<EmpfangenesPaket> {
        let frame = MediaFrame::parse(datagramm)?;
        self.groesse_pruefen(&frame)?;

        let ssrc = frame.header.ssrc;
        let sender = self
            .ssrcs
            .user_id(ssrc)
            .ok_or(VoiceError::UnbekannteSsrc(ssrc))?;
        let epoch = EpochId(frame.nonce.epoch);

        let payload = self.ratchet.decrypt_frame(
            epoch,
            sender,
            frame.nonce.counter,
            frame.voice_data(),
            frame.associated_data(),
        )?;

        Ok(EmpfangenesPaket {
            ssrc,
            user_id: sender,
            sequence: frame.header.sequence,
            timestamp: frame.header.timestamp,
            packet_type: frame.header.packet_type,
            flags: frame.header.flags,
            epoch,
            payload,
        })
    }

    fn groesse_pruefen(&self, frame: &MediaFrame<'_>) -> VoiceResult<()> {
        let laenge = frame.voice_data().len();
        if laenge > self.max_payload + TAG_LAENGE {
            return Err(ProtocolError::malformed(format!(
                "Voice-Daten zu gross: {laenge} Bytes"
            ))
            .into());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// DecoderSatz
// ---------------------------------------------------------------------------

/// Ein Decoder pro eingehender SSRC
pub struct DecoderSatz {
    factory: Arc<dyn CodecFactory>,
    decoder: HashMap<Ssrc, Box<dyn VoiceCodec>>,
}

impl DecoderSatz {
    pub fn neu(factory: Arc<dyn CodecFactory>) -> Self {
        Self {
            factory,
            decoder: HashMap::new(),
        }
    }

    pub fn dekodieren(&mut self, ssrc: Ssrc, daten: &[u8]) -> VoiceResult<Vec<i16>> {
        let decoder = match self.decoder.entry(ssrc) {
            std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
            std::collections::hash_map::Entry::Vacant(e) => {
                tracing::debug!(ssrc, "Decoder fuer neue SSRC erstellt");
                e.insert(self.factory.decoder()?)
            }
        };
        Ok(decoder.decode(daten)?)
    }

    /// Verwirft Decoder fuer SSRCs, die nicht mehr zugeordnet sind
    pub fn aufraeumen(&mut self, ssrcs: &SsrcVerzeichnis) {
        self.decoder.retain(|ssrc, _| ssrcs.user_id(*ssrc).is_some());
    }

    pub fn anzahl(&self) -> usize {
        self.decoder.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
