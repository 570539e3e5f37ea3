//! Wire-Format fuer den Control-Kanal
//!
//! Frame-basiertes Protokoll: Length(u32 big-endian) + JSON-Payload.
//!
//! ## Frame-Format
//!
//! ```text
//! +--------+--------+--------+--------+----...----+
//! | Laenge (u32 BE) | 4 Bytes        | Payload    |
//! +--------+--------+--------+--------+----...----+
//! ```
//!
//! Die Laenge gibt die Anzahl der Payload-Bytes an (ohne die 4 Laengen-Bytes).

use bytes::{Buf, BufMut, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

use crate::signaling::RawFrame;

/// Standard-maximale Frame-Groesse (64 KB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

/// Groesse des Laengen-Felds in Bytes
pub const LENGTH_FIELD_SIZE: usize = 4;

// ---------------------------------------------------------------------------
// SignalingCodec
// ---------------------------------------------------------------------------

/// tokio-util Codec fuer den Control-Kanal
///
/// Implementiert `Encoder<RawFrame>` und `Decoder` fuer
/// `tokio_util::codec::Framed`.
#[derive(Debug, Clone)]
pub struct SignalingCodec {
    /// Maximale erlaubte Frame-Groesse in Bytes
    max_frame_size: usize,
}

impl SignalingCodec {
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Erstellt einen Codec mit benutzerdefinierter maximaler Frame-Groesse
    pub fn with_max_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for SignalingCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for SignalingCodec {
    type Item = RawFrame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LENGTH_FIELD_SIZE {
            return Ok(None);
        }

        // Laenge lesen ohne den Buffer zu veraendern
        let length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;

        if length > self.max_frame_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Frame zu gross: {} Bytes (Maximum: {} Bytes)",
                    length, self.max_frame_size
                ),
            ));
        }

        let total_size = LENGTH_FIELD_SIZE + length;
        if src.len() < total_size {
            src.reserve(total_size - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_FIELD_SIZE);
        let payload = src.split_to(length);

        let frame: RawFrame = serde_json::from_slice(&payload).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("JSON-Deserialisierung fehlgeschlagen: {}", e),
            )
        })?;

        Ok(Some(frame))
    }
}

impl Encoder<RawFrame> for SignalingCodec {
    type Error = io::Error;

    fn encode(&mut self, item: RawFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json = serde_json::to_vec(&item).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("JSON-Serialisierung fehlgeschlagen: {}", e),
            )
        })?;

        if json.len() > self.max_frame_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Nachricht zu gross: {} Bytes (Maximum: {} Bytes)",
                    json.len(),
                    self.max_frame_size
                ),
            ));
        }

        dst.reserve(LENGTH_FIELD_SIZE + json.len());
        dst.put_u32(json.len() as u32);
        dst.put_slice(&json);

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::{HeartbeatPayload, SignalingMessage};
    use futures_util::{SinkExt, StreamExt};
    use tokio_util::codec::Framed;

    fn heartbeat(nonce: u64) -> RawFrame {
        SignalingMessage::Heartbeat(HeartbeatPayload {
            nonce,
            seq_ack: None,
        })
        .to_frame(None)
        .unwrap()
    }

    #[test]
    fn unvollstaendiger_frame_wartet() {
        let mut codec = SignalingCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(heartbeat(1), &mut buf).unwrap();

        let half = buf.len() / 2;
        let mut partial = buf.split_to(half);
        assert!(codec.decode(&mut partial).unwrap().is_none());
    }

    #[test]
    fn ablehnung_zu_grosser_frame() {
        let mut codec = SignalingCodec::with_max_size(100);
        let mut buf = BytesMut::new();
        buf.put_u32(200);
        buf.put_slice(&[b'x'; 200]);
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn ablehnung_beim_encode_zu_grosse_nachricht() {
        let mut codec = SignalingCodec::with_max_size(10);
        let mut buf = BytesMut::new();
        assert!(codec.encode(heartbeat(1), &mut buf).is_err());
    }

    #[test]
    fn mehrere_nachrichten_im_buffer() {
        let mut codec = SignalingCodec::new();
        let mut buf = BytesMut::new();
        for i in 0..3u64 {
            codec.encode(heartbeat(i), &mut buf).unwrap();
        }
        for i in 0..3u64 {
            let frame = codec.decode(&mut buf).unwrap().expect("Frame erwartet");
            assert_eq!(frame.d["nonce"], i);
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn grosser_unbekannter_opcode_ist_kein_dekodierfehler() {
        let mut codec = SignalingCodec::new();
        let json = br#"{"op": 300, "d": {"neu": true}}"#;
        let mut buf = BytesMut::new();
        buf.put_u32(json.len() as u32);
        buf.put_slice(json);

        let frame = codec.decode(&mut buf).unwrap().expect("Frame erwartet");
        assert_eq!(frame.op, 300);
        assert!(SignalingMessage::from_frame(&frame).unwrap().is_none());
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn framed_ueber_duplex_stream() {
        let (a, b) = tokio::io::duplex(1024);
        let mut links = Framed::new(a, SignalingCodec::new());
        let mut rechts = Framed::new(b, SignalingCodec::new());

        links.send(heartbeat(42)).await.unwrap();
        let frame = rechts.next().await.unwrap().unwrap();
        assert!(matches!(
            SignalingMessage::from_frame(&frame).unwrap(),
            Some(SignalingMessage::Heartbeat(HeartbeatPayload { nonce: 42, .. }))
        ));
    }
}
