//! Demultiplexing eingehender Datagramme
//!
//! Das erste Byte entscheidet: `PROTOKOLL_VERSION` kennzeichnet ein
//! Media-Paket, `CONTROL_MARKER` eine Signaling-Nachricht (JSON) die ueber
//! den Datagramm-Transport kam.

use crate::error::{ProtocolError, ProtocolResult};
use crate::frame::PROTOKOLL_VERSION;
use crate::signaling::RawFrame;

/// Markierungs-Byte fuer Control-Datagramme
pub const CONTROL_MARKER: u8 = 0xC0;

/// Art eines Datagramms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatagramKind {
    Media,
    Control,
}

/// Ordnet ein Datagramm anhand des ersten Bytes zu
pub fn classify(buf: &[u8]) -> ProtocolResult<DatagramKind> {
    match buf.first() {
        Some(&PROTOKOLL_VERSION) => Ok(DatagramKind::Media),
        Some(&CONTROL_MARKER) => Ok(DatagramKind::Control),
        Some(other) => Err(ProtocolError::malformed(format!(
            "Unbekannte Datagramm-Kennung: 0x{other:02X}"
        ))),
        None => Err(ProtocolError::malformed("Leeres Datagramm")),
    }
}

/// Verpackt ein Signaling-Frame als Control-Datagramm
pub fn encode_control(frame: &RawFrame) -> ProtocolResult<Vec<u8>> {
    let json = serde_json::to_vec(frame)?;
    let mut out = Vec::with_capacity(1 + json.len());
    out.push(CONTROL_MARKER);
    out.extend_from_slice(&json);
    Ok(out)
}

/// Liest das Signaling-Frame aus einem Control-Datagramm
pub fn decode_control(buf: &[u8]) -> ProtocolResult<RawFrame> {
    match buf.split_first() {
        Some((&CONTROL_MARKER, json)) => Ok(serde_json::from_slice(json)?),
        _ => Err(ProtocolError::malformed("Kein Control-Datagramm")),
    }
}
