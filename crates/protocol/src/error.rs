//! Fehlertypen fuer das Wire-Protokoll

use thiserror::Error;

/// Fehler beim Parsen oder Erzeugen von Media-Frames und Signaling-Nachrichten
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Media-Frame zu kurz, falsche Version oder Laengenangabe ueber Puffergrenze
    #[error("Ungueltiger Media-Frame: {0}")]
    MalformedFrame(String),

    /// Payload passt nicht zum Opcode
    #[error("Ungueltige Signaling-Nachricht (op {op}): {grund}")]
    UngueltigeNachricht { op: u16, grund: String },

    #[error("JSON-Fehler: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Base64-Dekodierung fehlgeschlagen: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Erstellt einen `MalformedFrame`-Fehler
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedFrame(msg.into())
    }

    /// Betrifft der Fehler nur ein einzelnes Paket?
    pub fn ist_paket_lokal(&self) -> bool {
        matches!(self, Self::MalformedFrame(_))
    }
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;
