//! Fehlertypen fuer das Voice-Signaling

use thiserror::Error;
use voxwire_core::event::CloseReason;
use voxwire_core::types::SessionState;
use voxwire_protocol::ProtocolError;

/// Fehlertyp fuer das Voice-Signaling
#[derive(Debug, Error)]
pub enum SignalingError {
    /// IO-Fehler (TCP, Socket)
    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    /// Frame- oder Payload-Fehler auf dem Control-Kanal
    #[error("Protokollfehler: {0}")]
    Protokoll(#[from] ProtocolError),

    /// Opcode passt nicht zum aktuellen Zustand
    #[error("Unerwartete Nachricht (op {op}) im Zustand {zustand}")]
    ProtocolViolation { op: u16, zustand: SessionState },

    /// Verbindung endgueltig verloren
    #[error("Session verloren: {0}")]
    SessionLost(String),

    /// Alle Resume-Versuche gescheitert
    #[error("Resume nach {attempts} Versuchen aufgegeben")]
    ResumeExhausted { attempts: u32 },

    /// Zeitlimit beim Verbindungsaufbau
    #[error("Timeout beim Verbinden mit {0}")]
    Timeout(String),

    /// Control-Kanal ist nicht offen
    #[error("Verbindung getrennt")]
    VerbindungGetrennt,
}

impl SignalingError {
    /// Beendet der Fehler die Session?
    pub fn ist_fatal(&self) -> bool {
        matches!(
            self,
            Self::ProtocolViolation { .. } | Self::SessionLost(_) | Self::ResumeExhausted { .. }
        )
    }

    /// Abschlussgrund fuer den Konsumenten
    pub fn close_reason(&self) -> CloseReason {
        match self {
            Self::ProtocolViolation { .. } | Self::Protokoll(_) => {
                CloseReason::ProtocolError(self.to_string())
            }
            Self::ResumeExhausted { attempts } => CloseReason::ResumeExhausted {
                attempts: *attempts,
            },
            _ => CloseReason::SessionLost(self.to_string()),
        }
    }
}

/// Result-Typ fuer das Voice-Signaling
pub type SignalingResult<T> = Result<T, SignalingError>;
