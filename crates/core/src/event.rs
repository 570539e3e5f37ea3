//! Ereignisse an den Konsumenten der Voice-Verbindung
//!
//! Der Transport-Koordinator liefert alle Ereignisse ueber einen
//! tokio-Kanal. Pro Session wird genau ein `SessionClosed` gesendet.

use serde::{Deserialize, Serialize};

use crate::types::{EpochId, SessionState, Ssrc, UserId};

/// Grund fuer das Ende einer Session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    /// Regulaeres Ende (lokal per `disconnect` oder Close vom Server)
    Graceful(String),
    /// Control-Kanal passt nicht zur State Machine
    ProtocolError(String),
    /// Alle Resume-Versuche gescheitert
    ResumeExhausted { attempts: u32 },
    /// Verbindung endgueltig verloren (Handshake-Timeout, Transport weg)
    SessionLost(String),
}

impl CloseReason {
    /// Fataler Abbruch (alles ausser Graceful)
    pub fn ist_fatal(&self) -> bool {
        !matches!(self, Self::Graceful(_))
    }

    /// Kurzer Code fuer Logs und Metriken
    pub fn code(&self) -> &'static str {
        match self {
            Self::Graceful(_) => "graceful",
            Self::ProtocolError(_) => "protocol_error",
            Self::ResumeExhausted { .. } => "resume_exhausted",
            Self::SessionLost(_) => "session_lost",
        }
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Graceful(grund) => write!(f, "graceful: {grund}"),
            Self::ProtocolError(grund) => write!(f, "protocol_error: {grund}"),
            Self::ResumeExhausted { attempts } => {
                write!(f, "resume_exhausted nach {attempts} Versuchen")
            }
            Self::SessionLost(grund) => write!(f, "session_lost: {grund}"),
        }
    }
}

/// Art einer Paket-Diagnose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiagnosticKind {
    MalformedFrame,
    AuthenticationFailure,
    ReplayDetected,
    UnknownSender,
    UnknownEpoch,
    StaleEpochUsed,
    EncryptionFailure,
    CodecFailure,
    /// Decode-Queue voll, aeltestes Paket verworfen
    QueueOverflow,
}

/// Diagnose zu einem verworfenen oder auffaelligen Paket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub ssrc: Option<Ssrc>,
    pub detail: String,
}

impl Diagnostic {
    pub fn neu(kind: DiagnosticKind, ssrc: Option<Ssrc>, detail: impl Into<String>) -> Self {
        Self {
            kind,
            ssrc,
            detail: detail.into(),
        }
    }
}

/// Alle Ereignisse die an den Konsumenten gehen
#[derive(Debug, Clone, PartialEq)]
pub enum VoiceEvent {
    /// Signaling-Zustand hat gewechselt
    StateChanged { alt: SessionState, neu: SessionState },
    /// Handshake abgeschlossen, Media-Transport offen
    Ready { ssrc: Ssrc },
    /// Neue Epoch ist aktiv fuer die Verschluesselung
    EpochChanged { epoch: EpochId },
    /// Dekodiertes Audio eines Senders
    AudioReceived {
        ssrc: Ssrc,
        user_id: Option<UserId>,
        sequence: u32,
        pcm: Vec<i16>,
    },
    /// Sprechstatus eines Teilnehmers
    SpeakingUpdate {
        ssrc: Ssrc,
        user_id: UserId,
        speaking: bool,
    },
    /// Paket verworfen oder auffaellig, Session laeuft weiter
    Diagnostic(Diagnostic),
    /// Epoch-Zustand unklar, Signaling sollte neu synchronisieren
    ResyncRequested { epoch: EpochId },
    /// Terminales Ereignis (genau einmal pro Session)
    SessionClosed(CloseReason),
}

impl VoiceEvent {
    /// Ist dies das terminale Ereignis?
    pub fn ist_terminal(&self) -> bool {
        matches!(self, Self::SessionClosed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_reason_codes() {
        assert_eq!(CloseReason::Graceful("bye".into()).code(), "graceful");
        assert_eq!(
            CloseReason::ResumeExhausted { attempts: 3 }.code(),
            "resume_exhausted"
        );
        assert!(!CloseReason::Graceful("bye".into()).ist_fatal());
        assert!(CloseReason::ProtocolError("op".into()).ist_fatal());
    }

    #[test]
    fn close_reason_ist_serde_kompatibel() {
        let reason = CloseReason::ResumeExhausted { attempts: 2 };
        let json = serde_json::to_string(&reason).unwrap();
        let zurueck: CloseReason = serde_json::from_str(&json).unwrap();
        assert_eq!(reason, zurueck);
    }

    #[test]
    fn nur_session_closed_ist_terminal() {
        assert!(VoiceEvent::SessionClosed(CloseReason::Graceful(String::new())).ist_terminal());
        assert!(!VoiceEvent::Ready { ssrc: 1 }.ist_terminal());
    }
}
