//! Gemeinsame Identifikationstypen fuer voxwire
//!
//! Alle IDs verwenden das Newtype-Pattern um Verwechslungen zwischen
//! verschiedenen ID-Arten zur Compilezeit auszuschliessen.

use serde::{Deserialize, Serialize};

/// Synchronisation Source – numerische Senderkennung im Media-Header
pub type Ssrc = u32;

/// Teilnehmer-ID der Chat-Plattform (Snowflake)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl UserId {
    /// Gibt den inneren Wert zurueck
    pub fn inner(&self) -> u64 {
        self.0
    }

    /// Big-endian Darstellung (fuer Key-Ableitung)
    pub fn to_be_bytes(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "user:{}", self.0)
    }
}

/// Nummer einer Verschluesselungs-Generation (monoton steigend)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EpochId(pub u32);

impl EpochId {
    pub fn inner(&self) -> u32 {
        self.0
    }

    /// Naechste Epoch (saturierend)
    pub fn naechste(&self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl std::fmt::Display for EpochId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "epoch:{}", self.0)
    }
}

/// Session-Token vom Chat-Gateway (wird nie geloggt)
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SessionToken([REDACTED])")
    }
}

/// Vorab ausgehandelte Verbindungsdaten vom Chat-Gateway
///
/// Initialisiert den Zustand `Connecting`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionParameter {
    /// Guild/Server, zu dem die Voice-Verbindung gehoert
    pub server_id: String,
    /// Eigene Teilnehmer-ID
    pub user_id: UserId,
    /// Gateway-Session-ID
    pub session_id: String,
    /// Voice-Token
    pub token: SessionToken,
    /// Control-Endpunkt des Voice-Servers ("host:port")
    pub endpoint: String,
}

/// Zustand der Voice-Signaling-Session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Identifying,
    AwaitingReady,
    Ready,
    Resuming,
    Closed,
}

impl SessionState {
    /// Terminaler Zustand?
    pub fn ist_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Darf Media gesendet/empfangen werden?
    pub fn media_erlaubt(&self) -> bool {
        matches!(self, Self::Ready | Self::Resuming)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Identifying => "identifying",
            Self::AwaitingReady => "awaiting_ready",
            Self::Ready => "ready",
            Self::Resuming => "resuming",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_id_display() {
        assert_eq!(UserId(42).to_string(), "user:42");
    }

    #[test]
    fn user_id_serde_transparent() {
        let json = serde_json::to_string(&UserId(7)).unwrap();
        assert_eq!(json, "7");
        let id: UserId = serde_json::from_str("7").unwrap();
        assert_eq!(id, UserId(7));
    }

    #[test]
    fn epoch_naechste_saturiert() {
        assert_eq!(EpochId(1).naechste(), EpochId(2));
        assert_eq!(EpochId(u32::MAX).naechste(), EpochId(u32::MAX));
    }

    #[test]
    fn token_wird_nicht_geloggt() {
        let token = SessionToken::new("geheim");
        assert!(!format!("{token:?}").contains("geheim"));
    }

    #[test]
    fn media_nur_in_ready_und_resuming() {
        assert!(SessionState::Ready.media_erlaubt());
        assert!(SessionState::Resuming.media_erlaubt());
        assert!(!SessionState::AwaitingReady.media_erlaubt());
        assert!(SessionState::Closed.ist_terminal());
    }
}
