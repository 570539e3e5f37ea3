//! Signaling-Protokoll (Control-Kanal)
//!
//! Jede Nachricht ist `{"op": <opcode>, "seq": <u64|null>, "d": <payload>}`.
//! Der Opcode bestimmt den Payload-Typ; `SignalingMessage` ist die
//! typsichere Sicht darauf und wird erschoepfend per `match` verarbeitet.
//!
//! ## Design
//! - Unbekannte Felder im Payload werden ignoriert (Vorwaertskompatibilitaet)
//! - Unbekannte Opcodes liefern `Ok(None)` statt eines Fehlers
//! - Schluesselmaterial wird Base64-kodiert uebertragen

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use voxwire_core::types::{EpochId, UserId};

use crate::error::{ProtocolError, ProtocolResult};

// ---------------------------------------------------------------------------
// Opcode
// ---------------------------------------------------------------------------

/// Numerische Opcodes auf dem Draht
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Opcode {
    Identify = 0,
    SelectProtocol = 1,
    Ready = 2,
    Heartbeat = 3,
    SessionDescription = 4,
    Speaking = 5,
    HeartbeatAck = 6,
    Resume = 7,
    Hello = 8,
    Resumed = 9,
    ClientConnect = 11,
    ClientDisconnect = 13,
    Invalidate = 14,
    Close = 15,
    EpochTransition = 22,
    TransitionReady = 23,
    KeyPackage = 26,
}

impl Opcode {
    /// Ordnet einen Draht-Opcode zu. Unbekannte Werte liefern `None`.
    pub fn from_u16(op: u16) -> Option<Self> {
        let op = match op {
            0 => Self::Identify,
            1 => Self::SelectProtocol,
            2 => Self::Ready,
            3 => Self::Heartbeat,
            4 => Self::SessionDescription,
            5 => Self::Speaking,
            6 => Self::HeartbeatAck,
            7 => Self::Resume,
            8 => Self::Hello,
            9 => Self::Resumed,
            11 => Self::ClientConnect,
            13 => Self::ClientDisconnect,
            14 => Self::Invalidate,
            15 => Self::Close,
            22 => Self::EpochTransition,
            23 => Self::TransitionReady,
            26 => Self::KeyPackage,
            _ => return None,
        };
        Some(op)
    }
}

// ---------------------------------------------------------------------------
// Rohes Frame
// ---------------------------------------------------------------------------

/// Nachricht wie sie auf dem Draht steht
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFrame {
    pub op: u16,
    /// Sequenznummer (nur bei Server-Nachrichten mit Reihenfolge)
    #[serde(default)]
    pub seq: Option<u64>,
    #[serde(default)]
    pub d: Value,
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Server -> Client: erste Nachricht nach dem Verbindungsaufbau
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelloPayload {
    /// Heartbeat-Intervall in Millisekunden
    pub heartbeat_interval: u64,
}

/// Client -> Server: Anmeldung mit den Daten vom Chat-Gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentifyPayload {
    pub server_id: String,
    pub user_id: UserId,
    pub session_id: String,
    pub token: String,
    /// Oeffentlicher X25519-Schluessel (Base64) fuer Key-Packages
    pub key_exchange_key: String,
}

impl IdentifyPayload {
    /// Dekodiert den oeffentlichen Key-Exchange-Schluessel
    pub fn key_exchange_key_bytes(&self) -> ProtocolResult<[u8; 32]> {
        let bytes = BASE64.decode(&self.key_exchange_key)?;
        bytes.try_into().map_err(|b: Vec<u8>| ProtocolError::UngueltigeNachricht {
            op: Opcode::Identify as u16,
            grund: format!("key_exchange_key hat {} Bytes (erwartet 32)", b.len()),
        })
    }
}

/// Server -> Client: Session ist angelegt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadyPayload {
    pub ssrc: u32,
    /// Media-Endpunkt
    pub ip: String,
    pub port: u16,
    #[serde(default)]
    pub modes: Vec<String>,
}

/// Client -> Server: gewaehlter Media-Modus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectProtocolPayload {
    pub address: String,
    pub port: u16,
    pub mode: String,
}

/// Server -> Client: Media-Parameter, optional mit erstem Key-Package
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDescriptionPayload {
    pub mode: String,
    #[serde(default)]
    pub key_package: Option<KeyPackagePayload>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    pub nonce: u64,
    /// Hoechste gesehene Server-Sequenznummer
    #[serde(default)]
    pub seq_ack: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatAckPayload {
    pub nonce: u64,
}

/// Sprechstatus; vom Server mit `user_id`, damit SSRCs zugeordnet werden koennen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeakingPayload {
    pub ssrc: u32,
    #[serde(default)]
    pub user_id: Option<UserId>,
    pub speaking: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumePayload {
    pub server_id: String,
    pub session_id: String,
    pub token: String,
    #[serde(default)]
    pub seq_ack: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResumedPayload {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConnectPayload {
    pub user_ids: Vec<UserId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientDisconnectPayload {
    pub user_id: UserId,
}

/// Server -> Client: Session ungueltig, frischer Handshake noetig
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvalidatePayload {
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClosePayload {
    #[serde(default)]
    pub code: u16,
    #[serde(default)]
    pub reason: String,
}

/// Key-Exchange-Artefakt fuer eine neue Epoch
///
/// Das Basis-Geheimnis ist fuer den Empfaenger verpackt (X25519 + AEAD);
/// ueber den Control-Kanal geht nie Klartext-Schluesselmaterial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyPackagePayload {
    pub transition_id: u64,
    pub epoch: EpochId,
    /// Teilnehmer der Epoch
    pub members: Vec<UserId>,
    /// Verpacktes Basis-Geheimnis (Base64)
    pub wrapped_secret: String,
}

impl KeyPackagePayload {
    pub fn neu(transition_id: u64, epoch: EpochId, members: Vec<UserId>, wrapped: &[u8]) -> Self {
        Self {
            transition_id,
            epoch,
            members,
            wrapped_secret: BASE64.encode(wrapped),
        }
    }

    pub fn wrapped_secret_bytes(&self) -> ProtocolResult<Vec<u8>> {
        Ok(BASE64.decode(&self.wrapped_secret)?)
    }
}

/// Server -> Client: Epoch wird verbindlich (Commit)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochTransitionPayload {
    pub transition_id: u64,
    pub epoch: EpochId,
}

/// Client -> Server: Key-Package verarbeitet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionReadyPayload {
    pub transition_id: u64,
}

// ---------------------------------------------------------------------------
// SignalingMessage
// ---------------------------------------------------------------------------

/// Typsichere Signaling-Nachricht
#[derive(Debug, Clone, PartialEq)]
pub enum SignalingMessage {
    Hello(HelloPayload),
    Identify(IdentifyPayload),
    Ready(ReadyPayload),
    SelectProtocol(SelectProtocolPayload),
    Heartbeat(HeartbeatPayload),
    HeartbeatAck(HeartbeatAckPayload),
    SessionDescription(SessionDescriptionPayload),
    Speaking(SpeakingPayload),
    KeyPackage(KeyPackagePayload),
    EpochTransition(EpochTransitionPayload),
    TransitionReady(TransitionReadyPayload),
    Resume(ResumePayload),
    Resumed(ResumedPayload),
    ClientConnect(ClientConnectPayload),
    ClientDisconnect(ClientDisconnectPayload),
    Invalidate(InvalidatePayload),
    Close(ClosePayload),
}

impl SignalingMessage {
    /// Opcode dieser Nachricht
    pub fn opcode(&self) -> Opcode {
        match self {
            Self::Hello(_) => Opcode::Hello,
            Self::Identify(_) => Opcode::Identify,
            Self::Ready(_) => Opcode::Ready,
            Self::SelectProtocol(_) => Opcode::SelectProtocol,
            Self::Heartbeat(_) => Opcode::Heartbeat,
            Self::HeartbeatAck(_) => Opcode::HeartbeatAck,
            Self::SessionDescription(_) => Opcode::SessionDescription,
            Self::Speaking(_) => Opcode::Speaking,
            Self::KeyPackage(_) => Opcode::KeyPackage,
            Self::EpochTransition(_) => Opcode::EpochTransition,
            Self::TransitionReady(_) => Opcode::TransitionReady,
            Self::Resume(_) => Opcode::Resume,
            Self::Resumed(_) => Opcode::Resumed,
            Self::ClientConnect(_) => Opcode::ClientConnect,
            Self::ClientDisconnect(_) => Opcode::ClientDisconnect,
            Self::Invalidate(_) => Opcode::Invalidate,
            Self::Close(_) => Opcode::Close,
        }
    }

    /// Erzeugt das Draht-Frame
    pub fn to_frame(&self, seq: Option<u64>) -> ProtocolResult<RawFrame> {
        let d = match self {
            Self::Hello(p) => serde_json::to_value(p)?,
            Self::Identify(p) => serde_json::to_value(p)?,
            Self::Ready(p) => serde_json::to_value(p)?,
            Self::SelectProtocol(p) => serde_json::to_value(p)?,
            Self::Heartbeat(p) => serde_json::to_value(p)?,
            Self::HeartbeatAck(p) => serde_json::to_value(p)?,
            Self::SessionDescription(p) => serde_json::to_value(p)?,
            Self::Speaking(p) => serde_json::to_value(p)?,
            Self::KeyPackage(p) => serde_json::to_value(p)?,
            Self::EpochTransition(p) => serde_json::to_value(p)?,
            Self::TransitionReady(p) => serde_json::to_value(p)?,
            Self::Resume(p) => serde_json::to_value(p)?,
            Self::Resumed(p) => serde_json::to_value(p)?,
            Self::ClientConnect(p) => serde_json::to_value(p)?,
            Self::ClientDisconnect(p) => serde_json::to_value(p)?,
            Self::Invalidate(p) => serde_json::to_value(p)?,
            Self::Close(p) => serde_json::to_value(p)?,
        };
        Ok(RawFrame {
            op: self.opcode() as u16,
            seq,
            d,
        })
    }

    /// Liest eine Nachricht aus einem Draht-Frame
    ///
    /// Gibt `Ok(None)` fuer unbekannte Opcodes zurueck.
    ///
    /// # Fehler
    /// `UngueltigeNachricht` wenn der Payload nicht zum Opcode passt.
    pub fn from_frame(frame: &RawFrame) -> ProtocolResult<Option<Self>> {
        let Some(opcode) = Opcode::from_u16(frame.op) else {
            return Ok(None);
        };

        // `d: null` wie ein leeres Objekt behandeln
        let d = match &frame.d {
            Value::Null => Value::Object(Default::default()),
            other => other.clone(),
        };
        let op = frame.op;

        let nachricht = match opcode {
            Opcode::Hello => Self::Hello(payload(op, d)?),
            Opcode::Identify => Self::Identify(payload(op, d)?),
            Opcode::Ready => Self::Ready(payload(op, d)?),
            Opcode::SelectProtocol => Self::SelectProtocol(payload(op, d)?),
            Opcode::Heartbeat => Self::Heartbeat(payload(op, d)?),
            Opcode::HeartbeatAck => Self::HeartbeatAck(payload(op, d)?),
            Opcode::SessionDescription => Self::SessionDescription(payload(op, d)?),
            Opcode::Speaking => Self::Speaking(payload(op, d)?),
            Opcode::KeyPackage => Self::KeyPackage(payload(op, d)?),
            Opcode::EpochTransition => Self::EpochTransition(payload(op, d)?),
            Opcode::TransitionReady => Self::TransitionReady(payload(op, d)?),
            Opcode::Resume => Self::Resume(payload(op, d)?),
            Opcode::Resumed => Self::Resumed(payload(op, d)?),
            Opcode::ClientConnect => Self::ClientConnect(payload(op, d)?),
            Opcode::ClientDisconnect => Self::ClientDisconnect(payload(op, d)?),
            Opcode::Invalidate => Self::Invalidate(payload(op, d)?),
            Opcode::Close => Self::Close(payload(op, d)?),
        };
        Ok(Some(nachricht))
    }
}

fn payload<T: DeserializeOwned>(op: u16, d: Value) -> ProtocolResult<T> {
    serde_json::from_value(d).map_err(|e| ProtocolError::UngueltigeNachricht {
        op,
        grund: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_aus_json() {
        let frame: RawFrame =
            serde_json::from_str(r#"{"op": 8, "seq": null, "d": {"heartbeat_interval": 10000}}"#)
                .unwrap();
        let msg = SignalingMessage::from_frame(&frame).unwrap().unwrap();
        assert_eq!(
            msg,
            SignalingMessage::Hello(HelloPayload {
                heartbeat_interval: 10000
            })
        );
    }

    #[test]
    fn unbekannte_felder_werden_ignoriert() {
        let frame: RawFrame = serde_json::from_str(
            r#"{"op": 2, "seq": 4, "d": {"ssrc": 1234, "ip": "10.0.0.1", "port": 5000,
                "modes": ["aead"], "experiments": ["neu"]}, "extra": true}"#,
        )
        .unwrap();
        assert_eq!(frame.seq, Some(4));
        match SignalingMessage::from_frame(&frame).unwrap() {
            Some(SignalingMessage::Ready(r)) => {
                assert_eq!(r.ssrc, 1234);
                assert_eq!(r.port, 5000);
            }
            andere => panic!("Ready erwartet, erhalten {andere:?}"),
        }
    }

    #[test]
    fn unbekannter_opcode_liefert_none() {
        let frame = RawFrame {
            op: 99,
            seq: None,
            d: Value::Null,
        };
        assert!(SignalingMessage::from_frame(&frame).unwrap().is_none());
    }

    #[test]
    fn resumed_ohne_payload() {
        let frame: RawFrame = serde_json::from_str(r#"{"op": 9, "d": null}"#).unwrap();
        assert!(matches!(
            SignalingMessage::from_frame(&frame).unwrap(),
            Some(SignalingMessage::Resumed(_))
        ));
    }

    #[test]
    fn falscher_payload_ist_fehler() {
        let frame: RawFrame =
            serde_json::from_str(r#"{"op": 8, "d": {"heartbeat_interval": "schnell"}}"#).unwrap();
        assert!(matches!(
            SignalingMessage::from_frame(&frame),
            Err(ProtocolError::UngueltigeNachricht { op: 8, .. })
        ));
    }

    #[test]
    fn opcode_zuordnung_ist_konsistent() {
        let msg = SignalingMessage::EpochTransition(EpochTransitionPayload {
            transition_id: 5,
            epoch: EpochId(2),
        });
        let frame = msg.to_frame(Some(11)).unwrap();
        assert_eq!(frame.op, 22);
        assert_eq!(Opcode::from_u16(frame.op), Some(Opcode::EpochTransition));
        assert_eq!(SignalingMessage::from_frame(&frame).unwrap(), Some(msg));
    }

    #[test]
    fn key_package_base64() {
        let kp = KeyPackagePayload::neu(1, EpochId(1), vec![UserId(5)], &[1, 2, 3]);
        assert_eq!(kp.wrapped_secret_bytes().unwrap(), vec![1, 2, 3]);

        let kaputt = KeyPackagePayload {
            wrapped_secret: "###".into(),
            ..kp
        };
        assert!(matches!(
            kaputt.wrapped_secret_bytes(),
            Err(ProtocolError::Base64(_))
        ));
    }

    #[test]
    fn identify_schluessel_muss_32_bytes_haben() {
        let identify = IdentifyPayload {
            server_id: "1".into(),
            user_id: UserId(1),
            session_id: "s".into(),
            token: "t".into(),
            key_exchange_key: BASE64.encode([7u8; 16]),
        };
        assert!(identify.key_exchange_key_bytes().is_err());
    }
}
