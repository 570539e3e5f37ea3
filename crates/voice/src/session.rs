//! Voice-Session und SSRC-Verzeichnis
//!
//! Die `VoiceSession` entsteht bei Ready und gehoert exklusiv dem
//! Transport-Koordinator. Das SSRC-Verzeichnis ordnet eingehende Pakete
//! ihrem Sender zu; ohne Sender gibt es keinen Schluessel.

use dashmap::DashMap;
use voxwire_core::types::{SessionParameter, SessionToken, Ssrc, UserId};
use voxwire_protocol::frame::{MediaHeader, PacketType};

// ---------------------------------------------------------------------------
// VoiceSession
// ---------------------------------------------------------------------------

/// Eine aktive Voice-Verbindung
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceSession {
    pub token: SessionToken,
    pub endpoint: String,
    pub user_id: UserId,
    pub ssrc: Ssrc,
    /// Media-Endpunkt aus Ready
    pub media_ip: String,
    pub media_port: u16,
    sequence: u32,
    timestamp: u32,
    samples_pro_frame: u32,
}

impl VoiceSession {
    pub fn neu(
        parameter: &SessionParameter,
        ssrc: Ssrc,
        media_ip: String,
        media_port: u16,
        samples_pro_frame: u32,
    ) -> Self {
        Self {
            token: parameter.token.clone(),
            endpoint: parameter.endpoint.clone(),
            user_id: parameter.user_id,
            ssrc,
            media_ip,
            media_port,
            sequence: 0,
            timestamp: 0,
            samples_pro_frame,
        }
    }

    /// Zuletzt vergebene Sequenznummer
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    /// Header fuer das naechste ausgehende Paket
    ///
    /// Die erste Sequenznummer ist 1. Sequenz und Zeitstempel laufen bei
    /// `u32::MAX` explizit ueber.
    pub fn naechster_header(&mut self, packet_type: PacketType, flags: u16) -> MediaHeader {
        let (sequence, ueberlauf) = self.sequence.overflowing_add(1);
        if ueberlauf {
            tracing::info!(ssrc = self.ssrc, "Sequenznummer uebergelaufen");
        }
        self.sequence = sequence;

        let header = MediaHeader::new(packet_type, flags, sequence, self.timestamp, self.ssrc);
        self.timestamp = self.timestamp.wrapping_add(self.samples_pro_frame);
        header
    }

    #[cfg(test)]
    pub(crate) fn zaehler_setzen(&mut self, sequence: u32, timestamp: u32) {
        self.sequence = sequence;
        self.timestamp = timestamp;
    }
}

// ---------------------------------------------------------------------------
// SsrcVerzeichnis
// ---------------------------------------------------------------------------

/// SSRC -> UserId, thread-safe durch DashMap
#[derive(Debug, Default)]
pub struct SsrcVerzeichnis {
    eintraege: DashMap<Ssrc, UserId>,
}

impl SsrcVerzeichnis {
    pub fn neu() -> Self {
        Self::default()
    }

    pub fn eintragen(&self, ssrc: Ssrc, user_id: UserId) {
        if let Some(alt) = self.eintraege.insert(ssrc, user_id) {
            if alt != user_id {
                tracing::debug!(ssrc, alt = %alt, neu = %user_id, "SSRC neu zugeordnet");
            }
        }
    }

    pub fn user_id(&self, ssrc: Ssrc) -> Option<UserId> {
        self.eintraege.get(&ssrc).map(|e| *e)
    }

    /// Entfernt alle SSRCs eines Teilnehmers
    pub fn teilnehmer_entfernen(&self, user_id: UserId) -> usize {
        let vorher = self.eintraege.len();
        self.eintraege.retain(|_, uid| *uid != user_id);
        vorher - self.eintraege.len()
    }

    pub fn leeren(&self) {
        self.eintraege.clear();
    }

    pub fn anzahl(&self) -> usize {
        self.eintraege.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> VoiceSession {
        let parameter = SessionParameter {
            server_id: "srv".into(),
            user_id: UserId(7),
            session_id: "sess".into(),
            token: SessionToken::new("tok"),
            endpoint: "voice.test:443".into(),
        };
        VoiceSession::neu(&parameter, 1234, "127.0.0.1".into(), 5000, 960)
    }

    #[test]
    fn sequenz_beginnt_bei_eins_und_zeit_laeuft_mit() {
        let mut s = session();
        let h1 = s.naechster_header(PacketType::Audio, 0);
        let h2 = s.naechster_header(PacketType::Audio, 0);
        assert_eq!((h1.sequence, h1.timestamp, h1.ssrc), (1, 0, 1234));
        assert_eq!((h2.sequence, h2.timestamp), (2, 960));
        assert_eq!(s.sequence(), 2);
    }

    #[test]
    fn ueberlauf_von_sequenz_und_zeitstempel() {
        let mut s = session();
        s.zaehler_setzen(u32::MAX - 1, u32::MAX - 100);
        let h = s.naechster_header(PacketType::Audio, 0);
        assert_eq!(h.sequence, u32::MAX);
        let h = s.naechster_header(PacketType::Audio, 0);
        assert_eq!(h.sequence, 0);
        assert_eq!(h.timestamp, 859);
    }

    #[test]
    fn verzeichnis_ordnet_zu_und_entfernt() {
        let v = SsrcVerzeichnis::neu();
        v.eintragen(1, UserId(7));
        v.eintragen(2, UserId(8));
        v.eintragen(3, UserId(8));
        assert_eq!(v.user_id(2), Some(UserId(8)));
        assert_eq!(v.teilnehmer_entfernen(UserId(8)), 2);
        assert_eq!(v.user_id(3), None);
        assert_eq!(v.anzahl(), 1);
        v.leeren();
        assert_eq!(v.user_id(1), None);
    }
}
