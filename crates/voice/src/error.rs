//! Fehlertypen des Transport-Koordinators

use thiserror::Error;
use voxwire_audio::CodecError;
use voxwire_core::error::VoxwireError;
use voxwire_core::event::{Diagnostic, DiagnosticKind};
use voxwire_core::types::{SessionState, Ssrc};
use voxwire_crypto::CryptoError;
use voxwire_protocol::ProtocolError;
use voxwire_signaling::SignalingError;

#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("Protokollfehler: {0}")]
    Protokoll(#[from] ProtocolError),

    #[error("Kryptografie-Fehler: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Codec-Fehler: {0}")]
    Codec(#[from] CodecError),

    #[error("Signaling-Fehler: {0}")]
    Signaling(#[from] SignalingError),

    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Konfiguration(#[from] VoxwireError),

    /// Unbekannte SSRC; ohne Sender kein Schluessel
    #[error("Unbekannte SSRC {0}")]
    UnbekannteSsrc(Ssrc),

    /// Media ist nur im Zustand Ready erlaubt
    #[error("Session nicht bereit (Zustand {0})")]
    NichtBereit(SessionState),

    #[error("Session ist geschlossen")]
    Geschlossen,
}

impl VoiceError {
    /// Art fuer das Diagnose-Ereignis eines verworfenen Pakets
    pub fn diagnostic_kind(&self) -> DiagnosticKind {
        match self {
            Self::Protokoll(_) => DiagnosticKind::MalformedFrame,
            Self::Crypto(e) => e.diagnostic_kind(),
            Self::Codec(_) => DiagnosticKind::CodecFailure,
            Self::UnbekannteSsrc(_) => DiagnosticKind::UnknownSender,
            _ => DiagnosticKind::EncryptionFailure,
        }
    }

    pub fn diagnostic(&self, ssrc: Option<Ssrc>) -> Diagnostic {
        Diagnostic::neu(self.diagnostic_kind(), ssrc, self.to_string())
    }

    /// Betrifft nur ein einzelnes Paket; die Session laeuft weiter
    pub fn ist_paket_lokal(&self) -> bool {
        match self {
            Self::Protokoll(e) => e.ist_paket_lokal(),
            Self::Crypto(e) => e.ist_paket_lokal(),
            Self::Codec(_) | Self::UnbekannteSsrc(_) => true,
            _ => false,
        }
    }
}

pub type VoiceResult<T> = Result<T, VoiceError>;

impl From<VoiceError> for VoxwireError {
    fn from(e: VoiceError) -> Self {
        match e {
            VoiceError::Konfiguration(inner) => inner,
            VoiceError::Geschlossen => VoxwireError::Getrennt("Voice-Session geschlossen".into()),
            VoiceError::Signaling(SignalingError::Timeout(msg)) => VoxwireError::Zeitlimit(msg),
            VoiceError::Signaling(SignalingError::VerbindungGetrennt) => {
                VoxwireError::Getrennt("Signaling-Verbindung getrennt".into())
            }
            andere => VoxwireError::Intern(andere.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxwire_core::types::EpochId;

    #[test]
    fn diagnose_art_folgt_der_ursache() {
        let e = VoiceError::from(ProtocolError::malformed("kurz"));
        assert_eq!(e.diagnostic_kind(), DiagnosticKind::MalformedFrame);

        let e = VoiceError::from(CryptoError::StaleEpochUsed {
            epoch: EpochId(1),
            aktuell: EpochId(3),
        });
        assert_eq!(e.diagnostic_kind(), DiagnosticKind::StaleEpochUsed);

        let d = VoiceError::UnbekannteSsrc(99).diagnostic(Some(99));
        assert_eq!(d.kind, DiagnosticKind::UnknownSender);
        assert_eq!(d.ssrc, Some(99));
    }

    #[test]
    fn paketlokale_fehler_und_umwandlung() {
        assert!(VoiceError::from(ProtocolError::malformed("kurz")).ist_paket_lokal());
        assert!(!VoiceError::Geschlossen.ist_paket_lokal());

        let e: VoxwireError = VoiceError::Signaling(SignalingError::Timeout("Ready".into())).into();
        assert!(matches!(e, VoxwireError::Zeitlimit(_)));
        let e: VoxwireError = VoiceError::Geschlossen.into();
        assert!(matches!(e, VoxwireError::Getrennt(_)));
    }
}
