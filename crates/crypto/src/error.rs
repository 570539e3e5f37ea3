//! Fehlertypen fuer das Kryptografie-Subsystem

use thiserror::Error;
use voxwire_core::event::DiagnosticKind;
use voxwire_core::types::{EpochId, UserId};

/// Fehler im Kryptografie-Subsystem
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Verschluesselung fehlgeschlagen: {0}")]
    EncryptionFailure(String),

    #[error("Authentifizierung fehlgeschlagen ({sender}, {epoch})")]
    AuthenticationFailure { sender: UserId, epoch: EpochId },

    #[error("Unbekannte Epoch: {0}")]
    UnknownEpoch(EpochId),

    #[error("Veraltete Epoch verwendet: {epoch} (aktuell {aktuell})")]
    StaleEpochUsed { epoch: EpochId, aktuell: EpochId },

    #[error("Sender {sender} ist kein Mitglied von {epoch}")]
    UnknownSender { sender: UserId, epoch: EpochId },

    #[error("Replay erkannt: {sender} Zaehler {counter}")]
    ReplayDetected { sender: UserId, counter: u32 },

    #[error("Keine aktive Epoch")]
    KeineEpoch,

    #[error("Key-Exchange fehlgeschlagen: {0}")]
    KeyExchange(String),

    #[error("Key Derivation fehlgeschlagen: {0}")]
    KeyDerivation(String),

    #[error("Ungueltige Schluessel-Laenge: erwartet {erwartet}, erhalten {erhalten}")]
    UngueltigeSchluesselLaenge { erwartet: usize, erhalten: usize },
}

impl CryptoError {
    /// Betrifft der Fehler nur ein einzelnes Paket (Paket verwerfen, weiter)?
    pub fn ist_paket_lokal(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailure { .. }
                | Self::ReplayDetected { .. }
                | Self::UnknownSender { .. }
        )
    }

    /// Deutet der Fehler auf einen verpassten Epoch-Wechsel hin?
    pub fn ist_epoch_problem(&self) -> bool {
        matches!(self, Self::UnknownEpoch(_) | Self::StaleEpochUsed { .. })
    }

    /// Diagnose-Art fuer den Konsumenten
    pub fn diagnostic_kind(&self) -> DiagnosticKind {
        match self {
            Self::AuthenticationFailure { .. } => DiagnosticKind::AuthenticationFailure,
            Self::ReplayDetected { .. } => DiagnosticKind::ReplayDetected,
            Self::UnknownSender { .. } => DiagnosticKind::UnknownSender,
            Self::UnknownEpoch(_) => DiagnosticKind::UnknownEpoch,
            Self::StaleEpochUsed { .. } => DiagnosticKind::StaleEpochUsed,
            _ => DiagnosticKind::EncryptionFailure,
        }
    }
}

pub type CryptoResult<T> = Result<T, CryptoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn klassifizierung() {
        let auth = CryptoError::AuthenticationFailure {
            sender: UserId(1),
            epoch: EpochId(2),
        };
        assert!(auth.ist_paket_lokal());
        assert!(!auth.ist_epoch_problem());
        assert_eq!(auth.diagnostic_kind(), DiagnosticKind::AuthenticationFailure);

        let stale = CryptoError::StaleEpochUsed {
            epoch: EpochId(1),
            aktuell: EpochId(3),
        };
        assert!(stale.ist_epoch_problem());
        assert!(!stale.ist_paket_lokal());
        assert_eq!(
            CryptoError::KeineEpoch.diagnostic_kind(),
            DiagnosticKind::EncryptionFailure
        );
    }
}
