//! Zaehler einer Session
//!
//! Lock-freie Atomics; `snapshot()` liefert eine konsistente Kopie fuer
//! Logs und Konsumenten.

use std::sync::atomic::{AtomicU64, Ordering};

use voxwire_core::event::DiagnosticKind;

/// Momentaufnahme der Session-Zaehler
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub gesendet: u64,
    pub empfangen: u64,
    pub dekodiert: u64,
    pub verworfen_malformed: u64,
    pub verworfen_auth: u64,
    pub verworfen_replay: u64,
    pub verworfen_sender: u64,
    pub verworfen_epoch: u64,
    pub verworfen_codec: u64,
    pub verworfen_queue: u64,
    /// Ereignisse, die bei vollem Ereignis-Kanal nicht zugestellt wurden
    pub ereignisse_verworfen: u64,
}

impl StatsSnapshot {
    /// Summe aller verworfenen Pakete
    pub fn verworfen(&self) -> u64 {
        self.verworfen_malformed
            + self.verworfen_auth
            + self.verworfen_replay
            + self.verworfen_sender
            + self.verworfen_epoch
            + self.verworfen_codec
            + self.verworfen_queue
    }
}

#[derive(Debug, Default)]
pub struct SessionStats {
    gesendet: AtomicU64,
    empfangen: AtomicU64,
    dekodiert: AtomicU64,
    verworfen_malformed: AtomicU64,
    verworfen_auth: AtomicU64,
    verworfen_replay: AtomicU64,
    verworfen_sender: AtomicU64,
    verworfen_epoch: AtomicU64,
    verworfen_codec: AtomicU64,
    verworfen_queue: AtomicU64,
    ereignisse_verworfen: AtomicU64,
}

impl SessionStats {
    pub fn gesendet(&self) {
        self.gesendet.fetch_add(1, Ordering::Relaxed);
    }

    pub fn empfangen(&self) {
        self.empfangen.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dekodiert(&self) {
        self.dekodiert.fetch_add(1, Ordering::Relaxed);
    }

    /// Zaehlt ein verworfenes Paket nach Grund
    pub fn verworfen(&self, kind: DiagnosticKind) {
        let zaehler = match kind {
            DiagnosticKind::MalformedFrame => &self.verworfen_malformed,
            DiagnosticKind::AuthenticationFailure => &self.verworfen_auth,
            DiagnosticKind::ReplayDetected => &self.verworfen_replay,
            DiagnosticKind::UnknownSender => &self.verworfen_sender,
            DiagnosticKind::UnknownEpoch
            | DiagnosticKind::StaleEpochUsed
            | DiagnosticKind::EncryptionFailure => &self.verworfen_epoch,
            DiagnosticKind::CodecFailure => &self.verworfen_codec,
            DiagnosticKind::QueueOverflow => &self.verworfen_queue,
        };
        zaehler.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ereignis_verworfen(&self) {
        self.ereignisse_verworfen.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let lesen = |z: &AtomicU64| z.load(Ordering::Relaxed);
        StatsSnapshot {
            gesendet: lesen(&self.gesendet),
            empfangen: lesen(&self.empfangen),
            dekodiert: lesen(&self.dekodiert),
            verworfen_malformed: lesen(&self.verworfen_malformed),
            verworfen_auth: lesen(&self.verworfen_auth),
            verworfen_replay: lesen(&self.verworfen_replay),
            verworfen_sender: lesen(&self.verworfen_sender),
            verworfen_epoch: lesen(&self.verworfen_epoch),
            verworfen_codec: lesen(&self.verworfen_codec),
            verworfen_queue: lesen(&self.verworfen_queue),
            ereignisse_verworfen: lesen(&self.ereignisse_verworfen),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verworfene_pakete_nach_grund() {
        let stats = SessionStats::default();
        stats.empfangen();
        stats.empfangen();
        stats.verworfen(DiagnosticKind::AuthenticationFailure);
        stats.verworfen(DiagnosticKind::StaleEpochUsed);
        stats.verworfen(DiagnosticKind::UnknownEpoch);

        let s = stats.snapshot();
        assert_eq!(s.empfangen, 2);
        assert_eq!(s.verworfen_auth, 1);
        assert_eq!(s.verworfen_epoch, 2);
        assert_eq!(s.verworfen(), 3);
    }

    #[test]
    fn verlorene_ereignisse_zaehlen_nicht_als_pakete() {
        let stats = SessionStats::default();
        stats.ereignis_verworfen();
        stats.ereignis_verworfen();

        let s = stats.snapshot();
        assert_eq!(s.ereignisse_verworfen, 2);
        assert_eq!(s.verworfen(), 0);
    }
}
