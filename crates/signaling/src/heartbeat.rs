//! Heartbeat-Zeitplan
//!
//! Sendet im festen Intervall (mit etwas Jitter) und merkt sich den
//! letzten Ack. Ob ein fehlender Ack zum Resume fuehrt, entscheidet die
//! State Machine.

use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

/// Zeitplan und Ack-Buchhaltung fuer Heartbeats
#[derive(Debug, Clone)]
pub struct HeartbeatTracker {
    intervall: Duration,
    jitter: f64,
    naechster: Instant,
    letzter_ack: Instant,
    nonce: u64,
    /// Zuletzt gesendete Nonce und Sendezeitpunkt
    offen: Option<(u64, Instant)>,
    rtt: Option<Duration>,
}

impl HeartbeatTracker {
    pub fn new(intervall: Duration, jitter: f64, now: Instant) -> Self {
        let mut tracker = Self {
            intervall,
            jitter,
            naechster: now,
            letzter_ack: now,
            nonce: 0,
            offen: None,
            rtt: None,
        };
        tracker.naechster = now + tracker.mit_jitter();
        tracker
    }

    fn mit_jitter(&self) -> Duration {
        if self.jitter <= 0.0 {
            return self.intervall;
        }
        let faktor = 1.0 + rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        self.intervall.mul_f64(faktor)
    }

    /// Liefert eine Nonce, wenn ein Heartbeat faellig ist
    pub fn faellig(&mut self, now: Instant) -> Option<u64> {
        if now < self.naechster {
            return None;
        }
        self.nonce = self.nonce.wrapping_add(1);
        self.offen = Some((self.nonce, now));
        self.naechster = now + self.mit_jitter();
        Some(self.nonce)
    }

    /// Verbucht einen Ack; jede Antwort zaehlt als Lebenszeichen
    pub fn ack(&mut self, nonce: u64, now: Instant) {
        self.letzter_ack = now;
        match self.offen {
            Some((offen, gesendet)) if offen == nonce => {
                self.rtt = Some(now.saturating_duration_since(gesendet));
                self.offen = None;
            }
            _ => tracing::debug!(nonce, "HeartbeatAck ohne passenden Heartbeat"),
        }
    }

    /// Ab diesem Zeitpunkt gilt die Verbindung als tot
    pub fn ueberfaellig_ab(&self, vielfaches: u32) -> Instant {
        self.letzter_ack + self.intervall * vielfaches
    }

    pub fn ist_ueberfaellig(&self, now: Instant, vielfaches: u32) -> bool {
        now >= self.ueberfaellig_ab(vielfaches)
    }

    /// Neuer Zeitplan nach erfolgreichem Resume
    pub fn zuruecksetzen(&mut self, now: Instant) {
        self.letzter_ack = now;
        self.offen = None;
        self.naechster = now + self.mit_jitter();
    }

    pub fn naechster(&self) -> Instant {
        self.naechster
    }

    pub fn intervall(&self) -> Duration {
        self.intervall
    }

    pub fn rtt(&self) -> Option<Duration> {
        self.rtt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEK: Duration = Duration::from_secs(1);

    #[test]
    fn ohne_jitter_exaktes_intervall() {
        let start = Instant::now();
        let mut hb = HeartbeatTracker::new(SEK, 0.0, start);
        assert_eq!(hb.naechster(), start + SEK);
        assert_eq!(hb.faellig(start), None);
        assert_eq!(hb.faellig(start + SEK), Some(1));
        assert_eq!(hb.naechster(), start + 2 * SEK);
    }

    #[test]
    fn jitter_bleibt_in_grenzen() {
        let start = Instant::now();
        for _ in 0..100 {
            let hb = HeartbeatTracker::new(SEK * 10, 0.05, start);
            let abstand = hb.naechster() - start;
            assert!(abstand >= Duration::from_millis(9_500));
            assert!(abstand <= Duration::from_millis(10_500));
        }
    }

    #[test]
    fn ack_misst_rtt() {
        let start = Instant::now();
        let mut hb = HeartbeatTracker::new(SEK, 0.0, start);
        let nonce = hb.faellig(start + SEK).unwrap();
        hb.ack(nonce, start + SEK + Duration::from_millis(40));
        assert_eq!(hb.rtt(), Some(Duration::from_millis(40)));
    }

    #[test]
    fn ueberfaellig_nach_vielfachem() {
        let start = Instant::now();
        let hb = HeartbeatTracker::new(SEK, 0.0, start);
        assert!(!hb.ist_ueberfaellig(start + 2 * SEK, 3));
        assert!(hb.ist_ueberfaellig(start + 3 * SEK, 3));
    }
}
