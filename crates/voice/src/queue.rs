//! Begrenzte Decode-Queue mit Drop-Oldest
//!
//! Kommt die Dekodierung nicht hinterher, wird das aelteste gepufferte
//! Paket verworfen. Der Empfangspfad blockiert nie und der Speicher
//! waechst nicht.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;

/// Statistik einer Queue (Snapshot)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStatistik {
    pub eingereiht: u64,
    pub verworfen: u64,
    pub fuellstand: usize,
}

struct Inhalt<T> {
    eintraege: VecDeque<T>,
    eingereiht: u64,
    verworfen: u64,
}

/// Mehrfach-Produzent, Einzel-Konsument
pub struct MediaQueue<T> {
    kapazitaet: usize,
    inhalt: Mutex<Inhalt<T>>,
    signal: Notify,
    geschlossen: AtomicBool,
}

impl<T> MediaQueue<T> {
    pub fn neu(kapazitaet: usize) -> Self {
        let kapazitaet = kapazitaet.max(1);
        Self {
            kapazitaet,
            inhalt: Mutex::new(Inhalt {
                eintraege: VecDeque::with_capacity(kapazitaet),
                eingereiht: 0,
                verworfen: 0,
            }),
            signal: Notify::new(),
            geschlossen: AtomicBool::new(false),
        }
    }

    /// Reiht ein; liefert das verdraengte aelteste Element bei voller Queue
    pub fn einreihen(&self, eintrag: T) -> Option<T> {
        let verdraengt = {
            let mut inhalt = self.inhalt.lock();
            let verdraengt = if inhalt.eintraege.len() >= self.kapazitaet {
                inhalt.verworfen += 1;
                inhalt.eintraege.pop_front()
            } else {
                None
            };
            inhalt.eintraege.push_back(eintrag);
            inhalt.eingereiht += 1;
            verdraengt
        };
        self.signal.notify_one();
        verdraengt
    }

    /// Wartet auf das naechste Element; `None` nach `schliessen` und leerer Queue
    pub async fn entnehmen(&self) -> Option<T> {
        loop {
            if let Some(eintrag) = self.inhalt.lock().eintraege.pop_front() {
                return Some(eintrag);
            }
            if self.geschlossen.load(Ordering::Acquire) {
                return None;
            }
            self.signal.notified().await;
        }
    }

    pub fn schliessen(&self) {
        self.geschlossen.store(true, Ordering::Release);
        self.signal.notify_waiters();
        self.signal.notify_one();
    }

    pub fn statistik(&self) -> QueueStatistik {
        let inhalt = self.inhalt.lock();
        QueueStatistik {
            eingereiht: inhalt.eingereiht,
            verworfen: inhalt.verworfen,
            fuellstand: inhalt.eintraege.len(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn volle_queue_verwirft_aeltestes() {
        let q = MediaQueue::neu(3);
        assert_eq!(q.einreihen(1), None);
        assert_eq!(q.einreihen(2), None);
        assert_eq!(q.einreihen(3), None);
        assert_eq!(q.einreihen(4), Some(1));
        assert_eq!(q.einreihen(5), Some(2));

        let s = q.statistik();
        assert_eq!(s.eingereiht, 5);
        assert_eq!(s.verworfen, 2);
        assert_eq!(s.fuellstand, 3);
    }

    #[tokio::test]
    async fn reihenfolge_bleibt_erhalten() {
        let q = MediaQueue::neu(8);
        for i in 0..5 {
            q.einreihen(i);
        }
        for i in 0..5 {
            assert_eq!(q.entnehmen().await, Some(i));
        }
    }

    #[tokio::test]
    async fn konsument_wird_geweckt() {
        let q = Arc::new(MediaQueue::neu(4));
        let q2 = Arc::clone(&q);
        let konsument = tokio::spawn(async move { q2.entnehmen().await });

        tokio::task::yield_now().await;
        q.einreihen(42u32);
        assert_eq!(konsument.await.unwrap(), Some(42));
    }

    #[tokio::test]
    async fn schliessen_leert_erst_die_queue() {
        let q = MediaQueue::neu(4);
        q.einreihen("a");
        q.schliessen();
        assert_eq!(q.entnehmen().await, Some("a"));
        assert_eq!(q.entnehmen().await, None);
    }

    #[test]
    fn kapazitaet_null_wird_eins() {
        let q = MediaQueue::neu(0);
        assert_eq!(q.einreihen(1), None);
        assert_eq!(q.einreihen(2), Some(1));
    }
}
