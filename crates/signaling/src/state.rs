//! Voice-Signaling State Machine
//!
//! Sans-IO: die Maschine bekommt Nachrichten und Zeitpunkte und liefert
//! `Action`s zurueck. Netzwerk, Timer und Key Ratchet bedient der Driver.
//!
//! ## Zustaende
//! ```text
//! Disconnected -> Connecting -> Identifying -> AwaitingReady -> Ready
//!                     ^                                          |  ^
//!                     |             Invalidate                   v  | Resumed
//!                     +------------------------------------- Resuming
//!
//! jeder Zustand --Close / fataler Fehler--> Closed
//! ```

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use tokio::time::Instant;

use voxwire_core::config::{SignalingEinstellungen, VoxwireConfig};
use voxwire_core::event::CloseReason;
use voxwire_core::types::{EpochId, SessionParameter, SessionState, UserId};
use voxwire_protocol::signaling::{
    ClosePayload, EpochTransitionPayload, HeartbeatPayload, IdentifyPayload, KeyPackagePayload,
    ReadyPayload, ResumePayload, SessionDescriptionPayload, SpeakingPayload,
    TransitionReadyPayload,
};
use voxwire_protocol::SignalingMessage;

use crate::heartbeat::HeartbeatTracker;

/// Close-Code fuer ein regulaeres Ende
pub const CLOSE_NORMAL: u16 = 1000;

/// Close-Code fuer ein lokales Ende wegen eines Fehlers
pub const CLOSE_FEHLER: u16 = 4000;

/// Auftrag der State Machine an den Driver
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Control-Kanal (neu) oeffnen
    Verbinden,
    /// Nachricht an den Server senden
    Senden(SignalingMessage),
    Zustandswechsel {
        alt: SessionState,
        neu: SessionState,
    },
    /// Handshake abgeschlossen; Media-Transport darf oeffnen
    SessionReady(ReadyPayload),
    SessionDescription {
        mode: String,
    },
    /// Key-Package an den Key Ratchet Manager geben
    BeginTransition(KeyPackagePayload),
    /// Epoch-Wechsel verbindlich machen
    CommitTransition(EpochTransitionPayload),
    Speaking(SpeakingPayload),
    ClientConnect(Vec<UserId>),
    ClientDisconnect(UserId),
    /// Epoch-Zustand ist nicht mehr synchron
    ResyncRequested(EpochId),
    /// Server hat die Session verworfen; Schluessel loeschen
    SessionInvalidiert(String),
    /// Terminal, wird genau einmal geliefert
    Geschlossen(CloseReason),
}

#[derive(Debug, Clone, Copy)]
struct ResumeVersuch {
    versuch: u32,
    frist: Instant,
}

/// State Machine einer Voice-Signaling-Session
#[derive(Debug)]
pub struct SignalingStateMachine {
    parameter: SessionParameter,
    key_exchange_key: String,
    config: SignalingEinstellungen,
    grace_window: Duration,
    max_offene_commits: usize,

    zustand: SessionState,
    heartbeat: Option<HeartbeatTracker>,
    letzte_seq: Option<u64>,
    hello_frist: Option<Instant>,
    ready_frist: Option<Instant>,
    resume: Option<ResumeVersuch>,
    ssrc: Option<u32>,

    /// Bestaetigte Key-Packages (transition_id -> epoch)
    bestaetigt: HashMap<u64, EpochId>,
    /// EpochTransitions, deren Key-Package noch fehlt
    offene_commits: VecDeque<(EpochTransitionPayload, Instant)>,
}

impl SignalingStateMachine {
    pub fn new(parameter: SessionParameter, key_exchange_key: [u8; 32], config: &VoxwireConfig) -> Self {
        Self {
            parameter,
            key_exchange_key: BASE64.encode(key_exchange_key),
            config: config.signaling.clone(),
            grace_window: config.encryption.grace_window(),
            max_offene_commits: config.encryption.max_pending_transitions,
            zustand: SessionState::Disconnected,
            heartbeat: None,
            letzte_seq: None,
            hello_frist: None,
            ready_frist: None,
            resume: None,
            ssrc: None,
            bestaetigt: HashMap::new(),
            offene_commits: VecDeque::new(),
        }
    }

    pub fn zustand(&self) -> SessionState {
        self.zustand
    }

    pub fn ssrc(&self) -> Option<u32> {
        self.ssrc
    }

    pub fn letzte_seq(&self) -> Option<u64> {
        self.letzte_seq
    }

    pub fn heartbeat_rtt(&self) -> Option<Duration> {
        self.heartbeat.as_ref().and_then(HeartbeatTracker::rtt)
    }

    pub fn offene_commits(&self) -> usize {
        self.offene_commits.len()
    }

    // -----------------------------------------------------------------------
    // Eingaben
    // -----------------------------------------------------------------------

    /// Startet den Handshake
    pub fn connect(&mut self, now: Instant) -> Vec<Action> {
        let mut aktionen = Vec::new();
        if self.zustand != SessionState::Disconnected {
            tracing::warn!(zustand = %self.zustand, "connect() ausserhalb von Disconnected ignoriert");
            return aktionen;
        }
        self.wechseln(SessionState::Connecting, &mut aktionen);
        self.hello_frist = Some(now + self.config.ready_timeout());
        aktionen.push(Action::Verbinden);
        aktionen
    }

    /// Der Driver hat Identify erfolgreich gesendet
    pub fn identify_sent(&mut self, now: Instant) -> Vec<Action> {
        let mut aktionen = Vec::new();
        if self.zustand == SessionState::Identifying {
            self.wechseln(SessionState::AwaitingReady, &mut aktionen);
            self.ready_frist = Some(now + self.config.ready_timeout());
        }
        aktionen
    }

    /// Verarbeitet eine Nachricht vom Server
    pub fn handle(&mut self, seq: Option<u64>, nachricht: SignalingMessage, now: Instant) -> Vec<Action> {
        let mut aktionen = Vec::new();
        if matches!(self.zustand, SessionState::Disconnected | SessionState::Closed) {
            tracing::debug!(zustand = %self.zustand, op = ?nachricht.opcode(), "Nachricht ohne Session ignoriert");
            return aktionen;
        }

        if let Some(seq) = seq {
            if self.letzte_seq.is_some_and(|letzte| seq <= letzte) {
                tracing::debug!(seq, letzte = ?self.letzte_seq, "Doppelte oder veraltete seq ignoriert");
                return aktionen;
            }
            self.letzte_seq = Some(seq);
        }

        use SessionState as S;
        use SignalingMessage as M;

        match (self.zustand, nachricht) {
            (_, M::Close(p)) => {
                let grund = if p.code == CLOSE_NORMAL {
                    CloseReason::Graceful(p.reason)
                } else {
                    CloseReason::SessionLost(format!("Close {}: {}", p.code, p.reason))
                };
                self.schliessen(grund, &mut aktionen);
            }

            (_, M::HeartbeatAck(p)) => match self.heartbeat.as_mut() {
                Some(hb) => hb.ack(p.nonce, now),
                None => tracing::debug!(nonce = p.nonce, "HeartbeatAck vor Hello ignoriert"),
            },

            (S::Connecting, M::Hello(p)) => {
                self.heartbeat_starten(p.heartbeat_interval, now);
                self.hello_frist = None;
                self.wechseln(S::Identifying, &mut aktionen);
                aktionen.push(Action::Senden(M::Identify(IdentifyPayload {
                    server_id: self.parameter.server_id.clone(),
                    user_id: self.parameter.user_id,
                    session_id: self.parameter.session_id.clone(),
                    token: self.parameter.token.as_str().to_string(),
                    key_exchange_key: self.key_exchange_key.clone(),
                })));
            }

            // Nach dem Reconnect eines Resume schickt der Server erneut Hello
            (S::Resuming, M::Hello(p)) => {
                self.heartbeat_starten(p.heartbeat_interval, now);
            }

            (S::Identifying | S::AwaitingReady, M::Ready(p)) => {
                self.ready_frist = None;
                self.ssrc = Some(p.ssrc);
                self.wechseln(S::Ready, &mut aktionen);
                tracing::info!(ssrc = p.ssrc, ip = %p.ip, port = p.port, "Voice-Session bereit");
                aktionen.push(Action::SessionReady(p));
            }

            (S::Identifying | S::AwaitingReady, M::Invalidate(p)) => {
                self.schliessen(
                    CloseReason::SessionLost(format!("Identify abgelehnt: {}", p.reason)),
                    &mut aktionen,
                );
            }

            (S::Ready | S::Resuming, M::SessionDescription(SessionDescriptionPayload { mode, key_package })) => {
                aktionen.push(Action::SessionDescription { mode });
                if let Some(paket) = key_package {
                    aktionen.push(Action::BeginTransition(paket));
                }
            }

            (S::Ready | S::Resuming, M::KeyPackage(p)) => {
                aktionen.push(Action::BeginTransition(p));
            }

            (S::Ready | S::Resuming, M::EpochTransition(p)) => {
                self.commit_oder_puffern(p, now, &mut aktionen);
            }

            (S::Ready | S::Resuming, M::Speaking(p)) => aktionen.push(Action::Speaking(p)),

            (S::Ready | S::Resuming, M::ClientConnect(p)) => {
                aktionen.push(Action::ClientConnect(p.user_ids));
            }

            (S::Ready | S::Resuming, M::ClientDisconnect(p)) => {
                aktionen.push(Action::ClientDisconnect(p.user_id));
            }

            (S::Resuming, M::Resumed(_)) => {
                let versuche = self.resume.take().map_or(0, |r| r.versuch);
                if let Some(hb) = self.heartbeat.as_mut() {
                    hb.zuruecksetzen(now);
                }
                self.wechseln(S::Ready, &mut aktionen);
                tracing::info!(versuche, "Session fortgesetzt");
            }

            (S::Ready | S::Resuming, M::Invalidate(p)) => {
                self.invalidieren(p.reason, now, &mut aktionen);
            }

            (zustand, nachricht) => {
                let op = nachricht.opcode() as u16;
                tracing::error!(op, zustand = %zustand, "Unerwartete Nachricht, Session wird beendet");
                self.schliessen(
                    CloseReason::ProtocolError(format!(
                        "Unerwartete Nachricht (op {op}) im Zustand {zustand}"
                    )),
                    &mut aktionen,
                );
            }
        }
        aktionen
    }

    /// Key-Package wurde angewendet; bestaetigen und gepufferte Commits freigeben
    pub fn transition_ready(&mut self, transition_id: u64, epoch: EpochId, now: Instant) -> Vec<Action> {
        let mut aktionen = Vec::new();
        if self.zustand.ist_terminal() {
            return aktionen;
        }

        self.bestaetigt.insert(transition_id, epoch);
        // Nur die juengsten Bestaetigungen sind fuer Commits noch relevant
        self.bestaetigt
            .retain(|_, e| e.inner().saturating_add(1) >= epoch.inner());

        aktionen.push(Action::Senden(SignalingMessage::TransitionReady(
            TransitionReadyPayload { transition_id },
        )));

        let mut behalten = VecDeque::with_capacity(self.offene_commits.len());
        for (commit, empfangen) in self.offene_commits.drain(..) {
            if commit.transition_id == transition_id && commit.epoch == epoch {
                tracing::debug!(
                    epoch = %epoch,
                    wartezeit_ms = now.saturating_duration_since(empfangen).as_millis() as u64,
                    "Gepufferter Commit freigegeben"
                );
                aktionen.push(Action::CommitTransition(commit));
            } else {
                behalten.push_back((commit, empfangen));
            }
        }
        self.offene_commits = behalten;
        aktionen
    }

    /// Control-Kanal ist weggebrochen (EOF, Lese-/Schreibfehler)
    pub fn verbindung_verloren(&mut self, now: Instant) -> Vec<Action> {
        let mut aktionen = Vec::new();
        match self.zustand {
            SessionState::Ready => self.resume_starten(now, &mut aktionen),
            // Resume-Timer kuemmert sich um den naechsten Versuch
            SessionState::Resuming => {}
            SessionState::Connecting | SessionState::Identifying | SessionState::AwaitingReady => {
                self.schliessen(
                    CloseReason::SessionLost("Control-Kanal vor Ready verloren".into()),
                    &mut aktionen,
                );
            }
            SessionState::Disconnected | SessionState::Closed => {}
        }
        aktionen
    }

    /// Lokales Beenden
    ///
    /// Solange ein Control-Kanal bestehen kann, geht vor dem Ende ein
    /// `Close` an den Server.
    pub fn disconnect(&mut self, grund: CloseReason) -> Vec<Action> {
        let mut aktionen = Vec::new();
        if !matches!(self.zustand, SessionState::Disconnected | SessionState::Closed) {
            let (code, reason) = match &grund {
                CloseReason::Graceful(text) => (CLOSE_NORMAL, text.clone()),
                andere => (CLOSE_FEHLER, andere.to_string()),
            };
            aktionen.push(Action::Senden(SignalingMessage::Close(ClosePayload {
                code,
                reason,
            })));
        }
        self.schliessen(grund, &mut aktionen);
        aktionen
    }

    /// Prueft alle Fristen und faellige Heartbeats
    pub fn poll_timers(&mut self, now: Instant) -> Vec<Action> {
        let mut aktionen = Vec::new();
        let abgelaufen = |frist: Option<Instant>| frist.is_some_and(|f| now >= f);

        match self.zustand {
            SessionState::Disconnected | SessionState::Closed => return aktionen,
            SessionState::Connecting if abgelaufen(self.hello_frist) => {
                self.schliessen(CloseReason::SessionLost("Kein Hello erhalten".into()), &mut aktionen);
                return aktionen;
            }
            SessionState::AwaitingReady if abgelaufen(self.ready_frist) => {
                self.schliessen(CloseReason::SessionLost("Kein Ready erhalten".into()), &mut aktionen);
                return aktionen;
            }
            SessionState::Ready => {
                let ueberfaellig = self
                    .heartbeat
                    .as_ref()
                    .is_some_and(|hb| hb.ist_ueberfaellig(now, self.config.missed_ack_multiple));
                if ueberfaellig {
                    tracing::warn!(
                        vielfaches = self.config.missed_ack_multiple,
                        "Kein HeartbeatAck, versuche Resume"
                    );
                    self.resume_starten(now, &mut aktionen);
                }
            }
            SessionState::Resuming if abgelaufen(self.resume.map(|r| r.frist)) => {
                let versuch = self.resume.map_or(0, |r| r.versuch);
                if versuch >= self.config.max_resume_attempts {
                    self.schliessen(CloseReason::ResumeExhausted { attempts: versuch }, &mut aktionen);
                    return aktionen;
                }
                tracing::warn!(versuch = versuch + 1, "Resume-Timeout, neuer Versuch");
                self.resume = Some(ResumeVersuch {
                    versuch: versuch + 1,
                    frist: now + self.config.resume_timeout(),
                });
                aktionen.push(Action::Verbinden);
                aktionen.push(self.resume_nachricht());
            }
            _ => {}
        }

        if self.sendet_heartbeats() {
            if let Some(nonce) = self.heartbeat.as_mut().and_then(|hb| hb.faellig(now)) {
                tracing::trace!(nonce, "Heartbeat faellig");
                aktionen.push(Action::Senden(SignalingMessage::Heartbeat(HeartbeatPayload {
                    nonce,
                    seq_ack: self.letzte_seq,
                })));
            }
        }

        while let Some((commit, empfangen)) = self.offene_commits.front() {
            if now < *empfangen + self.grace_window {
                break;
            }
            tracing::warn!(epoch = %commit.epoch, "Gepufferter Commit ohne Key-Package verworfen");
            aktionen.push(Action::ResyncRequested(commit.epoch));
            self.offene_commits.pop_front();
        }

        aktionen
    }

    /// Naechster Zeitpunkt, zu dem `poll_timers` etwas zu tun hat
    pub fn next_deadline(&self) -> Option<Instant> {
        let mut fristen: Vec<Instant> = Vec::new();
        match self.zustand {
            SessionState::Disconnected | SessionState::Closed => return None,
            SessionState::Connecting => fristen.extend(self.hello_frist),
            SessionState::AwaitingReady => fristen.extend(self.ready_frist),
            SessionState::Resuming => fristen.extend(self.resume.map(|r| r.frist)),
            SessionState::Ready => fristen.extend(
                self.heartbeat
                    .as_ref()
                    .map(|hb| hb.ueberfaellig_ab(self.config.missed_ack_multiple)),
            ),
            SessionState::Identifying => {}
        }
        if self.sendet_heartbeats() {
            fristen.extend(self.heartbeat.as_ref().map(HeartbeatTracker::naechster));
        }
        fristen.extend(
            self.offene_commits
                .front()
                .map(|(_, empfangen)| *empfangen + self.grace_window),
        );
        fristen.into_iter().min()
    }

    // -----------------------------------------------------------------------
    // Interne Uebergaenge
    // -----------------------------------------------------------------------

    fn sendet_heartbeats(&self) -> bool {
        matches!(
            self.zustand,
            SessionState::Identifying | SessionState::AwaitingReady | SessionState::Ready
        )
    }

    fn heartbeat_starten(&mut self, intervall_ms: u64, now: Instant) {
        let intervall = Duration::from_millis(intervall_ms.max(1));
        tracing::debug!(intervall_ms, "Heartbeat gestartet");
        self.heartbeat = Some(HeartbeatTracker::new(
            intervall,
            self.config.heartbeat_jitter,
            now,
        ));
    }

    fn wechseln(&mut self, neu: SessionState, aktionen: &mut Vec<Action>) {
        let alt = self.zustand;
        if alt == neu {
            return;
        }
        self.zustand = neu;
        tracing::info!(alt = %alt, neu = %neu, "Signaling-Zustand gewechselt");
        aktionen.push(Action::Zustandswechsel { alt, neu });
    }

    fn resume_nachricht(&self) -> Action {
        Action::Senden(SignalingMessage::Resume(ResumePayload {
            server_id: self.parameter.server_id.clone(),
            session_id: self.parameter.session_id.clone(),
            token: self.parameter.token.as_str().to_string(),
            seq_ack: self.letzte_seq,
        }))
    }

    fn resume_starten(&mut self, now: Instant, aktionen: &mut Vec<Action>) {
        self.wechseln(SessionState::Resuming, aktionen);
        self.resume = Some(ResumeVersuch {
            versuch: 1,
            frist: now + self.config.resume_timeout(),
        });
        aktionen.push(Action::Verbinden);
        aktionen.push(self.resume_nachricht());
    }

    fn invalidieren(&mut self, grund: String, now: Instant, aktionen: &mut Vec<Action>) {
        tracing::warn!(grund = %grund, "Session vom Server verworfen, neuer Handshake");
        self.heartbeat = None;
        self.letzte_seq = None;
        self.resume = None;
        self.ready_frist = None;
        self.ssrc = None;
        self.bestaetigt.clear();
        self.offene_commits.clear();

        aktionen.push(Action::SessionInvalidiert(grund));
        self.wechseln(SessionState::Connecting, aktionen);
        self.hello_frist = Some(now + self.config.ready_timeout());
        aktionen.push(Action::Verbinden);
    }

    fn commit_oder_puffern(&mut self, commit: EpochTransitionPayload, now: Instant, aktionen: &mut Vec<Action>) {
        if self.bestaetigt.get(&commit.transition_id) == Some(&commit.epoch) {
            aktionen.push(Action::CommitTransition(commit));
            return;
        }

        if self.offene_commits.len() >= self.max_offene_commits {
            if let Some((verdraengt, _)) = self.offene_commits.pop_front() {
                tracing::warn!(epoch = %verdraengt.epoch, "Commit-Puffer voll, aeltester verworfen");
                aktionen.push(Action::ResyncRequested(verdraengt.epoch));
            }
        }
        tracing::debug!(
            epoch = %commit.epoch,
            transition_id = commit.transition_id,
            "EpochTransition vor Key-Package, gepuffert"
        );
        self.offene_commits.push_back((commit, now));
    }

    fn schliessen(&mut self, grund: CloseReason, aktionen: &mut Vec<Action>) {
        if self.zustand.ist_terminal() {
            return;
        }
        if grund.ist_fatal() {
            tracing::error!(grund = %grund, "Session beendet");
        } else {
            tracing::info!(grund = %grund, "Session beendet");
        }
        self.heartbeat = None;
        self.hello_frist = None;
        self.ready_frist = None;
        self.resume = None;
        self.offene_commits.clear();
        self.bestaetigt.clear();
        self.wechseln(SessionState::Closed, aktionen);
        aktionen.push(Action::Geschlossen(grund));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use voxwire_core::types::SessionToken;
    use voxwire_protocol::signaling::{
        HeartbeatAckPayload, HelloPayload, InvalidatePayload, ResumedPayload,
    };

    const SEK: Duration = Duration::from_secs(1);

    fn parameter() -> SessionParameter {
        SessionParameter {
            server_id: "srv".into(),
            user_id: UserId(7),
            session_id: "sess".into(),
            token: SessionToken::new("geheim"),
            endpoint: "127.0.0.1:1".into(),
        }
    }

    fn maschine() -> SignalingStateMachine {
        let mut config = VoxwireConfig::default();
        config.signaling.heartbeat_jitter = 0.0;
        SignalingStateMachine::new(parameter(), [9u8; 32], &config)
    }

    fn ready(ssrc: u32) -> SignalingMessage {
        SignalingMessage::Ready(ReadyPayload {
            ssrc,
            ip: "127.0.0.1".into(),
            port: 5000,
            modes: vec!["aead_aes256_gcm".into()],
        })
    }

    fn hello(ms: u64) -> SignalingMessage {
        SignalingMessage::Hello(HelloPayload {
            heartbeat_interval: ms,
        })
    }

    /// Bringt die Maschine bis Ready
    fn bereit(m: &mut SignalingStateMachine, start: Instant) {
        m.connect(start);
        m.handle(Some(1), hello(1000), start);
        m.identify_sent(start);
        m.handle(Some(2), ready(1234), start);
        assert_eq!(m.zustand(), SessionState::Ready);
    }

    fn gesendet(aktionen: &[Action]) -> Vec<&SignalingMessage> {
        aktionen
            .iter()
            .filter_map(|a| match a {
                Action::Senden(m) => Some(m),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn handshake_bis_ready() {
        let mut m = maschine();
        let start = Instant::now();

        let a = m.connect(start);
        assert!(a.contains(&Action::Verbinden));
        assert_eq!(m.zustand(), SessionState::Connecting);

        let a = m.handle(None, hello(10_000), start);
        assert_eq!(m.zustand(), SessionState::Identifying);
        match gesendet(&a).as_slice() {
            [SignalingMessage::Identify(id)] => {
                assert_eq!(id.user_id, UserId(7));
                assert_eq!(id.token, "geheim");
                assert_eq!(id.key_exchange_key_bytes().unwrap(), [9u8; 32]);
            }
            andere => panic!("Identify erwartet, erhalten {andere:?}"),
        }

        m.identify_sent(start);
        assert_eq!(m.zustand(), SessionState::AwaitingReady);

        let a = m.handle(None, ready(1234), start);
        assert_eq!(m.zustand(), SessionState::Ready);
        assert_eq!(m.ssrc(), Some(1234));
        assert!(a.iter().any(|x| matches!(x, Action::SessionReady(p) if p.ssrc == 1234)));
    }

    #[test]
    fn heartbeat_timeout_fuehrt_zu_resume() {
        let mut m = maschine();
        let start = Instant::now();
        bereit(&mut m, start);

        let a = m.poll_timers(start + SEK);
        assert!(matches!(
            gesendet(&a).as_slice(),
            [SignalingMessage::Heartbeat(HeartbeatPayload { nonce: 1, seq_ack: Some(2) })]
        ));
        m.poll_timers(start + 2 * SEK);
        assert_eq!(m.zustand(), SessionState::Ready);

        let a = m.poll_timers(start + 3 * SEK);
        assert_eq!(m.zustand(), SessionState::Resuming);
        assert!(a.contains(&Action::Verbinden));
        assert!(gesendet(&a)
            .iter()
            .any(|n| matches!(n, SignalingMessage::Resume(r) if r.seq_ack == Some(2))));
        assert!(!a.iter().any(|x| matches!(x, Action::Geschlossen(_))));
    }

    #[test]
    fn ack_haelt_session_am_leben() {
        let mut m = maschine();
        let start = Instant::now();
        bereit(&mut m, start);

        for i in 1..=10u32 {
            let t = start + SEK * i;
            let a = m.poll_timers(t);
            if let [SignalingMessage::Heartbeat(hb)] = gesendet(&a).as_slice() {
                let nonce = hb.nonce;
                m.handle(None, SignalingMessage::HeartbeatAck(HeartbeatAckPayload { nonce }), t);
            }
        }
        assert_eq!(m.zustand(), SessionState::Ready);
    }

    #[test]
    fn resumed_kehrt_nach_ready_zurueck() {
        let mut m = maschine();
        let start = Instant::now();
        bereit(&mut m, start);
        m.poll_timers(start + 3 * SEK);
        assert_eq!(m.zustand(), SessionState::Resuming);

        m.handle(Some(3), hello(1000), start + 3 * SEK);
        m.handle(Some(4), SignalingMessage::Resumed(ResumedPayload {}), start + 3 * SEK);
        assert_eq!(m.zustand(), SessionState::Ready);

        // Heartbeat-Zeitplan beginnt neu
        m.poll_timers(start + 5 * SEK);
        assert_eq!(m.zustand(), SessionState::Ready);
    }

    #[test]
    fn resume_versuche_erschoepft() {
        let mut m = maschine();
        let start = Instant::now();
        bereit(&mut m, start);

        let mut t = start + 3 * SEK;
        m.poll_timers(t);
        let resume_timeout = Duration::from_millis(5_000);

        t += resume_timeout;
        let a = m.poll_timers(t);
        assert!(a.contains(&Action::Verbinden));
        t += resume_timeout;
        m.poll_timers(t);
        assert_eq!(m.zustand(), SessionState::Resuming);

        t += resume_timeout;
        let a = m.poll_timers(t);
        assert_eq!(m.zustand(), SessionState::Closed);
        assert!(a.contains(&Action::Geschlossen(CloseReason::ResumeExhausted { attempts: 3 })));
    }

    #[test]
    fn invalidate_startet_neuen_handshake() {
        let mut m = maschine();
        let start = Instant::now();
        bereit(&mut m, start);

        let a = m.handle(
            Some(3),
            SignalingMessage::Invalidate(InvalidatePayload {
                reason: "session_expired".into(),
            }),
            start,
        );
        assert_eq!(m.zustand(), SessionState::Connecting);
        assert!(a.contains(&Action::SessionInvalidiert("session_expired".into())));
        assert!(a.contains(&Action::Verbinden));
        assert_eq!(m.letzte_seq(), None);

        // Neuer Server beginnt wieder bei seq 1
        m.handle(Some(1), hello(1000), start);
        assert_eq!(m.zustand(), SessionState::Identifying);
    }

    #[test]
    fn unerwarteter_opcode_ist_fatal() {
        let mut m = maschine();
        let start = Instant::now();
        bereit(&mut m, start);

        let a = m.handle(None, ready(99), start);
        assert_eq!(m.zustand(), SessionState::Closed);
        assert!(a
            .iter()
            .any(|x| matches!(x, Action::Geschlossen(CloseReason::ProtocolError(_)))));
    }

    #[test]
    fn geschlossen_wird_nur_einmal_gemeldet() {
        let mut m = maschine();
        let start = Instant::now();
        bereit(&mut m, start);

        let a = m.handle(
            None,
            SignalingMessage::Close(ClosePayload {
                code: CLOSE_NORMAL,
                reason: "tschuess".into(),
            }),
            start,
        );
        assert!(a.contains(&Action::Geschlossen(CloseReason::Graceful("tschuess".into()))));
        assert!(m.disconnect(CloseReason::Graceful("nochmal".into())).is_empty());
        assert!(m.poll_timers(start + 100 * SEK).is_empty());
        assert_eq!(m.next_deadline(), None);
    }

    #[test]
    fn lokales_disconnect_sendet_close_vor_dem_ende() {
        let mut m = maschine();
        let start = Instant::now();
        bereit(&mut m, start);

        let a = m.disconnect(CloseReason::Graceful("tschuess".into()));
        assert_eq!(
            a.first(),
            Some(&Action::Senden(SignalingMessage::Close(ClosePayload {
                code: CLOSE_NORMAL,
                reason: "tschuess".into(),
            })))
        );
        assert_eq!(
            a.last(),
            Some(&Action::Geschlossen(CloseReason::Graceful("tschuess".into())))
        );
        assert_eq!(m.zustand(), SessionState::Closed);
    }

    #[test]
    fn disconnect_wegen_fehler_nutzt_fehlercode() {
        let mut m = maschine();
        let start = Instant::now();
        bereit(&mut m, start);

        let a = m.disconnect(CloseReason::ProtocolError("kaputt".into()));
        assert!(matches!(
            gesendet(&a).as_slice(),
            [SignalingMessage::Close(p)] if p.code == CLOSE_FEHLER
        ));
    }

    #[test]
    fn disconnect_vor_connect_sendet_nichts() {
        let mut m = maschine();
        let a = m.disconnect(CloseReason::Graceful("frueh".into()));
        assert!(gesendet(&a).is_empty());
        assert_eq!(m.zustand(), SessionState::Closed);
    }

    #[test]
    fn doppelte_seq_wird_ignoriert() {
        let mut m = maschine();
        let start = Instant::now();
        bereit(&mut m, start);

        // seq 2 war Ready; ein zweites Ready mit derselben seq ist ein Duplikat
        assert!(m.handle(Some(2), ready(1234), start).is_empty());
        assert_eq!(m.zustand(), SessionState::Ready);
    }

    #[test]
    fn kein_ready_ist_session_lost() {
        let mut m = maschine();
        let start = Instant::now();
        m.connect(start);
        m.handle(None, hello(1000), start);
        m.identify_sent(start);

        let a = m.poll_timers(start + Duration::from_millis(10_000));
        assert_eq!(m.zustand(), SessionState::Closed);
        assert!(a
            .iter()
            .any(|x| matches!(x, Action::Geschlossen(CloseReason::SessionLost(_)))));
    }

    // --- Epoch-Wechsel ---

    fn key_package(transition_id: u64, epoch: u32) -> KeyPackagePayload {
        KeyPackagePayload::neu(transition_id, EpochId(epoch), vec![UserId(7)], &[1, 2, 3])
    }

    fn commit(transition_id: u64, epoch: u32) -> SignalingMessage {
        SignalingMessage::EpochTransition(EpochTransitionPayload {
            transition_id,
            epoch: EpochId(epoch),
        })
    }

    #[test]
    fn key_package_und_commit_in_reihenfolge() {
        let mut m = maschine();
        let start = Instant::now();
        bereit(&mut m, start);

        let a = m.handle(None, SignalingMessage::KeyPackage(key_package(5, 2)), start);
        assert_eq!(a, vec![Action::BeginTransition(key_package(5, 2))]);

        let a = m.transition_ready(5, EpochId(2), start);
        assert!(matches!(
            gesendet(&a).as_slice(),
            [SignalingMessage::TransitionReady(TransitionReadyPayload { transition_id: 5 })]
        ));

        let a = m.handle(None, commit(5, 2), start);
        assert!(matches!(a.as_slice(), [Action::CommitTransition(c)] if c.epoch == EpochId(2)));
    }

    #[test]
    fn commit_vor_key_package_wird_gepuffert() {
        let mut m = maschine();
        let start = Instant::now();
        bereit(&mut m, start);

        assert!(m.handle(None, commit(5, 2), start).is_empty());
        assert_eq!(m.offene_commits(), 1);

        m.handle(None, SignalingMessage::KeyPackage(key_package(5, 2)), start);
        let a = m.transition_ready(5, EpochId(2), start);
        assert!(a
            .iter()
            .any(|x| matches!(x, Action::CommitTransition(c) if c.transition_id == 5)));
        assert_eq!(m.offene_commits(), 0);
    }

    #[test]
    fn gepufferter_commit_verfaellt_nach_grace_window() {
        let mut m = maschine();
        let start = Instant::now();
        bereit(&mut m, start);

        m.handle(None, commit(5, 2), start);
        // Heartbeats werden bestaetigt, damit kein Resume startet
        let mut t = start;
        let mut resync = false;
        for _ in 0..11 {
            t += SEK;
            for aktion in m.poll_timers(t) {
                match aktion {
                    Action::Senden(SignalingMessage::Heartbeat(hb)) => {
                        m.handle(
                            None,
                            SignalingMessage::HeartbeatAck(HeartbeatAckPayload { nonce: hb.nonce }),
                            t,
                        );
                    }
                    Action::ResyncRequested(epoch) => {
                        assert_eq!(epoch, EpochId(2));
                        resync = true;
                    }
                    _ => {}
                }
            }
        }
        assert!(resync);
        assert_eq!(m.offene_commits(), 0);
        assert_eq!(m.zustand(), SessionState::Ready);
    }

    #[test]
    fn initiales_key_package_aus_session_description() {
        let mut m = maschine();
        let start = Instant::now();
        bereit(&mut m, start);

        let a = m.handle(
            None,
            SignalingMessage::SessionDescription(SessionDescriptionPayload {
                mode: "aead_aes256_gcm".into(),
                key_package: Some(key_package(1, 1)),
            }),
            start,
        );
        assert_eq!(
            a,
            vec![
                Action::SessionDescription {
                    mode: "aead_aes256_gcm".into()
                },
                Action::BeginTransition(key_package(1, 1)),
            ]
        );
    }

    #[test]
    fn next_deadline_folgt_dem_heartbeat() {
        let mut m = maschine();
        let start = Instant::now();
        bereit(&mut m, start);
        assert_eq!(m.next_deadline(), Some(start + SEK));
    }
}
