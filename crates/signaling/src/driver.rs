//! Control-Kanal-Driver
//!
//! Ein tokio-Task pro Session. Liest Frames ueber `SignalingCodec`,
//! fuettert die State Machine, fuehrt deren Aktionen aus und wendet
//! Key-Packages auf den Key Ratchet Manager an. Der Media-Pfad haengt
//! nur ueber den Ratchet am Driver.

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::codec::Framed;

use voxwire_core::config::VoxwireConfig;
use voxwire_core::event::{CloseReason, Diagnostic, DiagnosticKind};
use voxwire_core::types::{EpochId, SessionParameter, SessionState, UserId};
use voxwire_crypto::{KeyPackage, KeyRatchetManager};
use voxwire_protocol::signaling::{KeyPackagePayload, ReadyPayload, SpeakingPayload};
use voxwire_protocol::{RawFrame, SignalingCodec, SignalingMessage};

use crate::error::{SignalingError, SignalingResult};
use crate::state::{Action, SignalingStateMachine};

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

/// Oeffnet den Control-Kanal zum Voice-Server
#[async_trait]
pub trait ControlConnector: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    async fn connect(&self, endpoint: &str) -> io::Result<Self::Stream>;
}

/// Standard-Connector ueber TCP
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl ControlConnector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self, endpoint: &str) -> io::Result<TcpStream> {
        let stream = TcpStream::connect(endpoint).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

// ---------------------------------------------------------------------------
// Ereignisse und Handle
// ---------------------------------------------------------------------------

/// Ereignisse des Drivers an den Transport-Koordinator
#[derive(Debug, Clone, PartialEq)]
pub enum SignalingEvent {
    Zustand { alt: SessionState, neu: SessionState },
    Ready(ReadyPayload),
    SessionDescription { mode: String },
    /// Neue Epoch ist aktuell (Key-Package angewendet)
    EpochAktiv(EpochId),
    /// Epoch-Wechsel bestaetigt
    EpochBestaetigt(EpochId),
    Speaking(SpeakingPayload),
    ClientConnect(Vec<UserId>),
    ClientDisconnect(UserId),
    Diagnostic(Diagnostic),
    ResyncRequested(EpochId),
    SessionInvalidiert(String),
    Geschlossen(CloseReason),
}

/// Sende- und Steuer-Handle fuer einen laufenden Driver
#[derive(Debug, Clone)]
pub struct SignalingHandle {
    ausgehend: mpsc::Sender<SignalingMessage>,
    eingehend: mpsc::Sender<RawFrame>,
    shutdown: Arc<watch::Sender<Option<CloseReason>>>,
}

impl SignalingHandle {
    /// Reiht eine Nachricht an den Server ein
    pub async fn senden(&self, nachricht: SignalingMessage) -> SignalingResult<()> {
        self.ausgehend
            .send(nachricht)
            .await
            .map_err(|_| SignalingError::VerbindungGetrennt)
    }

    /// Speist ein Control-Frame ein, das ueber den Datagramm-Pfad kam
    pub fn frame_einspeisen(&self, frame: RawFrame) -> SignalingResult<()> {
        self.eingehend.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                SignalingError::Timeout("Control-Frame-Puffer voll".into())
            }
            mpsc::error::TrySendError::Closed(_) => SignalingError::VerbindungGetrennt,
        })
    }

    /// Beendet die Session; der Driver meldet danach `Geschlossen`
    pub fn beenden(&self, grund: CloseReason) {
        let _ = self.shutdown.send(Some(grund));
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

type Kanal<S> = Framed<S, SignalingCodec>;

/// Fuehrt eine Signaling-Session gegen einen Voice-Server aus
pub struct SignalingDriver<C: ControlConnector> {
    connector: C,
    endpoint: String,
    maschine: SignalingStateMachine,
    ratchet: Arc<KeyRatchetManager>,
    events: mpsc::Sender<SignalingEvent>,
    ausgehend: mpsc::Receiver<SignalingMessage>,
    eingehend: mpsc::Receiver<RawFrame>,
    shutdown: watch::Receiver<Option<CloseReason>>,
    max_frame_size: usize,
    verbindungs_timeout: Duration,
}

impl<C: ControlConnector> SignalingDriver<C> {
    /// Erstellt Driver und zugehoeriges Handle
    pub fn new(
        connector: C,
        parameter: SessionParameter,
        config: &VoxwireConfig,
        ratchet: Arc<KeyRatchetManager>,
        events: mpsc::Sender<SignalingEvent>,
    ) -> (Self, SignalingHandle) {
        let (ausgehend_tx, ausgehend_rx) = mpsc::channel(64);
        let (eingehend_tx, eingehend_rx) = mpsc::channel(64);
        let (shutdown_tx, shutdown_rx) = watch::channel(None);

        let endpoint = parameter.endpoint.clone();
        let maschine = SignalingStateMachine::new(parameter, ratchet.public_key_bytes(), config);

        let driver = Self {
            connector,
            endpoint,
            maschine,
            ratchet,
            events,
            ausgehend: ausgehend_rx,
            eingehend: eingehend_rx,
            shutdown: shutdown_rx,
            max_frame_size: config.signaling.max_frame_size,
            verbindungs_timeout: config.signaling.ready_timeout(),
        };
        let handle = SignalingHandle {
            ausgehend: ausgehend_tx,
            eingehend: eingehend_tx,
            shutdown: Arc::new(shutdown_tx),
        };
        (driver, handle)
    }

    /// Hauptschleife; endet im Zustand `Closed`
    pub async fn run(mut self) {
        let mut kanal: Option<Kanal<C::Stream>> = None;
        let mut aktionen: VecDeque<Action> = self.maschine.connect(Instant::now()).into();

        loop {
            while let Some(aktion) = aktionen.pop_front() {
                self.ausfuehren(aktion, &mut kanal, &mut aktionen).await;
            }
            if self.maschine.zustand().ist_terminal() {
                break;
            }

            let frist = self.maschine.next_deadline();
            let timer = async move {
                match frist {
                    Some(f) => tokio::time::sleep_until(f).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                frame = naechstes_frame(&mut kanal) => {
                    let now = Instant::now();
                    match frame {
                        Some(Ok(raw)) => aktionen.extend(self.frame_verarbeiten(raw, now)),
                        Some(Err(e)) => {
                            tracing::warn!(fehler = %e, "Frame-Lesefehler auf dem Control-Kanal");
                            kanal = None;
                            aktionen.extend(self.maschine.verbindung_verloren(now));
                        }
                        None => {
                            tracing::info!(endpoint = %self.endpoint, "Control-Kanal vom Server geschlossen");
                            kanal = None;
                            aktionen.extend(self.maschine.verbindung_verloren(now));
                        }
                    }
                }

                Some(raw) = self.eingehend.recv() => {
                    aktionen.extend(self.frame_verarbeiten(raw, Instant::now()));
                }

                Some(nachricht) = self.ausgehend.recv() => {
                    aktionen.push_back(Action::Senden(nachricht));
                }

                _ = timer => {
                    aktionen.extend(self.maschine.poll_timers(Instant::now()));
                }

                res = self.shutdown.changed() => {
                    let grund = match res {
                        Ok(()) => self.shutdown.borrow().clone(),
                        // Handle verworfen: niemand hoert mehr zu
                        Err(_) => Some(CloseReason::Graceful("Handle verworfen".into())),
                    };
                    if let Some(grund) = grund {
                        aktionen.extend(self.maschine.disconnect(grund));
                    }
                }
            }
        }

        if let Some(mut k) = kanal {
            let _ = k.close().await;
        }
        tracing::info!(endpoint = %self.endpoint, "Signaling-Task beendet");
    }

    fn frame_verarbeiten(&mut self, raw: RawFrame, now: Instant) -> Vec<Action> {
        match SignalingMessage::from_frame(&raw) {
            Ok(Some(nachricht)) => {
                tracing::trace!(op = raw.op, seq = ?raw.seq, "Signaling-Nachricht empfangen");
                self.maschine.handle(raw.seq, nachricht, now)
            }
            Ok(None) => {
                tracing::debug!(op = raw.op, "Unbekannter Opcode ignoriert");
                Vec::new()
            }
            Err(e) => {
                tracing::error!(op = raw.op, fehler = %e, "Ungueltige Signaling-Nachricht");
                self.maschine
                    .disconnect(CloseReason::ProtocolError(e.to_string()))
            }
        }
    }

    async fn ausfuehren(
        &mut self,
        aktion: Action,
        kanal: &mut Option<Kanal<C::Stream>>,
        aktionen: &mut VecDeque<Action>,
    ) {
        match aktion {
            Action::Verbinden => {
                *kanal = None;
                match self.verbinden().await {
                    Ok(neu) => *kanal = Some(neu),
                    Err(e) => {
                        tracing::warn!(endpoint = %self.endpoint, fehler = %e, "Verbindungsaufbau fehlgeschlagen");
                        aktionen.extend(self.maschine.verbindung_verloren(Instant::now()));
                    }
                }
            }

            Action::Senden(nachricht) => {
                let ist_identify = matches!(nachricht, SignalingMessage::Identify(_));
                let ist_heartbeat = matches!(nachricht, SignalingMessage::Heartbeat(_));
                match senden(kanal, &nachricht).await {
                    Ok(()) => {
                        if ist_identify {
                            aktionen.extend(self.maschine.identify_sent(Instant::now()));
                        }
                        if ist_heartbeat {
                            self.ratchet.retire_expired();
                        }
                    }
                    Err(SignalingError::VerbindungGetrennt) => {
                        tracing::debug!(op = ?nachricht.opcode(), "Kein Control-Kanal, Nachricht verworfen");
                    }
                    Err(e) => {
                        tracing::warn!(fehler = %e, "Senden fehlgeschlagen");
                        *kanal = None;
                        aktionen.extend(self.maschine.verbindung_verloren(Instant::now()));
                    }
                }
            }

            Action::Zustandswechsel { alt, neu } => {
                self.melden(SignalingEvent::Zustand { alt, neu }).await;
            }
            Action::SessionReady(p) => self.melden(SignalingEvent::Ready(p)).await,
            Action::SessionDescription { mode } => {
                self.melden(SignalingEvent::SessionDescription { mode }).await;
            }

            Action::BeginTransition(paket) => {
                let transition_id = paket.transition_id;
                let epoch = paket.epoch;
                match self.key_package_anwenden(&paket) {
                    Ok(()) => {
                        self.melden(SignalingEvent::EpochAktiv(epoch)).await;
                        aktionen.extend(
                            self.maschine
                                .transition_ready(transition_id, epoch, Instant::now()),
                        );
                    }
                    Err(diagnose) => {
                        tracing::warn!(epoch = %epoch, detail = %diagnose.detail, "Key-Package nicht anwendbar");
                        self.melden(SignalingEvent::Diagnostic(diagnose)).await;
                        self.melden(SignalingEvent::ResyncRequested(epoch)).await;
                    }
                }
            }

            Action::CommitTransition(commit) => match self.ratchet.commit_transition(commit.epoch) {
                Ok(()) => self.melden(SignalingEvent::EpochBestaetigt(commit.epoch)).await,
                Err(e) => {
                    tracing::warn!(epoch = %commit.epoch, fehler = %e, "Commit nicht anwendbar");
                    self.melden(SignalingEvent::Diagnostic(Diagnostic::neu(
                        e.diagnostic_kind(),
                        None,
                        e.to_string(),
                    )))
                    .await;
                    self.melden(SignalingEvent::ResyncRequested(commit.epoch)).await;
                }
            },

            Action::Speaking(p) => self.melden(SignalingEvent::Speaking(p)).await,
            Action::ClientConnect(ids) => self.melden(SignalingEvent::ClientConnect(ids)).await,
            Action::ClientDisconnect(id) => self.melden(SignalingEvent::ClientDisconnect(id)).await,
            Action::ResyncRequested(epoch) => {
                self.melden(SignalingEvent::ResyncRequested(epoch)).await;
            }

            Action::SessionInvalidiert(grund) => {
                self.ratchet.erase_all();
                *kanal = None;
                self.melden(SignalingEvent::SessionInvalidiert(grund)).await;
            }

            Action::Geschlossen(grund) => {
                self.ratchet.erase_all();
                self.melden(SignalingEvent::Geschlossen(grund)).await;
            }
        }
    }

    fn key_package_anwenden(&self, paket: &KeyPackagePayload) -> Result<(), Diagnostic> {
        let wrapped = paket.wrapped_secret_bytes().map_err(|e| {
            Diagnostic::neu(DiagnosticKind::EncryptionFailure, None, e.to_string())
        })?;
        let paket = KeyPackage {
            transition_id: paket.transition_id,
            epoch: paket.epoch,
            members: paket.members.clone(),
            wrapped_secret: wrapped,
        };
        self.ratchet
            .begin_transition(&paket)
            .map(|_| ())
            .map_err(|e| Diagnostic::neu(e.diagnostic_kind(), None, e.to_string()))
    }

    async fn verbinden(&self) -> SignalingResult<Kanal<C::Stream>> {
        let stream = tokio::time::timeout(
            self.verbindungs_timeout,
            self.connector.connect(&self.endpoint),
        )
        .await
        .map_err(|_| SignalingError::Timeout(self.endpoint.clone()))??;

        tracing::info!(endpoint = %self.endpoint, "Control-Kanal verbunden");
        Ok(Framed::new(
            stream,
            SignalingCodec::with_max_size(self.max_frame_size),
        ))
    }

    async fn melden(&self, event: SignalingEvent) {
        if self.events.send(event).await.is_err() {
            tracing::debug!("Ereignis-Empfaenger geschlossen");
        }
    }
}

async fn naechstes_frame<S>(kanal: &mut Option<Kanal<S>>) -> Option<io::Result<RawFrame>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match kanal {
        Some(k) => k.next().await,
        None => std::future::pending().await,
    }
}

async fn senden<S>(kanal: &mut Option<Kanal<S>>, nachricht: &SignalingMessage) -> SignalingResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let k = kanal.as_mut().ok_or(SignalingError::VerbindungGetrennt)?;
    k.send(nachricht.to_frame(None)?).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
