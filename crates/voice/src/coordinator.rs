//! Transport-Koordinator
//!
//! Verbindet Signaling, Key Ratchet, Frame-Layout und Codec zu einer
//! Voice-Session. Pro Session laufen:
//!
//! ```text
//! SignalingDriver        (Control-Kanal, Heartbeat, Key-Packages)
//!     | SignalingEvent
//!     v
//! Signaling-Bruecke      -> VoiceEvent an den Konsumenten
//!
//! DatagramTransport::recv
//!     |-- Control-Datagramm -> SignalingHandle::frame_einspeisen
//!     |-- Media-Datagramm   -> MediaQueue (Drop-Oldest, Shard pro SSRC)
//!                                |
//!                                v
//!                           Decode-Worker (entschluesseln, dekodieren)
//! ```
//!
//! Signaling- und Media-Pfad teilen sich nur den `KeyRatchetManager`.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::Instrument;

use voxwire_audio::{CodecFactory, VoiceCodec};
use voxwire_core::config::VoxwireConfig;
use voxwire_core::event::{CloseReason, Diagnostic, DiagnosticKind, VoiceEvent};
use voxwire_core::types::{SessionParameter, SessionState, Ssrc};
use voxwire_crypto::{CryptoError, KeyRatchetManager};
use voxwire_protocol::datagram::{self, DatagramKind};
use voxwire_protocol::frame::{MediaFlags, PacketType};
use voxwire_protocol::signaling::{SelectProtocolPayload, SpeakingPayload};
use voxwire_protocol::SignalingMessage;
use voxwire_signaling::{ControlConnector, SignalingDriver, SignalingEvent, SignalingHandle};

use crate::error::{VoiceError, VoiceResult};
use crate::pipeline::{DecoderSatz, MediaPipeline};
use crate::queue::MediaQueue;
use crate::session::{SsrcVerzeichnis, VoiceSession};
use crate::stats::{SessionStats, StatsSnapshot};
use crate::transport::DatagramTransport;

/// Kapazitaet des Ereignis-Kanals zum Konsumenten
const EVENT_KANAL: usize = 256;

/// Wie lange `disconnect` auf das Close des Signaling-Drivers wartet
const ABSCHLUSS_TIMEOUT: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Gemeinsamer Zustand
// ---------------------------------------------------------------------------

struct Inner {
    parameter: SessionParameter,
    config: VoxwireConfig,
    ratchet: Arc<KeyRatchetManager>,
    transport: Arc<dyn DatagramTransport>,
    pipeline: MediaPipeline,
    ssrcs: Arc<SsrcVerzeichnis>,
    events: mpsc::Sender<VoiceEvent>,
    /// Beim Start reservierter Platz fuer `SessionClosed`
    schluss_platz: Mutex<Option<mpsc::OwnedPermit<VoiceEvent>>>,

    zustand: RwLock<SessionState>,
    session: Mutex<Option<VoiceSession>>,
    encoder: Mutex<Box<dyn VoiceCodec>>,
    spricht: AtomicBool,
    /// Naechstes Paket traegt SPEAKING_START
    start_markieren: AtomicBool,

    queues: Vec<Arc<MediaQueue<Vec<u8>>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    geschlossen: AtomicBool,
    /// Serialisiert `schliessen`: der zweite Aufrufer kehrt erst zurueck,
    /// wenn der erste fertig ist
    schliessen_sperre: tokio::sync::Mutex<()>,
    beendet: watch::Sender<bool>,
    /// Hoechste Epoch, fuer die bereits ein Resync angefordert wurde
    resync_gemeldet: AtomicU32,
    stats: SessionStats,
}

impl Inner {
    async fn melden(&self, event: VoiceEvent) {
        if self.events.send(event).await.is_err() {
            tracing::trace!("Ereignis-Empfaenger geschlossen");
        }
    }

    /// Meldet ohne zu warten. Bei vollem Kanal geht das Ereignis verloren
    /// und wird gezaehlt.
    fn melden_sofort(&self, event: VoiceEvent) -> bool {
        match self.events.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.stats.ereignis_verworfen();
                tracing::trace!("Ereignis-Kanal voll, Ereignis verworfen");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::trace!("Ereignis-Empfaenger geschlossen");
                false
            }
        }
    }

    fn zustand(&self) -> SessionState {
        *self.zustand.read()
    }

    fn pruefen_offen(&self) -> VoiceResult<()> {
        if self.geschlossen.load(Ordering::Acquire) {
            return Err(VoiceError::Geschlossen);
        }
        Ok(())
    }

    /// Beendet die Session genau einmal
    ///
    /// Schluesselmaterial wird geloescht, bevor das Ereignis rausgeht.
    async fn schliessen(&self, grund: CloseReason) {
        let _sperre = self.schliessen_sperre.lock().await;
        if self.geschlossen.swap(true, Ordering::AcqRel) {
            return;
        }
        self.ratchet.erase_all();
        *self.session.lock() = None;
        self.ssrcs.leeren();
        for queue in &self.queues {
            queue.schliessen();
        }

        let alt = std::mem::replace(&mut *self.zustand.write(), SessionState::Closed);
        if alt != SessionState::Closed {
            self.melden_sofort(VoiceEvent::StateChanged {
                alt,
                neu: SessionState::Closed,
            });
        }

        let stats = self.stats.snapshot();
        tracing::info!(
            grund = %grund,
            gesendet = stats.gesendet,
            empfangen = stats.empfangen,
            verworfen = stats.verworfen(),
            "Voice-Session geschlossen"
        );
        let schluss = VoiceEvent::SessionClosed(grund);
        let platz = self.schluss_platz.lock().take();
        match platz {
            Some(platz) => {
                platz.send(schluss);
            }
            None => {
                self.melden_sofort(schluss);
            }
        }
        self.beendet.send_replace(true);

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            task.abort();
        }
    }

    /// Verworfenes Paket: zaehlen, melden, ggf. Resync anfordern
    fn verwerfen(&self, fehler: &VoiceError, ssrc: Option<Ssrc>) {
        let diagnose = fehler.diagnostic(ssrc);
        self.stats.verworfen(diagnose.kind);
        if fehler.ist_paket_lokal() {
            tracing::debug!(ssrc = ?ssrc, art = ?diagnose.kind, fehler = %fehler, "Paket verworfen");
        } else {
            tracing::warn!(ssrc = ?ssrc, art = ?diagnose.kind, fehler = %fehler, "Paket verworfen");
        }
        self.melden_sofort(VoiceEvent::Diagnostic(diagnose));

        // Eine Epoch juenger als die aktuelle: Key-Package verpasst
        if let VoiceError::Crypto(CryptoError::UnknownEpoch(epoch)) = fehler {
            let juenger = self.ratchet.current_epoch().map_or(true, |c| *epoch > c);
            if !juenger {
                return;
            }
            let vorher = self.resync_gemeldet.fetch_max(epoch.inner(), Ordering::AcqRel);
            if vorher < epoch.inner() {
                tracing::warn!(epoch = %epoch, "Pakete fuer unbekannte Epoch, Resync angefordert");
                if !self.melden_sofort(VoiceEvent::ResyncRequested { epoch: *epoch }) {
                    // Nicht zugestellt: beim naechsten Paket erneut versuchen
                    let _ = self.resync_gemeldet.compare_exchange(
                        epoch.inner(),
                        vorher,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    );
                }
            }
        }
    }

    /// Session vom Server verworfen: Media stoppen, Resync-Sperre loesen
    ///
    /// Nach dem neuen Handshake beginnt die Epoch-Zaehlung von vorn.
    fn session_invalidieren(&self) {
        *self.session.lock() = None;
        self.ssrcs.leeren();
        self.spricht.store(false, Ordering::Release);
        self.resync_gemeldet.store(0, Ordering::Release);
    }

    fn media_einreihen(&self, datagramm: Vec<u8>) {
        let aktiv = self.session.lock().is_some();
        if !aktiv {
            tracing::trace!("Media-Datagramm vor Ready verworfen");
            return;
        }
        let ssrc = match self.pipeline.vorpruefen(&datagramm) {
            Ok(ssrc) => ssrc,
            Err(e) => {
                self.verwerfen(&e, None);
                return;
            }
        };
        let shard = ssrc as usize % self.queues.len();
        if self.queues[shard].einreihen(datagramm).is_some() {
            self.stats.verworfen(DiagnosticKind::QueueOverflow);
            tracing::debug!(ssrc, "Decode-Queue voll, aeltestes Paket verworfen");
            self.melden_sofort(VoiceEvent::Diagnostic(Diagnostic::neu(
                DiagnosticKind::QueueOverflow,
                Some(ssrc),
                "Decode-Queue voll",
            )));
        }
    }

    fn sprech_flags(&self) -> u16 {
        if self.start_markieren.swap(false, Ordering::AcqRel) {
            MediaFlags::SPEAKING_START
        } else {
            0
        }
    }

    /// Versiegelt und sendet ein Paket der eigenen Session
    async fn paket_senden(&self, packet_type: PacketType, flags: u16, codec_daten: &[u8]) -> VoiceResult<()> {
        let datagramm = {
            let mut guard = self.session.lock();
            let session = guard
                .as_mut()
                .ok_or_else(|| VoiceError::NichtBereit(self.zustand()))?;
            self.pipeline
                .versiegeln(session, packet_type, flags, codec_daten)?
        };
        self.transport.send(&datagramm).await?;
        self.stats.gesendet();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// TransportCoordinator
// ---------------------------------------------------------------------------

/// Eine Voice-Verbindung aus Sicht des Konsumenten
pub struct TransportCoordinator {
    inner: Arc<Inner>,
    signaling: SignalingHandle,
}

impl TransportCoordinator {
    /// Startet Signaling, Empfang und Decode-Worker
    ///
    /// Muss innerhalb einer tokio-Runtime aufgerufen werden.
    pub fn starten<T, C>(
        parameter: SessionParameter,
        config: VoxwireConfig,
        transport: T,
        connector: C,
        codec_factory: Arc<dyn CodecFactory>,
    ) -> VoiceResult<(Self, mpsc::Receiver<VoiceEvent>)>
    where
        T: DatagramTransport,
        C: ControlConnector,
    {
        config.validieren()?;

        let ratchet = Arc::new(KeyRatchetManager::aus_config(
            parameter.user_id,
            &config.encryption,
        ));
        let ssrcs = Arc::new(SsrcVerzeichnis::neu());
        let pipeline = MediaPipeline::neu(
            Arc::clone(&ratchet),
            Arc::clone(&ssrcs),
            config.media.max_payload_size,
        );
        let encoder = codec_factory.encoder()?;

        let (events_tx, events_rx) = mpsc::channel(EVENT_KANAL);
        let schluss_platz = events_tx.clone().try_reserve_owned().ok();
        let (signal_tx, signal_rx) = mpsc::channel(64);
        let (driver, signaling) = SignalingDriver::new(
            connector,
            parameter.clone(),
            &config,
            Arc::clone(&ratchet),
            signal_tx,
        );

        let queues = (0..config.media.decode_workers)
            .map(|_| Arc::new(MediaQueue::neu(config.media.max_inflight_decodes)))
            .collect::<Vec<_>>();

        let inner = Arc::new(Inner {
            parameter,
            config,
            ratchet,
            transport: Arc::new(transport),
            pipeline,
            ssrcs,
            events: events_tx,
            schluss_platz: Mutex::new(schluss_platz),
            zustand: RwLock::new(SessionState::Disconnected),
            session: Mutex::new(None),
            encoder: Mutex::new(encoder),
            spricht: AtomicBool::new(false),
            start_markieren: AtomicBool::new(false),
            queues,
            tasks: Mutex::new(Vec::new()),
            geschlossen: AtomicBool::new(false),
            schliessen_sperre: tokio::sync::Mutex::new(()),
            beendet: watch::channel(false).0,
            resync_gemeldet: AtomicU32::new(0),
            stats: SessionStats::default(),
        });

        let span = voxwire_observability::session_span(&inner.parameter);
        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(driver.run().instrument(span.clone())));
        tasks.push(tokio::spawn(
            signaling_bruecke(Arc::clone(&inner), signal_rx, signaling.clone())
                .instrument(span.clone()),
        ));
        tasks.push(tokio::spawn(
            empfangen(Arc::clone(&inner), signaling.clone()).instrument(span.clone()),
        ));
        for queue in &inner.queues {
            tasks.push(tokio::spawn(
                dekodieren(
                    Arc::clone(&inner),
                    Arc::clone(queue),
                    Arc::clone(&codec_factory),
                )
                .instrument(span.clone()),
            ));
        }
        inner.tasks.lock().extend(tasks);

        tracing::info!(
            parent: &span,
            endpoint = %inner.parameter.endpoint,
            user_id = %inner.parameter.user_id,
            decode_workers = inner.queues.len(),
            "Voice-Session gestartet"
        );

        Ok((Self { inner, signaling }, events_rx))
    }

    /// Kodiert, verschluesselt und sendet einen PCM-Frame
    pub async fn send_pcm(&self, pcm: &[i16]) -> VoiceResult<()> {
        self.inner.pruefen_offen()?;
        let zustand = self.inner.zustand();
        if !zustand.media_erlaubt() {
            return Err(VoiceError::NichtBereit(zustand));
        }
        let codec_daten = self.inner.encoder.lock().encode(pcm)?;
        let flags = self.inner.sprech_flags();
        self.inner
            .paket_senden(PacketType::Audio, flags, &codec_daten)
            .await
    }

    /// Sprechstatus setzen
    ///
    /// Meldet den Status per Signaling. Beim Verstummen geht zusaetzlich ein
    /// Stille-Paket mit `SPEAKING_STOP` raus, falls eine Epoch aktiv ist.
    pub async fn set_speaking(&self, speaking: bool) -> VoiceResult<()> {
        self.inner.pruefen_offen()?;
        let ssrc = self
            .inner
            .session
            .lock()
            .as_ref()
            .map(|s| s.ssrc)
            .ok_or_else(|| VoiceError::NichtBereit(self.inner.zustand()))?;

        if self.inner.spricht.swap(speaking, Ordering::AcqRel) == speaking {
            return Ok(());
        }

        self.signaling
            .senden(SignalingMessage::Speaking(SpeakingPayload {
                ssrc,
                user_id: Some(self.inner.parameter.user_id),
                speaking,
            }))
            .await?;

        if speaking {
            self.inner.start_markieren.store(true, Ordering::Release);
        } else if self.inner.ratchet.current_epoch().is_some() {
            self.inner.start_markieren.store(false, Ordering::Release);
            self.inner
                .paket_senden(PacketType::Silence, MediaFlags::SPEAKING_STOP, &[])
                .await?;
        }
        Ok(())
    }

    /// Beendet die Session
    ///
    /// Schluesselmaterial ist geloescht und alle Tasks (Heartbeat, Resume,
    /// Empfang) sind abgebrochen, wenn der Aufruf zurueckkehrt. Liefert
    /// genau ein `SessionClosed`; weitere Aufrufe sind wirkungslos.
    pub async fn disconnect(&self, grund: CloseReason) {
        let mut beendet = self.inner.beendet.subscribe();
        self.signaling.beenden(grund.clone());
        // Driver sendet Close und meldet Geschlossen ueber die Bruecke
        if tokio::time::timeout(ABSCHLUSS_TIMEOUT, beendet.wait_for(|b| *b))
            .await
            .is_err()
        {
            tracing::debug!("Signaling hat nicht rechtzeitig geschlossen");
        }
        self.inner.schliessen(grund).await;
    }

    pub fn state(&self) -> SessionState {
        self.inner.zustand()
    }

    /// Kopie der aktuellen Session (None vor Ready und nach dem Ende)
    pub fn session(&self) -> Option<VoiceSession> {
        self.inner.session.lock().clone()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Oeffentlicher X25519-Schluessel dieser Session
    pub fn key_exchange_key(&self) -> [u8; 32] {
        self.inner.ratchet.public_key_bytes()
    }
}

impl Drop for TransportCoordinator {
    fn drop(&mut self) {
        if !self.inner.geschlossen.load(Ordering::Acquire) {
            tracing::debug!("Koordinator ohne disconnect verworfen, Schluessel werden geloescht");
            self.inner.ratchet.erase_all();
            for task in self.inner.tasks.lock().drain(..) {
                task.abort();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

async fn signaling_bruecke(
    inner: Arc<Inner>,
    mut rx: mpsc::Receiver<SignalingEvent>,
    handle: SignalingHandle,
) {
    while let Some(event) = rx.recv().await {
        match event {
            SignalingEvent::Zustand { alt, neu } => {
                *inner.zustand.write() = neu;
                inner.melden(VoiceEvent::StateChanged { alt, neu }).await;
            }

            SignalingEvent::Ready(ready) => {
                if let Err(e) = inner.transport.media_endpoint(&ready.ip, ready.port).await {
                    tracing::error!(fehler = %e, ip = %ready.ip, port = ready.port, "Media-Endpunkt nicht erreichbar");
                    inner
                        .schliessen(CloseReason::SessionLost(format!("Media-Endpunkt: {e}")))
                        .await;
                    break;
                }

                let session = VoiceSession::neu(
                    &inner.parameter,
                    ready.ssrc,
                    ready.ip.clone(),
                    ready.port,
                    inner.config.media.samples_pro_frame(),
                );
                *inner.session.lock() = Some(session);
                inner.ssrcs.eintragen(ready.ssrc, inner.parameter.user_id);

                let mode = inner.config.encryption.cipher.mode();
                if !ready.modes.is_empty() && !ready.modes.iter().any(|m| m == mode) {
                    tracing::warn!(mode, angeboten = ?ready.modes, "Modus vom Server nicht angeboten");
                }
                let select = SignalingMessage::SelectProtocol(SelectProtocolPayload {
                    address: ready.ip,
                    port: ready.port,
                    mode: mode.to_string(),
                });
                if let Err(e) = handle.senden(select).await {
                    tracing::warn!(fehler = %e, "SelectProtocol nicht gesendet");
                }
                inner.melden(VoiceEvent::Ready { ssrc: ready.ssrc }).await;
            }

            SignalingEvent::SessionDescription { mode } => {
                tracing::debug!(mode = %mode, "Session-Beschreibung erhalten");
            }

            SignalingEvent::EpochAktiv(epoch) => {
                inner.melden(VoiceEvent::EpochChanged { epoch }).await;
            }

            SignalingEvent::EpochBestaetigt(epoch) => {
                tracing::debug!(epoch = %epoch, "Epoch-Wechsel bestaetigt");
            }

            SignalingEvent::Speaking(p) => match p.user_id {
                Some(user_id) => {
                    inner.ssrcs.eintragen(p.ssrc, user_id);
                    inner
                        .melden(VoiceEvent::SpeakingUpdate {
                            ssrc: p.ssrc,
                            user_id,
                            speaking: p.speaking,
                        })
                        .await;
                }
                None => tracing::debug!(ssrc = p.ssrc, "Speaking ohne user_id ignoriert"),
            },

            SignalingEvent::ClientConnect(ids) => {
                tracing::debug!(anzahl = ids.len(), "Teilnehmer verbunden");
            }

            SignalingEvent::ClientDisconnect(user_id) => {
                let entfernt = inner.ssrcs.teilnehmer_entfernen(user_id);
                tracing::debug!(user_id = %user_id, ssrcs = entfernt, "Teilnehmer getrennt");
            }

            SignalingEvent::Diagnostic(d) => inner.melden(VoiceEvent::Diagnostic(d)).await,

            SignalingEvent::ResyncRequested(epoch) => {
                inner.melden(VoiceEvent::ResyncRequested { epoch }).await;
            }

            SignalingEvent::SessionInvalidiert(grund) => {
                tracing::info!(grund = %grund, "Session invalidiert, Media gestoppt");
                inner.session_invalidieren();
            }

            SignalingEvent::Geschlossen(grund) => {
                inner.schliessen(grund).await;
                break;
            }
        }
    }

    // Driver ohne Geschlossen beendet (z.B. abgebrochen)
    inner
        .schliessen(CloseReason::SessionLost("Signaling beendet".into()))
        .await;
}

async fn empfangen(inner: Arc<Inner>, handle: SignalingHandle) {
    loop {
        let datagramm = match inner.transport.recv().await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                tracing::info!("Datagramm-Transport geschlossen");
                break;
            }
            Err(e) => {
                tracing::warn!(fehler = %e, "Datagramm-Empfangsfehler");
                // Kurze Pause gegen Busy-Loop bei persistentem Fehler
                tokio::time::sleep(std::time::Duration::from_millis(1)).await;
                continue;
            }
        };
        inner.stats.empfangen();

        match datagram::classify(&datagramm) {
            Ok(DatagramKind::Media) => inner.media_einreihen(datagramm),
            Ok(DatagramKind::Control) => match datagram::decode_control(&datagramm) {
                Ok(frame) => {
                    if let Err(e) = handle.frame_einspeisen(frame) {
                        tracing::warn!(fehler = %e, "Control-Datagramm nicht zugestellt");
                    }
                }
                Err(e) => inner.verwerfen(&e.into(), None),
            },
            Err(e) => inner.verwerfen(&e.into(), None),
        }
    }
}

async fn dekodieren(
    inner: Arc<Inner>,
    queue: Arc<MediaQueue<Vec<u8>>>,
    factory: Arc<dyn CodecFactory>,
) {
    let mut decoder = DecoderSatz::neu(factory);
    while let Some(datagramm) = queue.entnehmen().await {
        let paket = match inner.pipeline.oeffnen(&datagramm) {
            Ok(p) => p,
            Err(e) => {
                let ssrc = inner.pipeline.vorpruefen(&datagramm).ok();
                inner.verwerfen(&e, ssrc);
                continue;
            }
        };

        if paket.packet_type == PacketType::Silence {
            tracing::trace!(ssrc = paket.ssrc, "Stille-Paket");
            continue;
        }

        if decoder.anzahl() > inner.ssrcs.anzahl() {
            decoder.aufraeumen(&inner.ssrcs);
        }

        match decoder.dekodieren(paket.ssrc, &paket.payload) {
            Ok(pcm) => {
                inner.stats.dekodiert();
                inner.melden_sofort(VoiceEvent::AudioReceived {
                    ssrc: paket.ssrc,
                    user_id: Some(paket.user_id),
                    sequence: paket.sequence,
                    pcm,
                });
            }
            Err(e) => inner.verwerfen(&e, Some(paket.ssrc)),
        }
    }
    tracing::debug!("Decode-Worker beendet");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
