//! Session-Konfiguration
//!
//! Wird vom Host aus einer TOML-Datei geladen oder direkt per `Default`
//! erzeugt. Alle Felder haben dokumentierte Standardwerte, sodass eine
//! Session ohne Konfigurationsdatei lauffaehig ist.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VoxwireError};

/// Vollstaendige Konfiguration einer Voice-Session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoxwireConfig {
    /// Control-Kanal, Heartbeat, Resume
    pub signaling: SignalingEinstellungen,
    /// Epochs und Cipher
    pub encryption: EncryptionEinstellungen,
    /// Media-Pfad
    pub media: MediaEinstellungen,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
}

/// Signaling-Einstellungen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingEinstellungen {
    /// Relativer Jitter pro Heartbeat (0.05 = +-5 %)
    pub heartbeat_jitter: f64,
    /// Resume nach so vielen Intervallen ohne HeartbeatAck
    pub missed_ack_multiple: u32,
    /// Maximale Wartezeit auf Ready nach Identify
    pub ready_timeout_ms: u64,
    /// Maximale Wartezeit auf Resumed pro Versuch
    pub resume_timeout_ms: u64,
    /// Resume-Versuche bevor die Session als verloren gilt
    pub max_resume_attempts: u32,
    /// Maximale Frame-Groesse auf dem Control-Kanal
    pub max_frame_size: usize,
}

impl Default for SignalingEinstellungen {
    fn default() -> Self {
        Self {
            heartbeat_jitter: 0.05,
            missed_ack_multiple: 3,
            ready_timeout_ms: 10_000,
            resume_timeout_ms: 5_000,
            max_resume_attempts: 3,
            max_frame_size: 64 * 1024,
        }
    }
}

impl SignalingEinstellungen {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn resume_timeout(&self) -> Duration {
        Duration::from_millis(self.resume_timeout_ms)
    }
}

/// AEAD-Verfahren fuer Media-Frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CipherSuite {
    #[default]
    Aes256Gcm,
    ChaCha20Poly1305,
}

impl CipherSuite {
    /// Modus-Bezeichnung fuer SelectProtocol
    pub fn mode(&self) -> &'static str {
        match self {
            Self::Aes256Gcm => "aead_aes256_gcm",
            Self::ChaCha20Poly1305 => "aead_chacha20_poly1305",
        }
    }
}

/// Verschluesselungs-Einstellungen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionEinstellungen {
    /// AEAD-Verfahren
    pub cipher: CipherSuite,
    /// Vorherige Epoch bleibt nach dem Commit so lange entschluesselbar
    pub grace_window_ms: u64,
    /// Vorherige Epoch wird ohne Commit nach dieser Zeit verworfen
    pub transition_timeout_ms: u64,
    /// Gepufferte EpochTransition-Nachrichten ohne Key-Package
    pub max_pending_transitions: usize,
}

impl Default for EncryptionEinstellungen {
    fn default() -> Self {
        Self {
            cipher: CipherSuite::Aes256Gcm,
            grace_window_ms: 10_000,
            transition_timeout_ms: 30_000,
            max_pending_transitions: 8,
        }
    }
}

impl EncryptionEinstellungen {
    pub fn grace_window(&self) -> Duration {
        Duration::from_millis(self.grace_window_ms)
    }

    pub fn transition_timeout(&self) -> Duration {
        Duration::from_millis(self.transition_timeout_ms)
    }
}

/// Media-Einstellungen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaEinstellungen {
    /// Maximale Anzahl gepufferter Pakete vor dem Dekodieren
    pub max_inflight_decodes: usize,
    /// Anzahl Decode-Worker (explizit statt Prozessor-Erkennung)
    pub decode_workers: usize,
    /// Maximale Laenge der Codec-Nutzdaten pro Frame
    pub max_payload_size: usize,
    /// Abtastrate in Hz
    pub sample_rate: u32,
    /// Kanalanzahl (1 = Mono, 2 = Stereo)
    pub channels: u16,
    /// Frame-Dauer in Millisekunden
    pub frame_duration_ms: u32,
}

impl Default for MediaEinstellungen {
    fn default() -> Self {
        Self {
            max_inflight_decodes: 32,
            decode_workers: 1,
            max_payload_size: 1280,
            sample_rate: 48_000,
            channels: 2,
            frame_duration_ms: 20,
        }
    }
}

impl MediaEinstellungen {
    /// Samples pro Kanal und Frame (Zeitstempel-Schritt)
    pub fn samples_pro_frame(&self) -> u32 {
        self.sample_rate / 1000 * self.frame_duration_ms
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl VoxwireConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let config: Self = toml::from_str(&inhalt)
                    .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?;
                config.validieren()?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }

    /// Prueft die Werte auf Plausibilitaet
    pub fn validieren(&self) -> Result<()> {
        let s = &self.signaling;
        if !(0.0..0.5).contains(&s.heartbeat_jitter) {
            return Err(VoxwireError::konfiguration(format!(
                "signaling.heartbeat_jitter muss in [0.0, 0.5) liegen, war {}",
                s.heartbeat_jitter
            )));
        }
        if s.missed_ack_multiple == 0 {
            return Err(VoxwireError::konfiguration(
                "signaling.missed_ack_multiple darf nicht 0 sein",
            ));
        }
        if s.ready_timeout_ms == 0 || s.resume_timeout_ms == 0 {
            return Err(VoxwireError::konfiguration(
                "signaling.ready_timeout_ms und resume_timeout_ms muessen > 0 sein",
            ));
        }
        if self.encryption.transition_timeout_ms < self.encryption.grace_window_ms {
            return Err(VoxwireError::konfiguration(
                "encryption.transition_timeout_ms muss >= grace_window_ms sein",
            ));
        }
        let m = &self.media;
        if m.max_inflight_decodes == 0 || m.decode_workers == 0 {
            return Err(VoxwireError::konfiguration(
                "media.max_inflight_decodes und decode_workers muessen > 0 sein",
            ));
        }
        if !matches!(m.channels, 1 | 2) {
            return Err(VoxwireError::konfiguration(format!(
                "media.channels muss 1 oder 2 sein, war {}",
                m.channels
            )));
        }
        if m.samples_pro_frame() == 0 {
            return Err(VoxwireError::konfiguration(
                "media.sample_rate/frame_duration_ms ergeben 0 Samples pro Frame",
            ));
        }
        Ok(())
    }
}
