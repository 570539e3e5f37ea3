//! voxwire-core – Gemeinsame Typen, Ereignisse, Konfiguration und Fehlertypen
//!
//! Dieses Crate stellt die fundamentalen Bausteine bereit, die von allen
//! anderen voxwire-Crates gemeinsam genutzt werden.

pub mod config;
pub mod error;
pub mod event;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use config::{CipherSuite, VoxwireConfig};
pub use error::{Result, VoxwireError};
pub use event::{CloseReason, Diagnostic, DiagnosticKind, VoiceEvent};
pub use types::{EpochId, SessionParameter, SessionState, SessionToken, Ssrc, UserId};
