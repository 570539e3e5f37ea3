//! Fehlertypen fuer voxwire
//!
//! Zentraler Fehler-Enum fuer querschnittliche Fehlerzustaende.
//! Die Fach-Crates definieren eigene Fehler; der Voice-Crate sammelt sie.

use thiserror::Error;

/// Globaler Result-Alias fuer voxwire
pub type Result<T> = std::result::Result<T, VoxwireError>;

/// Querschnittliche Fehler (Konfiguration, Zeitlimits, Verbindungsende)
#[derive(Debug, Error)]
pub enum VoxwireError {
    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    #[error("Zeitlimit ueberschritten: {0}")]
    Zeitlimit(String),

    #[error("Verbindung getrennt: {0}")]
    Getrennt(String),

    #[error("Interner Fehler: {0}")]
    Intern(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl VoxwireError {
    /// Erstellt einen Konfigurationsfehler
    pub fn konfiguration(msg: impl Into<String>) -> Self {
        Self::Konfiguration(msg.into())
    }

    /// Erstellt einen internen Fehler aus einer beliebigen Nachricht
    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Intern(msg.into())
    }

    /// Gibt true zurueck wenn der Fehler wiederholbar sein koennte
    pub fn ist_wiederholbar(&self) -> bool {
        matches!(self, Self::Zeitlimit(_) | Self::Getrennt(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fehler_anzeige() {
        let e = VoxwireError::konfiguration("grace_window_ms = 0");
        assert_eq!(e.to_string(), "Konfigurationsfehler: grace_window_ms = 0");
    }

    #[test]
    fn wiederholbar_erkennung() {
        assert!(VoxwireError::Zeitlimit("ready".into()).ist_wiederholbar());
        assert!(!VoxwireError::intern("x").ist_wiederholbar());
    }
}
