//! Fehlertypen fuer den Codec-Adapter

use thiserror::Error;

/// Stelle, an der ein Codec-Fehler aufgetreten ist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecSite {
    Encode,
    Decode,
}

impl std::fmt::Display for CodecSite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Encode => write!(f, "Encode"),
            Self::Decode => write!(f, "Decode"),
        }
    }
}

/// Fehler des Codec-Adapters
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Codec-Fehler beim {site}: {message} (Status {status})")]
    CodecFailure {
        site: CodecSite,
        status: i32,
        message: String,
    },

    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),
}

impl CodecError {
    pub fn encode(status: i32, message: impl Into<String>) -> Self {
        Self::CodecFailure {
            site: CodecSite::Encode,
            status,
            message: message.into(),
        }
    }

    pub fn decode(status: i32, message: impl Into<String>) -> Self {
        Self::CodecFailure {
            site: CodecSite::Decode,
            status,
            message: message.into(),
        }
    }

    pub fn site(&self) -> Option<CodecSite> {
        match self {
            Self::CodecFailure { site, .. } => Some(*site),
            Self::Konfiguration(_) => None,
        }
    }

    pub fn status(&self) -> Option<i32> {
        match self {
            Self::CodecFailure { status, .. } => Some(*status),
            Self::Konfiguration(_) => None,
        }
    }
}

pub type CodecResult<T> = Result<T, CodecError>;
