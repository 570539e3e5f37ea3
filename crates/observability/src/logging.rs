//! Structured Logging Setup via tracing-subscriber
//!
//! Konfigurierbar per Umgebungsvariable (hat Vorrang vor der Config-Datei):
//! - `VW_LOG_LEVEL`: Log-Level oder EnvFilter-Direktive, Standard: info
//! - `VW_LOG_FORMAT`: Format (text/json), Standard: text
//!
//! Session-Kontext (user_id, server_id, session_id) wird als Span-Feld
//! propagiert. Das Session-Token taucht nie in Logs auf.

use tracing_subscriber::{fmt, EnvFilter};
use voxwire_core::config::LoggingEinstellungen;
use voxwire_core::types::SessionParameter;

const ENV_LEVEL: &str = "VW_LOG_LEVEL";
const ENV_FORMAT: &str = "VW_LOG_FORMAT";

/// Initialisiert das Logging-System.
///
/// Liest `VW_LOG_LEVEL` und `VW_LOG_FORMAT` aus der Umgebung.
/// Faellt auf `level` / `format` zurueck falls nicht gesetzt. Ist bereits ein
/// globaler Subscriber gesetzt (Tests, einbettende Anwendung), bleibt dieser
/// aktiv und es wird `false` geliefert.
pub fn logging_initialisieren(level: &str, format: &str) -> bool {
    let filter = EnvFilter::try_from_env(ENV_LEVEL)
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let format = format_waehlen(std::env::var(ENV_FORMAT).ok(), format);

    let ergebnis = match format {
        "json" => fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .with_current_span(true)
            .try_init(),
        _ => fmt().with_env_filter(filter).with_target(true).try_init(),
    };

    match ergebnis {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!(fehler = %e, "Logging bereits initialisiert");
            false
        }
    }
}

/// Wie `logging_initialisieren`, mit den Werten aus `[logging]`
pub fn logging_aus_config(einstellungen: &LoggingEinstellungen) -> bool {
    logging_initialisieren(&einstellungen.level, &einstellungen.format)
}

/// Span fuer alle Logs einer Voice-Session
pub fn session_span(parameter: &SessionParameter) -> tracing::Span {
    tracing::info_span!(
        "voice_session",
        user_id = %parameter.user_id,
        server_id = %parameter.server_id,
        session_id = %parameter.session_id,
    )
}

/// Umgebung vor Config; Unbekanntes wird zu "text"
fn format_waehlen(env: Option<String>, config: &str) -> &'static str {
    let gewaehlt = env.as_deref().unwrap_or(config);
    if gewaehlt == "json" {
        "json"
    } else {
        "text"
    }
}

/// Validiert ob ein Log-Level-String gueltig ist.
pub fn log_level_gueltig(level: &str) -> bool {
    matches!(level, "trace" | "debug" | "info" | "warn" | "error")
}

/// Validiert ob ein Log-Format-String gueltig ist.
pub fn log_format_gueltig(format: &str) -> bool {
    matches!(format, "text" | "json")
}
