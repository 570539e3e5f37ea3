//! # voxwire-observability
//!
//! Structured Logging via tracing-subscriber (Text oder JSON) und der
//! Span, unter dem eine Voice-Session ihre Logs schreibt.

pub mod logging;

pub use logging::{
    log_format_gueltig, log_level_gueltig, logging_aus_config, logging_initialisieren, session_span,
};
