//! voxwire-signaling – Control-Kanal einer Voice-Session
//!
//! Dieser Crate fuehrt den Handshake mit dem Voice-Server, haelt die
//! Session per Heartbeat am Leben, setzt sie nach Verbindungsabbruch per
//! Resume fort und reicht Key-Packages an den Key Ratchet Manager weiter.
//!
//! ## Architektur
//!
//! ```text
//! SignalingDriver (ein tokio-Task pro Session)
//!     |  Framed<Stream, SignalingCodec>
//!     |
//!     v
//! SignalingStateMachine (sans-IO)
//!     |  Disconnected -> Connecting -> Identifying -> AwaitingReady -> Ready <-> Resuming
//!     |
//!     +-- HeartbeatTracker (Intervall, Jitter, Ack-Ueberwachung)
//!     +-- KeyRatchetManager (begin/commit/erase)
//! ```

pub mod driver;
pub mod error;
pub mod heartbeat;
pub mod state;

// Bequeme Re-Exporte
pub use driver::{ControlConnector, SignalingDriver, SignalingEvent, SignalingHandle, TcpConnector};
pub use error::{SignalingError, SignalingResult};
pub use heartbeat::HeartbeatTracker;
pub use state::{Action, SignalingStateMachine, CLOSE_FEHLER, CLOSE_NORMAL};
