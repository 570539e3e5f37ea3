//! voxwire-voice - Transport-Koordinator
//!
//! Buendelt Signaling, Key Ratchet, Frame-Layout und Codec zu einer
//! Voice-Session mit einer Ereignis-Schnittstelle.
//!
//! ## Module
//! - [`coordinator`] - `TransportCoordinator` (Einstiegspunkt)
//! - [`pipeline`] - Versiegeln/Oeffnen von Media-Paketen, Decoder pro SSRC
//! - [`queue`] - Begrenzte Decode-Queue (Drop-Oldest)
//! - [`session`] - `VoiceSession` und SSRC-Verzeichnis
//! - [`transport`] - Datagramm-Transport (UDP, Loopback)
//! - [`stats`] - Zaehler pro Session

pub mod coordinator;
pub mod error;
pub mod pipeline;
pub mod queue;
pub mod session;
pub mod stats;
pub mod transport;

pub use coordinator::TransportCoordinator;
pub use error::{VoiceError, VoiceResult};
pub use pipeline::{DecoderSatz, EmpfangenesPaket, MediaPipeline};
pub use queue::{MediaQueue, QueueStatistik};
pub use session::{SsrcVerzeichnis, VoiceSession};
pub use stats::{SessionStats, StatsSnapshot};
pub use transport::{DatagramTransport, LoopbackTransport, UdpTransport};
