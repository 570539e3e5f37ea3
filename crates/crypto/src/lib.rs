//! # voxwire-crypto
//!
//! Gruppen-Verschluesselung fuer Voice-Frames.
//!
//! ## Module
//! - `ratchet` - Key Ratchet Manager (aktuelle + vorherige Epoch)
//! - `epoch` - Epochs, Mitglieder-Schluessel, Replay-Fenster
//! - `key_package` - X25519 Key-Packages und HKDF
//! - `aead` - AES-256-GCM / ChaCha20-Poly1305 ueber Voice-Daten
//! - `types` - Gemeinsame Typen (SecretBytes, CipherSuite)
//! - `error` - Fehlertypen

pub mod aead;
pub mod epoch;
pub mod error;
pub mod key_package;
pub mod ratchet;
pub mod types;

// Bequeme Re-Exports
pub use epoch::{Epoch, MemberKeyMaterial, ReplayWindow, SealedFrame};
pub use error::{CryptoError, CryptoResult};
pub use key_package::{hkdf_derive, wrap_epoch_secret, KeyExchangeIdentity, KeyPackage};
pub use ratchet::KeyRatchetManager;
pub use types::{CipherSuite, SecretBytes};
