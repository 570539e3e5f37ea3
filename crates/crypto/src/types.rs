//! Gemeinsame Typen fuer das Kryptografie-Subsystem

use zeroize::{Zeroize, ZeroizeOnDrop};

pub use voxwire_core::config::CipherSuite;

/// Laenge aller symmetrischen Schluessel (AES-256 / ChaCha20)
pub const SCHLUESSEL_LAENGE: usize = 32;

/// Laenge der AEAD-Nonce
pub const NONCE_LAENGE: usize = 12;

/// Sicherer Schluessel-Container (wird beim Drop und bei `erase` genullt)
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretBytes(Vec<u8>);

impl std::fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretBytes([REDACTED] {} bytes)", self.0.len())
    }
}

impl SecretBytes {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Frisches Zufallsgeheimnis
    pub fn zufaellig(len: usize) -> Self {
        use rand::RngCore;
        let mut bytes = vec![0u8; len];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Ueberschreibt den Inhalt mit Nullen und leert den Puffer
    pub fn erase(&mut self) {
        self.0.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_zeigt_keinen_inhalt() {
        let s = SecretBytes::new(vec![0x42; 32]);
        let text = format!("{s:?}");
        assert!(text.contains("REDACTED"));
        assert!(!text.contains("42"));
    }

    #[test]
    fn erase_leert_den_puffer() {
        let mut s = SecretBytes::zufaellig(32);
        assert_eq!(s.len(), 32);
        s.erase();
        assert!(s.is_empty());
    }
}
