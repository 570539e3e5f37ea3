//! AEAD fuer Voice-Frames
//!
//! Versiegelt die Codec-Nutzdaten eines Frames. Header und Extension sind
//! Associated Data: sie werden vom Tag abgedeckt, aber nicht verschluesselt.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Key, Nonce as AesNonce,
};
use chacha20poly1305::{ChaCha20Poly1305, Key as ChaChaKey, Nonce as ChaChaNonce};

use crate::error::{CryptoError, CryptoResult};
use crate::types::{CipherSuite, NONCE_LAENGE, SCHLUESSEL_LAENGE};

/// Laenge des angehaengten Auth-Tags
pub const TAG_LAENGE: usize = 16;

/// Verschluesselt `plaintext`; Ergebnis ist Ciphertext + Tag
pub fn seal(
    cipher: CipherSuite,
    key: &[u8],
    nonce: &[u8; NONCE_LAENGE],
    plaintext: &[u8],
    aad: &[u8],
) -> CryptoResult<Vec<u8>> {
    pruefe_schluessel(key)?;
    let payload = Payload { msg: plaintext, aad };

    match cipher {
        CipherSuite::Aes256Gcm => Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key))
            .encrypt(AesNonce::from_slice(nonce), payload),
        CipherSuite::ChaCha20Poly1305 => ChaCha20Poly1305::new(ChaChaKey::from_slice(key))
            .encrypt(ChaChaNonce::from_slice(nonce), payload),
    }
    .map_err(|e| CryptoError::EncryptionFailure(e.to_string()))
}

/// Entschluesselt Ciphertext + Tag
///
/// Gibt `None` zurueck wenn der Tag nicht verifiziert; der Aufrufer
/// ordnet Sender und Epoch zu.
pub fn open(
    cipher: CipherSuite,
    key: &[u8],
    nonce: &[u8; NONCE_LAENGE],
    sealed: &[u8],
    aad: &[u8],
) -> CryptoResult<Option<Vec<u8>>> {
    pruefe_schluessel(key)?;
    if sealed.len() < TAG_LAENGE {
        return Ok(None);
    }
    let payload = Payload { msg: sealed, aad };

    let ergebnis = match cipher {
        CipherSuite::Aes256Gcm => Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key))
            .decrypt(AesNonce::from_slice(nonce), payload),
        CipherSuite::ChaCha20Poly1305 => ChaCha20Poly1305::new(ChaChaKey::from_slice(key))
            .decrypt(ChaChaNonce::from_slice(nonce), payload),
    };
    Ok(ergebnis.ok())
}

fn pruefe_schluessel(key: &[u8]) -> CryptoResult<()> {
    if key.len() != SCHLUESSEL_LAENGE {
        return Err(CryptoError::UngueltigeSchluesselLaenge {
            erwartet: SCHLUESSEL_LAENGE,
            erhalten: key.len(),
        });
    }
    Ok(())
}
