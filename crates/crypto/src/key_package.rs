//! Key-Exchange-Artefakte fuer neue Epochs
//!
//! Jede Session besitzt ein statisches X25519-Schluesselpaar. Der
//! oeffentliche Teil geht mit Identify an den Server; das Basis-Geheimnis
//! einer Epoch kommt verpackt im Key-Package zurueck.
//!
//! ## Verpackung (ECIES-aehnlich)
//! 1. Ephemeres X25519-Schluesselpaar generieren
//! 2. DH mit dem Empfaenger-Public-Key
//! 3. HKDF-SHA256 -> Wrapping Key
//! 4. AES-256-GCM verschluesseln
//!
//! ```text
//! [ephemeral_public(32)] [nonce(12)] [ciphertext + tag(16)]
//! ```

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use x25519_dalek::{EphemeralSecret, PublicKey as X25519PublicKey, StaticSecret};

use voxwire_core::types::{EpochId, UserId};

use crate::error::{CryptoError, CryptoResult};
use crate::types::{SecretBytes, NONCE_LAENGE, SCHLUESSEL_LAENGE};

const WRAP_INFO: &[u8] = b"voxwire-key-wrap-v1";
const WRAP_HEADER: usize = 32 + NONCE_LAENGE;

/// HKDF-SHA256 Ableitung
pub fn hkdf_derive(ikm: &[u8], salt: &[u8], info: &[u8], len: usize) -> CryptoResult<Vec<u8>> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut okm = vec![0u8; len];
    hk.expand(info, &mut okm)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(okm)
}

/// Statisches X25519-Schluesselpaar einer Session
pub struct KeyExchangeIdentity {
    secret: StaticSecret,
    public: X25519PublicKey,
}

impl KeyExchangeIdentity {
    /// Erstellt ein frisches Schluesselpaar
    pub fn new() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = X25519PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Oeffentlicher Schluessel fuer Identify
    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.public.to_bytes()
    }

    /// Entpackt ein fuer diese Identitaet verpacktes Epoch-Geheimnis
    pub fn unwrap_epoch_secret(&self, wrapped: &[u8]) -> CryptoResult<SecretBytes> {
        if wrapped.len() < WRAP_HEADER + 16 {
            return Err(CryptoError::KeyExchange(format!(
                "Verpacktes Geheimnis zu kurz: {} Bytes",
                wrapped.len()
            )));
        }

        let mut ephemeral_bytes = [0u8; 32];
        ephemeral_bytes.copy_from_slice(&wrapped[0..32]);
        let nonce_bytes = &wrapped[32..WRAP_HEADER];
        let ciphertext = &wrapped[WRAP_HEADER..];

        let dh_output = self
            .secret
            .diffie_hellman(&X25519PublicKey::from(ephemeral_bytes));
        let wrapping_key = hkdf_derive(
            dh_output.as_bytes(),
            self.public.as_bytes(),
            WRAP_INFO,
            SCHLUESSEL_LAENGE,
        )?;

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&wrapping_key));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| CryptoError::KeyExchange("Key-Package nicht fuer uns".to_string()))?;

        if plaintext.len() != SCHLUESSEL_LAENGE {
            return Err(CryptoError::UngueltigeSchluesselLaenge {
                erwartet: SCHLUESSEL_LAENGE,
                erhalten: plaintext.len(),
            });
        }
        Ok(SecretBytes::new(plaintext))
    }
}

impl Default for KeyExchangeIdentity {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for KeyExchangeIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyExchangeIdentity")
            .field("public", &self.public.as_bytes())
            .finish_non_exhaustive()
    }
}

/// Dekodiertes Key-Package einer neuen Epoch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPackage {
    pub transition_id: u64,
    pub epoch: EpochId,
    pub members: Vec<UserId>,
    pub wrapped_secret: Vec<u8>,
}

impl KeyPackage {
    /// Baut ein Key-Package fuer einen Empfaenger (Verteiler-Seite)
    pub fn erstellen(
        transition_id: u64,
        epoch: EpochId,
        members: Vec<UserId>,
        secret: &SecretBytes,
        recipient_public_key: &[u8; 32],
    ) -> CryptoResult<Self> {
        Ok(Self {
            transition_id,
            epoch,
            members,
            wrapped_secret: wrap_epoch_secret(secret, recipient_public_key)?,
        })
    }
}

/// Verpackt ein Epoch-Geheimnis fuer einen Empfaenger (Verteiler-Seite)
pub fn wrap_epoch_secret(secret: &SecretBytes, recipient_public_key: &[u8; 32]) -> CryptoResult<Vec<u8>> {
    let ephemeral_secret = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_public = X25519PublicKey::from(&ephemeral_secret);

    let dh_output = ephemeral_secret.diffie_hellman(&X25519PublicKey::from(*recipient_public_key));
    let wrapping_key = hkdf_derive(
        dh_output.as_bytes(),
        recipient_public_key,
        WRAP_INFO,
        SCHLUESSEL_LAENGE,
    )?;

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&wrapping_key));
    let mut nonce_bytes = [0u8; NONCE_LAENGE];
    OsRng.fill_bytes(&mut nonce_bytes);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), secret.as_bytes())
        .map_err(|e| CryptoError::KeyExchange(e.to_string()))?;

    let mut out = Vec::with_capacity(WRAP_HEADER + ciphertext.len());
    out.extend_from_slice(ephemeral_public.as_bytes());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
