//! Epochs und Mitglieder-Schluesselmaterial
//!
//! Eine Epoch wird nie veraendert, nur ersetzt. Einzige Ausnahme ist das
//! Loeschen: `erase` nullt Basis-Geheimnis und alle abgeleiteten
//! Mitglieder-Schluessel unter dem Lock der Epoch selbst. Wer danach noch
//! eine Referenz haelt, bekommt einen sauberen Fehler statt halber Daten.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use zeroize::{Zeroize, ZeroizeOnDrop};

use voxwire_core::types::{EpochId, UserId};

use crate::aead;
use crate::error::{CryptoError, CryptoResult};
use crate::key_package::hkdf_derive;
use crate::types::{CipherSuite, SecretBytes, NONCE_LAENGE, SCHLUESSEL_LAENGE};

const SENDER_INFO: &[u8] = b"voxwire-sender-v1";

/// Groesse des Replay-Fensters pro Sender
pub const REPLAY_FENSTER: u32 = 64;

// ---------------------------------------------------------------------------
// MemberKeyMaterial
// ---------------------------------------------------------------------------

/// Abgeleitete Schluessel eines Teilnehmers innerhalb einer Epoch
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MemberKeyMaterial {
    #[zeroize(skip)]
    user_id: UserId,
    key: [u8; SCHLUESSEL_LAENGE],
    nonce_base: [u8; NONCE_LAENGE],
}

impl MemberKeyMaterial {
    /// Deterministische Ableitung aus Basis-Geheimnis, Epoch und User-ID
    pub fn ableiten(basis: &SecretBytes, epoch: EpochId, user_id: UserId) -> CryptoResult<Self> {
        let mut info = Vec::with_capacity(SENDER_INFO.len() + 8);
        info.extend_from_slice(SENDER_INFO);
        info.extend_from_slice(&user_id.to_be_bytes());

        let mut okm = hkdf_derive(
            basis.as_bytes(),
            &epoch.inner().to_be_bytes(),
            &info,
            SCHLUESSEL_LAENGE + NONCE_LAENGE,
        )?;

        let mut key = [0u8; SCHLUESSEL_LAENGE];
        let mut nonce_base = [0u8; NONCE_LAENGE];
        key.copy_from_slice(&okm[..SCHLUESSEL_LAENGE]);
        nonce_base.copy_from_slice(&okm[SCHLUESSEL_LAENGE..]);
        okm.zeroize();

        Ok(Self {
            user_id,
            key,
            nonce_base,
        })
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Frame-Nonce: Nonce-Basis XOR Zaehler in den letzten 4 Bytes
    pub fn nonce(&self, counter: u32) -> [u8; NONCE_LAENGE] {
        let mut nonce = self.nonce_base;
        for (n, c) in nonce[NONCE_LAENGE - 4..].iter_mut().zip(counter.to_be_bytes()) {
            *n ^= c;
        }
        nonce
    }

    fn key(&self) -> &[u8] {
        &self.key
    }
}

impl std::fmt::Debug for MemberKeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemberKeyMaterial")
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// ReplayWindow
// ---------------------------------------------------------------------------

/// Gleitendes Replay-Fenster ueber die Zaehler eines Senders
///
/// Bit 0 der Bitmap steht fuer den hoechsten gesehenen Zaehler,
/// Bit n fuer `hoechster - n`.
#[derive(Debug, Clone, Default)]
pub struct ReplayWindow {
    hoechster: Option<u32>,
    bitmap: u64,
}

impl ReplayWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wurde `counter` noch nicht gesehen und liegt im Fenster?
    pub fn pruefen(&self, counter: u32) -> bool {
        let Some(hoechster) = self.hoechster else {
            return true;
        };
        if counter > hoechster {
            return true;
        }
        let offset = hoechster - counter;
        offset < REPLAY_FENSTER && self.bitmap & (1u64 << offset) == 0
    }

    /// Markiert `counter` als empfangen; `false` bei Replay
    pub fn akzeptieren(&mut self, counter: u32) -> bool {
        if !self.pruefen(counter) {
            return false;
        }
        match self.hoechster {
            Some(hoechster) if counter <= hoechster => {
                self.bitmap |= 1u64 << (hoechster - counter);
            }
            Some(hoechster) => {
                let vorschub = counter - hoechster;
                self.bitmap = if vorschub >= REPLAY_FENSTER {
                    0
                } else {
                    self.bitmap << vorschub
                };
                self.bitmap |= 1;
                self.hoechster = Some(counter);
            }
            None => {
                self.bitmap = 1;
                self.hoechster = Some(counter);
            }
        }
        true
    }

    pub fn hoechster(&self) -> Option<u32> {
        self.hoechster
    }
}

// ---------------------------------------------------------------------------
// Epoch
// ---------------------------------------------------------------------------

struct EpochSecrets {
    basis: SecretBytes,
    mitglieder: HashMap<UserId, MemberKeyMaterial>,
}

impl EpochSecrets {
    fn erase(&mut self) {
        for material in self.mitglieder.values_mut() {
            material.zeroize();
        }
        self.mitglieder.clear();
        self.basis.erase();
    }
}

/// Verschluesselter Frame-Inhalt plus Zaehler fuer die Nonce-Region
#[derive(Debug, Clone)]
pub struct SealedFrame {
    pub epoch: EpochId,
    pub counter: u32,
    pub ciphertext: Vec<u8>,
}

/// Eine Generation von Gruppenschluesseln
pub struct Epoch {
    id: EpochId,
    transition_id: u64,
    created_at: DateTime<Utc>,
    cipher: CipherSuite,
    secrets: RwLock<Option<EpochSecrets>>,
    replay: DashMap<UserId, ReplayWindow>,
    send_counters: DashMap<UserId, u32>,
}

impl Epoch {
    /// Leitet das Schluesselmaterial aller Mitglieder ab
    pub fn neu(
        id: EpochId,
        transition_id: u64,
        cipher: CipherSuite,
        basis: SecretBytes,
        mitglieder: &[UserId],
    ) -> CryptoResult<Self> {
        let mut material = HashMap::with_capacity(mitglieder.len());
        for &user_id in mitglieder {
            material.insert(user_id, MemberKeyMaterial::ableiten(&basis, id, user_id)?);
        }

        Ok(Self {
            id,
            transition_id,
            created_at: Utc::now(),
            cipher,
            secrets: RwLock::new(Some(EpochSecrets {
                basis,
                mitglieder: material,
            })),
            replay: DashMap::new(),
            send_counters: DashMap::new(),
        })
    }

    pub fn id(&self) -> EpochId {
        self.id
    }

    pub fn transition_id(&self) -> u64 {
        self.transition_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn cipher(&self) -> CipherSuite {
        self.cipher
    }

    pub fn ist_geloescht(&self) -> bool {
        self.secrets.read().is_none()
    }

    pub fn ist_mitglied(&self, user_id: UserId) -> bool {
        self.secrets
            .read()
            .as_ref()
            .is_some_and(|s| s.mitglieder.contains_key(&user_id))
    }

    pub fn mitglieder_anzahl(&self) -> usize {
        self.secrets.read().as_ref().map_or(0, |s| s.mitglieder.len())
    }

    /// Verschluesselt einen Frame als `sender`
    pub fn seal(&self, sender: UserId, aad: &[u8], plaintext: &[u8]) -> CryptoResult<SealedFrame> {
        let guard = self.secrets.read();
        let secrets = guard.as_ref().ok_or_else(|| {
            CryptoError::EncryptionFailure(format!("{} ist bereits geloescht", self.id))
        })?;
        let material = secrets
            .mitglieder
            .get(&sender)
            .ok_or(CryptoError::UnknownSender {
                sender,
                epoch: self.id,
            })?;

        let counter = {
            let mut zaehler = self.send_counters.entry(sender).or_insert(0);
            let counter = *zaehler;
            *zaehler = counter.checked_add(1).ok_or_else(|| {
                CryptoError::EncryptionFailure(format!(
                    "Nonce-Zaehler von {sender} in {} erschoepft",
                    self.id
                ))
            })?;
            counter
        };

        let ciphertext = aead::seal(
            self.cipher,
            material.key(),
            &material.nonce(counter),
            plaintext,
            aad,
        )?;

        Ok(SealedFrame {
            epoch: self.id,
            counter,
            ciphertext,
        })
    }

    /// Entschluesselt einen Frame von `sender`
    ///
    /// Der Replay-Check laeuft erst nach erfolgreicher Authentifizierung,
    /// damit gefaelschte Pakete das Fenster nicht verschieben.
    pub fn open(
        &self,
        sender: UserId,
        counter: u32,
        aad: &[u8],
        sealed: &[u8],
    ) -> CryptoResult<Vec<u8>> {
        let guard = self.secrets.read();
        let secrets = guard.as_ref().ok_or(CryptoError::UnknownEpoch(self.id))?;
        let material = secrets
            .mitglieder
            .get(&sender)
            .ok_or(CryptoError::UnknownSender {
                sender,
                epoch: self.id,
            })?;

        let plaintext = aead::open(
            self.cipher,
            material.key(),
            &material.nonce(counter),
            sealed,
            aad,
        )?
        .ok_or(CryptoError::AuthenticationFailure {
            sender,
            epoch: self.id,
        })?;

        if !self.replay.entry(sender).or_default().akzeptieren(counter) {
            return Err(CryptoError::ReplayDetected { sender, counter });
        }
        Ok(plaintext)
    }

    /// Nullt saemtliches Schluesselmaterial dieser Epoch
    pub fn erase(&self) {
        if let Some(mut secrets) = self.secrets.write().take() {
            secrets.erase();
        }
        self.replay.clear();
        self.send_counters.clear();
    }

    #[cfg(test)]
    fn zaehler_setzen(&self, sender: UserId, wert: u32) {
        self.send_counters.insert(sender, wert);
    }
}

impl std::fmt::Debug for Epoch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Epoch")
            .field("id", &self.id)
            .field("transition_id", &self.transition_id)
            .field("created_at", &self.created_at)
            .field("cipher", &self.cipher)
            .field("geloescht", &self.ist_geloescht())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: UserId = UserId(1);
    const BOB: UserId = UserId(2);

    fn test_epoch(cipher: CipherSuite) -> Epoch {
        Epoch::neu(
            EpochId(1),
            7,
            cipher,
            SecretBytes::new(vec![0x11; 32]),
            &[ALICE, BOB],
        )
        .unwrap()
    }

    #[test]
    fn ableitung_ist_deterministisch_und_pro_user_verschieden() {
        let basis = SecretBytes::new(vec![0x22; 32]);
        let a1 = MemberKeyMaterial::ableiten(&basis, EpochId(3), ALICE).unwrap();
        let a2 = MemberKeyMaterial::ableiten(&basis, EpochId(3), ALICE).unwrap();
        let b = MemberKeyMaterial::ableiten(&basis, EpochId(3), BOB).unwrap();
        let a_neu = MemberKeyMaterial::ableiten(&basis, EpochId(4), ALICE).unwrap();

        assert_eq!(a1.key(), a2.key());
        assert_ne!(a1.key(), b.key());
        assert_ne!(a1.key(), a_neu.key());
    }

    #[test]
    fn nonce_xor_zaehler() {
        let basis = SecretBytes::new(vec![0x33; 32]);
        let m = MemberKeyMaterial::ableiten(&basis, EpochId(1), ALICE).unwrap();
        assert_eq!(m.nonce(0), m.nonce_base);
        let n = m.nonce(0x0102_0304);
        assert_eq!(&n[..8], &m.nonce_base[..8]);
        assert_eq!(n[8], m.nonce_base[8] ^ 0x01);
        assert_eq!(n[11], m.nonce_base[11] ^ 0x04);
    }

    #[test]
    fn seal_open_roundtrip() {
        for cipher in [CipherSuite::Aes256Gcm, CipherSuite::ChaCha20Poly1305] {
            let epoch = test_epoch(cipher);
            let sealed = epoch.seal(ALICE, b"hdr", b"stimme").unwrap();
            assert_eq!(sealed.counter, 0);
            let klar = epoch.open(ALICE, sealed.counter, b"hdr", &sealed.ciphertext).unwrap();
            assert_eq!(klar, b"stimme");
        }
    }

    #[test]
    fn zaehler_steigt_pro_sender() {
        let epoch = test_epoch(CipherSuite::Aes256Gcm);
        assert_eq!(epoch.seal(ALICE, b"", b"a").unwrap().counter, 0);
        assert_eq!(epoch.seal(ALICE, b"", b"b").unwrap().counter, 1);
        assert_eq!(epoch.seal(BOB, b"", b"c").unwrap().counter, 0);
    }

    #[test]
    fn zaehler_erschoepft_ist_encryption_failure() {
        let epoch = test_epoch(CipherSuite::Aes256Gcm);
        epoch.zaehler_setzen(ALICE, u32::MAX);
        assert!(matches!(
            epoch.seal(ALICE, b"", b"x"),
            Err(CryptoError::EncryptionFailure(_))
        ));
    }

    #[test]
    fn falscher_sender_schlaegt_authentifizierung_fehl() {
        let epoch = test_epoch(CipherSuite::Aes256Gcm);
        let sealed = epoch.seal(ALICE, b"hdr", b"x").unwrap();
        assert!(matches!(
            epoch.open(BOB, sealed.counter, b"hdr", &sealed.ciphertext),
            Err(CryptoError::AuthenticationFailure { sender: BOB, .. })
        ));
    }

    #[test]
    fn unbekannter_sender() {
        let epoch = test_epoch(CipherSuite::Aes256Gcm);
        assert!(matches!(
            epoch.open(UserId(99), 0, b"", &[0u8; 20]),
            Err(CryptoError::UnknownSender { .. })
        ));
    }

    #[test]
    fn replay_wird_erkannt() {
        let epoch = test_epoch(CipherSuite::Aes256Gcm);
        let sealed = epoch.seal(ALICE, b"", b"x").unwrap();
        epoch.open(ALICE, sealed.counter, b"", &sealed.ciphertext).unwrap();
        assert!(matches!(
            epoch.open(ALICE, sealed.counter, b"", &sealed.ciphertext),
            Err(CryptoError::ReplayDetected { counter: 0, .. })
        ));
    }

    #[test]
    fn erase_macht_epoch_unbrauchbar() {
        let epoch = test_epoch(CipherSuite::Aes256Gcm);
        let sealed = epoch.seal(ALICE, b"", b"x").unwrap();
        epoch.erase();

        assert!(epoch.ist_geloescht());
        assert_eq!(epoch.mitglieder_anzahl(), 0);
        assert!(matches!(
            epoch.seal(ALICE, b"", b"x"),
            Err(CryptoError::EncryptionFailure(_))
        ));
        assert!(matches!(
            epoch.open(ALICE, sealed.counter, b"", &sealed.ciphertext),
            Err(CryptoError::UnknownEpoch(EpochId(1)))
        ));
    }

    // --- ReplayWindow ---

    #[test]
    fn fenster_akzeptiert_umsortierte_pakete() {
        let mut w = ReplayWindow::new();
        assert!(w.akzeptieren(5));
        assert!(w.akzeptieren(3));
        assert!(w.akzeptieren(4));
        assert!(!w.akzeptieren(4));
        assert!(w.akzeptieren(6));
        assert_eq!(w.hoechster(), Some(6));
    }

    #[test]
    fn fenster_verwirft_zu_alte_zaehler() {
        let mut w = ReplayWindow::new();
        assert!(w.akzeptieren(100));
        assert!(w.akzeptieren(37));
        assert!(!w.akzeptieren(36));
    }

    #[test]
    fn grosser_sprung_setzt_bitmap_zurueck() {
        let mut w = ReplayWindow::new();
        assert!(w.akzeptieren(1));
        assert!(w.akzeptieren(1000));
        assert!(!w.akzeptieren(1));
        assert!(w.akzeptieren(999));
        assert!(!w.akzeptieren(1000));
    }
}
