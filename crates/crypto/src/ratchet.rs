//! Key Ratchet Manager
//!
//! Haelt die aktuelle und (kurzzeitig) die vorherige Epoch einer Session.
//! Beide liegen in einem unveraenderlichen `EpochPair`, das bei jedem
//! Wechsel komplett ersetzt wird. Leser klonen nur den `Arc` und sehen
//! damit immer ein konsistentes Paar.
//!
//! Zweiphasiger Wechsel:
//! - `begin_transition`: neue Epoch wird aktuell, alte bleibt bis
//!   `transition_timeout` zum Entschluesseln erhalten
//! - `commit_transition`: Frist der alten Epoch wird auf `grace_window`
//!   verkuerzt
//!
//! Abgelaufene Epochs werden aktiv genullt, nicht nur fallengelassen.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;

use voxwire_core::config::EncryptionEinstellungen;
use voxwire_core::types::{EpochId, UserId};

use crate::epoch::{Epoch, SealedFrame};
use crate::error::{CryptoError, CryptoResult};
use crate::key_package::{KeyExchangeIdentity, KeyPackage};
use crate::types::CipherSuite;

#[derive(Default)]
struct EpochPair {
    current: Option<Arc<Epoch>>,
    previous: Option<(Arc<Epoch>, Instant)>,
    /// Zuletzt verworfene Epoch, fuer die Unterscheidung Unknown/Stale
    retired: Option<EpochId>,
}

impl EpochPair {
    fn previous_id(&self) -> Option<EpochId> {
        self.previous.as_ref().map(|(e, _)| e.id())
    }
}

/// Verwaltet die Epochs einer Voice-Session
pub struct KeyRatchetManager {
    local_user: UserId,
    identity: KeyExchangeIdentity,
    cipher: CipherSuite,
    grace_window: Duration,
    transition_timeout: Duration,
    pair: RwLock<Arc<EpochPair>>,
}

impl KeyRatchetManager {
    pub fn new(
        local_user: UserId,
        cipher: CipherSuite,
        grace_window: Duration,
        transition_timeout: Duration,
    ) -> Self {
        Self {
            local_user,
            identity: KeyExchangeIdentity::new(),
            cipher,
            grace_window,
            transition_timeout,
            pair: RwLock::new(Arc::new(EpochPair::default())),
        }
    }

    pub fn aus_config(local_user: UserId, config: &EncryptionEinstellungen) -> Self {
        Self::new(
            local_user,
            config.cipher,
            config.grace_window(),
            config.transition_timeout(),
        )
    }

    pub fn local_user(&self) -> UserId {
        self.local_user
    }

    /// Oeffentlicher X25519-Schluessel fuer Identify
    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.identity.public_key_bytes()
    }

    pub fn current_epoch(&self) -> Option<EpochId> {
        self.snapshot().current.as_ref().map(|e| e.id())
    }

    pub fn previous_epoch(&self) -> Option<EpochId> {
        self.snapshot().previous_id()
    }

    fn snapshot(&self) -> Arc<EpochPair> {
        Arc::clone(&self.pair.read())
    }

    /// Erste Phase eines Epoch-Wechsels
    ///
    /// Ohne aktuelle Epoch wird das Paket sofort aktiv. Ein doppelt
    /// zugestelltes Paket liefert die bereits aktive Epoch zurueck.
    pub fn begin_transition(&self, package: &KeyPackage) -> CryptoResult<Arc<Epoch>> {
        if let Some(current) = &self.snapshot().current {
            if package.epoch == current.id() && package.transition_id == current.transition_id() {
                tracing::debug!(epoch = %package.epoch, "Key-Package bereits angewendet");
                return Ok(Arc::clone(current));
            }
            if package.epoch <= current.id() {
                return Err(CryptoError::StaleEpochUsed {
                    epoch: package.epoch,
                    aktuell: current.id(),
                });
            }
        }

        let basis = self.identity.unwrap_epoch_secret(&package.wrapped_secret)?;
        if !package.members.contains(&self.local_user) {
            tracing::warn!(
                epoch = %package.epoch,
                user = %self.local_user,
                "Eigener User fehlt im Key-Package, Senden nicht moeglich"
            );
        }
        let neu = Arc::new(Epoch::neu(
            package.epoch,
            package.transition_id,
            self.cipher,
            basis,
            &package.members,
        )?);

        let verdraengt = {
            let mut guard = self.pair.write();
            let alt = Arc::clone(&guard);
            let deadline = Instant::now() + self.transition_timeout;
            // Nur eine vorherige Epoch: eine noch aktive Vorgaengerin faellt raus
            let verdraengt = alt.previous.as_ref().map(|(e, _)| Arc::clone(e));
            *guard = Arc::new(EpochPair {
                current: Some(Arc::clone(&neu)),
                previous: alt.current.as_ref().map(|e| (Arc::clone(e), deadline)),
                retired: verdraengt.as_ref().map(|e| e.id()).or(alt.retired),
            });
            verdraengt
        };

        if let Some(epoch) = verdraengt {
            epoch.erase();
            tracing::info!(epoch = %epoch.id(), "Vorherige Epoch vorzeitig geloescht");
        }

        tracing::info!(
            epoch = %neu.id(),
            transition_id = package.transition_id,
            mitglieder = package.members.len(),
            "Epoch-Wechsel begonnen"
        );
        Ok(neu)
    }

    /// Zweite Phase: verkuerzt die Frist der vorherigen Epoch auf das Grace-Window
    ///
    /// Scheitert mit `UnknownEpoch`, wenn `epoch` nicht die aktuelle ist.
    pub fn commit_transition(&self, epoch: EpochId) -> CryptoResult<()> {
        let mut guard = self.pair.write();
        let alt = Arc::clone(&guard);

        let current = alt.current.as_ref().ok_or(CryptoError::UnknownEpoch(epoch))?;
        if current.id() != epoch {
            return Err(CryptoError::UnknownEpoch(epoch));
        }

        let grenze = Instant::now() + self.grace_window;
        *guard = Arc::new(EpochPair {
            current: alt.current.clone(),
            previous: alt
                .previous
                .as_ref()
                .map(|(e, deadline)| (Arc::clone(e), (*deadline).min(grenze))),
            retired: alt.retired,
        });
        drop(guard);

        tracing::info!(epoch = %epoch, "Epoch-Wechsel bestaetigt");
        Ok(())
    }

    /// Verwirft und nullt eine abgelaufene vorherige Epoch
    ///
    /// Ohne faellige Epoch bleibt es beim Lese-Lock.
    pub fn retire_expired(&self) -> Option<EpochId> {
        let now = Instant::now();
        let faellig = matches!(&self.snapshot().previous, Some((_, deadline)) if now >= *deadline);
        if !faellig {
            return None;
        }

        let abgelaufen = {
            let mut guard = self.pair.write();
            let alt = Arc::clone(&guard);
            match &alt.previous {
                Some((epoch, deadline)) if now >= *deadline => {
                    *guard = Arc::new(EpochPair {
                        current: alt.current.clone(),
                        previous: None,
                        retired: Some(epoch.id()),
                    });
                    Some(Arc::clone(epoch))
                }
                _ => None,
            }
        }?;

        abgelaufen.erase();
        tracing::info!(epoch = %abgelaufen.id(), "Vorherige Epoch abgelaufen und geloescht");
        Some(abgelaufen.id())
    }

    /// Nullt saemtliches Schluesselmaterial (Session-Ende)
    pub fn erase_all(&self) {
        let alt = {
            let mut guard = self.pair.write();
            std::mem::replace(&mut *guard, Arc::new(EpochPair::default()))
        };
        if let Some(epoch) = &alt.current {
            epoch.erase();
        }
        if let Some((epoch, _)) = &alt.previous {
            epoch.erase();
        }
        tracing::debug!("Alle Epochs geloescht");
    }

    /// Sucht die Epoch fuer ein eingehendes Paket
    fn aufloesen(&self, epoch: EpochId) -> CryptoResult<Arc<Epoch>> {
        self.retire_expired();
        let pair = self.snapshot();

        let current = pair
            .current
            .as_ref()
            .ok_or(CryptoError::UnknownEpoch(epoch))?;
        if current.id() == epoch {
            return Ok(Arc::clone(current));
        }

        if let Some((previous, deadline)) = &pair.previous {
            if previous.id() == epoch {
                return if Instant::now() < *deadline {
                    Ok(Arc::clone(previous))
                } else {
                    Err(CryptoError::UnknownEpoch(epoch))
                };
            }
        }
        if pair.retired == Some(epoch) {
            return Err(CryptoError::UnknownEpoch(epoch));
        }

        let untergrenze = pair.previous_id().or(pair.retired).unwrap_or(current.id());
        if epoch < untergrenze {
            Err(CryptoError::StaleEpochUsed {
                epoch,
                aktuell: current.id(),
            })
        } else {
            Err(CryptoError::UnknownEpoch(epoch))
        }
    }

    /// Verschluesselt einen Frame von `sender` in `epoch`
    ///
    /// Verschluesselt wird nur mit der aktuellen Epoch.
    pub fn encrypt_frame(
        &self,
        epoch: EpochId,
        sender: UserId,
        aad: &[u8],
        plaintext: &[u8],
    ) -> CryptoResult<SealedFrame> {
        let pair = self.snapshot();
        let current = pair.current.as_ref().ok_or(CryptoError::KeineEpoch)?;
        if current.id() != epoch {
            return Err(CryptoError::EncryptionFailure(format!(
                "{epoch} ist nicht die aktuelle Epoch ({})",
                current.id()
            )));
        }
        current.seal(sender, aad, plaintext)
    }

    /// Verschluesselt einen eigenen Frame mit der aktuellen Epoch
    pub fn seal_outbound(&self, aad: &[u8], plaintext: &[u8]) -> CryptoResult<SealedFrame> {
        let current = self
            .snapshot()
            .current
            .clone()
            .ok_or(CryptoError::KeineEpoch)?;
        current.seal(self.local_user, aad, plaintext)
    }

    /// Entschluesselt einen Frame von `sender`
    pub fn decrypt_frame(
        &self,
        epoch: EpochId,
        sender: UserId,
        counter: u32,
        sealed: &[u8],
        aad: &[u8],
    ) -> CryptoResult<Vec<u8>> {
        let resolved = self.aufloesen(epoch)?;
        let result = resolved.open(sender, counter, aad, sealed);
        if let Err(e) = &result {
            tracing::trace!(epoch = %epoch, sender = %sender, fehler = %e, "Frame nicht entschluesselt");
        }
        result
    }
}

impl std::fmt::Debug for KeyRatchetManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyRatchetManager")
            .field("local_user", &self.local_user)
            .field("cipher", &self.cipher)
            .field("current", &self.current_epoch())
            .field("previous", &self.previous_epoch())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
