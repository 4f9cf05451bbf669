//! Creation and redemption rules layered over the [`Store`].
//!
//! Redemption checks the passphrase against a read-only snapshot first and
//! only then spends budget, so a wrong guess never costs the owner an access.

use std::time::Duration;

use rand::{rngs::OsRng, RngCore};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::store::{
    NewRecord, NewSecret, PassphraseError, PassphraseHasher, Store, StoreError, ValidationError,
};

#[derive(Debug, Error)]
pub enum CreateError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("could not hash passphrase: {0}")]
    Passphrase(#[from] PassphraseError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum RedeemError {
    #[error("invalid passphrase")]
    InvalidPassphrase,
    #[error("secret not found or expired")]
    NotFound,
    #[error("max attempts reached")]
    BudgetExhausted,
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Created {
    pub id: String,
    pub access_count: u32,
    pub expires_in: u64,
}

/// A successful read. `remaining_access == 0` means this was the final read
/// and the secret no longer exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redemption {
    pub message: String,
    pub remaining_access: u32,
    pub expires_in: u64,
}

impl Redemption {
    pub fn burned(&self) -> bool {
        self.remaining_access == 0
    }
}

#[derive(Clone)]
pub struct Vault {
    store: Store,
    hasher: PassphraseHasher,
}

impl Vault {
    pub fn new(store: Store, hasher: PassphraseHasher) -> Self {
        Self { store, hasher }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// 128 bits from the OS RNG, hex-encoded.
    pub fn new_id() -> String {
        let mut bytes = [0u8; 16];
        OsRng.fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    /// Validate, hash the passphrase if any, and persist under `id`.
    pub fn create(&self, id: &str, secret: NewSecret) -> Result<Created, CreateError> {
        let valid = secret.validate()?;

        let passphrase_hash = valid
            .passphrase
            .as_deref()
            .map(|p| self.hasher.hash(p))
            .transpose()?;
        let has_passphrase = passphrase_hash.is_some();

        let new = NewRecord {
            message: valid.message,
            passphrase_hash,
            remaining_access: valid.access_count,
        };
        let ttl = Duration::from_secs(valid.ttl_seconds);

        match self.store.create(id, new, ttl) {
            Ok(record) => {
                info!(
                    access_count = record.remaining_access,
                    ttl_seconds = valid.ttl_seconds,
                    passphrase = has_passphrase,
                    "audit: secret.create"
                );
                Ok(Created {
                    id: id.to_owned(),
                    access_count: record.remaining_access,
                    expires_in: valid.ttl_seconds,
                })
            }
            Err(StoreError::Unavailable(e)) => {
                // The commit may have landed before the failure surfaced.
                if let Err(cleanup) = self.store.delete(id) {
                    warn!(error = %cleanup, "cleanup after failed create also failed");
                }
                Err(StoreError::Unavailable(e).into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Read a secret, spending one unit of its access budget.
    ///
    /// For secrets without a passphrase, `candidate` is ignored.
    pub fn redeem(&self, id: &str, candidate: Option<&str>) -> Result<Redemption, RedeemError> {
        let snapshot = self.store.peek(id)?.ok_or(RedeemError::NotFound)?;

        if let Some(hash) = &snapshot.passphrase_hash {
            let ok = candidate.is_some_and(|c| self.hasher.verify(hash, c));
            if !ok {
                warn!("audit: secret.passphrase_mismatch");
                debug!(id = %id, "passphrase mismatch");
                return Err(RedeemError::InvalidPassphrase);
            }
        }

        // The snapshot was live a moment ago; if it is gone now, a concurrent
        // reader took the last unit or the TTL lapsed in between.
        let record = self
            .store
            .decrement_and_maybe_delete(id)?
            .ok_or(RedeemError::BudgetExhausted)?;

        let redemption = Redemption {
            message: record.message.clone(),
            remaining_access: record.remaining_access,
            expires_in: record.ttl_remaining(Store::now()),
        };
        if redemption.burned() {
            info!("audit: secret.burn");
        } else {
            info!(remaining = redemption.remaining_access, "audit: secret.redeem");
        }
        debug!(id = %id, remaining = redemption.remaining_access, "redeemed");
        Ok(redemption)
    }
}
