use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use zeroize::Zeroize;

/// Argon2id PHC string (`$argon2id$v=19$m=...,t=...,p=...$salt$hash`).
/// Carries its own salt and cost, so verification needs nothing else.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize)]
#[serde(transparent)]
pub struct HashedPassphrase(String);

impl HashedPassphrase {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for HashedPassphrase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("HashedPassphrase(..)")
    }
}

#[derive(Debug, Error)]
pub enum PassphraseError {
    #[error("argon2 params: {0}")]
    Params(argon2::Error),
    #[error("argon2 hash: {0}")]
    Hash(argon2::password_hash::Error),
}

/// One-way passphrase hashing with a fresh random salt per call.
#[derive(Clone, Default)]
pub struct PassphraseHasher {
    params: Params,
}

impl PassphraseHasher {
    pub fn new(params: Params) -> Self {
        Self { params }
    }

    /// Build a hasher from raw Argon2 costs (`m_cost` in KiB).
    pub fn with_cost(m_cost: u32, t_cost: u32, p_cost: u32) -> Result<Self, PassphraseError> {
        let params = Params::new(m_cost, t_cost, p_cost, None).map_err(PassphraseError::Params)?;
        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    pub fn hash(&self, plaintext: &str) -> Result<HashedPassphrase, PassphraseError> {
        let mut salt = [0u8; 16];
        OsRng.fill_bytes(&mut salt);
        let salt = SaltString::encode_b64(&salt).map_err(PassphraseError::Hash)?;

        let hash = self
            .argon2()
            .hash_password(plaintext.as_bytes(), &salt)
            .map_err(PassphraseError::Hash)?;
        Ok(HashedPassphrase(hash.to_string()))
    }

    /// Check `candidate` against a stored hash. Cost parameters are read from
    /// the hash itself, so records outlive a change of configured cost.
    pub fn verify(&self, hash: &HashedPassphrase, candidate: &str) -> bool {
        let parsed = match PasswordHash::new(hash.as_str()) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "stored passphrase hash is malformed");
                return false;
            }
        };
        Argon2::default()
            .verify_password(candidate.as_bytes(), &parsed)
            .is_ok()
    }
}

#[cfg(test)]
pub(crate) fn test_hasher() -> PassphraseHasher {
    PassphraseHasher::with_cost(Params::MIN_M_COST, 1, 1).unwrap()
}
