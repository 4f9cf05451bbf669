use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::ZeroizeOnDrop;

use super::passphrase::HashedPassphrase;

/// Upper bound on how many times a secret may be redeemed.
pub const MAX_ACCESS_COUNT: u32 = 30;
/// Upper bound on a secret's time-to-live: 7 days.
pub const MAX_TTL_SECONDS: u64 = 86_400 * 7;
pub const MIN_PASSPHRASE_LEN: usize = 6;
pub const MAX_PASSPHRASE_LEN: usize = 64;
pub const MAX_MESSAGE_BYTES: usize = 1_048_576;

pub const DEFAULT_ACCESS_COUNT: u32 = 1;
pub const DEFAULT_TTL_SECONDS: u64 = 86_400;

/// Stored in redb as bincode-encoded bytes.
/// A record with `remaining_access == 0` is never written back; it is removed instead.
#[derive(Debug, Clone, Serialize, Deserialize, ZeroizeOnDrop)]
pub struct SecretRecord {
    pub message: String,
    /// Argon2id PHC string. `None` means redemption needs no passphrase.
    pub passphrase_hash: Option<HashedPassphrase>,
    pub remaining_access: u32,
    /// Unix milliseconds.
    pub created_at: i64,
    /// Unix milliseconds; the record is unreachable from this instant on.
    pub expires_at: i64,
}

impl SecretRecord {
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at
    }

    pub fn requires_passphrase(&self) -> bool {
        self.passphrase_hash.is_some()
    }

    /// Whole seconds left before expiry, rounded up so a live record never reports 0.
    pub fn ttl_remaining(&self, now_ms: i64) -> u64 {
        let ms = (self.expires_at - now_ms).max(0) as u64;
        ms.div_ceil(1000)
    }
}

/// The fields a caller supplies when handing a record to the store.
/// Timestamps are stamped by the store itself.
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub message: String,
    pub passphrase_hash: Option<HashedPassphrase>,
    pub remaining_access: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("expiry must be between 1 and {} seconds", MAX_TTL_SECONDS)]
    Expiry,
    #[error("access_count must be between 1 and {}", MAX_ACCESS_COUNT)]
    AccessCount,
    #[error(
        "passphrase length should be between {} and {} characters",
        MIN_PASSPHRASE_LEN,
        MAX_PASSPHRASE_LEN
    )]
    PassphraseLength,
    #[error("message must not be empty")]
    EmptyMessage,
    #[error("message exceeds {} byte limit", MAX_MESSAGE_BYTES)]
    MessageTooLarge,
}

/// A creation request as the caller sent it. Omitted fields are defaulted by
/// [`NewSecret::validate`]; explicit zeros are rejected rather than defaulted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewSecret {
    pub message: String,
    #[serde(default)]
    pub passphrase: Option<String>,
    #[serde(default)]
    pub access_count: Option<i64>,
    #[serde(default)]
    pub expiry_seconds: Option<i64>,
}

/// A creation request with defaults applied and every limit checked.
#[derive(Debug, Clone)]
pub struct ValidSecret {
    pub message: String,
    pub passphrase: Option<String>,
    pub access_count: u32,
    pub ttl_seconds: u64,
}

impl NewSecret {
    /// Apply defaults, then check expiry, access count, passphrase and message
    /// in that order, returning the first failure.
    pub fn validate(self) -> Result<ValidSecret, ValidationError> {
        let expiry = self.expiry_seconds.unwrap_or(DEFAULT_TTL_SECONDS as i64);
        let access = self.access_count.unwrap_or(DEFAULT_ACCESS_COUNT as i64);

        if expiry <= 0 || expiry as u64 > MAX_TTL_SECONDS {
            return Err(ValidationError::Expiry);
        }
        if access <= 0 || access as u64 > MAX_ACCESS_COUNT as u64 {
            return Err(ValidationError::AccessCount);
        }
        if let Some(p) = &self.passphrase {
            check_passphrase_len(p)?;
        }
        if self.message.is_empty() {
            return Err(ValidationError::EmptyMessage);
        }
        if self.message.len() > MAX_MESSAGE_BYTES {
            return Err(ValidationError::MessageTooLarge);
        }

        Ok(ValidSecret {
            message: self.message,
            passphrase: self.passphrase,
            access_count: access as u32,
            ttl_seconds: expiry as u64,
        })
    }
}

/// Passphrase length is measured in bytes, so multi-byte characters count
/// for more than one.
pub fn check_passphrase_len(p: &str) -> Result<(), ValidationError> {
    if (MIN_PASSPHRASE_LEN..=MAX_PASSPHRASE_LEN).contains(&p.len()) {
        Ok(())
    } else {
        Err(ValidationError::PassphraseLength)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(access: Option<i64>, expiry: Option<i64>, pass: Option<&str>) -> NewSecret {
        NewSecret {
            message: "hello".into(),
            passphrase: pass.map(Into::into),
            access_count: access,
            expiry_seconds: expiry,
        }
    }

    #[test]
    fn defaults_applied_when_omitted() {
        let v = req(None, None, None).validate().unwrap();
        assert_eq!(v.access_count, DEFAULT_ACCESS_COUNT);
        assert_eq!(v.ttl_seconds, DEFAULT_TTL_SECONDS);
    }

    #[test]
    fn explicit_zero_is_rejected_not_defaulted() {
        assert_eq!(
            req(Some(0), None, None).validate().unwrap_err(),
            ValidationError::AccessCount
        );
        assert_eq!(
            req(None, Some(0), None).validate().unwrap_err(),
            ValidationError::Expiry
        );
    }

    #[test]
    fn limits_are_inclusive() {
        let v = req(Some(30), Some(604_800), Some("x".repeat(64).as_str()))
            .validate()
            .unwrap();
        assert_eq!(v.access_count, 30);
        assert_eq!(v.ttl_seconds, 604_800);

        assert!(req(None, None, Some("abcdef")).validate().is_ok());
    }

    #[test]
    fn out_of_range_values_rejected() {
        assert_eq!(
            req(Some(31), None, None).validate().unwrap_err(),
            ValidationError::AccessCount
        );
        assert_eq!(
            req(Some(-1), None, None).validate().unwrap_err(),
            ValidationError::AccessCount
        );
        assert_eq!(
            req(None, Some(604_801), None).validate().unwrap_err(),
            ValidationError::Expiry
        );
        assert_eq!(
            req(None, None, Some("abc12")).validate().unwrap_err(),
            ValidationError::PassphraseLength
        );
        assert_eq!(
            req(None, None, Some("x".repeat(65).as_str())).validate().unwrap_err(),
            ValidationError::PassphraseLength
        );
    }

    #[test]
    fn passphrase_length_counts_bytes() {
        // six characters, twelve bytes
        assert!(req(None, None, Some("éééééé")).validate().is_ok());
        // 22 characters, 66 bytes
        assert_eq!(
            req(None, None, Some("世".repeat(22).as_str())).validate().unwrap_err(),
            ValidationError::PassphraseLength
        );
        // two characters, six bytes
        assert!(check_passphrase_len("世界").is_ok());
        assert!(check_passphrase_len("ééé").is_ok());
        assert!(check_passphrase_len("éé").is_err());
    }

    #[test]
    fn first_failure_wins_in_fixed_order() {
        let all_bad = req(Some(99), Some(999_999_999), Some("x"));
        assert_eq!(all_bad.validate().unwrap_err(), ValidationError::Expiry);

        let access_and_pass = req(Some(99), None, Some("x"));
        assert_eq!(
            access_and_pass.validate().unwrap_err(),
            ValidationError::AccessCount
        );

        let mut pass_and_message = req(None, None, Some("x"));
        pass_and_message.message.clear();
        assert_eq!(
            pass_and_message.validate().unwrap_err(),
            ValidationError::PassphraseLength
        );
    }

    #[test]
    fn message_limits() {
        let mut empty = req(None, None, None);
        empty.message.clear();
        assert_eq!(empty.validate().unwrap_err(), ValidationError::EmptyMessage);

        let mut big = req(None, None, None);
        big.message = "a".repeat(MAX_MESSAGE_BYTES + 1);
        assert_eq!(big.validate().unwrap_err(), ValidationError::MessageTooLarge);
    }

    #[test]
    fn ttl_remaining_rounds_up_and_floors_at_zero() {
        let r = SecretRecord {
            message: "m".into(),
            passphrase_hash: None,
            remaining_access: 1,
            created_at: 0,
            expires_at: 10_500,
        };
        assert_eq!(r.ttl_remaining(0), 11);
        assert_eq!(r.ttl_remaining(10_499), 1);
        assert_eq!(r.ttl_remaining(10_500), 0);
        assert_eq!(r.ttl_remaining(20_000), 0);
        assert!(!r.is_expired(10_499));
        assert!(r.is_expired(10_500));
    }
}
