pub mod db;
pub mod model;
pub mod passphrase;

pub use db::{Store, StoreError};
pub use model::{NewRecord, NewSecret, SecretRecord, ValidSecret, ValidationError};
pub use passphrase::{HashedPassphrase, PassphraseError, PassphraseHasher};
