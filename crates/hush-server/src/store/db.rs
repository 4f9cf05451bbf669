use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use thiserror::Error;
use tracing::{debug, info};

use super::model::{NewRecord, SecretRecord};

const SECRETS: TableDefinition<&str, &[u8]> = TableDefinition::new("secrets");

#[derive(Debug, Error)]
pub enum StoreError {
    /// The database could not be read or written, or the call timed out.
    #[error("store unavailable: {0:#}")]
    Unavailable(anyhow::Error),
    /// An entry already exists under the id being created.
    #[error("secret id already in use")]
    Collision,
}

impl From<anyhow::Error> for StoreError {
    fn from(e: anyhow::Error) -> Self {
        StoreError::Unavailable(e)
    }
}

/// Thread-safe handle to the redb store.
///
/// redb runs one write transaction at a time, which is what makes
/// [`Store::decrement_and_maybe_delete`] atomic across concurrent callers.
#[derive(Clone)]
pub struct Store {
    db: Arc<Database>,
}

impl Store {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path).context("open redb database")?;

        let write_txn = db.begin_write()?;
        write_txn.open_table(SECRETS)?;
        write_txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Hold the single writer slot until the returned transaction is dropped.
    #[cfg(test)]
    pub(crate) fn hold_writer(&self) -> redb::WriteTransaction {
        self.db.begin_write().unwrap()
    }

    pub(crate) fn now() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64
    }

    /// Persist a new record under `id` with the given time-to-live.
    ///
    /// Runs as one write transaction, so either every field and the expiry land
    /// together or nothing is written. An existing entry under `id`, live or
    /// expired, is a [`StoreError::Collision`].
    pub fn create(&self, id: &str, new: NewRecord, ttl: Duration) -> Result<SecretRecord, StoreError> {
        let now = Self::now();
        let record = SecretRecord {
            message: new.message,
            passphrase_hash: new.passphrase_hash,
            remaining_access: new.remaining_access,
            created_at: now,
            expires_at: now.saturating_add(ttl.as_millis() as i64),
        };
        let bytes = encode(&record)?;

        let write_txn = self.db.begin_write().context("begin write")?;
        let collided = {
            let mut table = write_txn.open_table(SECRETS).context("open secrets")?;
            let exists = table.get(id).context("read secret")?.is_some();
            if !exists {
                table
                    .insert(id, bytes.as_slice())
                    .context("insert secret")?;
            }
            exists
        };
        if collided {
            write_txn.abort().context("abort create")?;
            return Err(StoreError::Collision);
        }
        write_txn.commit().context("commit create")?;

        debug!(id = %id, "stored secret");
        Ok(record)
    }

    /// Current state of a live record, without touching it.
    pub fn peek(&self, id: &str) -> Result<Option<SecretRecord>, StoreError> {
        let now = Self::now();
        let read_txn = self.db.begin_read().context("begin read")?;
        let table = read_txn.open_table(SECRETS).context("open secrets")?;

        let raw: Option<Vec<u8>> = table
            .get(id)
            .context("read secret")?
            .map(|guard| guard.value().to_vec());

        match raw {
            None => Ok(None),
            Some(bytes) => {
                let record = decode(&bytes)?;
                if record.is_expired(now) {
                    Ok(None)
                } else {
                    Ok(Some(record))
                }
            }
        }
    }

    /// Spend one unit of access budget.
    ///
    /// Returns the record as it stands after the decrement, or `None` if the id
    /// is absent or expired. A returned `remaining_access` of 0 means this call
    /// took the last unit and the record has already been removed.
    pub fn decrement_and_maybe_delete(&self, id: &str) -> Result<Option<SecretRecord>, StoreError> {
        let now = Self::now();

        let write_txn = self.db.begin_write().context("begin write")?;
        let result = {
            let mut table = write_txn.open_table(SECRETS).context("open secrets")?;

            // Copy out of the AccessGuard so the borrow on `table` ends before mutation.
            let raw: Option<Vec<u8>> = table
                .get(id)
                .context("read secret")?
                .map(|guard| guard.value().to_vec());

            match raw {
                None => None,
                Some(bytes) => {
                    let mut record = decode(&bytes)?;

                    if record.is_expired(now) {
                        table.remove(id).context("evict secret")?;
                        debug!(id = %id, "lazy-evicted expired secret");
                        None
                    } else {
                        record.remaining_access = record.remaining_access.saturating_sub(1);
                        if record.remaining_access == 0 {
                            table.remove(id).context("burn secret")?;
                            debug!(id = %id, "burned after final read");
                        } else {
                            let updated = encode(&record)?;
                            table
                                .insert(id, updated.as_slice())
                                .context("update secret")?;
                        }
                        Some(record)
                    }
                }
            }
        };
        write_txn.commit().context("commit decrement")?;
        Ok(result)
    }

    /// Delete a record by id. Returns true if it existed.
    pub fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let write_txn = self.db.begin_write().context("begin write")?;
        let existed = {
            let mut table = write_txn.open_table(SECRETS).context("open secrets")?;
            let removed = table.remove(id).context("remove secret")?;
            removed.is_some()
        };
        write_txn.commit().context("commit delete")?;
        Ok(existed)
    }

    /// Remove every expired record. Returns how many were removed.
    pub fn prune(&self) -> Result<usize, StoreError> {
        let now = Self::now();

        let expired: Vec<String> = {
            let read_txn = self.db.begin_read().context("begin read")?;
            let table = read_txn.open_table(SECRETS).context("open secrets")?;
            let mut ids = Vec::new();
            for item in table.iter().context("iterate secrets")? {
                let (k, v) = item.context("read secret")?;
                if decode(v.value())?.is_expired(now) {
                    ids.push(k.value().to_owned());
                }
            }
            ids
        };

        if expired.is_empty() {
            return Ok(0);
        }

        // Expiry only moves one way, so ids collected above are still expired here.
        let write_txn = self.db.begin_write().context("begin write")?;
        {
            let mut table = write_txn.open_table(SECRETS).context("open secrets")?;
            for id in &expired {
                table.remove(id.as_str()).context("remove expired")?;
            }
        }
        write_txn.commit().context("commit prune")?;

        info!(removed = expired.len(), "pruned expired secrets");
        Ok(expired.len())
    }

    /// Number of entries on disk, including expired ones not yet pruned.
    /// Cheap: reads table metadata rather than decoding every record.
    pub fn count(&self) -> Result<usize, StoreError> {
        let read_txn = self.db.begin_read().context("begin read")?;
        let table = read_txn.open_table(SECRETS).context("open secrets")?;
        Ok(table.len().context("count secrets")? as usize)
    }
}

fn encode(record: &SecretRecord) -> Result<Vec<u8>> {
    bincode::serde::encode_to_vec(record, bincode::config::standard()).context("bincode encode")
}

fn decode(bytes: &[u8]) -> Result<SecretRecord> {
    let (record, _): (SecretRecord, _) =
        bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .context("bincode decode")?;
    Ok(record)
}
