//! Authoritative in-memory registry of provider connections.
//!
//! One ordered list of [`ConnectionRecord`]s per provider kind.
//! Readers get an immutable `Arc` snapshot; writers serialize on a
//! per-provider mutex, build the new list, persist it through the
//! [`ConfigStore`] collaborator and only then swap the snapshot.
//! A failed persist leaves the last-known-good snapshot untouched.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;
use tokio::sync::Mutex;

use super::{ConnectionRecord, ProviderKind};
use crate::errors::AppError;
use crate::secrets::{SecretCodec, SecretSlot, StoredSecret};
use crate::store::{ConfigStore, ConnectionRow};

pub type Snapshot = Arc<Vec<ConnectionRecord>>;

struct Shard {
    write: Mutex<()>,
    snap: RwLock<Snapshot>,
}

impl Shard {
    fn new() -> Self {
        Self {
            write: Mutex::new(()),
            snap: RwLock::new(Arc::new(Vec::new())),
        }
    }
}

pub struct ConnectionStore {
    shards: HashMap<ProviderKind, Shard>,
    storage: Arc<dyn ConfigStore>,
    codec: Arc<SecretCodec>,
}

impl ConnectionStore {
    pub fn new(storage: Arc<dyn ConfigStore>, codec: Arc<SecretCodec>) -> Self {
        let shards = ProviderKind::ALL
            .into_iter()
            .map(|p| (p, Shard::new()))
            .collect();
        Self {
            shards,
            storage,
            codec,
        }
    }

    fn shard(&self, provider: ProviderKind) -> &Shard {
        // Every variant is inserted in `new`.
        &self.shards[&provider]
    }

    /// Load persisted rows into memory. Called once at startup, before
    /// the store is shared. Rows that violate the alignment invariants
    /// (non-contiguous positions, both secret representations) fail
    /// with `MisalignedLists` and leave the shard empty.
    pub async fn hydrate(&self) -> Result<(), AppError> {
        for provider in ProviderKind::ALL {
            let rows = self
                .storage
                .load(provider)
                .await
                .map_err(AppError::Storage)?;
            let records = self.records_from_rows(provider, rows)?;
            *self.shard(provider).snap.write().expect("snapshot lock poisoned") =
                Arc::new(records);
        }
        Ok(())
    }

    /// Consistent point-in-time view of one provider's list. Never
    /// observes a partially-applied mutation.
    pub fn snapshot(&self, provider: ProviderKind) -> Snapshot {
        self.shard(provider)
            .snap
            .read()
            .expect("snapshot lock poisoned")
            .clone()
    }

    /// Append one connection, returning its position.
    pub async fn add(
        &self,
        provider: ProviderKind,
        record: ConnectionRecord,
    ) -> Result<usize, AppError> {
        let shard = self.shard(provider);
        let _guard = shard.write.lock().await;

        let mut next = self.snapshot(provider).as_ref().clone();
        next.push(record);
        let index = next.len() - 1;
        self.commit(provider, next).await?;
        Ok(index)
    }

    /// In-place update of the record at `index`. The mutator runs on a
    /// copy; nothing is visible until the commit swaps the snapshot.
    pub async fn update<F>(
        &self,
        provider: ProviderKind,
        index: usize,
        mutate: F,
    ) -> Result<(), AppError>
    where
        F: FnOnce(&mut ConnectionRecord) -> Result<(), AppError>,
    {
        let shard = self.shard(provider);
        let _guard = shard.write.lock().await;

        let mut next = self.snapshot(provider).as_ref().clone();
        let len = next.len();
        let record = next
            .get_mut(index)
            .ok_or(AppError::IndexOutOfRange { index, len })?;
        mutate(record)?;
        self.commit(provider, next).await
    }

    /// Delete the record at `index`; records above it shift down one
    /// position, carrying their config and secret with them.
    pub async fn remove(&self, provider: ProviderKind, index: usize) -> Result<(), AppError> {
        let shard = self.shard(provider);
        let _guard = shard.write.lock().await;

        let mut next = self.snapshot(provider).as_ref().clone();
        let len = next.len();
        if index >= len {
            return Err(AppError::IndexOutOfRange { index, len });
        }
        next.remove(index);
        self.commit(provider, next).await
    }

    /// Replace the whole list. `build` receives the current snapshot
    /// and returns the replacement; used by the upsert path.
    pub async fn replace_all<F>(&self, provider: ProviderKind, build: F) -> Result<Snapshot, AppError>
    where
        F: FnOnce(&[ConnectionRecord]) -> Result<Vec<ConnectionRecord>, AppError>,
    {
        let shard = self.shard(provider);
        let _guard = shard.write.lock().await;

        let current = self.snapshot(provider);
        let next = build(&current)?;
        self.commit(provider, next).await?;
        Ok(self.snapshot(provider))
    }

    /// Persist, then swap. Holding the writer guard; readers keep the
    /// previous snapshot until the swap.
    async fn commit(
        &self,
        provider: ProviderKind,
        next: Vec<ConnectionRecord>,
    ) -> Result<(), AppError> {
        let rows = self.rows_from_records(&next)?;
        self.storage
            .replace(provider, &rows)
            .await
            .map_err(AppError::Storage)?;
        *self.shard(provider).snap.write().expect("snapshot lock poisoned") = Arc::new(next);
        Ok(())
    }

    fn rows_from_records(
        &self,
        records: &[ConnectionRecord],
    ) -> Result<Vec<ConnectionRow>, AppError> {
        records
            .iter()
            .enumerate()
            .map(|(i, rec)| {
                let (plaintext, ciphertext, fingerprint) =
                    match self.codec.storable(&rec.secret)? {
                        None => (None, None, None),
                        Some(StoredSecret::Plaintext(v)) => (Some(v), None, None),
                        Some(StoredSecret::Ciphertext { token, fingerprint }) => {
                            (None, Some(token), Some(fingerprint))
                        }
                    };
                Ok(ConnectionRow {
                    id: rec.id,
                    idx: i as i32,
                    url: rec.base_url.clone(),
                    config: rec.config.clone(),
                    secret_plaintext: plaintext,
                    secret_ciphertext: ciphertext,
                    secret_fingerprint: fingerprint,
                    updated_at: Utc::now(),
                })
            })
            .collect()
    }

    fn records_from_rows(
        &self,
        provider: ProviderKind,
        rows: Vec<ConnectionRow>,
    ) -> Result<Vec<ConnectionRecord>, AppError> {
        let mut records = Vec::with_capacity(rows.len());
        for (i, row) in rows.into_iter().enumerate() {
            if row.idx != i as i32 {
                return Err(AppError::MisalignedLists {
                    detail: format!(
                        "{}: row at list position {} carries stored position {}",
                        provider, i, row.idx
                    ),
                });
            }
            if row.secret_plaintext.is_some() && row.secret_ciphertext.is_some() {
                return Err(AppError::MisalignedLists {
                    detail: format!(
                        "{}: row {} stores both plaintext and ciphertext secrets",
                        provider, i
                    ),
                });
            }

            let secret = if !self.codec.mode().persistence_enabled() {
                // Secret persistence disabled: whatever an earlier
                // process wrote is not ours to resurrect.
                SecretSlot::Unset
            } else if let Some(token) = row.secret_ciphertext {
                let fingerprint = row.secret_fingerprint.ok_or(AppError::MisalignedLists {
                    detail: format!("{}: ciphertext row {} missing fingerprint", provider, i),
                })?;
                SecretSlot::Encrypted {
                    ciphertext: token,
                    fingerprint,
                }
            } else if let Some(value) = row.secret_plaintext {
                SecretSlot::Plaintext(value.into())
            } else {
                SecretSlot::Unset
            };

            records.push(ConnectionRecord {
                id: row.id,
                base_url: row.url,
                secret,
                config: row.config,
            });
        }
        Ok(records)
    }
}
