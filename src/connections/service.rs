//! Boundary-facing connection configuration API.
//!
//! Validates incoming edits (allow-list, URL normalization, key-edit
//! resolution) before any state changes, drives the codec and the
//! registry, and returns masked descriptors. After every successful
//! mutation it invalidates the effective-models cache, fans the
//! secret-filtered snapshot out to replicas, and spawns advisory
//! feature probes, all outside the registry's writer lock.

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;
use zeroize::Zeroizing;

use super::replication::replicated_view;
use super::store::{ConnectionStore, Snapshot};
use super::{
    normalize_base_url, resolve_key_edit, ConnectionEdit, ConnectionRecord, KeyEdit,
    NewConnection, ProviderConnections, ProviderKind,
};
use crate::cache::ReplicaCache;
use crate::errors::AppError;
use crate::probe::{ProbeTarget, Prober};
use crate::secrets::{KeyDescriptor, SecretCodec, SecretSlot};

/// Masked view of a single connection, returned by the add path.
#[derive(Debug, Serialize)]
pub struct ConnectionDescriptor {
    pub index: usize,
    pub url: String,
    pub config: serde_json::Value,
    pub key_descriptor: KeyDescriptor,
}

pub struct ConnectionConfigService {
    registry: Arc<ConnectionStore>,
    codec: Arc<SecretCodec>,
    cache: ReplicaCache,
    prober: Prober,
    allowed_openai: Vec<String>,
    allowed_ollama: Vec<String>,
    // Computed once from the encryption mode, never from data shape.
    persistence_enabled: bool,
    encryption_enabled: bool,
}

impl ConnectionConfigService {
    pub fn new(
        registry: Arc<ConnectionStore>,
        codec: Arc<SecretCodec>,
        cache: ReplicaCache,
        prober: Prober,
        allowed_openai: Vec<String>,
        allowed_ollama: Vec<String>,
    ) -> Self {
        let mode = codec.mode();
        Self {
            registry,
            codec,
            cache,
            prober,
            allowed_openai,
            allowed_ollama,
            persistence_enabled: mode.persistence_enabled(),
            encryption_enabled: mode.encryption_enabled(),
        }
    }

    fn allowed(&self, provider: ProviderKind) -> &[String] {
        match provider {
            ProviderKind::Openai => &self.allowed_openai,
            ProviderKind::Ollama => &self.allowed_ollama,
        }
    }

    /// Allow-listing is active only when the configured list is
    /// non-empty. `url` must already be normalized.
    fn check_allowed(&self, provider: ProviderKind, url: &str) -> Result<(), AppError> {
        let allowed = self.allowed(provider);
        if allowed.is_empty() || allowed.iter().any(|a| a == url) {
            Ok(())
        } else {
            Err(AppError::UrlNotAllowed {
                url: url.to_string(),
            })
        }
    }

    /// Current masked view of one provider's connections.
    pub fn list_connections(&self, provider: ProviderKind) -> Result<ProviderConnections, AppError> {
        let snapshot = self.registry.snapshot(provider);
        self.view(provider, &snapshot)
    }

    /// Apply an ordered edit list as the new connection list for the
    /// provider. The list may grow, shrink or reorder; positions in
    /// `edits` line up with positions in the current list for `keep`.
    /// All validation happens before any mutation.
    pub async fn upsert_connections(
        &self,
        provider: ProviderKind,
        edits: Vec<ConnectionEdit>,
    ) -> Result<ProviderConnections, AppError> {
        // Validation pass: fail fast, no partial commits.
        let mut staged = Vec::with_capacity(edits.len());
        for (i, edit) in edits.into_iter().enumerate() {
            let url = normalize_base_url(&edit.url)?;
            self.check_allowed(provider, &url)?;
            let key_edit = resolve_key_edit(i, edit.key_edit, edit.key_value)?;
            staged.push((url, key_edit, edit.config));
        }

        let codec = self.codec.clone();
        let snapshot = self
            .registry
            .replace_all(provider, move |current| {
                let mut next = Vec::with_capacity(staged.len());
                for (i, (url, key_edit, config)) in staged.into_iter().enumerate() {
                    let existing = current.get(i);
                    let id = existing.map(|r| r.id).unwrap_or_else(Uuid::new_v4);
                    let secret = match key_edit {
                        // Default safe path: the stored slot is left
                        // untouched, no material crossed the boundary.
                        KeyEdit::Keep => existing
                            .map(|r| r.secret.clone())
                            .unwrap_or(SecretSlot::Unset),
                        KeyEdit::Clear => SecretSlot::Unset,
                        KeyEdit::Replace(value) => {
                            next_slot_for_replacement(&codec, existing, &value)?
                        }
                    };
                    next.push(ConnectionRecord {
                        id,
                        base_url: url,
                        secret,
                        config,
                    });
                }
                Ok(next)
            })
            .await?;

        self.after_mutation(provider, &snapshot).await;
        self.view(provider, &snapshot)
    }

    /// The only path that introduces a brand-new index.
    pub async fn add_connection(
        &self,
        provider: ProviderKind,
        new: NewConnection,
    ) -> Result<ConnectionDescriptor, AppError> {
        let url = normalize_base_url(&new.url)?;
        self.check_allowed(provider, &url)?;

        let secret = match new.key.filter(|k| !k.is_empty()) {
            Some(key) => self.codec.seal(&key)?,
            None => SecretSlot::Unset,
        };
        let record = ConnectionRecord::new(url.clone(), secret, new.config.clone());
        let key_descriptor = self.codec.descriptor(&record.secret)?;

        let index = self.registry.add(provider, record).await?;
        let snapshot = self.registry.snapshot(provider);
        self.after_mutation(provider, &snapshot).await;

        Ok(ConnectionDescriptor {
            index,
            url,
            config: new.config,
            key_descriptor,
        })
    }

    /// Delete one connection; higher positions shift down by one.
    pub async fn delete_connection(
        &self,
        provider: ProviderKind,
        index: usize,
    ) -> Result<(), AppError> {
        self.registry.remove(provider, index).await?;
        let snapshot = self.registry.snapshot(provider);
        self.after_mutation(provider, &snapshot).await;
        Ok(())
    }

    /// Post-commit side effects. Best-effort: the edit has already
    /// succeeded, so failures here are logged, never surfaced.
    async fn after_mutation(&self, provider: ProviderKind, snapshot: &Snapshot) {
        self.cache.invalidate(&effective_models_key(provider)).await;

        match self.descriptors(snapshot) {
            Ok(descriptors) => {
                let view = replicated_view(snapshot, &descriptors);
                let key = replica_key(provider);
                if let Err(e) = self.cache.set(&key, &view, 3600).await {
                    tracing::warn!("replicating '{}' failed: {}", key, e);
                }
            }
            Err(e) => {
                tracing::warn!(
                    "skipping replication for {}: descriptor derivation failed: {}",
                    provider,
                    e
                );
            }
        }

        let targets = snapshot
            .iter()
            .map(|record| ProbeTarget {
                id: record.id,
                base_url: record.base_url.clone(),
                bearer: self.bearer_for(&record.secret),
            })
            .collect();
        self.prober.spawn_all(provider, targets);
    }

    fn bearer_for(&self, slot: &SecretSlot) -> Option<Zeroizing<String>> {
        match slot {
            SecretSlot::Unset => None,
            SecretSlot::Plaintext(value) => Some(value.clone()),
            SecretSlot::Encrypted { ciphertext, .. } => self.codec.decrypt(ciphertext).ok(),
        }
    }

    fn descriptors(&self, snapshot: &Snapshot) -> Result<Vec<KeyDescriptor>, AppError> {
        snapshot
            .iter()
            .map(|record| self.codec.descriptor(&record.secret))
            .collect()
    }

    fn view(
        &self,
        provider: ProviderKind,
        snapshot: &Snapshot,
    ) -> Result<ProviderConnections, AppError> {
        Ok(ProviderConnections {
            urls: snapshot.iter().map(|r| r.base_url.clone()).collect(),
            configs: snapshot.iter().map(|r| r.config.clone()).collect(),
            key_descriptors: self.descriptors(snapshot)?,
            persistence_enabled: self.persistence_enabled,
            encryption_enabled: self.encryption_enabled,
            allowed_base_urls: self.allowed(provider).to_vec(),
        })
    }
}

/// Cache key for the advisory effective-models list of a provider.
pub fn effective_models_key(provider: ProviderKind) -> String {
    format!("models:{}", provider)
}

/// Cache key for the replicated, secret-filtered connection snapshot.
pub fn replica_key(provider: ProviderKind) -> String {
    format!("connections:{}", provider)
}

/// Change detection for `replace`: when the incoming value fingerprints
/// identically to the stored one, the stored slot is reused instead of
/// re-sealed.
fn next_slot_for_replacement(
    codec: &SecretCodec,
    existing: Option<&ConnectionRecord>,
    value: &str,
) -> Result<SecretSlot, AppError> {
    if let Some(record) = existing {
        let stored_fingerprint = match &record.secret {
            SecretSlot::Encrypted { fingerprint, .. } => Some(fingerprint.clone()),
            SecretSlot::Plaintext(old) => Some(codec.fingerprint(old)),
            SecretSlot::Unset => None,
        };
        if let Some(stored) = stored_fingerprint {
            if codec.fingerprints_match(&codec.fingerprint(value), &stored) {
                return Ok(record.secret.clone());
            }
        }
    }
    codec.seal(value)
}
