//! Durable storage collaborator for connection configuration.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::connections::ProviderKind;

/// One persisted connection, keyed by provider kind + position.
///
/// At most one of `secret_plaintext` / `secret_ciphertext` is set,
/// depending on the encryption mode the row was written under; both
/// are absent when secret persistence is disabled.
/// No `Debug` impl: `secret_plaintext` may carry raw secret material.
#[derive(Clone, sqlx::FromRow)]
pub struct ConnectionRow {
    pub id: Uuid,
    pub idx: i32,
    pub url: String,
    pub config: serde_json::Value,
    pub secret_plaintext: Option<String>,
    pub secret_ciphertext: Option<String>,
    pub secret_fingerprint: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Storage collaborator. The in-memory registry is authoritative at
/// runtime; implementations only load at startup and persist whole
/// per-provider snapshots on mutation.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Load all rows for one provider, ordered by position.
    async fn load(&self, provider: ProviderKind) -> anyhow::Result<Vec<ConnectionRow>>;

    /// Atomically replace the full connection list for one provider.
    async fn replace(&self, provider: ProviderKind, rows: &[ConnectionRow]) -> anyhow::Result<()>;
}
