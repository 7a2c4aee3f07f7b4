use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{ConfigStore, ConnectionRow};
use crate::connections::ProviderKind;

/// In-process [`ConfigStore`]. Used by tests, including restart
/// simulation: a new registry hydrated from the same `MemStore`
/// behaves like a process restart over durable storage.
#[derive(Default)]
pub struct MemStore {
    rows: Mutex<HashMap<ProviderKind, Vec<ConnectionRow>>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConfigStore for MemStore {
    async fn load(&self, provider: ProviderKind) -> anyhow::Result<Vec<ConnectionRow>> {
        Ok(self
            .rows
            .lock()
            .await
            .get(&provider)
            .cloned()
            .unwrap_or_default())
    }

    async fn replace(&self, provider: ProviderKind, rows: &[ConnectionRow]) -> anyhow::Result<()> {
        self.rows.lock().await.insert(provider, rows.to_vec());
        Ok(())
    }
}
