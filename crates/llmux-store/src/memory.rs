use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{RwLock, broadcast};

use llmux_provider_core::{CredentialId, CredentialRecord};

use crate::{ChangeEvent, CredentialStore, StoreError, StoreResult};

/// Volatile store; everything is lost on process exit.
pub struct MemoryStore {
    records: RwLock<HashMap<CredentialId, CredentialRecord>>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            records: RwLock::new(HashMap::new()),
            changes,
        }
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn save(&self, record: CredentialRecord) -> StoreResult<CredentialId> {
        let id = record.id.clone();
        self.records.write().await.insert(id.clone(), record.clone());
        let _ = self.changes.send(ChangeEvent::Saved(record));
        Ok(id)
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        let removed = self.records.write().await.remove(id);
        match removed {
            Some(_) => {
                let _ = self.changes.send(ChangeEvent::Removed(id.to_string()));
                Ok(())
            }
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }

    async fn get(&self, id: &str) -> StoreResult<CredentialRecord> {
        self.records
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn list(&self) -> StoreResult<Vec<CredentialRecord>> {
        let mut out: Vec<CredentialRecord> =
            self.records.read().await.values().cloned().collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    fn watch(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llmux_provider_core::{CredentialPayload, ProviderFamily};

    fn record(id: &str) -> CredentialRecord {
        CredentialRecord::new(
            id,
            ProviderFamily::ClaudeApi,
            CredentialPayload::ApiKey {
                api_key: "sk".to_string(),
                base_url: None,
                headers: Vec::new(),
            },
        )
    }

    #[tokio::test]
    async fn save_emits_change_in_order() {
        let store = MemoryStore::new();
        let mut rx = store.watch();
        store.save(record("b")).await.unwrap();
        store.save(record("a")).await.unwrap();
        store.delete("b").await.unwrap();

        assert!(matches!(rx.recv().await.unwrap(), ChangeEvent::Saved(r) if r.id == "b"));
        assert!(matches!(rx.recv().await.unwrap(), ChangeEvent::Saved(r) if r.id == "a"));
        assert!(matches!(rx.recv().await.unwrap(), ChangeEvent::Removed(id) if id == "b"));

        let ids: Vec<String> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["a"]);
    }

    #[tokio::test]
    async fn delete_unknown_is_not_found() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.delete("missing").await,
            Err(StoreError::NotFound(_))
        ));
    }
}
