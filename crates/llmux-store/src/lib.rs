//! Credential persistence: the single source of truth for credential
//! records.
//!
//! Two backends share one contract: a volatile in-memory store and a
//! filesystem store keeping one JSON file per record with atomic
//! temp-file+rename writes. All other components subscribe to the change
//! feed and maintain their own indices.

mod fs;
mod memory;

pub use fs::FileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use tokio::sync::broadcast;

use llmux_provider_core::{CredentialId, CredentialRecord};

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serde json error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("unknown credential: {0}")]
    NotFound(CredentialId),
}

/// Change feed entry; delivered in commit order, subscribers may coalesce.
#[derive(Debug, Clone)]
pub enum ChangeEvent {
    Saved(CredentialRecord),
    Removed(CredentialId),
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Insert or replace a record; returns its id.
    async fn save(&self, record: CredentialRecord) -> StoreResult<CredentialId>;

    async fn delete(&self, id: &str) -> StoreResult<()>;

    async fn get(&self, id: &str) -> StoreResult<CredentialRecord>;

    /// All records, sorted by id for determinism.
    async fn list(&self) -> StoreResult<Vec<CredentialRecord>>;

    /// Subscribe to the change feed.
    fn watch(&self) -> broadcast::Receiver<ChangeEvent>;
}
