use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;

use llmux_core::RefreshWorker;
use llmux_provider_core::{
    CredentialPayload, CredentialRecord, CredentialStatus, EventHub, ProviderFamily,
    RefreshError, RefreshedToken, TokenRefresher,
};
use llmux_store::{CredentialStore, MemoryStore};

struct FakeRefresher {
    calls: AtomicU32,
    outcome: fn(u32) -> Result<RefreshedToken, RefreshError>,
}

#[async_trait]
impl TokenRefresher for FakeRefresher {
    async fn refresh(&self, _record: &CredentialRecord) -> Result<RefreshedToken, RefreshError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        (self.outcome)(call)
    }
}

fn oauth_record(id: &str, expires_in_secs: i64) -> CredentialRecord {
    CredentialRecord::new(
        id,
        ProviderFamily::GeminiCli,
        CredentialPayload::OAuth {
            access_token: "stale-token".to_string(),
            refresh_token: "refresh-1".to_string(),
            expires_at: time::OffsetDateTime::now_utc().unix_timestamp() + expires_in_secs,
        },
    )
}

fn worker_with(
    store: Arc<MemoryStore>,
    refresher: Arc<FakeRefresher>,
) -> Arc<RefreshWorker> {
    let mut refreshers: HashMap<ProviderFamily, Arc<dyn TokenRefresher>> = HashMap::new();
    refreshers.insert(ProviderFamily::GeminiCli, refresher);
    Arc::new(RefreshWorker::new(store, refreshers, EventHub::new(16)))
}

/// A credential about to expire is refreshed before it does, and the new
/// token is visible through the store.
#[tokio::test]
async fn near_expiry_token_is_refreshed() {
    let store = Arc::new(MemoryStore::new());
    store.save(oauth_record("g1", 1)).await.unwrap();

    let refresher = Arc::new(FakeRefresher {
        calls: AtomicU32::new(0),
        outcome: |_| {
            Ok(RefreshedToken {
                access_token: "fresh-token".to_string(),
                refresh_token: Some("refresh-2".to_string()),
                expires_at: time::OffsetDateTime::now_utc().unix_timestamp() + 3600,
            })
        },
    });
    let worker = worker_with(store.clone(), refresher.clone());
    worker.run_once().await;

    assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    let record = store.get("g1").await.unwrap();
    assert_eq!(record.status, CredentialStatus::Active);
    let CredentialPayload::OAuth {
        access_token,
        refresh_token,
        expires_at,
    } = &record.payload
    else {
        panic!("payload variant changed");
    };
    assert_eq!(access_token, "fresh-token");
    assert_eq!(refresh_token, "refresh-2");
    assert!(*expires_at > time::OffsetDateTime::now_utc().unix_timestamp() + 3000);
}

#[tokio::test]
async fn fresh_tokens_are_left_alone() {
    let store = Arc::new(MemoryStore::new());
    store.save(oauth_record("g1", 7200)).await.unwrap();

    let refresher = Arc::new(FakeRefresher {
        calls: AtomicU32::new(0),
        outcome: |_| panic!("should not be called"),
    });
    let worker = worker_with(store.clone(), refresher.clone());
    worker.run_once().await;
    assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn invalid_grant_marks_credential_errored() {
    let store = Arc::new(MemoryStore::new());
    store.save(oauth_record("g1", 1)).await.unwrap();

    let refresher = Arc::new(FakeRefresher {
        calls: AtomicU32::new(0),
        outcome: |_| Err(RefreshError::Terminal("invalid_grant".to_string())),
    });
    let worker = worker_with(store.clone(), refresher);
    worker.run_once().await;

    let record = store.get("g1").await.unwrap();
    assert_eq!(record.status, CredentialStatus::Error);
    assert!(record.last_error.as_deref().unwrap().contains("invalid_grant"));
}

/// Transient failures back off: an immediate second scan does not retry.
#[tokio::test]
async fn transient_failure_backs_off() {
    let store = Arc::new(MemoryStore::new());
    store.save(oauth_record("g1", 1)).await.unwrap();

    let refresher = Arc::new(FakeRefresher {
        calls: AtomicU32::new(0),
        outcome: |_| Err(RefreshError::Transient("connect timeout".to_string())),
    });
    let worker = worker_with(store.clone(), refresher.clone());
    worker.run_once().await;
    worker.run_once().await;
    worker.run_once().await;

    assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    // Still active; transient failures never kill the credential.
    let record = store.get("g1").await.unwrap();
    assert_eq!(record.status, CredentialStatus::Active);
}
