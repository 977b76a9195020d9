use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use time::OffsetDateTime;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::events::{Event, EventHub, OperationalEvent};
use crate::family::ProviderFamily;

use super::cooldown_queue::CooldownQueue;
use super::{CooldownReason, CredentialId, CredentialRecord, CredentialStatus};

/// Live in-memory projection of the credential store.
///
/// Reads are concurrent, writes exclusive. The pool never persists anything
/// itself; callers that mutate durable fields (tokens, status) write through
/// the store and the change feed loops back here.
pub struct CredentialPool {
    records: Arc<RwLock<HashMap<CredentialId, CredentialRecord>>>,
    by_family: RwLock<HashMap<ProviderFamily, Vec<CredentialId>>>,
    events: EventHub,
    queue: Arc<CooldownQueue>,
}

impl CredentialPool {
    pub fn new(events: EventHub) -> Self {
        let records = Arc::new(RwLock::new(HashMap::new()));
        let queue = Arc::new(CooldownQueue::new());
        queue.clone().spawn_recover_task(records.clone(), events.clone());
        Self {
            records,
            by_family: RwLock::new(HashMap::new()),
            events,
            queue,
        }
    }

    pub fn events(&self) -> &EventHub {
        &self.events
    }

    pub async fn upsert(&self, record: CredentialRecord) {
        let id = record.id.clone();
        let family = record.family;
        self.records.write().await.insert(id.clone(), record);
        let mut by_family = self.by_family.write().await;
        // Drop the id from any previous family bucket; family edits are rare
        // but legal through the management surface.
        for ids in by_family.values_mut() {
            ids.retain(|existing| *existing != id);
        }
        let ids = by_family.entry(family).or_default();
        if !ids.contains(&id) {
            ids.push(id);
            ids.sort();
        }
    }

    pub async fn remove(&self, id: &str) {
        self.records.write().await.remove(id);
        let mut by_family = self.by_family.write().await;
        for ids in by_family.values_mut() {
            ids.retain(|existing| existing != id);
        }
    }

    pub async fn get(&self, id: &str) -> Option<CredentialRecord> {
        self.records.read().await.get(id).cloned()
    }

    pub async fn list(&self) -> Vec<CredentialRecord> {
        let mut out: Vec<CredentialRecord> =
            self.records.read().await.values().cloned().collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Candidate records of one family, cooldowns pruned. Inactive records
    /// are included; the selector filters them so it can distinguish
    /// "all cooling" from "none usable".
    pub async fn candidates(&self, family: ProviderFamily) -> Vec<CredentialRecord> {
        let ids = {
            let guard = self.by_family.read().await;
            guard.get(&family).cloned().unwrap_or_default()
        };
        let now = OffsetDateTime::now_utc();
        let guard = self.records.read().await;
        ids.iter()
            .filter_map(|id| guard.get(id))
            .map(|record| {
                let mut record = record.clone();
                record.prune_cooldowns(now);
                record
            })
            .collect()
    }

    /// Write a per-model cooldown and schedule its recovery.
    pub async fn report_cooldown(
        &self,
        id: &str,
        model: &str,
        duration: Duration,
        reason: CooldownReason,
    ) {
        let unblock = OffsetDateTime::now_utc() + duration;
        {
            let mut guard = self.records.write().await;
            let Some(record) = guard.get_mut(id) else {
                return;
            };
            record.cooldowns.insert(model.to_string(), unblock);
        }
        self.queue
            .push(Instant::now() + duration, id.to_string(), model.to_string())
            .await;
        self.events
            .emit(Event::Operational(OperationalEvent::CooldownStart {
                at: SystemTime::now(),
                credential_id: id.to_string(),
                model: model.to_string(),
                reason,
                duration,
            }))
            .await;
    }

    pub async fn set_status(&self, id: &str, status: CredentialStatus, error: Option<String>) {
        let mut changed = false;
        {
            let mut guard = self.records.write().await;
            if let Some(record) = guard.get_mut(id) {
                changed = record.status != status;
                record.status = status;
                record.last_error = error.clone();
            }
        }
        if changed {
            self.events
                .emit(Event::Operational(OperationalEvent::StatusChange {
                    at: SystemTime::now(),
                    credential_id: id.to_string(),
                    status,
                    error,
                }))
                .await;
        }
    }

    pub async fn touch_last_used(&self, id: &str) {
        if let Some(record) = self.records.write().await.get_mut(id) {
            record.last_used_at = Some(OffsetDateTime::now_utc());
        }
    }

    /// Swap in a freshly-refreshed token without disturbing other fields.
    pub async fn update_payload(&self, id: &str, payload: super::CredentialPayload) {
        if let Some(record) = self.records.write().await.get_mut(id) {
            record.payload = payload;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::CredentialPayload;

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
    async fn candidates_are_sorted_and_pruned() {
        let pool = CredentialPool::new(EventHub::new(8));
        pool.upsert(record("b")).await;
        pool.upsert(record("a")).await;
        pool.report_cooldown("a", "m", Duration::from_millis(1), CooldownReason::RateLimit)
            .await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let candidates = pool.candidates(ProviderFamily::ClaudeApi).await;
        let ids: Vec<&str> = candidates.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(candidates[0].cooldowns.is_empty());
    }

    #[tokio::test]
    async fn cooldown_recovers_via_queue_with_events() {
        let hub = EventHub::new(16);
        let mut rx = hub.subscribe();
        let pool = CredentialPool::new(hub);
        pool.upsert(record("c1")).await;
        pool.report_cooldown("c1", "m", Duration::from_millis(30), CooldownReason::Quota)
            .await;

        let ev = tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            ev,
            Event::Operational(OperationalEvent::CooldownStart { .. })
        ));

        let ev = tokio::time::timeout(Duration::from_millis(500), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            ev,
            Event::Operational(OperationalEvent::CooldownEnd { .. })
        ));
        let record = pool.get("c1").await.unwrap();
        assert!(record.cooldowns.is_empty());
    }
}
