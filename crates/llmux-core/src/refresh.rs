use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use time::OffsetDateTime;
use tokio::sync::Mutex;

use llmux_provider_core::{
    CredentialRecord, CredentialStatus, Event, EventHub, OperationalEvent, ProviderFamily,
    RefreshError, TokenRefresher, apply_refresh,
};
use llmux_store::CredentialStore;

pub const DEFAULT_TICK: Duration = Duration::from_secs(30);
pub const DEFAULT_LEAD: Duration = Duration::from_secs(300);

/// Failure backoff ladder: 1 m, 5 m, 30 m, then hourly.
const BACKOFF: [Duration; 3] = [
    Duration::from_secs(60),
    Duration::from_secs(300),
    Duration::from_secs(1800),
];
const BACKOFF_CAP: Duration = Duration::from_secs(3600);

/// Keeps OAuth credentials fresh ahead of expiry.
///
/// Every tick it scans active OAuth records whose expiry is inside the lead
/// window and refreshes them through the family's refresher. Tokens are
/// persisted through the store so the change feed updates the pool before
/// the old token expires; no request in flight observes an invalid token.
pub struct RefreshWorker {
    store: Arc<dyn CredentialStore>,
    refreshers: HashMap<ProviderFamily, Arc<dyn TokenRefresher>>,
    events: EventHub,
    tick: Duration,
    lead: Duration,
    inner: Mutex<WorkerState>,
}

#[derive(Default)]
struct WorkerState {
    /// Records currently being refreshed; prevents concurrent refresh of the
    /// same credential.
    in_flight: HashSet<String>,
    /// Transient-failure counters and earliest next attempt per record.
    failures: HashMap<String, (u32, OffsetDateTime)>,
}

impl RefreshWorker {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        refreshers: HashMap<ProviderFamily, Arc<dyn TokenRefresher>>,
        events: EventHub,
    ) -> Self {
        Self {
            store,
            refreshers,
            events,
            tick: DEFAULT_TICK,
            lead: DEFAULT_LEAD,
            inner: Mutex::new(WorkerState::default()),
        }
    }

    pub fn with_timing(mut self, tick: Duration, lead: Duration) -> Self {
        self.tick = tick;
        self.lead = lead;
        self
    }

    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                self.run_once().await;
            }
        })
    }

    /// One scan pass. Public for tests.
    pub async fn run_once(&self) {
        let records = match self.store.list().await {
            Ok(records) => records,
            Err(err) => {
                tracing::error!(error = %err, "refresh scan: store list failed");
                return;
            }
        };
        let now = OffsetDateTime::now_utc();

        for record in records {
            if !self.needs_refresh(&record, now).await {
                continue;
            }
            let Some(refresher) = self.refreshers.get(&record.family).cloned() else {
                continue;
            };
            self.refresh_one(record, refresher).await;
        }
    }

    async fn needs_refresh(&self, record: &CredentialRecord, now: OffsetDateTime) -> bool {
        if record.status != CredentialStatus::Active || !record.family.is_oauth() {
            return false;
        }
        let Some(expiry) = record.oauth_expiry() else {
            return false;
        };
        if expiry - now >= self.lead {
            return false;
        }
        let state = self.inner.lock().await;
        if state.in_flight.contains(&record.id) {
            return false;
        }
        if let Some((_, next_attempt)) = state.failures.get(&record.id)
            && *next_attempt > now
        {
            return false;
        }
        true
    }

    async fn refresh_one(&self, record: CredentialRecord, refresher: Arc<dyn TokenRefresher>) {
        {
            let mut state = self.inner.lock().await;
            if !state.in_flight.insert(record.id.clone()) {
                return;
            }
        }

        let id = record.id.clone();
        let outcome = refresher.refresh(&record).await;
        match outcome {
            Ok(token) => {
                let mut updated = record;
                updated.payload = apply_refresh(&updated.payload, &token);
                updated.status = CredentialStatus::Active;
                updated.last_error = None;
                let expires_at = token.expires_at;
                if let Err(err) = self.store.save(updated).await {
                    tracing::error!(credential_id = %id, error = %err,
                        "persisting refreshed credential failed");
                } else {
                    self.events
                        .emit(Event::Operational(OperationalEvent::RefreshOk {
                            at: SystemTime::now(),
                            credential_id: id.clone(),
                            expires_at,
                        }))
                        .await;
                }
                let mut state = self.inner.lock().await;
                state.failures.remove(&id);
                state.in_flight.remove(&id);
            }
            Err(RefreshError::Terminal(message)) => {
                tracing::error!(credential_id = %id, error = %message,
                    "refresh token rejected; credential needs re-auth");
                let mut dead = record;
                dead.status = CredentialStatus::Error;
                dead.last_error = Some(message.clone());
                let _ = self.store.save(dead).await;
                self.events
                    .emit(Event::Operational(OperationalEvent::RefreshFailed {
                        at: SystemTime::now(),
                        credential_id: id.clone(),
                        terminal: true,
                        error: message,
                    }))
                    .await;
                let mut state = self.inner.lock().await;
                state.failures.remove(&id);
                state.in_flight.remove(&id);
            }
            Err(RefreshError::Transient(message)) => {
                let mut state = self.inner.lock().await;
                let count = state.failures.get(&id).map(|(count, _)| *count).unwrap_or(0);
                let delay = BACKOFF
                    .get(count as usize)
                    .copied()
                    .unwrap_or(BACKOFF_CAP);
                state
                    .failures
                    .insert(id.clone(), (count + 1, OffsetDateTime::now_utc() + delay));
                state.in_flight.remove(&id);
                drop(state);
                tracing::warn!(credential_id = %id, error = %message,
                    retry_in_secs = delay.as_secs(), "refresh failed; backing off");
                self.events
                    .emit(Event::Operational(OperationalEvent::RefreshFailed {
                        at: SystemTime::now(),
                        credential_id: id,
                        terminal: false,
                        error: message,
                    }))
                    .await;
            }
        }
    }
}
