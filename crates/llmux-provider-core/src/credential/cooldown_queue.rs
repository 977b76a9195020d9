use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::SystemTime;

use time::OffsetDateTime;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::time::{Instant, sleep_until};

use crate::events::{Event, EventHub, OperationalEvent};

use super::{CredentialId, CredentialRecord};

/// Min-heap of cooldown deadlines with a background task that prunes expired
/// entries from the records and emits end events. Recovery is also checked on
/// read, so this task only exists for observability and map hygiene.
#[derive(Debug)]
pub(super) struct CooldownQueue {
    heap: Mutex<BinaryHeap<Reverse<(Instant, CredentialId, String)>>>,
    notify: Notify,
}

impl CooldownQueue {
    pub(super) fn new() -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
        }
    }

    pub(super) async fn push(&self, until: Instant, credential_id: CredentialId, model: String) {
        {
            let mut heap = self.heap.lock().await;
            heap.push(Reverse((until, credential_id, model)));
        }
        // Always notify; the background task recomputes the next deadline.
        self.notify.notify_one();
    }

    pub(super) fn spawn_recover_task(
        self: Arc<Self>,
        records: Arc<RwLock<HashMap<CredentialId, CredentialRecord>>>,
        events: EventHub,
    ) {
        tokio::spawn(async move {
            loop {
                let next = {
                    let heap = self.heap.lock().await;
                    heap.peek().map(|Reverse((t, ..))| *t)
                };

                match next {
                    None => {
                        self.notify.notified().await;
                        continue;
                    }
                    Some(deadline) => {
                        tokio::select! {
                            _ = sleep_until(deadline) => {}
                            _ = self.notify.notified() => continue,
                        }
                    }
                }

                let now = Instant::now();
                let mut due = Vec::new();
                {
                    let mut heap = self.heap.lock().await;
                    while let Some(Reverse((t, id, model))) = heap.peek().cloned() {
                        if t > now {
                            break;
                        }
                        heap.pop();
                        due.push((id, model));
                    }
                }
                if due.is_empty() {
                    continue;
                }

                let wall_now = OffsetDateTime::now_utc();
                let mut guard = records.write().await;
                for (id, model) in due {
                    let Some(record) = guard.get_mut(&id) else {
                        continue;
                    };
                    // Guard against stale entries superseded by a later,
                    // longer cooldown.
                    let expired = record
                        .cooldowns
                        .get(&model)
                        .is_some_and(|unblock| *unblock <= wall_now);
                    if expired {
                        record.cooldowns.remove(&model);
                        events
                            .emit(Event::Operational(OperationalEvent::CooldownEnd {
                                at: SystemTime::now(),
                                credential_id: id.clone(),
                                model,
                            }))
                            .await;
                    }
                }
            }
        });
    }
}
