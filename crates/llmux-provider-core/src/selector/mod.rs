use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::credential::{CredentialId, CredentialRecord};
use crate::headers::{Headers, header_get};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    #[default]
    Priority,
    #[serde(alias = "weight")]
    LoadBalance,
    RoundRobin,
    Sticky,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PickError {
    /// Every candidate is cooling down for this model; retry after the
    /// shortest remaining cooldown.
    Cooldown { reset_in: Duration },
    /// No active candidate exists at all.
    Unavailable,
}

/// Request-scoped values the sticky strategy derives its session id from.
/// Middleware fills this instead of threading implicit context values.
#[derive(Debug, Clone, Default)]
pub struct RequestScope {
    /// Values promoted by middleware (`session-id`, `user-id`, `client-id`).
    pub values: HashMap<String, String>,
    /// Request `options.metadata`, flattened to strings.
    pub metadata: HashMap<String, String>,
    pub headers: Headers,
}

const SCOPE_KEYS: [&str; 3] = ["session-id", "user-id", "client-id"];
const HEADER_KEYS: [&str; 4] = ["X-Session-Id", "X-Session-ID", "X-User-Id", "X-User-ID"];

impl RequestScope {
    /// Session id precedence: promoted context values, then request
    /// metadata, then session headers, finally the Authorization value as a
    /// last-resort stable token. Stored raw, never hashed.
    pub fn session_id(&self) -> Option<String> {
        for key in SCOPE_KEYS {
            if let Some(value) = self.values.get(key).filter(|value| !value.is_empty()) {
                return Some(value.clone());
            }
        }
        for key in SCOPE_KEYS {
            if let Some(value) = self.metadata.get(key).filter(|value| !value.is_empty()) {
                return Some(value.clone());
            }
        }
        for key in HEADER_KEYS {
            if let Some(value) = header_get(&self.headers, key).filter(|value| !value.is_empty()) {
                return Some(value.to_string());
            }
        }
        header_get(&self.headers, "Authorization")
            .filter(|value| !value.is_empty())
            .map(|value| value.to_string())
    }
}

#[derive(Default)]
struct SelectorState {
    /// (provider, model) -> monotonic cursor, modulo 2^31.
    cursors: HashMap<(String, String), u32>,
    /// (provider, model, session) -> bound credential.
    bindings: HashMap<(String, String, String), CredentialId>,
}

/// Picks one credential from a filtered candidate set under a strategy.
///
/// The single mutex guards only the cursor and binding maps; it is never held
/// across IO or while inspecting candidate payloads.
pub struct Selector {
    state: Mutex<SelectorState>,
}

impl Default for Selector {
    fn default() -> Self {
        Self::new()
    }
}

impl Selector {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SelectorState::default()),
        }
    }

    pub fn pick(
        &self,
        provider: &str,
        model: &str,
        strategy: Strategy,
        scope: &RequestScope,
        candidates: &[CredentialRecord],
    ) -> Result<CredentialRecord, PickError> {
        let now = OffsetDateTime::now_utc();

        let active: Vec<&CredentialRecord> = candidates
            .iter()
            .filter(|record| record.is_active())
            .collect();
        if active.is_empty() {
            return Err(PickError::Unavailable);
        }

        let usable: Vec<&CredentialRecord> = active
            .iter()
            .copied()
            .filter(|record| !record.is_cooling(model, now))
            .collect();
        if usable.is_empty() {
            let reset_in = active
                .iter()
                .filter_map(|record| record.cooldowns.get(model))
                .map(|unblock| *unblock - now)
                .min()
                .and_then(|span| Duration::try_from(span).ok())
                .unwrap_or(Duration::ZERO);
            return Err(PickError::Cooldown { reset_in });
        }

        let chosen = match strategy {
            Strategy::Priority => self.pick_priority(provider, model, &usable),
            Strategy::LoadBalance => pick_weighted(&usable),
            Strategy::RoundRobin => self.pick_round_robin(provider, model, &usable),
            Strategy::Sticky => self.pick_sticky(provider, model, scope, &usable),
        };
        Ok(chosen.clone())
    }

    /// Drop sticky bindings and let the next pick rebind; called when a
    /// credential is removed or leaves `active`.
    pub fn forget_credential(&self, credential_id: &str) {
        let mut state = self.state.lock().expect("selector state lock");
        state.bindings.retain(|_, bound| bound != credential_id);
    }

    fn pick_priority<'a>(
        &self,
        provider: &str,
        model: &str,
        usable: &[&'a CredentialRecord],
    ) -> &'a CredentialRecord {
        let mut sorted: Vec<&CredentialRecord> = usable.to_vec();
        sorted.sort_by(|a, b| (a.priority, &a.id).cmp(&(b.priority, &b.id)));
        let best = sorted[0].priority;
        let tied: Vec<&CredentialRecord> = sorted
            .into_iter()
            .take_while(|record| record.priority == best)
            .collect();
        if tied.len() == 1 {
            tied[0]
        } else {
            self.pick_round_robin(provider, model, &tied)
        }
    }

    fn pick_round_robin<'a>(
        &self,
        provider: &str,
        model: &str,
        usable: &[&'a CredentialRecord],
    ) -> &'a CredentialRecord {
        let mut sorted: Vec<&CredentialRecord> = usable.to_vec();
        sorted.sort_by(|a, b| a.id.cmp(&b.id));
        let cursor = {
            let mut state = self.state.lock().expect("selector state lock");
            let slot = state
                .cursors
                .entry((provider.to_string(), model.to_string()))
                .or_insert(0);
            let value = *slot;
            *slot = (*slot + 1) & 0x7fff_ffff;
            value
        };
        sorted[cursor as usize % sorted.len()]
    }

    fn pick_sticky<'a>(
        &self,
        provider: &str,
        model: &str,
        scope: &RequestScope,
        usable: &[&'a CredentialRecord],
    ) -> &'a CredentialRecord {
        let Some(session) = scope.session_id() else {
            return self.pick_priority(provider, model, usable);
        };
        let key = (provider.to_string(), model.to_string(), session);

        {
            let state = self.state.lock().expect("selector state lock");
            if let Some(bound) = state.bindings.get(&key)
                && let Some(record) = usable.iter().copied().find(|record| record.id == *bound)
            {
                return record;
            }
        }

        let chosen = self.pick_priority(provider, model, usable);
        let mut state = self.state.lock().expect("selector state lock");
        state.bindings.insert(key, chosen.id.clone());
        chosen
    }
}

fn pick_weighted<'a>(usable: &[&'a CredentialRecord]) -> &'a CredentialRecord {
    let total: u64 = usable.iter().map(|record| record.weight.max(1) as u64).sum();
    let mut draw = rand::rng().random_range(0..total);
    for record in usable {
        let weight = record.weight.max(1) as u64;
        if draw < weight {
            return record;
        }
        draw -= weight;
    }
    usable[usable.len() - 1]
}
