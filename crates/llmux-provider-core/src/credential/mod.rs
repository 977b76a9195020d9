mod cooldown_queue;
mod pool;

pub use pool::CredentialPool;

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::family::ProviderFamily;

pub type CredentialId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialStatus {
    Active,
    Disabled,
    Error,
    Refreshing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CooldownReason {
    RateLimit,
    Quota,
    Manual,
}

/// Exactly one variant is populated per record; the family tag decides which
/// shape is valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialPayload {
    OAuth {
        access_token: String,
        refresh_token: String,
        /// Unix seconds.
        expires_at: i64,
    },
    ApiKey {
        api_key: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        base_url: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        headers: Vec<(String, String)>,
    },
    Cookie {
        blob: String,
    },
}

impl CredentialPayload {
    pub fn is_valid_for(&self, family: ProviderFamily) -> bool {
        match self {
            CredentialPayload::OAuth { access_token, .. } => {
                family.is_oauth() && !access_token.is_empty()
            }
            CredentialPayload::ApiKey { api_key, .. } => {
                !family.is_oauth() && !api_key.is_empty()
            }
            CredentialPayload::Cookie { blob } => !blob.is_empty(),
        }
    }

    pub fn access_token(&self) -> Option<&str> {
        match self {
            CredentialPayload::OAuth { access_token, .. } => Some(access_token),
            _ => None,
        }
    }

    pub fn api_key(&self) -> Option<&str> {
        match self {
            CredentialPayload::ApiKey { api_key, .. } => Some(api_key),
            _ => None,
        }
    }

    pub fn base_url(&self) -> Option<&str> {
        match self {
            CredentialPayload::ApiKey { base_url, .. } => base_url.as_deref(),
            _ => None,
        }
    }
}

/// One authenticated upstream account. The store is the source of truth;
/// everything else holds projections of these records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub id: CredentialId,
    pub family: ProviderFamily,
    pub status: CredentialStatus,
    /// Lower is preferred.
    #[serde(default)]
    pub priority: i32,
    /// Relative share under the load-balance strategy; floored to 1.
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Routing prefix; `teamA` makes the credential serve `teamA/<model>`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    pub payload: CredentialPayload,
    /// Per-model cooldowns; entries with unblock time <= now are pruned on
    /// read.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub cooldowns: HashMap<String, OffsetDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<OffsetDateTime>,
    /// Provider-specific extras (project ids, account ids, tier markers).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

fn default_weight() -> u32 {
    1
}

impl CredentialRecord {
    pub fn new(id: impl Into<String>, family: ProviderFamily, payload: CredentialPayload) -> Self {
        Self {
            id: id.into(),
            family,
            status: CredentialStatus::Active,
            priority: 0,
            weight: 1,
            tags: Vec::new(),
            prefix: None,
            payload,
            cooldowns: HashMap::new(),
            last_error: None,
            last_used_at: None,
            attributes: BTreeMap::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == CredentialStatus::Active && self.payload.is_valid_for(self.family)
    }

    /// Whether `model` is currently cooling down on this credential.
    pub fn is_cooling(&self, model: &str, now: OffsetDateTime) -> bool {
        self.cooldowns
            .get(model)
            .is_some_and(|unblock| *unblock > now)
    }

    /// Drop expired cooldown entries.
    pub fn prune_cooldowns(&mut self, now: OffsetDateTime) {
        self.cooldowns.retain(|_, unblock| *unblock > now);
    }

    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(|value| value.as_str())
    }

    /// OAuth expiry as wall-clock time, if this is an OAuth record.
    pub fn oauth_expiry(&self) -> Option<OffsetDateTime> {
        match &self.payload {
            CredentialPayload::OAuth { expires_at, .. } => {
                OffsetDateTime::from_unix_timestamp(*expires_at).ok()
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_validity_follows_family() {
        let oauth = CredentialPayload::OAuth {
            access_token: "tok".to_string(),
            refresh_token: "ref".to_string(),
            expires_at: 0,
        };
        assert!(oauth.is_valid_for(ProviderFamily::GeminiCli));
        assert!(!oauth.is_valid_for(ProviderFamily::ClaudeApi));

        let key = CredentialPayload::ApiKey {
            api_key: "sk-test".to_string(),
            base_url: None,
            headers: Vec::new(),
        };
        assert!(key.is_valid_for(ProviderFamily::ClaudeApi));
        assert!(!key.is_valid_for(ProviderFamily::Codex));
    }

    #[test]
    fn expired_cooldowns_are_pruned() {
        let mut record = CredentialRecord::new(
            "c1",
            ProviderFamily::ClaudeApi,
            CredentialPayload::ApiKey {
                api_key: "sk".to_string(),
                base_url: None,
                headers: Vec::new(),
            },
        );
        let now = OffsetDateTime::now_utc();
        record
            .cooldowns
            .insert("old".to_string(), now - time::Duration::seconds(1));
        record
            .cooldowns
            .insert("live".to_string(), now + time::Duration::seconds(60));
        record.prune_cooldowns(now);
        assert!(!record.cooldowns.contains_key("old"));
        assert!(record.is_cooling("live", now));
    }
}
