use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::credential::{CooldownReason, CredentialId, CredentialStatus};
use crate::family::ProviderFamily;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    Access(AccessRecord),
    Usage(UsageRecord),
    Operational(OperationalEvent),
}

/// One line per inbound request, success or failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessRecord {
    pub trace_id: String,
    pub at: SystemTime,
    pub method: String,
    pub path: String,
    pub inbound_model: Option<String>,
    pub provider: Option<ProviderFamily>,
    /// Redacted credential reference, never the raw id of a secret.
    pub credential_id: Option<CredentialId>,
    pub upstream_status: Option<u16>,
    pub response_status: u16,
    pub duration_ms: u64,
}

/// One usage record per request, even when only a failure cause is known.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub trace_id: String,
    pub at: SystemTime,
    pub model: String,
    pub provider: Option<ProviderFamily>,
    pub credential_id: Option<CredentialId>,
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
    pub total_tokens: Option<i64>,
    pub failure: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OperationalEvent {
    CooldownStart {
        at: SystemTime,
        credential_id: CredentialId,
        model: String,
        reason: CooldownReason,
        duration: Duration,
    },
    CooldownEnd {
        at: SystemTime,
        credential_id: CredentialId,
        model: String,
    },
    StatusChange {
        at: SystemTime,
        credential_id: CredentialId,
        status: CredentialStatus,
        error: Option<String>,
    },
    RefreshOk {
        at: SystemTime,
        credential_id: CredentialId,
        expires_at: i64,
    },
    RefreshFailed {
        at: SystemTime,
        credential_id: CredentialId,
        terminal: bool,
        error: String,
    },
}
