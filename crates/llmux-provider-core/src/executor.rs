use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use llmux_transform::Proto;

use crate::credential::{CredentialPayload, CredentialRecord};
use crate::family::ProviderFamily;
use crate::headers::{Headers, header_get};

/// Request-scoped context passed to executors. No IO handles here; executors
/// only build requests and classify outcomes.
#[derive(Debug, Clone)]
pub struct UpstreamCtx {
    pub trace_id: String,
    pub model: String,
    pub stream: bool,
    pub attempt: u32,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: &'static str,
    pub url: String,
    pub headers: Headers,
    pub body: Option<Bytes>,
    pub stream: bool,
}

/// Failure classes the orchestrator keys retry policy on (§7 of the error
/// design): each class maps to exactly one recovery behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorClass {
    /// 5xx (except 501), 408, connection reset: try another credential.
    Retryable,
    /// 429 or quota markers: cooldown this credential for this model.
    QuotaExceeded { retry_after: Option<Duration>, daily: bool },
    /// 401/403-auth: refresh for OAuth credentials, else mark errored.
    Unauthorized,
    /// Other 4xx: the client's fault, surfaced verbatim.
    BadRequest,
    /// Everything else: mark the credential errored, 502 the client.
    Fatal,
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("invalid credential: {0}")]
    InvalidCredential(String),
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
    #[error("{0}")]
    Other(String),
}

/// Builds family-specific HTTP requests and interprets their failures.
/// One implementation per provider family; dispatch is a map lookup on the
/// family tag.
#[async_trait]
pub trait UpstreamExecutor: Send + Sync {
    fn family(&self) -> ProviderFamily;

    fn wire_proto(&self) -> Proto {
        self.family().wire_proto()
    }

    /// Build the generate-content call. `body` is already translated into the
    /// family's wire protocol; the executor applies base URL, auth headers,
    /// and any vendor envelope.
    fn build_generate(
        &self,
        ctx: &UpstreamCtx,
        record: &CredentialRecord,
        body: Bytes,
    ) -> Result<UpstreamRequest, ExecutorError>;

    /// Classify a non-2xx response or transport failure.
    fn classify(&self, status: u16, headers: &Headers, body: &[u8]) -> ErrorClass {
        default_classify(self.family(), status, headers, body)
    }

    /// Refresher for this family's OAuth credentials, when it has any.
    fn refresher(&self) -> Option<&dyn TokenRefresher> {
        None
    }
}

#[derive(Debug, Clone)]
pub struct RefreshedToken {
    pub access_token: String,
    /// Absent when the provider does not rotate refresh tokens.
    pub refresh_token: Option<String>,
    pub expires_at: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    /// invalid_grant and friends; the credential is dead until re-auth.
    #[error("terminal refresh failure: {0}")]
    Terminal(String),
    /// Network or 5xx; retried with backoff.
    #[error("transient refresh failure: {0}")]
    Transient(String),
}

#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, record: &CredentialRecord) -> Result<RefreshedToken, RefreshError>;
}

/// Apply a refresh result to a credential payload.
pub fn apply_refresh(payload: &CredentialPayload, token: &RefreshedToken) -> CredentialPayload {
    match payload {
        CredentialPayload::OAuth { refresh_token, .. } => CredentialPayload::OAuth {
            access_token: token.access_token.clone(),
            refresh_token: token
                .refresh_token
                .clone()
                .unwrap_or_else(|| refresh_token.clone()),
            expires_at: token.expires_at,
        },
        other => other.clone(),
    }
}

const QUOTA_MARKERS: [&str; 4] = [
    "RESOURCE_EXHAUSTED",
    "insufficient_quota",
    "rate_limit_exceeded",
    "quota_exceeded",
];
const DAILY_MARKERS: [&str; 3] = ["daily", "per day", "quota will reset"];

pub fn default_classify(
    family: ProviderFamily,
    status: u16,
    headers: &Headers,
    body: &[u8],
) -> ErrorClass {
    let text = std::str::from_utf8(body).unwrap_or("");
    match status {
        429 => ErrorClass::QuotaExceeded {
            retry_after: parse_retry_after(headers),
            daily: DAILY_MARKERS.iter().any(|marker| text.contains(marker)),
        },
        401 => ErrorClass::Unauthorized,
        403 => {
            if QUOTA_MARKERS.iter().any(|marker| text.contains(marker)) {
                ErrorClass::QuotaExceeded {
                    retry_after: parse_retry_after(headers),
                    daily: family.is_oauth()
                        && DAILY_MARKERS.iter().any(|marker| text.contains(marker)),
                }
            } else {
                ErrorClass::Unauthorized
            }
        }
        408 => ErrorClass::Retryable,
        400..=499 => ErrorClass::BadRequest,
        501 => ErrorClass::Fatal,
        500..=599 => ErrorClass::Retryable,
        _ => ErrorClass::Fatal,
    }
}

fn parse_retry_after(headers: &Headers) -> Option<Duration> {
    let value = header_get(headers, "retry-after")?.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    None
}

/// Cooldown duration for a quota failure, honoring `Retry-After` when given.
pub fn cooldown_for(family: ProviderFamily, class: &ErrorClass) -> Option<Duration> {
    match class {
        ErrorClass::QuotaExceeded { retry_after, daily } => Some(match retry_after {
            Some(retry_after) => *retry_after,
            None if *daily => family.quota_cooldown(),
            None => family.rate_limit_cooldown(),
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_matches_error_policy() {
        let family = ProviderFamily::OpenaiCompat;
        assert_eq!(
            default_classify(family, 503, &Vec::new(), b""),
            ErrorClass::Retryable
        );
        assert_eq!(
            default_classify(family, 501, &Vec::new(), b""),
            ErrorClass::Fatal
        );
        assert_eq!(
            default_classify(family, 408, &Vec::new(), b""),
            ErrorClass::Retryable
        );
        assert_eq!(
            default_classify(family, 404, &Vec::new(), b""),
            ErrorClass::BadRequest
        );
        assert_eq!(
            default_classify(family, 401, &Vec::new(), b""),
            ErrorClass::Unauthorized
        );
    }

    #[test]
    fn resource_exhausted_403_is_quota() {
        let class = default_classify(
            ProviderFamily::GeminiCli,
            403,
            &Vec::new(),
            br#"{"error":{"status":"RESOURCE_EXHAUSTED"}}"#,
        );
        assert!(matches!(class, ErrorClass::QuotaExceeded { .. }));
    }

    #[test]
    fn retry_after_drives_cooldown() {
        let headers = vec![("Retry-After".to_string(), "2".to_string())];
        let class = default_classify(ProviderFamily::ClaudeApi, 429, &headers, b"");
        assert_eq!(
            cooldown_for(ProviderFamily::ClaudeApi, &class),
            Some(Duration::from_secs(2))
        );
    }
}
