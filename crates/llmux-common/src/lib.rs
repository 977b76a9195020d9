use serde::{Deserialize, Serialize};

/// Correlation id attached to every inbound request and all records it emits.
pub fn new_trace_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

/// Failure taxonomy shared by the orchestrator and the ingress layer.
///
/// The orchestrator decides retry behavior from the kind alone; the ingress
/// layer maps it onto a downstream HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Malformed inbound request; returned verbatim, never retried.
    BadRequest,
    /// Inbound access gate rejection; no upstream call is made.
    UnauthorizedInbound,
    /// Upstream quota/rate limit; cooldown the credential and fail over.
    QuotaExceeded,
    /// Transient upstream failure (5xx, 408, connection reset).
    Retryable,
    /// Translator bug or missing registration; surfaced as 502, never
    /// retried.
    Translator,
    /// Everything else; the credential is marked errored.
    Fatal,
}

impl FailureKind {
    pub fn downstream_status(&self) -> u16 {
        match self {
            FailureKind::BadRequest => 400,
            FailureKind::UnauthorizedInbound => 401,
            FailureKind::QuotaExceeded => 429,
            FailureKind::Retryable => 502,
            FailureKind::Translator => 502,
            FailureKind::Fatal => 502,
        }
    }
}

/// Replace characters that are unsafe in credential file names.
///
/// Credential ids double as file names under `auth-dir`; anything outside the
/// portable set becomes `_`.
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizer_replaces_reserved_characters() {
        assert_eq!(sanitize_file_name("a/b:c*d"), "a_b_c_d");
        assert_eq!(sanitize_file_name("user@example.com"), "user@example.com");
    }

    #[test]
    fn quota_maps_to_429() {
        assert_eq!(FailureKind::QuotaExceeded.downstream_status(), 429);
    }
}
