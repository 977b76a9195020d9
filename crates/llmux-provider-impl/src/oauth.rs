//! Shared OAuth token-endpoint plumbing for the per-family refreshers.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use time::OffsetDateTime;

use llmux_provider_core::{
    CredentialPayload, CredentialRecord, RefreshError, RefreshedToken, TokenRefresher,
};

const REFRESH_TIMEOUT: Duration = Duration::from_secs(30);

/// A family's token endpoint and client registration.
#[derive(Debug, Clone)]
pub struct OAuthEndpoint {
    pub token_url: &'static str,
    pub client_id: &'static str,
    pub client_secret: Option<&'static str>,
    /// Sent as `grant_type`; always `refresh_token` for the families here.
    pub grant_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Form-POSTs `refresh_token` grants. One instance per family so the worker
/// can hold `dyn TokenRefresher` without caring which IdP answers.
pub struct OAuthHttp {
    endpoint: OAuthEndpoint,
}

impl OAuthHttp {
    pub fn new(endpoint: OAuthEndpoint) -> Self {
        Self { endpoint }
    }
}

#[async_trait]
impl TokenRefresher for OAuthHttp {
    async fn refresh(&self, record: &CredentialRecord) -> Result<RefreshedToken, RefreshError> {
        let CredentialPayload::OAuth { refresh_token, .. } = &record.payload else {
            return Err(RefreshError::Terminal(
                "credential has no refresh token".to_string(),
            ));
        };
        if refresh_token.is_empty() {
            return Err(RefreshError::Terminal("empty refresh token".to_string()));
        }

        let mut form: Vec<(&str, &str)> = vec![
            ("grant_type", self.endpoint.grant_type),
            ("refresh_token", refresh_token.as_str()),
            ("client_id", self.endpoint.client_id),
        ];
        if let Some(secret) = self.endpoint.client_secret {
            form.push(("client_secret", secret));
        }
        let body = serde_urlencoded::to_string(&form)
            .map_err(|err| RefreshError::Terminal(err.to_string()))?;

        let client = wreq::Client::builder()
            .timeout(REFRESH_TIMEOUT)
            .build()
            .map_err(|err| RefreshError::Transient(err.to_string()))?;
        let response = client
            .post(self.endpoint.token_url)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .header("Accept", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|err| RefreshError::Transient(err.to_string()))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|err| RefreshError::Transient(err.to_string()))?;

        if !status.is_success() {
            let text = String::from_utf8_lossy(&bytes);
            // invalid_grant means the refresh token is revoked; retrying
            // cannot help.
            if text.contains("invalid_grant") || status.as_u16() == 400 {
                return Err(RefreshError::Terminal(format!(
                    "token endpoint {status}: {text}"
                )));
            }
            return Err(RefreshError::Transient(format!(
                "token endpoint {status}: {text}"
            )));
        }

        let token: TokenResponse = serde_json::from_slice(&bytes)
            .map_err(|err| RefreshError::Terminal(format!("token response: {err}")))?;
        let expires_at =
            OffsetDateTime::now_utc().unix_timestamp() + token.expires_in.unwrap_or(3600);
        tracing::debug!(
            credential_id = %record.id,
            expires_at,
            "refreshed oauth token"
        );
        Ok(RefreshedToken {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at,
        })
    }
}

pub mod endpoints {
    use super::OAuthEndpoint;

    pub const GEMINI_CLI: OAuthEndpoint = OAuthEndpoint {
        token_url: "https://oauth2.googleapis.com/token",
        client_id: "681255809395-oo8ft2oprdrnp9e3aqf6av3hmdib135j.apps.googleusercontent.com",
        client_secret: Some("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"),
        grant_type: "refresh_token",
    };

    pub const ANTIGRAVITY: OAuthEndpoint = OAuthEndpoint {
        token_url: "https://oauth2.googleapis.com/token",
        client_id: "1071006060591-tmhssin7l380kbpmirclsb2gjvj8ib39.apps.googleusercontent.com",
        client_secret: Some("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"),
        grant_type: "refresh_token",
    };

    pub const CLAUDE_CODE: OAuthEndpoint = OAuthEndpoint {
        token_url: "https://console.anthropic.com/v1/oauth/token",
        client_id: "9d1c250a-e61b-44d9-88ed-5944d1962f5e",
        client_secret: None,
        grant_type: "refresh_token",
    };

    pub const CODEX: OAuthEndpoint = OAuthEndpoint {
        token_url: "https://auth.openai.com/oauth/token",
        client_id: "app_EMoamEEZ73f0CkXaXp7hrann",
        client_secret: None,
        grant_type: "refresh_token",
    };

    pub const QWEN_CODE: OAuthEndpoint = OAuthEndpoint {
        token_url: "https://chat.qwen.ai/api/v1/oauth2/token",
        client_id: "f0304373b74a44d2b584a3fb70ca9e56",
        client_secret: None,
        grant_type: "refresh_token",
    };

    pub const IFLOW: OAuthEndpoint = OAuthEndpoint {
        token_url: "https://iflow.cn/oauth/token",
        client_id: "10009311001",
        client_secret: None,
        grant_type: "refresh_token",
    };

    pub const COPILOT: OAuthEndpoint = OAuthEndpoint {
        token_url: "https://github.com/login/oauth/access_token",
        client_id: "Iv1.b507a08c87ecfe98",
        client_secret: None,
        grant_type: "refresh_token",
    };

    pub const KIRO: OAuthEndpoint = OAuthEndpoint {
        token_url: "https://oidc.us-east-1.amazonaws.com/token",
        client_id: "kiro-cli",
        client_secret: None,
        grant_type: "refresh_token",
    };
}
