//! Codex executor: OpenAI Responses dialect against the ChatGPT backend,
//! authenticated with the Codex CLI's OAuth tokens.

use bytes::Bytes;
use serde::Deserialize;

use llmux_provider_core::{
    CredentialRecord, ExecutorError, ProviderFamily, TokenRefresher, UpstreamCtx,
    UpstreamExecutor, UpstreamRequest, header_set,
};

use crate::auth;
use crate::oauth::{OAuthHttp, endpoints};

const DEFAULT_BASE_URL: &str = "https://chatgpt.com/backend-api/codex";
const USER_AGENT: &str = "codex_cli_rs/0.45.0";

pub struct CodexExecutor {
    refresher: OAuthHttp,
}

impl CodexExecutor {
    pub fn new() -> Self {
        Self {
            refresher: OAuthHttp::new(endpoints::CODEX),
        }
    }
}

#[async_trait::async_trait]
impl UpstreamExecutor for CodexExecutor {
    fn family(&self) -> ProviderFamily {
        ProviderFamily::Codex
    }

    fn build_generate(
        &self,
        ctx: &UpstreamCtx,
        record: &CredentialRecord,
        body: Bytes,
    ) -> Result<UpstreamRequest, ExecutorError> {
        let token = record
            .payload
            .access_token()
            .ok_or_else(|| ExecutorError::InvalidCredential("missing access token".to_string()))?;
        let account_id = record
            .attr_str("account_id")
            .map(|value| value.to_string())
            .or_else(|| account_id_from_token(token))
            .ok_or_else(|| ExecutorError::InvalidCredential("missing account id".to_string()))?;

        let base = record.attr_str("base_url").unwrap_or(DEFAULT_BASE_URL);
        let mut headers = Vec::new();
        auth::set_bearer(&mut headers, token);
        auth::set_json(&mut headers);
        auth::set_user_agent(&mut headers, USER_AGENT);
        header_set(&mut headers, "chatgpt-account-id", account_id);
        header_set(&mut headers, "originator", "codex_cli_rs");
        if ctx.stream {
            auth::set_sse_accept(&mut headers);
        }

        Ok(UpstreamRequest {
            method: "POST",
            url: auth::join_url(base, "/responses"),
            headers,
            body: Some(body),
            stream: ctx.stream,
        })
    }

    fn refresher(&self) -> Option<&dyn TokenRefresher> {
        Some(&self.refresher)
    }
}

#[derive(Debug, Deserialize)]
struct AuthClaims {
    #[serde(rename = "https://api.openai.com/auth", default)]
    auth: Option<AuthBlock>,
}

#[derive(Debug, Deserialize)]
struct AuthBlock {
    #[serde(default)]
    chatgpt_account_id: Option<String>,
}

/// The account id lives in the access token's JWT claims. The payload is
/// decoded without signature verification; it is a routing hint, not an
/// authorization decision.
fn account_id_from_token(token: &str) -> Option<String> {
    use base64::Engine;

    let mut parts = token.split('.');
    let _header = parts.next()?;
    let payload = parts.next()?;
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload)
        .ok()?;
    let claims: AuthClaims = serde_json::from_slice(&bytes).ok()?;
    claims.auth.and_then(|auth| auth.chatgpt_account_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;

    #[test]
    fn account_id_is_read_from_claims() {
        let claims = serde_json::json!({
            "https://api.openai.com/auth": {"chatgpt_account_id": "acct-42"}
        });
        let payload = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .encode(serde_json::to_vec(&claims).unwrap());
        let token = format!("hdr.{payload}.sig");
        assert_eq!(account_id_from_token(&token).as_deref(), Some("acct-42"));
    }
}
