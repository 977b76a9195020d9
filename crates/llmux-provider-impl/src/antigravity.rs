//! Antigravity executor: same Cloud Code envelope as gemini-cli behind a
//! different frontend and OAuth client.

use bytes::Bytes;
use serde_json::Value as JsonValue;

use llmux_provider_core::{
    CredentialRecord, ExecutorError, ProviderFamily, TokenRefresher, UpstreamCtx,
    UpstreamExecutor, UpstreamRequest,
};

use crate::auth;
use crate::gemini_cli::{user_prompt_id, wrap_internal_request};
use crate::oauth::{OAuthHttp, endpoints};

const DEFAULT_BASE_URL: &str = "https://cloudcode-pa.googleapis.com";
const USER_AGENT: &str = "Antigravity/1.2.0 (linux; x64)";

pub struct AntigravityExecutor {
    refresher: OAuthHttp,
}

impl AntigravityExecutor {
    pub fn new() -> Self {
        Self {
            refresher: OAuthHttp::new(endpoints::ANTIGRAVITY),
        }
    }
}

#[async_trait::async_trait]
impl UpstreamExecutor for AntigravityExecutor {
    fn family(&self) -> ProviderFamily {
        ProviderFamily::Antigravity
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
        let project = record
            .attr_str("project_id")
            .ok_or_else(|| ExecutorError::InvalidCredential("missing project_id".to_string()))?;

        let request: JsonValue = serde_json::from_slice(&body)
            .map_err(|err| ExecutorError::Other(err.to_string()))?;
        let wrapped = wrap_internal_request(&ctx.model, project, &user_prompt_id(), request);
        let body = serde_json::to_vec(&wrapped)
            .map_err(|err| ExecutorError::Other(err.to_string()))?;

        let base = record.attr_str("base_url").unwrap_or(DEFAULT_BASE_URL);
        let path = if ctx.stream {
            "/v1internal:streamGenerateContent?alt=sse"
        } else {
            "/v1internal:generateContent"
        };

        let mut headers = Vec::new();
        auth::set_bearer(&mut headers, token);
        auth::set_json(&mut headers);
        auth::set_user_agent(&mut headers, USER_AGENT);
        if ctx.stream {
            auth::set_sse_accept(&mut headers);
        }

        Ok(UpstreamRequest {
            method: "POST",
            url: auth::join_url(base, path),
            headers,
            body: Some(Bytes::from(body)),
            stream: ctx.stream,
        })
    }

    fn refresher(&self) -> Option<&dyn TokenRefresher> {
        Some(&self.refresher)
    }
}
