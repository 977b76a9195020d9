//! Claude Code executor: Anthropic Messages with OAuth bearer auth and the
//! CLI's beta headers.

use bytes::Bytes;

use llmux_provider_core::{
    CredentialRecord, ExecutorError, ProviderFamily, TokenRefresher, UpstreamCtx,
    UpstreamExecutor, UpstreamRequest, header_set,
};

use crate::auth;
use crate::oauth::{OAuthHttp, endpoints};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const OAUTH_BETA: &str = "oauth-2025-04-20";
const USER_AGENT: &str = "claude-cli/2.0.14 (external, cli)";

pub struct ClaudeCodeExecutor {
    refresher: OAuthHttp,
}

impl ClaudeCodeExecutor {
    pub fn new() -> Self {
        Self {
            refresher: OAuthHttp::new(endpoints::CLAUDE_CODE),
        }
    }
}

#[async_trait::async_trait]
impl UpstreamExecutor for ClaudeCodeExecutor {
    fn family(&self) -> ProviderFamily {
        ProviderFamily::ClaudeCode
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

        let base = record.attr_str("base_url").unwrap_or(DEFAULT_BASE_URL);
        let mut headers = Vec::new();
        auth::set_bearer(&mut headers, token);
        auth::set_json(&mut headers);
        auth::set_user_agent(&mut headers, USER_AGENT);
        header_set(&mut headers, "anthropic-version", ANTHROPIC_VERSION);
        header_set(&mut headers, "anthropic-beta", OAUTH_BETA);
        if ctx.stream {
            auth::set_sse_accept(&mut headers);
        }

        Ok(UpstreamRequest {
            method: "POST",
            url: auth::join_url(base, "/v1/messages"),
            headers,
            body: Some(body),
            stream: ctx.stream,
        })
    }

    fn refresher(&self) -> Option<&dyn TokenRefresher> {
        Some(&self.refresher)
    }
}
