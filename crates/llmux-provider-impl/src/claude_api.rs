//! Metered Anthropic API keys (`x-api-key` auth).

use bytes::Bytes;

use llmux_provider_core::{
    CredentialRecord, ExecutorError, ProviderFamily, UpstreamCtx, UpstreamExecutor,
    UpstreamRequest, header_set,
};

use crate::auth;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Default)]
pub struct ClaudeApiExecutor;

impl ClaudeApiExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl UpstreamExecutor for ClaudeApiExecutor {
    fn family(&self) -> ProviderFamily {
        ProviderFamily::ClaudeApi
    }

    fn build_generate(
        &self,
        ctx: &UpstreamCtx,
        record: &CredentialRecord,
        body: Bytes,
    ) -> Result<UpstreamRequest, ExecutorError> {
        let api_key = record
            .payload
            .api_key()
            .ok_or_else(|| ExecutorError::InvalidCredential("missing api key".to_string()))?;
        let base = record.payload.base_url().unwrap_or(DEFAULT_BASE_URL);

        let mut headers = Vec::new();
        auth::set_json(&mut headers);
        header_set(&mut headers, "x-api-key", api_key);
        header_set(&mut headers, "anthropic-version", ANTHROPIC_VERSION);
        if ctx.stream {
            auth::set_sse_accept(&mut headers);
        }
        if let llmux_provider_core::CredentialPayload::ApiKey { headers: extra, .. } =
            &record.payload
        {
            for (name, value) in extra {
                header_set(&mut headers, name, value.clone());
            }
        }

        Ok(UpstreamRequest {
            method: "POST",
            url: auth::join_url(base, "/v1/messages"),
            headers,
            body: Some(body),
            stream: ctx.stream,
        })
    }
}
