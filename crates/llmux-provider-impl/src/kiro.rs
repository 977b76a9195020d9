//! Kiro (CodeWhisperer) executor: Claude-shaped conversations behind the AWS
//! vendor endpoint, SSO OAuth tokens.

use bytes::Bytes;

use llmux_provider_core::{
    CredentialRecord, ErrorClass, ExecutorError, Headers, ProviderFamily, TokenRefresher,
    UpstreamCtx, UpstreamExecutor, UpstreamRequest, default_classify, header_set,
};

use crate::auth;
use crate::oauth::{OAuthHttp, endpoints};

const DEFAULT_BASE_URL: &str = "https://codewhisperer.us-east-1.amazonaws.com";

pub struct KiroExecutor {
    refresher: OAuthHttp,
}

impl KiroExecutor {
    pub fn new() -> Self {
        Self {
            refresher: OAuthHttp::new(endpoints::KIRO),
        }
    }
}

#[async_trait::async_trait]
impl UpstreamExecutor for KiroExecutor {
    fn family(&self) -> ProviderFamily {
        ProviderFamily::Kiro
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
        header_set(&mut headers, "x-amzn-kiro-agent-mode", "vibe");
        if ctx.stream {
            auth::set_sse_accept(&mut headers);
        }

        Ok(UpstreamRequest {
            method: "POST",
            url: auth::join_url(base, "/generateAssistantResponse"),
            headers,
            body: Some(body),
            stream: ctx.stream,
        })
    }

    fn classify(&self, status: u16, headers: &Headers, body: &[u8]) -> ErrorClass {
        // The vendor endpoint throttles with 400 ThrottlingException.
        if status == 400
            && std::str::from_utf8(body)
                .unwrap_or("")
                .contains("ThrottlingException")
        {
            return ErrorClass::QuotaExceeded {
                retry_after: None,
                daily: false,
            };
        }
        default_classify(ProviderFamily::Kiro, status, headers, body)
    }

    fn refresher(&self) -> Option<&dyn TokenRefresher> {
        Some(&self.refresher)
    }
}
