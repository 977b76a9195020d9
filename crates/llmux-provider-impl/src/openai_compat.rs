//! OpenAI-compatible chat-completions executor.
//!
//! One implementation covers five families that differ only in default base
//! URL and whether auth comes from an API key or an OAuth access token:
//! openai-compat, qwen-code, iflow, copilot, and codex-api.

use std::time::Duration;

use bytes::Bytes;

use llmux_provider_core::{
    CredentialPayload, CredentialRecord, ErrorClass, ExecutorError, Headers, ProviderFamily,
    TokenRefresher, UpstreamCtx, UpstreamExecutor, UpstreamRequest, default_classify, header_set,
};

use crate::auth;
use crate::oauth::{OAuthHttp, endpoints};

pub struct OpenAiCompatExecutor {
    family: ProviderFamily,
    refresher: Option<OAuthHttp>,
}

impl OpenAiCompatExecutor {
    pub fn new(family: ProviderFamily) -> Self {
        let refresher = match family {
            ProviderFamily::QwenCode => Some(OAuthHttp::new(endpoints::QWEN_CODE)),
            ProviderFamily::Iflow => Some(OAuthHttp::new(endpoints::IFLOW)),
            ProviderFamily::Copilot => Some(OAuthHttp::new(endpoints::COPILOT)),
            _ => None,
        };
        Self { family, refresher }
    }

    fn default_base(&self) -> Option<&'static str> {
        match self.family {
            ProviderFamily::QwenCode => {
                Some("https://dashscope.aliyuncs.com/compatible-mode/v1")
            }
            ProviderFamily::Iflow => Some("https://apis.iflow.cn/v1"),
            ProviderFamily::Copilot => Some("https://api.githubcopilot.com"),
            ProviderFamily::CodexApi => Some("https://api.openai.com/v1"),
            // openai-compat credentials must carry their own base URL.
            _ => None,
        }
    }
}

#[async_trait::async_trait]
impl UpstreamExecutor for OpenAiCompatExecutor {
    fn family(&self) -> ProviderFamily {
        self.family
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
            .or_else(|| record.payload.api_key())
            .ok_or_else(|| ExecutorError::InvalidCredential("missing credential".to_string()))?;

        let base = record
            .payload
            .base_url()
            .or_else(|| record.attr_str("base_url"))
            .or_else(|| self.default_base())
            .ok_or_else(|| {
                ExecutorError::InvalidCredential("missing base_url for compat endpoint".to_string())
            })?;

        let mut headers = Vec::new();
        auth::set_bearer(&mut headers, token);
        auth::set_json(&mut headers);
        if ctx.stream {
            auth::set_sse_accept(&mut headers);
        }
        if self.family == ProviderFamily::Copilot {
            header_set(&mut headers, "Copilot-Integration-Id", "vscode-chat");
            header_set(&mut headers, "Editor-Version", "vscode/1.96.0");
        }
        if let CredentialPayload::ApiKey { headers: extra, .. } = &record.payload {
            for (name, value) in extra {
                header_set(&mut headers, name, value.clone());
            }
        }

        Ok(UpstreamRequest {
            method: "POST",
            url: auth::join_url(base, "/chat/completions"),
            headers,
            body: Some(body),
            stream: ctx.stream,
        })
    }

    fn classify(&self, status: u16, headers: &Headers, body: &[u8]) -> ErrorClass {
        // DashScope reports throttling as 400 with a throttling code; map it
        // to quota so the credential cools down instead of erroring.
        if self.family == ProviderFamily::QwenCode
            && status == 400
            && std::str::from_utf8(body)
                .unwrap_or("")
                .contains("Throttling")
        {
            return ErrorClass::QuotaExceeded {
                retry_after: Some(Duration::from_secs(60)),
                daily: false,
            };
        }
        default_classify(self.family, status, headers, body)
    }

    fn refresher(&self) -> Option<&dyn TokenRefresher> {
        self.refresher
            .as_ref()
            .map(|refresher| refresher as &dyn TokenRefresher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compat_without_base_url_is_rejected() {
        let executor = OpenAiCompatExecutor::new(ProviderFamily::OpenaiCompat);
        let record = CredentialRecord::new(
            "c1",
            ProviderFamily::OpenaiCompat,
            CredentialPayload::ApiKey {
                api_key: "sk".to_string(),
                base_url: None,
                headers: Vec::new(),
            },
        );
        let ctx = UpstreamCtx {
            trace_id: "t".to_string(),
            model: "m".to_string(),
            stream: false,
            attempt: 1,
            user_agent: None,
        };
        assert!(matches!(
            executor.build_generate(&ctx, &record, Bytes::from_static(b"{}")),
            Err(ExecutorError::InvalidCredential(_))
        ));
    }

    #[test]
    fn qwen_throttling_is_quota() {
        let executor = OpenAiCompatExecutor::new(ProviderFamily::QwenCode);
        let class = executor.classify(400, &Vec::new(), b"{\"code\":\"Throttling.RateQuota\"}");
        assert!(matches!(class, ErrorClass::QuotaExceeded { .. }));
    }
}
