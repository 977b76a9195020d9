//! Key-authenticated Gemini endpoints: AI Studio, the public Generative
//! Language API, and Vertex-compatible gateways. All three share the
//! `:generateContent` path shape and differ in base URL and key header.

use bytes::Bytes;

use llmux_provider_core::{
    CredentialRecord, ExecutorError, ProviderFamily, UpstreamCtx, UpstreamExecutor,
    UpstreamRequest, header_set,
};

use crate::auth;

const GENERATIVE_LANGUAGE_BASE: &str = "https://generativelanguage.googleapis.com";

pub struct GeminiApiExecutor {
    family: ProviderFamily,
    default_base: &'static str,
}

impl GeminiApiExecutor {
    pub fn aistudio() -> Self {
        Self {
            family: ProviderFamily::Aistudio,
            default_base: GENERATIVE_LANGUAGE_BASE,
        }
    }

    pub fn gemini_api() -> Self {
        Self {
            family: ProviderFamily::GeminiApi,
            default_base: GENERATIVE_LANGUAGE_BASE,
        }
    }

    pub fn vertex_compat() -> Self {
        Self {
            family: ProviderFamily::VertexCompat,
            // Vertex gateways are always configured with an explicit base.
            default_base: GENERATIVE_LANGUAGE_BASE,
        }
    }
}

#[async_trait::async_trait]
impl UpstreamExecutor for GeminiApiExecutor {
    fn family(&self) -> ProviderFamily {
        self.family
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
        let base = record.payload.base_url().unwrap_or(self.default_base);

        let model = ctx.model.strip_prefix("models/").unwrap_or(&ctx.model);
        let path = if ctx.stream {
            format!("/v1beta/models/{model}:streamGenerateContent?alt=sse")
        } else {
            format!("/v1beta/models/{model}:generateContent")
        };

        let mut headers = Vec::new();
        auth::set_json(&mut headers);
        header_set(&mut headers, "x-goog-api-key", api_key);
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
            url: auth::join_url(base, &path),
            headers,
            body: Some(body),
            stream: ctx.stream,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llmux_provider_core::CredentialPayload;

    #[test]
    fn stream_flag_switches_path() {
        let executor = GeminiApiExecutor::aistudio();
        let record = CredentialRecord::new(
            "k1",
            ProviderFamily::Aistudio,
            CredentialPayload::ApiKey {
                api_key: "AIza-test".to_string(),
                base_url: None,
                headers: Vec::new(),
            },
        );
        let mut ctx = UpstreamCtx {
            trace_id: "t".to_string(),
            model: "gemini-1.5-flash".to_string(),
            stream: false,
            attempt: 1,
            user_agent: None,
        };

        let plain = executor
            .build_generate(&ctx, &record, Bytes::from_static(b"{}"))
            .unwrap();
        assert!(plain.url.ends_with("models/gemini-1.5-flash:generateContent"));

        ctx.stream = true;
        let stream = executor
            .build_generate(&ctx, &record, Bytes::from_static(b"{}"))
            .unwrap();
        assert!(stream.url.contains(":streamGenerateContent?alt=sse"));
    }
}
