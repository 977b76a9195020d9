//! Gemini CLI (Cloud Code) executor: Gemini wire protocol wrapped in the
//! `v1internal` envelope, OAuth credentials from the `gemini` CLI.

use bytes::Bytes;
use rand::RngCore;
use serde_json::Value as JsonValue;

use llmux_provider_core::{
    CredentialRecord, ExecutorError, ProviderFamily, TokenRefresher, UpstreamCtx,
    UpstreamExecutor, UpstreamRequest,
};

use crate::auth;
use crate::oauth::{OAuthHttp, endpoints};

const DEFAULT_BASE_URL: &str = "https://cloudcode-pa.googleapis.com";
const USER_AGENT: &str = "GeminiCLI/0.4.1 (linux; x64)";

pub struct GeminiCliExecutor {
    refresher: OAuthHttp,
}

impl GeminiCliExecutor {
    pub fn new() -> Self {
        Self {
            refresher: OAuthHttp::new(endpoints::GEMINI_CLI),
        }
    }
}

#[async_trait::async_trait]
impl UpstreamExecutor for GeminiCliExecutor {
    fn family(&self) -> ProviderFamily {
        ProviderFamily::GeminiCli
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

pub(crate) fn wrap_internal_request(
    model: &str,
    project: &str,
    user_prompt_id: &str,
    request: JsonValue,
) -> JsonValue {
    serde_json::json!({
        "model": model.strip_prefix("models/").unwrap_or(model),
        "project": project,
        "user_prompt_id": user_prompt_id,
        "request": request,
    })
}

pub(crate) fn user_prompt_id() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use llmux_provider_core::CredentialPayload;

    fn record() -> CredentialRecord {
        let mut record = CredentialRecord::new(
            "g1",
            ProviderFamily::GeminiCli,
            CredentialPayload::OAuth {
                access_token: "tok".to_string(),
                refresh_token: "ref".to_string(),
                expires_at: 0,
            },
        );
        record
            .attributes
            .insert("project_id".to_string(), serde_json::json!("proj-1"));
        record
    }

    #[test]
    fn wraps_body_in_internal_envelope() {
        let executor = GeminiCliExecutor::new();
        let ctx = UpstreamCtx {
            trace_id: "t".to_string(),
            model: "gemini-2.5-flash".to_string(),
            stream: true,
            attempt: 1,
            user_agent: None,
        };
        let request = executor
            .build_generate(&ctx, &record(), Bytes::from_static(b"{\"contents\":[]}"))
            .unwrap();

        assert!(request.url.ends_with("/v1internal:streamGenerateContent?alt=sse"));
        let body: JsonValue = serde_json::from_slice(request.body.as_ref().unwrap()).unwrap();
        assert_eq!(body["model"], "gemini-2.5-flash");
        assert_eq!(body["project"], "proj-1");
        assert!(body["request"]["contents"].is_array());
    }

    #[test]
    fn missing_project_is_invalid_credential() {
        let executor = GeminiCliExecutor::new();
        let mut record = record();
        record.attributes.clear();
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
}
