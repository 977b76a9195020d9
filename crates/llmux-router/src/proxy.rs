use std::convert::Infallible;

use axum::Router;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use bytes::Bytes;
use futures_util::StreamExt;
use serde_json::Value as JsonValue;
use tokio_stream::wrappers::ReceiverStream;

use llmux_common::new_trace_id;
use llmux_core::{EngineError, EngineOutput, RequestTicket};
use llmux_provider_core::{Headers, RequestScope};
use llmux_transform::Proto;

use crate::{GatewayState, headers_to_vec};

pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(openai_chat_completions))
        .route("/v1/responses", post(openai_responses))
        .route("/v1/messages", post(claude_messages))
        .route("/v1/messages/count_tokens", post(claude_count_tokens))
        .route("/v1/models", get(openai_models))
        .route("/v1beta/models", get(gemini_models))
        .route("/v1beta/models/{*rest}", post(gemini_generate))
        .with_state(state)
}

fn scope_from_request(headers: &Headers, body: &JsonValue) -> RequestScope {
    let mut scope = RequestScope {
        headers: headers.clone(),
        ..Default::default()
    };
    if let Some(metadata) = body.get("metadata").and_then(JsonValue::as_object) {
        for (key, value) in metadata {
            if let Some(text) = value.as_str() {
                scope.metadata.insert(key.clone(), text.to_string());
            }
        }
    }
    scope
}

fn user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Minimal inbound parse: just enough to route. The raw bytes travel to the
/// translator untouched.
fn peek_body(body: &Bytes) -> Result<JsonValue, Response> {
    serde_json::from_slice(body).map_err(|err| {
        json_error(
            StatusCode::BAD_REQUEST,
            &format!("invalid request body: {err}"),
        )
    })
}

fn json_error(status: StatusCode, message: &str) -> Response {
    let body = serde_json::json!({
        "error": { "message": message, "type": "invalid_request_error" }
    });
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        serde_json::to_vec(&body).unwrap_or_default(),
    )
        .into_response()
}

fn engine_error_response(err: EngineError) -> Response {
    let status =
        StatusCode::from_u16(err.downstream_status()).unwrap_or(StatusCode::BAD_GATEWAY);
    match err {
        EngineError::BadRequest { body, .. } => (
            status,
            [(header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response(),
        EngineError::Cooldown { reset_in } => {
            let secs = reset_in.as_secs().max(1);
            let body = serde_json::json!({
                "error": {
                    "message": format!("all credentials cooling down, retry in {secs}s"),
                    "type": "rate_limit_error",
                    "reset_in": secs,
                }
            });
            (
                status,
                [
                    (header::RETRY_AFTER, secs.to_string()),
                    (header::CONTENT_TYPE, "application/json".to_string()),
                ],
                serde_json::to_vec(&body).unwrap_or_default(),
            )
                .into_response()
        }
        other => json_error(status, &other.to_string()),
    }
}

fn output_response(output: EngineOutput) -> Response {
    match output {
        EngineOutput::Json { body } => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response(),
        EngineOutput::Stream { rx, content_type } => {
            let stream = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, content_type)
                .header(header::CACHE_CONTROL, "no-cache")
                .body(Body::from_stream(stream))
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
    }
}

async fn dispatch(
    state: &GatewayState,
    headers: HeaderMap,
    body: Bytes,
    proto: Proto,
    path: &str,
    model: String,
    stream: bool,
    parsed: &JsonValue,
) -> Response {
    let header_vec = headers_to_vec(&headers);
    if state.gate.check(&header_vec).is_err() {
        return json_error(StatusCode::UNAUTHORIZED, "missing or invalid api key");
    }

    let ticket = RequestTicket {
        trace_id: new_trace_id(),
        method: "POST".to_string(),
        path: path.to_string(),
        inbound_proto: proto,
        model,
        body,
        stream,
        scope: scope_from_request(&header_vec, parsed),
        user_agent: user_agent(&headers),
    };

    match state.engine.handle(ticket).await {
        Ok(output) => output_response(output),
        Err(err) => engine_error_response(err),
    }
}

async fn openai_chat_completions(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let parsed = match peek_body(&body) {
        Ok(value) => value,
        Err(response) => return response,
    };
    let Some(model) = parsed.get("model").and_then(JsonValue::as_str) else {
        return json_error(StatusCode::BAD_REQUEST, "missing model");
    };
    let stream = parsed
        .get("stream")
        .and_then(JsonValue::as_bool)
        .unwrap_or(false);
    dispatch(
        &state,
        headers,
        body.clone(),
        Proto::OpenAiChat,
        "/v1/chat/completions",
        model.to_string(),
        stream,
        &parsed,
    )
    .await
}

async fn openai_responses(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let parsed = match peek_body(&body) {
        Ok(value) => value,
        Err(response) => return response,
    };
    let Some(model) = parsed.get("model").and_then(JsonValue::as_str) else {
        return json_error(StatusCode::BAD_REQUEST, "missing model");
    };
    let stream = parsed
        .get("stream")
        .and_then(JsonValue::as_bool)
        .unwrap_or(false);
    dispatch(
        &state,
        headers,
        body.clone(),
        Proto::OpenAiResponses,
        "/v1/responses",
        model.to_string(),
        stream,
        &parsed,
    )
    .await
}

async fn claude_messages(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let parsed = match peek_body(&body) {
        Ok(value) => value,
        Err(response) => return response,
    };
    let Some(model) = parsed.get("model").and_then(JsonValue::as_str) else {
        return json_error(StatusCode::BAD_REQUEST, "missing model");
    };
    let stream = parsed
        .get("stream")
        .and_then(JsonValue::as_bool)
        .unwrap_or(false);
    dispatch(
        &state,
        headers,
        body.clone(),
        Proto::Claude,
        "/v1/messages",
        model.to_string(),
        stream,
        &parsed,
    )
    .await
}

/// Counted locally: the heterogeneous pool cannot forward a count to an
/// upstream that may not be the one the generate call lands on.
async fn claude_count_tokens(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let header_vec = headers_to_vec(&headers);
    if state.gate.check(&header_vec).is_err() {
        return json_error(StatusCode::UNAUTHORIZED, "missing or invalid api key");
    }
    let request: llmux_protocol::claude::CountTokensRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => {
            return json_error(
                StatusCode::BAD_REQUEST,
                &format!("invalid request body: {err}"),
            );
        }
    };
    let input_tokens = llmux_provider_impl::tokens::count_claude_request(&request);
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        serde_json::to_vec(&llmux_protocol::claude::CountTokensResponse { input_tokens })
            .unwrap_or_default(),
    )
        .into_response()
}

/// Gemini's generate endpoints put the model and action in the path:
/// `/v1beta/models/{model}:generateContent`.
async fn gemini_generate(
    State(state): State<GatewayState>,
    Path(rest): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some((model, action)) = rest.rsplit_once(':') else {
        return json_error(StatusCode::NOT_FOUND, "expected models/{model}:{action}");
    };
    let stream = match action {
        "generateContent" => false,
        "streamGenerateContent" => true,
        _ => {
            return json_error(
                StatusCode::NOT_FOUND,
                &format!("unsupported action: {action}"),
            );
        }
    };
    let parsed = match peek_body(&body) {
        Ok(value) => value,
        Err(response) => return response,
    };
    dispatch(
        &state,
        headers,
        body.clone(),
        Proto::Gemini,
        "/v1beta/models",
        model.to_string(),
        stream,
        &parsed,
    )
    .await
}

async fn openai_models(State(state): State<GatewayState>, headers: HeaderMap) -> Response {
    let header_vec = headers_to_vec(&headers);
    if state.gate.check(&header_vec).is_err() {
        return json_error(StatusCode::UNAUTHORIZED, "missing or invalid api key");
    }
    let registry = state.engine.state().registry.load();
    let created = time::OffsetDateTime::now_utc().unix_timestamp();
    let data: Vec<llmux_protocol::openai_chat::ModelEntry> = registry
        .models()
        .into_iter()
        .map(|id| {
            let owned_by = registry
                .targets(&id)
                .first()
                .map(|target| target.family.to_string())
                .unwrap_or_else(|| "llmux".to_string());
            llmux_protocol::openai_chat::ModelEntry {
                id,
                object: "model".to_string(),
                created,
                owned_by,
            }
        })
        .collect();
    let body = llmux_protocol::openai_chat::ModelList {
        object: "list".to_string(),
        data,
    };
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        serde_json::to_vec(&body).unwrap_or_default(),
    )
        .into_response()
}

async fn gemini_models(State(state): State<GatewayState>, headers: HeaderMap) -> Response {
    let header_vec = headers_to_vec(&headers);
    if state.gate.check(&header_vec).is_err() {
        return json_error(StatusCode::UNAUTHORIZED, "missing or invalid api key");
    }
    let registry = state.engine.state().registry.load();
    let models: Vec<llmux_protocol::gemini::Model> = registry
        .models()
        .into_iter()
        .map(|id| llmux_protocol::gemini::Model {
            name: format!("models/{id}"),
            display_name: None,
            description: None,
            supported_generation_methods: vec![
                "generateContent".to_string(),
                "streamGenerateContent".to_string(),
            ],
        })
        .collect();
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        serde_json::to_vec(&llmux_protocol::gemini::ModelList { models }).unwrap_or_default(),
    )
        .into_response()
}
