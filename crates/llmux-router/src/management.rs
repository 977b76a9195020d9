use axum::Router;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use bytes::Bytes;

use llmux_provider_core::CredentialRecord;

use crate::{GatewayState, headers_to_vec};

pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/v0/management/credentials", get(list_credentials))
        .route("/v0/management/credentials", post(upsert_credential))
        .route("/v0/management/credentials/{id}", delete(delete_credential))
        .with_state(state)
}

fn denied() -> Response {
    (StatusCode::UNAUTHORIZED, "management access denied").into_response()
}

async fn list_credentials(State(state): State<GatewayState>, headers: HeaderMap) -> Response {
    if !state.gate.check_management(&headers_to_vec(&headers)) {
        return denied();
    }
    let mut records = state.engine.state().pool.list().await;
    // Secrets never leave the process through the listing.
    for record in &mut records {
        record.payload = redacted(&record.payload);
    }
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        serde_json::to_vec(&records).unwrap_or_default(),
    )
        .into_response()
}

fn redacted(payload: &llmux_provider_core::CredentialPayload) -> llmux_provider_core::CredentialPayload {
    use llmux_provider_core::CredentialPayload;
    match payload {
        CredentialPayload::OAuth { expires_at, .. } => CredentialPayload::OAuth {
            access_token: "***".to_string(),
            refresh_token: "***".to_string(),
            expires_at: *expires_at,
        },
        CredentialPayload::ApiKey {
            base_url, headers, ..
        } => CredentialPayload::ApiKey {
            api_key: "***".to_string(),
            base_url: base_url.clone(),
            headers: headers.clone(),
        },
        CredentialPayload::Cookie { .. } => CredentialPayload::Cookie {
            blob: "***".to_string(),
        },
    }
}

async fn upsert_credential(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !state.gate.check_management(&headers_to_vec(&headers)) {
        return denied();
    }
    let record: CredentialRecord = match serde_json::from_slice(&body) {
        Ok(record) => record,
        Err(err) => {
            return (StatusCode::BAD_REQUEST, format!("invalid credential: {err}"))
                .into_response();
        }
    };
    if !record.payload.is_valid_for(record.family) {
        return (
            StatusCode::BAD_REQUEST,
            "credential payload does not match its family",
        )
            .into_response();
    }
    match state.engine.state().store.save(record).await {
        Ok(id) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            serde_json::to_vec(&serde_json::json!({ "id": id })).unwrap_or_default(),
        )
            .into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

async fn delete_credential(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !state.gate.check_management(&headers_to_vec(&headers)) {
        return denied();
    }
    match state.engine.state().store.delete(&id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(llmux_store::StoreError::NotFound(_)) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}
