use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use tower::ServiceExt;

use llmux_core::client::{TransportError, UpstreamClient, UpstreamResponse};
use llmux_core::{AccessGate, AppState, Config, Engine};
use llmux_provider_core::UpstreamRequest;
use llmux_store::MemoryStore;

/// Never reached in these tests; the gate or the router answers first.
struct NoopClient;

impl UpstreamClient for NoopClient {
    fn send<'a>(
        &'a self,
        _req: UpstreamRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamResponse, TransportError>> + Send + 'a>> {
        Box::pin(async {
            Err(TransportError {
                message: "no upstream in tests".to_string(),
                timeout: false,
            })
        })
    }
}

async fn router_with(config: Config) -> axum::Router {
    let gate = Arc::new(AccessGate::from_config(&config));
    let state = AppState::bootstrap(
        config,
        Arc::new(MemoryStore::new()),
        llmux_provider_impl::build_executors(),
    )
    .await
    .unwrap();
    let engine = Arc::new(Engine::new(state, Arc::new(NoopClient)));
    llmux_router::proxy_router(engine, gate)
}

fn chat_request(auth: Option<&str>) -> Request<Body> {
    let body = serde_json::json!({
        "model": "claude-sonnet-4-5",
        "messages": [{"role": "user", "content": "hi"}]
    });
    let mut builder = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = auth {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

/// Default-deny: with no api-keys and no access providers configured, every
/// proxy request is a 401 before any upstream work.
#[tokio::test]
async fn empty_key_config_denies_everything() {
    let router = router_with(Config::default()).await;

    let response = router.clone().oneshot(chat_request(None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = router
        .oneshot(chat_request(Some("sk-anything")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn configured_key_passes_the_gate() {
    let mut config = Config::default();
    config.api_keys.push("sk-ok".to_string());
    let router = router_with(config).await;

    // Past the gate: the model is unknown because no credentials exist,
    // which proves the gate accepted the key.
    let response = router.oneshot(chat_request(Some("sk-ok"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn models_listing_reflects_pool() {
    let config = Config::from_yaml(
        "api-keys:\n  - sk-ok\nclaude-api-key:\n  - api-key: sk-upstream\n",
    )
    .unwrap();
    let router = router_with(config).await;

    let request = Request::builder()
        .method("GET")
        .uri("/v1/models")
        .header(header::AUTHORIZATION, "Bearer sk-ok")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
    let ids: Vec<&str> = value["data"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|entry| entry["id"].as_str())
        .collect();
    assert!(ids.contains(&"claude-sonnet-4-5"), "got {ids:?}");
}

#[tokio::test]
async fn count_tokens_is_served_locally() {
    let mut config = Config::default();
    config.api_keys.push("sk-ok".to_string());
    let router = router_with(config).await;

    let body = serde_json::json!({
        "model": "claude-sonnet-4-5",
        "messages": [{"role": "user", "content": "the quick brown fox"}]
    });
    let request = Request::builder()
        .method("POST")
        .uri("/v1/messages/count_tokens")
        .header(header::AUTHORIZATION, "Bearer sk-ok")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(value["input_tokens"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn gemini_path_shape_is_parsed() {
    let mut config = Config::default();
    config.api_keys.push("sk-ok".to_string());
    let router = router_with(config).await;

    let body = serde_json::json!({
        "contents": [{"role": "user", "parts": [{"text": "hi"}]}]
    });
    let request = Request::builder()
        .method("POST")
        .uri("/v1beta/models/gemini-2.5-flash:badAction")
        .header(header::AUTHORIZATION, "Bearer sk-ok")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
