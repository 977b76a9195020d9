use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;

use llmux_core::client::{TransportError, UpstreamBody, UpstreamClient, UpstreamResponse};
use llmux_core::{AppState, Config, Engine, EngineError, EngineOutput, RequestTicket};
use llmux_provider_core::{Headers, ProviderFamily, RequestScope, UpstreamRequest, header_get};
use llmux_store::MemoryStore;
use llmux_transform::Proto;

/// Scripted responses keyed by call order; repeats the last entry when calls
/// outnumber entries.
struct ScriptedClient {
    calls: AtomicUsize,
    seen_tokens: Mutex<Vec<String>>,
    script: Vec<ScriptedResponse>,
    /// Set when a scripted stream producer observes the consumer is gone.
    producer_stopped: Arc<std::sync::atomic::AtomicBool>,
}

#[derive(Clone)]
enum ScriptedResponse {
    Status {
        status: u16,
        headers: Headers,
        body: &'static [u8],
    },
    OkJson(&'static [u8]),
    OkStream,
}

impl ScriptedClient {
    fn new(script: Vec<ScriptedResponse>) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            seen_tokens: Mutex::new(Vec::new()),
            script,
            producer_stopped: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        })
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl UpstreamClient for ScriptedClient {
    fn send<'a>(
        &'a self,
        req: UpstreamRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamResponse, TransportError>> + Send + 'a>> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(token) = header_get(&req.headers, "Authorization") {
            self.seen_tokens
                .lock()
                .unwrap()
                .push(token.trim_start_matches("Bearer ").to_string());
        } else if let Some(key) = header_get(&req.headers, "x-api-key") {
            self.seen_tokens.lock().unwrap().push(key.to_string());
        }
        let entry = self
            .script
            .get(index)
            .or_else(|| self.script.last())
            .cloned()
            .expect("script must not be empty");
        Box::pin(async move {
            match entry {
                ScriptedResponse::Status {
                    status,
                    headers,
                    body,
                } => Ok(UpstreamResponse {
                    status,
                    headers,
                    body: UpstreamBody::Bytes(Bytes::from_static(body)),
                }),
                ScriptedResponse::OkJson(body) => Ok(UpstreamResponse {
                    status: 200,
                    headers: Vec::new(),
                    body: UpstreamBody::Bytes(Bytes::from_static(body)),
                }),
                ScriptedResponse::OkStream => {
                    let stopped = self.producer_stopped.clone();
                    let (tx, rx) = tokio::sync::mpsc::channel::<Bytes>(4);
                    tokio::spawn(async move {
                        let start = Bytes::from_static(
                            b"event: message_start\ndata: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_1\",\"type\":\"message\",\"role\":\"assistant\",\"model\":\"claude-sonnet-4-5\",\"content\":[],\"usage\":{\"input_tokens\":1,\"output_tokens\":0}}}\n\n",
                        );
                        if tx.send(start).await.is_err() {
                            stopped.store(true, Ordering::SeqCst);
                            return;
                        }
                        loop {
                            let delta = Bytes::from_static(
                                b"event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"x\"}}\n\n",
                            );
                            if tx.send(delta).await.is_err() {
                                stopped.store(true, Ordering::SeqCst);
                                return;
                            }
                            tokio::time::sleep(Duration::from_millis(5)).await;
                        }
                    });
                    Ok(UpstreamResponse {
                        status: 200,
                        headers: Vec::new(),
                        body: UpstreamBody::Stream(rx),
                    })
                }
            }
        })
    }
}

async fn state_with_claude_keys(retry: i32, keys: usize) -> Arc<AppState> {
    let yaml = {
        let mut out = format!("request-retry: {retry}\nclaude-api-key:\n");
        for index in 0..keys {
            out.push_str(&format!("  - api-key: sk-test-{index}\n"));
        }
        out
    };
    let config = Config::from_yaml(&yaml).unwrap();
    AppState::bootstrap(
        config,
        Arc::new(MemoryStore::new()),
        llmux_provider_impl::build_executors(),
    )
    .await
    .unwrap()
}

fn ticket(model: &str, stream: bool) -> RequestTicket {
    RequestTicket {
        trace_id: "trace-1".to_string(),
        method: "POST".to_string(),
        path: "/v1/chat/completions".to_string(),
        inbound_proto: Proto::OpenAiChat,
        model: model.to_string(),
        body: Bytes::from(
            serde_json::to_vec(&serde_json::json!({
                "model": model,
                "messages": [{"role": "user", "content": "hi"}]
            }))
            .unwrap(),
        ),
        stream,
        scope: RequestScope::default(),
        user_agent: None,
    }
}

/// With request-retry=2 a permanently failing upstream is tried exactly three
/// times (initial + 2 retries) and then surfaced as a 502.
#[tokio::test]
async fn retry_budget_is_respected() {
    let state = state_with_claude_keys(2, 4).await;
    let client = ScriptedClient::new(vec![ScriptedResponse::Status {
        status: 503,
        headers: Vec::new(),
        body: b"upstream down",
    }]);
    let engine = Engine::new(state, client.clone());

    let err = engine
        .handle(ticket("claude-sonnet-4-5", false))
        .await
        .err()
        .expect("must fail");
    assert!(matches!(
        err,
        EngineError::Exhausted {
            last_status: Some(503)
        }
    ));
    assert_eq!(err.downstream_status(), 502);
    assert_eq!(client.call_count(), 3);
}

/// Each retry prefers a credential that has not failed for this ticket.
#[tokio::test]
async fn retries_rotate_credentials() {
    let state = state_with_claude_keys(2, 3).await;
    let client = ScriptedClient::new(vec![ScriptedResponse::Status {
        status: 500,
        headers: Vec::new(),
        body: b"",
    }]);
    let engine = Engine::new(state, client.clone());
    let _ = engine.handle(ticket("claude-sonnet-4-5", false)).await;

    let tokens = client.seen_tokens.lock().unwrap().clone();
    assert_eq!(tokens.len(), 3);
    let unique: std::collections::HashSet<&String> = tokens.iter().collect();
    assert_eq!(unique.len(), 3, "retries must rotate credentials: {tokens:?}");
}

/// A 429 with Retry-After cools the credential for that model and the retry
/// lands on another credential (E6).
#[tokio::test]
async fn quota_failure_cools_down_and_fails_over() {
    let state = state_with_claude_keys(3, 2).await;
    let client = ScriptedClient::new(vec![
        ScriptedResponse::Status {
            status: 429,
            headers: vec![("Retry-After".to_string(), "2".to_string())],
            body: b"rate limited",
        },
        ScriptedResponse::OkJson(
            br#"{"id":"msg_1","type":"message","role":"assistant","model":"claude-sonnet-4-5","content":[{"type":"text","text":"ok"}],"stop_reason":"end_turn","usage":{"input_tokens":3,"output_tokens":1}}"#,
        ),
    ]);
    let engine = Engine::new(state.clone(), client.clone());

    let output = engine
        .handle(ticket("claude-sonnet-4-5", false))
        .await
        .expect("failover succeeds");
    let EngineOutput::Json { body } = output else {
        panic!("expected json output");
    };
    let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["choices"][0]["message"]["content"], "ok");
    assert_eq!(client.call_count(), 2);

    // First credential is cooling for this model.
    let cooled: Vec<_> = state
        .pool
        .candidates(ProviderFamily::ClaudeApi)
        .await
        .into_iter()
        .filter(|record| record.is_cooling("claude-sonnet-4-5", time::OffsetDateTime::now_utc()))
        .collect();
    assert_eq!(cooled.len(), 1);
}

/// 400s are the client's fault: returned verbatim, never retried.
#[tokio::test]
async fn bad_request_is_not_retried() {
    let state = state_with_claude_keys(3, 2).await;
    let client = ScriptedClient::new(vec![ScriptedResponse::Status {
        status: 400,
        headers: Vec::new(),
        body: b"{\"error\":\"bad\"}",
    }]);
    let engine = Engine::new(state, client.clone());

    let err = engine
        .handle(ticket("claude-sonnet-4-5", false))
        .await
        .err()
        .expect("must fail");
    let EngineError::BadRequest { status, body } = err else {
        panic!("expected bad request passthrough");
    };
    assert_eq!(status, 400);
    assert_eq!(&body[..], b"{\"error\":\"bad\"}");
    assert_eq!(client.call_count(), 1);
}

#[tokio::test]
async fn unknown_model_is_reported() {
    let state = state_with_claude_keys(3, 1).await;
    let client = ScriptedClient::new(vec![ScriptedResponse::OkJson(b"{}")]);
    let engine = Engine::new(state, client);
    let err = engine
        .handle(ticket("no-such-model", false))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, EngineError::UnknownModel(_)));
}

/// Client disconnect mid-stream stops the upstream read within one chunk:
/// dropping the output receiver causes the pump to drop the upstream
/// receiver, which makes the producer's next send fail.
#[tokio::test]
async fn dropping_client_stream_cancels_upstream() {
    let state = state_with_claude_keys(3, 1).await;
    let client = ScriptedClient::new(vec![ScriptedResponse::OkStream]);
    let engine = Engine::new(state, client.clone());

    let output = engine
        .handle(ticket("claude-sonnet-4-5", true))
        .await
        .expect("stream starts");
    let EngineOutput::Stream { mut rx, content_type } = output else {
        panic!("expected stream output");
    };
    assert_eq!(content_type, "text/event-stream");

    // At least one translated frame reaches the client.
    let first = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("frame arrives")
        .expect("stream open");
    assert!(std::str::from_utf8(&first).unwrap().starts_with("data: "));

    // Disconnect. The pump's next send fails, it drops the upstream
    // receiver, and the producer's next send errors out within one chunk.
    drop(rx);
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while !client.producer_stopped.load(Ordering::SeqCst) {
        assert!(
            std::time::Instant::now() < deadline,
            "upstream producer was not cancelled"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
