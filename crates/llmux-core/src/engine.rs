use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;

use llmux_provider_core::{
    AccessRecord, CooldownReason, CredentialRecord, CredentialStatus, ErrorClass, Event,
    PickError, ProviderFamily, RequestScope, Strategy, UpstreamCtx, UsageRecord, apply_refresh,
    cooldown_for,
};
use llmux_transform::{Proto, StreamEvent, StreamFormat, TransformError, stream_format};

use crate::client::{UpstreamBody, UpstreamClient, UpstreamResponse};
use crate::route::{self, RouteError};
use crate::state::AppState;
use crate::wire::{
    HEARTBEAT_FRAME, StreamDecoder, content_type_for_stream, done_marker, encode_stream_event,
};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Everything the ingress adapter knows about one inbound request.
#[derive(Debug, Clone)]
pub struct RequestTicket {
    pub trace_id: String,
    pub method: String,
    pub path: String,
    pub inbound_proto: Proto,
    /// Model id exactly as the client sent it, namespaces included.
    pub model: String,
    pub body: Bytes,
    pub stream: bool,
    pub scope: RequestScope,
    pub user_agent: Option<String>,
}

pub enum EngineOutput {
    Json {
        body: Bytes,
    },
    Stream {
        rx: mpsc::Receiver<Bytes>,
        content_type: &'static str,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Returned verbatim to the client, never retried.
    #[error("bad request")]
    BadRequest { status: u16, body: Bytes },
    #[error("no provider serves model {0}")]
    UnknownModel(String),
    /// Every candidate is cooling down; carries the shortest remaining wait.
    #[error("all credentials cooling down")]
    Cooldown { reset_in: Duration },
    #[error("no credential available")]
    Unavailable,
    /// Missing registration or malformed upstream JSON; logged as a bug.
    #[error("translator: {0}")]
    Translator(String),
    /// Retry budget exhausted.
    #[error("upstream attempts exhausted")]
    Exhausted { last_status: Option<u16> },
}

impl EngineError {
    pub fn kind(&self) -> Option<llmux_common::FailureKind> {
        match self {
            EngineError::BadRequest { .. } => Some(llmux_common::FailureKind::BadRequest),
            EngineError::Cooldown { .. } => Some(llmux_common::FailureKind::QuotaExceeded),
            EngineError::Translator(_) => Some(llmux_common::FailureKind::Translator),
            EngineError::Exhausted { .. } => Some(llmux_common::FailureKind::Retryable),
            EngineError::UnknownModel(_) | EngineError::Unavailable => None,
        }
    }

    pub fn downstream_status(&self) -> u16 {
        match self {
            // 400s pass through with the upstream's own status.
            EngineError::BadRequest { status, .. } => *status,
            EngineError::UnknownModel(_) => 404,
            EngineError::Unavailable => 503,
            other => other
                .kind()
                .map(|kind| kind.downstream_status())
                .unwrap_or(502),
        }
    }
}

#[derive(Clone)]
pub struct Engine {
    state: Arc<AppState>,
    client: Arc<dyn UpstreamClient>,
}

impl Engine {
    pub fn new(state: Arc<AppState>, client: Arc<dyn UpstreamClient>) -> Self {
        Self { state, client }
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    pub async fn handle(&self, ticket: RequestTicket) -> Result<EngineOutput, EngineError> {
        let started = std::time::Instant::now();
        let result = self.dispatch(&ticket, started).await;
        if let Err(err) = &result {
            self.emit_failure(&ticket, err, started.elapsed()).await;
        }
        result
    }

    async fn dispatch(
        &self,
        ticket: &RequestTicket,
        started: std::time::Instant,
    ) -> Result<EngineOutput, EngineError> {
        let config = self.state.config.load_full();
        let registry = self.state.registry.load_full();
        let route = route::resolve(&config, &registry, &ticket.model, ticket.user_agent.as_deref())
            .map_err(|RouteError::UnknownModel(model)| EngineError::UnknownModel(model))?;
        let strategy = config.routing.strategy;

        let max_attempts = config.request_retry() + 1;
        let mut attempts = 0u32;
        // Failed credentials are excluded for this ticket only.
        let mut excluded: HashSet<String> = HashSet::new();
        // One silent retry-after-refresh per credential per ticket.
        let mut refreshed: HashSet<String> = HashSet::new();
        let mut last_status: Option<u16> = None;

        while attempts < max_attempts {
            let Some((family, record)) =
                self.select(&route.providers, &route.model, strategy, &ticket.scope, &excluded)
                    .await?
            else {
                return Err(EngineError::Unavailable);
            };
            attempts += 1;

            let executor = self
                .state
                .executors
                .get(&family)
                .ok_or_else(|| EngineError::Translator(format!("no executor for {family}")))?
                .clone();
            let wire = executor.wire_proto();

            let translator = self
                .state
                .translators
                .lookup(ticket.inbound_proto, wire)
                .map_err(|err| EngineError::Translator(err.to_string()))?;
            let translated = translator
                .convert_request(&route.model, &ticket.body)
                .map_err(|err| match err {
                    // Inbound bodies that fail to decode are the client's
                    // problem; everything else in this path is ours.
                    TransformError::Decode(msg) => EngineError::BadRequest {
                        status: 400,
                        body: error_body(&msg),
                    },
                    other => EngineError::Translator(other.to_string()),
                })?;
            let translated = apply_stream_flag(wire, translated, ticket.stream)?;

            let ctx = UpstreamCtx {
                trace_id: ticket.trace_id.clone(),
                model: route.model.clone(),
                stream: ticket.stream,
                attempt: attempts,
                user_agent: ticket.user_agent.clone(),
            };
            let upstream_req = match executor.build_generate(&ctx, &record, translated.into()) {
                Ok(req) => req,
                Err(err) => {
                    tracing::warn!(credential_id = %record.id, error = %err,
                        "executor rejected credential");
                    self.mark_error(&record, err.to_string()).await;
                    excluded.insert(record.id.clone());
                    continue;
                }
            };

            let response = match self.client.send(upstream_req).await {
                Ok(response) => response,
                Err(transport) => {
                    tracing::warn!(credential_id = %record.id, error = %transport,
                        "upstream transport failure");
                    excluded.insert(record.id.clone());
                    continue;
                }
            };

            if (200..300).contains(&response.status) {
                self.state.pool.touch_last_used(&record.id).await;
                return self
                    .finish(ticket, &route.model, family, &record, translator, response, started)
                    .await;
            }

            let status = response.status;
            last_status = Some(status);
            let body = match response.body {
                UpstreamBody::Bytes(bytes) => bytes,
                UpstreamBody::Stream(_) => Bytes::new(),
            };
            match executor.classify(status, &response.headers, &body) {
                ErrorClass::BadRequest => {
                    return Err(EngineError::BadRequest { status, body });
                }
                class @ ErrorClass::QuotaExceeded { .. } => {
                    let duration = cooldown_for(family, &class).unwrap_or(Duration::from_secs(60));
                    self.state
                        .pool
                        .report_cooldown(&record.id, &route.model, duration, CooldownReason::Quota)
                        .await;
                    excluded.insert(record.id.clone());
                }
                ErrorClass::Unauthorized => {
                    let can_refresh =
                        family.is_oauth() && !refreshed.contains(&record.id);
                    let did_refresh = can_refresh
                        && self.try_refresh(executor.refresher(), &record).await;
                    if did_refresh {
                        refreshed.insert(record.id.clone());
                        // The silent retry does not consume budget.
                        attempts -= 1;
                    } else {
                        self.mark_error(&record, format!("upstream auth failure ({status})"))
                            .await;
                        excluded.insert(record.id.clone());
                    }
                }
                ErrorClass::Retryable => {
                    excluded.insert(record.id.clone());
                }
                ErrorClass::Fatal => {
                    self.mark_error(&record, format!("fatal upstream response ({status})"))
                        .await;
                    return Err(EngineError::Exhausted {
                        last_status: Some(status),
                    });
                }
            }
        }

        Err(EngineError::Exhausted { last_status })
    }

    /// Walk the provider list and pick one credential. `Ok(None)` means no
    /// provider had any active candidate; a cooldown-only outcome surfaces as
    /// an error carrying the shortest reset.
    async fn select(
        &self,
        providers: &[ProviderFamily],
        model: &str,
        strategy: Strategy,
        scope: &RequestScope,
        excluded: &HashSet<String>,
    ) -> Result<Option<(ProviderFamily, CredentialRecord)>, EngineError> {
        let mut shortest_reset: Option<Duration> = None;

        for family in providers {
            let mut candidates = self.state.pool.candidates(*family).await;
            candidates.retain(|record| !excluded.contains(&record.id));
            if candidates.is_empty() {
                continue;
            }
            match self
                .state
                .selector
                .pick(family.as_str(), model, strategy, scope, &candidates)
            {
                Ok(record) => return Ok(Some((*family, record))),
                Err(PickError::Cooldown { reset_in }) => {
                    shortest_reset = Some(match shortest_reset {
                        Some(current) => current.min(reset_in),
                        None => reset_in,
                    });
                }
                Err(PickError::Unavailable) => {}
            }
        }

        match shortest_reset {
            // Cooldown surfaces only when no provider could serve otherwise.
            Some(reset_in) => Err(EngineError::Cooldown { reset_in }),
            None => Ok(None),
        }
    }

    async fn try_refresh(
        &self,
        refresher: Option<&dyn llmux_provider_core::TokenRefresher>,
        record: &CredentialRecord,
    ) -> bool {
        let Some(refresher) = refresher else {
            return false;
        };
        match refresher.refresh(record).await {
            Ok(token) => {
                let mut updated = record.clone();
                updated.payload = apply_refresh(&record.payload, &token);
                updated.status = CredentialStatus::Active;
                updated.last_error = None;
                if let Err(err) = self.state.store.save(updated).await {
                    tracing::error!(credential_id = %record.id, error = %err,
                        "persisting refreshed token failed");
                    return false;
                }
                true
            }
            Err(err) => {
                tracing::warn!(credential_id = %record.id, error = %err,
                    "inline token refresh failed");
                false
            }
        }
    }

    /// Mark the credential errored, both in the pool and durably in the
    /// store (the change feed loops the status back into the pool).
    async fn mark_error(&self, record: &CredentialRecord, error: String) {
        self.state
            .pool
            .set_status(&record.id, CredentialStatus::Error, Some(error.clone()))
            .await;
        if let Ok(mut stored) = self.state.store.get(&record.id).await {
            stored.status = CredentialStatus::Error;
            stored.last_error = Some(error);
            if let Err(err) = self.state.store.save(stored).await {
                tracing::error!(credential_id = %record.id, error = %err,
                    "persisting error status failed");
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish(
        &self,
        ticket: &RequestTicket,
        model: &str,
        family: ProviderFamily,
        record: &CredentialRecord,
        translator: &llmux_transform::Translator,
        response: UpstreamResponse,
        started: std::time::Instant,
    ) -> Result<EngineOutput, EngineError> {
        if !ticket.stream {
            let body = match response.body {
                UpstreamBody::Bytes(bytes) => bytes,
                UpstreamBody::Stream(_) => {
                    return Err(EngineError::Translator(
                        "unexpected streamed body for non-stream call".to_string(),
                    ));
                }
            };
            let converted = translator
                .convert_response(model, &body)
                .map_err(|err| EngineError::Translator(err.to_string()))?;
            let usage = usage_from_body(ticket.inbound_proto, &converted);
            self.emit_success(ticket, model, family, record, 200, usage, started.elapsed())
                .await;
            return Ok(EngineOutput::Json {
                body: Bytes::from(converted),
            });
        }

        let UpstreamBody::Stream(mut upstream_rx) = response.body else {
            return Err(EngineError::Translator(
                "upstream returned no stream for a streaming call".to_string(),
            ));
        };

        let wire = translator.to;
        let client_proto = ticket.inbound_proto;
        let mut decoder = StreamDecoder::new(wire);
        let mut transformer = translator
            .stream_state(model)
            .map_err(|err| EngineError::Translator(err.to_string()))?;
        let heartbeats = stream_format(client_proto) != StreamFormat::JsonStream;

        let (tx, rx) = mpsc::channel::<Bytes>(32);
        let engine = self.clone();
        let ticket = ticket.clone();
        let model = model.to_string();
        let record = record.clone();
        tokio::spawn(async move {
            let started = std::time::Instant::now();
            let mut usage: Option<(Option<i64>, Option<i64>, Option<i64>)> = None;
            let mut client_gone = false;

            'pump: loop {
                tokio::select! {
                    chunk = upstream_rx.recv() => {
                        let Some(chunk) = chunk else { break 'pump };
                        for event in decoder.push_bytes(&chunk) {
                            let outs = match transformer.push(event) {
                                Ok(outs) => outs,
                                Err(err) => {
                                    tracing::error!(trace_id = %ticket.trace_id, error = %err,
                                        "stream translation bug");
                                    break 'pump;
                                }
                            };
                            for out in outs {
                                if let Some(u) = usage_from_event(&out) {
                                    usage = Some(u);
                                }
                                if let Some(bytes) = encode_stream_event(client_proto, &out) {
                                    if tx.send(bytes).await.is_err() {
                                        // Client disconnected; dropping the
                                        // upstream receiver cancels the read
                                        // task within one chunk.
                                        client_gone = true;
                                        break 'pump;
                                    }
                                }
                            }
                        }
                    }
                    _ = tokio::time::sleep(HEARTBEAT_INTERVAL), if heartbeats => {
                        if tx.send(Bytes::from_static(HEARTBEAT_FRAME)).await.is_err() {
                            client_gone = true;
                            break 'pump;
                        }
                    }
                }
            }
            drop(upstream_rx);

            if !client_gone {
                // Flush whatever the decoder and transformer still hold, then
                // the protocol's explicit done marker.
                let mut tail = Vec::new();
                for event in decoder.finish() {
                    if let Ok(outs) = transformer.push(event) {
                        tail.extend(outs);
                    }
                }
                tail.extend(transformer.finish());
                for out in tail {
                    if let Some(u) = usage_from_event(&out) {
                        usage = Some(u);
                    }
                    if let Some(bytes) = encode_stream_event(client_proto, &out) {
                        if tx.send(bytes).await.is_err() {
                            client_gone = true;
                            break;
                        }
                    }
                }
                if !client_gone
                    && let Some(done) = done_marker(client_proto)
                {
                    let _ = tx.send(done).await;
                }
            }

            engine
                .emit_stream_end(&ticket, &model, record.family, &record, usage, started.elapsed())
                .await;
        });

        Ok(EngineOutput::Stream {
            rx,
            content_type: content_type_for_stream(client_proto),
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn emit_success(
        &self,
        ticket: &RequestTicket,
        model: &str,
        family: ProviderFamily,
        record: &CredentialRecord,
        upstream_status: u16,
        usage: Option<(Option<i64>, Option<i64>, Option<i64>)>,
        elapsed: Duration,
    ) {
        let (input, output, total) = usage.unwrap_or((None, None, None));
        self.state
            .events
            .emit(Event::Usage(UsageRecord {
                trace_id: ticket.trace_id.clone(),
                at: SystemTime::now(),
                model: model.to_string(),
                provider: Some(family),
                credential_id: Some(record.id.clone()),
                input_tokens: input,
                output_tokens: output,
                total_tokens: total,
                failure: None,
            }))
            .await;
        self.state
            .events
            .emit(Event::Access(AccessRecord {
                trace_id: ticket.trace_id.clone(),
                at: SystemTime::now(),
                method: ticket.method.clone(),
                path: ticket.path.clone(),
                inbound_model: Some(ticket.model.clone()),
                provider: Some(family),
                credential_id: Some(record.id.clone()),
                upstream_status: Some(upstream_status),
                response_status: 200,
                duration_ms: elapsed.as_millis() as u64,
            }))
            .await;
    }

    async fn emit_stream_end(
        &self,
        ticket: &RequestTicket,
        model: &str,
        family: ProviderFamily,
        record: &CredentialRecord,
        usage: Option<(Option<i64>, Option<i64>, Option<i64>)>,
        elapsed: Duration,
    ) {
        let (input, output, total) = usage.unwrap_or((None, None, None));
        self.state
            .events
            .emit(Event::Usage(UsageRecord {
                trace_id: ticket.trace_id.clone(),
                at: SystemTime::now(),
                model: model.to_string(),
                provider: Some(family),
                credential_id: Some(record.id.clone()),
                input_tokens: input,
                output_tokens: output,
                total_tokens: total,
                failure: None,
            }))
            .await;
        self.state
            .events
            .emit(Event::Access(AccessRecord {
                trace_id: ticket.trace_id.clone(),
                at: SystemTime::now(),
                method: ticket.method.clone(),
                path: ticket.path.clone(),
                inbound_model: Some(ticket.model.clone()),
                provider: Some(family),
                credential_id: Some(record.id.clone()),
                upstream_status: Some(200),
                response_status: 200,
                duration_ms: elapsed.as_millis() as u64,
            }))
            .await;
        tracing::info!(
            trace_id = %ticket.trace_id,
            model = %model,
            provider = %family,
            duration_ms = elapsed.as_millis() as u64,
            "stream completed"
        );
    }

    async fn emit_failure(&self, ticket: &RequestTicket, err: &EngineError, elapsed: Duration) {
        self.state
            .events
            .emit(Event::Usage(UsageRecord {
                trace_id: ticket.trace_id.clone(),
                at: SystemTime::now(),
                model: ticket.model.clone(),
                provider: None,
                credential_id: None,
                input_tokens: None,
                output_tokens: None,
                total_tokens: None,
                failure: Some(err.to_string()),
            }))
            .await;
        self.state
            .events
            .emit(Event::Access(AccessRecord {
                trace_id: ticket.trace_id.clone(),
                at: SystemTime::now(),
                method: ticket.method.clone(),
                path: ticket.path.clone(),
                inbound_model: Some(ticket.model.clone()),
                provider: None,
                credential_id: None,
                upstream_status: match err {
                    EngineError::BadRequest { status, .. } => Some(*status),
                    EngineError::Exhausted { last_status } => *last_status,
                    _ => None,
                },
                response_status: err.downstream_status(),
                duration_ms: elapsed.as_millis() as u64,
            }))
            .await;
        tracing::warn!(
            trace_id = %ticket.trace_id,
            model = %ticket.model,
            error = %err,
            "request failed"
        );
    }
}

/// Align the wire body's stream flag with how we will actually call the
/// upstream. Gemini signals streaming in the URL, not the body.
fn apply_stream_flag(proto: Proto, body: Vec<u8>, stream: bool) -> Result<Vec<u8>, EngineError> {
    if proto == Proto::Gemini {
        return Ok(body);
    }
    let mut value: JsonValue = serde_json::from_slice(&body)
        .map_err(|err| EngineError::Translator(err.to_string()))?;
    if let Some(object) = value.as_object_mut() {
        object.insert("stream".to_string(), JsonValue::Bool(stream));
        if proto == Proto::OpenAiChat && stream {
            object.insert(
                "stream_options".to_string(),
                serde_json::json!({ "include_usage": true }),
            );
        }
    }
    serde_json::to_vec(&value).map_err(|err| EngineError::Translator(err.to_string()))
}

fn error_body(message: &str) -> Bytes {
    Bytes::from(
        serde_json::to_vec(&serde_json::json!({
            "error": { "message": message, "type": "invalid_request_error" }
        }))
        .unwrap_or_default(),
    )
}

type UsageTriple = (Option<i64>, Option<i64>, Option<i64>);

fn usage_from_body(proto: Proto, body: &[u8]) -> Option<UsageTriple> {
    let value: JsonValue = serde_json::from_slice(body).ok()?;
    usage_from_value(proto, &value)
}

fn usage_from_value(proto: Proto, value: &JsonValue) -> Option<UsageTriple> {
    match proto {
        Proto::OpenAiChat => {
            let usage = value.get("usage")?;
            Some((
                usage.get("prompt_tokens").and_then(JsonValue::as_i64),
                usage.get("completion_tokens").and_then(JsonValue::as_i64),
                usage.get("total_tokens").and_then(JsonValue::as_i64),
            ))
        }
        Proto::OpenAiResponses => {
            let usage = value.get("usage")?;
            Some((
                usage.get("input_tokens").and_then(JsonValue::as_i64),
                usage.get("output_tokens").and_then(JsonValue::as_i64),
                usage.get("total_tokens").and_then(JsonValue::as_i64),
            ))
        }
        Proto::Claude => {
            let usage = value.get("usage")?;
            let input = usage.get("input_tokens").and_then(JsonValue::as_i64);
            let output = usage.get("output_tokens").and_then(JsonValue::as_i64);
            let total = match (input, output) {
                (Some(i), Some(o)) => Some(i + o),
                _ => None,
            };
            Some((input, output, total))
        }
        Proto::Gemini => {
            let usage = value.get("usageMetadata")?;
            Some((
                usage.get("promptTokenCount").and_then(JsonValue::as_i64),
                usage.get("candidatesTokenCount").and_then(JsonValue::as_i64),
                usage.get("totalTokenCount").and_then(JsonValue::as_i64),
            ))
        }
    }
}

fn usage_from_event(event: &StreamEvent) -> Option<UsageTriple> {
    match event {
        StreamEvent::OpenAiChat(chunk) => chunk.usage.as_ref().map(|usage| {
            (
                Some(usage.prompt_tokens),
                Some(usage.completion_tokens),
                Some(usage.total_tokens),
            )
        }),
        StreamEvent::OpenAiResponses(event) => match event {
            llmux_protocol::openai_responses::ResponseStreamEvent::Completed {
                response, ..
            } => response.usage.as_ref().map(|usage| {
                (
                    Some(usage.input_tokens),
                    Some(usage.output_tokens),
                    Some(usage.total_tokens),
                )
            }),
            _ => None,
        },
        StreamEvent::Claude(event) => match event {
            llmux_protocol::claude::StreamEvent::MessageDelta {
                usage: Some(usage),
                ..
            } => Some((
                usage.input_tokens,
                usage.output_tokens,
                match (usage.input_tokens, usage.output_tokens) {
                    (Some(i), Some(o)) => Some(i + o),
                    _ => None,
                },
            )),
            _ => None,
        },
        StreamEvent::Gemini(chunk) => chunk.usage_metadata.as_ref().map(|usage| {
            (
                usage.prompt_token_count,
                usage.candidates_token_count,
                usage.total_token_count,
            )
        }),
    }
}
