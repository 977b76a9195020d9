use std::future::Future;
use std::pin::Pin;

use llmux_provider_core::{Event, EventSink};

/// Writes every usage record and access line through `tracing`, one line per
/// event.
pub struct LogSink;

impl EventSink for LogSink {
    fn write<'a>(&'a self, event: &'a Event) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            match event {
                Event::Access(access) => {
                    tracing::info!(
                        target: "llmux::access",
                        trace_id = %access.trace_id,
                        method = %access.method,
                        path = %access.path,
                        model = access.inbound_model.as_deref().unwrap_or("-"),
                        provider = access.provider.map(|p| p.as_str()).unwrap_or("-"),
                        credential = access.credential_id.as_deref().unwrap_or("-"),
                        upstream_status = access.upstream_status.unwrap_or(0),
                        status = access.response_status,
                        duration_ms = access.duration_ms,
                        "access"
                    );
                }
                Event::Usage(usage) => {
                    tracing::info!(
                        target: "llmux::usage",
                        trace_id = %usage.trace_id,
                        model = %usage.model,
                        provider = usage.provider.map(|p| p.as_str()).unwrap_or("-"),
                        input_tokens = usage.input_tokens.unwrap_or(-1),
                        output_tokens = usage.output_tokens.unwrap_or(-1),
                        total_tokens = usage.total_tokens.unwrap_or(-1),
                        failure = usage.failure.as_deref().unwrap_or("-"),
                        "usage"
                    );
                }
                Event::Operational(op) => {
                    tracing::debug!(target: "llmux::events", ?op, "operational event");
                }
            }
        })
    }
}
