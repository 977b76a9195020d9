//! HTTP surface: the four protocol ingress adapters, read-only model
//! listings, and the management endpoints.

mod management;
mod proxy;

use std::sync::Arc;

use llmux_core::{AccessGate, Engine};
use llmux_provider_core::Headers;

#[derive(Clone)]
pub struct GatewayState {
    pub engine: Arc<Engine>,
    pub gate: Arc<AccessGate>,
}

/// Build the public proxy router (access-gated).
pub fn proxy_router(engine: Arc<Engine>, gate: Arc<AccessGate>) -> axum::Router {
    proxy::router(GatewayState { engine, gate })
}

/// Build the management router (`/v0/management/*`).
pub fn management_router(engine: Arc<Engine>, gate: Arc<AccessGate>) -> axum::Router {
    management::router(GatewayState { engine, gate })
}

pub(crate) fn headers_to_vec(headers: &axum::http::HeaderMap) -> Headers {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|text| (name.as_str().to_string(), text.to_string()))
        })
        .collect()
}
