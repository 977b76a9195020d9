//! Core provider abstractions: credential records and their live pool, the
//! model registry, the selector, and the executor/refresher traits.
//!
//! This crate intentionally does **not** depend on axum or any concrete HTTP
//! client. Executors *build* [`UpstreamRequest`]s and classify failures; a
//! higher layer performs IO.

pub mod credential;
pub mod events;
pub mod executor;
pub mod family;
pub mod headers;
pub mod registry;
pub mod selector;

pub use credential::{
    CooldownReason, CredentialId, CredentialPayload, CredentialPool, CredentialRecord,
    CredentialStatus,
};
pub use events::{AccessRecord, Event, EventHub, EventSink, OperationalEvent, UsageRecord};
pub use executor::{
    ErrorClass, ExecutorError, RefreshError, RefreshedToken, TokenRefresher, UpstreamCtx,
    UpstreamExecutor, UpstreamRequest, apply_refresh, cooldown_for, default_classify,
};
pub use family::ProviderFamily;
pub use headers::{Headers, header_get, header_remove, header_set};
pub use registry::{ModelRegistry, ModelTarget, RegistryOptions};
pub use selector::{PickError, RequestScope, Selector, Strategy};

pub use llmux_transform::{Proto, StreamFormat, stream_format};
