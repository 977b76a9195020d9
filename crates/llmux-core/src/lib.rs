//! Request orchestration: routing, selection, translation, upstream IO,
//! retries, and the background refresh worker.

pub mod auth;
pub mod client;
pub mod config;
pub mod engine;
pub mod refresh;
pub mod route;
pub mod state;
pub mod wire;

pub use auth::AccessGate;
pub use client::{UpstreamBody, UpstreamClient, UpstreamResponse, WreqUpstreamClient};
pub use config::Config;
pub use engine::{Engine, EngineError, EngineOutput, RequestTicket};
pub use refresh::RefreshWorker;
pub use route::RouteResult;
pub use state::AppState;
