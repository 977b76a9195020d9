//! Concrete upstream executors, one per provider family, plus the OAuth
//! refreshers the refresh worker drives.

mod antigravity;
mod auth;
mod claude_api;
mod claude_code;
mod codex;
mod gemini_api;
mod gemini_cli;
mod kiro;
mod oauth;
mod openai_compat;
pub mod tokens;

use std::collections::HashMap;
use std::sync::Arc;

use llmux_provider_core::{ProviderFamily, UpstreamExecutor};

pub use oauth::{OAuthEndpoint, OAuthHttp};

/// Build the full executor table. Called once at bootstrap; lookup afterwards
/// is a map access on the family tag.
pub fn build_executors() -> HashMap<ProviderFamily, Arc<dyn UpstreamExecutor>> {
    let mut out: HashMap<ProviderFamily, Arc<dyn UpstreamExecutor>> = HashMap::new();

    out.insert(
        ProviderFamily::GeminiCli,
        Arc::new(gemini_cli::GeminiCliExecutor::new()),
    );
    out.insert(
        ProviderFamily::Antigravity,
        Arc::new(antigravity::AntigravityExecutor::new()),
    );
    out.insert(
        ProviderFamily::ClaudeCode,
        Arc::new(claude_code::ClaudeCodeExecutor::new()),
    );
    out.insert(
        ProviderFamily::ClaudeApi,
        Arc::new(claude_api::ClaudeApiExecutor::new()),
    );
    out.insert(ProviderFamily::Codex, Arc::new(codex::CodexExecutor::new()));
    out.insert(
        ProviderFamily::Aistudio,
        Arc::new(gemini_api::GeminiApiExecutor::aistudio()),
    );
    out.insert(
        ProviderFamily::GeminiApi,
        Arc::new(gemini_api::GeminiApiExecutor::gemini_api()),
    );
    out.insert(
        ProviderFamily::VertexCompat,
        Arc::new(gemini_api::GeminiApiExecutor::vertex_compat()),
    );
    out.insert(ProviderFamily::Kiro, Arc::new(kiro::KiroExecutor::new()));

    for family in [
        ProviderFamily::OpenaiCompat,
        ProviderFamily::QwenCode,
        ProviderFamily::Iflow,
        ProviderFamily::Copilot,
        ProviderFamily::CodexApi,
    ] {
        out.insert(
            family,
            Arc::new(openai_compat::OpenAiCompatExecutor::new(family)),
        );
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_family_has_an_executor() {
        let executors = build_executors();
        for family in ProviderFamily::ALL {
            assert!(executors.contains_key(&family), "missing executor: {family}");
        }
    }
}
