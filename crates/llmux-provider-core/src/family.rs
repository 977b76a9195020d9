use std::time::Duration;

use serde::{Deserialize, Serialize};

use llmux_transform::Proto;

/// A class of upstream with a shared protocol and credential shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderFamily {
    GeminiCli,
    Antigravity,
    ClaudeCode,
    Codex,
    QwenCode,
    Iflow,
    Copilot,
    Kiro,
    Aistudio,
    OpenaiCompat,
    VertexCompat,
    ClaudeApi,
    GeminiApi,
    CodexApi,
}

impl ProviderFamily {
    pub const ALL: [ProviderFamily; 14] = [
        ProviderFamily::GeminiCli,
        ProviderFamily::Antigravity,
        ProviderFamily::ClaudeCode,
        ProviderFamily::Codex,
        ProviderFamily::QwenCode,
        ProviderFamily::Iflow,
        ProviderFamily::Copilot,
        ProviderFamily::Kiro,
        ProviderFamily::Aistudio,
        ProviderFamily::OpenaiCompat,
        ProviderFamily::VertexCompat,
        ProviderFamily::ClaudeApi,
        ProviderFamily::GeminiApi,
        ProviderFamily::CodexApi,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderFamily::GeminiCli => "gemini-cli",
            ProviderFamily::Antigravity => "antigravity",
            ProviderFamily::ClaudeCode => "claude-code",
            ProviderFamily::Codex => "codex",
            ProviderFamily::QwenCode => "qwen-code",
            ProviderFamily::Iflow => "iflow",
            ProviderFamily::Copilot => "copilot",
            ProviderFamily::Kiro => "kiro",
            ProviderFamily::Aistudio => "aistudio",
            ProviderFamily::OpenaiCompat => "openai-compat",
            ProviderFamily::VertexCompat => "vertex-compat",
            ProviderFamily::ClaudeApi => "claude-api",
            ProviderFamily::GeminiApi => "gemini-api",
            ProviderFamily::CodexApi => "codex-api",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        ProviderFamily::ALL
            .into_iter()
            .find(|family| family.as_str() == value)
    }

    /// The canonical protocol this family speaks on the wire. Envelopes
    /// (gemini-cli/antigravity wrappers, vendor paths) are applied by the
    /// executor on top of this.
    pub fn wire_proto(&self) -> Proto {
        match self {
            ProviderFamily::GeminiCli
            | ProviderFamily::Antigravity
            | ProviderFamily::Aistudio
            | ProviderFamily::GeminiApi
            | ProviderFamily::VertexCompat => Proto::Gemini,
            ProviderFamily::ClaudeCode | ProviderFamily::ClaudeApi | ProviderFamily::Kiro => {
                Proto::Claude
            }
            ProviderFamily::Codex => Proto::OpenAiResponses,
            ProviderFamily::QwenCode
            | ProviderFamily::Iflow
            | ProviderFamily::Copilot
            | ProviderFamily::OpenaiCompat
            | ProviderFamily::CodexApi => Proto::OpenAiChat,
        }
    }

    /// Families whose credentials carry OAuth tokens the refresh worker owns.
    pub fn is_oauth(&self) -> bool {
        matches!(
            self,
            ProviderFamily::GeminiCli
                | ProviderFamily::Antigravity
                | ProviderFamily::ClaudeCode
                | ProviderFamily::Codex
                | ProviderFamily::QwenCode
                | ProviderFamily::Iflow
                | ProviderFamily::Copilot
                | ProviderFamily::Kiro
        )
    }

    /// Static per-family preference used to order the registry's provider
    /// lists; lower ranks first. OAuth CLI pools are preferred over metered
    /// API keys, which are preferred over third-party compat endpoints.
    pub fn preference_rank(&self) -> u8 {
        match self {
            ProviderFamily::GeminiCli => 0,
            ProviderFamily::Antigravity => 1,
            ProviderFamily::ClaudeCode => 2,
            ProviderFamily::Codex => 3,
            ProviderFamily::QwenCode => 4,
            ProviderFamily::Iflow => 5,
            ProviderFamily::Copilot => 6,
            ProviderFamily::Kiro => 7,
            ProviderFamily::Aistudio => 8,
            ProviderFamily::GeminiApi => 9,
            ProviderFamily::ClaudeApi => 10,
            ProviderFamily::CodexApi => 11,
            ProviderFamily::VertexCompat => 12,
            ProviderFamily::OpenaiCompat => 13,
        }
    }

    /// Cooldown applied on a rate-limit response without a usable
    /// `Retry-After`.
    pub fn rate_limit_cooldown(&self) -> Duration {
        Duration::from_secs(60)
    }

    /// Cooldown applied when the body carries a daily/project quota marker.
    pub fn quota_cooldown(&self) -> Duration {
        match self {
            ProviderFamily::GeminiCli | ProviderFamily::Antigravity => Duration::from_secs(3600),
            ProviderFamily::ClaudeCode | ProviderFamily::Codex => Duration::from_secs(3600),
            _ => Duration::from_secs(1800),
        }
    }

    /// Models every credential of this family advertises without asking the
    /// upstream. Registry entries are the union of this list and per-config
    /// mappings.
    pub fn default_models(&self) -> &'static [&'static str] {
        match self {
            ProviderFamily::GeminiCli | ProviderFamily::Aistudio | ProviderFamily::GeminiApi => &[
                "gemini-2.5-pro",
                "gemini-2.5-flash",
                "gemini-2.5-flash-lite",
                "gemini-1.5-pro",
                "gemini-1.5-flash",
            ],
            ProviderFamily::Antigravity => &[
                "gemini-2.5-pro",
                "gemini-2.5-flash",
                "gemini-3-pro-preview",
            ],
            ProviderFamily::ClaudeCode | ProviderFamily::ClaudeApi => &[
                "claude-opus-4-1",
                "claude-sonnet-4-5",
                "claude-haiku-4-5",
                "claude-3-5-haiku-20241022",
            ],
            ProviderFamily::Codex | ProviderFamily::CodexApi => {
                &["gpt-5", "gpt-5-codex", "codex-mini-latest"]
            }
            ProviderFamily::QwenCode => &["qwen3-coder-plus", "qwen3-coder-flash"],
            ProviderFamily::Iflow => &["deepseek-v3", "qwen3-max", "kimi-k2"],
            ProviderFamily::Copilot => &["gpt-5-mini", "gpt-4.1", "o4-mini"],
            ProviderFamily::Kiro => &["claude-sonnet-4-5", "claude-haiku-4-5"],
            // Compat endpoints advertise models only via explicit config.
            ProviderFamily::OpenaiCompat | ProviderFamily::VertexCompat => &[],
        }
    }
}

impl std::fmt::Display for ProviderFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_round_trip_through_serde() {
        for family in ProviderFamily::ALL {
            let json = serde_json::to_string(&family).unwrap();
            assert_eq!(json, format!("\"{}\"", family.as_str()));
            let back: ProviderFamily = serde_json::from_str(&json).unwrap();
            assert_eq!(back, family);
        }
    }
}
