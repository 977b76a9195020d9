use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use llmux_provider_core::registry::{ModelMapping, RegistryOptions};
use llmux_provider_core::{
    CredentialPayload, CredentialRecord, ProviderFamily, Strategy,
};

pub const DEFAULT_PORT: u16 = 8317;
const DEFAULT_REQUEST_RETRY: i32 = 3;

/// Process configuration. Loaded from YAML by the binary; everything here is
/// already validated and normalized.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
    pub listen_addr: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    /// Inbound bearer tokens. Empty list plus no auth providers means every
    /// non-management request is denied.
    pub api_keys: Vec<String>,
    pub auth: AuthConfig,
    pub proxy_url: Option<String>,
    pub request_retry: i32,
    pub force_model_prefix: bool,
    pub routing: RoutingConfig,
    pub oauth_excluded_models: HashMap<String, Vec<String>>,
    pub oauth_model_mappings: HashMap<String, HashMap<String, ModelMappingConfig>>,
    pub auth_dir: Option<String>,
    pub local_management_password: Option<String>,
    pub gemini_api_key: Vec<ApiKeyEntry>,
    pub claude_api_key: Vec<ApiKeyEntry>,
    pub codex_api_key: Vec<ApiKeyEntry>,
    pub vertex_api_key: Vec<ApiKeyEntry>,
    pub openai_compatibility: Vec<CompatEntry>,
    pub ampcode: AmpcodeConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: None,
            host: None,
            port: None,
            api_keys: Vec::new(),
            auth: AuthConfig::default(),
            proxy_url: None,
            request_retry: DEFAULT_REQUEST_RETRY,
            force_model_prefix: false,
            routing: RoutingConfig::default(),
            oauth_excluded_models: HashMap::new(),
            oauth_model_mappings: HashMap::new(),
            auth_dir: None,
            local_management_password: None,
            gemini_api_key: Vec::new(),
            claude_api_key: Vec::new(),
            codex_api_key: Vec::new(),
            vertex_api_key: Vec::new(),
            openai_compatibility: Vec::new(),
            ampcode: AmpcodeConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct AuthConfig {
    pub providers: Vec<AccessProviderConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct AccessProviderConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub api_keys: Vec<String>,
    pub config: serde_json::Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RoutingConfig {
    pub strategy: Strategy,
    pub rules: Vec<RoutingRule>,
    pub client_overrides: Vec<ClientOverride>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RoutingRule {
    pub name: String,
    /// Literal model id or trailing-`*` prefix glob.
    pub model: String,
    /// Provider family names, most preferred first.
    pub priority: Vec<String>,
}

impl RoutingRule {
    pub fn matches(&self, model: &str) -> bool {
        match self.model.strip_suffix('*') {
            Some(prefix) => model.starts_with(prefix),
            None => self.model == model,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ClientOverride {
    pub user_agent: String,
    pub force_provider: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ModelMappingConfig {
    pub name: Option<String>,
    pub alias: String,
    #[serde(default)]
    pub fork: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ApiKeyEntry {
    pub api_key: String,
    pub base_url: Option<String>,
    pub prefix: Option<String>,
    pub priority: i32,
    pub weight: u32,
    pub headers: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct CompatEntry {
    pub name: String,
    pub base_url: String,
    pub api_keys: Vec<String>,
    pub models: Vec<CompatModel>,
    pub prefix: Option<String>,
    pub priority: i32,
    pub weight: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct CompatModel {
    pub name: String,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct AmpcodeConfig {
    pub upstream_url: Option<String>,
    pub upstream_api_key: Option<String>,
    pub restrict_management_to_localhost: bool,
    pub force_model_mappings: bool,
    pub model_mappings: Vec<AmpcodeModelMapping>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct AmpcodeModelMapping {
    pub from: String,
    pub to: String,
}

impl Config {
    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        let mut config: Config = serde_yaml::from_str(text)?;
        config.normalize();
        Ok(config)
    }

    /// One canonical form for everything downstream: trailing slashes are
    /// stripped from prefixes here and nowhere else, and a negative retry
    /// budget resets to the default.
    pub fn normalize(&mut self) {
        if self.request_retry < 0 {
            self.request_retry = DEFAULT_REQUEST_RETRY;
        }
        for entry in self
            .gemini_api_key
            .iter_mut()
            .chain(self.claude_api_key.iter_mut())
            .chain(self.codex_api_key.iter_mut())
            .chain(self.vertex_api_key.iter_mut())
        {
            entry.prefix = normalize_prefix(entry.prefix.take());
        }
        for entry in self.openai_compatibility.iter_mut() {
            entry.prefix = normalize_prefix(entry.prefix.take());
        }
    }

    pub fn bind_addr(&self) -> String {
        if let Some(addr) = &self.listen_addr {
            return addr.clone();
        }
        format!(
            "{}:{}",
            self.host.as_deref().unwrap_or("0.0.0.0"),
            self.port.unwrap_or(DEFAULT_PORT)
        )
    }

    pub fn request_retry(&self) -> u32 {
        if self.request_retry < 0 {
            DEFAULT_REQUEST_RETRY as u32
        } else {
            self.request_retry as u32
        }
    }

    /// Registry rebuild options derived from the model mapping/exclusion
    /// sections.
    pub fn registry_options(&self) -> RegistryOptions {
        let mut excluded = HashMap::new();
        for (family, models) in &self.oauth_excluded_models {
            if let Some(family) = ProviderFamily::parse(family) {
                excluded.insert(family, models.clone());
            }
        }
        let mut mappings: HashMap<ProviderFamily, HashMap<String, ModelMapping>> = HashMap::new();
        for (family, family_mappings) in &self.oauth_model_mappings {
            let Some(family) = ProviderFamily::parse(family) else {
                continue;
            };
            let slot = mappings.entry(family).or_default();
            for (model, mapping) in family_mappings {
                let model = mapping.name.clone().unwrap_or_else(|| model.clone());
                slot.insert(
                    model,
                    ModelMapping {
                        alias: mapping.alias.clone(),
                        fork: mapping.fork,
                    },
                );
            }
        }
        RegistryOptions {
            excluded,
            mappings,
            force_model_prefix: self.force_model_prefix,
        }
    }

    /// Static API-key credentials declared inline in the config file. They
    /// are seeded into the store at bootstrap with deterministic ids so
    /// reloads overwrite rather than duplicate.
    pub fn static_credentials(&self) -> Vec<CredentialRecord> {
        let mut out = Vec::new();
        let sections: [(&[ApiKeyEntry], ProviderFamily); 4] = [
            (&self.gemini_api_key, ProviderFamily::GeminiApi),
            (&self.claude_api_key, ProviderFamily::ClaudeApi),
            (&self.codex_api_key, ProviderFamily::CodexApi),
            (&self.vertex_api_key, ProviderFamily::VertexCompat),
        ];
        for (entries, family) in sections {
            for (index, entry) in entries.iter().enumerate() {
                let mut record = CredentialRecord::new(
                    format!("{}-{}", family.as_str(), index + 1),
                    family,
                    CredentialPayload::ApiKey {
                        api_key: entry.api_key.clone(),
                        base_url: entry.base_url.clone(),
                        headers: entry.headers.clone(),
                    },
                );
                record.priority = entry.priority;
                record.weight = entry.weight.max(1);
                record.prefix = entry.prefix.clone();
                out.push(record);
            }
        }
        for (index, entry) in self.openai_compatibility.iter().enumerate() {
            for (key_index, api_key) in entry.api_keys.iter().enumerate() {
                let mut record = CredentialRecord::new(
                    format!("openai-compat-{}-{}", index + 1, key_index + 1),
                    ProviderFamily::OpenaiCompat,
                    CredentialPayload::ApiKey {
                        api_key: api_key.clone(),
                        base_url: Some(entry.base_url.clone()),
                        headers: Vec::new(),
                    },
                );
                record.priority = entry.priority;
                record.weight = entry.weight.max(1);
                record.prefix = entry.prefix.clone();
                record.attributes.insert(
                    "name".to_string(),
                    serde_json::Value::String(entry.name.clone()),
                );
                record.attributes.insert(
                    "models".to_string(),
                    serde_json::Value::Array(
                        entry
                            .models
                            .iter()
                            .flat_map(|model| {
                                let mut names = vec![serde_json::Value::String(model.name.clone())];
                                if let Some(alias) = &model.alias {
                                    names.push(serde_json::Value::String(alias.clone()));
                                }
                                names
                            })
                            .collect(),
                    ),
                );
                out.push(record);
            }
        }
        out
    }
}

fn normalize_prefix(prefix: Option<String>) -> Option<String> {
    prefix
        .map(|p| p.trim_end_matches('/').to_string())
        .filter(|p| !p.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply() {
        let config = Config::from_yaml("{}").unwrap();
        assert_eq!(config.bind_addr(), "0.0.0.0:8317");
        assert_eq!(config.request_retry(), 3);
    }

    #[test]
    fn negative_retry_resets_to_default() {
        let config = Config::from_yaml("request-retry: -5").unwrap();
        assert_eq!(config.request_retry(), 3);
    }

    #[test]
    fn prefixes_are_canonicalized_once() {
        let config = Config::from_yaml(
            "claude-api-key:\n  - api-key: sk-1\n    prefix: teamA/\n",
        )
        .unwrap();
        assert_eq!(config.claude_api_key[0].prefix.as_deref(), Some("teamA"));
    }

    #[test]
    fn static_credentials_have_deterministic_ids() {
        let config = Config::from_yaml(
            "claude-api-key:\n  - api-key: sk-1\n  - api-key: sk-2\n",
        )
        .unwrap();
        let ids: Vec<String> = config
            .static_credentials()
            .into_iter()
            .map(|record| record.id)
            .collect();
        assert_eq!(ids, vec!["claude-api-1", "claude-api-2"]);
    }

    #[test]
    fn rules_glob_matches_prefix() {
        let rule = RoutingRule {
            name: "gem".to_string(),
            model: "gemini-*".to_string(),
            priority: vec!["gemini-cli".to_string()],
        };
        assert!(rule.matches("gemini-2.5-pro"));
        assert!(!rule.matches("gpt-5"));
    }
}
