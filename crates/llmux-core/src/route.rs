use llmux_provider_core::{ModelRegistry, ProviderFamily};

use crate::config::Config;

/// Ordered dispatch plan for one inbound model id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteResult {
    pub providers: Vec<ProviderFamily>,
    /// Namespace/prefix stripped; what the upstream sees.
    pub model: String,
    /// A namespace pinned the request to exactly one family.
    pub is_direct: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("no provider serves model {0}")]
    UnknownModel(String),
}

/// Recognized `<namespace>:` prefixes. Anything else is opaque and the full
/// string stays the model id.
fn namespace_family(namespace: &str) -> Option<ProviderFamily> {
    match namespace {
        "ant" => Some(ProviderFamily::Antigravity),
        "gcli" => Some(ProviderFamily::GeminiCli),
        "vtx" => Some(ProviderFamily::VertexCompat),
        "if" => Some(ProviderFamily::Iflow),
        "as" => Some(ProviderFamily::Aistudio),
        _ => None,
    }
}

/// Split a namespace-qualified id; unrecognized namespaces are left intact.
pub fn parse(model_id: &str) -> (Option<ProviderFamily>, &str) {
    if let Some((namespace, rest)) = model_id.split_once(':')
        && let Some(family) = namespace_family(namespace)
    {
        return (Some(family), rest);
    }
    (None, model_id)
}

pub fn resolve(
    config: &Config,
    registry: &ModelRegistry,
    model_id: &str,
    user_agent: Option<&str>,
) -> Result<RouteResult, RouteError> {
    // 1) Client override by user-agent substring, case-insensitive.
    if let Some(user_agent) = user_agent {
        let haystack = user_agent.to_ascii_lowercase();
        for entry in &config.routing.client_overrides {
            if entry.user_agent.is_empty() || entry.force_provider.is_empty() {
                continue;
            }
            if haystack.contains(&entry.user_agent.to_ascii_lowercase())
                && let Some(family) = ProviderFamily::parse(&entry.force_provider)
            {
                let (_, model) = parse(model_id);
                return Ok(RouteResult {
                    providers: vec![family],
                    model: model.to_string(),
                    is_direct: true,
                });
            }
        }
    }

    // 2) Direct namespace.
    let (namespace, model) = parse(model_id);
    if let Some(family) = namespace {
        return Ok(RouteResult {
            providers: vec![family],
            model: model.to_string(),
            is_direct: true,
        });
    }

    // 3) Registry lookup, reordered by any matching routing rule.
    let mut providers = registry.providers(model);
    if providers.is_empty() {
        return Err(RouteError::UnknownModel(model_id.to_string()));
    }
    if let Some(rule) = config
        .routing
        .rules
        .iter()
        .find(|rule| rule.matches(model))
    {
        let mut reordered = Vec::new();
        for name in &rule.priority {
            // Unknown provider names in priority lists are skipped.
            if let Some(family) = ProviderFamily::parse(name)
                && providers.contains(&family)
                && !reordered.contains(&family)
            {
                reordered.push(family);
            }
        }
        // Ties and leftovers preserve registry order.
        for family in providers {
            if !reordered.contains(&family) {
                reordered.push(family);
            }
        }
        providers = reordered;
    }

    Ok(RouteResult {
        providers,
        model: model.to_string(),
        is_direct: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClientOverride, RoutingRule};
    use llmux_provider_core::registry::RegistryOptions;
    use llmux_provider_core::{CredentialPayload, CredentialRecord};

    fn registry() -> ModelRegistry {
        let records = vec![
            CredentialRecord::new(
                "g1",
                ProviderFamily::GeminiCli,
                CredentialPayload::OAuth {
                    access_token: "t".to_string(),
                    refresh_token: "r".to_string(),
                    expires_at: 0,
                },
            ),
            CredentialRecord::new(
                "a1",
                ProviderFamily::GeminiApi,
                CredentialPayload::ApiKey {
                    api_key: "k".to_string(),
                    base_url: None,
                    headers: Vec::new(),
                },
            ),
        ];
        ModelRegistry::build(&records, &RegistryOptions::default())
    }

    #[test]
    fn namespace_pins_provider_and_strips_prefix() {
        let result = resolve(&Config::default(), &registry(), "ant:gemini-2.5-pro", None).unwrap();
        assert_eq!(result.providers, vec![ProviderFamily::Antigravity]);
        assert_eq!(result.model, "gemini-2.5-pro");
        assert!(result.is_direct);
    }

    #[test]
    fn unknown_namespace_is_opaque() {
        let (family, model) = parse("weird:thing");
        assert!(family.is_none());
        assert_eq!(model, "weird:thing");
    }

    #[test]
    fn client_override_wins_over_everything() {
        let mut config = Config::default();
        config.routing.client_overrides.push(ClientOverride {
            user_agent: "ClaudeCode".to_string(),
            force_provider: "claude-code".to_string(),
        });
        let result = resolve(
            &config,
            &registry(),
            "gemini-2.5-flash",
            Some("claudecode/2.0 (cli)"),
        )
        .unwrap();
        assert_eq!(result.providers, vec![ProviderFamily::ClaudeCode]);
    }

    #[test]
    fn rules_reorder_and_skip_unknown_providers() {
        let mut config = Config::default();
        config.routing.rules.push(RoutingRule {
            name: "prefer-api".to_string(),
            model: "gemini-*".to_string(),
            priority: vec!["not-a-provider".to_string(), "gemini-api".to_string()],
        });
        let result = resolve(&config, &registry(), "gemini-2.5-flash", None).unwrap();
        assert_eq!(
            result.providers,
            vec![ProviderFamily::GeminiApi, ProviderFamily::GeminiCli]
        );
    }

    #[test]
    fn unknown_model_errors() {
        assert!(resolve(&Config::default(), &registry(), "no-such-model", None).is_err());
    }
}
