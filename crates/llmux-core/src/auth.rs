use std::collections::HashSet;

use llmux_provider_core::{Headers, header_get};

use crate::config::Config;

/// Inbound access gate.
///
/// Two surfaces: configured bearer tokens for proxy traffic, and an optional
/// local management password accepted via `X-Local-Password` or a bearer
/// token. Default-deny: with no keys and no access providers configured,
/// every non-management request is rejected.
pub struct AccessGate {
    keys: HashSet<String>,
    management_password_hash: Option<blake3::Hash>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Principal {
    ApiKey,
    Management,
}

impl AccessGate {
    pub fn from_config(config: &Config) -> Self {
        let mut keys: HashSet<String> = config.api_keys.iter().cloned().collect();
        for provider in &config.auth.providers {
            // The only built-in provider type carries inline keys; unknown
            // types are configuration mistakes worth surfacing.
            if provider.kind == "config-api-key" {
                keys.extend(provider.api_keys.iter().cloned());
            } else {
                tracing::warn!(name = %provider.name, kind = %provider.kind,
                    "ignoring unknown access provider type");
            }
        }
        Self {
            keys,
            management_password_hash: config
                .local_management_password
                .as_deref()
                .filter(|password| !password.is_empty())
                .map(|password| blake3::hash(password.as_bytes())),
        }
    }

    /// Gate a proxy request. `Err(())` maps to 401 with no upstream call.
    pub fn check(&self, headers: &Headers) -> Result<Principal, ()> {
        let Some(token) = extract_bearer(headers) else {
            return Err(());
        };
        if self.keys.contains(&token) {
            return Ok(Principal::ApiKey);
        }
        if self.check_password(&token) {
            return Ok(Principal::Management);
        }
        Err(())
    }

    /// Gate a management request: local password via `X-Local-Password` or
    /// `Authorization: Bearer`.
    pub fn check_management(&self, headers: &Headers) -> bool {
        if let Some(password) = header_get(headers, "X-Local-Password")
            && self.check_password(password)
        {
            return true;
        }
        extract_bearer(headers).is_some_and(|token| self.check_password(&token))
    }

    fn check_password(&self, candidate: &str) -> bool {
        match &self.management_password_hash {
            Some(hash) => blake3::hash(candidate.as_bytes()) == *hash,
            None => false,
        }
    }
}

fn extract_bearer(headers: &Headers) -> Option<String> {
    // x-api-key and x-goog-api-key carry the same inbound tokens for clients
    // speaking the Anthropic/Gemini SDK conventions.
    for name in ["x-api-key", "x-goog-api-key"] {
        if let Some(value) = header_get(headers, name) {
            let value = value.trim();
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    let value = header_get(headers, "Authorization")?.trim();
    let prefix = "Bearer ";
    if value.len() > prefix.len() && value[..prefix.len()].eq_ignore_ascii_case(prefix) {
        let token = value[prefix.len()..].trim();
        if !token.is_empty() {
            return Some(token.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bearer(token: &str) -> Headers {
        vec![("Authorization".to_string(), format!("Bearer {token}"))]
    }

    #[test]
    fn default_deny_with_no_keys() {
        let gate = AccessGate::from_config(&Config::default());
        assert!(gate.check(&bearer("anything")).is_err());
        assert!(gate.check(&Vec::new()).is_err());
    }

    #[test]
    fn configured_keys_pass() {
        let mut config = Config::default();
        config.api_keys.push("sk-local-1".to_string());
        let gate = AccessGate::from_config(&config);
        assert_eq!(gate.check(&bearer("sk-local-1")), Ok(Principal::ApiKey));
        assert!(gate.check(&bearer("sk-wrong")).is_err());
    }

    #[test]
    fn provider_keys_pass() {
        let mut config = Config::default();
        config.auth.providers.push(crate::config::AccessProviderConfig {
            name: "team".to_string(),
            kind: "config-api-key".to_string(),
            api_keys: vec!["sk-team".to_string()],
            config: serde_json::Value::Null,
        });
        let gate = AccessGate::from_config(&config);
        assert!(gate.check(&bearer("sk-team")).is_ok());
    }

    #[test]
    fn x_api_key_header_is_accepted() {
        let mut config = Config::default();
        config.api_keys.push("sk-local-1".to_string());
        let gate = AccessGate::from_config(&config);
        let headers = vec![("x-api-key".to_string(), "sk-local-1".to_string())];
        assert!(gate.check(&headers).is_ok());
    }

    #[test]
    fn management_password_works_on_both_surfaces() {
        let mut config = Config::default();
        config.local_management_password = Some("hunter2".to_string());
        let gate = AccessGate::from_config(&config);

        let local = vec![("X-Local-Password".to_string(), "hunter2".to_string())];
        assert!(gate.check_management(&local));
        assert!(gate.check_management(&bearer("hunter2")));
        assert!(!gate.check_management(&bearer("wrong")));
        assert_eq!(gate.check(&bearer("hunter2")), Ok(Principal::Management));
    }
}
