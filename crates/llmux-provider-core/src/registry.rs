use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::credential::CredentialRecord;
use crate::family::ProviderFamily;

/// One serving option for a model id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelTarget {
    pub family: ProviderFamily,
    pub credential_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

/// Per-family model overrides from configuration.
#[derive(Debug, Clone, Default)]
pub struct RegistryOptions {
    /// family -> hidden model ids.
    pub excluded: HashMap<ProviderFamily, Vec<String>>,
    /// family -> model id -> (alias, fork). fork=true keeps the original
    /// entry and duplicates it under the alias.
    pub mappings: HashMap<ProviderFamily, HashMap<String, ModelMapping>>,
    /// When set, prefixed credentials never serve unprefixed ids.
    pub force_model_prefix: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMapping {
    pub alias: String,
    #[serde(default)]
    pub fork: bool,
}

/// Eventually-consistent projection of the credential set plus static
/// per-family model lists. Rebuilt wholesale on every credential change;
/// reads see either the old or the new table, never a partial one.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    entries: HashMap<String, Vec<ModelTarget>>,
}

impl ModelRegistry {
    pub fn build(records: &[CredentialRecord], options: &RegistryOptions) -> Self {
        let mut entries: HashMap<String, Vec<ModelTarget>> = HashMap::new();

        for record in records {
            if !record.is_active() {
                continue;
            }
            let excluded = options.excluded.get(&record.family);
            let mappings = options.mappings.get(&record.family);

            let mut models: Vec<String> = record
                .family
                .default_models()
                .iter()
                .map(|model| model.to_string())
                .collect();
            // Compat credentials advertise their configured models through
            // the attributes bag.
            if let Some(extra) = record.attributes.get("models").and_then(|v| v.as_array()) {
                models.extend(
                    extra
                        .iter()
                        .filter_map(|value| value.as_str())
                        .map(|value| value.to_string()),
                );
            }

            for model in models {
                if excluded.is_some_and(|hidden| hidden.iter().any(|h| h == &model)) {
                    continue;
                }
                let mapping = mappings.and_then(|map| map.get(&model));
                let (serve_names, alias) = match mapping {
                    Some(mapping) if mapping.fork => (
                        vec![model.clone(), mapping.alias.clone()],
                        Some(mapping.alias.clone()),
                    ),
                    Some(mapping) => (vec![mapping.alias.clone()], Some(mapping.alias.clone())),
                    None => (vec![model.clone()], None),
                };

                for name in serve_names {
                    let target = ModelTarget {
                        family: record.family,
                        credential_id: record.id.clone(),
                        alias: alias.clone(),
                    };
                    match &record.prefix {
                        Some(prefix) => {
                            entries
                                .entry(format!("{prefix}/{name}"))
                                .or_default()
                                .push(target.clone());
                            if !options.force_model_prefix {
                                entries.entry(name.clone()).or_default().push(target.clone());
                            }
                        }
                        None => {
                            entries.entry(name.clone()).or_default().push(target);
                        }
                    }
                }
            }
        }

        for targets in entries.values_mut() {
            targets.sort_by(|a, b| {
                (a.family.preference_rank(), &a.credential_id)
                    .cmp(&(b.family.preference_rank(), &b.credential_id))
            });
            targets.dedup();
        }

        Self { entries }
    }

    /// Ordered provider families able to serve `model_id`.
    pub fn providers(&self, model_id: &str) -> Vec<ProviderFamily> {
        let mut out = Vec::new();
        for target in self.entries.get(model_id).map(Vec::as_slice).unwrap_or(&[]) {
            if !out.contains(&target.family) {
                out.push(target.family);
            }
        }
        out
    }

    pub fn targets(&self, model_id: &str) -> &[ModelTarget] {
        self.entries.get(model_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn models(&self) -> Vec<String> {
        let mut out: Vec<String> = self.entries.keys().cloned().collect();
        out.sort();
        out
    }

    pub fn contains(&self, model_id: &str) -> bool {
        self.entries.contains_key(model_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::{CredentialPayload, CredentialRecord};

    fn oauth_record(id: &str, family: ProviderFamily) -> CredentialRecord {
        CredentialRecord::new(
            id,
            family,
            CredentialPayload::OAuth {
                access_token: "tok".to_string(),
                refresh_token: "ref".to_string(),
                expires_at: 0,
            },
        )
    }

    #[test]
    fn rebuild_reflects_credentials_and_preference_order() {
        let records = vec![
            oauth_record("g1", ProviderFamily::GeminiCli),
            {
                let mut r = CredentialRecord::new(
                    "a1",
                    ProviderFamily::GeminiApi,
                    CredentialPayload::ApiKey {
                        api_key: "k".to_string(),
                        base_url: None,
                        headers: Vec::new(),
                    },
                );
                r.priority = 5;
                r
            },
        ];
        let registry = ModelRegistry::build(&records, &RegistryOptions::default());
        let providers = registry.providers("gemini-2.5-flash");
        assert_eq!(
            providers,
            vec![ProviderFamily::GeminiCli, ProviderFamily::GeminiApi]
        );
    }

    #[test]
    fn prefixed_credentials_bind_prefixed_ids() {
        let mut record = oauth_record("team", ProviderFamily::GeminiCli);
        record.prefix = Some("teamA".to_string());

        let relaxed = ModelRegistry::build(
            std::slice::from_ref(&record),
            &RegistryOptions::default(),
        );
        assert!(relaxed.contains("teamA/gemini-2.5-pro"));
        assert!(relaxed.contains("gemini-2.5-pro"));

        let forced = ModelRegistry::build(
            std::slice::from_ref(&record),
            &RegistryOptions {
                force_model_prefix: true,
                ..Default::default()
            },
        );
        assert!(forced.contains("teamA/gemini-2.5-pro"));
        assert!(!forced.contains("gemini-2.5-pro"));
    }

    #[test]
    fn fork_mapping_duplicates_entry_under_alias() {
        let record = oauth_record("g1", ProviderFamily::GeminiCli);
        let mut mappings = HashMap::new();
        mappings.insert(ProviderFamily::GeminiCli, {
            let mut inner = HashMap::new();
            inner.insert(
                "gemini-2.5-pro".to_string(),
                ModelMapping {
                    alias: "pro".to_string(),
                    fork: true,
                },
            );
            inner
        });
        let registry = ModelRegistry::build(
            std::slice::from_ref(&record),
            &RegistryOptions {
                mappings,
                ..Default::default()
            },
        );
        assert!(registry.contains("gemini-2.5-pro"));
        assert!(registry.contains("pro"));
    }

    #[test]
    fn excluded_models_are_hidden() {
        let record = oauth_record("g1", ProviderFamily::GeminiCli);
        let mut excluded = HashMap::new();
        excluded.insert(
            ProviderFamily::GeminiCli,
            vec!["gemini-1.5-pro".to_string()],
        );
        let registry = ModelRegistry::build(
            std::slice::from_ref(&record),
            &RegistryOptions {
                excluded,
                ..Default::default()
            },
        );
        assert!(!registry.contains("gemini-1.5-pro"));
        assert!(registry.contains("gemini-2.5-pro"));
    }

    #[test]
    fn inactive_records_do_not_serve() {
        let mut record = oauth_record("g1", ProviderFamily::GeminiCli);
        record.status = crate::credential::CredentialStatus::Error;
        let registry =
            ModelRegistry::build(std::slice::from_ref(&record), &RegistryOptions::default());
        assert!(registry.models().is_empty());
    }
}
