//! Per-model aliasing and the `cheap|good|sota` symbolic selector (spec
//! §4.3's "Initialization"), grounded on `ApiModelConfig`/`ModelFilter`
//! from the gateway's LLM config.

use std::{collections::BTreeMap, fmt};

use regex::{Regex, RegexBuilder};
use serde::Deserialize;

use crate::header_rule::HeaderRule;

/// A configured alias: the id callers use (the map key in
/// [`ProviderConfig::models`](crate::ProviderConfig::models)) maps to the
/// provider's real model id via `rename`.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelAlias {
    #[serde(default)]
    pub rename: Option<String>,
    #[serde(default)]
    pub headers: Vec<HeaderRule>,
}

/// Case-insensitive regex filter restricting which model ids are allowed
/// through to this provider without being a configured alias.
#[derive(Clone)]
pub struct ModelFilter {
    regex: Regex,
}

impl ModelFilter {
    pub fn new(pattern: &str) -> Result<Self, String> {
        let trimmed = pattern.trim();
        if trimmed.is_empty() {
            return Err("model_filter cannot be empty".to_string());
        }
        let regex = RegexBuilder::new(trimmed)
            .case_insensitive(true)
            .build()
            .map_err(|err| format!("invalid model_filter regex: {err}"))?;
        Ok(Self { regex })
    }

    pub fn is_match(&self, model: &str) -> bool {
        self.regex.is_match(model)
    }
}

impl fmt::Debug for ModelFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelFilter").field("pattern", &self.regex.as_str()).finish()
    }
}

/// Resolves caller-facing model ids (including the symbolic `cheap`,
/// `good`, `sota` tier selectors) against a provider's configured aliases
/// and declared [`Scenario`](genai_core::Scenario) tiers.
#[derive(Debug, Clone, Default)]
pub struct ModelManager {
    provider_name: String,
    aliases: BTreeMap<String, ModelAlias>,
}

impl ModelManager {
    pub fn new(provider_name: impl Into<String>, aliases: BTreeMap<String, ModelAlias>) -> Self {
        Self {
            provider_name: provider_name.into(),
            aliases,
        }
    }

    /// Resolves a configured alias to the real provider model id. Returns
    /// `None` when `model` isn't a configured alias (i.e. it should be
    /// sent through unchanged, or resolved against the scoreboard for a
    /// tier selector — see [`ModelManager::resolve_tier`]).
    pub fn resolve_model(&self, model: &str) -> Option<String> {
        self.aliases.get(model).and_then(|alias| alias.rename.clone())
    }

    pub fn get_model_config(&self, model: &str) -> Option<&ModelAlias> {
        self.aliases.get(model)
    }

    pub fn get_configured_models(&self) -> Vec<String> {
        self.aliases.keys().cloned().collect()
    }

    /// Resolves a symbolic `cheap|good|sota` selector against a declared
    /// [`Score`](genai_core::Score), picking the first scenario in the
    /// matching tier (spec §4.7's tier-ordering invariant guarantees this
    /// is well-defined).
    pub fn resolve_tier(&self, score: &genai_core::Score, selector: &str) -> Option<String> {
        let pick = |predicate: fn(&genai_core::Scenario) -> bool| {
            score.scenarios.iter().find(|s| predicate(s)).and_then(|s| s.models.first().cloned())
        };

        match selector {
            "sota" => pick(|s| s.sota),
            "good" => pick(|s| s.good),
            "cheap" => pick(|s| s.cheap),
            _ => None,
        }
    }

    pub fn provider_name(&self) -> &str {
        &self.provider_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_configured_alias() {
        let mut aliases = BTreeMap::new();
        aliases.insert(
            "workspace-sonnet".to_string(),
            ModelAlias {
                rename: Some("claude-3-sonnet-20240229".to_string()),
                headers: Vec::new(),
            },
        );
        let manager = ModelManager::new("anthropic", aliases);
        assert_eq!(
            manager.resolve_model("workspace-sonnet").as_deref(),
            Some("claude-3-sonnet-20240229")
        );
        assert_eq!(manager.resolve_model("claude-3-sonnet-20240229"), None);
    }
}
