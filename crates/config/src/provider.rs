//! Construction-time configuration for a single provider instance.

use std::collections::BTreeMap;

use secrecy::SecretString;

use crate::{header_rule::HeaderRule, model::ModelAlias};

/// Settings read once when a concrete adapter is constructed (spec §4.3
/// "Initialization"): API key, base-URL override, configured model
/// aliases, and extra headers applied to every request.
#[derive(Debug, Clone, Default)]
pub struct ProviderConfig {
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub models: BTreeMap<String, ModelAlias>,
    pub model_filter: Option<crate::model::ModelFilter>,
    pub headers: Vec<HeaderRule>,
}

impl ProviderConfig {
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(SecretString::from(key.into()));
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }
}
