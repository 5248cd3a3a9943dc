//! Always-add-a-provider-option decorator (spec §4.6).

use std::sync::Arc;

use async_trait::async_trait;
use genai_core::{GenResult, Message, Modality, Options, Score};
use serde_json::Value;

use crate::provider::{GenStreamResult, Model, Provider};

/// Appends a fixed `Options::Provider { provider, name, value }` entry to
/// every call, unless the caller (or an inner `OptionInjector` from a
/// previous wrapping) already supplied one for the same `(provider, name)`
/// pair — that check is what keeps repeated wrapping idempotent.
pub struct OptionInjector {
    inner: Arc<dyn Provider>,
    provider: String,
    name: String,
    value: Value,
}

impl OptionInjector {
    pub fn new(inner: Arc<dyn Provider>, provider: impl Into<String>, name: impl Into<String>, value: Value) -> Self {
        Self {
            inner,
            provider: provider.into(),
            name: name.into(),
            value,
        }
    }

    fn merged_options(&self, options: &[Options]) -> Vec<Options> {
        let already_present = options.iter().any(|option| {
            matches!(option, Options::Provider { provider, name, .. } if *provider == self.provider && *name == self.name)
        });

        let mut merged = options.to_vec();
        if !already_present {
            merged.push(Options::Provider {
                provider: self.provider.clone(),
                name: self.name.clone(),
                value: self.value.clone(),
            });
        }
        merged
    }
}

#[async_trait]
impl Provider for OptionInjector {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    fn output_modalities(&self) -> &[Modality] {
        self.inner.output_modalities()
    }

    fn scoreboard(&self) -> &Score {
        self.inner.scoreboard()
    }

    async fn list_models(&self) -> anyhow::Result<Vec<Model>> {
        self.inner.list_models().await
    }

    async fn gen_sync(&self, messages: &[Message], options: &[Options]) -> GenResult<genai_core::message::Result> {
        self.inner.gen_sync(messages, &self.merged_options(options)).await
    }

    async fn gen_stream(&self, messages: &[Message], options: &[Options]) -> GenResult<GenStreamResult> {
        self.inner.gen_stream(messages, &self.merged_options(options)).await
    }

    fn unwrap(&self) -> Option<&dyn Provider> {
        Some(self.inner.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wrappers::tests_support::RecordingProvider;
    use serde_json::json;

    #[tokio::test]
    async fn injects_option_when_absent() {
        let recorder = Arc::new(RecordingProvider::default());
        let injector = OptionInjector::new(recorder.clone(), "anthropic", "thinking", json!({"budget": 1024}));

        injector.gen_sync(&[], &[]).await.unwrap();

        let seen = recorder.last_options();
        assert_eq!(seen.len(), 1);
        assert!(matches!(&seen[0], Options::Provider { provider, name, .. } if provider == "anthropic" && name == "thinking"));
    }

    #[tokio::test]
    async fn does_not_duplicate_when_caller_already_set_it() {
        let recorder = Arc::new(RecordingProvider::default());
        let injector = OptionInjector::new(recorder.clone(), "anthropic", "thinking", json!({"budget": 1024}));

        let caller_option = Options::Provider {
            provider: "anthropic".to_string(),
            name: "thinking".to_string(),
            value: json!({"budget": 2048}),
        };
        injector.gen_sync(&[], std::slice::from_ref(&caller_option)).await.unwrap();

        let seen = recorder.last_options();
        assert_eq!(seen.len(), 1);
    }

    #[tokio::test]
    async fn double_wrapping_stays_idempotent() {
        let recorder = Arc::new(RecordingProvider::default());
        let once: Arc<dyn Provider> = Arc::new(OptionInjector::new(recorder.clone(), "anthropic", "thinking", json!({"budget": 1024})));
        let twice = OptionInjector::new(once, "anthropic", "thinking", json!({"budget": 1024}));

        twice.gen_sync(&[], &[]).await.unwrap();

        assert_eq!(recorder.last_options().len(), 1);
    }

    #[test]
    fn unwrap_exposes_the_inner_provider() {
        let recorder = Arc::new(RecordingProvider::default());
        let injector = OptionInjector::new(recorder.clone(), "anthropic", "thinking", json!({"budget": 1024}));

        let inner = injector.unwrap().expect("wrapper must expose its inner provider");
        assert_eq!(inner.name(), recorder.name());
        assert!(inner.unwrap().is_none());
    }
}
