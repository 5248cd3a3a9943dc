//! The `Provider` contract (spec §4.3): the public capability set every
//! concrete adapter and every wrapper decorator implements.

use std::{pin::Pin, sync::Arc};

use async_trait::async_trait;
use futures::Stream;
use genai_core::{GenResult, Message, Modality, Options, Reply, Scenario};
use tokio::sync::Mutex;

/// A model descriptor returned by [`Provider::list_models`].
#[derive(Debug, Clone)]
pub struct Model {
    pub id: String,
    pub owned_by: String,
    pub created: u64,
}

/// The lazy fragment sequence returned by [`Provider::gen_stream`].
pub type ReplyStream = Pin<Box<dyn Stream<Item = GenResult<Reply>> + Send>>;

/// One call's worth of streamed output: the fragment stream plus a shared
/// handle to the shadow [`Message`] the demuxer accumulates alongside it
/// (spec §4.4's parallel `Accumulate` consumer). Callers drain `fragments`
/// to completion, then read `message` to get the same `Result` a
/// synchronous `gen_sync` call would have returned (spec §8 invariant 2).
pub struct GenStreamResult {
    pub fragments: ReplyStream,
    pub message: Arc<Mutex<Message>>,
    pub usage: Arc<Mutex<genai_core::Usage>>,
}

/// The uniform client abstraction over one remote LLM backend.
///
/// Implemented directly by the concrete per-provider adapters
/// (`crate::adapters::{openai, anthropic, google, compatible}`) and
/// transparently forwarded by the wrapper decorators in `crate::wrappers`.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    fn model_id(&self) -> &str;

    fn output_modalities(&self) -> &[Modality];

    /// The declared capability record for this provider.
    fn scoreboard(&self) -> &genai_core::Score;

    async fn list_models(&self) -> anyhow::Result<Vec<Model>>;

    async fn gen_sync(&self, messages: &[Message], options: &[Options]) -> GenResult<genai_core::message::Result>;

    async fn gen_stream(&self, messages: &[Message], options: &[Options]) -> GenResult<GenStreamResult>;

    /// Introspection hook for the decorator chain (spec §4.6): a wrapper
    /// overrides this to return its inner `Provider`, so a caller can walk
    /// down to the concrete adapter underneath any stack of wrappers. Base
    /// adapters keep the default, which means "nothing left to unwrap".
    fn unwrap(&self) -> Option<&dyn Provider> {
        None
    }
}

/// Looks up a declared scenario for `model` under the given reasoning mode,
/// used by adapters to answer [`Provider::scoreboard`]-derived questions
/// like "does this model/reason pair support tools".
pub fn find_scenario<'a>(score: &'a genai_core::Score, model: &str, reason: bool) -> Option<&'a Scenario> {
    score
        .scenarios
        .iter()
        .find(|s| s.reason == reason && s.models.iter().any(|m| m == model))
}
