//! Shared `Provider` test double for wrapper decorator unit tests.
#![cfg(test)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;
use genai_core::{GenResult, Message, Modality, Options, Reply, Score, Usage};
use tokio::sync::Mutex as AsyncMutex;

use crate::provider::{GenStreamResult, Model, Provider, ReplyStream};

#[derive(Default)]
pub(crate) struct RecordingProvider {
    last_messages: Mutex<Vec<Message>>,
    last_options: Mutex<Vec<Options>>,
    scoreboard: Score,
    reply_text: Mutex<Option<String>>,
    stream_fragments: Mutex<Vec<Reply>>,
}

impl RecordingProvider {
    pub(crate) fn last_options(&self) -> Vec<Options> {
        self.last_options.lock().unwrap().clone()
    }

    pub(crate) fn last_messages(&self) -> Vec<Message> {
        self.last_messages.lock().unwrap().clone()
    }

    pub(crate) fn set_reply_text(&self, text: impl Into<String>) {
        *self.reply_text.lock().unwrap() = Some(text.into());
    }

    pub(crate) fn set_stream_fragments(&self, fragments: Vec<Reply>) {
        *self.stream_fragments.lock().unwrap() = fragments;
    }
}

#[async_trait]
impl Provider for RecordingProvider {
    fn name(&self) -> &str {
        "recording"
    }

    fn model_id(&self) -> &str {
        "recording-model"
    }

    fn output_modalities(&self) -> &[Modality] {
        &[Modality::Text]
    }

    fn scoreboard(&self) -> &Score {
        &self.scoreboard
    }

    async fn list_models(&self) -> anyhow::Result<Vec<Model>> {
        Ok(Vec::new())
    }

    async fn gen_sync(&self, messages: &[Message], options: &[Options]) -> GenResult<genai_core::message::Result> {
        *self.last_messages.lock().unwrap() = messages.to_vec();
        *self.last_options.lock().unwrap() = options.to_vec();

        let text = self.reply_text.lock().unwrap().clone().unwrap_or_default();
        Ok(genai_core::message::Result {
            message: Message::from_replies(vec![Reply::text(text)]),
            usage: Usage::default(),
            logprobs: Vec::new(),
        })
    }

    async fn gen_stream(&self, messages: &[Message], options: &[Options]) -> GenResult<GenStreamResult> {
        *self.last_messages.lock().unwrap() = messages.to_vec();
        *self.last_options.lock().unwrap() = options.to_vec();

        let fragments = self.stream_fragments.lock().unwrap().clone();
        let message = Arc::new(AsyncMutex::new(Message::from_replies(Vec::new())));
        let usage = Arc::new(AsyncMutex::new(Usage::default()));

        let stream: ReplyStream = Box::pin(stream::iter(fragments.into_iter().map(Ok)));
        Ok(GenStreamResult {
            fragments: stream,
            message,
            usage,
        })
    }
}
