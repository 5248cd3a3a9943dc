//! Append-a-canned-message decorator (spec §4.6).

use std::sync::Arc;

use async_trait::async_trait;
use genai_core::{GenResult, Message, Modality, Options, Score};

use crate::provider::{GenStreamResult, Model, Provider};

/// Appends a fixed [`Message`] to the end of every request's message list,
/// unless it's already there — that check is what keeps repeated wrapping
/// idempotent.
pub struct PromptAppender {
    inner: Arc<dyn Provider>,
    appended: Message,
}

impl PromptAppender {
    pub fn new(inner: Arc<dyn Provider>, appended: Message) -> Self {
        Self { inner, appended }
    }

    fn merged_messages(&self, messages: &[Message]) -> Vec<Message> {
        let already_present = messages
            .last()
            .map(|last| message_eq(last, &self.appended))
            .unwrap_or(false);

        let mut merged = messages.to_vec();
        if !already_present {
            merged.push(self.appended.clone());
        }
        merged
    }
}

fn message_eq(a: &Message, b: &Message) -> bool {
    serde_json::to_value(a).ok() == serde_json::to_value(b).ok()
}

#[async_trait]
impl Provider for PromptAppender {
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
        self.inner.gen_sync(&self.merged_messages(messages), options).await
    }

    async fn gen_stream(&self, messages: &[Message], options: &[Options]) -> GenResult<GenStreamResult> {
        self.inner.gen_stream(&self.merged_messages(messages), options).await
    }

    fn unwrap(&self) -> Option<&dyn Provider> {
        Some(self.inner.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wrappers::tests_support::RecordingProvider;
    use genai_core::Reply;

    fn canned() -> Message {
        Message::from_replies(vec![Reply::text("remember to answer in JSON")])
    }

    #[tokio::test]
    async fn appends_when_absent() {
        let recorder = Arc::new(RecordingProvider::default());
        let appender = PromptAppender::new(recorder.clone(), canned());

        let user_message = Message::new_text("hello");
        appender.gen_sync(&[user_message], &[]).await.unwrap();

        let seen = recorder.last_messages();
        assert_eq!(seen.len(), 2);
        assert!(message_eq(&seen[1], &canned()));
    }

    #[tokio::test]
    async fn does_not_duplicate_when_already_last() {
        let recorder = Arc::new(RecordingProvider::default());
        let appender = PromptAppender::new(recorder.clone(), canned());

        let user_message = Message::new_text("hello");
        appender.gen_sync(&[user_message, canned()], &[]).await.unwrap();

        assert_eq!(recorder.last_messages().len(), 2);
    }

    #[tokio::test]
    async fn double_wrapping_stays_idempotent() {
        let recorder = Arc::new(RecordingProvider::default());
        let once: Arc<dyn Provider> = Arc::new(PromptAppender::new(recorder.clone(), canned()));
        let twice = PromptAppender::new(once, canned());

        let user_message = Message::new_text("hello");
        twice.gen_sync(&[user_message], &[]).await.unwrap();

        assert_eq!(recorder.last_messages().len(), 2);
    }
}
