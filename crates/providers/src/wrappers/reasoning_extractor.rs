//! Inline-reasoning-marker decorator (spec §4.6): splits `<think>...</think>`
//! bracketed text out of `Reply::text` into `Reply::reasoning`, for models
//! that narrate their reasoning inline rather than through a dedicated
//! reasoning channel. Markers may land split across streamed fragment
//! boundaries, so the splitter carries a small buffer between `feed` calls
//! rather than scanning each fragment in isolation.

use std::{collections::VecDeque, sync::Arc};

use async_trait::async_trait;
use futures::{StreamExt, stream};
use genai_core::{GenResult, Message, Modality, Options, Reply, Role, Score};
use tokio::sync::Mutex as AsyncMutex;

use crate::provider::{GenStreamResult, Model, Provider, ReplyStream};

const OPEN_MARKER: &str = "<think>";
const CLOSE_MARKER: &str = "</think>";

pub struct ReasoningExtractor {
    inner: Arc<dyn Provider>,
}

impl ReasoningExtractor {
    pub fn new(inner: Arc<dyn Provider>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Provider for ReasoningExtractor {
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
        let mut result = self.inner.gen_sync(messages, options).await?;
        result.message = split_message(&result.message);
        Ok(result)
    }

    async fn gen_stream(&self, messages: &[Message], options: &[Options]) -> GenResult<GenStreamResult> {
        let inner_result = self.inner.gen_stream(messages, options).await?;

        let shadow = Arc::new(AsyncMutex::new(Message {
            role: Role::Assistant,
            ..Message::default()
        }));

        let state = (inner_result.fragments, MarkerSplitter::new(), VecDeque::new(), false, shadow.clone());

        let fragments: ReplyStream = Box::pin(stream::unfold(state, |mut state| async move {
            loop {
                let (inner_stream, splitter, queue, exhausted, shadow) = &mut state;

                if let Some(item) = queue.pop_front() {
                    if let Ok(reply) = &item {
                        shadow.lock().await.accumulate(reply.clone());
                    }
                    return Some((item, state));
                }

                if *exhausted {
                    return None;
                }

                match inner_stream.next().await {
                    Some(Ok(fragment)) => {
                        if is_plain_text(&fragment) {
                            queue.extend(splitter.feed(fragment.text.as_deref().unwrap_or_default()).into_iter().map(Ok));
                        } else {
                            queue.push_back(Ok(fragment));
                        }
                    }
                    Some(Err(err)) => queue.push_back(Err(err)),
                    None => {
                        queue.extend(splitter.finish().into_iter().map(Ok));
                        *exhausted = true;
                    }
                }
            }
        }));

        Ok(GenStreamResult {
            fragments,
            message: shadow,
            usage: inner_result.usage,
        })
    }

    fn unwrap(&self) -> Option<&dyn Provider> {
        Some(self.inner.as_ref())
    }
}

fn is_plain_text(reply: &Reply) -> bool {
    reply.text.is_some() && reply.reasoning.is_none() && reply.tool_call.is_none() && reply.doc.is_none()
}

fn split_message(message: &Message) -> Message {
    let mut splitter = MarkerSplitter::new();
    let mut replies = Vec::with_capacity(message.replies.len());

    for reply in &message.replies {
        if is_plain_text(reply) {
            replies.extend(splitter.feed(reply.text.as_deref().unwrap_or_default()));
        } else {
            replies.push(reply.clone());
        }
    }
    replies.extend(splitter.finish());

    Message {
        replies,
        ..message.clone()
    }
}

/// Streaming `<think>...</think>` scanner. Holds back any trailing bytes of
/// a fed chunk that could be the start of the marker it's currently looking
/// for, so a marker split across two `feed` calls is still recognized.
struct MarkerSplitter {
    in_reasoning: bool,
    carry: String,
}

impl MarkerSplitter {
    fn new() -> Self {
        Self {
            in_reasoning: false,
            carry: String::new(),
        }
    }

    fn wrap(&self, text: &str) -> Reply {
        if self.in_reasoning { Reply::reasoning(text) } else { Reply::text(text) }
    }

    fn feed(&mut self, chunk: &str) -> Vec<Reply> {
        let mut buf = std::mem::take(&mut self.carry);
        buf.push_str(chunk);
        let mut out = Vec::new();

        loop {
            let marker = if self.in_reasoning { CLOSE_MARKER } else { OPEN_MARKER };
            let Some(pos) = buf.find(marker) else { break };

            let before = &buf[..pos];
            if !before.is_empty() {
                out.push(self.wrap(before));
            }
            let rest = buf[pos + marker.len()..].to_string();
            self.in_reasoning = !self.in_reasoning;
            buf = rest;
        }

        let marker = if self.in_reasoning { CLOSE_MARKER } else { OPEN_MARKER };
        let hold = partial_suffix_overlap(&buf, marker);
        let emit_len = buf.len() - hold;
        if emit_len > 0 {
            out.push(self.wrap(&buf[..emit_len]));
        }
        self.carry = buf[emit_len..].to_string();
        out
    }

    fn finish(&mut self) -> Vec<Reply> {
        if self.carry.is_empty() {
            return Vec::new();
        }
        let remaining = std::mem::take(&mut self.carry);
        vec![self.wrap(&remaining)]
    }
}

/// Longest suffix of `buf` that is also a strict (non-full) prefix of
/// `marker` — the part we must hold back since the next `feed` call could
/// complete the marker.
fn partial_suffix_overlap(buf: &str, marker: &str) -> usize {
    let max = marker.len().saturating_sub(1).min(buf.len());
    for len in (1..=max).rev() {
        if buf.as_bytes()[buf.len() - len..] == marker.as_bytes()[..len] {
            return len;
        }
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wrappers::tests_support::RecordingProvider;
    use futures::TryStreamExt;

    #[test]
    fn splits_inline_marker_in_one_shot() {
        let mut splitter = MarkerSplitter::new();
        let out = splitter.feed("before <think>hidden</think> after");
        let mut finished = splitter.finish();
        let mut all = out;
        all.append(&mut finished);

        assert_eq!(all.len(), 3);
        assert_eq!(all[0].text.as_deref(), Some("before "));
        assert_eq!(all[1].reasoning.as_deref(), Some("hidden"));
        assert_eq!(all[2].text.as_deref(), Some(" after"));
    }

    #[test]
    fn marker_split_across_feed_calls_is_still_detected() {
        let mut splitter = MarkerSplitter::new();
        let mut out = splitter.feed("plain <thi");
        out.extend(splitter.feed("nk>reasoning</thi"));
        out.extend(splitter.feed("nk>tail"));
        out.extend(splitter.finish());

        assert_eq!(out.len(), 3);
        assert_eq!(out[0].text.as_deref(), Some("plain "));
        assert_eq!(out[1].reasoning.as_deref(), Some("reasoning"));
        assert_eq!(out[2].text.as_deref(), Some("tail"));
    }

    #[tokio::test]
    async fn gen_sync_splits_reply_text() {
        let recorder = Arc::new(RecordingProvider::default());
        recorder.set_reply_text("intro <think>scratch</think> outro");
        let extractor = ReasoningExtractor::new(recorder);

        let result = extractor.gen_sync(&[], &[]).await.unwrap();
        assert_eq!(result.message.replies.len(), 3);
        assert_eq!(result.message.replies[1].reasoning.as_deref(), Some("scratch"));
    }

    #[tokio::test]
    async fn gen_stream_splits_fragments_and_shadow_message_matches() {
        let recorder = Arc::new(RecordingProvider::default());
        recorder.set_stream_fragments(vec![Reply::text("intro <think>"), Reply::text("scratch</think> outro")]);
        let extractor = ReasoningExtractor::new(recorder);

        let stream_result = extractor.gen_stream(&[], &[]).await.unwrap();
        let fragments: Vec<Reply> = stream_result.fragments.try_collect().await.unwrap();
        assert!(fragments.iter().any(|f| f.reasoning.as_deref() == Some("scratch")));

        let shadow = stream_result.message.lock().await;
        assert_eq!(shadow.as_text(), "intro  outro");
    }
}
