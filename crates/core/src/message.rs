//! Messages, the unit of conversation exchanged with a [`Provider`](crate).
//!
//! A [`Message`] carries exactly one of three things: a list of [`Request`]s
//! (what the user/system side sent), a list of [`Reply`]s (what the model
//! sent back), or a list of [`ToolCallResult`]s (what the caller's tools
//! computed after a [`Reply::ToolCall`]). [`Role`] is derived from whichever
//! of those is populated rather than stored independently, so it can never
//! drift out of sync with the content.

use serde::{Deserialize, Serialize};

/// Who a [`Message`] is attributed to.
///
/// Derived from content, never set directly: a message with [`Request`]s is
/// `User`, one with [`Reply`]s is `Assistant`, and one carrying only
/// [`ToolCallResult`]s is `Computer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    Computer,
}

/// One inbound item: either free text or a document.
///
/// Inline documents are bounded by a configurable maximum (10 MiB by
/// default, see [`crate::options::OptionsText`]); anything larger must be
/// passed as a URL instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Request {
    Text(String),
    Doc(Doc),
}

/// An inline or remote document attached to a [`Request`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Doc {
    pub filename: Option<String>,
    pub mime_type: String,
    /// Exactly one of `data`/`url` is set.
    pub data: Option<Vec<u8>>,
    pub url: Option<String>,
}

impl Doc {
    pub fn inline(mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            filename: None,
            mime_type: mime_type.into(),
            data: Some(data),
            url: None,
        }
    }

    pub fn url(mime_type: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            filename: None,
            mime_type: mime_type.into(),
            data: None,
            url: Some(url.into()),
        }
    }

    pub fn is_inline(&self) -> bool {
        self.data.is_some()
    }
}

/// One outbound item produced by the model.
///
/// A reply is non-zero iff at least one field below is set; streaming
/// fragments are partial replies that get merged by [`Message::accumulate`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Reply {
    pub text: Option<String>,
    pub reasoning: Option<String>,
    pub tool_call: Option<ToolCall>,
    pub doc: Option<Doc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<Citation>,
    /// Provider-defined token (e.g. Anthropic's `signature`, OpenAI's
    /// encrypted reasoning blob) carried opaquely for round-tripping on the
    /// next turn.
    pub opaque: Option<String>,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn reasoning(text: impl Into<String>) -> Self {
        Self {
            reasoning: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn tool_call(call: ToolCall) -> Self {
        Self {
            tool_call: Some(call),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_none() && self.reasoning.is_none() && self.tool_call.is_none() && self.doc.is_none()
    }
}

/// A citation attached to a [`Reply`], pointing back at a source document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    pub source: String,
    pub quote: Option<String>,
}

/// A model-initiated request to invoke a named function.
///
/// `arguments` is raw JSON text rather than a parsed value: the demuxer
/// (`genai-providers::stream`) appends to it fragment by fragment and only
/// the caller needs it parsed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
    pub opaque: Option<String>,
}

/// The caller's answer to a prior [`ToolCall`], keyed by its id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub id: String,
    pub name: String,
    pub result: String,
}

/// A message: one of {requests, replies, tool call results} (almost always
/// exactly one; a wire protocol that bundles tool results with trailing
/// assistant text is the sole exception, modeled by allowing both lists to
/// be non-empty together).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requests: Vec<Request>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub replies: Vec<Reply>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_call_results: Vec<ToolCallResult>,
}

impl Default for Role {
    fn default() -> Self {
        Role::User
    }
}

impl Message {
    /// Builds a single-turn user message from plain text; role is always
    /// `User` since only inbound content can be constructed this way.
    pub fn new_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            requests: vec![Request::Text(text.into())],
            ..Self::default()
        }
    }

    pub fn from_requests(requests: Vec<Request>) -> Self {
        Self {
            role: Role::User,
            requests,
            ..Self::default()
        }
    }

    pub fn from_replies(replies: Vec<Reply>) -> Self {
        Self {
            role: Role::Assistant,
            replies,
            ..Self::default()
        }
    }

    pub fn from_tool_results(results: Vec<ToolCallResult>) -> Self {
        Self {
            role: Role::Computer,
            tool_call_results: results,
            ..Self::default()
        }
    }

    /// Concatenation of text replies only; reasoning is deliberately
    /// excluded so callers get the "visible" answer.
    pub fn as_text(&self) -> String {
        self.replies.iter().filter_map(|r| r.text.as_deref()).collect::<Vec<_>>().join("")
    }

    /// Merges a streamed fragment into the last reply when compatible,
    /// otherwise appends it as a new reply.
    ///
    /// Compatible means: text+text concatenate, reasoning+reasoning
    /// concatenate, and tool-call fragments sharing an id concatenate their
    /// `arguments`. Anything else — a fragment of a different shape, or an
    /// empty `self.replies` — becomes a new trailing reply.
    pub fn accumulate(&mut self, fragment: Reply) {
        if let Some(last) = self.replies.last_mut() {
            if let (Some(existing), Some(incoming)) = (last.text.as_mut(), fragment.text.as_deref())
                && last.reasoning.is_none()
                && last.tool_call.is_none()
                && fragment.reasoning.is_none()
                && fragment.tool_call.is_none()
            {
                existing.push_str(incoming);
                return;
            }

            if let (Some(existing), Some(incoming)) = (last.reasoning.as_mut(), fragment.reasoning.as_deref())
                && last.text.is_none()
                && last.tool_call.is_none()
                && fragment.text.is_none()
                && fragment.tool_call.is_none()
            {
                existing.push_str(incoming);
                return;
            }

            if let (Some(existing), Some(incoming)) = (last.tool_call.as_mut(), fragment.tool_call.as_ref())
                && existing.id == incoming.id
            {
                existing.arguments.push_str(&incoming.arguments);
                return;
            }
        }

        self.replies.push(fragment);
    }
}

/// Why generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    #[default]
    Empty,
    Stop,
    Length,
    ToolCalls,
    StopSequence,
    ContentFilter,
}

/// A single token's log-probability plus its top-K alternatives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logprob {
    pub token: String,
    pub logprob: f64,
    pub top: Vec<(String, f64)>,
}

/// Which quota a [`RateLimit`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitResource {
    Requests,
    Tokens,
}

/// A single rate-limit header triplet (`limit`/`remaining`/`reset`),
/// generalized across the `x-ratelimit-*-requests` and
/// `x-ratelimit-*-tokens` families most OpenAI-compatible backends emit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimit {
    pub resource: RateLimitResource,
    pub limit: u64,
    pub remaining: u64,
    pub reset: std::time::Duration,
}

impl RateLimit {
    /// Structural sanity check used by the scoreboard prober (spec §4.8.12):
    /// remaining can never exceed the limit.
    pub fn validate(&self) -> crate::GenResult<()> {
        if self.remaining > self.limit {
            return Err(crate::Error::BadInternal(format!(
                "rate limit remaining ({}) exceeds limit ({}) for {:?}",
                self.remaining, self.limit, self.resource
            )));
        }
        Ok(())
    }
}

/// Token accounting for one generation call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub input_cached_tokens: u64,
    pub output_tokens: u64,
    pub reasoning_tokens: u64,
    pub total_tokens: u64,
    pub finish_reason: FinishReason,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rate_limits: Vec<RateLimit>,
}

/// The normalized outcome of a `GenSync`/`GenStream` call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Result {
    pub message: Message,
    pub usage: Usage,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logprobs: Vec<Vec<Logprob>>,
}

impl Result {
    /// `Usage.InputTokens + Usage.OutputTokens > 0`, the health check every
    /// successful call must pass unless the scenario declares
    /// `ReportTokenUsage=false` (spec §8 invariant 8).
    pub fn reports_token_usage(&self) -> bool {
        self.usage.input_tokens + self.usage.output_tokens > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulate_concatenates_text_fragments() {
        let mut message = Message::from_replies(vec![]);
        message.accumulate(Reply::text("Hel"));
        message.accumulate(Reply::text("lo"));
        assert_eq!(message.as_text(), "Hello");
        assert_eq!(message.replies.len(), 1);
    }

    #[test]
    fn accumulate_keeps_text_and_reasoning_separate() {
        let mut message = Message::from_replies(vec![]);
        message.accumulate(Reply::reasoning("thinking "));
        message.accumulate(Reply::reasoning("more"));
        message.accumulate(Reply::text("answer"));
        assert_eq!(message.replies.len(), 2);
        assert_eq!(message.as_text(), "answer");
    }

    #[test]
    fn accumulate_merges_tool_call_fragments_sharing_id() {
        let mut message = Message::from_replies(vec![]);
        message.accumulate(Reply::tool_call(ToolCall {
            id: "call_1".into(),
            name: "square_root".into(),
            arguments: "{\"x\":".into(),
            opaque: None,
        }));
        message.accumulate(Reply::tool_call(ToolCall {
            id: "call_1".into(),
            name: String::new(),
            arguments: "4}".into(),
            opaque: None,
        }));

        assert_eq!(message.replies.len(), 1);
        assert_eq!(message.replies[0].tool_call.as_ref().unwrap().arguments, "{\"x\":4}");
    }

    #[test]
    fn accumulate_starts_new_reply_for_a_distinct_tool_call_id() {
        let mut message = Message::from_replies(vec![]);
        message.accumulate(Reply::tool_call(ToolCall {
            id: "call_1".into(),
            name: "a".into(),
            arguments: "{}".into(),
            opaque: None,
        }));
        message.accumulate(Reply::tool_call(ToolCall {
            id: "call_2".into(),
            name: "b".into(),
            arguments: "{}".into(),
            opaque: None,
        }));

        assert_eq!(message.replies.len(), 2);
    }

    #[test]
    fn rate_limit_validate_rejects_remaining_over_limit() {
        let bad = RateLimit {
            resource: RateLimitResource::Requests,
            limit: 10,
            remaining: 11,
            reset: std::time::Duration::from_secs(1),
        };
        assert!(bad.validate().is_err());
    }
}
