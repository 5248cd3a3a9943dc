//! Direct-to-`Reply` streaming for Anthropic's Messages API (spec §4.4).
//!
//! Anthropic's SSE protocol already demarcates whole content blocks with
//! `content_block_start`/`content_block_stop`, so this module emits
//! [`Reply`] fragments straight from its own small state machine instead of
//! routing through `crate::stream::Demuxer` (that demuxer exists for
//! providers whose deltas arrive as an undifferentiated array, which
//! Anthropic's don't).

use std::borrow::Cow;

use genai_core::{Reply, ToolCall, Usage};
use serde::Deserialize;

use crate::messages::anthropic::AnthropicStopReason;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum AnthropicStreamEvent<'a> {
    MessageStart {
        message: MessageStartPayload,
    },
    ContentBlockStart {
        index: u32,
        content_block: ContentBlockStart,
    },
    ContentBlockDelta {
        #[serde(default)]
        index: u32,
        delta: BlockDelta<'a>,
    },
    ContentBlockStop {
        #[serde(default)]
        index: u32,
    },
    MessageDelta {
        delta: MessageDeltaPayload,
        #[serde(default)]
        usage: Option<DeltaUsage>,
    },
    MessageStop,
    Ping,
    Error {
        error: StreamError<'a>,
    },
}

#[derive(Debug, Deserialize)]
pub(crate) struct MessageStartPayload {
    #[serde(default)]
    pub usage: Option<DeltaUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ContentBlockStart {
    Text {
        #[serde(default)]
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum BlockDelta<'a> {
    TextDelta {
        text: Cow<'a, str>,
    },
    InputJsonDelta {
        partial_json: Cow<'a, str>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MessageDeltaPayload {
    #[serde(default)]
    pub stop_reason: Option<AnthropicStopReason>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub(crate) struct DeltaUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StreamError<'a> {
    pub message: Cow<'a, str>,
}

/// Tracks the one content block Anthropic has open at a time plus the
/// running usage totals, across the lifetime of a single stream.
///
/// `active_tool` buffers `input_json_delta` chunks under the block's id and
/// name rather than emitting them as they arrive: a tool call never
/// fragments across visible emissions, so the complete `Reply::tool_call`
/// is only produced once `content_block_stop` closes the block.
#[derive(Debug, Default)]
pub(crate) struct StreamState {
    active_tool: Option<(String, String, String)>,
    usage: Usage,
}

impl StreamState {
    pub(crate) fn usage(&self) -> Usage {
        self.usage.clone()
    }

    /// Feeds one parsed SSE event through the state machine, returning the
    /// fragment to emit immediately, if any.
    pub(crate) fn process(&mut self, event: AnthropicStreamEvent<'_>) -> Option<Reply> {
        match event {
            AnthropicStreamEvent::MessageStart { message } => {
                if let Some(usage) = message.usage {
                    self.usage.input_tokens = usage.input_tokens;
                }
                None
            }
            AnthropicStreamEvent::ContentBlockStart { content_block, .. } => {
                if let ContentBlockStart::ToolUse { id, name } = content_block {
                    self.active_tool = Some((id, name, String::new()));
                }
                None
            }
            AnthropicStreamEvent::ContentBlockDelta { delta, .. } => match delta {
                BlockDelta::TextDelta { text } => Some(Reply::text(text.into_owned())),
                BlockDelta::InputJsonDelta { partial_json } => {
                    if let Some((_, _, json)) = &mut self.active_tool {
                        json.push_str(&partial_json);
                    }
                    None
                }
                BlockDelta::Other => None,
            },
            AnthropicStreamEvent::ContentBlockStop { .. } => self.active_tool.take().map(|(id, name, arguments)| {
                Reply::tool_call(ToolCall {
                    id,
                    name,
                    arguments,
                    opaque: None,
                })
            }),
            AnthropicStreamEvent::MessageDelta { delta, usage } => {
                if let Some(usage) = usage {
                    self.usage.output_tokens = usage.output_tokens;
                    self.usage.total_tokens = self.usage.input_tokens + self.usage.output_tokens;
                }
                self.usage.finish_reason = super::stop_reason_to_finish(delta.stop_reason);
                None
            }
            AnthropicStreamEvent::MessageStop | AnthropicStreamEvent::Ping => None,
            AnthropicStreamEvent::Error { error } => {
                log::warn!("Anthropic stream error: {}", error.message);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_delta_emits_text_fragment() {
        let mut state = StreamState::default();
        let event: AnthropicStreamEvent<'_> = serde_json::from_value(serde_json::json!({
            "type": "content_block_delta",
            "index": 0,
            "delta": {"type": "text_delta", "text": "hi"}
        }))
        .unwrap();
        let fragment = state.process(event).unwrap();
        assert_eq!(fragment.text.as_deref(), Some("hi"));
    }

    #[test]
    fn tool_use_buffers_input_json_deltas_until_block_stop() {
        let mut state = StreamState::default();
        let start: AnthropicStreamEvent<'_> = serde_json::from_value(serde_json::json!({
            "type": "content_block_start",
            "index": 0,
            "content_block": {"type": "tool_use", "id": "toolu_1", "name": "get_weather"}
        }))
        .unwrap();
        assert!(state.process(start).is_none());

        let delta_one: AnthropicStreamEvent<'_> = serde_json::from_value(serde_json::json!({
            "type": "content_block_delta",
            "index": 0,
            "delta": {"type": "input_json_delta", "partial_json": "{\"city\":"}
        }))
        .unwrap();
        // A delta never produces a fragment on its own — only the complete
        // tool call at content_block_stop is visible to callers.
        assert!(state.process(delta_one).is_none());

        let delta_two: AnthropicStreamEvent<'_> = serde_json::from_value(serde_json::json!({
            "type": "content_block_delta",
            "index": 0,
            "delta": {"type": "input_json_delta", "partial_json": "\"sf\"}"}
        }))
        .unwrap();
        assert!(state.process(delta_two).is_none());

        let stop: AnthropicStreamEvent<'_> = serde_json::from_value(serde_json::json!({
            "type": "content_block_stop",
            "index": 0
        }))
        .unwrap();
        let fragment = state.process(stop).unwrap();
        let call = fragment.tool_call.unwrap();
        assert_eq!(call.id, "toolu_1");
        assert_eq!(call.name, "get_weather");
        assert_eq!(call.arguments, "{\"city\":\"sf\"}");
    }

    #[test]
    fn message_delta_sets_usage_and_finish_reason() {
        let mut state = StreamState::default();
        let event: AnthropicStreamEvent<'_> = serde_json::from_value(serde_json::json!({
            "type": "message_delta",
            "delta": {"stop_reason": "tool_use"},
            "usage": {"output_tokens": 12}
        }))
        .unwrap();
        assert!(state.process(event).is_none());
        assert_eq!(state.usage().output_tokens, 12);
        assert_eq!(state.usage().finish_reason, genai_core::FinishReason::ToolCalls);
    }
}
