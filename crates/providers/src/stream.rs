//! The protocol-agnostic half of the stream demuxer (spec §4.4).
//!
//! Each adapter turns its own wire chunk type into a sequence of
//! [`DeltaEvent`]s and feeds them through a [`Demuxer`], which owns the
//! pending-tool-call buffer, the running [`Usage`] counters, and the
//! ordering/flush rules that are identical across every backend. Adapters
//! whose protocol already demarcates whole content blocks (Anthropic's
//! `content_block_start`/`stop` events) don't need this — they emit
//! complete fragments directly, see `crate::adapters::anthropic::output`.

use genai_core::{FinishReason, Reply, ToolCall, Usage};

/// One normalized increment out of a provider's delta-array stream.
#[derive(Debug, Clone)]
pub enum DeltaEvent {
    TextDelta(String),
    ReasoningDelta(String),
    /// A fragment of a tool-call delta. `id`/`name`/`arguments` mirror
    /// what the wire chunk actually carried — any of them may be absent,
    /// per spec §4.4's continuation rules.
    ToolCallDelta {
        id: Option<String>,
        name: Option<String>,
        arguments: Option<String>,
    },
    UsageUpdate(Usage),
    Finish(FinishReason),
}

#[derive(Debug, Default)]
struct PendingToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Accumulates [`DeltaEvent`]s into ordered [`Reply`] fragments plus a
/// running [`Usage`], implementing spec §4.4's tool-call continuation
/// rules and flush-on-close behavior.
#[derive(Debug, Default)]
pub struct Demuxer {
    pending_tool_call: Option<PendingToolCall>,
    usage: Usage,
}

impl Demuxer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn usage(&self) -> &Usage {
        &self.usage
    }

    /// Feeds one event through the state machine, returning the fragment
    /// (if any) that should be emitted to the consumer immediately.
    ///
    /// A tool-call delta that starts a *new* distinct call returns the
    /// previously pending call fully flushed; the new fragment is buffered
    /// and only becomes visible on the next flush-triggering event or on
    /// [`Demuxer::finish`]. This is what gives callers the "a tool call
    /// never fragments across visible emissions" guarantee.
    pub fn apply(&mut self, event: DeltaEvent) -> Option<Reply> {
        match event {
            DeltaEvent::TextDelta(text) => Some(Reply::text(text)),
            DeltaEvent::ReasoningDelta(text) => Some(Reply::reasoning(text)),
            DeltaEvent::ToolCallDelta { id, name, arguments } => self.apply_tool_call_delta(id, name, arguments),
            DeltaEvent::UsageUpdate(usage) => {
                self.usage = usage;
                None
            }
            DeltaEvent::Finish(reason) => {
                self.usage.finish_reason = reason;
                None
            }
        }
    }

    /// Flushes a remaining pending tool call at stream close (spec §4.4.5).
    pub fn finish(&mut self) -> Option<Reply> {
        self.flush_pending()
    }

    fn apply_tool_call_delta(
        &mut self,
        id: Option<String>,
        name: Option<String>,
        arguments: Option<String>,
    ) -> Option<Reply> {
        let continuation = match (&self.pending_tool_call, id.as_deref()) {
            (Some(_), None) | (Some(_), Some("")) => true,
            (Some(pending), Some(incoming_id)) if incoming_id == pending.id => true,
            (Some(_), Some(_)) => name.as_deref().is_none_or(str::is_empty),
            (None, _) => false,
        };

        if continuation && self.pending_tool_call.is_some() {
            let pending = self.pending_tool_call.as_mut().expect("checked above");
            if let Some(name) = name.filter(|n| !n.is_empty()) {
                pending.name = name;
            }
            if let Some(arguments) = arguments {
                pending.arguments.push_str(&arguments);
            }
            return None;
        }

        let flushed = self.flush_pending();
        self.pending_tool_call = Some(PendingToolCall {
            id: id.unwrap_or_default(),
            name: name.unwrap_or_default(),
            arguments: arguments.unwrap_or_default(),
        });
        flushed
    }

    fn flush_pending(&mut self) -> Option<Reply> {
        self.pending_tool_call.take().map(|pending| {
            Reply::tool_call(ToolCall {
                id: pending.id,
                name: pending.name,
                arguments: pending.arguments,
                opaque: None,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interleaved_text_and_reasoning_pass_through_unmerged() {
        let mut demux = Demuxer::new();
        let text = demux.apply(DeltaEvent::TextDelta("hi".into())).unwrap();
        let reasoning = demux.apply(DeltaEvent::ReasoningDelta("thinking".into())).unwrap();
        assert_eq!(text.text.unwrap(), "hi");
        assert_eq!(reasoning.reasoning.unwrap(), "thinking");
    }

    #[test]
    fn tool_call_continuation_by_same_id_concatenates_arguments() {
        let mut demux = Demuxer::new();
        assert!(
            demux
                .apply(DeltaEvent::ToolCallDelta {
                    id: Some("call_1".into()),
                    name: Some("square_root".into()),
                    arguments: Some("{\"x\":".into()),
                })
                .is_none()
        );
        assert!(
            demux
                .apply(DeltaEvent::ToolCallDelta {
                    id: Some("call_1".into()),
                    name: None,
                    arguments: Some("4}".into()),
                })
                .is_none()
        );
        let flushed = demux.finish().unwrap();
        let call = flushed.tool_call.unwrap();
        assert_eq!(call.id, "call_1");
        assert_eq!(call.arguments, "{\"x\":4}");
    }

    #[test]
    fn tool_call_continuation_by_empty_id_concatenates_arguments() {
        let mut demux = Demuxer::new();
        demux.apply(DeltaEvent::ToolCallDelta {
            id: Some("call_1".into()),
            name: Some("f".into()),
            arguments: Some("{\"a\":1".into()),
        });
        demux.apply(DeltaEvent::ToolCallDelta {
            id: None,
            name: None,
            arguments: Some(",\"b\":2}".into()),
        });
        let flushed = demux.finish().unwrap();
        assert_eq!(flushed.tool_call.unwrap().arguments, "{\"a\":1,\"b\":2}");
    }

    #[test]
    fn distinct_tool_call_id_flushes_previous_before_buffering() {
        let mut demux = Demuxer::new();
        demux.apply(DeltaEvent::ToolCallDelta {
            id: Some("call_1".into()),
            name: Some("f".into()),
            arguments: Some("{}".into()),
        });
        let flushed_first = demux
            .apply(DeltaEvent::ToolCallDelta {
                id: Some("call_2".into()),
                name: Some("g".into()),
                arguments: Some("{}".into()),
            })
            .expect("distinct id flushes the previous pending call");
        assert_eq!(flushed_first.tool_call.unwrap().id, "call_1");

        let flushed_second = demux.finish().unwrap();
        assert_eq!(flushed_second.tool_call.unwrap().id, "call_2");
    }

    #[test]
    fn empty_function_name_with_new_id_is_treated_as_continuation() {
        // Some providers (spec §4.4.4c) send a follow-up fragment with a new
        // id but no function name when continuing the same logical call.
        let mut demux = Demuxer::new();
        demux.apply(DeltaEvent::ToolCallDelta {
            id: Some("call_1".into()),
            name: Some("f".into()),
            arguments: Some("{\"a\":".into()),
        });
        let result = demux.apply(DeltaEvent::ToolCallDelta {
            id: Some("call_1_cont".into()),
            name: None,
            arguments: Some("1}".into()),
        });
        assert!(result.is_none(), "continuation must not flush");
        let flushed = demux.finish().unwrap();
        assert_eq!(flushed.tool_call.unwrap().arguments, "{\"a\":1}");
    }
}
