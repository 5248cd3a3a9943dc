//! Per-call options.
//!
//! Options are passed to a generation call as a polymorphic list
//! (`&[Options]`) rather than a single fixed struct, mirroring spec §9's
//! "dynamic option list" redesign note: a closed tagged-variant enum stands
//! in for the original's variadic heterogeneous arguments. Adapters that
//! don't recognize a provider-specific variant classify it as
//! unsupported-continuable (see [`crate::error::Error::UnsupportedContinuable`])
//! rather than failing outright.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::GenResult;

/// Default cap on an inline [`crate::message::Doc`]'s byte size.
pub const DEFAULT_MAX_DOC_BYTES: usize = 10 * 1024 * 1024;

/// One entry in the option list passed to `GenSync`/`GenStream`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Options {
    Text(OptionsText),
    Image(OptionsImage),
    Audio(OptionsAudio),
    /// A provider-specific knob (e.g. Anthropic's thinking budget, OpenAI's
    /// service tier) recognized only by the matching adapter; every other
    /// adapter treats it as unsupported-continuable.
    Provider { provider: String, name: String, value: Value },
}

impl Options {
    pub fn validate(&self) -> GenResult<()> {
        match self {
            Options::Text(opts) => opts.validate(),
            Options::Image(opts) => opts.validate(),
            Options::Audio(opts) => opts.validate(),
            Options::Provider { .. } => Ok(()),
        }
    }
}

/// A callable tool declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    pub description: String,
    /// JSON Schema describing the tool's arguments.
    pub parameters: Value,
}

/// How strongly the model is pushed toward using a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolForce {
    Any,
    Required,
    None,
}

/// Options governing a text-generation call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OptionsText {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub seed: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
    pub system_prompt: Option<String>,
    pub reply_as_json: bool,
    /// JSON Schema the reply must conform to; implies `reply_as_json`.
    pub decode_as: Option<Value>,
    pub top_logprobs: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Tool>,
    pub tool_force: Option<ToolForce>,
    pub web_search: bool,
    pub web_fetch: bool,
    /// Maximum inline document size in bytes; defaults to
    /// [`DEFAULT_MAX_DOC_BYTES`] when unset.
    pub max_doc_bytes: Option<usize>,
}

impl OptionsText {
    pub fn validate(&self) -> GenResult<()> {
        if let Some(names_with_dupes) = first_duplicate_tool_name(&self.tools) {
            return Err(crate::Error::NotSupported(format!(
                "duplicate tool name '{names_with_dupes}' in a single OptionsText.tools list"
            )));
        }
        if matches!(self.temperature, Some(t) if !(0.0..=2.0).contains(&t)) {
            return Err(crate::Error::NotSupported("temperature must be within [0.0, 2.0]".into()));
        }
        Ok(())
    }

    pub fn max_doc_bytes(&self) -> usize {
        self.max_doc_bytes.unwrap_or(DEFAULT_MAX_DOC_BYTES)
    }
}

fn first_duplicate_tool_name(tools: &[Tool]) -> Option<String> {
    let mut seen = std::collections::HashSet::new();
    for tool in tools {
        if !seen.insert(tool.name.as_str()) {
            return Some(tool.name.clone());
        }
    }
    None
}

/// Options governing an image-generation call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OptionsImage {
    pub seed: Option<i64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl OptionsImage {
    pub fn validate(&self) -> GenResult<()> {
        Ok(())
    }
}

/// Options governing an audio-generation call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OptionsAudio {
    pub seed: Option<i64>,
    pub voice: Option<String>,
    pub format: Option<String>,
}

impl OptionsAudio {
    pub fn validate(&self) -> GenResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_duplicate_tool_names() {
        let opts = OptionsText {
            tools: vec![
                Tool {
                    name: "square_root".into(),
                    description: "d".into(),
                    parameters: serde_json::json!({}),
                },
                Tool {
                    name: "square_root".into(),
                    description: "d2".into(),
                    parameters: serde_json::json!({}),
                },
            ],
            ..Default::default()
        };
        assert!(opts.validate().is_err());
    }

    #[test]
    fn accepts_unique_tool_names() {
        let opts = OptionsText {
            tools: vec![Tool {
                name: "square_root".into(),
                description: "d".into(),
                parameters: serde_json::json!({}),
            }],
            ..Default::default()
        };
        assert!(opts.validate().is_ok());
    }
}
