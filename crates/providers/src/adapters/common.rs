//! Helpers shared across the concrete per-provider adapters (spec §4.5).

use genai_config::{ModelFilter, ModelManager};
use genai_core::{Error, FinishReason, GenResult, Options, OptionsText};

/// The first [`OptionsText`] in the call's option list, if any — every
/// adapter reads text-generation knobs the same way.
pub(crate) fn text_options(options: &[Options]) -> Option<&OptionsText> {
    options.iter().find_map(|option| match option {
        Options::Text(text) => Some(text),
        _ => None,
    })
}

/// Finds a provider-specific option this adapter recognizes by name;
/// anything else in the list is unsupported-continuable from this
/// adapter's point of view (spec §4.2).
pub(crate) fn provider_option<'a>(
    options: &'a [Options],
    provider: &str,
    name: &str,
) -> Option<&'a serde_json::Value> {
    options.iter().find_map(|option| match option {
        Options::Provider { provider: p, name: n, value } if p == provider && n == name => Some(value),
        _ => None,
    })
}

/// Runs each option's own validation, then classifies any
/// [`Options::Provider`] knob this adapter doesn't recognize as
/// unsupported-continuable rather than silently ignoring it (spec §4.5).
pub(crate) fn validate_options(options: &[Options], provider: &str, recognized: &[&str]) -> GenResult<()> {
    for option in options {
        option.validate()?;
        if let Options::Provider { provider: p, name, .. } = option
            && p == provider
            && !recognized.contains(&name.as_str())
        {
            return Err(Error::UnsupportedContinuable(format!(
                "{provider} does not recognize provider option '{name}'"
            )));
        }
    }
    Ok(())
}

/// Rejects a model id this provider's configuration doesn't cover: it is
/// neither a configured alias nor a match for the configured filter
/// regex. A provider with no `model_filter` configured accepts any model
/// id that isn't itself aliased (spec §4.3).
pub(crate) fn check_model_filter(model_manager: &ModelManager, model_filter: Option<&ModelFilter>, model: &str) -> GenResult<()> {
    if model_manager.get_model_config(model).is_some() {
        return Ok(());
    }
    match model_filter {
        Some(filter) if !filter.is_match(model) => Err(Error::NotSupported(format!(
            "model '{model}' does not match this provider's configured model filter"
        ))),
        _ => Ok(()),
    }
}

/// Filters a fetched model catalog down to ids the configured filter
/// allows through, leaving the catalog untouched when no filter is set.
pub(crate) fn filter_allowed(model_filter: Option<&ModelFilter>, model_id: &str) -> bool {
    model_filter.is_none_or(|filter| filter.is_match(model_id))
}

/// Spec §9's universal normalization: providers frequently mislabel a
/// tool-call-ending turn as `stop`; rewrite it to `tool_calls` whenever the
/// reply list contains a tool call.
pub(crate) fn normalize_finish_reason(reason: FinishReason, has_tool_call: bool) -> FinishReason {
    if has_tool_call && reason == FinishReason::Stop {
        FinishReason::ToolCalls
    } else {
        reason
    }
}
