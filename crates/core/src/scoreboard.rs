//! Scoreboard data (spec §3, §4.7): the declared-capability record format
//! shared between the prober (`genai-scoreboard::prober`) and the smoke
//! harness that diffs against it.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::GenResult;

/// Three-valued capability flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriState {
    False,
    True,
    Flaky,
}

impl TriState {
    /// `flaky` compares equal to anything, the wildcard rule the smoke
    /// harness's diff uses (spec §4.9).
    pub fn matches(self, other: TriState) -> bool {
        self == other || self == TriState::Flaky || other == TriState::Flaky
    }
}

/// A kind of content a [`Scenario`] can take in or produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Text,
    Image,
    Audio,
    Video,
    Document,
}

/// What a [`Scenario`] can do with a given [`Modality`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModalCapability {
    pub inline: bool,
    pub url: bool,
    pub max_size: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supported_formats: Vec<String>,
}

/// Tri-state feature flags a [`Scenario`] declares for plain-text generation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FunctionalityText {
    pub report_token_usage: TriState,
    pub report_finish_reason: TriState,
    pub seed: TriState,
    pub tools: TriState,
    pub tools_biased: TriState,
    pub tools_indecisive: TriState,
    pub tool_call_required: TriState,
    pub json: TriState,
    pub json_schema: TriState,
    pub citations: TriState,
    pub top_logprobs: TriState,
    pub max_tokens: TriState,
    pub stop_sequence: TriState,
    pub web_search: TriState,
    pub report_rate_limits: TriState,
}

impl Default for TriState {
    fn default() -> Self {
        TriState::False
    }
}

impl FunctionalityText {
    /// `Tools=false` implies the three tool-adjacent flags are also false
    /// (spec §4.7).
    pub fn validate(&self) -> GenResult<()> {
        if self.tools == TriState::False
            && (self.tools_biased != TriState::False
                || self.tools_indecisive != TriState::False
                || self.tool_call_required != TriState::False)
        {
            return Err(crate::Error::BadInternal(
                "Tools=false but a tool-dependent flag is set".into(),
            ));
        }
        Ok(())
    }
}

/// Tri-state feature flags for document-producing generation (e.g. a
/// provider that can return a PDF alongside text).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FunctionalityDoc {
    pub report_token_usage: TriState,
    pub report_finish_reason: TriState,
}

/// A declared capability configuration: a set of models sharing identical
/// behavior under a given reasoning mode.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Scenario {
    pub models: Vec<String>,
    pub reason: bool,
    pub reasoning_token_start: Option<String>,
    pub reasoning_token_end: Option<String>,
    #[serde(default)]
    pub input: HashMap<Modality, ModalCapability>,
    #[serde(default)]
    pub output: HashMap<Modality, ModalCapability>,
    pub gen_sync: Option<FunctionalityText>,
    pub gen_stream: Option<FunctionalityText>,
    pub gen_doc: Option<FunctionalityDoc>,
    pub sota: bool,
    pub good: bool,
    pub cheap: bool,
    #[serde(default)]
    pub comments: String,
}

impl Scenario {
    /// Per-scenario checks from spec §4.7: `len(in)==0 iff len(out)==0`,
    /// at most one tier flag set, every modality/tristate value legal
    /// (guaranteed by the type system here, so only the cross-field
    /// invariants need runtime checking).
    pub fn validate(&self) -> GenResult<()> {
        if self.input.is_empty() != self.output.is_empty() {
            return Err(crate::Error::BadInternal(
                "Scenario.input and Scenario.output must be empty together or non-empty together".into(),
            ));
        }

        if [self.sota, self.good, self.cheap].iter().filter(|set| **set).count() > 1 {
            return Err(crate::Error::BadInternal(
                "at most one of sota/good/cheap may be set per Scenario".into(),
            ));
        }

        if let Some(gen_sync) = &self.gen_sync {
            gen_sync.validate()?;
        }
        if let Some(gen_stream) = &self.gen_stream {
            gen_stream.validate()?;
        }

        Ok(())
    }
}

/// The full collection of [`Scenario`]s for one provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Score {
    pub provider: String,
    pub scenarios: Vec<Scenario>,
}

impl Score {
    /// Full-score validation (spec §4.7, §8 invariants 3–5):
    /// per-scenario `Validate()`, no duplicate `(model, reason)` pairs, and
    /// tier ordering (SOTA first, Good before Cheap) within each
    /// output-modality tier group.
    pub fn validate(&self) -> GenResult<()> {
        let mut seen_pairs = BTreeSet::new();

        for scenario in &self.scenarios {
            scenario.validate()?;

            for model in &scenario.models {
                if !seen_pairs.insert((model.clone(), scenario.reason)) {
                    return Err(crate::Error::BadInternal(format!(
                        "duplicate (model, reason) pair: ({model}, {})",
                        scenario.reason
                    )));
                }
            }
        }

        self.validate_tier_ordering()
    }

    fn validate_tier_ordering(&self) -> GenResult<()> {
        let mut modalities: BTreeSet<Modality> = BTreeSet::new();
        for scenario in &self.scenarios {
            modalities.extend(scenario.output.keys().copied());
        }
        // A scenario declaring no output modalities still participates in a
        // single implicit group so text-only scenarios get tier-checked too.
        if modalities.is_empty() {
            modalities.insert(Modality::Text);
        }

        for modality in modalities {
            let group: Vec<&Scenario> = self
                .scenarios
                .iter()
                .filter(|s| s.output.contains_key(&modality) || s.output.is_empty())
                .collect();

            let any_tier_set = group.iter().any(|s| s.sota || s.good || s.cheap);
            if !any_tier_set {
                continue;
            }

            if let Some(first) = group.first()
                && !first.sota
            {
                return Err(crate::Error::BadInternal(format!(
                    "SOTA scenario must be first in the {modality:?} tier group"
                )));
            }

            let good_index = group.iter().position(|s| s.good);
            let cheap_index = group.iter().position(|s| s.cheap);
            if let (Some(good_index), Some(cheap_index)) = (good_index, cheap_index)
                && good_index >= cheap_index
            {
                return Err(crate::Error::BadInternal(format!(
                    "Good must precede Cheap in the {modality:?} tier group"
                )));
            }
        }

        Ok(())
    }

    /// Untested scenarios sharing `(comments, reason)` are merged by union
    /// of model lists, sorted and deduplicated (spec §4.7 consolidation).
    pub fn consolidate(mut self) -> Self {
        let mut merged: Vec<Scenario> = Vec::new();

        'scenario: for scenario in self.scenarios.drain(..) {
            let is_untested = scenario.gen_sync.is_none() && scenario.gen_stream.is_none();
            if is_untested {
                for existing in &mut merged {
                    let existing_untested = existing.gen_sync.is_none() && existing.gen_stream.is_none();
                    if existing_untested && existing.comments == scenario.comments && existing.reason == scenario.reason {
                        existing.models.extend(scenario.models.clone());
                        existing.models.sort();
                        existing.models.dedup();
                        continue 'scenario;
                    }
                }
            }
            merged.push(scenario);
        }

        merged.sort_by(|a, b| {
            tier_rank(a)
                .cmp(&tier_rank(b))
                .then_with(|| is_tested(b).cmp(&is_tested(a)))
                .then_with(|| b.reason.cmp(&a.reason))
                .then_with(|| a.models.first().cmp(&b.models.first()))
        });

        self.scenarios = merged;
        self
    }
}

fn tier_rank(scenario: &Scenario) -> u8 {
    if scenario.sota {
        0
    } else if scenario.good {
        1
    } else if scenario.cheap {
        2
    } else {
        3
    }
}

fn is_tested(scenario: &Scenario) -> bool {
    scenario.gen_sync.is_some() || scenario.gen_stream.is_some()
}

/// Boolean/tri-state flag catalog re-exported at module scope for adapters
/// that need to name an individual functionality flag without importing
/// [`FunctionalityText`] in full (e.g. the prober's probe-to-flag table).
pub type Functionality = FunctionalityText;

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario(models: &[&str], reason: bool) -> Scenario {
        Scenario {
            models: models.iter().map(|m| m.to_string()).collect(),
            reason,
            ..Scenario::default()
        }
    }

    #[test]
    fn rejects_duplicate_model_reason_pairs() {
        let score = Score {
            provider: "openai".into(),
            scenarios: vec![scenario(&["gpt-4"], false), scenario(&["gpt-4"], false)],
        };
        assert!(score.validate().is_err());
    }

    #[test]
    fn allows_same_model_under_different_reason_modes() {
        let score = Score {
            provider: "openai".into(),
            scenarios: vec![scenario(&["gpt-4"], false), scenario(&["gpt-4"], true)],
        };
        assert!(score.validate().is_ok());
    }

    #[test]
    fn tristate_matches_treats_flaky_as_wildcard() {
        assert!(TriState::Flaky.matches(TriState::True));
        assert!(TriState::False.matches(TriState::Flaky));
        assert!(!TriState::True.matches(TriState::False));
    }

    #[test]
    fn tristate_json_roundtrip() {
        for value in [TriState::False, TriState::True, TriState::Flaky] {
            let encoded = serde_json::to_string(&value).unwrap();
            let decoded: TriState = serde_json::from_str(&encoded).unwrap();
            assert_eq!(value, decoded);
        }
    }

    #[test]
    fn consolidate_merges_untested_scenarios_sharing_comments_and_reason() {
        let mut a = scenario(&["model-a"], false);
        a.comments = "legacy alias".into();
        let mut b = scenario(&["model-b"], false);
        b.comments = "legacy alias".into();

        let score = Score {
            provider: "openai".into(),
            scenarios: vec![a, b],
        }
        .consolidate();

        assert_eq!(score.scenarios.len(), 1);
        assert_eq!(score.scenarios[0].models, vec!["model-a", "model-b"]);
    }
}
