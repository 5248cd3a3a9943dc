//! Smoke harness (spec §4.9): for every model a `Score` declares, runs the
//! prober against a freshly constructed `Provider` and diffs the produced
//! `Scenario` against the declared one.

use std::{collections::HashSet, sync::Arc};

use genai_core::{Functionality, GenResult, Scenario, Score, TriState};
use genai_providers::Provider;

use crate::prober::{self, ProbeReport};

/// One field that disagreed between the declared and the produced scenario.
#[derive(Debug, Clone)]
pub struct Mismatch {
    pub model: String,
    pub reason: bool,
    pub field: String,
    pub declared: String,
    pub produced: String,
}

/// Result of diffing an entire declared `Score` against live probing.
#[derive(Debug, Default)]
pub struct SmokeReport {
    pub mismatches: Vec<Mismatch>,
    /// Models `Provider::list_models` returned that no declared `Scenario`
    /// mentions — a warning, not an error (spec §4.9: provider model lists
    /// churn faster than the scoreboard is updated).
    pub stranger_models: Vec<String>,
}

impl SmokeReport {
    pub fn is_clean(&self) -> bool {
        self.mismatches.is_empty()
    }
}

/// Runs the smoke test for every `(model, reason)` pair `score` declares.
/// `factory` builds a fresh `Provider` instance pinned to one model (spec
/// §4.9's "Provider factory", cassette-recording transport construction is
/// the factory's concern, not the harness's). `observed_models` is the most
/// recent `Provider::list_models()` output, used only for the stranger-model
/// warning.
pub async fn run<F>(score: &Score, factory: F, observed_models: &[String]) -> GenResult<SmokeReport>
where
    F: Fn(&str) -> GenResult<Arc<dyn Provider>>,
{
    let mut report = SmokeReport::default();

    for scenario in &score.scenarios {
        for model in &scenario.models {
            let provider = factory(model)?;
            let probed = prober::probe(provider.as_ref()).await?;
            report.mismatches.extend(diff_scenario(model, scenario.reason, scenario, &probed));
        }
    }

    report.stranger_models = observed_models
        .iter()
        .filter(|model| !score.scenarios.iter().any(|s| s.models.iter().any(|m| m == *model)))
        .cloned()
        .collect();

    Ok(report)
}

/// Declared `(model, reason)` pairs that never appeared in `tested`: a
/// coverage gap in whatever test suite called [`run`] per model rather than
/// per `Score`, surfaced separately since `run` above already iterates every
/// declared pair itself.
pub fn unused_declared_pairs(score: &Score, tested: &HashSet<(String, bool)>) -> Vec<(String, bool)> {
    let mut unused = Vec::new();
    for scenario in &score.scenarios {
        for model in &scenario.models {
            let pair = (model.clone(), scenario.reason);
            if !tested.contains(&pair) {
                unused.push(pair);
            }
        }
    }
    unused
}

fn diff_scenario(model: &str, reason: bool, declared: &Scenario, probed: &ProbeReport) -> Vec<Mismatch> {
    let mut mismatches = Vec::new();

    mismatches.extend(diff_functionality(
        model,
        reason,
        "gen_sync",
        declared.gen_sync.as_ref(),
        probed.scenario.gen_sync.as_ref(),
    ));
    mismatches.extend(diff_functionality(
        model,
        reason,
        "gen_stream",
        declared.gen_stream.as_ref(),
        probed.scenario.gen_stream.as_ref(),
    ));

    if declared.reason != probed.scenario.reason {
        mismatches.push(Mismatch {
            model: model.to_string(),
            reason,
            field: "reason".to_string(),
            declared: declared.reason.to_string(),
            produced: probed.scenario.reason.to_string(),
        });
    }

    for (modality, declared_cap) in &declared.input {
        let produced_cap = probed.scenario.input.get(modality);
        if produced_cap.map(|c| c.inline) != Some(declared_cap.inline) || produced_cap.map(|c| c.url) != Some(declared_cap.url) {
            mismatches.push(Mismatch {
                model: model.to_string(),
                reason,
                field: format!("input[{modality:?}]"),
                declared: format!("{declared_cap:?}"),
                produced: format!("{produced_cap:?}"),
            });
        }
    }

    for (modality, declared_cap) in &declared.output {
        let produced_cap = probed.scenario.output.get(modality);
        if produced_cap.is_none() && !declared_cap.supported_formats.is_empty() {
            mismatches.push(Mismatch {
                model: model.to_string(),
                reason,
                field: format!("output[{modality:?}]"),
                declared: format!("{declared_cap:?}"),
                produced: "none".to_string(),
            });
        }
    }

    mismatches
}

fn diff_functionality(model: &str, reason: bool, label: &str, declared: Option<&Functionality>, produced: Option<&Functionality>) -> Vec<Mismatch> {
    let (Some(declared), Some(produced)) = (declared, produced) else {
        return Vec::new();
    };

    let fields: [(&str, TriState, TriState); 15] = [
        ("report_token_usage", declared.report_token_usage, produced.report_token_usage),
        ("report_finish_reason", declared.report_finish_reason, produced.report_finish_reason),
        ("seed", declared.seed, produced.seed),
        ("tools", declared.tools, produced.tools),
        ("tools_biased", declared.tools_biased, produced.tools_biased),
        ("tools_indecisive", declared.tools_indecisive, produced.tools_indecisive),
        ("tool_call_required", declared.tool_call_required, produced.tool_call_required),
        ("json", declared.json, produced.json),
        ("json_schema", declared.json_schema, produced.json_schema),
        ("citations", declared.citations, produced.citations),
        ("top_logprobs", declared.top_logprobs, produced.top_logprobs),
        ("max_tokens", declared.max_tokens, produced.max_tokens),
        ("stop_sequence", declared.stop_sequence, produced.stop_sequence),
        ("web_search", declared.web_search, produced.web_search),
        ("report_rate_limits", declared.report_rate_limits, produced.report_rate_limits),
    ];

    fields
        .into_iter()
        .filter(|(_, declared_value, produced_value)| !declared_value.matches(*produced_value))
        .map(|(field, declared_value, produced_value)| Mismatch {
            model: model.to_string(),
            reason,
            field: format!("{label}.{field}"),
            declared: format!("{declared_value:?}"),
            produced: format!("{produced_value:?}"),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use genai_core::ModalCapability;

    fn functionality(tools: TriState) -> Functionality {
        Functionality {
            tools,
            ..Functionality::default()
        }
    }

    #[test]
    fn matching_scenarios_produce_no_mismatches() {
        let declared = Scenario {
            models: vec!["gpt-4o-mini".to_string()],
            gen_sync: Some(functionality(TriState::True)),
            ..Scenario::default()
        };
        let probed = ProbeReport {
            scenario: Scenario {
                gen_sync: Some(functionality(TriState::True)),
                ..Scenario::default()
            },
            usage: genai_core::Usage::default(),
        };

        assert!(diff_scenario("gpt-4o-mini", false, &declared, &probed).is_empty());
    }

    #[test]
    fn flaky_declared_matches_any_produced_value() {
        let declared = Scenario {
            gen_sync: Some(functionality(TriState::Flaky)),
            ..Scenario::default()
        };
        let probed = ProbeReport {
            scenario: Scenario {
                gen_sync: Some(functionality(TriState::False)),
                ..Scenario::default()
            },
            usage: genai_core::Usage::default(),
        };

        assert!(diff_scenario("m", false, &declared, &probed).is_empty());
    }

    #[test]
    fn disagreeing_tristate_is_reported() {
        let declared = Scenario {
            gen_sync: Some(functionality(TriState::True)),
            ..Scenario::default()
        };
        let probed = ProbeReport {
            scenario: Scenario {
                gen_sync: Some(functionality(TriState::False)),
                ..Scenario::default()
            },
            usage: genai_core::Usage::default(),
        };

        let mismatches = diff_scenario("m", false, &declared, &probed);
        assert_eq!(mismatches.len(), 1);
        assert_eq!(mismatches[0].field, "gen_sync.tools");
    }

    #[test]
    fn unused_pairs_are_reported_when_not_in_tested_set() {
        let score = Score {
            provider: "openai".to_string(),
            scenarios: vec![Scenario {
                models: vec!["gpt-4o".to_string()],
                ..Scenario::default()
            }],
        };
        let tested = HashSet::new();
        let unused = unused_declared_pairs(&score, &tested);
        assert_eq!(unused, vec![("gpt-4o".to_string(), false)]);
    }

    #[test]
    fn input_modal_capability_mismatch_reported() {
        let mut declared = Scenario::default();
        declared.input.insert(
            genai_core::Modality::Image,
            ModalCapability {
                inline: true,
                url: true,
                max_size: 10,
                supported_formats: vec!["image/jpeg".to_string()],
            },
        );
        let probed = ProbeReport {
            scenario: Scenario::default(),
            usage: genai_core::Usage::default(),
        };

        let mismatches = diff_scenario("m", false, &declared, &probed);
        assert!(mismatches.iter().any(|m| m.field.contains("input")));
    }
}
