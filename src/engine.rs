use anyhow::Result;
use serde_sarif::sarif::{
    MultiformatMessageString, ReportingDescriptor, Result as SarifResult,
};
use tracing::{debug, info_span};

use crate::model::AnalysisModel;
use crate::rules::{Rule, RuleMetadata, all_rules};
use crate::vna::ValueNumbering;

/// Inputs shared by analysis rules.
pub(crate) struct AnalysisContext {
    pub(crate) model: AnalysisModel,
    /// When false, frames carry no known-value side map: branch refinements
    /// still rewrite slots positionally, but knowledge no longer follows the
    /// value through later loads and phi merges.
    pub(crate) track_value_numbers: bool,
    empty_value_numbering: ValueNumbering,
}

impl AnalysisContext {
    pub(crate) fn new(model: AnalysisModel, track_value_numbers: bool) -> Self {
        Self {
            model,
            track_value_numbers,
            empty_value_numbering: ValueNumbering::default(),
        }
    }

    /// Value-numbering facts for a method; methods without facts get empty
    /// facts, which degrades precision but never soundness.
    pub(crate) fn value_numbering(&self, id: &crate::ir::MethodId) -> &ValueNumbering {
        self.model
            .value_numbering
            .get(id)
            .unwrap_or(&self.empty_value_numbering)
    }
}

/// Analysis engine that executes the registered rules.
pub(crate) struct Engine {
    rules: Vec<Box<dyn Rule + Sync>>,
}

impl Engine {
    pub(crate) fn new() -> Self {
        let mut rules = all_rules();
        rules.sort_by(|a, b| a.metadata().id.cmp(b.metadata().id));
        Self { rules }
    }

    pub(crate) fn analyze(&self, context: &AnalysisContext) -> Result<EngineOutput> {
        let mut rules = Vec::new();
        let mut results = Vec::new();

        for rule in &self.rules {
            let metadata = rule.metadata();
            rules.push(rule_descriptor(&metadata));
            let span = info_span!("rule", id = metadata.id);
            let mut rule_results = span.in_scope(|| rule.run(context))?;
            debug!(rule = metadata.id, results = rule_results.len(), "rule finished");
            for result in &mut rule_results {
                if result.rule_id.is_none() {
                    result.rule_id = Some(metadata.id.to_string());
                }
            }
            results.extend(rule_results);
        }

        results.sort_by(|left, right| {
            let left_id = left.rule_id.as_deref().unwrap_or("");
            let right_id = right.rule_id.as_deref().unwrap_or("");
            let left_msg = left.message.text.as_deref().unwrap_or("").to_string();
            let right_msg = right.message.text.as_deref().unwrap_or("").to_string();
            left_id.cmp(right_id).then(left_msg.cmp(&right_msg))
        });

        Ok(EngineOutput { rules, results })
    }
}

/// Aggregated SARIF payload from rule execution.
pub(crate) struct EngineOutput {
    pub(crate) rules: Vec<ReportingDescriptor>,
    pub(crate) results: Vec<SarifResult>,
}

fn rule_descriptor(metadata: &RuleMetadata) -> ReportingDescriptor {
    ReportingDescriptor::builder()
        .id(metadata.id)
        .name(metadata.name)
        .short_description(
            MultiformatMessageString::builder()
                .text(metadata.description)
                .build(),
        )
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_output_is_sorted_by_rule_and_message() {
        let context = AnalysisContext::new(AnalysisModel::default(), true);
        let output = Engine::new().analyze(&context).unwrap();

        assert!(!output.rules.is_empty());
        let messages: Vec<_> = output
            .results
            .iter()
            .map(|result| {
                (
                    result.rule_id.clone().unwrap_or_default(),
                    result.message.text.clone().unwrap_or_default(),
                )
            })
            .collect();
        let mut sorted = messages.clone();
        sorted.sort();
        assert_eq!(messages, sorted);
    }
}
