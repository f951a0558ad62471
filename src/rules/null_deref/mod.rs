use std::collections::BTreeMap;

use anyhow::Result;
use rayon::prelude::*;
use serde_sarif::sarif::{Result as SarifResult, ResultLevel};
use tracing::{debug, warn};

use crate::engine::AnalysisContext;
use crate::ir::{Class, Method};
use crate::npe::finder::{Finding, NullDerefFinder, Severity};
use crate::rules::{Rule, RuleMetadata, method_location_with_line, result_message};

/// Rule that detects dereferences of null or possibly-null values, redundant
/// null checks, and null arguments violating callee contracts.
#[derive(Default)]
pub(crate) struct NullDerefRule;

crate::register_rule!(NullDerefRule);

impl Rule for NullDerefRule {
    fn metadata(&self) -> RuleMetadata {
        RuleMetadata {
            id: "NULL_DEREF",
            name: "Null pointer dereference",
            description: "Dereferences of null or possibly-null values, redundant null \
                          checks, and null arguments violating callee contracts",
        }
    }

    fn run(&self, context: &AnalysisContext) -> Result<Vec<SarifResult>> {
        let targets: Vec<(&Class, &Method)> = context
            .model
            .classes
            .iter()
            .flat_map(|class| class.methods.iter().map(move |method| (class, method)))
            .filter(|(_, method)| !method.access.is_abstract && !method.cfg.blocks.is_empty())
            .collect();

        // Methods are independent once the shared databases are built, so the
        // per-method fixpoints run on the rayon pool. A failure is local to
        // its method: log it and keep the findings from every other method.
        let per_method: Vec<Vec<Finding>> = targets
            .par_iter()
            .map(|&(class, method)| {
                let id = method.id(&class.name);
                let finder = NullDerefFinder {
                    class_name: &class.name,
                    method,
                    nullness_db: &context.model.nullness,
                    contract_db: &context.model.contracts,
                    vna: context.value_numbering(&id),
                    track_value_numbers: context.track_value_numbers,
                };
                match finder.find() {
                    Ok(findings) => findings,
                    Err(error) => {
                        warn!(method = %id, "skipping method after analysis failure: {error:#}");
                        Vec::new()
                    }
                }
            })
            .collect();

        let mut findings: Vec<Finding> = per_method.into_iter().flatten().collect();
        findings.sort();
        debug!(
            methods = targets.len(),
            findings = findings.len(),
            "null dereference scan finished"
        );

        let source_files: BTreeMap<&str, Option<&str>> = context
            .model
            .classes
            .iter()
            .map(|class| (class.name.as_str(), class.source_file.as_deref()))
            .collect();

        Ok(findings
            .iter()
            .map(|finding| to_sarif(finding, &source_files))
            .collect())
    }
}

fn to_sarif(finding: &Finding, source_files: &BTreeMap<&str, Option<&str>>) -> SarifResult {
    let mut text = format!(
        "{}: {} in {}",
        finding.kind.id(),
        finding.message,
        finding.method
    );
    if !finding.null_sources.is_empty() {
        let sources: Vec<String> = finding
            .null_sources
            .iter()
            .map(|source| source.to_string())
            .collect();
        text.push_str(&format!("; value becomes null at {}", sources.join(", ")));
    }
    let source_file = source_files
        .get(finding.method.class_name.as_str())
        .copied()
        .flatten();
    let location = method_location_with_line(
        &finding.method.class_name,
        &finding.method.name,
        &finding.method.descriptor,
        source_file,
        finding.line,
    );
    SarifResult::builder()
        .message(result_message(text))
        .level(level_for(finding.severity))
        .locations(vec![location])
        .build()
}

fn level_for(severity: Severity) -> ResultLevel {
    match severity {
        Severity::High => ResultLevel::Error,
        Severity::Normal => ResultLevel::Warning,
        Severity::Low => ResultLevel::Note,
    }
}
