use std::collections::BTreeMap;

use anyhow::Result;

use crate::db::{ContractDatabase, NullnessDatabase, ParamBits};
use crate::ir::{
    BasicBlock, CallSite, EdgeKind, InstructionKind, Location, Method, MethodId, Nullness,
};
use crate::npe::analysis::{AnalysisResult, NullnessAnalysis};
use crate::npe::frame::Frame;
use crate::npe::lattice::IsNullValue;
use crate::vna::ValueNumbering;

/// Ranked confidence of a finding.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) enum Severity {
    Low,
    Normal,
    High,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) enum FindingKind {
    /// Dereference of a value that is null on every path reaching it.
    AlwaysNullDeref,
    /// Dereference of a value that is null on some path reaching it.
    NullOnSomePathDeref,
    /// Null check of a value already known to be null.
    RedundantNullCheckOfNull,
    /// Null check of a value already known to be non-null.
    RedundantNullCheckOfNonNull,
    /// Reference comparison of two values both known to be null.
    RedundantComparisonOfTwoNulls,
    /// Reference comparison of a known null and a known non-null value.
    RedundantComparisonOfNullAndNonNull,
    /// Null argument passed to a method that unconditionally dereferences
    /// the parameter.
    NullParamDeref,
    /// Null argument passed for a parameter declared non-null.
    NonNullParamViolation,
    /// Possibly-null return from a method declared to never return null.
    NonNullReturnViolation,
}

impl FindingKind {
    pub(crate) fn id(self) -> &'static str {
        match self {
            FindingKind::AlwaysNullDeref => "NP_ALWAYS_NULL",
            FindingKind::NullOnSomePathDeref => "NP_NULL_ON_SOME_PATH",
            FindingKind::RedundantNullCheckOfNull => "RCN_REDUNDANT_NULLCHECK_OF_NULL_VALUE",
            FindingKind::RedundantNullCheckOfNonNull => "RCN_REDUNDANT_NULLCHECK_OF_NONNULL_VALUE",
            FindingKind::RedundantComparisonOfTwoNulls => "RCN_REDUNDANT_COMPARISON_TWO_NULL_VALUES",
            FindingKind::RedundantComparisonOfNullAndNonNull => {
                "RCN_REDUNDANT_COMPARISON_OF_NULL_AND_NONNULL_VALUE"
            }
            FindingKind::NullParamDeref => "NP_NULL_PARAM_DEREF",
            FindingKind::NonNullParamViolation => "NP_NONNULL_PARAM_VIOLATION",
            FindingKind::NonNullReturnViolation => "NP_NONNULL_RETURN_VIOLATION",
        }
    }
}

/// One reportable problem in one method.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) struct Finding {
    pub(crate) kind: FindingKind,
    pub(crate) severity: Severity,
    pub(crate) method: MethodId,
    pub(crate) location: Location,
    pub(crate) line: Option<u32>,
    /// True when the problem is only reachable on an exception path.
    pub(crate) on_exception_path: bool,
    pub(crate) message: String,
    /// Points where the offending value was seen to become null.
    pub(crate) null_sources: Vec<Location>,
}

/// Scans one method's converged dataflow results for findings.
pub(crate) struct NullDerefFinder<'a> {
    pub(crate) class_name: &'a str,
    pub(crate) method: &'a Method,
    pub(crate) nullness_db: &'a NullnessDatabase,
    pub(crate) contract_db: &'a ContractDatabase,
    pub(crate) vna: &'a ValueNumbering,
    pub(crate) track_value_numbers: bool,
}

impl NullDerefFinder<'_> {
    pub(crate) fn find(&self) -> Result<Vec<Finding>> {
        let analysis = NullnessAnalysis {
            method: self.method,
            nullness_db: self.nullness_db,
            vna: self.vna,
            track_value_numbers: self.track_value_numbers,
        };
        let result = analysis.run()?;

        let mut findings = Vec::new();
        // Frame captured just before an `instanceof`, for comparison blocks
        // of the instanceof-then-branch shape.
        let mut instance_of_frames: BTreeMap<u32, Frame> = BTreeMap::new();

        analysis.each_location(&result, |block, index, instruction, frame| {
            if !frame.is_valid() {
                return Ok(());
            }
            if matches!(instruction.kind, InstructionKind::InstanceOf) {
                instance_of_frames.insert(block.id, frame.clone());
            }

            if let Some(depth) = instruction.kind.dereferenced_stack_depth() {
                self.examine_dereference(
                    &result,
                    block,
                    instruction.offset,
                    depth,
                    frame,
                    &mut findings,
                );
            }
            if let InstructionKind::Invoke(call) = &instruction.kind {
                self.examine_call_site(block, instruction.offset, call, frame, &mut findings);
            }
            if matches!(instruction.kind, InstructionKind::ReturnValue) {
                self.examine_return(block, instruction.offset, frame, &mut findings);
            }
            if index + 1 == block.instructions.len() {
                self.examine_comparison(
                    &result,
                    block,
                    instruction.offset,
                    frame,
                    instance_of_frames.get(&block.id),
                    &mut findings,
                );
            }
            Ok(())
        })?;

        self.examine_null_check_guards(&result, &mut findings);

        // A guarded dereference can be observed both at the guard and at
        // the dereference itself; report each problem once.
        findings.sort();
        findings.dedup_by(|a, b| a.kind == b.kind && a.location == b.location);

        Ok(findings)
    }

    /// A dereference of a maybe-null value. Skipped for guarded
    /// dereferences, whose incoming frame was already refined to non-null
    /// by the guard's fall-through edge.
    fn examine_dereference(
        &self,
        result: &AnalysisResult,
        block: &BasicBlock,
        offset: u32,
        depth: usize,
        frame: &Frame,
        findings: &mut Vec<Finding>,
    ) {
        if depth >= frame.stack_depth() {
            return;
        }
        let Ok(value) = frame.stack_value(depth) else {
            return;
        };
        let location = Location {
            block: block.id,
            offset,
        };
        self.report_dereference(result, location, depth, value, findings);
    }

    fn report_dereference(
        &self,
        result: &AnalysisResult,
        location: Location,
        depth: usize,
        value: &IsNullValue,
        findings: &mut Vec<Finding>,
    ) {
        let on_exception_path = value.is_exception();
        let (kind, severity, message) = if value.is_definitely_null() {
            (
                FindingKind::AlwaysNullDeref,
                if on_exception_path {
                    Severity::Low
                } else {
                    Severity::High
                },
                "null value is dereferenced here".to_string(),
            )
        } else if value.is_null_on_some_path() {
            let message = match value.nullable_parameter() {
                // Parameters are numbered from 1 in messages.
                Some(param) => format!(
                    "possibly-null parameter {} is dereferenced here",
                    param + 1
                ),
                None => "possibly-null value is dereferenced here".to_string(),
            };
            (
                FindingKind::NullOnSomePathDeref,
                if on_exception_path {
                    Severity::Low
                } else {
                    Severity::Normal
                },
                message,
            )
        } else {
            return;
        };

        let null_sources = self
            .vna
            .fact_before(location)
            .and_then(|vna| vna.stack_value(depth))
            .map(|value_number| result.sources_for(value_number))
            .unwrap_or_default();

        findings.push(self.finding(
            kind,
            severity,
            location,
            on_exception_path,
            message,
            null_sources,
        ));
    }

    /// Null checks whose outcome was already determined. Values carrying
    /// the non-reporting assumption never produce a finding.
    fn examine_comparison(
        &self,
        result: &AnalysisResult,
        block: &BasicBlock,
        offset: u32,
        last_frame: &Frame,
        instance_of_frame: Option<&Frame>,
        findings: &mut Vec<Finding>,
    ) {
        let Some(decision) = result.decisions.get(&block.id) else {
            return;
        };
        if !decision.is_redundant() {
            return;
        }
        let Some(last) = block.last_instruction() else {
            return;
        };

        let (first_value, second_value) = match &last.kind {
            InstructionKind::IfNull | InstructionKind::IfNonNull => {
                let Ok(value) = last_frame.top_value() else {
                    return;
                };
                (value.clone(), None)
            }
            InstructionKind::IfZero | InstructionKind::IfNonZero => {
                let Some(frame) = instance_of_frame else {
                    return;
                };
                let Ok(value) = frame.top_value() else {
                    return;
                };
                (value.clone(), None)
            }
            InstructionKind::IfAcmpEq | InstructionKind::IfAcmpNe => {
                let (Ok(first), Ok(second)) =
                    (last_frame.stack_value(0), last_frame.stack_value(1))
                else {
                    return;
                };
                (first.clone(), Some(second.clone()))
            }
            _ => return,
        };

        if first_value.is_non_reporting()
            || second_value.as_ref().is_some_and(IsNullValue::is_non_reporting)
        {
            return;
        }

        let mut checked = first_value.is_checked();
        let mut kaboom = first_value.kaboom_location().is_some();
        let kind = match &second_value {
            None => {
                if first_value.is_definitely_null() {
                    FindingKind::RedundantNullCheckOfNull
                } else {
                    FindingKind::RedundantNullCheckOfNonNull
                }
            }
            Some(second) => {
                checked |= second.is_checked();
                kaboom |= second.kaboom_location().is_some();
                if first_value.is_definitely_null() && second.is_definitely_null() {
                    FindingKind::RedundantComparisonOfTwoNulls
                } else {
                    FindingKind::RedundantComparisonOfNullAndNonNull
                }
            }
        };

        // A check that would already have crashed is the strongest signal;
        // a previously checked value the next strongest.
        let severity = if kaboom {
            Severity::High
        } else if checked {
            Severity::Normal
        } else {
            Severity::Low
        };

        findings.push(self.finding(
            kind,
            severity,
            Location {
                block: block.id,
                offset,
            },
            first_value.is_exception(),
            "comparison outcome is already determined here".to_string(),
            Vec::new(),
        ));
    }

    /// Null arguments flowing into callee contracts.
    fn examine_call_site(
        &self,
        block: &BasicBlock,
        offset: u32,
        call: &CallSite,
        frame: &Frame,
        findings: &mut Vec<Finding>,
    ) {
        let arg_slots = call.arg_slots as usize;
        if arg_slots == 0 || arg_slots > frame.stack_depth() {
            return;
        }

        let mut null_args = ParamBits::default();
        let mut definitely_null_args = ParamBits::default();
        for param in 0..arg_slots.min(ParamBits::MAX_PARAMS) {
            let Ok(value) = frame.stack_value(arg_slots - 1 - param) else {
                continue;
            };
            // Values null only on an exception path are likely artifacts of
            // infeasible control flow.
            if value.might_be_null() && !value.is_exception() {
                null_args.set(param);
            }
            if value.is_definitely_null() {
                definitely_null_args.set(param);
            }
        }
        if null_args.is_empty() {
            return;
        }

        let target = call.target();
        let location = Location {
            block: block.id,
            offset,
        };

        if let Some(derefed) = self.contract_db.unconditionally_dereferenced(&target) {
            let violated = derefed.intersect(null_args);
            if !violated.is_empty() {
                let severity = if violated.intersect(definitely_null_args).is_empty() {
                    Severity::Normal
                } else {
                    Severity::High
                };
                findings.push(self.finding(
                    FindingKind::NullParamDeref,
                    severity,
                    location,
                    false,
                    format!(
                        "null argument ({}) is unconditionally dereferenced by {}.{}",
                        describe_params(violated),
                        target.class_name,
                        target.name
                    ),
                    Vec::new(),
                ));
            }
        }

        let mut non_null = self.contract_db.non_null_params(&target).unwrap_or_default();
        for param in 0..arg_slots.min(ParamBits::MAX_PARAMS) {
            if self.nullness_db.parameter_nullness(&target, param) == Nullness::NonNull {
                non_null.set(param);
            }
        }
        let violated = non_null.intersect(null_args);
        if !violated.is_empty() {
            let severity = if violated.intersect(definitely_null_args).is_empty() {
                Severity::Normal
            } else {
                Severity::High
            };
            findings.push(self.finding(
                FindingKind::NonNullParamViolation,
                severity,
                location,
                false,
                format!(
                    "null argument ({}) passed for a non-null parameter of {}.{}",
                    describe_params(violated),
                    target.class_name,
                    target.name
                ),
                Vec::new(),
            ));
        }
    }

    /// Possibly-null value returned from a method declared non-null.
    fn examine_return(
        &self,
        block: &BasicBlock,
        offset: u32,
        frame: &Frame,
        findings: &mut Vec<Finding>,
    ) {
        let id = self.method.id(self.class_name);
        let declared_non_null = self.method.nullness.return_nullness == Nullness::NonNull
            || self.contract_db.declares_non_null_return(&id);
        if !declared_non_null {
            return;
        }
        let Ok(tos) = frame.top_value() else {
            return;
        };
        if !tos.might_be_null() {
            return;
        }
        findings.push(self.finding(
            FindingKind::NonNullReturnViolation,
            Severity::Normal,
            Location {
                block: block.id,
                offset,
            },
            tos.is_exception(),
            "possibly-null value returned from a method declared to never return null"
                .to_string(),
            Vec::new(),
        ));
    }

    /// Dereferences guarded by a synthetic null-check block. The real
    /// dereference sees a frame already refined by the guard, so the check
    /// happens on the guard's exit fact instead.
    fn examine_null_check_guards(&self, result: &AnalysisResult, findings: &mut Vec<Finding>) {
        let cfg = &self.method.cfg;
        let blocks: BTreeMap<u32, &BasicBlock> =
            cfg.blocks.iter().map(|block| (block.id, block)).collect();

        for guard in cfg.blocks.iter().filter(|block| block.is_null_check) {
            let Some(exit) = result.result_facts.get(&guard.id) else {
                continue;
            };
            if !exit.is_valid() {
                continue;
            }
            let Some(target) = cfg
                .edges
                .iter()
                .find(|edge| edge.from == guard.id && edge.kind == EdgeKind::FallThrough)
                .and_then(|edge| blocks.get(&edge.to))
            else {
                continue;
            };
            let Some(first) = target.first_instruction() else {
                continue;
            };
            let Some(depth) = first.kind.dereferenced_stack_depth() else {
                continue;
            };
            if depth >= exit.stack_depth() {
                continue;
            }
            let Ok(value) = exit.stack_value(depth) else {
                continue;
            };
            let location = Location {
                block: target.id,
                offset: first.offset,
            };
            self.report_dereference(result, location, depth, value, findings);
        }
    }

    fn finding(
        &self,
        kind: FindingKind,
        severity: Severity,
        location: Location,
        on_exception_path: bool,
        message: String,
        null_sources: Vec<Location>,
    ) -> Finding {
        Finding {
            kind,
            severity,
            method: self.method.id(self.class_name),
            location,
            line: self.method.line_for_offset(location.offset),
            on_exception_path,
            message,
            null_sources,
        }
    }
}

fn describe_params(bits: ParamBits) -> String {
    let params: Vec<String> = bits
        .iter()
        // Parameters are numbered from 1 in messages.
        .map(|param| (param + 1).to_string())
        .collect();
    params.join(", ")
}
