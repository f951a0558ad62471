use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Result, bail};
use tracing::trace;

use crate::db::NullnessDatabase;
use crate::ir::{BasicBlock, EdgeKind, FlowEdge, Instruction, Location, Method, Nullness};
use crate::npe::decision::{Decision, compute_decision};
use crate::npe::frame::Frame;
use crate::npe::lattice::IsNullValue;
use crate::npe::transfer::{BlockTransfer, NullSource};
use crate::vna::{ValueNumber, ValueNumbering, VnaFrame};

/// Iteration bound; a method that has not converged by then indicates a
/// non-monotone transfer function, which is an internal error.
const MAX_ITERATIONS: u32 = 100;

/// Handlers for these exceptions commonly follow code that cannot actually
/// throw them at runtime; nullness learned inside them is demoted so it is
/// tracked but never reported.
const RECOVERABLE_EXCEPTIONS: [&str; 2] = [
    "java.lang.CloneNotSupportedException",
    "java.lang.InterruptedException",
];

/// Fixpoint results for one method.
#[derive(Debug, Default)]
pub(crate) struct AnalysisResult {
    /// Frame at entry to each reachable block.
    pub(crate) start_facts: BTreeMap<u32, Frame>,
    /// Frame at exit from each reachable block.
    pub(crate) result_facts: BTreeMap<u32, Frame>,
    /// Comparison decisions, keyed by the block ending in the comparison.
    pub(crate) decisions: BTreeMap<u32, Decision>,
    /// Points where a value was observed to become null or nullable.
    pub(crate) null_sources: BTreeSet<NullSource>,
    pub(crate) iterations: u32,
}

impl AnalysisResult {
    /// Null-source locations recorded for the given value number.
    pub(crate) fn sources_for(&self, value: ValueNumber) -> Vec<Location> {
        self.null_sources
            .iter()
            .filter(|source| source.value == value)
            .map(|source| source.location)
            .collect()
    }
}

/// Forward nullness dataflow over one method's control-flow graph.
pub(crate) struct NullnessAnalysis<'a> {
    pub(crate) method: &'a Method,
    pub(crate) nullness_db: &'a NullnessDatabase,
    pub(crate) vna: &'a ValueNumbering,
    pub(crate) track_value_numbers: bool,
}

impl NullnessAnalysis<'_> {
    fn transfer(&self) -> BlockTransfer<'_> {
        BlockTransfer {
            nullness_db: self.nullness_db,
            vna: self.vna,
        }
    }

    /// Frame on entry to the method: locals default to a non-reporting
    /// assumption, `this` is known non-null, and annotated parameters get
    /// their declared nullness.
    pub(crate) fn entry_fact(&self) -> Frame {
        let num_locals = self.method.num_locals as usize;
        let mut frame = Frame::entry(
            num_locals,
            self.track_value_numbers,
            IsNullValue::non_reporting_non_null(),
        );
        let base = self.method.param_base_slot() as usize;
        if base == 1 {
            let _ = frame.set_local(0, IsNullValue::non_null());
        }
        for (param, nullness) in self.method.nullness.parameter_nullness.iter().enumerate() {
            let slot = base + param;
            if slot >= num_locals {
                break;
            }
            let value = match nullness {
                Nullness::Nullable => IsNullValue::parameter_marked_nullable(param as u16),
                Nullness::NonNull => IsNullValue::non_null(),
                Nullness::Unknown => IsNullValue::non_reporting_non_null(),
            };
            let _ = frame.set_local(slot, value);
        }
        frame
    }

    /// Runs the analysis to fixpoint.
    pub(crate) fn run(&self) -> Result<AnalysisResult> {
        let cfg = &self.method.cfg;
        let blocks: BTreeMap<u32, &BasicBlock> =
            cfg.blocks.iter().map(|block| (block.id, block)).collect();
        let order = reverse_post_order(cfg.entry, &blocks, &cfg.edges);
        let non_exception_successors = non_exception_successor_counts(&cfg.edges);

        let mut predecessors: BTreeMap<u32, Vec<&FlowEdge>> = BTreeMap::new();
        for edge in &cfg.edges {
            predecessors.entry(edge.to).or_default().push(edge);
        }

        let transfer = self.transfer();
        let mut result = AnalysisResult::default();

        loop {
            result.iterations += 1;
            if result.iterations > MAX_ITERATIONS {
                bail!(
                    "nullness analysis did not converge after {MAX_ITERATIONS} iterations \
                     for {}{}",
                    self.method.name,
                    self.method.descriptor
                );
            }
            // Re-recorded from scratch each sweep so the final iteration
            // leaves the most precise set.
            result.null_sources.clear();
            let mut changed = false;

            for &block_id in &order {
                let Some(block) = blocks.get(&block_id) else {
                    continue;
                };

                let mut start = if block_id == cfg.entry {
                    self.entry_fact()
                } else {
                    Frame::top(self.method.num_locals as usize, self.track_value_numbers)
                };
                if let Some(incoming) = predecessors.get(&block_id) {
                    for edge in incoming {
                        let Some(source) = blocks.get(&edge.from) else {
                            continue;
                        };
                        let Some(source_fact) = result.result_facts.get(&edge.from) else {
                            continue;
                        };
                        if source_fact.is_top() {
                            continue;
                        }
                        self.meet_into(
                            source_fact,
                            edge,
                            source,
                            block,
                            &result.decisions,
                            &non_exception_successors,
                            &mut result.null_sources,
                            &mut start,
                        )?;
                    }
                }

                let mut exit = start.clone();
                let outcome =
                    transfer.transfer_block(block, &mut exit, &mut result.null_sources)?;

                if let Some(last_frame) = &outcome.last_frame {
                    match compute_decision(
                        block,
                        last_frame,
                        outcome.instance_of_frame.as_ref(),
                        self.vna,
                    )? {
                        Some(decision) => {
                            result.decisions.insert(block_id, decision);
                        }
                        None => {
                            result.decisions.remove(&block_id);
                        }
                    }
                }

                if result.result_facts.get(&block_id) != Some(&exit) {
                    changed = true;
                }
                result.start_facts.insert(block_id, start);
                result.result_facts.insert(block_id, exit);
            }

            if !changed {
                break;
            }
        }

        trace!(
            method = %self.method.name,
            iterations = result.iterations,
            "nullness dataflow converged"
        );
        Ok(result)
    }

    /// Invokes `visit` with the frame in effect immediately before every
    /// instruction of every reachable block, replaying the transfer
    /// function from the converged block-entry facts.
    pub(crate) fn each_location<F>(&self, result: &AnalysisResult, mut visit: F) -> Result<()>
    where
        F: FnMut(&BasicBlock, usize, &Instruction, &Frame) -> Result<()>,
    {
        let transfer = self.transfer();
        let mut scratch = BTreeSet::new();
        for block in &self.method.cfg.blocks {
            let Some(start) = result.start_facts.get(&block.id) else {
                continue;
            };
            if !start.is_valid() {
                continue;
            }
            let mut frame = start.clone();
            for (index, instruction) in block.instructions.iter().enumerate() {
                visit(block, index, instruction, &frame)?;
                transfer.step(block, instruction, &mut frame, &mut scratch)?;
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn meet_into(
        &self,
        source_fact: &Frame,
        edge: &FlowEdge,
        source: &BasicBlock,
        target: &BasicBlock,
        decisions: &BTreeMap<u32, Decision>,
        non_exception_successors: &BTreeMap<u32, usize>,
        null_sources: &mut BTreeSet<NullSource>,
        result: &mut Frame,
    ) -> Result<()> {
        let mut fact = source_fact.clone();

        if fact.is_valid() {
            // Path refinements must not survive a split the comparison did
            // not control.
            if !edge.kind.is_exception()
                && non_exception_successors
                    .get(&edge.from)
                    .is_some_and(|count| *count > 1)
            {
                fact.downgrade_on_control_split();
            }

            // The default case of a switch is usually defensive; treat its
            // values like exception-path values.
            if edge.kind == EdgeKind::SwitchDefault {
                fact.to_exception_values();
            }

            if target.is_exception_handler {
                fact.clear_stack();
                if target
                    .catch_type
                    .as_deref()
                    .is_some_and(|catch| RECOVERABLE_EXCEPTIONS.contains(&catch))
                {
                    for slot in 0..fact.num_slots() {
                        let demote = fact
                            .value(slot)
                            .is_some_and(|v| v.is_definitely_null() || v.is_null_on_some_path());
                        if demote {
                            fact.set_value(slot, IsNullValue::null_on_complex_path());
                        }
                    }
                }
                fact.to_exception_values();
                // The caught exception object itself.
                fact.push(IsNullValue::non_null());
            } else {
                let target_vna = self.vna.entry_fact(target.id);

                if matches!(edge.kind, EdgeKind::Branch | EdgeKind::FallThrough)
                    && let Some(decision) = decisions.get(&edge.from)
                {
                    if !decision.is_edge_feasible(edge.kind) {
                        fact.set_top();
                    } else if let (Some(tested), Some(value)) =
                        (decision.tested(), decision.value_for_edge(edge.kind))
                    {
                        let at_if = source.last_instruction().map(|last| Location {
                            block: source.id,
                            offset: last.offset,
                        });
                        if value.is_definitely_null()
                            && let Some(location) = at_if
                        {
                            null_sources.insert(NullSource {
                                location,
                                value: tested,
                            });
                        }
                        let prev_vna = at_if.and_then(|location| self.vna.fact_before(location));
                        if let (Some(prev_vna), Some(target_vna)) = (prev_vna, target_vna) {
                            replace_values(&mut fact, tested, prev_vna, target_vna, value.clone());
                        }
                    }
                }

                // Falling through a null-check block proves the checked
                // value non-null, with the dereference as the witness.
                if source.is_null_check && edge.kind == EdgeKind::FallThrough {
                    self.refine_after_null_check(&mut fact, target, target_vna)?;
                }

                // At a confluence where the same logical load was computed
                // independently on several predecessors, carry knowledge
                // over to the merged value numbers.
                if self.track_value_numbers
                    && target_vna.is_some_and(|frame| frame.phi_node_for_loads)
                    && let (Some(source_vna), Some(target_vna)) =
                        (self.vna.exit_fact(source.id), target_vna)
                {
                    for value_number in fact.known_value_numbers() {
                        let Some(load) = source_vna.load_for(value_number) else {
                            continue;
                        };
                        let Some(matching) = target_vna.values_for_load(load) else {
                            continue;
                        };
                        for &merged in matching {
                            fact.use_new_value_number_for_load(value_number, merged);
                        }
                    }
                }
            }
        }

        result.merge_from(&fact);
        Ok(())
    }

    fn refine_after_null_check(
        &self,
        fact: &mut Frame,
        target: &BasicBlock,
        target_vna: Option<&VnaFrame>,
    ) -> Result<()> {
        let Some(first) = target.first_instruction() else {
            return Ok(());
        };
        let Some(depth) = first.kind.dereferenced_stack_depth() else {
            return Ok(());
        };
        if depth >= fact.stack_depth() {
            return Ok(());
        }
        let instance = fact.stack_value(depth)?.clone();

        if instance.is_definitely_null() {
            // The check always throws; the fall-through is unreachable.
            fact.set_top();
            return Ok(());
        }
        if instance.is_definitely_not_null() {
            return Ok(());
        }
        let Some(target_vna) = target_vna else {
            return Ok(());
        };
        let Some(replace_me) = target_vna.stack_value(depth) else {
            return Ok(());
        };
        let kaboom = Location {
            block: target.id,
            offset: first.offset,
        };
        replace_values(
            fact,
            replace_me,
            target_vna,
            target_vna,
            IsNullValue::no_kaboom_non_null(kaboom),
        );
        Ok(())
    }
}

/// Rewrites every occurrence of the value identified by `replace_me` with
/// the refined value, using value numbering to reach aliases: knowledge is
/// recorded for the value number (and any value numbers its available load
/// maps to at the target), and slots are rewritten by position through the
/// prev-frame/target-frame correspondence.
fn replace_values(
    frame: &mut Frame,
    replace_me: ValueNumber,
    prev_vna: &VnaFrame,
    target_vna: &VnaFrame,
    replacement: IsNullValue,
) {
    if let Some(load) = prev_vna.load_for(replace_me) {
        if let Some(matching) = target_vna.values_for_load(load) {
            for &merged in matching {
                if merged != replace_me {
                    frame.set_known_value(merged, replacement.clone());
                }
            }
        }
    }
    frame.set_known_value(replace_me, replacement.clone());

    let target_num_slots = target_vna.num_slots().min(frame.num_slots());
    let prefix_num_slots = frame.num_slots().min(prev_vna.num_slots());
    for slot in 0..prefix_num_slots {
        if prev_vna.value(slot) != Some(replace_me) {
            continue;
        }
        let corresponding = target_vna.value(slot);
        if corresponding.is_none() {
            continue;
        }
        for other in 0..target_num_slots {
            if target_vna.value(other) == corresponding {
                frame.set_value(other, replacement.clone());
            }
        }
    }
}

fn reverse_post_order(
    entry: u32,
    blocks: &BTreeMap<u32, &BasicBlock>,
    edges: &[FlowEdge],
) -> Vec<u32> {
    let mut successors: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
    for edge in edges {
        successors.entry(edge.from).or_default().push(edge.to);
    }

    let mut order = Vec::with_capacity(blocks.len());
    let mut visited = BTreeSet::new();
    // Iterative post-order DFS; the second stack element marks whether the
    // node's successors were already expanded.
    let mut stack = vec![(entry, false)];
    while let Some((block, expanded)) = stack.pop() {
        if expanded {
            order.push(block);
            continue;
        }
        if !visited.insert(block) {
            continue;
        }
        stack.push((block, true));
        if let Some(succs) = successors.get(&block) {
            for &succ in succs.iter().rev() {
                if !visited.contains(&succ) {
                    stack.push((succ, false));
                }
            }
        }
    }
    order.reverse();
    order
}

fn non_exception_successor_counts(edges: &[FlowEdge]) -> BTreeMap<u32, usize> {
    let mut counts: BTreeMap<u32, usize> = BTreeMap::new();
    for edge in edges {
        if !edge.kind.is_exception() {
            *counts.entry(edge.from).or_default() += 1;
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{
        ControlFlowGraph, InstructionKind, MethodAccess, MethodNullness,
    };

    fn block(id: u32, kinds: Vec<InstructionKind>) -> BasicBlock {
        BasicBlock {
            id,
            instructions: kinds
                .into_iter()
                .enumerate()
                .map(|(index, kind)| Instruction {
                    offset: id * 100 + index as u32,
                    kind,
                })
                .collect(),
            is_exception_handler: false,
            catch_type: None,
            is_null_check: false,
        }
    }

    fn edge(from: u32, to: u32, kind: EdgeKind) -> FlowEdge {
        FlowEdge { from, to, kind }
    }

    fn method_with(num_locals: u16, cfg: ControlFlowGraph) -> Method {
        Method {
            name: "methodX".to_string(),
            descriptor: "()V".to_string(),
            access: MethodAccess {
                is_public: true,
                is_static: true,
                is_abstract: false,
            },
            nullness: MethodNullness::default(),
            num_locals,
            line_numbers: Vec::new(),
            cfg,
        }
    }

    fn run(method: &Method, vna: &ValueNumbering) -> AnalysisResult {
        let db = NullnessDatabase::default();
        NullnessAnalysis {
            method,
            nullness_db: &db,
            vna,
            track_value_numbers: true,
        }
        .run()
        .unwrap()
    }

    /// VNA facts for tests that only exercise frame propagation.
    fn empty_vna() -> ValueNumbering {
        ValueNumbering::default()
    }

    #[test]
    fn straight_line_null_store_reaches_the_exit() {
        let cfg = ControlFlowGraph {
            blocks: vec![
                block(
                    0,
                    vec![
                        InstructionKind::ConstNull,
                        InstructionKind::StoreLocal { index: 0 },
                    ],
                ),
                block(1, vec![InstructionKind::Return]),
            ],
            edges: vec![edge(0, 1, EdgeKind::FallThrough)],
            entry: 0,
        };
        let method = method_with(1, cfg);

        let result = run(&method, &empty_vna());

        let at_exit = &result.result_facts[&1];
        assert!(at_exit.is_valid());
        assert!(at_exit.local(0).unwrap().is_definitely_null());
    }

    #[test]
    fn branch_refinement_splits_null_and_non_null() {
        // Block 0: load a maybe-null local, ifnull.
        // Block 1 (fall through): value is non-null.
        // Block 2 (branch target): value is null.
        let mut vna = ValueNumbering::default();
        let local_vn = ValueNumber(1);
        vna.before.insert(
            Location { block: 0, offset: 2 },
            VnaFrame {
                slots: vec![local_vn, local_vn],
                ..VnaFrame::default()
            },
        );
        for target in [1_u32, 2] {
            vna.block_entry.insert(
                target,
                VnaFrame {
                    slots: vec![local_vn],
                    ..VnaFrame::default()
                },
            );
        }

        let comparison = BasicBlock {
            id: 0,
            instructions: vec![
                Instruction {
                    offset: 1,
                    kind: InstructionKind::LoadLocal { index: 0 },
                },
                Instruction {
                    offset: 2,
                    kind: InstructionKind::IfNull,
                },
            ],
            is_exception_handler: false,
            catch_type: None,
            is_null_check: false,
        };
        let cfg = ControlFlowGraph {
            blocks: vec![
                comparison,
                block(1, vec![InstructionKind::Return]),
                block(2, vec![InstructionKind::Return]),
            ],
            edges: vec![
                edge(0, 1, EdgeKind::FallThrough),
                edge(0, 2, EdgeKind::Branch),
            ],
            entry: 0,
        };
        let mut method = method_with(1, cfg);
        method.nullness.parameter_nullness = vec![Nullness::Nullable];

        let result = run(&method, &vna);

        let fall_through = &result.start_facts[&1];
        assert!(fall_through.local(0).unwrap().is_definitely_not_null());
        let branch = &result.start_facts[&2];
        assert!(branch.local(0).unwrap().is_definitely_null());
    }

    #[test]
    fn infeasible_edge_leaves_the_target_unreached() {
        // Block 0 pushes null and branches ifnull; the fall-through edge is
        // infeasible so block 1 keeps a Top start fact.
        let cfg = ControlFlowGraph {
            blocks: vec![
                block(
                    0,
                    vec![InstructionKind::ConstNull, InstructionKind::IfNull],
                ),
                block(1, vec![InstructionKind::Return]),
                block(2, vec![InstructionKind::Return]),
            ],
            edges: vec![
                edge(0, 1, EdgeKind::FallThrough),
                edge(0, 2, EdgeKind::Branch),
            ],
            entry: 0,
        };
        let method = method_with(0, cfg);

        let result = run(&method, &empty_vna());

        assert!(result.start_facts[&1].is_top());
        assert!(result.start_facts[&2].is_valid());
        assert!(result.decisions[&0].is_redundant());
    }

    #[test]
    fn exception_handler_entry_gets_a_clean_stack_and_exception_values() {
        let mut handler = block(1, vec![InstructionKind::Return]);
        handler.is_exception_handler = true;
        handler.catch_type = Some("java.lang.Exception".to_string());

        let cfg = ControlFlowGraph {
            blocks: vec![
                block(
                    0,
                    vec![
                        InstructionKind::ConstNull,
                        InstructionKind::StoreLocal { index: 0 },
                        InstructionKind::ConstNull,
                        InstructionKind::Return,
                    ],
                ),
                handler,
            ],
            edges: vec![edge(0, 1, EdgeKind::Exception)],
            entry: 0,
        };
        let method = method_with(1, cfg);

        let result = run(&method, &empty_vna());

        let at_handler = &result.start_facts[&1];
        assert!(at_handler.is_valid());
        // Operand stack was cleared, then the exception object pushed.
        assert_eq!(at_handler.stack_depth(), 1);
        assert!(at_handler.top_value().unwrap().is_definitely_not_null());
        // The null local survives, flagged as exceptional.
        assert!(at_handler.local(0).unwrap().is_definitely_null());
        assert!(at_handler.local(0).unwrap().is_exception());
    }

    #[test]
    fn recoverable_exception_handler_demotes_null_values() {
        let mut handler = block(1, vec![InstructionKind::Return]);
        handler.is_exception_handler = true;
        handler.catch_type = Some("java.lang.InterruptedException".to_string());

        let cfg = ControlFlowGraph {
            blocks: vec![
                block(
                    0,
                    vec![
                        InstructionKind::ConstNull,
                        InstructionKind::StoreLocal { index: 0 },
                        InstructionKind::Return,
                    ],
                ),
                handler,
            ],
            edges: vec![edge(0, 1, EdgeKind::Exception)],
            entry: 0,
        };
        let method = method_with(1, cfg);

        let result = run(&method, &empty_vna());

        let at_handler = &result.start_facts[&1];
        let local = at_handler.local(0).unwrap();
        assert!(!local.is_definitely_null());
        assert!(!local.might_be_null());
    }

    #[test]
    fn null_check_fall_through_marks_the_value_no_kaboom() {
        // Block 0 is a synthetic null-check guard; block 1 dereferences the
        // checked local via arraylength.
        let local_vn = ValueNumber(4);
        let mut vna = ValueNumbering::default();
        vna.block_entry.insert(
            1,
            VnaFrame {
                slots: vec![local_vn, local_vn],
                ..VnaFrame::default()
            },
        );

        let mut guard = block(0, vec![InstructionKind::LoadLocal { index: 0 }]);
        guard.is_null_check = true;
        let cfg = ControlFlowGraph {
            blocks: vec![
                guard,
                block(
                    1,
                    vec![InstructionKind::ArrayLength, InstructionKind::Return],
                ),
            ],
            edges: vec![edge(0, 1, EdgeKind::FallThrough)],
            entry: 0,
        };
        let mut method = method_with(1, cfg);
        method.nullness.parameter_nullness = vec![Nullness::Nullable];

        let result = run(&method, &vna);

        let at_deref = &result.start_facts[&1];
        let value = at_deref.local(0).unwrap();
        assert!(value.is_definitely_not_null());
        assert_eq!(
            value.kaboom_location(),
            Some(Location {
                block: 1,
                offset: 100,
            })
        );
    }

    #[test]
    fn loop_with_a_merge_converges() {
        let cfg = ControlFlowGraph {
            blocks: vec![
                block(
                    0,
                    vec![
                        InstructionKind::ConstNull,
                        InstructionKind::StoreLocal { index: 0 },
                    ],
                ),
                block(
                    1,
                    vec![
                        InstructionKind::Const,
                        InstructionKind::StoreLocal { index: 0 },
                        InstructionKind::Const,
                        InstructionKind::IfZero,
                    ],
                ),
                block(2, vec![InstructionKind::Return]),
            ],
            edges: vec![
                edge(0, 1, EdgeKind::FallThrough),
                edge(1, 1, EdgeKind::Branch),
                edge(1, 2, EdgeKind::FallThrough),
            ],
            entry: 0,
        };
        let method = method_with(1, cfg);

        let result = run(&method, &empty_vna());

        assert!(result.iterations <= 4);
        assert!(result.result_facts[&2].local(0).unwrap().is_definitely_not_null());
    }

    #[test]
    fn loop_back_edge_replaces_a_stale_redundant_decision() {
        // The first sweep sees the tested local as definitely null and
        // records a redundant decision; the loop body's store then flows
        // around the back edge and degrades the value to null-on-some-path.
        // The converged decision must reflect the final sweep.
        let cfg = ControlFlowGraph {
            blocks: vec![
                block(
                    0,
                    vec![
                        InstructionKind::ConstNull,
                        InstructionKind::StoreLocal { index: 0 },
                    ],
                ),
                block(
                    1,
                    vec![
                        InstructionKind::LoadLocal { index: 0 },
                        InstructionKind::IfNull,
                    ],
                ),
                block(
                    2,
                    vec![
                        InstructionKind::Const,
                        InstructionKind::StoreLocal { index: 0 },
                    ],
                ),
                block(3, vec![InstructionKind::Return]),
            ],
            edges: vec![
                edge(0, 1, EdgeKind::FallThrough),
                edge(1, 2, EdgeKind::Branch),
                edge(1, 3, EdgeKind::FallThrough),
                edge(2, 1, EdgeKind::FallThrough),
            ],
            entry: 0,
        };
        let method = method_with(1, cfg);

        let result = run(&method, &empty_vna());

        assert!(result.iterations >= 2);
        assert!(!result.decisions[&1].is_redundant());
        assert!(
            result.start_facts[&3]
                .local(0)
                .unwrap()
                .is_null_on_some_path()
        );
    }

    #[test]
    fn each_location_replays_the_frame_before_every_instruction() {
        let cfg = ControlFlowGraph {
            blocks: vec![block(
                0,
                vec![InstructionKind::ConstNull, InstructionKind::Return],
            )],
            edges: Vec::new(),
            entry: 0,
        };
        let method = method_with(0, cfg);
        let vna = empty_vna();
        let db = NullnessDatabase::default();
        let analysis = NullnessAnalysis {
            method: &method,
            nullness_db: &db,
            vna: &vna,
            track_value_numbers: true,
        };
        let result = analysis.run().unwrap();

        let mut depths = Vec::new();
        analysis
            .each_location(&result, |_, _, _, frame| {
                depths.push(frame.stack_depth());
                Ok(())
            })
            .unwrap();
        assert_eq!(depths, vec![0, 1]);
    }
}
