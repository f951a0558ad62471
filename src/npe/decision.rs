use anyhow::Result;

use crate::ir::{BasicBlock, EdgeKind, InstructionKind, Location};
use crate::npe::frame::Frame;
use crate::npe::lattice::IsNullValue;
use crate::vna::{ValueNumber, ValueNumbering};

/// Nullness information gained from a comparison at the end of a basic
/// block. A `None` implied value marks the corresponding out-edge as
/// infeasible.
#[derive(Clone, Debug)]
pub(crate) struct Decision {
    tested: Option<ValueNumber>,
    on_branch: Option<IsNullValue>,
    on_fall_through: Option<IsNullValue>,
}

impl Decision {
    pub(crate) fn tested(&self) -> Option<ValueNumber> {
        self.tested
    }

    /// Value implied for the tested value number along the given edge.
    /// Only branch and fall-through edges carry a decision.
    pub(crate) fn value_for_edge(&self, kind: EdgeKind) -> Option<&IsNullValue> {
        match kind {
            EdgeKind::Branch => self.on_branch.as_ref(),
            EdgeKind::FallThrough => self.on_fall_through.as_ref(),
            _ => None,
        }
    }

    pub(crate) fn applies_to(&self, kind: EdgeKind) -> bool {
        matches!(kind, EdgeKind::Branch | EdgeKind::FallThrough)
    }

    pub(crate) fn is_edge_feasible(&self, kind: EdgeKind) -> bool {
        !self.applies_to(kind) || self.value_for_edge(kind).is_some()
    }

    /// True when the comparison outcome was already determined, i.e. one of
    /// the two out-edges is infeasible.
    pub(crate) fn is_redundant(&self) -> bool {
        self.on_branch.is_none() || self.on_fall_through.is_none()
    }
}

/// Computes the nullness decision for a block ending in a recognized
/// comparison shape, or `None` when no information is gained.
///
/// `last_frame` holds the values just before the block's final instruction;
/// `instance_of_frame` holds the values just before an `instanceof` in the
/// same block, when one precedes the final branch.
pub(crate) fn compute_decision(
    block: &BasicBlock,
    last_frame: &Frame,
    instance_of_frame: Option<&Frame>,
    vna: &ValueNumbering,
) -> Result<Option<Decision>> {
    let Some(last) = block.last_instruction() else {
        return Ok(None);
    };
    if !last_frame.is_valid() {
        return Ok(None);
    }

    match &last.kind {
        InstructionKind::IfZero | InstructionKind::IfNonZero => {
            instance_of_comparison(block, instance_of_frame, vna)
        }
        InstructionKind::IfNull | InstructionKind::IfNonNull => {
            let tested = tested_at(block, last.offset, 0, vna);
            let tos = last_frame.top_value()?;
            let ifnull = matches!(last.kind, InstructionKind::IfNull);

            let (on_branch, on_fall_through) = if tos.is_definitely_null() {
                // Predetermined comparison, one branch is infeasible.
                if ifnull {
                    (Some(IsNullValue::checked_null()), None)
                } else {
                    (None, Some(IsNullValue::checked_null()))
                }
            } else if tos.is_definitely_not_null() {
                if ifnull {
                    (None, Some(IsNullValue::checked_non_null()))
                } else {
                    (Some(IsNullValue::checked_non_null()), None)
                }
            } else if ifnull {
                (
                    Some(IsNullValue::checked_null()),
                    Some(IsNullValue::checked_non_null()),
                )
            } else {
                (
                    Some(IsNullValue::checked_non_null()),
                    Some(IsNullValue::checked_null()),
                )
            };
            Ok(Some(Decision {
                tested,
                on_branch,
                on_fall_through,
            }))
        }
        InstructionKind::IfAcmpEq | InstructionKind::IfAcmpNe => {
            acmp_comparison(block, last.offset, last_frame, vna)
        }
        _ => Ok(None),
    }
}

/// `instanceof` followed by `ifeq`/`ifne`: the fall-through (or branch,
/// depending on polarity) side proves the checked value is an instance and
/// therefore not null.
fn instance_of_comparison(
    block: &BasicBlock,
    instance_of_frame: Option<&Frame>,
    vna: &ValueNumbering,
) -> Result<Option<Decision>> {
    let count = block.instructions.len();
    if count < 2 {
        return Ok(None);
    }
    let prev = &block.instructions[count - 2];
    if !matches!(prev.kind, InstructionKind::InstanceOf) {
        return Ok(None);
    }
    let Some(instance_of_frame) = instance_of_frame else {
        return Ok(None);
    };
    if !instance_of_frame.is_valid() {
        return Ok(None);
    }

    let tos = instance_of_frame.top_value()?;
    // `ifeq` branches when the instanceof result is zero, which includes
    // the null case.
    let branch_means_not_instance = matches!(
        block.last_instruction().map(|i| &i.kind),
        Some(InstructionKind::IfZero)
    );
    let tested = tested_at(block, prev.offset, 0, vna);

    let (on_branch, on_fall_through) = if tos.is_definitely_null() {
        if branch_means_not_instance {
            (Some(tos.clone()), None)
        } else {
            (None, Some(tos.clone()))
        }
    } else if tos.is_definitely_not_null() {
        return Ok(None);
    } else if branch_means_not_instance {
        (Some(tos.clone()), Some(IsNullValue::checked_non_null()))
    } else {
        (Some(IsNullValue::checked_non_null()), Some(tos.clone()))
    };

    Ok(Some(Decision {
        tested,
        on_branch,
        on_fall_through,
    }))
}

/// Reference equality comparison of the two top stack values.
fn acmp_comparison(
    block: &BasicBlock,
    offset: u32,
    last_frame: &Frame,
    vna: &ValueNumbering,
) -> Result<Option<Decision>> {
    let tos = last_frame.stack_value(0)?;
    let next_to_tos = last_frame.stack_value(1)?;
    let cmpeq = matches!(
        block.last_instruction().map(|i| &i.kind),
        Some(InstructionKind::IfAcmpEq)
    );

    let tos_null = tos.is_definitely_null();
    let next_null = next_to_tos.is_definitely_null();

    let (tested, on_branch, on_fall_through) = if tos_null && next_null {
        // Both sides are null: one branch is infeasible, but there is no
        // value to refine.
        if cmpeq {
            (None, Some(IsNullValue::checked_null()), None)
        } else {
            (None, None, Some(IsNullValue::checked_null()))
        }
    } else if tos_null || next_null {
        // Comparison against a known null tells us about the other value
        // on both branches.
        let depth = if tos_null { 1 } else { 0 };
        let tested = tested_at(block, offset, depth, vna);
        if cmpeq {
            (
                tested,
                Some(IsNullValue::checked_null()),
                Some(IsNullValue::checked_non_null()),
            )
        } else {
            (
                tested,
                Some(IsNullValue::checked_non_null()),
                Some(IsNullValue::checked_null()),
            )
        }
    } else if tos.is_definitely_not_null() && !next_to_tos.is_definitely_not_null() {
        // Equality with a known non-null value proves the other side
        // non-null on the equal branch.
        let tested = tested_at(block, offset, 1, vna);
        if cmpeq {
            (tested, Some(tos.clone()), Some(next_to_tos.clone()))
        } else {
            (tested, Some(next_to_tos.clone()), Some(tos.clone()))
        }
    } else if !tos.is_definitely_not_null() && next_to_tos.is_definitely_not_null() {
        let tested = tested_at(block, offset, 0, vna);
        if cmpeq {
            (tested, Some(next_to_tos.clone()), Some(tos.clone()))
        } else {
            (tested, Some(tos.clone()), Some(next_to_tos.clone()))
        }
    } else {
        return Ok(None);
    };

    Ok(Some(Decision {
        tested,
        on_branch,
        on_fall_through,
    }))
}

fn tested_at(
    block: &BasicBlock,
    offset: u32,
    stack_depth: usize,
    vna: &ValueNumbering,
) -> Option<ValueNumber> {
    vna.fact_before(Location {
        block: block.id,
        offset,
    })
    .and_then(|frame| frame.stack_value(stack_depth))
}
