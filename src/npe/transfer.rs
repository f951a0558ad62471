use std::collections::BTreeSet;

use anyhow::{Context, Result, bail};

use crate::db::NullnessDatabase;
use crate::ir::{
    BasicBlock, CallKind, CallSite, FieldRef, Instruction, InstructionKind, Location, Nullness,
};
use crate::npe::frame::Frame;
use crate::npe::lattice::IsNullValue;
use crate::vna::{ValueNumber, ValueNumbering};

/// Program point and value number at which a value was observed to become
/// null (or possibly null). Consumed by the reporting pass for evidence.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) struct NullSource {
    pub(crate) location: Location,
    pub(crate) value: ValueNumber,
}

/// Frames captured while transferring a block, needed afterwards by the
/// decision engine: the values just before the final instruction, and just
/// before an `instanceof` when the block contains one.
#[derive(Debug, Default)]
pub(crate) struct BlockOutcome {
    pub(crate) last_frame: Option<Frame>,
    pub(crate) instance_of_frame: Option<Frame>,
}

/// Symbolic executor for one basic block.
pub(crate) struct BlockTransfer<'a> {
    pub(crate) nullness_db: &'a NullnessDatabase,
    pub(crate) vna: &'a ValueNumbering,
}

/// Stack production of one instruction: how many top slots it (re)wrote,
/// and whether the top produced slot is a freshly null-or-nullable value.
struct Produced {
    count: usize,
    new_null: bool,
}

impl Produced {
    fn none() -> Self {
        Produced {
            count: 0,
            new_null: false,
        }
    }

    fn slots(count: usize) -> Self {
        Produced {
            count,
            new_null: false,
        }
    }

    fn fresh_null(count: usize) -> Self {
        Produced {
            count,
            new_null: true,
        }
    }
}

impl BlockTransfer<'_> {
    /// Runs the transfer function over every instruction of `block`,
    /// mutating `frame` in place. Invalid frames pass through untouched.
    pub(crate) fn transfer_block(
        &self,
        block: &BasicBlock,
        frame: &mut Frame,
        null_sources: &mut BTreeSet<NullSource>,
    ) -> Result<BlockOutcome> {
        let mut outcome = BlockOutcome::default();
        if !frame.is_valid() {
            return Ok(outcome);
        }

        let count = block.instructions.len();
        for (index, instruction) in block.instructions.iter().enumerate() {
            // The decision engine needs the values as they were immediately
            // before the comparison, so capture them before modeling.
            if index + 1 == count {
                outcome.last_frame = Some(frame.clone());
            }
            if matches!(instruction.kind, InstructionKind::InstanceOf) {
                outcome.instance_of_frame = Some(frame.clone());
            }

            self.step(block, instruction, frame, null_sources)?;
        }

        // Facts keyed by value numbers whose defining load died inside this
        // block must not flow out of it.
        if let Some(vna_exit) = self
            .vna
            .exit_fact(block.id)
            .or_else(|| block.last_instruction().and_then(|last| {
                self.vna.fact_after(Location {
                    block: block.id,
                    offset: last.offset,
                })
            }))
        {
            frame.clean_stale_knowledge(vna_exit);
        }

        Ok(outcome)
    }

    /// Models a single instruction: its stack effect, value-number
    /// knowledge for what it produced, and alias reconciliation.
    pub(crate) fn step(
        &self,
        block: &BasicBlock,
        instruction: &Instruction,
        frame: &mut Frame,
        null_sources: &mut BTreeSet<NullSource>,
    ) -> Result<()> {
        let location = Location {
            block: block.id,
            offset: instruction.offset,
        };
        let produced = self
            .execute(&instruction.kind, frame)
            .with_context(|| format!("at block {} offset {}", block.id, instruction.offset))?;
        self.reconcile_aliases(frame, location, &produced, null_sources);
        Ok(())
    }

    /// Applies value-number knowledge to freshly produced slots, mirrors the
    /// new information onto aliasing slots, and records fresh null values.
    fn reconcile_aliases(
        &self,
        frame: &mut Frame,
        location: Location,
        produced: &Produced,
        null_sources: &mut BTreeSet<NullSource>,
    ) {
        let Some(vna_after) = self.vna.fact_after(location) else {
            return;
        };
        let num_slots = frame.num_slots().min(vna_after.num_slots());
        let start = num_slots.saturating_sub(produced.count);

        // A reload of an already-refined value gets the refined fact, not
        // the declared one.
        for slot in start..num_slots {
            if let Some(value_number) = vna_after.value(slot)
                && let Some(known) = frame.known_value(value_number).cloned()
            {
                frame.set_value(slot, known);
            }
        }

        // The produced value may alias slots produced earlier; keep every
        // copy consistent with the newest information.
        for slot in start..num_slots {
            let Some(value_number) = vna_after.value(slot) else {
                continue;
            };
            let Some(value) = frame.value(slot).cloned() else {
                continue;
            };
            for other in 0..start {
                if vna_after.value(other) == Some(value_number) {
                    frame.set_value(other, value.clone());
                }
            }
        }

        if produced.new_null
            && num_slots > 0
            && let Some(value_number) = vna_after.value(num_slots - 1)
        {
            null_sources.insert(NullSource {
                location,
                value: value_number,
            });
        }
    }

    fn execute(&self, kind: &InstructionKind, frame: &mut Frame) -> Result<Produced> {
        use InstructionKind::*;
        match kind {
            ConstNull => {
                frame.push(IsNullValue::null());
                Ok(Produced::fresh_null(1))
            }
            // String, class, and numeric literals are never null.
            Const => {
                frame.push(IsNullValue::non_null());
                Ok(Produced::slots(1))
            }
            LoadLocal { index } => {
                let value = frame.local(*index as usize)?.clone();
                frame.push(value);
                Ok(Produced::slots(1))
            }
            StoreLocal { index } => {
                let value = frame.pop()?;
                frame.set_local(*index as usize, value)?;
                Ok(Produced::none())
            }
            GetField { field } => {
                frame.pop()?;
                Ok(self.push_field_value(frame, field))
            }
            GetStatic { field } => Ok(self.push_field_value(frame, field)),
            PutField { .. } => {
                frame.pop_many(2)?;
                Ok(Produced::none())
            }
            PutStatic { .. } => {
                frame.pop()?;
                Ok(Produced::none())
            }
            ArrayLoad { .. } => {
                frame.pop_many(2)?;
                // Nothing is known about element contents.
                frame.push(IsNullValue::non_reporting_non_null());
                Ok(Produced::slots(1))
            }
            ArrayStore => {
                frame.pop_many(3)?;
                Ok(Produced::none())
            }
            ArrayLength => {
                frame.pop()?;
                frame.push(IsNullValue::non_reporting_non_null());
                Ok(Produced::slots(1))
            }
            New => {
                frame.push(IsNullValue::non_null());
                Ok(Produced::slots(1))
            }
            NewArray { dimensions } => {
                frame.pop_many(*dimensions as usize)?;
                frame.push(IsNullValue::non_null());
                Ok(Produced::slots(1))
            }
            // A succeeding cast preserves the reference unchanged.
            CheckCast => {
                let value = frame.pop()?;
                frame.push(value);
                Ok(Produced::slots(1))
            }
            InstanceOf => {
                frame.pop()?;
                frame.push(IsNullValue::non_reporting_non_null());
                Ok(Produced::slots(1))
            }
            Invoke(call) => self.execute_invoke(call, frame),
            MonitorEnter | MonitorExit => {
                frame.pop()?;
                Ok(Produced::none())
            }
            Throw => {
                frame.pop()?;
                Ok(Produced::none())
            }
            Return => Ok(Produced::none()),
            ReturnValue => {
                frame.pop()?;
                Ok(Produced::none())
            }
            IfNull | IfNonNull | IfZero | IfNonZero | Switch => {
                frame.pop()?;
                Ok(Produced::none())
            }
            IfAcmpEq | IfAcmpNe => {
                frame.pop_many(2)?;
                Ok(Produced::none())
            }
            IfCmp { pops } => {
                frame.pop_many(*pops as usize)?;
                Ok(Produced::none())
            }
            Goto => Ok(Produced::none()),
            Dup => {
                let value = frame.top_value()?.clone();
                frame.push(value);
                // Both copies count as produced so aliasing covers them.
                Ok(Produced::slots(2))
            }
            Pop { count } => {
                frame.pop_many(*count as usize)?;
                Ok(Produced::none())
            }
            Swap => {
                let top = frame.pop()?;
                let next = frame.pop()?;
                frame.push(top);
                frame.push(next);
                Ok(Produced::slots(2))
            }
            Primitive { pops, pushes } => {
                frame.pop_many(*pops as usize)?;
                for _ in 0..*pushes {
                    frame.push(IsNullValue::non_reporting_non_null());
                }
                Ok(Produced::slots(*pushes as usize))
            }
            Unsupported { opcode } => {
                bail!("unpredictable stack effect for opcode {opcode}")
            }
        }
    }

    fn push_field_value(&self, frame: &mut Frame, field: &FieldRef) -> Produced {
        if !field.reference_type {
            frame.push(IsNullValue::non_reporting_non_null());
            return Produced::slots(1);
        }
        match field.nullness {
            Nullness::NonNull => {
                frame.push(IsNullValue::non_null());
                Produced::slots(1)
            }
            Nullness::Nullable => {
                frame.push(IsNullValue::null_on_some_path());
                Produced::fresh_null(1)
            }
            Nullness::Unknown => {
                frame.push(IsNullValue::non_reporting_non_null());
                Produced::slots(1)
            }
        }
    }

    fn execute_invoke(&self, call: &CallSite, frame: &mut Frame) -> Result<Produced> {
        frame.pop_many(call.arg_slots as usize)?;
        if call.kind != CallKind::Static {
            frame.pop()?;
        }
        if !call.returns_value {
            return Ok(Produced::none());
        }
        if !call.returns_reference {
            frame.push(IsNullValue::non_reporting_non_null());
            return Ok(Produced::slots(1));
        }
        match self.nullness_db.return_nullness(&call.target()) {
            Nullness::NonNull => {
                frame.push(IsNullValue::non_null());
                Ok(Produced::slots(1))
            }
            Nullness::Nullable => {
                frame.push(IsNullValue::null_on_some_path());
                Ok(Produced::fresh_null(1))
            }
            Nullness::Unknown => {
                frame.push(IsNullValue::non_reporting_non_null());
                Ok(Produced::slots(1))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{MethodId, MethodNullness};
    use crate::vna::VnaFrame;

    fn block(kinds: Vec<InstructionKind>) -> BasicBlock {
        BasicBlock {
            id: 0,
            instructions: kinds
                .into_iter()
                .enumerate()
                .map(|(index, kind)| Instruction {
                    offset: index as u32,
                    kind,
                })
                .collect(),
            is_exception_handler: false,
            catch_type: None,
            is_null_check: false,
        }
    }

    fn transfer<'a>(
        nullness_db: &'a NullnessDatabase,
        vna: &'a ValueNumbering,
    ) -> BlockTransfer<'a> {
        BlockTransfer { nullness_db, vna }
    }

    #[test]
    fn const_null_pushes_a_definitely_null_value() {
        let db = NullnessDatabase::default();
        let vna = ValueNumbering::default();
        let block = block(vec![InstructionKind::ConstNull]);
        let mut frame = Frame::entry(0, true, IsNullValue::non_null());
        let mut sources = BTreeSet::new();

        transfer(&db, &vna)
            .transfer_block(&block, &mut frame, &mut sources)
            .unwrap();

        assert!(frame.top_value().unwrap().is_definitely_null());
    }

    #[test]
    fn null_source_is_recorded_with_its_value_number() {
        let db = NullnessDatabase::default();
        let mut vna = ValueNumbering::default();
        vna.after.insert(
            Location { block: 0, offset: 0 },
            VnaFrame {
                slots: vec![ValueNumber(11)],
                ..VnaFrame::default()
            },
        );
        let block = block(vec![InstructionKind::ConstNull]);
        let mut frame = Frame::entry(0, true, IsNullValue::non_null());
        let mut sources = BTreeSet::new();

        transfer(&db, &vna)
            .transfer_block(&block, &mut frame, &mut sources)
            .unwrap();

        assert_eq!(
            sources.into_iter().collect::<Vec<_>>(),
            vec![NullSource {
                location: Location { block: 0, offset: 0 },
                value: ValueNumber(11),
            }]
        );
    }

    #[test]
    fn store_and_reload_round_trips_through_a_local() {
        let db = NullnessDatabase::default();
        let vna = ValueNumbering::default();
        let block = block(vec![
            InstructionKind::ConstNull,
            InstructionKind::StoreLocal { index: 0 },
            InstructionKind::LoadLocal { index: 0 },
        ]);
        let mut frame = Frame::entry(1, true, IsNullValue::non_null());
        let mut sources = BTreeSet::new();

        transfer(&db, &vna)
            .transfer_block(&block, &mut frame, &mut sources)
            .unwrap();

        assert!(frame.top_value().unwrap().is_definitely_null());
        assert!(frame.local(0).unwrap().is_definitely_null());
    }

    #[test]
    fn nullable_return_value_is_null_on_some_path() {
        let target = MethodId {
            class_name: "com/example/ClassA".to_string(),
            name: "find".to_string(),
            descriptor: "()Ljava/lang/Object;".to_string(),
        };
        let mut db = NullnessDatabase::default();
        db.methods.insert(
            target.clone(),
            MethodNullness {
                return_nullness: Nullness::Nullable,
                parameter_nullness: Vec::new(),
            },
        );
        let vna = ValueNumbering::default();
        let block = block(vec![InstructionKind::Invoke(CallSite {
            owner: target.class_name.clone(),
            name: target.name.clone(),
            descriptor: target.descriptor.clone(),
            kind: CallKind::Static,
            arg_slots: 0,
            returns_reference: true,
            returns_value: true,
        })]);
        let mut frame = Frame::entry(0, true, IsNullValue::non_null());
        let mut sources = BTreeSet::new();

        transfer(&db, &vna)
            .transfer_block(&block, &mut frame, &mut sources)
            .unwrap();

        assert!(frame.top_value().unwrap().is_null_on_some_path());
    }

    #[test]
    fn reload_of_a_refined_value_keeps_the_refined_fact() {
        let db = NullnessDatabase::default();
        let mut vna = ValueNumbering::default();
        vna.after.insert(
            Location { block: 0, offset: 0 },
            VnaFrame {
                slots: vec![ValueNumber(3), ValueNumber(3)],
                ..VnaFrame::default()
            },
        );
        let block = block(vec![InstructionKind::LoadLocal { index: 0 }]);
        let mut frame = Frame::entry(1, true, IsNullValue::non_reporting_non_null());
        frame.set_known_value(ValueNumber(3), IsNullValue::checked_non_null());
        let mut sources = BTreeSet::new();

        transfer(&db, &vna)
            .transfer_block(&block, &mut frame, &mut sources)
            .unwrap();

        assert!(frame.top_value().unwrap().is_checked());
        assert!(frame.top_value().unwrap().is_definitely_not_null());
    }

    #[test]
    fn alias_slots_are_kept_consistent() {
        let db = NullnessDatabase::default();
        let mut vna = ValueNumbering::default();
        // Local slot 0 and the pushed slot share a value number.
        vna.after.insert(
            Location { block: 0, offset: 0 },
            VnaFrame {
                slots: vec![ValueNumber(3), ValueNumber(3)],
                ..VnaFrame::default()
            },
        );
        vna.after.insert(
            Location { block: 0, offset: 1 },
            VnaFrame {
                slots: vec![ValueNumber(3)],
                ..VnaFrame::default()
            },
        );
        // The null-check fall-through pattern: the loaded copy got refined
        // elsewhere, reloading must not resurrect stale information, but a
        // fresh load aliasing the local updates the local's fact.
        let block = block(vec![InstructionKind::LoadLocal { index: 0 }]);
        let mut frame = Frame::entry(1, true, IsNullValue::null_on_some_path());
        let mut sources = BTreeSet::new();

        transfer(&db, &vna)
            .transfer_block(&block, &mut frame, &mut sources)
            .unwrap();

        // Pushed copy mirrors the local; both carry the same fact.
        assert_eq!(frame.value(0), frame.value(1));
    }

    #[test]
    fn unsupported_opcode_is_a_transfer_error() {
        let db = NullnessDatabase::default();
        let vna = ValueNumbering::default();
        let block = block(vec![InstructionKind::Unsupported { opcode: 0xc9 }]);
        let mut frame = Frame::entry(0, true, IsNullValue::non_null());
        let mut sources = BTreeSet::new();

        let result = transfer(&db, &vna).transfer_block(&block, &mut frame, &mut sources);
        assert!(result.is_err());
    }

    #[test]
    fn invalid_frames_pass_through_untouched() {
        let db = NullnessDatabase::default();
        let vna = ValueNumbering::default();
        let block = block(vec![InstructionKind::ConstNull]);
        let mut frame = Frame::top(0, true);
        let mut sources = BTreeSet::new();

        let outcome = transfer(&db, &vna)
            .transfer_block(&block, &mut frame, &mut sources)
            .unwrap();

        assert!(frame.is_top());
        assert!(outcome.last_frame.is_none());
    }

    #[test]
    fn last_frame_is_captured_before_the_final_instruction() {
        let db = NullnessDatabase::default();
        let vna = ValueNumbering::default();
        let block = block(vec![InstructionKind::ConstNull, InstructionKind::IfNull]);
        let mut frame = Frame::entry(0, true, IsNullValue::non_null());
        let mut sources = BTreeSet::new();

        let outcome = transfer(&db, &vna)
            .transfer_block(&block, &mut frame, &mut sources)
            .unwrap();

        let last_frame = outcome.last_frame.unwrap();
        assert!(last_frame.top_value().unwrap().is_definitely_null());
        // The branch popped its operand from the flowing frame.
        assert_eq!(frame.stack_depth(), 0);
    }
}
