use std::collections::BTreeMap;

use anyhow::{Result, bail};

use crate::npe::lattice::IsNullValue;
use crate::vna::{ValueNumber, VnaFrame};

/// Lattice position of a whole frame. `Top` is the merge identity and marks
/// unreached (or proven-infeasible) program points; `Bottom` marks points
/// where the analysis lost track of the stack shape.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum FrameState {
    Top,
    Valid,
    Bottom,
}

/// Abstract machine frame: one [`IsNullValue`] per local slot and operand
/// stack slot, plus knowledge keyed by value number so branch refinements
/// reach every alias of the tested value.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Frame {
    state: FrameState,
    num_locals: usize,
    /// Locals prefix followed by the operand stack, bottom to top.
    slots: Vec<IsNullValue>,
    known_values: BTreeMap<ValueNumber, IsNullValue>,
    track_value_numbers: bool,
}

impl Frame {
    pub(crate) fn top(num_locals: usize, track_value_numbers: bool) -> Self {
        Self {
            state: FrameState::Top,
            num_locals,
            slots: Vec::new(),
            known_values: BTreeMap::new(),
            track_value_numbers,
        }
    }

    /// Valid frame with every local set to the given value and an empty
    /// operand stack.
    pub(crate) fn entry(num_locals: usize, track_value_numbers: bool, fill: IsNullValue) -> Self {
        Self {
            state: FrameState::Valid,
            num_locals,
            slots: vec![fill; num_locals],
            known_values: BTreeMap::new(),
            track_value_numbers,
        }
    }

    pub(crate) fn is_top(&self) -> bool {
        self.state == FrameState::Top
    }

    pub(crate) fn is_bottom(&self) -> bool {
        self.state == FrameState::Bottom
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.state == FrameState::Valid
    }

    pub(crate) fn set_top(&mut self) {
        self.state = FrameState::Top;
        self.slots.clear();
        self.known_values.clear();
    }

    pub(crate) fn set_bottom(&mut self) {
        self.state = FrameState::Bottom;
        self.slots.clear();
        self.known_values.clear();
    }

    pub(crate) fn num_slots(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn stack_depth(&self) -> usize {
        self.slots.len().saturating_sub(self.num_locals)
    }

    pub(crate) fn push(&mut self, value: IsNullValue) {
        self.slots.push(value);
    }

    pub(crate) fn pop(&mut self) -> Result<IsNullValue> {
        if self.stack_depth() == 0 {
            bail!("operand stack underflow");
        }
        Ok(self.slots.pop().unwrap_or_else(IsNullValue::non_null))
    }

    pub(crate) fn pop_many(&mut self, count: usize) -> Result<()> {
        for _ in 0..count {
            self.pop()?;
        }
        Ok(())
    }

    /// Value at the given depth from the top of the operand stack.
    pub(crate) fn stack_value(&self, depth: usize) -> Result<&IsNullValue> {
        if depth >= self.stack_depth() {
            bail!(
                "stack depth {depth} out of range (stack has {} entries)",
                self.stack_depth()
            );
        }
        Ok(&self.slots[self.slots.len() - 1 - depth])
    }

    pub(crate) fn top_value(&self) -> Result<&IsNullValue> {
        self.stack_value(0)
    }

    pub(crate) fn value(&self, slot: usize) -> Option<&IsNullValue> {
        self.slots.get(slot)
    }

    pub(crate) fn set_value(&mut self, slot: usize, value: IsNullValue) {
        if let Some(entry) = self.slots.get_mut(slot) {
            *entry = value;
        }
    }

    pub(crate) fn local(&self, index: usize) -> Result<&IsNullValue> {
        match self.slots.get(index) {
            Some(value) if index < self.num_locals => Ok(value),
            _ => bail!("local slot {index} out of range"),
        }
    }

    pub(crate) fn set_local(&mut self, index: usize, value: IsNullValue) -> Result<()> {
        if index >= self.num_locals {
            bail!("local slot {index} out of range");
        }
        self.slots[index] = value;
        Ok(())
    }

    pub(crate) fn clear_stack(&mut self) {
        self.slots.truncate(self.num_locals);
    }

    pub(crate) fn known_value(&self, value_number: ValueNumber) -> Option<&IsNullValue> {
        if !self.track_value_numbers {
            return None;
        }
        self.known_values.get(&value_number)
    }

    pub(crate) fn known_value_numbers(&self) -> Vec<ValueNumber> {
        self.known_values.keys().copied().collect()
    }

    pub(crate) fn set_known_value(&mut self, value_number: ValueNumber, value: IsNullValue) {
        if self.track_value_numbers {
            self.known_values.insert(value_number, value);
        }
    }

    /// Carries knowledge across a redundant load: the load pushed a fresh
    /// value number for a value we already know something about.
    pub(crate) fn use_new_value_number_for_load(
        &mut self,
        old: ValueNumber,
        new: ValueNumber,
    ) {
        if let Some(value) = self.known_value(old).cloned() {
            self.set_known_value(new, value);
        }
    }

    /// Drops knowledge about value numbers whose defining load is no longer
    /// available, so stale facts cannot leak across a field update.
    pub(crate) fn clean_stale_knowledge(&mut self, vna_after: &VnaFrame) {
        if !self.track_value_numbers {
            return;
        }
        self.known_values
            .retain(|value_number, _| vna_after.has_load_for(*value_number));
    }

    /// Marks every value in the frame as arising on an exception path.
    pub(crate) fn to_exception_values(&mut self) {
        for slot in &mut self.slots {
            *slot = slot.to_exception_path();
        }
        for value in self.known_values.values_mut() {
            *value = value.to_exception_path();
        }
    }

    /// Applies the control-split downgrade to every slot.
    pub(crate) fn downgrade_on_control_split(&mut self) {
        for slot in &mut self.slots {
            *slot = slot.downgrade_on_control_split();
        }
    }

    /// Merges `other` into `self`. `Top` is the identity, `Bottom` is
    /// absorbing, and a stack-shape disagreement collapses to `Bottom`.
    pub(crate) fn merge_from(&mut self, other: &Frame) {
        if other.is_top() {
            return;
        }
        if self.is_top() {
            *self = other.clone();
            return;
        }
        if self.is_bottom() || other.is_bottom() || self.slots.len() != other.slots.len() {
            self.set_bottom();
            return;
        }
        for (slot, other_slot) in self.slots.iter_mut().zip(other.slots.iter()) {
            *slot = IsNullValue::merge(slot, other_slot);
        }
        self.merge_known_values(other);
    }

    /// Knowledge survives a merge only for value numbers both sides agree
    /// to know about.
    fn merge_known_values(&mut self, other: &Frame) {
        if !self.track_value_numbers {
            return;
        }
        let mut merged = BTreeMap::new();
        for (value_number, value) in &self.known_values {
            if let Some(other_value) = other.known_values.get(value_number) {
                merged.insert(*value_number, IsNullValue::merge(value, other_value));
            }
        }
        self.known_values = merged;
    }
}
