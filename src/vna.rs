use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ir::Location;

/// Opaque equivalence-class identifier for runtime values. Two slots holding
/// the same value number are guaranteed to hold the identical runtime value.
#[derive(
    Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
pub(crate) struct ValueNumber(pub(crate) u32);

/// Symbolic load expression that produced a value number.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub(crate) enum AvailableLoad {
    Local {
        index: u16,
    },
    InstanceField {
        object: ValueNumber,
        owner: String,
        name: String,
    },
    StaticField {
        owner: String,
        name: String,
    },
}

/// Value-numbering facts at one program point: one value number per frame
/// slot (locals prefix, then operand stack), plus the available-load map.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub(crate) struct VnaFrame {
    pub(crate) slots: Vec<ValueNumber>,
    #[serde(default)]
    pub(crate) available_loads: BTreeMap<AvailableLoad, Vec<ValueNumber>>,
    /// True at confluence points where multiple predecessors computed the
    /// same logical load independently.
    #[serde(default)]
    pub(crate) phi_node_for_loads: bool,
}

impl VnaFrame {
    pub(crate) fn value(&self, slot: usize) -> Option<ValueNumber> {
        self.slots.get(slot).copied()
    }

    /// Value number at the given depth from the top of the operand stack.
    pub(crate) fn stack_value(&self, depth: usize) -> Option<ValueNumber> {
        let len = self.slots.len();
        if depth >= len {
            return None;
        }
        Some(self.slots[len - 1 - depth])
    }

    pub(crate) fn num_slots(&self) -> usize {
        self.slots.len()
    }

    /// Symbolic load associated with a value number, if any.
    pub(crate) fn load_for(&self, value: ValueNumber) -> Option<&AvailableLoad> {
        self.available_loads
            .iter()
            .find(|(_, values)| values.contains(&value))
            .map(|(load, _)| load)
    }

    /// Value numbers the given load currently evaluates to.
    pub(crate) fn values_for_load(&self, load: &AvailableLoad) -> Option<&[ValueNumber]> {
        self.available_loads.get(load).map(Vec::as_slice)
    }

    /// True if the value number still backs some available load.
    pub(crate) fn has_load_for(&self, value: ValueNumber) -> bool {
        self.available_loads
            .values()
            .any(|values| values.contains(&value))
    }
}

/// Per-method value-numbering results, queryable immediately before and
/// after any instruction and at block boundaries. Produced by the front end.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub(crate) struct ValueNumbering {
    #[serde(default)]
    pub(crate) before: BTreeMap<Location, VnaFrame>,
    #[serde(default)]
    pub(crate) after: BTreeMap<Location, VnaFrame>,
    #[serde(default)]
    pub(crate) block_entry: BTreeMap<u32, VnaFrame>,
    #[serde(default)]
    pub(crate) block_exit: BTreeMap<u32, VnaFrame>,
}

impl ValueNumbering {
    pub(crate) fn fact_before(&self, location: Location) -> Option<&VnaFrame> {
        self.before.get(&location)
    }

    pub(crate) fn fact_after(&self, location: Location) -> Option<&VnaFrame> {
        self.after.get(&location)
    }

    pub(crate) fn entry_fact(&self, block: u32) -> Option<&VnaFrame> {
        self.block_entry.get(&block)
    }

    pub(crate) fn exit_fact(&self, block: u32) -> Option<&VnaFrame> {
        self.block_exit.get(&block)
    }
}
