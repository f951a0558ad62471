use crate::db::{ContractDatabase, NullnessDatabase};
use crate::ir::{
    BasicBlock, ControlFlowGraph, EdgeKind, FieldRef, FlowEdge, Instruction, InstructionKind,
    Location, Method, MethodAccess, MethodNullness, Nullness,
};
use crate::npe::finder::{Finding, NullDerefFinder};
use crate::vna::{ValueNumber, ValueNumbering, VnaFrame};

/// Builds a block whose instruction offsets follow the `id * 100 + index`
/// convention used throughout the analysis tests.
pub(crate) fn block(id: u32, kinds: Vec<InstructionKind>) -> BasicBlock {
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

pub(crate) fn edge(from: u32, to: u32, kind: EdgeKind) -> FlowEdge {
    FlowEdge { from, to, kind }
}

/// A public static method named `methodX` with the given body.
pub(crate) fn static_method(num_locals: u16, cfg: ControlFlowGraph) -> Method {
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

pub(crate) fn nullable_params(method: &mut Method, count: usize) {
    method.nullness.parameter_nullness = vec![Nullness::Nullable; count];
}

/// `getfield` of an unannotated reference field.
pub(crate) fn get_field() -> InstructionKind {
    InstructionKind::GetField {
        field: FieldRef {
            owner: "com/example/ClassA".to_string(),
            name: "fieldF".to_string(),
            reference_type: true,
            nullness: Nullness::Unknown,
        },
    }
}

/// Incremental construction of value-numbering facts for a test method.
#[derive(Default)]
pub(crate) struct VnaBuilder {
    vna: ValueNumbering,
}

impl VnaBuilder {
    pub(crate) fn before(mut self, block: u32, offset: u32, slots: Vec<u32>) -> Self {
        self.vna.before.insert(
            Location { block, offset },
            VnaFrame {
                slots: slots.into_iter().map(ValueNumber).collect(),
                ..VnaFrame::default()
            },
        );
        self
    }

    pub(crate) fn entry(mut self, block: u32, slots: Vec<u32>) -> Self {
        self.vna.block_entry.insert(
            block,
            VnaFrame {
                slots: slots.into_iter().map(ValueNumber).collect(),
                ..VnaFrame::default()
            },
        );
        self
    }

    pub(crate) fn build(self) -> ValueNumbering {
        self.vna
    }
}

/// Runs the finder over one method with empty collaborator databases.
pub(crate) fn findings(method: &Method, vna: &ValueNumbering) -> Vec<Finding> {
    let nullness_db = NullnessDatabase::default();
    let contract_db = ContractDatabase::default();
    NullDerefFinder {
        class_name: "com/example/ClassA",
        method,
        nullness_db: &nullness_db,
        contract_db: &contract_db,
        vna,
        track_value_numbers: true,
    }
    .find()
    .expect("analysis must converge")
}
