use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Intermediate representation for a class in the analyzed method model.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct Class {
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) source_file: Option<String>,
    pub(crate) methods: Vec<Method>,
    #[serde(default)]
    pub(crate) artifact_index: i64,
}

/// Identity of a method, used as a key into the collaborator databases.
/// Serialized as `com/example/ClassA.methodName(Ljava/lang/Object;)V` so it
/// can key JSON maps.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) struct MethodId {
    pub(crate) class_name: String,
    pub(crate) name: String,
    pub(crate) descriptor: String,
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", self.class_name, self.name, self.descriptor)
    }
}

impl FromStr for MethodId {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let paren = raw
            .find('(')
            .ok_or_else(|| format!("method id `{raw}` has no descriptor"))?;
        let (qualified, descriptor) = raw.split_at(paren);
        let dot = qualified
            .rfind('.')
            .ok_or_else(|| format!("method id `{raw}` has no class name"))?;
        Ok(MethodId {
            class_name: qualified[..dot].to_string(),
            name: qualified[dot + 1..].to_string(),
            descriptor: descriptor.to_string(),
        })
    }
}

impl Serialize for MethodId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MethodId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Intermediate representation for a method body and its control-flow graph.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct Method {
    pub(crate) name: String,
    pub(crate) descriptor: String,
    pub(crate) access: MethodAccess,
    pub(crate) nullness: MethodNullness,
    /// Number of local variable slots, after category-2 normalization.
    pub(crate) num_locals: u16,
    #[serde(default)]
    pub(crate) line_numbers: Vec<LineNumber>,
    pub(crate) cfg: ControlFlowGraph,
}

impl Method {
    pub(crate) fn id(&self, class_name: &str) -> MethodId {
        MethodId {
            class_name: class_name.to_string(),
            name: self.name.clone(),
            descriptor: self.descriptor.clone(),
        }
    }

    /// Local slot holding the first declared parameter.
    pub(crate) fn param_base_slot(&self) -> u16 {
        if self.access.is_static { 0 } else { 1 }
    }

    /// Source line covering a bytecode offset, when line numbers are present.
    pub(crate) fn line_for_offset(&self, offset: u32) -> Option<u32> {
        self.line_numbers
            .iter()
            .filter(|entry| entry.offset <= offset)
            .max_by_key(|entry| entry.offset)
            .map(|entry| entry.line)
    }
}

/// Access flags relevant to analysis.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub(crate) struct MethodAccess {
    #[serde(default)]
    pub(crate) is_public: bool,
    #[serde(default)]
    pub(crate) is_static: bool,
    #[serde(default)]
    pub(crate) is_abstract: bool,
}

/// Declared nullness annotations resolved by the front end.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub(crate) struct MethodNullness {
    #[serde(default)]
    pub(crate) return_nullness: Nullness,
    #[serde(default)]
    pub(crate) parameter_nullness: Vec<Nullness>,
}

/// Declared nullness state of a parameter, return value, or field.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub(crate) enum Nullness {
    NonNull,
    Nullable,
    #[default]
    Unknown,
}

/// Bytecode offset to source line mapping entry.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub(crate) struct LineNumber {
    pub(crate) offset: u32,
    pub(crate) line: u32,
}

/// Control-flow graph of one method body.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct ControlFlowGraph {
    pub(crate) blocks: Vec<BasicBlock>,
    pub(crate) edges: Vec<FlowEdge>,
    /// Block id of the method entry.
    #[serde(default)]
    pub(crate) entry: u32,
}

/// Basic block: a straight-line instruction run with a single entry and exit.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct BasicBlock {
    pub(crate) id: u32,
    pub(crate) instructions: Vec<Instruction>,
    #[serde(default)]
    pub(crate) is_exception_handler: bool,
    /// Declared catch type for handler blocks, e.g. `java.lang.Exception`.
    #[serde(default)]
    pub(crate) catch_type: Option<String>,
    /// True for synthetic blocks guarding an implicit null check before a
    /// dereference in the fall-through successor.
    #[serde(default)]
    pub(crate) is_null_check: bool,
}

impl BasicBlock {
    pub(crate) fn last_instruction(&self) -> Option<&Instruction> {
        self.instructions.last()
    }

    pub(crate) fn first_instruction(&self) -> Option<&Instruction> {
        self.instructions.first()
    }
}

/// Typed edge between basic blocks.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub(crate) struct FlowEdge {
    pub(crate) from: u32,
    pub(crate) to: u32,
    pub(crate) kind: EdgeKind,
}

/// Edge classification used by the meet operator.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub(crate) enum EdgeKind {
    FallThrough,
    Branch,
    Exception,
    SwitchCase,
    SwitchDefault,
}

impl EdgeKind {
    pub(crate) fn is_exception(self) -> bool {
        matches!(self, EdgeKind::Exception)
    }
}

/// A program point: an instruction inside a basic block. Serialized as
/// `block:offset` so it can key JSON maps.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub(crate) struct Location {
    pub(crate) block: u32,
    pub(crate) offset: u32,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.block, self.offset)
    }
}

impl FromStr for Location {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (block, offset) = raw
            .split_once(':')
            .ok_or_else(|| format!("location `{raw}` is not block:offset"))?;
        Ok(Location {
            block: block
                .parse()
                .map_err(|_| format!("location `{raw}` has a bad block id"))?,
            offset: offset
                .parse()
                .map_err(|_| format!("location `{raw}` has a bad offset"))?,
        })
    }
}

impl Serialize for Location {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Location {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Bytecode instruction captured for analysis.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct Instruction {
    pub(crate) offset: u32,
    pub(crate) kind: InstructionKind,
}

/// Closed instruction classification. The transfer function dispatches over
/// this exhaustively, so adding a variant forces every match to be revisited.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) enum InstructionKind {
    /// `aconst_null`.
    ConstNull,
    /// Any other constant load (string/class literals are non-null).
    Const,
    LoadLocal { index: u16 },
    StoreLocal { index: u16 },
    GetField { field: FieldRef },
    GetStatic { field: FieldRef },
    PutField { field: FieldRef },
    PutStatic { field: FieldRef },
    ArrayLoad { element_reference: bool },
    ArrayStore,
    ArrayLength,
    New,
    NewArray { dimensions: u16 },
    CheckCast,
    InstanceOf,
    Invoke(CallSite),
    MonitorEnter,
    MonitorExit,
    Throw,
    Return,
    ReturnValue,
    IfNull,
    IfNonNull,
    IfAcmpEq,
    IfAcmpNe,
    /// `ifeq`: branch taken when the integer on top of the stack is zero.
    IfZero,
    /// `ifne`: branch taken when the integer on top of the stack is non-zero.
    IfNonZero,
    /// Remaining conditional branches (integer comparisons).
    IfCmp { pops: u16 },
    Goto,
    Switch,
    Dup,
    Pop { count: u16 },
    Swap,
    /// Arithmetic, conversions, and other opcodes with a fixed stack shape
    /// that never produce a reference.
    Primitive { pops: u16, pushes: u16 },
    /// Opcode whose stack effect the front end could not determine.
    Unsupported { opcode: u8 },
}

impl InstructionKind {
    /// Depth (from the top of the stack) of the reference this instruction
    /// dereferences, or `None` if it dereferences nothing.
    pub(crate) fn dereferenced_stack_depth(&self) -> Option<usize> {
        match self {
            InstructionKind::GetField { .. } => Some(0),
            InstructionKind::PutField { .. } => Some(1),
            InstructionKind::ArrayLoad { .. } => Some(1),
            InstructionKind::ArrayStore => Some(2),
            InstructionKind::ArrayLength => Some(0),
            InstructionKind::MonitorEnter | InstructionKind::MonitorExit => Some(0),
            InstructionKind::Invoke(call) if call.kind != CallKind::Static => {
                Some(call.arg_slots as usize)
            }
            _ => None,
        }
    }

}

/// Field reference with front-end-resolved nullness.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct FieldRef {
    pub(crate) owner: String,
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) reference_type: bool,
    #[serde(default)]
    pub(crate) nullness: Nullness,
}

/// Call site extracted from bytecode.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct CallSite {
    pub(crate) owner: String,
    pub(crate) name: String,
    pub(crate) descriptor: String,
    pub(crate) kind: CallKind,
    /// Stack slots consumed by the declared arguments (receiver excluded).
    pub(crate) arg_slots: u16,
    #[serde(default)]
    pub(crate) returns_reference: bool,
    /// False only for `void` targets.
    #[serde(default)]
    pub(crate) returns_value: bool,
}

impl CallSite {
    pub(crate) fn target(&self) -> MethodId {
        MethodId {
            class_name: self.owner.clone(),
            name: self.name.clone(),
            descriptor: self.descriptor.clone(),
        }
    }
}

/// Call opcode classification.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub(crate) enum CallKind {
    Virtual,
    Interface,
    Special,
    Static,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_for_offset_picks_closest_preceding_entry() {
        let method = Method {
            name: "methodX".to_string(),
            descriptor: "()V".to_string(),
            access: MethodAccess::default(),
            nullness: MethodNullness::default(),
            num_locals: 0,
            line_numbers: vec![
                LineNumber { offset: 0, line: 10 },
                LineNumber { offset: 8, line: 12 },
            ],
            cfg: ControlFlowGraph {
                blocks: Vec::new(),
                edges: Vec::new(),
                entry: 0,
            },
        };

        assert_eq!(method.line_for_offset(0), Some(10));
        assert_eq!(method.line_for_offset(7), Some(10));
        assert_eq!(method.line_for_offset(9), Some(12));
    }

    #[test]
    fn method_id_round_trips_through_its_string_form() {
        let id = MethodId {
            class_name: "com/example/ClassA".to_string(),
            name: "run".to_string(),
            descriptor: "(Ljava/lang/Object;)V".to_string(),
        };

        let parsed: MethodId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("noDescriptorHere".parse::<MethodId>().is_err());
    }

    #[test]
    fn location_round_trips_through_its_string_form() {
        let location = Location { block: 3, offset: 17 };
        let parsed: Location = location.to_string().parse().unwrap();
        assert_eq!(parsed, location);
        assert!("3-17".parse::<Location>().is_err());
    }

    #[test]
    fn invoke_dereference_depth_skips_static_calls() {
        let virtual_call = InstructionKind::Invoke(CallSite {
            owner: "com/example/ClassA".to_string(),
            name: "run".to_string(),
            descriptor: "(I)V".to_string(),
            kind: CallKind::Virtual,
            arg_slots: 1,
            returns_reference: false,
            returns_value: false,
        });
        let static_call = InstructionKind::Invoke(CallSite {
            owner: "com/example/ClassA".to_string(),
            name: "run".to_string(),
            descriptor: "(I)V".to_string(),
            kind: CallKind::Static,
            arg_slots: 1,
            returns_reference: false,
            returns_value: false,
        });

        assert_eq!(virtual_call.dereferenced_stack_depth(), Some(1));
        assert_eq!(static_call.dereferenced_stack_depth(), None);
    }
}
