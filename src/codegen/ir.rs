use crate::{
    binary::{
        opcode::{LoadOp, NumericOp, StoreOp},
        types::ValueType,
    },
    trap::Trap,
};

/// A jump target. Labels are created unbound and bound to a position later;
/// forward branches reference them before they are bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub(crate) u32);

impl Label {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of a local variable slot in a frame.
pub type Slot = u32;

/// One abstract target instruction.
///
/// The stream is a plain stack machine: operands live on an evaluation stack,
/// locals in numbered slots, and anything belonging to the instance (globals,
/// memory, tables, segments) is reached through instance field access.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    I32Const(i32),
    I64Const(i64),
    F32Const(f32),
    F64Const(f64),
    RefNull(ValueType),
    RefFunc(u32),
    RefIsNull,

    LocalGet(Slot),
    LocalSet(Slot),

    Dup,
    Pop,
    Swap,
    Select,

    Jump(Label),
    /// Pops an i32 and jumps when it is non-zero.
    JumpIf(Label),
    /// Pops an i32 and jumps when it is zero.
    JumpIfNot(Label),
    /// Pops an i32 index into `targets`; out of range goes to `default`.
    JumpTable { targets: Vec<Label>, default: Label },

    Call(u32),
    /// Pops a table index and pushes the checked callee it refers to.
    ResolveIndirect { table: u32, type_index: u32 },
    /// Pops the arguments, then the callee pushed by `ResolveIndirect`.
    CallRef { type_index: u32 },
    Return,
    Trap(Trap),

    Numeric(NumericOp),

    GlobalGet(u32),
    GlobalSet(u32),

    Load { op: LoadOp, offset: u32 },
    Store { op: StoreOp, offset: u32 },
    MemorySize,
    MemoryGrow,
    MemoryInit(u32),
    MemoryCopy,
    MemoryFill,
    DataDrop(u32),

    TableGet(u32),
    TableSet(u32),
    TableSize(u32),
    TableGrow(u32),
    TableFill(u32),
    TableCopy { dst: u32, src: u32 },
    TableInit { elem: u32, table: u32 },
    ElemDrop(u32),
}

impl Op {
    pub fn branch_targets(&self) -> Vec<Label> {
        match self {
            Op::Jump(label) | Op::JumpIf(label) | Op::JumpIfNot(label) => vec![*label],
            Op::JumpTable { targets, default } => targets.iter().chain(std::iter::once(default)).copied().collect(),
            _ => vec![],
        }
    }
}
