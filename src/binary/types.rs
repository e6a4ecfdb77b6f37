use std::fmt;

#[derive(Debug, Default, Clone, PartialEq, Eq, Hash)]
pub struct FuncType {
    pub params: Vec<ValueType>,
    pub returns: Vec<ValueType>,
}

impl FuncType {
    pub fn new(params: impl Into<Vec<ValueType>>, returns: impl Into<Vec<ValueType>>) -> Self {
        Self {
            params: params.into(),
            returns: returns.into(),
        }
    }
}

impl fmt::Display for FuncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} -> {:?}", self.params, self.returns)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    I32,       // 0x7F
    I64,       // 0x7E
    F32,       // 0x7D
    F64,       // 0x7C
    FuncRef,   // 0x70
    ExternRef, // 0x6F
}

impl ValueType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x7F => Some(ValueType::I32),
            0x7E => Some(ValueType::I64),
            0x7D => Some(ValueType::F32),
            0x7C => Some(ValueType::F64),
            0x70 => Some(ValueType::FuncRef),
            0x6F => Some(ValueType::ExternRef),
            _ => None,
        }
    }

    pub fn is_ref(self) -> bool {
        matches!(self, ValueType::FuncRef | ValueType::ExternRef)
    }

    pub fn is_num(self) -> bool {
        !self.is_ref()
    }

    /// Number of local slots a value of this type occupies.
    pub fn width(self) -> u32 {
        match self {
            ValueType::I64 | ValueType::F64 => 2,
            _ => 1,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::I32 => "i32",
            ValueType::I64 => "i64",
            ValueType::F32 => "f32",
            ValueType::F64 => "f64",
            ValueType::FuncRef => "funcref",
            ValueType::ExternRef => "externref",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub min: u32,
    pub max: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryType {
    pub limits: Limits,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableType {
    pub elem: ValueType,
    pub limits: Limits,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutability {
    Const,
    Var,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalType {
    pub ty: ValueType,
    pub mutability: Mutability,
}

/// Value of a constant expression: global initializers and segment offsets/items.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Constant {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Null(ValueType),
    FuncRef(u32),
    GlobalRef(u32),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Global {
    pub ty: GlobalType,
    pub init: Constant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExportDesc {
    Func(u32),
    Table(u32),
    Memory(u32),
    Global(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Export {
    pub name: String,
    pub desc: ExportDesc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportDesc {
    Func(u32),
    Table(TableType),
    Memory(MemoryType),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
    pub mod_name: String,
    pub field_name: String,
    pub desc: ImportDesc,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DataMode {
    Active { memory: u32, offset: Constant },
    Passive,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataSegment {
    pub mode: DataMode,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ElementMode {
    Active { table: u32, offset: Constant },
    Passive,
    Declarative,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElementSegment {
    pub ty: ValueType,
    pub mode: ElementMode,
    pub items: Vec<Constant>,
}

/// Locals and instructions of one function, kept as raw bytes until translation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionBody {
    pub offset: usize,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct NameSection {
    pub module: Option<String>,
    pub functions: Vec<(u32, String)>,
}

impl NameSection {
    pub fn function(&self, index: u32) -> Option<&str> {
        self.functions
            .iter()
            .find(|(i, _)| *i == index)
            .map(|(_, name)| name.as_str())
    }
}

/// Type of a structured instruction: `[] -> []`, `[] -> [t]`, or a type index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    Empty,
    Value(ValueType),
    Type(u32),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MemArg {
    pub align: u32,
    pub offset: u32,
}
