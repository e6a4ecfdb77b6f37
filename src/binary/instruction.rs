use num_traits::FromPrimitive;

use super::{
    opcode::{ExtOpcode, LoadOp, NumericOp, Opcode, StoreOp, PREFIX_NUMERIC_BASE},
    reader::Reader,
    types::{BlockType, MemArg, ValueType},
};
use crate::error::{CompileError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    Unreachable,
    Nop,
    Block(BlockType),
    Loop(BlockType),
    If(BlockType),
    Else,
    End,
    Br(u32),
    BrIf(u32),
    BrTable { targets: Vec<u32>, default: u32 },
    Return,
    Call(u32),
    CallIndirect { type_index: u32, table: u32 },

    Drop,
    Select(Option<ValueType>),

    LocalGet(u32),
    LocalSet(u32),
    LocalTee(u32),
    GlobalGet(u32),
    GlobalSet(u32),

    TableGet(u32),
    TableSet(u32),
    TableSize(u32),
    TableGrow(u32),
    TableFill(u32),
    TableCopy { dst: u32, src: u32 },
    TableInit { elem: u32, table: u32 },
    ElemDrop(u32),

    Load(LoadOp, MemArg),
    Store(StoreOp, MemArg),
    MemorySize(u32),
    MemoryGrow(u32),
    MemoryInit { data: u32, memory: u32 },
    DataDrop(u32),
    MemoryCopy { dst: u32, src: u32 },
    MemoryFill(u32),

    I32Const(i32),
    I64Const(i64),
    F32Const(f32),
    F64Const(f64),

    RefNull(ValueType),
    RefIsNull,
    RefFunc(u32),

    Numeric(NumericOp),
}

pub fn decode_value_type(reader: &mut Reader) -> Result<ValueType> {
    let offset = reader.offset();
    let byte = reader.byte()?;
    ValueType::from_byte(byte).ok_or_else(|| CompileError::decode(offset, format!("invalid value type 0x{byte:02X}")))
}

pub fn decode_ref_type(reader: &mut Reader) -> Result<ValueType> {
    let offset = reader.offset();
    let ty = decode_value_type(reader)?;
    if !ty.is_ref() {
        return Err(CompileError::decode(offset, format!("expected a reference type, found {ty}")));
    }
    Ok(ty)
}

/// The empty and single-value shorthands occupy the negative range of the s33 encoding.
pub fn decode_block_type(reader: &mut Reader) -> Result<BlockType> {
    let offset = reader.offset();

    match reader.peek_byte() {
        Some(0x40) => {
            reader.byte()?;
            Ok(BlockType::Empty)
        }
        Some(byte) if ValueType::from_byte(byte).is_some() => Ok(BlockType::Value(decode_value_type(reader)?)),
        _ => {
            let index = reader.s33()?;
            if index < 0 {
                return Err(CompileError::decode(offset, format!("invalid block type {index}")));
            }
            Ok(BlockType::Type(index as u32))
        }
    }
}

fn decode_memarg(reader: &mut Reader) -> Result<MemArg> {
    let offset = reader.offset();
    let align = reader.u32()?;
    if align >= 32 {
        return Err(CompileError::decode(offset, format!("malformed memop alignment {align}")));
    }
    Ok(MemArg {
        align,
        offset: reader.u32()?,
    })
}

fn decode_zero_byte(reader: &mut Reader, what: &str) -> Result<u32> {
    let offset = reader.offset();
    match reader.byte()? {
        0 => Ok(0),
        byte => Err(CompileError::decode(offset, format!("{what}: expected zero byte, found 0x{byte:02X}"))),
    }
}

pub fn decode_instruction(reader: &mut Reader) -> Result<Instruction> {
    let offset = reader.offset();
    let byte = reader.byte()?;

    if let Some(op) = NumericOp::from_u8(byte) {
        return Ok(Instruction::Numeric(op));
    }
    if let Some(op) = LoadOp::from_u8(byte) {
        return Ok(Instruction::Load(op, decode_memarg(reader)?));
    }
    if let Some(op) = StoreOp::from_u8(byte) {
        return Ok(Instruction::Store(op, decode_memarg(reader)?));
    }

    let Some(op) = Opcode::from_u8(byte) else {
        return Err(CompileError::decode(offset, format!("illegal opcode 0x{byte:02X}")));
    };

    let inst = match op {
        Opcode::Unreachable => Instruction::Unreachable,
        Opcode::Nop => Instruction::Nop,
        Opcode::Block => Instruction::Block(decode_block_type(reader)?),
        Opcode::Loop => Instruction::Loop(decode_block_type(reader)?),
        Opcode::If => Instruction::If(decode_block_type(reader)?),
        Opcode::Else => Instruction::Else,
        Opcode::End => Instruction::End,
        Opcode::Br => Instruction::Br(reader.u32()?),
        Opcode::BrIf => Instruction::BrIf(reader.u32()?),
        Opcode::BrTable => {
            let targets = reader.vec(|r| r.u32())?;
            let default = reader.u32()?;
            Instruction::BrTable { targets, default }
        }
        Opcode::Return => Instruction::Return,
        Opcode::Call => Instruction::Call(reader.u32()?),
        Opcode::CallIndirect => {
            let type_index = reader.u32()?;
            let table = reader.u32()?;
            Instruction::CallIndirect { type_index, table }
        }
        Opcode::Drop => Instruction::Drop,
        Opcode::Select => Instruction::Select(None),
        Opcode::SelectTyped => {
            let tys = reader.vec(decode_value_type)?;
            if tys.len() != 1 {
                return Err(CompileError::decode(offset, "invalid result arity for typed select"));
            }
            Instruction::Select(Some(tys[0]))
        }
        Opcode::LocalGet => Instruction::LocalGet(reader.u32()?),
        Opcode::LocalSet => Instruction::LocalSet(reader.u32()?),
        Opcode::LocalTee => Instruction::LocalTee(reader.u32()?),
        Opcode::GlobalGet => Instruction::GlobalGet(reader.u32()?),
        Opcode::GlobalSet => Instruction::GlobalSet(reader.u32()?),
        Opcode::TableGet => Instruction::TableGet(reader.u32()?),
        Opcode::TableSet => Instruction::TableSet(reader.u32()?),
        Opcode::MemorySize => Instruction::MemorySize(decode_zero_byte(reader, "memory.size")?),
        Opcode::MemoryGrow => Instruction::MemoryGrow(decode_zero_byte(reader, "memory.grow")?),
        Opcode::I32Const => Instruction::I32Const(reader.s32()?),
        Opcode::I64Const => Instruction::I64Const(reader.s64()?),
        Opcode::F32Const => Instruction::F32Const(reader.f32()?),
        Opcode::F64Const => Instruction::F64Const(reader.f64()?),
        Opcode::RefNull => Instruction::RefNull(decode_ref_type(reader)?),
        Opcode::RefIsNull => Instruction::RefIsNull,
        Opcode::RefFunc => Instruction::RefFunc(reader.u32()?),
        Opcode::Prefix => decode_prefixed(reader)?,
    };

    Ok(inst)
}

fn decode_prefixed(reader: &mut Reader) -> Result<Instruction> {
    let offset = reader.offset();
    let sub = reader.u32()?;

    if let Some(op) = NumericOp::from_u32(PREFIX_NUMERIC_BASE | sub).filter(|_| sub < 8) {
        return Ok(Instruction::Numeric(op));
    }

    let Some(op) = ExtOpcode::from_u32(sub) else {
        return Err(CompileError::decode(offset, format!("illegal opcode 0xFC {sub}")));
    };

    let inst = match op {
        ExtOpcode::MemoryInit => {
            let data = reader.u32()?;
            let memory = decode_zero_byte(reader, "memory.init")?;
            Instruction::MemoryInit { data, memory }
        }
        ExtOpcode::DataDrop => Instruction::DataDrop(reader.u32()?),
        ExtOpcode::MemoryCopy => {
            let dst = decode_zero_byte(reader, "memory.copy")?;
            let src = decode_zero_byte(reader, "memory.copy")?;
            Instruction::MemoryCopy { dst, src }
        }
        ExtOpcode::MemoryFill => Instruction::MemoryFill(decode_zero_byte(reader, "memory.fill")?),
        ExtOpcode::TableInit => {
            let elem = reader.u32()?;
            let table = reader.u32()?;
            Instruction::TableInit { elem, table }
        }
        ExtOpcode::ElemDrop => Instruction::ElemDrop(reader.u32()?),
        ExtOpcode::TableCopy => {
            let dst = reader.u32()?;
            let src = reader.u32()?;
            Instruction::TableCopy { dst, src }
        }
        ExtOpcode::TableGrow => Instruction::TableGrow(reader.u32()?),
        ExtOpcode::TableSize => Instruction::TableSize(reader.u32()?),
        ExtOpcode::TableFill => Instruction::TableFill(reader.u32()?),
    };

    Ok(inst)
}
