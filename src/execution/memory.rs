use std::ops::Range;

use crate::{
    binary::{
        opcode::{LoadOp, StoreOp},
        types::MemoryType,
    },
    trap::Trap,
};

use super::value::Value;

pub const PAGE_SIZE: usize = 1 << 16;
pub const MAX_PAGES: u32 = 1 << 16;

/// The host could not provide the initial size of a memory or table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cannot allocate {len} initial elements for a {what}")]
pub struct AllocError {
    pub what: &'static str,
    pub len: u64,
}

/// A zero-filled vector of `len` elements, or an error instead of an abort.
pub(crate) fn alloc<T: Clone>(what: &'static str, len: usize, fill: T) -> Result<Vec<T>, AllocError> {
    let mut items = vec![];
    items.try_reserve_exact(len).map_err(|_| AllocError { what, len: len as u64 })?;
    items.resize(len, fill);
    Ok(items)
}

/// A linear memory: little-endian, byte addressed, growable in whole pages.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Memory {
    data: Vec<u8>,
    max: Option<u32>,
}

impl Memory {
    pub fn new(ty: MemoryType) -> Result<Self, AllocError> {
        let len = (ty.limits.min as usize).saturating_mul(PAGE_SIZE);
        Ok(Self {
            data: alloc("memory", len, 0)?,
            max: ty.limits.max,
        })
    }

    pub fn ty(&self) -> MemoryType {
        MemoryType {
            limits: crate::binary::types::Limits {
                min: self.pages(),
                max: self.max,
            },
        }
    }

    pub fn pages(&self) -> u32 {
        (self.data.len() / PAGE_SIZE) as u32
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Grows by `delta` pages and returns the previous size, or -1 when the
    /// limit would be exceeded or the host refuses the allocation.
    pub fn grow(&mut self, delta: u32) -> i32 {
        let old = self.pages();
        let limit = self.max.unwrap_or(MAX_PAGES).min(MAX_PAGES);
        let Some(new) = old.checked_add(delta).filter(|new| *new <= limit) else {
            return -1;
        };

        let additional = (new - old) as usize * PAGE_SIZE;
        if self.data.try_reserve_exact(additional).is_err() {
            return -1;
        }
        self.data.resize(new as usize * PAGE_SIZE, 0);
        old as i32
    }

    fn range(&self, start: u64, len: u64) -> Result<Range<usize>, Trap> {
        let end = start.checked_add(len).ok_or(Trap::MemoryOutOfBounds)?;
        if end > self.data.len() as u64 {
            return Err(Trap::MemoryOutOfBounds);
        }
        Ok(start as usize..end as usize)
    }

    /// Effective address is `addr + offset` computed without wrapping.
    pub fn load(&self, op: LoadOp, addr: u32, offset: u32) -> Result<Value, Trap> {
        let range = self.range(u64::from(addr) + u64::from(offset), u64::from(op.width()))?;
        let mut bytes = [0u8; 8];
        bytes[..range.len()].copy_from_slice(&self.data[range]);
        let raw = u64::from_le_bytes(bytes);

        use LoadOp::*;
        let value = match op {
            I32Load => Value::I32(raw as u32 as i32),
            I32Load8S => Value::I32(raw as u8 as i8 as i32),
            I32Load8U => Value::I32(raw as u8 as i32),
            I32Load16S => Value::I32(raw as u16 as i16 as i32),
            I32Load16U => Value::I32(raw as u16 as i32),
            I64Load => Value::I64(raw as i64),
            I64Load8S => Value::I64(raw as u8 as i8 as i64),
            I64Load8U => Value::I64(raw as u8 as i64),
            I64Load16S => Value::I64(raw as u16 as i16 as i64),
            I64Load16U => Value::I64(raw as u16 as i64),
            I64Load32S => Value::I64(raw as u32 as i32 as i64),
            I64Load32U => Value::I64(raw as u32 as i64),
            F32Load => Value::F32(f32::from_bits(raw as u32)),
            F64Load => Value::F64(f64::from_bits(raw)),
        };
        Ok(value)
    }

    /// Writes the low `op.width()` bytes of `bits`.
    pub fn store(&mut self, op: StoreOp, addr: u32, offset: u32, bits: u64) -> Result<(), Trap> {
        let range = self.range(u64::from(addr) + u64::from(offset), u64::from(op.width()))?;
        let len = range.len();
        self.data[range].copy_from_slice(&bits.to_le_bytes()[..len]);
        Ok(())
    }

    /// `memory.copy`: overlapping spans behave as if copied through a buffer.
    pub fn copy(&mut self, dst: u32, src: u32, len: u32) -> Result<(), Trap> {
        let src = self.range(src.into(), len.into())?;
        let dst = self.range(dst.into(), len.into())?;
        self.data.copy_within(src, dst.start);
        Ok(())
    }

    pub fn fill(&mut self, dst: u32, value: u8, len: u32) -> Result<(), Trap> {
        let dst = self.range(dst.into(), len.into())?;
        self.data[dst].fill(value);
        Ok(())
    }

    /// `memory.init` and active data segments: copies `segment[src..src+len]` to `dst`.
    pub fn init(&mut self, dst: u32, segment: &[u8], src: u32, len: u32) -> Result<(), Trap> {
        let src_end = u64::from(src) + u64::from(len);
        if src_end > segment.len() as u64 {
            return Err(Trap::MemoryOutOfBounds);
        }
        let dst = self.range(dst.into(), len.into())?;
        self.data[dst].copy_from_slice(&segment[src as usize..src_end as usize]);
        Ok(())
    }
}
