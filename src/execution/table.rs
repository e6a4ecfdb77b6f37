use crate::{
    binary::types::{Limits, TableType, ValueType},
    trap::Trap,
};

use super::{
    memory::{alloc, AllocError},
    value::Value,
};

/// Tables never hold more entries than this, whatever their declared limits.
pub const MAX_TABLE_SIZE: u32 = 10_000_000;

/// A growable array of references of one type.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    elem: ValueType,
    elements: Vec<Value>,
    max: Option<u32>,
}

impl Table {
    pub fn new(ty: TableType) -> Result<Self, AllocError> {
        if ty.limits.min > MAX_TABLE_SIZE {
            return Err(AllocError {
                what: "table",
                len: ty.limits.min.into(),
            });
        }
        Ok(Self {
            elem: ty.elem,
            elements: alloc("table", ty.limits.min as usize, Value::zero(ty.elem))?,
            max: ty.limits.max,
        })
    }

    pub fn ty(&self) -> TableType {
        TableType {
            elem: self.elem,
            limits: Limits {
                min: self.size(),
                max: self.max,
            },
        }
    }

    pub fn size(&self) -> u32 {
        self.elements.len() as u32
    }

    pub fn get(&self, index: u32) -> Result<Value, Trap> {
        self.elements.get(index as usize).copied().ok_or(Trap::TableOutOfBounds)
    }

    pub fn set(&mut self, index: u32, value: Value) -> Result<(), Trap> {
        let slot = self.elements.get_mut(index as usize).ok_or(Trap::TableOutOfBounds)?;
        *slot = value;
        Ok(())
    }

    /// Appends `delta` copies of `init` and returns the previous size, or -1.
    pub fn grow(&mut self, init: Value, delta: u32) -> i32 {
        let old = self.size();
        let limit = self.max.unwrap_or(MAX_TABLE_SIZE).min(MAX_TABLE_SIZE);
        let Some(new) = old.checked_add(delta).filter(|new| *new <= limit) else {
            return -1;
        };
        if self.elements.try_reserve_exact(delta as usize).is_err() {
            return -1;
        }
        self.elements.resize(new as usize, init);
        old as i32
    }

    fn span(&self, start: u32, len: u32) -> Result<std::ops::Range<usize>, Trap> {
        let end = u64::from(start) + u64::from(len);
        if end > self.elements.len() as u64 {
            return Err(Trap::TableOutOfBounds);
        }
        Ok(start as usize..end as usize)
    }

    pub fn fill(&mut self, dst: u32, value: Value, len: u32) -> Result<(), Trap> {
        let dst = self.span(dst, len)?;
        self.elements[dst].fill(value);
        Ok(())
    }

    /// `len` elements starting at `src`, for copies between two tables.
    pub fn slice(&self, src: u32, len: u32) -> Result<&[Value], Trap> {
        let src = self.span(src, len)?;
        Ok(&self.elements[src])
    }

    /// `table.copy` within this table; overlapping spans are handled.
    pub fn copy_within(&mut self, dst: u32, src: u32, len: u32) -> Result<(), Trap> {
        let src = self.span(src, len)?;
        let dst = self.span(dst, len)?;
        self.elements.copy_within(src, dst.start);
        Ok(())
    }

    /// `table.init`, active element segments and cross-table copies.
    pub fn init(&mut self, dst: u32, items: &[Value], src: u32, len: u32) -> Result<(), Trap> {
        let src_end = u64::from(src) + u64::from(len);
        if src_end > items.len() as u64 {
            return Err(Trap::TableOutOfBounds);
        }
        let dst = self.span(dst, len)?;
        self.elements[dst].copy_from_slice(&items[src as usize..src_end as usize]);
        Ok(())
    }
}
