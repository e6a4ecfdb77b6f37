use std::collections::HashSet;

use tracing::{instrument, Level};

use crate::{
    binary::{
        module::Module,
        types::{
            Constant, DataMode, ElementMode, ExportDesc, FuncType, GlobalType, Limits, MemoryType, TableType,
            ValueType,
        },
    },
    error::{CompileError, Result},
};

const MAX_PAGES: u32 = 65536;

/// Index spaces of a module as the function translator sees them.
#[derive(Debug)]
pub struct ModuleEnv<'m> {
    pub module: &'m Module,
    pub func_types: Vec<u32>,
    pub tables: Vec<TableType>,
    pub memories: Vec<MemoryType>,
    pub globals: Vec<GlobalType>,
    /// Functions `ref.func` may name: those referenced outside function bodies.
    pub declared_funcs: HashSet<u32>,
}

impl<'m> ModuleEnv<'m> {
    pub fn new(module: &'m Module) -> Self {
        let declared_funcs = module
            .elements
            .iter()
            .flat_map(|seg| seg.items.iter())
            .chain(module.globals.iter().map(|g| &g.init))
            .filter_map(|c| match c {
                Constant::FuncRef(index) => Some(*index),
                _ => None,
            })
            .chain(module.exports.iter().filter_map(|e| match e.desc {
                ExportDesc::Func(index) => Some(index),
                _ => None,
            }))
            .collect();

        Self {
            module,
            func_types: module.func_type_indices(),
            tables: module.table_types(),
            memories: module.memory_types(),
            globals: module.global_types(),
            declared_funcs,
        }
    }

    pub fn ty(&self, type_index: u32) -> Option<&FuncType> {
        self.module.types.get(type_index as usize)
    }

    pub fn func_type(&self, func_index: u32) -> Option<&FuncType> {
        let type_index = *self.func_types.get(func_index as usize)?;
        self.ty(type_index)
    }

    pub fn num_funcs(&self) -> usize {
        self.func_types.len()
    }

    pub fn imported_funcs(&self) -> usize {
        self.module.imported_func_count()
    }

    /// Checks everything outside function bodies: type indices, limits,
    /// constant expressions, exports, the start function and segments.
    #[instrument(level = Level::DEBUG, skip(self))]
    pub fn validate(&self) -> Result<()> {
        for (func, &ty) in self.func_types.iter().enumerate() {
            if self.ty(ty).is_none() {
                return Err(CompileError::module(format!("unknown type {ty} for function {func}")));
            }
        }

        for table in &self.tables {
            check_limits(&table.limits, u32::MAX, "table")?;
        }
        for memory in &self.memories {
            check_limits(&memory.limits, MAX_PAGES, "memory")?;
        }

        for (index, global) in self.module.globals.iter().enumerate() {
            self.check_constant(&global.init, global.ty.ty)
                .map_err(|err| CompileError::module(format!("global {index}: {err}")))?;
        }

        for export in &self.module.exports {
            let (kind, index, len) = match export.desc {
                ExportDesc::Func(i) => ("function", i, self.num_funcs()),
                ExportDesc::Table(i) => ("table", i, self.tables.len()),
                ExportDesc::Memory(i) => ("memory", i, self.memories.len()),
                ExportDesc::Global(i) => ("global", i, self.globals.len()),
            };
            if index as usize >= len {
                return Err(CompileError::module(format!("export {:?}: unknown {kind} {index}", export.name)));
            }
        }

        if let Some(start) = self.module.start {
            let ty = self
                .func_type(start)
                .ok_or_else(|| CompileError::module(format!("unknown start function {start}")))?;
            if !ty.params.is_empty() || !ty.returns.is_empty() {
                return Err(CompileError::module(format!("start function {start} has type {ty}, expected [] -> []")));
            }
        }

        for (index, segment) in self.module.elements.iter().enumerate() {
            if let ElementMode::Active { table, offset } = &segment.mode {
                let table_ty = self
                    .tables
                    .get(*table as usize)
                    .ok_or_else(|| CompileError::module(format!("element segment {index}: unknown table {table}")))?;
                if table_ty.elem != segment.ty {
                    return Err(CompileError::module(format!(
                        "element segment {index}: type mismatch, table holds {} but segment holds {}",
                        table_ty.elem, segment.ty
                    )));
                }
                self.check_constant(offset, ValueType::I32)
                    .map_err(|err| CompileError::module(format!("element segment {index} offset: {err}")))?;
            }
            for item in &segment.items {
                self.check_constant(item, segment.ty)
                    .map_err(|err| CompileError::module(format!("element segment {index}: {err}")))?;
            }
        }

        for (index, segment) in self.module.data.iter().enumerate() {
            if let DataMode::Active { memory, offset } = &segment.mode {
                if *memory as usize >= self.memories.len() {
                    return Err(CompileError::module(format!("data segment {index}: unknown memory {memory}")));
                }
                self.check_constant(offset, ValueType::I32)
                    .map_err(|err| CompileError::module(format!("data segment {index} offset: {err}")))?;
            }
        }

        Ok(())
    }

    fn check_constant(&self, constant: &Constant, expected: ValueType) -> std::result::Result<(), String> {
        let actual = match *constant {
            Constant::I32(_) => ValueType::I32,
            Constant::I64(_) => ValueType::I64,
            Constant::F32(_) => ValueType::F32,
            Constant::F64(_) => ValueType::F64,
            Constant::Null(ty) => ty,
            Constant::FuncRef(index) => {
                if index as usize >= self.num_funcs() {
                    return Err(format!("unknown function {index}"));
                }
                ValueType::FuncRef
            }
            // only imported globals may appear in constant expressions, and
            // global imports are not supported
            Constant::GlobalRef(index) => return Err(format!("unknown global {index}")),
        };

        if actual != expected {
            return Err(format!("type mismatch: expected {expected}, found {actual}"));
        }
        Ok(())
    }
}

fn check_limits(limits: &Limits, bound: u32, what: &str) -> Result<()> {
    if limits.min > bound || limits.max.map_or(false, |max| max > bound) {
        return Err(CompileError::module(format!("{what} size must be at most {bound}")));
    }
    if let Some(max) = limits.max {
        if limits.min > max {
            return Err(CompileError::module(format!("{what} size minimum must not be greater than maximum")));
        }
    }
    Ok(())
}
