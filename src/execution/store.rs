use std::collections::{HashMap, HashSet};

use tracing::{debug, instrument, Level};

use super::{
    imports::{kind_mismatch, limits_match, Extern, HostFunc, Imports, LinkError},
    memory::Memory,
    table::Table,
    value::Value,
};
use crate::binary::{
    module::Module,
    types::{Constant, ExportDesc, FuncType, ImportDesc},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FuncInst {
    /// A compiled function of this module.
    Internal { ty: FuncType },
    /// An imported function bound to the host function at `host`.
    External {
        ty: FuncType,
        module: String,
        name: String,
        host: usize,
    },
}

impl FuncInst {
    pub fn ty(&self) -> &FuncType {
        match self {
            FuncInst::Internal { ty } | FuncInst::External { ty, .. } => ty,
        }
    }
}

/// Everything an instance owns at run time.
#[derive(Debug, Default)]
pub struct Store {
    pub types: Vec<FuncType>,
    pub funcs: Vec<FuncInst>,
    pub tables: Vec<Table>,
    pub memories: Vec<Memory>,
    pub globals: Vec<Value>,
    /// Passive data segments; dropped ones are empty.
    pub data: Vec<Vec<u8>>,
    /// Element segments as reference values; dropped ones are empty.
    pub elements: Vec<Vec<Value>>,
    pub exports: HashMap<String, ExportDesc>,
}

impl Store {
    /// Binds imports and allocates everything the module defines.
    ///
    /// Globals and segment contents are evaluated here, but nothing is
    /// written into memories or tables yet.
    #[instrument(level = Level::DEBUG, skip_all)]
    pub fn new(module: &Module, imports: &mut Imports) -> Result<(Self, Vec<HostFunc>), LinkError> {
        let mut store = Store {
            types: module.types.clone(),
            ..Default::default()
        };
        let mut host: Vec<HostFunc> = vec![];

        // A (module, name) pair may be imported more than once; functions
        // then share one host binding.
        let mut bound: HashMap<(&str, &str), usize> = HashMap::new();
        let mut taken = HashSet::new();

        for import in &module.imports {
            let (mod_name, name) = (import.mod_name.as_str(), import.field_name.as_str());

            if let (ImportDesc::Func(index), Some(&host_index)) = (&import.desc, bound.get(&(mod_name, name))) {
                let ty = imported_func_type(module, mod_name, name, *index, &host[host_index])?;
                store.funcs.push(FuncInst::External {
                    ty,
                    module: mod_name.to_string(),
                    name: name.to_string(),
                    host: host_index,
                });
                continue;
            }
            if !taken.insert((mod_name, name)) {
                return Err(LinkError::Aliased {
                    module: mod_name.to_string(),
                    name: name.to_string(),
                });
            }

            let binding = imports.take(mod_name, name)?;

            match (&import.desc, binding) {
                (ImportDesc::Func(index), Extern::Func(func)) => {
                    let ty = imported_func_type(module, mod_name, name, *index, &func)?;
                    bound.insert((mod_name, name), host.len());
                    store.funcs.push(FuncInst::External {
                        ty,
                        module: mod_name.to_string(),
                        name: name.to_string(),
                        host: host.len(),
                    });
                    host.push(func);
                }
                (ImportDesc::Memory(ty), Extern::Memory(memory)) => {
                    if !limits_match(&memory.ty().limits, &ty.limits) {
                        return Err(LinkError::LimitsMismatch {
                            module: mod_name.to_string(),
                            name: name.to_string(),
                        });
                    }
                    store.memories.push(memory);
                }
                (ImportDesc::Table(ty), Extern::Table(table)) => {
                    let actual = table.ty();
                    if actual.elem != ty.elem {
                        return Err(kind_mismatch(mod_name, name, "table of matching type", &Extern::Table(table)));
                    }
                    if !limits_match(&actual.limits, &ty.limits) {
                        return Err(LinkError::LimitsMismatch {
                            module: mod_name.to_string(),
                            name: name.to_string(),
                        });
                    }
                    store.tables.push(table);
                }
                (desc, binding) => {
                    let expected = match desc {
                        ImportDesc::Func(_) => "function",
                        ImportDesc::Memory(_) => "memory",
                        ImportDesc::Table(_) => "table",
                    };
                    return Err(kind_mismatch(mod_name, name, expected, &binding));
                }
            }
        }

        for &index in &module.funcs {
            let ty = module.types.get(index as usize).cloned().unwrap_or_default();
            store.funcs.push(FuncInst::Internal { ty });
        }
        for &ty in &module.tables {
            store.tables.push(Table::new(ty)?);
        }
        for &ty in &module.memories {
            store.memories.push(Memory::new(ty)?);
        }

        for global in &module.globals {
            let value = store.constant(&global.init).unwrap_or(Value::zero(global.ty.ty));
            store.globals.push(value);
        }

        store.data = module.data.iter().map(|seg| seg.bytes.clone()).collect();
        store.elements = module
            .elements
            .iter()
            .map(|seg| seg.items.iter().filter_map(|item| store.constant(item)).collect())
            .collect();
        store.exports = module
            .export_map()
            .into_iter()
            .map(|(name, desc)| (name.to_string(), desc))
            .collect();

        debug!(
            funcs = store.funcs.len(),
            tables = store.tables.len(),
            memories = store.memories.len(),
            globals = store.globals.len(),
            "allocated store"
        );
        Ok((store, host))
    }

    /// Value of a constant expression. Global references can only name
    /// imported globals, which never exist here.
    pub fn constant(&self, constant: &Constant) -> Option<Value> {
        let value = match *constant {
            Constant::I32(v) => Value::I32(v),
            Constant::I64(v) => Value::I64(v),
            Constant::F32(v) => Value::F32(v),
            Constant::F64(v) => Value::F64(v),
            Constant::Null(ty) => Value::zero(ty),
            Constant::FuncRef(index) => Value::FuncRef(Some(index)),
            Constant::GlobalRef(index) => return self.globals.get(index as usize).copied(),
        };
        Some(value)
    }

    pub fn memory(&self) -> Option<&Memory> {
        self.memories.first()
    }

    pub fn memory_mut(&mut self) -> Option<&mut Memory> {
        self.memories.first_mut()
    }
}

/// The declared type of an imported function, checked against its binding.
fn imported_func_type(
    module: &Module,
    mod_name: &str,
    name: &str,
    index: u32,
    func: &HostFunc,
) -> Result<FuncType, LinkError> {
    let Some(ty) = module.types.get(index as usize) else {
        return Err(LinkError::UnknownType {
            module: mod_name.to_string(),
            name: name.to_string(),
            index,
        });
    };
    if *ty != func.ty {
        return Err(LinkError::SignatureMismatch {
            module: mod_name.to_string(),
            name: name.to_string(),
            expected: ty.clone(),
            actual: func.ty.clone(),
        });
    }
    Ok(ty.clone())
}

#[cfg(test)]
mod store_tests {
    use super::*;
    use crate::binary::types::{Limits, MemoryType, TableType, ValueType};
    use anyhow::Result;
    use pretty_assertions::assert_eq;

    #[test]
    fn imports_come_first_in_every_index_space() -> Result<()> {
        let module = Module::new(&wat::parse_str(
            r#"(module
                (import "env" "f" (func (param i32)))
                (import "env" "mem" (memory 1))
                (table 2 funcref)
                (func (export "g"))
                (global i64 (i64.const 3))
                (global funcref (ref.func 1))
                (elem declare func 1))"#,
        )?)?;

        let mut imports = Imports::new();
        imports
            .add_func("env", "f", FuncType::new([ValueType::I32], vec![]), |_, _| Ok(None))
            .add_memory(
                "env",
                "mem",
                Memory::new(MemoryType {
                    limits: Limits { min: 1, max: None },
                })?,
            );

        let (store, host) = Store::new(&module, &mut imports)?;
        assert_eq!(1, host.len());
        assert!(matches!(store.funcs[0], FuncInst::External { host: 0, .. }));
        assert!(matches!(store.funcs[1], FuncInst::Internal { .. }));
        assert_eq!(Some(1), store.memory().map(Memory::pages));
        assert_eq!(2, store.tables[0].size());
        assert_eq!(vec![Value::I64(3), Value::FuncRef(Some(1))], store.globals);
        assert_eq!(Some(&ExportDesc::Func(1)), store.exports.get("g"));
        Ok(())
    }

    #[test]
    fn mismatched_imports_fail_to_link() -> Result<()> {
        let module = Module::new(&wat::parse_str(r#"(module (import "env" "f" (func (param i32))))"#)?)?;

        let mut imports = Imports::new();
        imports.add_func("env", "f", FuncType::new([ValueType::I64], vec![]), |_, _| Ok(None));
        assert!(matches!(
            Store::new(&module, &mut imports),
            Err(LinkError::SignatureMismatch { .. })
        ));

        let mut imports = Imports::new();
        imports.add_memory("env", "f", Memory::default());
        assert!(matches!(Store::new(&module, &mut imports), Err(LinkError::KindMismatch { .. })));

        assert!(matches!(Store::new(&module, &mut Imports::new()), Err(LinkError::Missing { .. })));
        Ok(())
    }

    #[test]
    fn repeated_function_imports_share_one_binding() -> Result<()> {
        let module = Module::new(&wat::parse_str(
            r#"(module
                (import "env" "f" (func (param i32) (result i32)))
                (import "env" "f" (func (param i32) (result i32))))"#,
        )?)?;

        let mut imports = Imports::new();
        imports.add_func("env", "f", FuncType::new([ValueType::I32], [ValueType::I32]), |_, args| {
            Ok(args.first().copied())
        });

        let (store, host) = Store::new(&module, &mut imports)?;
        assert_eq!(1, host.len());
        assert!(matches!(store.funcs[0], FuncInst::External { host: 0, .. }));
        assert!(matches!(store.funcs[1], FuncInst::External { host: 0, .. }));
        Ok(())
    }

    #[test]
    fn repeated_imports_still_check_signatures() -> Result<()> {
        let module = Module::new(&wat::parse_str(
            r#"(module
                (import "env" "f" (func (param i32)))
                (import "env" "f" (func (param i64))))"#,
        )?)?;

        let mut imports = Imports::new();
        imports.add_func("env", "f", FuncType::new([ValueType::I32], vec![]), |_, _| Ok(None));
        assert!(matches!(
            Store::new(&module, &mut imports),
            Err(LinkError::SignatureMismatch { .. })
        ));
        Ok(())
    }

    #[test]
    fn repeated_table_imports_cannot_alias() -> Result<()> {
        let module = Module::new(&wat::parse_str(
            r#"(module
                (import "env" "t" (table 1 funcref))
                (import "env" "t" (table 1 funcref)))"#,
        )?)?;

        let mut imports = Imports::new();
        imports.add_table(
            "env",
            "t",
            Table::new(TableType {
                elem: ValueType::FuncRef,
                limits: Limits { min: 1, max: None },
            })?,
        );
        assert!(matches!(Store::new(&module, &mut imports), Err(LinkError::Aliased { .. })));
        Ok(())
    }
}
