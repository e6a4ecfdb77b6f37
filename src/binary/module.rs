use std::collections::HashMap;

use num_traits::FromPrimitive;
use tracing::{debug, instrument, trace, warn, Level};

use super::{
    instruction::{decode_instruction, decode_ref_type, decode_value_type, Instruction},
    reader::Reader,
    section::SectionCode,
    types::{
        Constant, DataMode, DataSegment, ElementMode, ElementSegment, Export, ExportDesc, FuncType, FunctionBody,
        Global, GlobalType, Import, ImportDesc, Limits, MemoryType, Mutability, NameSection, TableType, ValueType,
    },
};
use crate::error::{CompileError, Result};

const WASM_MAGIC: &[u8] = b"\0asm";
const WASM_VERSION: u32 = 1;

/// Everything a binary module declares, decoded once and never mutated afterwards.
///
/// Function bodies stay undecoded; the translator walks them lazily.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Module {
    pub types: Vec<FuncType>,
    pub imports: Vec<Import>,
    pub funcs: Vec<u32>,
    pub tables: Vec<TableType>,
    pub memories: Vec<MemoryType>,
    pub globals: Vec<Global>,
    pub exports: Vec<Export>,
    pub start: Option<u32>,
    pub elements: Vec<ElementSegment>,
    pub data_count: Option<u32>,
    pub code: Vec<FunctionBody>,
    pub data: Vec<DataSegment>,
    pub names: NameSection,
}

impl Module {
    #[instrument(level = Level::DEBUG, skip(wasm), fields(len = wasm.len()))]
    pub fn new(wasm: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(wasm);

        let magic = reader.slice(4)?;
        if magic != WASM_MAGIC {
            return Err(CompileError::decode(0, "magic header not detected"));
        }
        let version = u32::from_le_bytes([reader.byte()?, reader.byte()?, reader.byte()?, reader.byte()?]);
        if version != WASM_VERSION {
            return Err(CompileError::decode(4, format!("unknown binary version {version}")));
        }

        let mut module = Module::default();
        let mut last_order = 0;

        while !reader.is_empty() {
            let (code, mut section) = decode_section_header(&mut reader)?;
            trace!(?code, offset = section.offset(), size = section.remaining(), "section");

            if code != SectionCode::Custom {
                if code.order() <= last_order {
                    return Err(section.error(format!("unexpected {code:?} section: out of order or duplicated")));
                }
                last_order = code.order();
            }

            match code {
                SectionCode::Custom => {
                    decode_custom_section(&mut section, &mut module.names)?;
                    continue;
                }
                SectionCode::Type => module.types = decode_type_section(&mut section)?,
                SectionCode::Import => module.imports = decode_import_section(&mut section)?,
                SectionCode::Function => module.funcs = decode_function_section(&mut section)?,
                SectionCode::Table => module.tables = decode_table_section(&mut section)?,
                SectionCode::Memory => module.memories = decode_memory_section(&mut section)?,
                SectionCode::Global => module.globals = decode_global_section(&mut section)?,
                SectionCode::Export => module.exports = decode_export_section(&mut section)?,
                SectionCode::Start => module.start = Some(section.u32()?),
                SectionCode::Element => module.elements = decode_element_section(&mut section)?,
                SectionCode::DataCount => module.data_count = Some(section.u32()?),
                SectionCode::Code => module.code = decode_code_section(&mut section)?,
                SectionCode::Data => module.data = decode_data_section(&mut section)?,
            }

            section.expect_end(&format!("{code:?} section"))?;
        }

        if module.funcs.len() != module.code.len() {
            return Err(CompileError::module(format!(
                "function and code section have inconsistent lengths ({} declared, {} bodies)",
                module.funcs.len(),
                module.code.len()
            )));
        }
        if let Some(count) = module.data_count {
            if count as usize != module.data.len() {
                return Err(CompileError::module(format!(
                    "data count and data section have inconsistent lengths ({count} vs {})",
                    module.data.len()
                )));
            }
        }
        if module.memories.len() + module.imported_memory_count() > 1 {
            return Err(CompileError::unsupported("multiple memories"));
        }

        debug!(
            types = module.types.len(),
            imports = module.imports.len(),
            funcs = module.funcs.len(),
            exports = module.exports.len(),
            "decoded module"
        );

        Ok(module)
    }

    pub fn imported_func_count(&self) -> usize {
        self.imports.iter().filter(|i| matches!(i.desc, ImportDesc::Func(_))).count()
    }

    pub fn imported_memory_count(&self) -> usize {
        self.imports.iter().filter(|i| matches!(i.desc, ImportDesc::Memory(_))).count()
    }

    pub fn num_funcs(&self) -> usize {
        self.imported_func_count() + self.funcs.len()
    }

    /// Type index of every function in the function index space, imports first.
    pub fn func_type_indices(&self) -> Vec<u32> {
        self.imports
            .iter()
            .filter_map(|i| match i.desc {
                ImportDesc::Func(ty) => Some(ty),
                _ => None,
            })
            .chain(self.funcs.iter().copied())
            .collect()
    }

    pub fn func_type(&self, func_index: u32) -> Option<&FuncType> {
        let ty = *self.func_type_indices().get(func_index as usize)?;
        self.types.get(ty as usize)
    }

    pub fn table_types(&self) -> Vec<TableType> {
        self.imports
            .iter()
            .filter_map(|i| match i.desc {
                ImportDesc::Table(ty) => Some(ty),
                _ => None,
            })
            .chain(self.tables.iter().copied())
            .collect()
    }

    pub fn memory_types(&self) -> Vec<MemoryType> {
        self.imports
            .iter()
            .filter_map(|i| match i.desc {
                ImportDesc::Memory(ty) => Some(ty),
                _ => None,
            })
            .chain(self.memories.iter().copied())
            .collect()
    }

    pub fn global_types(&self) -> Vec<GlobalType> {
        self.globals.iter().map(|g| g.ty).collect()
    }

    /// Exports by name. A later export with the same name replaces an earlier one.
    pub fn export_map(&self) -> HashMap<&str, ExportDesc> {
        self.exports.iter().map(|e| (e.name.as_str(), e.desc)).collect()
    }

    pub fn export(&self, name: &str) -> Option<ExportDesc> {
        self.exports.iter().rev().find(|e| e.name == name).map(|e| e.desc)
    }
}

fn decode_section_header<'a>(reader: &mut Reader<'a>) -> Result<(SectionCode, Reader<'a>)> {
    let offset = reader.offset();
    let id = reader.byte()?;
    let Some(code) = SectionCode::from_u8(id) else {
        return Err(CompileError::decode(offset, format!("malformed section id {id}")));
    };
    let size = reader.u32()? as usize;
    let section = reader.sub_reader(size)?;

    Ok((code, section))
}

fn decode_limits(reader: &mut Reader) -> Result<Limits> {
    let offset = reader.offset();
    match reader.byte()? {
        0x00 => Ok(Limits {
            min: reader.u32()?,
            max: None,
        }),
        0x01 => Ok(Limits {
            min: reader.u32()?,
            max: Some(reader.u32()?),
        }),
        flag => Err(CompileError::decode(offset, format!("integer too large: limits flag 0x{flag:02X}"))),
    }
}

fn decode_table_type(reader: &mut Reader) -> Result<TableType> {
    let elem = decode_ref_type(reader)?;
    let limits = decode_limits(reader)?;
    Ok(TableType { elem, limits })
}

fn decode_global_type(reader: &mut Reader) -> Result<GlobalType> {
    let ty = decode_value_type(reader)?;
    let offset = reader.offset();
    let mutability = match reader.byte()? {
        0 => Mutability::Const,
        1 => Mutability::Var,
        flag => return Err(CompileError::decode(offset, format!("malformed mutability 0x{flag:02X}"))),
    };
    Ok(GlobalType { ty, mutability })
}

/// A constant expression: a single constant-producing instruction followed by `end`.
pub fn decode_const_expr(reader: &mut Reader) -> Result<Constant> {
    let offset = reader.offset();

    let constant = match decode_instruction(reader)? {
        Instruction::I32Const(v) => Constant::I32(v),
        Instruction::I64Const(v) => Constant::I64(v),
        Instruction::F32Const(v) => Constant::F32(v),
        Instruction::F64Const(v) => Constant::F64(v),
        Instruction::RefNull(ty) => Constant::Null(ty),
        Instruction::RefFunc(index) => Constant::FuncRef(index),
        Instruction::GlobalGet(index) => Constant::GlobalRef(index),
        inst => return Err(CompileError::decode(offset, format!("constant expression required, found {inst:?}"))),
    };

    let end = reader.offset();
    match decode_instruction(reader)? {
        Instruction::End => Ok(constant),
        _ => Err(CompileError::decode(end, "constant expression must be a single instruction followed by end")),
    }
}

fn decode_type_section(reader: &mut Reader) -> Result<Vec<FuncType>> {
    reader.vec(|reader| {
        let offset = reader.offset();
        let form = reader.byte()?;
        if form != 0x60 {
            return Err(CompileError::decode(offset, format!("integer representation too long: type form 0x{form:02X}")));
        }

        let params = reader.vec(decode_value_type)?;
        let returns = reader.vec(decode_value_type)?;
        if returns.len() > 1 {
            return Err(CompileError::unsupported(format!("multi-value result type {returns:?}")));
        }

        Ok(FuncType { params, returns })
    })
}

fn decode_import_section(reader: &mut Reader) -> Result<Vec<Import>> {
    reader.vec(|reader| {
        let mod_name = reader.name()?;
        let field_name = reader.name()?;
        let offset = reader.offset();

        let desc = match reader.byte()? {
            0x00 => ImportDesc::Func(reader.u32()?),
            0x01 => ImportDesc::Table(decode_table_type(reader)?),
            0x02 => ImportDesc::Memory(MemoryType {
                limits: decode_limits(reader)?,
            }),
            0x03 => {
                return Err(CompileError::unsupported(format!("imported global {mod_name}.{field_name}")));
            }
            kind => return Err(CompileError::decode(offset, format!("malformed import kind 0x{kind:02X}"))),
        };

        Ok(Import {
            mod_name,
            field_name,
            desc,
        })
    })
}

fn decode_function_section(reader: &mut Reader) -> Result<Vec<u32>> {
    reader.vec(|reader| reader.u32())
}

fn decode_table_section(reader: &mut Reader) -> Result<Vec<TableType>> {
    reader.vec(decode_table_type)
}

fn decode_memory_section(reader: &mut Reader) -> Result<Vec<MemoryType>> {
    reader.vec(|reader| {
        Ok(MemoryType {
            limits: decode_limits(reader)?,
        })
    })
}

fn decode_global_section(reader: &mut Reader) -> Result<Vec<Global>> {
    reader.vec(|reader| {
        let ty = decode_global_type(reader)?;
        let init = decode_const_expr(reader)?;
        Ok(Global { ty, init })
    })
}

fn decode_export_section(reader: &mut Reader) -> Result<Vec<Export>> {
    reader.vec(|reader| {
        let name = reader.name()?;
        let offset = reader.offset();
        let kind = reader.byte()?;
        let index = reader.u32()?;

        let desc = match kind {
            0x00 => ExportDesc::Func(index),
            0x01 => ExportDesc::Table(index),
            0x02 => ExportDesc::Memory(index),
            0x03 => ExportDesc::Global(index),
            _ => return Err(CompileError::decode(offset, format!("malformed export kind 0x{kind:02X}"))),
        };

        Ok(Export { name, desc })
    })
}

fn decode_elem_kind(reader: &mut Reader) -> Result<ValueType> {
    let offset = reader.offset();
    match reader.byte()? {
        0x00 => Ok(ValueType::FuncRef),
        kind => Err(CompileError::decode(offset, format!("malformed element kind 0x{kind:02X}"))),
    }
}

fn decode_func_indices(reader: &mut Reader) -> Result<Vec<Constant>> {
    reader.vec(|reader| Ok(Constant::FuncRef(reader.u32()?)))
}

/// Flag bit 0: passive/declarative, bit 1: explicit table index (active) or
/// declarative (non-active), bit 2: items are expressions rather than indices.
fn decode_element_section(reader: &mut Reader) -> Result<Vec<ElementSegment>> {
    reader.vec(|reader| {
        let offset = reader.offset();
        let flags = reader.u32()?;

        let segment = match flags {
            0 => {
                let offset = decode_const_expr(reader)?;
                ElementSegment {
                    ty: ValueType::FuncRef,
                    mode: ElementMode::Active { table: 0, offset },
                    items: decode_func_indices(reader)?,
                }
            }
            1 | 3 => ElementSegment {
                ty: decode_elem_kind(reader)?,
                mode: if flags == 1 { ElementMode::Passive } else { ElementMode::Declarative },
                items: decode_func_indices(reader)?,
            },
            2 => {
                let table = reader.u32()?;
                let offset = decode_const_expr(reader)?;
                ElementSegment {
                    ty: decode_elem_kind(reader)?,
                    mode: ElementMode::Active { table, offset },
                    items: decode_func_indices(reader)?,
                }
            }
            4 => {
                let offset = decode_const_expr(reader)?;
                ElementSegment {
                    ty: ValueType::FuncRef,
                    mode: ElementMode::Active { table: 0, offset },
                    items: reader.vec(decode_const_expr)?,
                }
            }
            5 | 7 => ElementSegment {
                ty: decode_ref_type(reader)?,
                mode: if flags == 5 { ElementMode::Passive } else { ElementMode::Declarative },
                items: reader.vec(decode_const_expr)?,
            },
            6 => {
                let table = reader.u32()?;
                let offset = decode_const_expr(reader)?;
                ElementSegment {
                    ty: decode_ref_type(reader)?,
                    mode: ElementMode::Active { table, offset },
                    items: reader.vec(decode_const_expr)?,
                }
            }
            _ => return Err(CompileError::decode(offset, format!("malformed elements segment kind {flags}"))),
        };

        Ok(segment)
    })
}

fn decode_code_section(reader: &mut Reader) -> Result<Vec<FunctionBody>> {
    reader.vec(|reader| {
        let size = reader.u32()? as usize;
        let offset = reader.offset();
        let bytes = reader.slice(size)?;
        Ok(FunctionBody {
            offset,
            bytes: bytes.to_vec(),
        })
    })
}

fn decode_data_section(reader: &mut Reader) -> Result<Vec<DataSegment>> {
    reader.vec(|reader| {
        let offset = reader.offset();
        let mode = match reader.u32()? {
            0 => DataMode::Active {
                memory: 0,
                offset: decode_const_expr(reader)?,
            },
            1 => DataMode::Passive,
            2 => {
                let memory = reader.u32()?;
                DataMode::Active {
                    memory,
                    offset: decode_const_expr(reader)?,
                }
            }
            flags => return Err(CompileError::decode(offset, format!("malformed data segment kind {flags}"))),
        };
        let len = reader.u32()? as usize;
        let bytes = reader.slice(len)?.to_vec();

        Ok(DataSegment { mode, bytes })
    })
}

/// Custom sections never fail the module: the name section is decoded on a
/// best-effort basis and everything else is skipped. Only the custom
/// section's own name must be well formed.
fn decode_custom_section(reader: &mut Reader, names: &mut NameSection) -> Result<()> {
    let name = reader.name()?;
    if name != "name" {
        trace!(name, "skipping custom section");
        return Ok(());
    }

    let mut attempt = reader.clone();
    match decode_name_section(&mut attempt) {
        Ok(decoded) => *names = decoded,
        Err(err) => warn!(%err, "ignoring malformed name section"),
    }
    Ok(())
}

fn decode_name_section(reader: &mut Reader) -> Result<NameSection> {
    let mut names = NameSection::default();

    while !reader.is_empty() {
        let id = reader.byte()?;
        let size = reader.u32()? as usize;
        let mut sub = reader.sub_reader(size)?;

        match id {
            0 => names.module = Some(sub.name()?),
            1 => {
                names.functions = sub.vec(|r| {
                    let index = r.u32()?;
                    Ok((index, r.name()?))
                })?
            }
            _ => {}
        }
    }

    Ok(names)
}

#[cfg(test)]
mod decoder_tests {
    use super::*;
    use anyhow::Result;
    use pretty_assertions::assert_eq;

    fn section(bytes: &[u8]) -> Reader<'_> {
        Reader::new(bytes)
    }

    #[test]
    fn decode_simplest_module() -> Result<()> {
        // preamble only
        let wasm = wat::parse_str("(module)")?;
        let module = Module::new(&wasm)?;
        assert_eq!(module, Module::default());
        Ok(())
    }

    #[test]
    fn decode_simplest_fn() -> Result<()> {
        let wasm = wat::parse_str("(module (func))")?;
        let module = Module::new(&wasm)?;

        assert_eq!(vec![FuncType::default()], module.types);
        assert_eq!(vec![0], module.funcs);
        assert_eq!(1, module.code.len());
        // no local groups, then `end`
        assert_eq!(vec![0x00, 0x0B], module.code[0].bytes);
        Ok(())
    }

    #[test]
    fn decode_fn_with_params_and_result() -> Result<()> {
        let wasm = wat::parse_str("(module (func (param i32 i64) (result f64) f64.const 0))")?;
        let module = Module::new(&wasm)?;

        assert_eq!(
            vec![FuncType::new([ValueType::I32, ValueType::I64], [ValueType::F64])],
            module.types
        );
        assert_eq!(Some(&module.types[0]), module.func_type(0));
        Ok(())
    }

    #[test]
    fn decode_exports_last_writer_wins() -> Result<()> {
        let wasm = wat::parse_str(r#"(module (func $a) (func $b) (export "a" (func $a)) (export "b" (func $b)))"#)?;
        let mut module = Module::new(&wasm)?;
        module.exports.push(Export {
            name: "a".to_string(),
            desc: ExportDesc::Func(1),
        });

        assert_eq!(Some(ExportDesc::Func(1)), module.export("a"));
        assert_eq!(Some(&ExportDesc::Func(1)), module.export_map().get("a"));
        assert_eq!(None, module.export("c"));
        Ok(())
    }

    #[test]
    fn decode_simplest_fn_imported() -> Result<()> {
        let wasm = wat::parse_str(r#"(module (func $dummy (import "env" "dummy") (param i32) (result i32)))"#)?;
        let module = Module::new(&wasm)?;

        assert_eq!(
            vec![Import {
                mod_name: "env".to_string(),
                field_name: "dummy".to_string(),
                desc: ImportDesc::Func(0)
            }],
            module.imports
        );
        assert_eq!(1, module.num_funcs());
        assert_eq!(1, module.imported_func_count());
        Ok(())
    }

    #[test]
    fn decode_imported_global_is_unsupported() -> Result<()> {
        let wasm = wat::parse_str(r#"(module (global (import "env" "g") i32))"#)?;
        let err = Module::new(&wasm).unwrap_err();
        assert!(matches!(err, CompileError::Unsupported(_)), "{err}");
        Ok(())
    }

    #[test]
    fn decode_multi_value_is_unsupported() -> Result<()> {
        let wasm = wat::parse_str("(module (type (func (result i32 i32))))")?;
        assert!(matches!(Module::new(&wasm), Err(CompileError::Unsupported(_))));
        Ok(())
    }

    #[test]
    fn decode_memory_sections() -> Result<()> {
        let expected = vec![
            MemoryType {
                limits: Limits { min: 2, max: Some(3) },
            },
            MemoryType {
                limits: Limits { min: 1, max: None },
            },
        ];

        assert_eq!(expected, decode_memory_section(&mut section(&[0x02, 0x01, 0x02, 0x03, 0, 0x01]))?);
        Ok(())
    }

    #[test]
    fn decode_globals() -> Result<()> {
        let wasm = wat::parse_str("(module (global (mut i64) (i64.const -7)) (global f32 (f32.const 1.5)))")?;
        let module = Module::new(&wasm)?;

        assert_eq!(
            vec![
                Global {
                    ty: GlobalType { ty: ValueType::I64, mutability: Mutability::Var },
                    init: Constant::I64(-7)
                },
                Global {
                    ty: GlobalType { ty: ValueType::F32, mutability: Mutability::Const },
                    init: Constant::F32(1.5)
                },
            ],
            module.globals
        );
        Ok(())
    }

    #[test]
    fn decode_data_sections() -> Result<()> {
        let expected = vec![
            DataSegment {
                mode: DataMode::Active { memory: 0, offset: Constant::I32(0) },
                bytes: Vec::from("Hello\n"),
            },
            DataSegment {
                mode: DataMode::Passive,
                bytes: vec![1, 2],
            },
        ];

        let bytes = [
            0x02, 0, 0x41, 0, 0x0b, 0x06, 0x48, 0x65, 0x6c, 0x6c, 0x6f, 0x0a, 0x01, 0x02, 0x01, 0x02,
        ];
        assert_eq!(expected, decode_data_section(&mut section(&bytes))?);
        Ok(())
    }

    #[test]
    fn decode_element_encodings() -> Result<()> {
        let wasm = wat::parse_str(
            r#"(module
                (table 4 funcref)
                (func $f)
                (elem (i32.const 1) $f $f)
                (elem func $f)
                (elem declare func $f)
                (elem (table 0) (i32.const 0) funcref (ref.null func) (ref.func $f)))"#,
        )?;
        let module = Module::new(&wasm)?;

        assert_eq!(4, module.elements.len());
        assert_eq!(
            ElementMode::Active { table: 0, offset: Constant::I32(1) },
            module.elements[0].mode
        );
        assert_eq!(vec![Constant::FuncRef(0), Constant::FuncRef(0)], module.elements[0].items);
        assert_eq!(ElementMode::Passive, module.elements[1].mode);
        assert_eq!(ElementMode::Declarative, module.elements[2].mode);
        assert_eq!(vec![Constant::Null(ValueType::FuncRef), Constant::FuncRef(0)], module.elements[3].items);
        Ok(())
    }

    #[test]
    fn decode_explicit_table_and_expression_encodings() -> Result<()> {
        let bytes = [
            0x03,
            // 2: active on table 1 at offset 3, elemkind funcref, indices 0 and 1
            0x02, 0x01, 0x41, 0x03, 0x0b, 0x00, 0x02, 0x00, 0x01,
            // 5: passive funcref expressions
            0x05, 0x70, 0x02, 0xd0, 0x70, 0x0b, 0xd2, 0x00, 0x0b,
            // 7: declarative externref expressions
            0x07, 0x6f, 0x01, 0xd0, 0x6f, 0x0b,
        ];

        let expected = vec![
            ElementSegment {
                ty: ValueType::FuncRef,
                mode: ElementMode::Active { table: 1, offset: Constant::I32(3) },
                items: vec![Constant::FuncRef(0), Constant::FuncRef(1)],
            },
            ElementSegment {
                ty: ValueType::FuncRef,
                mode: ElementMode::Passive,
                items: vec![Constant::Null(ValueType::FuncRef), Constant::FuncRef(0)],
            },
            ElementSegment {
                ty: ValueType::ExternRef,
                mode: ElementMode::Declarative,
                items: vec![Constant::Null(ValueType::ExternRef)],
            },
        ];
        assert_eq!(expected, decode_element_section(&mut section(&bytes))?);
        Ok(())
    }

    #[test]
    fn decode_data_with_explicit_memory() -> Result<()> {
        let bytes = [0x02, 0x02, 0x00, 0x41, 0x08, 0x0b, 0x02, 0xaa, 0xbb, 0x02, 0x01, 0x41, 0x00, 0x0b, 0x00];

        let expected = vec![
            DataSegment {
                mode: DataMode::Active { memory: 0, offset: Constant::I32(8) },
                bytes: vec![0xaa, 0xbb],
            },
            DataSegment {
                mode: DataMode::Active { memory: 1, offset: Constant::I32(0) },
                bytes: vec![],
            },
        ];
        assert_eq!(expected, decode_data_section(&mut section(&bytes))?);
        Ok(())
    }

    #[test]
    fn decode_name_section() -> Result<()> {
        let wasm = wat::parse_str(r#"(module $m (func $first) (func $second))"#)?;
        let module = Module::new(&wasm)?;

        assert_eq!(Some("m".to_string()), module.names.module);
        assert_eq!(Some("second"), module.names.function(1));
        Ok(())
    }

    #[test]
    fn malformed_name_section_is_ignored() -> Result<()> {
        let mut wasm = wat::parse_str("(module)")?;
        // custom section "name" holding a function-name subsection cut short
        wasm.extend_from_slice(&[0x00, 0x08, 0x04, b'n', b'a', b'm', b'e', 0x01, 0x05, 0x01]);

        let module = Module::new(&wasm)?;
        assert_eq!(NameSection::default(), module.names);
        Ok(())
    }

    #[test]
    fn truncated_section_is_a_decode_error() -> Result<()> {
        let mut wasm = wat::parse_str("(module (func))")?;
        wasm.truncate(wasm.len() - 1);

        let err = Module::new(&wasm).unwrap_err();
        assert!(matches!(err, CompileError::Decode { .. }), "{err}");
        Ok(())
    }

    #[test]
    fn section_length_mismatch_is_a_decode_error() -> Result<()> {
        // type section claims 5 bytes but its single type only needs 4
        let wasm = [
            0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00, 0x01, 0x05, 0x01, 0x60, 0x00, 0x00, 0x00,
        ];
        let err = Module::new(&wasm).unwrap_err();
        assert!(err.to_string().contains("size mismatch"), "{err}");
        Ok(())
    }

    #[test]
    fn sections_out_of_order_are_rejected() {
        let wasm = [
            0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00, // preamble
            0x03, 0x01, 0x00, // function section, no functions
            0x01, 0x01, 0x00, // type section after it
        ];
        assert!(Module::new(&wasm).is_err());
    }

    #[test]
    fn bad_preamble_is_rejected() {
        assert!(Module::new(b"\0asn\x01\0\0\0").is_err());
        assert!(Module::new(b"\0asm\x02\0\0\0").is_err());
        assert!(Module::new(b"\0as").is_err());
    }

    #[test]
    fn missing_code_section_is_rejected() {
        let wasm = [
            0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00, // preamble
            0x01, 0x04, 0x01, 0x60, 0x00, 0x00, // type ()->()
            0x03, 0x02, 0x01, 0x00, // one function, no code section
        ];
        let err = Module::new(&wasm).unwrap_err();
        assert!(err.to_string().contains("inconsistent lengths"), "{err}");
    }
}
