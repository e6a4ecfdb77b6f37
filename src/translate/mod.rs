//! Validation and lowering of function bodies into [`crate::codegen::Op`] streams.

pub mod env;
pub mod function;
pub mod locals;
pub mod stack;

use tracing::{debug, instrument, Level};

use crate::{
    binary::{
        module::Module,
        types::{ExportDesc, FuncType},
    },
    codegen::{Code, CodeBuffer, NameInterner},
    error::{CompileError, Result},
    Config,
};

pub use env::ModuleEnv;
pub use function::FuncTranslator;
pub use locals::FrameLayout;

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFunction {
    /// Index in the function index space, imports included.
    pub index: u32,
    pub symbol: String,
    pub ty: FuncType,
    pub layout: FrameLayout,
    pub code: Code,
}

/// Every defined function of one module, translated.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledModule {
    pub imported_funcs: usize,
    pub functions: Vec<CompiledFunction>,
}

impl CompiledModule {
    /// The compiled body of `index`, or `None` for imports and unknown indices.
    pub fn function(&self, index: u32) -> Option<&CompiledFunction> {
        let defined = (index as usize).checked_sub(self.imported_funcs)?;
        self.functions.get(defined)
    }
}

/// Validates the whole module and translates every defined function.
///
/// Translation is all or nothing: the first error aborts and no partially
/// compiled module is returned.
#[instrument(level = Level::DEBUG, skip_all, fields(funcs = module.code.len()))]
pub fn compile(module: &Module, config: &Config) -> Result<CompiledModule> {
    let env = ModuleEnv::new(module);
    env.validate()?;

    let imported_funcs = env.imported_funcs();
    let mut names = NameInterner::new();
    let mut functions = Vec::with_capacity(module.code.len());

    for (defined, body) in module.code.iter().enumerate() {
        let index = (imported_funcs + defined) as u32;
        let mut buf = CodeBuffer::new();
        let layout = FuncTranslator::translate(&env, index, body, config, &mut buf)?;

        let code = buf.finish().map_err(|err| CompileError::Validate {
            func: index,
            offset: body.offset,
            message: format!("internal error: {err}"),
        })?;
        let ty = env.func_type(index).cloned().unwrap_or_default();
        let symbol = names.intern(&symbol_base(module, index));

        debug!(index, %symbol, ops = code.ops.len(), slots = layout.max_slots, "compiled function");
        functions.push(CompiledFunction {
            index,
            symbol,
            ty,
            layout,
            code,
        });
    }

    Ok(CompiledModule {
        imported_funcs,
        functions,
    })
}

/// The debug name if there is one, then the first export name, then the index.
fn symbol_base(module: &Module, index: u32) -> String {
    if let Some(name) = module.names.function(index) {
        return name.to_string();
    }

    module
        .exports
        .iter()
        .find(|e| e.desc == ExportDesc::Func(index))
        .map(|e| e.name.clone())
        .unwrap_or_else(|| format!("func{index}"))
}

#[cfg(test)]
mod translate_tests {
    use super::*;
    use crate::codegen::Op;
    use anyhow::Result;
    use pretty_assertions::assert_eq;

    fn compile_wat(wat: &str) -> Result<std::result::Result<CompiledModule, CompileError>> {
        let module = Module::new(&wat::parse_str(wat)?)?;
        Ok(compile(&module, &Config::default()))
    }

    #[test]
    fn symbols_prefer_debug_names_then_exports() -> Result<()> {
        let compiled = compile_wat(
            r#"(module
                (import "env" "log" (func (param i32)))
                (func $first)
                (func (export "second"))
                (func)
                (func $second))"#,
        )??;

        let symbols: Vec<&str> = compiled.functions.iter().map(|f| f.symbol.as_str()).collect();
        assert_eq!(vec!["first", "second", "func3", "second_1"], symbols);
        assert_eq!(1, compiled.imported_funcs);
        assert_eq!(Some(3), compiled.function(3).map(|f| f.index));
        assert_eq!(None, compiled.function(0));
        Ok(())
    }

    #[test]
    fn one_bad_function_fails_the_module() -> Result<()> {
        let err = compile_wat("(module (func) (func (result i32) f32.const 0))")?.unwrap_err();
        assert!(matches!(err, CompileError::Validate { func: 1, .. }), "{err:?}");
        Ok(())
    }

    #[test]
    fn module_level_errors_come_first() -> Result<()> {
        let err = compile_wat("(module (func $s (result i32) i32.const 0) (start $s))")?.unwrap_err();
        assert!(matches!(err, CompileError::Module(_)), "{err:?}");
        Ok(())
    }

    #[test]
    fn division_compiles_to_a_checked_numeric_op() -> Result<()> {
        let compiled = compile_wat("(module (func (result i32) i32.const 5 i32.const 0 i32.div_s))")??;
        let ops = &compiled.functions[0].code.ops;
        assert_eq!(
            &vec![
                Op::I32Const(5),
                Op::I32Const(0),
                Op::Numeric(crate::binary::opcode::NumericOp::I32DivS),
                Op::Return
            ],
            ops
        );
        Ok(())
    }
}
