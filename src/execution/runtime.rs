use thiserror::Error;
use tracing::{debug, instrument, trace, Level};

use super::{
    eval::{eval, EvalError},
    imports::{HostFunc, Imports, LinkError},
    store::{FuncInst, Store},
    value::Value,
};
use crate::{
    binary::{
        module::Module,
        types::{Constant, DataMode, ElementMode, ExportDesc, FuncType, ValueType},
    },
    codegen::Op,
    error::CompileError,
    translate::{compile, CompiledFunction, CompiledModule},
    trap::Trap,
    Config,
};

/// Everything that can go wrong between receiving module bytes and getting a
/// result back from one of its exports.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error(transparent)]
    Trap(#[from] Trap),
    #[error("export {0:?} not found")]
    ExportNotFound(String),
    #[error("export {0:?} is not a function")]
    NotAFunction(String),
    #[error("function {func} has type {expected}, called with {actual:?}")]
    ArgumentMismatch {
        func: u32,
        expected: FuncType,
        actual: Vec<ValueType>,
    },
    #[error("host function {module}.{name} failed: {message}")]
    Host {
        module: String,
        name: String,
        message: String,
    },
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<EvalError> for RuntimeError {
    fn from(err: EvalError) -> Self {
        match err {
            EvalError::Trap(trap) => RuntimeError::Trap(trap),
            err @ EvalError::Operands(..) => RuntimeError::Internal(err.to_string()),
        }
    }
}

fn internal(message: impl Into<String>) -> RuntimeError {
    RuntimeError::Internal(message.into())
}

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Index in the function index space.
    pub func: u32,
    pub pc: usize,
    pub slots: Vec<Value>,
    /// Operand stack height below this frame's values.
    pub sp: usize,
    pub arity: usize,
}

/// One instantiated module: its compiled code, its store and the machine
/// state of whatever call is in progress.
#[derive(Debug)]
pub struct Runtime {
    pub store: Store,
    pub compiled: CompiledModule,
    pub stack: Vec<Value>,
    pub call_stack: Vec<Frame>,
    host: Vec<HostFunc>,
    config: Config,
}

impl Runtime {
    pub fn instantiate(wasm: impl AsRef<[u8]>) -> Result<Self, RuntimeError> {
        Self::instantiate_with_imports(wasm, Imports::default())
    }

    pub fn instantiate_with_imports(wasm: impl AsRef<[u8]>, imports: Imports) -> Result<Self, RuntimeError> {
        Self::instantiate_with_config(wasm, imports, Config::default())
    }

    /// Decodes, compiles and links the module, then initializes it: active
    /// segments are written (a trap here fails instantiation), declarative
    /// ones dropped, and the start function run.
    #[instrument(level = Level::DEBUG, skip_all, fields(size = wasm.as_ref().len()))]
    pub fn instantiate_with_config(
        wasm: impl AsRef<[u8]>,
        mut imports: Imports,
        config: Config,
    ) -> Result<Self, RuntimeError> {
        let module = Module::new(wasm.as_ref())?;
        let compiled = compile(&module, &config)?;
        let (store, host) = Store::new(&module, &mut imports)?;

        let mut runtime = Runtime {
            store,
            compiled,
            stack: vec![],
            call_stack: vec![],
            host,
            config,
        };
        runtime.initialize(&module)?;

        if let Some(start) = module.start {
            debug!(start, "running start function");
            runtime.call_with_index(start, vec![])?;
        }
        Ok(runtime)
    }

    fn initialize(&mut self, module: &Module) -> Result<(), RuntimeError> {
        for (index, segment) in module.elements.iter().enumerate() {
            match &segment.mode {
                ElementMode::Active { table, offset } => {
                    let offset = self.offset(offset)?;
                    let items = std::mem::take(&mut self.store.elements[index]);
                    let table = self
                        .store
                        .tables
                        .get_mut(*table as usize)
                        .ok_or_else(|| internal(format!("unknown table {table}")))?;
                    table.init(offset, &items, 0, items.len() as u32)?;
                }
                ElementMode::Declarative => self.store.elements[index].clear(),
                ElementMode::Passive => {}
            }
        }

        for (index, segment) in module.data.iter().enumerate() {
            if let DataMode::Active { offset, .. } = &segment.mode {
                let offset = self.offset(offset)?;
                let bytes = std::mem::take(&mut self.store.data[index]);
                let memory = self.store.memory_mut().ok_or_else(|| internal("no memory for data segment"))?;
                memory.init(offset, &bytes, 0, bytes.len() as u32)?;
            }
        }

        Ok(())
    }

    fn offset(&self, offset: &Constant) -> Result<u32, RuntimeError> {
        match self.store.constant(offset) {
            Some(Value::I32(offset)) => Ok(offset as u32),
            other => Err(internal(format!("segment offset evaluated to {other:?}"))),
        }
    }

    pub fn call(&mut self, name: &str, args: Vec<Value>) -> Result<Option<Value>, RuntimeError> {
        let Some(export) = self.store.exports.get(name) else {
            return Err(RuntimeError::ExportNotFound(name.to_string()));
        };

        match *export {
            ExportDesc::Func(index) => self.call_with_index(index, args),
            _ => Err(RuntimeError::NotAFunction(name.to_string())),
        }
    }

    #[instrument(level = Level::TRACE, skip(self))]
    pub fn call_with_index(&mut self, index: u32, args: Vec<Value>) -> Result<Option<Value>, RuntimeError> {
        let Some(func) = self.store.funcs.get(index as usize) else {
            return Err(internal(format!("function {index} not found")));
        };

        let ty = func.ty();
        let actual: Vec<ValueType> = args.iter().map(Value::ty).collect();
        if actual != ty.params {
            return Err(RuntimeError::ArgumentMismatch {
                func: index,
                expected: ty.clone(),
                actual,
            });
        }

        self.stack.extend(args);
        let result = self.execute_call(index);
        if result.is_err() {
            self.stack.clear();
            self.call_stack.clear();
        }
        result
    }

    fn execute_call(&mut self, index: u32) -> Result<Option<Value>, RuntimeError> {
        let Runtime {
            store,
            compiled,
            stack,
            call_stack,
            host,
            config,
        } = self;

        let mut machine = Machine {
            store,
            compiled,
            stack,
            frames: call_stack,
            host,
            max_depth: config.max_call_depth,
        };
        let arity = machine.store.funcs[index as usize].ty().returns.len();

        machine.invoke(index)?;
        machine.run()?;

        match arity {
            0 => Ok(None),
            _ => machine.pop().map(Some),
        }
    }
}

/// The parts of a [`Runtime`] the interpreter loop works on, borrowed apart.
struct Machine<'r> {
    store: &'r mut Store,
    compiled: &'r CompiledModule,
    stack: &'r mut Vec<Value>,
    frames: &'r mut Vec<Frame>,
    host: &'r mut [HostFunc],
    max_depth: usize,
}

impl<'r> Machine<'r> {
    fn run(&mut self) -> Result<(), RuntimeError> {
        let compiled = self.compiled;

        while let Some(frame) = self.frames.last_mut() {
            let func = compiled
                .function(frame.func)
                .ok_or_else(|| internal(format!("function {} is not compiled", frame.func)))?;
            let op = func
                .code
                .ops
                .get(frame.pc)
                .ok_or_else(|| internal(format!("ran off the end of {}", func.symbol)))?;

            trace!(func = %func.symbol, pc = frame.pc, ?op);
            frame.pc += 1;
            self.step(func, op)?;
        }

        Ok(())
    }

    fn frame(&mut self) -> Result<&mut Frame, RuntimeError> {
        self.frames.last_mut().ok_or_else(|| internal("no active frame"))
    }

    fn push(&mut self, value: impl Into<Value>) {
        self.stack.push(value.into());
    }

    fn pop(&mut self) -> Result<Value, RuntimeError> {
        self.stack.pop().ok_or_else(|| internal("operand stack underflow"))
    }

    fn pop_i32(&mut self) -> Result<i32, RuntimeError> {
        let value = self.pop()?;
        value.as_i32().ok_or_else(|| internal(format!("expected i32, found {value}")))
    }

    fn pop_u32(&mut self) -> Result<u32, RuntimeError> {
        Ok(self.pop_i32()? as u32)
    }

    fn pop_n(&mut self, n: usize) -> Result<Vec<Value>, RuntimeError> {
        let at = self
            .stack
            .len()
            .checked_sub(n)
            .ok_or_else(|| internal("operand stack underflow"))?;
        Ok(self.stack.split_off(at))
    }

    fn jump(&mut self, func: &CompiledFunction, label: crate::codegen::Label) -> Result<(), RuntimeError> {
        self.frame()?.pc = func.code.target(label);
        Ok(())
    }

    /// Enters function `index` with its arguments on top of the stack.
    fn invoke(&mut self, index: u32) -> Result<(), RuntimeError> {
        let func = self
            .store
            .funcs
            .get(index as usize)
            .ok_or_else(|| internal(format!("function {index} not found")))?;

        match func {
            FuncInst::External { ty, module, name, host } => {
                let (params, returns, host_index) = (ty.params.len(), ty.returns.first().copied(), *host);
                let (module, name) = (module.clone(), name.clone());

                let args = self.pop_n(params)?;
                let call = &mut self
                    .host
                    .get_mut(host_index)
                    .ok_or_else(|| internal(format!("host function {module}.{name} not bound")))?
                    .call;
                let result = call(&mut *self.store, args).map_err(|err| RuntimeError::Host {
                    module: module.clone(),
                    name: name.clone(),
                    message: format!("{err:#}"),
                })?;

                let actual = result.map(|value| value.ty());
                if actual != returns {
                    let describe = |ty: Option<ValueType>| ty.map_or_else(|| "nothing".to_string(), |ty| ty.to_string());
                    return Err(RuntimeError::Host {
                        module,
                        name,
                        message: format!("returned {} where {} was declared", describe(actual), describe(returns)),
                    });
                }
                if let Some(value) = result {
                    self.push(value);
                }
                Ok(())
            }
            FuncInst::Internal { .. } => {
                if self.frames.len() >= self.max_depth {
                    return Err(Trap::CallStackExhausted.into());
                }
                let func = self
                    .compiled
                    .function(index)
                    .ok_or_else(|| internal(format!("function {index} is not compiled")))?;
                let frame = make_frame(func, self.stack)?;
                self.frames.push(frame);
                Ok(())
            }
        }
    }

    fn ret(&mut self) -> Result<(), RuntimeError> {
        let frame = self.frames.pop().ok_or_else(|| internal("return without a frame"))?;
        let results = self.pop_n(frame.arity)?;
        self.stack.truncate(frame.sp);
        self.stack.extend(results);
        Ok(())
    }

    fn step(&mut self, func: &CompiledFunction, op: &Op) -> Result<(), RuntimeError> {
        match op {
            Op::I32Const(v) => self.push(*v),
            Op::I64Const(v) => self.push(*v),
            Op::F32Const(v) => self.push(*v),
            Op::F64Const(v) => self.push(*v),
            Op::RefNull(ty) => self.push(Value::zero(*ty)),
            Op::RefFunc(index) => self.push(Value::FuncRef(Some(*index))),
            Op::RefIsNull => {
                let value = self.pop()?;
                let is_null = value
                    .is_null()
                    .ok_or_else(|| internal(format!("expected a reference, found {value}")))?;
                self.push(is_null);
            }

            Op::LocalGet(slot) => {
                let value = *self
                    .frame()?
                    .slots
                    .get(*slot as usize)
                    .ok_or_else(|| internal(format!("slot {slot} out of range")))?;
                self.push(value);
            }
            Op::LocalSet(slot) => {
                let value = self.pop()?;
                let target = self
                    .frame()?
                    .slots
                    .get_mut(*slot as usize)
                    .ok_or_else(|| internal(format!("slot {slot} out of range")))?;
                *target = value;
            }

            Op::Dup => {
                let value = *self.stack.last().ok_or_else(|| internal("operand stack underflow"))?;
                self.push(value);
            }
            Op::Pop => {
                self.pop()?;
            }
            Op::Swap => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(b);
                self.push(a);
            }
            Op::Select => {
                let cond = self.pop_i32()?;
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(if cond != 0 { a } else { b });
            }

            Op::Jump(label) => self.jump(func, *label)?,
            Op::JumpIf(label) => {
                if self.pop_i32()? != 0 {
                    self.jump(func, *label)?;
                }
            }
            Op::JumpIfNot(label) => {
                if self.pop_i32()? == 0 {
                    self.jump(func, *label)?;
                }
            }
            Op::JumpTable { targets, default } => {
                let index = self.pop_u32()? as usize;
                let label = targets.get(index).unwrap_or(default);
                self.jump(func, *label)?;
            }

            Op::Call(index) => self.invoke(*index)?,
            Op::ResolveIndirect { table, type_index } => {
                let index = self.pop_u32()?;
                let table = self
                    .store
                    .tables
                    .get(*table as usize)
                    .ok_or_else(|| internal(format!("unknown table {table}")))?;

                let callee = match table.get(index)? {
                    Value::FuncRef(Some(callee)) => callee,
                    Value::FuncRef(None) => return Err(Trap::UninitializedElement.into()),
                    other => return Err(internal(format!("expected a funcref, found {other}"))),
                };

                let expected = self.store.types.get(*type_index as usize);
                let actual = self.store.funcs.get(callee as usize).map(FuncInst::ty);
                if expected.is_none() || expected != actual {
                    return Err(Trap::IndirectCallTypeMismatch.into());
                }
                self.push(Value::FuncRef(Some(callee)));
            }
            Op::CallRef { type_index } => {
                let params = self
                    .store
                    .types
                    .get(*type_index as usize)
                    .map(|ty| ty.params.len())
                    .ok_or_else(|| internal(format!("unknown type {type_index}")))?;
                let args = self.pop_n(params)?;
                let callee = self.pop()?;
                self.stack.extend(args);

                let Value::FuncRef(Some(index)) = callee else {
                    return Err(internal(format!("expected a resolved callee, found {callee}")));
                };
                self.invoke(index)?;
            }
            Op::Return => self.ret()?,
            Op::Trap(trap) => return Err((*trap).into()),

            Op::Numeric(op) => {
                let args = self.pop_n(op.signature().0.len())?;
                let value = eval(*op, &args)?;
                self.push(value);
            }

            Op::GlobalGet(index) => {
                let value = *self
                    .store
                    .globals
                    .get(*index as usize)
                    .ok_or_else(|| internal(format!("unknown global {index}")))?;
                self.push(value);
            }
            Op::GlobalSet(index) => {
                let value = self.pop()?;
                let global = self
                    .store
                    .globals
                    .get_mut(*index as usize)
                    .ok_or_else(|| internal(format!("unknown global {index}")))?;
                *global = value;
            }

            Op::Load { op, offset } => {
                let addr = self.pop_u32()?;
                let value = self.memory()?.load(*op, addr, *offset)?;
                self.push(value);
            }
            Op::Store { op, offset } => {
                let value = self.pop()?;
                let addr = self.pop_u32()?;
                let bits = raw_bits(value)?;
                self.memory()?.store(*op, addr, *offset, bits)?;
            }
            Op::MemorySize => {
                let pages = self.memory()?.pages();
                self.push(pages as i32);
            }
            Op::MemoryGrow => {
                let delta = self.pop_u32()?;
                let old = self.memory()?.grow(delta);
                self.push(old);
            }
            Op::MemoryInit(data) => {
                let (len, src, dst) = (self.pop_u32()?, self.pop_u32()?, self.pop_u32()?);
                let Store { memories, data: segments, .. } = &mut *self.store;
                let segment = segments
                    .get(*data as usize)
                    .ok_or_else(|| internal(format!("unknown data segment {data}")))?;
                let memory = memories.first_mut().ok_or_else(|| internal("no memory"))?;
                memory.init(dst, segment, src, len)?;
            }
            Op::MemoryCopy => {
                let (len, src, dst) = (self.pop_u32()?, self.pop_u32()?, self.pop_u32()?);
                self.memory()?.copy(dst, src, len)?;
            }
            Op::MemoryFill => {
                let (len, value, dst) = (self.pop_u32()?, self.pop_i32()?, self.pop_u32()?);
                self.memory()?.fill(dst, value as u8, len)?;
            }
            Op::DataDrop(data) => {
                if let Some(segment) = self.store.data.get_mut(*data as usize) {
                    *segment = vec![];
                }
            }

            Op::TableGet(table) => {
                let index = self.pop_u32()?;
                let value = self.table(*table)?.get(index)?;
                self.push(value);
            }
            Op::TableSet(table) => {
                let value = self.pop()?;
                let index = self.pop_u32()?;
                self.table(*table)?.set(index, value)?;
            }
            Op::TableSize(table) => {
                let size = self.table(*table)?.size();
                self.push(size as i32);
            }
            Op::TableGrow(table) => {
                let delta = self.pop_u32()?;
                let init = self.pop()?;
                let old = self.table(*table)?.grow(init, delta);
                self.push(old);
            }
            Op::TableFill(table) => {
                let len = self.pop_u32()?;
                let value = self.pop()?;
                let dst = self.pop_u32()?;
                self.table(*table)?.fill(dst, value, len)?;
            }
            Op::TableCopy { dst, src } => {
                let (len, src_index, dst_index) = (self.pop_u32()?, self.pop_u32()?, self.pop_u32()?);
                if dst == src {
                    self.table(*dst)?.copy_within(dst_index, src_index, len)?;
                } else {
                    let items = self.table(*src)?.slice(src_index, len)?.to_vec();
                    self.table(*dst)?.init(dst_index, &items, 0, len)?;
                }
            }
            Op::TableInit { elem, table } => {
                let (len, src, dst) = (self.pop_u32()?, self.pop_u32()?, self.pop_u32()?);
                let Store { tables, elements, .. } = &mut *self.store;
                let items = elements
                    .get(*elem as usize)
                    .ok_or_else(|| internal(format!("unknown element segment {elem}")))?;
                let table = tables
                    .get_mut(*table as usize)
                    .ok_or_else(|| internal(format!("unknown table {table}")))?;
                table.init(dst, items, src, len)?;
            }
            Op::ElemDrop(elem) => {
                if let Some(items) = self.store.elements.get_mut(*elem as usize) {
                    *items = vec![];
                }
            }
        }

        Ok(())
    }

    fn memory(&mut self) -> Result<&mut super::memory::Memory, RuntimeError> {
        self.store.memory_mut().ok_or_else(|| internal("no memory"))
    }

    fn table(&mut self, index: u32) -> Result<&mut super::table::Table, RuntimeError> {
        self.store
            .tables
            .get_mut(index as usize)
            .ok_or_else(|| internal(format!("unknown table {index}")))
    }
}

/// Moves the arguments off the stack into a fresh slot array.
fn make_frame(func: &CompiledFunction, stack: &mut Vec<Value>) -> Result<Frame, RuntimeError> {
    let params = func.ty.params.len();
    let at = stack
        .len()
        .checked_sub(params)
        .ok_or_else(|| internal(format!("missing arguments for {}", func.symbol)))?;
    let args = stack.split_off(at);

    let mut slots = vec![Value::I32(0); func.layout.max_slots as usize];
    for (local, arg) in func.layout.locals.iter().zip(args) {
        slots[local.slot as usize] = arg;
    }

    Ok(Frame {
        func: func.index,
        pc: 0,
        slots,
        sp: stack.len(),
        arity: func.ty.returns.len(),
    })
}

/// The bit pattern a store writes, low bytes first.
fn raw_bits(value: Value) -> Result<u64, RuntimeError> {
    match value {
        Value::I32(v) => Ok(v as u32 as u64),
        Value::I64(v) => Ok(v as u64),
        Value::F32(v) => Ok(v.to_bits() as u64),
        Value::F64(v) => Ok(v.to_bits()),
        other => Err(internal(format!("cannot store {other} to memory"))),
    }
}

#[cfg(test)]
mod executor_tests {
    use std::{cell::RefCell, rc::Rc};

    use anyhow::Result;
    use pretty_assertions::assert_eq;

    use super::*;

    fn instantiate(wat: &str) -> Result<Runtime> {
        Ok(Runtime::instantiate(wat::parse_str(wat)?)?)
    }

    fn trap_of(result: Result<Option<Value>, RuntimeError>) -> Option<Trap> {
        match result {
            Err(RuntimeError::Trap(trap)) => Some(trap),
            _ => None,
        }
    }

    #[test]
    fn execute_simplest_fn() -> Result<()> {
        let mut rt = instantiate(r#"(module (func (export "f")))"#)?;
        assert_eq!(None, rt.call("f", vec![])?);
        assert_eq!(0, rt.call_stack.len());
        assert_eq!(0, rt.stack.len());
        Ok(())
    }

    #[test]
    fn execute_fn_add() -> Result<()> {
        let mut rt = instantiate("(module (func (param i32 i32) (result i32) (local.get 0) (local.get 1) i32.add))")?;

        assert_eq!(Some(Value::I32(5)), rt.call_with_index(0, vec![Value::I32(2), Value::I32(3)])?);
        assert_eq!(Some(Value::I32(i32::MIN)), rt.call_with_index(0, vec![Value::I32(i32::MAX), Value::I32(1)])?);
        Ok(())
    }

    #[test]
    fn execute_other_fn() -> Result<()> {
        let mut rt = instantiate(
            r#"(module
                (func (export "call_doubler") (param i64) (result i64) (local.get 0) (call $double))
                (func $double (param i64) (result i64) (local.get 0) (local.get 0) i64.add))"#,
        )?;
        assert_eq!(Some(Value::I64(42)), rt.call("call_doubler", vec![Value::I64(21)])?);
        Ok(())
    }

    #[test]
    fn division_by_zero_traps_at_run_time() -> Result<()> {
        let mut rt = instantiate(r#"(module (func (export "f") (result i32) i32.const 5 i32.const 0 i32.div_s))"#)?;
        assert_eq!(Some(Trap::IntegerDivideByZero), trap_of(rt.call("f", vec![])));
        assert_eq!(0, rt.stack.len());
        assert_eq!(0, rt.call_stack.len());
        Ok(())
    }

    #[test]
    fn branch_out_of_block_skips_dead_code() -> Result<()> {
        let mut rt = instantiate(
            r#"(module (func (export "f") (result i32)
                (block (result i32) i32.const 1 br 0 i32.const 2)))"#,
        )?;
        assert_eq!(Some(Value::I32(1)), rt.call("f", vec![])?);
        Ok(())
    }

    #[test]
    fn branch_discards_intervening_values() -> Result<()> {
        let mut rt = instantiate(
            r#"(module (func (export "f") (result i64)
                (block (result i64)
                    i32.const 7
                    f64.const 2.5
                    i64.const 99
                    br 0)))"#,
        )?;
        assert_eq!(Some(Value::I64(99)), rt.call("f", vec![])?);
        assert_eq!(0, rt.stack.len());
        Ok(())
    }

    #[test]
    fn loops_and_conditional_branches() -> Result<()> {
        let mut rt = instantiate(
            r#"(module (func (export "fact") (param i64) (result i64) (local $acc i64)
                i64.const 1
                local.set $acc
                (block $done
                    (loop $next
                        (br_if $done (i64.eqz (local.get 0)))
                        (local.set $acc (i64.mul (local.get $acc) (local.get 0)))
                        (local.set 0 (i64.sub (local.get 0) (i64.const 1)))
                        br $next))
                local.get $acc))"#,
        )?;
        assert_eq!(Some(Value::I64(1)), rt.call("fact", vec![Value::I64(0)])?);
        assert_eq!(Some(Value::I64(3628800)), rt.call("fact", vec![Value::I64(10)])?);
        Ok(())
    }

    #[test]
    fn recursion() -> Result<()> {
        let mut rt = instantiate(
            r#"(module (func $fib (export "fib") (param i32) (result i32)
                (if (result i32) (i32.lt_s (local.get 0) (i32.const 2))
                    (then (local.get 0))
                    (else
                        (i32.add
                            (call $fib (i32.sub (local.get 0) (i32.const 1)))
                            (call $fib (i32.sub (local.get 0) (i32.const 2))))))))"#,
        )?;
        assert_eq!(Some(Value::I32(55)), rt.call("fib", vec![Value::I32(10)])?);
        Ok(())
    }

    #[test]
    fn br_table_dispatch() -> Result<()> {
        let mut rt = instantiate(
            r#"(module (func (export "classify") (param i32) (result i32)
                (block $default
                    (block $one
                        (block $zero
                            (br_table $zero $one $default (local.get 0)))
                        (return (i32.const 100)))
                    (return (i32.const 101)))
                i32.const -1))"#,
        )?;
        assert_eq!(Some(Value::I32(100)), rt.call("classify", vec![Value::I32(0)])?);
        assert_eq!(Some(Value::I32(101)), rt.call("classify", vec![Value::I32(1)])?);
        assert_eq!(Some(Value::I32(-1)), rt.call("classify", vec![Value::I32(2)])?);
        assert_eq!(Some(Value::I32(-1)), rt.call("classify", vec![Value::I32(-7)])?);
        Ok(())
    }

    #[test]
    fn br_table_carries_values_through_trampolines() -> Result<()> {
        let mut rt = instantiate(
            r#"(module (func (export "f") (param i32) (result i32)
                (block $outer (result i32)
                    (block $inner (result i32)
                        i32.const 5
                        i32.const 10
                        local.get 0
                        br_table $inner $outer)
                    i32.const 1
                    i32.add)))"#,
        )?;
        assert_eq!(Some(Value::I32(11)), rt.call("f", vec![Value::I32(0)])?);
        assert_eq!(Some(Value::I32(10)), rt.call("f", vec![Value::I32(1)])?);
        Ok(())
    }

    #[test]
    fn select_and_locals() -> Result<()> {
        let mut rt = instantiate(
            r#"(module (func (export "max") (param f64 f64) (result f64)
                (select (local.get 0) (local.get 1) (f64.gt (local.get 0) (local.get 1)))))"#,
        )?;
        assert_eq!(Some(Value::F64(2.5)), rt.call("max", vec![Value::F64(2.5), Value::F64(-1.0)])?);
        assert_eq!(Some(Value::F64(3.0)), rt.call("max", vec![Value::F64(2.5), Value::F64(3.0)])?);
        Ok(())
    }

    #[test]
    fn call_indirect_checks_the_callee() -> Result<()> {
        let mut rt = instantiate(
            r#"(module
                (type $unary (func (param i32) (result i32)))
                (table 3 funcref)
                (elem (i32.const 0) $inc $nullary)
                (func $inc (param i32) (result i32) (i32.add (local.get 0) (i32.const 1)))
                (func $nullary (result i32) i32.const 0)
                (func (export "dispatch") (param i32 i32) (result i32)
                    (call_indirect (type $unary) (local.get 1) (local.get 0))))"#,
        )?;

        assert_eq!(Some(Value::I32(42)), rt.call("dispatch", vec![Value::I32(0), Value::I32(41)])?);
        assert_eq!(
            Some(Trap::IndirectCallTypeMismatch),
            trap_of(rt.call("dispatch", vec![Value::I32(1), Value::I32(0)]))
        );
        assert_eq!(
            Some(Trap::UninitializedElement),
            trap_of(rt.call("dispatch", vec![Value::I32(2), Value::I32(0)]))
        );
        assert_eq!(
            Some(Trap::TableOutOfBounds),
            trap_of(rt.call("dispatch", vec![Value::I32(3), Value::I32(0)]))
        );
        Ok(())
    }

    #[test]
    fn memory_loads_stores_and_growth() -> Result<()> {
        let mut rt = instantiate(
            r#"(module
                (memory 1 2)
                (data (i32.const 16) "\2a\00\00\00")
                (func (export "load") (param i32) (result i32) (i32.load (local.get 0)))
                (func (export "store") (param i32 i64) (i64.store offset=8 (local.get 0) (local.get 1)))
                (func (export "grow") (param i32) (result i32) (memory.grow (local.get 0)))
                (func (export "size") (result i32) memory.size))"#,
        )?;

        assert_eq!(Some(Value::I32(42)), rt.call("load", vec![Value::I32(16)])?);
        rt.call("store", vec![Value::I32(0), Value::I64(-1)])?;
        assert_eq!(Some(Value::I32(-1)), rt.call("load", vec![Value::I32(12)])?);
        assert_eq!(Some(Value::I32(-1)), rt.call("load", vec![Value::I32(8)])?);

        assert_eq!(
            Some(Trap::MemoryOutOfBounds),
            trap_of(rt.call("load", vec![Value::I32(65533)]))
        );
        assert_eq!(Some(Value::I32(1)), rt.call("grow", vec![Value::I32(1)])?);
        assert_eq!(Some(Value::I32(-1)), rt.call("grow", vec![Value::I32(1)])?);
        assert_eq!(Some(Value::I32(2)), rt.call("size", vec![])?);
        assert_eq!(Some(Value::I32(0)), rt.call("load", vec![Value::I32(65533)])?);
        Ok(())
    }

    #[test]
    fn bulk_memory_and_passive_segments() -> Result<()> {
        let mut rt = instantiate(
            r#"(module
                (memory 1)
                (data $greeting "hello")
                (func (export "init") (param i32 i32 i32) (memory.init $greeting (local.get 0) (local.get 1) (local.get 2)))
                (func (export "drop") (data.drop $greeting))
                (func (export "copy") (memory.copy (i32.const 10) (i32.const 0) (i32.const 5)))
                (func (export "fill") (memory.fill (i32.const 0) (i32.const 0x21) (i32.const 2))))"#,
        )?;

        rt.call("init", vec![Value::I32(0), Value::I32(0), Value::I32(5)])?;
        rt.call("copy", vec![])?;
        rt.call("fill", vec![])?;
        let memory = rt.store.memory().map(|m| m.data()[..15].to_vec()).unwrap_or_default();
        assert_eq!(b"!!llo\0\0\0\0\0hello".to_vec(), memory);

        assert_eq!(
            Some(Trap::MemoryOutOfBounds),
            trap_of(rt.call("init", vec![Value::I32(0), Value::I32(3), Value::I32(3)]))
        );
        rt.call("drop", vec![])?;
        assert_eq!(
            Some(Trap::MemoryOutOfBounds),
            trap_of(rt.call("init", vec![Value::I32(0), Value::I32(0), Value::I32(1)]))
        );
        rt.call("init", vec![Value::I32(0), Value::I32(0), Value::I32(0)])?;
        Ok(())
    }

    #[test]
    fn tables_and_references() -> Result<()> {
        let mut rt = instantiate(
            r#"(module
                (table $t 1 funcref)
                (elem declare func $f)
                (func $f (result i32) i32.const 7)
                (func (export "grow") (result i32) (table.grow $t (ref.func $f) (i32.const 2)))
                (func (export "size") (result i32) (table.size $t))
                (func (export "is_null") (param i32) (result i32) (ref.is_null (table.get $t (local.get 0))))
                (func (export "call") (param i32) (result i32) (call_indirect (result i32) (local.get 0))))"#,
        )?;

        assert_eq!(Some(Value::I32(1)), rt.call("is_null", vec![Value::I32(0)])?);
        assert_eq!(Some(Value::I32(1)), rt.call("grow", vec![])?);
        assert_eq!(Some(Value::I32(3)), rt.call("size", vec![])?);
        assert_eq!(Some(Value::I32(0)), rt.call("is_null", vec![Value::I32(2)])?);
        assert_eq!(Some(Value::I32(7)), rt.call("call", vec![Value::I32(2)])?);
        assert_eq!(
            Some(Trap::TableOutOfBounds),
            trap_of(rt.call("is_null", vec![Value::I32(3)]))
        );
        Ok(())
    }

    #[test]
    fn globals_and_start_function() -> Result<()> {
        let mut rt = instantiate(
            r#"(module
                (global $counter (mut i32) (i32.const 40))
                (func $start (global.set $counter (i32.add (global.get $counter) (i32.const 1))))
                (start $start)
                (func (export "bump") (result i32)
                    (global.set $counter (i32.add (global.get $counter) (i32.const 1)))
                    global.get $counter))"#,
        )?;
        assert_eq!(Some(Value::I32(42)), rt.call("bump", vec![])?);
        Ok(())
    }

    #[test]
    fn execute_import_fn() -> Result<()> {
        let wasm = wat::parse_str(
            r#"(module
                (import "env" "double_ext" (func $double (param i32) (result i32)))
                (import "env" "log" (func $log (param i32)))
                (func (export "run") (param i32) (result i32)
                    (call $log (local.get 0))
                    (call $double (local.get 0))))"#,
        )?;

        let logged = Rc::new(RefCell::new(vec![]));
        let sink = logged.clone();
        let mut imports = Imports::new();
        imports
            .add_func("env", "double_ext", FuncType::new([ValueType::I32], [ValueType::I32]), |_, args| {
                let value = args[0].as_i32().unwrap_or_default();
                Ok(Some(Value::I32(value * 2)))
            })
            .add_func("env", "log", FuncType::new([ValueType::I32], vec![]), move |_, args| {
                sink.borrow_mut().extend(args);
                Ok(None)
            });

        let mut rt = Runtime::instantiate_with_imports(wasm, imports)?;
        assert_eq!(Some(Value::I32(198)), rt.call("run", vec![Value::I32(99)])?);
        assert_eq!(vec![Value::I32(99)], *logged.borrow());
        Ok(())
    }

    #[test]
    fn host_errors_are_reported() -> Result<()> {
        let wasm = wat::parse_str(r#"(module (import "env" "fail" (func $fail)) (func (export "run") call $fail))"#)?;
        let mut imports = Imports::new();
        imports.add_func("env", "fail", FuncType::default(), |_, _| anyhow::bail!("boom"));

        let mut rt = Runtime::instantiate_with_imports(wasm, imports)?;
        let err = rt.call("run", vec![]).unwrap_err();
        assert!(matches!(err, RuntimeError::Host { ref message, .. } if message == "boom"), "{err:?}");
        Ok(())
    }

    #[test]
    fn host_results_must_match_the_declared_type() -> Result<()> {
        let wasm = wat::parse_str(
            r#"(module
                (import "env" "g" (func $g (result i32)))
                (func (export "run") (result i32) (i32.add (call $g) (i32.const 1))))"#,
        )?;

        let mut imports = Imports::new();
        imports.add_func("env", "g", FuncType::new(vec![], [ValueType::I32]), |_, _| Ok(None));
        let mut rt = Runtime::instantiate_with_imports(wasm.clone(), imports)?;
        let err = rt.call("run", vec![]).unwrap_err();
        assert!(
            matches!(err, RuntimeError::Host { ref message, .. } if message == "returned nothing where i32 was declared"),
            "{err:?}"
        );
        assert_eq!(0, rt.stack.len());

        let mut imports = Imports::new();
        imports.add_func("env", "g", FuncType::new(vec![], [ValueType::I32]), |_, _| Ok(Some(Value::F64(1.0))));
        let mut rt = Runtime::instantiate_with_imports(wasm, imports)?;
        let err = rt.call("run", vec![]).unwrap_err();
        assert!(
            matches!(err, RuntimeError::Host { ref message, .. } if message == "returned f64 where i32 was declared"),
            "{err:?}"
        );
        Ok(())
    }

    #[test]
    fn repeated_imports_call_the_same_host_function() -> Result<()> {
        let wasm = wat::parse_str(
            r#"(module
                (import "env" "f" (func $a (param i32) (result i32)))
                (import "env" "f" (func $b (param i32) (result i32)))
                (func (export "run") (param i32) (result i32) (call $b (call $a (local.get 0)))))"#,
        )?;

        let calls = Rc::new(RefCell::new(0));
        let counter = calls.clone();
        let mut imports = Imports::new();
        imports.add_func("env", "f", FuncType::new([ValueType::I32], [ValueType::I32]), move |_, args| {
            *counter.borrow_mut() += 1;
            Ok(args[0].as_i32().map(|v| Value::I32(v * 3)))
        });

        let mut rt = Runtime::instantiate_with_imports(wasm, imports)?;
        assert_eq!(Some(Value::I32(18)), rt.call("run", vec![Value::I32(2)])?);
        assert_eq!(2, *calls.borrow());
        Ok(())
    }

    #[test]
    fn unbounded_recursion_exhausts_the_call_stack() -> Result<()> {
        let wasm = wat::parse_str(r#"(module (func $f (export "f") call $f))"#)?;
        let config = Config {
            max_call_depth: 64,
            ..Config::default()
        };
        let mut rt = Runtime::instantiate_with_config(wasm, Imports::new(), config)?;
        assert_eq!(Some(Trap::CallStackExhausted), trap_of(rt.call("f", vec![])));
        Ok(())
    }

    #[test]
    fn bad_calls_are_not_traps() -> Result<()> {
        let mut rt = instantiate(r#"(module (memory (export "mem") 1) (func (export "f") (param i32)))"#)?;
        assert!(matches!(rt.call("g", vec![]), Err(RuntimeError::ExportNotFound(_))));
        assert!(matches!(rt.call("mem", vec![]), Err(RuntimeError::NotAFunction(_))));
        assert!(matches!(
            rt.call("f", vec![Value::I64(1)]),
            Err(RuntimeError::ArgumentMismatch { func: 0, .. })
        ));
        Ok(())
    }

    #[test]
    fn instantiation_failures_are_kept_apart() -> Result<()> {
        let oob_segment = wat::parse_str(r#"(module (memory 1) (data (i32.const 65535) "ab"))"#)?;
        assert!(matches!(Runtime::instantiate(oob_segment), Err(RuntimeError::Trap(Trap::MemoryOutOfBounds))));

        let start_traps = wat::parse_str("(module (func $s unreachable) (start $s))")?;
        assert!(matches!(Runtime::instantiate(start_traps), Err(RuntimeError::Trap(Trap::Unreachable))));

        let invalid = wat::parse_str("(module (func (result i32)))")?;
        assert!(matches!(Runtime::instantiate(invalid), Err(RuntimeError::Compile(_))));

        let huge_table = wat::parse_str("(module (table 4294967295 funcref))")?;
        assert!(matches!(
            Runtime::instantiate(huge_table),
            Err(RuntimeError::Link(LinkError::Alloc(_)))
        ));

        let unlinked = wat::parse_str(r#"(module (import "env" "f" (func)))"#)?;
        assert!(matches!(Runtime::instantiate(unlinked), Err(RuntimeError::Link(_))));
        Ok(())
    }
}
