use tracing::{instrument, trace, Level};

use super::{
    env::ModuleEnv,
    locals::FrameLayout,
    stack::{ScopeKind, StackError, Stacks},
};
use crate::{
    binary::{
        instruction::{decode_instruction, decode_value_type, Instruction},
        reader::Reader,
        types::{BlockType, FuncType, FunctionBody, Mutability, ValueType},
    },
    codegen::{Emitter, Label, Op},
    error::{CompileError, Result},
    trap::Trap,
    Config,
};

/// A validation failure before the function index and offset are attached.
#[derive(Debug)]
struct Invalid(String);

impl From<StackError> for Invalid {
    fn from(err: StackError) -> Self {
        Invalid(err.to_string())
    }
}

fn invalid(message: impl Into<String>) -> Invalid {
    Invalid(message.into())
}

type Check<T = ()> = std::result::Result<T, Invalid>;

/// Validates one function body and lowers it into `E`.
///
/// A translator lives for exactly one function: its stacks and frame
/// layout are discarded once the body's final `end` has been seen.
pub struct FuncTranslator<'a, 'm, E: Emitter> {
    env: &'a ModuleEnv<'m>,
    layout: FrameLayout,
    stacks: Stacks,
    emitter: &'a mut E,
}

impl<'a, 'm, E: Emitter> FuncTranslator<'a, 'm, E> {
    /// Translates the body of function `func` (an index in the function
    /// index space, imports included) and returns its final frame layout.
    #[instrument(level = Level::TRACE, skip(env, body, config, emitter), fields(offset = body.offset))]
    pub fn translate(
        env: &'a ModuleEnv<'m>,
        func: u32,
        body: &FunctionBody,
        config: &Config,
        emitter: &'a mut E,
    ) -> Result<FrameLayout> {
        let ty = env
            .func_type(func)
            .ok_or_else(|| CompileError::module(format!("unknown type for function {func}")))?
            .clone();

        let mut reader = Reader::with_offset(&body.bytes, body.offset);
        let declared = decode_locals(&mut reader, func, config)?;
        let layout = FrameLayout::new(&ty, &declared);

        let mut translator = FuncTranslator {
            env,
            layout,
            stacks: Stacks::new(),
            emitter,
        };
        translator.prologue(&ty);

        while !translator.stacks.is_finished() {
            let offset = reader.offset();
            let inst = decode_instruction(&mut reader)?;
            trace!(offset, ?inst);

            translator.instruction(inst).map_err(|Invalid(message)| CompileError::Validate {
                func,
                offset,
                message,
            })?;
        }

        if !reader.is_empty() {
            return Err(CompileError::Validate {
                func,
                offset: reader.offset(),
                message: "operators remaining after end of function".to_string(),
            });
        }

        Ok(translator.layout)
    }

    /// Zeroes the declared locals and opens the scope spanning the body.
    fn prologue(&mut self, ty: &FuncType) {
        for local in self.layout.declared().to_vec() {
            self.emitter.emit(zero(local.ty));
            self.emitter.emit(Op::LocalSet(local.slot));
        }

        let exit = self.emitter.new_label();
        self.stacks
            .push_scope(ScopeKind::Block, exit, FuncType::new(vec![], ty.returns.clone()));
    }

    fn emit(&mut self, op: Op) {
        self.emitter.emit(op);
    }

    fn instruction(&mut self, inst: Instruction) -> Check {
        use Instruction::*;

        match inst {
            Unreachable => {
                self.emit(Op::Trap(Trap::Unreachable));
                self.stacks.mark_unreachable();
            }
            Nop => {}
            Block(bt) => {
                let ty = self.block_type(bt)?;
                self.stacks.pop_all(&ty.params)?;
                let label = self.emitter.new_label();
                self.stacks.push_scope(ScopeKind::Block, label, ty);
            }
            Loop(bt) => {
                let ty = self.block_type(bt)?;
                self.stacks.pop_all(&ty.params)?;
                let label = self.emitter.new_label();
                self.emitter.bind(label);
                self.stacks.push_scope(ScopeKind::Loop, label, ty);
            }
            If(bt) => {
                let ty = self.block_type(bt)?;
                self.stacks.pop_type(ValueType::I32)?;
                self.stacks.pop_all(&ty.params)?;
                let else_label = self.emitter.new_label();
                let label = self.emitter.new_label();
                self.emit(Op::JumpIfNot(else_label));
                self.stacks.push_scope(ScopeKind::If { else_label }, label, ty);
            }
            Else => self.else_()?,
            End => self.end()?,
            Br(depth) => {
                self.branch(depth)?;
                self.stacks.mark_unreachable();
            }
            BrIf(depth) => self.branch_if(depth)?,
            BrTable { targets, default } => self.branch_table(&targets, default)?,
            Return => {
                let outermost = self.stacks.depth() as u32 - 1;
                self.branch(outermost)?;
                self.stacks.mark_unreachable();
            }
            Call(index) => {
                let ty = self
                    .env
                    .func_type(index)
                    .ok_or_else(|| invalid(format!("unknown function {index}")))?;
                self.stacks.pop_all(&ty.params)?;
                self.stacks.push_all(&ty.returns);
                self.emit(Op::Call(index));
            }
            CallIndirect { type_index, table } => self.call_indirect(type_index, table)?,

            Drop => {
                self.stacks.pop(None)?;
                self.emit(Op::Pop);
            }
            Select(ty) => self.select(ty)?,

            LocalGet(index) => {
                let local = self.local(index)?;
                self.stacks.push(local.ty);
                self.emit(Op::LocalGet(local.slot));
            }
            LocalSet(index) => {
                let local = self.local(index)?;
                self.stacks.pop_type(local.ty)?;
                self.emit(Op::LocalSet(local.slot));
            }
            LocalTee(index) => {
                let local = self.local(index)?;
                self.stacks.pop_type(local.ty)?;
                self.stacks.push(local.ty);
                self.emit(Op::Dup);
                self.emit(Op::LocalSet(local.slot));
            }
            GlobalGet(index) => {
                let global = self.global(index)?;
                self.stacks.push(global.ty);
                self.emit(Op::GlobalGet(index));
            }
            GlobalSet(index) => {
                let global = self.global(index)?;
                if global.mutability != Mutability::Var {
                    return Err(invalid(format!("global {index} is immutable")));
                }
                self.stacks.pop_type(global.ty)?;
                self.emit(Op::GlobalSet(index));
            }

            TableGet(table) => {
                let elem = self.table(table)?;
                self.stacks.pop_type(ValueType::I32)?;
                self.stacks.push(elem);
                self.emit(Op::TableGet(table));
            }
            TableSet(table) => {
                let elem = self.table(table)?;
                self.stacks.pop_type(elem)?;
                self.stacks.pop_type(ValueType::I32)?;
                self.emit(Op::TableSet(table));
            }
            TableSize(table) => {
                self.table(table)?;
                self.stacks.push(ValueType::I32);
                self.emit(Op::TableSize(table));
            }
            TableGrow(table) => {
                let elem = self.table(table)?;
                self.stacks.pop_type(ValueType::I32)?;
                self.stacks.pop_type(elem)?;
                self.stacks.push(ValueType::I32);
                self.emit(Op::TableGrow(table));
            }
            TableFill(table) => {
                let elem = self.table(table)?;
                self.stacks.pop_type(ValueType::I32)?;
                self.stacks.pop_type(elem)?;
                self.stacks.pop_type(ValueType::I32)?;
                self.emit(Op::TableFill(table));
            }
            TableCopy { dst, src } => {
                let dst_elem = self.table(dst)?;
                let src_elem = self.table(src)?;
                if dst_elem != src_elem {
                    return Err(invalid(format!(
                        "type mismatch: cannot copy {src_elem} table {src} into {dst_elem} table {dst}"
                    )));
                }
                self.pop_i32s(3)?;
                self.emit(Op::TableCopy { dst, src });
            }
            TableInit { elem, table } => {
                let table_elem = self.table(table)?;
                let segment = self
                    .env
                    .module
                    .elements
                    .get(elem as usize)
                    .ok_or_else(|| invalid(format!("unknown element segment {elem}")))?;
                if segment.ty != table_elem {
                    return Err(invalid(format!(
                        "type mismatch: element segment {elem} holds {} but table {table} holds {table_elem}",
                        segment.ty
                    )));
                }
                self.pop_i32s(3)?;
                self.emit(Op::TableInit { elem, table });
            }
            ElemDrop(elem) => {
                if elem as usize >= self.env.module.elements.len() {
                    return Err(invalid(format!("unknown element segment {elem}")));
                }
                self.emit(Op::ElemDrop(elem));
            }

            Load(op, memarg) => {
                self.memory(0)?;
                self.stacks.pop_type(ValueType::I32)?;
                self.stacks.push(op.result_type());
                self.emit(Op::Load {
                    op,
                    offset: memarg.offset,
                });
            }
            Store(op, memarg) => {
                self.memory(0)?;
                self.stacks.pop_type(op.value_type())?;
                self.stacks.pop_type(ValueType::I32)?;
                self.emit(Op::Store {
                    op,
                    offset: memarg.offset,
                });
            }
            MemorySize(memory) => {
                self.memory(memory)?;
                self.stacks.push(ValueType::I32);
                self.emit(Op::MemorySize);
            }
            MemoryGrow(memory) => {
                self.memory(memory)?;
                self.stacks.pop_type(ValueType::I32)?;
                self.stacks.push(ValueType::I32);
                self.emit(Op::MemoryGrow);
            }
            MemoryInit { data, memory } => {
                self.memory(memory)?;
                self.data_segment(data)?;
                self.pop_i32s(3)?;
                self.emit(Op::MemoryInit(data));
            }
            DataDrop(data) => {
                self.data_segment(data)?;
                self.emit(Op::DataDrop(data));
            }
            MemoryCopy { dst, src } => {
                self.memory(dst)?;
                self.memory(src)?;
                self.pop_i32s(3)?;
                self.emit(Op::MemoryCopy);
            }
            MemoryFill(memory) => {
                self.memory(memory)?;
                self.pop_i32s(3)?;
                self.emit(Op::MemoryFill);
            }

            I32Const(value) => {
                self.stacks.push(ValueType::I32);
                self.emit(Op::I32Const(value));
            }
            I64Const(value) => {
                self.stacks.push(ValueType::I64);
                self.emit(Op::I64Const(value));
            }
            F32Const(value) => {
                self.stacks.push(ValueType::F32);
                self.emit(Op::F32Const(value));
            }
            F64Const(value) => {
                self.stacks.push(ValueType::F64);
                self.emit(Op::F64Const(value));
            }

            RefNull(ty) => {
                self.stacks.push(ty);
                self.emit(Op::RefNull(ty));
            }
            RefIsNull => {
                if let Some(ty) = self.stacks.pop(None)? {
                    if !ty.is_ref() {
                        return Err(invalid(format!("type mismatch: expected a reference, found {ty}")));
                    }
                }
                self.stacks.push(ValueType::I32);
                self.emit(Op::RefIsNull);
            }
            RefFunc(index) => {
                if index as usize >= self.env.num_funcs() {
                    return Err(invalid(format!("unknown function {index}")));
                }
                if !self.env.declared_funcs.contains(&index) {
                    return Err(invalid(format!("undeclared function reference {index}")));
                }
                self.stacks.push(ValueType::FuncRef);
                self.emit(Op::RefFunc(index));
            }

            Numeric(op) => {
                let (params, result) = op.signature();
                self.stacks.pop_all(params)?;
                self.stacks.push(result);
                self.emit(Op::Numeric(op));
            }
        }

        Ok(())
    }

    fn else_(&mut self) -> Check {
        if !matches!(self.stacks.innermost()?.kind, ScopeKind::If { .. }) {
            return Err(invalid("else found outside an if block"));
        }

        let scope = self.stacks.pop_scope()?;
        let ScopeKind::If { else_label } = scope.kind else {
            return Err(invalid("else found outside an if block"));
        };

        self.emit(Op::Jump(scope.label));
        self.emitter.bind(else_label);
        self.stacks.push_scope(ScopeKind::Block, scope.label, scope.ty);
        Ok(())
    }

    fn end(&mut self) -> Check {
        let scope = self.stacks.pop_scope()?;

        match scope.kind {
            ScopeKind::Block => self.emitter.bind(scope.label),
            ScopeKind::Loop => {}
            ScopeKind::If { else_label } => {
                // the implicit else passes the parameters straight through
                if scope.ty.params != scope.ty.returns {
                    return Err(invalid(format!("type mismatch: if without else must have type {}", scope.ty)));
                }
                self.emitter.bind(else_label);
                self.emitter.bind(scope.label);
            }
        }

        self.stacks.push_all(&scope.ty.returns);

        if self.stacks.is_finished() {
            self.emit(Op::Return);
        }
        Ok(())
    }

    /// Label, label types and entry height of the scope `depth` levels out,
    /// after checking the top of the stack carries the label types.
    fn target(&mut self, depth: u32) -> Check<(Label, Vec<ValueType>, usize)> {
        let scope = self.stacks.scope_at(depth)?;
        let target = (scope.label, scope.label_types().to_vec(), scope.height);
        self.stacks.peek_all(&target.1)?;
        Ok(target)
    }

    /// How many values sit between the label's values and the target's entry height.
    fn discard_count(&self, arity: usize, height: usize) -> usize {
        if self.stacks.is_unreachable() {
            return 0;
        }
        self.stacks.height().saturating_sub(arity + height)
    }

    /// Moves the label's values down over `discard` intervening values:
    /// store them to scratch last first, pop the rest, reload in order.
    fn emit_fixup(&mut self, tys: &[ValueType], discard: usize) {
        if discard == 0 {
            return;
        }

        let slots = self.layout.scratch(tys);
        for &slot in slots.iter().rev() {
            self.emit(Op::LocalSet(slot));
        }
        for _ in 0..discard {
            self.emit(Op::Pop);
        }
        for &slot in &slots {
            self.emit(Op::LocalGet(slot));
        }
    }

    fn branch(&mut self, depth: u32) -> Check {
        let (label, tys, height) = self.target(depth)?;
        let discard = self.discard_count(tys.len(), height);
        self.emit_fixup(&tys, discard);
        self.emit(Op::Jump(label));
        Ok(())
    }

    fn branch_if(&mut self, depth: u32) -> Check {
        self.stacks.pop_type(ValueType::I32)?;
        let (label, tys, height) = self.target(depth)?;
        let discard = self.discard_count(tys.len(), height);

        if discard == 0 {
            self.emit(Op::JumpIf(label));
        } else {
            let skip = self.emitter.new_label();
            self.emit(Op::JumpIfNot(skip));
            self.emit_fixup(&tys, discard);
            self.emit(Op::Jump(label));
            self.emitter.bind(skip);
        }

        // the fallthrough sees the label's types, not whatever refined them
        self.stacks.pop_all(&tys)?;
        self.stacks.push_all(&tys);
        Ok(())
    }

    fn branch_table(&mut self, targets: &[u32], default: u32) -> Check {
        self.stacks.pop_type(ValueType::I32)?;

        let (_, default_tys, _) = self.target(default)?;
        let mut arms = Vec::with_capacity(targets.len() + 1);
        for &depth in targets.iter().chain(std::iter::once(&default)) {
            let (label, tys, height) = self.target(depth)?;
            if tys.len() != default_tys.len() {
                return Err(invalid(format!(
                    "type mismatch: br_table target {depth} carries {} values, default carries {}",
                    tys.len(),
                    default_tys.len()
                )));
            }
            let discard = self.discard_count(tys.len(), height);
            arms.push((label, tys, discard));
        }

        // arms needing a fixup go through a trampoline that does it before jumping
        let mut trampolines = Vec::new();
        let mut labels: Vec<Label> = arms
            .into_iter()
            .map(|(label, tys, discard)| {
                if discard == 0 {
                    return label;
                }
                let trampoline = self.emitter.new_label();
                trampolines.push((trampoline, label, tys, discard));
                trampoline
            })
            .collect();

        let default = labels.pop().ok_or_else(|| invalid("br_table without a default target"))?;
        self.emit(Op::JumpTable {
            targets: labels,
            default,
        });

        for (trampoline, label, tys, discard) in trampolines {
            self.emitter.bind(trampoline);
            self.emit_fixup(&tys, discard);
            self.emit(Op::Jump(label));
        }

        self.stacks.mark_unreachable();
        Ok(())
    }

    /// The table index is set aside first so the arguments can be parked
    /// under it while the callee is resolved and checked.
    fn call_indirect(&mut self, type_index: u32, table: u32) -> Check {
        if self.table(table)? != ValueType::FuncRef {
            return Err(invalid(format!("type mismatch: call_indirect through non-funcref table {table}")));
        }
        let ty = self
            .env
            .ty(type_index)
            .ok_or_else(|| invalid(format!("unknown type {type_index}")))?
            .clone();

        self.stacks.pop_type(ValueType::I32)?;
        self.stacks.pop_all(&ty.params)?;
        self.stacks.push_all(&ty.returns);

        // The callee goes under the arguments. One argument is swapped past
        // it; longer lists are parked in scratch slots.
        match ty.params.len() {
            0 => self.emit(Op::ResolveIndirect { table, type_index }),
            1 => {
                self.emit(Op::ResolveIndirect { table, type_index });
                self.emit(Op::Swap);
            }
            _ => {
                let mut tys = Vec::with_capacity(ty.params.len() + 1);
                tys.push(ValueType::I32);
                tys.extend_from_slice(&ty.params);
                let slots = self.layout.scratch(&tys);
                let (index_slot, arg_slots) = (slots[0], &slots[1..]);

                self.emit(Op::LocalSet(index_slot));
                for &slot in arg_slots.iter().rev() {
                    self.emit(Op::LocalSet(slot));
                }
                self.emit(Op::LocalGet(index_slot));
                self.emit(Op::ResolveIndirect { table, type_index });
                for &slot in arg_slots {
                    self.emit(Op::LocalGet(slot));
                }
            }
        }
        self.emit(Op::CallRef { type_index });
        Ok(())
    }

    fn select(&mut self, ty: Option<ValueType>) -> Check {
        self.stacks.pop_type(ValueType::I32)?;

        match ty {
            Some(ty) => {
                self.stacks.pop_type(ty)?;
                self.stacks.pop_type(ty)?;
                self.stacks.push(ty);
            }
            None => {
                let first = self.stacks.pop(None)?;
                let second = self.stacks.pop(first)?;
                let ty = first.or(second);
                if let Some(ty) = ty.filter(|ty| ty.is_ref()) {
                    return Err(invalid(format!("type mismatch: select without a type annotation on {ty}")));
                }
                self.stacks.push_operand(ty);
            }
        }

        self.emit(Op::Select);
        Ok(())
    }

    fn block_type(&self, bt: BlockType) -> Check<FuncType> {
        match bt {
            BlockType::Empty => Ok(FuncType::default()),
            BlockType::Value(ty) => Ok(FuncType::new(vec![], [ty])),
            BlockType::Type(index) => self
                .env
                .ty(index)
                .cloned()
                .ok_or_else(|| invalid(format!("unknown type {index}"))),
        }
    }

    fn local(&self, index: u32) -> Check<super::locals::Local> {
        self.layout
            .local(index)
            .ok_or_else(|| invalid(format!("unknown local {index}")))
    }

    fn global(&self, index: u32) -> Check<crate::binary::types::GlobalType> {
        self.env
            .globals
            .get(index as usize)
            .copied()
            .ok_or_else(|| invalid(format!("unknown global {index}")))
    }

    fn table(&self, index: u32) -> Check<ValueType> {
        self.env
            .tables
            .get(index as usize)
            .map(|t| t.elem)
            .ok_or_else(|| invalid(format!("unknown table {index}")))
    }

    fn memory(&self, index: u32) -> Check {
        if index as usize >= self.env.memories.len() {
            return Err(invalid(format!("unknown memory {index}")));
        }
        Ok(())
    }

    fn data_segment(&self, index: u32) -> Check {
        let Some(count) = self.env.module.data_count else {
            return Err(invalid("data count section required"));
        };
        if index >= count {
            return Err(invalid(format!("unknown data segment {index}")));
        }
        Ok(())
    }

    fn pop_i32s(&mut self, count: usize) -> Check {
        for _ in 0..count {
            self.stacks.pop_type(ValueType::I32)?;
        }
        Ok(())
    }
}

/// Reads the local declarations, rejecting absurd totals before expanding them.
fn decode_locals(reader: &mut Reader, func: u32, config: &Config) -> Result<Vec<ValueType>> {
    let offset = reader.offset();
    let groups = reader.vec(|reader| {
        let count = reader.u32()?;
        let ty = decode_value_type(reader)?;
        Ok((count, ty))
    })?;

    let total: u64 = groups.iter().map(|(count, _)| u64::from(*count)).sum();
    if total > u64::from(config.max_locals) {
        return Err(CompileError::Validate {
            func,
            offset,
            message: format!("too many locals: {total} exceeds the limit of {}", config.max_locals),
        });
    }

    Ok(groups
        .into_iter()
        .flat_map(|(count, ty)| std::iter::repeat(ty).take(count as usize))
        .collect())
}

fn zero(ty: ValueType) -> Op {
    match ty {
        ValueType::I32 => Op::I32Const(0),
        ValueType::I64 => Op::I64Const(0),
        ValueType::F32 => Op::F32Const(0.0),
        ValueType::F64 => Op::F64Const(0.0),
        ValueType::FuncRef | ValueType::ExternRef => Op::RefNull(ty),
    }
}
