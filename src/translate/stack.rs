use crate::{
    binary::types::{FuncType, ValueType},
    codegen::Label,
};

/// What the validator knows about one operand: `None` is a value conjured by
/// popping past the entry height of an unreachable scope.
pub type Operand = Option<ValueType>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Block,
    Loop,
    If { else_label: Label },
}

/// A structured region: its branch target, its type and where the operand
/// stack stood when it was entered (not counting its parameters).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlScope {
    pub kind: ScopeKind,
    pub label: Label,
    pub ty: FuncType,
    pub height: usize,
    pub unreachable: bool,
}

impl ControlScope {
    /// Values a branch to this scope carries: a loop is re-entered with its
    /// parameters, anything else is exited with its results.
    pub fn label_types(&self) -> &[ValueType] {
        match self.kind {
            ScopeKind::Loop => &self.ty.params,
            _ => &self.ty.returns,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StackError {
    #[error("type mismatch: expected {} but nothing on stack", expected_name(.expected))]
    Underflow { expected: Operand },
    #[error("type mismatch: expected {expected}, found {actual}")]
    Mismatch { expected: ValueType, actual: ValueType },
    #[error("control stack is empty")]
    NoScope,
    #[error("unknown label: branch depth {0} too large")]
    DepthOutOfRange(u32),
    #[error("type mismatch: {0} extra values left at end of block")]
    ExtraValues(usize),
}

fn expected_name(expected: &Operand) -> String {
    expected.map_or_else(|| "a value".to_string(), |ty| ty.to_string())
}

/// The operand-type stack and the control-scope stack of one function.
///
/// They are kept side by side: every scope records the operand height it was
/// entered at, and nothing below that height can be popped while it is the
/// innermost scope.
#[derive(Debug, Default)]
pub struct Stacks {
    operands: Vec<Operand>,
    scopes: Vec<ControlScope>,
}

impl Stacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn height(&self) -> usize {
        self.operands.len()
    }

    pub fn operands(&self) -> &[Operand] {
        &self.operands
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_finished(&self) -> bool {
        self.scopes.is_empty()
    }

    pub fn push(&mut self, ty: ValueType) {
        self.operands.push(Some(ty));
    }

    pub fn push_operand(&mut self, operand: Operand) {
        self.operands.push(operand);
    }

    pub fn push_all(&mut self, tys: &[ValueType]) {
        self.operands.extend(tys.iter().copied().map(Some));
    }

    pub fn innermost(&self) -> Result<&ControlScope, StackError> {
        self.scopes.last().ok_or(StackError::NoScope)
    }

    pub fn is_unreachable(&self) -> bool {
        self.scopes.last().map_or(false, |s| s.unreachable)
    }

    /// Pops one operand, checking it against `expected` when both are known.
    ///
    /// Inside an unreachable scope nothing is checked: popping at the entry
    /// height yields an unknown operand and mismatches are tolerated.
    pub fn pop(&mut self, expected: Operand) -> Result<Operand, StackError> {
        let scope = self.scopes.last().ok_or(StackError::NoScope)?;

        if self.operands.len() <= scope.height {
            if scope.unreachable {
                return Ok(expected);
            }
            return Err(StackError::Underflow { expected });
        }

        let actual = self.operands.pop().flatten();
        if scope.unreachable {
            return Ok(actual.or(expected));
        }

        match (actual, expected) {
            (Some(actual), Some(expected)) if actual != expected => Err(StackError::Mismatch { expected, actual }),
            _ => Ok(actual.or(expected)),
        }
    }

    pub fn pop_type(&mut self, expected: ValueType) -> Result<Operand, StackError> {
        self.pop(Some(expected))
    }

    /// Pops `tys` (given bottom first) from the top of the stack and returns
    /// what was popped, bottom first.
    pub fn pop_all(&mut self, tys: &[ValueType]) -> Result<Vec<Operand>, StackError> {
        let mut popped = Vec::with_capacity(tys.len());
        for ty in tys.iter().rev() {
            popped.push(self.pop_type(*ty)?);
        }
        popped.reverse();
        Ok(popped)
    }

    /// Checks that the top of the stack holds `tys` without consuming them.
    pub fn peek_all(&mut self, tys: &[ValueType]) -> Result<(), StackError> {
        let popped = self.pop_all(tys)?;
        self.operands.extend(popped);
        Ok(())
    }

    pub fn push_scope(&mut self, kind: ScopeKind, label: Label, ty: FuncType) {
        let height = self.operands.len();
        let params = ty.params.clone();
        self.scopes.push(ControlScope {
            kind,
            label,
            ty,
            height,
            unreachable: false,
        });
        self.push_all(&params);
    }

    /// Checks the scope's results are exactly what is left above its entry
    /// height, then pops the scope and restores the height.
    pub fn pop_scope(&mut self) -> Result<ControlScope, StackError> {
        let scope = self.innermost()?.clone();

        if !scope.unreachable {
            self.pop_all(&scope.ty.returns)?;
            if self.operands.len() != scope.height {
                return Err(StackError::ExtraValues(self.operands.len() - scope.height));
            }
        }

        self.operands.truncate(scope.height);
        self.scopes.pop();
        Ok(scope)
    }

    /// The scope `depth` levels out from the innermost one.
    pub fn scope_at(&self, depth: u32) -> Result<&ControlScope, StackError> {
        let len = self.scopes.len();
        if depth as usize >= len {
            return Err(StackError::DepthOutOfRange(depth));
        }
        Ok(&self.scopes[len - 1 - depth as usize])
    }

    /// The rest of the innermost scope can never execute.
    pub fn mark_unreachable(&mut self) {
        if let Some(scope) = self.scopes.last_mut() {
            self.operands.truncate(scope.height);
            scope.unreachable = true;
        }
    }
}

#[cfg(test)]
mod stack_tests {
    use super::*;
    use crate::codegen::{CodeBuffer, Emitter};
    use pretty_assertions::assert_eq;
    use crate::binary::types::ValueType::*;

    fn stacks_with_function_scope(ty: FuncType) -> Stacks {
        let mut buf = CodeBuffer::new();
        let mut stacks = Stacks::new();
        stacks.push_scope(ScopeKind::Block, buf.new_label(), FuncType::new(vec![], ty.returns));
        stacks
    }

    #[test]
    fn pop_checks_types_and_entry_height() {
        let mut stacks = stacks_with_function_scope(FuncType::default());
        stacks.push(I32);
        stacks.push(F64);

        assert_eq!(Err(StackError::Mismatch { expected: I32, actual: F64 }), stacks.pop_type(I32));
        assert_eq!(Ok(Some(I32)), stacks.pop_type(I32));
        assert_eq!(Err(StackError::Underflow { expected: Some(I64) }), stacks.pop_type(I64));
    }

    #[test]
    fn unreachable_scope_is_stack_polymorphic() {
        let mut stacks = stacks_with_function_scope(FuncType::default());
        stacks.push(I32);
        stacks.mark_unreachable();

        assert_eq!(0, stacks.height());
        assert_eq!(Ok(Some(I64)), stacks.pop_type(I64));
        assert_eq!(Ok(None), stacks.pop(None));
        stacks.push(F32);
        assert_eq!(Ok(Some(F32)), stacks.pop_type(I32));
    }

    #[test]
    fn pop_scope_requires_exact_results() {
        let mut stacks = stacks_with_function_scope(FuncType::new(vec![], [I32]));
        stacks.push(I32);
        stacks.push(I32);
        assert_eq!(Err(StackError::ExtraValues(1)), stacks.pop_scope());

        let mut stacks = stacks_with_function_scope(FuncType::new(vec![], [I32]));
        stacks.push(I32);
        let scope = stacks.pop_scope().unwrap();
        assert_eq!(0, scope.height);
        assert!(stacks.is_finished());
    }

    #[test]
    fn loop_labels_carry_params_and_blocks_carry_results() {
        let mut buf = CodeBuffer::new();
        let mut stacks = stacks_with_function_scope(FuncType::default());
        stacks.push(I64);
        stacks.push_scope(ScopeKind::Loop, buf.new_label(), FuncType::new([I64], [F32]));
        stacks.push_scope(ScopeKind::Block, buf.new_label(), FuncType::new(vec![], [F64]));

        assert_eq!(&[F64], stacks.scope_at(0).unwrap().label_types());
        assert_eq!(&[I64], stacks.scope_at(1).unwrap().label_types());
        assert_eq!(0, stacks.scope_at(1).unwrap().height);
        assert_eq!(Err(StackError::DepthOutOfRange(3)), stacks.scope_at(3).map(|_| ()));
    }

    #[test]
    fn peek_leaves_operands_in_place() {
        let mut stacks = stacks_with_function_scope(FuncType::default());
        stacks.push(I32);
        stacks.push(I64);
        assert_eq!(Ok(()), stacks.peek_all(&[I32, I64]));
        assert_eq!(&[Some(I32), Some(I64)], stacks.operands());
    }

    #[test]
    fn errors_describe_the_expected_operand() {
        let err: Box<dyn std::error::Error> = Box::new(StackError::Underflow { expected: Some(F32) });
        assert_eq!("type mismatch: expected f32 but nothing on stack", err.to_string());
        assert_eq!(
            "type mismatch: expected a value but nothing on stack",
            StackError::Underflow { expected: None }.to_string()
        );
        assert_eq!(
            "type mismatch: expected i32, found f64",
            StackError::Mismatch { expected: I32, actual: F64 }.to_string()
        );
    }
}
