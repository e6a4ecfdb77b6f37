use crate::{
    binary::types::{FuncType, ValueType},
    codegen::Slot,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Local {
    pub ty: ValueType,
    pub slot: Slot,
}

/// How a function's frame is laid out in slots.
///
/// ```text
/// [ params.. | instance | declared locals.. | scratch.. ]
///                                             ^ first_scratch
/// ```
///
/// i64 and f64 take two slots. Scratch slots are transient: every branch
/// fixup or indirect call starts allocating again at `first_scratch`, and
/// `max_slots` is the high-water mark over the whole function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameLayout {
    pub locals: Vec<Local>,
    pub param_count: usize,
    pub instance_slot: Slot,
    pub first_scratch: Slot,
    pub max_slots: u32,
}

impl FrameLayout {
    pub fn new(ty: &FuncType, declared: &[ValueType]) -> Self {
        let mut next: Slot = 0;
        let mut locals = Vec::with_capacity(ty.params.len() + declared.len());

        for &param in &ty.params {
            locals.push(Local { ty: param, slot: next });
            next += param.width();
        }

        let instance_slot = next;
        next += 1;

        for &local in declared {
            locals.push(Local { ty: local, slot: next });
            next += local.width();
        }

        Self {
            locals,
            param_count: ty.params.len(),
            instance_slot,
            first_scratch: next,
            max_slots: next,
        }
    }

    pub fn local(&self, index: u32) -> Option<Local> {
        self.locals.get(index as usize).copied()
    }

    pub fn declared(&self) -> &[Local] {
        &self.locals[self.param_count..]
    }

    /// Scratch slots for `tys`, in order, starting over at `first_scratch`.
    pub fn scratch(&mut self, tys: &[ValueType]) -> Vec<Slot> {
        let mut next = self.first_scratch;
        let slots = tys
            .iter()
            .map(|ty| {
                let slot = next;
                next += ty.width();
                slot
            })
            .collect();

        self.max_slots = self.max_slots.max(next);
        slots
    }
}
