use super::ir::{Label, Op};

/// The backend seam of the translator: where validated instructions go.
pub trait Emitter {
    fn new_label(&mut self) -> Label;

    /// Binds `label` to the position of the next emitted op.
    fn bind(&mut self, label: Label);

    fn emit(&mut self, op: Op);
}

/// Emitted code with every label resolved to an op position.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Code {
    pub ops: Vec<Op>,
    pub targets: Vec<usize>,
}

impl Code {
    pub fn target(&self, label: Label) -> usize {
        self.targets[label.index()]
    }
}

/// Label resolution problems are bugs in the translator, not in the input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LabelError {
    #[error("label {0:?} was never bound")]
    Unbound(Label),
    #[error("label {0:?} was bound twice")]
    Rebound(Label),
}

/// In-memory [`Emitter`] recording ops for the executor.
#[derive(Debug, Default)]
pub struct CodeBuffer {
    ops: Vec<Op>,
    labels: Vec<Option<usize>>,
    rebound: Option<Label>,
}

impl CodeBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub fn finish(self) -> Result<Code, LabelError> {
        if let Some(label) = self.rebound {
            return Err(LabelError::Rebound(label));
        }

        // Labels nobody jumps to may stay unbound.
        for op in &self.ops {
            if let Some(label) = op.branch_targets().into_iter().find(|l| self.labels[l.index()].is_none()) {
                return Err(LabelError::Unbound(label));
            }
        }
        let end = self.ops.len();
        let targets = self.labels.iter().map(|pos| pos.unwrap_or(end)).collect();

        Ok(Code {
            ops: self.ops,
            targets,
        })
    }
}

impl Emitter for CodeBuffer {
    fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() as u32 - 1)
    }

    fn bind(&mut self, label: Label) {
        let slot = &mut self.labels[label.index()];
        if slot.is_some() {
            self.rebound.get_or_insert(label);
        }
        *slot = Some(self.ops.len());
    }

    fn emit(&mut self, op: Op) {
        self.ops.push(op);
    }
}
