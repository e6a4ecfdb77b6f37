pub mod buffer;
pub mod ir;
pub mod names;

pub use buffer::{Code, CodeBuffer, Emitter, LabelError};
pub use ir::{Label, Op, Slot};
pub use names::NameInterner;
