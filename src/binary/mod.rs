pub mod instruction;
pub mod module;
pub mod opcode;
pub mod reader;
pub mod section;
pub mod types;
