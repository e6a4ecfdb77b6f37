pub mod eval;
pub mod imports;
pub mod memory;
pub mod runtime;
pub mod store;
pub mod table;
pub mod value;
