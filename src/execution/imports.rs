use std::collections::HashMap;

use thiserror::Error;

use super::{
    memory::{AllocError, Memory},
    store::Store,
    table::Table,
    value::Value,
};
use crate::binary::types::{FuncType, Limits};

/// A host function: receives the instance's store and the call's arguments.
pub type HostFn = Box<dyn FnMut(&mut Store, Vec<Value>) -> anyhow::Result<Option<Value>>>;

pub struct HostFunc {
    pub ty: FuncType,
    pub call: HostFn,
}

impl std::fmt::Debug for HostFunc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostFunc").field("ty", &self.ty).finish()
    }
}

#[derive(Debug)]
pub enum Extern {
    Func(HostFunc),
    Memory(Memory),
    Table(Table),
}

impl Extern {
    fn kind(&self) -> &'static str {
        match self {
            Extern::Func(_) => "function",
            Extern::Memory(_) => "memory",
            Extern::Table(_) => "table",
        }
    }
}

/// Failure to bind a module's imports or allocate its memories and tables,
/// before any of its code runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("unknown import {module}.{name}")]
    Missing { module: String, name: String },
    #[error("incompatible import type for {module}.{name}: expected {expected}, found {actual}")]
    KindMismatch {
        module: String,
        name: String,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("incompatible import type for {module}.{name}: expected {expected}, found {actual}")]
    SignatureMismatch {
        module: String,
        name: String,
        expected: FuncType,
        actual: FuncType,
    },
    #[error("incompatible import type for {module}.{name}: limits do not match")]
    LimitsMismatch { module: String, name: String },
    #[error("unknown type {index} for imported function {module}.{name}")]
    UnknownType { module: String, name: String, index: u32 },
    #[error("{module}.{name} is imported more than once; only functions can be shared")]
    Aliased { module: String, name: String },
    #[error(transparent)]
    Alloc(#[from] AllocError),
}

/// Host-provided bindings keyed by `(module, name)`.
#[derive(Debug, Default)]
pub struct Imports {
    items: HashMap<(String, String), Extern>,
}

impl Imports {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_func(
        &mut self,
        module: impl Into<String>,
        name: impl Into<String>,
        ty: FuncType,
        call: impl FnMut(&mut Store, Vec<Value>) -> anyhow::Result<Option<Value>> + 'static,
    ) -> &mut Self {
        self.items.insert(
            (module.into(), name.into()),
            Extern::Func(HostFunc {
                ty,
                call: Box::new(call),
            }),
        );
        self
    }

    pub fn add_memory(&mut self, module: impl Into<String>, name: impl Into<String>, memory: Memory) -> &mut Self {
        self.items.insert((module.into(), name.into()), Extern::Memory(memory));
        self
    }

    pub fn add_table(&mut self, module: impl Into<String>, name: impl Into<String>, table: Table) -> &mut Self {
        self.items.insert((module.into(), name.into()), Extern::Table(table));
        self
    }

    /// Takes the binding out; each import is bound to exactly one instance.
    pub(crate) fn take(&mut self, module: &str, name: &str) -> Result<Extern, LinkError> {
        self.items
            .remove(&(module.to_string(), name.to_string()))
            .ok_or_else(|| LinkError::Missing {
                module: module.to_string(),
                name: name.to_string(),
            })
    }
}

pub(crate) fn kind_mismatch(module: &str, name: &str, expected: &'static str, actual: &Extern) -> LinkError {
    LinkError::KindMismatch {
        module: module.to_string(),
        name: name.to_string(),
        expected,
        actual: actual.kind(),
    }
}

/// Whether a provided `actual` size range satisfies the declared `expected` one.
pub(crate) fn limits_match(actual: &Limits, expected: &Limits) -> bool {
    if actual.min < expected.min {
        return false;
    }
    match (actual.max, expected.max) {
        (_, None) => true,
        (Some(actual), Some(expected)) => actual <= expected,
        (None, Some(_)) => false,
    }
}
