use std::fmt;

use crate::binary::types::ValueType;

/// A run-time value. References are `None` when null; a function reference
/// holds an index in the instance's function index space, an external
/// reference an opaque host handle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    FuncRef(Option<u32>),
    ExternRef(Option<u32>),
}

impl Value {
    pub fn ty(&self) -> ValueType {
        match self {
            Value::I32(_) => ValueType::I32,
            Value::I64(_) => ValueType::I64,
            Value::F32(_) => ValueType::F32,
            Value::F64(_) => ValueType::F64,
            Value::FuncRef(_) => ValueType::FuncRef,
            Value::ExternRef(_) => ValueType::ExternRef,
        }
    }

    /// The value locals and table slots start out with.
    pub fn zero(ty: ValueType) -> Self {
        match ty {
            ValueType::I32 => Value::I32(0),
            ValueType::I64 => Value::I64(0),
            ValueType::F32 => Value::F32(0.0),
            ValueType::F64 => Value::F64(0.0),
            ValueType::FuncRef => Value::FuncRef(None),
            ValueType::ExternRef => Value::ExternRef(None),
        }
    }

    pub fn is_null(&self) -> Option<bool> {
        match self {
            Value::FuncRef(r) | Value::ExternRef(r) => Some(r.is_none()),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::I32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Value::F32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::F64(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::I32(value.into())
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::I32(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::I64(value)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::F32(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::F64(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::I32(v) => write!(f, "{v}:i32"),
            Value::I64(v) => write!(f, "{v}:i64"),
            Value::F32(v) => write!(f, "{v}:f32"),
            Value::F64(v) => write!(f, "{v}:f64"),
            Value::FuncRef(None) | Value::ExternRef(None) => write!(f, "null:{}", self.ty()),
            Value::FuncRef(Some(i)) | Value::ExternRef(Some(i)) => write!(f, "{i}:{}", self.ty()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseValueError {
    #[error("invalid argument {input:?}: {reason}")]
    Literal { input: String, reason: String },
    #[error("invalid argument {input:?}: unknown type {ty}")]
    UnknownType { input: String, ty: String },
}

/// Parses `42`, `42:i64`, `1.5:f32` and friends; untyped integers are i32
/// and untyped decimals f64.
impl std::str::FromStr for Value {
    type Err = ParseValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (literal, ty) = match s.split_once(':') {
            Some((literal, ty)) => (literal, Some(ty)),
            None => (s, None),
        };
        let err = |e: &dyn fmt::Display| ParseValueError::Literal {
            input: s.to_string(),
            reason: e.to_string(),
        };

        match ty {
            Some("i32") => literal.parse().map(Value::I32).map_err(|e| err(&e)),
            Some("i64") => literal.parse().map(Value::I64).map_err(|e| err(&e)),
            Some("f32") => literal.parse().map(Value::F32).map_err(|e| err(&e)),
            Some("f64") => literal.parse().map(Value::F64).map_err(|e| err(&e)),
            Some(other) => Err(ParseValueError::UnknownType {
                input: s.to_string(),
                ty: other.to_string(),
            }),
            None if literal.contains(['.', 'e', 'E', 'n', 'i']) => {
                literal.parse().map(Value::F64).map_err(|e| err(&e))
            }
            None => literal.parse().map(Value::I32).map_err(|e| err(&e)),
        }
    }
}
