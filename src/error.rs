use thiserror::Error;

/// A failure to turn a binary module into target code.
///
/// Any of these aborts the whole module: nothing partially translated is
/// ever handed out. Run-time failures of translated code are [`crate::trap::Trap`]s.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("malformed module at offset 0x{offset:x}: {message}")]
    Decode { offset: usize, message: String },
    #[error("invalid function {func} at offset 0x{offset:x}: {message}")]
    Validate {
        func: u32,
        offset: usize,
        message: String,
    },
    #[error("invalid module: {0}")]
    Module(String),
    #[error("unsupported feature: {0}")]
    Unsupported(String),
}

impl CompileError {
    pub fn decode(offset: usize, message: impl Into<String>) -> Self {
        CompileError::Decode {
            offset,
            message: message.into(),
        }
    }

    pub fn module(message: impl Into<String>) -> Self {
        CompileError::Module(message.into())
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        CompileError::Unsupported(message.into())
    }
}

pub type Result<T, E = CompileError> = std::result::Result<T, E>;
