//! Error types shared across the compiler core.

use thiserror::Error;

/// Errors produced by compiler passes.
///
/// Pass-internal invariant failures surface as [`CompilerError::SsaError`];
/// callers should treat them as compiler bugs rather than user errors.
#[derive(Debug, Clone, Error)]
pub enum CompilerError {
    #[error("Undefined variable: {0}")]
    UndefinedVariable(String),

    #[error("SSA error: {0}")]
    SsaError(String),
}

pub type Result<T> = std::result::Result<T, CompilerError>;

/// Construct a [`CompilerError::SsaError`] from a format string.
#[macro_export]
macro_rules! err_ssa {
    ($($arg:tt)*) => {
        $crate::error::CompilerError::SsaError(format!($($arg)*))
    };
}

/// Return early with a [`CompilerError::SsaError`].
#[macro_export]
macro_rules! bail_ssa {
    ($($arg:tt)*) => {
        return Err($crate::err_ssa!($($arg)*))
    };
}

/// Construct a [`CompilerError::UndefinedVariable`] from a format string.
#[macro_export]
macro_rules! err_undef {
    ($($arg:tt)*) => {
        $crate::error::CompilerError::UndefinedVariable(format!($($arg)*))
    };
}
