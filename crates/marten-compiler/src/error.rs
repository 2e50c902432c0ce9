//! Code generation errors

use thiserror::Error;

/// Errors reported while lowering an AST to bytecode.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CompileError {
    /// The frame register ceiling (254 usable slots) was exceeded.
    #[error("function or expression needs too many registers")]
    TooManyRegisters,

    /// `break` appeared outside any loop.
    #[error("break outside a loop at line {line}")]
    BreakOutsideLoop {
        /// Source line of the statement.
        line: u32,
    },

    /// `continue` appeared outside any loop.
    #[error("continue outside a loop at line {line}")]
    ContinueOutsideLoop {
        /// Source line of the statement.
        line: u32,
    },

    /// `...` was used in a function not declared vararg.
    #[error("cannot use '...' outside a vararg function at line {line}")]
    VarargOutsideVarargFunction {
        /// Source line of the expression.
        line: u32,
    },

    /// Function literals nested beyond the generator's recursion limit.
    #[error("functions nested too deeply at line {line}")]
    NestingTooDeep {
        /// Line of the offending function literal.
        line: u32,
    },

    /// A generator invariant was violated; always a bug, never bad input.
    #[error("internal codegen error: {0}")]
    Internal(String),
}

impl CompileError {
    /// Build an [`CompileError::Internal`] from anything string-like.
    pub(crate) fn internal(msg: impl Into<String>) -> Self {
        CompileError::Internal(msg.into())
    }
}

/// Result type for code generation.
pub type CompileResult<T> = std::result::Result<T, CompileError>;
