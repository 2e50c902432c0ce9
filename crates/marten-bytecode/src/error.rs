//! Bytecode errors

use thiserror::Error;

/// Errors that can occur while reading a binary chunk.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BytecodeError {
    /// Signature bytes did not match `\x1bLua`.
    #[error("not a binary chunk (bad signature)")]
    InvalidSignature,

    /// Version byte did not match the writer's.
    #[error("version mismatch: {0:#04x}")]
    VersionMismatch(u8),

    /// Format byte did not match the writer's.
    #[error("format mismatch: {0}")]
    FormatMismatch(u8),

    /// The corruption-sentinel data bytes were damaged.
    #[error("corrupted chunk (sentinel data mismatch)")]
    CorruptSentinel,

    /// A numeric-width byte in the header disagreed with this build.
    #[error("{0} size mismatch")]
    SizeMismatch(&'static str),

    /// The endianness/format check values were damaged.
    #[error("endianness check failed")]
    EndiannessMismatch,

    /// A constant carried an unknown type tag.
    #[error("unknown constant tag: {0:#04x}")]
    BadConstantTag(u8),

    /// Ran off the end of the chunk.
    #[error("unexpected end of chunk")]
    UnexpectedEnd,

    /// A string payload was not valid UTF-8.
    #[error("string constant is not valid UTF-8")]
    InvalidString,
}

/// Result type for chunk operations.
pub type Result<T> = std::result::Result<T, BytecodeError>;
