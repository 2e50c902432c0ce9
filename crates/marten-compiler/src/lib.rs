//! # Marten Compiler
//!
//! Code generation backend for the Marten language: lowers a parsed
//! chunk to register-based bytecode in the [`marten_bytecode`] format.
//!
//! ## Design Principles
//!
//! - **Single pass**: statements and expressions lower in source order,
//!   forward jumps are backpatched when their targets appear
//! - **Stack-discipline registers**: expression temporaries are claimed
//!   and released LIFO, so frame sizes stay tight
//! - **Fallible throughout**: resource limits and malformed input
//!   surface as [`CompileError`], never as panics
//!
//! The entry point is [`compile_chunk`]:
//!
//! ```
//! use marten_compiler::ast::Block;
//! use marten_compiler::compile_chunk;
//!
//! let chunk = Block { last_line: 1, stats: vec![], ret_exps: None };
//! let proto = compile_chunk(&chunk, "@empty.mt").unwrap();
//! assert_eq!(proto.source.as_deref(), Some("@empty.mt"));
//! ```

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod ast;
pub mod codegen;
pub mod error;

pub use codegen::compile_chunk;
pub use error::{CompileError, CompileResult};
