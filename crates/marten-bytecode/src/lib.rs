//! # Marten Bytecode
//!
//! This crate defines the binary chunk format produced by the Marten compiler.
//!
//! ## Design Principles
//!
//! - **Register-based**: instructions address fixed slots in a call frame
//! - **Fixed-width**: every instruction is one little-endian 32-bit word
//! - **VM-compatible**: chunks follow the Lua 5.3 binary layout byte for byte
//! - **Immutable**: a [`Prototype`] never changes once assembled

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod chunk;
pub mod constant;
pub mod error;
pub mod instruction;
pub mod proto;

pub use chunk::{dump, undump};
pub use constant::Constant;
pub use error::BytecodeError;
pub use instruction::{Instruction, Opcode};
pub use proto::{LocalVarInfo, Prototype, UpvalueDesc};

/// Register ceiling shared by the allocator and the chunk format.
pub const MAX_REGISTERS: usize = 255;
