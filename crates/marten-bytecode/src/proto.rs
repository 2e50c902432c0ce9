//! Function prototypes and debug tables

use serde::{Deserialize, Serialize};

use crate::constant::Constant;
use crate::instruction::Instruction;

/// Descriptor of one upvalue slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpvalueDesc {
    /// True if captured from the enclosing function's stack, false if
    /// chained from one of its own upvalues.
    pub in_stack: bool,
    /// Register slot when `in_stack`, parent upvalue index otherwise.
    pub index: u8,
}

/// Liveness range of one local variable, for debug info.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalVarInfo {
    /// Variable name.
    pub name: String,
    /// First pc at which the variable is live.
    pub start_pc: u32,
    /// First pc at which the variable is dead.
    pub end_pc: u32,
}

/// The immutable description of one compiled function.
///
/// Produced once by the prototype assembler and never mutated afterwards.
/// The root prototype of a chunk exclusively owns its nested prototypes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prototype {
    /// Chunk name; only the root prototype carries one.
    pub source: Option<String>,
    /// Line of the `func` keyword, 0 for the synthetic top-level function.
    pub line_defined: u32,
    /// Line of the closing brace, 0 for the top-level function.
    pub last_line_defined: u32,
    /// Declared parameter count.
    pub num_params: u8,
    /// True if the function accepts `...`.
    pub is_vararg: bool,
    /// Number of frame registers the function needs (at least 2).
    pub max_stack_size: u8,
    /// Encoded instruction stream.
    pub code: Vec<Instruction>,
    /// Constant pool, ordered by pool index.
    pub constants: Vec<Constant>,
    /// Upvalue descriptors, ordered by upvalue index.
    pub upvalues: Vec<UpvalueDesc>,
    /// Nested function prototypes, ordered by closure index.
    pub protos: Vec<Prototype>,
    /// Source line of each instruction; same length as `code`.
    pub line_info: Vec<u32>,
    /// Local-variable liveness ranges.
    pub local_vars: Vec<LocalVarInfo>,
    /// Upvalue names, parallel to `upvalues`.
    pub upvalue_names: Vec<String>,
}

impl Prototype {
    /// Highest register index referenced by any operand that addresses a
    /// register directly. Diagnostic helper for validating `max_stack_size`.
    pub fn max_register_referenced(&self) -> u32 {
        use crate::instruction::Opcode::*;
        let mut max = 0u32;
        let mut touch = |arg: u32| max = max.max(arg);
        // Below the RK boundary the operand names a register, above it a
        // constant.
        let reg_of_rk = |arg: u32| if arg < 0x100 { Some(arg) } else { None };
        for inst in &self.code {
            let Some(op) = inst.opcode() else { continue };
            // A is a register everywhere except where it is a close marker
            // (JMP), an upvalue index (SETTABUP), or absent (EXTRAARG).
            if !matches!(op, Jmp | SetTabUp | ExtraArg) {
                touch(inst.a());
            }
            match op {
                Move | Unm | BNot | Not | Len | TestSet | Self_ | GetTable => touch(inst.b()),
                Concat => {
                    touch(inst.b());
                    touch(inst.c());
                }
                _ => {}
            }
            match op {
                Add | Sub | Mul | Mod | Pow | Div | IDiv | BAnd | BOr | BXor | Shl | Shr | Eq
                | Lt | Le => {
                    if let Some(r) = reg_of_rk(inst.b()) {
                        touch(r);
                    }
                    if let Some(r) = reg_of_rk(inst.c()) {
                        touch(r);
                    }
                }
                GetTable | GetTabUp | Self_ => {
                    if let Some(r) = reg_of_rk(inst.c()) {
                        touch(r);
                    }
                }
                SetTable | SetTabUp => {
                    if let Some(r) = reg_of_rk(inst.b()) {
                        touch(r);
                    }
                    if let Some(r) = reg_of_rk(inst.c()) {
                        touch(r);
                    }
                }
                _ => {}
            }
        }
        max
    }
}
