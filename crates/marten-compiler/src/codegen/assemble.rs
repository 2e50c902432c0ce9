//! Freezing compilation state into prototypes
//!
//! Runs after lowering finishes; nothing here mutates the arena, so a
//! failed compilation never produces a partial prototype.

use marten_bytecode::{Constant, LocalVarInfo, Prototype, UpvalueDesc};

use super::func::UpvalueSource;
use super::CodeGen;

impl CodeGen {
    /// Freeze function `f` (children first) into an immutable prototype.
    /// Only the root call passes a source name.
    pub(crate) fn assemble(&self, f: usize, source: Option<String>) -> Prototype {
        let fs = self.func(f);
        let protos = fs
            .children
            .iter()
            .map(|&child| self.assemble(child, None))
            .collect();

        // The pool map is keyed by value; invert it into index order.
        let mut constants = vec![Constant::Nil; fs.constants.len()];
        for (k, &idx) in &fs.constants {
            constants[idx] = k.clone();
        }

        let mut upvalues = vec![UpvalueDesc { in_stack: false, index: 0 }; fs.upvalues.len()];
        let mut upvalue_names = vec![String::new(); fs.upvalues.len()];
        for (name, uv) in &fs.upvalues {
            upvalues[uv.index] = match uv.source {
                UpvalueSource::ParentLocal(slot) => UpvalueDesc {
                    in_stack: true,
                    index: slot as u8,
                },
                UpvalueSource::ParentUpvalue(idx) => UpvalueDesc {
                    in_stack: false,
                    index: idx as u8,
                },
            };
            upvalue_names[uv.index] = name.clone();
        }

        let local_vars = fs
            .local_vars
            .iter()
            .map(|v| LocalVarInfo {
                name: v.name.clone(),
                start_pc: v.start_pc.max(0) as u32,
                end_pc: v.end_pc.max(0) as u32,
            })
            .collect();

        Prototype {
            source,
            line_defined: fs.line_defined,
            // The synthetic top-level function has no defining lines.
            last_line_defined: if fs.line_defined == 0 {
                0
            } else {
                fs.last_line_defined
            },
            num_params: fs.num_params,
            is_vararg: fs.is_vararg,
            max_stack_size: fs.max_regs.max(2) as u8,
            code: fs.code.clone(),
            constants,
            upvalues,
            protos,
            line_info: fs.line_info.clone(),
            local_vars,
            upvalue_names,
        }
    }
}
