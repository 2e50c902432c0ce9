//! AST to bytecode lowering
//!
//! The generator keeps one [`FuncState`](func::FuncState) per function in
//! a flat arena; nested functions point at their parent by index. All
//! lowering runs as methods on [`CodeGen`], which tracks which state is
//! current, so resolving a name can reach through the whole enclosing
//! chain (and mark captures along it) without aliasing trouble.

mod assemble;
mod expr;
pub(crate) mod func;
mod stmt;

use marten_bytecode::Prototype;

use crate::ast::Block;
use crate::error::{CompileError, CompileResult};
use func::{FuncState, UpvalueInfo, UpvalueSource};

/// Cap on function-literal nesting depth.
const MAX_NESTING: usize = 200;

/// Lowering state for one chunk.
pub(crate) struct CodeGen {
    funcs: Vec<FuncState>,
    cur: usize,
    depth: usize,
}

/// Compile a parsed chunk into its root prototype.
///
/// The chunk body becomes a vararg function nested in a synthetic
/// enclosing context whose only local is `_ENV`; free names therefore
/// resolve to `_ENV` indexing through the regular upvalue walk.
pub fn compile_chunk(chunk: &Block, chunk_name: &str) -> CompileResult<Prototype> {
    let mut cg = CodeGen {
        funcs: vec![FuncState::new(None, 0, chunk.last_line, 0, true)],
        cur: 0,
        depth: 0,
    };
    cg.fs_mut().add_local("_ENV", 0)?;
    let main = cg.compile_function(0, chunk.last_line, &[], true, chunk)?;
    Ok(cg.assemble(main, Some(chunk_name.to_string())))
}

impl CodeGen {
    pub(crate) fn fs_mut(&mut self) -> &mut FuncState {
        &mut self.funcs[self.cur]
    }

    pub(crate) fn fs(&self) -> &FuncState {
        &self.funcs[self.cur]
    }

    pub(crate) fn func(&self, idx: usize) -> &FuncState {
        &self.funcs[idx]
    }

    /// Compile a function body into a fresh child state of the current
    /// function and return its arena index. The caller emits the
    /// CLOSURE instruction (or, for the chunk body, nothing at all).
    pub(crate) fn compile_function(
        &mut self,
        line: u32,
        last_line: u32,
        params: &[String],
        is_vararg: bool,
        body: &Block,
    ) -> CompileResult<usize> {
        if self.depth >= MAX_NESTING {
            return Err(CompileError::NestingTooDeep { line });
        }
        self.depth += 1;

        let child = self.funcs.len();
        self.funcs.push(FuncState::new(
            Some(self.cur),
            line,
            last_line,
            params.len() as u8,
            is_vararg,
        ));
        self.funcs[self.cur].children.push(child);
        let saved = self.cur;
        self.cur = child;

        for param in params {
            self.fs_mut().add_local(param, 0)?;
        }
        self.compile_block(body)?;
        let end_pc = self.fs().pc() + 2;
        self.fs_mut().exit_scope(end_pc)?;
        self.fs_mut().emit_return(last_line, 0, 0);

        self.cur = saved;
        self.depth -= 1;
        Ok(child)
    }

    pub(crate) fn compile_block(&mut self, block: &Block) -> CompileResult<()> {
        for stat in &block.stats {
            self.compile_stat(stat)?;
        }
        if let Some(exps) = &block.ret_exps {
            self.compile_return(exps, block.last_line)?;
        }
        Ok(())
    }

    /// Resolve `name` as an upvalue of function `f`, materializing table
    /// entries down the enclosing chain as needed. A local of the direct
    /// parent is captured in place; anything further out chains through
    /// the parent's own upvalue table.
    pub(crate) fn upvalue_index(&mut self, f: usize, name: &str) -> Option<usize> {
        if let Some(uv) = self.funcs[f].upvalues.get(name) {
            return Some(uv.index);
        }
        let parent = self.funcs[f].parent?;
        if let Some(&head) = self.funcs[parent].local_names.get(name) {
            let slot = self.funcs[parent].local_vars[head].slot;
            self.funcs[parent].local_vars[head].captured = true;
            let index = self.funcs[f].upvalues.len();
            self.funcs[f].upvalues.insert(
                name.to_string(),
                UpvalueInfo {
                    source: UpvalueSource::ParentLocal(slot),
                    index,
                },
            );
            return Some(index);
        }
        if let Some(parent_idx) = self.upvalue_index(parent, name) {
            let index = self.funcs[f].upvalues.len();
            self.funcs[f].upvalues.insert(
                name.to_string(),
                UpvalueInfo {
                    source: UpvalueSource::ParentUpvalue(parent_idx),
                    index,
                },
            );
            return Some(index);
        }
        None
    }
}
