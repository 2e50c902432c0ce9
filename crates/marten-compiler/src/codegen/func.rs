//! Per-function compilation state
//!
//! [`FuncState`] owns everything the generator accumulates for one
//! function: the stack-discipline register allocator, the lexical scope
//! stack with pending break/continue jumps, the shadow-linked local
//! variable table, the deduplicating constant pool, and the instruction
//! buffer with its parallel line table.
//!
//! States live in the [`CodeGen`](super::CodeGen) arena and refer to
//! their parents by index, so upvalue resolution can walk and mutate the
//! chain without back-pointers.

use marten_bytecode::instruction::Opcode;
use marten_bytecode::{Constant, Instruction, MAX_REGISTERS};
use rustc_hash::FxHashMap;

use crate::ast::{BinOp, UnOp};
use crate::error::{CompileError, CompileResult};

/// One entry in the local variable table. Entries are never removed;
/// going out of scope only unlinks them from the name map, so the full
/// list doubles as the debug table.
#[derive(Debug)]
pub(crate) struct LocalVar {
    /// Table index of the variable this one shadows, if any.
    pub(crate) prev: Option<usize>,
    pub(crate) name: String,
    pub(crate) scope_level: i32,
    pub(crate) slot: usize,
    pub(crate) start_pc: i32,
    pub(crate) end_pc: i32,
    /// Set when a nested function captures this variable.
    pub(crate) captured: bool,
}

/// Where an upvalue's storage lives.
#[derive(Debug, Clone, Copy)]
pub(crate) enum UpvalueSource {
    /// A register of the directly enclosing function.
    ParentLocal(usize),
    /// An upvalue slot of the directly enclosing function.
    ParentUpvalue(usize),
}

/// A resolved upvalue of one function.
#[derive(Debug, Clone, Copy)]
pub(crate) struct UpvalueInfo {
    pub(crate) source: UpvalueSource,
    /// Position in this function's upvalue table.
    pub(crate) index: usize,
}

/// Compilation state of a single function.
#[derive(Debug)]
pub(crate) struct FuncState {
    /// Arena index of the enclosing function's state.
    pub(crate) parent: Option<usize>,
    /// Arena indices of nested functions, in closure-index order.
    pub(crate) children: Vec<usize>,

    pub(crate) used_regs: usize,
    pub(crate) max_regs: usize,

    /// Current lexical nesting depth; the function body is level 0 and
    /// the final scope exit drops to -1, releasing the parameters.
    pub(crate) scope_level: i32,
    pub(crate) local_vars: Vec<LocalVar>,
    /// Active head of each name's shadow chain.
    pub(crate) local_names: FxHashMap<String, usize>,
    pub(crate) upvalues: FxHashMap<String, UpvalueInfo>,
    pub(crate) constants: FxHashMap<Constant, usize>,

    /// Pending break jumps per scope; `None` marks a non-loop scope.
    breaks: Vec<Option<Vec<usize>>>,
    /// Pending continue jumps per scope, parallel to `breaks`.
    continues: Vec<Option<Vec<usize>>>,

    pub(crate) code: Vec<Instruction>,
    pub(crate) line_info: Vec<u32>,

    pub(crate) line_defined: u32,
    pub(crate) last_line_defined: u32,
    pub(crate) num_params: u8,
    pub(crate) is_vararg: bool,
}

impl FuncState {
    pub(crate) fn new(
        parent: Option<usize>,
        line_defined: u32,
        last_line_defined: u32,
        num_params: u8,
        is_vararg: bool,
    ) -> Self {
        FuncState {
            parent,
            children: Vec::new(),
            used_regs: 0,
            max_regs: 0,
            scope_level: 0,
            local_vars: Vec::new(),
            local_names: FxHashMap::default(),
            upvalues: FxHashMap::default(),
            constants: FxHashMap::default(),
            breaks: vec![None],
            continues: vec![None],
            code: Vec::new(),
            line_info: Vec::new(),
            line_defined,
            last_line_defined,
            num_params,
            is_vararg,
        }
    }

    /// Index of the last emitted instruction; -1 while the buffer is
    /// empty, so jump offsets compute uniformly.
    pub(crate) fn pc(&self) -> i32 {
        self.code.len() as i32 - 1
    }

    // ---- register allocation ----

    /// Claim the next free register.
    pub(crate) fn alloc_reg(&mut self) -> CompileResult<usize> {
        self.used_regs += 1;
        if self.used_regs >= MAX_REGISTERS {
            return Err(CompileError::TooManyRegisters);
        }
        if self.used_regs > self.max_regs {
            self.max_regs = self.used_regs;
        }
        Ok(self.used_regs - 1)
    }

    /// Claim `n` consecutive registers and return the first.
    pub(crate) fn alloc_regs(&mut self, n: usize) -> CompileResult<usize> {
        for _ in 0..n {
            self.alloc_reg()?;
        }
        Ok(self.used_regs - n)
    }

    /// Peek at the next register without claiming it, but count it
    /// toward the frame size. Paired with [`check_alloc_reg`] after the
    /// value producer runs.
    ///
    /// [`check_alloc_reg`]: FuncState::check_alloc_reg
    pub(crate) fn pre_alloc_reg(&mut self) -> CompileResult<usize> {
        let n = self.used_regs + 1;
        if n >= MAX_REGISTERS {
            return Err(CompileError::TooManyRegisters);
        }
        if n > self.max_regs {
            self.max_regs = n;
        }
        Ok(self.used_regs)
    }

    /// Commit a previously peeked register. A producer that claimed its
    /// own registers (a call, say) leaves `a` already covered and this
    /// is a no-op; a producer that claimed past it skipped a slot, which
    /// is a generator bug.
    pub(crate) fn check_alloc_reg(&mut self, a: usize) -> CompileResult<()> {
        if self.used_regs == a {
            self.alloc_reg()?;
            return Ok(());
        }
        if self.used_regs < a {
            return Err(CompileError::internal(format!(
                "register {a} committed while only {} are in use",
                self.used_regs
            )));
        }
        Ok(())
    }

    /// Release the most recently claimed register.
    pub(crate) fn free_reg(&mut self) -> CompileResult<()> {
        if self.used_regs == 0 {
            return Err(CompileError::internal(
                "freed a register with none in use",
            ));
        }
        self.used_regs -= 1;
        Ok(())
    }

    /// Release the top `n` registers.
    pub(crate) fn free_regs(&mut self, n: usize) -> CompileResult<()> {
        for _ in 0..n {
            self.free_reg()?;
        }
        Ok(())
    }

    // ---- scopes, locals, and pending jumps ----

    pub(crate) fn enter_scope(&mut self, breakable: bool) {
        self.scope_level += 1;
        if breakable {
            self.breaks.push(Some(Vec::new()));
            self.continues.push(Some(Vec::new()));
        } else {
            self.breaks.push(None);
            self.continues.push(None);
        }
    }

    /// Close the current scope: backpatch its pending breaks to the next
    /// pc, then unlink and release every local declared in it. `end_pc`
    /// becomes the recorded death point of those locals.
    pub(crate) fn exit_scope(&mut self, end_pc: i32) -> CompileResult<()> {
        let pending = self.breaks.pop().flatten().unwrap_or_default();
        self.continues.pop();
        // Break jumps double as close instructions when the dying scope
        // has captured locals.
        let close_slot = self.jmp_close_slot();
        for pc in pending {
            let sbx = self.pc() - pc as i32;
            self.code[pc] = Instruction::asbx(Opcode::Jmp, close_slot as u32, sbx);
        }
        self.scope_level -= 1;
        let mut dead: Vec<usize> = self
            .local_names
            .values()
            .copied()
            .filter(|&i| self.local_vars[i].scope_level > self.scope_level)
            .collect();
        // Map order is arbitrary; release in a fixed order so register
        // accounting stays deterministic.
        dead.sort_unstable();
        for idx in dead {
            self.remove_local(idx, end_pc)?;
        }
        Ok(())
    }

    fn remove_local(&mut self, idx: usize, end_pc: i32) -> CompileResult<()> {
        self.free_reg()?;
        self.local_vars[idx].end_pc = end_pc;
        let (name, level, prev) = {
            let v = &self.local_vars[idx];
            (v.name.clone(), v.scope_level, v.prev)
        };
        match prev {
            None => {
                self.local_names.remove(&name);
            }
            // Same-level shadowing: the whole chain segment dies at once.
            Some(p) if self.local_vars[p].scope_level == level => {
                self.remove_local(p, end_pc)?;
            }
            Some(p) => {
                self.local_names.insert(name, p);
            }
        }
        Ok(())
    }

    /// Declare a local in the current scope and return its register.
    pub(crate) fn add_local(&mut self, name: &str, start_pc: i32) -> CompileResult<usize> {
        let slot = self.alloc_reg()?;
        let idx = self.local_vars.len();
        let prev = self.local_names.get(name).copied();
        self.local_vars.push(LocalVar {
            prev,
            name: name.to_string(),
            scope_level: self.scope_level,
            slot,
            start_pc,
            end_pc: 0,
            captured: false,
        });
        self.local_names.insert(name.to_string(), idx);
        Ok(slot)
    }

    /// Register of an in-scope local, if the name resolves to one.
    pub(crate) fn slot_of_local(&self, name: &str) -> Option<usize> {
        self.local_names
            .get(name)
            .map(|&i| self.local_vars[i].slot)
    }

    /// Record a break jump to be patched when its loop scope exits.
    pub(crate) fn add_break_jmp(&mut self, pc: usize, line: u32) -> CompileResult<()> {
        for slot in self.breaks.iter_mut().rev() {
            if let Some(list) = slot {
                list.push(pc);
                return Ok(());
            }
        }
        Err(CompileError::BreakOutsideLoop { line })
    }

    /// Record a continue jump to be patched at the loop's step point.
    pub(crate) fn add_continue_jmp(&mut self, pc: usize, line: u32) -> CompileResult<()> {
        for slot in self.continues.iter_mut().rev() {
            if let Some(list) = slot {
                list.push(pc);
                return Ok(());
            }
        }
        Err(CompileError::ContinueOutsideLoop { line })
    }

    /// Patch the current loop scope's pending continues to the next pc.
    /// Called just before the step statement (or the iterator re-call).
    pub(crate) fn set_continue_jmps(&mut self) {
        let pending = match self.continues.last_mut() {
            Some(slot) => slot.take().unwrap_or_default(),
            None => Vec::new(),
        };
        for pc in pending {
            let sbx = self.pc() - pc as i32;
            self.fix_sbx(pc, sbx);
        }
    }

    /// A operand for a scope-closing JMP: one past the lowest named slot
    /// of the current scope if any of its locals is captured, else 0.
    /// Compiler-invented names (parenthesized) never count.
    pub(crate) fn jmp_close_slot(&self) -> usize {
        let mut has_captured = false;
        let mut min_slot = self.max_regs;
        for &head in self.local_names.values() {
            let mut cur = Some(head);
            while let Some(i) = cur {
                let v = &self.local_vars[i];
                if v.scope_level != self.scope_level {
                    break;
                }
                if v.captured {
                    has_captured = true;
                }
                if v.slot < min_slot && !v.name.starts_with('(') {
                    min_slot = v.slot;
                }
                cur = v.prev;
            }
        }
        if has_captured { min_slot + 1 } else { 0 }
    }

    /// Emit a close JMP if the current scope holds captured locals.
    /// Used before backward jumps, which the scope-exit patching of
    /// forward breaks cannot cover.
    pub(crate) fn close_open_upvalues(&mut self, line: u32) {
        let a = self.jmp_close_slot();
        if a > 0 {
            self.emit_jmp(line, a, 0);
        }
    }

    // ---- constants ----

    /// Pool index of `k`, interning it on first use.
    pub(crate) fn constant_index(&mut self, k: &Constant) -> usize {
        if let Some(&idx) = self.constants.get(k) {
            return idx;
        }
        let idx = self.constants.len();
        self.constants.insert(k.clone(), idx);
        idx
    }

    // ---- instruction emission ----

    fn emit(&mut self, line: u32, inst: Instruction) -> usize {
        self.code.push(inst);
        self.line_info.push(line);
        self.code.len() - 1
    }

    pub(crate) fn emit_abc(&mut self, line: u32, op: Opcode, a: usize, b: usize, c: usize) {
        self.emit(line, Instruction::abc(op, a as u32, b as u32, c as u32));
    }

    pub(crate) fn emit_abx(&mut self, line: u32, op: Opcode, a: usize, bx: usize) {
        self.emit(line, Instruction::abx(op, a as u32, bx as u32));
    }

    fn emit_asbx(&mut self, line: u32, op: Opcode, a: usize, sbx: i32) -> usize {
        self.emit(line, Instruction::asbx(op, a as u32, sbx))
    }

    fn emit_ax(&mut self, line: u32, op: Opcode, ax: usize) {
        self.emit(line, Instruction::ax(op, ax as u32));
    }

    /// Rewrite the jump offset of the instruction at `pc`.
    pub(crate) fn fix_sbx(&mut self, pc: usize, sbx: i32) {
        self.code[pc].set_sbx(sbx);
    }

    /// Stretch the recorded lifetime of `name` by `delta` instructions.
    pub(crate) fn fix_end_pc(&mut self, name: &str, delta: i32) {
        for v in self.local_vars.iter_mut().rev() {
            if v.name == name {
                v.end_pc += delta;
                return;
            }
        }
    }

    pub(crate) fn emit_move(&mut self, line: u32, a: usize, b: usize) {
        self.emit_abc(line, Opcode::Move, a, b, 0);
    }

    /// `r[a] .. r[a+n-1] = nil`
    pub(crate) fn emit_load_nil(&mut self, line: u32, a: usize, n: usize) {
        self.emit_abc(line, Opcode::LoadNil, a, n - 1, 0);
    }

    pub(crate) fn emit_load_bool(&mut self, line: u32, a: usize, b: usize, c: usize) {
        self.emit_abc(line, Opcode::LoadBool, a, b, c);
    }

    /// Load constant `k`, falling back to LOADKX/EXTRAARG when the pool
    /// index outgrows the 18-bit Bx field.
    pub(crate) fn emit_load_k(&mut self, line: u32, a: usize, k: Constant) {
        let idx = self.constant_index(&k);
        if idx < (1 << 18) {
            self.emit_abx(line, Opcode::LoadK, a, idx);
        } else {
            self.emit_abx(line, Opcode::LoadKx, a, 0);
            self.emit_ax(line, Opcode::ExtraArg, idx);
        }
    }

    /// `n` of -1 requests all remaining varargs.
    pub(crate) fn emit_vararg(&mut self, line: u32, a: usize, n: i32) {
        self.emit_abc(line, Opcode::VarArg, a, (n + 1) as usize, 0);
    }

    pub(crate) fn emit_closure(&mut self, line: u32, a: usize, bx: usize) {
        self.emit_abx(line, Opcode::Closure, a, bx);
    }

    pub(crate) fn emit_new_table(&mut self, line: u32, a: usize, n_arr: usize, n_rec: usize) {
        self.emit_abc(line, Opcode::NewTable, a, int2fb(n_arr), int2fb(n_rec));
    }

    pub(crate) fn emit_set_list(&mut self, line: u32, a: usize, b: usize, c: usize) {
        self.emit_abc(line, Opcode::SetList, a, b, c);
    }

    pub(crate) fn emit_get_table(&mut self, line: u32, a: usize, b: usize, c: usize) {
        self.emit_abc(line, Opcode::GetTable, a, b, c);
    }

    pub(crate) fn emit_set_table(&mut self, line: u32, a: usize, b: usize, c: usize) {
        self.emit_abc(line, Opcode::SetTable, a, b, c);
    }

    pub(crate) fn emit_get_upval(&mut self, line: u32, a: usize, b: usize) {
        self.emit_abc(line, Opcode::GetUpval, a, b, 0);
    }

    pub(crate) fn emit_set_upval(&mut self, line: u32, a: usize, b: usize) {
        self.emit_abc(line, Opcode::SetUpval, a, b, 0);
    }

    pub(crate) fn emit_get_tab_up(&mut self, line: u32, a: usize, b: usize, c: usize) {
        self.emit_abc(line, Opcode::GetTabUp, a, b, c);
    }

    pub(crate) fn emit_set_tab_up(&mut self, line: u32, a: usize, b: usize, c: usize) {
        self.emit_abc(line, Opcode::SetTabUp, a, b, c);
    }

    pub(crate) fn emit_self(&mut self, line: u32, a: usize, b: usize, c: usize) {
        self.emit_abc(line, Opcode::Self_, a, b, c);
    }

    /// `n_args` of -1 marks an argument list ending in a multi-value
    /// expression; `n_ret` of -1 keeps all results.
    pub(crate) fn emit_call(&mut self, line: u32, a: usize, n_args: i32, n_ret: i32) {
        self.emit_abc(line, Opcode::Call, a, (n_args + 1) as usize, (n_ret + 1) as usize);
    }

    pub(crate) fn emit_tail_call(&mut self, line: u32, a: usize, n_args: i32) {
        self.emit_abc(line, Opcode::TailCall, a, (n_args + 1) as usize, 0);
    }

    /// `n` of -1 returns everything from `r[a]` up.
    pub(crate) fn emit_return(&mut self, line: u32, a: usize, n: i32) {
        self.emit_abc(line, Opcode::Return, a, (n + 1) as usize, 0);
    }

    /// Returns the pc of the jump so it can be patched later.
    pub(crate) fn emit_jmp(&mut self, line: u32, a: usize, sbx: i32) -> usize {
        self.emit_asbx(line, Opcode::Jmp, a, sbx)
    }

    pub(crate) fn emit_test(&mut self, line: u32, a: usize, c: usize) {
        self.emit_abc(line, Opcode::Test, a, 0, c);
    }

    pub(crate) fn emit_test_set(&mut self, line: u32, a: usize, b: usize, c: usize) {
        self.emit_abc(line, Opcode::TestSet, a, b, c);
    }

    pub(crate) fn emit_tfor_call(&mut self, line: u32, a: usize, c: usize) {
        self.emit_abc(line, Opcode::TForCall, a, 0, c);
    }

    pub(crate) fn emit_tfor_loop(&mut self, line: u32, a: usize, sbx: i32) {
        self.emit_asbx(line, Opcode::TForLoop, a, sbx);
    }

    pub(crate) fn emit_unary_op(&mut self, line: u32, op: UnOp, a: usize, b: usize) {
        let opc = match op {
            UnOp::Neg => Opcode::Unm,
            UnOp::Not => Opcode::Not,
            UnOp::BNot => Opcode::BNot,
            UnOp::Len => Opcode::Len,
        };
        self.emit_abc(line, opc, a, b, 0);
    }

    /// Emit a binary operation on RK-encoded operands. Arithmetic and
    /// bitwise forms are single instructions; comparisons lower to a
    /// test plus a LOADBOOL pair, with `>` and `>=` emitted as their
    /// mirrored counterparts on swapped operands.
    pub(crate) fn emit_binary_op(&mut self, line: u32, op: BinOp, a: usize, b: usize, c: usize) {
        let (opc, flag, x, y) = match op {
            BinOp::Add => return self.emit_abc(line, Opcode::Add, a, b, c),
            BinOp::Sub => return self.emit_abc(line, Opcode::Sub, a, b, c),
            BinOp::Mul => return self.emit_abc(line, Opcode::Mul, a, b, c),
            BinOp::Div => return self.emit_abc(line, Opcode::Div, a, b, c),
            BinOp::IDiv => return self.emit_abc(line, Opcode::IDiv, a, b, c),
            BinOp::Mod => return self.emit_abc(line, Opcode::Mod, a, b, c),
            BinOp::Pow => return self.emit_abc(line, Opcode::Pow, a, b, c),
            BinOp::BAnd => return self.emit_abc(line, Opcode::BAnd, a, b, c),
            BinOp::BOr => return self.emit_abc(line, Opcode::BOr, a, b, c),
            BinOp::BXor => return self.emit_abc(line, Opcode::BXor, a, b, c),
            BinOp::Shl => return self.emit_abc(line, Opcode::Shl, a, b, c),
            BinOp::Shr => return self.emit_abc(line, Opcode::Shr, a, b, c),
            BinOp::Eq => (Opcode::Eq, 1, b, c),
            BinOp::Ne => (Opcode::Eq, 0, b, c),
            BinOp::Lt => (Opcode::Lt, 1, b, c),
            BinOp::Le => (Opcode::Le, 1, b, c),
            BinOp::Gt => (Opcode::Lt, 1, c, b),
            BinOp::Ge => (Opcode::Le, 1, c, b),
        };
        self.emit_abc(line, opc, flag, x, y);
        self.emit_jmp(line, 0, 1);
        self.emit_load_bool(line, a, 0, 1);
        self.emit_load_bool(line, a, 1, 0);
    }
}

/// Encode a table size hint as a floating-point byte
/// (`eeeeexxx` meaning `(1xxx) * 2^(eeeee-1)` for nonzero exponents).
pub(crate) fn int2fb(mut x: usize) -> usize {
    if x < 8 {
        return x;
    }
    let mut e = 0;
    while x >= 8 << 4 {
        x = (x + 0xF) >> 4;
        e += 4;
    }
    while x >= 8 << 1 {
        x = (x + 1) >> 1;
        e += 1;
    }
    ((e + 1) << 3) | (x - 8)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> FuncState {
        FuncState::new(None, 0, 0, 0, false)
    }

    #[test]
    fn test_alloc_is_stack_ordered() {
        let mut fs = state();
        assert_eq!(fs.alloc_reg().unwrap(), 0);
        assert_eq!(fs.alloc_reg().unwrap(), 1);
        fs.free_reg().unwrap();
        assert_eq!(fs.alloc_reg().unwrap(), 1);
        assert_eq!(fs.max_regs, 2);
    }

    #[test]
    fn test_pre_alloc_counts_toward_frame_size() {
        let mut fs = state();
        assert_eq!(fs.pre_alloc_reg().unwrap(), 0);
        assert_eq!(fs.used_regs, 0);
        assert_eq!(fs.max_regs, 1);
        fs.check_alloc_reg(0).unwrap();
        assert_eq!(fs.used_regs, 1);
    }

    #[test]
    fn test_check_alloc_detects_out_of_order_commit() {
        let mut fs = state();
        assert!(matches!(
            fs.check_alloc_reg(3),
            Err(CompileError::Internal(_))
        ));
    }

    #[test]
    fn test_alloc_hits_register_ceiling() {
        let mut fs = state();
        for _ in 0..MAX_REGISTERS - 1 {
            fs.alloc_reg().unwrap();
        }
        assert_eq!(fs.alloc_reg(), Err(CompileError::TooManyRegisters));
    }

    #[test]
    fn test_free_below_zero_is_internal_error() {
        let mut fs = state();
        assert!(matches!(fs.free_reg(), Err(CompileError::Internal(_))));
    }

    #[test]
    fn test_scope_exit_restores_shadowed_local() {
        let mut fs = state();
        let outer = fs.add_local("x", 0).unwrap();
        fs.enter_scope(false);
        let inner = fs.add_local("x", 0).unwrap();
        assert_ne!(outer, inner);
        assert_eq!(fs.slot_of_local("x"), Some(inner));
        fs.exit_scope(5).unwrap();
        assert_eq!(fs.slot_of_local("x"), Some(outer));
        assert_eq!(fs.used_regs, 1);
        // The dead entry keeps its liveness range for the debug table.
        assert_eq!(fs.local_vars[1].end_pc, 5);
    }

    #[test]
    fn test_same_level_shadowing_dies_together() {
        let mut fs = state();
        fs.enter_scope(false);
        fs.add_local("x", 0).unwrap();
        fs.add_local("x", 1).unwrap();
        assert_eq!(fs.used_regs, 2);
        fs.exit_scope(3).unwrap();
        assert_eq!(fs.slot_of_local("x"), None);
        assert_eq!(fs.used_regs, 0);
    }

    #[test]
    fn test_break_patched_at_scope_exit() {
        let mut fs = state();
        fs.enter_scope(true);
        let pc = fs.emit_jmp(1, 0, 0);
        fs.add_break_jmp(pc, 1).unwrap();
        fs.emit_move(1, 0, 0);
        fs.exit_scope(fs.pc()).unwrap();
        // Jump lands one past the MOVE.
        assert_eq!(fs.code[pc].sbx(), 1);
    }

    #[test]
    fn test_break_outside_loop_is_rejected() {
        let mut fs = state();
        fs.enter_scope(false);
        assert_eq!(
            fs.add_break_jmp(0, 7),
            Err(CompileError::BreakOutsideLoop { line: 7 })
        );
    }

    #[test]
    fn test_close_slot_skips_invented_names() {
        let mut fs = state();
        fs.enter_scope(true);
        fs.add_local("(for state)", 0).unwrap();
        let slot = fs.add_local("v", 0).unwrap();
        let idx = fs.local_names["v"];
        fs.local_vars[idx].captured = true;
        assert_eq!(fs.jmp_close_slot(), slot + 1);
    }

    #[test]
    fn test_close_slot_zero_without_captures() {
        let mut fs = state();
        fs.enter_scope(true);
        fs.add_local("v", 0).unwrap();
        assert_eq!(fs.jmp_close_slot(), 0);
    }

    #[test]
    fn test_constants_deduplicate() {
        let mut fs = state();
        let a = fs.constant_index(&Constant::Integer(1));
        let b = fs.constant_index(&Constant::Str("1".to_string()));
        let c = fs.constant_index(&Constant::Integer(1));
        assert_eq!(a, c);
        assert_ne!(a, b);
    }

    #[test]
    fn test_load_k_falls_back_to_loadkx() {
        let mut fs = state();
        for i in 0..(1 << 18) {
            fs.constant_index(&Constant::Integer(i));
        }
        fs.emit_load_k(1, 0, Constant::Integer(1 << 18));
        assert_eq!(fs.code.len(), 2);
        assert_eq!(fs.code[0].opcode(), Some(Opcode::LoadKx));
        assert_eq!(fs.code[1].opcode(), Some(Opcode::ExtraArg));
        assert_eq!(fs.code[1].ax_arg(), 1 << 18);
    }

    #[test]
    fn test_comparison_lowering_shape() {
        let mut fs = state();
        fs.emit_binary_op(1, BinOp::Gt, 0, 1, 2);
        let ops: Vec<_> = fs.code.iter().map(|i| i.opcode().unwrap()).collect();
        assert_eq!(
            ops,
            vec![Opcode::Lt, Opcode::Jmp, Opcode::LoadBool, Opcode::LoadBool]
        );
        // Operands swapped for the mirrored comparison.
        assert_eq!(fs.code[0].b(), 2);
        assert_eq!(fs.code[0].c(), 1);
    }

    #[test]
    fn test_int2fb() {
        assert_eq!(int2fb(0), 0);
        assert_eq!(int2fb(7), 7);
        assert_eq!(int2fb(8), 8);
        assert_eq!(int2fb(50), 29);
    }
}
