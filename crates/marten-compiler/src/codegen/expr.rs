//! Expression lowering
//!
//! Every expression is compiled "into" a register `a` chosen by the
//! caller; `n` is the number of results wanted, with -1 meaning "all of
//! them" (only calls and `...` can oblige). Operand positions that
//! accept RK or upvalue encodings go through [`CodeGen::exp_to_op_arg`],
//! which picks the cheapest legal classification.

use marten_bytecode::{Constant, Opcode};

use crate::ast::{Block, Call, Expr, LogOp};
use crate::error::{CompileError, CompileResult};

use super::CodeGen;

/// Array-part entries SETLIST moves per flush.
const FIELDS_PER_FLUSH: usize = 50;

/// Which operand encodings an instruction position accepts. A register
/// is always acceptable; the policy only widens the choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OperandPolicy {
    /// Register only (TEST, TESTSET, unary operands).
    Reg,
    /// Register or constant (RK positions).
    RegConst,
    /// Register or upvalue (table prefix positions).
    RegUpval,
}

impl OperandPolicy {
    fn allows_const(self) -> bool {
        self == OperandPolicy::RegConst
    }

    fn allows_upval(self) -> bool {
        self == OperandPolicy::RegUpval
    }
}

/// How an operand ended up encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OpArgKind {
    Reg,
    Const,
    Upval,
}

impl CodeGen {
    /// Compile `exp` into registers starting at `a`, producing `n`
    /// results (-1 keeps everything a call or `...` yields).
    pub(crate) fn compile_expr(&mut self, exp: &Expr, a: usize, n: i32) -> CompileResult<()> {
        match exp {
            Expr::Nil { line } => {
                self.fs_mut().emit_load_nil(*line, a, n as usize);
                Ok(())
            }
            Expr::False { line } => {
                self.fs_mut().emit_load_bool(*line, a, 0, 0);
                Ok(())
            }
            Expr::True { line } => {
                self.fs_mut().emit_load_bool(*line, a, 1, 0);
                Ok(())
            }
            Expr::Integer { line, value } => {
                self.fs_mut().emit_load_k(*line, a, Constant::Integer(*value));
                Ok(())
            }
            Expr::Float { line, value } => {
                self.fs_mut().emit_load_k(*line, a, Constant::Float(*value));
                Ok(())
            }
            Expr::Str { line, value } => {
                self.fs_mut()
                    .emit_load_k(*line, a, Constant::Str(value.clone()));
                Ok(())
            }
            Expr::Paren(inner) => self.compile_expr(inner, a, 1),
            Expr::Vararg { line } => self.compile_vararg(*line, a, n),
            Expr::Function {
                line,
                last_line,
                params,
                is_vararg,
                body,
            } => self.compile_closure(*line, *last_line, params, *is_vararg, body, a),
            Expr::Table {
                line,
                keys,
                values,
                ..
            } => self.compile_table_ctor(*line, keys, values, a),
            Expr::Unary { line, op, expr } => {
                let old = self.fs().used_regs;
                let (b, _) = self.exp_to_op_arg(expr, OperandPolicy::Reg)?;
                self.fs_mut().emit_unary_op(*line, *op, a, b);
                self.fs_mut().used_regs = old;
                Ok(())
            }
            Expr::Binary { line, op, lhs, rhs } => {
                let old = self.fs().used_regs;
                let (b, _) = self.exp_to_op_arg(lhs, OperandPolicy::RegConst)?;
                let (c, _) = self.exp_to_op_arg(rhs, OperandPolicy::RegConst)?;
                self.fs_mut().emit_binary_op(*line, *op, a, b, c);
                self.fs_mut().used_regs = old;
                Ok(())
            }
            Expr::Logical { line, op, exps } => self.compile_logical(*line, *op, exps, a),
            Expr::Concat { line, exps } => self.compile_concat(*line, exps, a),
            Expr::Name { line, name } => self.compile_name(*line, name, a),
            Expr::Index { last_line, obj, key } => self.compile_index(*last_line, obj, key, a),
            Expr::Call(call) => self.compile_call(call, a, n),
        }
    }

    fn compile_vararg(&mut self, line: u32, a: usize, n: i32) -> CompileResult<()> {
        if !self.fs().is_vararg {
            return Err(CompileError::VarargOutsideVarargFunction { line });
        }
        self.fs_mut().emit_vararg(line, a, n);
        Ok(())
    }

    fn compile_closure(
        &mut self,
        line: u32,
        last_line: u32,
        params: &[String],
        is_vararg: bool,
        body: &Block,
        a: usize,
    ) -> CompileResult<()> {
        self.compile_function(line, last_line, params, is_vararg, body)?;
        let bx = self.fs().children.len() - 1;
        self.fs_mut().emit_closure(last_line, a, bx);
        Ok(())
    }

    fn compile_table_ctor(
        &mut self,
        line: u32,
        keys: &[Option<Expr>],
        values: &[Expr],
        a: usize,
    ) -> CompileResult<()> {
        let n_arr = keys.iter().filter(|k| k.is_none()).count();
        let n_exps = keys.len();
        let mult_ret = n_exps > 0 && values[n_exps - 1].is_multi_value();
        self.fs_mut()
            .emit_new_table(line, a, n_arr, n_exps - n_arr);
        // Entry temporaries must land above the table register.
        self.fs_mut().check_alloc_reg(a)?;

        let mut arr_idx = 0;
        for (i, key) in keys.iter().enumerate() {
            let val = &values[i];
            let Some(key) = key else {
                // Positional entry; buffered and flushed in batches.
                arr_idx += 1;
                let tmp = self.fs_mut().pre_alloc_reg()?;
                let last = i == n_exps - 1 && mult_ret;
                self.compile_expr(val, tmp, if last { -1 } else { 1 })?;
                self.fs_mut().check_alloc_reg(tmp)?;

                if arr_idx % FIELDS_PER_FLUSH == 0 || arr_idx == n_arr {
                    let mut n = arr_idx % FIELDS_PER_FLUSH;
                    if n == 0 {
                        n = FIELDS_PER_FLUSH;
                    }
                    self.fs_mut().free_regs(n)?;
                    let flush_line = val.last_line();
                    let c = (arr_idx - 1) / FIELDS_PER_FLUSH + 1;
                    if last {
                        self.fs_mut().emit_set_list(flush_line, a, 0, c);
                    } else {
                        self.fs_mut().emit_set_list(flush_line, a, n, c);
                    }
                }
                continue;
            };

            let b = self.fs_mut().pre_alloc_reg()?;
            self.compile_expr(key, b, 1)?;
            self.fs_mut().check_alloc_reg(b)?;
            let c = self.fs_mut().pre_alloc_reg()?;
            self.compile_expr(val, c, 1)?;
            self.fs_mut().check_alloc_reg(c)?;
            self.fs_mut().free_regs(2)?;
            self.fs_mut().emit_set_table(val.last_line(), a, b, c);
        }
        Ok(())
    }

    /// Short-circuit chain. Each operand but the last gets a TESTSET
    /// that stores and bails when it decides the result; all bail jumps
    /// land just past the final MOVE.
    fn compile_logical(
        &mut self,
        line: u32,
        op: LogOp,
        exps: &[Expr],
        a: usize,
    ) -> CompileResult<()> {
        let bail_on = match op {
            LogOp::And => 0,
            LogOp::Or => 1,
        };
        let old = self.fs().used_regs;
        let mut jmps = Vec::with_capacity(exps.len() - 1);

        let (mut b, _) = self.exp_to_op_arg(&exps[0], OperandPolicy::Reg)?;
        self.fs_mut().used_regs = old;
        for exp in &exps[1..] {
            self.fs_mut().emit_test_set(line, a, b, bail_on);
            jmps.push(self.fs_mut().emit_jmp(line, 0, 0));
            let (next, _) = self.exp_to_op_arg(exp, OperandPolicy::Reg)?;
            self.fs_mut().used_regs = old;
            b = next;
        }
        self.fs_mut().emit_move(line, a, b);
        let end = self.fs().pc();
        for pc in jmps {
            self.fs_mut().fix_sbx(pc, end - pc as i32);
        }
        Ok(())
    }

    fn compile_concat(&mut self, line: u32, exps: &[Expr], a: usize) -> CompileResult<()> {
        for exp in exps {
            let tmp = self.fs_mut().pre_alloc_reg()?;
            self.compile_expr(exp, tmp, 1)?;
            self.fs_mut().check_alloc_reg(tmp)?;
        }
        let c = self.fs().used_regs - 1;
        let b = c - exps.len() + 1;
        self.fs_mut().free_regs(c - b + 1)?;
        self.fs_mut().emit_abc(line, Opcode::Concat, a, b, c);
        Ok(())
    }

    fn compile_name(&mut self, line: u32, name: &str, a: usize) -> CompileResult<()> {
        if let Some(slot) = self.fs().slot_of_local(name) {
            self.fs_mut().emit_move(line, a, slot);
            return Ok(());
        }
        let cur = self.cur;
        if let Some(idx) = self.upvalue_index(cur, name) {
            self.fs_mut().emit_get_upval(line, a, idx);
            return Ok(());
        }
        // Free name: sugar for _ENV[name].
        let obj = Expr::Name {
            line,
            name: "_ENV".to_string(),
        };
        let key = Expr::Str {
            line,
            value: name.to_string(),
        };
        self.compile_index(line, &obj, &key, a)
    }

    pub(crate) fn compile_index(
        &mut self,
        last_line: u32,
        obj: &Expr,
        key: &Expr,
        a: usize,
    ) -> CompileResult<()> {
        let old = self.fs().used_regs;
        let (b, kind_b) = self.exp_to_op_arg(obj, OperandPolicy::RegUpval)?;
        let (c, _) = self.exp_to_op_arg(key, OperandPolicy::RegConst)?;
        self.fs_mut().used_regs = old;
        if kind_b == OpArgKind::Upval {
            self.fs_mut().emit_get_tab_up(last_line, a, b, c);
        } else {
            self.fs_mut().emit_get_table(last_line, a, b, c);
        }
        Ok(())
    }

    pub(crate) fn compile_call(&mut self, call: &Call, a: usize, n: i32) -> CompileResult<()> {
        let n_args = self.prep_call(call, a)?;
        self.fs_mut().emit_call(call.line, a, n_args, n);
        Ok(())
    }

    pub(crate) fn compile_tail_call(&mut self, call: &Call, a: usize) -> CompileResult<()> {
        let n_args = self.prep_call(call, a)?;
        self.fs_mut().emit_tail_call(call.line, a, n_args);
        Ok(())
    }

    /// Evaluate callee and arguments into consecutive registers starting
    /// at `a` and return the encoded argument count (-1 when the last
    /// argument is multi-value). Method calls splice the receiver in via
    /// SELF and count it as an extra argument.
    fn prep_call(&mut self, call: &Call, a: usize) -> CompileResult<i32> {
        let mut n_args = call.args.len() as i32;
        let mut last_is_multi = false;

        self.compile_expr(&call.callee, a, 1)?;
        // The callee register must be committed before the receiver slot
        // is claimed next to it.
        self.fs_mut().check_alloc_reg(a)?;
        if let Some(method) = &call.method {
            self.fs_mut().alloc_reg()?;
            let name_exp = Expr::Str {
                line: call.line,
                value: method.clone(),
            };
            let (c, kind) = self.exp_to_op_arg(&name_exp, OperandPolicy::RegConst)?;
            self.fs_mut().emit_self(call.line, a, a, c);
            if kind == OpArgKind::Reg {
                self.fs_mut().free_regs(1)?;
            }
        }
        for (i, arg) in call.args.iter().enumerate() {
            let tmp = self.fs_mut().pre_alloc_reg()?;
            if i == call.args.len() - 1 && arg.is_multi_value() {
                last_is_multi = true;
                self.compile_expr(arg, tmp, -1)?;
            } else {
                self.compile_expr(arg, tmp, 1)?;
            }
            self.fs_mut().check_alloc_reg(tmp)?;
        }
        self.fs_mut().free_regs(call.args.len())?;

        if call.method.is_some() {
            self.fs_mut().free_reg()?;
            n_args += 1;
        }
        if last_is_multi {
            n_args = -1;
        }
        Ok(n_args)
    }

    /// Classify `exp` as an instruction operand under `policy`.
    ///
    /// Literals become RK-encoded constants while the pool index still
    /// fits a byte; names prefer their local register, then an upvalue
    /// slot if allowed. Everything else evaluates into a fresh register,
    /// which stays claimed so the caller can batch-restore `used_regs`.
    pub(crate) fn exp_to_op_arg(
        &mut self,
        exp: &Expr,
        policy: OperandPolicy,
    ) -> CompileResult<(usize, OpArgKind)> {
        if policy.allows_const() {
            let k = match exp {
                Expr::Nil { .. } => Some(Constant::Nil),
                Expr::True { .. } => Some(Constant::Boolean(true)),
                Expr::False { .. } => Some(Constant::Boolean(false)),
                Expr::Integer { value, .. } => Some(Constant::Integer(*value)),
                Expr::Float { value, .. } => Some(Constant::Float(*value)),
                Expr::Str { value, .. } => Some(Constant::Str(value.clone())),
                _ => None,
            };
            if let Some(k) = k {
                let idx = self.fs_mut().constant_index(&k);
                if idx <= 0xFF {
                    return Ok((0x100 + idx, OpArgKind::Const));
                }
            }
        }
        if let Expr::Name { name, .. } = exp {
            if let Some(slot) = self.fs().slot_of_local(name) {
                return Ok((slot, OpArgKind::Reg));
            }
            if policy.allows_upval() {
                let cur = self.cur;
                if let Some(idx) = self.upvalue_index(cur, name) {
                    return Ok((idx, OpArgKind::Upval));
                }
            }
        }
        let a = self.fs_mut().pre_alloc_reg()?;
        self.compile_expr(exp, a, 1)?;
        self.fs_mut().check_alloc_reg(a)?;
        Ok((a, OpArgKind::Reg))
    }
}
