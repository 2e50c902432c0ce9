//! Statement lowering
//!
//! Loops all share one shape: init statements, condition test, body,
//! resolved continues, step, backward jump. `for..in` desugars onto the
//! generic-for opcodes with three compiler-invented locals holding the
//! iterator triple.

use marten_bytecode::Constant;

use crate::ast::{strip_trailing_nils, Block, Expr, IfArm, Stat};
use crate::error::{CompileError, CompileResult};

use super::expr::OperandPolicy;
use super::CodeGen;

const FOR_GENERATOR: &str = "(for generator)";
const FOR_STATE: &str = "(for state)";
const FOR_CONTROL: &str = "(for control)";

impl CodeGen {
    pub(crate) fn compile_stat(&mut self, stat: &Stat) -> CompileResult<()> {
        match stat {
            Stat::Empty => Ok(()),
            Stat::Break { line } => {
                let pc = self.fs_mut().emit_jmp(*line, 0, 0);
                self.fs_mut().add_break_jmp(pc, *line)
            }
            Stat::Continue { line } => {
                let pc = self.fs_mut().emit_jmp(*line, 0, 0);
                self.fs_mut().add_continue_jmp(pc, *line)
            }
            Stat::Block(block) => self.compile_block_stat(block),
            Stat::Loop {
                init,
                cond,
                step,
                body,
            } => self.compile_loop(init, cond, step.as_deref(), body),
            Stat::If { arms } => self.compile_if(arms),
            Stat::ForIn {
                line_of_body,
                names,
                exps,
                body,
            } => self.compile_for_in(*line_of_body, names, exps, body),
            Stat::LocalDecl {
                last_line,
                names,
                values,
            } => self.compile_local_decl(names, values, *last_line),
            Stat::Assign {
                last_line,
                targets,
                values,
            } => self.compile_assign(targets, values, *last_line),
            Stat::Call(call) => {
                let r = self.fs_mut().pre_alloc_reg()?;
                self.compile_call(call, r, 0)?;
                self.fs_mut().check_alloc_reg(r)?;
                self.fs_mut().free_reg()
            }
        }
    }

    fn compile_block_stat(&mut self, block: &Block) -> CompileResult<()> {
        self.fs_mut().enter_scope(false);
        self.compile_block(block)?;
        self.fs_mut().close_open_upvalues(block.last_line);
        let end_pc = self.fs().pc() + 1;
        self.fs_mut().exit_scope(end_pc)
    }

    fn compile_loop(
        &mut self,
        init: &[Stat],
        cond: &Expr,
        step: Option<&Stat>,
        body: &Block,
    ) -> CompileResult<()> {
        self.fs_mut().enter_scope(true);
        for stat in init {
            self.compile_stat(stat)?;
        }

        let pc_before_cond = self.fs().pc();
        let old = self.fs().used_regs;
        let (a, _) = self.exp_to_op_arg(cond, OperandPolicy::Reg)?;
        self.fs_mut().used_regs = old;
        let line = cond.last_line();
        self.fs_mut().emit_test(line, a, 0);
        let pc_jmp_to_end = self.fs_mut().emit_jmp(line, 0, 0);

        self.compile_block(body)?;
        self.fs_mut().close_open_upvalues(body.last_line);
        // Continues land on the step statement (or the backward jump).
        self.fs_mut().set_continue_jmps();
        if let Some(step) = step {
            self.compile_stat(step)?;
        }
        let back = pc_before_cond - self.fs().pc() - 1;
        self.fs_mut().emit_jmp(body.last_line, 0, back);

        let end_pc = self.fs().pc();
        self.fs_mut().exit_scope(end_pc)?;
        let sbx = self.fs().pc() - pc_jmp_to_end as i32;
        self.fs_mut().fix_sbx(pc_jmp_to_end, sbx);
        Ok(())
    }

    fn compile_if(&mut self, arms: &[IfArm]) -> CompileResult<()> {
        let mut pc_jmp_to_ends = Vec::with_capacity(arms.len());
        let mut pc_jmp_to_next: Option<usize> = None;

        for (i, arm) in arms.iter().enumerate() {
            if let Some(pc) = pc_jmp_to_next {
                let sbx = self.fs().pc() - pc as i32;
                self.fs_mut().fix_sbx(pc, sbx);
            }
            self.fs_mut().enter_scope(false);
            for stat in &arm.init {
                self.compile_stat(stat)?;
            }
            let old = self.fs().used_regs;
            let (a, _) = self.exp_to_op_arg(&arm.cond, OperandPolicy::Reg)?;
            self.fs_mut().used_regs = old;
            let line = arm.cond.last_line();
            self.fs_mut().emit_test(line, a, 0);
            let pc_jmp = self.fs_mut().emit_jmp(line, 0, 0);
            pc_jmp_to_next = Some(pc_jmp);

            self.compile_block(&arm.body)?;
            self.fs_mut().close_open_upvalues(arm.body.last_line);
            let end_pc = self.fs().pc() + 1;
            self.fs_mut().exit_scope(end_pc)?;
            if i < arms.len() - 1 {
                pc_jmp_to_ends.push(self.fs_mut().emit_jmp(arm.body.last_line, 0, 0));
            } else {
                // The last arm's failed test just falls out of the chain.
                pc_jmp_to_ends.push(pc_jmp);
            }
        }

        let end = self.fs().pc();
        for pc in pc_jmp_to_ends {
            self.fs_mut().fix_sbx(pc, end - pc as i32);
        }
        Ok(())
    }

    fn compile_for_in(
        &mut self,
        line_of_body: u32,
        names: &[String],
        exps: &[Expr],
        body: &Block,
    ) -> CompileResult<()> {
        self.fs_mut().enter_scope(true);

        // Bind the iterator triple to invented locals, then the loop
        // variables; TFORCALL expects them in exactly these slots.
        let hidden = vec![
            FOR_GENERATOR.to_string(),
            FOR_STATE.to_string(),
            FOR_CONTROL.to_string(),
        ];
        self.compile_local_decl(&hidden, exps, 0)?;
        let start_pc = self.fs().pc() + 2;
        for name in names {
            self.fs_mut().add_local(name, start_pc)?;
        }

        let pc_jmp_to_tfc = self.fs_mut().emit_jmp(line_of_body, 0, 0);
        self.compile_block(body)?;
        self.fs_mut().close_open_upvalues(body.last_line);
        let sbx = self.fs().pc() - pc_jmp_to_tfc as i32;
        self.fs_mut().fix_sbx(pc_jmp_to_tfc, sbx);
        self.fs_mut().set_continue_jmps();

        let line = exps[0].line();
        let r_generator = self
            .fs()
            .slot_of_local(FOR_GENERATOR)
            .ok_or_else(|| CompileError::internal("iterator slot lost"))?;
        self.fs_mut().emit_tfor_call(line, r_generator, names.len());
        let back = pc_jmp_to_tfc as i32 - self.fs().pc() - 1;
        self.fs_mut().emit_tfor_loop(line, r_generator + 2, back);

        let end_pc = self.fs().pc() - 1;
        self.fs_mut().exit_scope(end_pc)?;
        // The triple must stay live through TFORCALL/TFORLOOP.
        self.fs_mut().fix_end_pc(FOR_GENERATOR, 2);
        self.fs_mut().fix_end_pc(FOR_STATE, 2);
        self.fs_mut().fix_end_pc(FOR_CONTROL, 2);
        Ok(())
    }

    fn compile_local_decl(
        &mut self,
        names: &[String],
        values: &[Expr],
        last_line: u32,
    ) -> CompileResult<()> {
        let exps = strip_trailing_nils(values);
        let n_exps = exps.len();
        let n_names = names.len();
        let old = self.fs().used_regs;

        match n_exps.cmp(&n_names) {
            std::cmp::Ordering::Equal => {
                for exp in exps {
                    let a = self.fs_mut().pre_alloc_reg()?;
                    self.compile_expr(exp, a, 1)?;
                    self.fs_mut().check_alloc_reg(a)?;
                }
            }
            std::cmp::Ordering::Greater => {
                // Extra values are evaluated for effect only; a trailing
                // multi-value expression is pinned to zero results.
                for (i, exp) in exps.iter().enumerate() {
                    let a = self.fs_mut().pre_alloc_reg()?;
                    if i == n_exps - 1 && exp.is_multi_value() {
                        self.compile_expr(exp, a, 0)?;
                    } else {
                        self.compile_expr(exp, a, 1)?;
                    }
                    self.fs_mut().check_alloc_reg(a)?;
                }
            }
            std::cmp::Ordering::Less => {
                let mut mult_ret = false;
                for (i, exp) in exps.iter().enumerate() {
                    let a = self.fs_mut().pre_alloc_reg()?;
                    if i == n_exps - 1 && exp.is_multi_value() {
                        mult_ret = true;
                        let n = n_names - n_exps + 1;
                        self.compile_expr(exp, a, n as i32)?;
                        self.fs_mut().check_alloc_reg(a)?;
                        // The stretched results occupy n slots in total.
                        self.fs_mut().alloc_regs(n - 1)?;
                    } else {
                        self.compile_expr(exp, a, 1)?;
                        self.fs_mut().check_alloc_reg(a)?;
                    }
                }
                if !mult_ret {
                    let n = n_names - n_exps;
                    let a = self.fs_mut().alloc_regs(n)?;
                    self.fs_mut().emit_load_nil(last_line, a, n);
                }
            }
        }

        self.fs_mut().used_regs = old;
        let start_pc = self.fs().pc() + 1;
        for name in names {
            self.fs_mut().add_local(name, start_pc)?;
        }
        Ok(())
    }

    fn compile_assign(
        &mut self,
        targets: &[Expr],
        values: &[Expr],
        last_line: u32,
    ) -> CompileResult<()> {
        let exps = strip_trailing_nils(values);
        let n_exps = exps.len();
        let n_vars = targets.len();

        let mut t_regs = vec![0usize; n_vars];
        let mut k_regs = vec![-1i32; n_vars];
        let old = self.fs().used_regs;

        // Pass 1: pin down table/key operands (and spilled global name
        // keys) before the value list claims its registers.
        for (i, target) in targets.iter().enumerate() {
            match target {
                Expr::Index { obj, key, .. } => {
                    t_regs[i] = self.fs_mut().pre_alloc_reg()?;
                    self.compile_expr(obj, t_regs[i], 1)?;
                    self.fs_mut().check_alloc_reg(t_regs[i])?;
                    let k = self.fs_mut().pre_alloc_reg()?;
                    self.compile_expr(key, k, 1)?;
                    self.fs_mut().check_alloc_reg(k)?;
                    k_regs[i] = k as i32;
                }
                Expr::Name { line, name } => {
                    let cur = self.cur;
                    if self.fs().slot_of_local(name).is_none()
                        && self.upvalue_index(cur, name).is_none()
                    {
                        // Global; a name past the RK byte range needs its
                        // key loaded into a register.
                        let idx = self.fs_mut().constant_index(&Constant::Str(name.clone()));
                        if idx > 0xFF {
                            let k = self.fs_mut().alloc_reg()?;
                            self.fs_mut()
                                .emit_load_k(*line, k, Constant::Str(name.clone()));
                            k_regs[i] = k as i32;
                        }
                    }
                }
                _ => {
                    return Err(CompileError::internal(
                        "assignment target is neither a name nor an index expression",
                    ));
                }
            }
        }
        let v_regs: Vec<usize> = (0..n_vars).map(|i| self.fs().used_regs + i).collect();

        // Pass 2: evaluate the value list into consecutive registers,
        // reconciling arity against the target count.
        if n_exps >= n_vars {
            for (i, exp) in exps.iter().enumerate() {
                let a = self.fs_mut().pre_alloc_reg()?;
                if i >= n_vars && i == n_exps - 1 && exp.is_multi_value() {
                    self.compile_expr(exp, a, 0)?;
                } else {
                    self.compile_expr(exp, a, 1)?;
                }
                self.fs_mut().check_alloc_reg(a)?;
            }
        } else {
            let mut mult_ret = false;
            for (i, exp) in exps.iter().enumerate() {
                let a = self.fs_mut().alloc_reg()?;
                if i == n_exps - 1 && exp.is_multi_value() {
                    mult_ret = true;
                    let n = n_vars - n_exps + 1;
                    self.compile_expr(exp, a, n as i32)?;
                    self.fs_mut().alloc_regs(n - 1)?;
                } else {
                    self.compile_expr(exp, a, 1)?;
                }
            }
            if !mult_ret {
                let n = n_vars - n_exps;
                let a = self.fs_mut().alloc_regs(n)?;
                self.fs_mut().emit_load_nil(last_line, a, n);
            }
        }

        // Pass 3: store each staged value into its target.
        for (i, target) in targets.iter().enumerate() {
            match target {
                Expr::Name { name, .. } => {
                    if let Some(a) = self.fs().slot_of_local(name) {
                        self.fs_mut().emit_move(last_line, a, v_regs[i]);
                        continue;
                    }
                    let cur = self.cur;
                    if let Some(b) = self.upvalue_index(cur, name) {
                        self.fs_mut().emit_set_upval(last_line, v_regs[i], b);
                        continue;
                    }
                    let key = if k_regs[i] < 0 {
                        0x100 + self.fs_mut().constant_index(&Constant::Str(name.clone()))
                    } else {
                        k_regs[i] as usize
                    };
                    if let Some(a) = self.fs().slot_of_local("_ENV") {
                        self.fs_mut().emit_set_table(last_line, a, key, v_regs[i]);
                    } else {
                        let a = self
                            .upvalue_index(cur, "_ENV")
                            .ok_or_else(|| CompileError::internal("_ENV not reachable"))?;
                        self.fs_mut().emit_set_tab_up(last_line, a, key, v_regs[i]);
                    }
                }
                Expr::Index { .. } => {
                    self.fs_mut()
                        .emit_set_table(last_line, t_regs[i], k_regs[i] as usize, v_regs[i]);
                }
                // Pass 1 already rejected anything else.
                _ => {
                    return Err(CompileError::internal(
                        "assignment target is neither a name nor an index expression",
                    ));
                }
            }
        }

        self.fs_mut().used_regs = old;
        Ok(())
    }

    pub(crate) fn compile_return(&mut self, exps: &[Expr], last_line: u32) -> CompileResult<()> {
        let n_exps = exps.len();
        if n_exps == 0 {
            self.fs_mut().emit_return(last_line, 0, 0);
            return Ok(());
        }

        if n_exps == 1 {
            if let Expr::Name { name, .. } = &exps[0] {
                if let Some(slot) = self.fs().slot_of_local(name) {
                    self.fs_mut().emit_return(last_line, slot, 1);
                    return Ok(());
                }
            }
            if let Expr::Call(call) = &exps[0] {
                let r = self.fs_mut().pre_alloc_reg()?;
                self.compile_tail_call(call, r)?;
                self.fs_mut().free_reg()?;
                self.fs_mut().emit_return(last_line, r, -1);
                return Ok(());
            }
        }

        let mult_ret = exps[n_exps - 1].is_multi_value();
        for (i, exp) in exps.iter().enumerate() {
            let r = self.fs_mut().pre_alloc_reg()?;
            if i == n_exps - 1 && mult_ret {
                self.compile_expr(exp, r, -1)?;
            } else {
                self.compile_expr(exp, r, 1)?;
            }
            self.fs_mut().check_alloc_reg(r)?;
        }
        self.fs_mut().free_regs(n_exps)?;

        let a = self.fs().used_regs;
        if mult_ret {
            self.fs_mut().emit_return(last_line, a, -1);
        } else {
            self.fs_mut().emit_return(last_line, a, n_exps as i32);
        }
        Ok(())
    }
}
