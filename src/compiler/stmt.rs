// File: src/compiler/stmt.rs
//
// Statement lowering: one compile function per statement kind, each
// emitting directly into the enclosing function's instruction stream.

use crate::ast::{Expr, Stmt};
use crate::compiler::context::{Compiler, Resolved};
use crate::compiler::expr::{bump, compile_expr, fatal_too_many_exprs, reduce_to_rk, reduce_to_reg, ExprOpt};
use crate::errors::KalaError;
use crate::instruction::{rk_const, Instruction, OpCode};

type CResult<T> = Result<T, KalaError>;

/// Compiles a fresh lexical block: enters it, compiles each statement
/// in order, then leaves it (emitting `CLOSE` if anything inside was
/// captured).
pub fn compile_block(c: &mut Compiler, stmts: &[Stmt]) -> CResult<()> {
    c.cur().enter_block(None);
    compile_stmts(c, stmts)?;
    c.cur().leave_block();
    Ok(())
}

/// Compiles a sequence of statements into the *current* block, without
/// entering a new one (used by loop bodies, whose enclosing block is
/// opened by the loop construct itself so that `break` can find it).
fn compile_stmts(c: &mut Compiler, stmts: &[Stmt]) -> CResult<()> {
    for s in stmts {
        compile_stmt(c, s)?;
    }
    Ok(())
}

fn compile_stmt(c: &mut Compiler, stmt: &Stmt) -> CResult<()> {
    match stmt {
        Stmt::If { cond, then_block, else_block } => compile_if(c, cond, then_block, else_block),
        Stmt::While { cond, block } => compile_while(c, cond, block),
        Stmt::ForNumber { counter_name, start, end, step, block } => {
            compile_for_number(c, counter_name, start, end, step.as_ref(), block)
        }
        Stmt::ForRange { index, value, object, block } => compile_for_range(c, index, value, object, block),
        Stmt::Break => compile_break(c),
        Stmt::Return(exprs) => compile_return(c, exprs),
        Stmt::VarDef { vars, exprs } => compile_var_def(c, vars, exprs),
        Stmt::Assign { lhs, rhs } => compile_assign(c, lhs, rhs),
        Stmt::FuncDef { func_name, params, block } => compile_func_def(c, func_name, params, block),
        Stmt::ExprStmt(e) => compile_expr_stmt(c, e),
        Stmt::ListAppend { object, element } => compile_list_append(c, object, element),
    }
}

fn compile_if(c: &mut Compiler, cond: &Expr, then_block: &[Stmt], else_block: &[Stmt]) -> CResult<()> {
    let slot = c.cur().slot_top();
    let end_label = c.cur().new_label();
    let then_label = c.cur().new_label();
    let else_label = c.cur().new_label();

    crate::compiler::cond::compile_branch_cond(c, cond, slot, then_label, else_label, then_label)?;
    c.cur().place_label(then_label);
    compile_block(c, then_block)?;
    if !else_block.is_empty() {
        c.cur().emit_jump(OpCode::Jmp, 0, end_label);
        c.cur().place_label(else_label);
        compile_block(c, else_block)?;
    } else {
        c.cur().place_label(else_label);
    }
    c.cur().place_label(end_label);
    Ok(())
}

fn compile_while(c: &mut Compiler, cond: &Expr, block: &[Stmt]) -> CResult<()> {
    let slot = c.cur().slot_top();
    let end_label = c.cur().new_label();
    let cond_label = c.cur().new_label();
    let do_label = c.cur().new_label();

    c.cur().enter_block(Some(end_label));
    let offset = c.cur().current_block_offset();

    c.cur().place_label(cond_label);
    crate::compiler::cond::compile_branch_cond(c, cond, slot, do_label, end_label, do_label)?;
    c.cur().place_label(do_label);
    compile_stmts(c, block)?;
    c.cur().emit(Instruction::abc(OpCode::Close, offset, 0, 0));
    c.cur().emit_jump(OpCode::Jmp, 0, cond_label);
    c.cur().place_label(end_label);
    c.cur().leave_block_already_closed();
    Ok(())
}

fn compile_for_number(
    c: &mut Compiler,
    counter_name: &str,
    start: &Expr,
    end: &Expr,
    step: Option<&Expr>,
    block: &[Stmt],
) -> CResult<()> {
    let end_label = c.cur().new_label();
    let do_label = c.cur().new_label();

    c.cur().enter_block(Some(end_label));
    let base = c.cur().current_block_offset();
    let i_reg = c.cur().add_local(counter_name);
    let e_reg = c.cur().add_local("_e_");
    let sp_reg = c.cur().add_local("_sp_");

    let tmp = c.cur().slot_top();
    c.cur().set_top(tmp);
    compile_expr(c, start, tmp, &ExprOpt::scalar())?;
    c.cur().emit(Instruction::abc(OpCode::Move, i_reg, tmp, 0));

    c.cur().set_top(tmp);
    compile_expr(c, end, tmp, &ExprOpt::scalar())?;
    c.cur().emit(Instruction::abc(OpCode::Move, e_reg, tmp, 0));

    c.cur().set_top(tmp);
    match step {
        Some(step_expr) => compile_expr(c, step_expr, tmp, &ExprOpt::scalar())?,
        None => compile_expr(c, &Expr::Number(1.0), tmp, &ExprOpt::scalar())?,
    };
    c.cur().emit(Instruction::abc(OpCode::Move, sp_reg, tmp, 0));
    c.cur().set_top(base + 3);

    c.cur().emit(Instruction::abc(OpCode::Lt, 0, i_reg, e_reg));
    c.cur().emit_jump(OpCode::Jmp, 0, end_label);

    c.cur().place_label(do_label);
    compile_stmts(c, block)?;
    c.cur().emit(Instruction::abc(OpCode::Close, base + 3, 0, 0));
    c.cur().emit_jump(OpCode::ForLoop, i_reg, do_label);

    c.cur().place_label(end_label);
    c.cur().leave_block();
    Ok(())
}

fn compile_for_range(c: &mut Compiler, index: &str, value: &str, object: &Expr, block: &[Stmt]) -> CResult<()> {
    let end_label = c.cur().new_label();
    let do_label = c.cur().new_label();

    c.cur().enter_block(Some(end_label));
    let slot = c.cur().slot_top();
    let o_reg = reduce_to_reg(c, object, slot)?;
    if o_reg == slot {
        c.cur().add_local("_obj_");
    }

    let l_reg = c.cur().add_local("_l_");
    let i_reg = c.cur().add_local("_i_");
    let k_reg = c.cur().add_local(index);
    let v_reg = c.cur().add_local(value);

    c.cur().emit(Instruction::abc(OpCode::Len, l_reg, o_reg, 0));
    let zero_k = c.cur().intern_number(0.0);
    c.cur().emit(Instruction::abx(OpCode::LoadK, i_reg, zero_k));

    c.cur().emit(Instruction::abc(OpCode::Lt, 0, i_reg, l_reg));
    c.cur().emit_jump(OpCode::Jmp, 0, end_label);

    c.cur().place_label(do_label);
    c.cur().emit(Instruction::abc(OpCode::GetField, k_reg, o_reg, i_reg));
    compile_stmts(c, block)?;
    c.cur().emit(Instruction::abc(OpCode::Close, v_reg + 1, 0, 0));
    let one_k = c.cur().intern_number(1.0);
    c.cur().emit(Instruction::abc(OpCode::Add, i_reg, i_reg, rk_const(one_k)));
    c.cur().emit(Instruction::abc(OpCode::Lt, 1, i_reg, l_reg));
    c.cur().emit_jump(OpCode::Jmp, 0, do_label);

    c.cur().place_label(end_label);
    c.cur().leave_block();
    Ok(())
}

fn compile_break(c: &mut Compiler) -> CResult<()> {
    match c.cur().break_target() {
        Some((close_offsets, label)) => {
            for offset in close_offsets {
                c.cur().emit(Instruction::abc(OpCode::Close, offset, 0, 0));
            }
            c.cur().emit_jump(OpCode::Jmp, 0, label);
            Ok(())
        }
        None => Err(fatal_break_outside_loop()),
    }
}

/// Compiles the variadic-tail argument list shared by `return` and call
/// expressions: all but the last with arity 1, the last with arity −1,
/// starting at `base`. Returns whether the last argument was itself a
/// call (and thus may deliver more than one value at runtime).
fn compile_value_list(c: &mut Compiler, exprs: &[Expr], base: i32) -> CResult<bool> {
    let mut variadic_tail = false;
    for (i, e) in exprs.iter().enumerate() {
        let reg = base + i as i32;
        c.cur().set_top(reg);
        let is_last = i + 1 == exprs.len();
        let arity: isize = if is_last { -1 } else { 1 };
        compile_expr(c, e, reg, &ExprOpt { result_slot: -1, num_ret_value: arity })?;
        if is_last && matches!(e, Expr::Call { .. }) {
            variadic_tail = true;
        }
    }
    Ok(variadic_tail)
}

fn compile_return(c: &mut Compiler, exprs: &[Expr]) -> CResult<()> {
    let slot = c.cur().slot_top();
    if exprs.is_empty() {
        c.cur().emit(Instruction::abc(OpCode::Return, slot, 1, 0));
        return Ok(());
    }
    let variadic_tail = compile_value_list(c, exprs, slot)?;
    let b = if variadic_tail { 0 } else { exprs.len() as i32 + 1 };
    c.cur().emit(Instruction::abc(OpCode::Return, slot, b, 0));
    Ok(())
}

fn compile_var_def(c: &mut Compiler, vars: &[String], exprs: &[Expr]) -> CResult<()> {
    let base = c.cur().slot_top();
    let regs: Vec<i32> = vars.iter().map(|v| c.cur().add_local(v)).collect();
    let nvars = vars.len() as i32;
    let nexps = exprs.len();

    if nexps == 0 {
        if nvars > 0 {
            c.cur().emit(Instruction::abc(OpCode::LoadNil, base, base + nvars - 1, 0));
        }
        return Ok(());
    }
    if nexps as i32 > nvars {
        return Err(fatal_too_many_exprs());
    }
    if nvars as usize > nexps {
        c.cur().emit(Instruction::abc(OpCode::LoadNil, regs[nexps], base + nvars - 1, 0));
    }

    let scratch = base + nvars;
    for (i, e) in exprs.iter().enumerate() {
        c.cur().set_top(scratch);
        compile_expr(c, e, scratch, &ExprOpt::scalar())?;
        c.cur().emit(Instruction::abc(OpCode::Move, regs[i], scratch, 0));
    }
    c.cur().set_top(scratch);
    Ok(())
}

enum FieldKey {
    Str(i32),
    Rk(i32),
}

enum AssignTarget {
    Local(i32),
    Upval(u32),
    Global(i32),
    Field { obj: i32, key: FieldKey },
}

fn resolve_assign_target(c: &mut Compiler, lhs: &Expr, scratch: i32) -> CResult<(AssignTarget, i32)> {
    match lhs {
        Expr::Ident(name) => {
            let target = match c.resolve(name) {
                Resolved::Local(r) => AssignTarget::Local(r),
                Resolved::Upval(u) => AssignTarget::Upval(u),
                Resolved::Global => AssignTarget::Global(c.cur().intern_string(name)),
            };
            Ok((target, scratch))
        }
        Expr::FieldGet { object, key } => {
            let obj_reg = reduce_to_reg(c, object, scratch)?;
            let next = bump(scratch, obj_reg);
            if let Expr::Str(s) = key.as_ref() {
                let kidx = c.cur().intern_string(s);
                Ok((AssignTarget::Field { obj: obj_reg, key: FieldKey::Str(kidx) }, next))
            } else {
                c.cur().set_top(next);
                let key_rk = reduce_to_rk(c, key, next)?;
                let after = bump(next, key_rk);
                Ok((AssignTarget::Field { obj: obj_reg, key: FieldKey::Rk(key_rk) }, after))
            }
        }
        _ => unreachable!("assignment targets are always identifiers or field accesses"),
    }
}

fn emit_assign(c: &mut Compiler, target: &AssignTarget, value_reg: i32) {
    match target {
        AssignTarget::Local(r) => {
            if *r != value_reg {
                c.cur().emit(Instruction::abc(OpCode::Move, *r, value_reg, 0));
            }
        }
        AssignTarget::Upval(u) => {
            c.cur().emit(Instruction::abc(OpCode::SetUpval, value_reg, *u as i32, 0));
        }
        AssignTarget::Global(k) => {
            c.cur().emit(Instruction::abx(OpCode::SetGlobal, value_reg, *k));
        }
        AssignTarget::Field { obj, key } => match key {
            FieldKey::Str(kidx) => {
                c.cur().emit(Instruction::abc(OpCode::SetTableKs, *obj, *kidx, value_reg));
            }
            FieldKey::Rk(rk) => {
                c.cur().emit(Instruction::abc(OpCode::SetTable, *obj, *rk, value_reg));
            }
        },
    }
}

fn compile_assign(c: &mut Compiler, lhs: &[Expr], rhs: &[Expr]) -> CResult<()> {
    let start = c.cur().slot_top();
    let mut targets = Vec::with_capacity(lhs.len());
    let mut scratch = start;
    for l in lhs {
        let (target, after) = resolve_assign_target(c, l, scratch)?;
        targets.push(target);
        scratch = after;
    }

    let nlhs = lhs.len();
    let nrhs = rhs.len();
    c.cur().set_top(scratch);

    if nlhs == nrhs {
        let mut val_regs = Vec::with_capacity(nrhs);
        for (i, r) in rhs.iter().enumerate() {
            let reg = scratch + i as i32;
            c.cur().set_top(reg);
            compile_expr(c, r, reg, &ExprOpt::scalar())?;
            val_regs.push(reg);
        }
        for i in (0..nlhs).rev() {
            emit_assign(c, &targets[i], val_regs[i]);
        }
    } else if nrhs > nlhs {
        let mut val_regs = Vec::with_capacity(nlhs);
        for (i, r) in rhs.iter().enumerate() {
            let reg = scratch + i as i32;
            c.cur().set_top(reg);
            if i < nlhs {
                compile_expr(c, r, reg, &ExprOpt::scalar())?;
                val_regs.push(reg);
            } else {
                compile_expr(c, r, reg, &ExprOpt { result_slot: -1, num_ret_value: 0 })?;
            }
        }
        for i in (0..nlhs).rev() {
            emit_assign(c, &targets[i], val_regs[i]);
        }
    } else {
        let extra = (nlhs - nrhs) as isize + 1;
        let mut val_regs = Vec::with_capacity(nlhs);
        for (i, r) in rhs.iter().enumerate() {
            let reg = scratch + i as i32;
            c.cur().set_top(reg);
            let is_last = i + 1 == nrhs;
            let arity = if is_last { extra } else { 1 };
            compile_expr(c, r, reg, &ExprOpt { result_slot: -1, num_ret_value: arity })?;
            if is_last {
                for k in 0..extra {
                    val_regs.push(reg + k as i32);
                }
            } else {
                val_regs.push(reg);
            }
        }
        for i in (0..nlhs).rev() {
            emit_assign(c, &targets[i], val_regs[i]);
        }
    }

    c.cur().set_top(start);
    Ok(())
}

fn compile_func_def(c: &mut Compiler, func_name: &str, params: &crate::ast::ParList, block: &[Stmt]) -> CResult<()> {
    let reg = c.cur().add_local(func_name);
    let body = crate::ast::FunctionBody {
        params: params.names.clone(),
        has_vararg: params.has_vararg,
        block: block.to_vec(),
    };
    crate::compiler::expr::compile_function_literal(c, &body, reg)
}

fn compile_expr_stmt(c: &mut Compiler, e: &Expr) -> CResult<()> {
    let slot = c.cur().slot_top();
    compile_expr(c, e, slot, &ExprOpt { result_slot: -1, num_ret_value: 0 })?;
    c.cur().set_top(slot);
    Ok(())
}

fn compile_list_append(c: &mut Compiler, object: &Expr, element: &Expr) -> CResult<()> {
    let slot = c.cur().slot_top();
    let a = reduce_to_reg(c, object, slot)?;
    let next = bump(slot, a);
    c.cur().set_top(next);
    let b = reduce_to_reg(c, element, next)?;
    c.cur().emit(Instruction::abc(OpCode::Append, a, b, 0));
    c.cur().set_top(slot);
    Ok(())
}

pub fn fatal_break_outside_loop() -> KalaError {
    KalaError::compile("break used outside of a loop")
}
