// File: src/compiler/expr.rs
//
// Expression lowering: one compile function per expression kind, each
// placing its result at a caller-chosen register or returning an RK
// operand directly when the operand can be reduced without emitting
// anything.

use crate::ast::{ArithOp, Expr, FunctionBody, RelOp};
use crate::compiler::context::{Compiler, Resolved};
use crate::errors::KalaError;
use crate::instruction::{rk_const, Instruction, OpCode};

/// Where a compiled expression's result should land, and how many
/// return values a call-like expression should request.
#[derive(Clone, Copy)]
pub struct ExprOpt {
    pub result_slot: i32,
    pub num_ret_value: isize,
}

impl ExprOpt {
    pub fn scalar() -> ExprOpt {
        ExprOpt { result_slot: -1, num_ret_value: 1 }
    }

    pub fn into_slot(slot: i32) -> ExprOpt {
        ExprOpt { result_slot: slot, num_ret_value: 1 }
    }

    pub fn with_arity(mut self, n: isize) -> ExprOpt {
        self.num_ret_value = n;
        self
    }
}

fn dest(slot: i32, opt: &ExprOpt) -> i32 {
    if opt.result_slot >= 0 {
        opt.result_slot
    } else {
        slot
    }
}

fn advance(opt: &ExprOpt, n: i32) -> i32 {
    if opt.result_slot >= 0 {
        0
    } else {
        n
    }
}

/// `reduce_to_rk`/`reduce_to_reg` only ever return either a register
/// strictly below `slot` (an existing local or upvalue-backed temp) or
/// exactly `slot` itself (freshly compiled there); this picks the next
/// free scratch register given the operand just reduced.
pub(crate) fn bump(slot: i32, operand: i32) -> i32 {
    if operand == slot {
        slot + 1
    } else {
        slot
    }
}

type CResult<T> = Result<T, KalaError>;

/// Reduces `e` to an RK operand: a string/number literal is interned as
/// a constant and returned with the K bit set; a local identifier
/// short-circuits to its register; anything else is compiled into
/// `slot` and occupies it.
pub fn reduce_to_rk(c: &mut Compiler, e: &Expr, slot: i32) -> CResult<i32> {
    match e {
        Expr::Number(n) => Ok(rk_const(c.cur().intern_number(*n))),
        Expr::Str(s) => Ok(rk_const(c.cur().intern_string(s))),
        Expr::Ident(name) => match c.resolve(name) {
            Resolved::Local(reg) => Ok(reg),
            _ => {
                compile_expr(c, e, slot, &ExprOpt::scalar())?;
                Ok(slot)
            }
        },
        _ => {
            compile_expr(c, e, slot, &ExprOpt::scalar())?;
            Ok(slot)
        }
    }
}

/// Reduces `e` to a plain register (never a constant), used for
/// operands that the target opcode cannot take as `RK`.
pub fn reduce_to_reg(c: &mut Compiler, e: &Expr, slot: i32) -> CResult<i32> {
    if let Expr::Ident(name) = e {
        if let Resolved::Local(reg) = c.resolve(name) {
            return Ok(reg);
        }
    }
    compile_expr(c, e, slot, &ExprOpt::scalar())?;
    Ok(slot)
}

/// Compiles `e`, placing its result at `dest(slot, opt)`, and returns
/// the number of registers newly occupied above `slot`.
pub fn compile_expr(c: &mut Compiler, e: &Expr, slot: i32, opt: &ExprOpt) -> CResult<i32> {
    match e {
        Expr::Nil => {
            let d = dest(slot, opt);
            c.cur().emit(Instruction::abc(OpCode::LoadNil, d, d, 0));
            c.cur().touch(d);
            Ok(advance(opt, 1))
        }
        Expr::True => {
            let d = dest(slot, opt);
            c.cur().emit(Instruction::abc(OpCode::LoadBool, d, 1, 0));
            c.cur().touch(d);
            Ok(advance(opt, 1))
        }
        Expr::False => {
            let d = dest(slot, opt);
            c.cur().emit(Instruction::abc(OpCode::LoadBool, d, 0, 0));
            c.cur().touch(d);
            Ok(advance(opt, 1))
        }
        Expr::Number(n) => {
            let d = dest(slot, opt);
            let k = c.cur().intern_number(*n);
            c.cur().emit(Instruction::abx(OpCode::LoadK, d, k));
            c.cur().touch(d);
            Ok(advance(opt, 1))
        }
        Expr::Str(s) => {
            let d = dest(slot, opt);
            let k = c.cur().intern_string(s);
            c.cur().emit(Instruction::abx(OpCode::LoadK, d, k));
            c.cur().touch(d);
            Ok(advance(opt, 1))
        }
        Expr::Ident(name) => {
            let d = dest(slot, opt);
            match c.resolve(name) {
                Resolved::Local(reg) => {
                    if reg != d {
                        c.cur().emit(Instruction::abc(OpCode::Move, d, reg, 0));
                    }
                }
                Resolved::Upval(idx) => {
                    c.cur().emit(Instruction::abc(OpCode::GetUpval, d, idx as i32, 0));
                }
                Resolved::Global => {
                    let k = c.cur().intern_string(name);
                    c.cur().emit(Instruction::abx(OpCode::GetGlobal, d, k));
                }
            }
            c.cur().touch(d);
            Ok(advance(opt, 1))
        }
        Expr::FieldGet { object, key } => {
            let d = dest(slot, opt);
            let obj_reg = reduce_to_reg(c, object, slot)?;
            if let Expr::Str(k) = key.as_ref() {
                let kidx = c.cur().intern_string(k);
                c.cur().emit(Instruction::abc(OpCode::GetTableKs, d, obj_reg, kidx));
            } else {
                let key_slot = bump(slot, obj_reg);
                c.cur().set_top(key_slot);
                let key_rk = reduce_to_rk(c, key, key_slot)?;
                c.cur().emit(Instruction::abc(OpCode::GetTable, d, obj_reg, key_rk));
            }
            c.cur().set_top(slot);
            c.cur().touch(d);
            Ok(advance(opt, 1))
        }
        Expr::Arithmetic { op, lhs, rhs } => {
            let d = dest(slot, opt);
            let b = reduce_to_rk(c, lhs, slot)?;
            let next = bump(slot, b);
            c.cur().set_top(next);
            let cc = reduce_to_rk(c, rhs, next)?;
            let opcode = match op {
                ArithOp::Add => OpCode::Add,
                ArithOp::Sub => OpCode::Sub,
                ArithOp::Mul => OpCode::Mul,
                ArithOp::Div => OpCode::Div,
                ArithOp::Mod => OpCode::Mod,
            };
            c.cur().emit(Instruction::abc(opcode, d, b, cc));
            c.cur().set_top(slot);
            c.cur().touch(d);
            Ok(advance(opt, 1))
        }
        Expr::Concat { lhs, rhs } => {
            let d = dest(slot, opt);
            let b = reduce_to_reg(c, lhs, slot)?;
            let next = bump(slot, b);
            c.cur().set_top(next);
            let cc = reduce_to_reg(c, rhs, next)?;
            c.cur().emit(Instruction::abc(OpCode::Concat, d, b, cc));
            c.cur().set_top(slot);
            c.cur().touch(d);
            Ok(advance(opt, 1))
        }
        Expr::Minus(inner) => {
            let d = dest(slot, opt);
            let b = reduce_to_reg(c, inner, slot)?;
            c.cur().emit(Instruction::abc(OpCode::Unm, d, b, 0));
            c.cur().set_top(slot);
            c.cur().touch(d);
            Ok(advance(opt, 1))
        }
        Expr::Not(inner) => {
            let d = dest(slot, opt);
            let b = reduce_to_reg(c, inner, slot)?;
            c.cur().emit(Instruction::abc(OpCode::Not, d, b, 0));
            c.cur().set_top(slot);
            c.cur().touch(d);
            Ok(advance(opt, 1))
        }
        Expr::Len(inner) => {
            let d = dest(slot, opt);
            let b = reduce_to_reg(c, inner, slot)?;
            c.cur().emit(Instruction::abc(OpCode::Len, d, b, 0));
            c.cur().set_top(slot);
            c.cur().touch(d);
            Ok(advance(opt, 1))
        }
        Expr::Relational { op, lhs, rhs } => {
            compile_relational(c, *op, lhs, rhs, slot, opt)?;
            Ok(advance(opt, 1))
        }
        Expr::Logical { op, lhs, rhs } => {
            let d = dest(slot, opt);
            let then_label = c.cur().new_label();
            let else_label = c.cur().new_label();
            crate::compiler::cond::compile_branch_cond(
                c,
                &Expr::Logical { op: *op, lhs: lhs.clone(), rhs: rhs.clone() },
                slot,
                then_label,
                else_label,
                then_label,
            )?;
            c.cur().place_label(then_label);
            c.cur().emit(Instruction::abc(OpCode::LoadBool, d, 1, 1));
            c.cur().place_label(else_label);
            c.cur().emit(Instruction::abc(OpCode::LoadBool, d, 0, 0));
            c.cur().touch(d);
            Ok(advance(opt, 1))
        }
        Expr::Dict(entries) => {
            let d = dest(slot, opt);
            c.cur().emit(Instruction::abc(OpCode::NewTable, d, 0, 1));
            c.cur().touch(d);
            let work_slot = slot.max(d + 1);
            for (key, value) in entries {
                let kidx = match key {
                    Expr::Str(s) => c.cur().intern_string(s),
                    _ => unreachable!("dict literal keys are always string-valued"),
                };
                c.cur().set_top(work_slot);
                compile_expr(c, value, work_slot, &ExprOpt::scalar())?;
                c.cur().emit(Instruction::abc(OpCode::SetTableKs, d, kidx, work_slot));
            }
            c.cur().set_top(slot);
            c.cur().touch(d);
            Ok(advance(opt, 1))
        }
        Expr::List(elements) => {
            let d = dest(slot, opt);
            c.cur().emit(Instruction::abc(OpCode::NewTable, d, elements.len() as i32, 0));
            c.cur().touch(d);
            let work_slot = slot.max(d + 1);
            c.cur().set_top(work_slot);
            for (i, elem) in elements.iter().enumerate() {
                let elem_slot = work_slot + i as i32;
                c.cur().set_top(elem_slot);
                compile_expr(c, elem, elem_slot, &ExprOpt::scalar())?;
            }
            if !elements.is_empty() {
                c.cur().emit(Instruction::abc(OpCode::SetList, d, elements.len() as i32, 0));
            }
            c.cur().set_top(slot);
            c.cur().touch(d);
            Ok(advance(opt, 1))
        }
        Expr::Function(body) => {
            let d = dest(slot, opt);
            compile_function_literal(c, body, d)?;
            Ok(advance(opt, 1))
        }
        Expr::Call { func, args } => compile_call(c, func, args, slot, opt),
    }
}

/// Relational comparisons used as a value: emit the cond+JMP pair,
/// then the `LOADBOOL` phi, always into `rslot` (the requested result
/// slot) rather than materializing a separate boolean temp.
fn compile_relational(c: &mut Compiler, op: RelOp, lhs: &Expr, rhs: &Expr, slot: i32, opt: &ExprOpt) -> CResult<()> {
    let rslot = dest(slot, opt);
    let true_label = c.cur().new_label();
    let false_label = c.cur().new_label();
    let rel_expr = Expr::Relational { op, lhs: Box::new(lhs.clone()), rhs: Box::new(rhs.clone()) };
    crate::compiler::cond::compile_branch_cond(c, &rel_expr, slot, true_label, false_label, true_label)?;
    c.cur().place_label(true_label);
    c.cur().emit(Instruction::abc(OpCode::LoadBool, rslot, 1, 1));
    c.cur().place_label(false_label);
    c.cur().emit(Instruction::abc(OpCode::LoadBool, rslot, 0, 0));
    c.cur().touch(rslot);
    Ok(())
}

/// Compiles a function literal into a child `FuncProto`, emits the
/// enclosing `CLOSURE`, and records its upvalue captures in the
/// parent's sidecar table.
pub fn compile_function_literal(c: &mut Compiler, body: &FunctionBody, dest_reg: i32) -> CResult<()> {
    c.push_func();
    for p in &body.params {
        c.cur().add_local(p);
    }
    c.cur().set_signature(body.params.len(), body.has_vararg);
    if body.has_vararg {
        c.cur().add_local("arg");
    }
    crate::compiler::stmt::compile_block(c, &body.block)?;
    ensure_trailing_return(c);

    let sources = c.cur_ref().upvalue_sources();
    let proto = c.pop_func()?;
    let bx = c.cur().add_child(proto);
    let closure_pc = c.cur().emit(Instruction::abx(OpCode::Closure, dest_reg, bx));
    c.cur().touch(dest_reg);
    c.record_closure_captures(closure_pc, &sources);
    Ok(())
}

fn ensure_trailing_return(c: &mut Compiler) {
    // A function whose body does not end in an explicit `return` falls
    // off the end; nothing to emit here. Kept as an explicit hook in
    // case a future statement kind needs one.
    let _ = c;
}

/// Function call expression. Compiles the callee then each argument,
/// all but the last with arity 1 and the last with arity -1 (variadic
/// tail propagation), and emits `CALL`.
fn compile_call(c: &mut Compiler, func: &Expr, args: &[Expr], slot: i32, opt: &ExprOpt) -> CResult<i32> {
    let call_base = slot;
    c.cur().set_top(call_base);
    c.cur().reserve(1);
    compile_expr(c, func, call_base, &ExprOpt::scalar())?;

    let mut variadic_tail = false;
    for (i, arg) in args.iter().enumerate() {
        let arg_slot = call_base + 1 + i as i32;
        c.cur().set_top(arg_slot);
        c.cur().reserve(1);
        let is_last = i + 1 == args.len();
        let arity: isize = if is_last { -1 } else { 1 };
        let advanced = compile_expr(c, arg, arg_slot, &ExprOpt { result_slot: -1, num_ret_value: arity })?;
        if is_last && matches!(arg, Expr::Call { .. }) {
            variadic_tail = true;
        }
        let _ = advanced;
    }

    let b = if variadic_tail { 0 } else { args.len() as i32 + 1 };
    let requested = opt.num_ret_value;
    let cc = if requested < 0 { 0 } else { requested as i32 + 1 };
    c.cur().emit(Instruction::abc(OpCode::Call, call_base, b, cc));
    c.cur().touch(call_base);

    if opt.result_slot >= 0 && opt.result_slot != call_base {
        c.cur().emit(Instruction::abc(OpCode::Move, opt.result_slot, call_base, 0));
        c.cur().touch(opt.result_slot);
    }
    c.cur().set_top(call_base + 1);
    Ok(advance(opt, 1))
}

pub fn fatal_too_many_exprs() -> KalaError {
    KalaError::compile("too many expressions on the right-hand side")
}
