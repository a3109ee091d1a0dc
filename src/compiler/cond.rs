// File: src/compiler/cond.rs
//
// Branch-condition lowering: compiles a boolean-valued expression
// directly into a pair of `cond`/`JMP` instructions rather than
// materializing an intermediate boolean register, used by `if`,
// `while`, loop guards, and logical operators used as a value.

use crate::ast::{Expr, LogicalOp, RelOp};
use crate::compiler::context::Compiler;
use crate::compiler::expr::{bump, compile_expr, reduce_to_rk, ExprOpt};
use crate::errors::KalaError;
use crate::instruction::{Instruction, OpCode};

type CResult<T> = Result<T, KalaError>;

/// Emits code that falls through to `next_label` and branches to
/// whichever of `then_label`/`else_label` is not `next_label`. Exactly
/// one `TEST`/`EQ`/`LT`/`LE` + one `JMP` pair is emitted per leaf case.
pub fn compile_branch_cond(
    c: &mut Compiler,
    e: &Expr,
    slot: i32,
    then_label: u32,
    else_label: u32,
    next_label: u32,
) -> CResult<()> {
    match e {
        Expr::False | Expr::Nil => {
            if next_label == then_label {
                c.cur().emit_jump(OpCode::Jmp, 0, else_label);
            }
            Ok(())
        }
        Expr::True => {
            if next_label == else_label {
                c.cur().emit_jump(OpCode::Jmp, 0, then_label);
            }
            Ok(())
        }
        Expr::Relational { op, lhs, rhs } => {
            compile_relational_leaf(c, *op, lhs, rhs, slot, then_label, else_label, next_label)
        }
        Expr::Not(inner) => compile_branch_cond(c, inner, slot, else_label, then_label, next_label),
        Expr::Logical { op: LogicalOp::And, lhs, rhs } => {
            let mid = c.cur().new_label();
            compile_branch_cond(c, lhs, slot, mid, else_label, mid)?;
            c.cur().place_label(mid);
            compile_branch_cond(c, rhs, slot, then_label, else_label, next_label)
        }
        Expr::Logical { op: LogicalOp::Or, lhs, rhs } => {
            let mid = c.cur().new_label();
            compile_branch_cond(c, lhs, slot, then_label, mid, mid)?;
            c.cur().place_label(mid);
            compile_branch_cond(c, rhs, slot, then_label, else_label, next_label)
        }
        _ => {
            compile_expr(c, e, slot, &ExprOpt::scalar())?;
            let c_field = if next_label == then_label { 0 } else { 1 };
            c.cur().emit(Instruction::abc(OpCode::Test, slot, 0, c_field));
            let other = if next_label == then_label { else_label } else { then_label };
            c.cur().emit_jump(OpCode::Jmp, 0, other);
            Ok(())
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn compile_relational_leaf(
    c: &mut Compiler,
    op: RelOp,
    lhs: &Expr,
    rhs: &Expr,
    slot: i32,
    then_label: u32,
    else_label: u32,
    next_label: u32,
) -> CResult<()> {
    // Gt/Ge have no dedicated opcode; swap operands onto Lt/Le instead
    // of complementing the result, since `a < b` directly yields `b > a`.
    let (opcode, lhs, rhs) = match op {
        RelOp::Lt => (OpCode::Lt, lhs, rhs),
        RelOp::Le => (OpCode::Le, lhs, rhs),
        RelOp::Gt => (OpCode::Lt, rhs, lhs),
        RelOp::Ge => (OpCode::Le, rhs, lhs),
        RelOp::Eq | RelOp::Ne => (OpCode::Eq, lhs, rhs),
    };

    let b = reduce_to_rk(c, lhs, slot)?;
    let next = bump(slot, b);
    c.cur().set_top(next);
    let cc = reduce_to_rk(c, rhs, next)?;
    c.cur().set_top(slot);

    let invert_ne = matches!(op, RelOp::Ne);
    let a_field = if next_label == else_label { 1 } else { 0 };
    let a_field = if invert_ne { 1 - a_field } else { a_field };
    c.cur().emit(Instruction::abc(opcode, a_field, b, cc));
    let other = if next_label == then_label { else_label } else { then_label };
    c.cur().emit_jump(OpCode::Jmp, 0, other);
    Ok(())
}
