// File: src/compiler/patch.rs
//
// Second pass run once a function's body is fully compiled: resolves
// every label-addressed jump to a relative `sBx` displacement, chains
// consecutive unconditional `JMP`s, converts zero displacements to
// `NOP`, and computes the register high-water mark.
//
// Because upvalue captures live in a prototype sidecar table rather
// than inline pseudo-instructions after `CLOSURE`, this pass never
// needs to skip over them: every instruction in `code` is real.

use std::collections::HashMap;
use std::rc::Rc;

use crate::compiler::context::{fatal_long_jump, PatchInput};
use crate::errors::KalaError;
use crate::instruction::{Instruction, OpCode, MAX_ARG_SBX};
use crate::proto::FuncProto;

const MAX_JMP_CHAIN: u32 = 5;

pub fn patch_function(func: crate::compiler::context::FuncState) -> Result<Rc<FuncProto>, KalaError> {
    let PatchInput {
        mut code,
        consts,
        num_params,
        has_vararg,
        child_protos,
        num_upvalues,
        high_water,
        labels,
        pending_jumps,
        upval_captures,
    } = func.into_patch_input();

    let direct_target: HashMap<usize, usize> = pending_jumps
        .iter()
        .map(|(pc, label)| {
            let target = labels
                .get(label)
                .copied()
                .flatten()
                .expect("label referenced by a jump was never placed");
            (*pc, target)
        })
        .collect();

    for (pc, _label) in &pending_jumps {
        let mut target = direct_target[pc];
        let mut hops = 0;
        while hops < MAX_JMP_CHAIN {
            if target >= code.len() || code[target].op() != OpCode::Jmp {
                break;
            }
            match direct_target.get(&target) {
                Some(&next) if next != target => {
                    target = next;
                    hops += 1;
                }
                _ => break,
            }
        }

        let disp = target as i64 - (*pc as i64 + 1);
        if disp == 0 {
            code[*pc] = Instruction::abc(OpCode::Nop, 0, 0, 0);
        } else {
            if disp.unsigned_abs() as i32 > MAX_ARG_SBX {
                return Err(fatal_long_jump());
            }
            let a = code[*pc].a();
            let op = code[*pc].op();
            code[*pc] = Instruction::asbx(op, a, disp as i32);
        }
    }

    let max_register = high_water.max(0);
    if max_register > 255 {
        return Err(KalaError::compile(format!(
            "function uses {} registers, exceeding the 255 limit",
            max_register
        )));
    }

    Ok(Rc::new(FuncProto {
        code,
        consts,
        num_params,
        has_vararg,
        child_protos,
        num_upvalues,
        max_registers: max_register as u8,
        upval_captures,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::context::Compiler;

    #[test]
    fn forward_jump_resolves_to_a_positive_displacement() {
        let mut compiler = Compiler::new();
        compiler.push_func();
        let end = compiler.cur().new_label();
        compiler.cur().emit_jump(OpCode::Jmp, 0, end);
        compiler.cur().emit(Instruction::abc(OpCode::Nop, 0, 0, 0));
        compiler.cur().place_label(end);
        let proto = compiler.pop_func().unwrap();
        assert_eq!(proto.code[0].op(), OpCode::Jmp);
        assert_eq!(proto.code[0].sbx(), 1);
    }

    #[test]
    fn zero_displacement_becomes_nop() {
        let mut compiler = Compiler::new();
        compiler.push_func();
        let end = compiler.cur().new_label();
        compiler.cur().emit_jump(OpCode::Jmp, 0, end);
        compiler.cur().place_label(end);
        let proto = compiler.pop_func().unwrap();
        assert_eq!(proto.code[0].op(), OpCode::Nop);
    }

    #[test]
    fn chains_through_a_consecutive_unconditional_jump() {
        let mut compiler = Compiler::new();
        compiler.push_func();
        let mid = compiler.cur().new_label();
        let end = compiler.cur().new_label();
        compiler.cur().emit_jump(OpCode::Jmp, 0, mid);
        compiler.cur().place_label(mid);
        compiler.cur().emit_jump(OpCode::Jmp, 0, end);
        compiler.cur().place_label(end);
        let proto = compiler.pop_func().unwrap();
        // First jump should skip straight to `end` (pc=2), not stop at `mid` (pc=1).
        assert_eq!(proto.code[0].sbx(), 1);
    }
}
