// File: src/vm/mod.rs
//
// The runtime: value stack, call frames, upvalues and the instruction
// dispatch loop.

pub mod dispatch;
pub mod state;
pub mod upvalue;

use std::rc::Rc;

use crate::errors::KalaError;
use crate::instruction::DISPATCH_TABLE_LEN;
use crate::proto::FuncProto;
use crate::value::{Closure, CompiledClosure};
use state::{CallFrame, RuntimeState};
use std::cell::RefCell;

/// Executes a compiled chunk to completion: wraps `proto` in a
/// top-level closure with zero upvalues and a single frame
/// whose `num_ret_value` is `-1` (accept and discard all top-level
/// returns), then runs the dispatch loop until that frame unwinds.
pub fn run(proto: Rc<FuncProto>) -> Result<RuntimeState, KalaError> {
    let mut state = RuntimeState::new();
    let top_level = Closure::Compiled(Rc::new(CompiledClosure {
        proto,
        upvalues: RefCell::new(Vec::new()),
    }));
    state.push_frame(CallFrame {
        base: 0,
        local_base: 0,
        return_base: 0,
        closure: top_level,
        pc: 0,
        num_arg: 0,
        num_ret_value: -1,
    });
    run_until_empty(&mut state)?;
    Ok(state)
}

/// Drives the dispatch loop until the frame stack empties (the top-level
/// chunk's implicit `RETURN` pops the last frame). A frame boundary that
/// belongs to a nested `CALL` is invisible here: `op_call` pushes a new
/// frame and the loop simply keeps dispatching against whichever frame
/// is now on top.
fn run_until_empty(state: &mut RuntimeState) -> Result<(), KalaError> {
    let table = dispatch::build_table();
    while !state.frames.is_empty() {
        let frame = state.current_frame();
        let proto = match &frame.closure {
            Closure::Compiled(c) => c.proto.clone(),
            Closure::Native(_) => unreachable!("native closures never sit on the frame stack between instructions"),
        };
        let pc = frame.pc;
        if pc >= proto.code.len() {
            // Implicit `return` at the end of a function body with no
            // explicit RETURN statement.
            state.open_upvalues.close_from(frame.local_base, &state.stack);
            let popped = state.pop_frame();
            let return_base = popped.return_base;
            let requested = popped.num_ret_value;
            dispatch::finish_empty_return(state, return_base, requested)?;
            continue;
        }
        let inst = proto.code[pc];
        state.current_frame_mut().pc = pc + 1;

        let raw = inst.raw_op() as usize;
        if raw >= DISPATCH_TABLE_LEN {
            panic!("opcode byte {} is out of range for the dispatch table", raw);
        }
        match table[raw] {
            Some(handler) => handler(state, inst)?,
            None => panic!("opcode byte {} has no handler (unused dispatch slot)", raw),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::{Instruction, OpCode};
    use crate::proto::FuncProto;
    use crate::value::Value;

    fn simple_proto(code: Vec<Instruction>, consts: &[Value]) -> Rc<FuncProto> {
        let mut proto = FuncProto::new();
        for c in consts {
            proto.consts.intern(c.clone());
        }
        proto.code = code;
        proto.max_registers = 4;
        Rc::new(proto)
    }

    #[test]
    fn runs_a_trivial_load_and_return() {
        let proto = simple_proto(
            vec![
                Instruction::abx(OpCode::LoadK, 0, 0),
                Instruction::abc(OpCode::Return, 0, 0, 0),
            ],
            &[Value::Number(42.0)],
        );
        let result = run(proto);
        assert!(result.is_ok());
    }

    #[test]
    fn falls_off_the_end_without_an_explicit_return() {
        let proto = simple_proto(vec![Instruction::abc(OpCode::Move, 0, 0, 0)], &[]);
        let result = run(proto);
        assert!(result.is_ok());
    }
}
