// File: src/vm/dispatch.rs
//
// The 44-entry instruction dispatch table. Each handler executes one
// instruction against `RuntimeState`.
//
// Jump convention: the run loop advances `frame.pc` past an instruction
// *before* invoking its handler, so `JMP`'s `sBx` is relative to the
// post-increment pc, the conventional meaning for a relative jump.
// The patch pass uses the same baseline when resolving labels.

use std::cell::RefCell;
use std::rc::Rc;

use crate::errors::KalaError;
use crate::instruction::{index_k, is_k, Instruction, OpCode, DISPATCH_TABLE_LEN};
use crate::proto::{FuncProto, UpvalCapture};
use crate::value::{Closure, CompiledClosure, Dict, List, Value};
use crate::vm::state::{CallFrame, RuntimeState};

type HResult = Result<(), KalaError>;
type Handler = fn(&mut RuntimeState, Instruction) -> HResult;

fn rk(state: &RuntimeState, proto: &FuncProto, local_base: usize, raw: i32) -> Value {
    if is_k(raw) {
        proto.consts.get(index_k(raw) as usize).clone()
    } else {
        state.stack.get(local_base + raw as usize)
    }
}

fn need_number(v: &Value) -> Result<f64, KalaError> {
    v.as_number()
        .ok_or_else(|| KalaError::type_error(format!("expected number, found {}", v.type_name())))
}

fn need_string(v: &Value) -> Result<Rc<str>, KalaError> {
    match v {
        Value::String(s) => Ok(s.clone()),
        other => Err(KalaError::type_error(format!("expected string, found {}", other.type_name()))),
    }
}

fn need_bool(v: &Value) -> Result<bool, KalaError> {
    match v {
        Value::Bool(b) => Ok(*b),
        other => Err(KalaError::type_error(format!("expected bool, found {}", other.type_name()))),
    }
}

fn op_move(state: &mut RuntimeState, inst: Instruction) -> HResult {
    let lb = state.current_frame().local_base;
    let v = state.stack.get(lb + inst.b() as usize);
    state.stack.set(lb + inst.a() as usize, v);
    Ok(())
}

fn op_loadk(state: &mut RuntimeState, inst: Instruction) -> HResult {
    let frame_proto = state.current_frame().proto();
    let lb = state.current_frame().local_base;
    let v = frame_proto.consts.get(inst.bx() as usize).clone();
    state.stack.set(lb + inst.a() as usize, v);
    Ok(())
}

fn op_loadbool(state: &mut RuntimeState, inst: Instruction) -> HResult {
    let lb = state.current_frame().local_base;
    state.stack.set(lb + inst.a() as usize, Value::Bool(inst.b() != 0));
    if inst.c() != 0 {
        state.current_frame_mut().pc += 1;
    }
    Ok(())
}

fn op_loadnil(state: &mut RuntimeState, inst: Instruction) -> HResult {
    let lb = state.current_frame().local_base;
    for i in inst.a()..=inst.b() {
        state.stack.set(lb + i as usize, Value::Nil);
    }
    Ok(())
}

fn op_getupval(state: &mut RuntimeState, inst: Instruction) -> HResult {
    let lb = state.current_frame().local_base;
    let uv = match &state.current_frame().closure {
        Closure::Compiled(c) => c.upvalues.borrow()[inst.b() as usize].clone(),
        Closure::Native(_) => panic!("native closure has no upvalues"),
    };
    let v = uv.borrow().get(&state.stack);
    state.stack.set(lb + inst.a() as usize, v);
    Ok(())
}

fn op_setupval(state: &mut RuntimeState, inst: Instruction) -> HResult {
    let lb = state.current_frame().local_base;
    let v = state.stack.get(lb + inst.a() as usize);
    let uv = match &state.current_frame().closure {
        Closure::Compiled(c) => c.upvalues.borrow()[inst.b() as usize].clone(),
        Closure::Native(_) => panic!("native closure has no upvalues"),
    };
    uv.borrow_mut().set(&mut state.stack, v);
    Ok(())
}

fn op_getglobal(state: &mut RuntimeState, inst: Instruction) -> HResult {
    let frame_proto = state.current_frame().proto();
    let lb = state.current_frame().local_base;
    let key = frame_proto.consts.get_string(inst.bx() as usize).to_string();
    let v = state.globals.get_field(&key);
    state.stack.set(lb + inst.a() as usize, v);
    Ok(())
}

fn op_setglobal(state: &mut RuntimeState, inst: Instruction) -> HResult {
    let frame_proto = state.current_frame().proto();
    let lb = state.current_frame().local_base;
    let key = frame_proto.consts.get_string(inst.bx() as usize).to_string();
    let v = state.stack.get(lb + inst.a() as usize);
    state.globals.set_field(&key, v);
    Ok(())
}

fn index_container(obj: &Value, key: &Value) -> Result<Value, KalaError> {
    match obj {
        Value::Dict(d) => match key {
            Value::String(s) => Ok(d.get_field(s)),
            Value::Number(n) => Ok(d.get_at(*n as usize)),
            other => Err(KalaError::type_error(format!(
                "cannot index dict with {}",
                other.type_name()
            ))),
        },
        Value::List(l) => match key {
            Value::Number(n) => {
                let idx = *n as usize;
                if idx >= l.len() {
                    return Err(KalaError::type_error(format!(
                        "list index {} out of range (len {})",
                        idx,
                        l.len()
                    )));
                }
                Ok(l.get_at(idx))
            }
            other => Err(KalaError::type_error(format!(
                "cannot index list with {}",
                other.type_name()
            ))),
        },
        other => Err(KalaError::type_error(format!("cannot index {}", other.type_name()))),
    }
}

fn op_gettable(state: &mut RuntimeState, inst: Instruction) -> HResult {
    let frame_proto = state.current_frame().proto();
    let lb = state.current_frame().local_base;
    let obj = state.stack.get(lb + inst.b() as usize);
    let key = rk(state, &frame_proto, lb, inst.c());
    let v = index_container(&obj, &key)?;
    state.stack.set(lb + inst.a() as usize, v);
    Ok(())
}

fn op_gettableks(state: &mut RuntimeState, inst: Instruction) -> HResult {
    let frame_proto = state.current_frame().proto();
    let lb = state.current_frame().local_base;
    let obj = state.stack.get(lb + inst.b() as usize);
    let key = frame_proto.consts.get_string(inst.c() as usize).to_string();
    let v = match &obj {
        Value::Dict(d) => d.get_field(&key),
        other => {
            return Err(KalaError::type_error(format!(
                "cannot field-index {}",
                other.type_name()
            )))
        }
    };
    state.stack.set(lb + inst.a() as usize, v);
    Ok(())
}

fn set_into_container(obj: &Value, key: &Value, value: Value) -> Result<(), KalaError> {
    match obj {
        Value::Dict(d) => match key {
            Value::String(s) => {
                d.set_field(s, value);
                Ok(())
            }
            other => Err(KalaError::type_error(format!(
                "cannot index dict with {}",
                other.type_name()
            ))),
        },
        Value::List(l) => match key {
            Value::Number(n) => {
                l.set_at(*n as usize, value);
                Ok(())
            }
            other => Err(KalaError::type_error(format!(
                "cannot index list with {}",
                other.type_name()
            ))),
        },
        other => Err(KalaError::type_error(format!("cannot index {}", other.type_name()))),
    }
}

fn op_settable(state: &mut RuntimeState, inst: Instruction) -> HResult {
    let frame_proto = state.current_frame().proto();
    let lb = state.current_frame().local_base;
    let obj = state.stack.get(lb + inst.a() as usize);
    let key = rk(state, &frame_proto, lb, inst.b());
    let value = rk(state, &frame_proto, lb, inst.c());
    set_into_container(&obj, &key, value)
}

fn op_settableks(state: &mut RuntimeState, inst: Instruction) -> HResult {
    let frame_proto = state.current_frame().proto();
    let lb = state.current_frame().local_base;
    let obj = state.stack.get(lb + inst.a() as usize);
    let key = frame_proto.consts.get_string(inst.b() as usize).to_string();
    let value = state.stack.get(lb + inst.c() as usize);
    match &obj {
        Value::Dict(d) => {
            d.set_field(&key, value);
            Ok(())
        }
        other => Err(KalaError::type_error(format!("cannot field-index {}", other.type_name()))),
    }
}

fn op_newtable(state: &mut RuntimeState, inst: Instruction) -> HResult {
    let lb = state.current_frame().local_base;
    let v = if inst.c() > 0 {
        Value::Dict(Dict::new())
    } else {
        Value::List(List::with_capacity(inst.b().max(0) as usize))
    };
    state.stack.set(lb + inst.a() as usize, v);
    Ok(())
}

fn arith(state: &mut RuntimeState, inst: Instruction, f: fn(f64, f64) -> f64) -> HResult {
    let frame_proto = state.current_frame().proto();
    let lb = state.current_frame().local_base;
    let b = need_number(&rk(state, &frame_proto, lb, inst.b()))?;
    let c = need_number(&rk(state, &frame_proto, lb, inst.c()))?;
    state.stack.set(lb + inst.a() as usize, Value::Number(f(b, c)));
    Ok(())
}

fn op_add(state: &mut RuntimeState, inst: Instruction) -> HResult {
    arith(state, inst, |a, b| a + b)
}
fn op_sub(state: &mut RuntimeState, inst: Instruction) -> HResult {
    arith(state, inst, |a, b| a - b)
}
fn op_mul(state: &mut RuntimeState, inst: Instruction) -> HResult {
    arith(state, inst, |a, b| a * b)
}
fn op_div(state: &mut RuntimeState, inst: Instruction) -> HResult {
    arith(state, inst, |a, b| a / b)
}
fn op_mod(state: &mut RuntimeState, inst: Instruction) -> HResult {
    arith(state, inst, |a, b| ((a as i64) % (b as i64)) as f64)
}

fn op_unm(state: &mut RuntimeState, inst: Instruction) -> HResult {
    let lb = state.current_frame().local_base;
    let v = need_number(&state.stack.get(lb + inst.b() as usize))?;
    state.stack.set(lb + inst.a() as usize, Value::Number(-v));
    Ok(())
}

fn op_not(state: &mut RuntimeState, inst: Instruction) -> HResult {
    let lb = state.current_frame().local_base;
    let v = need_bool(&state.stack.get(lb + inst.b() as usize))?;
    state.stack.set(lb + inst.a() as usize, Value::Bool(!v));
    Ok(())
}

fn op_len(state: &mut RuntimeState, inst: Instruction) -> HResult {
    let lb = state.current_frame().local_base;
    let v = state.stack.get(lb + inst.b() as usize);
    let n = match &v {
        Value::Dict(d) => d.len(),
        Value::List(l) => l.len(),
        other => {
            return Err(KalaError::type_error(format!(
                "cannot take length of {}",
                other.type_name()
            )))
        }
    };
    state.stack.set(lb + inst.a() as usize, Value::Number(n as f64));
    Ok(())
}

fn op_concat(state: &mut RuntimeState, inst: Instruction) -> HResult {
    let lb = state.current_frame().local_base;
    let b = need_string(&state.stack.get(lb + inst.b() as usize))?;
    let c = need_string(&state.stack.get(lb + inst.c() as usize))?;
    let joined = format!("{}{}", b, c);
    state.stack.set(lb + inst.a() as usize, Value::new_string(joined));
    Ok(())
}

fn op_jmp(state: &mut RuntimeState, inst: Instruction) -> HResult {
    let frame = state.current_frame_mut();
    frame.pc = (frame.pc as i64 + inst.sbx() as i64) as usize;
    Ok(())
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x == y,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Nil, Value::Nil) => true,
        (Value::Dict(x), Value::Dict(y)) => x.ptr_eq(y),
        (Value::List(x), Value::List(y)) => x.ptr_eq(y),
        (Value::Closure(x), Value::Closure(y)) => x.ptr_eq(y),
        _ => false,
    }
}

fn op_eq(state: &mut RuntimeState, inst: Instruction) -> HResult {
    let frame_proto = state.current_frame().proto();
    let lb = state.current_frame().local_base;
    let b = rk(state, &frame_proto, lb, inst.b());
    let c = rk(state, &frame_proto, lb, inst.c());
    let result = values_equal(&b, &c);
    if result != (inst.a() != 0) {
        state.current_frame_mut().pc += 1;
    }
    Ok(())
}

fn op_lt(state: &mut RuntimeState, inst: Instruction) -> HResult {
    let frame_proto = state.current_frame().proto();
    let lb = state.current_frame().local_base;
    let b = need_number(&rk(state, &frame_proto, lb, inst.b()))?;
    let c = need_number(&rk(state, &frame_proto, lb, inst.c()))?;
    let result = b < c;
    if result != (inst.a() != 0) {
        state.current_frame_mut().pc += 1;
    }
    Ok(())
}

fn op_le(state: &mut RuntimeState, inst: Instruction) -> HResult {
    let frame_proto = state.current_frame().proto();
    let lb = state.current_frame().local_base;
    let b = need_number(&rk(state, &frame_proto, lb, inst.b()))?;
    let c = need_number(&rk(state, &frame_proto, lb, inst.c()))?;
    let result = b <= c;
    if result != (inst.a() != 0) {
        state.current_frame_mut().pc += 1;
    }
    Ok(())
}

fn op_test(state: &mut RuntimeState, inst: Instruction) -> HResult {
    let lb = state.current_frame().local_base;
    let v = state.stack.get(lb + inst.a() as usize);
    let result = v.is_truthy();
    if result != (inst.c() != 0) {
        state.current_frame_mut().pc += 1;
    }
    Ok(())
}

/// Shared tail of CALL (native path) and RETURN: clamps the delivered
/// value count to the caller's requested arity, erroring if the caller
/// demanded a fixed count larger than what was actually produced.
pub(crate) fn finish_return(state: &mut RuntimeState, return_base: usize, requested: isize, actual: usize) -> HResult {
    if requested >= 0 {
        let req = requested as usize;
        if actual < req {
            return Err(KalaError::arity(format!(
                "function returned {} value(s), caller requested {}",
                actual, req
            )));
        }
        let new_top = return_base + req;
        let old_top = state.stack.top;
        if old_top > new_top {
            state.stack.clear_range(new_top, old_top);
        }
        state.stack.top = new_top;
    } else {
        state.stack.top = return_base + actual;
    }
    Ok(())
}

fn op_call(state: &mut RuntimeState, inst: Instruction) -> HResult {
    let lb = state.current_frame().local_base;
    let a = inst.a() as usize;
    let callee_reg = lb + a;
    let callee = state.stack.get(callee_reg);
    let closure = match callee {
        Value::Closure(c) => c,
        other => {
            return Err(KalaError::type_error(format!("attempt to call a {} value", other.type_name())))
        }
    };

    let arg_start = callee_reg + 1;
    let narg = if inst.b() == 0 {
        state.stack.top.saturating_sub(arg_start)
    } else {
        (inst.b() - 1) as usize
    };
    let requested: isize = if inst.c() == 0 { -1 } else { (inst.c() - 1) as isize };

    match &closure {
        Closure::Native(native) => {
            let frame = CallFrame {
                base: callee_reg,
                local_base: arg_start,
                return_base: callee_reg,
                closure: closure.clone(),
                pc: 0,
                num_arg: narg,
                num_ret_value: requested,
            };
            state.push_frame(frame);
            let result = (native.func)(state);
            let popped = state.pop_frame();
            result?;
            let actual = popped.num_ret_value.max(0) as usize;
            finish_return(state, popped.return_base, requested, actual)
        }
        Closure::Compiled(compiled) => {
            let proto = compiled.proto.clone();
            if narg < proto.num_params {
                return Err(KalaError::arity(format!(
                    "function expects {} argument(s), got {}",
                    proto.num_params, narg
                )));
            }

            let new_local_base = if proto.has_vararg {
                let npar = proto.num_params;
                let nvarg = narg - npar;
                let excess: Vec<Value> = (0..nvarg).map(|i| state.stack.get(arg_start + npar + i)).collect();
                let fixed: Vec<Value> = (0..npar).map(|i| state.stack.get(arg_start + i)).collect();
                let new_lb = arg_start + nvarg;
                for (i, v) in fixed.into_iter().enumerate() {
                    state.stack.set(new_lb + i, v);
                }
                state.stack.set(new_lb + npar, Value::List(List::from_vec(excess)));
                new_lb
            } else {
                arg_start
            };

            state.push_frame(CallFrame {
                base: callee_reg,
                local_base: new_local_base,
                return_base: callee_reg,
                closure: closure.clone(),
                pc: 0,
                num_arg: narg,
                num_ret_value: requested,
            });
            Ok(())
        }
    }
}

fn op_return(state: &mut RuntimeState, inst: Instruction) -> HResult {
    let lb = state.current_frame().local_base;
    let a = lb + inst.a() as usize;
    let nret = if inst.b() == 0 {
        state.stack.top.saturating_sub(a)
    } else {
        (inst.b() - 1) as usize
    };

    state.open_upvalues.close_from(lb, &state.stack);

    let popped = state.pop_frame();
    state.stack.move_range(a, a + nret, popped.return_base);
    finish_return(state, popped.return_base, popped.num_ret_value, nret)
}

/// Handles a function body that runs off the end of its code array
/// with no explicit `RETURN` (an implicit empty return). Equivalent to
/// `finish_return` with zero actual values.
pub(crate) fn finish_empty_return(state: &mut RuntimeState, return_base: usize, requested: isize) -> HResult {
    finish_return(state, return_base, requested, 0)
}

fn op_forloop(state: &mut RuntimeState, inst: Instruction) -> HResult {
    let lb = state.current_frame().local_base;
    let a = lb + inst.a() as usize;
    let i = need_number(&state.stack.get(a))?;
    let step = need_number(&state.stack.get(a + 2))?;
    let limit = need_number(&state.stack.get(a + 1))?;
    let next_i = i + step;
    state.stack.set(a, Value::Number(next_i));
    if next_i < limit {
        let frame = state.current_frame_mut();
        frame.pc = (frame.pc as i64 + inst.sbx() as i64) as usize;
    }
    Ok(())
}

fn op_setlist(state: &mut RuntimeState, inst: Instruction) -> HResult {
    let lb = state.current_frame().local_base;
    let a = lb + inst.a() as usize;
    let n = inst.b() as usize;
    let elements: Vec<Value> = (1..=n).map(|i| state.stack.get(a + i)).collect();
    let target = state.stack.get(a);
    match target {
        Value::List(l) => l.append_all(elements),
        _ => {
            let l = List::with_capacity(n);
            l.append_all(elements);
            state.stack.set(a, Value::List(l));
        }
    }
    Ok(())
}

fn op_close(state: &mut RuntimeState, inst: Instruction) -> HResult {
    let lb = state.current_frame().local_base;
    let from = lb + inst.a() as usize;
    state.open_upvalues.close_from(from, &state.stack);
    let top = state.stack.top;
    state.stack.clear_range(from, top.max(from));
    Ok(())
}

fn op_closure(state: &mut RuntimeState, inst: Instruction) -> HResult {
    let frame_proto = state.current_frame().proto();
    let lb = state.current_frame().local_base;
    let closure_pc = state.current_frame().pc - 1;
    let child = frame_proto.child_protos[inst.bx() as usize].clone();
    let captures = frame_proto
        .upval_captures
        .get(&closure_pc)
        .cloned()
        .unwrap_or_default();

    let mut upvalues = Vec::with_capacity(captures.len());
    for cap in &captures {
        match cap {
            UpvalCapture::Local(reg) => {
                upvalues.push(state.open_upvalues.find_or_create(lb + *reg as usize));
            }
            UpvalCapture::Upval(idx) => match &state.current_frame().closure {
                Closure::Compiled(c) => upvalues.push(c.upvalues.borrow()[*idx as usize].clone()),
                Closure::Native(_) => panic!("native closure has no upvalues"),
            },
        }
    }

    let closure = Closure::Compiled(Rc::new(CompiledClosure {
        proto: child,
        upvalues: RefCell::new(upvalues),
    }));
    state.stack.set(lb + inst.a() as usize, Value::Closure(closure));
    Ok(())
}

fn op_vararg(_state: &mut RuntimeState, _inst: Instruction) -> HResult {
    // Intentionally empty: vararg splat is unsupported; `arg` is the
    // only way to observe a function's excess arguments.
    Ok(())
}

fn op_nop(_state: &mut RuntimeState, _inst: Instruction) -> HResult {
    Ok(())
}

fn op_append(state: &mut RuntimeState, inst: Instruction) -> HResult {
    let lb = state.current_frame().local_base;
    let target = state.stack.get(lb + inst.a() as usize);
    let value = state.stack.get(lb + inst.b() as usize);
    match target {
        Value::List(l) => {
            l.append(value);
            Ok(())
        }
        other => Err(KalaError::type_error(format!("cannot append to {}", other.type_name()))),
    }
}

fn op_getfield(state: &mut RuntimeState, inst: Instruction) -> HResult {
    let lb = state.current_frame().local_base;
    let container = state.stack.get(lb + inst.b() as usize);
    let index = need_number(&state.stack.get(lb + inst.c() as usize))? as usize;
    let a = lb + inst.a() as usize;
    match &container {
        Value::Dict(d) => {
            if index >= d.len() {
                return Err(KalaError::type_error(format!(
                    "dict positional index {} out of range (len {})",
                    index,
                    d.len()
                )));
            }
            let (k, v) = d.get_key_value(index);
            state.stack.set(a, Value::new_string(k));
            state.stack.set(a + 1, v);
        }
        Value::List(l) => {
            if index >= l.len() {
                return Err(KalaError::type_error(format!(
                    "list index {} out of range (len {})",
                    index,
                    l.len()
                )));
            }
            state.stack.set(a, Value::Number(index as f64));
            state.stack.set(a + 1, l.get_at(index));
        }
        other => {
            return Err(KalaError::type_error(format!(
                "cannot iterate over {}",
                other.type_name()
            )))
        }
    }
    Ok(())
}

/// Builds the flat dispatch table. Slots past the real opcode count are
/// `None`; reaching one means a corrupt instruction stream, not a
/// language-level fault, so the run loop panics rather than returning a
/// `KalaError`.
pub fn build_table() -> [Option<Handler>; DISPATCH_TABLE_LEN] {
    let mut table: [Option<Handler>; DISPATCH_TABLE_LEN] = [None; DISPATCH_TABLE_LEN];
    table[OpCode::Move as usize] = Some(op_move);
    table[OpCode::LoadK as usize] = Some(op_loadk);
    table[OpCode::LoadBool as usize] = Some(op_loadbool);
    table[OpCode::LoadNil as usize] = Some(op_loadnil);
    table[OpCode::GetUpval as usize] = Some(op_getupval);
    table[OpCode::GetGlobal as usize] = Some(op_getglobal);
    table[OpCode::GetTable as usize] = Some(op_gettable);
    table[OpCode::GetTableKs as usize] = Some(op_gettableks);
    table[OpCode::SetGlobal as usize] = Some(op_setglobal);
    table[OpCode::SetUpval as usize] = Some(op_setupval);
    table[OpCode::SetTable as usize] = Some(op_settable);
    table[OpCode::SetTableKs as usize] = Some(op_settableks);
    table[OpCode::NewTable as usize] = Some(op_newtable);
    table[OpCode::Add as usize] = Some(op_add);
    table[OpCode::Sub as usize] = Some(op_sub);
    table[OpCode::Mul as usize] = Some(op_mul);
    table[OpCode::Div as usize] = Some(op_div);
    table[OpCode::Mod as usize] = Some(op_mod);
    table[OpCode::Unm as usize] = Some(op_unm);
    table[OpCode::Not as usize] = Some(op_not);
    table[OpCode::Len as usize] = Some(op_len);
    table[OpCode::Concat as usize] = Some(op_concat);
    table[OpCode::Jmp as usize] = Some(op_jmp);
    table[OpCode::Eq as usize] = Some(op_eq);
    table[OpCode::Lt as usize] = Some(op_lt);
    table[OpCode::Le as usize] = Some(op_le);
    table[OpCode::Test as usize] = Some(op_test);
    table[OpCode::Call as usize] = Some(op_call);
    table[OpCode::Return as usize] = Some(op_return);
    table[OpCode::ForLoop as usize] = Some(op_forloop);
    table[OpCode::SetList as usize] = Some(op_setlist);
    table[OpCode::Close as usize] = Some(op_close);
    table[OpCode::Closure as usize] = Some(op_closure);
    table[OpCode::VarArg as usize] = Some(op_vararg);
    table[OpCode::Nop as usize] = Some(op_nop);
    table[OpCode::Append as usize] = Some(op_append);
    table[OpCode::GetField as usize] = Some(op_getfield);
    table
}
