// File: src/builtins.rs
//
// Host-provided builtins. Only one is provided: `print`. Seeds the
// global dict a fresh `RuntimeState` is constructed with.

use std::rc::Rc;

use crate::value::{Closure, NativeClosure, Value};
use crate::vm::state::RuntimeState;

fn print_impl(state: &mut RuntimeState) -> crate::errors::KalaResult<()> {
    let frame = state.current_frame();
    let narg = frame.num_arg;
    let local_base = frame.local_base;
    let parts: Vec<String> = (0..narg)
        .map(|i| state.stack.get(local_base + i).str())
        .collect();
    println!("{}", parts.join(" "));
    state.current_frame_mut().num_ret_value = 0;
    Ok(())
}

/// The single builtin function: prints each positional argument's
/// string rendering separated by spaces, followed by a newline, and
/// delivers zero return values.
pub fn print_closure() -> Value {
    Value::Closure(Closure::Native(Rc::new(NativeClosure {
        name: "print".to_string(),
        func: Box::new(print_impl),
    })))
}

/// Seeds `globals` with every host-provided builtin.
pub fn install(globals: &crate::value::Dict) {
    globals.set_field("print", print_closure());
}
