// File: tests/common/mod.rs
//
// Shared harness for the end-to-end scenario tests: lex, parse, compile
// and run a source string, then expose the resulting stack/globals for
// assertions against specific registers.

use kala::value::Value;
use kala::vm::state::RuntimeState;

pub fn run_source(src: &str) -> RuntimeState {
    let tokens = kala::lexer::tokenize(src).expect("lex failed");
    let mut parser = kala::parser::Parser::new(tokens);
    let chunk = parser.parse().expect("parse failed");
    let proto = kala::compiler::compile(&chunk).expect("compile failed");
    kala::vm::run(proto).expect("run failed")
}

pub fn reg(state: &RuntimeState, index: usize) -> Value {
    state.stack.get(index)
}

pub fn assert_number(v: &Value, expected: f64) {
    match v {
        Value::Number(n) => assert!((n - expected).abs() < 1e-9, "expected {}, got {}", expected, n),
        other => panic!("expected Number({}), got {:?}", expected, other),
    }
}

pub fn assert_string(v: &Value, expected: &str) {
    match v {
        Value::String(s) => assert_eq!(s.as_ref(), expected),
        other => panic!("expected String({:?}), got {:?}", expected, other),
    }
}

pub fn assert_bool(v: &Value, expected: bool) {
    match v {
        Value::Bool(b) => assert_eq!(*b, expected),
        other => panic!("expected Bool({}), got {:?}", expected, other),
    }
}

pub fn assert_nil(v: &Value) {
    assert!(matches!(v, Value::Nil), "expected Nil, got {:?}", v);
}
