// File: src/proto.rs
//
// The compiled, immutable function artifact and its constant pool.

use crate::instruction::Instruction;
use crate::value::Value;

/// Per-function constant pool: an ordered, append-only, de-duplicated
/// set of `Number`/`String` constants. A parallel string side-table
/// holds the raw string for every pool slot whose value is a string,
/// for direct use by `GETGLOBAL`/`SETGLOBAL`.
#[derive(Default)]
pub struct ConstPool {
    values: Vec<Value>,
    strings: Vec<Option<String>>,
}

impl ConstPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the index of `v` in the pool, appending it if it is not
    /// already present (typed equality).
    pub fn intern(&mut self, v: Value) -> usize {
        if let Some(idx) = self.values.iter().position(|existing| existing.const_eq(&v)) {
            return idx;
        }
        let s = v.as_str().map(|s| s.to_string());
        self.values.push(v);
        self.strings.push(s);
        self.values.len() - 1
    }

    pub fn intern_number(&mut self, n: f64) -> usize {
        self.intern(Value::Number(n))
    }

    pub fn intern_string(&mut self, s: &str) -> usize {
        self.intern(Value::new_string(s))
    }

    pub fn get(&self, index: usize) -> &Value {
        &self.values[index]
    }

    pub fn get_string(&self, index: usize) -> &str {
        self.strings[index]
            .as_deref()
            .expect("constant at index is not a string")
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// The two pseudo-instruction kinds trailing a `CLOSURE`: capture an
/// enclosing local, or re-capture an enclosing upvalue. Kept as a
/// prototype side-table rather than inline in the main instruction
/// stream, to keep the dispatch loop's opcode table uniform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpvalCapture {
    Local(u32),
    Upval(u32),
}

/// A compiled, immutable function. Produced by the expression compiler
/// when lowering a function literal (or the implicit top-level chunk
/// function), and never mutated once the patch pass has run.
pub struct FuncProto {
    pub code: Vec<Instruction>,
    pub consts: ConstPool,
    pub num_params: usize,
    pub has_vararg: bool,
    pub child_protos: Vec<std::rc::Rc<FuncProto>>,
    pub num_upvalues: usize,
    pub max_registers: u8,
    /// Indexed by the pc of the `CLOSURE` instruction that emitted it;
    /// holds that closure's upvalue capture list in declaration order.
    pub upval_captures: std::collections::HashMap<usize, Vec<UpvalCapture>>,
}

impl FuncProto {
    pub fn new() -> Self {
        FuncProto {
            code: Vec::new(),
            consts: ConstPool::new(),
            num_params: 0,
            has_vararg: false,
            child_protos: Vec::new(),
            num_upvalues: 0,
            max_registers: 0,
            upval_captures: std::collections::HashMap::new(),
        }
    }
}

impl Default for FuncProto {
    fn default() -> Self {
        Self::new()
    }
}

/// Renders an instruction stream in mnemonic form, recursing into child
/// prototypes, used by the `disasm` CLI subcommand.
pub fn disassemble(proto: &FuncProto, name: &str, out: &mut String) {
    use std::fmt::Write;
    let _ = writeln!(out, "; function {} (params={}, vararg={}, upvalues={}, maxreg={})",
        name, proto.num_params, proto.has_vararg, proto.num_upvalues, proto.max_registers);
    for (pc, inst) in proto.code.iter().enumerate() {
        let _ = writeln!(out, "{:4}  {:?}", pc, inst);
        if inst.op() == crate::instruction::OpCode::Closure {
            if let Some(captures) = proto.upval_captures.get(&pc) {
                for cap in captures {
                    match cap {
                        UpvalCapture::Local(l) => {
                            let _ = writeln!(out, "        ; capture local {}", l);
                        }
                        UpvalCapture::Upval(u) => {
                            let _ = writeln!(out, "        ; capture upvalue {}", u);
                        }
                    }
                }
            }
        }
    }
    for (idx, child) in proto.child_protos.iter().enumerate() {
        disassemble(child, &format!("{}::<anon {}>", name, idx), out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn const_pool_deduplicates_numbers_and_strings() {
        let mut pool = ConstPool::new();
        let a = pool.intern_number(1.0);
        let b = pool.intern_number(2.0);
        let c = pool.intern_number(1.0);
        assert_eq!(a, c);
        assert_ne!(a, b);

        let s1 = pool.intern_string("x");
        let s2 = pool.intern_string("x");
        assert_eq!(s1, s2);
    }

    #[test]
    fn numbers_and_strings_never_collide_in_the_pool() {
        let mut pool = ConstPool::new();
        let n = pool.intern_number(0.0);
        let s = pool.intern_string("0");
        assert_ne!(n, s);
    }
}
