// File: src/value.rs
//
// The tagged value type shared by the compiler's constant pool and the
// VM's register file. `Dict`, `List` and `Closure` are reference-shared
// (`Rc<RefCell<..>>`); `Number`, `String`, `Bool` and `Nil` compare and
// copy by value.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::proto::FuncProto;
use crate::vm::upvalue::Upvalue;

pub const TYPE_NAMES: [&str; 7] =
    ["number", "string", "nil", "bool", "dict", "list", "function"];

/// A runtime value. Cloning a `Dict`/`List`/`Closure` clones the handle,
/// not the underlying data, exactly the reference semantics required by
/// the copy/alias invariant in the testable properties.
#[derive(Clone)]
pub enum Value {
    Number(f64),
    String(Rc<str>),
    Nil,
    Bool(bool),
    Dict(Dict),
    List(List),
    Closure(Closure),
}

impl Value {
    pub fn type_tag(&self) -> usize {
        match self {
            Value::Number(_) => 0,
            Value::String(_) => 1,
            Value::Nil => 2,
            Value::Bool(_) => 3,
            Value::Dict(_) => 4,
            Value::List(_) => 5,
            Value::Closure(_) => 6,
        }
    }

    pub fn type_name(&self) -> &'static str {
        TYPE_NAMES[self.type_tag()]
    }

    pub fn str(&self) -> String {
        match self {
            Value::Number(n) => format!("{:.2}", n),
            Value::String(s) => s.to_string(),
            Value::Nil => "nil".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Dict(d) => d.str(),
            Value::List(l) => l.str(),
            Value::Closure(_) => "function".to_string(),
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0,
            Value::Nil => false,
            _ => true,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Typed equality used by the constant pool's de-duplication rule:
    /// values of different type are never equal, and reference types
    /// compare by value here (constants are never Dict/List/Closure).
    pub fn const_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            _ => false,
        }
    }

    pub fn new_string(s: impl Into<Rc<str>>) -> Value {
        Value::String(s.into())
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}({})", self.type_name(), self.str())
    }
}

/// An ordered string-keyed map. Keys are recorded in first-insertion
/// order so iteration (range-for, positional get) is deterministic.
#[derive(Clone)]
pub struct Dict(Rc<RefCell<DictInner>>);

struct DictInner {
    map: std::collections::HashMap<String, Value>,
    keys: Vec<String>,
}

impl Dict {
    pub fn new() -> Self {
        Dict(Rc::new(RefCell::new(DictInner {
            map: std::collections::HashMap::new(),
            keys: Vec::new(),
        })))
    }

    pub fn get_field(&self, field: &str) -> Value {
        self.0
            .borrow()
            .map
            .get(field)
            .cloned()
            .unwrap_or(Value::Nil)
    }

    pub fn set_field(&self, field: &str, value: Value) {
        let mut inner = self.0.borrow_mut();
        if !inner.map.contains_key(field) {
            inner.keys.push(field.to_string());
        }
        inner.map.insert(field.to_string(), value);
    }

    pub fn get_at(&self, index: usize) -> Value {
        let inner = self.0.borrow();
        let key = &inner.keys[index];
        inner.map.get(key).cloned().unwrap_or(Value::Nil)
    }

    pub fn get_key_value(&self, index: usize) -> (String, Value) {
        let inner = self.0.borrow();
        let key = inner.keys[index].clone();
        let value = inner.map.get(&key).cloned().unwrap_or(Value::Nil);
        (key, value)
    }

    pub fn len(&self) -> usize {
        self.0.borrow().keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn str(&self) -> String {
        let inner = self.0.borrow();
        let mut out = String::from("{");
        let n = inner.keys.len();
        for (idx, key) in inner.keys.iter().enumerate() {
            out.push_str(&format!(" {}:{}", key, inner.map[key].str()));
            if idx < n - 1 {
                out.push(',');
            }
        }
        out.push('}');
        out
    }

    /// Reference identity, used by the VM's `==`/`!=` on reference types.
    pub fn ptr_eq(&self, other: &Dict) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Default for Dict {
    fn default() -> Self {
        Self::new()
    }
}

/// An ordered, growable list of values.
#[derive(Clone)]
pub struct List(Rc<RefCell<Vec<Value>>>);

impl List {
    pub fn new() -> Self {
        List(Rc::new(RefCell::new(Vec::new())))
    }

    pub fn with_capacity(cap: usize) -> Self {
        List(Rc::new(RefCell::new(Vec::with_capacity(cap))))
    }

    pub fn from_vec(v: Vec<Value>) -> Self {
        List(Rc::new(RefCell::new(v)))
    }

    pub fn append(&self, v: Value) {
        self.0.borrow_mut().push(v);
    }

    pub fn append_all(&self, vs: impl IntoIterator<Item = Value>) {
        self.0.borrow_mut().extend(vs);
    }

    pub fn get_at(&self, index: usize) -> Value {
        self.0.borrow()[index].clone()
    }

    /// Assigns past the current end by exactly one slot appends; any
    /// other out-of-range index panics.
    pub fn set_at(&self, index: usize, v: Value) {
        let mut inner = self.0.borrow_mut();
        if index == inner.len() {
            inner.push(v);
        } else {
            inner[index] = v;
        }
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn str(&self) -> String {
        let inner = self.0.borrow();
        let mut out = String::from("[");
        let n = inner.len();
        for (idx, v) in inner.iter().enumerate() {
            out.push_str(&v.str());
            if idx < n - 1 {
                out.push(',');
            }
        }
        out.push(']');
        out
    }

    pub fn ptr_eq(&self, other: &List) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Default for List {
    fn default() -> Self {
        Self::new()
    }
}

/// The two closure shapes: a compiled closure over a `FuncProto` and its
/// captured upvalues, or a native function supplied by the host.
#[derive(Clone)]
pub enum Closure {
    Compiled(Rc<CompiledClosure>),
    Native(Rc<NativeClosure>),
}

pub struct CompiledClosure {
    pub proto: Rc<FuncProto>,
    pub upvalues: RefCell<Vec<Rc<RefCell<Upvalue>>>>,
}

pub struct NativeClosure {
    pub name: String,
    pub func: Box<dyn Fn(&mut crate::vm::state::RuntimeState) -> crate::errors::KalaResult<()>>,
}

impl Closure {
    pub fn ptr_eq(&self, other: &Closure) -> bool {
        match (self, other) {
            (Closure::Compiled(a), Closure::Compiled(b)) => Rc::ptr_eq(a, b),
            (Closure::Native(a), Closure::Native(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}
