// File: src/compiler/context.rs
//
// Per-function compile-time state: block chain, local-variable table,
// upvalue table, label table and the logical stack-top register
// cursor.

use std::collections::HashMap;
use std::rc::Rc;

use crate::errors::KalaError;
use crate::instruction::{Instruction, MAX_ARG_SBX, OpCode};
use crate::proto::{ConstPool, FuncProto, UpvalCapture};

struct Local {
    name: String,
    reg: i32,
}

/// A lexical scope inside a function. `end_label` is the `break`
/// target for loop-introducing blocks; `needs_close` is set the
/// moment a nested closure captures one of this block's locals.
struct Block {
    locals: Vec<Local>,
    offset: i32,
    end_label: Option<u32>,
    needs_close: bool,
}

enum UpvalSource {
    Local(i32),
    Upval(u32),
}

struct UpvalDesc {
    name: String,
    source: UpvalSource,
}

/// Where an identifier resolved to.
pub enum Resolved {
    Local(i32),
    Upval(u32),
    Global,
}

/// Per-function compilation state.
pub struct FuncState {
    blocks: Vec<Block>,
    code: Vec<Instruction>,
    consts: ConstPool,
    upvalues: Vec<UpvalDesc>,
    labels: HashMap<u32, Option<usize>>,
    next_label: u32,
    pending_jumps: Vec<(usize, u32)>,
    stack_top: i32,
    high_water: i32,
    num_params: usize,
    has_vararg: bool,
    child_protos: Vec<Rc<FuncProto>>,
    upval_captures: HashMap<usize, Vec<UpvalCapture>>,
}

impl FuncState {
    fn new() -> Self {
        FuncState {
            blocks: vec![Block { locals: Vec::new(), offset: 0, end_label: None, needs_close: false }],
            code: Vec::new(),
            consts: ConstPool::new(),
            upvalues: Vec::new(),
            labels: HashMap::new(),
            next_label: 0,
            pending_jumps: Vec::new(),
            stack_top: 0,
            high_water: 0,
            num_params: 0,
            has_vararg: false,
            child_protos: Vec::new(),
            upval_captures: HashMap::new(),
        }
    }

    pub fn slot_top(&self) -> i32 {
        self.stack_top
    }

    /// Reserves `n` consecutive fresh registers starting at the current
    /// stack top and returns that starting register.
    pub fn reserve(&mut self, n: i32) -> i32 {
        let base = self.stack_top;
        self.stack_top += n;
        if self.stack_top > self.high_water {
            self.high_water = self.stack_top;
        }
        base
    }

    /// Records a register index as touched without advancing the
    /// cursor (used by handlers that write directly into a caller-
    /// supplied `result_slot`).
    pub fn touch(&mut self, reg: i32) {
        if reg + 1 > self.high_water {
            self.high_water = reg + 1;
        }
    }

    pub fn set_top(&mut self, top: i32) {
        self.stack_top = top;
    }

    fn current_block(&self) -> &Block {
        self.blocks.last().expect("function always has at least one block")
    }

    fn current_block_mut(&mut self) -> &mut Block {
        self.blocks.last_mut().expect("function always has at least one block")
    }

    pub fn enter_block(&mut self, end_label: Option<u32>) {
        let offset = self.stack_top;
        self.blocks.push(Block { locals: Vec::new(), offset, end_label, needs_close: false });
    }

    /// Leaves the current block, emitting `CLOSE offset` first if any
    /// nested closure captured one of its locals, then resets the
    /// stack top to the block's starting offset.
    pub fn leave_block(&mut self) {
        let block = self.blocks.pop().expect("unbalanced block exit");
        if block.needs_close {
            self.emit(Instruction::abc(OpCode::Close, block.offset, 0, 0));
        }
        self.stack_top = block.offset;
    }

    /// Leaves the current block without emitting a `CLOSE`, for loop
    /// forms (`while`) that already close unconditionally on every
    /// back-edge and would otherwise double-close on exit.
    pub fn leave_block_already_closed(&mut self) {
        let block = self.blocks.pop().expect("unbalanced block exit");
        self.stack_top = block.offset;
    }

    pub fn current_block_offset(&self) -> i32 {
        self.current_block().offset
    }

    pub fn add_local(&mut self, name: &str) -> i32 {
        let reg = self.reserve(1);
        self.current_block_mut().locals.push(Local { name: name.to_string(), reg });
        reg
    }

    fn find_local(&self, name: &str) -> Option<i32> {
        for block in self.blocks.iter().rev() {
            if let Some(local) = block.locals.iter().rev().find(|l| l.name == name) {
                return Some(local.reg);
            }
        }
        None
    }

    /// Marks the innermost block (working outward) whose register range
    /// covers `reg` as needing a `CLOSE` on exit.
    fn mark_captured(&mut self, reg: i32) {
        for block in self.blocks.iter_mut().rev() {
            if reg >= block.offset {
                block.needs_close = true;
                break;
            }
        }
    }

    fn find_or_add_upvalue(&mut self, name: &str, source: UpvalSource) -> u32 {
        if let Some(idx) = self.upvalues.iter().position(|u| u.name == name) {
            return idx as u32;
        }
        self.upvalues.push(UpvalDesc { name: name.to_string(), source });
        (self.upvalues.len() - 1) as u32
    }

    pub fn break_target(&self) -> Option<(Vec<i32>, u32)> {
        let mut close_offsets = Vec::new();
        for block in self.blocks.iter().rev() {
            if block.needs_close {
                close_offsets.push(block.offset);
            }
            if let Some(label) = block.end_label {
                return Some((close_offsets, label));
            }
        }
        None
    }

    pub fn new_label(&mut self) -> u32 {
        let id = self.next_label;
        self.next_label += 1;
        self.labels.insert(id, None);
        id
    }

    pub fn place_label(&mut self, label: u32) {
        let pc = self.code.len();
        self.labels.insert(label, Some(pc));
    }

    pub fn emit(&mut self, inst: Instruction) -> usize {
        self.code.push(inst);
        self.code.len() - 1
    }

    /// Emits a placeholder `JMP`/`FORLOOP` with `sBx=0`, to be resolved
    /// against `label`'s final position during the patch pass.
    pub fn emit_jump(&mut self, op: OpCode, a: i32, label: u32) -> usize {
        let pc = self.emit(Instruction::asbx(op, a, 0));
        self.pending_jumps.push((pc, label));
        pc
    }

    pub fn intern_number(&mut self, n: f64) -> i32 {
        self.consts.intern_number(n) as i32
    }

    pub fn intern_string(&mut self, s: &str) -> i32 {
        self.consts.intern_string(s) as i32
    }
}

/// Drives single-pass compilation of a chunk into a `FuncProto` tree.
/// One `Compiler` instance is used per top-level `compile` call;
/// `funcs` is the nesting stack of in-progress `FuncState`s, with the
/// currently-compiling function last.
pub struct Compiler {
    pub funcs: Vec<FuncState>,
}

impl Compiler {
    pub fn new() -> Self {
        Compiler { funcs: Vec::new() }
    }

    pub fn push_func(&mut self) {
        self.funcs.push(FuncState::new());
    }

    pub fn cur(&mut self) -> &mut FuncState {
        self.funcs.last_mut().expect("no function being compiled")
    }

    pub fn cur_ref(&self) -> &FuncState {
        self.funcs.last().expect("no function being compiled")
    }

    /// Resolves `name` against the current function's locals, then (on
    /// miss) against each enclosing function's locals/upvalues,
    /// recording an upvalue chain through every level in between.
    pub fn resolve(&mut self, name: &str) -> Resolved {
        let level = self.funcs.len() - 1;
        self.resolve_at(level, name)
    }

    fn resolve_at(&mut self, level: usize, name: &str) -> Resolved {
        if let Some(reg) = self.funcs[level].find_local(name) {
            return Resolved::Local(reg);
        }
        if level == 0 {
            return Resolved::Global;
        }
        if let Some(idx) = self.funcs[level].upvalues.iter().position(|u| u.name == name) {
            return Resolved::Upval(idx as u32);
        }
        match self.resolve_at(level - 1, name) {
            Resolved::Local(reg) => {
                self.funcs[level - 1].mark_captured(reg);
                let idx = self.funcs[level].find_or_add_upvalue(name, UpvalSource::Local(reg));
                Resolved::Upval(idx)
            }
            Resolved::Upval(parent_idx) => {
                let idx = self.funcs[level].find_or_add_upvalue(name, UpvalSource::Upval(parent_idx));
                Resolved::Upval(idx)
            }
            Resolved::Global => Resolved::Global,
        }
    }

    /// Records the finished child's upvalue capture list against the
    /// `CLOSURE` instruction at `closure_pc` in the *parent's* sidecar
    /// table, keeping the dispatch loop's opcode stream free of inline
    /// pseudo-instructions.
    pub fn record_closure_captures(&mut self, closure_pc: usize, child_upvalues: &[(String, UpvalSourceKind)]) {
        let captures: Vec<UpvalCapture> = child_upvalues
            .iter()
            .map(|(_, src)| match src {
                UpvalSourceKind::Local(r) => UpvalCapture::Local(*r as u32),
                UpvalSourceKind::Upval(i) => UpvalCapture::Upval(*i),
            })
            .collect();
        self.cur().upval_captures.insert(closure_pc, captures);
    }

    /// Finishes compiling the innermost function, running the patch
    /// pass and returning its immutable `FuncProto`.
    pub fn pop_func(&mut self) -> Result<Rc<FuncProto>, KalaError> {
        let func = self.funcs.pop().expect("no function being compiled");
        crate::compiler::patch::patch_function(func)
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

/// The upvalue-source shape exposed to `expr.rs` when it finishes
/// compiling a function literal, so the enclosing `CLOSURE`'s capture
/// list can be recorded.
pub enum UpvalSourceKind {
    Local(i32),
    Upval(u32),
}

impl FuncState {
    pub fn upvalue_sources(&self) -> Vec<(String, UpvalSourceKind)> {
        self.upvalues
            .iter()
            .map(|u| {
                let kind = match u.source {
                    UpvalSource::Local(r) => UpvalSourceKind::Local(r),
                    UpvalSource::Upval(i) => UpvalSourceKind::Upval(i),
                };
                (u.name.clone(), kind)
            })
            .collect()
    }

    pub fn set_signature(&mut self, num_params: usize, has_vararg: bool) {
        self.num_params = num_params;
        self.has_vararg = has_vararg;
    }

    pub fn add_child(&mut self, proto: Rc<FuncProto>) -> i32 {
        self.child_protos.push(proto);
        (self.child_protos.len() - 1) as i32
    }

    pub fn num_upvalues(&self) -> usize {
        self.upvalues.len()
    }
}

pub(crate) struct PatchInput {
    pub code: Vec<Instruction>,
    pub consts: ConstPool,
    pub num_params: usize,
    pub has_vararg: bool,
    pub child_protos: Vec<Rc<FuncProto>>,
    pub num_upvalues: usize,
    pub high_water: i32,
    pub labels: HashMap<u32, Option<usize>>,
    pub pending_jumps: Vec<(usize, u32)>,
    pub upval_captures: HashMap<usize, Vec<UpvalCapture>>,
}

impl FuncState {
    pub(crate) fn into_patch_input(self) -> PatchInput {
        PatchInput {
            code: self.code,
            consts: self.consts,
            num_params: self.num_params,
            has_vararg: self.has_vararg,
            child_protos: self.child_protos,
            num_upvalues: self.upvalues.len(),
            high_water: self.high_water,
            labels: self.labels,
            pending_jumps: self.pending_jumps,
            upval_captures: self.upval_captures,
        }
    }
}

pub fn fatal_long_jump() -> KalaError {
    KalaError::compile(format!("jump displacement exceeds the {}-unit signed range", MAX_ARG_SBX))
}
