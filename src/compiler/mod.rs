// File: src/compiler/mod.rs
//
// Entry point for the AST-to-bytecode compiler. Wires the per-function
// context, expression/statement/branch-cond lowering and the
// jump-patching pass together into a single `compile` call.

pub mod cond;
pub mod context;
pub mod expr;
pub mod patch;
pub mod stmt;

use std::rc::Rc;

use crate::ast::Stmt;
use crate::errors::KalaError;
use crate::proto::FuncProto;
use context::Compiler;

/// Compiles a top-level chunk into the implicit `function(...vararg) { <chunk> }`
/// prototype the VM expects as its entry point.
pub fn compile(chunk: &[Stmt]) -> Result<Rc<FuncProto>, KalaError> {
    let mut compiler = Compiler::new();
    compiler.push_func();
    compiler.cur().set_signature(0, true);
    compiler.cur().add_local("arg");
    stmt::compile_block(&mut compiler, chunk)?;
    compiler.pop_func()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Expr;

    #[test]
    fn compiles_an_empty_chunk_to_a_bare_return() {
        let proto = compile(&[]).unwrap();
        assert_eq!(proto.num_params, 0);
        assert!(proto.has_vararg);
    }

    #[test]
    fn compiles_a_var_def_with_two_locals() {
        let chunk = vec![Stmt::VarDef {
            vars: vec!["a".to_string(), "b".to_string()],
            exprs: vec![Expr::Number(1.0), Expr::Number(2.0)],
        }];
        let proto = compile(&chunk).unwrap();
        assert!(!proto.code.is_empty());
    }
}
