//! The target buffer: the append-only statement list the core writes to,
//! and the `emit` helper that is the *only* way it writes output (spec
//! §4.1).
//!
//! The current target is carried as ordinary state on [`crate::compiler::Compiler`]
//! rather than as a thread-local dynamic variable — spec §9 calls for
//! modeling the source's dynamic `*target*` binding as "stacked context with
//! guaranteed restore". Because `let_target` only ever calls its closure
//! synchronously and returns control to the call site regardless of whether
//! that closure produced `Ok` or `Err`, a plain save/swap/restore achieves
//! exactly that guarantee without needing a `Drop` guard: the restore step
//! is not on a path that can be skipped by anything short of a panic.

use crate::jsast::{JsExpr, JsStmt};

/// What to do with a compiled expression's value (spec §4.9 "out values").
#[derive(Debug, Clone)]
pub enum Out {
    /// Mint a fresh JS identifier and assign the value to it.
    Fresh,
    /// Discard the value; compile for effect only.
    Discard,
    /// Assign into an already-allocated identifier.
    Existing(String),
}

#[derive(Debug, Default)]
pub struct Target {
    statements: Vec<JsStmt>,
}

impl Target {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, stmt: JsStmt) {
        self.statements.push(stmt);
    }

    pub fn into_statements(self) -> Vec<JsStmt> {
        self.statements
    }

    pub fn statements(&self) -> &[JsStmt] {
        &self.statements
    }
}

/// `emit(expr, var)` (spec §4.1): appends the JS needed to land `expr`
/// wherever `var` says, and returns the identifier the value now lives in
/// (or `None` if it was discarded).
pub fn emit(
    target: &mut Target,
    namegen: &mut crate::namegen::NameGen,
    expr: JsExpr,
    var: Out,
) -> Option<String> {
    match var {
        Out::Fresh => {
            let id = namegen.fresh_var();
            target.push(JsStmt::VarDecl(id.clone(), None));
            target.push(JsStmt::Expr(JsExpr::assign(JsExpr::ident(&id), expr)));
            Some(id)
        }
        Out::Existing(id) => {
            target.push(JsStmt::Expr(JsExpr::assign(JsExpr::ident(&id), expr)));
            Some(id)
        }
        Out::Discard => {
            target.push(JsStmt::Expr(expr));
            None
        }
    }
}

/// `expr` for a present value, `undefined` for a discarded one — the shape
/// every special-form/builtin compiler gets back from a sub-`convert` call
/// and has to feed into the next JS expression it builds.
pub fn ident_or_undefined(id: Option<String>) -> JsExpr {
    match id {
        Some(id) => JsExpr::ident(id),
        None => JsExpr::Undefined,
    }
}

/// Turns a resolved `Out` (never `Out::Fresh` — see [`crate::compiler::Compiler::resolve_out`])
/// into the statement that lands `expr` there. Used by special-form/builtin
/// compilers that need every branch of a conditional to write into the same
/// slot (spec §4.6 `if`, `catch`, `block`, …).
pub fn assign_into(out: &Out, expr: JsExpr) -> JsStmt {
    match out {
        Out::Existing(id) => JsStmt::Expr(JsExpr::assign(JsExpr::ident(id.clone()), expr)),
        Out::Discard => JsStmt::Expr(expr),
        Out::Fresh => panic!("assign_into called with an unresolved Out::Fresh"),
    }
}

/// The identifier a resolved `Out` ultimately produced, mirroring what
/// `emit` would have returned.
pub fn out_result(out: Out) -> Option<String> {
    match out {
        Out::Existing(id) => Some(id),
        Out::Discard => None,
        Out::Fresh => panic!("out_result called with an unresolved Out::Fresh"),
    }
}
