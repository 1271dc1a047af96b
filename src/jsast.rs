//! The JavaScript AST emitted by the compiler.
//!
//! A tagged tree of statements and expressions, one variant per node kind
//! named in spec §6 "JS AST (produced)". The printer that serializes this
//! tree to source text is an external collaborator (spec §1); this module
//! only defines the shape it consumes.

/// A JavaScript expression.
#[derive(Debug, Clone, PartialEq)]
pub enum JsExpr {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Null,
    Undefined,
    /// `#(...)` in spec terms: a JS array literal.
    Array(Vec<JsExpr>),
    Object(Vec<(String, JsExpr)>),
    Call(Box<JsExpr>, Vec<JsExpr>),
    MethodCall(Box<JsExpr>, String, Vec<JsExpr>),
    /// `obj[key]`
    Get(Box<JsExpr>, Box<JsExpr>),
    /// `obj.prop`
    Property(Box<JsExpr>, String),
    New(Box<JsExpr>, Vec<JsExpr>),
    Assign(Box<JsExpr>, Box<JsExpr>),
    Unary(UnaryOp, Box<JsExpr>),
    Binary(BinOp, Box<JsExpr>, Box<JsExpr>),
    InstanceOf(Box<JsExpr>, Box<JsExpr>),
    TypeOf(Box<JsExpr>),
    In(Box<JsExpr>, Box<JsExpr>),
    Delete(Box<JsExpr>),
    Function(FunctionLit),
    /// A parenthesized, left-to-right comma sequence.
    Seq(Vec<JsExpr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
    BitNot,
    Plus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    StrictEq,
    StrictNeq,
    Lt,
    Gt,
    Le,
    Ge,
    And,
    Or,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionLit {
    pub name: Option<String>,
    pub params: Vec<String>,
    pub body: Vec<JsStmt>,
}

/// A JavaScript statement.
#[derive(Debug, Clone, PartialEq)]
pub enum JsStmt {
    /// `var <name>;` or `var <name> = <expr>;` — the only declaration form
    /// the core emits (spec §4.1: `emit` always uses `var`).
    VarDecl(String, Option<JsExpr>),
    Expr(JsExpr),
    If(JsExpr, Vec<JsStmt>, Vec<JsStmt>),
    Switch(JsExpr, Vec<SwitchCase>),
    While(JsExpr, Vec<JsStmt>),
    For {
        init: Option<Box<JsStmt>>,
        cond: Option<JsExpr>,
        update: Option<JsExpr>,
        body: Vec<JsStmt>,
    },
    ForIn(Box<JsStmt>, JsExpr, Vec<JsStmt>),
    Label(String, Box<JsStmt>),
    Break(Option<String>),
    Try {
        block: Vec<JsStmt>,
        catch: Option<(Option<String>, Vec<JsStmt>)>,
        finally: Option<Vec<JsStmt>>,
    },
    Throw(JsExpr),
    Return(Option<JsExpr>),
    FunctionDecl(FunctionLit),
    /// A `progn`: a nested statement sequence with no block scoping of its
    /// own (the core never emits JS block scopes; `var` is always function-
    /// scoped, matching the source language's compilation model).
    Seq(Vec<JsStmt>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SwitchCase {
    Case(JsExpr, Vec<JsStmt>),
    Default(Vec<JsStmt>),
}

impl JsExpr {
    pub fn call(callee: JsExpr, args: Vec<JsExpr>) -> Self {
        JsExpr::Call(Box::new(callee), args)
    }

    pub fn method_call(receiver: JsExpr, method: impl Into<String>, args: Vec<JsExpr>) -> Self {
        JsExpr::MethodCall(Box::new(receiver), method.into(), args)
    }

    pub fn property(receiver: JsExpr, name: impl Into<String>) -> Self {
        JsExpr::Property(Box::new(receiver), name.into())
    }

    pub fn assign(target: JsExpr, value: JsExpr) -> Self {
        JsExpr::Assign(Box::new(target), Box::new(value))
    }

    pub fn binary(op: BinOp, lhs: JsExpr, rhs: JsExpr) -> Self {
        JsExpr::Binary(op, Box::new(lhs), Box::new(rhs))
    }

    pub fn ident(name: impl Into<String>) -> Self {
        JsExpr::Ident(name.into())
    }
}
