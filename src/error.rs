//! Compile-time errors (spec §7, first table).
//!
//! Run-time errors (argument-count mismatches, division by zero, …) are not
//! represented here at all — they are JS code the core *emits*, to be raised
//! by the runtime when the compiled program executes.

use std::fmt;

/// Where inside a form an error was raised, for display purposes only.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    pub form: Option<String>,
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.form {
            Some(form) => write!(f, " in {}", form),
            None => Ok(()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("bad lambda list{ctx}: {reason}")]
    BadLambdaList { reason: String, ctx: ErrorContext },

    #[error("bad function designator{ctx}")]
    BadFunctionDesignator { ctx: ErrorContext },

    #[error("odd number of forms in setq{ctx}")]
    OddSetq { ctx: ErrorContext },

    #[error("unknown tag `{tag}` in go{ctx}")]
    UnknownGoTag { tag: String, ctx: ErrorContext },

    #[error("return-from refers to unknown block `{name}`{ctx}")]
    UnknownBlock { name: String, ctx: ErrorContext },

    #[error("malformed %js-try clause{ctx}: {reason}")]
    MalformedJsTry { reason: String, ctx: ErrorContext },

    #[error("expected a symbol{ctx}, found something else")]
    ExpectedSymbol { ctx: ErrorContext },

    #[error("{0}")]
    Other(String),
}

impl CompileError {
    pub fn bad_lambda_list(reason: impl Into<String>) -> Self {
        CompileError::BadLambdaList {
            reason: reason.into(),
            ctx: ErrorContext::default(),
        }
    }
}

pub type CompileResult<T> = Result<T, CompileError>;
