//! Function call compilation (spec §4.8) — reached only once `convert_cons`
//! has ruled out a special form and an inlinable builtin for the call's
//! head.
//!
//! Grounded on the teacher's `compile_call`/`compile_call_with_spread` in
//! `bytecompiler.rs`: callee and arguments are both compiled first (to
//! concrete JS identifiers), then a single `Call`/`MethodCall` node is
//! emitted — no inlining or reordering. Four shapes of `f`, matching spec
//! §4.8 exactly:
//! - lexically bound (`flet`/`labels`): direct call on the stored slot;
//! - bare symbol, otherwise: `symbolLiteral.fvalue(marker, args…)` — the
//!   function cell lives as a property directly on the interned `Symbol`
//!   object, the same way a self-evaluating keyword's `.value` property
//!   works (`literal.rs`);
//! - `(lambda …)`: compiled like any other lambda expression, then called;
//! - `(oget obj key…)`: an FFI call — property-chain to the method, each
//!   argument coerced with `internals.lisp_to_js`, the result coerced back
//!   with `internals.js_to_lisp`, and *no* values-marker (the callee is a
//!   plain JS function, not one this compiler produced). This drops the
//!   receiver as `this`, the same way detaching a JS method from its object
//!   before calling it would (see DESIGN.md).
//!
//! Anything else in operator position is `CompileError::BadFunctionDesignator`
//! (spec §4.8 "Otherwise fail").

use crate::compiler::Compiler;
use crate::env::{BindingValue, Namespace};
use crate::error::{CompileError, CompileResult, ErrorContext};
use crate::jsast::JsExpr;
use crate::macroexpand::MacroExpander;
use crate::runtime::RuntimeFn;
use crate::sexpr::{Cons, Sexpr};
use crate::target::{ident_or_undefined, Out};

fn improper_list() -> CompileError {
    CompileError::Other("improper argument list in call".to_string())
}

impl<M: MacroExpander> Compiler<M> {
    /// `form` is the whole call form (operator and arguments); the head has
    /// already failed to match a special form or an inlinable builtin.
    pub fn compile_funcall(&mut self, form: &Sexpr, out: Out) -> CompileResult<Option<String>> {
        let cons = form
            .as_cons()
            .ok_or_else(|| CompileError::BadFunctionDesignator { ctx: ErrorContext::default() })?;
        let marker = JsExpr::Bool(self.multiple_value);

        if let Some(sym) = cons.car.as_symbol() {
            if let Some(binding) = self.env.lookup(sym, Namespace::Function) {
                if let BindingValue::JsIdent(js_ident) = &binding.value {
                    let callee = JsExpr::ident(js_ident.clone());
                    let args = self.build_call_args(&cons.cdr, marker)?;
                    let expr = JsExpr::call(callee, args);
                    return Ok(self.emit(expr, out));
                }
            }
            self.mark_function_called(sym);
            let sym_literal = self.literal(&Sexpr::Symbol(sym.clone()), false)?;
            let args = self.build_call_args(&cons.cdr, marker)?;
            let expr = JsExpr::MethodCall(Box::new(sym_literal), "fvalue".to_string(), args);
            return Ok(self.emit(expr, out));
        }

        if let Some(inner) = cons.car.as_cons() {
            if let Some(head) = inner.car.as_symbol() {
                if head.name() == "LAMBDA" {
                    let callee_id = self.convert(&cons.car, Out::Fresh)?;
                    let callee = ident_or_undefined(callee_id);
                    let args = self.build_call_args(&cons.cdr, marker)?;
                    let expr = JsExpr::call(callee, args);
                    return Ok(self.emit(expr, out));
                }
                if head.name() == "OGET" {
                    return self.compile_oget_funcall(inner, &cons.cdr, out);
                }
            }
        }

        Err(CompileError::BadFunctionDesignator { ctx: ErrorContext::default() })
    }

    fn build_call_args(&mut self, args: &Sexpr, marker: JsExpr) -> CompileResult<Vec<JsExpr>> {
        let forms = args.to_vec().map_err(|_| improper_list())?;
        let mut exprs = Vec::with_capacity(forms.len() + 1);
        exprs.push(marker);
        self.with_multiple_value(false, |c| -> CompileResult<()> {
            for f in &forms {
                let id = c.convert(f, Out::Fresh)?;
                exprs.push(ident_or_undefined(id));
            }
            Ok(())
        })?;
        Ok(exprs)
    }

    /// `((oget obj key…) call-args…)`: property-chain to the callable (each
    /// key `lisp_to_js`-coerced before indexing), then an ordinary JS call
    /// with `lisp_to_js`-coerced arguments, the result `js_to_lisp`-coerced
    /// back (spec §4.8).
    fn compile_oget_funcall(
        &mut self,
        oget: &Cons,
        call_args: &Sexpr,
        out: Out,
    ) -> CompileResult<Option<String>> {
        let oget_forms = oget.cdr.to_vec().map_err(|_| improper_list())?;
        let mut oget_exprs = Vec::with_capacity(oget_forms.len());
        for f in &oget_forms {
            let id = self.convert(f, Out::Fresh)?;
            oget_exprs.push(ident_or_undefined(id));
        }
        let Some((recv, keys)) = oget_exprs.split_first() else {
            return Err(CompileError::BadFunctionDesignator { ctx: ErrorContext::default() });
        };
        let callee = keys.iter().fold(recv.clone(), |acc, key| {
            let key = JsExpr::call(RuntimeFn::LispToJs.expr(), vec![key.clone()]);
            JsExpr::Get(Box::new(acc), Box::new(key))
        });

        let call_forms = call_args.to_vec().map_err(|_| improper_list())?;
        let mut coerced = Vec::with_capacity(call_forms.len());
        self.with_multiple_value(false, |c| -> CompileResult<()> {
            for f in &call_forms {
                let id = c.convert(f, Out::Fresh)?;
                let raw = ident_or_undefined(id);
                coerced.push(JsExpr::call(RuntimeFn::LispToJs.expr(), vec![raw]));
            }
            Ok(())
        })?;

        let call_expr = JsExpr::call(callee, coerced);
        let result = JsExpr::call(RuntimeFn::JsToLisp.expr(), vec![call_expr]);
        Ok(self.emit(result, out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::CompilerOptions;
    use crate::env::Binding;
    use crate::jsast::JsStmt;
    use crate::macroexpand::NoMacros;
    use crate::symbol::Symbol;

    fn compiler() -> Compiler<NoMacros> {
        Compiler::new(NoMacros, CompilerOptions::default())
    }

    fn sym(name: &str) -> Symbol {
        Symbol::interned(name, "CL-USER")
    }

    #[test]
    fn lexically_bound_function_calls_its_stored_identifier_directly() {
        let mut c = compiler();
        c.env = c
            .env
            .extend_one(Binding::function(sym("F"), "f1"), Namespace::Function);
        let form = Sexpr::list(vec![Sexpr::Symbol(sym("F")), Sexpr::Int(1)]);
        let _ = c.convert(&form, Out::Fresh).unwrap();
        let calls_f1 = c.target.statements().iter().any(|s| matches!(
            s,
            JsStmt::Expr(JsExpr::Assign(_, rhs)) if matches!(&**rhs, JsExpr::Call(callee, _) if **callee == JsExpr::ident("f1"))
        ));
        assert!(calls_f1);
    }

    #[test]
    fn every_lexical_call_prepends_the_values_marker() {
        let mut c = compiler();
        c.env = c
            .env
            .extend_one(Binding::function(sym("F"), "f1"), Namespace::Function);
        let form = Sexpr::list(vec![Sexpr::Symbol(sym("F")), Sexpr::Int(1), Sexpr::Int(2)]);
        let _ = c.convert(&form, Out::Fresh).unwrap();
        let has_marker_first_arg = c.target.statements().iter().any(|s| matches!(
            s,
            JsStmt::Expr(JsExpr::Assign(_, rhs)) if matches!(&**rhs, JsExpr::Call(_, args) if matches!(args.first(), Some(JsExpr::Bool(false))))
        ));
        assert!(has_marker_first_arg);
    }

    #[test]
    fn unbound_global_function_dispatches_through_fvalue_method_call() {
        let mut c = compiler();
        let form = Sexpr::list(vec![Sexpr::Symbol(sym("UNDEFINED-FN")), Sexpr::Int(1)]);
        let _ = c.convert(&form, Out::Discard).unwrap();
        let calls_fvalue = c.target.statements().iter().any(|s| matches!(
            s,
            JsStmt::Expr(JsExpr::Assign(_, rhs)) if matches!(&**rhs, JsExpr::MethodCall(_, method, _) if method == "fvalue")
        ));
        assert!(calls_fvalue);
    }

    #[test]
    fn unbound_global_call_marks_the_function_as_called() {
        let mut c = compiler();
        let form = Sexpr::list(vec![Sexpr::Symbol(sym("SOME-FN"))]);
        let _ = c.convert(&form, Out::Discard).unwrap();
        assert!(c.function_info.contains_key(&sym("SOME-FN").identity_key()));
    }

    #[test]
    fn lambda_in_operator_position_compiles_and_calls_it() {
        let mut c = compiler();
        let lambda_form = Sexpr::list(vec![
            Sexpr::Symbol(sym("LAMBDA")),
            Sexpr::list(vec![Sexpr::Symbol(sym("X"))]),
            Sexpr::Symbol(sym("X")),
        ]);
        let form = Sexpr::list(vec![lambda_form, Sexpr::Int(1)]);
        assert!(c.convert(&form, Out::Fresh).is_ok());
    }

    #[test]
    fn oget_operator_position_coerces_args_and_the_result() {
        let mut c = compiler();
        let oget_form = Sexpr::list(vec![
            Sexpr::Symbol(sym("OGET")),
            Sexpr::Int(1),
            Sexpr::str("method"),
        ]);
        let form = Sexpr::list(vec![oget_form, Sexpr::Int(2)]);
        let _ = c.convert(&form, Out::Fresh).unwrap();
        let coerces_result = c.target.statements().iter().any(|s| matches!(
            s,
            JsStmt::Expr(JsExpr::Assign(_, rhs)) if matches!(&**rhs, JsExpr::Call(callee, _) if matches!(&**callee, JsExpr::Property(_, n) if n == "js_to_lisp"))
        ));
        assert!(coerces_result);
    }

    #[test]
    fn oget_call_does_not_prepend_a_values_marker() {
        let mut c = compiler();
        let oget_form = Sexpr::list(vec![Sexpr::Symbol(sym("OGET")), Sexpr::Int(1), Sexpr::str("m")]);
        let form = Sexpr::list(vec![oget_form, Sexpr::Int(2)]);
        let _ = c.convert(&form, Out::Discard).unwrap();
        let any_bare_bool_arg = c.target.statements().iter().any(|s| matches!(
            s,
            JsStmt::Expr(JsExpr::Call(_, args)) if args.iter().any(|a| matches!(a, JsExpr::Bool(_)))
        ));
        assert!(!any_bare_bool_arg);
    }

    #[test]
    fn bad_function_designator_on_a_non_cons_operator_is_an_error() {
        let mut c = compiler();
        let not_a_cons = Sexpr::Int(1);
        let err = c.compile_funcall(&not_a_cons, Out::Discard).unwrap_err();
        assert!(matches!(err, CompileError::BadFunctionDesignator { .. }));
    }

    #[test]
    fn arbitrary_computed_operator_is_a_bad_function_designator() {
        let mut c = compiler();
        // ((if x f g) 1) — neither a symbol, `(lambda ...)`, nor `(oget ...)`.
        let if_form = Sexpr::list(vec![
            Sexpr::Symbol(sym("IF")),
            Sexpr::Symbol(sym("X")),
            Sexpr::Symbol(sym("F")),
            Sexpr::Symbol(sym("G")),
        ]);
        let form = Sexpr::list(vec![if_form, Sexpr::Int(1)]);
        let err = c.convert(&form, Out::Discard).unwrap_err();
        assert!(matches!(err, CompileError::BadFunctionDesignator { .. }));
    }
}
