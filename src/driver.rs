//! The driver: `convert`, its dispatch step, and the toplevel entry points
//! (spec §4.9). `convert` is the only seam other modules call back into —
//! `literal.rs`'s magic-unquote handling and `lambda_list.rs`'s default-value
//! compilation both forward-reference [`Compiler::convert`], defined here.
//!
//! Grounded on the teacher's own top-level dispatch, `ByteCompiler::compile_expr`
//! in `bytecompiler.rs`: one big match over node shape, recursing into
//! sub-exprs, delegating to per-construct compile methods kept in sibling
//! `impl` blocks across files.

use crate::compiler::Compiler;
use crate::env::{BindingValue, Namespace};
use crate::error::CompileResult;
use crate::jsast::{JsExpr, JsStmt};
use crate::macroexpand::MacroExpander;
use crate::sexpr::Sexpr;
use crate::special_forms::SpecialForm;
use crate::builtins::Builtin;
use crate::symbol::Symbol;
use crate::target::{Out, Target};

impl<M: MacroExpander> Compiler<M> {
    /// `convert(sexp, out)` (spec §4.9). The multiple-value flag is read off
    /// `self.multiple_value` rather than taken as a parameter; callers that
    /// need a different flag for a subform use [`Compiler::with_multiple_value`].
    pub fn convert(&mut self, form: &Sexpr, out: Out) -> CompileResult<Option<String>> {
        let form = self.macroexpand_fixpoint(form)?;
        match &form {
            Sexpr::Symbol(sym) => self.convert_symbol(&sym.clone(), out),
            Sexpr::Nil | Sexpr::Int(_) | Sexpr::Float(_) | Sexpr::Char(_) | Sexpr::Str(_) | Sexpr::Array(_) => {
                let expr = self.literal(&form, false)?;
                Ok(self.emit(expr, out))
            }
            Sexpr::Cons(_) => self.convert_cons(&form, out),
        }
    }

    fn macroexpand_fixpoint(&mut self, form: &Sexpr) -> CompileResult<Sexpr> {
        let mut current = form.clone();
        loop {
            let (expanded, did_expand) = self.macros.macroexpand_1(&current, &self.env);
            if !did_expand {
                return Ok(current);
            }
            current = expanded;
        }
    }

    fn convert_symbol(&mut self, sym: &Symbol, out: Out) -> CompileResult<Option<String>> {
        if !self.is_special(sym) {
            if let Some(binding) = self.env.lookup(sym, Namespace::Variable) {
                match &binding.value {
                    BindingValue::JsIdent(id) => {
                        let id = id.clone();
                        return Ok(self.emit(JsExpr::ident(id), out));
                    }
                    BindingValue::SymbolMacro(expansion) => {
                        let expansion = expansion.clone();
                        return self.convert(&expansion, out);
                    }
                    _ => {}
                }
            }
        }
        if sym.is_keyword() {
            let expr = self.literal(&Sexpr::Symbol(sym.clone()), false)?;
            return Ok(self.emit(expr, out));
        }
        // Global or special: compile as if the source had written
        // `(symbol-value 'sym)` (spec §4.9).
        let standard = self.options.standard_package.clone();
        let quoted = Sexpr::list(vec![
            Sexpr::Symbol(Symbol::interned("SYMBOL-VALUE", standard.clone())),
            Sexpr::list(vec![
                Sexpr::Symbol(Symbol::interned("QUOTE", standard)),
                Sexpr::Symbol(sym.clone()),
            ]),
        ]);
        self.convert(&quoted, out)
    }

    fn convert_cons(&mut self, form: &Sexpr, out: Out) -> CompileResult<Option<String>> {
        let cons = form.as_cons().expect("convert_cons called on a non-cons");
        let head = cons.car.as_symbol();
        let args = cons.cdr.clone();

        if let Some(head) = head {
            if let Some(special) = SpecialForm::from_name(head.name()) {
                return self.compile_special_form(special, &args, out);
            }
            if self.env.lookup(head, Namespace::Function).is_none() && !self.is_notinline(head) {
                if let Some(builtin) = Builtin::from_name(head.name()) {
                    return self.compile_builtin(builtin, &args, out);
                }
            }
        }
        self.compile_funcall(form, out)
    }

    /// `convert-toplevel` (spec §4.9): flattens a leading `progn`, compiling
    /// every form but the last for effect, and the last either for effect or
    /// (when `return_p`) as a terminal `return`.
    pub fn convert_toplevel(&mut self, form: &Sexpr, return_p: bool) -> CompileResult<()> {
        let forms = flatten_toplevel_progn(form);
        let Some((last, init)) = forms.split_last() else {
            return Ok(());
        };
        for f in init {
            self.convert(f, Out::Discard)?;
        }
        if return_p {
            let id = self.convert(last, Out::Fresh)?;
            self.target
                .push(JsStmt::Return(id.map(JsExpr::ident)));
        } else {
            self.convert(last, Out::Discard)?;
        }
        Ok(())
    }

    /// `process-toplevel` (spec §4.9): compiles `form` with a fresh
    /// toplevel-compilations buffer, returning literal initializers followed
    /// by the compiled code — conceptually one `progn`.
    pub fn process_toplevel(&mut self, form: &Sexpr) -> CompileResult<Vec<JsStmt>> {
        let outer_toplevel = std::mem::replace(&mut self.toplevel, Target::new());
        let (code, result) = self.let_target(|c| c.convert_toplevel(form, false));
        let literals = std::mem::replace(&mut self.toplevel, outer_toplevel).into_statements();
        result?;
        let mut all = literals;
        all.extend(code);
        Ok(all)
    }
}

fn flatten_toplevel_progn(form: &Sexpr) -> Vec<Sexpr> {
    if let Some(cons) = form.as_cons() {
        if let Some(head) = cons.car.as_symbol() {
            if head.name() == "PROGN" {
                if let Ok(rest) = cons.cdr.to_vec() {
                    return rest;
                }
            }
        }
    }
    vec![form.clone()]
}
