//! The literal dumper (spec §4.4): turns a source form into a JS expression
//! that evaluates, at run time, to a value structurally/referentially equal
//! to that form — reusing one JS variable per distinct form so sharing
//! survives the round trip (spec §3 "Literal table" invariant).
//!
//! Grounded on the teacher's literal/constant pool in `bytecompiler.rs`
//! (`Literal`, `literals_map`, `get_or_insert_literal`): there, a `Literal`
//! (string or bigint) is looked up in an `FxHashMap`, and on a miss gets a
//! fresh index into `code_block.literals`. The dumper here generalizes that
//! one step further — the "pool slot" is itself a JS statement appended to
//! the toplevel buffer, because unlike a bytecode constant pool, emitted JS
//! source needs the literal's *construction* spelled out as code, not just
//! a table entry.

use crate::compiler::Compiler;
use crate::error::CompileResult;
use crate::jsast::JsExpr;
use crate::macroexpand::MacroExpander;
use crate::runtime::RuntimeFn;
use crate::sexpr::Sexpr;
use crate::target::Out;

impl<M: MacroExpander> Compiler<M> {
    /// A fresh, globally unique symbol recognized only by `Rc` identity —
    /// the "magic unquote" marker (spec GLOSSARY). Wrapping a code form as
    /// `(magic-unquote-marker code-form)` and handing the two-element list
    /// to [`Compiler::literal`] is how a caller re-enters `convert` during
    /// literal dumping.
    pub fn magic_unquote_marker(&self) -> crate::symbol::Symbol {
        crate::symbol::Symbol::uninterned("%JS-UNQUOTE")
    }

    pub fn make_magic_unquote(&self, code: Sexpr) -> Sexpr {
        Sexpr::list(vec![Sexpr::Symbol(self.magic_unquote_marker()), code])
    }

    /// `literal(form, recursive) -> JS expression` (spec §4.4).
    pub fn literal(&mut self, form: &Sexpr, recursive: bool) -> CompileResult<JsExpr> {
        if let Some(code) = self.as_magic_unquote(form) {
            let id = self.with_toplevel_as_target(|c| c.convert(&code, Out::Fresh))?;
            return Ok(match id {
                Some(id) => JsExpr::ident(id),
                None => JsExpr::Undefined,
            });
        }

        let result = match form {
            Sexpr::Int(i) => JsExpr::Int(*i),
            Sexpr::Float(f) => JsExpr::Float(*f),
            Sexpr::Char(c) => JsExpr::Str(c.to_string()),
            Sexpr::Nil => self.dump_cacheable(form, |_| {
                Ok(RuntimeFn::Intern
                    .expr()
                    .call1(JsExpr::Str("NIL".to_string())))
            })?,
            Sexpr::Str(s) => self.dump_cacheable(form, |_| {
                Ok(RuntimeFn::MakeLispString
                    .expr()
                    .call1(JsExpr::Str(s.to_string())))
            })?,
            Sexpr::Symbol(sym) => {
                let sym = sym.clone();
                let keyword = sym.is_keyword();
                let expr = self.dump_cacheable(form, |c| Ok(c.dump_symbol(&sym)))?;
                if keyword {
                    if let JsExpr::Ident(id) = &expr {
                        self.push_toplevel(crate::jsast::JsStmt::Expr(JsExpr::assign(
                            JsExpr::property(JsExpr::ident(id), "value"),
                            JsExpr::ident(id),
                        )));
                    }
                }
                expr
            }
            Sexpr::Cons(_) => self.dump_cacheable(form, |c| c.dump_cons(form))?,
            Sexpr::Array(items) => self.dump_cacheable(form, |c| {
                let mut elems = Vec::with_capacity(items.len());
                for item in items.iter() {
                    elems.push(c.literal(item, true)?);
                }
                Ok(JsExpr::Array(elems))
            })?,
        };
        let _ = recursive;
        Ok(result)
    }

    fn as_magic_unquote(&self, form: &Sexpr) -> Option<Sexpr> {
        let cons = form.as_cons()?;
        let head = cons.car.as_symbol()?;
        if head.name() == "%JS-UNQUOTE" && head.is_uninterned() {
            let rest = cons.cdr.as_cons()?;
            Some(rest.car.clone())
        } else {
            None
        }
    }

    fn dump_symbol(&mut self, sym: &crate::symbol::Symbol) -> JsExpr {
        if sym.is_uninterned() {
            return RuntimeFn::Symbol
                .expr()
                .new1(JsExpr::Str(sym.name().to_string()));
        }
        let home = sym.package() == Some(self.options.home_package.as_str());
        let standard = sym.package() == Some(self.options.standard_package.as_str());
        if home || standard {
            RuntimeFn::Intern
                .expr()
                .call1(JsExpr::Str(sym.name().to_string()))
        } else {
            let package = sym.package().unwrap_or("").to_string();
            RuntimeFn::Intern.expr().call(vec![
                JsExpr::Str(sym.name().to_string()),
                JsExpr::Str(package),
            ])
        }
    }

    fn dump_cons(&mut self, form: &Sexpr) -> CompileResult<JsExpr> {
        let mut elems = Vec::new();
        let mut cur = form;
        loop {
            match cur {
                Sexpr::Cons(c) if matches!(c.cdr, Sexpr::Cons(_)) => {
                    elems.push(self.literal(&c.car, true)?);
                    cur = &c.cdr;
                }
                Sexpr::Cons(c) => {
                    elems.push(self.literal(&c.car, true)?);
                    let last_cdr = self.literal(&c.cdr, true)?;
                    elems.push(last_cdr);
                    break;
                }
                _ => unreachable!("dump_cons called on a non-cons"),
            }
        }
        Ok(RuntimeFn::QiList.expr().call(elems))
    }

    /// Shared plumbing for every literal kind that participates in the
    /// literal table (strings, symbols, conses, arrays): look up by identity
    /// first, and on a miss, cache the fresh identifier *before* calling
    /// `build` so recursive sub-structure can't re-enter the same entry.
    ///
    /// Diverges slightly from spec §4.4's "for non-recursive calls or
    /// symbols" wording: this always caches and emits a toplevel `var`, even
    /// for recursive (nested) occurrences, which is the only way to keep the
    /// sharing invariant for conses/arrays that first appear nested inside a
    /// larger quoted structure and get referenced again elsewhere (see
    /// DESIGN.md).
    fn dump_cacheable(
        &mut self,
        form: &Sexpr,
        build: impl FnOnce(&mut Self) -> CompileResult<JsExpr>,
    ) -> CompileResult<JsExpr> {
        let key = form.identity_key();
        if let Some(id) = self.literals.get(&key) {
            return Ok(JsExpr::ident(id.clone()));
        }
        let id = self.namegen.fresh_literal();
        self.literals.insert(key, id.clone());
        let value = build(self)?;
        self.push_toplevel(crate::jsast::JsStmt::VarDecl(id.clone(), Some(value)));
        Ok(JsExpr::ident(id))
    }
}

impl JsExpr {
    fn call1(self, arg: JsExpr) -> JsExpr {
        JsExpr::call(self, vec![arg])
    }

    fn new1(self, arg: JsExpr) -> JsExpr {
        JsExpr::New(Box::new(self), vec![arg])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::macroexpand::NoMacros;
    use crate::symbol::Symbol;

    fn compiler() -> Compiler<NoMacros> {
        Compiler::new(NoMacros, Default::default())
    }

    #[test]
    fn same_symbol_dumps_to_the_same_identifier_twice() {
        let mut c = compiler();
        let form = Sexpr::Symbol(Symbol::interned("FOO", "CL-USER"));
        let a = c.literal(&form, false).unwrap();
        let b = c.literal(&form, false).unwrap();
        assert_eq!(a, b);
        assert_eq!(c.toplevel.statements().len(), 1);
    }

    #[test]
    fn shared_cons_dumps_once() {
        let mut c = compiler();
        let shared = Sexpr::cons(Sexpr::Int(1), Sexpr::Nil);
        let wrapper = Sexpr::cons(shared.clone(), shared);
        let _ = c.literal(&wrapper, false).unwrap();
        // one entry for the shared inner cons, one for the outer, one for NIL.
        assert_eq!(c.literals.len(), 3);
    }

    #[test]
    fn keyword_symbol_gets_a_self_reference() {
        let mut c = compiler();
        let form = Sexpr::Symbol(Symbol::keyword("FOO"));
        let _ = c.literal(&form, false).unwrap();
        assert_eq!(c.toplevel.statements().len(), 2);
    }

    #[test]
    fn integers_do_not_touch_the_literal_table() {
        let mut c = compiler();
        let _ = c.literal(&Sexpr::Int(42), false).unwrap();
        assert!(c.literals.is_empty());
        assert!(c.toplevel.statements().is_empty());
    }
}
