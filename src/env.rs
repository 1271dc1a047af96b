//! This module implements the compiler's lexical environment.
//!
//! Four namespaces — variable, function, block, gotag — each an
//! innermost-first singly linked list of bindings (spec §3 "Lexical
//! environment"). Lookup is first-match per namespace; namespaces never
//! shadow each other. Extending an environment is non-destructive: it
//! produces a new environment that shares the tail of every namespace it
//! didn't touch, so an outer binding reference taken before the extension
//! keeps seeing the old chain. The only destructive mutation is building up
//! a scratch environment (via [`Env::scratch`]/[`Env::push_mut`]) before it
//! is installed as the environment for a body — e.g. `labels`, where
//! function bindings must be visible to each other's definitions before any
//! of them compile.

use crate::symbol::Symbol;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Variable,
    Function,
    Block,
    GoTag,
}

bitflags::bitflags! {
    /// Declaration flags attached to a binding (spec §3 "Declarations flags").
    pub struct DeclFlags: u8 {
        const SPECIAL        = 0b0000_0001;
        const CONSTANT       = 0b0000_0010;
        const NOTINLINE      = 0b0000_0100;
        const USED           = 0b0000_1000;
        const MULTIPLE_VALUE = 0b0001_0000;
    }
}

/// The runtime-slot payload of a binding; meaning depends on `Namespace`
/// (spec §3 "Binding").
#[derive(Debug, Clone)]
pub enum BindingValue {
    /// variable/function namespaces: the JS identifier holding the slot.
    JsIdent(String),
    /// function namespace, macro: a source lambda form or, once compiled,
    /// nothing the environment itself needs to know about — callers hold the
    /// compiled callable elsewhere and only use this binding to recognize
    /// "this name is a macro".
    MacroExpander(crate::sexpr::Sexpr),
    /// variable namespace, symbol-macro: the expansion form.
    SymbolMacro(crate::sexpr::Sexpr),
    /// block namespace: the JS identifier holding the sentinel array.
    BlockSentinel(String),
    /// gotag namespace: (tagbody id variable, tag index).
    GoTag(String, u32),
}

#[derive(Debug, Clone)]
pub struct Binding {
    pub name: Symbol,
    pub value: BindingValue,
    pub flags: DeclFlags,
}

impl Binding {
    pub fn variable(name: Symbol, js_ident: impl Into<String>) -> Self {
        Binding {
            name,
            value: BindingValue::JsIdent(js_ident.into()),
            flags: DeclFlags::empty(),
        }
    }

    pub fn function(name: Symbol, js_ident: impl Into<String>) -> Self {
        Binding {
            name,
            value: BindingValue::JsIdent(js_ident.into()),
            flags: DeclFlags::empty(),
        }
    }

    pub fn block(name: Symbol, sentinel: impl Into<String>) -> Self {
        Binding {
            name,
            value: BindingValue::BlockSentinel(sentinel.into()),
            flags: DeclFlags::empty(),
        }
    }

    pub fn go_tag(name: Symbol, tbidx_var: impl Into<String>, index: u32) -> Self {
        Binding {
            name,
            value: BindingValue::GoTag(tbidx_var.into(), index),
            flags: DeclFlags::empty(),
        }
    }

    /// function namespace, macro: `expander` is the macro's source lambda
    /// form (spec §3 "Binding", macro value meaning).
    pub fn macro_function(name: Symbol, expander: crate::sexpr::Sexpr) -> Self {
        Binding {
            name,
            value: BindingValue::MacroExpander(expander),
            flags: DeclFlags::empty(),
        }
    }

    /// variable namespace, symbol-macro: `expansion` is the form the macro
    /// expands to.
    pub fn symbol_macro(name: Symbol, expansion: crate::sexpr::Sexpr) -> Self {
        Binding {
            name,
            value: BindingValue::SymbolMacro(expansion),
            flags: DeclFlags::empty(),
        }
    }
}

type Chain = Option<Rc<ChainNode>>;

#[derive(Debug)]
struct ChainNode {
    binding: Binding,
    next: Chain,
}

/// An immutable, structurally shared lexical environment.
#[derive(Debug, Clone)]
pub struct Env {
    variable: Chain,
    function: Chain,
    block: Chain,
    gotag: Chain,
}

impl Env {
    pub fn empty() -> Self {
        Env {
            variable: None,
            function: None,
            block: None,
            gotag: None,
        }
    }

    fn chain(&self, ns: Namespace) -> &Chain {
        match ns {
            Namespace::Variable => &self.variable,
            Namespace::Function => &self.function,
            Namespace::Block => &self.block,
            Namespace::GoTag => &self.gotag,
        }
    }

    fn chain_mut(&mut self, ns: Namespace) -> &mut Chain {
        match ns {
            Namespace::Variable => &mut self.variable,
            Namespace::Function => &mut self.function,
            Namespace::Block => &mut self.block,
            Namespace::GoTag => &mut self.gotag,
        }
    }

    /// First-match lookup, innermost binding first.
    pub fn lookup(&self, name: &Symbol, ns: Namespace) -> Option<&Binding> {
        let mut node = self.chain(ns).as_deref();
        while let Some(n) = node {
            if &n.binding.name == name {
                return Some(&n.binding);
            }
            node = n.next.as_deref();
        }
        None
    }

    /// Non-destructively extends `self` with `bindings` in `ns`, innermost
    /// last (so `bindings[0]` ends up shadowed by `bindings[1]`, etc., as if
    /// each had been pushed in order). Does not mutate `self`: a lookup
    /// against `self` after this call still misses the new bindings.
    #[must_use]
    pub fn extend(&self, bindings: impl IntoIterator<Item = Binding>, ns: Namespace) -> Self {
        let mut out = self.clone();
        for binding in bindings {
            let next = out.chain(ns).clone();
            *out.chain_mut(ns) = Some(Rc::new(ChainNode { binding, next }));
        }
        out
    }

    #[must_use]
    pub fn extend_one(&self, binding: Binding, ns: Namespace) -> Self {
        self.extend(std::iter::once(binding), ns)
    }

    /// Destructively pushes a binding onto a scratch environment under
    /// construction. Only ever called on an environment not yet shared with
    /// any in-flight lookup (spec §4.2).
    pub fn push_mut(&mut self, binding: Binding, ns: Namespace) {
        let next = self.chain(ns).clone();
        *self.chain_mut(ns) = Some(Rc::new(ChainNode { binding, next }));
    }

    /// Marks the innermost binding matching `name` in `ns` as used. Lookup
    /// returns a `&Binding`, which can't be mutated through a shared `Rc`
    /// chain; callers needing this (e.g. `return-from` recording that a
    /// block was actually exited through) go through this helper, which
    /// rebuilds just the spine above the hit with the flag set.
    #[must_use]
    pub fn mark_used(&self, name: &Symbol, ns: Namespace) -> Self {
        fn rebuild(node: &Chain, name: &Symbol) -> Chain {
            match node {
                None => None,
                Some(n) => {
                    if &n.binding.name == name {
                        let mut binding = n.binding.clone();
                        binding.flags |= DeclFlags::USED;
                        Some(Rc::new(ChainNode {
                            binding,
                            next: n.next.clone(),
                        }))
                    } else {
                        let next = rebuild(&n.next, name);
                        Some(Rc::new(ChainNode {
                            binding: n.binding.clone(),
                            next,
                        }))
                    }
                }
            }
        }
        let mut out = self.clone();
        *out.chain_mut(ns) = rebuild(self.chain(ns), name);
        out
    }
}

impl Default for Env {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::Symbol;

    fn sym(name: &str) -> Symbol {
        Symbol::interned(name, "CL-USER")
    }

    #[test]
    fn extend_does_not_mutate_the_original() {
        let outer = Env::empty();
        let inner = outer.extend_one(Binding::variable(sym("X"), "v1"), Namespace::Variable);
        assert!(outer.lookup(&sym("X"), Namespace::Variable).is_none());
        assert!(inner.lookup(&sym("X"), Namespace::Variable).is_some());
    }

    #[test]
    fn shadowing_is_innermost_first() {
        let env = Env::empty()
            .extend_one(Binding::variable(sym("X"), "v1"), Namespace::Variable)
            .extend_one(Binding::variable(sym("X"), "v2"), Namespace::Variable);
        let found = env.lookup(&sym("X"), Namespace::Variable).unwrap();
        match &found.value {
            BindingValue::JsIdent(id) => assert_eq!(id, "v2"),
            _ => panic!("expected JsIdent"),
        }
    }

    #[test]
    fn namespaces_do_not_collide() {
        let env = Env::empty().extend_one(Binding::variable(sym("X"), "v1"), Namespace::Variable);
        assert!(env.lookup(&sym("X"), Namespace::Function).is_none());
    }

    #[test]
    fn mark_used_preserves_the_rest_of_the_chain() {
        let env = Env::empty()
            .extend_one(Binding::block(sym("OUTER"), "b1"), Namespace::Block)
            .extend_one(Binding::block(sym("INNER"), "b2"), Namespace::Block);
        let marked = env.mark_used(&sym("INNER"), Namespace::Block);
        assert!(marked
            .lookup(&sym("INNER"), Namespace::Block)
            .unwrap()
            .flags
            .contains(DeclFlags::USED));
        assert!(marked
            .lookup(&sym("OUTER"), Namespace::Block)
            .unwrap()
            .flags
            .is_empty());
    }
}
