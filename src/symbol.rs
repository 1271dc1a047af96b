//! Source-language symbols.
//!
//! A symbol carries a print name and an optional home package. Two symbols
//! are equal iff their name and package match, except uninterned symbols
//! (gensyms), which are equal only to themselves by identity — matching the
//! data model in spec §3.

use std::rc::Rc;

/// A single interned (or uninterned) Lisp symbol.
///
/// Cloning a `Symbol` is cheap: name and package are reference-counted.
#[derive(Debug, Clone)]
pub struct Symbol {
    name: Rc<str>,
    package: Option<Rc<str>>,
    /// `Some` only for uninterned (gensym) symbols. Shared by every clone of
    /// the same gensym, so identity survives cloning; distinct allocations
    /// never compare equal even if the print name matches.
    identity: Option<Rc<()>>,
}

impl Symbol {
    /// Builds an interned symbol belonging to `package` (`None` means the
    /// keyword/no-package case is handled by the caller via [`Symbol::keyword`]).
    pub fn interned(name: impl Into<Rc<str>>, package: impl Into<Rc<str>>) -> Self {
        Self {
            name: name.into(),
            package: Some(package.into()),
            identity: None,
        }
    }

    /// Builds a keyword symbol (self-evaluating, package `"KEYWORD"`).
    pub fn keyword(name: impl Into<Rc<str>>) -> Self {
        Self::interned(name, "KEYWORD")
    }

    /// Builds a fresh uninterned symbol (gensym). No two calls ever produce
    /// symbols that compare equal, even with the same `name`.
    pub fn uninterned(name: impl Into<Rc<str>>) -> Self {
        Self {
            name: name.into(),
            package: None,
            identity: Some(Rc::new(())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn package(&self) -> Option<&str> {
        self.package.as_deref()
    }

    pub fn is_uninterned(&self) -> bool {
        self.identity.is_some()
    }

    pub fn is_keyword(&self) -> bool {
        self.package.as_deref() == Some("KEYWORD")
    }

    /// Identity key suitable for the literal table and hash maps: uninterned
    /// symbols key off their allocation, interned symbols key off name+package
    /// value.
    pub(crate) fn identity_key(&self) -> SymbolKey {
        match &self.identity {
            Some(id) => SymbolKey::Gensym(Rc::as_ptr(id) as usize),
            None => SymbolKey::Interned(self.name.clone(), self.package.clone()),
        }
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        match (&self.identity, &other.identity) {
            (Some(a), Some(b)) => Rc::ptr_eq(a, b),
            (None, None) => self.name == other.name && self.package == other.package,
            _ => false,
        }
    }
}

impl Eq for Symbol {}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum SymbolKey {
    Interned(Rc<str>, Option<Rc<str>>),
    Gensym(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interned_symbols_compare_by_name_and_package() {
        let a = Symbol::interned("FOO", "CL-USER");
        let b = Symbol::interned("FOO", "CL-USER");
        assert_eq!(a, b);
        assert_ne!(a, Symbol::interned("FOO", "KEYWORD"));
    }

    #[test]
    fn uninterned_symbols_are_never_equal_to_each_other() {
        let a = Symbol::uninterned("G");
        let b = Symbol::uninterned("G");
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn keyword_symbol_is_recognized() {
        assert!(Symbol::keyword("FOO").is_keyword());
        assert!(!Symbol::interned("FOO", "CL-USER").is_keyword());
    }
}
