//! Names the core's emitted code presumes exist on an `internals` namespace
//! object at run time (spec §6 "Runtime symbol table"). The core never
//! implements these — it only ever refers to them by name when building
//! [`crate::jsast::JsExpr`] trees.

/// One runtime helper or constructor the emitted code may call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeFn {
    Symbol,
    Intern,
    QiList,
    MakeLispString,
    LispToJs,
    JsToLisp,
    Xstring,
    CheckArgs,
    CheckArgsAtLeast,
    CheckArgsAtMost,
    ForceMv,
    Pv,
    Mv,
    Values,
    SymbolFunction,
    CharToCodepoint,
    CharFromCodepoint,
    SafeCharUpcase,
    SafeCharDowncase,
    HandledDivision,
    WithDynamicBindings,
    IsNlx,
    GlobalEval,
    BlockNlx,
    CatchNlx,
    TagNlx,
    /// `set(symbol, value)` — assigns a special/global variable's value slot
    /// (spec §4.6 `setq`, "else call the runtime `set(symbol, value)`").
    /// Not named in spec §6's runtime table, but implied by that `setq`
    /// entry; added here as the symmetric counterpart of `SymbolFunction`
    /// already in the table (see DESIGN.md).
    Set,
    /// `symbolValue(symbol)` — reads the same slot `Set` writes; the
    /// runtime counterpart `(symbol-value 'sym)` compiles through (spec
    /// §4.9 "convert_symbol"). Same provenance note as `Set`.
    SymbolValue,
}

impl RuntimeFn {
    pub fn name(self) -> &'static str {
        use RuntimeFn::*;
        match self {
            Symbol => "Symbol",
            Intern => "intern",
            QiList => "QIList",
            MakeLispString => "make_lisp_string",
            LispToJs => "lisp_to_js",
            JsToLisp => "js_to_lisp",
            Xstring => "xstring",
            CheckArgs => "checkArgs",
            CheckArgsAtLeast => "checkArgsAtLeast",
            CheckArgsAtMost => "checkArgsAtMost",
            ForceMv => "forcemv",
            Pv => "pv",
            Mv => "mv",
            Values => "values",
            SymbolFunction => "symbolFunction",
            CharToCodepoint => "char_to_codepoint",
            CharFromCodepoint => "char_from_codepoint",
            SafeCharUpcase => "safe_char_upcase",
            SafeCharDowncase => "safe_char_downcase",
            HandledDivision => "handled_division",
            WithDynamicBindings => "withDynamicBindings",
            IsNlx => "isNLX",
            GlobalEval => "globalEval",
            BlockNlx => "BlockNLX",
            CatchNlx => "CatchNLX",
            TagNlx => "TagNLX",
            Set => "set",
            SymbolValue => "symbolValue",
        }
    }

    /// `internals.<name>` as a JS expression.
    pub fn expr(self) -> crate::jsast::JsExpr {
        crate::jsast::JsExpr::property(crate::jsast::JsExpr::ident("internals"), self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_match_the_contract() {
        assert_eq!(RuntimeFn::CheckArgs.name(), "checkArgs");
        assert_eq!(RuntimeFn::BlockNlx.name(), "BlockNLX");
    }
}
