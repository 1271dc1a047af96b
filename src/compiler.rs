//! The compile context: every piece of state `convert` threads through a
//! compile step (spec §5 "Concurrency & Resource Model").
//!
//! The source re-architecture note in spec §9 asks for this process-wide
//! mutable state (environment, target, counters, flags) to become "a
//! **compile context** record threaded through every function" — this is
//! that record. `convert` and friends live in `driver.rs`; special-form and
//! builtin compilers in `special_forms.rs`/`builtins.rs`; all of them are
//! `impl Compiler` blocks over this struct, split across files the way the
//! teacher splits `ByteCompiler`'s behavior across `bytecompiler.rs` while
//! keeping one struct.

use crate::env::Env;
use crate::error::CompileResult;
use crate::jsast::JsStmt;
use crate::macroexpand::MacroExpander;
use crate::namegen::NameGen;
use crate::sexpr::SexprKey;
use crate::target::Target;
use rustc_hash::FxHashMap;
use std::collections::HashSet;

/// Knobs that don't change during a unit (spec "Open questions" + SPEC_FULL
/// ambient-stack "Configuration").
#[derive(Debug, Clone)]
pub struct CompilerOptions {
    /// The compiler's own home package; symbols in it dump via `intern(name)`
    /// with no package argument (spec §4.4).
    pub home_package: String,
    /// The bootstrap standard-symbols package, same treatment as
    /// `home_package` (spec §4.4, "bootstrap only").
    pub standard_package: String,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        CompilerOptions {
            home_package: "SYSTEM".to_string(),
            standard_package: "CL".to_string(),
        }
    }
}

/// `{defined?, called?}` per spec §3 "Function-info table".
#[derive(Debug, Clone, Copy, Default)]
pub struct FunctionInfo {
    pub defined: bool,
    pub called: bool,
}

/// The compile context threaded through every special-form/builtin
/// compiler. One `Compiler` is built per compilation unit; `finish_unit`
/// resets the parts of it (literal table, function-info table) whose
/// lifetime is scoped to the unit (spec §3 "Lifecycles").
#[derive(Debug)]
pub struct Compiler<M> {
    pub(crate) env: Env,
    /// Current target buffer. `let_target` saves and restores this field;
    /// see `target.rs` for why that's sufficient without a `Drop` guard.
    pub(crate) target: Target,
    /// The separate buffer literal initializers and magic-unquote code land
    /// in, emitted before the per-form code (spec §3 "Literal table", §4.9
    /// "process-toplevel").
    pub(crate) toplevel: Target,
    pub(crate) namegen: NameGen,
    pub(crate) literals: FxHashMap<SexprKey, String>,
    pub(crate) function_info: FxHashMap<crate::symbol::SymbolKey, (String, FunctionInfo)>,
    /// Whether the form currently being compiled is in multiple-value
    /// context (spec §4.9 "Multiple-value flag").
    pub(crate) multiple_value: bool,
    pub(crate) macros: M,
    pub(crate) options: CompilerOptions,
    /// Names of declared-special variables, consulted by `setq`/`let`/`let*`
    /// to decide lexical-slot-assignment vs. `withDynamicBindings` routing.
    pub(crate) specials: HashSet<crate::symbol::SymbolKey>,
    /// Names declared `notinline`, consulted by the driver before treating a
    /// call head as a builtin (spec §4.9 "else if a builtin and not declared
    /// notinline").
    pub(crate) notinline: HashSet<crate::symbol::SymbolKey>,
    /// Sentinel ids of blocks actually reached by a `return-from` (spec §4.6
    /// "If body used the block (binding marked), wrap in try/catch"). Kept
    /// out-of-band rather than as an env flag: `sf_return_from` runs inside
    /// whatever nested `let`/`let*`/`tagbody`/etc. restores `self.env` to its
    /// saved snapshot on exit, which would silently drop a `mark_used` done
    /// against the live env before that restore.
    pub(crate) used_blocks: HashSet<String>,
}

impl<M: MacroExpander> Compiler<M> {
    pub fn new(macros: M, options: CompilerOptions) -> Self {
        Compiler {
            env: Env::empty(),
            target: Target::new(),
            toplevel: Target::new(),
            namegen: NameGen::new(),
            literals: FxHashMap::default(),
            function_info: FxHashMap::default(),
            multiple_value: false,
            macros,
            options,
            specials: HashSet::default(),
            notinline: HashSet::default(),
            used_blocks: HashSet::default(),
        }
    }

    pub fn declare_special(&mut self, name: &crate::symbol::Symbol) {
        self.specials.insert(name.identity_key());
    }

    pub fn is_special(&self, name: &crate::symbol::Symbol) -> bool {
        self.specials.contains(&name.identity_key())
    }

    pub fn declare_notinline(&mut self, name: &crate::symbol::Symbol) {
        self.notinline.insert(name.identity_key());
    }

    pub fn is_notinline(&self, name: &crate::symbol::Symbol) -> bool {
        self.notinline.contains(&name.identity_key())
    }

    /// Records that a block's sentinel was reached by a `return-from` (spec
    /// §4.6 `return-from`: "mark binding used"). Keyed by the sentinel's JS
    /// identifier, which is fresh per block entry, so nesting or re-entering
    /// the same block name can't collide.
    pub fn mark_block_used(&mut self, sentinel_id: &str) {
        self.used_blocks.insert(sentinel_id.to_string());
    }

    pub fn is_block_used(&self, sentinel_id: &str) -> bool {
        self.used_blocks.contains(sentinel_id)
    }

    /// Runs `f` with the multiple-value flag temporarily set to `mvp` (spec
    /// §4.9 "Multiple-value flag"), restoring the previous flag afterward.
    pub fn with_multiple_value<T>(&mut self, mvp: bool, f: impl FnOnce(&mut Self) -> T) -> T {
        let outer = std::mem::replace(&mut self.multiple_value, mvp);
        let value = f(self);
        self.multiple_value = outer;
        value
    }

    /// Pins an `Out::Fresh` target down to a concrete JS identifier before a
    /// form with multiple exit branches (`if`, `catch`, …) compiles each
    /// branch against it, so every branch assigns into the same slot.
    pub fn resolve_out(&mut self, out: crate::target::Out) -> crate::target::Out {
        match out {
            crate::target::Out::Fresh => {
                let id = self.namegen.fresh_var();
                self.target.push(JsStmt::VarDecl(id.clone(), None));
                crate::target::Out::Existing(id)
            }
            other => other,
        }
    }

    /// Runs `f` with a fresh target buffer installed, returning the
    /// statements it accumulated alongside `f`'s own result. See the module
    /// doc comment on `target.rs` for why a plain save/restore — not a
    /// `Drop` guard — already satisfies "restore on every exit path" here.
    pub fn let_target<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> (Vec<JsStmt>, T) {
        let outer = std::mem::take(&mut self.target);
        let value = f(self);
        let inner = std::mem::replace(&mut self.target, outer);
        (inner.into_statements(), value)
    }

    /// Runs `f` with the toplevel-compilations buffer installed as the
    /// current target — the seam the magic-unquote dumper (spec §4.4) uses
    /// to re-enter `convert` while building a literal initializer.
    pub fn with_toplevel_as_target<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
        let outer = std::mem::replace(&mut self.target, std::mem::take(&mut self.toplevel));
        let value = f(self);
        self.toplevel = std::mem::replace(&mut self.target, outer);
        value
    }

    pub fn emit(&mut self, expr: crate::jsast::JsExpr, var: crate::target::Out) -> Option<String> {
        crate::target::emit(&mut self.target, &mut self.namegen, expr, var)
    }

    pub fn push_toplevel(&mut self, stmt: JsStmt) {
        self.toplevel.push(stmt);
    }

    /// Reports undefined-but-called functions (spec §7 "Warnings") and
    /// resets the function-info table for the next unit (spec §3
    /// "Lifecycles").
    pub fn finish_unit(&mut self) {
        for (name, info) in self.function_info.values() {
            if info.called && !info.defined {
                log::warn!("undefined function referenced: {}", name);
            }
        }
        self.function_info.clear();
    }

    pub fn mark_function_called(&mut self, sym: &crate::symbol::Symbol) {
        let entry = self
            .function_info
            .entry(sym.identity_key())
            .or_insert_with(|| (sym.name().to_string(), FunctionInfo::default()));
        entry.1.called = true;
    }

    pub fn mark_function_defined(&mut self, sym: &crate::symbol::Symbol) {
        let entry = self
            .function_info
            .entry(sym.identity_key())
            .or_insert_with(|| (sym.name().to_string(), FunctionInfo::default()));
        entry.1.defined = true;
    }
}

pub type Result<T> = CompileResult<T>;
