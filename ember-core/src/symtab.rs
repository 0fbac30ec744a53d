//! Global and nested local scopes, plus destructable-local tracking.
//!
//! A `ScopeTable` holds one level of names; `SymbolTable` is a stack of those
//! plus a single separate global table. Lookup walks innermost-first, then
//! falls back to global -- matching the "locals shadow globals" rule every
//! visitor relies on.

use std::collections::HashMap;

use crate::backend::Backend;
use crate::value::RValue;

/// One destructable local awaiting cleanup at scope exit: its storage
/// address plus enough to call its destructor later (name is kept for
/// diagnostics; the destructor call itself is driven by the value's type).
pub struct Destructable<B: Backend> {
    pub name: String,
    pub value: RValue<B>,
}

impl<B: Backend> Clone for Destructable<B> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            value: self.value.clone(),
        }
    }
}

/// One level of name bindings. Multiple entries per name are kept (not
/// overwritten) because overloaded functions live in the same table as
/// ordinary locals; `loadLocal` returns the whole list and callers that
/// want "the one variable" take the last entry, while overload resolution
/// wants every candidate.
#[derive(Default)]
pub struct ScopeTable<B: Backend> {
    names: HashMap<String, Vec<RValue<B>>>,
    /// FIFO of destructable locals declared directly in this scope, in
    /// declaration order; `getDestructables` reverses this to get LIFO
    /// cleanup order.
    destructables: Vec<Destructable<B>>,
}

impl<B: Backend> ScopeTable<B> {
    pub fn new() -> Self {
        Self {
            names: HashMap::new(),
            destructables: Vec::new(),
        }
    }

    fn store(&mut self, name: &str, value: RValue<B>) {
        self.names.entry(name.to_string()).or_default().push(value);
    }

    fn lookup(&self, name: &str) -> Option<&[RValue<B>]> {
        self.names.get(name).map(Vec::as_slice)
    }

    pub fn destructables(&self) -> &[Destructable<B>] {
        &self.destructables
    }
}

/// A stack of block scopes plus the module's single global scope. Created
/// once per module and threaded through every visitor via the Code Context.
pub struct SymbolTable<B: Backend> {
    global: ScopeTable<B>,
    locals: Vec<ScopeTable<B>>,
}

impl<B: Backend> Default for SymbolTable<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> SymbolTable<B> {
    pub fn new() -> Self {
        Self {
            global: ScopeTable::new(),
            locals: Vec::new(),
        }
    }

    /// Open a fresh innermost scope (function parameters, a block, a loop
    /// body, a `switch`'s shared scope, one `if`/`else` arm).
    pub fn push_scope(&mut self) {
        log::trace!("push_scope: depth {} -> {}", self.locals.len(), self.locals.len() + 1);
        self.locals.push(ScopeTable::new());
    }

    /// Close the innermost scope, returning the destructables it accumulated
    /// so the caller can emit their destructor calls before the scope's
    /// storage becomes unreachable.
    pub fn pop_scope(&mut self) -> Vec<Destructable<B>> {
        let destructables = self
            .locals
            .pop()
            .map(|s| s.destructables)
            .unwrap_or_default();
        log::trace!("pop_scope: depth {} -> {}, {} destructable(s)", self.locals.len() + 1, self.locals.len(), destructables.len());
        destructables
    }

    pub fn depth(&self) -> usize {
        self.locals.len()
    }

    /// Push `value` into the innermost scope (or global, if no local scope
    /// is open). Destructable types are recorded for end-of-scope cleanup
    /// unless `is_param` -- function parameters are never destructed by the
    /// callee's own scope exit.
    pub fn store_local(&mut self, name: &str, value: RValue<B>, is_param: bool, has_destructor: bool) {
        let destructable = has_destructor && !is_param;
        let value_for_destructable = if destructable { Some(value.clone()) } else { None };
        match self.locals.last_mut() {
            Some(scope) => {
                scope.store(name, value);
                if let Some(v) = value_for_destructable {
                    scope.destructables.push(Destructable {
                        name: name.to_string(),
                        value: v,
                    });
                }
            }
            None => self.store_global(name, value),
        }
    }

    pub fn store_global(&mut self, name: &str, value: RValue<B>) {
        self.global.store(name, value);
    }

    /// Walks innermost scope outward, then global. Returns every entry found
    /// at the first non-empty level (overload candidates live together).
    pub fn load_local(&self, name: &str) -> Vec<RValue<B>> {
        let local_hits = self.load_locals_only(name);
        if !local_hits.is_empty() {
            return local_hits;
        }
        self.load_global(name)
    }

    /// Like `load_local`, but never falls back to the global scope -- used
    /// by the Variable Visitor's base-name resolution, which checks
    /// implicit-`this` members and globals itself, in that order, only
    /// after a plain local lookup comes up empty.
    pub fn load_locals_only(&self, name: &str) -> Vec<RValue<B>> {
        for scope in self.locals.iter().rev() {
            if let Some(hits) = scope.lookup(name) {
                if !hits.is_empty() {
                    return hits.to_vec();
                }
            }
        }
        Vec::new()
    }

    /// Redeclaration check: looks only in the innermost scope, or global
    /// when no local scope is open.
    pub fn load_current(&self, name: &str) -> Vec<RValue<B>> {
        match self.locals.last() {
            Some(scope) => scope.lookup(name).map(|s| s.to_vec()).unwrap_or_default(),
            None => self.load_global(name),
        }
    }

    pub fn load_global(&self, name: &str) -> Vec<RValue<B>> {
        self.global.lookup(name).map(|s| s.to_vec()).unwrap_or_default()
    }

    /// Destructables from scope level `from_level` up to (and including)
    /// the top of the stack, in LIFO cleanup order -- used by `return`
    /// (whole stack) and `break`/`continue`/`redo` (down to, but not
    /// including, the target loop's level).
    pub fn destructables_from(&self, from_level: usize) -> Vec<Destructable<B>> {
        let mut out = Vec::new();
        for scope in self.locals.iter().skip(from_level).rev() {
            for d in scope.destructables.iter().rev() {
                out.push(d.clone());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;
    use crate::types::TypeManager;

    fn dummy_rvalue(be: &mut MockBackend, tm: &TypeManager) -> RValue<MockBackend> {
        let i32_t = tm.get_int(32, false).unwrap();
        let ty = be.int_type(32);
        let v = be.const_int(ty, 0);
        RValue::rvalue(v, i32_t)
    }

    #[test]
    fn innermost_scope_shadows_outer() {
        let mut be = MockBackend::new();
        let tm = TypeManager::new();
        let mut st = SymbolTable::<MockBackend>::new();
        st.store_global("x", dummy_rvalue(&mut be, &tm));
        st.push_scope();
        st.store_local("x", dummy_rvalue(&mut be, &tm), false, false);
        assert_eq!(st.load_local("x").len(), 1);
        st.pop_scope();
        assert_eq!(st.load_local("x").len(), 1);
    }

    #[test]
    fn load_current_does_not_see_outer_scope() {
        let mut be = MockBackend::new();
        let tm = TypeManager::new();
        let mut st = SymbolTable::<MockBackend>::new();
        st.push_scope();
        st.store_local("x", dummy_rvalue(&mut be, &tm), false, false);
        st.push_scope();
        assert!(st.load_current("x").is_empty());
        assert_eq!(st.load_local("x").len(), 1);
    }

    #[test]
    fn destructables_pop_in_lifo_order() {
        let mut be = MockBackend::new();
        let tm = TypeManager::new();
        let mut st = SymbolTable::<MockBackend>::new();
        st.push_scope();
        st.store_local("a", dummy_rvalue(&mut be, &tm), false, true);
        st.store_local("b", dummy_rvalue(&mut be, &tm), false, true);
        let d = st.pop_scope();
        assert_eq!(d.len(), 2);
        assert_eq!(d[0].name, "a");
        assert_eq!(d[1].name, "b");
    }

    #[test]
    fn params_are_never_destructable() {
        let mut be = MockBackend::new();
        let tm = TypeManager::new();
        let mut st = SymbolTable::<MockBackend>::new();
        st.push_scope();
        st.store_local("p", dummy_rvalue(&mut be, &tm), true, true);
        assert!(st.pop_scope().is_empty());
    }

    #[test]
    fn destructables_from_level_skips_outer_scopes() {
        let mut be = MockBackend::new();
        let tm = TypeManager::new();
        let mut st = SymbolTable::<MockBackend>::new();
        st.push_scope();
        st.store_local("outer", dummy_rvalue(&mut be, &tm), false, true);
        st.push_scope();
        st.store_local("inner", dummy_rvalue(&mut be, &tm), false, true);
        let got = st.destructables_from(1);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].name, "inner");
    }
}
