//! Scope chain (spec §3.4, §9): an arena per function call with per-block
//! sub-arenas, keyed by lexical depth; identifier lookup walks the chain
//! from innermost to outermost.

use std::{cell::RefCell, rc::Rc};

use indexmap::IndexMap;

use crate::value::Value;

/// Declaration flags carried alongside a binding (spec §3.4).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BindingFlags {
    pub is_const: bool,
    pub is_static: bool,
    pub is_volatile: bool,
    pub is_extern: bool,
}

#[derive(Debug, Clone)]
pub struct Binding {
    pub value: Value,
    pub type_name: String,
    pub flags: BindingFlags,
}

/// A single lexical scope: global, function, block, or an ad-hoc loop
/// header scope (spec §3.4).
#[derive(Debug)]
pub struct Scope {
    bindings: IndexMap<String, Binding>,
    parent: Option<ScopeHandle>,
}

pub type ScopeHandle = Rc<RefCell<Scope>>;

impl Scope {
    #[must_use]
    pub fn root() -> ScopeHandle {
        Rc::new(RefCell::new(Self {
            bindings: IndexMap::new(),
            parent: None,
        }))
    }

    #[must_use]
    pub fn child(parent: &ScopeHandle) -> ScopeHandle {
        Rc::new(RefCell::new(Self {
            bindings: IndexMap::new(),
            parent: Some(Rc::clone(parent)),
        }))
    }

    pub fn define(&mut self, name: impl Into<String>, value: Value, type_name: impl Into<String>, flags: BindingFlags) {
        self.bindings.insert(
            name.into(),
            Binding {
                value,
                type_name: type_name.into(),
                flags,
            },
        );
    }

    #[must_use]
    pub fn has_own(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }
}

/// Walks `scope`'s chain outward looking up `name`, calling `f` with the
/// scope that owns the binding (or doing nothing if unresolved).
fn find_owning_scope(scope: &ScopeHandle, name: &str) -> Option<ScopeHandle> {
    let mut current = Rc::clone(scope);
    loop {
        let has = current.borrow().has_own(name);
        if has {
            return Some(current);
        }
        let parent = current.borrow().parent.clone();
        match parent {
            Some(p) => current = p,
            None => return None,
        }
    }
}

/// Looks up `name` by walking the scope chain from innermost outward
/// (spec §4.7.2).
#[must_use]
pub fn lookup(scope: &ScopeHandle, name: &str) -> Option<Value> {
    find_owning_scope(scope, name).map(|s| s.borrow().bindings[name].value.clone())
}

#[must_use]
pub fn lookup_flags(scope: &ScopeHandle, name: &str) -> Option<BindingFlags> {
    find_owning_scope(scope, name).map(|s| s.borrow().bindings[name].flags)
}

/// Assigns to an existing binding anywhere in the chain. Returns `false`
/// if no such binding exists (the caller treats this as an unresolved
/// identifier, spec §7 `LinkError`).
pub fn assign(scope: &ScopeHandle, name: &str, value: Value) -> bool {
    match find_owning_scope(scope, name) {
        Some(owner) => {
            owner.borrow_mut().bindings.get_mut(name).unwrap().value = value;
            true
        }
        None => false,
    }
}

/// Defines `name` in `scope` directly (used for parameter binding, loop
/// variables, and declarations).
pub fn define(scope: &ScopeHandle, name: impl Into<String>, value: Value, type_name: impl Into<String>, flags: BindingFlags) {
    scope.borrow_mut().define(name, value, type_name, flags);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_walks_outward() {
        let global = Scope::root();
        define(&global, "g", Value::Int32(1), "int", BindingFlags::default());
        let func = Scope::child(&global);
        let block = Scope::child(&func);
        define(&block, "b", Value::Int32(2), "int", BindingFlags::default());

        assert_eq!(lookup(&block, "g").unwrap().as_i64(), 1);
        assert_eq!(lookup(&block, "b").unwrap().as_i64(), 2);
        assert!(lookup(&func, "b").is_none());
    }

    #[test]
    fn assign_mutates_innermost_owner() {
        let global = Scope::root();
        define(&global, "x", Value::Int32(1), "int", BindingFlags::default());
        let block = Scope::child(&global);
        assert!(assign(&block, "x", Value::Int32(42)));
        assert_eq!(lookup(&global, "x").unwrap().as_i64(), 42);
    }

    #[test]
    fn assign_to_unknown_identifier_fails() {
        let global = Scope::root();
        assert!(!assign(&global, "nope", Value::Int32(1)));
    }
}
