use std::collections::HashMap;

use crate::compiler::program::{LabelRef, VarRef};
use crate::compiler::types::{Builtins, TypeRef};

/// Index of a scope inside a [`ScopeArena`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeId(usize);

/// Single lexical scope
#[derive(Debug, Default)]
struct Scope {
    types: HashMap<String, TypeRef>,
    vars: HashMap<String, VarRef>,
    labels: HashMap<String, LabelRef>,
    /// Index of parent scope (None for the root scope)
    parent: Option<ScopeId>,
}

/// Lexical scopes of one file.
///
/// Scopes are never freed while the file is being resolved, so a label use can
/// remember the scope it appeared in and be looked up after the whole file has
/// been seen.
#[derive(Debug)]
pub struct ScopeArena {
    scopes: Vec<Scope>,
    current: ScopeId,
}

impl ScopeArena {
    /// Creates the root scope holding the builtin types
    pub fn new(builtins: &Builtins) -> Self {
        let mut root = Scope::default();
        for (name, ty) in builtins.named() {
            root.types.insert(name.to_string(), ty);
        }
        ScopeArena {
            scopes: vec![root],
            current: ScopeId(0),
        }
    }

    /// Scope definitions currently go into
    pub fn current(&self) -> ScopeId {
        self.current
    }

    /// Enters a new nested scope
    pub fn push(&mut self) -> ScopeId {
        let id = ScopeId(self.scopes.len());
        self.scopes.push(Scope {
            parent: Some(self.current),
            ..Scope::default()
        });
        self.current = id;
        id
    }

    /// Returns to the parent of the current scope
    pub fn pop(&mut self) {
        if let Some(parent) = self.scopes[self.current.0].parent {
            self.current = parent;
        }
    }

    pub fn define_type(&mut self, name: impl Into<String>, ty: TypeRef) {
        self.scopes[self.current.0].types.insert(name.into(), ty);
    }

    pub fn define_var(&mut self, name: impl Into<String>, var: VarRef) {
        self.scopes[self.current.0].vars.insert(name.into(), var);
    }

    pub fn define_label(&mut self, name: impl Into<String>, label: LabelRef) {
        self.scopes[self.current.0].labels.insert(name.into(), label);
    }

    /// Looks a type up from the current scope outwards
    pub fn lookup_type(&self, name: &str) -> Option<TypeRef> {
        self.chain(self.current)
            .find_map(|scope| scope.types.get(name))
            .cloned()
    }

    /// Looks a variable up from the current scope outwards
    pub fn lookup_var(&self, name: &str) -> Option<VarRef> {
        self.chain(self.current)
            .find_map(|scope| scope.vars.get(name))
            .cloned()
    }

    /// Looks a label up starting at `from`, which need not be current
    pub fn lookup_label_from(&self, from: ScopeId, name: &str) -> Option<LabelRef> {
        self.chain(from)
            .find_map(|scope| scope.labels.get(name))
            .cloned()
    }

    /// Walk scope chain from `from` to the root
    fn chain(&self, from: ScopeId) -> impl Iterator<Item = &Scope> + '_ {
        let mut next = Some(from);
        std::iter::from_fn(move || {
            let id = next?;
            let scope = &self.scopes[id.0];
            next = scope.parent;
            Some(scope)
        })
    }
}
