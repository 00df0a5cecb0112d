//! Scope stack for SSA construction.
//!
//! Each scope carries a symbol table mapping pre-pass variable identities to
//! their current SSA value, plus the scope kind and the enclosing for-loop
//! depth. Symbol tables are `BTreeMap`s keyed by [`VarKey`], whose derived
//! `Ord` gives kind-then-name iteration order; merge processing relies on
//! that order being reproducible.

use std::collections::BTreeMap;

use crate::ir::{Body, ExprId, ExprKind};

/// Kind half of a pre-pass variable identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum OldVarKind {
    Var,
    Tensor,
}

/// Identity of a pre-pass variable: two nodes of the same kind and name are
/// the same variable.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct VarKey {
    pub kind: OldVarKind,
    pub name: String,
}

impl VarKey {
    /// Identity of a var or tensor node; `None` for any other kind.
    pub fn from_expr(body: &Body, id: ExprId) -> Option<VarKey> {
        match &body.get(id).kind {
            ExprKind::Var { name } => Some(VarKey {
                kind: OldVarKind::Var,
                name: name.clone(),
            }),
            ExprKind::Tensor { name } => Some(VarKey {
                kind: OldVarKind::Tensor,
                name: name.clone(),
            }),
            _ => None,
        }
    }
}

/// Why a scope was pushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Normal,
    ForLoop,
    IfThen,
    IfElse,
}

/// Per-variable state within a scope.
#[derive(Debug, Clone, Default)]
pub struct SsaVarStatus {
    /// The SSA expression currently standing for the variable. `None` for
    /// an entry reserved by an update that has not stored a value yet.
    pub current_value: Option<ExprId>,
    /// Index into the scope stack where this mapping was introduced.
    pub defined_scope_idx: usize,
    /// Loop phis created on reads of this variable from inside a loop it
    /// was defined outside of. Their operand lists are patched with the
    /// final in-loop value when the loop scope pops.
    pub for_loop_phi: Vec<ExprId>,
}

/// One stack entry.
#[derive(Debug, Clone)]
pub struct SsaScope {
    pub kind: ScopeKind,
    /// Number of enclosing for-loops, this scope included if it is one.
    pub for_depth: u32,
    pub vars: BTreeMap<VarKey, SsaVarStatus>,
}

/// Stack of scopes, innermost last.
#[derive(Debug, Clone, Default)]
pub struct ScopeStack {
    scopes: Vec<SsaScope>,
}

impl ScopeStack {
    pub fn new() -> Self {
        ScopeStack { scopes: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    /// Push a scope. Its for-depth is the previous top's, incremented iff
    /// the new scope is a loop.
    pub fn push(&mut self, kind: ScopeKind) -> &mut SsaScope {
        let mut for_depth = self.scopes.last().map(|s| s.for_depth).unwrap_or(0);
        if kind == ScopeKind::ForLoop {
            for_depth += 1;
        }
        self.scopes.push(SsaScope {
            kind,
            for_depth,
            vars: BTreeMap::new(),
        });
        self.scopes.last_mut().unwrap()
    }

    /// Detach and return the top scope.
    pub fn pop(&mut self) -> SsaScope {
        self.scopes.pop().expect("pop on empty scope stack")
    }

    pub fn top_for_depth(&self) -> u32 {
        self.scopes.last().map(|s| s.for_depth).unwrap_or(0)
    }

    pub fn for_depth_at(&self, idx: usize) -> u32 {
        self.scopes[idx].for_depth
    }

    /// Bind a variable in the top scope, overwriting any existing entry
    /// there. Returns the new status.
    pub fn insert_local(&mut self, key: VarKey, value: Option<ExprId>) -> &mut SsaVarStatus {
        let idx = self.scopes.len() - 1;
        let top = self.scopes.last_mut().expect("insert on empty scope stack");
        top.vars.insert(
            key.clone(),
            SsaVarStatus {
                current_value: value,
                defined_scope_idx: idx,
                for_loop_phi: Vec::new(),
            },
        );
        top.vars.get_mut(&key).unwrap()
    }

    /// Bind a variable in the bottom (root) scope without disturbing any
    /// inner bindings. Used for globals, which are never shadowed.
    pub fn insert_root(&mut self, key: VarKey, value: ExprId) -> &mut SsaVarStatus {
        let root = self.scopes.first_mut().expect("insert on empty scope stack");
        root.vars.insert(
            key.clone(),
            SsaVarStatus {
                current_value: Some(value),
                defined_scope_idx: 0,
                for_loop_phi: Vec::new(),
            },
        );
        root.vars.get_mut(&key).unwrap()
    }

    /// Innermost-first lookup. Returns the scope index alongside the status
    /// so callers can compare for-depths.
    pub fn lookup(&self, key: &VarKey) -> Option<(usize, &SsaVarStatus)> {
        for (idx, scope) in self.scopes.iter().enumerate().rev() {
            if let Some(status) = scope.vars.get(key) {
                return Some((idx, status));
            }
        }
        None
    }

    /// Innermost-first mutable lookup.
    pub fn lookup_mut(&mut self, key: &VarKey) -> Option<&mut SsaVarStatus> {
        for scope in self.scopes.iter_mut().rev() {
            if let Some(status) = scope.vars.get_mut(key) {
                return Some(status);
            }
        }
        None
    }

    /// Entry to mutate for an assignment. Globals are never shadowed, so
    /// for them the existing (deepest) mapping is returned, or `None` if
    /// the global was never bound. Locals get the top-scope entry, created
    /// fresh (with no value) if the top scope does not hold one yet, so the
    /// eventual pop can diff the in-scope version against the parent's.
    pub fn lookup_for_update(&mut self, key: &VarKey, is_global: bool) -> Option<&mut SsaVarStatus> {
        if is_global {
            return self.lookup_mut(key);
        }
        let top_has = self
            .scopes
            .last()
            .map(|s| s.vars.contains_key(key))
            .unwrap_or(false);
        if top_has {
            return self.scopes.last_mut().unwrap().vars.get_mut(key);
        }
        Some(self.insert_local(key.clone(), None))
    }
}
