use std::collections::HashSet;

use indexmap::IndexMap;

use crate::variable::{VarId, Variable, VariableKind};

pub type ScopeId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Module,
    Child,
}

/// One lexical environment. Parent references are arena ids, never
/// owning pointers; the scope graph is cyclic only through those ids.
#[derive(Debug)]
pub struct Scope {
    pub id: ScopeId,
    pub kind: ScopeKind,
    pub parent: Option<ScopeId>,
    pub bindings: IndexMap<String, VarId>,
}

/// Arena of scopes and variables owned by a single module. The root is
/// always the module scope; child scopes are created for function
/// bodies during analysis.
#[derive(Debug)]
pub struct ScopeTree {
    scopes: Vec<Scope>,
    variables: Vec<Variable>,
}

impl Default for ScopeTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeTree {
    pub fn new() -> Self {
        Self {
            scopes: vec![Scope {
                id: 0,
                kind: ScopeKind::Module,
                parent: None,
                bindings: IndexMap::new(),
            }],
            variables: vec![],
        }
    }

    pub fn module_scope(&self) -> ScopeId {
        0
    }

    pub fn push_scope(&mut self, parent: ScopeId) -> ScopeId {
        let id = self.scopes.len() as ScopeId;
        self.scopes.push(Scope {
            id,
            kind: ScopeKind::Child,
            parent: Some(parent),
            bindings: IndexMap::new(),
        });
        id
    }

    /// Declares `name` in `scope`, reusing the existing binding on
    /// redeclaration (`var` semantics at module level).
    pub fn declare(&mut self, scope: ScopeId, name: &str, kind: VariableKind) -> VarId {
        if let Some(&existing) = self.scopes[scope as usize].bindings.get(name) {
            return existing;
        }
        let id = self.add_variable(Variable::new(name, kind));
        self.scopes[scope as usize]
            .bindings
            .insert(name.to_string(), id);
        id
    }

    /// Adds a variable without binding it into any scope (synthetic
    /// namespace and shim variables).
    pub fn add_variable(&mut self, variable: Variable) -> VarId {
        let id = self.variables.len() as VarId;
        self.variables.push(variable);
        id
    }

    pub fn lookup(&self, scope: ScopeId, name: &str) -> Option<VarId> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let scope = &self.scopes[id as usize];
            if let Some(&var) = scope.bindings.get(name) {
                return Some(var);
            }
            current = scope.parent;
        }
        None
    }

    pub fn var(&self, id: VarId) -> &Variable {
        &self.variables[id as usize]
    }

    pub fn var_mut(&mut self, id: VarId) -> &mut Variable {
        &mut self.variables[id as usize]
    }

    pub fn variables(&self) -> impl Iterator<Item = (VarId, &Variable)> {
        self.variables
            .iter()
            .enumerate()
            .map(|(i, v)| (i as VarId, v))
    }

    /// Names bound directly in the module scope.
    pub fn module_level_names(&self) -> HashSet<String> {
        self.scopes[0].bindings.keys().cloned().collect()
    }
}

/// The single process-lived global scope shared by every module of a
/// build: the set of identifiers value analysis treats as known.
#[derive(Debug, Clone)]
pub struct GlobalScope {
    knowns: HashSet<String>,
}

impl Default for GlobalScope {
    fn default() -> Self {
        let knowns = [
            "Array", "Boolean", "Date", "Error", "Infinity", "JSON", "Map", "Math", "NaN",
            "Number", "Object", "Promise", "Proxy", "Reflect", "RegExp", "Set", "String",
            "Symbol", "WeakMap", "WeakSet", "console", "decodeURIComponent", "encodeURIComponent",
            "globalThis", "isFinite", "isNaN", "parseFloat", "parseInt", "undefined",
        ]
        .into_iter()
        .map(str::to_string)
        .collect();
        Self { knowns }
    }
}

impl GlobalScope {
    pub fn knowns(&self) -> &HashSet<String> {
        &self.knowns
    }

    pub fn is_known(&self, name: &str) -> bool {
        self.knowns.contains(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declare_and_lookup_through_parents() {
        let mut tree = ScopeTree::new();
        let module = tree.module_scope();
        let x = tree.declare(module, "x", VariableKind::Local);
        let child = tree.push_scope(module);
        let inner = tree.push_scope(child);
        tree.declare(child, "y", VariableKind::Local);

        assert_eq!(tree.lookup(inner, "x"), Some(x));
        assert!(tree.lookup(inner, "y").is_some());
        assert_eq!(tree.lookup(module, "y"), None);
        assert_eq!(tree.lookup(inner, "z"), None);
    }

    #[test]
    fn test_redeclaration_reuses_binding() {
        let mut tree = ScopeTree::new();
        let module = tree.module_scope();
        let first = tree.declare(module, "x", VariableKind::Local);
        let second = tree.declare(module, "x", VariableKind::Local);
        assert_eq!(first, second);
    }

    #[test]
    fn test_global_scope_knowns() {
        let globals = GlobalScope::default();
        assert!(globals.is_known("Math"));
        assert!(!globals.is_known("window"));
    }
}
