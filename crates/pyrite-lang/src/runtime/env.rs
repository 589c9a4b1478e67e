//! Lexical scope chain. Each scope is a shared node so closures can keep
//! their defining scope alive after the call that created it returns.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::runtime::value::Value;

#[derive(Clone)]
pub struct Scope(Rc<ScopeNode>);

struct ScopeNode {
    vars: RefCell<IndexMap<String, Value>>,
    parent: Option<Scope>,
    /// Global scope or a function-call scope. Fresh bindings land here.
    is_frame: bool,
}

impl Scope {
    pub fn new_global() -> Self {
        Self::with_parent(None, true)
    }

    /// Block scope, e.g. one `for` iteration.
    pub fn child(&self) -> Self {
        Self::with_parent(Some(self.clone()), false)
    }

    /// Function-call scope whose parent is the closure's defining scope.
    pub fn frame(&self) -> Self {
        Self::with_parent(Some(self.clone()), true)
    }

    fn with_parent(parent: Option<Scope>, is_frame: bool) -> Self {
        Scope(Rc::new(ScopeNode { vars: RefCell::new(IndexMap::new()), parent, is_frame }))
    }

    /// Bind `name` in this scope, shadowing any outer binding.
    pub fn define(&self, name: impl Into<String>, value: Value) {
        self.0.vars.borrow_mut().insert(name.into(), value);
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        let mut scope = self;
        loop {
            if let Some(v) = scope.0.vars.borrow().get(name) {
                return Some(v.clone());
            }
            scope = scope.0.parent.as_ref()?;
        }
    }

    /// Update the nearest existing binding, or define `name` in the nearest
    /// frame when it is bound nowhere in the chain.
    pub fn assign(&self, name: &str, value: Value) {
        let mut scope = self;
        loop {
            if let Some(slot) = scope.0.vars.borrow_mut().get_mut(name) {
                *slot = value;
                return;
            }
            match &scope.0.parent {
                Some(parent) => scope = parent,
                None => break,
            }
        }
        self.define_in_frame(name, value);
    }

    /// Bind in the nearest frame scope, skipping block scopes.
    pub fn define_in_frame(&self, name: impl Into<String>, value: Value) {
        let mut scope = self;
        while !scope.0.is_frame {
            match &scope.0.parent {
                Some(parent) => scope = parent,
                None => break,
            }
        }
        scope.define(name, value);
    }

    pub fn get_local(&self, name: &str) -> Option<Value> {
        self.0.vars.borrow().get(name).cloned()
    }

    pub fn contains_local(&self, name: &str) -> bool {
        self.0.vars.borrow().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.0.vars.borrow().keys().cloned().collect()
    }

    /// Drop every binding in this scope. Breaks reference cycles between the
    /// scope and closures defined in it.
    pub fn clear(&self) {
        let drained: Vec<(String, Value)> = self.0.vars.borrow_mut().drain(..).collect();
        drop(drained);
    }
}
