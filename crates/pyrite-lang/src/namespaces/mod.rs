//! Libraries: named bundles of host functions and constants that scripts
//! reach with `import name`. Built-ins and the shipped `json`/`math`
//! libraries go through the same `HostFunction` bridge as embedder code.

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::error::RuntimeError;
use crate::runtime::bridge::{HostFunction, Kwargs};
use crate::runtime::cancel::CancelToken;
use crate::runtime::value::Value;

pub mod builtins;
pub mod json;
pub mod math;

// ─── Library ──────────────────────────────────────────────────────────────────

/// A library under construction. Members keep their declaration order.
#[derive(Debug, Clone)]
pub struct Library {
    name: String,
    members: IndexMap<String, Value>,
}

impl Library {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), members: IndexMap::new() }
    }

    /// Add a host-style member; returning `Value::Error` fails the call.
    pub fn function<F>(self, name: &str, f: F) -> Self
    where
        F: Fn(&CancelToken, &Kwargs, &[Value]) -> Value + 'static,
    {
        let qualified = format!("{}.{name}", self.name);
        self.member(name, Value::host_function(HostFunction::new(&qualified, f)))
    }

    /// Add a member that reports failures with a specific error kind.
    pub fn native<F>(self, name: &str, f: F) -> Self
    where
        F: Fn(&CancelToken, &Kwargs, &[Value]) -> Result<Value, RuntimeError> + 'static,
    {
        let qualified = format!("{}.{name}", self.name);
        self.member(name, Value::host_function(HostFunction::native(&qualified, f)))
    }

    pub fn constant(self, name: &str, value: impl Into<Value>) -> Self {
        self.member(name, value.into())
    }

    fn member(mut self, name: &str, value: Value) -> Self {
        self.members.insert(name.to_string(), value);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, member: &str) -> Option<&Value> {
        self.members.get(member)
    }

    pub fn member_names(&self) -> impl Iterator<Item = &str> {
        self.members.keys().map(String::as_str)
    }

    /// The dict a script sees after `import`. Each import gets a fresh dict
    /// sharing the same function values.
    pub fn to_module(&self) -> Value {
        Value::dict(self.members.clone())
    }
}

// ─── Registry ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct LibraryRegistry {
    libraries: HashMap<String, Library>,
}

impl LibraryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `json` and `math`.
    pub fn standard() -> Self {
        let mut r = Self::new();
        r.register(json::library());
        r.register(math::library());
        r
    }

    /// Later registrations replace earlier ones with the same name.
    pub fn register(&mut self, lib: Library) {
        self.libraries.insert(lib.name.clone(), lib);
    }

    pub fn get(&self, name: &str) -> Option<&Library> {
        self.libraries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.libraries.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.libraries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

// ─── Shared helpers ───────────────────────────────────────────────────────────

pub(crate) fn check_argc(name: &str, args: &[Value], n: usize) -> Result<(), RuntimeError> {
    if args.len() != n {
        Err(RuntimeError::argument(0, format!(
            "{name}() takes {n} argument{} but {} were given",
            if n == 1 { "" } else { "s" },
            args.len(),
        )))
    } else {
        Ok(())
    }
}

pub(crate) fn check_argc_range(name: &str, args: &[Value], min: usize, max: usize) -> Result<(), RuntimeError> {
    if args.len() < min || args.len() > max {
        Err(RuntimeError::argument(0, format!(
            "{name}() takes from {min} to {max} arguments but {} were given", args.len()
        )))
    } else {
        Ok(())
    }
}

/// Numeric argument widened to f64, with the function name in the error.
pub(crate) fn as_float(name: &str, v: &Value) -> Result<f64, RuntimeError> {
    v.as_float().map_err(|_| RuntimeError::type_error(0, format!(
        "{name}() argument must be a number, not {}", v.type_name()
    )))
}
