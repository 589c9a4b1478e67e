//! Host-function bridge: the one calling convention shared by embedder
//! functions, built-ins and library members.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::error::{ErrorKind, RuntimeError};
use crate::runtime::cancel::CancelToken;
use crate::runtime::value::{Function, ListRef, ParamSlot, Value};

pub type NativeFn = dyn Fn(&CancelToken, &Kwargs, &[Value]) -> Result<Value, RuntimeError>;
pub type CallbackFn = dyn Fn(&mut dyn Caller, &Kwargs, &[Value]) -> Result<Value, RuntimeError>;

// ─── Caller ───────────────────────────────────────────────────────────────────

/// What a host function sees of the running interpreter when it needs to
/// call a function value it was given, e.g. the `key` of `sorted`.
pub trait Caller {
    fn call(&mut self, f: &Value, args: Vec<Value>) -> Result<Value, RuntimeError>;

    fn token(&self) -> &CancelToken;
}

/// Used when a host function is called with only a token, outside any
/// evaluation. It can call other host functions but no script functions.
struct Detached<'a>(&'a CancelToken);

impl Caller for Detached<'_> {
    fn call(&mut self, f: &Value, args: Vec<Value>) -> Result<Value, RuntimeError> {
        match &*f.as_function()? {
            Function::Host(h) => h.invoke(self, &Kwargs::new(), &args),
            Function::Script(c) => Err(RuntimeError::type_error(0, format!(
                "{}() can only be called while a script is running", c.name
            ))),
        }
    }

    fn token(&self) -> &CancelToken {
        self.0
    }
}

// ─── HostFunction ─────────────────────────────────────────────────────────────

#[derive(Clone)]
enum Body {
    Plain(Rc<NativeFn>),
    Callback(Rc<CallbackFn>),
}

#[derive(Clone)]
pub struct HostFunction {
    name: Rc<str>,
    body: Body,
}

impl HostFunction {
    /// Wrap an embedder function. Returning `Value::Error(msg)` fails the
    /// call: as a cancellation if the token has fired, otherwise as a raised
    /// error carrying `msg`.
    pub fn new<F>(name: &str, f: F) -> Self
    where
        F: Fn(&CancelToken, &Kwargs, &[Value]) -> Value + 'static,
    {
        Self::native(name, move |token, kwargs, args| match f(token, kwargs, args) {
            Value::Error(msg) if token.is_cancelled() => {
                Err(RuntimeError::new(ErrorKind::Cancellation, 0, &*msg))
            }
            Value::Error(msg) => Err(RuntimeError::new(ErrorKind::Raised, 0, &*msg)),
            v => Ok(v),
        })
    }

    /// Wrap a function that reports failures with a specific error kind.
    pub fn native<F>(name: &str, f: F) -> Self
    where
        F: Fn(&CancelToken, &Kwargs, &[Value]) -> Result<Value, RuntimeError> + 'static,
    {
        Self { name: Rc::from(name), body: Body::Plain(Rc::new(f)) }
    }

    /// Wrap a function that calls back into the interpreter, such as
    /// `map(f, xs)`.
    pub fn with_caller<F>(name: &str, f: F) -> Self
    where
        F: Fn(&mut dyn Caller, &Kwargs, &[Value]) -> Result<Value, RuntimeError> + 'static,
    {
        Self { name: Rc::from(name), body: Body::Callback(Rc::new(f)) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, token: &CancelToken, kwargs: &Kwargs, args: &[Value]) -> Result<Value, RuntimeError> {
        self.invoke(&mut Detached(token), kwargs, args)
    }

    pub fn invoke(&self, caller: &mut dyn Caller, kwargs: &Kwargs, args: &[Value]) -> Result<Value, RuntimeError> {
        match &self.body {
            Body::Plain(f) => f(caller.token(), kwargs, args),
            Body::Callback(f) => f(caller, kwargs, args),
        }
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostFunction({})", self.name)
    }
}

// ─── Registry ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    functions: IndexMap<String, HostFunction>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Later registrations replace earlier ones with the same name.
    pub fn register(&mut self, f: HostFunction) {
        self.functions.insert(f.name().to_string(), f);
    }

    pub fn get(&self, name: &str) -> Option<&HostFunction> {
        self.functions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// In registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }
}

// ─── Kwargs ───────────────────────────────────────────────────────────────────

/// Keyword arguments of a single call.
#[derive(Debug, Clone, Default)]
pub struct Kwargs(HashMap<String, Value>);

impl Kwargs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub(crate) fn remove(&mut self, name: &str) -> Option<Value> {
        self.0.remove(name)
    }

    pub fn get_str(&self, name: &str, default: &str) -> Result<String, RuntimeError> {
        match self.0.get(name) {
            None | Some(Value::Null) => Ok(default.to_string()),
            Some(v) => v.as_str().map(str::to_string).map_err(|e| self.named(name, e)),
        }
    }

    pub fn get_int(&self, name: &str, default: i64) -> Result<i64, RuntimeError> {
        match self.0.get(name) {
            None => Ok(default),
            Some(v) => v.as_int().map_err(|e| self.named(name, e)),
        }
    }

    pub fn get_float(&self, name: &str, default: f64) -> Result<f64, RuntimeError> {
        match self.0.get(name) {
            None => Ok(default),
            Some(v) => v.as_float().map_err(|e| self.named(name, e)),
        }
    }

    pub fn get_bool(&self, name: &str, default: bool) -> Result<bool, RuntimeError> {
        match self.0.get(name) {
            None => Ok(default),
            Some(v) => v.as_bool().map_err(|e| self.named(name, e)),
        }
    }

    /// `None` when absent.
    pub fn get_list(&self, name: &str) -> Result<Option<ListRef>, RuntimeError> {
        match self.0.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => v.as_list().map(Some).map_err(|e| self.named(name, e)),
        }
    }

    /// ArgumentError naming the first keyword not in `allowed`.
    pub fn check_allowed(&self, function: &str, allowed: &[&str]) -> Result<(), RuntimeError> {
        match self.0.keys().find(|k| !allowed.contains(&k.as_str())) {
            Some(k) => Err(unexpected_keyword(function, k)),
            None => Ok(()),
        }
    }

    fn named(&self, name: &str, e: RuntimeError) -> RuntimeError {
        RuntimeError::new(e.kind, e.line, format!("keyword `{name}`: {}", e.message))
    }
}

impl From<HashMap<String, Value>> for Kwargs {
    fn from(map: HashMap<String, Value>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Kwargs {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

fn unexpected_keyword(function: &str, name: &str) -> RuntimeError {
    RuntimeError::argument(0, format!("{function}() got an unexpected keyword argument '{name}'"))
}

// ─── Argument binding ─────────────────────────────────────────────────────────

/// Bind a script call's arguments to `params`, in order: positionals left to
/// right, then keywords, then defaults. Returns one value per parameter.
pub fn bind_arguments(
    function: &str,
    params: &[ParamSlot],
    args: Vec<Value>,
    mut kwargs: Kwargs,
) -> Result<Vec<Value>, RuntimeError> {
    if args.len() > params.len() {
        return Err(RuntimeError::argument(0, format!(
            "{function}() takes {} positional argument{} but {} were given",
            params.len(),
            if params.len() == 1 { "" } else { "s" },
            args.len(),
        )));
    }

    let mut bound: Vec<Option<Value>> = args.into_iter().map(Some).collect();
    bound.resize(params.len(), None);

    for (slot, param) in bound.iter_mut().zip(params) {
        if let Some(v) = kwargs.remove(&param.name) {
            if slot.is_some() {
                return Err(RuntimeError::argument(0, format!(
                    "{function}() got multiple values for argument '{}'", param.name
                )));
            }
            *slot = Some(v);
        }
    }

    if let Some((name, _)) = kwargs.iter().next() {
        return Err(unexpected_keyword(function, name));
    }

    bound.into_iter().zip(params)
        .map(|(slot, param)| {
            slot.or_else(|| param.default.clone()).ok_or_else(|| RuntimeError::argument(0, format!(
                "{function}() missing required argument '{}'", param.name
            )))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn params(slots: &[(&str, Option<Value>)]) -> Vec<ParamSlot> {
        slots.iter().map(|(n, d)| ParamSlot { name: n.to_string(), default: d.clone() }).collect()
    }

    fn greet_params() -> Vec<ParamSlot> {
        params(&[
            ("name", None),
            ("greeting", Some(Value::str("Hello"))),
            ("punctuation", Some(Value::str("!"))),
        ])
    }

    #[test]
    fn defaults_fill_missing() {
        let kw: Kwargs = [("name", "World")].into_iter().collect();
        let bound = bind_arguments("greet", &greet_params(), vec![], kw).unwrap();
        assert_eq!(bound, vec![Value::str("World"), Value::str("Hello"), Value::str("!")]);
    }

    #[test]
    fn keywords_override_defaults() {
        let kw: Kwargs = [("punctuation", "?"), ("greeting", "Hi")].into_iter().collect();
        let bound = bind_arguments("greet", &greet_params(), vec![Value::str("Alice")], kw).unwrap();
        assert_eq!(bound, vec![Value::str("Alice"), Value::str("Hi"), Value::str("?")]);
    }

    #[test]
    fn too_many_positionals() {
        let err = bind_arguments("f", &params(&[("a", None)]), vec![Value::Int(1), Value::Int(2)], Kwargs::new())
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Argument);
        assert_eq!(err.message, "f() takes 1 positional argument but 2 were given");
    }

    #[test]
    fn unknown_keyword_is_rejected() {
        let kw: Kwargs = [("nme", "x")].into_iter().collect();
        let err = bind_arguments("greet", &greet_params(), vec![Value::str("a")], kw).unwrap_err();
        assert_eq!(err.message, "greet() got an unexpected keyword argument 'nme'");
    }

    #[test]
    fn keyword_for_bound_positional() {
        let kw: Kwargs = [("name", "x")].into_iter().collect();
        let err = bind_arguments("greet", &greet_params(), vec![Value::str("a")], kw).unwrap_err();
        assert!(err.message.contains("multiple values"));
    }

    #[test]
    fn missing_required_is_named() {
        let err = bind_arguments("greet", &greet_params(), vec![], Kwargs::new()).unwrap_err();
        assert_eq!(err.message, "greet() missing required argument 'name'");
    }

    #[test]
    fn kwargs_typed_getters() {
        let kw: Kwargs = [("indent", Value::Int(2)), ("sep", Value::str(", "))].into_iter().collect();
        assert_eq!(kw.get_int("indent", 0).unwrap(), 2);
        assert_eq!(kw.get_str("sep", " ").unwrap(), ", ");
        assert_eq!(kw.get_str("end", "\n").unwrap(), "\n");
        assert!(kw.get_bool("indent", false).is_err());
        assert!(kw.check_allowed("print", &["sep", "end"]).is_err());
    }

    #[test]
    fn host_error_value_becomes_raised_error() {
        let f = HostFunction::new("fail", |_, _, _| Value::error("boom"));
        let err = f.call(&CancelToken::new(), &Kwargs::new(), &[]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Raised);
        assert_eq!(err.message, "boom");
    }

    #[test]
    fn detached_callback_reaches_host_functions_only() {
        let twice = HostFunction::with_caller("twice", |caller, _, args| {
            let once = caller.call(&args[0], vec![args[1].clone()])?;
            caller.call(&args[0], vec![once])
        });
        let inc = Value::host_function(HostFunction::native("inc", |_, _, a| Ok(Value::Int(a[0].as_int()? + 1))));
        let out = twice.call(&CancelToken::new(), &Kwargs::new(), &[inc, Value::Int(5)]).unwrap();
        assert_eq!(out, Value::Int(7));
    }

    #[test]
    fn host_error_after_cancel_is_cancellation() {
        let f = HostFunction::new("wait", |_, _, _| Value::error("interrupted"));
        let token = CancelToken::new();
        token.cancel();
        let err = f.call(&token, &Kwargs::new(), &[]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Cancellation);
    }
}
