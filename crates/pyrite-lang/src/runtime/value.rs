use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::error::{ErrorKind, RuntimeError};
use crate::runtime::bridge::HostFunction;
use crate::runtime::env::Scope;
use crate::stack::ensure_sufficient_stack;
use crate::syntax::ast::Stmt;

/// Nesting depth past which display and repr print `...` instead of recursing.
const MAX_DISPLAY_DEPTH: usize = 64;

/// Nesting depth past which `==` gives up. Self-containing lists hit this.
const MAX_COMPARE_DEPTH: usize = 1000;

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    /// Shared: assignment aliases, mutation is visible through every alias.
    List(ListRef),
    Dict(DictRef),
    Function(Rc<Function>),
    Error(Rc<str>),
}

// ─── Shared containers ────────────────────────────────────────────────────────

/// Handle to a list's items. Clones alias the same storage.
#[derive(Clone)]
pub struct ListRef(Rc<RefCell<Vec<Value>>>);

/// Handle to a dict's entries, in insertion order.
#[derive(Clone)]
pub struct DictRef(Rc<RefCell<IndexMap<String, Value>>>);

impl ListRef {
    pub fn new(items: Vec<Value>) -> Self {
        ListRef(Rc::new(RefCell::new(items)))
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    fn is_unique(&self) -> bool {
        Rc::strong_count(&self.0) == 1
    }
}

impl DictRef {
    pub fn new(entries: IndexMap<String, Value>) -> Self {
        DictRef(Rc::new(RefCell::new(entries)))
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    fn is_unique(&self) -> bool {
        Rc::strong_count(&self.0) == 1
    }
}

impl Deref for ListRef {
    type Target = RefCell<Vec<Value>>;
    fn deref(&self) -> &Self::Target { &self.0 }
}

impl Deref for DictRef {
    type Target = RefCell<IndexMap<String, Value>>;
    fn deref(&self) -> &Self::Target { &self.0 }
}

// The last handle hands its items to `release`, so `[[[...]]]` nested
// thousands deep drops in a loop instead of one native frame per level.
impl Drop for ListRef {
    fn drop(&mut self) {
        if self.is_unique() {
            if let Ok(mut items) = self.0.try_borrow_mut() {
                release(std::mem::take(&mut *items));
            }
        }
    }
}

impl Drop for DictRef {
    fn drop(&mut self) {
        if self.is_unique() {
            if let Ok(mut entries) = self.0.try_borrow_mut() {
                release(entries.drain(..).map(|(_, v)| v).collect());
            }
        }
    }
}

fn release(mut pending: Vec<Value>) {
    while let Some(value) = pending.pop() {
        match &value {
            Value::List(l) if l.is_unique() => {
                if let Ok(mut items) = l.0.try_borrow_mut() {
                    pending.append(&mut items);
                }
            }
            Value::Dict(d) if d.is_unique() => {
                if let Ok(mut entries) = d.0.try_borrow_mut() {
                    pending.extend(entries.drain(..).map(|(_, v)| v));
                }
            }
            _ => {}
        }
    }
}

// ─── Functions ────────────────────────────────────────────────────────────────

pub enum Function {
    Script(Closure),
    Host(HostFunction),
}

impl Function {
    pub fn name(&self) -> &str {
        match self {
            Function::Script(c) => c.name.as_str(),
            Function::Host(h)   => h.name(),
        }
    }
}

/// A script function bundled with the scope it was defined in.
pub struct Closure {
    pub name: String,
    pub params: Vec<ParamSlot>,
    pub body: Rc<[Stmt]>,
    pub scope: Scope,
}

/// A parameter with its default already evaluated.
#[derive(Clone)]
pub struct ParamSlot {
    pub name: String,
    pub default: Option<Value>,
}

// ─── Construction ─────────────────────────────────────────────────────────────

impl Value {
    pub fn str(s: impl AsRef<str>) -> Self {
        Value::Str(Rc::from(s.as_ref()))
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(ListRef::new(items))
    }

    pub fn dict(entries: IndexMap<String, Value>) -> Self {
        Value::Dict(DictRef::new(entries))
    }

    pub fn error(message: impl AsRef<str>) -> Self {
        Value::Error(Rc::from(message.as_ref()))
    }

    pub fn host_function(f: HostFunction) -> Self {
        Value::Function(Rc::new(Function::Host(f)))
    }
}

// ─── Inspection ───────────────────────────────────────────────────────────────

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null        => "NoneType",
            Value::Bool(_)     => "bool",
            Value::Int(_)      => "int",
            Value::Float(_)    => "float",
            Value::Str(_)      => "str",
            Value::List(_)     => "list",
            Value::Dict(_)     => "dict",
            Value::Function(_) => "function",
            Value::Error(_)    => "error",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    /// `None`, `False`, zero, and empty strings/containers are false.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null        => false,
            Value::Bool(b)     => *b,
            Value::Int(n)      => *n != 0,
            Value::Float(x)    => *x != 0.0,
            Value::Str(s)      => !s.is_empty(),
            Value::List(l)     => !l.borrow().is_empty(),
            Value::Dict(d)     => !d.borrow().is_empty(),
            Value::Function(_) => true,
            Value::Error(_)    => true,
        }
    }

    fn mismatch(&self, expected: &str) -> RuntimeError {
        RuntimeError::type_error(0, format!("expected {expected}, got {}", self.type_name()))
    }
}

// ─── Accessors ────────────────────────────────────────────────────────────────

impl Value {
    /// Floats narrow by truncation toward zero.
    pub fn as_int(&self) -> Result<i64, RuntimeError> {
        match self {
            Value::Int(n) => Ok(*n),
            Value::Float(x) => float_to_int(*x),
            _ => Err(self.mismatch("int")),
        }
    }

    /// Ints widen.
    pub fn as_float(&self) -> Result<f64, RuntimeError> {
        match self {
            Value::Float(x) => Ok(*x),
            Value::Int(n)   => Ok(*n as f64),
            _ => Err(self.mismatch("float")),
        }
    }

    pub fn as_str(&self) -> Result<&str, RuntimeError> {
        match self {
            Value::Str(s) => Ok(&**s),
            _ => Err(self.mismatch("str")),
        }
    }

    pub fn as_bool(&self) -> Result<bool, RuntimeError> {
        match self {
            Value::Bool(b) => Ok(*b),
            _ => Err(self.mismatch("bool")),
        }
    }

    pub fn as_list(&self) -> Result<ListRef, RuntimeError> {
        match self {
            Value::List(l) => Ok(l.clone()),
            _ => Err(self.mismatch("list")),
        }
    }

    pub fn as_dict(&self) -> Result<DictRef, RuntimeError> {
        match self {
            Value::Dict(d) => Ok(d.clone()),
            _ => Err(self.mismatch("dict")),
        }
    }

    pub fn as_function(&self) -> Result<Rc<Function>, RuntimeError> {
        match self {
            Value::Function(f) => Ok(Rc::clone(f)),
            _ => Err(RuntimeError::type_error(0, format!("'{}' object is not callable", self.type_name()))),
        }
    }

    /// The items a `for` loop visits: a snapshot of a list, the keys of a
    /// dict, or the characters of a string.
    pub fn iterate(&self) -> Result<Vec<Value>, RuntimeError> {
        match self {
            Value::List(l) => Ok(l.borrow().clone()),
            Value::Dict(d) => Ok(d.borrow().keys().map(Value::str).collect()),
            Value::Str(s)  => Ok(s.chars().map(|c| Value::str(c.to_string())).collect()),
            _ => Err(RuntimeError::type_error(0, format!("'{}' object is not iterable", self.type_name()))),
        }
    }

    /// Membership test backing `in` and `not in`.
    pub fn contains(&self, needle: &Value) -> Result<bool, RuntimeError> {
        match self {
            Value::List(l) => {
                for item in l.borrow().iter() {
                    if item.equals(needle)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Value::Dict(d) => match needle {
                Value::Str(k) => Ok(d.borrow().contains_key(&**k)),
                _ => Ok(false),
            },
            Value::Str(s) => match needle {
                Value::Str(sub) => Ok(s.contains(&**sub)),
                other => Err(RuntimeError::type_error(0, format!(
                    "'in <str>' requires str as left operand, not {}", other.type_name()
                ))),
            },
            _ => Err(RuntimeError::type_error(0, format!(
                "argument of type '{}' is not iterable", self.type_name()
            ))),
        }
    }

    /// Ordering for numbers and strings. Anything else is a TypeError.
    pub fn compare(&self, other: &Value) -> Result<Ordering, RuntimeError> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Ok(a.cmp(b)),
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
                let (a, b) = (self.as_float()?, other.as_float()?);
                a.partial_cmp(&b)
                    .ok_or_else(|| RuntimeError::type_error(0, "cannot order NaN"))
            }
            (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
            _ => Err(RuntimeError::type_error(0, format!(
                "cannot compare {} with {}", self.type_name(), other.type_name()
            ))),
        }
    }
}

pub(crate) fn float_to_int(x: f64) -> Result<i64, RuntimeError> {
    if x.is_nan() || x.is_infinite() {
        return Err(RuntimeError::new(ErrorKind::Overflow, 0, format!("cannot convert {} to int", format_float(x))));
    }
    let t = x.trunc();
    // i64::MAX is not exactly representable; 2^63 is the first float out of range
    if t < -9_223_372_036_854_775_808.0 || t >= 9_223_372_036_854_775_808.0 {
        return Err(RuntimeError::new(ErrorKind::Overflow, 0, format!("float {} out of int range", format_float(x))));
    }
    Ok(t as i64)
}

// ─── Equality ─────────────────────────────────────────────────────────────────

impl Value {
    /// Structural equality backing `==`, `in` and the list search methods.
    /// Containers nested past the comparison limit, including a list that
    /// contains itself, fail instead of recursing forever.
    pub fn equals(&self, other: &Value) -> Result<bool, RuntimeError> {
        self.equals_at(other, 0)
    }

    fn equals_at(&self, other: &Value, depth: usize) -> Result<bool, RuntimeError> {
        Ok(match (self, other) {
            (Value::Null, Value::Null)               => true,
            (Value::Bool(a), Value::Bool(b))         => a == b,
            (Value::Int(a), Value::Int(b))           => a == b,
            (Value::Float(a), Value::Float(b))       => a == b,
            (Value::Int(a), Value::Float(b))
            | (Value::Float(b), Value::Int(a))       => (*a as f64) == *b,
            (Value::Str(a), Value::Str(b))           => a == b,
            (Value::List(a), Value::List(b)) => {
                if a.ptr_eq(b) {
                    return Ok(true);
                }
                let (a, b) = (a.borrow(), b.borrow());
                if a.len() != b.len() {
                    return Ok(false);
                }
                let depth = nested(depth)?;
                for (x, y) in a.iter().zip(b.iter()) {
                    if !ensure_sufficient_stack(|| x.equals_at(y, depth))? {
                        return Ok(false);
                    }
                }
                true
            }
            (Value::Dict(a), Value::Dict(b)) => {
                if a.ptr_eq(b) {
                    return Ok(true);
                }
                let (a, b) = (a.borrow(), b.borrow());
                if a.len() != b.len() {
                    return Ok(false);
                }
                let depth = nested(depth)?;
                for (k, x) in a.iter() {
                    let Some(y) = b.get(k) else { return Ok(false) };
                    if !ensure_sufficient_stack(|| x.equals_at(y, depth))? {
                        return Ok(false);
                    }
                }
                true
            }
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Error(a), Value::Error(b))       => a == b,
            _ => false,
        })
    }
}

fn nested(depth: usize) -> Result<usize, RuntimeError> {
    if depth >= MAX_COMPARE_DEPTH {
        return Err(RuntimeError::new(
            ErrorKind::StackOverflow,
            0,
            "maximum recursion depth exceeded in comparison",
        ));
    }
    Ok(depth + 1)
}

/// Host-side equality. Values too deep to compare are unequal.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other).unwrap_or(false)
    }
}

// ─── Display / repr ───────────────────────────────────────────────────────────

pub(crate) fn format_float(x: f64) -> String {
    if x.is_nan() {
        "nan".into()
    } else if x.is_infinite() {
        if x > 0.0 { "inf".into() } else { "-inf".into() }
    } else if x == x.trunc() && x.abs() < 1e16 {
        format!("{x:.1}")
    } else {
        format!("{x}")
    }
}

fn repr_str(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if c == quote => { out.push('\\'); out.push(c); }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

impl Value {
    /// Quoted form used for container elements and `repr()`.
    pub fn repr(&self) -> String {
        self.render(true, 0)
    }

    fn render(&self, quoted: bool, depth: usize) -> String {
        if depth > MAX_DISPLAY_DEPTH {
            return "...".into();
        }
        match self {
            Value::Null     => "None".into(),
            Value::Bool(b)  => if *b { "True".into() } else { "False".into() },
            Value::Int(n)   => n.to_string(),
            Value::Float(x) => format_float(*x),
            Value::Str(s)   => if quoted { repr_str(s) } else { s.to_string() },
            Value::List(l)  => {
                let parts: Vec<String> = l.borrow().iter().map(|v| v.render(true, depth + 1)).collect();
                format!("[{}]", parts.join(", "))
            }
            Value::Dict(d)  => {
                let parts: Vec<String> = d.borrow().iter()
                    .map(|(k, v)| format!("{}: {}", repr_str(k), v.render(true, depth + 1)))
                    .collect();
                format!("{{{}}}", parts.join(", "))
            }
            Value::Function(f) => match &**f {
                Function::Script(c) => format!("<function {}>", c.name),
                Function::Host(h)   => format!("<built-in function {}>", h.name()),
            },
            Value::Error(msg) => if quoted { format!("Error({})", repr_str(msg)) } else { msg.to_string() },
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(false, 0))
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr())
    }
}

// ─── Host conversions ─────────────────────────────────────────────────────────

impl From<i64> for Value {
    fn from(n: i64) -> Self { Value::Int(n) }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self { Value::Int(n as i64) }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self { Value::Int(n as i64) }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self { Value::Float(x) }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self { Value::Bool(b) }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self { Value::str(s) }
}

impl From<String> for Value {
    fn from(s: String) -> Self { Value::Str(Rc::from(s)) }
}

impl From<()> for Value {
    fn from(_: ()) -> Self { Value::Null }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::list(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map_or(Value::Null, Into::into)
    }
}

impl<T: Into<Value>> From<IndexMap<String, T>> for Value {
    fn from(map: IndexMap<String, T>) -> Self {
        Value::dict(map.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

/// Keys are sorted so the resulting dict has a stable order.
impl<T: Into<Value>> From<HashMap<String, T>> for Value {
    fn from(map: HashMap<String, T>) -> Self {
        let mut entries: Vec<(String, T)> = map.into_iter().collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Value::dict(entries.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

/// Typed extraction used by `Interpreter::get_var_as` and host functions.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Result<Self, RuntimeError>;
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self, RuntimeError> { Ok(value.clone()) }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self, RuntimeError> { value.as_int() }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self, RuntimeError> { value.as_float() }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self, RuntimeError> { value.as_bool() }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self, RuntimeError> { value.as_str().map(str::to_string) }
}

impl FromValue for Vec<Value> {
    fn from_value(value: &Value) -> Result<Self, RuntimeError> {
        Ok(value.as_list()?.borrow().clone())
    }
}

impl FromValue for IndexMap<String, Value> {
    fn from_value(value: &Value) -> Result<Self, RuntimeError> {
        Ok(value.as_dict()?.borrow().clone())
    }
}

// ─── JSON ─────────────────────────────────────────────────────────────────────

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        use serde_json::Value as J;
        match json {
            J::Null      => Value::Null,
            J::Bool(b)   => Value::Bool(b),
            J::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None    => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            J::String(s) => Value::from(s),
            J::Array(a)  => Value::list(a.into_iter().map(Value::from).collect()),
            J::Object(o) => Value::dict(o.into_iter().map(|(k, v)| (k, Value::from(v))).collect()),
        }
    }
}

impl Value {
    pub fn to_json(&self) -> Result<serde_json::Value, RuntimeError> {
        self.to_json_at(0)
    }

    fn to_json_at(&self, depth: usize) -> Result<serde_json::Value, RuntimeError> {
        use serde_json::Value as J;
        if depth > MAX_DISPLAY_DEPTH {
            return Err(RuntimeError::type_error(0, "value is nested too deeply to serialize"));
        }
        Ok(match self {
            Value::Null     => J::Null,
            Value::Bool(b)  => J::Bool(*b),
            Value::Int(n)   => J::from(*n),
            Value::Float(x) => serde_json::Number::from_f64(*x)
                .map(J::Number)
                .ok_or_else(|| RuntimeError::type_error(0, format!("{} is not JSON serializable", format_float(*x))))?,
            Value::Str(s)   => J::String(s.to_string()),
            Value::List(l)  => J::Array(
                l.borrow().iter().map(|v| v.to_json_at(depth + 1)).collect::<Result<_, _>>()?,
            ),
            Value::Dict(d)  => {
                let mut obj = serde_json::Map::new();
                for (k, v) in d.borrow().iter() {
                    obj.insert(k.clone(), v.to_json_at(depth + 1)?);
                }
                J::Object(obj)
            }
            Value::Function(_) | Value::Error(_) => {
                return Err(RuntimeError::type_error(0, format!(
                    "object of type {} is not JSON serializable", self.type_name()
                )));
            }
        })
    }
}
