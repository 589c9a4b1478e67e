//! Method table for the built-in receiver kinds (str, list, dict).
//!
//! Adding a method = one `MethodDesc` in the matching `*_methods()` list.
//! The interpreter only looks methods up; it implements none itself.

use std::cmp::Ordering;
use std::collections::HashMap;

use indexmap::IndexMap;

use crate::error::{ErrorKind, RuntimeError};
use crate::runtime::bridge::Kwargs;
use crate::runtime::value::Value;

// ─── Descriptors ──────────────────────────────────────────────────────────────

/// Receives the receiver and pre-evaluated arguments. The registry has
/// already checked the receiver kind, the argument count and the keywords.
pub type MethodFn = fn(&Value, &[Value], &Kwargs) -> Result<Value, RuntimeError>;

pub struct MethodDesc {
    pub name: &'static str,
    pub min_args: usize,
    pub max_args: usize,
    /// Accepted keyword arguments. `None` accepts any.
    pub kwargs: Option<&'static [&'static str]>,
    pub call: MethodFn,
}

impl MethodDesc {
    fn new(name: &'static str, min_args: usize, max_args: usize, call: MethodFn) -> Self {
        Self { name, min_args, max_args, kwargs: Some(&[]), call }
    }

    fn with_kwargs(mut self, kwargs: Option<&'static [&'static str]>) -> Self {
        self.kwargs = kwargs;
        self
    }
}

pub struct TypeDesc {
    pub name: &'static str,
    pub methods: Vec<MethodDesc>,
}

// ─── Registry ─────────────────────────────────────────────────────────────────

pub struct MethodRegistry {
    types: HashMap<&'static str, TypeDesc>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self { types: HashMap::new() }
    }

    pub fn register(&mut self, desc: TypeDesc) {
        self.types.insert(desc.name, desc);
    }

    pub fn find(&self, type_name: &str, method: &str) -> Option<&MethodDesc> {
        self.types.get(type_name)?.methods.iter().find(|m| m.name == method)
    }

    /// Call `recv.method(args)`. `None` if the receiver kind has no such method.
    pub fn call(
        &self,
        recv: &Value,
        method: &str,
        args: &[Value],
        kwargs: &Kwargs,
    ) -> Option<Result<Value, RuntimeError>> {
        let desc = self.find(recv.type_name(), method)?;
        Some(check_call(desc, recv, args, kwargs).and_then(|_| (desc.call)(recv, args, kwargs)))
    }
}

fn check_call(desc: &MethodDesc, recv: &Value, args: &[Value], kwargs: &Kwargs) -> Result<(), RuntimeError> {
    let qualified = format!("{}.{}", recv.type_name(), desc.name);
    if args.len() < desc.min_args || args.len() > desc.max_args {
        let expected = if desc.min_args == desc.max_args {
            desc.min_args.to_string()
        } else {
            format!("{} to {}", desc.min_args, desc.max_args)
        };
        return Err(RuntimeError::argument(0, format!(
            "{qualified}() takes {expected} argument(s), got {}", args.len()
        )));
    }
    match desc.kwargs {
        Some(allowed) => kwargs.check_allowed(&qualified, allowed),
        None => Ok(()),
    }
}

impl Default for MethodRegistry {
    fn default() -> Self {
        let mut r = Self::new();
        r.register(TypeDesc { name: "str", methods: str_methods() });
        r.register(TypeDesc { name: "list", methods: list_methods() });
        r.register(TypeDesc { name: "dict", methods: dict_methods() });
        r
    }
}

// ─── Shared helpers ───────────────────────────────────────────────────────────

/// Resolve a possibly negative index against `len`.
pub(crate) fn normalize_index(i: i64, len: usize) -> Option<usize> {
    let idx = if i < 0 { i + len as i64 } else { i };
    if idx >= 0 && (idx as usize) < len { Some(idx as usize) } else { None }
}

/// Stable sort by `Value::compare`, reporting the first incomparable pair.
pub(crate) fn sort_values(items: &mut [Value], reverse: bool) -> Result<(), RuntimeError> {
    let mut failure = None;
    items.sort_by(|a, b| match a.compare(b) {
        Ok(o) => if reverse { o.reverse() } else { o },
        Err(e) => {
            failure.get_or_insert(e);
            Ordering::Equal
        }
    });
    failure.map_or(Ok(()), Err)
}

fn position(items: &[Value], needle: &Value) -> Result<Option<usize>, RuntimeError> {
    for (i, v) in items.iter().enumerate() {
        if v.equals(needle)? {
            return Ok(Some(i));
        }
    }
    Ok(None)
}

fn key_arg(v: &Value) -> Result<&str, RuntimeError> {
    v.as_str().map_err(|_| RuntimeError::type_error(0, format!(
        "dict keys must be str, not {}", v.type_name()
    )))
}

fn recv_str(v: &Value) -> &str {
    let Value::Str(s) = v else { unreachable!() };
    s
}

// ─── str ──────────────────────────────────────────────────────────────────────

fn str_methods() -> Vec<MethodDesc> {
    vec![
        MethodDesc::new("upper", 0, 0, |s, _, _| Ok(Value::str(recv_str(s).to_uppercase()))),
        MethodDesc::new("lower", 0, 0, |s, _, _| Ok(Value::str(recv_str(s).to_lowercase()))),
        MethodDesc::new("capitalize", 0, 0, |s, _, _| {
            let mut chars = recv_str(s).chars();
            let out = match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            };
            Ok(Value::from(out))
        }),
        MethodDesc::new("title", 0, 0, |s, _, _| {
            let mut out = String::new();
            let mut at_word_start = true;
            for c in recv_str(s).chars() {
                if c.is_alphabetic() {
                    if at_word_start { out.extend(c.to_uppercase()) } else { out.extend(c.to_lowercase()) }
                    at_word_start = false;
                } else {
                    out.push(c);
                    at_word_start = true;
                }
            }
            Ok(Value::from(out))
        }),
        MethodDesc::new("strip",  0, 1, |s, a, _| strip(recv_str(s), a.first(), true, true)),
        MethodDesc::new("lstrip", 0, 1, |s, a, _| strip(recv_str(s), a.first(), true, false)),
        MethodDesc::new("rstrip", 0, 1, |s, a, _| strip(recv_str(s), a.first(), false, true)),
        MethodDesc::new("split", 0, 1, |s, a, _| {
            let s = recv_str(s);
            let parts: Vec<Value> = match a.first() {
                None | Some(Value::Null) => s.split_whitespace().map(Value::str).collect(),
                Some(sep) => {
                    let sep = sep.as_str()?;
                    if sep.is_empty() {
                        return Err(RuntimeError::argument(0, "empty separator"));
                    }
                    s.split(sep).map(Value::str).collect()
                }
            };
            Ok(Value::list(parts))
        }),
        MethodDesc::new("join", 1, 1, |s, a, _| {
            let items = a[0].iterate()?;
            let mut parts = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                match item {
                    Value::Str(p) => parts.push(p.to_string()),
                    other => return Err(RuntimeError::type_error(0, format!(
                        "sequence item {i}: expected str, {} found", other.type_name()
                    ))),
                }
            }
            Ok(Value::from(parts.join(recv_str(s))))
        }),
        MethodDesc::new("replace", 2, 3, |s, a, _| {
            let (old, new) = (a[0].as_str()?, a[1].as_str()?);
            let out = match a.get(2) {
                Some(n) if n.as_int()? >= 0 => recv_str(s).replacen(old, new, n.as_int()? as usize),
                _ => recv_str(s).replace(old, new),
            };
            Ok(Value::from(out))
        }),
        MethodDesc::new("startswith", 1, 1, |s, a, _| Ok(Value::Bool(recv_str(s).starts_with(a[0].as_str()?)))),
        MethodDesc::new("endswith",   1, 1, |s, a, _| Ok(Value::Bool(recv_str(s).ends_with(a[0].as_str()?)))),
        MethodDesc::new("find", 1, 1, |s, a, _| {
            let s = recv_str(s);
            let idx = s.find(a[0].as_str()?).map_or(-1, |byte| s[..byte].chars().count() as i64);
            Ok(Value::Int(idx))
        }),
        MethodDesc::new("count", 1, 1, |s, a, _| {
            let (s, sub) = (recv_str(s), a[0].as_str()?);
            let n = if sub.is_empty() { s.chars().count() + 1 } else { s.matches(sub).count() };
            Ok(Value::from(n))
        }),
        MethodDesc::new("isdigit", 0, 0, |s, _, _| {
            let s = recv_str(s);
            Ok(Value::Bool(!s.is_empty() && s.chars().all(|c| c.is_ascii_digit())))
        }),
        MethodDesc::new("isalpha", 0, 0, |s, _, _| {
            let s = recv_str(s);
            Ok(Value::Bool(!s.is_empty() && s.chars().all(char::is_alphabetic)))
        }),
        MethodDesc::new("format", 0, usize::MAX, |s, a, kw| format_str(recv_str(s), a, kw))
            .with_kwargs(None),
    ]
}

fn strip(s: &str, chars: Option<&Value>, left: bool, right: bool) -> Result<Value, RuntimeError> {
    let set: Option<Vec<char>> = match chars {
        None | Some(Value::Null) => None,
        Some(v) => Some(v.as_str()?.chars().collect()),
    };
    let matches = |c: char| match &set {
        Some(cs) => cs.contains(&c),
        None => c.is_whitespace(),
    };
    let out = match (left, right) {
        (true, true)  => s.trim_matches(matches),
        (true, false) => s.trim_start_matches(matches),
        _             => s.trim_end_matches(matches),
    };
    Ok(Value::str(out))
}

/// `"{} and {name} and {0}".format(...)`, with `{{`/`}}` escapes.
fn format_str(template: &str, args: &[Value], kwargs: &Kwargs) -> Result<Value, RuntimeError> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    let mut auto_index = 0usize;

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => { chars.next(); out.push('{'); }
            '}' if chars.peek() == Some(&'}') => { chars.next(); out.push('}'); }
            '}' => return Err(RuntimeError::argument(0, "single '}' encountered in format string")),
            '{' => {
                let mut field = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(ch) => field.push(ch),
                        None => return Err(RuntimeError::argument(0, "unclosed '{' in format string")),
                    }
                }
                let (field, spec) = field.split_once(':').unwrap_or((field.as_str(), ""));
                let value = if field.is_empty() {
                    auto_index += 1;
                    args.get(auto_index - 1).ok_or_else(|| RuntimeError::new(
                        ErrorKind::Index, 0, format!("format index {} out of range", auto_index - 1),
                    ))?
                } else if let Ok(i) = field.parse::<usize>() {
                    args.get(i).ok_or_else(|| RuntimeError::new(
                        ErrorKind::Index, 0, format!("format index {i} out of range"),
                    ))?
                } else {
                    kwargs.get(field).ok_or_else(|| RuntimeError::new(
                        ErrorKind::Key, 0, format!("format key '{field}' not provided"),
                    ))?
                };
                out.push_str(&format_value(value, spec)?);
            }
            c => out.push(c),
        }
    }
    Ok(Value::from(out))
}

/// Render `v` under a format spec `[[fill]align][+][0][width][.precision][type]`.
/// Types: `s` for strings, `d` for ints, `f` and `%` for numbers. A
/// precision without a type formats numbers as `f`.
pub(crate) fn format_value(v: &Value, spec: &str) -> Result<String, RuntimeError> {
    if spec.is_empty() {
        return Ok(v.to_string());
    }
    let invalid = || RuntimeError::argument(0, format!(
        "invalid format spec '{spec}' for {}", v.type_name()
    ));
    let chars: Vec<char> = spec.chars().collect();
    let mut i = 0;
    let digits = |i: &mut usize| -> Result<Option<usize>, RuntimeError> {
        let start = *i;
        while chars.get(*i).is_some_and(char::is_ascii_digit) {
            *i += 1;
        }
        if start == *i {
            return Ok(None);
        }
        chars[start..*i].iter().collect::<String>().parse().map(Some).map_err(|_| invalid())
    };

    let mut fill = ' ';
    let mut align = None;
    if chars.len() >= 2 && matches!(chars[1], '<' | '>' | '^') {
        (fill, align, i) = (chars[0], Some(chars[1]), 2);
    } else if matches!(chars[0], '<' | '>' | '^') {
        (align, i) = (Some(chars[0]), 1);
    }
    let plus = chars.get(i) == Some(&'+');
    if plus {
        i += 1;
    }
    if align.is_none() && chars.get(i) == Some(&'0') {
        (fill, align) = ('0', Some('='));
        i += 1;
    }
    let width = digits(&mut i)?.unwrap_or(0);
    let precision = if chars.get(i) == Some(&'.') {
        i += 1;
        Some(digits(&mut i)?.ok_or_else(invalid)?)
    } else {
        None
    };
    let kind = chars.get(i).copied();
    if chars.len() > i + usize::from(kind.is_some()) {
        return Err(invalid());
    }

    let number = matches!(v, Value::Int(_) | Value::Float(_));
    let body = match (kind, v) {
        (None | Some('s'), Value::Str(s)) => match precision {
            Some(p) => s.chars().take(p).collect(),
            None => s.to_string(),
        },
        (None | Some('d'), Value::Int(n)) if precision.is_none() => signed(n.to_string(), plus),
        (None, Value::Float(_)) if precision.is_none() => signed(v.to_string(), plus),
        (None | Some('f'), _) if number => signed(format!("{:.*}", precision.unwrap_or(6), v.as_float()?), plus),
        (Some('%'), _) if number => {
            signed(format!("{:.*}%", precision.unwrap_or(6), v.as_float()? * 100.0), plus)
        }
        (None, _) if precision.is_none() && !plus => v.to_string(),
        _ => return Err(invalid()),
    };

    let len = body.chars().count();
    if width <= len {
        return Ok(body);
    }
    let pad = |n: usize| fill.to_string().repeat(n);
    let gap = width - len;
    Ok(match align.unwrap_or(if number { '>' } else { '<' }) {
        '<' => body + &pad(gap),
        '^' => format!("{}{body}{}", pad(gap / 2), pad(gap - gap / 2)),
        '=' => match body.strip_prefix(['-', '+']) {
            Some(rest) => format!("{}{}{rest}", &body[..1], pad(gap)),
            None => pad(gap) + &body,
        },
        _ => pad(gap) + &body,
    })
}

fn signed(text: String, plus: bool) -> String {
    if plus && !text.starts_with('-') { format!("+{text}") } else { text }
}

// ─── list ─────────────────────────────────────────────────────────────────────

fn list_methods() -> Vec<MethodDesc> {
    vec![
        MethodDesc::new("append", 1, 1, |l, a, _| {
            l.as_list()?.borrow_mut().push(a[0].clone());
            Ok(Value::Null)
        }),
        MethodDesc::new("extend", 1, 1, |l, a, _| {
            let items = a[0].iterate()?;
            l.as_list()?.borrow_mut().extend(items);
            Ok(Value::Null)
        }),
        MethodDesc::new("pop", 0, 1, |l, a, _| {
            let list = l.as_list()?;
            let mut items = list.borrow_mut();
            let i = match a.first() { Some(v) => v.as_int()?, None => -1 };
            match normalize_index(i, items.len()) {
                Some(idx) => Ok(items.remove(idx)),
                None if items.is_empty() => Err(RuntimeError::new(ErrorKind::Index, 0, "pop from empty list")),
                None => Err(RuntimeError::new(ErrorKind::Index, 0, "pop index out of range")),
            }
        }),
        MethodDesc::new("insert", 2, 2, |l, a, _| {
            let list = l.as_list()?;
            let mut items = list.borrow_mut();
            let len = items.len() as i64;
            let i = a[0].as_int()?;
            let idx = if i < 0 { (i + len).max(0) } else { i.min(len) };
            items.insert(idx as usize, a[1].clone());
            Ok(Value::Null)
        }),
        MethodDesc::new("index", 1, 1, |l, a, _| {
            let pos = position(&l.as_list()?.borrow(), &a[0])?;
            pos.map(Value::from).ok_or_else(|| RuntimeError::new(
                ErrorKind::Index, 0, format!("{} is not in list", a[0].repr()),
            ))
        }),
        MethodDesc::new("count", 1, 1, |l, a, _| {
            let mut n = 0usize;
            for v in l.as_list()?.borrow().iter() {
                if v.equals(&a[0])? {
                    n += 1;
                }
            }
            Ok(Value::from(n))
        }),
        MethodDesc::new("remove", 1, 1, |l, a, _| {
            let list = l.as_list()?;
            let pos = position(&list.borrow(), &a[0])?;
            match pos {
                Some(i) => { list.borrow_mut().remove(i); Ok(Value::Null) }
                None => Err(RuntimeError::new(ErrorKind::Index, 0, format!("{} is not in list", a[0].repr()))),
            }
        }),
        MethodDesc::new("clear", 0, 0, |l, _, _| {
            let drained: Vec<Value> = l.as_list()?.borrow_mut().drain(..).collect();
            drop(drained);
            Ok(Value::Null)
        }),
        MethodDesc::new("copy", 0, 0, |l, _, _| Ok(Value::list(l.as_list()?.borrow().clone()))),
        MethodDesc::new("reverse", 0, 0, |l, _, _| {
            l.as_list()?.borrow_mut().reverse();
            Ok(Value::Null)
        }),
        MethodDesc::new("sort", 0, 0, |l, _, kw| {
            let list = l.as_list()?;
            let mut items = list.borrow().clone();
            sort_values(&mut items, kw.get_bool("reverse", false)?)?;
            *list.borrow_mut() = items;
            Ok(Value::Null)
        }).with_kwargs(Some(&["reverse"])),
    ]
}

// ─── dict ─────────────────────────────────────────────────────────────────────

fn dict_methods() -> Vec<MethodDesc> {
    vec![
        MethodDesc::new("keys", 0, 0, |d, _, _| {
            Ok(Value::list(d.as_dict()?.borrow().keys().map(Value::str).collect()))
        }),
        MethodDesc::new("values", 0, 0, |d, _, _| {
            Ok(Value::list(d.as_dict()?.borrow().values().cloned().collect()))
        }),
        MethodDesc::new("items", 0, 0, |d, _, _| {
            let pairs = d.as_dict()?.borrow().iter()
                .map(|(k, v)| Value::list(vec![Value::str(k), v.clone()]))
                .collect();
            Ok(Value::list(pairs))
        }),
        MethodDesc::new("get", 1, 2, |d, a, _| {
            let key = key_arg(&a[0])?;
            let found = d.as_dict()?.borrow().get(key).cloned();
            Ok(found.unwrap_or_else(|| a.get(1).cloned().unwrap_or(Value::Null)))
        }),
        MethodDesc::new("pop", 1, 2, |d, a, _| {
            let key = key_arg(&a[0])?;
            let removed = d.as_dict()?.borrow_mut().shift_remove(key);
            match (removed, a.get(1)) {
                (Some(v), _) => Ok(v),
                (None, Some(default)) => Ok(default.clone()),
                (None, None) => Err(RuntimeError::new(ErrorKind::Key, 0, format!("key {} not found", a[0].repr()))),
            }
        }),
        MethodDesc::new("setdefault", 1, 2, |d, a, _| {
            let key = key_arg(&a[0])?;
            let dict = d.as_dict()?;
            let mut entries = dict.borrow_mut();
            let v = entries.entry(key.to_string()).or_insert_with(|| a.get(1).cloned().unwrap_or(Value::Null));
            Ok(v.clone())
        }),
        MethodDesc::new("update", 0, 1, |d, a, kw| {
            let mut incoming: IndexMap<String, Value> = match a.first() {
                Some(other) => other.as_dict()?.borrow().clone(),
                None => IndexMap::new(),
            };
            let mut named: Vec<(&String, &Value)> = kw.iter().collect();
            named.sort_by(|x, y| x.0.cmp(y.0));
            incoming.extend(named.into_iter().map(|(k, v)| (k.clone(), v.clone())));
            d.as_dict()?.borrow_mut().extend(incoming);
            Ok(Value::Null)
        }).with_kwargs(None),
        MethodDesc::new("clear", 0, 0, |d, _, _| {
            let drained: Vec<(String, Value)> = d.as_dict()?.borrow_mut().drain(..).collect();
            drop(drained);
            Ok(Value::Null)
        }),
        MethodDesc::new("copy", 0, 0, |d, _, _| Ok(Value::dict(d.as_dict()?.borrow().clone()))),
    ]
}
