//! Always-available built-ins. No import required.

use std::cmp::Ordering;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::error::{ErrorKind, RuntimeError};
use crate::runtime::bridge::{Caller, FunctionRegistry, HostFunction, Kwargs};
use crate::runtime::cancel::CancelToken;
use crate::runtime::output::OutputSink;
use crate::runtime::value::{Value, float_to_int};
use crate::types::methods::sort_values;

use super::{as_float, check_argc, check_argc_range};

/// Largest list `range()` will materialize.
const MAX_RANGE_LEN: usize = 10_000_000;

fn def<F>(registry: &mut FunctionRegistry, name: &str, f: F)
where
    F: Fn(&CancelToken, &Kwargs, &[Value]) -> Result<Value, RuntimeError> + 'static,
{
    registry.register(HostFunction::native(name, f));
}

/// For built-ins that call function values they are given.
fn def_calling<F>(registry: &mut FunctionRegistry, name: &str, f: F)
where
    F: Fn(&mut dyn Caller, &Kwargs, &[Value]) -> Result<Value, RuntimeError> + 'static,
{
    registry.register(HostFunction::with_caller(name, f));
}

fn no_kwargs(name: &str, kwargs: &Kwargs) -> Result<(), RuntimeError> {
    kwargs.check_allowed(name, &[])
}

pub fn install(registry: &mut FunctionRegistry, output: Rc<OutputSink>) {
    // ─── I/O ──────────────────────────────────────────────────────────────────

    def(registry, "print", move |_, kwargs, args| {
        kwargs.check_allowed("print", &["sep", "end"])?;
        let sep = kwargs.get_str("sep", " ")?;
        let end = kwargs.get_str("end", "\n")?;
        let mut line = args.iter().map(Value::to_string).collect::<Vec<_>>().join(sep.as_str());
        line.push_str(&end);
        output.write_str(&line)?;
        Ok(Value::Null)
    });

    // ─── Sizes and conversions ────────────────────────────────────────────────

    def(registry, "len", |_, kwargs, args| {
        no_kwargs("len", kwargs)?;
        check_argc("len", args, 1)?;
        let n = match &args[0] {
            Value::Str(s)  => s.chars().count(),
            Value::List(l) => l.borrow().len(),
            Value::Dict(d) => d.borrow().len(),
            other => return Err(RuntimeError::type_error(0, format!(
                "object of type '{}' has no len()", other.type_name()
            ))),
        };
        Ok(Value::from(n))
    });

    def(registry, "str", |_, kwargs, args| {
        no_kwargs("str", kwargs)?;
        check_argc_range("str", args, 0, 1)?;
        Ok(Value::from(args.first().map(Value::to_string).unwrap_or_default()))
    });

    def(registry, "repr", |_, kwargs, args| {
        no_kwargs("repr", kwargs)?;
        check_argc("repr", args, 1)?;
        Ok(Value::from(args[0].repr()))
    });

    def(registry, "int", |_, kwargs, args| {
        no_kwargs("int", kwargs)?;
        check_argc_range("int", args, 0, 1)?;
        match args.first() {
            None => Ok(Value::Int(0)),
            Some(Value::Bool(b)) => Ok(Value::Int(*b as i64)),
            Some(Value::Str(s)) => {
                let t = s.trim().replace('_', "");
                t.parse::<i64>().map(Value::Int).map_err(|_| RuntimeError::type_error(0, format!(
                    "invalid literal for int(): {}", Value::Str(Rc::clone(s)).repr()
                )))
            }
            Some(v) => v.as_int().map(Value::Int),
        }
    });

    def(registry, "float", |_, kwargs, args| {
        no_kwargs("float", kwargs)?;
        check_argc_range("float", args, 0, 1)?;
        match args.first() {
            None => Ok(Value::Float(0.0)),
            Some(Value::Bool(b)) => Ok(Value::Float(if *b { 1.0 } else { 0.0 })),
            Some(Value::Str(s)) => s.trim().parse::<f64>().map(Value::Float).map_err(|_| {
                RuntimeError::type_error(0, format!("could not convert string to float: {}", Value::Str(Rc::clone(s)).repr()))
            }),
            Some(v) => v.as_float().map(Value::Float),
        }
    });

    def(registry, "bool", |_, kwargs, args| {
        no_kwargs("bool", kwargs)?;
        check_argc_range("bool", args, 0, 1)?;
        Ok(Value::Bool(args.first().is_some_and(Value::is_truthy)))
    });

    def(registry, "type", |_, kwargs, args| {
        no_kwargs("type", kwargs)?;
        check_argc("type", args, 1)?;
        Ok(Value::str(args[0].type_name()))
    });

    def(registry, "chr", |_, kwargs, args| {
        no_kwargs("chr", kwargs)?;
        check_argc("chr", args, 1)?;
        let code = args[0].as_int()?;
        u32::try_from(code).ok().and_then(char::from_u32)
            .map(|c| Value::from(c.to_string()))
            .ok_or_else(|| RuntimeError::argument(0, format!("chr() arg {code} not in range")))
    });

    def(registry, "ord", |_, kwargs, args| {
        no_kwargs("ord", kwargs)?;
        check_argc("ord", args, 1)?;
        let s = args[0].as_str()?;
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Ok(Value::Int(c as i64)),
            _ => Err(RuntimeError::type_error(0, format!(
                "ord() expected a character, but string of length {} found", s.chars().count()
            ))),
        }
    });

    // ─── Numeric helpers ──────────────────────────────────────────────────────

    def(registry, "range", |_, kwargs, args| {
        no_kwargs("range", kwargs)?;
        check_argc_range("range", args, 1, 3)?;
        let ints: Vec<i64> = args.iter().map(Value::as_int).collect::<Result<_, _>>()?;
        let (start, stop, step) = match ints.as_slice() {
            [stop] => (0, *stop, 1),
            [start, stop] => (*start, *stop, 1),
            [start, stop, step] => (*start, *stop, *step),
            _ => unreachable!(),
        };
        if step == 0 {
            return Err(RuntimeError::argument(0, "range() arg 3 must not be zero"));
        }
        let span = if step > 0 { stop as i128 - start as i128 } else { start as i128 - stop as i128 };
        let len = if span <= 0 { 0 } else { ((span - 1) / (step as i128).abs() + 1) as u128 };
        if len > MAX_RANGE_LEN as u128 {
            return Err(RuntimeError::new(ErrorKind::Overflow, 0, format!("range() of {len} items is too large")));
        }
        let items = (0..len as i64).map(|i| Value::Int(start + i * step)).collect();
        Ok(Value::list(items))
    });

    def(registry, "sum", |_, kwargs, args| {
        kwargs.check_allowed("sum", &["start"])?;
        check_argc_range("sum", args, 1, 2)?;
        let mut total = args.get(1).or_else(|| kwargs.get("start")).cloned().unwrap_or(Value::Int(0));
        for item in args[0].iterate()? {
            total = match (&total, &item) {
                (Value::Int(a), Value::Int(b)) => Value::Int(a.checked_add(*b).ok_or_else(|| {
                    RuntimeError::new(ErrorKind::Overflow, 0, "integer overflow in sum()")
                })?),
                (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
                    Value::Float(total.as_float()? + item.as_float()?)
                }
                _ => return Err(RuntimeError::type_error(0, format!(
                    "unsupported operand type(s) for +: '{}' and '{}'", total.type_name(), item.type_name()
                ))),
            };
        }
        Ok(total)
    });

    def(registry, "min", |_, kwargs, args| extreme("min", kwargs, args, std::cmp::Ordering::Less));
    def(registry, "max", |_, kwargs, args| extreme("max", kwargs, args, std::cmp::Ordering::Greater));

    def(registry, "abs", |_, kwargs, args| {
        no_kwargs("abs", kwargs)?;
        check_argc("abs", args, 1)?;
        match &args[0] {
            Value::Int(n) => n.checked_abs().map(Value::Int)
                .ok_or_else(|| RuntimeError::new(ErrorKind::Overflow, 0, "integer overflow in abs()")),
            Value::Float(x) => Ok(Value::Float(x.abs())),
            other => Err(RuntimeError::type_error(0, format!(
                "bad operand type for abs(): '{}'", other.type_name()
            ))),
        }
    });

    // Halves round away from zero.
    def(registry, "round", |_, kwargs, args| {
        no_kwargs("round", kwargs)?;
        check_argc_range("round", args, 1, 2)?;
        let ndigits = match args.get(1) {
            None | Some(Value::Null) => None,
            Some(v) => Some(v.as_int()?),
        };
        match (&args[0], ndigits) {
            (Value::Int(n), None) => Ok(Value::Int(*n)),
            (Value::Int(n), Some(d)) if d >= 0 => Ok(Value::Int(*n)),
            (v, None) => float_to_int(as_float("round", v)?.round()).map(Value::Int),
            (v, Some(d)) => {
                let x = as_float("round", v)?;
                let m = 10f64.powi(d.clamp(-308, 308) as i32);
                let rounded = (x * m).round() / m;
                if matches!(v, Value::Int(_)) {
                    float_to_int(rounded).map(Value::Int)
                } else {
                    Ok(Value::Float(rounded))
                }
            }
        }
    });

    // ─── Ordering ─────────────────────────────────────────────────────────────

    def_calling(registry, "sorted", |caller, kwargs, args| {
        kwargs.check_allowed("sorted", &["key", "reverse"])?;
        check_argc("sorted", args, 1)?;
        let reverse = kwargs.get_bool("reverse", false)?;
        let mut items = args[0].iterate()?;
        match kwargs.get("key") {
            None | Some(Value::Null) => sort_values(&mut items, reverse)?,
            Some(key) => {
                let keys = items.iter()
                    .map(|v| caller.call(key, vec![v.clone()]))
                    .collect::<Result<Vec<_>, _>>()?;
                items = sort_keyed(items, &keys, reverse)?;
            }
        }
        Ok(Value::list(items))
    });

    def(registry, "reversed", |_, kwargs, args| {
        no_kwargs("reversed", kwargs)?;
        check_argc("reversed", args, 1)?;
        let mut items = args[0].iterate()?;
        items.reverse();
        Ok(Value::list(items))
    });

    // ─── Containers ───────────────────────────────────────────────────────────

    def(registry, "list", |_, kwargs, args| {
        no_kwargs("list", kwargs)?;
        check_argc_range("list", args, 0, 1)?;
        match args.first() {
            None => Ok(Value::list(Vec::new())),
            Some(v) => Ok(Value::list(v.iterate()?)),
        }
    });

    // dict(), dict(mapping), dict([[k, v], ...]), plus keyword entries
    def(registry, "dict", |_, kwargs, args| {
        check_argc_range("dict", args, 0, 1)?;
        let mut entries: IndexMap<String, Value> = match args.first() {
            None => IndexMap::new(),
            Some(Value::Dict(d)) => d.borrow().clone(),
            Some(other) => {
                let mut m = IndexMap::new();
                for pair in other.iterate()? {
                    let items = pair.iterate()?;
                    let [k, v] = items.as_slice() else {
                        return Err(RuntimeError::type_error(0, "dict() sequence elements must be pairs"));
                    };
                    m.insert(k.as_str()?.to_string(), v.clone());
                }
                m
            }
        };
        let mut named: Vec<(&String, &Value)> = kwargs.iter().collect();
        named.sort_by(|a, b| a.0.cmp(b.0));
        entries.extend(named.into_iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(Value::dict(entries))
    });

    def(registry, "enumerate", |_, kwargs, args| {
        kwargs.check_allowed("enumerate", &["start"])?;
        check_argc("enumerate", args, 1)?;
        let start = kwargs.get_int("start", 0)?;
        let pairs = args[0].iterate()?.into_iter().enumerate()
            .map(|(i, v)| {
                let n = i64::try_from(i).ok().and_then(|i| start.checked_add(i))
                    .ok_or_else(|| RuntimeError::new(ErrorKind::Overflow, 0, "enumerate() index overflow"))?;
                Ok(Value::list(vec![Value::Int(n), v]))
            })
            .collect::<Result<_, RuntimeError>>()?;
        Ok(Value::list(pairs))
    });

    def(registry, "zip", |_, kwargs, args| {
        no_kwargs("zip", kwargs)?;
        let columns: Vec<Vec<Value>> = args.iter().map(Value::iterate).collect::<Result<_, _>>()?;
        let len = columns.iter().map(Vec::len).min().unwrap_or(0);
        let rows = (0..len)
            .map(|i| Value::list(columns.iter().map(|c| c[i].clone()).collect()))
            .collect();
        Ok(Value::list(rows))
    });

    // ─── Higher-order ─────────────────────────────────────────────────────────

    // map(f, xs, ys, ...) calls f with one item from each, up to the shortest
    def_calling(registry, "map", |caller, kwargs, args| {
        no_kwargs("map", kwargs)?;
        if args.len() < 2 {
            return Err(RuntimeError::argument(0, "map() must have at least two arguments"));
        }
        let columns: Vec<Vec<Value>> = args[1..].iter().map(Value::iterate).collect::<Result<_, _>>()?;
        let len = columns.iter().map(Vec::len).min().unwrap_or(0);
        let out = (0..len)
            .map(|i| caller.call(&args[0], columns.iter().map(|c| c[i].clone()).collect()))
            .collect::<Result<_, _>>()?;
        Ok(Value::list(out))
    });

    // filter(None, xs) keeps the truthy items
    def_calling(registry, "filter", |caller, kwargs, args| {
        no_kwargs("filter", kwargs)?;
        check_argc("filter", args, 2)?;
        let mut kept = Vec::new();
        for item in args[1].iterate()? {
            let keep = match &args[0] {
                Value::Null => item.is_truthy(),
                f => caller.call(f, vec![item.clone()])?.is_truthy(),
            };
            if keep {
                kept.push(item);
            }
        }
        Ok(Value::list(kept))
    });

    // ─── Errors ───────────────────────────────────────────────────────────────

    // `raise Exception("msg")`; also catchable and comparable as a value
    def(registry, "Exception", |_, kwargs, args| {
        no_kwargs("Exception", kwargs)?;
        check_argc_range("Exception", args, 0, 1)?;
        Ok(Value::error(args.first().map(Value::to_string).unwrap_or_default()))
    });

    def(registry, "any", |_, kwargs, args| {
        no_kwargs("any", kwargs)?;
        check_argc("any", args, 1)?;
        Ok(Value::Bool(args[0].iterate()?.iter().any(Value::is_truthy)))
    });

    def(registry, "all", |_, kwargs, args| {
        no_kwargs("all", kwargs)?;
        check_argc("all", args, 1)?;
        Ok(Value::Bool(args[0].iterate()?.iter().all(Value::is_truthy)))
    });

    def(registry, "append", |_, kwargs, args| {
        no_kwargs("append", kwargs)?;
        check_argc("append", args, 2)?;
        args[0].as_list()?.borrow_mut().push(args[1].clone());
        Ok(Value::Null)
    });

    def(registry, "extend", |_, kwargs, args| {
        no_kwargs("extend", kwargs)?;
        check_argc("extend", args, 2)?;
        let items = args[1].iterate()?;
        args[0].as_list()?.borrow_mut().extend(items);
        Ok(Value::Null)
    });
}

/// Stable sort of `items` by the parallel `keys`.
fn sort_keyed(items: Vec<Value>, keys: &[Value], reverse: bool) -> Result<Vec<Value>, RuntimeError> {
    let mut order: Vec<usize> = (0..items.len()).collect();
    let mut failure = None;
    order.sort_by(|&a, &b| match keys[a].compare(&keys[b]) {
        Ok(o) => if reverse { o.reverse() } else { o },
        Err(e) => {
            failure.get_or_insert(e);
            Ordering::Equal
        }
    });
    if let Some(e) = failure {
        return Err(e);
    }
    let mut slots: Vec<Option<Value>> = items.into_iter().map(Some).collect();
    Ok(order.into_iter().filter_map(|i| slots[i].take()).collect())
}

/// `min`/`max` over one iterable argument or over several arguments.
fn extreme(name: &str, kwargs: &Kwargs, args: &[Value], keep: std::cmp::Ordering) -> Result<Value, RuntimeError> {
    no_kwargs(name, kwargs)?;
    let items = match args {
        [] => return Err(RuntimeError::argument(0, format!("{name}() expected at least 1 argument, got 0"))),
        [single] => single.iterate()?,
        many => many.to_vec(),
    };
    let mut iter = items.into_iter();
    let Some(mut best) = iter.next() else {
        return Err(RuntimeError::argument(0, format!("{name}() arg is an empty sequence")));
    };
    for v in iter {
        if v.compare(&best)? == keep {
            best = v;
        }
    }
    Ok(best)
}
