//! Operator registry: maps (BinOp, lhs kind, rhs kind) to an implementation.
//!
//! Supporting an operator for another pair of kinds = one `register()` call.
//! Equality and membership are not routed through here; they are defined for
//! every pair of values.

use std::collections::HashMap;

use crate::error::{ErrorKind, RuntimeError};
use crate::runtime::value::Value;
use crate::syntax::ast::BinOp;

// ─── Function pointer ─────────────────────────────────────────────────────────

pub type BinopFn = fn(Value, Value, usize) -> Result<Value, RuntimeError>;

// ─── Registry ─────────────────────────────────────────────────────────────────

pub struct BinopRegistry {
    ops: HashMap<(BinOp, &'static str, &'static str), BinopFn>,
}

impl BinopRegistry {
    pub fn new() -> Self {
        Self { ops: HashMap::new() }
    }

    pub fn register(&mut self, op: BinOp, lhs: &'static str, rhs: &'static str, f: BinopFn) {
        self.ops.insert((op, lhs, rhs), f);
    }

    /// Evaluate `l op r`. Returns `None` if no handler is registered for this
    /// pair of kinds; the caller reports the TypeError.
    pub fn eval(&self, op: BinOp, l: Value, r: Value, line: usize) -> Option<Result<Value, RuntimeError>> {
        let key = (op, l.type_name(), r.type_name());
        self.ops.get(&key).map(|f| f(l, r, line))
    }
}

impl Default for BinopRegistry {
    fn default() -> Self {
        let mut r = Self::new();
        register_int(&mut r);
        register_float(&mut r);
        register_str(&mut r);
        register_list(&mut r);
        r
    }
}

fn overflow(line: usize) -> RuntimeError {
    RuntimeError::new(ErrorKind::Overflow, line, "integer overflow")
}

fn div_zero(line: usize, what: &str) -> RuntimeError {
    RuntimeError::new(ErrorKind::Division, line, format!("{what} by zero"))
}

fn ordering(op: BinOp, l: &Value, r: &Value, line: usize) -> Result<Value, RuntimeError> {
    let ord = l.compare(r).map_err(|e| e.at_line(line))?;
    Ok(Value::Bool(match op {
        BinOp::Lt   => ord.is_lt(),
        BinOp::LtEq => ord.is_le(),
        BinOp::Gt   => ord.is_gt(),
        _           => ord.is_ge(),
    }))
}

// ─── int ──────────────────────────────────────────────────────────────────────

fn ints(l: Value, r: Value) -> (i64, i64) {
    let (Value::Int(a), Value::Int(b)) = (l, r) else { unreachable!() };
    (a, b)
}

fn register_int(r: &mut BinopRegistry) {
    use BinOp::*;
    r.register(Add, "int", "int", |l, r, line| {
        let (a, b) = ints(l, r);
        a.checked_add(b).map(Value::Int).ok_or_else(|| overflow(line))
    });
    r.register(Sub, "int", "int", |l, r, line| {
        let (a, b) = ints(l, r);
        a.checked_sub(b).map(Value::Int).ok_or_else(|| overflow(line))
    });
    r.register(Mul, "int", "int", |l, r, line| {
        let (a, b) = ints(l, r);
        a.checked_mul(b).map(Value::Int).ok_or_else(|| overflow(line))
    });
    // true division always yields a float
    r.register(Div, "int", "int", |l, r, line| {
        let (a, b) = ints(l, r);
        if b == 0 { Err(div_zero(line, "division")) }
        else { Ok(Value::Float(a as f64 / b as f64)) }
    });
    r.register(FloorDiv, "int", "int", |l, r, line| {
        let (a, b) = ints(l, r);
        if b == 0 { return Err(div_zero(line, "integer division")); }
        let q = a.checked_div(b).ok_or_else(|| overflow(line))?;
        // round toward negative infinity when the signs differ
        let q = if a % b != 0 && ((a < 0) != (b < 0)) { q - 1 } else { q };
        Ok(Value::Int(q))
    });
    // result takes the sign of the divisor
    r.register(Mod, "int", "int", |l, r, line| {
        let (a, b) = ints(l, r);
        if b == 0 { return Err(div_zero(line, "modulo")); }
        let m = a.checked_rem(b).ok_or_else(|| overflow(line))?;
        Ok(Value::Int(if m != 0 && ((m < 0) != (b < 0)) { m + b } else { m }))
    });
    r.register(Pow, "int", "int", |l, r, line| {
        let (a, b) = ints(l, r);
        // These bases never overflow, whatever the exponent.
        match a {
            0 if b < 0 => return Err(RuntimeError::new(
                ErrorKind::Division, line, "0 cannot be raised to a negative power",
            )),
            0 if b > 0 => return Ok(Value::Int(0)),
            1 => return Ok(Value::Int(1)),
            -1 if b >= 0 => return Ok(Value::Int(if b % 2 == 0 { 1 } else { -1 })),
            _ => {}
        }
        if b < 0 {
            return Ok(Value::Float((a as f64).powf(b as f64)));
        }
        let exp = u32::try_from(b).map_err(|_| overflow(line))?;
        a.checked_pow(exp).map(Value::Int).ok_or_else(|| overflow(line))
    });
    r.register(Lt,   "int", "int", |l, r, line| ordering(Lt,   &l, &r, line));
    r.register(LtEq, "int", "int", |l, r, line| ordering(LtEq, &l, &r, line));
    r.register(Gt,   "int", "int", |l, r, line| ordering(Gt,   &l, &r, line));
    r.register(GtEq, "int", "int", |l, r, line| ordering(GtEq, &l, &r, line));
}

// ─── float (and mixed int/float) ──────────────────────────────────────────────

fn float_arith(op: BinOp, l: &Value, r: &Value, line: usize) -> Result<Value, RuntimeError> {
    let a = l.as_float().map_err(|e| e.at_line(line))?;
    let b = r.as_float().map_err(|e| e.at_line(line))?;
    let v = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b == 0.0 { return Err(div_zero(line, "division")); }
            a / b
        }
        BinOp::FloorDiv => {
            if b == 0.0 { return Err(div_zero(line, "division")); }
            (a / b).floor()
        }
        BinOp::Mod => {
            if b == 0.0 { return Err(div_zero(line, "modulo")); }
            a - b * (a / b).floor()
        }
        _ => {
            if a == 0.0 && b < 0.0 {
                return Err(RuntimeError::new(ErrorKind::Division, line, "0.0 cannot be raised to a negative power"));
            }
            a.powf(b)
        }
    };
    Ok(Value::Float(v))
}

fn register_float(r: &mut BinopRegistry) {
    use BinOp::*;
    for (lhs, rhs) in [("float", "float"), ("int", "float"), ("float", "int")] {
        r.register(Add,      lhs, rhs, |l, r, line| float_arith(Add,      &l, &r, line));
        r.register(Sub,      lhs, rhs, |l, r, line| float_arith(Sub,      &l, &r, line));
        r.register(Mul,      lhs, rhs, |l, r, line| float_arith(Mul,      &l, &r, line));
        r.register(Div,      lhs, rhs, |l, r, line| float_arith(Div,      &l, &r, line));
        r.register(FloorDiv, lhs, rhs, |l, r, line| float_arith(FloorDiv, &l, &r, line));
        r.register(Mod,      lhs, rhs, |l, r, line| float_arith(Mod,      &l, &r, line));
        r.register(Pow,      lhs, rhs, |l, r, line| float_arith(Pow,      &l, &r, line));
        r.register(Lt,       lhs, rhs, |l, r, line| ordering(Lt,   &l, &r, line));
        r.register(LtEq,     lhs, rhs, |l, r, line| ordering(LtEq, &l, &r, line));
        r.register(Gt,       lhs, rhs, |l, r, line| ordering(Gt,   &l, &r, line));
        r.register(GtEq,     lhs, rhs, |l, r, line| ordering(GtEq, &l, &r, line));
    }
}

// ─── str ──────────────────────────────────────────────────────────────────────

fn repeat_count(unit: usize, n: i64, line: usize) -> Result<usize, RuntimeError> {
    let n = n.max(0) as usize;
    match unit.checked_mul(n) {
        Some(total) if total <= isize::MAX as usize => Ok(n),
        _ => Err(overflow(line)),
    }
}

fn repeat_str(s: &str, n: i64, line: usize) -> Result<Value, RuntimeError> {
    Ok(Value::str(s.repeat(repeat_count(s.len(), n, line)?)))
}

fn register_str(r: &mut BinopRegistry) {
    use BinOp::*;
    r.register(Add, "str", "str", |l, r, _| {
        let (Value::Str(a), Value::Str(b)) = (l, r) else { unreachable!() };
        let mut s = String::with_capacity(a.len() + b.len());
        s.push_str(&a);
        s.push_str(&b);
        Ok(Value::from(s))
    });
    r.register(Mul, "str", "int", |l, r, line| {
        let (Value::Str(s), Value::Int(n)) = (l, r) else { unreachable!() };
        repeat_str(&s, n, line)
    });
    r.register(Mul, "int", "str", |l, r, line| {
        let (Value::Int(n), Value::Str(s)) = (l, r) else { unreachable!() };
        repeat_str(&s, n, line)
    });
    r.register(Lt,   "str", "str", |l, r, line| ordering(Lt,   &l, &r, line));
    r.register(LtEq, "str", "str", |l, r, line| ordering(LtEq, &l, &r, line));
    r.register(Gt,   "str", "str", |l, r, line| ordering(Gt,   &l, &r, line));
    r.register(GtEq, "str", "str", |l, r, line| ordering(GtEq, &l, &r, line));
}

// ─── list ─────────────────────────────────────────────────────────────────────

fn repeat_list(items: &[Value], n: i64, line: usize) -> Result<Value, RuntimeError> {
    let n = repeat_count(items.len().max(1) * std::mem::size_of::<Value>(), n, line)?;
    let mut out = Vec::with_capacity(items.len() * n);
    for _ in 0..n {
        out.extend(items.iter().cloned());
    }
    Ok(Value::list(out))
}

fn register_list(r: &mut BinopRegistry) {
    use BinOp::*;
    // a new list; neither operand is modified
    r.register(Add, "list", "list", |l, r, _| {
        let (Value::List(a), Value::List(b)) = (l, r) else { unreachable!() };
        let mut out = a.borrow().clone();
        out.extend(b.borrow().iter().cloned());
        Ok(Value::list(out))
    });
    r.register(Mul, "list", "int", |l, r, line| {
        let (Value::List(items), Value::Int(n)) = (l, r) else { unreachable!() };
        let v = repeat_list(&items.borrow(), n, line);
        v
    });
    r.register(Mul, "int", "list", |l, r, line| {
        let (Value::Int(n), Value::List(items)) = (l, r) else { unreachable!() };
        let v = repeat_list(&items.borrow(), n, line);
        v
    });
}
