//! Tree-walking evaluator. Statements run against a `Scope` chain; every
//! function call, built-in or script-defined, goes through `call_value`.

use std::cmp::Ordering;
use std::rc::Rc;

use indexmap::IndexMap;
use tracing::{debug, trace, warn};

use crate::error::{ErrorKind, RuntimeError};
use crate::namespaces::LibraryRegistry;
use crate::runtime::bridge::{Caller, FunctionRegistry, Kwargs, bind_arguments};
use crate::runtime::cancel::CancelToken;
use crate::runtime::env::Scope;
use crate::runtime::value::{Closure, Function, ParamSlot, Value};
use crate::stack::ensure_sufficient_stack;
use crate::syntax::ast::{
    BinOp, CompClause, ExceptClause, Expr, FStringPart, LogicalOp, Param, Program, Span, Stmt,
    Target, TryStmt, UnOp,
};
use crate::types::binop_registry::BinopRegistry;
use crate::types::methods::{MethodRegistry, format_value, normalize_index};

/// How a statement finished.
#[derive(Debug, Clone, PartialEq)]
pub enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

// ─── Evaluator ────────────────────────────────────────────────────────────────

/// Borrowed view of an interpreter instance for the duration of one
/// evaluation or host-initiated call.
pub struct Evaluator<'a> {
    pub globals: &'a Scope,
    pub functions: &'a FunctionRegistry,
    pub libraries: &'a LibraryRegistry,
    /// Imported modules by top-level name.
    pub modules: &'a mut IndexMap<String, Value>,
    pub binops: &'a BinopRegistry,
    pub methods: &'a MethodRegistry,
    pub token: &'a CancelToken,
    pub max_call_depth: usize,
    depth: usize,
    /// Errors being handled by the `except` bodies currently running,
    /// innermost last. A bare `raise` re-raises the last one.
    handling: Vec<RuntimeError>,
}

impl<'a> Evaluator<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        globals: &'a Scope,
        functions: &'a FunctionRegistry,
        libraries: &'a LibraryRegistry,
        modules: &'a mut IndexMap<String, Value>,
        binops: &'a BinopRegistry,
        methods: &'a MethodRegistry,
        token: &'a CancelToken,
        max_call_depth: usize,
    ) -> Self {
        Self { globals, functions, libraries, modules, binops, methods, token, max_call_depth, depth: 0, handling: Vec::new() }
    }

    // ─── Entry points ─────────────────────────────────────────────────────────

    /// Run a whole program at global scope. The result is the value of a
    /// trailing expression statement, or Null.
    pub fn run(&mut self, program: &Program) -> Result<Value, RuntimeError> {
        let globals = self.globals.clone();
        let Some((last, init)) = program.stmts.split_last() else {
            return Ok(Value::Null);
        };
        for stmt in init {
            self.exec(stmt, &globals)?;
        }
        match last {
            Stmt::Expr(e) => {
                self.checkpoint(e.span().line)?;
                self.eval(e, &globals)
            }
            other => self.exec(other, &globals).map(|_| Value::Null),
        }
    }

    /// Bind `name` from the library registry into the module namespace.
    /// Importing the same name twice is a no-op.
    pub fn import(&mut self, name: &str) -> Result<(), RuntimeError> {
        let Some(lib) = self.libraries.get(name) else {
            return Err(RuntimeError::new(ErrorKind::Import, 0, format!("no module named '{name}'")));
        };
        let mut path = name.split('.');
        let Some(head) = path.next() else {
            return Err(RuntimeError::new(ErrorKind::Import, 0, "empty module name"));
        };
        let rest: Vec<&str> = path.collect();

        let Some((leaf, parents)) = rest.split_last() else {
            if !self.modules.contains_key(head) {
                self.modules.insert(head.to_string(), lib.to_module());
                debug!(module = name, "imported");
            }
            return Ok(());
        };

        // `import a.b` makes `a` a dict holding `b`.
        let mut node = self.modules.entry(head.to_string())
            .or_insert_with(|| Value::dict(IndexMap::new()))
            .as_dict()
            .map_err(|_| RuntimeError::new(ErrorKind::Import, 0, format!("'{head}' is not a package")))?;
        for part in parents {
            let next = node.borrow_mut().entry(part.to_string())
                .or_insert_with(|| Value::dict(IndexMap::new()))
                .as_dict()
                .map_err(|_| RuntimeError::new(ErrorKind::Import, 0, format!("'{part}' is not a package")))?;
            node = next;
        }
        let mut entries = node.borrow_mut();
        if !entries.contains_key(*leaf) {
            entries.insert(leaf.to_string(), lib.to_module());
            debug!(module = name, "imported");
        }
        Ok(())
    }

    /// Invoke any callable value.
    pub fn call_value(
        &mut self,
        callee: &Value,
        args: Vec<Value>,
        kwargs: Kwargs,
        line: usize,
    ) -> Result<Value, RuntimeError> {
        let func = callee.as_function().map_err(|e| e.at_line(line))?;
        trace!(function = func.name(), args = args.len(), line, "call");
        match &*func {
            Function::Host(h) => h.invoke(self, &kwargs, &args).map_err(|e| e.at_line(line)),
            Function::Script(c) => self.call_closure(c, args, kwargs, line),
        }
    }

    fn call_closure(
        &mut self,
        closure: &Closure,
        args: Vec<Value>,
        kwargs: Kwargs,
        line: usize,
    ) -> Result<Value, RuntimeError> {
        if self.depth >= self.max_call_depth {
            warn!(function = closure.name.as_str(), depth = self.depth, "call depth limit reached");
            return Err(RuntimeError::new(
                ErrorKind::StackOverflow,
                line,
                format!("maximum recursion depth of {} exceeded", self.max_call_depth),
            ));
        }
        let bound = bind_arguments(&closure.name, &closure.params, args, kwargs)
            .map_err(|e| e.at_line(line))?;

        let frame = closure.scope.frame();
        for (param, value) in closure.params.iter().zip(bound) {
            frame.define(param.name.as_str(), value);
        }

        let body = Rc::clone(&closure.body);
        self.depth += 1;
        let flow = ensure_sufficient_stack(|| self.exec_block(&body, &frame));
        self.depth -= 1;

        match flow? {
            Flow::Return(v) => Ok(v),
            _ => Ok(Value::Null),
        }
    }

    // ─── Statements ───────────────────────────────────────────────────────────

    fn checkpoint(&self, line: usize) -> Result<(), RuntimeError> {
        self.token.check().map_err(|e| {
            warn!(line, reason = e.message.as_str(), deadline = ?self.token.deadline(), "evaluation cancelled");
            e.at_line(line)
        })
    }

    pub fn exec_block(&mut self, stmts: &[Stmt], scope: &Scope) -> Result<Flow, RuntimeError> {
        for stmt in stmts {
            match self.exec(stmt, scope)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    pub fn exec(&mut self, stmt: &Stmt, scope: &Scope) -> Result<Flow, RuntimeError> {
        let line = stmt.span().line;
        self.checkpoint(line)?;
        ensure_sufficient_stack(|| self.exec_inner(stmt, scope, line))
    }

    fn exec_inner(&mut self, stmt: &Stmt, scope: &Scope, line: usize) -> Result<Flow, RuntimeError> {
        match stmt {
            Stmt::Assign(a) => {
                let value = self.eval(&a.value, scope)?;
                self.assign(&a.target, value, scope, line)?;
            }

            Stmt::AugAssign(a) => match &a.target {
                Target::Name(name) => {
                    let current = self.resolve_name(name, scope, line)?;
                    let rhs = self.eval(&a.value, scope)?;
                    let updated = self.binary(a.op, current, rhs, line)?;
                    scope.assign(name, updated);
                }
                Target::Unpack(_) => {
                    return Err(RuntimeError::type_error(line, "augmented assignment needs a single target"));
                }
                Target::Index { expr, index } => {
                    let container = self.eval(expr, scope)?;
                    let key = self.eval(index, scope)?;
                    let current = get_index(&container, &key).map_err(|e| e.at_line(line))?;
                    let rhs = self.eval(&a.value, scope)?;
                    let updated = self.binary(a.op, current, rhs, line)?;
                    set_index(&container, &key, updated).map_err(|e| e.at_line(line))?;
                }
            },

            Stmt::If(i) => {
                for (cond, body) in &i.branches {
                    if self.eval(cond, scope)?.is_truthy() {
                        return self.exec_block(body, scope);
                    }
                }
                if let Some(body) = &i.else_block {
                    return self.exec_block(body, scope);
                }
            }

            Stmt::For(f) => {
                let items = self.eval(&f.iterable, scope)?.iterate().map_err(|e| e.at_line(line))?;
                for item in items {
                    self.checkpoint(line)?;
                    let iteration = scope.child();
                    define_target(&f.target, item, &iteration).map_err(|e| e.at_line(line))?;
                    match self.exec_block(&f.body, &iteration)? {
                        Flow::Break => break,
                        Flow::Normal | Flow::Continue => {}
                        ret @ Flow::Return(_) => return Ok(ret),
                    }
                }
            }

            Stmt::While(w) => loop {
                self.checkpoint(line)?;
                if !self.eval(&w.condition, scope)?.is_truthy() {
                    break;
                }
                match self.exec_block(&w.body, scope)? {
                    Flow::Break => break,
                    Flow::Normal | Flow::Continue => {}
                    ret @ Flow::Return(_) => return Ok(ret),
                }
            },

            Stmt::FnDef(def) => {
                let closure = self.make_closure(&def.name, &def.params, &def.body, scope)?;
                scope.define_in_frame(def.name.as_str(), Value::Function(Rc::new(Function::Script(closure))));
            }

            Stmt::Return(expr, _) => {
                let value = match expr {
                    Some(e) => self.eval(e, scope)?,
                    None => Value::Null,
                };
                return Ok(Flow::Return(value));
            }

            Stmt::Try(t) => return self.exec_try(t, scope),

            Stmt::Raise(expr, _) => {
                let err = match expr {
                    Some(e) => {
                        let message = match self.eval(e, scope)? {
                            Value::Error(msg) => msg.to_string(),
                            other => other.to_string(),
                        };
                        RuntimeError::new(ErrorKind::Raised, line, message)
                    }
                    None => match self.handling.last() {
                        Some(active) => active.clone(),
                        None => RuntimeError::new(ErrorKind::Raised, line, "no active exception to re-raise"),
                    },
                };
                return Err(err);
            }

            Stmt::Import(decl) => self.import(&decl.name).map_err(|e| e.at_line(line))?,

            Stmt::Pass(_) => {}
            Stmt::Break(_) => return Ok(Flow::Break),
            Stmt::Continue(_) => return Ok(Flow::Continue),

            Stmt::Expr(e) => {
                self.eval(e, scope)?;
            }
        }
        Ok(Flow::Normal)
    }

    /// `else` runs only when the body finished without error. `finally`
    /// always runs; an error or jump out of it replaces the outcome.
    fn exec_try(&mut self, t: &TryStmt, scope: &Scope) -> Result<Flow, RuntimeError> {
        let mut outcome = match self.exec_block(&t.body, scope) {
            Ok(Flow::Normal) => match &t.else_block {
                Some(body) => self.exec_block(body, scope),
                None => Ok(Flow::Normal),
            },
            Ok(flow) => Ok(flow),
            Err(err) => self.handle(&t.handlers, err, scope),
        };
        if let Some(body) = &t.finally {
            match self.exec_block(body, scope)? {
                Flow::Normal => {}
                flow => outcome = Ok(flow),
            }
        }
        outcome
    }

    /// Run the first handler that answers to `err`, or pass it on.
    /// Cancellation is never caught.
    fn handle(&mut self, handlers: &[ExceptClause], err: RuntimeError, scope: &Scope) -> Result<Flow, RuntimeError> {
        if err.is_cancellation() {
            return Err(err);
        }
        let Some(handler) = handlers.iter().find(|h| catches(h, &err)) else {
            return Err(err);
        };
        trace!(kind = err.kind.as_str(), line = err.line, "error handled");
        if let Some(name) = &handler.binding {
            scope.assign(name, Value::error(&err.message));
        }
        self.handling.push(err);
        let flow = self.exec_block(&handler.body, scope);
        self.handling.pop();
        flow
    }

    /// Defaults are evaluated here, once, in the defining scope.
    fn make_closure(
        &mut self,
        name: &str,
        params: &[Param],
        body: &Rc<[Stmt]>,
        scope: &Scope,
    ) -> Result<Closure, RuntimeError> {
        let params = params.iter()
            .map(|p| {
                let default = p.default.as_ref().map(|e| self.eval(e, scope)).transpose()?;
                Ok(ParamSlot { name: p.name.clone(), default })
            })
            .collect::<Result<Vec<_>, RuntimeError>>()?;
        Ok(Closure {
            name: name.to_string(),
            params,
            body: Rc::clone(body),
            scope: scope.clone(),
        })
    }

    fn assign(&mut self, target: &Target, value: Value, scope: &Scope, line: usize) -> Result<(), RuntimeError> {
        match target {
            Target::Name(name) => {
                scope.assign(name, value);
                Ok(())
            }
            Target::Index { expr, index } => {
                let container = self.eval(expr, scope)?;
                let key = self.eval(index, scope)?;
                set_index(&container, &key, value).map_err(|e| e.at_line(line))
            }
            Target::Unpack(targets) => {
                let items = unpack(value, targets.len()).map_err(|e| e.at_line(line))?;
                for (target, item) in targets.iter().zip(items) {
                    self.assign(target, item, scope, line)?;
                }
                Ok(())
            }
        }
    }

    // ─── Expressions ──────────────────────────────────────────────────────────

    pub fn eval(&mut self, expr: &Expr, scope: &Scope) -> Result<Value, RuntimeError> {
        ensure_sufficient_stack(|| self.eval_inner(expr, scope))
    }

    fn eval_inner(&mut self, expr: &Expr, scope: &Scope) -> Result<Value, RuntimeError> {
        match expr {
            Expr::Int(n, _)   => Ok(Value::Int(*n)),
            Expr::Float(x, _) => Ok(Value::Float(*x)),
            Expr::Str(s, _)   => Ok(Value::str(s)),
            Expr::Bool(b, _)  => Ok(Value::Bool(*b)),
            Expr::None(_)     => Ok(Value::Null),

            Expr::Ident(name, span) => self.resolve_name(name, scope, span.line),

            Expr::BinOp { left, op, right, span } => {
                let l = self.eval(left, scope)?;
                let r = self.eval(right, scope)?;
                self.binary(*op, l, r, span.line)
            }

            Expr::Logical { left, op, right, .. } => {
                let l = self.eval(left, scope)?;
                match (op, l.is_truthy()) {
                    (LogicalOp::And, false) | (LogicalOp::Or, true) => Ok(l),
                    _ => self.eval(right, scope),
                }
            }

            Expr::UnOp { op, operand, span } => {
                let v = self.eval(operand, scope)?;
                unary(*op, v).map_err(|e| e.at_line(span.line))
            }

            Expr::Conditional { condition, then_expr, else_expr, .. } => {
                if self.eval(condition, scope)?.is_truthy() {
                    self.eval(then_expr, scope)
                } else {
                    self.eval(else_expr, scope)
                }
            }

            Expr::Call { callee, args, kwargs, span } => {
                let func = self.eval(callee, scope)?;
                let (args, kwargs) = self.eval_args(args, kwargs, scope)?;
                self.call_value(&func, args, kwargs, span.line)
            }

            Expr::Index { expr, index, span } => {
                let container = self.eval(expr, scope)?;
                let key = self.eval(index, scope)?;
                get_index(&container, &key).map_err(|e| e.at_line(span.line))
            }

            Expr::Slice { expr, start, stop, step, span } => {
                let target = self.eval(expr, scope)?;
                let start = self.slice_bound(start.as_deref(), scope)?;
                let stop = self.slice_bound(stop.as_deref(), scope)?;
                let step = self.slice_bound(step.as_deref(), scope)?;
                slice(&target, start, stop, step).map_err(|e| e.at_line(span.line))
            }

            Expr::Attribute { expr, name, span } => {
                let obj = self.eval(expr, scope)?;
                attribute(&obj, name).map_err(|e| e.at_line(span.line))
            }

            Expr::MethodCall { expr, method, args, kwargs, span } => {
                let recv = self.eval(expr, scope)?;
                let (args, kwargs) = self.eval_args(args, kwargs, scope)?;
                self.call_method(&recv, method, args, kwargs, span.line)
            }

            Expr::List(items, _) => {
                let values = items.iter().map(|e| self.eval(e, scope)).collect::<Result<Vec<_>, _>>()?;
                Ok(Value::list(values))
            }

            Expr::Dict(entries, span) => {
                let mut map = IndexMap::with_capacity(entries.len());
                for (k, v) in entries {
                    let key = dict_key(&self.eval(k, scope)?).map_err(|e| e.at_line(span.line))?;
                    let value = self.eval(v, scope)?;
                    map.insert(key, value);
                }
                Ok(Value::dict(map))
            }

            Expr::Lambda { params, body, .. } => {
                let closure = self.make_closure("<lambda>", params, body, scope)?;
                Ok(Value::Function(Rc::new(Function::Script(closure))))
            }

            Expr::FString(parts, span) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        FStringPart::Text(text) => out.push_str(text),
                        FStringPart::Field { expr, repr, spec } => {
                            let value = self.eval(expr, scope)?;
                            let value = if *repr { Value::str(value.repr()) } else { value };
                            let text = format_value(&value, spec.as_deref().unwrap_or(""))
                                .map_err(|e| e.at_line(span.line))?;
                            out.push_str(&text);
                        }
                    }
                }
                Ok(Value::from(out))
            }

            Expr::ListComp { element, clause, span } => {
                let mut out = Vec::new();
                self.comprehend(clause, scope, span, |ev, inner| {
                    out.push(ev.eval(element, inner)?);
                    Ok(())
                })?;
                Ok(Value::list(out))
            }

            Expr::DictComp { key, value, clause, span } => {
                let mut out = IndexMap::new();
                self.comprehend(clause, scope, span, |ev, inner| {
                    let k = dict_key(&ev.eval(key, inner)?).map_err(|e| e.at_line(span.line))?;
                    let v = ev.eval(value, inner)?;
                    out.insert(k, v);
                    Ok(())
                })?;
                Ok(Value::dict(out))
            }
        }
    }

    /// Scope chain, then imported modules, then registered host functions.
    fn resolve_name(&self, name: &str, scope: &Scope, line: usize) -> Result<Value, RuntimeError> {
        if let Some(v) = scope.lookup(name) {
            return Ok(v);
        }
        if let Some(m) = self.modules.get(name) {
            return Ok(m.clone());
        }
        if let Some(h) = self.functions.get(name) {
            return Ok(Value::host_function(h.clone()));
        }
        Err(RuntimeError::new(ErrorKind::Name, line, format!("name '{name}' is not defined")))
    }

    fn slice_bound(&mut self, bound: Option<&Expr>, scope: &Scope) -> Result<Option<i64>, RuntimeError> {
        match bound.map(|e| self.eval(e, scope)).transpose()? {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Int(n)) => Ok(Some(n)),
            Some(other) => Err(RuntimeError::type_error(bound.map_or(0, |e| e.span().line), format!(
                "slice indices must be integers or None, not {}", other.type_name()
            ))),
        }
    }

    fn eval_args(
        &mut self,
        args: &[Expr],
        kwargs: &[(String, Expr)],
        scope: &Scope,
    ) -> Result<(Vec<Value>, Kwargs), RuntimeError> {
        let positional = args.iter().map(|a| self.eval(a, scope)).collect::<Result<Vec<_>, _>>()?;
        let mut named = Kwargs::new();
        for (name, e) in kwargs {
            let v = self.eval(e, scope)?;
            named.insert(name.as_str(), v);
        }
        Ok((positional, named))
    }

    /// A function stored in a dict (a module member) is called directly;
    /// anything else goes to the built-in method table.
    fn call_method(
        &mut self,
        recv: &Value,
        method: &str,
        args: Vec<Value>,
        kwargs: Kwargs,
        line: usize,
    ) -> Result<Value, RuntimeError> {
        if let Value::Dict(d) = recv {
            let member = d.borrow().get(method).cloned();
            if let Some(f @ Value::Function(_)) = member {
                return self.call_value(&f, args, kwargs, line);
            }
        }
        match self.methods.call(recv, method, &args, &kwargs) {
            Some(result) => result.map_err(|e| e.at_line(line)),
            None => Err(RuntimeError::type_error(line, format!(
                "'{}' object has no method '{method}'", recv.type_name()
            ))),
        }
    }

    fn comprehend(
        &mut self,
        clause: &CompClause,
        scope: &Scope,
        span: &Span,
        mut emit: impl FnMut(&mut Self, &Scope) -> Result<(), RuntimeError>,
    ) -> Result<(), RuntimeError> {
        let items = self.eval(&clause.iterable, scope)?.iterate().map_err(|e| e.at_line(span.line))?;
        let inner = scope.child();
        for item in items {
            self.checkpoint(span.line)?;
            define_target(&clause.target, item, &inner).map_err(|e| e.at_line(span.line))?;
            if let Some(cond) = &clause.condition {
                if !self.eval(cond, &inner)?.is_truthy() {
                    continue;
                }
            }
            emit(self, &inner)?;
        }
        Ok(())
    }

    fn binary(&self, op: BinOp, l: Value, r: Value, line: usize) -> Result<Value, RuntimeError> {
        match op {
            BinOp::Eq    => l.equals(&r).map(Value::Bool).map_err(|e| e.at_line(line)),
            BinOp::NotEq => l.equals(&r).map(|b| Value::Bool(!b)).map_err(|e| e.at_line(line)),
            BinOp::In    => r.contains(&l).map(Value::Bool).map_err(|e| e.at_line(line)),
            BinOp::NotIn => r.contains(&l).map(|b| Value::Bool(!b)).map_err(|e| e.at_line(line)),
            _ => {
                let (lt, rt) = (l.type_name(), r.type_name());
                self.binops.eval(op, l, r, line)
                    .unwrap_or_else(|| Err(RuntimeError::type_error(line, format!(
                        "unsupported operand type(s) for {}: '{lt}' and '{rt}'", op.symbol()
                    ))))
                    .map_err(|e| e.at_line(line))
            }
        }
    }
}

impl Caller for Evaluator<'_> {
    fn call(&mut self, f: &Value, args: Vec<Value>) -> Result<Value, RuntimeError> {
        self.call_value(f, args, Kwargs::new(), 0)
    }

    fn token(&self) -> &CancelToken {
        self.token
    }
}

// ─── Binding helpers ──────────────────────────────────────────────────────────

/// Loop variables are always fresh bindings in the iteration scope.
fn define_target(target: &Target, value: Value, scope: &Scope) -> Result<(), RuntimeError> {
    match target {
        Target::Name(name) => {
            scope.define(name.as_str(), value);
            Ok(())
        }
        Target::Unpack(targets) => {
            let items = unpack(value, targets.len())?;
            targets.iter().zip(items).try_for_each(|(t, v)| define_target(t, v, scope))
        }
        Target::Index { .. } => Err(RuntimeError::type_error(0, "loop variable must be a name")),
    }
}

fn unpack(value: Value, expected: usize) -> Result<Vec<Value>, RuntimeError> {
    let items = value.iterate().map_err(|_| RuntimeError::type_error(0, format!(
        "cannot unpack non-iterable {} object", value.type_name()
    )))?;
    match items.len().cmp(&expected) {
        Ordering::Less => Err(RuntimeError::argument(0, format!(
            "not enough values to unpack (expected {expected}, got {})", items.len()
        ))),
        Ordering::Greater => Err(RuntimeError::argument(0, format!(
            "too many values to unpack (expected {expected})"
        ))),
        Ordering::Equal => Ok(items),
    }
}

/// A handler's name may be dotted; only the last segment is matched.
fn catches(handler: &ExceptClause, err: &RuntimeError) -> bool {
    match &handler.kind {
        None => true,
        Some(name) => err.kind.answers_to(name.rsplit('.').next().unwrap_or(name)),
    }
}

// ─── Operator helpers ─────────────────────────────────────────────────────────

fn unary(op: UnOp, v: Value) -> Result<Value, RuntimeError> {
    match (op, v) {
        (UnOp::Not, v) => Ok(Value::Bool(!v.is_truthy())),
        (UnOp::Neg, Value::Int(n)) => n.checked_neg().map(Value::Int)
            .ok_or_else(|| RuntimeError::new(ErrorKind::Overflow, 0, "integer overflow")),
        (UnOp::Neg, Value::Float(x)) => Ok(Value::Float(-x)),
        (UnOp::Pos, v @ (Value::Int(_) | Value::Float(_))) => Ok(v),
        (op, v) => {
            let symbol = if op == UnOp::Neg { "-" } else { "+" };
            Err(RuntimeError::type_error(0, format!(
                "bad operand type for unary {symbol}: '{}'", v.type_name()
            )))
        }
    }
}

fn dict_key(key: &Value) -> Result<String, RuntimeError> {
    match key {
        Value::Str(s) => Ok(s.to_string()),
        other => Err(RuntimeError::type_error(0, format!(
            "dict keys must be str, not {}", other.type_name()
        ))),
    }
}

fn get_index(container: &Value, key: &Value) -> Result<Value, RuntimeError> {
    match (container, key) {
        (Value::List(l), Value::Int(i)) => {
            let items = l.borrow();
            normalize_index(*i, items.len())
                .map(|idx| items[idx].clone())
                .ok_or_else(|| RuntimeError::new(ErrorKind::Index, 0, "list index out of range"))
        }
        (Value::List(_), other) => Err(RuntimeError::type_error(0, format!(
            "list indices must be integers, not {}", other.type_name()
        ))),
        (Value::Dict(d), Value::Str(k)) => d.borrow().get(&**k).cloned()
            .ok_or_else(|| RuntimeError::new(ErrorKind::Key, 0, key.repr())),
        (Value::Dict(_), other) => Err(RuntimeError::type_error(0, format!(
            "dict keys must be str, not {}", other.type_name()
        ))),
        (Value::Str(s), Value::Int(i)) => {
            let len = s.chars().count();
            normalize_index(*i, len)
                .and_then(|idx| s.chars().nth(idx))
                .map(|c| Value::str(c.to_string()))
                .ok_or_else(|| RuntimeError::new(ErrorKind::Index, 0, "string index out of range"))
        }
        (Value::Str(_), other) => Err(RuntimeError::type_error(0, format!(
            "string indices must be integers, not {}", other.type_name()
        ))),
        (other, _) => Err(RuntimeError::type_error(0, format!(
            "'{}' object is not subscriptable", other.type_name()
        ))),
    }
}

fn set_index(container: &Value, key: &Value, value: Value) -> Result<(), RuntimeError> {
    match (container, key) {
        (Value::List(l), Value::Int(i)) => {
            let mut items = l.borrow_mut();
            let idx = normalize_index(*i, items.len())
                .ok_or_else(|| RuntimeError::new(ErrorKind::Index, 0, "list assignment index out of range"))?;
            items[idx] = value;
            Ok(())
        }
        (Value::List(_), other) => Err(RuntimeError::type_error(0, format!(
            "list indices must be integers, not {}", other.type_name()
        ))),
        (Value::Dict(d), _) => {
            let k = dict_key(key)?;
            d.borrow_mut().insert(k, value);
            Ok(())
        }
        (other, _) => Err(RuntimeError::type_error(0, format!(
            "'{}' object does not support item assignment", other.type_name()
        ))),
    }
}

/// Positions picked by `[start:stop:step]` from a sequence of `len` items.
/// Bounds are clamped the way Python clamps them.
fn slice_indices(len: usize, start: Option<i64>, stop: Option<i64>, step: Option<i64>) -> Result<Vec<usize>, RuntimeError> {
    let step = step.unwrap_or(1);
    if step == 0 {
        return Err(RuntimeError::argument(0, "slice step cannot be zero"));
    }
    let len = i64::try_from(len).unwrap_or(i64::MAX);
    let (lo, hi) = if step > 0 { (0, len) } else { (-1, len - 1) };
    let clamp = |i: i64| (if i < 0 { i + len } else { i }).clamp(lo, hi);
    let start = start.map_or(if step > 0 { lo } else { hi }, clamp);
    let stop = stop.map_or(if step > 0 { hi } else { lo }, clamp);

    let mut picked = Vec::new();
    let mut i = start;
    while (step > 0 && i < stop) || (step < 0 && i > stop) {
        picked.push(i as usize);
        match i.checked_add(step) {
            Some(next) => i = next,
            None => break,
        }
    }
    Ok(picked)
}

fn slice(target: &Value, start: Option<i64>, stop: Option<i64>, step: Option<i64>) -> Result<Value, RuntimeError> {
    match target {
        Value::List(l) => {
            let items = l.borrow();
            let picked = slice_indices(items.len(), start, stop, step)?;
            Ok(Value::list(picked.into_iter().map(|i| items[i].clone()).collect()))
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let picked = slice_indices(chars.len(), start, stop, step)?;
            Ok(Value::from(picked.into_iter().map(|i| chars[i]).collect::<String>()))
        }
        other => Err(RuntimeError::type_error(0, format!(
            "'{}' object is not subscriptable", other.type_name()
        ))),
    }
}

fn attribute(obj: &Value, name: &str) -> Result<Value, RuntimeError> {
    match obj {
        Value::Dict(d) => d.borrow().get(name).cloned().ok_or_else(|| {
            RuntimeError::new(ErrorKind::Name, 0, format!("'dict' object has no attribute '{name}'"))
        }),
        other => Err(RuntimeError::type_error(0, format!(
            "'{}' object has no attribute '{name}'", other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::lexer::Lexer;
    use crate::syntax::parser::Parser;
    use pretty_assertions::assert_eq;

    struct Fixture {
        globals: Scope,
        functions: FunctionRegistry,
        libraries: LibraryRegistry,
        modules: IndexMap<String, Value>,
        binops: BinopRegistry,
        methods: MethodRegistry,
        token: CancelToken,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                globals: Scope::new_global(),
                functions: FunctionRegistry::new(),
                libraries: LibraryRegistry::standard(),
                modules: IndexMap::new(),
                binops: BinopRegistry::default(),
                methods: MethodRegistry::default(),
                token: CancelToken::new(),
            }
        }

        fn run(&mut self, src: &str) -> Result<Value, RuntimeError> {
            let tokens = Lexer::new(src).tokenize().expect("lex error");
            let program = Parser::new(tokens).parse().expect("parse error");
            let mut ev = Evaluator::new(
                &self.globals, &self.functions, &self.libraries, &mut self.modules,
                &self.binops, &self.methods, &self.token, 50,
            );
            ev.run(&program)
        }
    }

    #[test]
    fn trailing_expression_is_the_result() {
        let mut f = Fixture::new();
        assert_eq!(f.run("x = 2\nx * 21").unwrap(), Value::Int(42));
        assert_eq!(f.run("y = 1").unwrap(), Value::Null);
    }

    #[test]
    fn logical_operators_return_operands() {
        let mut f = Fixture::new();
        assert_eq!(f.run("0 or 'fallback'").unwrap(), Value::str("fallback"));
        assert_eq!(f.run("[] and undefined_name").unwrap(), Value::list(vec![]));
    }

    #[test]
    fn depth_limit_is_a_stack_overflow() {
        let mut f = Fixture::new();
        let err = f.run("def down(n):\n    return down(n + 1)\ndown(0)").unwrap_err();
        assert_eq!(err.kind, ErrorKind::StackOverflow);
        assert_eq!(err.line, 2);
    }

    #[test]
    fn nested_import_builds_packages() {
        let mut f = Fixture::new();
        f.libraries.register(crate::namespaces::Library::new("util.text").constant("sep", ","));
        assert_eq!(f.run("import util.text\nutil.text.sep").unwrap(), Value::str(","));
        f.run("import util.text").unwrap();
        assert_eq!(f.modules.len(), 1);
    }

    #[test]
    fn index_errors_carry_kind_and_line() {
        let mut f = Fixture::new();
        assert_eq!(f.run("xs = [1]\nxs[5]").unwrap_err().kind, ErrorKind::Index);
        let err = f.run("d = {}\n\nd['k']").unwrap_err();
        assert_eq!((err.kind, err.line, err.message.as_str()), (ErrorKind::Key, 3, "'k'"));
    }

    #[test]
    fn slice_bounds_follow_python() {
        assert_eq!(slice_indices(5, None, None, None).unwrap(), vec![0, 1, 2, 3, 4]);
        assert_eq!(slice_indices(5, Some(-2), None, None).unwrap(), vec![3, 4]);
        assert_eq!(slice_indices(5, None, None, Some(-2)).unwrap(), vec![4, 2, 0]);
        assert_eq!(slice_indices(5, Some(10), Some(-10), Some(-1)).unwrap(), vec![4, 3, 2, 1, 0]);
        assert_eq!(slice_indices(5, Some(3), Some(1), None).unwrap(), Vec::<usize>::new());
        assert_eq!(slice_indices(0, None, None, Some(-1)).unwrap(), Vec::<usize>::new());
        assert_eq!(slice_indices(3, None, None, Some(i64::MAX)).unwrap(), vec![0]);
        assert_eq!(slice_indices(3, None, None, Some(0)).unwrap_err().kind, ErrorKind::Argument);
    }

    #[test]
    fn unpack_checks_length() {
        let pair = Value::list(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(unpack(pair.clone(), 2).unwrap().len(), 2);
        assert_eq!(unpack(pair.clone(), 3).unwrap_err().message, "not enough values to unpack (expected 3, got 2)");
        assert_eq!(unpack(pair, 1).unwrap_err().message, "too many values to unpack (expected 1)");
        assert_eq!(unpack(Value::Int(3), 2).unwrap_err().kind, ErrorKind::Type);
    }

    #[test]
    fn finally_runs_and_error_propagates() {
        let mut f = Fixture::new();
        let err = f.run("log = []\ntry:\n    [][1]\nfinally:\n    log.append('done')").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Index);
        assert_eq!(f.run("log").unwrap(), Value::list(vec![Value::str("done")]));
    }

    #[test]
    fn bare_raise_re_raises_the_handled_error() {
        let mut f = Fixture::new();
        let src = "try:\n    try:\n        {}['k']\n    except:\n        raise\nexcept KeyError as e:\n    caught = e\ncaught";
        assert_eq!(f.run(src).unwrap(), Value::error("'k'"));
        let err = f.run("raise").unwrap_err();
        assert_eq!((err.kind, err.message.as_str()), (ErrorKind::Raised, "no active exception to re-raise"));
    }

    #[test]
    fn handler_does_not_catch_cancellation() {
        let mut f = Fixture::new();
        let token = f.token.clone();
        f.functions.register(crate::runtime::bridge::HostFunction::new("stop", move |_, _, _| {
            token.cancel();
            Value::error("stopped")
        }));
        let err = f.run("try:\n    stop()\nexcept:\n    handled = True").unwrap_err();
        assert!(err.is_cancellation());
        assert!(f.globals.lookup("handled").is_none());
    }

    #[test]
    fn cancelled_token_stops_before_first_statement() {
        let mut f = Fixture::new();
        f.token.cancel();
        assert!(f.run("x = 1").unwrap_err().is_cancellation());
        assert!(f.globals.lookup("x").is_none());
    }
}
