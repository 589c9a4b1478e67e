pub mod syntax;
pub mod types;
pub mod runtime;
pub mod error;
pub mod namespaces;
pub mod config;
mod stack;

pub use config::InterpreterConfig;
pub use error::{Error, ErrorCode, ErrorKind, RuntimeError, ScriptError};
pub use namespaces::{Library, LibraryRegistry};
pub use runtime::bridge::{Caller, HostFunction, Kwargs};
pub use runtime::cancel::CancelToken;
pub use runtime::value::{FromValue, Function, Value};
pub use syntax::token::{Token, TokenKind};

use std::io::Write;
use std::rc::Rc;
use std::time::Duration;

use indexmap::IndexMap;
use tracing::debug;

use runtime::bridge::FunctionRegistry;
use runtime::env::Scope;
use runtime::interpreter::Evaluator;
use runtime::output::{OutputMode, OutputSink};
use types::binop_registry::BinopRegistry;
use types::methods::MethodRegistry;

// ─── Public API ───────────────────────────────────────────────────────────────

/// Lex and parse source text without running it.
pub fn parse(source: &str) -> Result<syntax::ast::Program, Vec<Error>> {
    let tokens = syntax::lexer::Lexer::new(source).tokenize()?;
    syntax::parser::Parser::new(tokens).parse()
}

// ─── Interpreter ──────────────────────────────────────────────────────────────

/// An embeddable interpreter instance.
///
/// Globals, imported modules and registered functions persist across
/// `eval` calls. Statements commit as they run, so a failing script keeps
/// the effects of the statements before the failure, and the instance stays
/// usable after any error, cancellation included.
pub struct Interpreter {
    globals: Scope,
    functions: FunctionRegistry,
    libraries: LibraryRegistry,
    modules: IndexMap<String, Value>,
    binops: BinopRegistry,
    methods: MethodRegistry,
    output: Rc<OutputSink>,
    config: InterpreterConfig,
}

impl Interpreter {
    pub fn new() -> Self {
        Self::build(InterpreterConfig::default())
    }

    /// Fails only if a preloaded library is not registered.
    pub fn with_config(config: InterpreterConfig) -> Result<Self, ScriptError> {
        let preload = config.preload.clone();
        let mut interp = Self::build(config);
        for name in &preload {
            interp.import(name)?;
        }
        Ok(interp)
    }

    fn build(config: InterpreterConfig) -> Self {
        let output = Rc::new(if config.capture_output { OutputSink::capturing() } else { OutputSink::new() });
        let mut functions = FunctionRegistry::new();
        if config.load_builtins {
            namespaces::builtins::install(&mut functions, Rc::clone(&output));
        }
        debug!(builtins = config.load_builtins, max_call_depth = config.max_call_depth, "interpreter created");
        Self {
            globals: Scope::new_global(),
            functions,
            libraries: LibraryRegistry::standard(),
            modules: IndexMap::new(),
            binops: BinopRegistry::default(),
            methods: MethodRegistry::default(),
            output,
            config,
        }
    }

    pub fn config(&self) -> &InterpreterConfig {
        &self.config
    }

    fn evaluator<'a>(&'a mut self, token: &'a CancelToken) -> Evaluator<'a> {
        Evaluator::new(
            &self.globals,
            &self.functions,
            &self.libraries,
            &mut self.modules,
            &self.binops,
            &self.methods,
            token,
            self.config.max_call_depth,
        )
    }

    // ─── Evaluation ───────────────────────────────────────────────────────────

    /// Run `source` against the persistent globals. Returns the value of a
    /// trailing expression statement, or Null.
    pub fn eval(&mut self, source: &str) -> Result<Value, ScriptError> {
        self.eval_with_token(&CancelToken::new(), source)
    }

    pub fn eval_with_timeout(&mut self, source: &str, timeout: Duration) -> Result<Value, ScriptError> {
        self.eval_with_token(&CancelToken::with_timeout(timeout), source)
    }

    pub fn eval_with_token(&mut self, token: &CancelToken, source: &str) -> Result<Value, ScriptError> {
        debug!(bytes = source.len(), "eval start");
        let program = parse(source).map_err(|errors| {
            debug!(errors = errors.len(), "syntax error");
            ScriptError::Syntax(errors)
        })?;
        let result = self.evaluator(token).run(&program);
        match &result {
            Ok(v) => debug!(result = v.type_name(), "eval finished"),
            Err(e) => debug!(kind = e.kind.as_str(), line = e.line, "eval failed"),
        }
        Ok(result?)
    }

    // ─── Variables ────────────────────────────────────────────────────────────

    pub fn set_var(&mut self, name: &str, value: impl Into<Value>) {
        self.globals.define(name, value.into());
    }

    pub fn get_var(&self, name: &str) -> Result<Value, ScriptError> {
        self.globals.get_local(name).ok_or_else(|| ScriptError::VariableNotFound(name.to_string()))
    }

    /// Read a global and convert it, e.g. `get_var_as::<Vec<Value>>("xs")`.
    pub fn get_var_as<T: FromValue>(&self, name: &str) -> Result<T, ScriptError> {
        Ok(T::from_value(&self.get_var(name)?)?)
    }

    pub fn get_int(&self, name: &str) -> Result<i64, ScriptError> {
        self.get_var_as(name)
    }

    pub fn get_float(&self, name: &str) -> Result<f64, ScriptError> {
        self.get_var_as(name)
    }

    pub fn get_string(&self, name: &str) -> Result<String, ScriptError> {
        self.get_var_as(name)
    }

    pub fn get_bool(&self, name: &str) -> Result<bool, ScriptError> {
        self.get_var_as(name)
    }

    pub fn get_list(&self, name: &str) -> Result<Vec<Value>, ScriptError> {
        self.get_var_as(name)
    }

    pub fn get_dict(&self, name: &str) -> Result<IndexMap<String, Value>, ScriptError> {
        self.get_var_as(name)
    }

    pub fn has_var(&self, name: &str) -> bool {
        self.globals.contains_local(name)
    }

    /// Global names in definition order, script functions included.
    pub fn var_names(&self) -> Vec<String> {
        self.globals.names()
    }

    // ─── Functions & libraries ────────────────────────────────────────────────

    /// Make `f` callable from scripts as `name(...)`. Returning
    /// `Value::Error(msg)` fails the call.
    pub fn register<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&CancelToken, &Kwargs, &[Value]) -> Value + 'static,
    {
        self.register_host(HostFunction::new(name, f));
    }

    pub fn register_host(&mut self, f: HostFunction) {
        debug!(function = f.name(), "registered host function");
        self.functions.register(f);
    }

    /// Make `lib` importable. Nothing is bound until it is imported.
    pub fn register_library(&mut self, lib: Library) {
        debug!(library = lib.name(), members = lib.member_names().count(), "registered library");
        self.libraries.register(lib);
    }

    /// Host functions only; script-defined functions are globals.
    pub fn has_function(&self, name: &str) -> bool {
        self.functions.contains(name)
    }

    /// Built-ins first, then embedder functions, in registration order.
    pub fn function_names(&self) -> Vec<&str> {
        self.functions.names().collect()
    }

    /// Whether `import name` would succeed.
    pub fn has_library(&self, name: &str) -> bool {
        self.libraries.contains(name)
    }

    /// Sorted.
    pub fn library_names(&self) -> Vec<&str> {
        self.libraries.names()
    }

    /// Host-side `import name`.
    pub fn import(&mut self, name: &str) -> Result<(), ScriptError> {
        let token = CancelToken::new();
        self.evaluator(&token).import(name)?;
        Ok(())
    }

    pub fn call_function(&mut self, name: &str, args: Vec<Value>, kwargs: Kwargs) -> Result<Value, ScriptError> {
        self.call_function_with_token(&CancelToken::new(), name, args, kwargs)
    }

    /// Call a host function, a script-defined global function, or a dotted
    /// module member such as `json.dumps`, in that order.
    pub fn call_function_with_token(
        &mut self,
        token: &CancelToken,
        name: &str,
        args: Vec<Value>,
        kwargs: Kwargs,
    ) -> Result<Value, ScriptError> {
        let callee = self.resolve_callable(name)
            .ok_or_else(|| ScriptError::FunctionNotFound(name.to_string()))?;
        debug!(function = name, args = args.len(), "host call");
        Ok(self.evaluator(token).call_value(&callee, args, kwargs, 0)?)
    }

    fn resolve_callable(&self, name: &str) -> Option<Value> {
        if let Some(h) = self.functions.get(name) {
            return Some(Value::host_function(h.clone()));
        }
        if let Some(f @ Value::Function(_)) = self.globals.get_local(name) {
            return Some(f);
        }
        let mut parts = name.split('.');
        let mut current = self.modules.get(parts.next()?)?.clone();
        for part in parts {
            let next = current.as_dict().ok()?.borrow().get(part).cloned()?;
            current = next;
        }
        matches!(current, Value::Function(_)).then_some(current)
    }

    // ─── Output ───────────────────────────────────────────────────────────────

    /// Buffer `print` output instead of writing it to stdout.
    pub fn enable_output_capture(&mut self) {
        self.output.set_mode(OutputMode::Capture);
    }

    pub fn is_capturing_output(&self) -> bool {
        self.output.is_capturing()
    }

    pub fn set_output_writer(&mut self, writer: impl Write + 'static) {
        self.output.set_mode(OutputMode::Writer(Box::new(writer)));
    }

    /// Drain captured output.
    pub fn take_output(&mut self) -> String {
        self.output.take()
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Interpreter {
    // Global functions hold the global scope, which holds them.
    fn drop(&mut self) {
        self.globals.clear();
        self.modules.clear();
    }
}
