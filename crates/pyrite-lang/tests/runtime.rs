//! Runtime behavior tests.
//!
//! Tests the full stack: source → Interpreter::eval → globals / result / output.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use pyrite_lang::{
    CancelToken, ErrorCode, ErrorKind, HostFunction, Interpreter, InterpreterConfig, Kwargs, Library,
    ScriptError, Value,
};

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn interp() -> Interpreter {
    let mut i = Interpreter::new();
    i.enable_output_capture();
    i
}

fn run(src: &str) -> Interpreter {
    let mut i = interp();
    i.eval(src).unwrap_or_else(|e| panic!("eval failed: {e}"));
    i
}

fn eval(src: &str) -> Value {
    interp().eval(src).unwrap_or_else(|e| panic!("eval failed: {e}"))
}

fn run_err(src: &str) -> pyrite_lang::RuntimeError {
    match interp().eval(src) {
        Ok(v) => panic!("expected a runtime error, got {v:?}"),
        Err(ScriptError::Runtime(e)) => e,
        Err(other) => panic!("expected a runtime error, got {other}"),
    }
}

fn syntax_err(src: &str) -> Vec<pyrite_lang::Error> {
    match interp().eval(src) {
        Err(ScriptError::Syntax(errors)) => errors,
        other => panic!("expected a syntax error, got {other:?}"),
    }
}

fn output(src: &str) -> String {
    let mut i = run(src);
    i.take_output()
}

/// Host function that waits on the token, the way a well-behaved I/O call does.
fn register_slow(i: &mut Interpreter) {
    i.register("slow", |token, _, args| {
        let ms = args.first().and_then(|v| v.as_int().ok()).unwrap_or(2000);
        match token.sleep(Duration::from_millis(ms as u64)) {
            Ok(()) => Value::str("done"),
            Err(e) => Value::error(e.message),
        }
    });
}

// ─── Globals and results ─────────────────────────────────────────────────────

#[test]
fn int_assignment_reads_back() {
    let i = run("x = 42");
    assert_eq!(i.get_int("x").unwrap(), 42);
}

#[test]
fn state_accumulates_across_evals() {
    let mut i = interp();
    i.eval("x = 1").unwrap();
    i.eval("x = x + 1").unwrap();
    i.eval("x = x + 1").unwrap();
    assert_eq!(i.get_int("x").unwrap(), 3);
}

#[test]
fn trailing_expression_is_result() {
    assert_eq!(eval("a = 3\na * 2"), Value::Int(6));
    assert_eq!(eval("a = 3"), Value::Null);
    assert_eq!(eval(""), Value::Null);
}

#[test]
fn host_values_round_trip() {
    let mut i = interp();
    i.set_var("n", 10);
    i.set_var("name", "pyrite");
    i.set_var("xs", vec![1i64, 2, 3]);
    i.eval("m = n * 2\nlabel = name.upper()\nxs.append(4)").unwrap();
    assert_eq!(i.get_int("m").unwrap(), 20);
    assert_eq!(i.get_string("label").unwrap(), "PYRITE");
    assert_eq!(i.get_list("xs").unwrap().len(), 4);
}

#[test]
fn typed_getters_report_mismatch() {
    let i = run("s = 'text'\nf = 2.5\nb = True\nd = {'k': 1}");
    assert_eq!(i.get_float("f").unwrap(), 2.5);
    assert!(i.get_bool("b").unwrap());
    assert_eq!(i.get_dict("d").unwrap().get("k"), Some(&Value::Int(1)));
    assert_eq!(i.get_int("s").unwrap_err().kind(), Some(ErrorKind::Type));
    assert!(matches!(i.get_var("missing"), Err(ScriptError::VariableNotFound(n)) if n == "missing"));
}

#[test]
fn introspection_lists_names() {
    let mut i = run("x = 1\ndef f():\n    pass");
    assert!(i.has_var("x"));
    assert!(!i.has_var("y"));
    assert_eq!(i.var_names(), vec!["x", "f"]);
    assert!(i.has_function("print"));
    assert!(!i.has_function("f"));
    i.register("greet", |_, _, _| Value::Null);
    assert_eq!(i.function_names().last(), Some(&"greet"));
    assert!(i.has_library("math"));
    assert!(!i.has_library("os"));
    assert!(i.library_names().contains(&"json"));
    assert!(i.is_capturing_output());
    assert!(!Interpreter::new().is_capturing_output());
}

// ─── Arithmetic ──────────────────────────────────────────────────────────────

#[test]
fn numeric_tower() {
    assert_eq!(eval("7 // 2"), Value::Int(3));
    assert_eq!(eval("-7 // 2"), Value::Int(-4));
    assert_eq!(eval("7 / 2"), Value::Float(3.5));
    assert_eq!(eval("-7 % 3"), Value::Int(2));
    assert_eq!(eval("2 ** 10"), Value::Int(1024));
    assert_eq!(eval("2 ** -1"), Value::Float(0.5));
    assert_eq!(eval("1 + 2.5"), Value::Float(3.5));
    assert_eq!(eval("2 ** 3 ** 2"), Value::Int(512));
    assert_eq!(eval("-2 ** 2"), Value::Int(-4));
}

#[test]
fn division_by_zero_fails() {
    assert_eq!(run_err("1/0").kind, ErrorKind::Division);
    assert_eq!(run_err("1 % 0").kind, ErrorKind::Division);
    assert_eq!(run_err("1.0 // 0").kind, ErrorKind::Division);
}

#[test]
fn integer_overflow_is_an_error() {
    assert_eq!(run_err("9223372036854775807 + 1").kind, ErrorKind::Overflow);
    assert_eq!(run_err("x = 2 ** 64").kind, ErrorKind::Overflow);
}

#[test]
fn mixed_kinds_are_type_errors() {
    let err = run_err("'a' + 1");
    assert_eq!(err.kind, ErrorKind::Type);
    assert_eq!(err.message, "unsupported operand type(s) for +: 'str' and 'int'");
    assert_eq!(run_err("-'a'").kind, ErrorKind::Type);
    assert_eq!(run_err("[1] < 'a'").kind, ErrorKind::Type);
}

#[test]
fn equality_and_membership() {
    assert_eq!(eval("1 == 1.0"), Value::Bool(true));
    assert_eq!(eval("[1, 2] == [1, 2]"), Value::Bool(true));
    assert_eq!(eval("'b' in 'abc'"), Value::Bool(true));
    assert_eq!(eval("3 not in [1, 2]"), Value::Bool(true));
    assert_eq!(eval("'k' in {'k': 0}"), Value::Bool(true));
    assert_eq!(eval("None == None"), Value::Bool(true));
}

#[test]
fn strings_concatenate_and_repeat() {
    assert_eq!(eval("'ab' * 3"), Value::str("ababab"));
    assert_eq!(eval("'py' 'rite'"), Value::str("pyrite"));
    assert_eq!(eval("[0] * 3"), Value::list(vec![Value::Int(0); 3]));
}

#[test]
fn power_of_trivial_bases() {
    assert_eq!(run_err("0 ** -1").kind, ErrorKind::Division);
    assert_eq!(eval("1 ** 5000000000"), Value::Int(1));
    assert_eq!(eval("(-1) ** 5000000001"), Value::Int(-1));
    assert_eq!(eval("0 ** 5000000000"), Value::Int(0));
}

#[test]
fn comparing_self_containing_lists_is_an_error() {
    let err = run_err("a = []\na.append(a)\nb = []\nb.append(b)\na == b");
    assert_eq!((err.kind, err.line), (ErrorKind::StackOverflow, 5));
    assert_eq!(run_err("a = []\na.append(a)\nb = []\nb.append(b)\na in [b]").kind, ErrorKind::StackOverflow);
    assert_eq!(run_err("a = []\na.append(a)\nb = []\nb.append(b)\n[b].count(a)").kind, ErrorKind::StackOverflow);
    assert_eq!(eval("a = []\na.append(a)\nlen(a[0][0])"), Value::Int(1));
}

// ─── Control flow ────────────────────────────────────────────────────────────

#[test]
fn if_elif_else() {
    let src = r#"
def grade(n):
    if n >= 90:
        return "A"
    elif n >= 80:
        return "B"
    else:
        return "C"
a = grade(95)
b = grade(85)
c = grade(10)
"#;
    let i = run(src);
    assert_eq!(i.get_string("a").unwrap(), "A");
    assert_eq!(i.get_string("b").unwrap(), "B");
    assert_eq!(i.get_string("c").unwrap(), "C");
}

#[test]
fn loops_with_break_and_continue() {
    let src = r#"
total = 0
for n in range(10):
    if n % 2 == 0:
        continue
    if n > 7:
        break
    total += n
count = 0
while True:
    count += 1
    if count == 5:
        break
"#;
    let i = run(src);
    assert_eq!(i.get_int("total").unwrap(), 1 + 3 + 5 + 7);
    assert_eq!(i.get_int("count").unwrap(), 5);
}

#[test]
fn for_over_dict_and_string() {
    let i = run("keys = []\nfor k in {'a': 1, 'b': 2}:\n    keys.append(k)\nchars = [c for c in 'hey']");
    assert_eq!(i.get_var("keys").unwrap().to_string(), "['a', 'b']");
    assert_eq!(i.get_var("chars").unwrap().to_string(), "['h', 'e', 'y']");
}

#[test]
fn loop_variable_is_scoped_to_the_loop() {
    let err = run_err("for i in [1]:\n    pass\ni");
    assert_eq!(err.kind, ErrorKind::Name);
}

#[test]
fn conditional_expression_and_short_circuit() {
    assert_eq!(eval("'yes' if 1 > 0 else 'no'"), Value::str("yes"));
    assert_eq!(eval("None or 5"), Value::Int(5));
    assert_eq!(eval("False and missing()"), Value::Bool(false));
    assert_eq!(eval("not []"), Value::Bool(true));
}

#[test]
fn try_except_catches_by_kind() {
    let src = r#"
def safe_div(a, b):
    try:
        return a / b
    except ZeroDivisionError:
        return None
[safe_div(6, 3), safe_div(1, 0)]
"#;
    assert_eq!(eval(src), Value::list(vec![Value::Float(2.0), Value::Null]));
    assert_eq!(run_err("try:\n    [][0]\nexcept KeyError:\n    pass").kind, ErrorKind::Index);
}

#[test]
fn raised_message_reaches_the_handler() {
    let i = run("try:\n    raise 'disk full'\nexcept Exception as e:\n    msg = str(e)");
    assert_eq!(i.get_string("msg").unwrap(), "disk full");
    let err = run_err("x = 1\nraise Exception('bad state')");
    assert_eq!((err.kind, err.line, err.message.as_str()), (ErrorKind::Raised, 2, "bad state"));
    assert_eq!(err.kind.as_str(), "Error");
}

#[test]
fn finally_runs_on_return() {
    let src = r#"
log = []
def f():
    try:
        return 1
    finally:
        log.append("cleanup")
r = f()
"#;
    let i = run(src);
    assert_eq!(i.get_int("r").unwrap(), 1);
    assert_eq!(i.get_list("log").unwrap(), vec![Value::str("cleanup")]);
}

#[test]
fn else_runs_only_without_error() {
    let src = r#"
out = []
for x in [1, 0]:
    try:
        y = 10 / x
    except:
        out.append("err")
    else:
        out.append("ok")
"#;
    assert_eq!(run(src).get_list("out").unwrap(), vec![Value::str("ok"), Value::str("err")]);
}

#[test]
fn handlers_never_swallow_cancellation() {
    let mut i = interp();
    register_slow(&mut i);
    let err = i.eval_with_timeout("try:\n    slow(2000)\nexcept:\n    caught = True", Duration::from_millis(50))
        .unwrap_err();
    assert!(err.is_cancellation(), "{err}");
    assert!(!i.has_var("caught"));
}

// ─── Functions ───────────────────────────────────────────────────────────────

#[test]
fn keyword_arguments_and_defaults() {
    let src = r#"
def greet(name, greeting="Hello", punctuation="!"):
    return greeting + ", " + name + punctuation
a = greet(name="World")
b = greet(greeting="Hi", punctuation="?", name="Alice")
c = greet("Bob", "Hey")
"#;
    let i = run(src);
    assert_eq!(i.get_string("a").unwrap(), "Hello, World!");
    assert_eq!(i.get_string("b").unwrap(), "Hi, Alice?");
    assert_eq!(i.get_string("c").unwrap(), "Hey, Bob!");
}

#[test]
fn call_binding_errors() {
    let def = "def f(a, b=1):\n    return a\n";
    for (call, message) in [
        ("f()", "f() missing required argument 'a'"),
        ("f(1, 2, 3)", "f() takes 2 positional arguments but 3 were given"),
        ("f(1, a=2)", "f() got multiple values for argument 'a'"),
        ("f(1, c=2)", "f() got an unexpected keyword argument 'c'"),
    ] {
        let err = run_err(&format!("{def}{call}"));
        assert_eq!(err.kind, ErrorKind::Argument, "{call}");
        assert_eq!(err.message, message);
        assert_eq!(err.line, 3);
    }
}

#[test]
fn recursive_fibonacci() {
    let src = r#"
def fibonacci(n):
    if n <= 1:
        return n
    return fibonacci(n - 1) + fibonacci(n - 2)
fibonacci(10)
"#;
    assert_eq!(eval(src), Value::Int(55));
}

#[test]
fn closures_capture_their_scope() {
    let src = r#"
def make_counter():
    state = {"n": 0}
    def bump(step=1):
        state["n"] += step
        return state["n"]
    return bump
c = make_counter()
c()
c(5)
"#;
    assert_eq!(eval(src), Value::Int(6));
}

#[test]
fn defaults_are_evaluated_once() {
    let src = r#"
def push(x, acc=[]):
    acc.append(x)
    return acc
push(1)
push(2)
"#;
    assert_eq!(eval(src).to_string(), "[1, 2]");
}

#[test]
fn function_without_return_yields_none() {
    assert_eq!(eval("def f():\n    pass\nf()"), Value::Null);
}

#[test]
fn deep_recursion_hits_depth_limit() {
    let mut i = Interpreter::with_config(InterpreterConfig::new().max_call_depth(200)).unwrap();
    let ok = i.eval("def depth(n):\n    return 0 if n == 0 else 1 + depth(n - 1)\ndepth(150)").unwrap();
    assert_eq!(ok, Value::Int(150));
    let err = i.eval("depth(500)").unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::StackOverflow));
    assert_eq!(i.eval("depth(3)").unwrap(), Value::Int(3));
}

#[test]
fn default_depth_limit_does_not_overflow_native_stack() {
    let err = run_err("def f(n):\n    return f(n + 1)\nf(0)");
    assert_eq!(err.kind, ErrorKind::StackOverflow);
}

#[test]
fn closures_in_a_loop_capture_each_iteration() {
    let src = r#"
fs = []
for i in [1, 2, 3]:
    def f():
        return i
    fs.append(f)
[g() for g in fs]
"#;
    assert_eq!(eval(src), Value::list(vec![Value::Int(1), Value::Int(2), Value::Int(3)]));
}

#[test]
fn lambdas_capture_their_scope() {
    assert_eq!(eval("def adder(n):\n    return lambda x: x + n\nadd3 = adder(3)\nadd3(4)"), Value::Int(7));
    assert_eq!(eval("(lambda: 'ok')()"), Value::str("ok"));
}

#[test]
fn builtins_call_back_into_script_functions() {
    let src = r#"
pairs = [["b", 2], ["a", 3], ["c", 1]]
by_count = [p[0] for p in sorted(pairs, key=lambda p: p[1])]
def second(p):
    return p[1]
desc = [p[0] for p in sorted(pairs, key=second, reverse=True)]
doubled = map(lambda x: x * 2, [1, 2, 3])
odd = filter(lambda x: x % 2, range(6))
"#;
    let i = run(src);
    let names = |v: &[&str]| v.iter().map(|s| Value::str(s)).collect::<Vec<_>>();
    assert_eq!(i.get_list("by_count").unwrap(), names(&["c", "b", "a"]));
    assert_eq!(i.get_list("desc").unwrap(), names(&["a", "b", "c"]));
    assert_eq!(i.get_list("doubled").unwrap(), vec![Value::Int(2), Value::Int(4), Value::Int(6)]);
    assert_eq!(i.get_list("odd").unwrap(), vec![Value::Int(1), Value::Int(3), Value::Int(5)]);
}

#[test]
fn errors_inside_callbacks_propagate() {
    let err = run_err("xs = [1, 2]\nsorted(xs, key=lambda x: x / 0)");
    assert_eq!((err.kind, err.line), (ErrorKind::Division, 2));
}

// ─── Collections ─────────────────────────────────────────────────────────────

#[test]
fn comprehension_filter_and_sum() {
    assert_eq!(eval("[x for x in [10, 20, 30, 40, 50] if x > 25]").to_string(), "[30, 40, 50]");
    assert_eq!(eval("sum([x for x in [10, 20, 30, 40, 50] if x > 25])"), Value::Int(120));
    assert_eq!(eval("{k: len(k) for k in ['a', 'bb']}").to_string(), "{'a': 1, 'bb': 2}");
}

#[test]
fn lists_are_shared_by_reference() {
    let i = run("a = [1]\nb = a\nb.append(2)\nb[0] = 9");
    assert_eq!(i.get_var("a").unwrap().to_string(), "[9, 2]");
}

#[test]
fn indexing() {
    assert_eq!(eval("[1, 2, 3][-1]"), Value::Int(3));
    assert_eq!(eval("'héllo'[1]"), Value::str("é"));
    assert_eq!(eval("{'a': {'b': 2}}['a']['b']"), Value::Int(2));
    assert_eq!(run_err("[1][3]").kind, ErrorKind::Index);
    assert_eq!(run_err("{}['x']").kind, ErrorKind::Key);
    assert_eq!(run_err("5[0]").kind, ErrorKind::Type);
}

#[test]
fn dict_keys_must_be_strings() {
    assert_eq!(run_err("{1: 2}").kind, ErrorKind::Type);
    assert_eq!(run_err("d = {}\nd[1] = 2").kind, ErrorKind::Type);
}

#[test]
fn methods_dispatch_by_receiver() {
    assert_eq!(eval("' a,b '.strip().split(',')").to_string(), "['a', 'b']");
    assert_eq!(eval("'-'.join(['x', 'y'])"), Value::str("x-y"));
    assert_eq!(eval("'{} is {age}'.format('Ann', age=7)"), Value::str("Ann is 7"));
    assert_eq!(eval("d = {'a': 1}\nd.get('b', 0)"), Value::Int(0));
    assert_eq!(eval("xs = [3, 1, 2]\nxs.sort(reverse=True)\nxs").to_string(), "[3, 2, 1]");
    assert_eq!(run_err("'a'.nope()").kind, ErrorKind::Type);
}

#[test]
fn comprehension_never_mutates_its_iterable() {
    let i = run("xs = [1, 2, 3]\nys = [xs.append(x) or x for x in xs]");
    assert_eq!(i.get_list("ys").unwrap(), vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
    assert_eq!(i.get_list("xs").unwrap().len(), 6);
}

#[test]
fn tuple_assignment_and_swap() {
    let i = run("a, b = 1, 2\na, b = b, a\n(c, d) = [a, b]");
    assert_eq!((i.get_int("a").unwrap(), i.get_int("b").unwrap()), (2, 1));
    assert_eq!((i.get_int("c").unwrap(), i.get_int("d").unwrap()), (2, 1));
}

#[test]
fn for_unpacks_dict_items() {
    let i = run("d = {'x': 1, 'y': 2}\nout = []\nfor k, v in d.items():\n    out.append(k + str(v))");
    assert_eq!(i.get_list("out").unwrap(), vec![Value::str("x1"), Value::str("y2")]);
    assert_eq!(eval("[k + str(v) for k, v in [['a', 1], ['b', 2]]]").to_string(), "['a1', 'b2']");
    assert_eq!(eval("[i * n for i, n in enumerate([5, 6])]").to_string(), "[0, 6]");
}

#[test]
fn unpacking_mismatch_is_reported() {
    let err = run_err("a, b = [1, 2, 3]");
    assert_eq!((err.kind, err.message.as_str()), (ErrorKind::Argument, "too many values to unpack (expected 2)"));
    assert_eq!(run_err("a, b = 5").kind, ErrorKind::Type);
    assert_eq!(run_err("for a, b in [[1]]:\n    pass").kind, ErrorKind::Argument);
}

#[test]
fn slicing_lists_and_strings() {
    assert_eq!(eval("[0, 1, 2, 3, 4, 5][1:5:2]").to_string(), "[1, 3]");
    assert_eq!(eval("[1, 2, 3][-2:]").to_string(), "[2, 3]");
    assert_eq!(eval("'hello'[::-1]"), Value::str("olleh"));
    assert_eq!(eval("'hello'[1:3]"), Value::str("el"));
    assert_eq!(eval("xs = [1, 2]\nys = xs[:]\nys.append(3)\nlen(xs)"), Value::Int(2));
    assert_eq!(run_err("[1][::0]").kind, ErrorKind::Argument);
    assert_eq!(run_err("[1]['a':]").kind, ErrorKind::Type);
    assert_eq!(run_err("{}[1:2]").kind, ErrorKind::Type);
}

#[test]
fn f_strings_interpolate_and_format() {
    let src = "name = 'pi'\nx = 3.14159\nf'{name}={x:.2f} [{name!r:>6}] {{ok}} {len(name) + 1}'";
    assert_eq!(eval(src), Value::str("pi=3.14 [  'pi'] {ok} 3"));
    assert_eq!(run_err("x = 1\nf'{x:q}'").kind, ErrorKind::Argument);
    assert_eq!(syntax_err("f'{x'")[0].code, ErrorCode::P001);
}

// ─── Imports and libraries ───────────────────────────────────────────────────

#[test]
fn standard_libraries() {
    assert_eq!(eval("import math\nmath.floor(2.7)"), Value::Int(2));
    assert_eq!(eval("import json\njson.dumps(json.loads('{\"b\": 1, \"a\": [true, null]}'))"),
        Value::str(r#"{"b":1,"a":[true,null]}"#));
    assert_eq!(run_err("import nope").kind, ErrorKind::Import);
}

#[test]
fn import_is_idempotent() {
    let mut i = interp();
    i.eval("import math\nmath['answer'] = 42").unwrap();
    i.eval("import math").unwrap();
    i.import("math").unwrap();
    assert_eq!(i.eval("math.answer").unwrap(), Value::Int(42));
}

#[test]
fn custom_library_members() {
    let mut i = interp();
    i.register_library(
        Library::new("strings")
            .constant("sep", "/")
            .function("shout", |_, kwargs, args| {
                let bang = if kwargs.get_bool("bang", false).unwrap_or(false) { "!" } else { "" };
                match args.first() {
                    Some(Value::Str(s)) => Value::from(format!("{}{bang}", s.to_uppercase())),
                    _ => Value::error("shout() expects a string"),
                }
            }),
    );
    assert_eq!(i.eval("import strings\nstrings.shout('hi', bang=True) + strings.sep").unwrap(), Value::str("HI!/"));
    let err = i.eval("strings.shout(1)").unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::Raised));
    assert_eq!(err.to_string(), "Error: shout() expects a string (line 1)");
}

#[test]
fn preload_config_imports_up_front() {
    let mut i = Interpreter::with_config(InterpreterConfig::new().preload("math")).unwrap();
    assert_eq!(i.eval("math.sqrt(9)").unwrap(), Value::Float(3.0));
    assert!(Interpreter::with_config(InterpreterConfig::new().preload("nope")).is_err());
}

// ─── Host functions ──────────────────────────────────────────────────────────

#[test]
fn host_function_with_kwargs() {
    let mut i = interp();
    i.register("scale", |_, kwargs, args| {
        let factor = match kwargs.get_int("factor", 2) {
            Ok(f) => f,
            Err(e) => return Value::error(e.message),
        };
        match args {
            [Value::Int(n)] => Value::Int(n * factor),
            _ => Value::error("scale() takes one int"),
        }
    });
    assert_eq!(i.eval("scale(4)").unwrap(), Value::Int(8));
    assert_eq!(i.eval("scale(4, factor=10)").unwrap(), Value::Int(40));
    assert_eq!(i.eval("f = scale\nf(1)").unwrap(), Value::Int(2));
}

#[test]
fn host_calls_into_script_functions() {
    let mut i = interp();
    i.eval("def add(a, b=10):\n    return a + b").unwrap();
    let mut kw = Kwargs::new();
    kw.insert("b", 5);
    assert_eq!(i.call_function("add", vec![Value::Int(1)], kw).unwrap(), Value::Int(6));
    assert_eq!(i.call_function("len", vec![Value::str("abc")], Kwargs::new()).unwrap(), Value::Int(3));
    i.import("math").unwrap();
    assert_eq!(i.call_function("math.fabs", vec![Value::Int(-2)], Kwargs::new()).unwrap(), Value::Float(2.0));
    assert!(matches!(
        i.call_function("nope", vec![], Kwargs::new()),
        Err(ScriptError::FunctionNotFound(n)) if n == "nope"
    ));
}

#[test]
fn host_callback_into_script_function() {
    let mut i = interp();
    i.register_host(HostFunction::with_caller("apply", |caller, _, args| {
        caller.call(&args[0], args[1..].to_vec())
    }));
    assert_eq!(i.eval("def sq(x):\n    return x * x\napply(sq, 7)").unwrap(), Value::Int(49));
    assert_eq!(i.eval("apply(lambda a, b: a - b, 10, 4)").unwrap(), Value::Int(6));
}

#[test]
fn host_state_shared_through_closure() {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let mut i = interp();
    let sink = Rc::clone(&seen);
    i.register("record", move |_, _, args| {
        sink.borrow_mut().extend(args.iter().cloned());
        Value::Null
    });
    i.eval("for n in range(3):\n    record(n * n)").unwrap();
    assert_eq!(*seen.borrow(), vec![Value::Int(0), Value::Int(1), Value::Int(4)]);
}

// ─── Cancellation ────────────────────────────────────────────────────────────

#[test]
fn deadline_cancels_host_wait_and_instance_survives() {
    let mut i = interp();
    register_slow(&mut i);
    let started = Instant::now();
    let err = i.eval_with_timeout("slow()", Duration::from_millis(50)).unwrap_err();
    assert!(err.is_cancellation(), "{err}");
    assert!(started.elapsed() < Duration::from_millis(1500));
    assert_eq!(i.eval("1 + 1").unwrap(), Value::Int(2));
}

#[test]
fn cancellation_through_call_function() {
    let mut i = interp();
    register_slow(&mut i);
    let token = CancelToken::with_timeout(Duration::from_millis(20));
    let err = i.call_function_with_token(&token, "slow", vec![], Kwargs::new()).unwrap_err();
    assert!(err.is_cancellation());
    assert_eq!(i.call_function("slow", vec![Value::Int(1)], Kwargs::new()).unwrap(), Value::str("done"));
}

#[test]
fn cancelling_from_another_thread_stops_a_loop() {
    let mut i = interp();
    let token = CancelToken::new();
    let remote = token.clone();
    let handle = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(30));
        remote.cancel();
    });
    let err = i.eval_with_token(&token, "n = 0\nwhile True:\n    n += 1").unwrap_err();
    handle.join().unwrap();
    assert!(err.is_cancellation());
    assert!(i.get_int("n").unwrap() > 0);
}

// ─── Output ──────────────────────────────────────────────────────────────────

#[test]
fn captured_output_drains() {
    let mut i = interp();
    i.eval("print(\"a\")\nprint(\"b\")").unwrap();
    assert_eq!(i.take_output(), "a\nb\n");
    assert_eq!(i.take_output(), "");
}

#[test]
fn print_formats_values() {
    assert_eq!(output("print(1, 2.0, 'x', None, True, [1, 'a'], sep='|')"), "1|2.0|x|None|True|[1, 'a']\n");
    assert_eq!(output("print('no newline', end='')"), "no newline");
}

#[test]
fn output_to_custom_writer() {
    #[derive(Clone, Default)]
    struct Shared(Rc<RefCell<Vec<u8>>>);
    impl std::io::Write for Shared {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> { Ok(()) }
    }

    let buf = Shared::default();
    let mut i = Interpreter::new();
    i.set_output_writer(buf.clone());
    i.eval("print('to writer')").unwrap();
    assert_eq!(String::from_utf8(buf.0.borrow().clone()).unwrap(), "to writer\n");
}

// ─── Errors ──────────────────────────────────────────────────────────────────

#[test]
fn syntax_error_runs_nothing() {
    let mut i = interp();
    let err = i.eval("print('side effect')\nif x").unwrap_err();
    assert!(err.is_syntax());
    assert_eq!(i.take_output(), "");
}

#[test]
fn syntax_error_codes() {
    assert_eq!(syntax_err("x = 'open")[0].code, ErrorCode::L002);
    assert_eq!(syntax_err("break")[0].code, ErrorCode::P001);
    assert!(syntax_err("if True:\nx = 1").iter().any(|e| e.line == 2));
}

#[test]
fn runtime_error_keeps_earlier_effects() {
    let mut i = interp();
    let err = i.eval("a = 1\nb = undefined\nc = 3").unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::Name));
    assert_eq!(err.to_string(), "NameError: name 'undefined' is not defined (line 2)");
    assert_eq!(i.get_int("a").unwrap(), 1);
    assert!(i.get_var("c").is_err());
}

#[test]
fn deeply_nested_list_is_dropped_safely() {
    let mut i = interp();
    i.eval("x = []\nfor _ in range(200000):\n    x = [x]").unwrap();
    assert_eq!(i.eval("len(x)").unwrap(), Value::Int(1));
    drop(i);
}

#[test]
fn builtins_can_be_disabled() {
    let mut i = Interpreter::with_config(InterpreterConfig::new().load_builtins(false)).unwrap();
    assert_eq!(i.eval("len([])").unwrap_err().kind(), Some(ErrorKind::Name));
}
