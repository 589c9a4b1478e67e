//! `import json`. Object key order is preserved in both directions.

use serde::Serialize;

use crate::runtime::bridge::Kwargs;
use crate::runtime::value::Value;

use super::Library;

fn parse(name: &str, args: &[Value]) -> Value {
    let [Value::Str(text)] = args else {
        return Value::error(format!("{name}() takes exactly one string argument"));
    };
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(json) => Value::from(json),
        Err(e) => Value::error(format!("{name}(): invalid JSON: {e}")),
    }
}

fn stringify(name: &str, kwargs: &Kwargs, args: &[Value]) -> Value {
    let [value] = args else {
        return Value::error(format!("{name}() takes exactly one argument"));
    };
    if let Err(e) = kwargs.check_allowed(name, &["indent"]) {
        return Value::error(e.message);
    }
    let indent = match kwargs.get("indent") {
        None | Some(Value::Null) => None,
        Some(v) => match v.as_int() {
            Ok(n) if n >= 0 => Some(n as usize),
            _ => return Value::error(format!("{name}(): indent must be a non-negative int")),
        },
    };
    match to_string(value, indent) {
        Ok(s) => Value::from(s),
        Err(msg) => Value::error(format!("{name}(): {msg}")),
    }
}

fn to_string(value: &Value, indent: Option<usize>) -> Result<String, String> {
    let json = value.to_json().map_err(|e| e.message)?;
    let Some(width) = indent else {
        return serde_json::to_string(&json).map_err(|e| e.to_string());
    };
    let pad = " ".repeat(width);
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(pad.as_bytes());
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    json.serialize(&mut ser).map_err(|e| e.to_string())?;
    String::from_utf8(buf).map_err(|e| e.to_string())
}

pub fn library() -> Library {
    Library::new("json")
        .function("parse", |_, _, args| parse("parse", args))
        .function("loads", |_, _, args| parse("loads", args))
        .function("stringify", |_, kwargs, args| stringify("stringify", kwargs, args))
        .function("dumps", |_, kwargs, args| stringify("dumps", kwargs, args))
}
