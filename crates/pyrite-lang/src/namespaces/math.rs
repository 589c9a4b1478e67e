//! `import math`

use std::f64::consts;

use crate::error::RuntimeError;
use crate::runtime::value::{Value, float_to_int};

use super::{Library, as_float, check_argc, check_argc_range};

fn unary(name: &'static str, args: &[Value]) -> Result<f64, RuntimeError> {
    check_argc(name, args, 1)?;
    as_float(name, &args[0])
}

fn domain_error(name: &str) -> RuntimeError {
    RuntimeError::argument(0, format!("{name}(): math domain error"))
}

pub fn library() -> Library {
    Library::new("math")
        .constant("pi", consts::PI)
        .constant("e", consts::E)
        .constant("inf", f64::INFINITY)
        .native("sqrt", |_, _, args| {
            let x = unary("sqrt", args)?;
            if x < 0.0 { Err(domain_error("sqrt")) } else { Ok(Value::Float(x.sqrt())) }
        })
        .native("pow", |_, _, args| {
            check_argc("pow", args, 2)?;
            Ok(Value::Float(as_float("pow", &args[0])?.powf(as_float("pow", &args[1])?)))
        })
        .native("floor", |_, _, args| match args {
            [Value::Int(n)] => Ok(Value::Int(*n)),
            _ => float_to_int(unary("floor", args)?.floor()).map(Value::Int),
        })
        .native("ceil", |_, _, args| match args {
            [Value::Int(n)] => Ok(Value::Int(*n)),
            _ => float_to_int(unary("ceil", args)?.ceil()).map(Value::Int),
        })
        .native("fabs", |_, _, args| Ok(Value::Float(unary("fabs", args)?.abs())))
        .native("sin",  |_, _, args| Ok(Value::Float(unary("sin", args)?.sin())))
        .native("cos",  |_, _, args| Ok(Value::Float(unary("cos", args)?.cos())))
        .native("tan",  |_, _, args| Ok(Value::Float(unary("tan", args)?.tan())))
        .native("exp",  |_, _, args| Ok(Value::Float(unary("exp", args)?.exp())))
        .native("log",  |_, _, args| {
            check_argc_range("log", args, 1, 2)?;
            let x = as_float("log", &args[0])?;
            if x <= 0.0 {
                return Err(domain_error("log"));
            }
            match args.get(1) {
                None => Ok(Value::Float(x.ln())),
                Some(b) => {
                    let base = as_float("log", b)?;
                    if base <= 0.0 || base == 1.0 {
                        return Err(domain_error("log"));
                    }
                    Ok(Value::Float(x.ln() / base.ln()))
                }
            }
        })
        .native("isnan", |_, _, args| Ok(Value::Bool(unary("isnan", args)?.is_nan())))
        .native("isinf", |_, _, args| Ok(Value::Bool(unary("isinf", args)?.is_infinite())))
}
