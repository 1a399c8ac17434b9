//! Builtin functions shared by the CLI and the worker handler

use std::time::Duration;

use serde_json::{Number, Value};

use super::{FunctionCatalog, FunctionResult};
use crate::types::TaggedError;

/// Register every builtin into `catalog`
pub fn register_builtins(catalog: &FunctionCatalog) {
    catalog.register("identity", identity);
    catalog.register("square", square);
    catalog.register("sum", sum);
    catalog.register("count", count);
    catalog.register("word_count", word_count);
    catalog.register("sleep", sleep);
    catalog.register("fail", fail);
    catalog.register("panic", panic);
}

fn identity(data: Value, _args: &Value) -> FunctionResult {
    Ok(data)
}

/// Squares a number, or every number of an array (chunked input)
fn square(data: Value, _args: &Value) -> FunctionResult {
    match data {
        Value::Array(items) => items
            .into_iter()
            .map(|item| square_number(&item))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        other => square_number(&other),
    }
}

fn square_number(value: &Value) -> FunctionResult {
    if let Some(i) = value.as_i64() {
        return i
            .checked_mul(i)
            .map(Value::from)
            .ok_or_else(|| format!("overflow squaring {}", i));
    }
    let f = value
        .as_f64()
        .ok_or_else(|| format!("square expects a number, got {}", value))?;
    Number::from_f64(f * f)
        .map(Value::Number)
        .ok_or_else(|| format!("square of {} is not finite", f))
}

/// Sums an array of numbers (nested arrays are flattened one level)
///
/// Fails if any element is an embedded error.
fn sum(data: Value, _args: &Value) -> FunctionResult {
    let items = match data {
        Value::Array(items) => items,
        other => return Err(format!("sum expects an array, got {}", other)),
    };

    let mut int_total: i64 = 0;
    let mut float_total: f64 = 0.0;
    let mut is_float = false;

    let mut add = |value: &Value| -> Result<(), String> {
        if let Some(err) = TaggedError::from_value(value) {
            return Err(format!("cannot sum an error value ({})", err));
        }
        if let Some(i) = value.as_i64() {
            int_total = int_total
                .checked_add(i)
                .ok_or_else(|| "integer overflow in sum".to_string())?;
        } else if let Some(f) = value.as_f64() {
            is_float = true;
            float_total += f;
        } else {
            return Err(format!("sum expects numbers, got {}", value));
        }
        Ok(())
    };

    for item in &items {
        match item {
            Value::Array(inner) => {
                for value in inner {
                    add(value)?;
                }
            }
            value => add(value)?,
        }
    }

    if is_float {
        Number::from_f64(float_total + int_total as f64)
            .map(Value::Number)
            .ok_or_else(|| "sum is not finite".to_string())
    } else {
        Ok(Value::from(int_total))
    }
}

/// Length of an array or string input
fn count(data: Value, _args: &Value) -> FunctionResult {
    match data {
        Value::Array(items) => Ok(Value::from(items.len())),
        Value::String(s) => Ok(Value::from(s.chars().count())),
        Value::Null => Ok(Value::from(0)),
        _ => Ok(Value::from(1)),
    }
}

/// Whitespace-separated word count of a string or an array of strings
fn word_count(data: Value, _args: &Value) -> FunctionResult {
    fn words(value: &Value) -> Result<usize, String> {
        match value {
            Value::String(s) => Ok(s.split_whitespace().count()),
            Value::Array(items) => items.iter().map(words).sum(),
            other => Err(format!("word_count expects text, got {}", other)),
        }
    }
    words(&data).map(Value::from)
}

/// Sleeps for `data` milliseconds (or `args.ms`) and returns its input
fn sleep(data: Value, args: &Value) -> FunctionResult {
    let ms = args
        .get("ms")
        .and_then(Value::as_u64)
        .or_else(|| data.as_u64())
        .ok_or_else(|| "sleep expects a millisecond count".to_string())?;
    std::thread::sleep(Duration::from_millis(ms));
    Ok(data)
}

/// Always raises; the message comes from `args.message` when present
fn fail(data: Value, args: &Value) -> FunctionResult {
    let message = args
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("fail called with {}", data));
    Err(message)
}

fn panic(data: Value, _args: &Value) -> FunctionResult {
    panic!("panic called with {}", data)
}
