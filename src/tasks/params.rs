// src/tasks/params.rs

//! Typed accessors over the free-form task parameter map.
//!
//! Every accessor distinguishes "absent" (`Ok(None)` / default) from "present
//! with the wrong type" (`InvalidTask`), so a typo in a pipeline file fails
//! at submission rather than producing a surprising command line.

use serde_json::Value;

use crate::errors::{EngineError, Result};
use crate::job::TaskParams;

fn wrong_type(key: &str, expected: &str, got: &Value) -> EngineError {
    EngineError::invalid_task(format!("parameter `{key}` must be {expected}, got {got}"))
}

pub fn opt_str(params: &TaskParams, key: &str) -> Result<Option<String>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(wrong_type(key, "a string", other)),
    }
}

pub fn opt_bool(params: &TaskParams, key: &str) -> Result<Option<bool>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(other) => Err(wrong_type(key, "a boolean", other)),
    }
}

pub fn bool_or(params: &TaskParams, key: &str, default: bool) -> Result<bool> {
    Ok(opt_bool(params, key)?.unwrap_or(default))
}

pub fn opt_u64(params: &TaskParams, key: &str) -> Result<Option<u64>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v @ Value::Number(n)) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| wrong_type(key, "a non-negative integer", v)),
        Some(other) => Err(wrong_type(key, "a non-negative integer", other)),
    }
}

/// A list of strings. A single string is accepted as a one-element list.
pub fn str_list(params: &TaskParams, key: &str) -> Result<Vec<String>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::String(s)) => Ok(vec![s.clone()]),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(s.clone()),
                other => Err(wrong_type(key, "a list of strings", other)),
            })
            .collect(),
        Some(other) => Err(wrong_type(key, "a list of strings", other)),
    }
}

pub fn int_list(params: &TaskParams, key: &str) -> Result<Vec<i32>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_i64()
                    .and_then(|n| i32::try_from(n).ok())
                    .ok_or_else(|| wrong_type(key, "a list of exit codes", item))
            })
            .collect(),
        Some(other) => Err(wrong_type(key, "a list of exit codes", other)),
    }
}

/// The `argv` parameter: a non-empty list whose first element is the program.
pub fn argv(params: &TaskParams) -> Result<Vec<String>> {
    let argv = str_list(params, "argv")?;
    match argv.first() {
        Some(program) if !program.trim().is_empty() => Ok(argv),
        _ => Err(EngineError::invalid_task(
            "parameter `argv` must be a non-empty list with the program first",
        )),
    }
}
