use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use crate::store::StoreError;
use rusqlite::Connection;
use serde_json::Value;
use std::collections::HashSet;

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn required_str(req: &Request, key: &str) -> Result<String, Value> {
    match req.params.get(key).and_then(|v| v.as_str()).map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(err(&req.id, "bad_params", format!("missing {}", key), None)),
    }
}

/// Absent or `null` is `None`; anything but a string is rejected.
pub fn optional_str(req: &Request, key: &str) -> Result<Option<String>, Value> {
    match req.params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.trim().to_string())),
        Some(_) => Err(err(
            &req.id,
            "bad_params",
            format!("{} must be a string", key),
            None,
        )),
    }
}

pub fn optional_bool(req: &Request, key: &str) -> Result<Option<bool>, Value> {
    match req.params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(err(
            &req.id,
            "bad_params",
            format!("{} must be boolean", key),
            None,
        )),
    }
}

/// Trimmed, de-duplicated id list in request order. `None` when the key is
/// absent; an empty or malformed list is rejected.
pub fn optional_id_list(req: &Request, key: &str) -> Result<Option<Vec<String>>, Value> {
    let raw = match req.params.get(key) {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Array(items)) => items,
        Some(_) => {
            return Err(err(
                &req.id,
                "bad_params",
                format!("{} must be an array of ids", key),
                None,
            ))
        }
    };
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    for v in raw {
        let Some(id) = v.as_str().map(str::trim).filter(|s| !s.is_empty()) else {
            return Err(err(
                &req.id,
                "bad_params",
                format!("{} must contain only non-empty strings", key),
                None,
            ));
        };
        if seen.insert(id.to_string()) {
            out.push(id.to_string());
        }
    }
    if out.is_empty() {
        return Err(err(
            &req.id,
            "bad_params",
            format!("{} must contain at least one id", key),
            None,
        ));
    }
    Ok(Some(out))
}

pub fn store_err(req: &Request, e: StoreError) -> Value {
    err(&req.id, e.code, e.message, e.details)
}
