use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, required_str, store_err};
use crate::ipc::types::{AppState, Request};
use crate::model::{self, CompetencyFramework, ResultTypeConfig};
use crate::store;
use serde_json::json;
use std::collections::HashMap;

fn invalid_framework(req: &Request, e: model::FrameworkError) -> serde_json::Value {
    err(&req.id, "invalid_framework", e.to_string(), None)
}

fn parse_configs(req: &Request) -> Result<Vec<ResultTypeConfig>, serde_json::Value> {
    let Some(raw) = req.params.get("resultTypes") else {
        return Ok(Vec::new());
    };
    if raw.is_null() {
        return Ok(Vec::new());
    }
    serde_json::from_value(raw.clone()).map_err(|e| {
        err(
            &req.id,
            "bad_params",
            format!("resultTypes: {}", e),
            None,
        )
    })
}

fn count_specifics(fw: &CompetencyFramework) -> usize {
    fw.domains
        .iter()
        .flat_map(|d| &d.fields)
        .flat_map(|f| &f.competencies)
        .map(|c| c.specific_competencies.len())
        .sum()
}

fn handle_frameworks_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    match store::list_frameworks(conn) {
        Ok(frameworks) => ok(&req.id, json!({ "frameworks": frameworks })),
        Err(e) => store_err(req, e),
    }
}

fn handle_frameworks_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let framework_id = match required_str(req, "frameworkId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let framework = match store::load_framework(conn, &framework_id) {
        Ok(v) => v,
        Err(e) => return store_err(req, e),
    };
    let configs = match store::load_result_type_configs(conn) {
        Ok(v) => v,
        Err(e) => return store_err(req, e),
    };
    // Only the configs this framework points at.
    let used: Vec<&ResultTypeConfig> = configs
        .iter()
        .filter(|c| {
            framework
                .domains
                .iter()
                .flat_map(|d| &d.fields)
                .flat_map(|f| &f.competencies)
                .flat_map(|comp| &comp.specific_competencies)
                .any(|s| s.result_type_config_id.as_deref() == Some(c.id.as_str()))
        })
        .collect();
    ok(
        &req.id,
        json!({
            "framework": framework,
            "resultTypes": used,
        }),
    )
}

/// Imports a framework together with any result type configs it needs. The
/// framework is validated against the stored configs plus the incoming ones
/// before anything is written.
fn handle_frameworks_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let Some(raw) = req.params.get("framework") else {
        return err(&req.id, "bad_params", "missing framework", None);
    };
    let framework: CompetencyFramework = match serde_json::from_value(raw.clone()) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "bad_params", format!("framework: {}", e), None),
    };
    let incoming = match parse_configs(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    for cfg in &incoming {
        if let Err(e) = model::validate_result_type_config(cfg) {
            return invalid_framework(req, e);
        }
    }

    let stored = match store::load_result_type_configs(conn) {
        Ok(v) => v,
        Err(e) => return store_err(req, e),
    };
    let mut known: HashMap<String, ResultTypeConfig> =
        stored.into_iter().map(|c| (c.id.clone(), c)).collect();
    for cfg in &incoming {
        known.insert(cfg.id.clone(), cfg.clone());
    }
    let known: Vec<ResultTypeConfig> = known.into_values().collect();
    if let Err(e) = model::validate_framework(&framework, &known) {
        return invalid_framework(req, e);
    }

    if let Err(e) = store::import_framework(conn, &framework, &incoming) {
        return store_err(req, e);
    }
    ok(
        &req.id,
        json!({
            "frameworkId": framework.id,
            "domainCount": framework.domains.len(),
            "specificCompetencyCount": count_specifics(&framework),
            "resultTypeCount": incoming.len(),
        }),
    )
}

fn handle_frameworks_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let framework_id = match required_str(req, "frameworkId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match store::delete_framework(conn, &framework_id) {
        Ok(()) => ok(&req.id, json!({ "ok": true })),
        Err(e) => store_err(req, e),
    }
}

fn handle_result_types_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    match store::load_result_type_configs(conn) {
        Ok(configs) => ok(&req.id, json!({ "resultTypes": configs })),
        Err(e) => store_err(req, e),
    }
}

fn handle_result_types_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let Some(raw) = req.params.get("resultType") else {
        return err(&req.id, "bad_params", "missing resultType", None);
    };
    let cfg: ResultTypeConfig = match serde_json::from_value(raw.clone()) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "bad_params", format!("resultType: {}", e), None),
    };
    if let Err(e) = model::validate_result_type_config(&cfg) {
        return invalid_framework(req, e);
    }
    match store::save_result_type_config(conn, &cfg) {
        Ok(()) => ok(
            &req.id,
            json!({ "id": cfg.id, "valueCount": cfg.values.len() }),
        ),
        Err(e) => store_err(req, e),
    }
}

fn handle_result_types_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let id = match required_str(req, "resultTypeId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match store::delete_result_type_config(conn, &id) {
        Ok(()) => ok(&req.id, json!({ "ok": true })),
        Err(e) => store_err(req, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "frameworks.list" => Some(handle_frameworks_list(state, req)),
        "frameworks.open" => Some(handle_frameworks_open(state, req)),
        "frameworks.import" => Some(handle_frameworks_import(state, req)),
        "frameworks.delete" => Some(handle_frameworks_delete(state, req)),
        "resultTypes.list" => Some(handle_result_types_list(state, req)),
        "resultTypes.upsert" => Some(handle_result_types_upsert(state, req)),
        "resultTypes.delete" => Some(handle_result_types_delete(state, req)),
        _ => None,
    }
}
