use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, optional_str, required_str, store_err};
use crate::ipc::types::{AppState, Request};
use crate::model::EvaluationResult;
use crate::store::{self, StoreError};
use serde_json::{json, Value};

const RESULTS_BULK_UPSERT_MAX: usize = 5000;

fn handle_evaluations_list(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let framework_id = match optional_str(req, "frameworkId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = match optional_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match store::list_evaluations(conn, framework_id.as_deref(), class_id.as_deref()) {
        Ok(evaluations) => ok(&req.id, json!({ "evaluations": evaluations })),
        Err(e) => store_err(req, e),
    }
}

fn handle_evaluations_create(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let framework_id = match required_str(req, "frameworkId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let description = match optional_str(req, "description") {
        Ok(v) => v.unwrap_or_default(),
        Err(e) => return e,
    };
    let class_id = match optional_str(req, "classId") {
        Ok(v) => v.filter(|s| !s.is_empty()),
        Err(e) => return e,
    };
    match store::insert_evaluation(conn, &name, &description, &framework_id, class_id.as_deref()) {
        Ok(evaluation) => ok(&req.id, json!({ "evaluation": evaluation })),
        Err(e) => store_err(req, e),
    }
}

fn handle_evaluations_open(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let evaluation_id = match required_str(req, "evaluationId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match store::load_evaluation(conn, &evaluation_id) {
        Ok(evaluation) => ok(&req.id, json!({ "evaluation": evaluation })),
        Err(e) => store_err(req, e),
    }
}

fn handle_evaluations_update(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let evaluation_id = match required_str(req, "evaluationId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };
    let mut name: Option<String> = None;
    let mut description: Option<String> = None;
    for (k, v) in patch {
        let Some(s) = v.as_str().map(str::trim) else {
            return err(&req.id, "bad_params", format!("{} must be a string", k), None);
        };
        match k.as_str() {
            "name" => {
                if s.is_empty() {
                    return err(&req.id, "bad_params", "name must not be empty", None);
                }
                name = Some(s.to_string());
            }
            "description" => description = Some(s.to_string()),
            other => {
                return err(
                    &req.id,
                    "bad_params",
                    format!("unknown evaluation field: {}", other),
                    None,
                )
            }
        }
    }
    match store::update_evaluation(conn, &evaluation_id, name.as_deref(), description.as_deref()) {
        Ok(()) => ok(&req.id, json!({ "ok": true })),
        Err(e) => store_err(req, e),
    }
}

fn handle_evaluations_delete(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let evaluation_id = match required_str(req, "evaluationId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match store::delete_evaluation(conn, &evaluation_id) {
        Ok(removed) => ok(&req.id, json!({ "ok": true, "removedResults": removed })),
        Err(e) => store_err(req, e),
    }
}

/// Decodes one wire result and binds it to `evaluation_id`.
fn parse_result(raw: &Value, evaluation_id: &str) -> Result<EvaluationResult, StoreError> {
    let mut result: EvaluationResult = serde_json::from_value(raw.clone())
        .map_err(|e| StoreError::new("bad_params", e.to_string()))?;
    if result.student_id.trim().is_empty() {
        return Err(StoreError::new("bad_params", "studentId must not be empty"));
    }
    if result.competency_id.trim().is_empty() {
        return Err(StoreError::new("bad_params", "competencyId must not be empty"));
    }
    if result
        .specific_competency_id
        .as_deref()
        .is_some_and(|s| s.trim().is_empty())
    {
        result.specific_competency_id = None;
    }
    result.evaluation_id = evaluation_id.to_string();
    Ok(result)
}

fn handle_results_upsert(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let evaluation_id = match required_str(req, "evaluationId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(raw) = req.params.get("result") else {
        return err(&req.id, "bad_params", "missing result", None);
    };
    let result = match parse_result(raw, &evaluation_id) {
        Ok(v) => v,
        Err(e) => return store_err(req, e),
    };
    match store::upsert_result(conn, &result) {
        Ok(result_id) => ok(
            &req.id,
            json!({ "resultId": result_id, "resultKey": result.result_key() }),
        ),
        Err(e) => store_err(req, e),
    }
}

fn handle_results_bulk_upsert(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let evaluation_id = match required_str(req, "evaluationId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(entries) = req.params.get("results").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing results[]", None);
    };

    if entries.len() > RESULTS_BULK_UPSERT_MAX {
        let rejected = entries.len();
        return ok(
            &req.id,
            json!({
                "ok": true,
                "upserted": 0,
                "rejected": rejected,
                "limitExceeded": true,
                "errors": [{
                    "index": -1,
                    "code": "too_many_results",
                    "message": format!(
                        "bulk payload exceeds max results: {} > {}",
                        rejected, RESULTS_BULK_UPSERT_MAX
                    )
                }]
            }),
        );
    }

    let mut upserted: usize = 0;
    let mut errors: Vec<Value> = Vec::new();
    for (i, raw) in entries.iter().enumerate() {
        let outcome = parse_result(raw, &evaluation_id)
            .and_then(|result| store::upsert_result(conn, &result));
        match outcome {
            Ok(_) => upserted += 1,
            Err(e) => errors.push(json!({
                "index": i,
                "code": e.code,
                "message": e.message,
            })),
        }
    }

    let mut result = json!({ "ok": true, "upserted": upserted });
    if !errors.is_empty() {
        result["rejected"] = json!(errors.len());
        result["errors"] = Value::Array(errors);
    }
    ok(&req.id, result)
}

fn handle_results_delete(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let evaluation_id = match required_str(req, "evaluationId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    // The key is the specific competency, or the competency for legacy rows.
    let key = match optional_str(req, "specificCompetencyId") {
        Ok(Some(v)) if !v.is_empty() => v,
        Ok(_) => match required_str(req, "competencyId") {
            Ok(v) => v,
            Err(e) => return e,
        },
        Err(e) => return e,
    };
    match store::delete_result(conn, &evaluation_id, &student_id, &key) {
        Ok(deleted) => ok(&req.id, json!({ "deleted": deleted })),
        Err(e) => store_err(req, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "evaluations.list" => Some(handle_evaluations_list(state, req)),
        "evaluations.create" => Some(handle_evaluations_create(state, req)),
        "evaluations.open" => Some(handle_evaluations_open(state, req)),
        "evaluations.update" => Some(handle_evaluations_update(state, req)),
        "evaluations.delete" => Some(handle_evaluations_delete(state, req)),
        "results.upsert" => Some(handle_results_upsert(state, req)),
        "results.bulkUpsert" => Some(handle_results_bulk_upsert(state, req)),
        "results.delete" => Some(handle_results_delete(state, req)),
        _ => None,
    }
}
