use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, optional_str, required_str, store_err};
use crate::ipc::types::{AppState, Request};
use crate::store::{self, StudentPatch};
use serde_json::{json, Value};

const NAME_MAX_LEN: usize = 120;

fn parse_name(req: &Request, key: &str, v: &Value, allow_empty: bool) -> Result<String, Value> {
    let Some(s) = v.as_str() else {
        return Err(err(&req.id, "bad_params", format!("{} must be a string", key), None));
    };
    let s = s.trim();
    if s.is_empty() && !allow_empty {
        return Err(err(&req.id, "bad_params", format!("{} must not be empty", key), None));
    }
    if s.chars().count() > NAME_MAX_LEN {
        return Err(err(
            &req.id,
            "bad_params",
            format!("{} length must be <= {}", key, NAME_MAX_LEN),
            None,
        ));
    }
    Ok(s.to_string())
}

fn handle_students_list(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let class_id = match optional_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match store::list_students(conn, class_id.as_deref()) {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => store_err(req, e),
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let first = match req.params.get("firstName") {
        Some(v) => match parse_name(req, "firstName", v, false) {
            Ok(s) => s,
            Err(e) => return e,
        },
        None => return err(&req.id, "bad_params", "missing firstName", None),
    };
    let last = match req.params.get("lastName") {
        Some(v) => match parse_name(req, "lastName", v, true) {
            Ok(s) => s,
            Err(e) => return e,
        },
        None => String::new(),
    };
    let class_id = match optional_str(req, "classId") {
        Ok(v) => v.filter(|s| !s.is_empty()),
        Err(e) => return e,
    };
    match store::insert_student(conn, &first, &last, class_id.as_deref()) {
        Ok(student) => ok(&req.id, json!({ "student": student })),
        Err(e) => store_err(req, e),
    }
}

fn handle_students_update(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut patch = StudentPatch::default();
    for (k, v) in patch_obj {
        match k.as_str() {
            "firstName" => match parse_name(req, k, v, false) {
                Ok(s) => patch.first_name = Some(s),
                Err(e) => return e,
            },
            "lastName" => match parse_name(req, k, v, true) {
                Ok(s) => patch.last_name = Some(s),
                Err(e) => return e,
            },
            "classId" => match v {
                Value::Null => patch.class_id = Some(None),
                Value::String(s) if s.trim().is_empty() => patch.class_id = Some(None),
                Value::String(s) => patch.class_id = Some(Some(s.trim().to_string())),
                _ => return err(&req.id, "bad_params", "classId must be a string or null", None),
            },
            other => {
                return err(
                    &req.id,
                    "bad_params",
                    format!("unknown student field: {}", other),
                    None,
                )
            }
        }
    }

    match store::update_student(conn, &student_id, &patch) {
        Ok(student) => ok(&req.id, json!({ "student": student })),
        Err(e) => store_err(req, e),
    }
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match store::delete_student(conn, &student_id) {
        Ok(removed) => ok(&req.id, json!({ "ok": true, "removedResults": removed })),
        Err(e) => store_err(req, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        _ => None,
    }
}
