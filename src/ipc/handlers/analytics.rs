use crate::calc::{self, CalcContext, GroupLevel, TimeBucket};
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::setup::{self, AnalysisSettings};
use crate::ipc::helpers::{
    db_conn, optional_bool, optional_id_list, optional_str, required_str, store_err,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{CompetencyFramework, Evaluation, ResultTypeConfig, Student};
use crate::store::{self, StoreError};
use rusqlite::Connection;
use serde_json::{json, Value};
use std::collections::HashSet;

/// Everything one analytics call aggregates, read in one go.
struct Snapshot {
    framework: CompetencyFramework,
    configs: Vec<ResultTypeConfig>,
    evaluation: Evaluation,
    students: Vec<Student>,
    settings: AnalysisSettings,
}

impl Snapshot {
    fn ctx(&self) -> CalcContext<'_> {
        CalcContext::new(&self.framework, &self.configs)
            .with_legacy_level_fallback(self.settings.legacy_level_fallback)
    }
}

/// The evaluation's class roster, or when it has no class, the students
/// that have results in it.
fn roster(conn: &Connection, evaluation: &Evaluation) -> Result<Vec<Student>, StoreError> {
    if let Some(class_id) = evaluation.class_id.as_deref() {
        return store::list_students(conn, Some(class_id));
    }
    let mut seen = HashSet::new();
    let ids: Vec<String> = evaluation
        .results
        .iter()
        .filter(|r| seen.insert(r.student_id.as_str()))
        .map(|r| r.student_id.clone())
        .collect();
    store::load_students_by_ids(conn, &ids)
}

fn settings_err(req: &Request, e: anyhow::Error) -> Value {
    err(&req.id, "db_query_failed", e.to_string(), None)
}

fn load_snapshot(conn: &Connection, req: &Request) -> Result<Snapshot, Value> {
    let evaluation_id = required_str(req, "evaluationId")?;
    let student_ids = optional_id_list(req, "studentIds")?;

    let mut evaluation = store::load_evaluation(conn, &evaluation_id).map_err(|e| store_err(req, e))?;
    let framework =
        store::load_framework(conn, &evaluation.framework_id).map_err(|e| store_err(req, e))?;
    let configs = store::load_result_type_configs(conn).map_err(|e| store_err(req, e))?;
    let settings = setup::analysis_settings(conn).map_err(|e| settings_err(req, e))?;

    let students = match student_ids {
        Some(ids) => {
            let keep: HashSet<&str> = ids.iter().map(String::as_str).collect();
            evaluation.results.retain(|r| keep.contains(r.student_id.as_str()));
            store::load_students_by_ids(conn, &ids)
        }
        None => roster(conn, &evaluation),
    }
    .map_err(|e| store_err(req, e))?;

    Ok(Snapshot {
        framework,
        configs,
        evaluation,
        students,
        settings,
    })
}

fn parse_level(req: &Request, default: GroupLevel) -> Result<GroupLevel, Value> {
    match optional_str(req, "level")? {
        None => Ok(default),
        Some(s) => GroupLevel::parse(&s.to_ascii_lowercase()).ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                "level must be one of: domain, field, competency",
                Some(json!({ "level": s })),
            )
        }),
    }
}

fn parse_bucket(req: &Request, default: TimeBucket) -> Result<TimeBucket, Value> {
    match optional_str(req, "bucket")? {
        None => Ok(default),
        Some(s) => TimeBucket::parse(&s.to_ascii_lowercase()).ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                "bucket must be one of: day, week, month",
                Some(json!({ "bucket": s })),
            )
        }),
    }
}

fn handle_student_averages(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let level = match parse_level(req, GroupLevel::Competency) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let snap = match load_snapshot(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let ctx = snap.ctx();
    let mine: Vec<_> = snap
        .evaluation
        .results
        .iter()
        .filter(|r| r.student_id == student_id)
        .collect();
    let averages = match level {
        GroupLevel::Competency => {
            calc::student_competency_averages(&student_id, &snap.evaluation.results, &ctx)
        }
        _ => calc::averages_by_level(mine.iter().copied(), level, &ctx),
    };
    ok(
        &req.id,
        json!({
            "studentId": student_id,
            "level": level,
            "averages": averages,
            "overall": calc::average(mine, &ctx),
        }),
    )
}

fn handle_student_completion(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let snap = match load_snapshot(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let completion = calc::completion_rate(&student_id, &snap.evaluation.results);
    ok(
        &req.id,
        json!({
            "studentId": student_id,
            "evaluated": completion.evaluated,
            "total": completion.total,
            "rate": completion.rate,
        }),
    )
}

fn handle_class_averages(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let level = match parse_level(req, GroupLevel::Competency) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let snap = match load_snapshot(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let ctx = snap.ctx();
    let averages = match level {
        GroupLevel::Competency => calc::class_competency_averages(&snap.evaluation.results, &ctx),
        _ => calc::averages_by_level(&snap.evaluation.results, level, &ctx),
    };
    // Tree-ordered labels for the entities that have an average.
    let categories: Vec<Value> = ctx
        .index
        .categories(level)
        .into_iter()
        .filter_map(|c| {
            averages
                .get(&c.id)
                .map(|avg| json!({ "id": c.id, "name": c.name, "average": avg }))
        })
        .collect();
    ok(
        &req.id,
        json!({
            "evaluationId": snap.evaluation.id,
            "level": level,
            "averages": averages,
            "categories": categories,
        }),
    )
}

fn handle_compare(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let snap = match load_snapshot(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let n = match req.params.get("topBottomCount") {
        None | Some(Value::Null) => snap.settings.top_bottom_count,
        Some(v) => match v.as_u64() {
            Some(n) if (1..=50).contains(&n) => n as usize,
            _ => {
                return err(
                    &req.id,
                    "bad_params",
                    "topBottomCount must be in 1..=50",
                    None,
                )
            }
        },
    };
    let ctx = snap.ctx();
    let entries = calc::compare_students(&snap.students, &snap.evaluation.results, &ctx);
    let report = calc::ComparisonReport::build(entries, n);
    ok(&req.id, json!(report))
}

fn radar_students(
    conn: &Connection,
    req: &Request,
    level_default: GroupLevel,
) -> Result<calc::RadarSeries, Value> {
    let level = parse_level(req, level_default)?;
    let snap = load_snapshot(conn, req)?;
    let ctx = snap.ctx();
    let snapshots = calc::student_snapshots(&snap.students, &snap.evaluation.results);
    Ok(calc::radar_series(&snapshots, level, &ctx))
}

/// One dataset per evaluation. The evaluations must share a framework.
fn radar_evaluations(
    conn: &Connection,
    req: &Request,
    level_default: GroupLevel,
) -> Result<calc::RadarSeries, Value> {
    let level = parse_level(req, level_default)?;
    let Some(ids) = optional_id_list(req, "evaluationIds")? else {
        return Err(err(&req.id, "bad_params", "missing evaluationIds", None));
    };
    let student_id = optional_str(req, "studentId")?.filter(|s| !s.is_empty());

    let mut evaluations = Vec::with_capacity(ids.len());
    for id in &ids {
        evaluations.push(store::load_evaluation(conn, id).map_err(|e| store_err(req, e))?);
    }
    let Some(framework_id) = evaluations.first().map(|e| e.framework_id.clone()) else {
        return Err(err(&req.id, "bad_params", "missing evaluationIds", None));
    };
    if let Some(other) = evaluations.iter().find(|e| e.framework_id != framework_id) {
        return Err(err(
            &req.id,
            "bad_params",
            "evaluations must share one framework",
            Some(json!({ "expected": framework_id, "found": other.framework_id })),
        ));
    }
    let framework = store::load_framework(conn, &framework_id).map_err(|e| store_err(req, e))?;
    let configs = store::load_result_type_configs(conn).map_err(|e| store_err(req, e))?;
    let settings = setup::analysis_settings(conn).map_err(|e| settings_err(req, e))?;

    let ctx = CalcContext::new(&framework, &configs)
        .with_legacy_level_fallback(settings.legacy_level_fallback);
    let snapshots = calc::evaluation_snapshots(&evaluations, student_id.as_deref());
    Ok(calc::radar_series(&snapshots, level, &ctx))
}

fn handle_charts_radar(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let charts = match setup::chart_settings(conn) {
        Ok(v) => v,
        Err(e) => return settings_err(req, e),
    };
    let normalize = match optional_bool(req, "normalize") {
        Ok(v) => v.unwrap_or(false),
        Err(e) => return e,
    };
    let mode = match optional_str(req, "mode") {
        Ok(v) => v.unwrap_or_else(|| "students".to_string()),
        Err(e) => return e,
    };
    let series = match mode.as_str() {
        "students" => radar_students(conn, req, charts.radar_level),
        "evaluations" => radar_evaluations(conn, req, charts.radar_level),
        _ => Err(err(
            &req.id,
            "bad_params",
            "mode must be one of: students, evaluations",
            Some(json!({ "mode": mode })),
        )),
    };
    match series {
        Ok(series) if normalize => ok(
            &req.id,
            json!(calc::normalize_to_scale(&series, charts.normalize_max_scale)),
        ),
        Ok(series) => ok(&req.id, json!(series)),
        Err(e) => e,
    }
}

fn handle_charts_distribution(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let snap = match load_snapshot(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    ok(
        &req.id,
        json!(calc::distribution_series(&snap.evaluation.results)),
    )
}

fn handle_charts_timeline(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let charts = match setup::chart_settings(conn) {
        Ok(v) => v,
        Err(e) => return settings_err(req, e),
    };
    let bucket = match parse_bucket(req, charts.default_bucket) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let snap = match load_snapshot(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let series = calc::time_series(&snap.evaluation.results, bucket);
    ok(
        &req.id,
        json!({
            "bucket": bucket,
            "labels": series.labels,
            "counts": series.counts,
        }),
    )
}

fn handle_charts_progression(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let charts = match setup::chart_settings(conn) {
        Ok(v) => v,
        Err(e) => return settings_err(req, e),
    };
    let bucket = match parse_bucket(req, charts.default_bucket) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let snap = match load_snapshot(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let ctx = snap.ctx();
    ok(
        &req.id,
        json!(calc::progression_series(&snap.evaluation.results, bucket, &ctx)),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "analytics.student.averages" => Some(handle_student_averages(state, req)),
        "analytics.student.completion" => Some(handle_student_completion(state, req)),
        "analytics.class.averages" => Some(handle_class_averages(state, req)),
        "analytics.compare" => Some(handle_compare(state, req)),
        "analytics.charts.radar" => Some(handle_charts_radar(state, req)),
        "analytics.charts.distribution" => Some(handle_charts_distribution(state, req)),
        "analytics.charts.timeline" => Some(handle_charts_timeline(state, req)),
        "analytics.charts.progression" => Some(handle_charts_progression(state, req)),
        _ => None,
    }
}
