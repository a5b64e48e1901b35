//! Typed access to the workspace tables, one group of functions per entity.

use crate::model::{
    CompetencyFramework, Competency, Domain, Evaluation, EvaluationResult, Field, Level, Outcome,
    ResultTypeConfig, ResultTypeValue, SpecificCompetency, Student,
};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct StoreError {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl StoreError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    fn not_found(what: &str, id: &str) -> Self {
        Self::new("not_found", format!("{} not found", what)).with_details(json!({ "id": id }))
    }

    fn query(e: rusqlite::Error) -> Self {
        Self::new("db_query_failed", e.to_string())
    }

    fn insert(e: rusqlite::Error) -> Self {
        Self::new("db_insert_failed", e.to_string())
    }

    fn update(e: rusqlite::Error) -> Self {
        Self::new("db_update_failed", e.to_string())
    }

    fn delete(e: rusqlite::Error) -> Self {
        Self::new("db_delete_failed", e.to_string())
    }

    fn tx(e: rusqlite::Error) -> Self {
        Self::new("db_tx_failed", e.to_string())
    }
}

fn exists(conn: &Connection, sql: &str, id: &str) -> Result<bool, StoreError> {
    conn.query_row(sql, [id], |r| r.get::<_, i64>(0))
        .optional()
        .map(|v| v.is_some())
        .map_err(StoreError::query)
}

fn placeholders(n: usize) -> String {
    std::iter::repeat("?").take(n).collect::<Vec<_>>().join(",")
}

// --- frameworks -------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameworkSummary {
    pub id: String,
    pub name: String,
    pub version: String,
    pub description: String,
    pub domain_count: i64,
    pub evaluation_count: i64,
}

pub fn list_frameworks(conn: &Connection) -> Result<Vec<FrameworkSummary>, StoreError> {
    let mut stmt = conn
        .prepare(
            "SELECT
               f.id,
               f.name,
               f.version,
               f.description,
               (SELECT COUNT(*) FROM domains d WHERE d.framework_id = f.id),
               (SELECT COUNT(*) FROM evaluations e WHERE e.framework_id = f.id)
             FROM frameworks f
             ORDER BY f.name, f.id",
        )
        .map_err(StoreError::query)?;
    stmt.query_map([], |r| {
        Ok(FrameworkSummary {
            id: r.get(0)?,
            name: r.get(1)?,
            version: r.get(2)?,
            description: r.get(3)?,
            domain_count: r.get(4)?,
            evaluation_count: r.get(5)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(StoreError::query)
}

pub fn load_framework(conn: &Connection, id: &str) -> Result<CompetencyFramework, StoreError> {
    let head: Option<(String, String, String)> = conn
        .query_row(
            "SELECT name, version, description FROM frameworks WHERE id = ?",
            [id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
        .map_err(StoreError::query)?;
    let Some((name, version, description)) = head else {
        return Err(StoreError::not_found("framework", id));
    };

    // (domain, field, competency) -> specifics, in sort order.
    let mut specifics: HashMap<(String, String, String), Vec<SpecificCompetency>> = HashMap::new();
    {
        let mut stmt = conn
            .prepare(
                "SELECT domain_id, field_id, competency_id, id, name, description, result_type_config_id
                 FROM specific_competencies
                 WHERE framework_id = ?
                 ORDER BY sort_order",
            )
            .map_err(StoreError::query)?;
        let rows = stmt
            .query_map([id], |r| {
                Ok((
                    (r.get(0)?, r.get(1)?, r.get(2)?),
                    SpecificCompetency {
                        id: r.get(3)?,
                        name: r.get(4)?,
                        description: r.get(5)?,
                        result_type_config_id: r.get(6)?,
                    },
                ))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(StoreError::query)?;
        for (key, spec) in rows {
            specifics.entry(key).or_default().push(spec);
        }
    }

    let mut competencies: HashMap<(String, String), Vec<Competency>> = HashMap::new();
    {
        let mut stmt = conn
            .prepare(
                "SELECT domain_id, field_id, id, name, description
                 FROM competencies
                 WHERE framework_id = ?
                 ORDER BY sort_order",
            )
            .map_err(StoreError::query)?;
        let rows: Vec<(String, String, String, String, String)> = stmt
            .query_map([id], |r| {
                Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(StoreError::query)?;
        for (domain_id, field_id, comp_id, comp_name, comp_desc) in rows {
            let specific_competencies = specifics
                .remove(&(domain_id.clone(), field_id.clone(), comp_id.clone()))
                .unwrap_or_default();
            competencies
                .entry((domain_id, field_id))
                .or_default()
                .push(Competency {
                    id: comp_id,
                    name: comp_name,
                    description: comp_desc,
                    specific_competencies,
                });
        }
    }

    let mut fields: HashMap<String, Vec<Field>> = HashMap::new();
    {
        let mut stmt = conn
            .prepare(
                "SELECT domain_id, id, name, description
                 FROM fields
                 WHERE framework_id = ?
                 ORDER BY sort_order",
            )
            .map_err(StoreError::query)?;
        let rows: Vec<(String, String, String, String)> = stmt
            .query_map([id], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(StoreError::query)?;
        for (domain_id, field_id, field_name, field_desc) in rows {
            let comps = competencies
                .remove(&(domain_id.clone(), field_id.clone()))
                .unwrap_or_default();
            fields.entry(domain_id).or_default().push(Field {
                id: field_id,
                name: field_name,
                description: field_desc,
                competencies: comps,
            });
        }
    }

    let mut stmt = conn
        .prepare(
            "SELECT id, name, description
             FROM domains
             WHERE framework_id = ?
             ORDER BY sort_order",
        )
        .map_err(StoreError::query)?;
    let domains: Vec<Domain> = stmt
        .query_map([id], |r| {
            Ok(Domain {
                id: r.get(0)?,
                name: r.get(1)?,
                description: r.get(2)?,
                fields: Vec::new(),
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(StoreError::query)?
        .into_iter()
        .map(|mut d| {
            d.fields = fields.remove(&d.id).unwrap_or_default();
            d
        })
        .collect();

    Ok(CompetencyFramework {
        id: id.to_string(),
        name,
        version,
        description,
        domains,
    })
}

fn delete_framework_tree(conn: &Connection, id: &str) -> rusqlite::Result<()> {
    for table in ["specific_competencies", "competencies", "fields", "domains"] {
        conn.execute(
            &format!("DELETE FROM {} WHERE framework_id = ?", table),
            [id],
        )?;
    }
    Ok(())
}

/// Inserts or replaces a whole framework tree together with the result type
/// configs it brings. Both are written in one transaction.
pub fn import_framework(
    conn: &Connection,
    fw: &CompetencyFramework,
    configs: &[ResultTypeConfig],
) -> Result<(), StoreError> {
    let tx = conn.unchecked_transaction().map_err(StoreError::tx)?;
    for cfg in configs {
        write_result_type_config(&tx, cfg)?;
    }
    write_framework(&tx, fw)?;
    tx.commit().map_err(StoreError::tx)?;
    debug!(framework_id = fw.id.as_str(), configs = configs.len(), "framework imported");
    Ok(())
}

fn write_framework(tx: &Connection, fw: &CompetencyFramework) -> Result<(), StoreError> {
    tx.execute(
        "INSERT INTO frameworks(id, name, version, description) VALUES(?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           name = excluded.name,
           version = excluded.version,
           description = excluded.description",
        (&fw.id, &fw.name, &fw.version, &fw.description),
    )
    .map_err(StoreError::insert)?;
    delete_framework_tree(tx, &fw.id).map_err(StoreError::delete)?;

    for (di, domain) in fw.domains.iter().enumerate() {
        tx.execute(
            "INSERT INTO domains(framework_id, id, name, description, sort_order)
             VALUES(?, ?, ?, ?, ?)",
            (&fw.id, &domain.id, &domain.name, &domain.description, di as i64),
        )
        .map_err(StoreError::insert)?;
        for (fi, field) in domain.fields.iter().enumerate() {
            tx.execute(
                "INSERT INTO fields(framework_id, domain_id, id, name, description, sort_order)
                 VALUES(?, ?, ?, ?, ?, ?)",
                (
                    &fw.id,
                    &domain.id,
                    &field.id,
                    &field.name,
                    &field.description,
                    fi as i64,
                ),
            )
            .map_err(StoreError::insert)?;
            for (ci, comp) in field.competencies.iter().enumerate() {
                tx.execute(
                    "INSERT INTO competencies(
                       framework_id, domain_id, field_id, id, name, description, sort_order)
                     VALUES(?, ?, ?, ?, ?, ?, ?)",
                    (
                        &fw.id,
                        &domain.id,
                        &field.id,
                        &comp.id,
                        &comp.name,
                        &comp.description,
                        ci as i64,
                    ),
                )
                .map_err(StoreError::insert)?;
                for (si, spec) in comp.specific_competencies.iter().enumerate() {
                    tx.execute(
                        "INSERT INTO specific_competencies(
                           framework_id, domain_id, field_id, competency_id, id, name,
                           description, result_type_config_id, sort_order)
                         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
                        (
                            &fw.id,
                            &domain.id,
                            &field.id,
                            &comp.id,
                            &spec.id,
                            &spec.name,
                            &spec.description,
                            &spec.result_type_config_id,
                            si as i64,
                        ),
                    )
                    .map_err(StoreError::insert)?;
                }
            }
        }
    }
    Ok(())
}

/// Frameworks still referenced by an evaluation are kept.
pub fn delete_framework(conn: &Connection, id: &str) -> Result<(), StoreError> {
    if !exists(conn, "SELECT 1 FROM frameworks WHERE id = ?", id)? {
        return Err(StoreError::not_found("framework", id));
    }
    let in_use: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM evaluations WHERE framework_id = ?",
            [id],
            |r| r.get(0),
        )
        .map_err(StoreError::query)?;
    if in_use > 0 {
        return Err(
            StoreError::new("conflict", "framework is used by evaluations")
                .with_details(json!({ "evaluationCount": in_use })),
        );
    }
    let tx = conn.unchecked_transaction().map_err(StoreError::tx)?;
    delete_framework_tree(&tx, id).map_err(StoreError::delete)?;
    tx.execute("DELETE FROM frameworks WHERE id = ?", [id])
        .map_err(StoreError::delete)?;
    tx.commit().map_err(StoreError::tx)
}

// --- result type configs ------------------------------------------------------

pub fn load_result_type_configs(conn: &Connection) -> Result<Vec<ResultTypeConfig>, StoreError> {
    let mut stmt = conn
        .prepare("SELECT id, name FROM result_type_configs ORDER BY name, id")
        .map_err(StoreError::query)?;
    let heads: Vec<(String, String)> = stmt
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(StoreError::query)?;

    let mut values_stmt = conn
        .prepare(
            "SELECT value, label, pivot_value
             FROM result_type_values
             WHERE config_id = ?
             ORDER BY sort_order",
        )
        .map_err(StoreError::query)?;
    let mut out = Vec::with_capacity(heads.len());
    for (id, name) in heads {
        let values = values_stmt
            .query_map([&id], |r| {
                Ok(ResultTypeValue {
                    value: r.get(0)?,
                    label: r.get(1)?,
                    pivot_value: r.get(2)?,
                })
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(StoreError::query)?;
        out.push(ResultTypeConfig { id, name, values });
    }
    Ok(out)
}

pub fn save_result_type_config(conn: &Connection, cfg: &ResultTypeConfig) -> Result<(), StoreError> {
    let tx = conn.unchecked_transaction().map_err(StoreError::tx)?;
    write_result_type_config(&tx, cfg)?;
    tx.commit().map_err(StoreError::tx)
}

fn write_result_type_config(tx: &Connection, cfg: &ResultTypeConfig) -> Result<(), StoreError> {
    tx.execute(
        "INSERT INTO result_type_configs(id, name) VALUES(?, ?)
         ON CONFLICT(id) DO UPDATE SET name = excluded.name",
        (&cfg.id, &cfg.name),
    )
    .map_err(StoreError::insert)?;
    tx.execute("DELETE FROM result_type_values WHERE config_id = ?", [&cfg.id])
        .map_err(StoreError::delete)?;
    for (i, v) in cfg.values.iter().enumerate() {
        tx.execute(
            "INSERT INTO result_type_values(config_id, value, label, pivot_value, sort_order)
             VALUES(?, ?, ?, ?, ?)",
            (&cfg.id, &v.value, &v.label, v.pivot_value, i as i64),
        )
        .map_err(StoreError::insert)?;
    }
    Ok(())
}

pub fn delete_result_type_config(conn: &Connection, id: &str) -> Result<(), StoreError> {
    if !exists(conn, "SELECT 1 FROM result_type_configs WHERE id = ?", id)? {
        return Err(StoreError::not_found("result type config", id));
    }
    let in_use: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM specific_competencies WHERE result_type_config_id = ?",
            [id],
            |r| r.get(0),
        )
        .map_err(StoreError::query)?;
    if in_use > 0 {
        return Err(StoreError::new(
            "conflict",
            "result type config is used by specific competencies",
        )
        .with_details(json!({ "specificCompetencyCount": in_use })));
    }
    let tx = conn.unchecked_transaction().map_err(StoreError::tx)?;
    tx.execute("DELETE FROM result_type_values WHERE config_id = ?", [id])
        .map_err(StoreError::delete)?;
    tx.execute("DELETE FROM result_type_configs WHERE id = ?", [id])
        .map_err(StoreError::delete)?;
    tx.commit().map_err(StoreError::tx)
}

// --- students ---------------------------------------------------------------

fn student_from_row(r: &Row<'_>) -> rusqlite::Result<Student> {
    let id: String = r.get(0)?;
    let class_id: Option<String> = r.get(1)?;
    let first: String = r.get(2)?;
    let last: String = r.get(3)?;
    Ok(Student::new(id, first, last, class_id))
}

pub fn list_students(conn: &Connection, class_id: Option<&str>) -> Result<Vec<Student>, StoreError> {
    let mut stmt = conn
        .prepare(
            "SELECT id, class_id, first_name, last_name
             FROM students
             WHERE ?1 IS NULL OR class_id = ?1
             ORDER BY sort_order",
        )
        .map_err(StoreError::query)?;
    stmt.query_map([class_id], student_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(StoreError::query)
}

/// Students with the given ids, in roster order. Unknown ids are skipped.
pub fn load_students_by_ids(conn: &Connection, ids: &[String]) -> Result<Vec<Student>, StoreError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT id, class_id, first_name, last_name
         FROM students
         WHERE id IN ({})
         ORDER BY sort_order",
        placeholders(ids.len())
    );
    let mut stmt = conn.prepare(&sql).map_err(StoreError::query)?;
    let binds: Vec<Value> = ids.iter().map(|id| Value::Text(id.clone())).collect();
    stmt.query_map(params_from_iter(binds), student_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(StoreError::query)
}

pub fn load_student(conn: &Connection, id: &str) -> Result<Student, StoreError> {
    conn.query_row(
        "SELECT id, class_id, first_name, last_name FROM students WHERE id = ?",
        [id],
        student_from_row,
    )
    .optional()
    .map_err(StoreError::query)?
    .ok_or_else(|| StoreError::not_found("student", id))
}

pub fn insert_student(
    conn: &Connection,
    first_name: &str,
    last_name: &str,
    class_id: Option<&str>,
) -> Result<Student, StoreError> {
    let next_sort: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM students",
            [],
            |r| r.get(0),
        )
        .map_err(StoreError::query)?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, class_id, first_name, last_name, sort_order)
         VALUES(?, ?, ?, ?, ?)",
        (&id, class_id, first_name, last_name, next_sort),
    )
    .map_err(StoreError::insert)?;
    Ok(Student::new(
        id,
        first_name,
        last_name,
        class_id.map(str::to_string),
    ))
}

#[derive(Debug, Clone, Default)]
pub struct StudentPatch {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    /// `Some(None)` clears the class.
    pub class_id: Option<Option<String>>,
}

pub fn update_student(conn: &Connection, id: &str, patch: &StudentPatch) -> Result<Student, StoreError> {
    let current = load_student(conn, id)?;
    let first = patch.first_name.clone().unwrap_or(current.first_name);
    let last = patch.last_name.clone().unwrap_or(current.last_name);
    let class_id = patch.class_id.clone().unwrap_or(current.class_id);
    conn.execute(
        "UPDATE students SET first_name = ?, last_name = ?, class_id = ? WHERE id = ?",
        (&first, &last, &class_id, id),
    )
    .map_err(StoreError::update)?;
    Ok(Student::new(id, first, last, class_id))
}

/// Removes the student and every result recorded for them.
pub fn delete_student(conn: &Connection, id: &str) -> Result<usize, StoreError> {
    if !exists(conn, "SELECT 1 FROM students WHERE id = ?", id)? {
        return Err(StoreError::not_found("student", id));
    }
    let tx = conn.unchecked_transaction().map_err(StoreError::tx)?;
    let removed = tx
        .execute("DELETE FROM evaluation_results WHERE student_id = ?", [id])
        .map_err(StoreError::delete)?;
    tx.execute("DELETE FROM students WHERE id = ?", [id])
        .map_err(StoreError::delete)?;
    tx.commit().map_err(StoreError::tx)?;
    Ok(removed)
}

// --- evaluations --------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub framework_id: String,
    pub class_id: Option<String>,
    pub created_at: String,
    pub result_count: i64,
}

pub fn list_evaluations(
    conn: &Connection,
    framework_id: Option<&str>,
    class_id: Option<&str>,
) -> Result<Vec<EvaluationSummary>, StoreError> {
    let mut stmt = conn
        .prepare(
            "SELECT
               e.id, e.name, e.description, e.framework_id, e.class_id, e.created_at,
               (SELECT COUNT(*) FROM evaluation_results r WHERE r.evaluation_id = e.id)
             FROM evaluations e
             WHERE (?1 IS NULL OR e.framework_id = ?1)
               AND (?2 IS NULL OR e.class_id = ?2)
             ORDER BY e.created_at, e.id",
        )
        .map_err(StoreError::query)?;
    stmt.query_map([framework_id, class_id], |r| {
        Ok(EvaluationSummary {
            id: r.get(0)?,
            name: r.get(1)?,
            description: r.get(2)?,
            framework_id: r.get(3)?,
            class_id: r.get(4)?,
            created_at: r.get(5)?,
            result_count: r.get(6)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(StoreError::query)
}

pub fn load_evaluation(conn: &Connection, id: &str) -> Result<Evaluation, StoreError> {
    let head: Option<(String, String, String, Option<String>, String)> = conn
        .query_row(
            "SELECT name, description, framework_id, class_id, created_at
             FROM evaluations
             WHERE id = ?",
            [id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
        )
        .optional()
        .map_err(StoreError::query)?;
    let Some((name, description, framework_id, class_id, created_at)) = head else {
        return Err(StoreError::not_found("evaluation", id));
    };
    Ok(Evaluation {
        id: id.to_string(),
        name,
        description,
        framework_id,
        class_id,
        created_at,
        results: load_results(conn, id)?,
    })
}

pub fn insert_evaluation(
    conn: &Connection,
    name: &str,
    description: &str,
    framework_id: &str,
    class_id: Option<&str>,
) -> Result<Evaluation, StoreError> {
    if !exists(conn, "SELECT 1 FROM frameworks WHERE id = ?", framework_id)? {
        return Err(StoreError::not_found("framework", framework_id));
    }
    let id = Uuid::new_v4().to_string();
    let created_at = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO evaluations(id, name, description, framework_id, class_id, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&id, name, description, framework_id, class_id, &created_at),
    )
    .map_err(StoreError::insert)?;
    Ok(Evaluation {
        id,
        name: name.to_string(),
        description: description.to_string(),
        framework_id: framework_id.to_string(),
        class_id: class_id.map(str::to_string),
        created_at,
        results: Vec::new(),
    })
}

pub fn update_evaluation(
    conn: &Connection,
    id: &str,
    name: Option<&str>,
    description: Option<&str>,
) -> Result<(), StoreError> {
    let changed = conn
        .execute(
            "UPDATE evaluations
             SET name = COALESCE(?, name), description = COALESCE(?, description)
             WHERE id = ?",
            (name, description, id),
        )
        .map_err(StoreError::update)?;
    if changed == 0 {
        return Err(StoreError::not_found("evaluation", id));
    }
    Ok(())
}

/// Deletes the evaluation together with the results it owns.
pub fn delete_evaluation(conn: &Connection, id: &str) -> Result<usize, StoreError> {
    if !exists(conn, "SELECT 1 FROM evaluations WHERE id = ?", id)? {
        return Err(StoreError::not_found("evaluation", id));
    }
    let tx = conn.unchecked_transaction().map_err(StoreError::tx)?;
    let removed = tx
        .execute("DELETE FROM evaluation_results WHERE evaluation_id = ?", [id])
        .map_err(StoreError::delete)?;
    tx.execute("DELETE FROM evaluations WHERE id = ?", [id])
        .map_err(StoreError::delete)?;
    tx.commit().map_err(StoreError::tx)?;
    Ok(removed)
}

// --- results ----------------------------------------------------------------

fn result_from_row(r: &Row<'_>) -> rusqlite::Result<EvaluationResult> {
    let id: String = r.get(0)?;
    let level_raw: Option<String> = r.get(5)?;
    let level = level_raw.as_deref().and_then(|s| {
        let parsed = Level::parse(s);
        if parsed.is_none() {
            debug!(result_id = id.as_str(), level = s, "unknown stored level ignored");
        }
        parsed
    });
    let value: Option<String> = r.get(6)?;
    Ok(EvaluationResult {
        id,
        evaluation_id: r.get(1)?,
        student_id: r.get(2)?,
        competency_id: r.get(3)?,
        specific_competency_id: r.get(4)?,
        outcome: Outcome::from_parts(value, level),
        comment: r.get(7)?,
        evaluated_at: r.get(8)?,
    })
}

pub fn load_results(conn: &Connection, evaluation_id: &str) -> Result<Vec<EvaluationResult>, StoreError> {
    let mut stmt = conn
        .prepare(
            "SELECT r.id, r.evaluation_id, r.student_id, r.competency_id,
                    r.specific_competency_id, r.level, r.value, r.comment, r.evaluated_at
             FROM evaluation_results r
             LEFT JOIN students s ON s.id = r.student_id
             WHERE r.evaluation_id = ?
             ORDER BY s.sort_order, r.rowid",
        )
        .map_err(StoreError::query)?;
    stmt.query_map([evaluation_id], result_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(StoreError::query)
}

/// Writes a result under its `(evaluation, student, result key)`; a later
/// write for the same key replaces the earlier one. Returns the stored id.
pub fn upsert_result(conn: &Connection, result: &EvaluationResult) -> Result<String, StoreError> {
    if !exists(conn, "SELECT 1 FROM evaluations WHERE id = ?", &result.evaluation_id)? {
        return Err(StoreError::not_found("evaluation", &result.evaluation_id));
    }
    if !exists(conn, "SELECT 1 FROM students WHERE id = ?", &result.student_id)? {
        return Err(StoreError::not_found("student", &result.student_id));
    }
    let new_id = if result.id.trim().is_empty() {
        Uuid::new_v4().to_string()
    } else {
        result.id.clone()
    };
    let evaluated_at = if result.evaluated_at.trim().is_empty() {
        chrono::Utc::now().to_rfc3339()
    } else {
        result.evaluated_at.clone()
    };
    conn.execute(
        "INSERT INTO evaluation_results(
           id, evaluation_id, student_id, competency_id, specific_competency_id,
           result_key, level, value, comment, evaluated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(evaluation_id, student_id, result_key) DO UPDATE SET
           competency_id = excluded.competency_id,
           specific_competency_id = excluded.specific_competency_id,
           level = excluded.level,
           value = excluded.value,
           comment = excluded.comment,
           evaluated_at = excluded.evaluated_at",
        (
            &new_id,
            &result.evaluation_id,
            &result.student_id,
            &result.competency_id,
            &result.specific_competency_id,
            result.result_key(),
            result.outcome.level().map(Level::as_str),
            result.outcome.value(),
            &result.comment,
            &evaluated_at,
        ),
    )
    .map_err(StoreError::insert)?;

    conn.query_row(
        "SELECT id FROM evaluation_results
         WHERE evaluation_id = ? AND student_id = ? AND result_key = ?",
        (&result.evaluation_id, &result.student_id, result.result_key()),
        |r| r.get(0),
    )
    .map_err(StoreError::query)
}

pub fn delete_result(
    conn: &Connection,
    evaluation_id: &str,
    student_id: &str,
    result_key: &str,
) -> Result<bool, StoreError> {
    let removed = conn
        .execute(
            "DELETE FROM evaluation_results
             WHERE evaluation_id = ? AND student_id = ? AND result_key = ?",
            (evaluation_id, student_id, result_key),
        )
        .map_err(StoreError::delete)?;
    Ok(removed > 0)
}
