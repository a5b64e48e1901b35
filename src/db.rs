use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use tracing::info;

pub const DB_FILE_NAME: &str = "competency.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(&db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS frameworks(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            version TEXT NOT NULL DEFAULT '',
            description TEXT NOT NULL DEFAULT ''
        )",
        [],
    )?;
    ensure_frameworks_version(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS domains(
            framework_id TEXT NOT NULL,
            id TEXT NOT NULL,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            sort_order INTEGER NOT NULL,
            PRIMARY KEY(framework_id, id),
            FOREIGN KEY(framework_id) REFERENCES frameworks(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS fields(
            framework_id TEXT NOT NULL,
            domain_id TEXT NOT NULL,
            id TEXT NOT NULL,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            sort_order INTEGER NOT NULL,
            PRIMARY KEY(framework_id, domain_id, id),
            FOREIGN KEY(framework_id) REFERENCES frameworks(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS competencies(
            framework_id TEXT NOT NULL,
            domain_id TEXT NOT NULL,
            field_id TEXT NOT NULL,
            id TEXT NOT NULL,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            sort_order INTEGER NOT NULL,
            PRIMARY KEY(framework_id, domain_id, field_id, id),
            FOREIGN KEY(framework_id) REFERENCES frameworks(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS specific_competencies(
            framework_id TEXT NOT NULL,
            domain_id TEXT NOT NULL,
            field_id TEXT NOT NULL,
            competency_id TEXT NOT NULL,
            id TEXT NOT NULL,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            result_type_config_id TEXT,
            sort_order INTEGER NOT NULL,
            PRIMARY KEY(framework_id, domain_id, field_id, competency_id, id),
            FOREIGN KEY(framework_id) REFERENCES frameworks(id)
        )",
        [],
    )?;
    // Child ids are unique per parent only, so each row carries its full ancestry.
    for (name, table) in [
        ("idx_domains_framework", "domains"),
        ("idx_fields_framework", "fields"),
        ("idx_competencies_framework", "competencies"),
        ("idx_specific_competencies_framework", "specific_competencies"),
    ] {
        conn.execute(
            &format!(
                "CREATE INDEX IF NOT EXISTS {} ON {}(framework_id, sort_order)",
                name, table
            ),
            [],
        )?;
    }

    conn.execute(
        "CREATE TABLE IF NOT EXISTS result_type_configs(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS result_type_values(
            config_id TEXT NOT NULL,
            value TEXT NOT NULL,
            label TEXT NOT NULL DEFAULT '',
            pivot_value REAL,
            sort_order INTEGER NOT NULL,
            PRIMARY KEY(config_id, value),
            FOREIGN KEY(config_id) REFERENCES result_type_configs(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            class_id TEXT,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            sort_order INTEGER NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class_sort ON students(class_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS evaluations(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            framework_id TEXT NOT NULL,
            class_id TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(framework_id) REFERENCES frameworks(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_evaluations_framework ON evaluations(framework_id)",
        [],
    )?;

    // result_key is specific_competency_id, or competency_id for legacy rows,
    // so the upsert key never contains NULL.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS evaluation_results(
            id TEXT PRIMARY KEY,
            evaluation_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            competency_id TEXT NOT NULL,
            specific_competency_id TEXT,
            result_key TEXT NOT NULL,
            level TEXT,
            value TEXT,
            comment TEXT,
            evaluated_at TEXT NOT NULL,
            FOREIGN KEY(evaluation_id) REFERENCES evaluations(id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(evaluation_id, student_id, result_key)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_evaluation_results_evaluation ON evaluation_results(evaluation_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_evaluation_results_student ON evaluation_results(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    info!(path = %db_path.display(), "workspace database ready");
    Ok(conn)
}

fn ensure_frameworks_version(conn: &Connection) -> anyhow::Result<()> {
    // Workspaces created before frameworks were versioned.
    if table_has_column(conn, "frameworks", "version")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE frameworks ADD COLUMN version TEXT NOT NULL DEFAULT ''",
        [],
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_workspace(prefix: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!(
            "{}-{}",
            prefix,
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ))
    }

    #[test]
    fn open_db_is_idempotent_and_settings_roundtrip() {
        let ws = temp_workspace("competencyd-db-open");
        {
            let conn = open_db(&ws).expect("first open");
            settings_set_json(&conn, "setup.analysis", &json!({ "topBottomCount": 3 }))
                .expect("set");
            settings_set_json(&conn, "setup.analysis", &json!({ "topBottomCount": 7 }))
                .expect("overwrite");
        }
        let conn = open_db(&ws).expect("reopen");
        assert!(table_has_column(&conn, "frameworks", "version").expect("pragma"));
        assert_eq!(
            settings_get_json(&conn, "setup.analysis").expect("get"),
            Some(json!({ "topBottomCount": 7 }))
        );
        assert_eq!(settings_get_json(&conn, "missing").expect("get"), None);
    }
}
