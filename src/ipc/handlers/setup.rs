use crate::calc::{GroupLevel, TimeBucket};
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::db_conn;
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Map, Value};
use tracing::debug;

#[derive(Clone, Copy)]
enum SetupSection {
    Analysis,
    Charts,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "analysis" => Some(Self::Analysis),
            "charts" => Some(Self::Charts),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Analysis => "setup.analysis",
            Self::Charts => "setup.charts",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Analysis => json!({
            "legacyLevelFallback": true,
            "topBottomCount": 5
        }),
        SetupSection::Charts => json!({
            "defaultBucket": "week",
            "radarLevel": "competency",
            "normalizeMaxScale": 100
        }),
    }
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool().ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match section {
            SetupSection::Analysis => match k.as_str() {
                "legacyLevelFallback" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                "topBottomCount" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 50)?));
                }
                _ => return Err(format!("unknown analysis field: {}", k)),
            },
            SetupSection::Charts => match k.as_str() {
                "defaultBucket" => {
                    let bucket = v
                        .as_str()
                        .and_then(|s| TimeBucket::parse(&s.trim().to_ascii_lowercase()))
                        .ok_or_else(|| "defaultBucket must be one of: day, week, month".to_string())?;
                    obj.insert(k.clone(), Value::String(bucket.as_str().to_string()));
                }
                "radarLevel" => {
                    let level = v
                        .as_str()
                        .and_then(|s| GroupLevel::parse(&s.trim().to_ascii_lowercase()))
                        .ok_or_else(|| {
                            "radarLevel must be one of: domain, field, competency".to_string()
                        })?;
                    obj.insert(k.clone(), Value::String(level.as_str().to_string()));
                }
                "normalizeMaxScale" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 1000)?));
                }
                _ => return Err(format!("unknown charts field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // A stale or hand-edited value falls back to the defaults.
            if let Err(msg) = merge_section_patch(section, &mut current, saved_obj) {
                debug!(key = section.key(), error = %msg, "ignoring invalid saved setup");
                current = default_section(section);
            }
        }
    }
    Ok(current)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalysisSettings {
    pub legacy_level_fallback: bool,
    pub top_bottom_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChartSettings {
    pub default_bucket: TimeBucket,
    pub radar_level: GroupLevel,
    pub normalize_max_scale: f64,
}

pub fn analysis_settings(conn: &Connection) -> anyhow::Result<AnalysisSettings> {
    let v = load_section(conn, SetupSection::Analysis)?;
    Ok(AnalysisSettings {
        legacy_level_fallback: v
            .get("legacyLevelFallback")
            .and_then(|x| x.as_bool())
            .unwrap_or(true),
        top_bottom_count: v
            .get("topBottomCount")
            .and_then(|x| x.as_u64())
            .unwrap_or(5) as usize,
    })
}

pub fn chart_settings(conn: &Connection) -> anyhow::Result<ChartSettings> {
    let v = load_section(conn, SetupSection::Charts)?;
    Ok(ChartSettings {
        default_bucket: v
            .get("defaultBucket")
            .and_then(|x| x.as_str())
            .and_then(TimeBucket::parse)
            .unwrap_or(TimeBucket::Week),
        radar_level: v
            .get("radarLevel")
            .and_then(|x| x.as_str())
            .and_then(GroupLevel::parse)
            .unwrap_or(GroupLevel::Competency),
        normalize_max_scale: v
            .get("normalizeMaxScale")
            .and_then(|x| x.as_f64())
            .unwrap_or(100.0),
    })
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let analysis = match load_section(conn, SetupSection::Analysis) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let charts = match load_section(conn, SetupSection::Charts) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    ok(
        &req.id,
        json!({
            "analysis": analysis,
            "charts": charts
        }),
    )
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(
            &req.id,
            "bad_params",
            "unknown section",
            Some(json!({ "section": section_raw })),
        );
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    let mut result = json!({ "ok": true });
    result[section_raw] = current;
    ok(&req.id, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
