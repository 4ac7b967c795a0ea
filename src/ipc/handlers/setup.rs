use crate::access::Capability;
use crate::attendance::AttendancePolicy;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{require_capability, require_conn};
use crate::ipc::types::{AppState, Request};
use crate::schedule::MAX_PERIODS_PER_DAY;
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Grading,
    Schedule,
    Attendance,
}

impl SetupSection {
    const ALL: [SetupSection; 3] = [Self::Grading, Self::Schedule, Self::Attendance];

    fn parse(s: &str) -> Option<Self> {
        match s {
            "grading" => Some(Self::Grading),
            "schedule" => Some(Self::Schedule),
            "attendance" => Some(Self::Attendance),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Grading => "grading",
            Self::Schedule => "schedule",
            Self::Attendance => "attendance",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Grading => "setup.grading",
            Self::Schedule => "setup.schedule",
            Self::Attendance => "setup.attendance",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Grading => json!({
            "rejectNegativeScore": true,
            "rejectScoreAboveTotal": true
        }),
        SetupSection::Schedule => json!({
            "periodsPerDay": MAX_PERIODS_PER_DAY
        }),
        SetupSection::Attendance => json!({
            "countLateAsPresent": true,
            "countExcusedAsPresent": false
        }),
    }
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool()
        .ok_or_else(|| format!("{} must be boolean", key))
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
            SetupSection::Grading => match k.as_str() {
                "rejectNegativeScore" | "rejectScoreAboveTotal" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                _ => return Err(format!("unknown grading field: {}", k)),
            },
            SetupSection::Schedule => match k.as_str() {
                "periodsPerDay" => {
                    obj.insert(
                        k.clone(),
                        Value::from(parse_i64_range(v, k, 1, MAX_PERIODS_PER_DAY)?),
                    );
                }
                _ => return Err(format!("unknown schedule field: {}", k)),
            },
            SetupSection::Attendance => match k.as_str() {
                "countLateAsPresent" | "countExcusedAsPresent" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                _ => return Err(format!("unknown attendance field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Malformed historical values fall back to defaults field by field.
            if let Err(e) = merge_section_patch(section, &mut current, saved_obj) {
                tracing::warn!(section = section.name(), error = %e, "ignoring stored setting");
            }
        }
    }
    Ok(current)
}

fn flag(section: &Value, key: &str, default: bool) -> bool {
    section.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GradingPolicy {
    pub reject_negative_score: bool,
    pub reject_score_above_total: bool,
}

pub fn grading_policy(conn: &rusqlite::Connection) -> anyhow::Result<GradingPolicy> {
    let s = load_section(conn, SetupSection::Grading)?;
    Ok(GradingPolicy {
        reject_negative_score: flag(&s, "rejectNegativeScore", true),
        reject_score_above_total: flag(&s, "rejectScoreAboveTotal", true),
    })
}

pub fn periods_per_day(conn: &rusqlite::Connection) -> anyhow::Result<i64> {
    let s = load_section(conn, SetupSection::Schedule)?;
    Ok(s.get("periodsPerDay")
        .and_then(|v| v.as_i64())
        .unwrap_or(MAX_PERIODS_PER_DAY)
        .clamp(1, MAX_PERIODS_PER_DAY))
}

pub fn attendance_policy(conn: &rusqlite::Connection) -> anyhow::Result<AttendancePolicy> {
    let s = load_section(conn, SetupSection::Attendance)?;
    let d = AttendancePolicy::default();
    Ok(AttendancePolicy {
        count_late_as_present: flag(&s, "countLateAsPresent", d.count_late_as_present),
        count_excused_as_present: flag(&s, "countExcusedAsPresent", d.count_excused_as_present),
    })
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_conn(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    let mut out = Map::new();
    for section in SetupSection::ALL {
        match load_section(conn, section) {
            Ok(v) => {
                out.insert(section.name().to_string(), v);
            }
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }
    ok(&req.id, Value::Object(out))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = require_capability(req, Capability::ManageSettings) {
        return e.response(&req.id);
    }
    let conn = match require_conn(state) {
        Ok(c) => c,
        Err(e) => return e.response(&req.id),
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
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
    tracing::info!(section = section.name(), "settings updated");
    ok(&req.id, json!({ "section": section.name(), "settings": current }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
