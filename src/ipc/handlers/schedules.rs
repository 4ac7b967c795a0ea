use crate::access::Capability;
use crate::ipc::error::ok;
use crate::ipc::handlers::setup::periods_per_day;
use crate::ipc::helpers::{
    begin_tx, commit_tx, get_optional_bool, get_optional_str, get_required_i64,
    get_required_str, now_rfc3339, require_capability, require_conn, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::schedule::{self, SchedulePeriod, Weekday};
use chrono::NaiveTime;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct PeriodRow {
    id: String,
    seq: i64,
    day: Weekday,
    period_number: i64,
    subject: Option<String>,
    teacher_id: String,
    room: String,
    start_time: Option<String>,
    end_time: Option<String>,
}

impl PeriodRow {
    fn to_json(&self) -> serde_json::Value {
        json!({
            "id": self.id,
            "seq": self.seq,
            "day": self.day,
            "periodNumber": self.period_number,
            "subject": self.subject,
            "teacherId": self.teacher_id,
            "room": self.room,
            "startTime": self.start_time,
            "endTime": self.end_time,
        })
    }
}

/// Returns the schedule's `active` flag.
fn schedule_active(conn: &Connection, schedule_id: &str) -> Result<bool, HandlerErr> {
    let active: Option<i64> = conn
        .query_row("SELECT active FROM schedules WHERE id = ?", [schedule_id], |r| {
            r.get(0)
        })
        .optional()?;
    match active {
        Some(v) => Ok(v != 0),
        None => Err(HandlerErr::new("not_found", "schedule not found")),
    }
}

fn require_active_schedule(conn: &Connection, schedule_id: &str) -> Result<(), HandlerErr> {
    if schedule_active(conn, schedule_id)? {
        Ok(())
    } else {
        Err(HandlerErr::new(
            "schedule_inactive",
            "schedule is deactivated; periods can no longer be edited",
        ))
    }
}

fn parse_day(params: &serde_json::Value, key: &str) -> Result<Weekday, HandlerErr> {
    let raw = get_required_str(params, key)?;
    raw.parse::<Weekday>()
        .map_err(|e| HandlerErr::bad_params(e.to_string()))
}

fn parse_period_number(conn: &Connection, params: &serde_json::Value, key: &str) -> Result<i64, HandlerErr> {
    let n = get_required_i64(params, key)?;
    let max = periods_per_day(conn).map_err(|e| HandlerErr::db("db_query_failed", e))?;
    if !(1..=max).contains(&n) {
        return Err(HandlerErr::bad_params(format!("{} must be in 1..={}", key, max)));
    }
    Ok(n)
}

fn parse_time(params: &serde_json::Value, key: &str) -> Result<Option<String>, HandlerErr> {
    let Some(raw) = get_optional_str(params, key)? else {
        return Ok(None);
    };
    let t = NaiveTime::parse_from_str(&raw, "%H:%M")
        .map_err(|_| HandlerErr::bad_params(format!("{} must be HH:MM", key)))?;
    Ok(Some(t.format("%H:%M").to_string()))
}

fn check_time_order(start: &Option<String>, end: &Option<String>) -> Result<(), HandlerErr> {
    // Zero-padded HH:MM strings compare in time order.
    if let (Some(s), Some(e)) = (start, end) {
        if e <= s {
            return Err(HandlerErr::bad_params("endTime must be after startTime"));
        }
    }
    Ok(())
}

fn load_periods(conn: &Connection, schedule_id: &str) -> Result<Vec<PeriodRow>, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT id, seq, day, period_number, subject, teacher_id, room, start_time, end_time
         FROM schedule_periods
         WHERE schedule_id = ?
         ORDER BY seq",
    )?;
    let raw = stmt
        .query_map([schedule_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, i64>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, i64>(3)?,
                r.get::<_, Option<String>>(4)?,
                r.get::<_, String>(5)?,
                r.get::<_, String>(6)?,
                r.get::<_, Option<String>>(7)?,
                r.get::<_, Option<String>>(8)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;

    let mut out = Vec::with_capacity(raw.len());
    for (id, seq, day, period_number, subject, teacher_id, room, start_time, end_time) in raw {
        let day = day.parse::<Weekday>().map_err(|e| {
            HandlerErr::new("db_query_failed", e.to_string())
                .with_details(json!({ "periodId": id }))
        })?;
        out.push(PeriodRow {
            id,
            seq,
            day,
            period_number,
            subject,
            teacher_id,
            room,
            start_time,
            end_time,
        });
    }
    Ok(out)
}

fn touch_schedule(conn: &Connection, schedule_id: &str) -> Result<(), HandlerErr> {
    conn.execute(
        "UPDATE schedules SET updated_at = ? WHERE id = ?",
        (now_rfc3339(), schedule_id),
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    Ok(())
}

fn schedules_create(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    require_capability(req, Capability::ManageSchedules)?;
    let conn = require_conn(state)?;

    let class_name = get_required_str(&req.params, "className")?;
    let section = get_optional_str(&req.params, "section")?;
    let semester = get_required_str(&req.params, "semester")?;
    let year = get_required_i64(&req.params, "year")?;
    if !(1900..=9999).contains(&year) {
        return Err(HandlerErr::bad_params("year must be a four-digit year"));
    }

    let schedule_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO schedules(id, class_name, section, semester, year, active, created_at)
         VALUES(?, ?, ?, ?, ?, 1, ?)",
        (&schedule_id, &class_name, &section, &semester, year, now_rfc3339()),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "schedules" })))?;

    tracing::info!(schedule_id = %schedule_id, class_name = %class_name, "schedule created");
    Ok(json!({ "scheduleId": schedule_id }))
}

fn schedules_list(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Ok(json!({ "schedules": [] }));
    };
    let include_inactive = get_optional_bool(&req.params, "includeInactive")?.unwrap_or(false);

    let mut stmt = conn.prepare(
        "SELECT
           s.id, s.class_name, s.section, s.semester, s.year, s.active,
           (SELECT COUNT(*) FROM schedule_periods p WHERE p.schedule_id = s.id) AS period_count
         FROM schedules s
         WHERE (?1 = 1 OR s.active = 1)
         ORDER BY s.year DESC, s.semester, s.class_name, s.section",
    )?;
    let schedules = stmt
        .query_map([include_inactive as i64], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "className": r.get::<_, String>(1)?,
                "section": r.get::<_, Option<String>>(2)?,
                "semester": r.get::<_, String>(3)?,
                "year": r.get::<_, i64>(4)?,
                "active": r.get::<_, i64>(5)? != 0,
                "periodCount": r.get::<_, i64>(6)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(json!({ "schedules": schedules }))
}

fn schedules_get(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_conn(state)?;
    let schedule_id = get_required_str(&req.params, "scheduleId")?;

    let row = conn
        .query_row(
            "SELECT class_name, section, semester, year, active FROM schedules WHERE id = ?",
            [&schedule_id],
            |r| {
                Ok(json!({
                    "id": schedule_id,
                    "className": r.get::<_, String>(0)?,
                    "section": r.get::<_, Option<String>>(1)?,
                    "semester": r.get::<_, String>(2)?,
                    "year": r.get::<_, i64>(3)?,
                    "active": r.get::<_, i64>(4)? != 0,
                }))
            },
        )
        .optional()?;
    let Some(schedule) = row else {
        return Err(HandlerErr::new("not_found", "schedule not found"));
    };

    let periods: Vec<serde_json::Value> = load_periods(conn, &schedule_id)?
        .iter()
        .map(PeriodRow::to_json)
        .collect();
    Ok(json!({ "schedule": schedule, "periods": periods }))
}

fn schedules_deactivate(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    require_capability(req, Capability::ManageSchedules)?;
    let conn = require_conn(state)?;
    let schedule_id = get_required_str(&req.params, "scheduleId")?;
    schedule_active(conn, &schedule_id)?;

    conn.execute(
        "UPDATE schedules SET active = 0, updated_at = ? WHERE id = ?",
        (now_rfc3339(), &schedule_id),
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    tracing::info!(schedule_id = %schedule_id, "schedule deactivated");
    Ok(json!({ "scheduleId": schedule_id, "active": false }))
}

fn periods_add(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    require_capability(req, Capability::ManageSchedules)?;
    let conn = require_conn(state)?;
    let p = &req.params;

    let schedule_id = get_required_str(p, "scheduleId")?;
    require_active_schedule(conn, &schedule_id)?;

    let day = parse_day(p, "day")?;
    let period_number = parse_period_number(conn, p, "periodNumber")?;
    let teacher_id = get_required_str(p, "teacherId")?;
    let room = get_required_str(p, "room")?;
    let subject = get_optional_str(p, "subject")?;
    let start_time = parse_time(p, "startTime")?;
    let end_time = parse_time(p, "endTime")?;
    check_time_order(&start_time, &end_time)?;

    let tx = begin_tx(conn)?;
    let next_seq: i64 = tx.query_row(
        "SELECT COALESCE(MAX(seq), -1) + 1 FROM schedule_periods WHERE schedule_id = ?",
        [&schedule_id],
        |r| r.get(0),
    )?;

    let period_id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO schedule_periods(
            id, schedule_id, seq, day, period_number, subject, teacher_id, room, start_time, end_time
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &period_id,
            &schedule_id,
            next_seq,
            day.as_str(),
            period_number,
            &subject,
            &teacher_id,
            &room,
            &start_time,
            &end_time,
        ),
    )
    .map_err(|e| {
        HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "schedule_periods" }))
    })?;
    touch_schedule(&tx, &schedule_id)?;
    commit_tx(tx)?;

    tracing::info!(
        schedule_id = %schedule_id,
        period_id = %period_id,
        day = %day,
        period_number,
        "period added"
    );
    Ok(json!({ "periodId": period_id, "seq": next_seq }))
}

fn periods_update(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    require_capability(req, Capability::ManageSchedules)?;
    let conn = require_conn(state)?;

    let schedule_id = get_required_str(&req.params, "scheduleId")?;
    let period_id = get_required_str(&req.params, "periodId")?;
    let Some(patch) = req.params.get("patch").filter(|v| v.is_object()) else {
        return Err(HandlerErr::bad_params("patch must be an object"));
    };
    require_active_schedule(conn, &schedule_id)?;

    let mut row = load_periods(conn, &schedule_id)?
        .into_iter()
        .find(|p| p.id == period_id)
        .ok_or_else(|| HandlerErr::new("not_found", "period not found"))?;

    for (k, _) in patch.as_object().into_iter().flatten() {
        match k.as_str() {
            "day" => row.day = parse_day(patch, k)?,
            "periodNumber" => row.period_number = parse_period_number(conn, patch, k)?,
            "teacherId" => row.teacher_id = get_required_str(patch, k)?,
            "room" => row.room = get_required_str(patch, k)?,
            "subject" => row.subject = get_optional_str(patch, k)?,
            "startTime" => row.start_time = parse_time(patch, k)?,
            "endTime" => row.end_time = parse_time(patch, k)?,
            _ => return Err(HandlerErr::bad_params(format!("unknown period field: {}", k))),
        }
    }
    check_time_order(&row.start_time, &row.end_time)?;

    let tx = begin_tx(conn)?;
    tx.execute(
        "UPDATE schedule_periods
         SET day = ?, period_number = ?, subject = ?, teacher_id = ?, room = ?,
             start_time = ?, end_time = ?
         WHERE id = ? AND schedule_id = ?",
        (
            row.day.as_str(),
            row.period_number,
            &row.subject,
            &row.teacher_id,
            &row.room,
            &row.start_time,
            &row.end_time,
            &period_id,
            &schedule_id,
        ),
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    touch_schedule(&tx, &schedule_id)?;
    commit_tx(tx)?;

    tracing::info!(schedule_id = %schedule_id, period_id = %period_id, "period updated");
    Ok(json!({ "period": row.to_json() }))
}

fn periods_delete(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    require_capability(req, Capability::ManageSchedules)?;
    let conn = require_conn(state)?;
    let schedule_id = get_required_str(&req.params, "scheduleId")?;
    let period_id = get_required_str(&req.params, "periodId")?;
    require_active_schedule(conn, &schedule_id)?;

    let tx = begin_tx(conn)?;
    let n = tx
        .execute(
            "DELETE FROM schedule_periods WHERE id = ? AND schedule_id = ?",
            (&period_id, &schedule_id),
        )
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    if n == 0 {
        return Err(HandlerErr::new("not_found", "period not found"));
    }
    touch_schedule(&tx, &schedule_id)?;
    commit_tx(tx)?;
    tracing::info!(schedule_id = %schedule_id, period_id = %period_id, "period deleted");
    Ok(json!({ "periodId": period_id, "deleted": true }))
}

fn schedules_conflicts(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_conn(state)?;
    let schedule_id = get_required_str(&req.params, "scheduleId")?;
    schedule_active(conn, &schedule_id)?;

    let rows = load_periods(conn, &schedule_id)?;
    let periods: Vec<SchedulePeriod> = rows
        .iter()
        .map(|r| SchedulePeriod {
            day: r.day,
            period_number: r.period_number,
            teacher_id: r.teacher_id.clone(),
            room: r.room.clone(),
        })
        .collect();

    let conflicts = schedule::detect_conflicts(&periods);
    let conflicts_out: Vec<serde_json::Value> = conflicts
        .iter()
        .map(|c| {
            let mut v = json!(c);
            v["periodId"] = json!(rows[c.index].id);
            v
        })
        .collect();

    tracing::debug!(
        schedule_id = %schedule_id,
        periods = periods.len(),
        conflicts = conflicts.len(),
        "conflict check"
    );
    Ok(json!({
        "scheduleId": schedule_id,
        "hasConflicts": !conflicts.is_empty(),
        "conflicts": conflicts_out,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "schedules.create" => schedules_create(state, req),
        "schedules.list" => schedules_list(state, req),
        "schedules.get" => schedules_get(state, req),
        "schedules.deactivate" => schedules_deactivate(state, req),
        "schedules.periods.add" => periods_add(state, req),
        "schedules.periods.update" => periods_update(state, req),
        "schedules.periods.delete" => periods_delete(state, req),
        "schedules.conflicts" => schedules_conflicts(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
