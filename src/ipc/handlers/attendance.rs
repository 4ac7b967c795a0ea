use crate::access::Capability;
use crate::attendance::{self, AttendanceStatus};
use crate::ipc::error::ok;
use crate::ipc::handlers::setup::attendance_policy;
use crate::ipc::helpers::{
    begin_tx, commit_tx, get_optional_bool, get_optional_str, get_required_str,
    require_capability, require_conn, require_student, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn parse_date(raw: &str, key: &str) -> Result<NaiveDate, HandlerErr> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| HandlerErr::bad_params(format!("{} must be YYYY-MM-DD", key)))
}

fn parse_optional_date(params: &serde_json::Value, key: &str) -> Result<Option<NaiveDate>, HandlerErr> {
    match get_optional_str(params, key)? {
        Some(s) => parse_date(&s, key).map(Some),
        None => Ok(None),
    }
}

fn reconcile(conn: &Connection, student_id: &str) -> Result<attendance::AttendanceSummary, HandlerErr> {
    let policy = attendance_policy(conn).map_err(|e| HandlerErr::db("db_query_failed", e))?;
    attendance::reconcile_student(conn, student_id, policy)
        .map_err(|e| HandlerErr::db("db_update_failed", e))
}

fn attendance_mark(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    require_capability(req, Capability::ManageAttendance)?;
    let conn = require_conn(state)?;

    let student_id = get_required_str(&req.params, "studentId")?;
    let date = parse_date(&get_required_str(&req.params, "date")?, "date")?;
    let status = get_required_str(&req.params, "status")?
        .parse::<AttendanceStatus>()
        .map_err(|e| HandlerErr::bad_params(e.to_string()))?;
    let remarks = get_optional_str(&req.params, "remarks")?;
    let reconcile_after = get_optional_bool(&req.params, "reconcile")?.unwrap_or(false);

    require_student(conn, &student_id)?;

    let date_key = date.format("%Y-%m-%d").to_string();
    let tx = begin_tx(conn)?;
    tx.execute(
        "INSERT INTO attendance(id, student_id, date, status, remarks) VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(student_id, date) DO UPDATE SET
            status = excluded.status,
            remarks = excluded.remarks",
        (
            Uuid::new_v4().to_string(),
            &student_id,
            &date_key,
            status.as_str(),
            &remarks,
        ),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "attendance" })))?;

    // The stored aggregate only moves when the caller asks for it.
    let summary = if reconcile_after {
        Some(reconcile(&tx, &student_id)?)
    } else {
        None
    };
    commit_tx(tx)?;
    tracing::info!(student_id = %student_id, date = %date_key, status = %status, "attendance marked");

    Ok(json!({
        "studentId": student_id,
        "date": date_key,
        "status": status.as_str(),
        "reconciled": summary.is_some(),
        "summary": summary,
    }))
}

fn attendance_list(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_conn(state)?;
    let student_id = get_required_str(&req.params, "studentId")?;
    let from = parse_optional_date(&req.params, "from")?.map(|d| d.format("%Y-%m-%d").to_string());
    let to = parse_optional_date(&req.params, "to")?.map(|d| d.format("%Y-%m-%d").to_string());
    require_student(conn, &student_id)?;

    let mut stmt = conn.prepare(
        "SELECT date, status, remarks
         FROM attendance
         WHERE student_id = ?1
           AND (?2 IS NULL OR date >= ?2)
           AND (?3 IS NULL OR date <= ?3)
         ORDER BY date",
    )?;
    let records = stmt
        .query_map((&student_id, &from, &to), |r| {
            Ok(json!({
                "date": r.get::<_, String>(0)?,
                "status": r.get::<_, String>(1)?,
                "remarks": r.get::<_, Option<String>>(2)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(json!({ "studentId": student_id, "records": records }))
}

fn attendance_reconcile(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    require_capability(req, Capability::ManageAttendance)?;
    let conn = require_conn(state)?;
    let student_id = get_required_str(&req.params, "studentId")?;
    require_student(conn, &student_id)?;

    let summary = reconcile(conn, &student_id)?;
    Ok(json!({ "studentId": student_id, "summary": summary }))
}

fn attendance_summary(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_conn(state)?;
    let student_id = get_required_str(&req.params, "studentId")?;
    require_student(conn, &student_id)?;

    let stored = conn
        .query_row(
            "SELECT total_days, present_days, absent_days, late_days, excused_days,
                    attendance_percent, reconciled_at
             FROM student_attendance_summary
             WHERE student_id = ?",
            [&student_id],
            |r| {
                Ok(json!({
                    "totalDays": r.get::<_, i64>(0)?,
                    "presentDays": r.get::<_, i64>(1)?,
                    "absentDays": r.get::<_, i64>(2)?,
                    "lateDays": r.get::<_, i64>(3)?,
                    "excusedDays": r.get::<_, i64>(4)?,
                    "attendancePercent": r.get::<_, f64>(5)?,
                    "reconciledAt": r.get::<_, String>(6)?,
                }))
            },
        )
        .optional()?;

    Ok(json!({
        "studentId": student_id,
        "reconciled": stored.is_some(),
        "summary": stored,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "attendance.mark" => attendance_mark(state, req),
        "attendance.list" => attendance_list(state, req),
        "attendance.reconcile" => attendance_reconcile(state, req),
        "attendance.summary" => attendance_summary(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
