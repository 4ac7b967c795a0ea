use crate::access::Capability;
use crate::grading::{self, GradeError, GradeResult};
use crate::ipc::error::ok;
use crate::ipc::handlers::setup::{grading_policy, GradingPolicy};
use crate::ipc::helpers::{
    get_optional_str, get_required_f64, get_required_str, now_rfc3339, require_capability,
    require_conn, require_student, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

/// Range checks the calculator leaves to its caller.
fn check_score_range(policy: GradingPolicy, score: f64, total_marks: f64) -> Result<(), HandlerErr> {
    if policy.reject_negative_score && score < 0.0 {
        return Err(HandlerErr::bad_params("score must not be negative"));
    }
    if policy.reject_score_above_total && score > total_marks {
        return Err(HandlerErr::bad_params("score must not exceed totalMarks")
            .with_details(json!({ "score": score, "totalMarks": total_marks })));
    }
    Ok(())
}

fn compute(score: f64, total_marks: f64) -> Result<GradeResult, HandlerErr> {
    grading::compute_grade(score, total_marks).map_err(|e| match e {
        GradeError::InvalidInput(msg) => HandlerErr::new("invalid_input", msg),
    })
}

fn load_policy(conn: &Connection) -> Result<GradingPolicy, HandlerErr> {
    grading_policy(conn).map_err(|e| HandlerErr::db("db_query_failed", e))
}

fn grades_compute(_state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let score = get_required_f64(&req.params, "score")?;
    let total_marks = get_required_f64(&req.params, "totalMarks")?;
    let g = compute(score, total_marks)?;
    Ok(json!(g))
}

fn grades_record(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    require_capability(req, Capability::RecordGrades)?;
    let conn = require_conn(state)?;

    let student_id = get_required_str(&req.params, "studentId")?;
    let subject = get_required_str(&req.params, "subject")?;
    let exam_name = get_optional_str(&req.params, "examName")?;
    let remarks = get_optional_str(&req.params, "remarks")?;
    let score = get_required_f64(&req.params, "score")?;
    let total_marks = get_required_f64(&req.params, "totalMarks")?;

    require_student(conn, &student_id)?;
    check_score_range(load_policy(conn)?, score, total_marks)?;
    let g = compute(score, total_marks)?;

    let grade_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO grades(
            id, student_id, subject, exam_name, score, total_marks,
            percentage, letter, grade_points, remarks, created_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &grade_id,
            &student_id,
            &subject,
            &exam_name,
            score,
            total_marks,
            g.percentage,
            g.letter.as_str(),
            g.grade_points,
            &remarks,
            now_rfc3339(),
        ),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "grades" })))?;

    tracing::info!(grade_id = %grade_id, student_id = %student_id, letter = %g.letter, "grade recorded");
    Ok(json!({
        "gradeId": grade_id,
        "percentage": g.percentage,
        "letter": g.letter,
        "gradePoints": g.grade_points,
    }))
}

struct StoredGrade {
    subject: String,
    exam_name: Option<String>,
    score: f64,
    total_marks: f64,
    remarks: Option<String>,
}

fn load_grade(conn: &Connection, grade_id: &str) -> Result<StoredGrade, HandlerErr> {
    let row = conn
        .query_row(
            "SELECT subject, exam_name, score, total_marks, remarks FROM grades WHERE id = ?",
            [grade_id],
            |r| {
                Ok(StoredGrade {
                    subject: r.get(0)?,
                    exam_name: r.get(1)?,
                    score: r.get(2)?,
                    total_marks: r.get(3)?,
                    remarks: r.get(4)?,
                })
            },
        )
        .optional()?;
    row.ok_or_else(|| HandlerErr::new("not_found", "grade not found"))
}

fn grades_update(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    require_capability(req, Capability::RecordGrades)?;
    let conn = require_conn(state)?;
    let grade_id = get_required_str(&req.params, "gradeId")?;
    let Some(patch) = req.params.get("patch").filter(|v| v.is_object()) else {
        return Err(HandlerErr::bad_params("patch must be an object"));
    };

    let mut g = load_grade(conn, &grade_id)?;
    for (k, _) in patch.as_object().into_iter().flatten() {
        match k.as_str() {
            "score" => g.score = get_required_f64(patch, k)?,
            "totalMarks" => g.total_marks = get_required_f64(patch, k)?,
            "subject" => g.subject = get_required_str(patch, k)?,
            "examName" => g.exam_name = get_optional_str(patch, k)?,
            "remarks" => g.remarks = get_optional_str(patch, k)?,
            _ => return Err(HandlerErr::bad_params(format!("unknown grade field: {}", k))),
        }
    }

    check_score_range(load_policy(conn)?, g.score, g.total_marks)?;
    let computed = compute(g.score, g.total_marks)?;

    conn.execute(
        "UPDATE grades
         SET subject = ?, exam_name = ?, score = ?, total_marks = ?,
             percentage = ?, letter = ?, grade_points = ?, remarks = ?, updated_at = ?
         WHERE id = ?",
        (
            &g.subject,
            &g.exam_name,
            g.score,
            g.total_marks,
            computed.percentage,
            computed.letter.as_str(),
            computed.grade_points,
            &g.remarks,
            now_rfc3339(),
            &grade_id,
        ),
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e))?;

    tracing::info!(grade_id = %grade_id, letter = %computed.letter, "grade updated");
    Ok(json!({
        "gradeId": grade_id,
        "percentage": computed.percentage,
        "letter": computed.letter,
        "gradePoints": computed.grade_points,
    }))
}

fn grades_delete(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    require_capability(req, Capability::RecordGrades)?;
    let conn = require_conn(state)?;
    let grade_id = get_required_str(&req.params, "gradeId")?;
    let n = conn
        .execute("DELETE FROM grades WHERE id = ?", [&grade_id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e))?;
    if n == 0 {
        return Err(HandlerErr::new("not_found", "grade not found"));
    }
    tracing::info!(grade_id = %grade_id, "grade deleted");
    Ok(json!({ "gradeId": grade_id, "deleted": true }))
}

fn grades_list(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Ok(json!({ "grades": [] }));
    };
    let student_id = get_optional_str(&req.params, "studentId")?;
    let subject = get_optional_str(&req.params, "subject")?;

    let mut stmt = conn.prepare(
        "SELECT id, student_id, subject, exam_name, score, total_marks,
                percentage, letter, grade_points, remarks, created_at
         FROM grades
         WHERE (?1 IS NULL OR student_id = ?1)
           AND (?2 IS NULL OR subject = ?2)
         ORDER BY created_at, id",
    )?;
    let grades = stmt
        .query_map((&student_id, &subject), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "studentId": r.get::<_, String>(1)?,
                "subject": r.get::<_, String>(2)?,
                "examName": r.get::<_, Option<String>>(3)?,
                "score": r.get::<_, f64>(4)?,
                "totalMarks": r.get::<_, f64>(5)?,
                "percentage": r.get::<_, i64>(6)?,
                "letter": r.get::<_, String>(7)?,
                "gradePoints": r.get::<_, f64>(8)?,
                "remarks": r.get::<_, Option<String>>(9)?,
                "createdAt": r.get::<_, String>(10)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(json!({ "grades": grades }))
}

fn grades_student_summary(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_conn(state)?;
    let student_id = get_required_str(&req.params, "studentId")?;
    require_student(conn, &student_id)?;

    let mut stmt = conn.prepare("SELECT percentage, grade_points FROM grades WHERE student_id = ?")?;
    let rows: Vec<(i64, f64)> = stmt
        .query_map([&student_id], |r| Ok((r.get(0)?, r.get(1)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;

    let gpa = grading::grade_point_average(rows.iter().map(|(_, p)| *p));
    let average_percentage = if rows.is_empty() {
        None
    } else {
        let sum: i64 = rows.iter().map(|(pct, _)| *pct).sum();
        Some(sum as f64 / rows.len() as f64)
    };
    let overall_letter = average_percentage
        .map(|avg| grading::letter_for_percentage(grading::round_half_up(avg)).0);

    Ok(json!({
        "studentId": student_id,
        "gradeCount": rows.len(),
        "gpa": gpa,
        "averagePercentage": average_percentage.map(|v| ((10.0 * v) + 0.5).floor() / 10.0),
        "overallLetter": overall_letter,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "grades.compute" => grades_compute(state, req),
        "grades.record" => grades_record(state, req),
        "grades.update" => grades_update(state, req),
        "grades.delete" => grades_delete(state, req),
        "grades.list" => grades_list(state, req),
        "grades.studentSummary" => grades_student_summary(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
