use crate::access::Capability;
use crate::ipc::error::ok;
use crate::ipc::helpers::{
    get_optional_str, get_required_str, now_rfc3339, require_capability, require_conn,
    require_student, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use uuid::Uuid;

fn students_create(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    require_capability(req, Capability::ManageStudents)?;
    let conn = require_conn(state)?;

    let name = get_required_str(&req.params, "name")?;
    let roll_no = get_optional_str(&req.params, "rollNo")?;
    let class_name = get_optional_str(&req.params, "className")?;
    let section = get_optional_str(&req.params, "section")?;

    let student_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, name, roll_no, class_name, section, active, created_at)
         VALUES(?, ?, ?, ?, ?, 1, ?)",
        (
            &student_id,
            &name,
            &roll_no,
            &class_name,
            &section,
            now_rfc3339(),
        ),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "students" })))?;

    tracing::info!(student_id = %student_id, "student created");
    Ok(json!({ "studentId": student_id, "name": name }))
}

fn students_list(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Ok(json!({ "students": [] }));
    };
    let class_name = get_optional_str(&req.params, "className")?;

    let mut stmt = conn.prepare(
        "SELECT id, name, roll_no, class_name, section, active
         FROM students
         WHERE (?1 IS NULL OR class_name = ?1)
         ORDER BY class_name, section, roll_no, name",
    )?;
    let students = stmt
        .query_map([&class_name], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "rollNo": r.get::<_, Option<String>>(2)?,
                "className": r.get::<_, Option<String>>(3)?,
                "section": r.get::<_, Option<String>>(4)?,
                "active": r.get::<_, i64>(5)? != 0,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
    Ok(json!({ "students": students }))
}

fn students_deactivate(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    require_capability(req, Capability::ManageStudents)?;
    let conn = require_conn(state)?;
    let student_id = get_required_str(&req.params, "studentId")?;
    require_student(conn, &student_id)?;

    conn.execute("UPDATE students SET active = 0 WHERE id = ?", [&student_id])
        .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    tracing::info!(student_id = %student_id, "student deactivated");
    Ok(json!({ "studentId": student_id, "active": false }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "students.create" => students_create(state, req),
        "students.list" => students_list(state, req),
        "students.deactivate" => students_deactivate(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
