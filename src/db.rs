use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("schoold.sqlite3");
    let conn = Connection::open(&db_path)?;
    create_schema(&conn)?;
    tracing::info!(path = %db_path.display(), "workspace database opened");
    Ok(conn)
}

pub fn create_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS workspace_settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            roll_no TEXT,
            class_name TEXT,
            section TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_name, section)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grades(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            subject TEXT NOT NULL,
            exam_name TEXT,
            score REAL NOT NULL,
            total_marks REAL NOT NULL,
            percentage INTEGER NOT NULL,
            letter TEXT NOT NULL,
            grade_points REAL NOT NULL,
            remarks TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    ensure_grades_updated_at(conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grades_student ON grades(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schedules(
            id TEXT PRIMARY KEY,
            class_name TEXT NOT NULL,
            section TEXT,
            semester TEXT NOT NULL,
            year INTEGER NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schedule_periods(
            id TEXT PRIMARY KEY,
            schedule_id TEXT NOT NULL,
            seq INTEGER NOT NULL,
            day TEXT NOT NULL,
            period_number INTEGER NOT NULL,
            subject TEXT,
            teacher_id TEXT NOT NULL,
            room TEXT NOT NULL,
            start_time TEXT,
            end_time TEXT,
            FOREIGN KEY(schedule_id) REFERENCES schedules(id),
            UNIQUE(schedule_id, seq)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_schedule_periods_schedule ON schedule_periods(schedule_id, seq)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            date TEXT NOT NULL,
            status TEXT NOT NULL,
            remarks TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(student_id, date)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_student ON attendance(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_attendance_summary(
            student_id TEXT PRIMARY KEY,
            total_days INTEGER NOT NULL,
            present_days INTEGER NOT NULL,
            absent_days INTEGER NOT NULL,
            late_days INTEGER NOT NULL,
            excused_days INTEGER NOT NULL,
            attendance_percent REAL NOT NULL,
            reconciled_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;

    Ok(())
}

fn ensure_grades_updated_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "grades", "updated_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE grades ADD COLUMN updated_at TEXT", [])?;
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
            "SELECT value_json FROM workspace_settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(conn: &Connection, key: &str, value: &serde_json::Value) -> anyhow::Result<()> {
    let text = serde_json::to_string(value)?;
    conn.execute(
        "INSERT INTO workspace_settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, text),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn schema_is_reentrant() {
        let conn = Connection::open_in_memory().expect("open");
        create_schema(&conn).expect("first");
        create_schema(&conn).expect("second");
        assert!(table_has_column(&conn, "grades", "updated_at").expect("pragma"));
        assert!(!table_has_column(&conn, "grades", "nope").expect("pragma"));
    }

    #[test]
    fn settings_roundtrip_and_overwrite() {
        let conn = Connection::open_in_memory().expect("open");
        create_schema(&conn).expect("schema");
        assert_eq!(settings_get_json(&conn, "setup.grading").expect("get"), None);
        settings_set_json(&conn, "setup.grading", &json!({ "a": 1 })).expect("set");
        settings_set_json(&conn, "setup.grading", &json!({ "a": 2 })).expect("set");
        assert_eq!(
            settings_get_json(&conn, "setup.grading").expect("get"),
            Some(json!({ "a": 2 }))
        );
    }
}
