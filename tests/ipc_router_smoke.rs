use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_schoold");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn schoold");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn send_line(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, line: &str) -> serde_json::Value {
    writeln!(stdin, "{}", line).expect("write request");
    stdin.flush().expect("flush request");
    let mut out = String::new();
    reader.read_line(&mut out).expect("read response line");
    assert!(!out.trim().is_empty(), "empty response for {}", line);
    serde_json::from_str(out.trim()).expect("parse response json")
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    role: Option<&str>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let mut payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    if let Some(r) = role {
        payload["role"] = json!(r);
    }
    let value = send_line(stdin, reader, &payload.to_string());
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    if value.get("ok").and_then(|v| v.as_bool()) == Some(false) {
        let code = value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        assert_ne!(
            code, "not_implemented",
            "unexpected unknown method for {}",
            method
        );
    }
    value
}

fn error_code(value: &serde_json::Value) -> Option<&str> {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("schoold-router-smoke");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let admin = Some("admin");

    let bad = send_line(&mut stdin, &mut reader, "{not json");
    assert_eq!(error_code(&bad), Some("bad_json"));

    let unknown = send_line(
        &mut stdin,
        &mut reader,
        &json!({ "id": "0", "method": "library.checkout" }).to_string(),
    );
    assert_eq!(error_code(&unknown), Some("not_implemented"));

    let health = request(&mut stdin, &mut reader, None, "1", "health", json!({}));
    assert!(health
        .get("result")
        .and_then(|r| r.get("workspacePath"))
        .map(|v| v.is_null())
        .unwrap_or(false));

    let no_ws = request(&mut stdin, &mut reader, admin, "2", "setup.get", json!({}));
    assert_eq!(error_code(&no_ws), Some("no_workspace"));

    let _ = request(
        &mut stdin,
        &mut reader,
        None,
        "3",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let student = request(
        &mut stdin,
        &mut reader,
        admin,
        "4",
        "students.create",
        json!({ "name": "Smoke Student", "className": "Grade 8" }),
    );
    let student_id = student
        .get("result")
        .and_then(|v| v.get("studentId"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let _ = request(&mut stdin, &mut reader, None, "5", "students.list", json!({ "className": "Grade 8" }));
    let _ = request(
        &mut stdin,
        &mut reader,
        None,
        "6",
        "grades.compute",
        json!({ "score": 1, "totalMarks": 2 }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        admin,
        "7",
        "grades.record",
        json!({ "studentId": student_id, "subject": "Math", "score": 1, "totalMarks": 2 }),
    );
    let _ = request(&mut stdin, &mut reader, None, "8", "grades.list", json!({}));
    let _ = request(
        &mut stdin,
        &mut reader,
        None,
        "9",
        "grades.studentSummary",
        json!({ "studentId": student_id }),
    );
    let _ = request(&mut stdin, &mut reader, None, "10", "schedules.list", json!({}));
    let _ = request(
        &mut stdin,
        &mut reader,
        None,
        "11",
        "schedules.conflicts",
        json!({ "scheduleId": "missing" }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        None,
        "12",
        "attendance.summary",
        json!({ "studentId": student_id }),
    );
    let _ = request(&mut stdin, &mut reader, None, "13", "setup.get", json!({}));
    let _ = request(
        &mut stdin,
        &mut reader,
        admin,
        "14",
        "students.deactivate",
        json!({ "studentId": student_id }),
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn capabilities_gate_mutating_methods() {
    let workspace = temp_dir("schoold-access");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request(
        &mut stdin,
        &mut reader,
        None,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let anonymous = request(
        &mut stdin,
        &mut reader,
        None,
        "2",
        "schedules.create",
        json!({ "className": "Grade 9", "semester": "Spring", "year": 2027 }),
    );
    assert_eq!(error_code(&anonymous), Some("forbidden"));

    let moderator = request(
        &mut stdin,
        &mut reader,
        Some("moderator"),
        "3",
        "schedules.create",
        json!({ "className": "Grade 9", "semester": "Spring", "year": 2027 }),
    );
    assert_eq!(error_code(&moderator), Some("forbidden"));
    assert_eq!(
        moderator
            .get("error")
            .and_then(|e| e.get("details"))
            .and_then(|d| d.get("capability"))
            .and_then(|v| v.as_str()),
        Some("manageSchedules")
    );

    let stranger = request(
        &mut stdin,
        &mut reader,
        Some("janitor"),
        "4",
        "setup.update",
        json!({ "section": "schedule", "patch": { "periodsPerDay": 6 } }),
    );
    assert_eq!(error_code(&stranger), Some("forbidden"));

    let admin = request(
        &mut stdin,
        &mut reader,
        Some("admin"),
        "5",
        "schedules.create",
        json!({ "className": "Grade 9", "semester": "Spring", "year": 2027 }),
    );
    assert_eq!(admin.get("ok").and_then(|v| v.as_bool()), Some(true));

    let settings = request(
        &mut stdin,
        &mut reader,
        Some("admin"),
        "6",
        "setup.update",
        json!({ "section": "schedule", "patch": { "periodsPerDay": 6 } }),
    );
    assert_eq!(
        settings
            .get("result")
            .and_then(|r| r.get("settings"))
            .and_then(|s| s.get("periodsPerDay"))
            .and_then(|v| v.as_i64()),
        Some(6)
    );

    let out_of_range = request(
        &mut stdin,
        &mut reader,
        Some("admin"),
        "7",
        "setup.update",
        json!({ "section": "schedule", "patch": { "periodsPerDay": 12 } }),
    );
    assert_eq!(error_code(&out_of_range), Some("bad_params"));

    let got = request(&mut stdin, &mut reader, None, "8", "setup.get", json!({}));
    let result = got.get("result").cloned().expect("result");
    assert_eq!(
        result
            .get("schedule")
            .and_then(|s| s.get("periodsPerDay"))
            .and_then(|v| v.as_i64()),
        Some(6)
    );
    assert_eq!(
        result
            .get("grading")
            .and_then(|s| s.get("rejectScoreAboveTotal"))
            .and_then(|v| v.as_bool()),
        Some(true)
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
