use rusqlite::Connection;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
    Excused,
}

impl AttendanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Present => "present",
            Self::Absent => "absent",
            Self::Late => "late",
            Self::Excused => "excused",
        }
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("status must be one of: present, absent, late, excused (got {0:?})")]
pub struct ParseStatusError(String);

impl FromStr for AttendanceStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "present" => Ok(Self::Present),
            "absent" => Ok(Self::Absent),
            "late" => Ok(Self::Late),
            "excused" => Ok(Self::Excused),
            _ => Err(ParseStatusError(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttendancePolicy {
    pub count_late_as_present: bool,
    pub count_excused_as_present: bool,
}

impl Default for AttendancePolicy {
    fn default() -> Self {
        Self {
            count_late_as_present: true,
            count_excused_as_present: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceSummary {
    pub total_days: i64,
    pub present_days: i64,
    pub absent_days: i64,
    pub late_days: i64,
    pub excused_days: i64,
    pub attendance_percent: f64,
}

/// Aggregate one student's records. Percentage is rounded to one decimal,
/// 0 when there are no records.
pub fn summarize<I>(statuses: I, policy: AttendancePolicy) -> AttendanceSummary
where
    I: IntoIterator<Item = AttendanceStatus>,
{
    let mut s = AttendanceSummary::default();
    for status in statuses {
        s.total_days += 1;
        match status {
            AttendanceStatus::Present => s.present_days += 1,
            AttendanceStatus::Absent => s.absent_days += 1,
            AttendanceStatus::Late => s.late_days += 1,
            AttendanceStatus::Excused => s.excused_days += 1,
        }
    }

    let mut attended = s.present_days;
    if policy.count_late_as_present {
        attended += s.late_days;
    }
    if policy.count_excused_as_present {
        attended += s.excused_days;
    }
    s.attendance_percent = if s.total_days > 0 {
        let pct = 100.0 * (attended as f64) / (s.total_days as f64);
        ((10.0 * pct) + 0.5).floor() / 10.0
    } else {
        0.0
    };
    s
}

/// Recompute and store the attendance aggregate for one student. This is the
/// only writer of `student_attendance_summary`; saving an attendance record
/// never touches it.
pub fn reconcile_student(
    conn: &Connection,
    student_id: &str,
    policy: AttendancePolicy,
) -> anyhow::Result<AttendanceSummary> {
    let mut stmt = conn.prepare("SELECT status FROM attendance WHERE student_id = ? ORDER BY date")?;
    let raw: Vec<String> = stmt
        .query_map([student_id], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut statuses = Vec::with_capacity(raw.len());
    for s in &raw {
        match s.parse::<AttendanceStatus>() {
            Ok(v) => statuses.push(v),
            Err(e) => tracing::warn!(student_id, error = %e, "skipping unreadable attendance row"),
        }
    }

    let summary = summarize(statuses, policy);
    conn.execute(
        "INSERT INTO student_attendance_summary(
            student_id, total_days, present_days, absent_days, late_days, excused_days,
            attendance_percent, reconciled_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id) DO UPDATE SET
            total_days = excluded.total_days,
            present_days = excluded.present_days,
            absent_days = excluded.absent_days,
            late_days = excluded.late_days,
            excused_days = excluded.excused_days,
            attendance_percent = excluded.attendance_percent,
            reconciled_at = excluded.reconciled_at",
        (
            student_id,
            summary.total_days,
            summary.present_days,
            summary.absent_days,
            summary.late_days,
            summary.excused_days,
            summary.attendance_percent,
            chrono::Utc::now().to_rfc3339(),
        ),
    )?;
    tracing::info!(
        student_id,
        total_days = summary.total_days,
        attendance_percent = summary.attendance_percent,
        "attendance reconciled"
    );
    Ok(summary)
}
