use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Periods per day the timetable grid can hold at most.
pub const MAX_PERIODS_PER_DAY: i64 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Weekday {
    Sunday,
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
}

impl Weekday {
    pub const ALL: [Weekday; 7] = [
        Weekday::Sunday,
        Weekday::Monday,
        Weekday::Tuesday,
        Weekday::Wednesday,
        Weekday::Thursday,
        Weekday::Friday,
        Weekday::Saturday,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sunday => "Sunday",
            Self::Monday => "Monday",
            Self::Tuesday => "Tuesday",
            Self::Wednesday => "Wednesday",
            Self::Thursday => "Thursday",
            Self::Friday => "Friday",
            Self::Saturday => "Saturday",
        }
    }
}

impl fmt::Display for Weekday {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown day: {0}")]
pub struct ParseWeekdayError(String);

impl FromStr for Weekday {
    type Err = ParseWeekdayError;

    /// Accepts full names and three-letter abbreviations, any case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim().to_ascii_lowercase();
        Weekday::ALL
            .iter()
            .copied()
            .find(|d| {
                let full = d.as_str().to_ascii_lowercase();
                t == full || (t.len() == 3 && full.starts_with(&t))
            })
            .ok_or_else(|| ParseWeekdayError(s.to_string()))
    }
}

impl Serialize for Weekday {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulePeriod {
    pub day: Weekday,
    pub period_number: i64,
    pub teacher_id: String,
    pub room: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictKind {
    Teacher,
    Room,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleConflict {
    pub kind: ConflictKind,
    pub day: Weekday,
    pub period_number: i64,
    /// Position of the offending period in the input.
    pub index: usize,
    pub recorded: String,
    pub conflicting: String,
    pub message: String,
}

type Slot = (Weekday, i64);

/// Single pass over `periods` in input order. Each slot remembers the first
/// teacher and the first room it saw; any later period whose value differs
/// from that first value is reported. Later periods never replace the
/// recorded value, so a third entry that matches the first is not flagged.
pub fn detect_conflicts(periods: &[SchedulePeriod]) -> Vec<ScheduleConflict> {
    let mut teacher_by_slot: HashMap<Slot, &str> = HashMap::new();
    let mut room_by_slot: HashMap<Slot, &str> = HashMap::new();
    let mut conflicts = Vec::new();

    for (index, p) in periods.iter().enumerate() {
        let slot = (p.day, p.period_number);

        let recorded = *teacher_by_slot.entry(slot).or_insert(p.teacher_id.as_str());
        if recorded != p.teacher_id {
            conflicts.push(ScheduleConflict {
                kind: ConflictKind::Teacher,
                day: p.day,
                period_number: p.period_number,
                index,
                recorded: recorded.to_string(),
                conflicting: p.teacher_id.clone(),
                message: format!(
                    "Teacher conflict on {} period {}: {} is already assigned, {} cannot also be scheduled",
                    p.day, p.period_number, recorded, p.teacher_id
                ),
            });
        }

        let recorded = *room_by_slot.entry(slot).or_insert(p.room.as_str());
        if recorded != p.room {
            conflicts.push(ScheduleConflict {
                kind: ConflictKind::Room,
                day: p.day,
                period_number: p.period_number,
                index,
                recorded: recorded.to_string(),
                conflicting: p.room.clone(),
                message: format!(
                    "Room conflict on {} period {}: room {} is already booked, room {} cannot also be used",
                    p.day, p.period_number, recorded, p.room
                ),
            });
        }
    }

    conflicts
}
