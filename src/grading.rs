use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GradeError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LetterGrade {
    APlus,
    A,
    BPlus,
    B,
    CPlus,
    C,
    DPlus,
    D,
    F,
}

impl LetterGrade {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::APlus => "A+",
            Self::A => "A",
            Self::BPlus => "B+",
            Self::B => "B",
            Self::CPlus => "C+",
            Self::C => "C",
            Self::DPlus => "D+",
            Self::D => "D",
            Self::F => "F",
        }
    }
}

impl fmt::Display for LetterGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for LetterGrade {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Descending (minimum percentage, letter, grade points). First match wins.
const GRADE_BANDS: [(i64, LetterGrade, f64); 8] = [
    (95, LetterGrade::APlus, 4.0),
    (90, LetterGrade::A, 3.7),
    (85, LetterGrade::BPlus, 3.3),
    (80, LetterGrade::B, 3.0),
    (75, LetterGrade::CPlus, 2.3),
    (70, LetterGrade::C, 2.0),
    (65, LetterGrade::DPlus, 1.3),
    (60, LetterGrade::D, 1.0),
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeResult {
    pub percentage: i64,
    pub letter: LetterGrade,
    pub grade_points: f64,
}

/// Round half up to the nearest integer: `Int(x + 0.5)`.
pub fn round_half_up(x: f64) -> i64 {
    (x + 0.5).floor() as i64
}

pub fn letter_for_percentage(percentage: i64) -> (LetterGrade, f64) {
    GRADE_BANDS
        .iter()
        .find(|(min, _, _)| percentage >= *min)
        .map(|(_, letter, points)| (*letter, *points))
        .unwrap_or((LetterGrade::F, 0.0))
}

/// Score is not clamped: a score above `total_marks` yields a percentage
/// above 100 and a negative score a negative one. Range checks belong to
/// the caller. A NaN or infinite score is rejected too, since no percentage
/// can be derived from it.
pub fn compute_grade(score: f64, total_marks: f64) -> Result<GradeResult, GradeError> {
    if !total_marks.is_finite() || total_marks <= 0.0 {
        return Err(GradeError::InvalidInput(
            "totalMarks must be greater than 0".to_string(),
        ));
    }
    if !score.is_finite() {
        return Err(GradeError::InvalidInput("score must be a finite number".to_string()));
    }

    let percentage = round_half_up(score / total_marks * 100.0);
    let (letter, grade_points) = letter_for_percentage(percentage);
    Ok(GradeResult {
        percentage,
        letter,
        grade_points,
    })
}

/// Mean grade points, rounded to two decimals.
pub fn grade_point_average<I>(points: I) -> Option<f64>
where
    I: IntoIterator<Item = f64>,
{
    let mut sum = 0.0_f64;
    let mut count = 0_usize;
    for p in points {
        sum += p;
        count += 1;
    }
    if count == 0 {
        return None;
    }
    let avg = sum / (count as f64);
    Some(((avg * 100.0) + 0.5).floor() / 100.0)
}
