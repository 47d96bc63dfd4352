use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Fallback multiplier for written grades in a main subject.
pub const DEFAULT_WRITTEN_WEIGHT: u8 = 2;
/// Fallback grade level for newly created subjects.
pub const DEFAULT_GRADE_LEVEL: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GradeCategory {
    Oral,
    Written,
}

impl GradeCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            GradeCategory::Oral => "oral",
            GradeCategory::Written => "written",
        }
    }
}

impl FromStr for GradeCategory {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "oral" => Ok(GradeCategory::Oral),
            "written" => Ok(GradeCategory::Written),
            other => Err(AppError::Validation(format!(
                "Unknown grade category: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for GradeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectKind {
    Main,
    Secondary,
}

impl SubjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectKind::Main => "main",
            SubjectKind::Secondary => "secondary",
        }
    }
}

impl FromStr for SubjectKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "main" => Ok(SubjectKind::Main),
            "secondary" => Ok(SubjectKind::Secondary),
            other => Err(AppError::Validation(format!("Unknown subject kind: {}", other))),
        }
    }
}

impl fmt::Display for SubjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grade {
    pub id: i64,
    pub subject_id: i64,
    pub value: f64,
    pub weight: f64,
    pub category: GradeCategory,
    pub date: NaiveDate,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    pub id: i64,
    pub student_id: i64,
    pub name: String,
    pub kind: SubjectKind,
    pub written_weight: u8,
    pub grade_level: i64,
    pub grades: Vec<Grade>,
}

impl Subject {
    /// Grades ordered oldest first, the order used for display and trends.
    pub fn sort_grades(&mut self) {
        self.grades.sort_by(|a, b| a.date.cmp(&b.date).then(a.id.cmp(&b.id)));
    }
}

#[derive(sqlx::FromRow, Clone, Debug)]
pub struct DbSubject {
    pub id: Option<i64>,
    pub student_id: Option<i64>,
    pub name: Option<String>,
    pub kind: Option<String>,
    pub written_weight: Option<i64>,
    pub grade_level: Option<i64>,
}

impl TryFrom<DbSubject> for Subject {
    type Error = AppError;

    fn try_from(db: DbSubject) -> Result<Self, Self::Error> {
        let kind = db.kind.unwrap_or_default();
        let kind = SubjectKind::from_str(&kind)
            .map_err(|_| AppError::Internal(format!("Stored subject has invalid kind '{}'", kind)))?;

        let written_weight = match db.written_weight {
            Some(1) => 1,
            Some(2) | None => DEFAULT_WRITTEN_WEIGHT,
            Some(other) => {
                return Err(AppError::Internal(format!(
                    "Stored subject has invalid written weight {}",
                    other
                )));
            }
        };

        Ok(Self {
            id: db.id.unwrap_or_default(),
            student_id: db.student_id.unwrap_or_default(),
            name: db.name.unwrap_or_default(),
            kind,
            written_weight,
            grade_level: db.grade_level.unwrap_or(DEFAULT_GRADE_LEVEL),
            grades: Vec::new(),
        })
    }
}

#[derive(sqlx::FromRow, Clone, Debug)]
pub struct DbGrade {
    pub id: Option<i64>,
    pub subject_id: Option<i64>,
    pub value: Option<f64>,
    pub weight: Option<f64>,
    pub category: Option<String>,
    pub date: Option<NaiveDate>,
    pub notes: Option<String>,
}

impl TryFrom<DbGrade> for Grade {
    type Error = AppError;

    fn try_from(db: DbGrade) -> Result<Self, Self::Error> {
        let category = db.category.unwrap_or_default();
        let category = GradeCategory::from_str(&category).map_err(|_| {
            AppError::Internal(format!("Stored grade has invalid category '{}'", category))
        })?;

        Ok(Self {
            id: db.id.unwrap_or_default(),
            subject_id: db.subject_id.unwrap_or_default(),
            value: db.value.unwrap_or_default(),
            weight: db.weight.unwrap_or_default(),
            category,
            date: db.date.unwrap_or_default(),
            notes: db.notes.filter(|n| !n.is_empty()),
        })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Class {
    pub id: i64,
    pub teacher_id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbClass {
    pub id: Option<i64>,
    pub teacher_id: Option<i64>,
    pub name: Option<String>,
    pub created_at: Option<NaiveDateTime>,
}

impl From<DbClass> for Class {
    fn from(db: DbClass) -> Self {
        Self {
            id: db.id.unwrap_or_default(),
            teacher_id: db.teacher_id.unwrap_or_default(),
            name: db.name.unwrap_or_default(),
            created_at: db
                .created_at
                .map(|dt| DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc))
                .unwrap_or_else(Utc::now),
        }
    }
}

const MIN_GRADE_VALUE: f64 = 1.0;
const MAX_GRADE_VALUE: f64 = 6.0;
const MIN_ORAL_WEIGHT: f64 = 0.5;
const MIN_WRITTEN_WEIGHT: f64 = 1.0;
const MAX_GRADE_WEIGHT: f64 = 3.0;
const MAX_SUBJECT_NAME: usize = 100;
const MAX_GRADE_LEVEL: i64 = 13;

fn is_half_step(value: f64) -> bool {
    value.is_finite() && (value * 2.0).fract() == 0.0
}

/// A grade as entered by a user or read from a spreadsheet row.
#[derive(Debug, Clone, PartialEq)]
pub struct GradeInput {
    pub value: f64,
    pub weight: f64,
    pub category: GradeCategory,
    pub date: NaiveDate,
    pub notes: Option<String>,
}

impl GradeInput {
    /// Range rules of the grade entry form: values 1 to 6, oral weights
    /// 0.5 to 3, written weights 1 to 3, everything in half steps.
    pub fn check(&self) -> Result<(), AppError> {
        if !is_half_step(self.value) || !(MIN_GRADE_VALUE..=MAX_GRADE_VALUE).contains(&self.value)
        {
            return Err(AppError::Validation(format!(
                "Grade value {} must be between 1 and 6 in steps of 0.5",
                self.value
            )));
        }

        let min_weight = match self.category {
            GradeCategory::Oral => MIN_ORAL_WEIGHT,
            GradeCategory::Written => MIN_WRITTEN_WEIGHT,
        };
        if !is_half_step(self.weight) || !(min_weight..=MAX_GRADE_WEIGHT).contains(&self.weight) {
            return Err(AppError::Validation(format!(
                "Weight {} of a {} grade must be between {} and {} in steps of 0.5",
                self.weight, self.category, min_weight, MAX_GRADE_WEIGHT
            )));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubjectInput {
    pub name: String,
    pub kind: SubjectKind,
    pub written_weight: u8,
    pub grade_level: i64,
}

impl SubjectInput {
    pub fn check(&self) -> Result<(), AppError> {
        let name = self.name.trim();
        if name.is_empty() || name.chars().count() > MAX_SUBJECT_NAME {
            return Err(AppError::Validation(format!(
                "Subject name must be between 1 and {} characters",
                MAX_SUBJECT_NAME
            )));
        }
        if !matches!(self.written_weight, 1 | 2) {
            return Err(AppError::Validation(format!(
                "Written weight must be 1 or 2, got {}",
                self.written_weight
            )));
        }
        if !(1..=MAX_GRADE_LEVEL).contains(&self.grade_level) {
            return Err(AppError::Validation(format!(
                "Grade level must be between 1 and {}",
                MAX_GRADE_LEVEL
            )));
        }
        Ok(())
    }
}
