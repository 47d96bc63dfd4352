//! CSV import and export of a student's grades.
//!
//! One row per grade with the columns
//! `subject,kind,value,weight,category,date,notes`. Imports are all or
//! nothing: every row is parsed and checked before anything is written.

use std::collections::HashMap;

use chrono::NaiveDate;
use csv::{ReaderBuilder, Trim, WriterBuilder};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::error::AppError;
use crate::models::{
    DEFAULT_GRADE_LEVEL, DEFAULT_WRITTEN_WEIGHT, GradeCategory, GradeInput, Subject, SubjectInput,
    SubjectKind,
};

const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%d.%m.%Y"];
const EXPORT_DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("Spreadsheet could not be read: {0}")]
    Malformed(#[from] csv::Error),

    #[error("Row {row}: {message}")]
    InvalidRow { row: usize, message: String },

    #[error("Spreadsheet contains no grades")]
    Empty,
}

impl From<ImportError> for AppError {
    fn from(error: ImportError) -> Self {
        AppError::Validation(error.to_string())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SpreadsheetRow {
    subject: String,
    kind: String,
    value: String,
    weight: String,
    category: String,
    date: String,
    #[serde(default)]
    notes: String,
}

/// Defaults applied to subjects an import has to create.
#[derive(Debug, Clone, Copy)]
pub struct ImportDefaults {
    pub written_weight: u8,
    pub grade_level: i64,
}

impl Default for ImportDefaults {
    fn default() -> Self {
        Self {
            written_weight: DEFAULT_WRITTEN_WEIGHT,
            grade_level: DEFAULT_GRADE_LEVEL,
        }
    }
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(raw.trim(), format).ok())
}

fn parse_number(raw: &str, column: &str) -> Result<f64, String> {
    // Spreadsheets saved with a German locale use a decimal comma
    raw.trim()
        .replace(',', ".")
        .parse::<f64>()
        .map_err(|_| format!("{} '{}' is not a number", column, raw))
}

fn parse_row(
    row: SpreadsheetRow,
    defaults: ImportDefaults,
) -> Result<(SubjectInput, GradeInput), String> {
    let kind: SubjectKind = row.kind.parse().map_err(|e: AppError| e.to_string())?;
    let category: GradeCategory = row.category.parse().map_err(|e: AppError| e.to_string())?;
    let value = parse_number(&row.value, "value")?;
    let weight = parse_number(&row.weight, "weight")?;
    let date = parse_date(&row.date)
        .ok_or_else(|| format!("date '{}' is not YYYY-MM-DD or DD.MM.YYYY", row.date))?;

    let subject = SubjectInput {
        name: row.subject.trim().to_string(),
        kind,
        written_weight: defaults.written_weight,
        grade_level: defaults.grade_level,
    };
    subject.check().map_err(|e| e.to_string())?;

    let notes = row.notes.trim();
    let grade = GradeInput {
        value,
        weight,
        category,
        date,
        notes: (!notes.is_empty()).then(|| notes.to_string()),
    };
    grade.check().map_err(|e| e.to_string())?;

    Ok((subject, grade))
}

/// Parses CSV text into subject and grade inputs, rejecting the whole
/// document on the first invalid row.
#[instrument(skip(data), fields(bytes = data.len()))]
pub fn parse_grades_csv(
    data: &str,
    defaults: ImportDefaults,
) -> Result<Vec<(SubjectInput, GradeInput)>, ImportError> {
    let mut reader = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .from_reader(data.as_bytes());
    reader.headers()?;

    let mut rows = Vec::new();
    let mut kinds: HashMap<String, SubjectKind> = HashMap::new();
    for (index, record) in reader.deserialize::<SpreadsheetRow>().enumerate() {
        // Header is line 1
        let row = index + 2;
        let record = record.map_err(|e| ImportError::InvalidRow {
            row,
            message: e.to_string(),
        })?;

        let (subject, grade) =
            parse_row(record, defaults).map_err(|message| ImportError::InvalidRow { row, message })?;

        // A subject keeps one kind across the whole sheet
        let first_kind = *kinds.entry(subject.name.clone()).or_insert(subject.kind);
        if first_kind != subject.kind {
            return Err(ImportError::InvalidRow {
                row,
                message: format!(
                    "subject '{}' is listed as {} here but as {} earlier",
                    subject.name, subject.kind, first_kind
                ),
            });
        }

        rows.push((subject, grade));
    }

    if rows.is_empty() {
        return Err(ImportError::Empty);
    }

    debug!(rows = rows.len(), "Parsed grade spreadsheet");
    Ok(rows)
}

/// Renders every grade of the given subjects as CSV, ordered by subject name
/// and then by date.
#[instrument(skip(subjects), fields(subjects = subjects.len()))]
pub fn export_grades_csv(subjects: &[Subject]) -> Result<String, AppError> {
    let mut ordered: Vec<&Subject> = subjects.iter().collect();
    ordered.sort_by(|a, b| a.name.cmp(&b.name));

    let mut writer = WriterBuilder::new().has_headers(true).from_writer(Vec::new());

    for subject in ordered {
        let mut grades: Vec<_> = subject.grades.iter().collect();
        grades.sort_by(|a, b| a.date.cmp(&b.date).then(a.id.cmp(&b.id)));

        for grade in grades {
            writer.serialize(SpreadsheetRow {
                subject: subject.name.clone(),
                kind: subject.kind.to_string(),
                value: grade.value.to_string(),
                weight: grade.weight.to_string(),
                category: grade.category.to_string(),
                date: grade.date.format(EXPORT_DATE_FORMAT).to_string(),
                notes: grade.notes.clone().unwrap_or_default(),
            })?;
        }
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| AppError::Internal(format!("Failed to flush spreadsheet: {}", e)))?;

    String::from_utf8(bytes)
        .map_err(|e| AppError::Internal(format!("Spreadsheet is not valid UTF-8: {}", e)))
}
