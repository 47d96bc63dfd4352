//! Weighted grade averages on the German 1.0 to 6.0 scale.
//!
//! Every function here is pure: no I/O, no shared state, and identical input
//! always yields an identical result. Averages are rounded to two decimals at
//! each stage, so a main subject blends the already rounded written and oral
//! sub-averages.
//!
//! Grades with a non-finite value, or a weight that is not a finite number
//! greater than zero, are skipped. An input with nothing left to average
//! produces `0.0`, the same value the grade views display for "no grades".

use serde::Serialize;

use crate::models::{Grade, GradeCategory, Subject, SubjectKind};

/// Rounds to two decimals, half away from zero.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Fixed two-decimal display form of an average.
pub fn format_average(value: f64) -> String {
    format!("{:.2}", round2(value))
}

fn counts(grade: &Grade) -> bool {
    grade.value.is_finite() && grade.weight.is_finite() && grade.weight > 0.0
}

/// `sum(value * weight) / sum(weight)` over all grades, category ignored.
pub fn subject_average<'a, I>(grades: I) -> f64
where
    I: IntoIterator<Item = &'a Grade>,
{
    let (weighted_sum, total_weight) = grades
        .into_iter()
        .filter(|g| counts(g))
        .fold((0.0, 0.0), |(sum, weight), g| {
            (sum + g.value * g.weight, weight + g.weight)
        });

    if total_weight == 0.0 {
        return 0.0;
    }

    round2(weighted_sum / total_weight)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MainSubjectAverages {
    pub written: f64,
    pub oral: f64,
    pub total: f64,
}

/// Written and oral sub-averages of a main subject plus their blend.
///
/// The written average counts `written_weight` times as much as the oral one.
/// A category without grades reports `0.0` and is left out of the blend, so
/// `total` is then the other category's average on its own.
pub fn main_subject_averages(grades: &[Grade], written_weight: f64) -> MainSubjectAverages {
    let written_grades: Vec<&Grade> = grades
        .iter()
        .filter(|g| g.category == GradeCategory::Written && counts(g))
        .collect();
    let oral_grades: Vec<&Grade> = grades
        .iter()
        .filter(|g| g.category == GradeCategory::Oral && counts(g))
        .collect();

    let written = subject_average(written_grades.iter().copied());
    let oral = subject_average(oral_grades.iter().copied());

    let total = match (written_grades.is_empty(), oral_grades.is_empty()) {
        (false, false) => round2((oral + written * written_weight) / (1.0 + written_weight)),
        (false, true) => written,
        (true, false) => oral,
        (true, true) => 0.0,
    };

    MainSubjectAverages {
        written,
        oral,
        total,
    }
}

fn mean(values: &[f64]) -> f64 {
    let count = if values.is_empty() { 1 } else { values.len() };
    values.iter().sum::<f64>() / count as f64
}

/// Student-wide average with main subjects counted double.
///
/// Each subject contributes its flat weighted average. The result is always
/// `(main * 2 + secondary) / 3`, even when one kind of subject is missing and
/// its mean is therefore `0.0`.
pub fn overall_average(subjects: &[Subject]) -> f64 {
    let (main, secondary): (Vec<&Subject>, Vec<&Subject>) = subjects
        .iter()
        .partition(|s| s.kind == SubjectKind::Main);

    let main_averages: Vec<f64> = main.iter().map(|s| subject_average(&s.grades)).collect();
    let secondary_averages: Vec<f64> = secondary
        .iter()
        .map(|s| subject_average(&s.grades))
        .collect();

    round2((mean(&main_averages) * 2.0 + mean(&secondary_averages)) / 3.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Improving,
    Declining,
    Stable,
}

/// Direction of the latest grade relative to the average before it.
///
/// Lower is better on this scale, so a falling average is an improvement.
pub fn grade_trend(grades: &[Grade]) -> Trend {
    let mut ordered: Vec<&Grade> = grades.iter().filter(|g| counts(g)).collect();
    if ordered.len() < 2 {
        return Trend::Stable;
    }
    ordered.sort_by(|a, b| a.date.cmp(&b.date).then(a.id.cmp(&b.id)));

    let current = subject_average(ordered.iter().copied());
    let previous = subject_average(ordered[..ordered.len() - 1].iter().copied());

    if current < previous {
        Trend::Improving
    } else if current > previous {
        Trend::Declining
    } else {
        Trend::Stable
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubjectSummary {
    pub subject_id: i64,
    pub name: String,
    pub kind: SubjectKind,
    pub average: f64,
    pub display_average: String,
    pub written: Option<f64>,
    pub oral: Option<f64>,
    pub grade_count: usize,
    pub trend: Trend,
}

/// Numbers shown next to a subject in the grade overview.
pub fn subject_summary(subject: &Subject) -> SubjectSummary {
    let (average, written, oral) = match subject.kind {
        SubjectKind::Main => {
            let averages =
                main_subject_averages(&subject.grades, f64::from(subject.written_weight));
            (averages.total, Some(averages.written), Some(averages.oral))
        }
        SubjectKind::Secondary => (subject_average(&subject.grades), None, None),
    };

    SubjectSummary {
        subject_id: subject.id,
        name: subject.name.clone(),
        kind: subject.kind,
        average,
        display_average: format_average(average),
        written,
        oral,
        grade_count: subject.grades.len(),
        trend: grade_trend(&subject.grades),
    }
}
