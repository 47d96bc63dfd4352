use serde::Serialize;

use crate::aggregator::{Trend, grade_trend, overall_average};
use crate::models::Subject;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Achievement {
    FirstGrade,
    TenGrades,
    PerfectGrade,
    AllRounder,
    TopStudent,
    SteadyClimber,
}

impl Achievement {
    /// Stable identifier, identical to the serialized form.
    pub fn id(&self) -> &'static str {
        match self {
            Achievement::FirstGrade => "first_grade",
            Achievement::TenGrades => "ten_grades",
            Achievement::PerfectGrade => "perfect_grade",
            Achievement::AllRounder => "all_rounder",
            Achievement::TopStudent => "top_student",
            Achievement::SteadyClimber => "steady_climber",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Achievement::FirstGrade => "First grade recorded",
            Achievement::TenGrades => "Ten grades recorded",
            Achievement::PerfectGrade => "A perfect 1.0",
            Achievement::AllRounder => "Five or more subjects",
            Achievement::TopStudent => "Overall average of 1.5 or better",
            Achievement::SteadyClimber => "Improving in a subject",
        }
    }
}

const TEN_GRADES: usize = 10;
const ALL_ROUNDER_SUBJECTS: usize = 5;
const TOP_STUDENT_AVERAGE: f64 = 1.5;

/// Achievements earned by the given set of subjects, in declaration order.
pub fn unlocked_achievements(subjects: &[Subject]) -> Vec<Achievement> {
    let grade_count: usize = subjects.iter().map(|s| s.grades.len()).sum();
    let overall = overall_average(subjects);

    let mut unlocked = Vec::new();

    if grade_count >= 1 {
        unlocked.push(Achievement::FirstGrade);
    }
    if grade_count >= TEN_GRADES {
        unlocked.push(Achievement::TenGrades);
    }
    if subjects
        .iter()
        .flat_map(|s| s.grades.iter())
        .any(|g| g.value == 1.0)
    {
        unlocked.push(Achievement::PerfectGrade);
    }
    if subjects.len() >= ALL_ROUNDER_SUBJECTS {
        unlocked.push(Achievement::AllRounder);
    }
    if overall > 0.0 && overall <= TOP_STUDENT_AVERAGE {
        unlocked.push(Achievement::TopStudent);
    }
    if subjects
        .iter()
        .any(|s| grade_trend(&s.grades) == Trend::Improving)
    {
        unlocked.push(Achievement::SteadyClimber);
    }

    unlocked
}
