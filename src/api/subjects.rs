use chrono::NaiveDate;
use rocket::State;
use rocket::data::{Data, ToByteUnit};
use rocket::http::{ContentType, Status};
use rocket::response::status::Custom;
use rocket::serde::{Deserialize, Serialize, json::Json};
use sqlx::{Pool, Sqlite};
use tracing::info;
use validator::{Validate, ValidationError};

use crate::access::{Access, ensure_student_access, subject_with_access};
use crate::achievements::unlocked_achievements;
use crate::aggregator::{SubjectSummary, format_average, overall_average, subject_summary};
use crate::auth::User;
use crate::config::GradingConfig;
use crate::db::{
    ImportSummary, add_grade, create_subject, delete_grade, delete_subject, get_grade,
    get_subjects_for_student, get_user, import_grades, update_grade, update_subject,
};
use crate::error::AppError;
use crate::models::{Grade, GradeCategory, GradeInput, SubjectInput, SubjectKind};
use crate::spreadsheet::{export_grades_csv, parse_grades_csv};
use crate::validation::{
    AppErrorExt, JsonValidateExt, ValidationResponse, ValidationResult, domain_error,
};

use super::UserData;

const MAX_IMPORT_SIZE_MIB: u64 = 2;

#[derive(Deserialize, Validate)]
pub struct SubjectRequest {
    #[validate(length(min = 1, max = 100, message = "Subject name must be 1 to 100 characters"))]
    name: String,
    kind: SubjectKind,
    #[validate(range(min = 1, max = 2, message = "Written weight must be 1 or 2"))]
    written_weight: Option<u8>,
    #[validate(range(min = 1, max = 13, message = "Grade level must be between 1 and 13"))]
    grade_level: Option<i64>,
}

impl SubjectRequest {
    fn into_input(self, grading: &GradingConfig) -> SubjectInput {
        SubjectInput {
            name: self.name.trim().to_string(),
            kind: self.kind,
            written_weight: self
                .written_weight
                .unwrap_or(grading.default_written_weight),
            grade_level: self.grade_level.unwrap_or(grading.default_grade_level),
        }
    }
}

#[derive(Deserialize, Validate)]
#[validate(schema(function = "validate_grade_request"))]
pub struct GradeRequest {
    #[validate(range(min = 1.0, max = 6.0, message = "Grades range from 1 to 6"))]
    value: f64,
    weight: f64,
    category: GradeCategory,
    date: NaiveDate,
    #[validate(length(max = 500, message = "Notes are limited to 500 characters"))]
    notes: Option<String>,
}

impl GradeRequest {
    fn to_input(&self) -> GradeInput {
        GradeInput {
            value: self.value,
            weight: self.weight,
            category: self.category,
            date: self.date,
            notes: self
                .notes
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(String::from),
        }
    }
}

fn validate_grade_request(request: &GradeRequest) -> Result<(), ValidationError> {
    request
        .to_input()
        .check()
        .map_err(|e| domain_error("grade_range", e))
}

#[derive(Serialize, Deserialize, Debug)]
pub struct CreatedResponse {
    pub id: i64,
}

#[derive(Serialize)]
pub struct SubjectResponse {
    pub id: i64,
    pub name: String,
    pub kind: SubjectKind,
    pub written_weight: u8,
    pub grade_level: i64,
    pub grades: Vec<Grade>,
    pub summary: SubjectSummary,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct AchievementResponse {
    pub id: String,
    pub title: String,
}

#[derive(Serialize)]
pub struct OverviewResponse {
    pub student: UserData,
    pub subjects: Vec<SubjectSummary>,
    pub overall_average: f64,
    pub display_overall_average: String,
    pub achievements: Vec<AchievementResponse>,
}

fn created(id: i64) -> Custom<Json<CreatedResponse>> {
    Custom(Status::Created, Json(CreatedResponse { id }))
}

#[get("/student/<student_id>/subjects")]
pub async fn api_get_subjects(
    student_id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ValidationResult<Json<Vec<SubjectResponse>>> {
    ensure_student_access(db, &user, student_id, Access::Read)
        .await
        .validate_custom()?;

    let subjects = get_subjects_for_student(db, student_id)
        .await
        .validate_custom()?;

    let responses = subjects
        .into_iter()
        .map(|subject| {
            let summary = subject_summary(&subject);
            SubjectResponse {
                id: subject.id,
                name: subject.name,
                kind: subject.kind,
                written_weight: subject.written_weight,
                grade_level: subject.grade_level,
                grades: subject.grades,
                summary,
            }
        })
        .collect();

    Ok(Json(responses))
}

#[post("/student/<student_id>/subjects", data = "<subject>")]
pub async fn api_create_subject(
    student_id: i64,
    subject: Json<SubjectRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
    grading: &State<GradingConfig>,
) -> ValidationResult<Custom<Json<CreatedResponse>>> {
    let input = subject.validate_custom()?.into_input(grading);
    input.check().validate_custom()?;

    ensure_student_access(db, &user, student_id, Access::Write)
        .await
        .validate_custom()?;

    let id = create_subject(db, student_id, &input)
        .await
        .validate_custom()?;

    Ok(created(id))
}

#[put("/subjects/<id>", data = "<subject>")]
pub async fn api_update_subject(
    id: i64,
    subject: Json<SubjectRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
    grading: &State<GradingConfig>,
) -> ValidationResult<Status> {
    let request = subject.validate_custom()?;

    let existing = subject_with_access(db, &user, id, Access::Write)
        .await
        .validate_custom()?;

    // Omitted optional fields keep their stored values
    let input = SubjectInput {
        written_weight: request.written_weight.unwrap_or(existing.written_weight),
        grade_level: request.grade_level.unwrap_or(existing.grade_level),
        ..request.into_input(grading)
    };
    input.check().validate_custom()?;

    update_subject(db, id, &input).await.validate_custom()?;

    Ok(Status::Ok)
}

#[delete("/subjects/<id>")]
pub async fn api_delete_subject(
    id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ValidationResult<Status> {
    subject_with_access(db, &user, id, Access::Write)
        .await
        .validate_custom()?;

    delete_subject(db, id).await.validate_custom()?;

    Ok(Status::NoContent)
}

#[post("/subjects/<subject_id>/grades", data = "<grade>")]
pub async fn api_add_grade(
    subject_id: i64,
    grade: Json<GradeRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ValidationResult<Custom<Json<CreatedResponse>>> {
    let request = grade.validate_custom()?;

    subject_with_access(db, &user, subject_id, Access::Write)
        .await
        .validate_custom()?;

    let id = add_grade(db, subject_id, &request.to_input())
        .await
        .validate_custom()?;

    Ok(created(id))
}

#[put("/grades/<id>", data = "<grade>")]
pub async fn api_update_grade(
    id: i64,
    grade: Json<GradeRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ValidationResult<Status> {
    let request = grade.validate_custom()?;

    let existing = get_grade(db, id).await.validate_custom()?;
    subject_with_access(db, &user, existing.subject_id, Access::Write)
        .await
        .validate_custom()?;

    update_grade(db, id, &request.to_input())
        .await
        .validate_custom()?;

    Ok(Status::Ok)
}

#[delete("/grades/<id>")]
pub async fn api_delete_grade(
    id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ValidationResult<Status> {
    let existing = get_grade(db, id).await.validate_custom()?;
    subject_with_access(db, &user, existing.subject_id, Access::Write)
        .await
        .validate_custom()?;

    delete_grade(db, id).await.validate_custom()?;

    Ok(Status::NoContent)
}

#[get("/student/<student_id>/overview")]
pub async fn api_get_overview(
    student_id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ValidationResult<Json<OverviewResponse>> {
    ensure_student_access(db, &user, student_id, Access::Overview)
        .await
        .validate_custom()?;

    let student = get_user(db, student_id).await.validate_custom()?;
    let subjects = get_subjects_for_student(db, student_id)
        .await
        .validate_custom()?;

    let overall = overall_average(&subjects);
    let achievements = unlocked_achievements(&subjects)
        .into_iter()
        .map(|a| AchievementResponse {
            id: a.id().to_string(),
            title: a.title().to_string(),
        })
        .collect();

    Ok(Json(OverviewResponse {
        student: UserData::from(student),
        subjects: subjects.iter().map(subject_summary).collect(),
        overall_average: overall,
        display_overall_average: format_average(overall),
        achievements,
    }))
}

#[get("/student/<student_id>/export")]
pub async fn api_export_grades(
    student_id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ValidationResult<(ContentType, String)> {
    ensure_student_access(db, &user, student_id, Access::Read)
        .await
        .validate_custom()?;

    let subjects = get_subjects_for_student(db, student_id)
        .await
        .validate_custom()?;

    let csv = export_grades_csv(&subjects).validate_custom()?;

    Ok((ContentType::CSV, csv))
}

#[post("/student/<student_id>/import", data = "<data>")]
pub async fn api_import_grades(
    student_id: i64,
    data: Data<'_>,
    user: User,
    db: &State<Pool<Sqlite>>,
    grading: &State<GradingConfig>,
) -> ValidationResult<Json<ImportSummary>> {
    ensure_student_access(db, &user, student_id, Access::Write)
        .await
        .validate_custom()?;

    let body = data
        .open(MAX_IMPORT_SIZE_MIB.mebibytes())
        .into_string()
        .await
        .map_err(|e| AppError::Validation(format!("Spreadsheet could not be read: {}", e)))
        .validate_custom()?;

    if !body.is_complete() {
        return Err(Custom(
            Status::PayloadTooLarge,
            Json(ValidationResponse::with_error(
                "file",
                "Spreadsheet exceeds the upload limit",
            )),
        ));
    }

    let rows = parse_grades_csv(&body.into_inner(), grading.import_defaults())
        .map_err(AppError::from)
        .validate_custom()?;

    let summary = import_grades(db, student_id, &rows)
        .await
        .validate_custom()?;

    info!(
        student_id,
        grades = summary.grades_imported,
        subjects = summary.subjects_created,
        "Imported grade spreadsheet"
    );

    Ok(Json(summary))
}
