use rocket::State;
use rocket::http::Status;
use rocket::response::status::Custom;
use rocket::serde::{Deserialize, Serialize, json::Json};
use sqlx::{Pool, Sqlite};
use validator::Validate;

use crate::aggregator::{format_average, overall_average};
use crate::auth::{Permission, Role, User};
use crate::db::{
    add_student_to_class, create_class, delete_class, find_user_by_username, get_class,
    get_class_students, get_classes_for_teacher, get_subjects_for_student,
    remove_student_from_class,
};
use crate::error::AppError;
use crate::models::Class;
use crate::validation::{
    AppErrorExt, JsonValidateExt, PermissionCheckExt, ValidationResponse, ValidationResult,
};

use super::UserData;
use super::subjects::CreatedResponse;

#[derive(Deserialize, Validate)]
pub struct ClassRequest {
    #[validate(length(min = 1, max = 64, message = "Class name must be 1 to 64 characters"))]
    name: String,
}

#[derive(Deserialize, Validate)]
pub struct ClassStudentRequest {
    #[validate(length(min = 1, message = "Username is required"))]
    username: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ClassMember {
    pub student: UserData,
    pub overall_average: f64,
    pub display_overall_average: String,
    pub subject_count: usize,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ClassDetail {
    pub class: Class,
    pub students: Vec<ClassMember>,
}

/// Loads a class that `user` is allowed to manage.
async fn owned_class(db: &Pool<Sqlite>, user: &User, class_id: i64) -> Result<Class, AppError> {
    let class = get_class(db, class_id).await?;
    if class.teacher_id != user.id && !user.is_admin() {
        return Err(AppError::Authorization(format!(
            "Class {} belongs to another teacher",
            class_id
        )));
    }
    Ok(class)
}

#[get("/classes")]
pub async fn api_get_classes(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ValidationResult<Json<Vec<Class>>> {
    user.require_permission(Permission::ManageClasses)
        .validate_custom()?;

    let classes = get_classes_for_teacher(db, user.id)
        .await
        .validate_custom()?;

    Ok(Json(classes))
}

#[post("/classes", data = "<class>")]
pub async fn api_create_class(
    class: Json<ClassRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ValidationResult<Custom<Json<CreatedResponse>>> {
    let validated = class.validate_custom()?;

    user.require_permission(Permission::ManageClasses)
        .validate_custom()?;

    let id = create_class(db, user.id, &validated.name)
        .await
        .validate_custom()?;

    Ok(Custom(Status::Created, Json(CreatedResponse { id })))
}

#[get("/classes/<id>")]
pub async fn api_get_class(
    id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ValidationResult<Json<ClassDetail>> {
    user.require_permission(Permission::ManageClasses)
        .validate_custom()?;

    let class = owned_class(db, &user, id).await.validate_custom()?;
    let students = get_class_students(db, id).await.validate_custom()?;

    let mut members = Vec::with_capacity(students.len());
    for student in students {
        let subjects = get_subjects_for_student(db, student.id)
            .await
            .validate_custom()?;
        let overall = overall_average(&subjects);

        members.push(ClassMember {
            student: UserData::from(student),
            overall_average: overall,
            display_overall_average: format_average(overall),
            subject_count: subjects.len(),
        });
    }

    Ok(Json(ClassDetail {
        class,
        students: members,
    }))
}

#[delete("/classes/<id>")]
pub async fn api_delete_class(
    id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ValidationResult<Status> {
    user.require_permission(Permission::ManageClasses)
        .validate_custom()?;

    owned_class(db, &user, id).await.validate_custom()?;
    delete_class(db, id).await.validate_custom()?;

    Ok(Status::NoContent)
}

#[post("/classes/<id>/students", data = "<student>")]
pub async fn api_add_class_student(
    id: i64,
    student: Json<ClassStudentRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ValidationResult<Status> {
    let validated = student.validate_custom()?;

    user.require_permission(Permission::ManageClasses)
        .validate_custom()?;

    owned_class(db, &user, id).await.validate_custom()?;

    let student = find_user_by_username(db, validated.username.trim())
        .await
        .validate_custom()?
        .ok_or_else(|| {
            AppError::NotFound(format!("No user named {}", validated.username.trim()))
        })
        .validate_custom()?;

    if student.role != Role::Student {
        return Err(Custom(
            Status::UnprocessableEntity,
            Json(ValidationResponse::with_error(
                "username",
                "Only students can join a class",
            )),
        ));
    }

    add_student_to_class(db, id, student.id)
        .await
        .validate_custom()?;

    Ok(Status::Ok)
}

#[delete("/classes/<id>/students/<student_id>")]
pub async fn api_remove_class_student(
    id: i64,
    student_id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ValidationResult<Status> {
    user.require_permission(Permission::ManageClasses)
        .validate_custom()?;

    owned_class(db, &user, id).await.validate_custom()?;
    remove_student_from_class(db, id, student_id)
        .await
        .validate_custom()?;

    Ok(Status::NoContent)
}
