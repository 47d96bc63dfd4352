use sqlx::{Pool, Sqlite};
use tracing::{instrument, warn};

use crate::auth::{Permission, User};
use crate::db::{get_subject, is_following, teacher_has_student};
use crate::error::AppError;
use crate::models::Subject;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Subjects, grades and exports.
    Read,
    /// Averages overview, which followers may also see.
    Overview,
    Write,
}

/// Checks whether `user` may act on the grade data of `student_id`.
///
/// Users own their data, teachers reach the students of their classes,
/// admins reach everyone, and followers may only look at the overview.
#[instrument(skip(pool, user), fields(user_id = user.id))]
pub async fn ensure_student_access(
    pool: &Pool<Sqlite>,
    user: &User,
    student_id: i64,
    access: Access,
) -> Result<(), AppError> {
    let own = user.id == student_id;
    let own_permission = match access {
        Access::Write => Permission::EditOwnGrades,
        Access::Read | Access::Overview => Permission::ViewOwnGrades,
    };
    if own && user.has_permission(own_permission) {
        return Ok(());
    }

    if user.has_permission(Permission::ViewAllStudents) {
        return Ok(());
    }

    if user.has_permission(Permission::ManageClassGrades)
        && teacher_has_student(pool, user.id, student_id).await?
    {
        return Ok(());
    }

    if access == Access::Overview && is_following(pool, user.id, student_id).await? {
        return Ok(());
    }

    warn!(username = %user.username, ?access, "Student access denied");
    Err(AppError::Authorization(format!(
        "No {:?} access to grades of user {}",
        access, student_id
    )))
}

/// Loads a subject after checking that `user` may act on its owner's data.
pub async fn subject_with_access(
    pool: &Pool<Sqlite>,
    user: &User,
    subject_id: i64,
    access: Access,
) -> Result<Subject, AppError> {
    let subject = get_subject(pool, subject_id).await?;
    ensure_student_access(pool, user, subject.student_id, access).await?;
    Ok(subject)
}
