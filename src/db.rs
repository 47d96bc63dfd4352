use std::collections::HashMap;

use chrono::{NaiveDateTime, Utc};
use sqlx::{Pool, Sqlite};
use tracing::{info, instrument};

use crate::auth::{DbUser, DbUserSession, Role, User, UserSession};
use crate::error::AppError;
use crate::models::{
    Class, DbClass, DbGrade, DbSubject, Grade, GradeInput, Subject, SubjectInput, SubjectKind,
};

const USER_COLUMNS: &str = "id, username, role, display_name";
const SUBJECT_COLUMNS: &str = "id, student_id, name, kind, written_weight, grade_level";
const GRADE_COLUMNS: &str = "id, subject_id, value, weight, category, date, notes";

fn to_users(rows: Vec<DbUser>) -> Result<Vec<User>, AppError> {
    rows.into_iter().map(User::try_from).collect()
}

/// Turns a UNIQUE violation into a conflict. Existence checks run before
/// inserts, so this only fires when a concurrent write wins the race.
pub(crate) fn unique_conflict(err: sqlx::Error, message: impl FnOnce() -> String) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            AppError::Conflict(message())
        }
        _ => AppError::Database(err),
    }
}

#[instrument(skip(pool))]
pub async fn get_user(pool: &Pool<Sqlite>, id: i64) -> Result<User, AppError> {
    info!("Fetching user by ID");
    let row = sqlx::query_as::<_, DbUser>(&format!(
        "SELECT {} FROM users WHERE id = ?",
        USER_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(user) => User::try_from(user),
        _ => Err(AppError::NotFound(format!(
            "User with id {} not found in database",
            id
        ))),
    }
}

#[instrument(skip(pool))]
pub async fn find_user_by_username(
    pool: &Pool<Sqlite>,
    username: &str,
) -> Result<Option<User>, AppError> {
    info!("Finding user by username");
    let row = sqlx::query_as::<_, DbUser>(&format!(
        "SELECT {} FROM users WHERE username = ?",
        USER_COLUMNS
    ))
    .bind(username)
    .fetch_optional(pool)
    .await?;

    row.map(User::try_from).transpose()
}

/// Makes `%`, `_` and `\` match themselves in a `LIKE ... ESCAPE '\'` pattern.
fn escape_like(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len());
    for c in query.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[instrument(skip(pool))]
pub async fn search_users(
    pool: &Pool<Sqlite>,
    query: &str,
    limit: i64,
) -> Result<Vec<User>, AppError> {
    info!("Searching users");
    let pattern = format!("%{}%", escape_like(query.trim()));
    let rows = sqlx::query_as::<_, DbUser>(&format!(
        "SELECT {} FROM users
         WHERE username LIKE ? ESCAPE '\\' OR display_name LIKE ? ESCAPE '\\'
         ORDER BY username
         LIMIT ?",
        USER_COLUMNS
    ))
    .bind(&pattern)
    .bind(&pattern)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    to_users(rows)
}

#[instrument(skip_all, fields(username = %username))]
pub async fn authenticate_user(
    pool: &Pool<Sqlite>,
    username: &str,
    password: &str,
) -> Result<Option<User>, AppError> {
    info!("Authenticating user");
    let hash = sqlx::query_scalar::<_, String>("SELECT password FROM users WHERE username = ?")
        .bind(username)
        .fetch_optional(pool)
        .await?;

    let Some(hash) = hash else {
        return Ok(None);
    };

    if bcrypt::verify(password, &hash).unwrap_or(false) {
        find_user_by_username(pool, username).await
    } else {
        Ok(None)
    }
}

#[instrument(skip_all, fields(username = %username, role = %role))]
pub async fn create_user(
    pool: &Pool<Sqlite>,
    username: &str,
    password: &str,
    role: Role,
    display_name: Option<&str>,
) -> Result<i64, AppError> {
    info!("Creating new user");

    if find_user_by_username(pool, username).await?.is_some() {
        return Err(AppError::Conflict(format!(
            "Username '{}' already exists",
            username
        )));
    }

    let hashed_password = bcrypt::hash(password, bcrypt::DEFAULT_COST)?;

    let res = sqlx::query(
        "INSERT INTO users (username, password, role, display_name) VALUES (?, ?, ?, ?)",
    )
    .bind(username)
    .bind(hashed_password)
    .bind(role.as_str())
    .bind(display_name.unwrap_or(username))
    .execute(pool)
    .await
    .map_err(|e| unique_conflict(e, || format!("Username '{}' already exists", username)))?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool))]
pub async fn update_user_display_name(
    pool: &Pool<Sqlite>,
    user_id: i64,
    display_name: &str,
) -> Result<(), AppError> {
    info!("Updating user display name");
    sqlx::query("UPDATE users SET display_name = ? WHERE id = ?")
        .bind(display_name)
        .bind(user_id)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip_all, fields(user_id = %user_id))]
pub async fn update_user_password(
    pool: &Pool<Sqlite>,
    user_id: i64,
    new_password: &str,
) -> Result<(), AppError> {
    info!("Updating user password");
    let hashed_password = bcrypt::hash(new_password, bcrypt::DEFAULT_COST)?;

    sqlx::query("UPDATE users SET password = ? WHERE id = ?")
        .bind(hashed_password)
        .bind(user_id)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip(pool, token))]
pub async fn create_user_session(
    pool: &Pool<Sqlite>,
    user_id: i64,
    token: &str,
    expires_at: NaiveDateTime,
) -> Result<i64, AppError> {
    info!("Creating user session");

    let res = sqlx::query("INSERT INTO user_sessions (user_id, token, expires_at) VALUES (?, ?, ?)")
        .bind(user_id)
        .bind(token)
        .bind(expires_at)
        .execute(pool)
        .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool, token))]
pub async fn get_session_by_token(
    pool: &Pool<Sqlite>,
    token: &str,
) -> Result<UserSession, AppError> {
    info!("Getting session by token");

    let session = sqlx::query_as::<_, DbUserSession>(
        "SELECT id, user_id, token, created_at, expires_at FROM user_sessions WHERE token = ?",
    )
    .bind(token)
    .fetch_optional(pool)
    .await?;

    match session {
        Some(session) => Ok(UserSession::from(session)),
        _ => Err(AppError::Authentication(
            "Invalid session token".to_string(),
        )),
    }
}

#[instrument(skip(pool, token))]
pub async fn invalidate_session(pool: &Pool<Sqlite>, token: &str) -> Result<(), AppError> {
    info!("Invalidating session");

    sqlx::query("DELETE FROM user_sessions WHERE token = ?")
        .bind(token)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn clean_expired_sessions(pool: &Pool<Sqlite>) -> Result<u64, AppError> {
    info!("Cleaning expired sessions");

    let now = Utc::now().naive_utc();

    let result = sqlx::query("DELETE FROM user_sessions WHERE expires_at < ?")
        .bind(now)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

async fn subject_name_taken(
    pool: &Pool<Sqlite>,
    student_id: i64,
    name: &str,
    except_id: Option<i64>,
) -> Result<bool, AppError> {
    let existing = sqlx::query_scalar::<_, i64>(
        "SELECT id FROM subjects WHERE student_id = ? AND name = ? AND id != ?",
    )
    .bind(student_id)
    .bind(name)
    .bind(except_id.unwrap_or(-1))
    .fetch_optional(pool)
    .await?;

    Ok(existing.is_some())
}

#[instrument(skip(pool))]
pub async fn create_subject(
    pool: &Pool<Sqlite>,
    student_id: i64,
    subject: &SubjectInput,
) -> Result<i64, AppError> {
    info!("Creating subject");
    let name = subject.name.trim();

    if subject_name_taken(pool, student_id, name, None).await? {
        return Err(AppError::Conflict(format!(
            "Subject '{}' already exists",
            name
        )));
    }

    let res = sqlx::query(
        "INSERT INTO subjects (student_id, name, kind, written_weight, grade_level)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(student_id)
    .bind(name)
    .bind(subject.kind.as_str())
    .bind(i64::from(subject.written_weight))
    .bind(subject.grade_level)
    .execute(pool)
    .await
    .map_err(|e| unique_conflict(e, || format!("Subject '{}' already exists", name)))?;

    Ok(res.last_insert_rowid())
}

/// Loads a subject without its grades.
#[instrument(skip(pool))]
pub async fn get_subject(pool: &Pool<Sqlite>, id: i64) -> Result<Subject, AppError> {
    info!("Getting subject");
    let row = sqlx::query_as::<_, DbSubject>(&format!(
        "SELECT {} FROM subjects WHERE id = ?",
        SUBJECT_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(subject) => Subject::try_from(subject),
        _ => Err(AppError::NotFound(format!("Subject with id {} not found", id))),
    }
}

#[instrument(skip(pool))]
pub async fn update_subject(
    pool: &Pool<Sqlite>,
    id: i64,
    subject: &SubjectInput,
) -> Result<(), AppError> {
    info!("Updating subject");
    let existing = get_subject(pool, id).await?;
    let name = subject.name.trim();

    if subject_name_taken(pool, existing.student_id, name, Some(id)).await? {
        return Err(AppError::Conflict(format!(
            "Subject '{}' already exists",
            name
        )));
    }

    sqlx::query(
        "UPDATE subjects
         SET name = ?, kind = ?, written_weight = ?, grade_level = ?
         WHERE id = ?",
    )
    .bind(name)
    .bind(subject.kind.as_str())
    .bind(i64::from(subject.written_weight))
    .bind(subject.grade_level)
    .bind(id)
    .execute(pool)
    .await
    .map_err(|e| unique_conflict(e, || format!("Subject '{}' already exists", name)))?;

    Ok(())
}

/// Deletes a subject together with all of its grades.
#[instrument(skip(pool))]
pub async fn delete_subject(pool: &Pool<Sqlite>, id: i64) -> Result<(), AppError> {
    info!("Deleting subject");
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM grades WHERE subject_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    let res = sqlx::query("DELETE FROM subjects WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    if res.rows_affected() == 0 {
        tx.rollback().await?;
        return Err(AppError::NotFound(format!("Subject with id {} not found", id)));
    }

    tx.commit().await?;
    Ok(())
}

/// All subjects of a student ordered by name, each with its grades sorted by date.
#[instrument(skip(pool))]
pub async fn get_subjects_for_student(
    pool: &Pool<Sqlite>,
    student_id: i64,
) -> Result<Vec<Subject>, AppError> {
    info!("Getting subjects for student");
    let subject_rows = sqlx::query_as::<_, DbSubject>(&format!(
        "SELECT {} FROM subjects WHERE student_id = ? ORDER BY name",
        SUBJECT_COLUMNS
    ))
    .bind(student_id)
    .fetch_all(pool)
    .await?;

    let grade_rows = sqlx::query_as::<_, DbGrade>(
        "SELECT g.id, g.subject_id, g.value, g.weight, g.category, g.date, g.notes
         FROM grades g
         JOIN subjects s ON s.id = g.subject_id
         WHERE s.student_id = ?
         ORDER BY g.date, g.id",
    )
    .bind(student_id)
    .fetch_all(pool)
    .await?;

    let mut grades_by_subject: HashMap<i64, Vec<Grade>> = HashMap::new();
    for row in grade_rows {
        let grade = Grade::try_from(row)?;
        grades_by_subject
            .entry(grade.subject_id)
            .or_default()
            .push(grade);
    }

    subject_rows
        .into_iter()
        .map(|row| {
            let mut subject = Subject::try_from(row)?;
            subject.grades = grades_by_subject.remove(&subject.id).unwrap_or_default();
            subject.sort_grades();
            Ok(subject)
        })
        .collect()
}

#[instrument(skip(pool))]
pub async fn add_grade(
    pool: &Pool<Sqlite>,
    subject_id: i64,
    grade: &GradeInput,
) -> Result<i64, AppError> {
    info!("Adding grade");
    let res = sqlx::query(
        "INSERT INTO grades (subject_id, value, weight, category, date, notes)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(subject_id)
    .bind(grade.value)
    .bind(grade.weight)
    .bind(grade.category.as_str())
    .bind(grade.date)
    .bind(grade.notes.as_deref())
    .execute(pool)
    .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool))]
pub async fn get_grade(pool: &Pool<Sqlite>, id: i64) -> Result<Grade, AppError> {
    info!("Getting grade");
    let row = sqlx::query_as::<_, DbGrade>(&format!(
        "SELECT {} FROM grades WHERE id = ?",
        GRADE_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(grade) => Grade::try_from(grade),
        _ => Err(AppError::NotFound(format!("Grade with id {} not found", id))),
    }
}

#[instrument(skip(pool))]
pub async fn update_grade(
    pool: &Pool<Sqlite>,
    id: i64,
    grade: &GradeInput,
) -> Result<(), AppError> {
    info!("Updating grade");
    sqlx::query(
        "UPDATE grades
         SET value = ?, weight = ?, category = ?, date = ?, notes = ?
         WHERE id = ?",
    )
    .bind(grade.value)
    .bind(grade.weight)
    .bind(grade.category.as_str())
    .bind(grade.date)
    .bind(grade.notes.as_deref())
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn delete_grade(pool: &Pool<Sqlite>, id: i64) -> Result<(), AppError> {
    info!("Deleting grade");
    sqlx::query("DELETE FROM grades WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct ImportSummary {
    pub subjects_created: usize,
    pub grades_imported: usize,
}

/// Writes already validated spreadsheet rows in one transaction, creating
/// subjects that do not exist yet.
#[instrument(skip(pool, rows), fields(rows = rows.len()))]
pub async fn import_grades(
    pool: &Pool<Sqlite>,
    student_id: i64,
    rows: &[(SubjectInput, GradeInput)],
) -> Result<ImportSummary, AppError> {
    info!("Importing grades");
    let mut tx = pool.begin().await?;
    let mut subject_ids: HashMap<String, (i64, SubjectKind)> = HashMap::new();
    let mut summary = ImportSummary {
        subjects_created: 0,
        grades_imported: 0,
    };

    for (subject, grade) in rows {
        let name = subject.name.trim().to_string();

        let (subject_id, kind) = match subject_ids.get(&name) {
            Some(known) => *known,
            None => {
                let existing = sqlx::query_as::<_, (i64, String)>(
                    "SELECT id, kind FROM subjects WHERE student_id = ? AND name = ?",
                )
                .bind(student_id)
                .bind(&name)
                .fetch_optional(&mut *tx)
                .await?;

                let known = match existing {
                    Some((id, kind)) => (id, kind.parse::<SubjectKind>()?),
                    None => {
                        let res = sqlx::query(
                            "INSERT INTO subjects (student_id, name, kind, written_weight, grade_level)
                             VALUES (?, ?, ?, ?, ?)",
                        )
                        .bind(student_id)
                        .bind(&name)
                        .bind(subject.kind.as_str())
                        .bind(i64::from(subject.written_weight))
                        .bind(subject.grade_level)
                        .execute(&mut *tx)
                        .await?;
                        summary.subjects_created += 1;
                        (res.last_insert_rowid(), subject.kind)
                    }
                };

                subject_ids.insert(name.clone(), known);
                known
            }
        };

        // Dropping the transaction on return rolls back earlier rows
        if kind != subject.kind {
            return Err(AppError::Validation(format!(
                "Subject '{}' is a {} subject, not {}",
                name, kind, subject.kind
            )));
        }

        sqlx::query(
            "INSERT INTO grades (subject_id, value, weight, category, date, notes)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(subject_id)
        .bind(grade.value)
        .bind(grade.weight)
        .bind(grade.category.as_str())
        .bind(grade.date)
        .bind(grade.notes.as_deref())
        .execute(&mut *tx)
        .await?;
        summary.grades_imported += 1;
    }

    tx.commit().await?;
    Ok(summary)
}

#[instrument(skip(pool))]
pub async fn follow_user(
    pool: &Pool<Sqlite>,
    follower_id: i64,
    followed_id: i64,
) -> Result<(), AppError> {
    info!("Following user");
    if follower_id == followed_id {
        return Err(AppError::Validation("You cannot follow yourself".to_string()));
    }

    get_user(pool, followed_id).await?;

    sqlx::query("INSERT OR IGNORE INTO follows (follower_id, followed_id) VALUES (?, ?)")
        .bind(follower_id)
        .bind(followed_id)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn unfollow_user(
    pool: &Pool<Sqlite>,
    follower_id: i64,
    followed_id: i64,
) -> Result<(), AppError> {
    info!("Unfollowing user");
    sqlx::query("DELETE FROM follows WHERE follower_id = ? AND followed_id = ?")
        .bind(follower_id)
        .bind(followed_id)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn is_following(
    pool: &Pool<Sqlite>,
    follower_id: i64,
    followed_id: i64,
) -> Result<bool, AppError> {
    let found = sqlx::query_scalar::<_, i64>(
        "SELECT 1 FROM follows WHERE follower_id = ? AND followed_id = ?",
    )
    .bind(follower_id)
    .bind(followed_id)
    .fetch_optional(pool)
    .await?;

    Ok(found.is_some())
}

#[instrument(skip(pool))]
pub async fn get_following(pool: &Pool<Sqlite>, user_id: i64) -> Result<Vec<User>, AppError> {
    info!("Getting followed users");
    let rows = sqlx::query_as::<_, DbUser>(
        "SELECT u.id, u.username, u.role, u.display_name
         FROM follows f
         JOIN users u ON u.id = f.followed_id
         WHERE f.follower_id = ?
         ORDER BY u.username",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    to_users(rows)
}

#[instrument(skip(pool))]
pub async fn get_followers(pool: &Pool<Sqlite>, user_id: i64) -> Result<Vec<User>, AppError> {
    info!("Getting followers");
    let rows = sqlx::query_as::<_, DbUser>(
        "SELECT u.id, u.username, u.role, u.display_name
         FROM follows f
         JOIN users u ON u.id = f.follower_id
         WHERE f.followed_id = ?
         ORDER BY u.username",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    to_users(rows)
}

#[instrument(skip(pool))]
pub async fn create_class(
    pool: &Pool<Sqlite>,
    teacher_id: i64,
    name: &str,
) -> Result<i64, AppError> {
    info!("Creating class");
    let res = sqlx::query("INSERT INTO classes (teacher_id, name) VALUES (?, ?)")
        .bind(teacher_id)
        .bind(name.trim())
        .execute(pool)
        .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool))]
pub async fn get_class(pool: &Pool<Sqlite>, id: i64) -> Result<Class, AppError> {
    info!("Getting class");
    let row = sqlx::query_as::<_, DbClass>(
        "SELECT id, teacher_id, name, created_at FROM classes WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(class) => Ok(Class::from(class)),
        _ => Err(AppError::NotFound(format!("Class with id {} not found", id))),
    }
}

#[instrument(skip(pool))]
pub async fn get_classes_for_teacher(
    pool: &Pool<Sqlite>,
    teacher_id: i64,
) -> Result<Vec<Class>, AppError> {
    info!("Getting classes for teacher");
    let rows = sqlx::query_as::<_, DbClass>(
        "SELECT id, teacher_id, name, created_at FROM classes WHERE teacher_id = ? ORDER BY name",
    )
    .bind(teacher_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Class::from).collect())
}

#[instrument(skip(pool))]
pub async fn delete_class(pool: &Pool<Sqlite>, id: i64) -> Result<(), AppError> {
    info!("Deleting class");
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM class_members WHERE class_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM classes WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

#[instrument(skip(pool))]
pub async fn add_student_to_class(
    pool: &Pool<Sqlite>,
    class_id: i64,
    student_id: i64,
) -> Result<(), AppError> {
    info!("Adding student to class");
    sqlx::query("INSERT OR IGNORE INTO class_members (class_id, student_id) VALUES (?, ?)")
        .bind(class_id)
        .bind(student_id)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn remove_student_from_class(
    pool: &Pool<Sqlite>,
    class_id: i64,
    student_id: i64,
) -> Result<(), AppError> {
    info!("Removing student from class");
    sqlx::query("DELETE FROM class_members WHERE class_id = ? AND student_id = ?")
        .bind(class_id)
        .bind(student_id)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn get_class_students(
    pool: &Pool<Sqlite>,
    class_id: i64,
) -> Result<Vec<User>, AppError> {
    info!("Getting class students");
    let rows = sqlx::query_as::<_, DbUser>(
        "SELECT u.id, u.username, u.role, u.display_name
         FROM class_members m
         JOIN users u ON u.id = m.student_id
         WHERE m.class_id = ?
         ORDER BY u.display_name, u.username",
    )
    .bind(class_id)
    .fetch_all(pool)
    .await?;

    to_users(rows)
}

/// Whether the student sits in at least one class taught by the teacher.
#[instrument(skip(pool))]
pub async fn teacher_has_student(
    pool: &Pool<Sqlite>,
    teacher_id: i64,
    student_id: i64,
) -> Result<bool, AppError> {
    let found = sqlx::query_scalar::<_, i64>(
        "SELECT 1 FROM class_members m
         JOIN classes c ON c.id = m.class_id
         WHERE c.teacher_id = ? AND m.student_id = ?
         LIMIT 1",
    )
    .bind(teacher_id)
    .bind(student_id)
    .fetch_optional(pool)
    .await?;

    Ok(found.is_some())
}
