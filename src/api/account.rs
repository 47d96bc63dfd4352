use std::str::FromStr;

use chrono::Utc;
use rocket::State;
use rocket::http::{Cookie, CookieJar, SameSite, Status};
use rocket::response::status::Custom;
use rocket::serde::{Deserialize, Serialize, json::Json};
use sqlx::{Pool, Sqlite};
use validator::Validate;

use crate::auth::{Permission, Role, SESSION_COOKIE, SESSION_HOURS, User, UserSession};
use crate::db::{
    authenticate_user, create_user, create_user_session, invalidate_session,
    update_user_display_name, update_user_password,
};
use crate::validation::{
    AppErrorExt, JsonValidateExt, PermissionCheckExt, ValidationResponse, ValidationResult,
    validate_username,
};

use super::UserData;

#[derive(Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "Username is required"))]
    username: String,
    #[validate(length(min = 1, message = "Password is required"))]
    password: String,
}

#[derive(Serialize, Deserialize)]
pub struct LoginResponse {
    pub success: bool,
    pub user: Option<UserData>,
    pub error: Option<String>,
}

#[derive(Deserialize, Validate, Clone)]
pub struct AccountRequest {
    #[validate(
        length(min = 3, max = 32, message = "Username must be 3 to 32 characters"),
        custom(function = "validate_username")
    )]
    username: String,
    #[validate(length(min = 1, max = 64, message = "Display name must be 1 to 64 characters"))]
    display_name: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    password: String,
    role: String,
}

fn start_session(cookies: &CookieJar<'_>, token: String) {
    cookies.add_private(
        Cookie::build((SESSION_COOKIE, token))
            .same_site(SameSite::Lax)
            .http_only(true)
            .max_age(rocket::time::Duration::hours(SESSION_HOURS)),
    );
}

#[get("/health")]
pub fn health() -> &'static str {
    "OK"
}

/// Public sign up for students and teachers.
#[post("/signup", data = "<signup>")]
pub async fn api_signup(
    signup: Json<AccountRequest>,
    db: &State<Pool<Sqlite>>,
) -> ValidationResult<Status> {
    let validated = signup.validate_custom()?;

    let role = Role::from_str(&validated.role).validate_custom()?;
    if role == Role::Admin {
        return Err(Custom(
            Status::Forbidden,
            Json(ValidationResponse::with_error(
                "role",
                "Admin accounts cannot be created by sign up",
            )),
        ));
    }

    create_user(
        db,
        &validated.username,
        &validated.password,
        role,
        Some(&validated.display_name),
    )
    .await
    .validate_custom()?;

    Ok(Status::Created)
}

#[post("/login", data = "<login>")]
pub async fn api_login(
    login: Json<LoginRequest>,
    cookies: &CookieJar<'_>,
    db: &State<Pool<Sqlite>>,
) -> ValidationResult<Json<LoginResponse>> {
    let validated = login.validate_custom()?;

    match authenticate_user(db, &validated.username, &validated.password)
        .await
        .validate_custom()?
    {
        Some(user) => {
            let token = UserSession::generate_token();
            let expires_at = Utc::now() + chrono::Duration::hours(SESSION_HOURS);

            create_user_session(db, user.id, &token, expires_at.naive_utc())
                .await
                .validate_custom()?;

            start_session(cookies, token);

            Ok(Json(LoginResponse {
                success: true,
                user: Some(UserData::from(user)),
                error: None,
            }))
        }
        None => Ok(Json(LoginResponse {
            success: false,
            user: None,
            error: Some("Invalid username or password".to_string()),
        })),
    }
}

#[post("/logout")]
pub async fn api_logout(cookies: &CookieJar<'_>, db: &State<Pool<Sqlite>>) -> Status {
    let token = cookies
        .get_private(SESSION_COOKIE)
        .map(|cookie| cookie.value().to_string());

    if let Some(token) = token {
        if let Err(err) = invalidate_session(db, &token).await {
            err.log_and_record("Logout");
        }
    }

    cookies.remove_private(Cookie::build(SESSION_COOKIE));

    Status::Ok
}

/// Account creation on behalf of someone else. Teachers may register
/// students, admins any role.
#[post("/register", data = "<registration>")]
pub async fn api_register_user(
    registration: Json<AccountRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ValidationResult<Status> {
    let validated = registration.validate_custom()?;

    user.require_permission(Permission::RegisterUsers)
        .validate_custom()?;

    let role = Role::from_str(&validated.role).validate_custom()?;
    if role != Role::Student {
        user.require_permission(Permission::EditUserRoles)
            .validate_custom()?;
    }

    create_user(
        db,
        &validated.username,
        &validated.password,
        role,
        Some(&validated.display_name),
    )
    .await
    .validate_custom()?;

    Ok(Status::Created)
}

#[get("/me")]
pub async fn api_me(user: User) -> Json<UserData> {
    Json(UserData::from(user))
}

#[derive(Deserialize, Validate)]
pub struct ProfileUpdateRequest {
    #[validate(length(min = 1, max = 64, message = "Display name must be 1 to 64 characters"))]
    display_name: String,
}

#[put("/profile", data = "<profile>")]
pub async fn api_update_profile(
    profile: Json<ProfileUpdateRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ValidationResult<Status> {
    let validated = profile.validate_custom()?;

    user.require_permission(Permission::EditOwnProfile)
        .validate_custom()?;

    update_user_display_name(db, user.id, validated.display_name.trim())
        .await
        .validate_custom()?;

    Ok(Status::Ok)
}

#[derive(Deserialize, Validate)]
pub struct PasswordChangeRequest {
    current_password: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    new_password: String,
}

#[post("/change-password", data = "<password>")]
pub async fn api_change_password(
    password: Json<PasswordChangeRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ValidationResult<Status> {
    let validated = password.validate_custom()?;

    let is_valid = authenticate_user(db, &user.username, &validated.current_password)
        .await
        .validate_custom()?;

    match is_valid {
        Some(_) => {
            update_user_password(db, user.id, &validated.new_password)
                .await
                .validate_custom()?;

            Ok(Status::Ok)
        }
        _ => Err(Custom(
            Status::Unauthorized,
            Json(ValidationResponse::with_error(
                "current_password",
                "Current password is incorrect",
            )),
        )),
    }
}

