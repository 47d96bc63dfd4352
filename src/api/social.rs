use rocket::State;
use rocket::http::Status;
use rocket::serde::json::Json;
use sqlx::{Pool, Sqlite};

use crate::auth::{Permission, User};
use crate::db::{follow_user, get_followers, get_following, search_users, unfollow_user};
use crate::validation::{AppErrorExt, PermissionCheckExt, ValidationResult};

use super::UserData;

const SEARCH_LIMIT: i64 = 20;

fn to_user_data(users: Vec<User>) -> Vec<UserData> {
    users.into_iter().map(UserData::from).collect()
}

#[post("/follow/<user_id>")]
pub async fn api_follow(
    user_id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ValidationResult<Status> {
    user.require_permission(Permission::FollowUsers)
        .validate_custom()?;

    follow_user(db, user.id, user_id).await.validate_custom()?;

    Ok(Status::Ok)
}

#[delete("/follow/<user_id>")]
pub async fn api_unfollow(
    user_id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ValidationResult<Status> {
    user.require_permission(Permission::FollowUsers)
        .validate_custom()?;

    unfollow_user(db, user.id, user_id).await.validate_custom()?;

    Ok(Status::NoContent)
}

#[get("/following")]
pub async fn api_get_following(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ValidationResult<Json<Vec<UserData>>> {
    let users = get_following(db, user.id).await.validate_custom()?;
    Ok(Json(to_user_data(users)))
}

#[get("/followers")]
pub async fn api_get_followers(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ValidationResult<Json<Vec<UserData>>> {
    let users = get_followers(db, user.id).await.validate_custom()?;
    Ok(Json(to_user_data(users)))
}

#[get("/users/search?<q>")]
pub async fn api_search_users(
    q: &str,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> ValidationResult<Json<Vec<UserData>>> {
    if q.trim().is_empty() {
        return Ok(Json(Vec::new()));
    }

    let users = search_users(db, q, SEARCH_LIMIT).await.validate_custom()?;

    Ok(Json(
        users
            .into_iter()
            .filter(|found| found.id != user.id)
            .map(UserData::from)
            .collect(),
    ))
}
