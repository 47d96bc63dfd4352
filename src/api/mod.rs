use rocket::Route;
use rocket::serde::{Deserialize, Serialize};

use crate::auth::User;

pub mod account;
pub mod classes;
pub mod social;
pub mod subjects;

pub fn routes() -> Vec<Route> {
    routes![
        account::health,
        account::api_signup,
        account::api_login,
        account::api_logout,
        account::api_register_user,
        account::api_me,
        account::api_update_profile,
        account::api_change_password,
        subjects::api_get_subjects,
        subjects::api_create_subject,
        subjects::api_update_subject,
        subjects::api_delete_subject,
        subjects::api_add_grade,
        subjects::api_update_grade,
        subjects::api_delete_grade,
        subjects::api_get_overview,
        subjects::api_export_grades,
        subjects::api_import_grades,
        social::api_follow,
        social::api_unfollow,
        social::api_get_following,
        social::api_get_followers,
        social::api_search_users,
        classes::api_get_classes,
        classes::api_create_class,
        classes::api_get_class,
        classes::api_delete_class,
        classes::api_add_class_student,
        classes::api_remove_class_student,
    ]
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UserData {
    pub id: i64,
    pub username: String,
    pub display_name: String,
    pub role: String,
}

impl From<User> for UserData {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            display_name: user.display_name,
            role: user.role.to_string(),
        }
    }
}
