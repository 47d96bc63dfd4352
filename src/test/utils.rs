#[cfg(test)]
pub mod test_db {
    use crate::auth::Role;
    use crate::database::apply_schema;
    use crate::db::{add_grade, add_student_to_class, create_class, create_subject, create_user};
    use crate::error::AppError;
    use crate::models::{GradeCategory, GradeInput, SubjectInput, SubjectKind};
    use chrono::NaiveDate;
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::{Pool, Sqlite};
    use std::collections::HashMap;
    use std::sync::Once;

    static INIT: Once = Once::new();
    pub static STANDARD_PASSWORD: &str = "password123";

    #[derive(Default)]
    pub struct TestDbBuilder {
        users: Vec<TestUser>,
        subjects: Vec<TestSubject>,
        grades: Vec<TestGrade>,
        classes: Vec<TestClass>,
    }

    pub struct TestUser {
        pub username: String,
        pub display_name: Option<String>,
        pub role: Role,
    }

    pub struct TestSubject {
        pub student_username: String,
        pub name: String,
        pub kind: SubjectKind,
        pub written_weight: u8,
    }

    pub struct TestGrade {
        pub student_username: String,
        pub subject_name: String,
        pub value: f64,
        pub weight: f64,
        pub category: GradeCategory,
        pub day: u32,
    }

    pub struct TestClass {
        pub name: String,
        pub teacher_username: String,
        pub student_usernames: Vec<String>,
    }

    impl TestDbBuilder {
        pub fn new() -> Self {
            Self::default()
        }

        fn user(mut self, username: &str, display_name: Option<&str>, role: Role) -> Self {
            self.users.push(TestUser {
                username: username.to_string(),
                display_name: display_name.map(String::from),
                role,
            });
            self
        }

        pub fn student(self, username: &str, display_name: Option<&str>) -> Self {
            self.user(username, display_name, Role::Student)
        }

        pub fn teacher(self, username: &str, display_name: Option<&str>) -> Self {
            self.user(username, display_name, Role::Teacher)
        }

        pub fn admin(self, username: &str, display_name: Option<&str>) -> Self {
            self.user(username, display_name, Role::Admin)
        }

        pub fn subject(
            mut self,
            student_username: &str,
            name: &str,
            kind: SubjectKind,
            written_weight: u8,
        ) -> Self {
            self.subjects.push(TestSubject {
                student_username: student_username.to_string(),
                name: name.to_string(),
                kind,
                written_weight,
            });
            self
        }

        /// Adds a grade dated `day` of September 2024.
        pub fn grade(
            mut self,
            student_username: &str,
            subject_name: &str,
            value: f64,
            weight: f64,
            category: GradeCategory,
            day: u32,
        ) -> Self {
            self.grades.push(TestGrade {
                student_username: student_username.to_string(),
                subject_name: subject_name.to_string(),
                value,
                weight,
                category,
                day,
            });
            self
        }

        pub fn class(mut self, name: &str, teacher_username: &str, students: &[&str]) -> Self {
            self.classes.push(TestClass {
                name: name.to_string(),
                teacher_username: teacher_username.to_string(),
                student_usernames: students.iter().map(|s| s.to_string()).collect(),
            });
            self
        }

        pub async fn build(self) -> Result<TestDb, AppError> {
            INIT.call_once(|| {
                let _ = env_logger::builder()
                    .parse_filters("debug")
                    .is_test(true)
                    .try_init();
            });

            // A single connection that never expires keeps the in-memory
            // database alive for the whole test
            let pool = SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect("sqlite::memory:")
                .await?;

            apply_schema(&pool).await?;

            let mut user_id_map: HashMap<String, i64> = HashMap::new();
            let mut subject_id_map: HashMap<(String, String), i64> = HashMap::new();
            let mut class_id_map: HashMap<String, i64> = HashMap::new();

            for user in &self.users {
                let user_id = create_user(
                    &pool,
                    &user.username,
                    STANDARD_PASSWORD,
                    user.role,
                    user.display_name.as_deref(),
                )
                .await?;

                user_id_map.insert(user.username.clone(), user_id);
            }

            for subject in &self.subjects {
                let student_id = lookup(&user_id_map, &subject.student_username)?;
                let input = SubjectInput {
                    name: subject.name.clone(),
                    kind: subject.kind,
                    written_weight: subject.written_weight,
                    grade_level: 7,
                };
                let subject_id = create_subject(&pool, student_id, &input).await?;

                subject_id_map.insert(
                    (subject.student_username.clone(), subject.name.clone()),
                    subject_id,
                );
            }

            for grade in &self.grades {
                let key = (grade.student_username.clone(), grade.subject_name.clone());
                let subject_id = subject_id_map.get(&key).copied().ok_or_else(|| {
                    AppError::NotFound(format!("Test subject {:?} was not declared", key))
                })?;

                let input = GradeInput {
                    value: grade.value,
                    weight: grade.weight,
                    category: grade.category,
                    date: NaiveDate::from_ymd_opt(2024, 9, grade.day).ok_or_else(|| {
                        AppError::Validation(format!("No such day: {}", grade.day))
                    })?,
                    notes: None,
                };
                add_grade(&pool, subject_id, &input).await?;
            }

            for class in &self.classes {
                let teacher_id = lookup(&user_id_map, &class.teacher_username)?;
                let class_id = create_class(&pool, teacher_id, &class.name).await?;

                for student in &class.student_usernames {
                    add_student_to_class(&pool, class_id, lookup(&user_id_map, student)?).await?;
                }

                class_id_map.insert(class.name.clone(), class_id);
            }

            Ok(TestDb {
                pool,
                user_id_map,
                subject_id_map,
                class_id_map,
            })
        }
    }

    fn lookup(map: &HashMap<String, i64>, username: &str) -> Result<i64, AppError> {
        map.get(username)
            .copied()
            .ok_or_else(|| AppError::NotFound(format!("Test user {} was not declared", username)))
    }

    pub struct TestDb {
        pub pool: Pool<Sqlite>,
        pub user_id_map: HashMap<String, i64>,
        pub subject_id_map: HashMap<(String, String), i64>,
        pub class_id_map: HashMap<String, i64>,
    }

    impl TestDb {
        pub fn user_id(&self, username: &str) -> Option<i64> {
            self.user_id_map.get(username).copied()
        }

        pub fn subject_id(&self, username: &str, subject: &str) -> Option<i64> {
            self.subject_id_map
                .get(&(username.to_string(), subject.to_string()))
                .copied()
        }

        pub fn class_id(&self, name: &str) -> Option<i64> {
            self.class_id_map.get(name).copied()
        }
    }
}

#[cfg(test)]
pub mod test_utils {
    use super::test_db::{STANDARD_PASSWORD, TestDb, TestDbBuilder};
    use crate::init_rocket;
    use crate::models::{GradeCategory, SubjectKind};
    use rocket::http::{ContentType, Status};
    use rocket::local::asynchronous::Client;
    use serde_json::json;

    /// Two students, a teacher with a class holding `anna`, a follower of
    /// `anna` and an admin. Anna's grades:
    ///
    /// - Mathe (main, written weight 2): written 2.0 (w2), 3.0 (w1); oral 1.0 (w1), 2.0 (w1)
    /// - Kunst (secondary): 2.0 (w1), 3.0 (w1)
    pub async fn create_standard_test_db() -> TestDb {
        TestDbBuilder::new()
            .student("anna", Some("Anna Adler"))
            .student("ben", Some("Ben Berg"))
            .student("carla", None)
            .teacher("teacher_user", Some("Frau Schmidt"))
            .admin("admin_user", None)
            .subject("anna", "Mathe", SubjectKind::Main, 2)
            .subject("anna", "Kunst", SubjectKind::Secondary, 2)
            .subject("ben", "Deutsch", SubjectKind::Main, 1)
            .grade("anna", "Mathe", 2.0, 2.0, GradeCategory::Written, 2)
            .grade("anna", "Mathe", 3.0, 1.0, GradeCategory::Written, 9)
            .grade("anna", "Mathe", 1.0, 1.0, GradeCategory::Oral, 3)
            .grade("anna", "Mathe", 2.0, 1.0, GradeCategory::Oral, 10)
            .grade("anna", "Kunst", 2.0, 1.0, GradeCategory::Oral, 4)
            .grade("anna", "Kunst", 3.0, 1.0, GradeCategory::Oral, 11)
            .grade("ben", "Deutsch", 4.0, 1.0, GradeCategory::Written, 5)
            .class("7b", "teacher_user", &["anna"])
            .build()
            .await
            .expect("Failed to build standard test database")
    }

    pub async fn setup_test_client(test_db: TestDb) -> (Client, TestDb) {
        let rocket = init_rocket(test_db.pool.clone())
            .await
            .expect("Failed to build rocket");
        let client = Client::tracked(rocket)
            .await
            .expect("Valid rocket instance");
        (client, test_db)
    }

    pub async fn login_test_user(client: &Client, username: &str) {
        let response = client
            .post("/api/login")
            .header(ContentType::JSON)
            .body(
                json!({
                    "username": username,
                    "password": STANDARD_PASSWORD
                })
                .to_string(),
            )
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Ok);
    }
}
