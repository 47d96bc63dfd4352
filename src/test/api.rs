#[cfg(test)]
mod tests {
    use crate::api::UserData;
    use crate::api::account::LoginResponse;
    use crate::api::subjects::CreatedResponse;
    use crate::test::test_utils::{create_standard_test_db, login_test_user, setup_test_client};
    use crate::validation::ValidationResponse;
    use rocket::http::{ContentType, Status};
    use rocket::local::asynchronous::{Client, LocalResponse};
    use serde_json::{Value, json};

    async fn body_json(response: LocalResponse<'_>) -> Value {
        let body = response.into_string().await.unwrap();
        serde_json::from_str(&body).unwrap()
    }

    async fn post_json(client: &Client, uri: String, body: Value) -> LocalResponse<'_> {
        client
            .post(uri)
            .header(ContentType::JSON)
            .body(body.to_string())
            .dispatch()
            .await
    }

    fn grade_body(value: f64, weight: f64, category: &str) -> Value {
        json!({
            "value": value,
            "weight": weight,
            "category": category,
            "date": "2024-10-01"
        })
    }

    #[rocket::async_test]
    async fn test_login_api() {
        let test_db = create_standard_test_db().await;
        let (client, _) = setup_test_client(test_db).await;

        let response = post_json(
            &client,
            "/api/login".into(),
            json!({ "username": "anna", "password": "password123" }),
        )
        .await;

        assert_eq!(response.status(), Status::Ok);
        let body = response.into_string().await.unwrap();
        let login_response: LoginResponse = serde_json::from_str(&body).unwrap();

        assert!(login_response.success);
        assert_eq!(login_response.user.unwrap().display_name, "Anna Adler");

        let response = post_json(
            &client,
            "/api/login".into(),
            json!({ "username": "anna", "password": "wrong_password" }),
        )
        .await;

        assert_eq!(response.status(), Status::Ok);
        let body = response.into_string().await.unwrap();
        let login_response: LoginResponse = serde_json::from_str(&body).unwrap();

        assert!(!login_response.success);
        assert!(login_response.error.is_some());

        let response = post_json(
            &client,
            "/api/login".into(),
            json!({ "username": "", "password": "" }),
        )
        .await;
        assert_eq!(response.status(), Status::UnprocessableEntity);
    }

    #[rocket::async_test]
    async fn test_auth_required_apis() {
        let test_db = create_standard_test_db().await;
        let (client, _) = setup_test_client(test_db).await;

        for endpoint in [
            "/api/me",
            "/api/student/1/subjects",
            "/api/student/1/overview",
            "/api/classes",
            "/api/following",
        ] {
            let response = client.get(endpoint).dispatch().await;
            assert_eq!(
                response.status(),
                Status::Unauthorized,
                "Endpoint {} did not require authentication",
                endpoint
            );

            let body = body_json(response).await;
            assert_eq!(body["error"], "Unauthorized");
        }

        let response = client.get("/api/health").dispatch().await;
        assert_eq!(response.status(), Status::Ok);
    }

    #[rocket::async_test]
    async fn test_me_and_logout() {
        let test_db = create_standard_test_db().await;
        let (client, _) = setup_test_client(test_db).await;

        login_test_user(&client, "carla").await;

        let response = client.get("/api/me").dispatch().await;
        assert_eq!(response.status(), Status::Ok);
        let body = response.into_string().await.unwrap();
        let me: UserData = serde_json::from_str(&body).unwrap();
        assert_eq!(me.username, "carla");
        assert_eq!(me.display_name, "carla");
        assert_eq!(me.role, "student");

        let response = client.post("/api/logout").dispatch().await;
        assert_eq!(response.status(), Status::Ok);

        let response = client.get("/api/me").dispatch().await;
        assert_eq!(response.status(), Status::Unauthorized);
    }

    #[rocket::async_test]
    async fn test_signup_rules() {
        let test_db = create_standard_test_db().await;
        let (client, _) = setup_test_client(test_db).await;

        let response = post_json(
            &client,
            "/api/signup".into(),
            json!({
                "username": "dora",
                "display_name": "Dora",
                "password": "long enough",
                "role": "student"
            }),
        )
        .await;
        assert_eq!(response.status(), Status::Created);

        let response = post_json(
            &client,
            "/api/signup".into(),
            json!({
                "username": "dora",
                "display_name": "Dora",
                "password": "long enough",
                "role": "student"
            }),
        )
        .await;
        assert_eq!(response.status(), Status::Conflict);

        let response = post_json(
            &client,
            "/api/signup".into(),
            json!({
                "username": "root",
                "display_name": "Root",
                "password": "long enough",
                "role": "admin"
            }),
        )
        .await;
        assert_eq!(response.status(), Status::Forbidden);

        let response = post_json(
            &client,
            "/api/signup".into(),
            json!({
                "username": "bad name!",
                "display_name": "Bad",
                "password": "short",
                "role": "student"
            }),
        )
        .await;
        assert_eq!(response.status(), Status::UnprocessableEntity);
        let body = response.into_string().await.unwrap();
        let errors: ValidationResponse = serde_json::from_str(&body).unwrap();
        assert!(errors.errors.contains_key("username"));
        assert!(errors.errors.contains_key("password"));
    }

    #[rocket::async_test]
    async fn test_overview_values() {
        let test_db = create_standard_test_db().await;
        let anna = test_db.user_id("anna").unwrap();
        let (client, _) = setup_test_client(test_db).await;

        login_test_user(&client, "anna").await;

        let response = client
            .get(format!("/api/student/{}/overview", anna))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        let body = body_json(response).await;
        assert_eq!(body["student"]["username"], "anna");
        // Mathe flat 2.0, Kunst 2.5: (2.0 * 2 + 2.5) / 3
        assert_eq!(body["overall_average"], 2.17);
        assert_eq!(body["display_overall_average"], "2.17");

        let subjects = body["subjects"].as_array().unwrap();
        assert_eq!(subjects.len(), 2);

        let kunst = &subjects[0];
        assert_eq!(kunst["name"], "Kunst");
        assert_eq!(kunst["average"], 2.5);
        assert_eq!(kunst["written"], Value::Null);

        let math = &subjects[1];
        assert_eq!(math["name"], "Mathe");
        assert_eq!(math["written"], 2.33);
        assert_eq!(math["oral"], 1.5);
        assert_eq!(math["average"], 2.05);
        assert_eq!(math["display_average"], "2.05");
        assert_eq!(math["grade_count"], 4);

        let achievements: Vec<&str> = body["achievements"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|a| a["id"].as_str())
            .collect();
        assert!(achievements.contains(&"first_grade"));
    }

    #[rocket::async_test]
    async fn test_subject_and_grade_lifecycle() {
        let test_db = create_standard_test_db().await;
        let carla = test_db.user_id("carla").unwrap();
        let (client, _) = setup_test_client(test_db).await;

        login_test_user(&client, "carla").await;

        let response = post_json(
            &client,
            format!("/api/student/{}/subjects", carla),
            json!({ "name": "Englisch", "kind": "main" }),
        )
        .await;
        assert_eq!(response.status(), Status::Created);
        let body = response.into_string().await.unwrap();
        let subject: CreatedResponse = serde_json::from_str(&body).unwrap();

        let response = post_json(
            &client,
            format!("/api/student/{}/subjects", carla),
            json!({ "name": "Englisch", "kind": "main" }),
        )
        .await;
        assert_eq!(response.status(), Status::Conflict);

        for invalid in [
            json!({ "name": "Latein", "kind": "main", "written_weight": 3 }),
            json!({ "name": "Latein", "kind": "elective" }),
            json!({ "name": "", "kind": "main" }),
        ] {
            let response =
                post_json(&client, format!("/api/student/{}/subjects", carla), invalid.clone())
                    .await;
            assert_eq!(
                response.status(),
                Status::UnprocessableEntity,
                "{} should be rejected",
                invalid
            );
        }

        let grades_uri = format!("/api/subjects/{}/grades", subject.id);
        let response = post_json(&client, grades_uri.clone(), grade_body(2.0, 1.0, "written")).await;
        assert_eq!(response.status(), Status::Created);
        let body = response.into_string().await.unwrap();
        let grade: CreatedResponse = serde_json::from_str(&body).unwrap();

        let response = post_json(&client, grades_uri.clone(), grade_body(1.0, 2.0, "oral")).await;
        assert_eq!(response.status(), Status::Created);

        for (value, weight, category) in [
            (7.0, 1.0, "oral"),
            (2.25, 1.0, "oral"),
            (2.0, 0.5, "written"),
            (2.0, 0.0, "oral"),
            (2.0, 1.0, "homework"),
        ] {
            let response =
                post_json(&client, grades_uri.clone(), grade_body(value, weight, category)).await;
            assert_eq!(
                response.status(),
                Status::UnprocessableEntity,
                "grade {} weight {} {} should be rejected",
                value,
                weight,
                category
            );
        }

        let response = client
            .put(format!("/api/grades/{}", grade.id))
            .header(ContentType::JSON)
            .body(grade_body(3.0, 1.0, "written").to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        let response = client
            .get(format!("/api/student/{}/subjects", carla))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let body = body_json(response).await;
        let english = &body[0];
        assert_eq!(english["written_weight"], 2);
        assert_eq!(english["grades"].as_array().unwrap().len(), 2);
        // written 3.0, oral 1.0: (1.0 + 3.0 * 2) / 3
        assert_eq!(english["summary"]["average"], 2.33);

        let response = client
            .put(format!("/api/subjects/{}", subject.id))
            .header(ContentType::JSON)
            .body(json!({ "name": "Englisch", "kind": "main", "written_weight": 1 }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        let response = client
            .get(format!("/api/student/{}/subjects", carla))
            .dispatch()
            .await;
        let body = body_json(response).await;
        assert_eq!(body[0]["summary"]["average"], 2.0);

        let response = client
            .delete(format!("/api/grades/{}", grade.id))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::NoContent);

        let response = client
            .delete(format!("/api/subjects/{}", subject.id))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::NoContent);

        let response = client
            .get(format!("/api/student/{}/subjects", carla))
            .dispatch()
            .await;
        let body = body_json(response).await;
        assert!(body.as_array().unwrap().is_empty());
    }

    #[rocket::async_test]
    async fn test_low_written_weight_reports_one_error() {
        let test_db = create_standard_test_db().await;
        let math = test_db.subject_id("anna", "Mathe").unwrap();
        let (client, _) = setup_test_client(test_db).await;

        login_test_user(&client, "anna").await;

        let response = post_json(
            &client,
            format!("/api/subjects/{}/grades", math),
            grade_body(2.0, 0.5, "written"),
        )
        .await;
        assert_eq!(response.status(), Status::UnprocessableEntity);

        let body = response.into_string().await.unwrap();
        let errors: ValidationResponse = serde_json::from_str(&body).unwrap();
        assert!(!errors.errors.contains_key("weight"));

        let messages: Vec<&String> = errors.errors.values().flatten().collect();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("written"));
    }

    #[rocket::async_test]
    async fn test_students_cannot_touch_other_students() {
        let test_db = create_standard_test_db().await;
        let anna = test_db.user_id("anna").unwrap();
        let math = test_db.subject_id("anna", "Mathe").unwrap();
        let (client, _) = setup_test_client(test_db).await;

        login_test_user(&client, "ben").await;

        for uri in [
            format!("/api/student/{}/subjects", anna),
            format!("/api/student/{}/overview", anna),
            format!("/api/student/{}/export", anna),
        ] {
            let response = client.get(uri.clone()).dispatch().await;
            assert_eq!(response.status(), Status::Forbidden, "{}", uri);
        }

        let response = post_json(
            &client,
            format!("/api/subjects/{}/grades", math),
            grade_body(1.0, 1.0, "oral"),
        )
        .await;
        assert_eq!(response.status(), Status::Forbidden);

        let response = client
            .delete(format!("/api/subjects/{}", math))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Forbidden);

        let response = client.delete("/api/subjects/9999").dispatch().await;
        assert_eq!(response.status(), Status::NotFound);
    }

    #[rocket::async_test]
    async fn test_followers_only_see_the_overview() {
        let test_db = create_standard_test_db().await;
        let anna = test_db.user_id("anna").unwrap();
        let ben = test_db.user_id("ben").unwrap();
        let (client, _) = setup_test_client(test_db).await;

        login_test_user(&client, "ben").await;

        let response = client.post(format!("/api/follow/{}", anna)).dispatch().await;
        assert_eq!(response.status(), Status::Ok);

        let response = client
            .get(format!("/api/student/{}/overview", anna))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        let response = client
            .get(format!("/api/student/{}/subjects", anna))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Forbidden);

        let response = client.get("/api/following").dispatch().await;
        let body = body_json(response).await;
        assert_eq!(body[0]["username"], "anna");

        let response = client.post(format!("/api/follow/{}", ben)).dispatch().await;
        assert_eq!(response.status(), Status::UnprocessableEntity);

        let response = client
            .delete(format!("/api/follow/{}", anna))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::NoContent);

        let response = client
            .get(format!("/api/student/{}/overview", anna))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Forbidden);

        let response = client.get("/api/users/search?q=ann").dispatch().await;
        let body = body_json(response).await;
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["username"], "anna");
    }

    #[rocket::async_test]
    async fn test_teacher_reaches_class_students_only() {
        let test_db = create_standard_test_db().await;
        let anna = test_db.user_id("anna").unwrap();
        let ben = test_db.user_id("ben").unwrap();
        let math = test_db.subject_id("anna", "Mathe").unwrap();
        let (client, _) = setup_test_client(test_db).await;

        login_test_user(&client, "teacher_user").await;

        let response = client
            .get(format!("/api/student/{}/subjects", anna))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        let response = post_json(
            &client,
            format!("/api/subjects/{}/grades", math),
            grade_body(1.0, 1.0, "oral"),
        )
        .await;
        assert_eq!(response.status(), Status::Created);

        let response = client
            .get(format!("/api/student/{}/subjects", ben))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Forbidden);
    }

    #[rocket::async_test]
    async fn test_admin_reaches_everyone() {
        let test_db = create_standard_test_db().await;
        let ben = test_db.user_id("ben").unwrap();
        let (client, _) = setup_test_client(test_db).await;

        login_test_user(&client, "admin_user").await;

        let response = client
            .get(format!("/api/student/{}/overview", ben))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let body = body_json(response).await;
        // One main subject at 4.0 and no secondary subjects: 4.0 * 2 / 3
        assert_eq!(body["overall_average"], 2.67);
    }

    #[rocket::async_test]
    async fn test_class_management() {
        let test_db = create_standard_test_db().await;
        let (client, _) = setup_test_client(test_db).await;

        login_test_user(&client, "teacher_user").await;

        let response = post_json(&client, "/api/classes".into(), json!({ "name": "8a" })).await;
        assert_eq!(response.status(), Status::Created);
        let body = response.into_string().await.unwrap();
        let class: CreatedResponse = serde_json::from_str(&body).unwrap();

        let students_uri = format!("/api/classes/{}/students", class.id);
        let response = post_json(&client, students_uri.clone(), json!({ "username": "ben" })).await;
        assert_eq!(response.status(), Status::Ok);

        let response =
            post_json(&client, students_uri.clone(), json!({ "username": "admin_user" })).await;
        assert_eq!(response.status(), Status::UnprocessableEntity);

        let response =
            post_json(&client, students_uri.clone(), json!({ "username": "nobody" })).await;
        assert_eq!(response.status(), Status::NotFound);

        let response = client
            .get(format!("/api/classes/{}", class.id))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let body = body_json(response).await;
        assert_eq!(body["class"]["name"], "8a");
        assert_eq!(body["students"][0]["student"]["username"], "ben");
        assert_eq!(body["students"][0]["display_overall_average"], "2.67");

        let response = client.get("/api/classes").dispatch().await;
        let body = body_json(response).await;
        let names: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|c| c["name"].as_str())
            .collect();
        assert_eq!(names, vec!["7b", "8a"]);

        let response = client
            .delete(format!("/api/classes/{}", class.id))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::NoContent);

        let response = client.post("/api/logout").dispatch().await;
        assert_eq!(response.status(), Status::Ok);
        login_test_user(&client, "anna").await;

        let response = client.get("/api/classes").dispatch().await;
        assert_eq!(response.status(), Status::Forbidden);
    }

    #[rocket::async_test]
    async fn test_import_and_export() {
        let test_db = create_standard_test_db().await;
        let carla = test_db.user_id("carla").unwrap();
        let (client, _) = setup_test_client(test_db).await;

        login_test_user(&client, "carla").await;

        let csv = "subject,kind,value,weight,category,date,notes\n\
                   Mathe,main,2,1,written,2024-09-12,Klassenarbeit\n\
                   Mathe,main,\"1,5\",1,oral,13.09.2024,\n\
                   Kunst,secondary,3,1,oral,2024-09-20,\n";

        let response = client
            .post(format!("/api/student/{}/import", carla))
            .header(ContentType::CSV)
            .body(csv)
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let body = body_json(response).await;
        assert_eq!(body["subjects_created"], 2);
        assert_eq!(body["grades_imported"], 3);

        let bad = "subject,kind,value,weight,category,date,notes\n\
                   Mathe,main,9,1,written,2024-09-12,\n";
        let response = client
            .post(format!("/api/student/{}/import", carla))
            .header(ContentType::CSV)
            .body(bad)
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::UnprocessableEntity);

        // Mathe is already stored as a main subject
        let conflicting = "subject,kind,value,weight,category,date,notes\n\
                           Mathe,secondary,2,1,oral,2024-09-25,\n";
        let response = client
            .post(format!("/api/student/{}/import", carla))
            .header(ContentType::CSV)
            .body(conflicting)
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::UnprocessableEntity);

        let response = client
            .get(format!("/api/student/{}/export", carla))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        assert_eq!(response.content_type(), Some(ContentType::CSV));

        let exported = response.into_string().await.unwrap();
        let lines: Vec<&str> = exported.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[1], "Kunst,secondary,3,1,oral,2024-09-20,");
        assert_eq!(lines[2], "Mathe,main,2,1,written,2024-09-12,Klassenarbeit");
        assert_eq!(lines[3], "Mathe,main,1.5,1,oral,2024-09-13,");
    }
}
