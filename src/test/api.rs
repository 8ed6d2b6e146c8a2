#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rocket::http::{ContentType, Status};
    use serde_json::{Value, json};

    use crate::api::{ApiResponse, LoginResponse, StudentMarks};
    use crate::auth::{
        Identity, IdentityGateway, IdentitySubscription, Role, SESSION_COOKIE, Session, SignedIn,
    };
    use crate::error::AppError;
    use crate::models::MarksRecord;
    use crate::stats::Grade;
    use crate::test::test_utils::{
        ASHA_EMAIL, RAVI_EMAIL, STANDARD_PASSWORD, TEACHER_EMAIL, TestPortalBuilder,
        create_standard_test_portal, login_test_user, setup_test_client,
    };
    use crate::validation::ValidationResponse;

    fn marks_body(marks: i64) -> String {
        json!({
            "year": "2024",
            "branch": "ece",
            "section": "b",
            "rollNumber": "4",
            "studentName": "Meera Iyer",
            "studentEmail": "meera@school.edu",
            "period": "assign2",
            "marks": marks,
            "maxMarks": 20,
        })
        .to_string()
    }

    #[rocket::async_test]
    async fn test_health() {
        let test_portal = TestPortalBuilder::new().build().await.unwrap();
        let client = setup_test_client(&test_portal).await;

        let response = client.get("/api/health").dispatch().await;

        assert_eq!(response.status(), Status::Ok);
        let body: Value = response.into_json().await.unwrap();
        assert_eq!(body["status"], "ok");
    }

    #[rocket::async_test]
    async fn test_register_signs_in_and_redirects_home() {
        let test_portal = TestPortalBuilder::new().build().await.unwrap();
        let client = setup_test_client(&test_portal).await;

        let response = client
            .post("/api/register")
            .header(ContentType::JSON)
            .body(
                json!({
                    "email": "new@school.edu",
                    "password": "secret1",
                    "role": "student",
                })
                .to_string(),
            )
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Ok);
        let login: LoginResponse = response.into_json().await.unwrap();
        assert!(login.success);
        assert_eq!(login.role, Some(Role::Student));
        assert_eq!(login.redirect_url.as_deref(), Some("/student"));

        let session: Session = client
            .get("/api/session")
            .dispatch()
            .await
            .into_json()
            .await
            .unwrap();
        assert_eq!(session.role, Some(Role::Student));
        assert_eq!(session.identity.unwrap().email, "new@school.edu");
    }

    #[rocket::async_test]
    async fn test_register_rejects_short_password_and_unknown_role() {
        let test_portal = TestPortalBuilder::new().build().await.unwrap();
        let client = setup_test_client(&test_portal).await;

        let response = client
            .post("/api/register")
            .header(ContentType::JSON)
            .body(
                json!({
                    "email": "new@school.edu",
                    "password": "123",
                    "role": "admin",
                })
                .to_string(),
            )
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::UnprocessableEntity);
        let body: Value = response.into_json().await.unwrap();
        assert_eq!(
            body["errors"]["password"][0],
            "Password must be at least 6 characters long"
        );
        assert_eq!(body["errors"]["role"][0], "Please select a role");
    }

    #[rocket::async_test]
    async fn test_register_duplicate_email() {
        let test_portal = TestPortalBuilder::new()
            .teacher(TEACHER_EMAIL)
            .build()
            .await
            .unwrap();
        let client = setup_test_client(&test_portal).await;

        let login: LoginResponse = client
            .post("/api/register")
            .header(ContentType::JSON)
            .body(
                json!({
                    "email": TEACHER_EMAIL,
                    "password": STANDARD_PASSWORD,
                    "role": "teacher",
                })
                .to_string(),
            )
            .dispatch()
            .await
            .into_json()
            .await
            .unwrap();

        assert!(!login.success);
        assert_eq!(login.error.as_deref(), Some("Email already in use"));
    }

    #[rocket::async_test]
    async fn test_login_and_logout() {
        let test_portal = create_standard_test_portal().await;
        let client = setup_test_client(&test_portal).await;

        let login = login_test_user(&client, TEACHER_EMAIL, "teacher").await;
        assert!(login.success);
        assert_eq!(login.redirect_url.as_deref(), Some("/teacher"));
        assert_eq!(login.identity.unwrap().email, TEACHER_EMAIL);

        let response = client.get("/teacher").dispatch().await;
        assert_eq!(response.status(), Status::Ok);

        let response = client.post("/api/logout").dispatch().await;
        assert_eq!(response.status(), Status::Ok);

        let session: Session = client
            .get("/api/session")
            .dispatch()
            .await
            .into_json()
            .await
            .unwrap();
        assert_eq!(session, Session::anonymous());
    }

    /// Delegates to the real gateway but cannot sign anyone out.
    struct StuckSignOut(Arc<dyn IdentityGateway>);

    #[rocket::async_trait]
    impl IdentityGateway for StuckSignOut {
        async fn register(&self, email: &str, password: &str) -> Result<SignedIn, AppError> {
            self.0.register(email, password).await
        }

        async fn sign_in(&self, email: &str, password: &str) -> Result<SignedIn, AppError> {
            self.0.sign_in(email, password).await
        }

        async fn sign_out(&self, _token: &str) -> Result<(), AppError> {
            Err(AppError::Internal("identity provider unavailable".to_string()))
        }

        async fn current_identity(&self, token: &str) -> Result<Option<Identity>, AppError> {
            self.0.current_identity(token).await
        }

        fn subscribe(&self) -> IdentitySubscription {
            self.0.subscribe()
        }

        async fn purge_expired_sessions(&self) -> Result<u64, AppError> {
            self.0.purge_expired_sessions().await
        }
    }

    #[rocket::async_test]
    async fn test_logout_clears_cookie_when_gateway_fails() {
        let mut test_portal = create_standard_test_portal().await;
        test_portal.portal.identity = Arc::new(StuckSignOut(test_portal.portal.identity.clone()));
        let client = setup_test_client(&test_portal).await;

        let login = login_test_user(&client, TEACHER_EMAIL, "teacher").await;
        assert!(login.success);

        let response = client.post("/api/logout").dispatch().await;
        assert_eq!(response.status(), Status::Ok);
        assert!(client.cookies().get_private(SESSION_COOKIE).is_none());

        let session: Session = client
            .get("/api/session")
            .dispatch()
            .await
            .into_json()
            .await
            .unwrap();
        assert_eq!(session, Session::anonymous());
    }

    #[rocket::async_test]
    async fn test_session_events_for_anonymous_caller() {
        let test_portal = create_standard_test_portal().await;
        let client = setup_test_client(&test_portal).await;

        let response = client.get("/api/session/events").dispatch().await;
        assert_eq!(response.status(), Status::Ok);

        let body = response.into_string().await.unwrap();
        let payload = body
            .lines()
            .find_map(|line| line.strip_prefix("data:"))
            .unwrap();
        let session: Session = serde_json::from_str(payload.trim()).unwrap();
        assert_eq!(session, Session::anonymous());
    }

    #[rocket::async_test]
    async fn test_login_failures_are_reported_in_body() {
        let test_portal = create_standard_test_portal().await;
        let client = setup_test_client(&test_portal).await;

        let response = client
            .post("/api/login")
            .header(ContentType::JSON)
            .body(
                json!({
                    "email": TEACHER_EMAIL,
                    "password": "wrong_password",
                    "role": "teacher",
                })
                .to_string(),
            )
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Ok);
        let login: LoginResponse = response.into_json().await.unwrap();
        assert!(!login.success);
        assert_eq!(login.error.as_deref(), Some("Invalid email or password"));
    }

    #[rocket::async_test]
    async fn test_role_mismatch_leaves_nobody_signed_in() {
        let test_portal = create_standard_test_portal().await;
        let client = setup_test_client(&test_portal).await;

        let login = login_test_user(&client, ASHA_EMAIL, "teacher").await;

        assert!(!login.success);
        assert_eq!(
            login.error.as_deref(),
            Some("You're registered as a student, not a teacher")
        );

        let session: Session = client
            .get("/api/session")
            .dispatch()
            .await
            .into_json()
            .await
            .unwrap();
        assert!(session.identity.is_none());
    }

    #[rocket::async_test]
    async fn test_pages_redirect_anonymous_visitors() {
        let test_portal = create_standard_test_portal().await;
        let client = setup_test_client(&test_portal).await;

        for page in ["/teacher", "/student"] {
            let response = client.get(page).dispatch().await;
            assert_eq!(response.status(), Status::SeeOther, "{}", page);
            assert_eq!(response.headers().get_one("Location"), Some("/"));
        }

        assert_eq!(client.get("/").dispatch().await.status(), Status::Ok);
        assert_eq!(client.get("/register").dispatch().await.status(), Status::Ok);
    }

    #[rocket::async_test]
    async fn test_teacher_page_offers_edit_and_delete() {
        let test_portal = create_standard_test_portal().await;
        let client = setup_test_client(&test_portal).await;
        login_test_user(&client, TEACHER_EMAIL, "teacher").await;

        let page = client
            .get("/teacher")
            .dispatch()
            .await
            .into_string()
            .await
            .unwrap();

        assert!(page.contains("method: editingId ? 'PUT' : 'POST'"));
        assert!(page.contains("{ method: 'DELETE' }"));
        assert!(page.contains("/api/session/events"));
    }

    #[rocket::async_test]
    async fn test_teacher_cannot_reach_student_endpoints() {
        let test_portal = create_standard_test_portal().await;
        let client = setup_test_client(&test_portal).await;
        login_test_user(&client, TEACHER_EMAIL, "teacher").await;

        let response = client.get("/api/student/marks").dispatch().await;
        assert_eq!(response.status(), Status::Unauthorized);
        let body: Value = response.into_json().await.unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "Authentication required");

        let response = client.get("/student").dispatch().await;
        assert_eq!(response.status(), Status::SeeOther);
    }

    #[rocket::async_test]
    async fn test_student_cannot_write_marks() {
        let test_portal = create_standard_test_portal().await;
        let client = setup_test_client(&test_portal).await;
        login_test_user(&client, ASHA_EMAIL, "student").await;

        let response = client
            .post("/api/marks")
            .header(ContentType::JSON)
            .body(marks_body(10))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Unauthorized);

        let id = &test_portal.records[0].id;
        let response = client.delete(format!("/api/marks/{}", id)).dispatch().await;
        assert_eq!(response.status(), Status::Unauthorized);
    }

    #[rocket::async_test]
    async fn test_teacher_marks_crud() {
        let test_portal = create_standard_test_portal().await;
        let client = setup_test_client(&test_portal).await;
        login_test_user(&client, TEACHER_EMAIL, "teacher").await;

        let response = client
            .post("/api/marks")
            .header(ContentType::JSON)
            .body(marks_body(15))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let created: ApiResponse<MarksRecord> = response.into_json().await.unwrap();
        assert!(created.success);
        assert_eq!(
            created.message.as_deref(),
            Some("Marks uploaded successfully for Meera Iyer (Roll: 4)")
        );
        let record = created.data.unwrap();
        assert_eq!(record.fields.branch, "ECE");
        assert_eq!(record.fields.percentage, "75.00");

        let listed: ApiResponse<Vec<MarksRecord>> = client
            .get("/api/marks?branch=ece&section=B")
            .dispatch()
            .await
            .into_json()
            .await
            .unwrap();
        assert_eq!(listed.data.unwrap(), vec![record.clone()]);

        let response = client
            .put(format!("/api/marks/{}", record.id))
            .header(ContentType::JSON)
            .body(marks_body(18))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let updated: ApiResponse<MarksRecord> = response.into_json().await.unwrap();
        assert_eq!(updated.message.as_deref(), Some("Marks updated successfully."));
        let updated = updated.data.unwrap();
        assert_eq!(updated.fields.percentage, "90.00");
        assert_eq!(updated.created_at, record.created_at);
        assert_eq!(updated.fields.teacher_id, record.fields.teacher_id);
        assert_eq!(updated.fields.student_id, record.fields.student_id);

        let listed: ApiResponse<Vec<MarksRecord>> = client
            .get("/api/marks?branch=ECE&section=b")
            .dispatch()
            .await
            .into_json()
            .await
            .unwrap();
        assert_eq!(listed.data.unwrap(), vec![updated.clone()]);

        let response = client
            .delete(format!("/api/marks/{}", record.id))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let deleted: ApiResponse<()> = response.into_json().await.unwrap();
        assert_eq!(deleted.message.as_deref(), Some("Entry deleted successfully."));

        let listed: ApiResponse<Vec<MarksRecord>> = client
            .get("/api/marks?branch=ECE&section=B")
            .dispatch()
            .await
            .into_json()
            .await
            .unwrap();
        assert!(listed.data.unwrap().is_empty());
        assert_eq!(
            listed.message.as_deref(),
            Some("No marks found for this branch and section")
        );
    }

    #[rocket::async_test]
    async fn test_marks_requests_are_validated() {
        let test_portal = create_standard_test_portal().await;
        let client = setup_test_client(&test_portal).await;
        login_test_user(&client, TEACHER_EMAIL, "teacher").await;

        let response = client
            .post("/api/marks")
            .header(ContentType::JSON)
            .body(
                json!({
                    "year": "2024",
                    "branch": "",
                    "section": "b",
                    "rollNumber": "4",
                    "studentName": "Meera Iyer",
                    "studentEmail": "not-an-email",
                    "period": "quiz",
                    "marks": -1,
                })
                .to_string(),
            )
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::UnprocessableEntity);
        let body: ValidationResponse = response.into_json().await.unwrap();
        let messages: Vec<&str> = body
            .errors
            .values()
            .flatten()
            .map(String::as_str)
            .collect();
        for expected in [
            "Branch is required",
            "Please enter a valid student email",
            "Please select an assessment period",
            "Marks cannot be negative",
        ] {
            assert!(messages.contains(&expected), "missing {:?}", expected);
        }
        assert_eq!(body.errors.len(), 4);

        let response = client.get("/api/marks?branch=CSE").dispatch().await;
        assert_eq!(response.status(), Status::BadRequest);
        let body: ApiResponse<()> = response.into_json().await.unwrap();
        assert_eq!(body.error.as_deref(), Some("Please enter both branch and section"));

        let response = client
            .put("/api/marks/missing")
            .header(ContentType::JSON)
            .body(marks_body(1))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::NotFound);
    }

    #[rocket::async_test]
    async fn test_student_sees_own_marks_with_grades() {
        let test_portal = create_standard_test_portal().await;
        let client = setup_test_client(&test_portal).await;
        login_test_user(&client, ASHA_EMAIL, "student").await;

        let response: ApiResponse<StudentMarks> = client
            .get("/api/student/marks")
            .dispatch()
            .await
            .into_json()
            .await
            .unwrap();

        assert!(response.success);
        assert!(response.message.is_none());
        let marks = response.data.unwrap();
        assert_eq!(marks.records.len(), 2);
        assert!(
            marks
                .records
                .iter()
                .all(|m| m.record.fields.student_email == ASHA_EMAIL)
        );
        assert_eq!(marks.records[0].grade, Grade::APlus);
        assert_eq!(marks.records[0].period_label, "Mid-Term 1");
        assert_eq!(marks.records[1].grade, Grade::BPlus);
        assert_eq!(marks.summary.average, "80.0");
        assert_eq!(marks.summary.highest, "90.0");
    }

    #[rocket::async_test]
    async fn test_student_without_marks_gets_a_hint() {
        let test_portal = TestPortalBuilder::new()
            .teacher(TEACHER_EMAIL)
            .student(RAVI_EMAIL)
            .build()
            .await
            .unwrap();
        let client = setup_test_client(&test_portal).await;
        login_test_user(&client, RAVI_EMAIL, "student").await;

        let response: ApiResponse<StudentMarks> = client
            .get("/api/student/marks")
            .dispatch()
            .await
            .into_json()
            .await
            .unwrap();

        assert!(response.success);
        assert_eq!(
            response.message.as_deref(),
            Some("No marks found. Please contact your teacher if you believe this is an error.")
        );
        let marks = response.data.unwrap();
        assert!(marks.records.is_empty());
        assert_eq!(marks.summary.average, "0.0");
        assert_eq!(marks.summary.highest, "0");
    }
}
