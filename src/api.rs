use chrono::Utc;
use rocket::State;
use rocket::http::{Cookie, CookieJar, SameSite};
use rocket::response::stream::{Event, EventStream};
use rocket::serde::json::Json;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use validator::Validate;

use crate::auth::{
    Identity, Role, SESSION_COOKIE, Session, SignedIn, StudentSession, TeacherSession,
};
use crate::error::AppError;
use crate::models::{MarksEntry, MarksRecord, Period};
use crate::state::Portal;
use crate::stats::{Grade, MarksSummary, parse_percentage};
use crate::validation::{ApiError, JsonValidateExt, validate_period, validate_role};

/// Envelope for every marks operation: `{success, data?, error?, message?}`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            message: None,
        }
    }

    pub fn done() -> Self {
        Self {
            success: true,
            data: None,
            error: None,
            message: None,
        }
    }

    pub fn failure(error: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

pub type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

#[derive(Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "Email is required"))]
    email: String,
    #[validate(length(min = 1, message = "Password is required"))]
    password: String,
    #[validate(length(min = 1, message = "Please select a role"))]
    role: String,
}

#[derive(Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(contains(pattern = "@", message = "Please enter a valid email address"))]
    email: String,
    #[validate(length(min = 6, message = "Password must be at least 6 characters long"))]
    password: String,
    #[validate(custom(function = "validate_role"))]
    role: String,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub success: bool,
    pub identity: Option<Identity>,
    pub role: Option<Role>,
    pub error: Option<String>,
    pub redirect_url: Option<String>,
}

impl LoginResponse {
    fn signed_in(identity: Identity, role: Role) -> Self {
        Self {
            success: true,
            identity: Some(identity),
            role: Some(role),
            error: None,
            redirect_url: Some(role.home().to_string()),
        }
    }

    fn failure(error: String) -> Self {
        Self {
            success: false,
            identity: None,
            role: None,
            error: Some(error),
            redirect_url: None,
        }
    }
}

/// The cookie lives exactly as long as the gateway session behind it.
fn set_session_cookie(cookies: &CookieJar<'_>, signed_in: &SignedIn, secure: bool) {
    let remaining = (signed_in.expires_at - Utc::now()).num_seconds().max(0);

    cookies.add_private(
        Cookie::build((SESSION_COOKIE, signed_in.token.clone()))
            .same_site(SameSite::Lax)
            .http_only(true)
            .secure(secure)
            .max_age(rocket::time::Duration::seconds(remaining)),
    );
}

#[post("/register", data = "<registration>")]
pub async fn api_register(
    registration: Json<RegisterRequest>,
    cookies: &CookieJar<'_>,
    portal: &State<Portal>,
) -> Result<Json<LoginResponse>, ApiError> {
    let validated = registration.validate_custom()?;
    let role = validated.role.parse::<Role>()?;

    match portal
        .register(&validated.email, &validated.password, role)
        .await
    {
        Ok(signed_in) => {
            set_session_cookie(cookies, &signed_in, portal.config.is_production());
            Ok(Json(LoginResponse::signed_in(signed_in.identity, role)))
        }
        Err(err) => {
            err.log_and_record("Registration");
            Ok(Json(LoginResponse::failure(err.user_message())))
        }
    }
}

#[post("/login", data = "<login>")]
pub async fn api_login(
    login: Json<LoginRequest>,
    cookies: &CookieJar<'_>,
    portal: &State<Portal>,
) -> Result<Json<LoginResponse>, ApiError> {
    let validated = login.validate_custom()?;

    match portal
        .sign_in(&validated.email, &validated.password, &validated.role)
        .await
    {
        Ok((signed_in, role)) => {
            set_session_cookie(cookies, &signed_in, portal.config.is_production());
            Ok(Json(LoginResponse::signed_in(signed_in.identity, role)))
        }
        Err(err) => {
            err.log_and_record("Login");
            Ok(Json(LoginResponse::failure(err.user_message())))
        }
    }
}

#[post("/logout")]
pub async fn api_logout(cookies: &CookieJar<'_>, portal: &State<Portal>) -> ApiResult<()> {
    let token = cookies
        .get_private(SESSION_COOKIE)
        .map(|c| c.value().to_string());

    cookies.remove_private(Cookie::build(SESSION_COOKIE));

    if let Some(token) = token {
        if let Err(err) = portal.identity.sign_out(&token).await {
            err.log_and_record("Logout");
        }
    }

    Ok(Json(ApiResponse::done()))
}

#[get("/session")]
pub fn api_session(session: Session) -> Json<Session> {
    Json(session)
}

/// Server-sent session updates for the caller's own session cookie. The
/// stream ends once that session is signed out (or was never signed in).
#[get("/session/events")]
pub fn api_session_events(cookies: &CookieJar<'_>, portal: &State<Portal>) -> EventStream![] {
    let token = cookies
        .get_private(SESSION_COOKIE)
        .map(|c| c.value().to_string());
    let mut watch = portal.resolver().follow(portal.identity.clone(), token);

    EventStream! {
        while let Some(session) = watch.changed().await {
            yield Event::json(&session);
        }
    }
}

/// Body of the teacher's marks form. The checks here mirror the form's own
/// constraints; the repository repeats none of them.
#[derive(Deserialize, Validate, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct MarksRequest {
    #[validate(length(min = 1, message = "Year is required"))]
    pub year: String,
    #[validate(length(min = 1, message = "Branch is required"))]
    pub branch: String,
    #[validate(length(min = 1, message = "Section is required"))]
    pub section: String,
    #[validate(length(min = 1, message = "Roll number is required"))]
    pub roll_number: String,
    #[validate(length(min = 1, message = "Student name is required"))]
    pub student_name: String,
    #[validate(contains(pattern = "@", message = "Please enter a valid student email"))]
    pub student_email: String,
    #[serde(default)]
    pub student_id: Option<String>,
    #[validate(custom(function = "validate_period"))]
    pub period: String,
    #[validate(range(min = 0, message = "Marks cannot be negative"))]
    pub marks: i64,
    #[serde(default = "default_max_marks")]
    #[validate(range(min = 1, message = "Max marks must be at least 1"))]
    pub max_marks: i64,
}

fn default_max_marks() -> i64 {
    100
}

impl From<MarksRequest> for MarksEntry {
    fn from(request: MarksRequest) -> Self {
        Self {
            year: request.year,
            branch: request.branch,
            section: request.section,
            roll_number: request.roll_number,
            student_name: request.student_name,
            student_email: request.student_email,
            student_id: request.student_id,
            period: request.period,
            marks: request.marks,
            max_marks: request.max_marks,
        }
    }
}

#[post("/marks", data = "<marks>")]
pub async fn api_create_marks(
    marks: Json<MarksRequest>,
    teacher: TeacherSession,
    portal: &State<Portal>,
) -> ApiResult<MarksRecord> {
    let validated = marks.validate_custom()?;
    let message = format!(
        "Marks uploaded successfully for {} (Roll: {})",
        validated.student_name, validated.roll_number
    );

    let record = portal
        .marks()
        .create(validated.into(), &teacher.0.uid)
        .await?;

    Ok(Json(ApiResponse::ok(record).with_message(message)))
}

#[get("/marks?<branch>&<section>")]
pub async fn api_get_marks(
    branch: Option<String>,
    section: Option<String>,
    _teacher: TeacherSession,
    portal: &State<Portal>,
) -> ApiResult<Vec<MarksRecord>> {
    let present = |value: Option<String>| value.filter(|v| !v.trim().is_empty());

    let (branch, section) = match (present(branch), present(section)) {
        (Some(branch), Some(section)) => (branch, section),
        _ => {
            return Err(AppError::Validation(
                "Please enter both branch and section".to_string(),
            )
            .into());
        }
    };

    let records = portal
        .marks()
        .find_by_branch_section(&branch, &section)
        .await?;

    let response = if records.is_empty() {
        ApiResponse::ok(records).with_message("No marks found for this branch and section")
    } else {
        ApiResponse::ok(records)
    };

    Ok(Json(response))
}

#[put("/marks/<id>", data = "<marks>")]
pub async fn api_update_marks(
    id: &str,
    marks: Json<MarksRequest>,
    _teacher: TeacherSession,
    portal: &State<Portal>,
) -> ApiResult<MarksRecord> {
    let validated = marks.validate_custom()?;
    let record = portal.marks().update(id, validated.into()).await?;

    Ok(Json(
        ApiResponse::ok(record).with_message("Marks updated successfully."),
    ))
}

#[delete("/marks/<id>")]
pub async fn api_delete_marks(
    id: &str,
    _teacher: TeacherSession,
    portal: &State<Portal>,
) -> ApiResult<()> {
    portal.marks().delete(id).await?;
    Ok(Json(
        ApiResponse::done().with_message("Entry deleted successfully."),
    ))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct StudentMark {
    #[serde(flatten)]
    pub record: MarksRecord,
    pub grade: Grade,
    pub period_label: String,
}

impl From<MarksRecord> for StudentMark {
    fn from(record: MarksRecord) -> Self {
        Self {
            grade: Grade::from_percentage(parse_percentage(&record.fields.percentage)),
            period_label: Period::label_for(&record.fields.period),
            record,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StudentMarks {
    pub records: Vec<StudentMark>,
    pub summary: MarksSummary,
}

#[get("/student/marks")]
pub async fn api_get_student_marks(
    student: StudentSession,
    portal: &State<Portal>,
) -> ApiResult<StudentMarks> {
    let records = portal.marks().find_for_student(&student.0).await?;
    let summary = MarksSummary::of(&records);
    let empty = records.is_empty();

    let response = ApiResponse::ok(StudentMarks {
        records: records.into_iter().map(StudentMark::from).collect(),
        summary,
    });

    if empty {
        return Ok(Json(response.with_message(
            "No marks found. Please contact your teacher if you believe this is an error.",
        )));
    }

    Ok(Json(response))
}

#[get("/health")]
pub fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
