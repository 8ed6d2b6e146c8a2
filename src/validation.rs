use std::borrow::Cow;
use std::collections::HashMap;

use rocket::Responder;
use rocket::http::Status;
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::api::ApiResponse;
use crate::auth::Role;
use crate::error::AppError;
use crate::models::Period;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ValidationResponse {
    pub status: String,
    pub errors: HashMap<String, Vec<String>>,
}

impl ValidationResponse {
    pub fn new(errors: HashMap<String, Vec<String>>) -> Self {
        Self {
            status: "error".to_string(),
            errors,
        }
    }
}

impl From<ValidationErrors> for ValidationResponse {
    fn from(errors: ValidationErrors) -> Self {
        let mut error_map = HashMap::new();

        for (field, field_errors) in errors.field_errors() {
            let error_messages: Vec<String> = field_errors
                .iter()
                .map(|error| {
                    error
                        .message
                        .clone()
                        .unwrap_or_else(|| "Invalid value".into())
                        .to_string()
                })
                .collect();

            error_map.insert(field.to_string(), error_messages);
        }

        Self::new(error_map)
    }
}

/// Error side of every API handler: either a field-level validation report
/// (422) or a failed envelope whose status follows the error kind.
#[derive(Responder)]
pub enum ApiError {
    Invalid(Custom<Json<ValidationResponse>>),
    Failed(Custom<Json<ApiResponse<()>>>),
}

impl From<ValidationErrors> for ApiError {
    #[instrument(skip_all)]
    fn from(errors: ValidationErrors) -> Self {
        warn!(errors = %errors, "Request failed validation");
        ApiError::Invalid(Custom(
            Status::UnprocessableEntity,
            Json(ValidationResponse::from(errors)),
        ))
    }
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        let status = err.to_status_with_log("API request");
        ApiError::Failed(Custom(status, Json(ApiResponse::failure(err.user_message()))))
    }
}

pub trait JsonValidateExt<T> {
    fn validate_custom(self) -> Result<T, ApiError>;
}

impl<T: Validate> JsonValidateExt<T> for Json<T> {
    fn validate_custom(self) -> Result<T, ApiError> {
        self.validate()?;
        Ok(self.into_inner())
    }
}

fn invalid(code: &'static str, message: &'static str) -> ValidationError {
    ValidationError::new(code).with_message(Cow::Borrowed(message))
}

pub fn validate_role(role: &str) -> Result<(), ValidationError> {
    role.parse::<Role>()
        .map(|_| ())
        .map_err(|_| invalid("role", "Please select a role"))
}

pub fn validate_period(period: &str) -> Result<(), ValidationError> {
    period
        .parse::<Period>()
        .map(|_| ())
        .map_err(|_| invalid("period", "Please select an assessment period"))
}
