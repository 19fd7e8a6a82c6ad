//! Unified error handling for the REST API.
//!
//! Handlers return `Result<T, ApiError>`. Every variant maps to a status
//! code and a `{"detail": "..."}` body; internal failures are logged and
//! reported to the client without their text.

use crate::db::DbError;
use crate::media::MediaError;
use axum::Json;
use axum::extract::rejection::{FormRejection, JsonRejection, PathRejection, QueryRejection};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use validator::{ValidationError, ValidationErrors};

/// Message returned for any token that fails validation.
pub const CREDENTIALS_REJECTED: &str = "Could not validate credentials";

/// Errors surfaced by HTTP handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    /// Bearer token rejected; answered with `WWW-Authenticate: Bearer`.
    #[error("could not validate credentials")]
    CredentialsRejected,

    /// No bearer token supplied.
    #[error("not authenticated")]
    NotAuthenticated,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unprocessable(String),

    #[error("too many requests")]
    TooManyRequests,

    #[error("{0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn unauthorized(detail: impl Into<String>) -> Self {
        Self::Unauthorized(detail.into())
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::NotFound(detail.into())
    }

    pub fn unprocessable(detail: impl Into<String>) -> Self {
        Self::Unprocessable(detail.into())
    }

    pub fn internal(err: impl std::fmt::Display) -> Self {
        Self::Internal(err.to_string())
    }

    /// Get a static error code string for metrics labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::Unauthorized(_) => "unauthorized",
            Self::CredentialsRejected => "credentials_rejected",
            Self::NotAuthenticated => "not_authenticated",
            Self::Forbidden(_) => "forbidden",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Unprocessable(_) => "unprocessable",
            Self::TooManyRequests => "too_many_requests",
            Self::Unavailable(_) => "unavailable",
            Self::Internal(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) | Self::CredentialsRejected | Self::NotAuthenticated => {
                StatusCode::UNAUTHORIZED
            }
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Text placed in the `detail` field of the response body.
    pub fn detail(&self) -> String {
        match self {
            Self::CredentialsRejected => CREDENTIALS_REJECTED.to_string(),
            Self::NotAuthenticated => "Not authenticated".to_string(),
            Self::TooManyRequests => "Too many requests".to_string(),
            Self::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Internal(ref reason) = self {
            tracing::error!(error = %reason, "Request failed with internal error");
        }
        crate::metrics::record_error(self.error_code());

        let status = self.status();
        let body = Json(json!({ "detail": self.detail() }));
        let mut response = (status, body).into_response();
        if matches!(self, Self::CredentialsRejected | Self::NotAuthenticated) {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::UserExists(_) => Self::Conflict("Account already exists".into()),
            DbError::ContactExists(_) => {
                Self::Conflict("A contact with this email address already exists".into())
            }
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<MediaError> for ApiError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::Disabled => Self::Unavailable("Avatar uploads are disabled".into()),
            MediaError::Invalid(reason) => Self::Unprocessable(reason),
            other => Self::Internal(other.to_string()),
        }
    }
}

/// Reports the first failing field, in name order so the detail is stable.
impl From<ValidationErrors> for ApiError {
    fn from(errors: ValidationErrors) -> Self {
        let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
        fields.sort_by_key(|(field, _)| *field);
        let detail = fields
            .into_iter()
            .find_map(|(field, errs)| errs.first().map(|e| describe(field, e)))
            .unwrap_or_else(|| "Validation failed".to_string());
        Self::Unprocessable(detail)
    }
}

fn describe(field: &str, error: &ValidationError) -> String {
    if let Some(message) = &error.message {
        return format!("{field} {message}");
    }
    match error.code.as_ref() {
        "length" => match (error.params.get("min"), error.params.get("max")) {
            (Some(min), Some(max)) => format!("{field} must be between {min} and {max} characters"),
            (None, Some(max)) => format!("{field} must be at most {max} characters"),
            (Some(min), None) => format!("{field} must be at least {min} characters"),
            (None, None) => format!("{field} has an invalid length"),
        },
        "email" => format!("{field} is not a valid email address"),
        _ => format!("{field} is invalid"),
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Unprocessable(rejection.body_text())
    }
}

impl From<FormRejection> for ApiError {
    fn from(rejection: FormRejection) -> Self {
        Self::Unprocessable(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::Unprocessable(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::Unprocessable(rejection.body_text())
    }
}
