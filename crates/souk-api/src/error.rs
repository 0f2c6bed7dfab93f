use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use souk_types::moderation::{ModerationError, TransitionError};
use souk_types::phone::PhoneError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("authentication required")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(&'static str),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Conflict(String),

    #[error("file too large")]
    PayloadTooLarge,

    #[error("unsupported media type")]
    UnsupportedMediaType,

    #[error("something went wrong, please try again")]
    Internal,
}

#[derive(Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::PayloadTooLarge => "payload_too_large",
            Self::UnsupportedMediaType => "unsupported_media_type",
            Self::Internal => "internal_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorEnvelope {
            error: ErrorBody {
                code: self.code(),
                message: self.to_string(),
            },
        };
        (self.status(), Json(body)).into_response()
    }
}

/// Database failures: unique-constraint violations become friendly 409s,
/// everything else is logged and hidden behind a generic 500.
impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        if let Some(constraint) = souk_db::unique_violation(&err) {
            return Self::Conflict(conflict_message(&constraint).to_string());
        }
        error!("Database error: {:#}", err);
        Self::Internal
    }
}

impl From<PhoneError> for ApiError {
    fn from(err: PhoneError) -> Self {
        Self::BadRequest(err.to_string())
    }
}

impl From<ModerationError> for ApiError {
    fn from(err: ModerationError) -> Self {
        match err {
            ModerationError::MissingReason => Self::BadRequest(err.to_string()),
            ModerationError::Transition(_) => Self::Conflict(err.to_string()),
        }
    }
}

impl From<TransitionError> for ApiError {
    fn from(err: TransitionError) -> Self {
        Self::Conflict(err.to_string())
    }
}

fn conflict_message(constraint: &str) -> &'static str {
    match constraint {
        "profiles.email" => "an account already uses this e-mail address",
        "profiles.phone" => "an account already uses this phone number",
        "referrals.referred_id" => "this account already has a referrer",
        _ => "this record already exists",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_error(sql: &str) -> anyhow::Error {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE profiles (email TEXT UNIQUE, phone TEXT UNIQUE);
             INSERT INTO profiles VALUES ('a@x.cm', '+237699000000');",
        )
        .unwrap();
        conn.execute_batch(sql).unwrap_err().into()
    }

    #[test]
    fn unique_violation_maps_to_friendly_conflict() {
        let err: ApiError =
            unique_error("INSERT INTO profiles VALUES ('b@x.cm', '+237699000000');").into();
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.to_string(), "an account already uses this phone number");
    }

    #[test]
    fn other_database_errors_are_internal() {
        let err: ApiError = anyhow::anyhow!("disk I/O error").into();
        assert!(matches!(err, ApiError::Internal));
        assert_eq!(err.code(), "internal_error");
    }

    #[test]
    fn missing_rejection_reason_is_bad_request() {
        let err: ApiError = ModerationError::MissingReason.into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
