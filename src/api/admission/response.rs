//! Client-facing answers for denied or failed admissions.

use axum::{
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::protect::{EmailType, ProtectError, Reason};

pub const TOO_MANY_REQUESTS: &str = "Too many requests. Please try again later.";
pub const EMAIL_INVALID: &str = "Email address format is invalid.";
pub const EMAIL_DISPOSABLE: &str = "Disposable email addresses are not allowed.";
pub const EMAIL_NO_MX: &str = "Email domain is not valid.";
pub const EMAIL_OTHER: &str = "Invalid email address.";
pub const BOT_DETECTED: &str = "Bot detected. Access denied.";
pub const SECURITY_POLICY: &str = "Access denied due to security policy.";
pub const CHECK_UNAVAILABLE: &str = "Security check unavailable. Please try again later.";

#[derive(ToSchema, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: String,
}

#[must_use]
pub fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

/// Status and message for a denial reason.
#[must_use]
pub fn denial(reason: &Reason) -> (StatusCode, &'static str) {
    match reason {
        Reason::RateLimit { .. } => (StatusCode::TOO_MANY_REQUESTS, TOO_MANY_REQUESTS),
        Reason::Email { email_types } => (StatusCode::BAD_REQUEST, email_message(email_types)),
        Reason::Bot { .. } => (StatusCode::FORBIDDEN, BOT_DETECTED),
        Reason::Shield { .. } | Reason::Other => (StatusCode::FORBIDDEN, SECURITY_POLICY),
    }
}

// INVALID wins over DISPOSABLE, which wins over NO_MX_RECORDS.
fn email_message(email_types: &[EmailType]) -> &'static str {
    if email_types.contains(&EmailType::Invalid) {
        EMAIL_INVALID
    } else if email_types.contains(&EmailType::Disposable) {
        EMAIL_DISPOSABLE
    } else if email_types.contains(&EmailType::NoMxRecords) {
        EMAIL_NO_MX
    } else {
        EMAIL_OTHER
    }
}

#[must_use]
pub fn denial_response(reason: &Reason) -> Response {
    let (status, message) = denial(reason);
    let mut response = error_response(status, message);
    if let Reason::RateLimit { reset_seconds, .. } = reason {
        response
            .headers_mut()
            .insert(RETRY_AFTER, HeaderValue::from(*reset_seconds));
    }
    response
}

#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("request body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },
    #[error("request body could not be read: {0}")]
    BodyUnreadable(String),
    #[error("security check unavailable: {0}")]
    Unavailable(#[from] ProtectError),
}

impl IntoResponse for AdmissionError {
    fn into_response(self) -> Response {
        match self {
            Self::BodyTooLarge { .. } => {
                error_response(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large.")
            }
            Self::BodyUnreadable(_) => {
                error_response(StatusCode::BAD_REQUEST, "Request body could not be read.")
            }
            Self::Unavailable(_) => {
                error_response(StatusCode::SERVICE_UNAVAILABLE, CHECK_UNAVAILABLE)
            }
        }
    }
}
