//! Session Coordinator error types.
//!
//! Errors map to numeric client codes carried in `error` and `joinRejected`
//! events. Internal details are logged server-side but never exposed to
//! clients.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Reason a join request was refused.
///
/// Rejections are delivered only to the requesting connection. The
/// serialized form is a stable camelCase machine string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JoinRejection {
    /// The connection already occupies a different session room.
    AlreadyInSession,
    /// No slots remain for the requester's role.
    CapacityExceeded,
    /// Slots remain, but the requester is not at the front of the
    /// eligibility queue.
    NotEligible,
    /// The target session does not exist.
    SessionNotFound,
    /// The target session has already ended.
    SessionEnded,
}

impl JoinRejection {
    /// Stable machine reason string.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            JoinRejection::AlreadyInSession => "alreadyInSession",
            JoinRejection::CapacityExceeded => "capacityExceeded",
            JoinRejection::NotEligible => "notEligible",
            JoinRejection::SessionNotFound => "sessionNotFound",
            JoinRejection::SessionEnded => "sessionEnded",
        }
    }

    /// Numeric client code.
    #[must_use]
    pub const fn code(&self) -> i32 {
        match self {
            JoinRejection::NotEligible => 3,                                    // FORBIDDEN
            JoinRejection::SessionNotFound | JoinRejection::SessionEnded => 4, // NOT_FOUND
            JoinRejection::AlreadyInSession => 5,                               // CONFLICT
            JoinRejection::CapacityExceeded => 7, // CAPACITY_EXCEEDED
        }
    }

    /// Bounded label for the `outcome` metric label.
    #[must_use]
    pub const fn metric_label(&self) -> &'static str {
        match self {
            JoinRejection::AlreadyInSession => "already_in_session",
            JoinRejection::CapacityExceeded => "capacity_exceeded",
            JoinRejection::NotEligible => "not_eligible",
            JoinRejection::SessionNotFound => "session_not_found",
            JoinRejection::SessionEnded => "session_ended",
        }
    }
}

impl fmt::Display for JoinRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason())
    }
}

/// Session Coordinator error type.
///
/// Client codes:
/// - `BadRequest`: `INVALID_REQUEST` (1)
/// - `Authentication`: `UNAUTHORIZED` (2)
/// - `PermissionDenied`: `FORBIDDEN` (3)
/// - `ConnectionNotFound`: `NOT_FOUND` (4)
/// - `Rejected`: the rejection's own code
/// - `TransientStore`, `Internal`: `INTERNAL_ERROR` (6)
#[derive(Debug, Error)]
pub enum ScError {
    /// The identity token did not resolve to an identity.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The requester is not allowed to perform the operation.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Malformed or unsupported client command.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The connection is no longer registered.
    #[error("Connection not found: {0}")]
    ConnectionNotFound(String),

    /// Join request refused by admission control.
    #[error("Join rejected: {0}")]
    Rejected(JoinRejection),

    /// Store read or conditional update failed. Retried on the next
    /// scheduler tick; never fatal.
    #[error("Store error: {0}")]
    TransientStore(String),

    /// Internal error with context.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ScError {
    /// Returns the numeric client code for this error.
    #[must_use]
    pub fn error_code(&self) -> i32 {
        match self {
            ScError::BadRequest(_) => 1,                 // INVALID_REQUEST
            ScError::Authentication(_) => 2,             // UNAUTHORIZED
            ScError::PermissionDenied(_) => 3,           // FORBIDDEN
            ScError::ConnectionNotFound(_) => 4,         // NOT_FOUND
            ScError::Rejected(rejection) => rejection.code(),
            ScError::TransientStore(_) | ScError::Internal(_) => 6, // INTERNAL_ERROR
        }
    }

    /// Returns a bounded label string for the error variant (for metrics).
    #[must_use]
    pub fn error_type_label(&self) -> &'static str {
        match self {
            ScError::Authentication(_) => "authentication",
            ScError::PermissionDenied(_) => "permission_denied",
            ScError::BadRequest(_) => "bad_request",
            ScError::ConnectionNotFound(_) => "connection_not_found",
            ScError::Rejected(rejection) => rejection.metric_label(),
            ScError::TransientStore(_) => "transient_store",
            ScError::Internal(_) => "internal",
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            ScError::TransientStore(_) | ScError::Internal(_) => {
                "An internal error occurred".to_string()
            }
            ScError::Authentication(_) => "Unknown identity".to_string(),
            ScError::ConnectionNotFound(_) => "Connection closed".to_string(),
            ScError::Rejected(rejection) => rejection.reason().to_string(),
            ScError::PermissionDenied(msg) | ScError::BadRequest(msg) => msg.clone(),
        }
    }

    /// HTTP status for the upgrade and internal HTTP endpoints.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            ScError::Authentication(_) => StatusCode::UNAUTHORIZED,
            ScError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            ScError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ScError::ConnectionNotFound(_) => StatusCode::NOT_FOUND,
            ScError::Rejected(_) => StatusCode::CONFLICT,
            ScError::TransientStore(_) => StatusCode::SERVICE_UNAVAILABLE,
            ScError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: i32,
    message: String,
}

impl IntoResponse for ScError {
    fn into_response(self) -> Response {
        if let ScError::TransientStore(err) | ScError::Internal(err) = &self {
            tracing::error!(target: "sc.errors", error = %err, "Request failed");
        }

        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.error_code(),
                message: self.client_message(),
            },
        };
        (self.status_code(), Json(body)).into_response()
    }
}

impl From<JoinRejection> for ScError {
    fn from(rejection: JoinRejection) -> Self {
        ScError::Rejected(rejection)
    }
}

impl From<sqlx::Error> for ScError {
    fn from(err: sqlx::Error) -> Self {
        ScError::TransientStore(err.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(ScError::BadRequest("x".to_string()).error_code(), 1);
        assert_eq!(ScError::Authentication("bob".to_string()).error_code(), 2);
        assert_eq!(
            ScError::PermissionDenied("not creator".to_string()).error_code(),
            3
        );
        assert_eq!(ScError::ConnectionNotFound("c".to_string()).error_code(), 4);
        assert_eq!(ScError::TransientStore("db".to_string()).error_code(), 6);
        assert_eq!(ScError::Internal("oops".to_string()).error_code(), 6);
    }

    #[test]
    fn test_rejection_codes_are_distinct_for_capacity_and_eligibility() {
        assert_eq!(JoinRejection::CapacityExceeded.code(), 7);
        assert_eq!(JoinRejection::NotEligible.code(), 3);
        assert_ne!(
            JoinRejection::CapacityExceeded.reason(),
            JoinRejection::NotEligible.reason()
        );
        assert_eq!(ScError::Rejected(JoinRejection::AlreadyInSession).error_code(), 5);
    }

    #[test]
    fn test_rejection_serializes_as_reason() {
        let json = serde_json::to_string(&JoinRejection::AlreadyInSession).unwrap();
        assert_eq!(json, "\"alreadyInSession\"");

        for rejection in [
            JoinRejection::AlreadyInSession,
            JoinRejection::CapacityExceeded,
            JoinRejection::NotEligible,
            JoinRejection::SessionNotFound,
            JoinRejection::SessionEnded,
        ] {
            let json = serde_json::to_string(&rejection).unwrap();
            assert_eq!(json, format!("\"{}\"", rejection.reason()));
        }
    }

    #[test]
    fn test_client_messages_hide_internal_details() {
        let store_err = ScError::TransientStore("connection refused at 10.0.0.7:5432".to_string());
        assert!(!store_err.client_message().contains("10.0.0.7"));
        assert_eq!(store_err.client_message(), "An internal error occurred");

        let auth_err = ScError::Authentication("no identity for carol@example.com".to_string());
        assert!(!auth_err.client_message().contains("carol"));

        let denied = ScError::PermissionDenied("Only the creator may end a session".to_string());
        assert_eq!(denied.client_message(), "Only the creator may end a session");
    }

    #[test]
    fn test_rejection_conversion() {
        let err: ScError = JoinRejection::NotEligible.into();
        assert!(matches!(err, ScError::Rejected(JoinRejection::NotEligible)));
        assert_eq!(err.error_type_label(), "not_eligible");
        assert_eq!(err.client_message(), "notEligible");
    }

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            format!("{}", ScError::Rejected(JoinRejection::CapacityExceeded)),
            "Join rejected: capacityExceeded"
        );
        assert_eq!(
            format!("{}", ScError::TransientStore("timeout".to_string())),
            "Store error: timeout"
        );
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(
            ScError::Authentication("x".to_string()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ScError::TransientStore("x".to_string()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ScError::BadRequest("x".to_string()).into_response().status(),
            StatusCode::BAD_REQUEST
        );
    }
}
