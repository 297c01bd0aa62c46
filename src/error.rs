use std::time::Duration;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// StoreError
///
/// Failures raised by the persistence layer. Absence of a record is never a
/// `StoreError`: lookups return `Ok(None)` and listings return an empty `Vec`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached and the statement was never sent
    /// (pool exhausted or closed).
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The connection failed while a statement was in flight. The statement
    /// may or may not have taken effect.
    #[error("store connection interrupted: {0}")]
    Interrupted(String),

    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),

    /// A uniqueness constraint rejected the write.
    #[error("store conflict: {0}")]
    Conflict(String),

    /// A write referenced a record that does not exist (e.g. attaching a child
    /// to a parent that was deleted concurrently).
    #[error("missing record: {0}")]
    Missing(String),

    #[error("store failure: {0}")]
    Backend(String),
}

/// OpKind
///
/// Whether an operation may be replayed when its outcome is unknown. A write
/// that timed out or lost its connection mid-flight may already have been
/// applied, so only reads are replayed in those cases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Read,
    Write,
}

impl StoreError {
    /// Connectivity failures are the only class eligible for transparent retry.
    pub fn is_retryable(&self, kind: OpKind) -> bool {
        match self {
            StoreError::Unavailable(_) => true,
            StoreError::Interrupted(_) | StoreError::Timeout(_) => kind == OpKind::Read,
            _ => false,
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Conflict(db.message().to_string())
            }
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                StoreError::Missing(db.message().to_string())
            }
            sqlx::Error::PoolTimedOut => StoreError::Unavailable("connection pool timed out".into()),
            sqlx::Error::PoolClosed => StoreError::Unavailable("connection pool closed".into()),
            sqlx::Error::Io(e) => StoreError::Interrupted(e.to_string()),
            sqlx::Error::Tls(e) => StoreError::Interrupted(e.to_string()),
            sqlx::Error::RowNotFound => StoreError::Missing("row not found".into()),
            other => StoreError::Backend(other.to_string()),
        }
    }
}

/// AppError
///
/// The error taxonomy shared by the gates, the enrollment state machine, the
/// progress tracker and the cascade manager. Each variant maps to a distinct
/// HTTP status and a stable `code`, so a client can tell "you may never see
/// this" from "you don't currently have access" from "this doesn't exist".
#[derive(Debug, Error)]
pub enum AppError {
    #[error("authentication required: {0}")]
    Unauthenticated(String),

    #[error("account is not approved")]
    AccountNotApproved,

    #[error("insufficient role")]
    InsufficientRole,

    #[error("not enrolled in this course")]
    NotEnrolled,

    #[error("user not found")]
    SubjectNotFound,

    #[error("user not found")]
    UserNotFound,

    #[error("course not found")]
    CourseNotFound,

    #[error("module not found")]
    ModuleNotFound,

    #[error("content not found")]
    ContentNotFound,

    #[error("enrollment not found")]
    EnrollmentNotFound,

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("enrollment request already pending")]
    AlreadyPending,

    #[error("already enrolled in this course")]
    AlreadyEnrolled,

    #[error("enrollment is not pending (current status: {0})")]
    NotPending(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("data integrity violation: {0}")]
    DataIntegrity(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    /// Stable machine-readable code for the response body.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Unauthenticated(_) => "unauthenticated",
            AppError::AccountNotApproved => "account_not_approved",
            AppError::InsufficientRole => "insufficient_role",
            AppError::NotEnrolled => "not_enrolled",
            AppError::SubjectNotFound => "subject_not_found",
            AppError::UserNotFound => "user_not_found",
            AppError::CourseNotFound => "course_not_found",
            AppError::ModuleNotFound => "module_not_found",
            AppError::ContentNotFound => "content_not_found",
            AppError::EnrollmentNotFound => "enrollment_not_found",
            AppError::InvalidIdentifier(_) => "invalid_identifier",
            AppError::AlreadyPending => "already_pending",
            AppError::AlreadyEnrolled => "already_enrolled",
            AppError::NotPending(_) => "not_pending",
            AppError::Validation(_) => "validation",
            AppError::DataIntegrity(_) => "data_integrity",
            AppError::Store(
                StoreError::Unavailable(_) | StoreError::Interrupted(_) | StoreError::Timeout(_),
            ) => "store_unavailable",
            AppError::Store(StoreError::Conflict(_)) => "conflict",
            AppError::Store(StoreError::Missing(_)) => "missing_record",
            AppError::Store(StoreError::Backend(_)) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            AppError::AccountNotApproved | AppError::InsufficientRole | AppError::NotEnrolled => {
                StatusCode::FORBIDDEN
            }
            AppError::SubjectNotFound
            | AppError::UserNotFound
            | AppError::CourseNotFound
            | AppError::ModuleNotFound
            | AppError::ContentNotFound
            | AppError::EnrollmentNotFound => StatusCode::NOT_FOUND,
            AppError::InvalidIdentifier(_) | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::AlreadyPending | AppError::AlreadyEnrolled | AppError::NotPending(_) => {
                StatusCode::CONFLICT
            }
            AppError::DataIntegrity(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Store(
                StoreError::Unavailable(_) | StoreError::Interrupted(_) | StoreError::Timeout(_),
            ) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Store(StoreError::Conflict(_)) => StatusCode::CONFLICT,
            AppError::Store(StoreError::Missing(_)) => StatusCode::NOT_FOUND,
            AppError::Store(StoreError::Backend(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Internal failures keep their details in the logs only.
        let message = match &self {
            AppError::DataIntegrity(detail) => {
                tracing::error!(detail = %detail, "data integrity defect");
                "internal error".to_string()
            }
            AppError::Store(err) if status.is_server_error() => {
                tracing::error!(error = %err, "store failure");
                "storage temporarily unavailable".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": {
                "code": self.code(),
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorization_and_absence_are_distinguishable() {
        assert_eq!(AppError::NotEnrolled.status(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::ContentNotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            AppError::Unauthenticated("expired".into()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_ne!(AppError::NotEnrolled.code(), AppError::AccountNotApproved.code());
    }

    #[test]
    fn only_connectivity_failures_are_retryable() {
        let unavailable = StoreError::Unavailable("reset".into());
        let timeout = StoreError::Timeout(Duration::from_millis(5));
        let interrupted = StoreError::Interrupted("reset mid-query".into());

        assert!(unavailable.is_retryable(OpKind::Read));
        assert!(unavailable.is_retryable(OpKind::Write));
        assert!(timeout.is_retryable(OpKind::Read));
        assert!(!timeout.is_retryable(OpKind::Write));
        assert!(interrupted.is_retryable(OpKind::Read));
        assert!(!interrupted.is_retryable(OpKind::Write));
        assert!(!StoreError::Conflict("dup".into()).is_retryable(OpKind::Read));
        assert!(!StoreError::Backend("syntax".into()).is_retryable(OpKind::Read));
    }
}
