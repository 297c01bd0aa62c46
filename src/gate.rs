//! The authorization pipeline.
//!
//! Each gate consumes the context produced by the previous one and returns a
//! richer one, so a handler that holds an [`EnrolledSubject`] has provably
//! passed identity, account and enrollment checks in that order.

use uuid::Uuid;

use crate::{
    auth::Subject,
    error::{AppError, AppResult},
    models::{ApprovalState, Content, Enrollment, Role, User},
    repository::Repository,
};

/// ApprovedSubject
///
/// A subject whose user record exists and is `active` right now. Carries the
/// live user row, so role checks downstream never rely on the credential's
/// role claim.
#[derive(Debug, Clone)]
pub struct ApprovedSubject {
    pub user: User,
}

impl ApprovedSubject {
    pub fn id(&self) -> Uuid {
        self.user.id
    }

    pub fn role(&self) -> Role {
        self.user.role
    }
}

/// Account gate. Re-reads the user on every call: approval can be revoked
/// after a credential is issued.
pub async fn require_approved(repo: &dyn Repository, subject: Subject) -> AppResult<ApprovedSubject> {
    let user = repo
        .find_user(subject.id)
        .await?
        .ok_or(AppError::SubjectNotFound)?;

    match user.approval_state {
        ApprovalState::Active => Ok(ApprovedSubject { user }),
        ApprovalState::Pending | ApprovalState::Rejected => {
            tracing::debug!(user_id = %user.id, state = ?user.approval_state, "account gate denied");
            Err(AppError::AccountNotApproved)
        }
    }
}

/// Role gate. Pure.
pub fn require_role(subject: ApprovedSubject, role: Role) -> AppResult<ApprovedSubject> {
    if subject.role() == role {
        Ok(subject)
    } else {
        Err(AppError::InsufficientRole)
    }
}

/// What a request targets, as raw path text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CourseTarget {
    Course(String),
    Content(String),
}

/// ResolvedCourse
///
/// The owning course of a request. For content-scoped requests the content row
/// read during resolution is kept so handlers don't look it up again.
#[derive(Debug, Clone)]
pub struct ResolvedCourse {
    pub course_id: Uuid,
    pub content: Option<Content>,
}

/// Parses a path identifier, failing with `InvalidIdentifier` on malformed input.
pub fn parse_id(raw: &str) -> AppResult<Uuid> {
    Uuid::parse_str(raw.trim()).map_err(|_| AppError::InvalidIdentifier(raw.to_string()))
}

/// Enrollment resolver.
pub async fn resolve_course(repo: &dyn Repository, target: CourseTarget) -> AppResult<ResolvedCourse> {
    match target {
        CourseTarget::Course(raw) => Ok(ResolvedCourse {
            course_id: parse_id(&raw)?,
            content: None,
        }),
        CourseTarget::Content(raw) => {
            let content_id = parse_id(&raw)?;
            let content = repo
                .find_content(content_id)
                .await?
                .ok_or(AppError::ContentNotFound)?;

            let course_id = content.course_id.ok_or_else(|| {
                AppError::DataIntegrity(format!("content {content_id} has no owning course"))
            })?;

            Ok(ResolvedCourse {
                course_id,
                content: Some(content),
            })
        }
    }
}

/// EnrolledSubject
///
/// An approved subject holding an enrollment that grants access to
/// `course_id`. The enrollment row is handed to downstream services as-is.
#[derive(Debug, Clone)]
pub struct EnrolledSubject {
    pub subject: ApprovedSubject,
    pub course_id: Uuid,
    pub enrollment: Enrollment,
    pub content: Option<Content>,
}

/// Enrollment gate. `active` and `completed` enrollments grant access;
/// `pending` and `rejected` never do.
pub async fn require_enrollment(
    repo: &dyn Repository,
    subject: ApprovedSubject,
    resolved: ResolvedCourse,
) -> AppResult<EnrolledSubject> {
    let ResolvedCourse { course_id, content } = resolved;

    if repo.find_course(course_id).await?.is_none() {
        return Err(AppError::CourseNotFound);
    }

    let enrollment = repo
        .find_open_enrollment(subject.id(), course_id)
        .await?
        .filter(|e| e.status.grants_access())
        .ok_or(AppError::NotEnrolled)?;

    Ok(EnrolledSubject {
        subject,
        course_id,
        enrollment,
        content,
    })
}
