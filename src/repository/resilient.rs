use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;
use uuid::Uuid;

use super::{CascadePlan, Repository, RepositoryState};
use crate::error::{OpKind, StoreError};
use crate::models::{
    ApprovalState, Content, Course, Enrollment, EnrollmentFilter, EnrollmentStatus, Module,
    ProgressCounts, ProgressRecord, UpdateCourseRequest, UpdateModuleRequest, User,
};

/// RetryPolicy
///
/// Bounds applied to every store call: a per-attempt timeout, the number of
/// additional attempts after the first, and the base delay of the exponential
/// backoff between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(2000),
            retries: 2,
            backoff: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    fn delay(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// with_retry
///
/// Runs `f` under `policy`. Each attempt is bounded by `policy.timeout`.
/// Failures that are retryable for `kind` are replayed up to `policy.retries`
/// times; everything else is returned immediately.
pub async fn with_retry<T, F, Fut>(
    policy: RetryPolicy,
    op: &'static str,
    kind: OpKind,
    mut f: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempt = 0;
    loop {
        let outcome = match tokio::time::timeout(policy.timeout, f()).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(policy.timeout)),
        };

        match outcome {
            Err(err) if attempt < policy.retries && err.is_retryable(kind) => {
                let delay = policy.delay(attempt);
                tracing::warn!(op, attempt = attempt + 1, ?delay, error = %err, "retrying store call");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                if err.is_retryable(kind) {
                    tracing::error!(op, attempts = attempt + 1, error = %err, "store retries exhausted");
                }
                return Err(err);
            }
            Ok(value) => return Ok(value),
        }
    }
}

/// ResilientRepository
///
/// Decorates another repository with [`with_retry`], so connectivity blips
/// are absorbed here and never reach the gates or services as a hang.
pub struct ResilientRepository {
    inner: RepositoryState,
    policy: RetryPolicy,
}

impl ResilientRepository {
    pub fn new(inner: RepositoryState, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl Repository for ResilientRepository {
    async fn find_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        with_retry(self.policy, "find_user", OpKind::Read, || self.inner.find_user(id)).await
    }

    async fn insert_user(&self, user: User) -> Result<User, StoreError> {
        with_retry(self.policy, "insert_user", OpKind::Write, || {
            self.inner.insert_user(user.clone())
        })
        .await
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        with_retry(self.policy, "list_users", OpKind::Read, || self.inner.list_users()).await
    }

    async fn set_user_approval(
        &self,
        id: Uuid,
        state: ApprovalState,
    ) -> Result<Option<User>, StoreError> {
        with_retry(self.policy, "set_user_approval", OpKind::Write, || {
            self.inner.set_user_approval(id, state)
        })
        .await
    }

    async fn find_course(&self, id: Uuid) -> Result<Option<Course>, StoreError> {
        with_retry(self.policy, "find_course", OpKind::Read, || self.inner.find_course(id)).await
    }

    async fn list_courses(&self) -> Result<Vec<Course>, StoreError> {
        with_retry(self.policy, "list_courses", OpKind::Read, || {
            self.inner.list_courses()
        })
        .await
    }

    async fn insert_course(&self, course: Course) -> Result<Course, StoreError> {
        with_retry(self.policy, "insert_course", OpKind::Write, || {
            self.inner.insert_course(course.clone())
        })
        .await
    }

    async fn update_course(
        &self,
        id: Uuid,
        changes: UpdateCourseRequest,
        at: DateTime<Utc>,
    ) -> Result<Option<Course>, StoreError> {
        with_retry(self.policy, "update_course", OpKind::Write, || {
            self.inner.update_course(id, changes.clone(), at)
        })
        .await
    }

    async fn find_module(&self, id: Uuid) -> Result<Option<Module>, StoreError> {
        with_retry(self.policy, "find_module", OpKind::Read, || self.inner.find_module(id)).await
    }

    async fn list_modules(&self, course_id: Uuid) -> Result<Vec<Module>, StoreError> {
        with_retry(self.policy, "list_modules", OpKind::Read, || {
            self.inner.list_modules(course_id)
        })
        .await
    }

    async fn update_module(
        &self,
        id: Uuid,
        changes: UpdateModuleRequest,
        at: DateTime<Utc>,
    ) -> Result<Option<Module>, StoreError> {
        with_retry(self.policy, "update_module", OpKind::Write, || {
            self.inner.update_module(id, changes.clone(), at)
        })
        .await
    }

    async fn find_content(&self, id: Uuid) -> Result<Option<Content>, StoreError> {
        with_retry(self.policy, "find_content", OpKind::Read, || {
            self.inner.find_content(id)
        })
        .await
    }

    async fn list_content(&self, module_id: Uuid) -> Result<Vec<Content>, StoreError> {
        with_retry(self.policy, "list_content", OpKind::Read, || {
            self.inner.list_content(module_id)
        })
        .await
    }

    async fn replace_content(&self, content: Content) -> Result<Option<Content>, StoreError> {
        with_retry(self.policy, "replace_content", OpKind::Write, || {
            self.inner.replace_content(content.clone())
        })
        .await
    }

    async fn apply(&self, plan: CascadePlan) -> Result<(), StoreError> {
        with_retry(self.policy, "apply", OpKind::Write, || {
            self.inner.apply(plan.clone())
        })
        .await
    }

    async fn find_enrollment(&self, id: Uuid) -> Result<Option<Enrollment>, StoreError> {
        with_retry(self.policy, "find_enrollment", OpKind::Read, || {
            self.inner.find_enrollment(id)
        })
        .await
    }

    async fn find_open_enrollment(
        &self,
        user_id: Uuid,
        course_id: Uuid,
    ) -> Result<Option<Enrollment>, StoreError> {
        with_retry(self.policy, "find_open_enrollment", OpKind::Read, || {
            self.inner.find_open_enrollment(user_id, course_id)
        })
        .await
    }

    async fn list_enrollments(
        &self,
        filter: EnrollmentFilter,
    ) -> Result<Vec<Enrollment>, StoreError> {
        with_retry(self.policy, "list_enrollments", OpKind::Read, || {
            self.inner.list_enrollments(filter.clone())
        })
        .await
    }

    async fn insert_enrollment(&self, enrollment: Enrollment) -> Result<Enrollment, StoreError> {
        with_retry(self.policy, "insert_enrollment", OpKind::Write, || {
            self.inner.insert_enrollment(enrollment.clone())
        })
        .await
    }

    async fn transition_enrollment(
        &self,
        id: Uuid,
        from: EnrollmentStatus,
        to: EnrollmentStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Enrollment>, StoreError> {
        with_retry(self.policy, "transition_enrollment", OpKind::Write, || {
            self.inner.transition_enrollment(id, from, to, at)
        })
        .await
    }

    async fn refresh_enrollment_progress(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<Enrollment>, StoreError> {
        with_retry(self.policy, "refresh_enrollment_progress", OpKind::Write, || {
            self.inner.refresh_enrollment_progress(id, at)
        })
        .await
    }

    async fn toggle_progress(
        &self,
        user_id: Uuid,
        content_id: Uuid,
        course_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(ProgressRecord, bool), StoreError> {
        with_retry(self.policy, "toggle_progress", OpKind::Write, || {
            self.inner.toggle_progress(user_id, content_id, course_id, at)
        })
        .await
    }

    async fn list_progress(
        &self,
        user_id: Option<Uuid>,
        course_id: Uuid,
    ) -> Result<Vec<ProgressRecord>, StoreError> {
        with_retry(self.policy, "list_progress", OpKind::Read, || {
            self.inner.list_progress(user_id, course_id)
        })
        .await
    }

    async fn progress_counts(
        &self,
        user_id: Uuid,
        course_id: Uuid,
    ) -> Result<ProgressCounts, StoreError> {
        with_retry(self.policy, "progress_counts", OpKind::Read, || {
            self.inner.progress_counts(user_id, course_id)
        })
        .await
    }
}
