mod common;

use async_trait::async_trait;
use common::fixture;
use chrono::{DateTime, Utc};
use course_gate::{
    StoreError,
    error::OpKind,
    models::{
        ApprovalState, Content, Course, Enrollment, EnrollmentFilter, EnrollmentStatus, Module,
        ProgressCounts, ProgressRecord, UpdateCourseRequest, UpdateModuleRequest, User,
    },
    repository::{
        CascadePlan, InMemoryRepository, Repository, RepositoryState, ResilientRepository,
        RetryPolicy, resilient::with_retry,
    },
};
use std::{
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};
use uuid::Uuid;

fn policy(retries: u32) -> RetryPolicy {
    RetryPolicy {
        timeout: Duration::from_millis(50),
        retries,
        backoff: Duration::from_millis(1),
    }
}

#[tokio::test]
async fn test_connectivity_failures_are_retried_within_budget() {
    let calls = &AtomicU32::new(0);
    let result = with_retry(policy(2), "lookup", OpKind::Write, move || async move {
        if calls.fetch_add(1, Ordering::SeqCst) < 2 {
            Err(StoreError::Unavailable("connection pool timed out".into()))
        } else {
            Ok(7)
        }
    })
    .await;

    assert_eq!(result, Ok(7));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_exhausted_budget_returns_the_last_failure() {
    let calls = &AtomicU32::new(0);
    let result: Result<(), _> = with_retry(policy(1), "lookup", OpKind::Read, move || async move {
        calls.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Unavailable("down".into()))
    })
    .await;

    assert_eq!(result, Err(StoreError::Unavailable("down".into())));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_non_connectivity_failures_are_not_retried() {
    let calls = &AtomicU32::new(0);
    let result: Result<(), _> = with_retry(policy(5), "lookup", OpKind::Write, move || async move {
        calls.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Conflict("duplicate".into()))
    })
    .await;

    assert!(matches!(result, Err(StoreError::Conflict(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_timeouts_are_retried_for_reads_only() {
    let stall = || async {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok::<_, StoreError>(())
    };

    let reads = AtomicU32::new(0);
    let result = with_retry(policy(2), "read", OpKind::Read, || {
        reads.fetch_add(1, Ordering::SeqCst);
        stall()
    })
    .await;
    assert!(matches!(result, Err(StoreError::Timeout(_))));
    assert_eq!(reads.load(Ordering::SeqCst), 3);

    let writes = AtomicU32::new(0);
    let result = with_retry(policy(2), "write", OpKind::Write, || {
        writes.fetch_add(1, Ordering::SeqCst);
        stall()
    })
    .await;
    assert!(matches!(result, Err(StoreError::Timeout(_))));
    assert_eq!(writes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_interrupted_reads_are_retried() {
    let calls = &AtomicU32::new(0);
    let result = with_retry(policy(2), "lookup", OpKind::Read, move || async move {
        if calls.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(StoreError::Interrupted("connection reset by peer".into()))
        } else {
            Ok("row")
        }
    })
    .await;

    assert_eq!(result, Ok("row"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_interrupted_toggle_is_not_replayed() {
    let fx = fixture().await;
    let repo = fx.repo();
    let (user_id, content_id, course_id) = (fx.learner.id, fx.content[0].id, fx.course.id);

    // The toggle lands, then the connection drops before the reply arrives.
    let calls = &AtomicU32::new(0);
    let result = with_retry(policy(2), "toggle_progress", OpKind::Write, move || async move {
        let applied = repo
            .toggle_progress(user_id, content_id, course_id, Utc::now())
            .await;
        if calls.fetch_add(1, Ordering::SeqCst) == 0 {
            applied?;
            return Err(StoreError::Interrupted("connection reset by peer".into()));
        }
        applied
    })
    .await;

    assert!(matches!(result, Err(StoreError::Interrupted(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // A single click leaves the item completed, not flipped back.
    let records = repo.list_progress(Some(user_id), course_id).await.unwrap();
    assert_eq!(records.len(), 1);
    assert!(records[0].completed);
}

#[tokio::test]
async fn test_interrupted_enrollment_request_is_not_replayed() {
    let fx = fixture().await;
    let repo = fx.repo();
    let (user_id, course_id) = (fx.learner.id, fx.course.id);

    let calls = &AtomicU32::new(0);
    let result = with_retry(policy(2), "insert_enrollment", OpKind::Write, move || async move {
        let now = Utc::now();
        let applied = repo
            .insert_enrollment(Enrollment {
                id: Uuid::new_v4(),
                user_id,
                course_id,
                status: EnrollmentStatus::Pending,
                progress: 0,
                requested_at: now,
                updated_at: now,
            })
            .await;
        if calls.fetch_add(1, Ordering::SeqCst) == 0 {
            applied?;
            return Err(StoreError::Interrupted("connection reset by peer".into()));
        }
        applied
    })
    .await;

    // The caller sees the interruption rather than a conflict with its own row.
    assert!(matches!(result, Err(StoreError::Interrupted(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

// --- Decorator over a store that drops the first few calls ---

struct FlakyRepository {
    inner: InMemoryRepository,
    failures_left: AtomicU32,
}

impl FlakyRepository {
    fn new(failures: u32) -> Self {
        Self {
            inner: InMemoryRepository::new(),
            failures_left: AtomicU32::new(failures),
        }
    }

    fn trip(&self) -> Result<(), StoreError> {
        let tripped = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if tripped {
            Err(StoreError::Unavailable("connection pool timed out".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Repository for FlakyRepository {
    async fn find_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        self.trip()?;
        self.inner.find_user(id).await
    }
    async fn insert_user(&self, user: User) -> Result<User, StoreError> {
        self.trip()?;
        self.inner.insert_user(user).await
    }
    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        self.inner.list_users().await
    }
    async fn set_user_approval(
        &self,
        id: Uuid,
        state: ApprovalState,
    ) -> Result<Option<User>, StoreError> {
        self.inner.set_user_approval(id, state).await
    }
    async fn find_course(&self, id: Uuid) -> Result<Option<Course>, StoreError> {
        self.inner.find_course(id).await
    }
    async fn list_courses(&self) -> Result<Vec<Course>, StoreError> {
        self.inner.list_courses().await
    }
    async fn insert_course(&self, course: Course) -> Result<Course, StoreError> {
        self.inner.insert_course(course).await
    }
    async fn update_course(
        &self,
        id: Uuid,
        changes: UpdateCourseRequest,
        at: DateTime<Utc>,
    ) -> Result<Option<Course>, StoreError> {
        self.inner.update_course(id, changes, at).await
    }
    async fn find_module(&self, id: Uuid) -> Result<Option<Module>, StoreError> {
        self.inner.find_module(id).await
    }
    async fn list_modules(&self, course_id: Uuid) -> Result<Vec<Module>, StoreError> {
        self.inner.list_modules(course_id).await
    }
    async fn update_module(
        &self,
        id: Uuid,
        changes: UpdateModuleRequest,
        at: DateTime<Utc>,
    ) -> Result<Option<Module>, StoreError> {
        self.inner.update_module(id, changes, at).await
    }
    async fn find_content(&self, id: Uuid) -> Result<Option<Content>, StoreError> {
        self.inner.find_content(id).await
    }
    async fn list_content(&self, module_id: Uuid) -> Result<Vec<Content>, StoreError> {
        self.inner.list_content(module_id).await
    }
    async fn replace_content(&self, content: Content) -> Result<Option<Content>, StoreError> {
        self.inner.replace_content(content).await
    }
    async fn apply(&self, plan: CascadePlan) -> Result<(), StoreError> {
        self.inner.apply(plan).await
    }
    async fn find_enrollment(&self, id: Uuid) -> Result<Option<Enrollment>, StoreError> {
        self.inner.find_enrollment(id).await
    }
    async fn find_open_enrollment(
        &self,
        user_id: Uuid,
        course_id: Uuid,
    ) -> Result<Option<Enrollment>, StoreError> {
        self.inner.find_open_enrollment(user_id, course_id).await
    }
    async fn list_enrollments(
        &self,
        filter: EnrollmentFilter,
    ) -> Result<Vec<Enrollment>, StoreError> {
        self.inner.list_enrollments(filter).await
    }
    async fn insert_enrollment(&self, enrollment: Enrollment) -> Result<Enrollment, StoreError> {
        self.inner.insert_enrollment(enrollment).await
    }
    async fn transition_enrollment(
        &self,
        id: Uuid,
        from: EnrollmentStatus,
        to: EnrollmentStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Enrollment>, StoreError> {
        self.inner.transition_enrollment(id, from, to, at).await
    }
    async fn refresh_enrollment_progress(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<Enrollment>, StoreError> {
        self.inner.refresh_enrollment_progress(id, at).await
    }
    async fn toggle_progress(
        &self,
        user_id: Uuid,
        content_id: Uuid,
        course_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(ProgressRecord, bool), StoreError> {
        self.inner
            .toggle_progress(user_id, content_id, course_id, at)
            .await
    }
    async fn list_progress(
        &self,
        user_id: Option<Uuid>,
        course_id: Uuid,
    ) -> Result<Vec<ProgressRecord>, StoreError> {
        self.inner.list_progress(user_id, course_id).await
    }
    async fn progress_counts(
        &self,
        user_id: Uuid,
        course_id: Uuid,
    ) -> Result<ProgressCounts, StoreError> {
        self.inner.progress_counts(user_id, course_id).await
    }
}

fn user() -> User {
    User {
        id: Uuid::new_v4(),
        email: "flaky@example.test".into(),
        name: "Flaky".into(),
        created_at: Utc::now(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_resilient_repository_absorbs_transient_failures() {
    let flaky: RepositoryState = Arc::new(FlakyRepository::new(2));
    let repo = ResilientRepository::new(flaky, policy(2));

    let stored = repo.insert_user(user()).await.unwrap();
    assert_eq!(repo.find_user(stored.id).await.unwrap().map(|u| u.id), Some(stored.id));
}

#[tokio::test]
async fn test_resilient_repository_surfaces_persistent_failures() {
    let flaky: RepositoryState = Arc::new(FlakyRepository::new(10));
    let repo = ResilientRepository::new(flaky, policy(2));

    let err = repo.find_user(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, StoreError::Unavailable(_)));
}
