use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{
    ApprovalState, Content, Course, Enrollment, EnrollmentFilter, EnrollmentStatus, Module,
    ProgressCounts, ProgressRecord, UpdateCourseRequest, UpdateModuleRequest, User,
};

pub mod memory;
pub mod postgres;
pub mod resilient;

pub use memory::InMemoryRepository;
pub use postgres::PostgresRepository;
pub use resilient::{ResilientRepository, RetryPolicy};

/// CascadeStep
///
/// One structural mutation of the course/module/content hierarchy or of the
/// records that depend on it. Steps are never applied on their own: they are
/// grouped into a [`CascadePlan`] which the store applies atomically.
#[derive(Debug, Clone)]
pub enum CascadeStep {
    InsertModule(Module),
    /// Append a module id to its course's ordered child list.
    AttachModule { course_id: Uuid, module_id: Uuid },
    InsertContent(Content),
    /// Append a content id to its module's ordered child list.
    AttachContent { module_id: Uuid, content_id: Uuid },
    DeleteProgressForContent(Uuid),
    DeleteContent(Uuid),
    DetachContent { module_id: Uuid, content_id: Uuid },
    DeleteModule(Uuid),
    DetachModule { course_id: Uuid, module_id: Uuid },
    DeleteProgressForCourse(Uuid),
    DeleteEnrollmentsForCourse(Uuid),
    DeleteCourse(Uuid),
}

/// CascadePlan
///
/// An ordered list of [`CascadeStep`]s that must take effect as a unit: either
/// every step is applied or the store is left untouched.
#[derive(Debug, Clone)]
pub struct CascadePlan {
    pub label: &'static str,
    pub steps: Vec<CascadeStep>,
}

impl CascadePlan {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            steps: Vec::new(),
        }
    }

    pub fn then(mut self, step: CascadeStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn push(&mut self, step: CascadeStep) {
        self.steps.push(step);
    }
}

/// Repository Trait
///
/// Abstract contract for all persistence operations used by the gates, the
/// enrollment state machine, the progress tracker and the cascade manager.
///
/// Absence is never an error: lookups return `Ok(None)` and listings return an
/// empty `Vec`. `Err` is reserved for store failures.
///
/// **Send + Sync + async_trait** are required to share the trait object
/// (`Arc<dyn Repository>`) across Axum's task boundaries.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Users ---
    async fn find_user(&self, id: Uuid) -> Result<Option<User>, StoreError>;
    async fn insert_user(&self, user: User) -> Result<User, StoreError>;
    async fn list_users(&self) -> Result<Vec<User>, StoreError>;
    async fn set_user_approval(
        &self,
        id: Uuid,
        state: ApprovalState,
    ) -> Result<Option<User>, StoreError>;

    // --- Hierarchy reads and in-place edits ---
    async fn find_course(&self, id: Uuid) -> Result<Option<Course>, StoreError>;
    async fn list_courses(&self) -> Result<Vec<Course>, StoreError>;
    async fn insert_course(&self, course: Course) -> Result<Course, StoreError>;
    async fn update_course(
        &self,
        id: Uuid,
        changes: UpdateCourseRequest,
        at: DateTime<Utc>,
    ) -> Result<Option<Course>, StoreError>;

    async fn find_module(&self, id: Uuid) -> Result<Option<Module>, StoreError>;
    /// Modules of a course in the order of the course's child list.
    async fn list_modules(&self, course_id: Uuid) -> Result<Vec<Module>, StoreError>;
    async fn update_module(
        &self,
        id: Uuid,
        changes: UpdateModuleRequest,
        at: DateTime<Utc>,
    ) -> Result<Option<Module>, StoreError>;

    async fn find_content(&self, id: Uuid) -> Result<Option<Content>, StoreError>;
    /// Content of a module in the order of the module's child list.
    async fn list_content(&self, module_id: Uuid) -> Result<Vec<Content>, StoreError>;
    /// Overwrites title and payload columns of an existing content row.
    async fn replace_content(&self, content: Content) -> Result<Option<Content>, StoreError>;

    // --- Structural changes ---
    /// Applies every step of `plan` atomically. A failing step leaves the store
    /// unchanged. Attaching to a missing parent fails with `StoreError::Missing`.
    async fn apply(&self, plan: CascadePlan) -> Result<(), StoreError>;

    // --- Enrollments ---
    async fn find_enrollment(&self, id: Uuid) -> Result<Option<Enrollment>, StoreError>;
    /// The single non-rejected enrollment for `(user_id, course_id)`, if any.
    async fn find_open_enrollment(
        &self,
        user_id: Uuid,
        course_id: Uuid,
    ) -> Result<Option<Enrollment>, StoreError>;
    async fn list_enrollments(
        &self,
        filter: EnrollmentFilter,
    ) -> Result<Vec<Enrollment>, StoreError>;
    /// Inserts a new enrollment. Fails with `StoreError::Conflict` if a
    /// non-rejected row already exists for the same `(user_id, course_id)`.
    async fn insert_enrollment(&self, enrollment: Enrollment) -> Result<Enrollment, StoreError>;
    /// Compare-and-set on status. Returns `None` when the row is missing or its
    /// status is no longer `from`.
    async fn transition_enrollment(
        &self,
        id: Uuid,
        from: EnrollmentStatus,
        to: EnrollmentStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Enrollment>, StoreError>;
    /// Recounts the enrollment's progress over its course and stores the
    /// percentage in the same atomic step, so concurrent toggles cannot leave a
    /// stale value behind. `None` when the enrollment is gone.
    async fn refresh_enrollment_progress(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<Enrollment>, StoreError>;

    // --- Progress ---
    /// Flips `completed` on the existing record, or creates it as completed.
    /// Returns the record and whether it was created by this call.
    async fn toggle_progress(
        &self,
        user_id: Uuid,
        content_id: Uuid,
        course_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(ProgressRecord, bool), StoreError>;
    /// Progress records of a course, for one user or (when `None`) all users.
    async fn list_progress(
        &self,
        user_id: Option<Uuid>,
        course_id: Uuid,
    ) -> Result<Vec<ProgressRecord>, StoreError>;
    /// Live recount over the content currently reachable from the course's
    /// modules.
    async fn progress_counts(
        &self,
        user_id: Uuid,
        course_id: Uuid,
    ) -> Result<ProgressCounts, StoreError>;
}

/// RepositoryState
///
/// The concrete type used to share the persistence layer across the application state.
pub type RepositoryState = Arc<dyn Repository>;
