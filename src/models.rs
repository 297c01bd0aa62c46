use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

// --- Enumerations (mapped to Postgres enum types) ---

/// Role
///
/// The RBAC field of a user record.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS, ToSchema, sqlx::Type, Default,
)]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum Role {
    #[default]
    Learner,
    Admin,
}

/// ApprovalState
///
/// Account-level approval, set by an administrator. Only `Active` accounts pass
/// the account gate.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema, sqlx::Type, Default,
)]
#[sqlx(type_name = "approval_state", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum ApprovalState {
    #[default]
    Pending,
    Active,
    Rejected,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema, sqlx::Type, Default,
)]
#[sqlx(type_name = "content_kind", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum ContentKind {
    #[default]
    Video,
    Text,
}

/// EnrollmentStatus
///
/// States of the per-user-per-course enrollment record. Legal transitions are
/// owned by [`crate::enrollment`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS, ToSchema, sqlx::Type, Default,
)]
#[sqlx(type_name = "enrollment_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum EnrollmentStatus {
    #[default]
    Pending,
    Active,
    Rejected,
    Completed,
}

impl EnrollmentStatus {
    /// Whether an enrollment in this state lets the learner read content and
    /// record progress. `Completed` follows `Active` and keeps access.
    pub fn grants_access(self) -> bool {
        matches!(self, EnrollmentStatus::Active | EnrollmentStatus::Completed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EnrollmentStatus::Pending => "pending",
            EnrollmentStatus::Active => "active",
            EnrollmentStatus::Rejected => "rejected",
            EnrollmentStatus::Completed => "completed",
        }
    }
}

// --- Core Records ---

/// User
///
/// Canonical identity record. Credentials are issued elsewhere; this record
/// carries the live role and approval state the gates re-read on every request.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub approval_state: ApprovalState,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

/// Course
///
/// Root of the hierarchy. `module_ids` is the ordered child list; every id in it
/// must name a module whose `course_id` points back here.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct Course {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    /// The admin who created the course.
    pub instructor_id: Uuid,
    pub module_ids: Vec<Uuid>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct Module {
    pub id: Uuid,
    pub course_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub content_ids: Vec<Uuid>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

/// Content
///
/// A single learning item. Exactly one of `url` (video) or `text_body` (text)
/// is populated, matching `kind`.
///
/// `course_id` is a denormalized copy of the owning module's course, used to
/// resolve enrollment for content-scoped requests in one hop. It is nullable at
/// the storage level so a broken reference surfaces as a data-integrity error
/// instead of a silent mismatch.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct Content {
    pub id: Uuid,
    pub module_id: Uuid,
    pub course_id: Option<Uuid>,
    pub title: String,
    pub kind: ContentKind,
    pub url: Option<String>,
    pub text_body: Option<String>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

/// ContentPayload
///
/// The validated form of a content body. Constructing one is the only way the
/// cascade manager writes `url`/`text_body`, which keeps the one-payload-per-kind rule local.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentPayload {
    Video { url: String },
    Text { body: String },
}

impl ContentPayload {
    /// Builds a payload from loosely-typed request fields. The field that does
    /// not belong to `kind` is ignored.
    pub fn from_parts(
        kind: ContentKind,
        url: Option<String>,
        text_body: Option<String>,
    ) -> AppResult<Self> {
        let non_blank = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        match kind {
            ContentKind::Video => non_blank(url)
                .map(|url| ContentPayload::Video { url })
                .ok_or_else(|| AppError::Validation("url is required for video content".into())),
            ContentKind::Text => non_blank(text_body)
                .map(|body| ContentPayload::Text { body })
                .ok_or_else(|| {
                    AppError::Validation("text_body is required for text content".into())
                }),
        }
    }

    pub fn kind(&self) -> ContentKind {
        match self {
            ContentPayload::Video { .. } => ContentKind::Video,
            ContentPayload::Text { .. } => ContentKind::Text,
        }
    }

    /// Splits into the `(kind, url, text_body)` column triple.
    pub fn into_columns(self) -> (ContentKind, Option<String>, Option<String>) {
        match self {
            ContentPayload::Video { url } => (ContentKind::Video, Some(url), None),
            ContentPayload::Text { body } => (ContentKind::Text, None, Some(body)),
        }
    }
}

impl Content {
    /// Reads the payload back, failing if the stored row holds a payload that does not match its kind.
    pub fn payload(&self) -> AppResult<ContentPayload> {
        match (self.kind, &self.url, &self.text_body) {
            (ContentKind::Video, Some(url), None) => Ok(ContentPayload::Video { url: url.clone() }),
            (ContentKind::Text, None, Some(body)) => Ok(ContentPayload::Text { body: body.clone() }),
            _ => Err(AppError::DataIntegrity(format!(
                "content {} has a payload that does not match its type",
                self.id
            ))),
        }
    }
}

/// Enrollment
///
/// Unique among non-rejected rows per `(user_id, course_id)`. Rejected rows are
/// kept as history; a re-request inserts a fresh pending row.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct Enrollment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub course_id: Uuid,
    pub status: EnrollmentStatus,
    /// Aggregate course progress (0-100), refreshed on every toggle.
    pub progress: i32,
    #[ts(type = "string")]
    pub requested_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

/// ProgressRecord
///
/// Keyed by `(user_id, content_id)`. `course_id` is copied from the content at
/// creation time for per-course aggregation.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default, PartialEq, Eq)]
#[ts(export)]
pub struct ProgressRecord {
    pub user_id: Uuid,
    pub content_id: Uuid,
    pub course_id: Uuid,
    pub completed: bool,
    #[ts(type = "string")]
    pub last_accessed: DateTime<Utc>,
}

/// Live counts backing the aggregate percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, FromRow)]
pub struct ProgressCounts {
    pub completed: i64,
    pub total: i64,
}

impl ProgressCounts {
    /// Integer percentage of completed content, rounded half up. Only a fully
    /// completed course reports 100 and a course without content reports 0.
    pub fn percent(self) -> i32 {
        let ProgressCounts { completed, total } = self;
        if total <= 0 {
            return 0;
        }
        let completed = completed.clamp(0, total);
        if completed == total {
            return 100;
        }
        let rounded = (completed * 200 + total) / (2 * total);
        rounded.min(99) as i32
    }
}

// --- Request Payloads ---

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct RegisterUserRequest {
    pub email: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct CreateCourseRequest {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Partial update: only `Some` fields are applied.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UpdateCourseRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct CreateModuleRequest {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UpdateModuleRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct CreateContentRequest {
    pub title: String,
    pub kind: ContentKind,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub text_body: Option<String>,
}

/// Changing `kind` switches the payload and clears the other field.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UpdateContentRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ContentKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_body: Option<String>,
}

/// EnrollmentFilter
///
/// Query parameters for enrollment listings. All filters are optional and
/// combined with AND.
#[derive(Debug, Clone, Serialize, Deserialize, Default, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct EnrollmentFilter {
    pub status: Option<EnrollmentStatus>,
    pub user_id: Option<Uuid>,
    pub course_id: Option<Uuid>,
}

impl EnrollmentFilter {
    pub fn matches(&self, enrollment: &Enrollment) -> bool {
        self.status.is_none_or(|s| s == enrollment.status)
            && self.user_id.is_none_or(|u| u == enrollment.user_id)
            && self.course_id.is_none_or(|c| c == enrollment.course_id)
    }
}

// --- Responses ---

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct CourseSummary {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub instructor_id: Uuid,
    pub module_count: usize,
}

impl From<&Course> for CourseSummary {
    fn from(course: &Course) -> Self {
        Self {
            id: course.id,
            title: course.title.clone(),
            description: course.description.clone(),
            instructor_id: course.instructor_id,
            module_count: course.module_ids.len(),
        }
    }
}

/// Learner-facing content overview (no payload).
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct ContentOverview {
    pub id: Uuid,
    pub title: String,
    pub kind: ContentKind,
}

impl From<&Content> for ContentOverview {
    fn from(content: &Content) -> Self {
        Self {
            id: content.id,
            title: content.title.clone(),
            kind: content.kind,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct ModuleOutline {
    pub module: Module,
    pub content: Vec<ContentOverview>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct CourseOutline {
    pub course: Course,
    pub modules: Vec<ModuleOutline>,
}

/// Admin view: modules with their full content records.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct ModuleTree {
    pub module: Module,
    pub content: Vec<Content>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct CourseTree {
    pub course: Course,
    pub modules: Vec<ModuleTree>,
}

/// CourseProgress
///
/// Progress records for one user in one course, with a live recount.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct CourseProgress {
    pub user_id: Uuid,
    pub course_id: Uuid,
    pub records: Vec<ProgressRecord>,
    pub completed: i64,
    pub total: i64,
    pub percent: i32,
}

/// Result of a completion toggle: the record, whether it was created by this
/// call, and the enrollment after the aggregate recompute.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct ToggleOutcome {
    pub record: ProgressRecord,
    pub created: bool,
    pub enrollment: Enrollment,
}
