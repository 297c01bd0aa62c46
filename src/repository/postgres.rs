use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgConnection, PgPool, query_builder::QueryBuilder};
use uuid::Uuid;

use super::{CascadePlan, CascadeStep, Repository};
use crate::error::StoreError;
use crate::models::{
    ApprovalState, Content, Course, Enrollment, EnrollmentFilter, EnrollmentStatus, Module,
    ProgressCounts, ProgressRecord, UpdateCourseRequest, UpdateModuleRequest, User,
};

const USER_COLUMNS: &str = "id, email, name, role, approval_state, created_at";
const COURSE_COLUMNS: &str =
    "id, title, description, instructor_id, module_ids, created_at, updated_at";
const MODULE_COLUMNS: &str =
    "id, course_id, title, description, content_ids, created_at, updated_at";
const CONTENT_COLUMNS: &str =
    "id, module_id, course_id, title, kind, url, text_body, created_at, updated_at";
const ENROLLMENT_COLUMNS: &str =
    "id, user_id, course_id, status, progress, requested_at, updated_at";
const PROGRESS_COLUMNS: &str = "user_id, content_id, course_id, completed, last_accessed";
const PROGRESS_COUNTS_SQL: &str = "SELECT \
    (SELECT COUNT(*) FROM progress_records p \
       JOIN content c ON c.id = p.content_id \
       JOIN modules m ON m.id = c.module_id \
       WHERE p.user_id = $1 AND m.course_id = $2 AND p.completed) AS completed, \
    (SELECT COUNT(*) FROM content c \
       JOIN modules m ON m.id = c.module_id \
       WHERE m.course_id = $2) AS total";

/// Row shape returned by the toggle upsert: the record plus whether the
/// statement inserted (rather than updated) it.
#[derive(FromRow)]
struct ToggledRow {
    #[sqlx(flatten)]
    record: ProgressRecord,
    created: bool,
}

/// PostgresRepository
///
/// The concrete implementation of the `Repository` trait, backed by PostgreSQL.
/// Schema lives in `migrations/`. Queries are built at runtime so the crate
/// compiles without a live database.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Creates a new repository instance using the initialized connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// apply_step
    ///
    /// Executes one cascade step on the open transaction. Inserts and attaches
    /// are strict (a missing parent aborts the plan); deletes and detaches are
    /// idempotent so a concurrently removed row does not fail the cascade.
    async fn apply_step(conn: &mut PgConnection, step: &CascadeStep) -> Result<(), StoreError> {
        match step {
            CascadeStep::InsertModule(module) => {
                sqlx::query(
                    "INSERT INTO modules (id, course_id, title, description, content_ids, created_at, updated_at) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7)",
                )
                .bind(module.id)
                .bind(module.course_id)
                .bind(&module.title)
                .bind(&module.description)
                .bind(&module.content_ids)
                .bind(module.created_at)
                .bind(module.updated_at)
                .execute(&mut *conn)
                .await?;
            }
            CascadeStep::AttachModule {
                course_id,
                module_id,
            } => {
                // Single-statement read-modify-write: the row lock serializes
                // concurrent attaches to the same course.
                let res = sqlx::query(
                    "UPDATE courses SET module_ids = CASE WHEN $2 = ANY(module_ids) \
                     THEN module_ids ELSE array_append(module_ids, $2) END WHERE id = $1",
                )
                .bind(course_id)
                .bind(module_id)
                .execute(&mut *conn)
                .await?;
                if res.rows_affected() == 0 {
                    return Err(StoreError::Missing(format!("course {course_id}")));
                }
            }
            CascadeStep::InsertContent(content) => {
                sqlx::query(
                    "INSERT INTO content (id, module_id, course_id, title, kind, url, text_body, created_at, updated_at) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
                )
                .bind(content.id)
                .bind(content.module_id)
                .bind(content.course_id)
                .bind(&content.title)
                .bind(content.kind)
                .bind(&content.url)
                .bind(&content.text_body)
                .bind(content.created_at)
                .bind(content.updated_at)
                .execute(&mut *conn)
                .await?;
            }
            CascadeStep::AttachContent {
                module_id,
                content_id,
            } => {
                let res = sqlx::query(
                    "UPDATE modules SET content_ids = CASE WHEN $2 = ANY(content_ids) \
                     THEN content_ids ELSE array_append(content_ids, $2) END WHERE id = $1",
                )
                .bind(module_id)
                .bind(content_id)
                .execute(&mut *conn)
                .await?;
                if res.rows_affected() == 0 {
                    return Err(StoreError::Missing(format!("module {module_id}")));
                }
            }
            CascadeStep::DeleteProgressForContent(content_id) => {
                sqlx::query("DELETE FROM progress_records WHERE content_id = $1")
                    .bind(content_id)
                    .execute(&mut *conn)
                    .await?;
            }
            CascadeStep::DeleteContent(id) => {
                sqlx::query("DELETE FROM content WHERE id = $1")
                    .bind(id)
                    .execute(&mut *conn)
                    .await?;
            }
            CascadeStep::DetachContent {
                module_id,
                content_id,
            } => {
                sqlx::query(
                    "UPDATE modules SET content_ids = array_remove(content_ids, $2) WHERE id = $1",
                )
                .bind(module_id)
                .bind(content_id)
                .execute(&mut *conn)
                .await?;
            }
            CascadeStep::DeleteModule(id) => {
                sqlx::query("DELETE FROM modules WHERE id = $1")
                    .bind(id)
                    .execute(&mut *conn)
                    .await?;
            }
            CascadeStep::DetachModule {
                course_id,
                module_id,
            } => {
                sqlx::query(
                    "UPDATE courses SET module_ids = array_remove(module_ids, $2) WHERE id = $1",
                )
                .bind(course_id)
                .bind(module_id)
                .execute(&mut *conn)
                .await?;
            }
            CascadeStep::DeleteProgressForCourse(course_id) => {
                sqlx::query("DELETE FROM progress_records WHERE course_id = $1")
                    .bind(course_id)
                    .execute(&mut *conn)
                    .await?;
            }
            CascadeStep::DeleteEnrollmentsForCourse(course_id) => {
                sqlx::query("DELETE FROM enrollments WHERE course_id = $1")
                    .bind(course_id)
                    .execute(&mut *conn)
                    .await?;
            }
            CascadeStep::DeleteCourse(id) => {
                sqlx::query("DELETE FROM courses WHERE id = $1")
                    .bind(id)
                    .execute(&mut *conn)
                    .await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn find_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn insert_user(&self, user: User) -> Result<User, StoreError> {
        let sql = format!(
            "INSERT INTO users (id, email, name, role, approval_state, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {USER_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(user.id)
            .bind(&user.email)
            .bind(&user.name)
            .bind(user.role)
            .bind(user.approval_state)
            .bind(user.created_at)
            .fetch_one(&self.pool)
            .await?)
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users ORDER BY created_at ASC");
        Ok(sqlx::query_as::<_, User>(&sql).fetch_all(&self.pool).await?)
    }

    async fn set_user_approval(
        &self,
        id: Uuid,
        state: ApprovalState,
    ) -> Result<Option<User>, StoreError> {
        let sql = format!(
            "UPDATE users SET approval_state = $2 WHERE id = $1 RETURNING {USER_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .bind(state)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_course(&self, id: Uuid) -> Result<Option<Course>, StoreError> {
        let sql = format!("SELECT {COURSE_COLUMNS} FROM courses WHERE id = $1");
        Ok(sqlx::query_as::<_, Course>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list_courses(&self) -> Result<Vec<Course>, StoreError> {
        let sql = format!("SELECT {COURSE_COLUMNS} FROM courses ORDER BY created_at ASC");
        Ok(sqlx::query_as::<_, Course>(&sql).fetch_all(&self.pool).await?)
    }

    async fn insert_course(&self, course: Course) -> Result<Course, StoreError> {
        let sql = format!(
            "INSERT INTO courses (id, title, description, instructor_id, module_ids, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {COURSE_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, Course>(&sql)
            .bind(course.id)
            .bind(&course.title)
            .bind(&course.description)
            .bind(course.instructor_id)
            .bind(&course.module_ids)
            .bind(course.created_at)
            .bind(course.updated_at)
            .fetch_one(&self.pool)
            .await?)
    }

    /// Uses `COALESCE` so only the `Some` fields of `changes` are written.
    async fn update_course(
        &self,
        id: Uuid,
        changes: UpdateCourseRequest,
        at: DateTime<Utc>,
    ) -> Result<Option<Course>, StoreError> {
        let sql = format!(
            "UPDATE courses SET title = COALESCE($2, title), \
             description = COALESCE($3, description), updated_at = $4 \
             WHERE id = $1 RETURNING {COURSE_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, Course>(&sql)
            .bind(id)
            .bind(changes.title)
            .bind(changes.description)
            .bind(at)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_module(&self, id: Uuid) -> Result<Option<Module>, StoreError> {
        let sql = format!("SELECT {MODULE_COLUMNS} FROM modules WHERE id = $1");
        Ok(sqlx::query_as::<_, Module>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list_modules(&self, course_id: Uuid) -> Result<Vec<Module>, StoreError> {
        let sql = "SELECT m.id, m.course_id, m.title, m.description, m.content_ids, m.created_at, m.updated_at \
                   FROM modules m JOIN courses c ON c.id = m.course_id \
                   WHERE m.course_id = $1 \
                   ORDER BY array_position(c.module_ids, m.id) NULLS LAST, m.created_at ASC";
        Ok(sqlx::query_as::<_, Module>(sql)
            .bind(course_id)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn update_module(
        &self,
        id: Uuid,
        changes: UpdateModuleRequest,
        at: DateTime<Utc>,
    ) -> Result<Option<Module>, StoreError> {
        let sql = format!(
            "UPDATE modules SET title = COALESCE($2, title), \
             description = COALESCE($3, description), updated_at = $4 \
             WHERE id = $1 RETURNING {MODULE_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, Module>(&sql)
            .bind(id)
            .bind(changes.title)
            .bind(changes.description)
            .bind(at)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_content(&self, id: Uuid) -> Result<Option<Content>, StoreError> {
        let sql = format!("SELECT {CONTENT_COLUMNS} FROM content WHERE id = $1");
        Ok(sqlx::query_as::<_, Content>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list_content(&self, module_id: Uuid) -> Result<Vec<Content>, StoreError> {
        let sql = "SELECT c.id, c.module_id, c.course_id, c.title, c.kind, c.url, c.text_body, c.created_at, c.updated_at \
                   FROM content c JOIN modules m ON m.id = c.module_id \
                   WHERE c.module_id = $1 \
                   ORDER BY array_position(m.content_ids, c.id) NULLS LAST, c.created_at ASC";
        Ok(sqlx::query_as::<_, Content>(sql)
            .bind(module_id)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn replace_content(&self, content: Content) -> Result<Option<Content>, StoreError> {
        let sql = format!(
            "UPDATE content SET title = $2, kind = $3, url = $4, text_body = $5, updated_at = $6 \
             WHERE id = $1 RETURNING {CONTENT_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, Content>(&sql)
            .bind(content.id)
            .bind(&content.title)
            .bind(content.kind)
            .bind(&content.url)
            .bind(&content.text_body)
            .bind(content.updated_at)
            .fetch_optional(&self.pool)
            .await?)
    }

    /// apply
    ///
    /// Runs the whole plan inside one transaction. Dropping the transaction on
    /// an early `?` rolls every previous step back.
    async fn apply(&self, plan: CascadePlan) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for step in &plan.steps {
            Self::apply_step(&mut tx, step).await?;
        }
        tx.commit().await?;
        tracing::debug!(plan = plan.label, steps = plan.steps.len(), "cascade committed");
        Ok(())
    }

    async fn find_enrollment(&self, id: Uuid) -> Result<Option<Enrollment>, StoreError> {
        let sql = format!("SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE id = $1");
        Ok(sqlx::query_as::<_, Enrollment>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_open_enrollment(
        &self,
        user_id: Uuid,
        course_id: Uuid,
    ) -> Result<Option<Enrollment>, StoreError> {
        let sql = format!(
            "SELECT {ENROLLMENT_COLUMNS} FROM enrollments \
             WHERE user_id = $1 AND course_id = $2 AND status <> $3"
        );
        Ok(sqlx::query_as::<_, Enrollment>(&sql)
            .bind(user_id)
            .bind(course_id)
            .bind(EnrollmentStatus::Rejected)
            .fetch_optional(&self.pool)
            .await?)
    }

    /// list_enrollments
    ///
    /// Builds the filter with `QueryBuilder` for safe parameterization. The
    /// pending queue is served oldest request first; everything else most
    /// recently updated first.
    async fn list_enrollments(
        &self,
        filter: EnrollmentFilter,
    ) -> Result<Vec<Enrollment>, StoreError> {
        let mut builder: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(format!(
            "SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE TRUE"
        ));

        if let Some(status) = filter.status {
            builder.push(" AND status = ");
            builder.push_bind(status);
        }
        if let Some(user_id) = filter.user_id {
            builder.push(" AND user_id = ");
            builder.push_bind(user_id);
        }
        if let Some(course_id) = filter.course_id {
            builder.push(" AND course_id = ");
            builder.push_bind(course_id);
        }

        if filter.status == Some(EnrollmentStatus::Pending) {
            builder.push(" ORDER BY requested_at ASC");
        } else {
            builder.push(" ORDER BY updated_at DESC");
        }

        Ok(builder
            .build_query_as::<Enrollment>()
            .fetch_all(&self.pool)
            .await?)
    }

    /// insert_enrollment
    ///
    /// The partial unique index `enrollments_one_open_per_user_course` turns a
    /// racing second request into a unique violation, surfaced as `Conflict`.
    async fn insert_enrollment(&self, enrollment: Enrollment) -> Result<Enrollment, StoreError> {
        let sql = format!(
            "INSERT INTO enrollments (id, user_id, course_id, status, progress, requested_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {ENROLLMENT_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, Enrollment>(&sql)
            .bind(enrollment.id)
            .bind(enrollment.user_id)
            .bind(enrollment.course_id)
            .bind(enrollment.status)
            .bind(enrollment.progress)
            .bind(enrollment.requested_at)
            .bind(enrollment.updated_at)
            .fetch_one(&self.pool)
            .await?)
    }

    async fn transition_enrollment(
        &self,
        id: Uuid,
        from: EnrollmentStatus,
        to: EnrollmentStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Enrollment>, StoreError> {
        let sql = format!(
            "UPDATE enrollments SET status = $3, updated_at = $4 \
             WHERE id = $1 AND status = $2 RETURNING {ENROLLMENT_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, Enrollment>(&sql)
            .bind(id)
            .bind(from)
            .bind(to)
            .bind(at)
            .fetch_optional(&self.pool)
            .await?)
    }

    /// refresh_enrollment_progress
    ///
    /// Locks the enrollment row before counting. Under read committed the
    /// count then sees every toggle committed by an earlier refresh, so the
    /// last writer always stores the latest recount.
    async fn refresh_enrollment_progress(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<Enrollment>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let target: Option<(Uuid, Uuid)> =
            sqlx::query_as("SELECT user_id, course_id FROM enrollments WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some((user_id, course_id)) = target else {
            return Ok(None);
        };

        let counts = sqlx::query_as::<_, ProgressCounts>(PROGRESS_COUNTS_SQL)
            .bind(user_id)
            .bind(course_id)
            .fetch_one(&mut *tx)
            .await?;

        let sql = format!(
            "UPDATE enrollments SET progress = $2, updated_at = $3 \
             WHERE id = $1 RETURNING {ENROLLMENT_COLUMNS}"
        );
        let enrollment = sqlx::query_as::<_, Enrollment>(&sql)
            .bind(id)
            .bind(counts.percent())
            .bind(at)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(enrollment))
    }

    /// toggle_progress
    ///
    /// One upsert: a first interaction inserts `completed = TRUE`, any later
    /// one flips the stored flag. `xmax = 0` is true only for freshly inserted
    /// tuples.
    async fn toggle_progress(
        &self,
        user_id: Uuid,
        content_id: Uuid,
        course_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(ProgressRecord, bool), StoreError> {
        let sql = format!(
            "INSERT INTO progress_records (user_id, content_id, course_id, completed, last_accessed) \
             VALUES ($1, $2, $3, TRUE, $4) \
             ON CONFLICT (user_id, content_id) DO UPDATE \
             SET completed = NOT progress_records.completed, last_accessed = EXCLUDED.last_accessed \
             RETURNING {PROGRESS_COLUMNS}, (xmax = 0) AS created"
        );
        let row = sqlx::query_as::<_, ToggledRow>(&sql)
            .bind(user_id)
            .bind(content_id)
            .bind(course_id)
            .bind(at)
            .fetch_one(&self.pool)
            .await?;
        Ok((row.record, row.created))
    }

    async fn list_progress(
        &self,
        user_id: Option<Uuid>,
        course_id: Uuid,
    ) -> Result<Vec<ProgressRecord>, StoreError> {
        let sql = format!(
            "SELECT {PROGRESS_COLUMNS} FROM progress_records \
             WHERE course_id = $1 AND ($2::uuid IS NULL OR user_id = $2) \
             ORDER BY user_id ASC, last_accessed DESC"
        );
        Ok(sqlx::query_as::<_, ProgressRecord>(&sql)
            .bind(course_id)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn progress_counts(
        &self,
        user_id: Uuid,
        course_id: Uuid,
    ) -> Result<ProgressCounts, StoreError> {
        Ok(sqlx::query_as::<_, ProgressCounts>(PROGRESS_COUNTS_SQL)
            .bind(user_id)
            .bind(course_id)
            .fetch_one(&self.pool)
            .await?)
    }
}
