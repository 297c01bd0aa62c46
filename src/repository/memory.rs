use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{CascadePlan, CascadeStep, Repository};
use crate::error::StoreError;
use crate::models::{
    ApprovalState, Content, Course, Enrollment, EnrollmentFilter, EnrollmentStatus, Module,
    ProgressCounts, ProgressRecord, UpdateCourseRequest, UpdateModuleRequest, User,
};

#[derive(Debug, Clone, Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    courses: HashMap<Uuid, Course>,
    modules: HashMap<Uuid, Module>,
    content: HashMap<Uuid, Content>,
    enrollments: HashMap<Uuid, Enrollment>,
    progress: HashMap<(Uuid, Uuid), ProgressRecord>,
}

impl Tables {
    fn apply_step(&mut self, step: CascadeStep) -> Result<(), StoreError> {
        match step {
            CascadeStep::InsertModule(module) => {
                if self.modules.contains_key(&module.id) {
                    return Err(StoreError::Conflict(format!("module {}", module.id)));
                }
                if !self.courses.contains_key(&module.course_id) {
                    return Err(StoreError::Missing(format!("course {}", module.course_id)));
                }
                self.modules.insert(module.id, module);
            }
            CascadeStep::AttachModule {
                course_id,
                module_id,
            } => {
                let course = self
                    .courses
                    .get_mut(&course_id)
                    .ok_or_else(|| StoreError::Missing(format!("course {course_id}")))?;
                if !course.module_ids.contains(&module_id) {
                    course.module_ids.push(module_id);
                }
            }
            CascadeStep::InsertContent(content) => {
                if self.content.contains_key(&content.id) {
                    return Err(StoreError::Conflict(format!("content {}", content.id)));
                }
                if !self.modules.contains_key(&content.module_id) {
                    return Err(StoreError::Missing(format!("module {}", content.module_id)));
                }
                self.content.insert(content.id, content);
            }
            CascadeStep::AttachContent {
                module_id,
                content_id,
            } => {
                let module = self
                    .modules
                    .get_mut(&module_id)
                    .ok_or_else(|| StoreError::Missing(format!("module {module_id}")))?;
                if !module.content_ids.contains(&content_id) {
                    module.content_ids.push(content_id);
                }
            }
            CascadeStep::DeleteProgressForContent(content_id) => {
                self.progress.retain(|(_, c), _| *c != content_id);
            }
            CascadeStep::DeleteContent(id) => {
                self.content.remove(&id);
                self.progress.retain(|(_, c), _| *c != id);
            }
            CascadeStep::DetachContent {
                module_id,
                content_id,
            } => {
                if let Some(module) = self.modules.get_mut(&module_id) {
                    module.content_ids.retain(|id| *id != content_id);
                }
            }
            CascadeStep::DeleteModule(id) => {
                // Mirrors the ON DELETE CASCADE on content.module_id.
                self.modules.remove(&id);
                let orphans: Vec<Uuid> = self
                    .content
                    .values()
                    .filter(|c| c.module_id == id)
                    .map(|c| c.id)
                    .collect();
                for content_id in orphans {
                    self.content.remove(&content_id);
                    self.progress.retain(|(_, c), _| *c != content_id);
                }
            }
            CascadeStep::DetachModule {
                course_id,
                module_id,
            } => {
                if let Some(course) = self.courses.get_mut(&course_id) {
                    course.module_ids.retain(|id| *id != module_id);
                }
            }
            CascadeStep::DeleteProgressForCourse(course_id) => {
                self.progress.retain(|_, p| p.course_id != course_id);
            }
            CascadeStep::DeleteEnrollmentsForCourse(course_id) => {
                self.enrollments.retain(|_, e| e.course_id != course_id);
            }
            CascadeStep::DeleteCourse(id) => {
                self.courses.remove(&id);
                self.modules.retain(|_, m| m.course_id != id);
                let modules = &self.modules;
                self.content.retain(|_, c| modules.contains_key(&c.module_id));
                self.enrollments.retain(|_, e| e.course_id != id);
                self.progress.retain(|_, p| p.course_id != id);
            }
        }
        Ok(())
    }

    fn course_content_ids(&self, course_id: Uuid) -> Vec<Uuid> {
        self.content
            .values()
            .filter(|c| {
                self.modules
                    .get(&c.module_id)
                    .is_some_and(|m| m.course_id == course_id)
            })
            .map(|c| c.id)
            .collect()
    }

    fn counts(&self, user_id: Uuid, course_id: Uuid) -> ProgressCounts {
        let content_ids = self.course_content_ids(course_id);
        let completed = content_ids
            .iter()
            .filter(|id| {
                self.progress
                    .get(&(user_id, **id))
                    .is_some_and(|p| p.completed)
            })
            .count();
        ProgressCounts {
            completed: completed as i64,
            total: content_ids.len() as i64,
        }
    }
}

/// InMemoryRepository
///
/// A complete `Repository` held in process memory behind a single
/// `tokio::sync::RwLock`. Used by the test suite and by local runs without a
/// `DATABASE_URL`. Semantics match `PostgresRepository`:
///
/// - cascade plans are applied to a copy of the tables that replaces the live
///   tables only if every step succeeds;
/// - enrollment inserts check the "one non-rejected row per (user, course)"
///   rule under the write lock, so concurrent requests cannot both win.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    tables: RwLock<Tables>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn by_position<T>(ids: &[Uuid], mut items: Vec<T>, id_of: impl Fn(&T) -> Uuid) -> Vec<T> {
    items.sort_by_key(|item| {
        let id = id_of(item);
        ids.iter().position(|x| *x == id).unwrap_or(usize::MAX)
    });
    items
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn find_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn insert_user(&self, user: User) -> Result<User, StoreError> {
        let mut tables = self.tables.write().await;
        if tables
            .users
            .values()
            .any(|u| u.id == user.id || u.email == user.email)
        {
            return Err(StoreError::Conflict(format!("user {}", user.email)));
        }
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        let mut users: Vec<User> = self.tables.read().await.users.values().cloned().collect();
        users.sort_by_key(|u| (u.created_at, u.id));
        Ok(users)
    }

    async fn set_user_approval(
        &self,
        id: Uuid,
        state: ApprovalState,
    ) -> Result<Option<User>, StoreError> {
        let mut tables = self.tables.write().await;
        Ok(tables.users.get_mut(&id).map(|user| {
            user.approval_state = state;
            user.clone()
        }))
    }

    async fn find_course(&self, id: Uuid) -> Result<Option<Course>, StoreError> {
        Ok(self.tables.read().await.courses.get(&id).cloned())
    }

    async fn list_courses(&self) -> Result<Vec<Course>, StoreError> {
        let mut courses: Vec<Course> =
            self.tables.read().await.courses.values().cloned().collect();
        courses.sort_by_key(|c| (c.created_at, c.id));
        Ok(courses)
    }

    async fn insert_course(&self, course: Course) -> Result<Course, StoreError> {
        let mut tables = self.tables.write().await;
        if tables.courses.contains_key(&course.id) {
            return Err(StoreError::Conflict(format!("course {}", course.id)));
        }
        tables.courses.insert(course.id, course.clone());
        Ok(course)
    }

    async fn update_course(
        &self,
        id: Uuid,
        changes: UpdateCourseRequest,
        at: DateTime<Utc>,
    ) -> Result<Option<Course>, StoreError> {
        let mut tables = self.tables.write().await;
        Ok(tables.courses.get_mut(&id).map(|course| {
            if let Some(title) = changes.title {
                course.title = title;
            }
            if let Some(description) = changes.description {
                course.description = Some(description);
            }
            course.updated_at = at;
            course.clone()
        }))
    }

    async fn find_module(&self, id: Uuid) -> Result<Option<Module>, StoreError> {
        Ok(self.tables.read().await.modules.get(&id).cloned())
    }

    async fn list_modules(&self, course_id: Uuid) -> Result<Vec<Module>, StoreError> {
        let tables = self.tables.read().await;
        let order = tables
            .courses
            .get(&course_id)
            .map(|c| c.module_ids.clone())
            .unwrap_or_default();
        let modules = tables
            .modules
            .values()
            .filter(|m| m.course_id == course_id)
            .cloned()
            .collect();
        Ok(by_position(&order, modules, |m| m.id))
    }

    async fn update_module(
        &self,
        id: Uuid,
        changes: UpdateModuleRequest,
        at: DateTime<Utc>,
    ) -> Result<Option<Module>, StoreError> {
        let mut tables = self.tables.write().await;
        Ok(tables.modules.get_mut(&id).map(|module| {
            if let Some(title) = changes.title {
                module.title = title;
            }
            if let Some(description) = changes.description {
                module.description = Some(description);
            }
            module.updated_at = at;
            module.clone()
        }))
    }

    async fn find_content(&self, id: Uuid) -> Result<Option<Content>, StoreError> {
        Ok(self.tables.read().await.content.get(&id).cloned())
    }

    async fn list_content(&self, module_id: Uuid) -> Result<Vec<Content>, StoreError> {
        let tables = self.tables.read().await;
        let order = tables
            .modules
            .get(&module_id)
            .map(|m| m.content_ids.clone())
            .unwrap_or_default();
        let content = tables
            .content
            .values()
            .filter(|c| c.module_id == module_id)
            .cloned()
            .collect();
        Ok(by_position(&order, content, |c| c.id))
    }

    async fn replace_content(&self, content: Content) -> Result<Option<Content>, StoreError> {
        let mut tables = self.tables.write().await;
        Ok(tables.content.get_mut(&content.id).map(|stored| {
            stored.title = content.title;
            stored.kind = content.kind;
            stored.url = content.url;
            stored.text_body = content.text_body;
            stored.updated_at = content.updated_at;
            stored.clone()
        }))
    }

    async fn apply(&self, plan: CascadePlan) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let mut staged = tables.clone();
        let steps = plan.steps.len();
        for step in plan.steps {
            staged.apply_step(step)?;
        }
        *tables = staged;
        tracing::debug!(plan = plan.label, steps, "cascade committed");
        Ok(())
    }

    async fn find_enrollment(&self, id: Uuid) -> Result<Option<Enrollment>, StoreError> {
        Ok(self.tables.read().await.enrollments.get(&id).cloned())
    }

    async fn find_open_enrollment(
        &self,
        user_id: Uuid,
        course_id: Uuid,
    ) -> Result<Option<Enrollment>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .enrollments
            .values()
            .find(|e| {
                e.user_id == user_id
                    && e.course_id == course_id
                    && e.status != EnrollmentStatus::Rejected
            })
            .cloned())
    }

    async fn list_enrollments(
        &self,
        filter: EnrollmentFilter,
    ) -> Result<Vec<Enrollment>, StoreError> {
        let mut enrollments: Vec<Enrollment> = self
            .tables
            .read()
            .await
            .enrollments
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        if filter.status == Some(EnrollmentStatus::Pending) {
            enrollments.sort_by_key(|e| (e.requested_at, e.id));
        } else {
            enrollments.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(a.id.cmp(&b.id)));
        }
        Ok(enrollments)
    }

    async fn insert_enrollment(&self, enrollment: Enrollment) -> Result<Enrollment, StoreError> {
        let mut tables = self.tables.write().await;
        let open_exists = enrollment.status != EnrollmentStatus::Rejected
            && tables.enrollments.values().any(|e| {
                e.user_id == enrollment.user_id
                    && e.course_id == enrollment.course_id
                    && e.status != EnrollmentStatus::Rejected
            });
        if open_exists {
            return Err(StoreError::Conflict(format!(
                "open enrollment for user {} in course {}",
                enrollment.user_id, enrollment.course_id
            )));
        }
        if !tables.courses.contains_key(&enrollment.course_id) {
            return Err(StoreError::Missing(format!("course {}", enrollment.course_id)));
        }
        tables.enrollments.insert(enrollment.id, enrollment.clone());
        Ok(enrollment)
    }

    async fn transition_enrollment(
        &self,
        id: Uuid,
        from: EnrollmentStatus,
        to: EnrollmentStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Enrollment>, StoreError> {
        let mut tables = self.tables.write().await;
        Ok(tables
            .enrollments
            .get_mut(&id)
            .filter(|e| e.status == from)
            .map(|e| {
                e.status = to;
                e.updated_at = at;
                e.clone()
            }))
    }

    async fn refresh_enrollment_progress(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<Enrollment>, StoreError> {
        let mut tables = self.tables.write().await;
        let Some((user_id, course_id)) = tables.enrollments.get(&id).map(|e| (e.user_id, e.course_id))
        else {
            return Ok(None);
        };
        let progress = tables.counts(user_id, course_id).percent();
        Ok(tables.enrollments.get_mut(&id).map(|e| {
            e.progress = progress;
            e.updated_at = at;
            e.clone()
        }))
    }

    async fn toggle_progress(
        &self,
        user_id: Uuid,
        content_id: Uuid,
        course_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(ProgressRecord, bool), StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.content.contains_key(&content_id) {
            return Err(StoreError::Missing(format!("content {content_id}")));
        }
        match tables.progress.get_mut(&(user_id, content_id)) {
            Some(record) => {
                record.completed = !record.completed;
                record.last_accessed = at;
                Ok((record.clone(), false))
            }
            None => {
                let record = ProgressRecord {
                    user_id,
                    content_id,
                    course_id,
                    completed: true,
                    last_accessed: at,
                };
                tables
                    .progress
                    .insert((user_id, content_id), record.clone());
                Ok((record, true))
            }
        }
    }

    async fn list_progress(
        &self,
        user_id: Option<Uuid>,
        course_id: Uuid,
    ) -> Result<Vec<ProgressRecord>, StoreError> {
        let mut records: Vec<ProgressRecord> = self
            .tables
            .read()
            .await
            .progress
            .values()
            .filter(|p| p.course_id == course_id && user_id.is_none_or(|u| u == p.user_id))
            .cloned()
            .collect();
        records.sort_by(|a, b| {
            a.user_id
                .cmp(&b.user_id)
                .then(b.last_accessed.cmp(&a.last_accessed))
        });
        Ok(records)
    }

    async fn progress_counts(
        &self,
        user_id: Uuid,
        course_id: Uuid,
    ) -> Result<ProgressCounts, StoreError> {
        Ok(self.tables.read().await.counts(user_id, course_id))
    }
}
