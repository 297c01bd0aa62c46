use chrono::Utc;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult, StoreError},
    gate::ApprovedSubject,
    models::{
        Content, ContentOverview, ContentPayload, Course, CourseOutline, CourseSummary, CourseTree,
        CreateContentRequest, CreateCourseRequest, CreateModuleRequest, Module, ModuleOutline,
        ModuleTree, UpdateContentRequest, UpdateCourseRequest, UpdateModuleRequest,
    },
    repository::{CascadePlan, CascadeStep, RepositoryState},
};

fn require_title(title: &str) -> AppResult<String> {
    let title = title.trim();
    if title.is_empty() {
        return Err(AppError::Validation("title must not be empty".into()));
    }
    Ok(title.to_string())
}

fn optional_title(title: Option<String>) -> AppResult<Option<String>> {
    title.as_deref().map(require_title).transpose()
}

/// Maps a failed plan: a `Missing` store error means the parent vanished
/// between our read and the write.
fn parent_gone(missing: AppError) -> impl FnOnce(StoreError) -> AppError {
    move |err| match err {
        StoreError::Missing(_) => missing,
        other => other.into(),
    }
}

/// HierarchyManager
///
/// Creates, edits and deletes courses, modules and content. Every structural
/// change is expressed as a [`CascadePlan`] and handed to the store in one
/// call, which applies it atomically, so a child never exists without its
/// parent listing it and a deleted node never leaves dangling children or
/// stale child ids behind.
#[derive(Clone)]
pub struct HierarchyManager {
    repo: RepositoryState,
}

impl HierarchyManager {
    pub fn new(repo: RepositoryState) -> Self {
        Self { repo }
    }

    // --- Courses ---

    pub async fn create_course(
        &self,
        instructor: &ApprovedSubject,
        req: CreateCourseRequest,
    ) -> AppResult<Course> {
        let now = Utc::now();
        let course = Course {
            id: Uuid::new_v4(),
            title: require_title(&req.title)?,
            description: req.description,
            instructor_id: instructor.id(),
            module_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        };

        let course = self.repo.insert_course(course).await?;
        tracing::info!(course_id = %course.id, instructor_id = %course.instructor_id, "course created");
        Ok(course)
    }

    pub async fn update_course(&self, course_id: Uuid, req: UpdateCourseRequest) -> AppResult<Course> {
        let req = UpdateCourseRequest {
            title: optional_title(req.title)?,
            ..req
        };
        self.repo
            .update_course(course_id, req, Utc::now())
            .await?
            .ok_or(AppError::CourseNotFound)
    }

    /// delete_course
    ///
    /// Removes the course with all of its modules and content, and the
    /// enrollments and progress records that reference it.
    pub async fn delete_course(&self, course_id: Uuid) -> AppResult<()> {
        if self.repo.find_course(course_id).await?.is_none() {
            return Err(AppError::CourseNotFound);
        }

        let mut plan = CascadePlan::new("delete_course");
        let modules = self.repo.list_modules(course_id).await?;
        let mut content_count = 0;
        for module in &modules {
            for content in self.repo.list_content(module.id).await? {
                plan.push(CascadeStep::DeleteProgressForContent(content.id));
                plan.push(CascadeStep::DeleteContent(content.id));
                content_count += 1;
            }
            plan.push(CascadeStep::DeleteModule(module.id));
        }
        plan.push(CascadeStep::DeleteProgressForCourse(course_id));
        plan.push(CascadeStep::DeleteEnrollmentsForCourse(course_id));
        plan.push(CascadeStep::DeleteCourse(course_id));

        self.repo.apply(plan).await?;
        tracing::info!(%course_id, modules = modules.len(), content = content_count, "course deleted");
        Ok(())
    }

    pub async fn list_courses(&self) -> AppResult<Vec<Course>> {
        Ok(self.repo.list_courses().await?)
    }

    pub async fn course_summaries(&self) -> AppResult<Vec<CourseSummary>> {
        let courses = self.repo.list_courses().await?;
        Ok(courses.iter().map(CourseSummary::from).collect())
    }

    /// Learner view: modules with a payload-free content overview.
    pub async fn course_outline(&self, course_id: Uuid) -> AppResult<CourseOutline> {
        let course = self
            .repo
            .find_course(course_id)
            .await?
            .ok_or(AppError::CourseNotFound)?;

        let mut modules = Vec::new();
        for module in self.repo.list_modules(course_id).await? {
            let content = self.repo.list_content(module.id).await?;
            modules.push(ModuleOutline {
                content: content.iter().map(ContentOverview::from).collect(),
                module,
            });
        }
        Ok(CourseOutline { course, modules })
    }

    /// Admin view: modules with full content records.
    pub async fn course_tree(&self, course_id: Uuid) -> AppResult<CourseTree> {
        let course = self
            .repo
            .find_course(course_id)
            .await?
            .ok_or(AppError::CourseNotFound)?;

        let mut modules = Vec::new();
        for module in self.repo.list_modules(course_id).await? {
            let content = self.repo.list_content(module.id).await?;
            modules.push(ModuleTree { module, content });
        }
        Ok(CourseTree { course, modules })
    }

    // --- Modules ---

    /// create_module
    ///
    /// Inserts the module and appends it to the course's module list as one
    /// unit.
    pub async fn create_module(&self, course_id: Uuid, req: CreateModuleRequest) -> AppResult<Module> {
        if self.repo.find_course(course_id).await?.is_none() {
            return Err(AppError::CourseNotFound);
        }

        let now = Utc::now();
        let module = Module {
            id: Uuid::new_v4(),
            course_id,
            title: require_title(&req.title)?,
            description: req.description,
            content_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        };

        let plan = CascadePlan::new("create_module")
            .then(CascadeStep::InsertModule(module.clone()))
            .then(CascadeStep::AttachModule {
                course_id,
                module_id: module.id,
            });
        self.repo
            .apply(plan)
            .await
            .map_err(parent_gone(AppError::CourseNotFound))?;

        tracing::info!(module_id = %module.id, %course_id, "module created");
        Ok(module)
    }

    pub async fn update_module(&self, module_id: Uuid, req: UpdateModuleRequest) -> AppResult<Module> {
        let req = UpdateModuleRequest {
            title: optional_title(req.title)?,
            ..req
        };
        self.repo
            .update_module(module_id, req, Utc::now())
            .await?
            .ok_or(AppError::ModuleNotFound)
    }

    /// delete_module
    ///
    /// Deletes the module's content (and progress on it), the module, and its
    /// entry in the course's module list.
    pub async fn delete_module(&self, module_id: Uuid) -> AppResult<()> {
        let module = self
            .repo
            .find_module(module_id)
            .await?
            .ok_or(AppError::ModuleNotFound)?;

        let mut plan = CascadePlan::new("delete_module");
        let content = self.repo.list_content(module_id).await?;
        for item in &content {
            plan.push(CascadeStep::DeleteProgressForContent(item.id));
            plan.push(CascadeStep::DeleteContent(item.id));
        }
        plan.push(CascadeStep::DeleteModule(module_id));
        plan.push(CascadeStep::DetachModule {
            course_id: module.course_id,
            module_id,
        });

        self.repo.apply(plan).await?;
        tracing::info!(%module_id, course_id = %module.course_id, content = content.len(), "module deleted");
        Ok(())
    }

    // --- Content ---

    /// create_content
    ///
    /// Validates the payload against its kind, copies the module's course as
    /// the denormalized owner, and attaches the item to the module.
    pub async fn create_content(
        &self,
        module_id: Uuid,
        req: CreateContentRequest,
    ) -> AppResult<Content> {
        let module = self
            .repo
            .find_module(module_id)
            .await?
            .ok_or(AppError::ModuleNotFound)?;

        let title = require_title(&req.title)?;
        let (kind, url, text_body) =
            ContentPayload::from_parts(req.kind, req.url, req.text_body)?.into_columns();

        let now = Utc::now();
        let content = Content {
            id: Uuid::new_v4(),
            module_id,
            course_id: Some(module.course_id),
            title,
            kind,
            url,
            text_body,
            created_at: now,
            updated_at: now,
        };

        let plan = CascadePlan::new("create_content")
            .then(CascadeStep::InsertContent(content.clone()))
            .then(CascadeStep::AttachContent {
                module_id,
                content_id: content.id,
            });
        self.repo
            .apply(plan)
            .await
            .map_err(parent_gone(AppError::ModuleNotFound))?;

        tracing::info!(content_id = %content.id, %module_id, course_id = %module.course_id, "content created");
        Ok(content)
    }

    /// update_content
    ///
    /// Changing `kind` switches the payload: the field of the new kind must be
    /// supplied and the other one is cleared.
    pub async fn update_content(
        &self,
        content_id: Uuid,
        req: UpdateContentRequest,
    ) -> AppResult<Content> {
        let current = self
            .repo
            .find_content(content_id)
            .await?
            .ok_or(AppError::ContentNotFound)?;

        let kind = req.kind.unwrap_or(current.kind);
        let (url, text_body) = if kind == current.kind {
            (
                req.url.or_else(|| current.url.clone()),
                req.text_body.or_else(|| current.text_body.clone()),
            )
        } else {
            (req.url, req.text_body)
        };
        let (kind, url, text_body) = ContentPayload::from_parts(kind, url, text_body)?.into_columns();

        let updated = Content {
            title: optional_title(req.title)?.unwrap_or_else(|| current.title.clone()),
            kind,
            url,
            text_body,
            updated_at: Utc::now(),
            ..current
        };

        self.repo
            .replace_content(updated)
            .await?
            .ok_or(AppError::ContentNotFound)
    }

    /// delete_content
    ///
    /// Deletes the item, progress recorded on it, and its entry in the
    /// module's content list.
    pub async fn delete_content(&self, content_id: Uuid) -> AppResult<()> {
        let content = self
            .repo
            .find_content(content_id)
            .await?
            .ok_or(AppError::ContentNotFound)?;

        let plan = CascadePlan::new("delete_content")
            .then(CascadeStep::DeleteProgressForContent(content_id))
            .then(CascadeStep::DeleteContent(content_id))
            .then(CascadeStep::DetachContent {
                module_id: content.module_id,
                content_id,
            });

        self.repo.apply(plan).await?;
        tracing::info!(%content_id, module_id = %content.module_id, "content deleted");
        Ok(())
    }

    /// Returns content to an enrolled learner after checking the stored
    /// payload still matches its kind.
    pub fn deliver(&self, content: Content) -> AppResult<Content> {
        content.payload()?;
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn titles_are_trimmed_and_must_not_be_blank() {
        assert_eq!(require_title("  Intro  ").unwrap(), "Intro");
        assert!(matches!(require_title("   "), Err(AppError::Validation(_))));
        assert_eq!(optional_title(None).unwrap(), None);
    }

    #[test]
    fn a_vanished_parent_maps_to_the_given_not_found() {
        let err = parent_gone(AppError::ModuleNotFound)(StoreError::Missing("module".into()));
        assert!(matches!(err, AppError::ModuleNotFound));

        let err = parent_gone(AppError::ModuleNotFound)(StoreError::Unavailable("down".into()));
        assert!(matches!(err, AppError::Store(StoreError::Unavailable(_))));
    }
}
