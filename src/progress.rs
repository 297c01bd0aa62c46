use std::collections::BTreeSet;

use chrono::Utc;
use uuid::Uuid;

use crate::{
    config::CompletionPolicy,
    enrollment::EnrollmentService,
    error::{AppError, AppResult, StoreError},
    gate::EnrolledSubject,
    models::{
        Content, CourseProgress, Enrollment, EnrollmentFilter, EnrollmentStatus, ToggleOutcome,
    },
    repository::RepositoryState,
};

/// ProgressTracker
///
/// Per-content completion toggles and the aggregate course percentage derived
/// from them. Every toggle recounts from the store, so the stored percentage
/// never drifts from the records.
#[derive(Clone)]
pub struct ProgressTracker {
    repo: RepositoryState,
    enrollments: EnrollmentService,
    policy: CompletionPolicy,
}

impl ProgressTracker {
    pub fn new(repo: RepositoryState, enrollments: EnrollmentService, policy: CompletionPolicy) -> Self {
        Self {
            repo,
            enrollments,
            policy,
        }
    }

    /// toggle
    ///
    /// Flips completion of `content_id` for `user_id`. Re-checks content and
    /// enrollment itself, so it is safe to call without having gone through
    /// the enrollment gate.
    pub async fn toggle(&self, user_id: Uuid, content_id: Uuid) -> AppResult<ToggleOutcome> {
        let content = self
            .repo
            .find_content(content_id)
            .await?
            .ok_or(AppError::ContentNotFound)?;
        let course_id = content.course_id.ok_or_else(|| {
            AppError::DataIntegrity(format!("content {content_id} has no owning course"))
        })?;

        let enrollment = self
            .repo
            .find_open_enrollment(user_id, course_id)
            .await?
            .filter(|e| e.status.grants_access())
            .ok_or(AppError::NotEnrolled)?;

        self.record_toggle(user_id, &content, course_id, enrollment)
            .await
    }

    /// Same as [`toggle`](Self::toggle), reusing the content and enrollment
    /// the enrollment gate already loaded.
    pub async fn toggle_enrolled(&self, enrolled: &EnrolledSubject) -> AppResult<ToggleOutcome> {
        let content = enrolled.content.as_ref().ok_or(AppError::ContentNotFound)?;
        self.record_toggle(
            enrolled.subject.id(),
            content,
            enrolled.course_id,
            enrolled.enrollment.clone(),
        )
        .await
    }

    async fn record_toggle(
        &self,
        user_id: Uuid,
        content: &Content,
        course_id: Uuid,
        enrollment: Enrollment,
    ) -> AppResult<ToggleOutcome> {
        let now = Utc::now();
        let (record, created) = self
            .repo
            .toggle_progress(user_id, content.id, course_id, now)
            .await
            .map_err(|e| match e {
                StoreError::Missing(_) => AppError::ContentNotFound,
                other => other.into(),
            })?;

        let mut enrollment = self
            .repo
            .refresh_enrollment_progress(enrollment.id, now)
            .await?
            .ok_or(AppError::NotEnrolled)?;
        let percent = enrollment.progress;

        if percent == 100 && enrollment.status == EnrollmentStatus::Active {
            enrollment = self.enrollments.auto_complete(enrollment.id).await?;
        } else if percent < 100
            && enrollment.status == EnrollmentStatus::Completed
            && self.policy == CompletionPolicy::RevertOnRegress
        {
            enrollment = self.enrollments.revert(enrollment.id).await?;
        }

        tracing::debug!(
            %user_id,
            content_id = %content.id,
            completed = record.completed,
            percent,
            status = enrollment.status.as_str(),
            "progress toggled"
        );

        Ok(ToggleOutcome {
            record,
            created,
            enrollment,
        })
    }

    /// course_progress
    ///
    /// Records of one user in one course with a live recount. Empty, not an
    /// error, when nothing has been recorded yet.
    pub async fn course_progress(&self, user_id: Uuid, course_id: Uuid) -> AppResult<CourseProgress> {
        let records = self.repo.list_progress(Some(user_id), course_id).await?;
        let counts = self.repo.progress_counts(user_id, course_id).await?;

        Ok(CourseProgress {
            user_id,
            course_id,
            records,
            completed: counts.completed,
            total: counts.total,
            percent: counts.percent(),
        })
    }

    /// Admin view of one learner's progress in a course.
    pub async fn user_course_progress(
        &self,
        user_id: Uuid,
        course_id: Uuid,
    ) -> AppResult<CourseProgress> {
        if self.repo.find_course(course_id).await?.is_none() {
            return Err(AppError::CourseNotFound);
        }
        if self.repo.find_user(user_id).await?.is_none() {
            return Err(AppError::UserNotFound);
        }
        self.course_progress(user_id, course_id).await
    }

    /// admin_course_progress
    ///
    /// Progress of every learner with a non-rejected enrollment or any
    /// recorded progress in the course, ordered by user id.
    pub async fn admin_course_progress(&self, course_id: Uuid) -> AppResult<Vec<CourseProgress>> {
        if self.repo.find_course(course_id).await?.is_none() {
            return Err(AppError::CourseNotFound);
        }

        let mut learners: BTreeSet<Uuid> = self
            .repo
            .list_enrollments(EnrollmentFilter {
                course_id: Some(course_id),
                ..Default::default()
            })
            .await?
            .into_iter()
            .filter(|e| e.status != EnrollmentStatus::Rejected)
            .map(|e| e.user_id)
            .collect();

        let records = self.repo.list_progress(None, course_id).await?;
        learners.extend(records.iter().map(|r| r.user_id));

        let mut report = Vec::with_capacity(learners.len());
        for user_id in learners {
            let counts = self.repo.progress_counts(user_id, course_id).await?;
            report.push(CourseProgress {
                user_id,
                course_id,
                records: records
                    .iter()
                    .filter(|r| r.user_id == user_id)
                    .cloned()
                    .collect(),
                completed: counts.completed,
                total: counts.total,
                percent: counts.percent(),
            });
        }
        Ok(report)
    }
}
