use chrono::Utc;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult, StoreError},
    models::{CourseSummary, Enrollment, EnrollmentFilter, EnrollmentStatus},
    repository::RepositoryState,
};

/// Something that moves an existing enrollment between states.
///
/// Re-requesting after a rejection is not an event: it inserts a fresh pending
/// row and leaves the rejected one as history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollmentEvent {
    Approve,
    Reject,
    Complete,
    /// Only issued under `CompletionPolicy::RevertOnRegress`.
    Revert,
}

/// The transition table. `None` means the event is illegal from `from`.
pub fn next(from: EnrollmentStatus, event: EnrollmentEvent) -> Option<EnrollmentStatus> {
    use EnrollmentEvent::*;
    use EnrollmentStatus::*;

    match (from, event) {
        (Pending, Approve) => Some(Active),
        (Pending, Reject) => Some(Rejected),
        (Active, Complete) => Some(Completed),
        (Completed, Revert) => Some(Active),
        _ => None,
    }
}

/// The error a request gets when an open enrollment already exists.
fn already_open(existing: &Enrollment) -> AppError {
    match existing.status {
        EnrollmentStatus::Pending => AppError::AlreadyPending,
        EnrollmentStatus::Active | EnrollmentStatus::Completed => AppError::AlreadyEnrolled,
        EnrollmentStatus::Rejected => AppError::DataIntegrity(format!(
            "rejected enrollment {} reported as open",
            existing.id
        )),
    }
}

/// EnrollmentService
///
/// Owns every status change of an enrollment. Status writes are
/// compare-and-set against the status that was read, so two admins deciding
/// the same request (or two toggles completing the same course) cannot both
/// win.
#[derive(Clone)]
pub struct EnrollmentService {
    repo: RepositoryState,
}

impl EnrollmentService {
    pub fn new(repo: RepositoryState) -> Self {
        Self { repo }
    }

    /// request
    ///
    /// Creates a pending enrollment. Permitted when there is no enrollment for
    /// the pair or only rejected ones.
    pub async fn request(&self, user_id: Uuid, course_id: Uuid) -> AppResult<Enrollment> {
        if self.repo.find_course(course_id).await?.is_none() {
            return Err(AppError::CourseNotFound);
        }

        if let Some(existing) = self.repo.find_open_enrollment(user_id, course_id).await? {
            return Err(already_open(&existing));
        }

        let now = Utc::now();
        let pending = Enrollment {
            id: Uuid::new_v4(),
            user_id,
            course_id,
            status: EnrollmentStatus::Pending,
            progress: 0,
            requested_at: now,
            updated_at: now,
        };

        match self.repo.insert_enrollment(pending).await {
            Ok(created) => {
                tracing::info!(enrollment_id = %created.id, %user_id, %course_id, "enrollment requested");
                Ok(created)
            }
            // Lost a race with a concurrent request for the same pair.
            Err(StoreError::Conflict(_)) => {
                match self.repo.find_open_enrollment(user_id, course_id).await? {
                    Some(existing) => Err(already_open(&existing)),
                    None => Err(AppError::AlreadyPending),
                }
            }
            Err(StoreError::Missing(_)) => Err(AppError::CourseNotFound),
            Err(other) => Err(other.into()),
        }
    }

    pub async fn approve(&self, enrollment_id: Uuid) -> AppResult<Enrollment> {
        self.decide(enrollment_id, EnrollmentEvent::Approve).await
    }

    pub async fn reject(&self, enrollment_id: Uuid) -> AppResult<Enrollment> {
        self.decide(enrollment_id, EnrollmentEvent::Reject).await
    }

    async fn decide(&self, enrollment_id: Uuid, event: EnrollmentEvent) -> AppResult<Enrollment> {
        let current = self
            .repo
            .find_enrollment(enrollment_id)
            .await?
            .ok_or(AppError::EnrollmentNotFound)?;

        let to = next(current.status, event)
            .ok_or_else(|| AppError::NotPending(current.status.as_str().to_string()))?;

        match self
            .repo
            .transition_enrollment(enrollment_id, current.status, to, Utc::now())
            .await?
        {
            Some(updated) => {
                tracing::info!(%enrollment_id, ?event, from = current.status.as_str(), to = to.as_str(), "enrollment decided");
                Ok(updated)
            }
            None => {
                let latest = self
                    .repo
                    .find_enrollment(enrollment_id)
                    .await?
                    .ok_or(AppError::EnrollmentNotFound)?;
                Err(AppError::NotPending(latest.status.as_str().to_string()))
            }
        }
    }

    /// auto_complete
    ///
    /// `active → completed`, driven by the progress tracker at 100%. A no-op
    /// for an enrollment that is already completed. Other states do not grant
    /// access and fail with `NotEnrolled`.
    pub async fn auto_complete(&self, enrollment_id: Uuid) -> AppResult<Enrollment> {
        self.system_transition(enrollment_id, EnrollmentEvent::Complete)
            .await
    }

    /// revert
    ///
    /// `completed → active`. A no-op for an enrollment that is already active.
    pub async fn revert(&self, enrollment_id: Uuid) -> AppResult<Enrollment> {
        self.system_transition(enrollment_id, EnrollmentEvent::Revert)
            .await
    }

    async fn system_transition(
        &self,
        enrollment_id: Uuid,
        event: EnrollmentEvent,
    ) -> AppResult<Enrollment> {
        let current = self
            .repo
            .find_enrollment(enrollment_id)
            .await?
            .ok_or(AppError::EnrollmentNotFound)?;

        let Some(to) = next(current.status, event) else {
            return if current.status.grants_access() {
                // Already in the target state.
                Ok(current)
            } else {
                Err(AppError::NotEnrolled)
            };
        };

        match self
            .repo
            .transition_enrollment(enrollment_id, current.status, to, Utc::now())
            .await?
        {
            Some(updated) => {
                tracing::info!(%enrollment_id, user_id = %updated.user_id, course_id = %updated.course_id, to = to.as_str(), "enrollment status changed by progress");
                Ok(updated)
            }
            // Someone else moved it first; if it landed where we wanted, fine.
            None => match self.repo.find_enrollment(enrollment_id).await? {
                Some(latest) if latest.status == to => Ok(latest),
                Some(_) => Err(AppError::NotEnrolled),
                None => Err(AppError::EnrollmentNotFound),
            },
        }
    }

    pub async fn list(&self, filter: EnrollmentFilter) -> AppResult<Vec<Enrollment>> {
        Ok(self.repo.list_enrollments(filter).await?)
    }

    /// A learner's own enrollments, newest request first.
    pub async fn for_user(&self, user_id: Uuid) -> AppResult<Vec<Enrollment>> {
        let mut enrollments = self
            .repo
            .list_enrollments(EnrollmentFilter {
                user_id: Some(user_id),
                ..Default::default()
            })
            .await?;
        enrollments.sort_by(|a, b| b.requested_at.cmp(&a.requested_at));
        Ok(enrollments)
    }

    /// Courses the learner may currently open.
    pub async fn accessible_courses(&self, user_id: Uuid) -> AppResult<Vec<CourseSummary>> {
        let mut courses = Vec::new();
        for enrollment in self.for_user(user_id).await? {
            if !enrollment.status.grants_access() {
                continue;
            }
            if let Some(course) = self.repo.find_course(enrollment.course_id).await? {
                courses.push(CourseSummary::from(&course));
            }
        }
        Ok(courses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use EnrollmentEvent::*;
    use EnrollmentStatus::*;

    #[test]
    fn only_the_documented_transitions_are_legal() {
        let states = [Pending, Active, Rejected, Completed];
        let events = [Approve, Reject, Complete, Revert];

        let legal: Vec<_> = states
            .iter()
            .flat_map(|s| events.iter().map(move |e| (*s, *e)))
            .filter_map(|(s, e)| next(s, e).map(|to| (s, e, to)))
            .collect();

        assert_eq!(
            legal,
            vec![
                (Pending, Approve, Active),
                (Pending, Reject, Rejected),
                (Active, Complete, Completed),
                (Completed, Revert, Active),
            ]
        );
    }

    #[test]
    fn open_enrollments_map_to_distinct_conflicts() {
        let with = |status| Enrollment {
            status,
            ..Default::default()
        };
        assert!(matches!(already_open(&with(Pending)), AppError::AlreadyPending));
        assert!(matches!(already_open(&with(Active)), AppError::AlreadyEnrolled));
        assert!(matches!(already_open(&with(Completed)), AppError::AlreadyEnrolled));
    }
}
