mod common;

use common::{enroll, fixture, fixture_with, text_item};
use course_gate::{
    AppError,
    config::CompletionPolicy,
    models::EnrollmentStatus,
};
use std::sync::Arc;
use uuid::Uuid;

#[tokio::test]
async fn test_first_toggle_creates_a_completed_record() {
    let fx = fixture().await;
    enroll(&fx.state, fx.learner.id, fx.course.id).await;

    let outcome = fx
        .state
        .progress
        .toggle(fx.learner.id, fx.content[0].id)
        .await
        .unwrap();
    assert!(outcome.created);
    assert!(outcome.record.completed);
    assert_eq!(outcome.record.course_id, fx.course.id);
    assert_eq!(outcome.enrollment.progress, 50);
}

#[tokio::test]
async fn test_toggling_twice_restores_the_original_state() {
    let fx = fixture().await;
    enroll(&fx.state, fx.learner.id, fx.course.id).await;
    let item = fx.content[0].id;

    let first = fx.state.progress.toggle(fx.learner.id, item).await.unwrap();
    let second = fx.state.progress.toggle(fx.learner.id, item).await.unwrap();
    let third = fx.state.progress.toggle(fx.learner.id, item).await.unwrap();

    assert!(!second.created);
    assert!(!second.record.completed);
    assert_eq!(second.enrollment.progress, 0);
    assert_eq!(third.record.completed, first.record.completed);
    assert_eq!(third.enrollment.progress, first.enrollment.progress);
}

#[tokio::test]
async fn test_completing_every_item_completes_the_enrollment_once() {
    let fx = fixture().await;
    enroll(&fx.state, fx.learner.id, fx.course.id).await;

    let half = fx
        .state
        .progress
        .toggle(fx.learner.id, fx.content[0].id)
        .await
        .unwrap();
    assert_eq!(half.enrollment.progress, 50);
    assert_eq!(half.enrollment.status, EnrollmentStatus::Active);

    let full = fx
        .state
        .progress
        .toggle(fx.learner.id, fx.content[1].id)
        .await
        .unwrap();
    assert_eq!(full.enrollment.progress, 100);
    assert_eq!(full.enrollment.status, EnrollmentStatus::Completed);

    // Forward only: un-marking does not reopen the enrollment.
    let regressed = fx
        .state
        .progress
        .toggle(fx.learner.id, fx.content[1].id)
        .await
        .unwrap();
    assert_eq!(regressed.enrollment.progress, 50);
    assert_eq!(regressed.enrollment.status, EnrollmentStatus::Completed);

    // Completing again is a no-op for the status.
    let again = fx
        .state
        .progress
        .toggle(fx.learner.id, fx.content[1].id)
        .await
        .unwrap();
    assert_eq!(again.enrollment.status, EnrollmentStatus::Completed);
}

#[tokio::test]
async fn test_revert_policy_reopens_a_regressed_enrollment() {
    let fx = fixture_with(CompletionPolicy::RevertOnRegress).await;
    enroll(&fx.state, fx.learner.id, fx.course.id).await;

    for item in &fx.content {
        fx.state.progress.toggle(fx.learner.id, item.id).await.unwrap();
    }
    let regressed = fx
        .state
        .progress
        .toggle(fx.learner.id, fx.content[0].id)
        .await
        .unwrap();
    assert_eq!(regressed.enrollment.progress, 50);
    assert_eq!(regressed.enrollment.status, EnrollmentStatus::Active);

    let restored = fx
        .state
        .progress
        .toggle(fx.learner.id, fx.content[0].id)
        .await
        .unwrap();
    assert_eq!(restored.enrollment.status, EnrollmentStatus::Completed);
}

#[tokio::test]
async fn test_progress_tracks_a_live_recount_when_content_changes() {
    let fx = fixture().await;
    enroll(&fx.state, fx.learner.id, fx.course.id).await;
    fx.state
        .progress
        .toggle(fx.learner.id, fx.content[0].id)
        .await
        .unwrap();

    // A third item lowers the share on the next recount.
    fx.state
        .hierarchy
        .create_content(fx.module.id, text_item("Quiz"))
        .await
        .unwrap();
    let report = fx
        .state
        .progress
        .course_progress(fx.learner.id, fx.course.id)
        .await
        .unwrap();
    assert_eq!((report.completed, report.total, report.percent), (1, 3, 33));

    // Deleting the completed item removes its record as well.
    fx.state
        .hierarchy
        .delete_content(fx.content[0].id)
        .await
        .unwrap();
    let report = fx
        .state
        .progress
        .course_progress(fx.learner.id, fx.course.id)
        .await
        .unwrap();
    assert_eq!((report.completed, report.total, report.percent), (0, 2, 0));
    assert!(report.records.is_empty());
}

#[tokio::test]
async fn test_course_progress_is_empty_before_any_toggle() {
    let fx = fixture().await;
    let report = fx
        .state
        .progress
        .course_progress(fx.learner.id, fx.course.id)
        .await
        .unwrap();
    assert!(report.records.is_empty());
    assert_eq!(report.percent, 0);
    assert_eq!(report.total, 2);
}

#[tokio::test]
async fn test_toggle_rechecks_content_and_enrollment() {
    let fx = fixture().await;

    let err = fx
        .state
        .progress
        .toggle(fx.learner.id, fx.content[0].id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotEnrolled));

    enroll(&fx.state, fx.learner.id, fx.course.id).await;
    let err = fx
        .state
        .progress
        .toggle(fx.learner.id, Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ContentNotFound));
}

#[tokio::test]
async fn test_admin_course_progress_covers_every_open_enrollment() {
    let fx = fixture().await;
    enroll(&fx.state, fx.learner.id, fx.course.id).await;
    enroll(&fx.state, fx.admin.id, fx.course.id).await;
    fx.state
        .progress
        .toggle(fx.learner.id, fx.content[0].id)
        .await
        .unwrap();

    let report = fx
        .state
        .progress
        .admin_course_progress(fx.course.id)
        .await
        .unwrap();
    assert_eq!(report.len(), 2);

    let learner = report.iter().find(|p| p.user_id == fx.learner.id).unwrap();
    assert_eq!(learner.percent, 50);
    assert_eq!(learner.records.len(), 1);
    let admin = report.iter().find(|p| p.user_id == fx.admin.id).unwrap();
    assert_eq!(admin.percent, 0);

    let err = fx
        .state
        .progress
        .admin_course_progress(Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::CourseNotFound));
}

#[tokio::test]
async fn test_user_course_progress_checks_both_ids() {
    let fx = fixture().await;
    let err = fx
        .state
        .progress
        .user_course_progress(Uuid::new_v4(), fx.course.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::UserNotFound));

    let report = fx
        .state
        .progress
        .user_course_progress(fx.learner.id, fx.course.id)
        .await
        .unwrap();
    assert_eq!(report.user_id, fx.learner.id);
}

#[tokio::test]
async fn test_concurrent_toggles_leave_the_stored_percentage_current() {
    let fx = fixture().await;
    enroll(&fx.state, fx.learner.id, fx.course.id).await;

    let mut items: Vec<Uuid> = fx.content.iter().map(|c| c.id).collect();
    for i in 0..6 {
        let extra = fx
            .state
            .hierarchy
            .create_content(fx.module.id, text_item(&format!("Drill {i}")))
            .await
            .unwrap();
        items.push(extra.id);
    }

    let tracker = Arc::new(fx.state.progress.clone());
    let mut handles = Vec::new();
    // Mark all but one item at once.
    for item in items.iter().skip(1).copied() {
        let tracker = tracker.clone();
        let user_id = fx.learner.id;
        handles.push(tokio::spawn(async move { tracker.toggle(user_id, item).await }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let report = fx
        .state
        .progress
        .course_progress(fx.learner.id, fx.course.id)
        .await
        .unwrap();
    let stored = fx
        .state
        .enrollments
        .for_user(fx.learner.id)
        .await
        .unwrap()
        .remove(0);
    assert_eq!((report.completed, report.total), (7, 8));
    assert_eq!(stored.progress, report.percent);
    assert_eq!(stored.status, EnrollmentStatus::Active);
}
