mod common;

use chrono::Utc;
use common::{approved, enroll, fixture, seed_user};
use course_gate::{
    AppError,
    auth::Subject,
    gate::{self, CourseTarget, ResolvedCourse},
    models::{ApprovalState, Content, ContentKind, Role},
    repository::{CascadePlan, CascadeStep, Repository},
};
use uuid::Uuid;

#[tokio::test]
async fn test_account_gate_uses_live_approval_state() {
    let fx = fixture().await;
    let subject = Subject {
        id: fx.learner.id,
        role: Role::Learner,
    };

    assert!(gate::require_approved(fx.repo(), subject).await.is_ok());

    // Revoked after the credential was issued.
    fx.state.accounts.reject(fx.learner.id).await.unwrap();
    let err = gate::require_approved(fx.repo(), subject).await.unwrap_err();
    assert!(matches!(err, AppError::AccountNotApproved));
}

#[tokio::test]
async fn test_account_gate_distinguishes_pending_from_missing() {
    let fx = fixture().await;
    let pending = seed_user(fx.repo(), Role::Learner, ApprovalState::Pending).await;

    let err = gate::require_approved(
        fx.repo(),
        Subject {
            id: pending.id,
            role: Role::Learner,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::AccountNotApproved));

    let err = gate::require_approved(
        fx.repo(),
        Subject {
            id: Uuid::new_v4(),
            role: Role::Learner,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::SubjectNotFound));
}

#[tokio::test]
async fn test_role_gate_ignores_a_stale_admin_claim() {
    let fx = fixture().await;
    // The credential says admin, the live record says learner.
    let subject = Subject {
        id: fx.learner.id,
        role: Role::Admin,
    };

    let approved = gate::require_approved(fx.repo(), subject).await.unwrap();
    let err = gate::require_role(approved, Role::Admin).unwrap_err();
    assert!(matches!(err, AppError::InsufficientRole));
}

#[tokio::test]
async fn test_resolver_handles_direct_and_indirect_targets() {
    let fx = fixture().await;

    let direct = gate::resolve_course(fx.repo(), CourseTarget::Course(fx.course.id.to_string()))
        .await
        .unwrap();
    assert_eq!(direct.course_id, fx.course.id);
    assert!(direct.content.is_none());

    let item = &fx.content[0];
    let indirect = gate::resolve_course(fx.repo(), CourseTarget::Content(item.id.to_string()))
        .await
        .unwrap();
    assert_eq!(indirect.course_id, fx.course.id);
    assert_eq!(indirect.content.map(|c| c.id), Some(item.id));
}

#[tokio::test]
async fn test_resolver_failures() {
    let fx = fixture().await;

    let err = gate::resolve_course(fx.repo(), CourseTarget::Course("12345".into()))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidIdentifier(_)));

    let err = gate::resolve_course(fx.repo(), CourseTarget::Content(Uuid::new_v4().to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ContentNotFound));
}

#[tokio::test]
async fn test_resolver_flags_content_without_owning_course() {
    let fx = fixture().await;
    let orphan = Content {
        id: Uuid::new_v4(),
        module_id: fx.module.id,
        course_id: None,
        title: "Broken".into(),
        kind: ContentKind::Text,
        text_body: Some("body".into()),
        created_at: Utc::now(),
        updated_at: Utc::now(),
        ..Default::default()
    };
    fx.repo()
        .apply(CascadePlan::new("seed").then(CascadeStep::InsertContent(orphan.clone())))
        .await
        .unwrap();

    let err = gate::resolve_course(fx.repo(), CourseTarget::Content(orphan.id.to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::DataIntegrity(_)));
}

#[tokio::test]
async fn test_enrollment_gate_requires_an_access_granting_enrollment() {
    let fx = fixture().await;
    let resolved = || ResolvedCourse {
        course_id: fx.course.id,
        content: None,
    };

    // No enrollment at all.
    let err = gate::require_enrollment(fx.repo(), approved(&fx.learner), resolved())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotEnrolled));

    // Pending does not grant access.
    let pending = fx
        .state
        .enrollments
        .request(fx.learner.id, fx.course.id)
        .await
        .unwrap();
    let err = gate::require_enrollment(fx.repo(), approved(&fx.learner), resolved())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotEnrolled));

    fx.state.enrollments.approve(pending.id).await.unwrap();
    let enrolled = gate::require_enrollment(fx.repo(), approved(&fx.learner), resolved())
        .await
        .unwrap();
    assert_eq!(enrolled.enrollment.id, pending.id);
    assert_eq!(enrolled.course_id, fx.course.id);
}

#[tokio::test]
async fn test_enrollment_gate_reports_missing_course_before_enrollment() {
    let fx = fixture().await;
    let err = gate::require_enrollment(
        fx.repo(),
        approved(&fx.learner),
        ResolvedCourse {
            course_id: Uuid::new_v4(),
            content: None,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::CourseNotFound));
}

#[tokio::test]
async fn test_enrollment_in_one_course_does_not_open_another() {
    let fx = fixture().await;
    enroll(&fx.state, fx.learner.id, fx.course.id).await;

    let other = fx
        .state
        .hierarchy
        .create_course(
            &approved(&fx.admin),
            course_gate::models::CreateCourseRequest {
                title: "Other".into(),
                description: None,
            },
        )
        .await
        .unwrap();

    let err = gate::require_enrollment(
        fx.repo(),
        approved(&fx.learner),
        ResolvedCourse {
            course_id: other.id,
            content: None,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::NotEnrolled));
}
