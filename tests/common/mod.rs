#![allow(dead_code)]

use chrono::{Duration, Utc};
use course_gate::{
    AppConfig, AppState,
    auth::issue_token,
    config::CompletionPolicy,
    gate::ApprovedSubject,
    models::{
        ApprovalState, Content, ContentKind, Course, CreateContentRequest, CreateCourseRequest,
        CreateModuleRequest, Enrollment, Module, Role, User,
    },
    repository::{InMemoryRepository, Repository, RepositoryState},
};
use std::sync::Arc;
use uuid::Uuid;

/// A course with one module holding two text items, an admin, and an approved
/// learner with no enrollment yet.
pub struct Fixture {
    pub state: AppState,
    pub admin: User,
    pub learner: User,
    pub course: Course,
    pub module: Module,
    pub content: Vec<Content>,
}

impl Fixture {
    pub fn repo(&self) -> &dyn Repository {
        self.state.repo.as_ref()
    }
}

pub fn app_state(policy: CompletionPolicy) -> AppState {
    let repo = Arc::new(InMemoryRepository::new()) as RepositoryState;
    let config = AppConfig {
        completion_policy: policy,
        ..AppConfig::default()
    };
    AppState::new(repo, config)
}

pub async fn seed_user(repo: &dyn Repository, role: Role, approval_state: ApprovalState) -> User {
    let id = Uuid::new_v4();
    repo.insert_user(User {
        id,
        email: format!("{id}@example.test"),
        name: format!("{role:?} {id}"),
        role,
        approval_state,
        created_at: Utc::now(),
    })
    .await
    .unwrap()
}

pub fn approved(user: &User) -> ApprovedSubject {
    ApprovedSubject { user: user.clone() }
}

pub fn text_item(title: &str) -> CreateContentRequest {
    CreateContentRequest {
        title: title.into(),
        kind: ContentKind::Text,
        url: None,
        text_body: Some(format!("{title} body")),
    }
}

pub async fn fixture_with(policy: CompletionPolicy) -> Fixture {
    let state = app_state(policy);
    let repo = state.repo.as_ref();
    let admin = seed_user(repo, Role::Admin, ApprovalState::Active).await;
    let learner = seed_user(repo, Role::Learner, ApprovalState::Active).await;

    let course = state
        .hierarchy
        .create_course(
            &approved(&admin),
            CreateCourseRequest {
                title: "Systems Programming".into(),
                description: Some("Ownership, borrowing and friends".into()),
            },
        )
        .await
        .unwrap();
    let module = state
        .hierarchy
        .create_module(
            course.id,
            CreateModuleRequest {
                title: "Week 1".into(),
                description: None,
            },
        )
        .await
        .unwrap();

    let mut content = Vec::new();
    for title in ["Reading", "Exercise"] {
        content.push(
            state
                .hierarchy
                .create_content(module.id, text_item(title))
                .await
                .unwrap(),
        );
    }

    Fixture {
        state,
        admin,
        learner,
        course,
        module,
        content,
    }
}

pub async fn fixture() -> Fixture {
    fixture_with(CompletionPolicy::ForwardOnly).await
}

/// Requests and approves an enrollment.
pub async fn enroll(state: &AppState, user_id: Uuid, course_id: Uuid) -> Enrollment {
    let pending = state.enrollments.request(user_id, course_id).await.unwrap();
    state.enrollments.approve(pending.id).await.unwrap()
}

pub fn token_for(user: &User, secret: &str) -> String {
    issue_token(user.id, user.role, secret, Duration::minutes(15)).unwrap()
}
