use chrono::Utc;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{ApprovalState, RegisterUserRequest, Role, User},
    repository::RepositoryState,
};

/// AccountService
///
/// Registration and admin approval of user accounts. Approval state is what
/// the account gate reads on every request, so a change here takes effect on
/// the user's very next call.
#[derive(Clone)]
pub struct AccountService {
    repo: RepositoryState,
}

impl AccountService {
    pub fn new(repo: RepositoryState) -> Self {
        Self { repo }
    }

    /// New accounts are always learners awaiting approval.
    pub async fn register(&self, req: RegisterUserRequest) -> AppResult<User> {
        let email = req.email.trim().to_ascii_lowercase();
        if !email.contains('@') || email.starts_with('@') || email.ends_with('@') {
            return Err(AppError::Validation("email is not valid".into()));
        }
        let name = req.name.trim();
        if name.is_empty() {
            return Err(AppError::Validation("name must not be empty".into()));
        }

        let user = User {
            id: Uuid::new_v4(),
            email,
            name: name.to_string(),
            role: Role::Learner,
            approval_state: ApprovalState::Pending,
            created_at: Utc::now(),
        };
        let user = self.repo.insert_user(user).await?;
        tracing::info!(user_id = %user.id, "user registered");
        Ok(user)
    }

    pub async fn list(&self) -> AppResult<Vec<User>> {
        Ok(self.repo.list_users().await?)
    }

    pub async fn approve(&self, user_id: Uuid) -> AppResult<User> {
        self.set_state(user_id, ApprovalState::Active).await
    }

    pub async fn reject(&self, user_id: Uuid) -> AppResult<User> {
        self.set_state(user_id, ApprovalState::Rejected).await
    }

    async fn set_state(&self, user_id: Uuid, state: ApprovalState) -> AppResult<User> {
        let user = self
            .repo
            .set_user_approval(user_id, state)
            .await?
            .ok_or(AppError::UserNotFound)?;
        tracing::info!(%user_id, state = ?state, "account approval changed");
        Ok(user)
    }
}
