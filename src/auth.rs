use axum::{
    extract::{FromRef, FromRequestParts, RawPathParams},
    http::{header, request::Parts},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    error::{AppError, AppResult},
    gate::{self, ApprovedSubject, CourseTarget, EnrolledSubject},
    models::Role,
    repository::RepositoryState,
};

/// Claims
///
/// The payload expected inside a bearer credential (HS256 JWT).
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (sub): the user's id.
    pub sub: Uuid,
    /// Role at issuance. Informational only: the role gate checks the live role.
    pub role: Role,
    /// Expiration Time (exp): Timestamp after which the JWT must not be accepted.
    pub exp: usize,
    /// Issued At (iat): Timestamp when the JWT was issued.
    pub iat: usize,
}

/// Subject
///
/// A verified identity. Produced by [`verify_credential`] without touching the
/// store; nothing about it is trusted beyond "this token was signed by us and
/// has not expired".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subject {
    pub id: Uuid,
    pub role: Role,
}

/// verify_credential
///
/// The identity verifier. Pure: no I/O, safe to call any number of times.
pub fn verify_credential(token: &str, secret: &str) -> AppResult<Subject> {
    let mut validation = Validation::default();
    validation.validate_exp = true;

    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| match e.kind() {
        ErrorKind::ExpiredSignature => AppError::Unauthenticated("credential expired".into()),
        ErrorKind::InvalidSignature => {
            AppError::Unauthenticated("credential signature mismatch".into())
        }
        _ => AppError::Unauthenticated("malformed credential".into()),
    })?;

    Ok(Subject {
        id: data.claims.sub,
        role: data.claims.role,
    })
}

/// issue_token
///
/// Mints a credential for `id`. Credential issuance belongs to the identity
/// provider; this exists for local tooling and tests.
pub fn issue_token(
    id: Uuid,
    role: Role,
    secret: &str,
    ttl: Duration,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now();
    let claims = Claims {
        sub: id,
        role,
        iat: now.timestamp().max(0) as usize,
        exp: (now + ttl).timestamp().max(0) as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

fn bearer_token(parts: &Parts) -> AppResult<&str> {
    let value = parts
        .headers
        .get(header::AUTHORIZATION)
        .ok_or_else(|| AppError::Unauthenticated("missing authorization header".into()))?
        .to_str()
        .map_err(|_| AppError::Unauthenticated("malformed authorization header".into()))?;

    value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::Unauthenticated("expected a bearer credential".into()))
}

/// Identity verifier followed by the account gate.
async fn authenticate<S>(parts: &Parts, state: &S) -> AppResult<ApprovedSubject>
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    AppConfig: FromRef<S>,
{
    let config = AppConfig::from_ref(state);
    let repo = RepositoryState::from_ref(state);

    let subject = verify_credential(bearer_token(parts)?, &config.jwt_secret)?;
    gate::require_approved(repo.as_ref(), subject).await
}

/// Approved Extractor
///
/// Any user whose account is currently active, whatever their role.
/// Pipeline: identity → account.
#[derive(Debug, Clone)]
pub struct Approved(pub ApprovedSubject);

impl<S> FromRequestParts<S> for Approved
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    AppConfig: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        authenticate(parts, state).await.map(Approved)
    }
}

/// Admin Extractor
///
/// Pipeline: identity → account → role(admin).
#[derive(Debug, Clone)]
pub struct Admin(pub ApprovedSubject);

impl<S> FromRequestParts<S> for Admin
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    AppConfig: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let approved = authenticate(parts, state).await?;
        gate::require_role(approved, Role::Admin).map(Admin)
    }
}

/// Enrolled Extractor
///
/// Pipeline: identity → account → resolve course → enrollment.
///
/// The course comes from the `course_id` path parameter or, for content-scoped
/// routes, is resolved through the `content_id` path parameter.
#[derive(Debug, Clone)]
pub struct Enrolled(pub EnrolledSubject);

impl<S> FromRequestParts<S> for Enrolled
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    AppConfig: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let approved = authenticate(parts, state).await?;

        let params = RawPathParams::from_request_parts(parts, state)
            .await
            .map_err(|e| AppError::DataIntegrity(format!("path parameters unavailable: {e}")))?;
        let target = params
            .iter()
            .find_map(|(key, value)| match key {
                "course_id" => Some(CourseTarget::Course(value.to_string())),
                "content_id" => Some(CourseTarget::Content(value.to_string())),
                _ => None,
            })
            .ok_or_else(|| {
                AppError::DataIntegrity("route has no course_id or content_id parameter".into())
            })?;

        let repo = RepositoryState::from_ref(state);
        let resolved = gate::resolve_course(repo.as_ref(), target).await?;
        gate::require_enrollment(repo.as_ref(), approved, resolved)
            .await
            .map(Enrolled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "unit-test-secret";

    #[test]
    fn issued_tokens_verify_back_to_the_same_subject() {
        let id = Uuid::new_v4();
        let token = issue_token(id, Role::Admin, SECRET, Duration::minutes(5)).unwrap();

        let subject = verify_credential(&token, SECRET).unwrap();
        assert_eq!(subject, Subject { id, role: Role::Admin });
    }

    #[test]
    fn wrong_secret_expired_and_garbage_are_unauthenticated() {
        let id = Uuid::new_v4();
        let signed = issue_token(id, Role::Learner, SECRET, Duration::minutes(5)).unwrap();
        let expired = issue_token(id, Role::Learner, SECRET, Duration::hours(-2)).unwrap();

        let cases = [
            verify_credential(&signed, "other-secret"),
            verify_credential(&expired, SECRET),
            verify_credential("not.a.jwt", SECRET),
        ];
        for result in cases {
            assert!(matches!(result, Err(AppError::Unauthenticated(_))), "{result:?}");
        }
    }
}
