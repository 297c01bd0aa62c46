use crate::{
    AppState,
    auth::{Admin, Approved, Enrolled},
    error::{AppError, AppResult},
    gate,
    models::{
        Content, Course, CourseOutline, CourseProgress, CourseSummary, CourseTree,
        CreateContentRequest, CreateCourseRequest, CreateModuleRequest, Enrollment,
        EnrollmentFilter, Module, RegisterUserRequest, ToggleOutcome, UpdateContentRequest,
        UpdateCourseRequest, UpdateModuleRequest, User,
    },
};
use axum::{
    Json,
    extract::{FromRequestParts, Path, Query, State},
    http::{StatusCode, request::Parts},
    response::IntoResponse,
};
use uuid::Uuid;

/// PathId
///
/// A single `{id}`-style path segment parsed as a UUID. Malformed input is an
/// `InvalidIdentifier` error rather than axum's plain-text rejection.
pub struct PathId(pub Uuid);

impl<S> FromRequestParts<S> for PathId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(raw) = Path::<String>::from_request_parts(parts, state)
            .await
            .map_err(|e| AppError::InvalidIdentifier(e.body_text()))?;
        gate::parse_id(&raw).map(PathId)
    }
}

// --- Public ---

/// register_user
///
/// [Public Route] Creates a learner account in the `pending` approval state.
/// An admin must approve it before any gated route accepts the user.
#[utoipa::path(
    post,
    path = "/register",
    request_body = RegisterUserRequest,
    responses(
        (status = 201, description = "Registered", body = User),
        (status = 400, description = "Invalid email or name"),
        (status = 409, description = "Email already registered")
    )
)]
pub async fn register_user(
    State(state): State<AppState>,
    Json(payload): Json<RegisterUserRequest>,
) -> AppResult<impl IntoResponse> {
    let user = state.accounts.register(payload).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

// --- Learner ---

/// get_me
///
/// [Authenticated Route] The caller's live user record.
#[utoipa::path(
    get,
    path = "/me",
    responses((status = 200, description = "Current user", body = User))
)]
pub async fn get_me(Approved(subject): Approved) -> Json<User> {
    Json(subject.user)
}

/// request_enrollment
///
/// [Authenticated Route] Asks to join a course. Creates a `pending` enrollment.
#[utoipa::path(
    post,
    path = "/enrollments/{course_id}",
    params(("course_id" = Uuid, Path, description = "Course to join")),
    responses(
        (status = 201, description = "Enrollment requested", body = Enrollment),
        (status = 404, description = "Course not found"),
        (status = 409, description = "Already pending or enrolled")
    )
)]
pub async fn request_enrollment(
    Approved(subject): Approved,
    State(state): State<AppState>,
    PathId(course_id): PathId,
) -> AppResult<impl IntoResponse> {
    let enrollment = state.enrollments.request(subject.id(), course_id).await?;
    Ok((StatusCode::CREATED, Json(enrollment)))
}

/// get_my_enrollments
///
/// [Authenticated Route] All of the caller's enrollments, including rejected
/// history, newest request first.
#[utoipa::path(
    get,
    path = "/me/enrollments",
    responses((status = 200, description = "My enrollments", body = [Enrollment]))
)]
pub async fn get_my_enrollments(
    Approved(subject): Approved,
    State(state): State<AppState>,
) -> AppResult<Json<Vec<Enrollment>>> {
    Ok(Json(state.enrollments.for_user(subject.id()).await?))
}

/// get_my_courses
///
/// [Authenticated Route] Courses the caller can currently open.
#[utoipa::path(
    get,
    path = "/me/courses",
    responses((status = 200, description = "Accessible courses", body = [CourseSummary]))
)]
pub async fn get_my_courses(
    Approved(subject): Approved,
    State(state): State<AppState>,
) -> AppResult<Json<Vec<CourseSummary>>> {
    Ok(Json(state.enrollments.accessible_courses(subject.id()).await?))
}

/// get_courses
///
/// [Authenticated Route] The course catalogue as summaries. Browsing the
/// catalogue needs an approved account but no enrollment.
#[utoipa::path(
    get,
    path = "/courses",
    responses((status = 200, description = "Catalogue", body = [CourseSummary]))
)]
pub async fn get_courses(
    Approved(_approved): Approved,
    State(state): State<AppState>,
) -> AppResult<Json<Vec<CourseSummary>>> {
    Ok(Json(state.hierarchy.course_summaries().await?))
}

/// get_course
///
/// [Enrolled Route] Course outline: modules and a payload-free content list.
#[utoipa::path(
    get,
    path = "/courses/{course_id}",
    params(("course_id" = Uuid, Path, description = "Course id")),
    responses(
        (status = 200, description = "Course outline", body = CourseOutline),
        (status = 403, description = "Not enrolled"),
        (status = 404, description = "Course not found")
    )
)]
pub async fn get_course(
    Enrolled(enrolled): Enrolled,
    State(state): State<AppState>,
) -> AppResult<Json<CourseOutline>> {
    Ok(Json(state.hierarchy.course_outline(enrolled.course_id).await?))
}

/// get_content
///
/// [Enrolled Route] A single content item. The course is resolved from the
/// content id.
#[utoipa::path(
    get,
    path = "/content/{content_id}",
    params(("content_id" = Uuid, Path, description = "Content id")),
    responses(
        (status = 200, description = "Content", body = Content),
        (status = 403, description = "Not enrolled in the owning course"),
        (status = 404, description = "Content not found")
    )
)]
pub async fn get_content(
    Enrolled(enrolled): Enrolled,
    State(state): State<AppState>,
) -> AppResult<Json<Content>> {
    let content = enrolled.content.ok_or(AppError::ContentNotFound)?;
    Ok(Json(state.hierarchy.deliver(content)?))
}

/// toggle_content_completion
///
/// [Enrolled Route] Flips completion of a content item and returns the
/// refreshed enrollment. `201` when this is the first interaction with the
/// item, `200` otherwise.
#[utoipa::path(
    post,
    path = "/progress/content/{content_id}/toggle",
    params(("content_id" = Uuid, Path, description = "Content id")),
    responses(
        (status = 200, description = "Toggled", body = ToggleOutcome),
        (status = 201, description = "First completion recorded", body = ToggleOutcome),
        (status = 403, description = "Account not approved or not enrolled"),
        (status = 404, description = "Content not found")
    )
)]
pub async fn toggle_content_completion(
    Enrolled(enrolled): Enrolled,
    State(state): State<AppState>,
) -> AppResult<impl IntoResponse> {
    let outcome = state.progress.toggle_enrolled(&enrolled).await?;
    let status = if outcome.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(outcome)))
}

/// get_course_progress
///
/// [Enrolled Route] The caller's records in a course with a live recount.
#[utoipa::path(
    get,
    path = "/progress/course/{course_id}",
    params(("course_id" = Uuid, Path, description = "Course id")),
    responses((status = 200, description = "Progress", body = CourseProgress))
)]
pub async fn get_course_progress(
    Enrolled(enrolled): Enrolled,
    State(state): State<AppState>,
) -> AppResult<Json<CourseProgress>> {
    let progress = state
        .progress
        .course_progress(enrolled.subject.id(), enrolled.course_id)
        .await?;
    Ok(Json(progress))
}

// --- Admin: users ---

/// [Admin Route] Every registered user.
#[utoipa::path(
    get,
    path = "/admin/users",
    responses((status = 200, description = "Users", body = [User]))
)]
pub async fn list_users(
    Admin(_admin): Admin,
    State(state): State<AppState>,
) -> AppResult<Json<Vec<User>>> {
    Ok(Json(state.accounts.list().await?))
}

#[utoipa::path(
    patch,
    path = "/admin/users/{id}/approve",
    params(("id" = Uuid, Path, description = "User id")),
    responses((status = 200, description = "Approved", body = User))
)]
pub async fn approve_user(
    Admin(_admin): Admin,
    State(state): State<AppState>,
    PathId(user_id): PathId,
) -> AppResult<Json<User>> {
    Ok(Json(state.accounts.approve(user_id).await?))
}

#[utoipa::path(
    patch,
    path = "/admin/users/{id}/reject",
    params(("id" = Uuid, Path, description = "User id")),
    responses((status = 200, description = "Rejected", body = User))
)]
pub async fn reject_user(
    Admin(_admin): Admin,
    State(state): State<AppState>,
    PathId(user_id): PathId,
) -> AppResult<Json<User>> {
    Ok(Json(state.accounts.reject(user_id).await?))
}

// --- Admin: hierarchy ---

#[utoipa::path(
    get,
    path = "/admin/courses",
    responses((status = 200, description = "All courses", body = [Course]))
)]
pub async fn admin_list_courses(
    Admin(_admin): Admin,
    State(state): State<AppState>,
) -> AppResult<Json<Vec<Course>>> {
    Ok(Json(state.hierarchy.list_courses().await?))
}

/// create_course
///
/// [Admin Route] The calling admin becomes the course's instructor.
#[utoipa::path(
    post,
    path = "/admin/courses",
    request_body = CreateCourseRequest,
    responses((status = 201, description = "Created", body = Course))
)]
pub async fn create_course(
    Admin(admin): Admin,
    State(state): State<AppState>,
    Json(payload): Json<CreateCourseRequest>,
) -> AppResult<impl IntoResponse> {
    let course = state.hierarchy.create_course(&admin, payload).await?;
    Ok((StatusCode::CREATED, Json(course)))
}

/// [Admin Route] Course with every module and full content record.
#[utoipa::path(
    get,
    path = "/admin/courses/{id}",
    params(("id" = Uuid, Path, description = "Course id")),
    responses((status = 200, description = "Course tree", body = CourseTree))
)]
pub async fn get_course_tree(
    Admin(_admin): Admin,
    State(state): State<AppState>,
    PathId(course_id): PathId,
) -> AppResult<Json<CourseTree>> {
    Ok(Json(state.hierarchy.course_tree(course_id).await?))
}

#[utoipa::path(
    put,
    path = "/admin/courses/{id}",
    params(("id" = Uuid, Path, description = "Course id")),
    request_body = UpdateCourseRequest,
    responses((status = 200, description = "Updated", body = Course))
)]
pub async fn update_course(
    Admin(_admin): Admin,
    State(state): State<AppState>,
    PathId(course_id): PathId,
    Json(payload): Json<UpdateCourseRequest>,
) -> AppResult<Json<Course>> {
    Ok(Json(state.hierarchy.update_course(course_id, payload).await?))
}

/// delete_course
///
/// [Admin Route] Deletes the course, its modules and content, and every
/// enrollment and progress record referencing it.
#[utoipa::path(
    delete,
    path = "/admin/courses/{id}",
    params(("id" = Uuid, Path, description = "Course id")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn delete_course(
    Admin(_admin): Admin,
    State(state): State<AppState>,
    PathId(course_id): PathId,
) -> AppResult<StatusCode> {
    state.hierarchy.delete_course(course_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/admin/courses/{id}/modules",
    params(("id" = Uuid, Path, description = "Parent course id")),
    request_body = CreateModuleRequest,
    responses((status = 201, description = "Created", body = Module))
)]
pub async fn create_module(
    Admin(_admin): Admin,
    State(state): State<AppState>,
    PathId(course_id): PathId,
    Json(payload): Json<CreateModuleRequest>,
) -> AppResult<impl IntoResponse> {
    let module = state.hierarchy.create_module(course_id, payload).await?;
    Ok((StatusCode::CREATED, Json(module)))
}

#[utoipa::path(
    put,
    path = "/admin/modules/{id}",
    params(("id" = Uuid, Path, description = "Module id")),
    request_body = UpdateModuleRequest,
    responses((status = 200, description = "Updated", body = Module))
)]
pub async fn update_module(
    Admin(_admin): Admin,
    State(state): State<AppState>,
    PathId(module_id): PathId,
    Json(payload): Json<UpdateModuleRequest>,
) -> AppResult<Json<Module>> {
    Ok(Json(state.hierarchy.update_module(module_id, payload).await?))
}

#[utoipa::path(
    delete,
    path = "/admin/modules/{id}",
    params(("id" = Uuid, Path, description = "Module id")),
    responses((status = 204, description = "Deleted"))
)]
pub async fn delete_module(
    Admin(_admin): Admin,
    State(state): State<AppState>,
    PathId(module_id): PathId,
) -> AppResult<StatusCode> {
    state.hierarchy.delete_module(module_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/admin/modules/{id}/content",
    params(("id" = Uuid, Path, description = "Parent module id")),
    request_body = CreateContentRequest,
    responses(
        (status = 201, description = "Created", body = Content),
        (status = 400, description = "Payload does not match kind")
    )
)]
pub async fn create_content(
    Admin(_admin): Admin,
    State(state): State<AppState>,
    PathId(module_id): PathId,
    Json(payload): Json<CreateContentRequest>,
) -> AppResult<impl IntoResponse> {
    let content = state.hierarchy.create_content(module_id, payload).await?;
    Ok((StatusCode::CREATED, Json(content)))
}

#[utoipa::path(
    put,
    path = "/admin/content/{id}",
    params(("id" = Uuid, Path, description = "Content id")),
    request_body = UpdateContentRequest,
    responses((status = 200, description = "Updated", body = Content))
)]
pub async fn update_content(
    Admin(_admin): Admin,
    State(state): State<AppState>,
    PathId(content_id): PathId,
    Json(payload): Json<UpdateContentRequest>,
) -> AppResult<Json<Content>> {
    Ok(Json(state.hierarchy.update_content(content_id, payload).await?))
}

#[utoipa::path(
    delete,
    path = "/admin/content/{id}",
    params(("id" = Uuid, Path, description = "Content id")),
    responses((status = 204, description = "Deleted"))
)]
pub async fn delete_content(
    Admin(_admin): Admin,
    State(state): State<AppState>,
    PathId(content_id): PathId,
) -> AppResult<StatusCode> {
    state.hierarchy.delete_content(content_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Admin: enrollments & progress ---

/// list_enrollments
///
/// [Admin Route] Enrollments filtered by status, user and course.
/// `?status=pending` is the approval queue, oldest request first.
#[utoipa::path(
    get,
    path = "/admin/enrollments",
    params(EnrollmentFilter),
    responses((status = 200, description = "Enrollments", body = [Enrollment]))
)]
pub async fn list_enrollments(
    Admin(_admin): Admin,
    State(state): State<AppState>,
    Query(filter): Query<EnrollmentFilter>,
) -> AppResult<Json<Vec<Enrollment>>> {
    Ok(Json(state.enrollments.list(filter).await?))
}

#[utoipa::path(
    patch,
    path = "/admin/enrollments/{id}/approve",
    params(("id" = Uuid, Path, description = "Enrollment id")),
    responses(
        (status = 200, description = "Approved", body = Enrollment),
        (status = 409, description = "Not pending")
    )
)]
pub async fn approve_enrollment(
    Admin(_admin): Admin,
    State(state): State<AppState>,
    PathId(enrollment_id): PathId,
) -> AppResult<Json<Enrollment>> {
    Ok(Json(state.enrollments.approve(enrollment_id).await?))
}

#[utoipa::path(
    patch,
    path = "/admin/enrollments/{id}/reject",
    params(("id" = Uuid, Path, description = "Enrollment id")),
    responses(
        (status = 200, description = "Rejected", body = Enrollment),
        (status = 409, description = "Not pending")
    )
)]
pub async fn reject_enrollment(
    Admin(_admin): Admin,
    State(state): State<AppState>,
    PathId(enrollment_id): PathId,
) -> AppResult<Json<Enrollment>> {
    Ok(Json(state.enrollments.reject(enrollment_id).await?))
}

/// [Admin Route] Progress of every learner in a course.
#[utoipa::path(
    get,
    path = "/admin/progress/course/{id}",
    params(("id" = Uuid, Path, description = "Course id")),
    responses((status = 200, description = "Course progress", body = [CourseProgress]))
)]
pub async fn admin_course_progress(
    Admin(_admin): Admin,
    State(state): State<AppState>,
    PathId(course_id): PathId,
) -> AppResult<Json<Vec<CourseProgress>>> {
    Ok(Json(state.progress.admin_course_progress(course_id).await?))
}

#[utoipa::path(
    get,
    path = "/admin/progress/user/{user_id}/course/{course_id}",
    params(
        ("user_id" = Uuid, Path, description = "Learner id"),
        ("course_id" = Uuid, Path, description = "Course id")
    ),
    responses((status = 200, description = "Learner progress", body = CourseProgress))
)]
pub async fn admin_user_progress(
    Admin(_admin): Admin,
    State(state): State<AppState>,
    Path((user_id, course_id)): Path<(String, String)>,
) -> AppResult<Json<CourseProgress>> {
    let user_id = gate::parse_id(&user_id)?;
    let course_id = gate::parse_id(&course_id)?;
    Ok(Json(
        state
            .progress
            .user_course_progress(user_id, course_id)
            .await?,
    ))
}
