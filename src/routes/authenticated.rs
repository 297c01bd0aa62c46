use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Authenticated Router Module
///
/// Routes for any approved account. Each handler states its gate in its
/// signature:
///
/// - `Approved`: identity → account (catalogue, own enrollments, requests).
/// - `Enrolled`: identity → account → enrollment, with the course taken from
///   `{course_id}` or resolved from `{content_id}`.
pub fn authenticated_routes() -> Router<AppState> {
    Router::<AppState>::new()
        .route("/me", get(handlers::get_me))
        .route("/me/enrollments", get(handlers::get_my_enrollments))
        .route("/me/courses", get(handlers::get_my_courses))
        // --- Enrollment ---
        // POST /enrollments/{course_id}
        // Creates a pending request; re-request is allowed only after a rejection.
        .route(
            "/enrollments/{course_id}",
            post(handlers::request_enrollment),
        )
        // --- Catalogue & content ---
        .route("/courses", get(handlers::get_courses))
        .route("/courses/{course_id}", get(handlers::get_course))
        .route("/content/{content_id}", get(handlers::get_content))
        // --- Progress ---
        // POST /progress/content/{content_id}/toggle
        // Flips completion and recomputes the enrollment's aggregate progress.
        .route(
            "/progress/content/{content_id}/toggle",
            post(handlers::toggle_content_completion),
        )
        .route(
            "/progress/course/{course_id}",
            get(handlers::get_course_progress),
        )
}
