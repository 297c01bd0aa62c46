use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, patch, post, put},
};

/// Admin Router Module
///
/// Nested under `/admin`. Every handler takes the `Admin` extractor, which runs
/// identity → account → role(admin) against the live user record.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        // --- Accounts ---
        .route("/users", get(handlers::list_users))
        .route("/users/{id}/approve", patch(handlers::approve_user))
        .route("/users/{id}/reject", patch(handlers::reject_user))
        // --- Hierarchy ---
        .route(
            "/courses",
            get(handlers::admin_list_courses).post(handlers::create_course),
        )
        // DELETE /admin/courses/{id}
        // Strict cascade: modules, content, enrollments and progress go with it.
        .route(
            "/courses/{id}",
            get(handlers::get_course_tree)
                .put(handlers::update_course)
                .delete(handlers::delete_course),
        )
        .route("/courses/{id}/modules", post(handlers::create_module))
        .route(
            "/modules/{id}",
            put(handlers::update_module).delete(handlers::delete_module),
        )
        .route("/modules/{id}/content", post(handlers::create_content))
        .route(
            "/content/{id}",
            put(handlers::update_content).delete(handlers::delete_content),
        )
        // --- Enrollments ---
        // GET /admin/enrollments?status=pending
        // The approval queue, oldest request first.
        .route("/enrollments", get(handlers::list_enrollments))
        .route(
            "/enrollments/{id}/approve",
            patch(handlers::approve_enrollment),
        )
        .route(
            "/enrollments/{id}/reject",
            patch(handlers::reject_enrollment),
        )
        // --- Progress ---
        .route(
            "/progress/course/{id}",
            get(handlers::admin_course_progress),
        )
        .route(
            "/progress/user/{user_id}/course/{course_id}",
            get(handlers::admin_user_progress),
        )
}
