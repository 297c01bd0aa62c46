use axum::{Router, extract::FromRef, http::HeaderName};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

pub mod accounts;
pub mod auth;
pub mod config;
pub mod enrollment;
pub mod error;
pub mod gate;
pub mod handlers;
pub mod hierarchy;
pub mod models;
pub mod progress;
pub mod repository;

// Module for routing segregation (Public, Authenticated, Admin).
pub mod routes;
use routes::{admin, authenticated, public};

// --- Public Re-exports ---

pub use accounts::AccountService;
pub use config::AppConfig;
pub use enrollment::EnrollmentService;
pub use error::{AppError, AppResult, StoreError};
pub use hierarchy::HierarchyManager;
pub use progress::ProgressTracker;
pub use repository::{InMemoryRepository, PostgresRepository, RepositoryState, ResilientRepository};

/// ApiDoc
///
/// Aggregates every `#[utoipa::path]` handler and `ToSchema` model into the
/// OpenAPI document served at `/api-docs/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::register_user, handlers::get_me, handlers::request_enrollment,
        handlers::get_my_enrollments, handlers::get_my_courses, handlers::get_courses,
        handlers::get_course, handlers::get_content, handlers::toggle_content_completion,
        handlers::get_course_progress, handlers::list_users, handlers::approve_user,
        handlers::reject_user, handlers::admin_list_courses, handlers::create_course,
        handlers::get_course_tree, handlers::update_course, handlers::delete_course,
        handlers::create_module, handlers::update_module, handlers::delete_module,
        handlers::create_content, handlers::update_content, handlers::delete_content,
        handlers::list_enrollments, handlers::approve_enrollment, handlers::reject_enrollment,
        handlers::admin_course_progress, handlers::admin_user_progress
    ),
    components(
        schemas(
            models::Role, models::ApprovalState, models::ContentKind, models::EnrollmentStatus,
            models::User, models::Course, models::Module, models::Content, models::Enrollment,
            models::ProgressRecord, models::RegisterUserRequest, models::CreateCourseRequest,
            models::UpdateCourseRequest, models::CreateModuleRequest, models::UpdateModuleRequest,
            models::CreateContentRequest, models::UpdateContentRequest, models::CourseSummary,
            models::ContentOverview, models::ModuleOutline, models::CourseOutline,
            models::ModuleTree, models::CourseTree, models::CourseProgress, models::ToggleOutcome,
        )
    ),
    tags(
        (name = "course-gate", description = "Course access, enrollment and progress API")
    )
)]
struct ApiDoc;

/// AppState
///
/// The single shared container for the store, configuration and the services
/// built on them. Cloning is cheap: every service holds the same
/// `Arc<dyn Repository>`.
#[derive(Clone)]
pub struct AppState {
    pub repo: RepositoryState,
    pub config: AppConfig,
    pub accounts: AccountService,
    pub enrollments: EnrollmentService,
    pub progress: ProgressTracker,
    pub hierarchy: HierarchyManager,
}

impl AppState {
    pub fn new(repo: RepositoryState, config: AppConfig) -> Self {
        let enrollments = EnrollmentService::new(repo.clone());
        Self {
            accounts: AccountService::new(repo.clone()),
            progress: ProgressTracker::new(
                repo.clone(),
                enrollments.clone(),
                config.completion_policy,
            ),
            hierarchy: HierarchyManager::new(repo.clone()),
            enrollments,
            repo,
            config,
        }
    }
}

// --- Axum FromRef Extractor Implementations ---

// The gate extractors only need the store and the credential secret.

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// create_router
///
/// Assembles the application's entire routing structure, applies global
/// middleware, and registers the application state.
pub fn create_router(state: AppState) -> Router {
    // 1. CORS Configuration
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    // Header name constant for Request Correlation.
    let x_request_id = HeaderName::from_static("x-request-id");

    // 2. Base Router Assembly
    let base_router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(public::public_routes())
        .merge(authenticated::authenticated_routes())
        .nest("/admin", admin::admin_routes())
        .with_state(state);

    // 3. Observability and Correlation Layers
    base_router
        .layer(
            ServiceBuilder::new()
                // 3a. Request ID Generation
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                // 3b. Request Tracing, with the request id on the span.
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                // 3c. Request ID Propagation back to the client.
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        .layer(cors)
}

/// trace_span_logger
///
/// Builds the per-request span: method, uri and the `x-request-id` set by the
/// layer above, so every log line of a request (gate denials, cascades,
/// retries) can be correlated.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
