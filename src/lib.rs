pub mod api;
pub mod client;
pub mod config;
pub mod entities;
pub mod infrastructure;
pub mod services;
pub mod utils;

use crate::config::UploadConfig;
use crate::services::file_service::FileService;
use crate::services::storage::ObjectStorage;
use crate::services::upload_service::UploadService;
use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::uploads::init_upload_handler,
        api::handlers::uploads::chunk_target_handler,
        api::handlers::uploads::mark_chunk_handler,
        api::handlers::uploads::complete_upload_handler,
        api::handlers::uploads::cancel_upload_handler,
        api::handlers::uploads::session_status_handler,
        api::handlers::uploads::list_sessions_handler,
        api::handlers::files::list_files_handler,
        api::handlers::files::download_file_handler,
        api::handlers::health::health_check,
    ),
    components(
        schemas(
            services::upload_service::InitUploadRequest,
            services::upload_service::InitUploadResponse,
            services::upload_service::ChunkTargetResponse,
            services::upload_service::MarkChunkRequest,
            services::upload_service::CompleteUploadRequest,
            services::upload_service::FileResponse,
            services::upload_service::SessionStatusResponse,
            api::handlers::files::DownloadUrlResponse,
            api::handlers::health::HealthResponse,
        )
    ),
    tags(
        (name = "uploads", description = "Resumable chunked upload coordination"),
        (name = "files", description = "Finalized file metadata")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub storage: Arc<dyn ObjectStorage>,
    pub upload_service: Arc<UploadService>,
    pub file_service: Arc<FileService>,
    pub config: UploadConfig,
}

pub fn create_app(state: AppState) -> Router {
    let origins: Vec<axum::http::HeaderValue> = state
        .config
        .allowed_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(api::handlers::health::health_check))
        .route(
            "/files/upload/init",
            post(api::handlers::uploads::init_upload_handler).layer(from_fn_with_state(
                state.clone(),
                api::middleware::auth::auth_middleware,
            )),
        )
        .route(
            "/files/upload/sessions",
            get(api::handlers::uploads::list_sessions_handler).layer(from_fn_with_state(
                state.clone(),
                api::middleware::auth::auth_middleware,
            )),
        )
        .route(
            "/files/upload/:session_id",
            get(api::handlers::uploads::session_status_handler)
                .delete(api::handlers::uploads::cancel_upload_handler)
                .layer(from_fn_with_state(
                    state.clone(),
                    api::middleware::auth::auth_middleware,
                )),
        )
        .route(
            "/files/upload/:session_id/target/:chunk_index",
            get(api::handlers::uploads::chunk_target_handler).layer(from_fn_with_state(
                state.clone(),
                api::middleware::auth::auth_middleware,
            )),
        )
        .route(
            "/files/upload/:session_id/chunk/:chunk_index",
            post(api::handlers::uploads::mark_chunk_handler).layer(from_fn_with_state(
                state.clone(),
                api::middleware::auth::auth_middleware,
            )),
        )
        .route(
            "/files/upload/:session_id/complete",
            post(api::handlers::uploads::complete_upload_handler).layer(from_fn_with_state(
                state.clone(),
                api::middleware::auth::auth_middleware,
            )),
        )
        .route(
            "/files",
            get(api::handlers::files::list_files_handler).layer(from_fn_with_state(
                state.clone(),
                api::middleware::auth::auth_middleware,
            )),
        )
        .route(
            "/files/:id/download",
            get(api::handlers::files::download_file_handler).layer(from_fn_with_state(
                state.clone(),
                api::middleware::auth::auth_middleware,
            )),
        )
        .layer(
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
