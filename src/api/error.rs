use crate::services::upload_service::UploadError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Not Found: {0}")]
    NotFound(String),

    #[error("Upload error: {0}")]
    Upload(#[from] UploadError),

    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                )
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Upload(e) => {
                let status = match &e {
                    UploadError::SessionNotFound => StatusCode::NOT_FOUND,
                    UploadError::Forbidden => StatusCode::FORBIDDEN,
                    UploadError::AlreadyFinalized => StatusCode::CONFLICT,
                    UploadError::OutOfRange { .. } => StatusCode::BAD_REQUEST,
                    UploadError::IncompleteUpload { .. } => StatusCode::CONFLICT,
                    UploadError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
                    UploadError::StoreUnavailable(source) => {
                        tracing::error!("Object store error: {:?}", source);
                        StatusCode::BAD_GATEWAY
                    }
                    UploadError::Database(source) => {
                        tracing::error!("Database error: {:?}", source);
                        return (
                            StatusCode::INTERNAL_SERVER_ERROR,
                            Json(json!({ "error": "Internal Server Error" })),
                        )
                            .into_response();
                    }
                };
                (status, e.to_string())
            }
            AppError::Anyhow(e) => {
                tracing::error!("Anyhow error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}
