use crate::api::error::AppError;
use crate::services::upload_service::FileResponse;
use crate::utils::auth::Claims;
use axum::{
    Extension, Json,
    extract::{Path, State},
};
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Serialize, ToSchema)]
pub struct DownloadUrlResponse {
    pub url: String,
    pub expires_in_secs: u64,
}

#[utoipa::path(
    get,
    path = "/files",
    responses(
        (status = 200, description = "Finalized files for this user", body = Vec<FileResponse>),
        (status = 401, description = "Unauthorized")
    ),
    security(("jwt" = []))
)]
pub async fn list_files_handler(
    State(state): State<crate::AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<FileResponse>>, AppError> {
    let files = state.file_service.list_files(&claims.sub).await?;
    Ok(Json(files.into_iter().map(FileResponse::from).collect()))
}

#[utoipa::path(
    get,
    path = "/files/{id}/download",
    params(
        ("id" = String, Path, description = "File ID")
    ),
    responses(
        (status = 200, description = "Short-lived presigned download URL", body = DownloadUrlResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "File not found")
    ),
    security(("jwt" = []))
)]
pub async fn download_file_handler(
    State(state): State<crate::AppState>,
    Extension(claims): Extension<Claims>,
    Path(file_id): Path<String>,
) -> Result<Json<DownloadUrlResponse>, AppError> {
    let url = state
        .file_service
        .download_url(&claims.sub, &file_id)
        .await?
        .ok_or_else(|| AppError::NotFound("File not found".to_string()))?;

    Ok(Json(DownloadUrlResponse {
        url,
        expires_in_secs: 60,
    }))
}
