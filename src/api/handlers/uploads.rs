use crate::api::error::AppError;
use crate::services::upload_service::{
    ChunkTargetResponse, CompleteUploadRequest, FileResponse, InitUploadRequest,
    InitUploadResponse, MarkChunkRequest, SessionStatusResponse,
};
use crate::utils::auth::Claims;
use axum::{
    Extension, Json,
    extract::{Path, State},
};

#[utoipa::path(
    post,
    path = "/files/upload/init",
    request_body = InitUploadRequest,
    responses(
        (status = 200, description = "Upload session initiated", body = InitUploadResponse),
        (status = 400, description = "Invalid declaration"),
        (status = 401, description = "Unauthorized")
    ),
    security(("jwt" = []))
)]
pub async fn init_upload_handler(
    State(state): State<crate::AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<InitUploadRequest>,
) -> Result<Json<InitUploadResponse>, AppError> {
    let res = state.upload_service.initiate(claims.sub, req).await?;
    Ok(Json(res))
}

#[utoipa::path(
    get,
    path = "/files/upload/{session_id}/target/{chunk_index}",
    params(
        ("session_id" = String, Path, description = "Upload session ID"),
        ("chunk_index" = i32, Path, description = "Chunk index (0-based)")
    ),
    responses(
        (status = 200, description = "Presigned write target for the chunk", body = ChunkTargetResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Session owned by another user"),
        (status = 404, description = "Session absent or expired")
    ),
    security(("jwt" = []))
)]
pub async fn chunk_target_handler(
    State(state): State<crate::AppState>,
    Extension(claims): Extension<Claims>,
    Path((session_id, chunk_index)): Path<(String, i32)>,
) -> Result<Json<ChunkTargetResponse>, AppError> {
    let res = state
        .upload_service
        .chunk_target(&claims.sub, &session_id, chunk_index)
        .await?;
    Ok(Json(res))
}

#[utoipa::path(
    post,
    path = "/files/upload/{session_id}/chunk/{chunk_index}",
    request_body = MarkChunkRequest,
    params(
        ("session_id" = String, Path, description = "Upload session ID"),
        ("chunk_index" = i32, Path, description = "Chunk index (0-based)")
    ),
    responses(
        (status = 204, description = "Chunk recorded"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Session absent or expired")
    ),
    security(("jwt" = []))
)]
pub async fn mark_chunk_handler(
    State(state): State<crate::AppState>,
    Extension(claims): Extension<Claims>,
    Path((session_id, chunk_index)): Path<(String, i32)>,
    Json(req): Json<MarkChunkRequest>,
) -> Result<axum::http::StatusCode, AppError> {
    state
        .upload_service
        .mark_chunk_uploaded(&claims.sub, &session_id, chunk_index, req)
        .await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/files/upload/{session_id}/complete",
    request_body = CompleteUploadRequest,
    params(
        ("session_id" = String, Path, description = "Upload session ID")
    ),
    responses(
        (status = 200, description = "Upload finalized", body = FileResponse),
        (status = 401, description = "Unauthorized"),
        (status = 409, description = "Chunks missing"),
        (status = 502, description = "Object store failed; retry the call")
    ),
    security(("jwt" = []))
)]
pub async fn complete_upload_handler(
    State(state): State<crate::AppState>,
    Extension(claims): Extension<Claims>,
    Path(session_id): Path<String>,
    Json(req): Json<CompleteUploadRequest>,
) -> Result<Json<FileResponse>, AppError> {
    let res = state
        .upload_service
        .complete(&claims.sub, &session_id, req)
        .await?;
    Ok(Json(res))
}

#[utoipa::path(
    delete,
    path = "/files/upload/{session_id}",
    params(
        ("session_id" = String, Path, description = "Upload session ID")
    ),
    responses(
        (status = 204, description = "Session cancelled (idempotent)"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Session owned by another user")
    ),
    security(("jwt" = []))
)]
pub async fn cancel_upload_handler(
    State(state): State<crate::AppState>,
    Extension(claims): Extension<Claims>,
    Path(session_id): Path<String>,
) -> Result<axum::http::StatusCode, AppError> {
    state.upload_service.cancel(&claims.sub, &session_id).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/files/upload/{session_id}",
    params(
        ("session_id" = String, Path, description = "Upload session ID")
    ),
    responses(
        (status = 200, description = "Recorded chunks and session state", body = SessionStatusResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Session absent or expired")
    ),
    security(("jwt" = []))
)]
pub async fn session_status_handler(
    State(state): State<crate::AppState>,
    Extension(claims): Extension<Claims>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionStatusResponse>, AppError> {
    let res = state
        .upload_service
        .session_status(&claims.sub, &session_id)
        .await?;
    Ok(Json(res))
}

#[utoipa::path(
    get,
    path = "/files/upload/sessions",
    responses(
        (status = 200, description = "Live upload sessions for this user", body = Vec<SessionStatusResponse>),
        (status = 401, description = "Unauthorized")
    ),
    security(("jwt" = []))
)]
pub async fn list_sessions_handler(
    State(state): State<crate::AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<SessionStatusResponse>>, AppError> {
    let res = state.upload_service.list_sessions(&claims.sub).await?;
    Ok(Json(res))
}
