use crate::config::UploadConfig;
use crate::entities::{prelude::*, upload_parts, upload_sessions};
use crate::services::file_service::{FileService, NewFileRecord};
use crate::services::storage::ObjectStorage;
use crate::utils::validation::sanitize_file_name;
use chrono::{DateTime, Utc};
use sea_orm::ActiveValue::Set;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

pub mod session_status {
    pub const INITIATED: &str = "initiated";
    pub const IN_PROGRESS: &str = "in_progress";
    pub const COMPLETED: &str = "completed";
    pub const CANCELLED: &str = "cancelled";
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Upload session not found")]
    SessionNotFound,

    #[error("Upload session belongs to another user")]
    Forbidden,

    #[error("Upload session is already finalized")]
    AlreadyFinalized,

    #[error("Chunk index {index} out of range for {total} chunks")]
    OutOfRange { index: i32, total: i32 },

    #[error("Incomplete upload: {uploaded} of {total} chunks recorded")]
    IncompleteUpload { uploaded: i32, total: i32 },

    #[error("{0}")]
    InvalidRequest(String),

    #[error("Object store unavailable: {0}")]
    StoreUnavailable(#[source] anyhow::Error),

    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct InitUploadRequest {
    #[validate(length(min = 1, max = 255))]
    pub file_name: String,
    #[validate(range(min = 0))]
    pub file_size: i64,
    #[validate(range(min = 1))]
    pub total_chunks: i32,
    pub content_type: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct InitUploadResponse {
    pub session_id: String,
    pub object_key: String,
    /// Chunk size the client should slice at; informational
    pub chunk_size: i64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ChunkTargetResponse {
    /// Presigned PUT URL bound to one part of this session's object
    pub url: String,
    pub part_number: i32,
    pub expires_in_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct MarkChunkRequest {
    /// ETag returned by the object store for the part write
    #[validate(length(min = 1))]
    pub etag: String,
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct CompleteUploadRequest {
    /// Display name for the finalized file; may differ from the initiated one
    #[validate(length(min = 1, max = 255))]
    pub file_name: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct FileResponse {
    pub id: String,
    pub name: String,
    pub size: i64,
    pub key: String,
    pub url: String,
    pub content_type: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<crate::entities::user_files::Model> for FileResponse {
    fn from(file: crate::entities::user_files::Model) -> Self {
        Self {
            id: file.id,
            name: file.name,
            size: file.size,
            key: file.key,
            url: file.url,
            content_type: file.content_type,
            created_at: file.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SessionStatusResponse {
    pub session_id: String,
    pub file_name: String,
    pub file_size: i64,
    pub total_chunks: i32,
    pub uploaded_chunks: i32,
    /// Chunk indices with a recorded part, ascending
    pub uploaded_indices: Vec<i32>,
    pub status: String,
    pub expires_at: DateTime<Utc>,
}

/// Server side of the resumable chunked upload protocol.
///
/// Stateless per request: every operation round-trips through the
/// session tables, so any coordinator instance can serve any call.
pub struct UploadService {
    db: DatabaseConnection,
    storage: Arc<dyn ObjectStorage>,
    file_service: Arc<FileService>,
    config: UploadConfig,
}

impl UploadService {
    pub fn new(
        db: DatabaseConnection,
        storage: Arc<dyn ObjectStorage>,
        file_service: Arc<FileService>,
        config: UploadConfig,
    ) -> Self {
        Self {
            db,
            storage,
            file_service,
            config,
        }
    }

    /// Open a multipart upload and persist the session with a fresh lease.
    pub async fn initiate(
        &self,
        owner: String,
        req: InitUploadRequest,
    ) -> Result<InitUploadResponse, UploadError> {
        req.validate()
            .map_err(|e| UploadError::InvalidRequest(e.to_string()))?;

        if req.file_size > self.config.max_file_size {
            return Err(UploadError::InvalidRequest(format!(
                "File too large. Max: {} bytes",
                self.config.max_file_size
            )));
        }

        let object_key = format!(
            "{}/{}-{}",
            owner,
            Utc::now().timestamp_millis(),
            sanitize_file_name(&req.file_name)
        );

        let multipart_upload_id = self
            .storage
            .create_multipart_upload(&object_key, req.content_type.as_deref())
            .await
            .map_err(UploadError::StoreUnavailable)?;

        let now = Utc::now();
        let session = upload_sessions::ActiveModel {
            id: Set(Uuid::new_v4().to_string()),
            user_id: Set(owner),
            file_name: Set(req.file_name),
            content_type: Set(req.content_type),
            object_key: Set(object_key.clone()),
            multipart_upload_id: Set(multipart_upload_id),
            file_size: Set(req.file_size),
            total_chunks: Set(req.total_chunks),
            status: Set(session_status::INITIATED.to_string()),
            created_at: Set(now),
            expires_at: Set(now + chrono::Duration::seconds(self.config.session_ttl_secs)),
        };

        let saved = session.insert(&self.db).await?;
        tracing::info!(
            session_id = %saved.id,
            object_key = %object_key,
            total_chunks = saved.total_chunks,
            "upload session initiated"
        );

        Ok(InitUploadResponse {
            session_id: saved.id,
            object_key,
            chunk_size: self.config.chunk_size,
        })
    }

    /// Issue a presigned write target for one chunk index.
    pub async fn chunk_target(
        &self,
        owner: &str,
        session_id: &str,
        chunk_index: i32,
    ) -> Result<ChunkTargetResponse, UploadError> {
        let session = self.load_active_session(session_id, owner).await?;
        let part_number = part_number_for(&session, chunk_index)?;

        let url = self
            .storage
            .presign_upload_part(
                &session.object_key,
                &session.multipart_upload_id,
                part_number,
                Duration::from_secs(self.config.target_expiry_secs),
            )
            .await
            .map_err(UploadError::StoreUnavailable)?;

        Ok(ChunkTargetResponse {
            url,
            part_number,
            expires_in_secs: self.config.target_expiry_secs,
        })
    }

    /// Record a chunk's proof-of-write. Idempotent: re-acking the same
    /// index upserts its row, so the most recent ETag wins and acks for
    /// other indices are never clobbered.
    pub async fn mark_chunk_uploaded(
        &self,
        owner: &str,
        session_id: &str,
        chunk_index: i32,
        req: MarkChunkRequest,
    ) -> Result<(), UploadError> {
        req.validate()
            .map_err(|e| UploadError::InvalidRequest(e.to_string()))?;

        let session = self.load_active_session(session_id, owner).await?;
        let part_number = part_number_for(&session, chunk_index)?;

        let part = upload_parts::ActiveModel {
            session_id: Set(session.id.clone()),
            chunk_index: Set(chunk_index),
            part_number: Set(part_number),
            etag: Set(req.etag),
        };

        UploadParts::insert(part)
            .on_conflict(
                OnConflict::columns([
                    upload_parts::Column::SessionId,
                    upload_parts::Column::ChunkIndex,
                ])
                .update_columns([upload_parts::Column::Etag, upload_parts::Column::PartNumber])
                .to_owned(),
            )
            .exec(&self.db)
            .await?;

        // Filtered update so only the fresh state flips; no read-modify-write.
        UploadSessions::update_many()
            .col_expr(
                upload_sessions::Column::Status,
                Expr::value(session_status::IN_PROGRESS),
            )
            .filter(upload_sessions::Column::Id.eq(session_id))
            .filter(upload_sessions::Column::Status.eq(session_status::INITIATED))
            .exec(&self.db)
            .await?;

        Ok(())
    }

    /// Assemble all recorded parts into the final object and publish the
    /// file record. Rejects on any gap; a failed store call leaves the
    /// session in place so the same call can be retried.
    pub async fn complete(
        &self,
        owner: &str,
        session_id: &str,
        req: CompleteUploadRequest,
    ) -> Result<FileResponse, UploadError> {
        req.validate()
            .map_err(|e| UploadError::InvalidRequest(e.to_string()))?;

        let session = self.load_active_session(session_id, owner).await?;

        let parts = UploadParts::find()
            .filter(upload_parts::Column::SessionId.eq(session_id))
            .order_by_asc(upload_parts::Column::PartNumber)
            .all(&self.db)
            .await?;

        // The range check on ack caps parts at total_chunks, so a plain
        // count comparison detects gaps.
        if (parts.len() as i32) < session.total_chunks {
            return Err(UploadError::IncompleteUpload {
                uploaded: parts.len() as i32,
                total: session.total_chunks,
            });
        }

        let part_list: Vec<(i32, String)> = parts
            .iter()
            .map(|p| (p.part_number, p.etag.clone()))
            .collect();

        let url = self
            .storage
            .complete_multipart_upload(&session.object_key, &session.multipart_upload_id, &part_list)
            .await
            .map_err(UploadError::StoreUnavailable)?;

        // Claim the finalize. Two racing complete calls both get past the
        // load and the store call; only the one that flips the row may
        // publish. Flipping after the store call keeps a store failure
        // retryable.
        let claimed = UploadSessions::update_many()
            .col_expr(
                upload_sessions::Column::Status,
                Expr::value(session_status::COMPLETED),
            )
            .filter(upload_sessions::Column::Id.eq(session_id))
            .filter(upload_sessions::Column::Status.is_in([
                session_status::INITIATED,
                session_status::IN_PROGRESS,
            ]))
            .exec(&self.db)
            .await?;
        if claimed.rows_affected == 0 {
            return Err(UploadError::AlreadyFinalized);
        }

        let record = self
            .file_service
            .create_file_record(
                &session.user_id,
                NewFileRecord {
                    name: req.file_name,
                    size: session.file_size,
                    key: session.object_key.clone(),
                    url,
                    content_type: session.content_type.clone(),
                },
            )
            .await?;

        UploadParts::delete_many()
            .filter(upload_parts::Column::SessionId.eq(session_id))
            .exec(&self.db)
            .await?;
        UploadSessions::delete_by_id(&session.id).exec(&self.db).await?;

        tracing::info!(
            session_id = %session.id,
            file_id = %record.id,
            parts = part_list.len(),
            "upload finalized"
        );

        Ok(FileResponse::from(record))
    }

    /// Abort the session and free its object-store resources.
    /// Cancelling an unknown session is a no-op success.
    pub async fn cancel(&self, owner: &str, session_id: &str) -> Result<(), UploadError> {
        let session = match UploadSessions::find_by_id(session_id).one(&self.db).await? {
            Some(s) => s,
            None => return Ok(()),
        };

        if session.expires_at < Utc::now() {
            // Lease already gone; the reaper owns the store-side cleanup.
            return Ok(());
        }

        if session.user_id != owner {
            return Err(UploadError::Forbidden);
        }

        self.storage
            .abort_multipart_upload(&session.object_key, &session.multipart_upload_id)
            .await
            .map_err(UploadError::StoreUnavailable)?;

        UploadParts::delete_many()
            .filter(upload_parts::Column::SessionId.eq(session_id))
            .exec(&self.db)
            .await?;
        UploadSessions::delete_by_id(&session.id).exec(&self.db).await?;

        tracing::info!(session_id = %session.id, "upload session cancelled");
        Ok(())
    }

    /// Which chunks have already landed; this is what lets a restarted
    /// client resume instead of re-sending everything.
    pub async fn session_status(
        &self,
        owner: &str,
        session_id: &str,
    ) -> Result<SessionStatusResponse, UploadError> {
        let session = self.load_active_session(session_id, owner).await?;
        self.status_of(session).await
    }

    /// All live sessions for this owner.
    pub async fn list_sessions(
        &self,
        owner: &str,
    ) -> Result<Vec<SessionStatusResponse>, UploadError> {
        let sessions = UploadSessions::find()
            .filter(upload_sessions::Column::UserId.eq(owner))
            .filter(upload_sessions::Column::ExpiresAt.gt(Utc::now()))
            .order_by_asc(upload_sessions::Column::CreatedAt)
            .all(&self.db)
            .await?;

        let mut result = Vec::with_capacity(sessions.len());
        for session in sessions {
            result.push(self.status_of(session).await?);
        }
        Ok(result)
    }

    async fn status_of(
        &self,
        session: upload_sessions::Model,
    ) -> Result<SessionStatusResponse, UploadError> {
        let parts = UploadParts::find()
            .filter(upload_parts::Column::SessionId.eq(&session.id))
            .order_by_asc(upload_parts::Column::ChunkIndex)
            .all(&self.db)
            .await?;

        let uploaded_indices: Vec<i32> = parts.iter().map(|p| p.chunk_index).collect();

        Ok(SessionStatusResponse {
            session_id: session.id,
            file_name: session.file_name,
            file_size: session.file_size,
            total_chunks: session.total_chunks,
            uploaded_chunks: uploaded_indices.len() as i32,
            uploaded_indices,
            status: session.status,
            expires_at: session.expires_at,
        })
    }

    /// Validation ladder shared by the per-session operations: absent and
    /// lease-expired sessions read as not found, terminal rows as already
    /// finalized, and the owner must match.
    async fn load_active_session(
        &self,
        session_id: &str,
        owner: &str,
    ) -> Result<upload_sessions::Model, UploadError> {
        let session = UploadSessions::find_by_id(session_id)
            .one(&self.db)
            .await?
            .ok_or(UploadError::SessionNotFound)?;

        if session.expires_at < Utc::now() {
            return Err(UploadError::SessionNotFound);
        }

        if session.user_id != owner {
            return Err(UploadError::Forbidden);
        }

        if session.status == session_status::COMPLETED
            || session.status == session_status::CANCELLED
        {
            return Err(UploadError::AlreadyFinalized);
        }

        Ok(session)
    }
}

fn part_number_for(
    session: &upload_sessions::Model,
    chunk_index: i32,
) -> Result<i32, UploadError> {
    if chunk_index < 0 || chunk_index >= session.total_chunks {
        return Err(UploadError::OutOfRange {
            index: chunk_index,
            total: session.total_chunks,
        });
    }
    // Object-store part numbering is 1-based.
    Ok(chunk_index + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_with_chunks(total_chunks: i32) -> upload_sessions::Model {
        let now = Utc::now();
        upload_sessions::Model {
            id: "s1".into(),
            user_id: "u1".into(),
            file_name: "f.bin".into(),
            content_type: None,
            object_key: "u1/0-f.bin".into(),
            multipart_upload_id: "m1".into(),
            file_size: 0,
            total_chunks,
            status: session_status::INITIATED.into(),
            created_at: now,
            expires_at: now + chrono::Duration::hours(1),
        }
    }

    #[test]
    fn test_part_numbers_are_one_based() {
        let session = session_with_chunks(3);
        assert_eq!(part_number_for(&session, 0).unwrap(), 1);
        assert_eq!(part_number_for(&session, 2).unwrap(), 3);
    }

    #[test]
    fn test_out_of_range_indices_rejected() {
        let session = session_with_chunks(3);
        assert!(matches!(
            part_number_for(&session, 3),
            Err(UploadError::OutOfRange { index: 3, total: 3 })
        ));
        assert!(matches!(
            part_number_for(&session, -1),
            Err(UploadError::OutOfRange { .. })
        ));
    }
}
