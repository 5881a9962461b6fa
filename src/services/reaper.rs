use crate::entities::{prelude::*, upload_parts, upload_sessions};
use crate::services::storage::ObjectStorage;
use chrono::Utc;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QuerySelect};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{Duration, sleep};

/// Reconciles abandoned sessions with their object-store resources.
///
/// Lease expiry only makes a session unreachable; the object store still
/// holds its open multipart upload. Each sweep aborts those uploads and
/// drops the session rows.
pub struct SessionReaper {
    db: DatabaseConnection,
    storage: Arc<dyn ObjectStorage>,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl SessionReaper {
    pub fn new(
        db: DatabaseConnection,
        storage: Arc<dyn ObjectStorage>,
        interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            db,
            storage,
            interval,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        tracing::info!(interval_secs = self.interval.as_secs(), "session reaper started");

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    tracing::info!("session reaper shutting down");
                    break;
                }
                _ = sleep(self.interval) => {
                    if let Err(e) = self.sweep().await {
                        tracing::error!("reaper sweep failed: {e}");
                    }
                }
            }
        }
    }

    /// One pass over expired sessions. Returns how many were reclaimed.
    pub async fn sweep(&self) -> anyhow::Result<usize> {
        let expired = UploadSessions::find()
            .filter(upload_sessions::Column::ExpiresAt.lt(Utc::now()))
            .limit(100)
            .all(&self.db)
            .await?;

        let mut reaped = 0;
        for session in expired {
            // An upload already aborted or completed out-of-band makes this
            // call fail; the rows are stale either way, so they go too.
            if let Err(e) = self
                .storage
                .abort_multipart_upload(&session.object_key, &session.multipart_upload_id)
                .await
            {
                tracing::warn!(
                    session_id = %session.id,
                    "abort of expired multipart upload failed: {e}"
                );
            }

            UploadParts::delete_many()
                .filter(upload_parts::Column::SessionId.eq(&session.id))
                .exec(&self.db)
                .await?;
            UploadSessions::delete_by_id(&session.id).exec(&self.db).await?;

            tracing::info!(session_id = %session.id, "expired upload session reaped");
            reaped += 1;
        }

        Ok(reaped)
    }
}
