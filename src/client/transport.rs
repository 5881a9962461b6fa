use crate::services::upload_service::{
    ChunkTargetResponse, CompleteUploadRequest, FileResponse, InitUploadRequest,
    InitUploadResponse, MarkChunkRequest, SessionStatusResponse,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;

/// Everything the driver needs from the network: the coordinator's five
/// operations, the status query, and the direct part write against the
/// issued target.
#[async_trait]
pub trait UploadTransport: Send + Sync {
    async fn initiate(&self, req: InitUploadRequest) -> Result<InitUploadResponse>;

    async fn chunk_target(&self, session_id: &str, chunk_index: u32)
    -> Result<ChunkTargetResponse>;

    /// PUT the chunk bytes to a presigned target. Returns the ETag the
    /// store answered with; that is the proof token for the ack.
    async fn put_part(&self, target_url: &str, body: Bytes) -> Result<String>;

    async fn mark_uploaded(&self, session_id: &str, chunk_index: u32, etag: String) -> Result<()>;

    async fn complete(&self, session_id: &str, file_name: &str) -> Result<FileResponse>;

    async fn cancel(&self, session_id: &str) -> Result<()>;

    async fn session_status(&self, session_id: &str) -> Result<SessionStatusResponse>;
}

/// HTTP transport against a running coordinator.
pub struct HttpUploadTransport {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpUploadTransport {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http: reqwest::Client::new(),
            base_url,
            token: token.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl UploadTransport for HttpUploadTransport {
    async fn initiate(&self, req: InitUploadRequest) -> Result<InitUploadResponse> {
        let res = self
            .http
            .post(self.url("/files/upload/init"))
            .bearer_auth(&self.token)
            .json(&req)
            .send()
            .await?
            .error_for_status()
            .context("initiate upload")?;
        Ok(res.json().await?)
    }

    async fn chunk_target(
        &self,
        session_id: &str,
        chunk_index: u32,
    ) -> Result<ChunkTargetResponse> {
        let res = self
            .http
            .get(self.url(&format!(
                "/files/upload/{session_id}/target/{chunk_index}"
            )))
            .bearer_auth(&self.token)
            .send()
            .await?
            .error_for_status()
            .context("request chunk target")?;
        Ok(res.json().await?)
    }

    async fn put_part(&self, target_url: &str, body: Bytes) -> Result<String> {
        let res = self
            .http
            .put(target_url)
            .body(body)
            .send()
            .await?
            .error_for_status()
            .context("write part to object store")?;

        // The store quotes its ETags; the coordinator wants the bare token.
        res.headers()
            .get("ETag")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim_matches('"').to_string())
            .ok_or_else(|| anyhow::anyhow!("no ETag in part write response"))
    }

    async fn mark_uploaded(&self, session_id: &str, chunk_index: u32, etag: String) -> Result<()> {
        self.http
            .post(self.url(&format!("/files/upload/{session_id}/chunk/{chunk_index}")))
            .bearer_auth(&self.token)
            .json(&MarkChunkRequest { etag })
            .send()
            .await?
            .error_for_status()
            .context("acknowledge chunk")?;
        Ok(())
    }

    async fn complete(&self, session_id: &str, file_name: &str) -> Result<FileResponse> {
        let res = self
            .http
            .post(self.url(&format!("/files/upload/{session_id}/complete")))
            .bearer_auth(&self.token)
            .json(&CompleteUploadRequest {
                file_name: file_name.to_string(),
            })
            .send()
            .await?
            .error_for_status()
            .context("complete upload")?;
        Ok(res.json().await?)
    }

    async fn cancel(&self, session_id: &str) -> Result<()> {
        self.http
            .delete(self.url(&format!("/files/upload/{session_id}")))
            .bearer_auth(&self.token)
            .send()
            .await?
            .error_for_status()
            .context("cancel upload")?;
        Ok(())
    }

    async fn session_status(&self, session_id: &str) -> Result<SessionStatusResponse> {
        let res = self
            .http
            .get(self.url(&format!("/files/upload/{session_id}")))
            .bearer_auth(&self.token)
            .send()
            .await?
            .error_for_status()
            .context("query session status")?;
        Ok(res.json().await?)
    }
}
