use anyhow::Result;
use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{Duration as ChronoDuration, Utc};
use filedrive_backend::config::UploadConfig;
use filedrive_backend::entities::{prelude::*, upload_sessions, users};
use filedrive_backend::infrastructure::database::run_migrations;
use filedrive_backend::services::file_service::FileService;
use filedrive_backend::services::reaper::SessionReaper;
use filedrive_backend::services::storage::ObjectStorage;
use filedrive_backend::services::upload_service::UploadService;
use filedrive_backend::utils::auth::create_jwt;
use filedrive_backend::{AppState, create_app};
use http_body_util::BodyExt;
use sea_orm::ActiveValue::Set;
use sea_orm::{ActiveModelTrait, ColumnTrait, Database, DatabaseConnection, EntityTrait, QueryFilter};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

#[derive(Clone, Debug)]
struct FinalizedObject {
    key: String,
    parts: Vec<(i32, String)>,
}

/// In-memory stand-in for the object store: tracks open multipart
/// uploads, what got assembled, and what got aborted.
#[derive(Default)]
struct MockObjectStorage {
    open_uploads: Mutex<HashMap<String, String>>, // upload_id -> key
    finalized: Mutex<Vec<FinalizedObject>>,
    aborted: Mutex<Vec<String>>,
    fail_complete: AtomicBool,
    complete_delay_ms: AtomicU64,
}

impl MockObjectStorage {
    fn finalized(&self) -> Vec<FinalizedObject> {
        self.finalized.lock().unwrap().clone()
    }

    fn aborted(&self) -> Vec<String> {
        self.aborted.lock().unwrap().clone()
    }

    fn open_count(&self) -> usize {
        self.open_uploads.lock().unwrap().len()
    }
}

#[async_trait]
impl ObjectStorage for MockObjectStorage {
    async fn create_multipart_upload(
        &self,
        key: &str,
        _content_type: Option<&str>,
    ) -> Result<String> {
        let upload_id = format!("mpu-{}", uuid::Uuid::new_v4());
        self.open_uploads
            .lock()
            .unwrap()
            .insert(upload_id.clone(), key.to_string());
        Ok(upload_id)
    }

    async fn presign_upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        _expires_in: Duration,
    ) -> Result<String> {
        Ok(format!(
            "https://store.test/{key}?uploadId={upload_id}&partNumber={part_number}"
        ))
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[(i32, String)],
    ) -> Result<String> {
        let delay = self.complete_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail_complete.load(Ordering::SeqCst) {
            anyhow::bail!("store offline");
        }
        self.open_uploads.lock().unwrap().remove(upload_id);
        self.finalized.lock().unwrap().push(FinalizedObject {
            key: key.to_string(),
            parts: parts.to_vec(),
        });
        Ok(format!("https://store.test/{key}"))
    }

    async fn abort_multipart_upload(&self, _key: &str, upload_id: &str) -> Result<()> {
        self.open_uploads.lock().unwrap().remove(upload_id);
        self.aborted.lock().unwrap().push(upload_id.to_string());
        Ok(())
    }

    async fn presign_download(
        &self,
        key: &str,
        _file_name: &str,
        _expires_in: Duration,
    ) -> Result<String> {
        Ok(format!("https://store.test/{key}?signed=1"))
    }

}

struct Harness {
    app: Router,
    db: DatabaseConnection,
    storage: Arc<MockObjectStorage>,
    token: String,
}

async fn setup() -> Harness {
    // One pooled connection so concurrent requests share the in-memory db
    let mut opt = sea_orm::ConnectOptions::new("sqlite::memory:");
    opt.max_connections(1);
    let db = Database::connect(opt).await.unwrap();
    run_migrations(&db).await.unwrap();

    users::ActiveModel {
        id: Set("user-1".to_string()),
        username: Set("alice".to_string()),
        email: Set(None),
        created_at: Set(Some(Utc::now())),
    }
    .insert(&db)
    .await
    .unwrap();

    let storage = Arc::new(MockObjectStorage::default());
    let config = UploadConfig::development();

    let file_service = Arc::new(FileService::new(db.clone(), storage.clone()));
    let upload_service = Arc::new(UploadService::new(
        db.clone(),
        storage.clone(),
        file_service.clone(),
        config.clone(),
    ));

    let token = create_jwt("user-1", &config.jwt_secret).unwrap();

    let state = AppState {
        db: db.clone(),
        storage: storage.clone(),
        upload_service,
        file_service,
        config,
    };

    Harness {
        app: create_app(state),
        db,
        storage,
        token,
    }
}

impl Harness {
    async fn request(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }
        let request = match body {
            Some(json) => builder
                .header("Content-Type", "application/json")
                .body(Body::from(serde_json::to_vec(&json).unwrap()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn init_session(&self, total_chunks: i32, file_size: i64) -> String {
        let (status, body) = self
            .request(
                "POST",
                "/files/upload/init",
                Some(&self.token),
                Some(json!({
                    "file_name": "video.mp4",
                    "file_size": file_size,
                    "total_chunks": total_chunks,
                    "content_type": "video/mp4"
                })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        body["session_id"].as_str().unwrap().to_string()
    }

    async fn mark_chunk(&self, session_id: &str, index: i32, etag: &str) -> StatusCode {
        let (status, _) = self
            .request(
                "POST",
                &format!("/files/upload/{session_id}/chunk/{index}"),
                Some(&self.token),
                Some(json!({ "etag": etag })),
            )
            .await;
        status
    }

    async fn complete(&self, session_id: &str, file_name: &str) -> (StatusCode, Value) {
        self.request(
            "POST",
            &format!("/files/upload/{session_id}/complete"),
            Some(&self.token),
            Some(json!({ "file_name": file_name })),
        )
        .await
    }

    async fn backdate_session(&self, session_id: &str) {
        let session = UploadSessions::find_by_id(session_id)
            .one(&self.db)
            .await
            .unwrap()
            .unwrap();
        let mut active: upload_sessions::ActiveModel = session.into();
        active.expires_at = Set(Utc::now() - ChronoDuration::minutes(5));
        active.update(&self.db).await.unwrap();
    }
}

#[tokio::test]
async fn test_out_of_order_acks_assemble_in_part_order() {
    let h = setup().await;

    // 12 MiB at 5 MiB chunks: parts 1..=3
    let session_id = h.init_session(3, 12 * 1024 * 1024).await;

    for index in [2, 0, 1] {
        let status = h.mark_chunk(&session_id, index, &format!("etag-{index}")).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    let (status, body) = h.complete(&session_id, "video.mp4").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "video.mp4");
    assert_eq!(body["size"], 12 * 1024 * 1024);

    let finalized = h.storage.finalized();
    assert_eq!(finalized.len(), 1);
    assert_eq!(
        finalized[0].parts,
        vec![
            (1, "etag-0".to_string()),
            (2, "etag-1".to_string()),
            (3, "etag-2".to_string()),
        ]
    );

    // Session is consumed; the file record is visible.
    let (status, _) = h
        .request(
            "GET",
            &format!("/files/upload/{session_id}"),
            Some(&h.token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, files) = h.request("GET", "/files", Some(&h.token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(files.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_chunk_targets_are_part_scoped() {
    let h = setup().await;
    let session_id = h.init_session(3, 100).await;

    let (status, body) = h
        .request(
            "GET",
            &format!("/files/upload/{session_id}/target/2"),
            Some(&h.token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["part_number"], 3);
    assert!(body["url"].as_str().unwrap().contains("partNumber=3"));

    // Out of declared range
    let (status, _) = h
        .request(
            "GET",
            &format!("/files/upload/{session_id}/target/3"),
            Some(&h.token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_reacking_a_chunk_keeps_last_etag() {
    let h = setup().await;
    let session_id = h.init_session(1, 10).await;

    assert_eq!(h.mark_chunk(&session_id, 0, "first").await, StatusCode::NO_CONTENT);
    assert_eq!(h.mark_chunk(&session_id, 0, "second").await, StatusCode::NO_CONTENT);

    let (status, body) = h
        .request(
            "GET",
            &format!("/files/upload/{session_id}"),
            Some(&h.token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["uploaded_chunks"], 1);
    assert_eq!(body["status"], "in_progress");

    let (status, _) = h.complete(&session_id, "tiny.bin").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        h.storage.finalized()[0].parts,
        vec![(1, "second".to_string())]
    );
}

#[tokio::test]
async fn test_complete_with_gaps_is_rejected_not_truncated() {
    let h = setup().await;
    let session_id = h.init_session(3, 100).await;

    h.mark_chunk(&session_id, 0, "etag-0").await;
    h.mark_chunk(&session_id, 2, "etag-2").await;

    let (status, body) = h.complete(&session_id, "holes.bin").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("2 of 3"));
    assert!(h.storage.finalized().is_empty());

    // Not terminal: filling the gap makes the same call succeed.
    h.mark_chunk(&session_id, 1, "etag-1").await;
    let (status, _) = h.complete(&session_id, "holes.bin").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_cancel_is_idempotent_and_frees_the_upload() {
    let h = setup().await;
    let session_id = h.init_session(2, 100).await;
    h.mark_chunk(&session_id, 0, "etag-0").await;

    let (status, _) = h
        .request(
            "DELETE",
            &format!("/files/upload/{session_id}"),
            Some(&h.token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(h.storage.aborted().len(), 1);
    assert_eq!(h.storage.open_count(), 0);

    // Gone for chunk ops and completion alike.
    assert_eq!(
        h.mark_chunk(&session_id, 1, "etag-1").await,
        StatusCode::NOT_FOUND
    );
    let (status, _) = h.complete(&session_id, "x.bin").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Cancelling an unknown session is still a success.
    let (status, _) = h
        .request(
            "DELETE",
            &format!("/files/upload/{session_id}"),
            Some(&h.token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_foreign_principal_is_forbidden_everywhere() {
    let h = setup().await;
    let session_id = h.init_session(2, 100).await;

    users::ActiveModel {
        id: Set("user-2".to_string()),
        username: Set("mallory".to_string()),
        email: Set(None),
        created_at: Set(Some(Utc::now())),
    }
    .insert(&h.db)
    .await
    .unwrap();
    let other = create_jwt("user-2", &UploadConfig::development().jwt_secret).unwrap();

    let cases = [
        ("GET", format!("/files/upload/{session_id}")),
        ("GET", format!("/files/upload/{session_id}/target/0")),
        ("DELETE", format!("/files/upload/{session_id}")),
    ];
    for (method, uri) in cases {
        let (status, _) = h.request(method, &uri, Some(&other), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{method} {uri}");
    }

    let (status, _) = h
        .request(
            "POST",
            &format!("/files/upload/{session_id}/chunk/0"),
            Some(&other),
            Some(json!({ "etag": "x" })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = h
        .request(
            "POST",
            &format!("/files/upload/{session_id}/complete"),
            Some(&other),
            Some(json!({ "file_name": "x" })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_expired_lease_reads_as_not_found() {
    let h = setup().await;
    let session_id = h.init_session(2, 100).await;
    h.mark_chunk(&session_id, 0, "etag-0").await;
    h.backdate_session(&session_id).await;

    let (status, _) = h
        .request(
            "GET",
            &format!("/files/upload/{session_id}"),
            Some(&h.token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(
        h.mark_chunk(&session_id, 1, "etag-1").await,
        StatusCode::NOT_FOUND
    );
    let (status, _) = h.complete(&session_id, "x.bin").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // And it no longer shows up in the live session listing.
    let (status, sessions) = h
        .request("GET", "/files/upload/sessions", Some(&h.token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(sessions.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_requests_without_principal_are_unauthorized() {
    let h = setup().await;

    let (status, _) = h
        .request(
            "POST",
            "/files/upload/init",
            None,
            Some(json!({
                "file_name": "x.bin",
                "file_size": 1,
                "total_chunks": 1
            })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = h.request("GET", "/files", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_query_string_tokens_rejected() {
    let h = setup().await;

    // Only the Authorization header carries the principal.
    let (status, _) = h
        .request("GET", &format!("/files?token={}", h.token), None, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = h
        .request(
            "GET",
            &format!("/files/upload/sessions?token={}", h.token),
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_token_for_unknown_user_rejected() {
    let h = setup().await;

    // Signature verifies, but no such user row exists.
    let ghost = create_jwt("user-gone", &UploadConfig::development().jwt_secret).unwrap();
    let (status, _) = h.request("GET", "/files", Some(&ghost), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_invalid_declarations_rejected() {
    let h = setup().await;

    for body in [
        json!({ "file_name": "x", "file_size": 10, "total_chunks": 0 }),
        json!({ "file_name": "x", "file_size": -1, "total_chunks": 1 }),
        json!({ "file_name": "", "file_size": 10, "total_chunks": 1 }),
    ] {
        let (status, _) = h
            .request("POST", "/files/upload/init", Some(&h.token), Some(body))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}

#[tokio::test]
async fn test_store_failure_leaves_completion_retryable() {
    let h = setup().await;
    let session_id = h.init_session(1, 10).await;
    h.mark_chunk(&session_id, 0, "etag-0").await;

    h.storage.fail_complete.store(true, Ordering::SeqCst);
    let (status, _) = h.complete(&session_id, "x.bin").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);

    // No local mutation happened; the session is intact and retryable.
    let (status, body) = h
        .request(
            "GET",
            &format!("/files/upload/{session_id}"),
            Some(&h.token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["uploaded_chunks"], 1);

    h.storage.fail_complete.store(false, Ordering::SeqCst);
    let (status, _) = h.complete(&session_id, "x.bin").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_racing_completions_publish_exactly_once() {
    let h = setup().await;
    let session_id = h.init_session(1, 10).await;
    h.mark_chunk(&session_id, 0, "etag-0").await;

    // Hold both calls inside the store so each passes the session load
    // before either claims the finalize.
    h.storage.complete_delay_ms.store(100, Ordering::SeqCst);
    let (first, second) = tokio::join!(
        h.complete(&session_id, "x.bin"),
        h.complete(&session_id, "x.bin")
    );

    let mut statuses = [first.0, second.0];
    statuses.sort();
    assert_eq!(statuses, [StatusCode::OK, StatusCode::CONFLICT]);

    let (status, files) = h.request("GET", "/files", Some(&h.token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(files.as_array().unwrap().len(), 1, "one file record published");
}

#[tokio::test]
async fn test_session_status_reports_recorded_indices() {
    let h = setup().await;
    let session_id = h.init_session(4, 100).await;
    h.mark_chunk(&session_id, 3, "etag-3").await;
    h.mark_chunk(&session_id, 1, "etag-1").await;

    let (status, body) = h
        .request(
            "GET",
            &format!("/files/upload/{session_id}"),
            Some(&h.token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_chunks"], 4);
    assert_eq!(body["uploaded_chunks"], 2);
    assert_eq!(body["uploaded_indices"], json!([1, 3]));
}

#[tokio::test]
async fn test_reaper_reclaims_expired_sessions() {
    let h = setup().await;
    let expired = h.init_session(2, 100).await;
    let live = h.init_session(2, 100).await;
    h.backdate_session(&expired).await;

    let (_tx, rx) = tokio::sync::watch::channel(false);
    let reaper = SessionReaper::new(
        h.db.clone(),
        h.storage.clone(),
        Duration::from_secs(3600),
        rx,
    );

    let reaped = reaper.sweep().await.unwrap();
    assert_eq!(reaped, 1);
    assert_eq!(h.storage.aborted().len(), 1);
    assert_eq!(h.storage.open_count(), 1);

    assert!(
        UploadSessions::find_by_id(&expired)
            .one(&h.db)
            .await
            .unwrap()
            .is_none()
    );
    assert!(
        UploadSessions::find_by_id(&live)
            .one(&h.db)
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn test_download_url_for_finalized_file() {
    let h = setup().await;
    let session_id = h.init_session(1, 10).await;
    h.mark_chunk(&session_id, 0, "etag-0").await;
    let (_, file) = h.complete(&session_id, "doc.pdf").await;
    let file_id = file["id"].as_str().unwrap();

    let (status, body) = h
        .request(
            "GET",
            &format!("/files/{file_id}/download"),
            Some(&h.token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["url"].as_str().unwrap().contains("signed=1"));

    let (status, _) = h
        .request("GET", "/files/nonexistent/download", Some(&h.token), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_object_keys_are_owner_scoped_and_stable() {
    let h = setup().await;
    let (status, body) = h
        .request(
            "POST",
            "/files/upload/init",
            Some(&h.token),
            Some(json!({
                "file_name": "weird/../name.bin",
                "file_size": 10,
                "total_chunks": 1
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let key = body["object_key"].as_str().unwrap();
    assert!(key.starts_with("user-1/"));
    // Exactly the owner separator; the sanitized name adds no more.
    assert_eq!(key.matches('/').count(), 1);

    let session = UploadSessions::find()
        .filter(upload_sessions::Column::ObjectKey.eq(key))
        .one(&h.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.status, "initiated");
}
