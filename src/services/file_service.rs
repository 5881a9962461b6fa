use crate::entities::{prelude::*, user_files};
use crate::services::storage::ObjectStorage;
use anyhow::Result;
use chrono::Utc;
use sea_orm::ActiveValue::Set;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Attributes of a freshly assembled object, ready to publish.
pub struct NewFileRecord {
    pub name: String,
    pub size: i64,
    pub key: String,
    pub url: String,
    pub content_type: Option<String>,
}

/// Metadata collaborator: owns the `user_files` table. The upload
/// finalizer publishes records through it; listing and downloads read
/// from it.
pub struct FileService {
    db: DatabaseConnection,
    storage: Arc<dyn ObjectStorage>,
}

impl FileService {
    pub fn new(db: DatabaseConnection, storage: Arc<dyn ObjectStorage>) -> Self {
        Self { db, storage }
    }

    /// Insert the file row for its owner. The `user_id` column is the
    /// owner link, so one insert covers record creation and linking.
    pub async fn create_file_record(
        &self,
        owner: &str,
        attrs: NewFileRecord,
    ) -> Result<user_files::Model, sea_orm::DbErr> {
        let file = user_files::ActiveModel {
            id: Set(Uuid::new_v4().to_string()),
            user_id: Set(owner.to_string()),
            name: Set(attrs.name),
            size: Set(attrs.size),
            key: Set(attrs.key),
            url: Set(attrs.url),
            content_type: Set(attrs.content_type),
            starred: Set(false),
            is_deleted: Set(false),
            created_at: Set(Utc::now()),
        };

        file.insert(&self.db).await
    }

    pub async fn list_files(&self, owner: &str) -> Result<Vec<user_files::Model>, sea_orm::DbErr> {
        UserFiles::find()
            .filter(user_files::Column::UserId.eq(owner))
            .filter(user_files::Column::IsDeleted.eq(false))
            .order_by_desc(user_files::Column::CreatedAt)
            .all(&self.db)
            .await
    }

    /// Short-lived presigned GET for one of the owner's files.
    /// Returns `None` when the file is absent, trashed, or foreign.
    pub async fn download_url(&self, owner: &str, file_id: &str) -> Result<Option<String>> {
        let file = UserFiles::find_by_id(file_id)
            .filter(user_files::Column::UserId.eq(owner))
            .filter(user_files::Column::IsDeleted.eq(false))
            .one(&self.db)
            .await?;

        let Some(file) = file else {
            return Ok(None);
        };

        let url = self
            .storage
            .presign_download(&file.key, &file.name, Duration::from_secs(60))
            .await?;

        Ok(Some(url))
    }
}
