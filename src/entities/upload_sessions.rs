use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One in-flight chunked upload. The recorded parts live in
/// `upload_parts`, one row per chunk index, so concurrent acks for
/// different indices never rewrite shared state.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "upload_sessions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub user_id: String,
    pub file_name: String,
    pub content_type: Option<String>,
    #[sea_orm(unique)]
    pub object_key: String,
    pub multipart_upload_id: String,
    pub file_size: i64,
    pub total_chunks: i32,
    pub status: String,
    pub created_at: DateTimeUtc,
    pub expires_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::users::Entity",
        from = "Column::UserId",
        to = "super::users::Column::Id",
        on_update = "NoAction",
        on_delete = "Cascade"
    )]
    Users,
    #[sea_orm(has_many = "super::upload_parts::Entity")]
    UploadParts,
}

impl Related<super::users::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Users.def()
    }
}

impl Related<super::upload_parts::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::UploadParts.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
