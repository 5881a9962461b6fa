use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Proof-of-write for one chunk. Keyed by (session, chunk index);
/// re-acknowledging a chunk upserts this row, last write wins.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "upload_parts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub session_id: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub chunk_index: i32,
    pub part_number: i32,
    pub etag: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::upload_sessions::Entity",
        from = "Column::SessionId",
        to = "super::upload_sessions::Column::Id",
        on_update = "NoAction",
        on_delete = "Cascade"
    )]
    UploadSessions,
}

impl Related<super::upload_sessions::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::UploadSessions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
