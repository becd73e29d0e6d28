//! Upload session entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Lifecycle of an upload session.
///
/// `uploading → completed → transferred`, with `failed` reachable from any
/// state and terminal.
#[derive(Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum UploadStatus {
    #[sea_orm(string_value = "uploading")]
    Uploading,

    #[sea_orm(string_value = "completed")]
    Completed,

    #[sea_orm(string_value = "transferred")]
    Transferred,

    #[sea_orm(string_value = "failed")]
    Failed,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uploading => "uploading",
            Self::Completed => "completed",
            Self::Transferred => "transferred",
            Self::Failed => "failed",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "file_info")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    /// Canonical identifier, e.g. `/files/<id>`. Unique and never reused.
    #[sea_orm(unique)]
    pub upload_uri: String,

    pub file_name: String,

    /// Declared length, immutable after creation.
    pub total_size: i64,

    /// Bytes durably persisted so far.
    pub offset_bytes: i64,

    pub status: UploadStatus,

    /// Lowercase hex SHA-256 from client metadata, if provided.
    pub expected_checksum: Option<String>,

    pub checksum_verified: bool,

    /// Object-store key, set once the upload is transferred.
    pub object_key: Option<String>,

    pub callback_sent: bool,

    pub created_at: DateTimeUtc,

    /// Refreshed on every mutation; drives the expiration sweeper.
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
