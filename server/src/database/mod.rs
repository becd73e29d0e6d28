//! Durable upload metadata store.
//!
//! The `TuskDatabase` extension trait is the only way the rest of the server
//! talks to the `file_info` table. The two conditional operations matter
//! most: `mark_completed` is the compare-and-set that guarantees the
//! completion pipeline fires from exactly one append, and
//! `delete_if_untouched` lets the sweeper lose races against concurrent
//! appends.

pub mod entity;
pub mod migration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectOptions, Database, DatabaseConnection, EntityTrait,
    QueryFilter, QueryOrder,
};
use sea_orm_migration::MigratorTrait;

use crate::error::{ServerError, ServerResult};
use entity::file_info::{self, Entity as FileInfo, UploadStatus};
use migration::Migrator;

/// Connects to the database and brings the schema up to date.
pub async fn connect(url: &str) -> Result<DatabaseConnection> {
    let mut options = ConnectOptions::new(url.to_owned());
    options.sqlx_logging(false);

    let db = Database::connect(options).await?;
    Migrator::up(&db, None).await?;

    Ok(db)
}

#[async_trait]
pub trait TuskDatabase {
    /// Inserts a freshly-created session row.
    async fn insert_file(&self, file: file_info::ActiveModel) -> ServerResult<file_info::Model>;

    async fn find_by_uri(&self, uri: &str) -> ServerResult<Option<file_info::Model>>;

    async fn find_by_status(&self, status: UploadStatus) -> ServerResult<Vec<file_info::Model>>;

    /// Sessions in `status` whose `updated_at` is before `older_than`.
    async fn find_stale_by_status(
        &self,
        status: UploadStatus,
        older_than: DateTime<Utc>,
    ) -> ServerResult<Vec<file_info::Model>>;

    async fn list_all(&self) -> ServerResult<Vec<file_info::Model>>;

    /// Transitions `uploading → completed`, but only if the offset has
    /// reached the declared length. Returns whether this call won the
    /// transition.
    async fn mark_completed(&self, uri: &str) -> ServerResult<bool>;

    /// Deletes the row only if `updated_at` still matches what the caller
    /// observed. Returns whether the row was removed.
    async fn delete_if_untouched(
        &self,
        uri: &str,
        seen_updated_at: DateTime<Utc>,
    ) -> ServerResult<bool>;

    async fn delete_by_uri(&self, uri: &str) -> ServerResult<bool>;
}

#[async_trait]
impl TuskDatabase for DatabaseConnection {
    async fn insert_file(&self, file: file_info::ActiveModel) -> ServerResult<file_info::Model> {
        file.insert(self).await.map_err(ServerError::database_error)
    }

    async fn find_by_uri(&self, uri: &str) -> ServerResult<Option<file_info::Model>> {
        FileInfo::find()
            .filter(file_info::Column::UploadUri.eq(uri))
            .one(self)
            .await
            .map_err(ServerError::database_error)
    }

    async fn find_by_status(&self, status: UploadStatus) -> ServerResult<Vec<file_info::Model>> {
        FileInfo::find()
            .filter(file_info::Column::Status.eq(status))
            .order_by_asc(file_info::Column::Id)
            .all(self)
            .await
            .map_err(ServerError::database_error)
    }

    async fn find_stale_by_status(
        &self,
        status: UploadStatus,
        older_than: DateTime<Utc>,
    ) -> ServerResult<Vec<file_info::Model>> {
        FileInfo::find()
            .filter(file_info::Column::Status.eq(status))
            .filter(file_info::Column::UpdatedAt.lt(older_than))
            .all(self)
            .await
            .map_err(ServerError::database_error)
    }

    async fn list_all(&self) -> ServerResult<Vec<file_info::Model>> {
        FileInfo::find()
            .order_by_asc(file_info::Column::Id)
            .all(self)
            .await
            .map_err(ServerError::database_error)
    }

    async fn mark_completed(&self, uri: &str) -> ServerResult<bool> {
        let result = FileInfo::update_many()
            .col_expr(file_info::Column::Status, Expr::value(UploadStatus::Completed))
            .col_expr(file_info::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(file_info::Column::UploadUri.eq(uri))
            .filter(file_info::Column::Status.eq(UploadStatus::Uploading))
            .filter(
                Expr::col(file_info::Column::OffsetBytes)
                    .eq(Expr::col(file_info::Column::TotalSize)),
            )
            .exec(self)
            .await
            .map_err(ServerError::database_error)?;

        Ok(result.rows_affected == 1)
    }

    async fn delete_if_untouched(
        &self,
        uri: &str,
        seen_updated_at: DateTime<Utc>,
    ) -> ServerResult<bool> {
        let result = FileInfo::delete_many()
            .filter(file_info::Column::UploadUri.eq(uri))
            .filter(file_info::Column::UpdatedAt.eq(seen_updated_at))
            .exec(self)
            .await
            .map_err(ServerError::database_error)?;

        Ok(result.rows_affected == 1)
    }

    async fn delete_by_uri(&self, uri: &str) -> ServerResult<bool> {
        let result = FileInfo::delete_many()
            .filter(file_info::Column::UploadUri.eq(uri))
            .exec(self)
            .await
            .map_err(ServerError::database_error)?;

        Ok(result.rows_affected == 1)
    }
}
