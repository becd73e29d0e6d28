use sea_orm_migration::prelude::*;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m20250301_000001_create_file_info_table"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(FileInfo::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(FileInfo::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(FileInfo::UploadUri)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(FileInfo::FileName).string().not_null())
                    .col(ColumnDef::new(FileInfo::TotalSize).big_integer().not_null())
                    .col(ColumnDef::new(FileInfo::OffsetBytes).big_integer().not_null())
                    .col(ColumnDef::new(FileInfo::Status).string_len(16).not_null())
                    .col(ColumnDef::new(FileInfo::ExpectedChecksum).string())
                    .col(
                        ColumnDef::new(FileInfo::ChecksumVerified)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(FileInfo::ObjectKey).string())
                    .col(
                        ColumnDef::new(FileInfo::CallbackSent)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(FileInfo::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(FileInfo::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-file_info-status-updated_at")
                    .table(FileInfo::Table)
                    .col(FileInfo::Status)
                    .col(FileInfo::UpdatedAt)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(FileInfo::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum FileInfo {
    Table,
    Id,
    UploadUri,
    FileName,
    TotalSize,
    OffsetBytes,
    Status,
    ExpectedChecksum,
    ChecksumVerified,
    ObjectKey,
    CallbackSent,
    CreatedAt,
    UpdatedAt,
}
