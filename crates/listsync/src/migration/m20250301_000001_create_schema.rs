//! Initial schema: replicated records and sync cursors.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        self.create_replicated_records(manager).await?;
        self.create_sync_cursors(manager).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SyncCursors::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ReplicatedRecords::Table).to_owned())
            .await?;
        Ok(())
    }
}

impl Migration {
    async fn create_replicated_records(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ReplicatedRecords::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ReplicatedRecords::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ReplicatedRecords::Provider).string().not_null())
                    .col(ColumnDef::new(ReplicatedRecords::Collection).string().not_null())
                    .col(ColumnDef::new(ReplicatedRecords::RecordKey).text().not_null())
                    .col(
                        ColumnDef::new(ReplicatedRecords::ModifiedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ReplicatedRecords::Fields)
                            .json()
                            .not_null()
                            .default(Expr::cust("'{}'")),
                    )
                    .col(ColumnDef::new(ReplicatedRecords::ContentHash).string().not_null())
                    .col(
                        ColumnDef::new(ReplicatedRecords::FirstSeenAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(ReplicatedRecords::SyncedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Upsert conflict target
        manager
            .create_index(
                Index::create()
                    .name("idx_replicated_records_identity")
                    .table(ReplicatedRecords::Table)
                    .col(ReplicatedRecords::Provider)
                    .col(ReplicatedRecords::Collection)
                    .col(ReplicatedRecords::RecordKey)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_replicated_records_modified_at")
                    .table(ReplicatedRecords::Table)
                    .col(ReplicatedRecords::Provider)
                    .col(ReplicatedRecords::Collection)
                    .col(ReplicatedRecords::ModifiedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn create_sync_cursors(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SyncCursors::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SyncCursors::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(SyncCursors::Provider).string().not_null())
                    .col(ColumnDef::new(SyncCursors::Collection).string().not_null())
                    .col(
                        ColumnDef::new(SyncCursors::State)
                            .json()
                            .not_null()
                            .default(Expr::cust("'{}'")),
                    )
                    .col(
                        ColumnDef::new(SyncCursors::Offset)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncCursors::LastModifiedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(SyncCursors::LastRecordKey).text().null())
                    .col(
                        ColumnDef::new(SyncCursors::Complete)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(SyncCursors::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_sync_cursors_provider_collection")
                    .table(SyncCursors::Table)
                    .col(SyncCursors::Provider)
                    .col(SyncCursors::Collection)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
#[sea_orm(iden = "replicated_records")]
enum ReplicatedRecords {
    Table,
    Id,
    Provider,
    Collection,
    RecordKey,
    ModifiedAt,
    Fields,
    ContentHash,
    FirstSeenAt,
    SyncedAt,
}

#[derive(DeriveIden)]
#[sea_orm(iden = "sync_cursors")]
enum SyncCursors {
    Table,
    Id,
    Provider,
    Collection,
    State,
    Offset,
    LastModifiedAt,
    LastRecordKey,
    Complete,
    UpdatedAt,
}
