//! Creates the connections table: one row per configured extraction job.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Connections::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Connections::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Connections::OwnerRef).text().not_null())
                    .col(ColumnDef::new(Connections::SourceType).text().not_null())
                    .col(ColumnDef::new(Connections::DisplayName).text().not_null())
                    .col(ColumnDef::new(Connections::TargetDataset).text().not_null())
                    .col(ColumnDef::new(Connections::TargetTable).text().not_null())
                    .col(ColumnDef::new(Connections::Config).json_binary().not_null())
                    .col(ColumnDef::new(Connections::Schedule).json_binary().not_null())
                    .col(ColumnDef::new(Connections::LinkedIdentity).text().null())
                    .col(
                        ColumnDef::new(Connections::IsEnabled)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Connections::Status)
                            .text()
                            .not_null()
                            .default("PENDING"),
                    )
                    .col(
                        ColumnDef::new(Connections::LastSyncTime)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Connections::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Connections::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // The matcher scans enabled connections by status every minute.
        manager
            .create_index(
                Index::create()
                    .name("idx_connections_enabled_status")
                    .table(Connections::Table)
                    .col(Connections::IsEnabled)
                    .col(Connections::Status)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_connections_enabled_status")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(Connections::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub(crate) enum Connections {
    Table,
    Id,
    OwnerRef,
    SourceType,
    DisplayName,
    TargetDataset,
    TargetTable,
    Config,
    Schedule,
    LinkedIdentity,
    IsEnabled,
    Status,
    LastSyncTime,
    CreatedAt,
    UpdatedAt,
}
