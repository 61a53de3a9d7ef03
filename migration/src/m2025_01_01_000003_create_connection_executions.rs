//! Creates the connection_executions table: the append-then-finalize attempt log.

use sea_orm_migration::prelude::*;

use super::m2025_01_01_000001_create_connections::Connections;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ConnectionExecutions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ConnectionExecutions::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ConnectionExecutions::ConnectionId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ConnectionExecutions::TriggerSource)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ConnectionExecutions::TriggeredBy)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ConnectionExecutions::Status)
                            .text()
                            .not_null()
                            .default("RUNNING"),
                    )
                    .col(ColumnDef::new(ConnectionExecutions::Message).text().null())
                    .col(
                        ColumnDef::new(ConnectionExecutions::RowCount)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ConnectionExecutions::ConfigSnapshot)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ConnectionExecutions::DisplayNameSnapshot)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ConnectionExecutions::TargetSnapshot)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ConnectionExecutions::StartedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(ConnectionExecutions::FinishedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_connection_executions_connection_id")
                            .from(
                                ConnectionExecutions::Table,
                                ConnectionExecutions::ConnectionId,
                            )
                            .to(Connections::Table, Connections::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // History views read the latest attempts per connection.
        manager
            .create_index(
                Index::create()
                    .name("idx_connection_executions_connection_started")
                    .table(ConnectionExecutions::Table)
                    .col(ConnectionExecutions::ConnectionId)
                    .col(ConnectionExecutions::StartedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_connection_executions_connection_started")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(ConnectionExecutions::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ConnectionExecutions {
    Table,
    Id,
    ConnectionId,
    TriggerSource,
    TriggeredBy,
    Status,
    Message,
    RowCount,
    ConfigSnapshot,
    DisplayNameSnapshot,
    TargetSnapshot,
    StartedAt,
    FinishedAt,
}
