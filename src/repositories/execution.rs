//! # Execution Record Repository
//!
//! Append-then-finalize log of sync attempts. Finalization is a single UPDATE guarded by
//! `finished_at IS NULL`, so a record can be finalized once and is immutable afterwards.

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set,
};
use uuid::Uuid;

use crate::models::connection::Model as ConnectionModel;
use crate::models::execution::{ActiveModel, Column, Entity, Model};
use crate::models::{ExecutionStatus, TriggerSource};

/// Terminal state written by [`ExecutionRepository::finalize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub status: ExecutionStatus,
    pub message: String,
    pub row_count: i64,
}

impl ExecutionOutcome {
    pub fn success(message: impl Into<String>, row_count: i64) -> Self {
        Self {
            status: ExecutionStatus::Success,
            message: message.into(),
            row_count,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Failed,
            message: message.into(),
            row_count: 0,
        }
    }
}

#[derive(Clone)]
pub struct ExecutionRepository {
    db: DatabaseConnection,
}

impl ExecutionRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Opens a RUNNING record carrying a snapshot of the connection's current configuration.
    pub async fn start(
        &self,
        connection: &ConnectionModel,
        trigger: TriggerSource,
        triggered_by: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Model, DbErr> {
        let record = ActiveModel {
            id: Set(Uuid::new_v4()),
            connection_id: Set(connection.id),
            trigger_source: Set(trigger.as_str().to_string()),
            triggered_by: Set(triggered_by),
            status: Set(ExecutionStatus::Running.as_str().to_string()),
            message: Set(None),
            row_count: Set(0),
            config_snapshot: Set(connection.config.clone()),
            display_name_snapshot: Set(connection.display_name.clone()),
            target_snapshot: Set(format!(
                "{}.{}",
                connection.target_dataset, connection.target_table
            )),
            started_at: Set(now.fixed_offset()),
            finished_at: Set(None),
        };

        record.insert(&self.db).await.map_err(|e| {
            tracing::error!(connection_id = %connection.id, "Failed to open execution record: {}", e);
            e
        })
    }

    /// Sets status, message, row count and finish time in one statement.
    ///
    /// Returns `false` if the record was already finalized.
    pub async fn finalize(
        &self,
        id: Uuid,
        outcome: &ExecutionOutcome,
        now: DateTime<Utc>,
    ) -> Result<bool, DbErr> {
        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(outcome.status.as_str()))
            .col_expr(Column::Message, Expr::value(Some(outcome.message.clone())))
            .col_expr(Column::RowCount, Expr::value(outcome.row_count))
            .col_expr(Column::FinishedAt, Expr::value(Some(now.fixed_offset())))
            .filter(Column::Id.eq(id))
            .filter(Column::FinishedAt.is_null())
            .exec(&self.db)
            .await?;

        Ok(result.rows_affected == 1)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Model>, DbErr> {
        Entity::find_by_id(id).one(&self.db).await
    }

    /// Most recent attempts first.
    pub async fn list_for_connection(
        &self,
        connection_id: Uuid,
        limit: u64,
    ) -> Result<Vec<Model>, DbErr> {
        Entity::find()
            .filter(Column::ConnectionId.eq(connection_id))
            .order_by_desc(Column::StartedAt)
            .limit(limit)
            .all(&self.db)
            .await
    }

    pub async fn latest_for_connection(&self, connection_id: Uuid) -> Result<Option<Model>, DbErr> {
        Entity::find()
            .filter(Column::ConnectionId.eq(connection_id))
            .order_by_desc(Column::StartedAt)
            .one(&self.db)
            .await
    }

    pub async fn count_running(&self, connection_id: Uuid) -> Result<u64, DbErr> {
        Entity::find()
            .filter(Column::ConnectionId.eq(connection_id))
            .filter(Column::Status.eq(ExecutionStatus::Running.as_str()))
            .count(&self.db)
            .await
    }

    /// Fails RUNNING records abandoned by an interrupted process.
    pub async fn fail_abandoned(&self, now: DateTime<Utc>) -> Result<u64, DbErr> {
        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(ExecutionStatus::Failed.as_str()))
            .col_expr(
                Column::Message,
                Expr::value(Some("Sync attempt was interrupted before it finished.".to_string())),
            )
            .col_expr(Column::FinishedAt, Expr::value(Some(now.fixed_offset())))
            .filter(Column::Status.eq(ExecutionStatus::Running.as_str()))
            .filter(Column::FinishedAt.is_null())
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }
}
