//! # Connection Repository
//!
//! Reads connections for the matcher and performs the status transitions owned by the sync
//! executor. The SYNCING claim is a single conditional UPDATE so two racing triggers cannot both
//! win it.

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::models::connection::{ActiveModel, Column, Entity, Model};
use crate::models::{ConnectionStatus, SourceType};

/// Fields supplied by the surrounding application when a connection is registered.
#[derive(Debug, Clone)]
pub struct NewConnection {
    pub owner_ref: String,
    pub source_type: SourceType,
    pub display_name: String,
    pub target_dataset: String,
    pub target_table: String,
    pub config: JsonValue,
    pub schedule: JsonValue,
    pub linked_identity: Option<String>,
    pub is_enabled: bool,
    pub status: ConnectionStatus,
    pub last_sync_time: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct ConnectionRepository {
    db: DatabaseConnection,
}

impl ConnectionRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn insert(&self, new: NewConnection) -> Result<Model, DbErr> {
        let now = Utc::now().fixed_offset();
        let connection = ActiveModel {
            id: Set(Uuid::new_v4()),
            owner_ref: Set(new.owner_ref),
            source_type: Set(new.source_type.as_str().to_string()),
            display_name: Set(new.display_name),
            target_dataset: Set(new.target_dataset),
            target_table: Set(new.target_table),
            config: Set(new.config),
            schedule: Set(new.schedule),
            linked_identity: Set(new.linked_identity),
            is_enabled: Set(new.is_enabled),
            status: Set(new.status.as_str().to_string()),
            last_sync_time: Set(new.last_sync_time.map(|t| t.fixed_offset())),
            created_at: Set(now),
            updated_at: Set(now),
        };

        connection.insert(&self.db).await.map_err(|e| {
            tracing::error!("Failed to insert connection: {}", e);
            e
        })
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Model>, DbErr> {
        Entity::find_by_id(id).one(&self.db).await
    }

    /// Enabled connections in ACTIVE or ERROR status, the only ones the matcher may dispatch.
    pub async fn list_schedulable(&self) -> Result<Vec<Model>, DbErr> {
        Entity::find()
            .filter(Column::IsEnabled.eq(true))
            .filter(Column::Status.is_in([
                ConnectionStatus::Active.as_str(),
                ConnectionStatus::Error.as_str(),
            ]))
            .order_by_asc(Column::CreatedAt)
            .all(&self.db)
            .await
    }

    /// Atomically moves an enabled, non-syncing connection to SYNCING.
    ///
    /// Returns `false` when the connection is missing, disabled or already syncing.
    pub async fn try_claim(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, DbErr> {
        let result = Entity::update_many()
            .col_expr(
                Column::Status,
                Expr::value(ConnectionStatus::Syncing.as_str()),
            )
            .col_expr(Column::UpdatedAt, Expr::value(now.fixed_offset()))
            .filter(Column::Id.eq(id))
            .filter(Column::IsEnabled.eq(true))
            .filter(Column::Status.ne(ConnectionStatus::Syncing.as_str()))
            .exec(&self.db)
            .await?;

        Ok(result.rows_affected == 1)
    }

    /// Ends an attempt: failure sets ERROR, success sets ACTIVE if the row is still SYNCING.
    /// `last_sync_time` is stamped either way.
    pub async fn release(&self, id: Uuid, succeeded: bool, now: DateTime<Utc>) -> Result<(), DbErr> {
        let stamp = now.fixed_offset();

        if succeeded {
            let result = Entity::update_many()
                .col_expr(Column::Status, Expr::value(ConnectionStatus::Active.as_str()))
                .col_expr(Column::LastSyncTime, Expr::value(Some(stamp)))
                .col_expr(Column::UpdatedAt, Expr::value(stamp))
                .filter(Column::Id.eq(id))
                .filter(Column::Status.eq(ConnectionStatus::Syncing.as_str()))
                .exec(&self.db)
                .await?;
            if result.rows_affected == 1 {
                return Ok(());
            }
            Entity::update_many()
                .col_expr(Column::LastSyncTime, Expr::value(Some(stamp)))
                .col_expr(Column::UpdatedAt, Expr::value(stamp))
                .filter(Column::Id.eq(id))
                .exec(&self.db)
                .await?;
        } else {
            Entity::update_many()
                .col_expr(Column::Status, Expr::value(ConnectionStatus::Error.as_str()))
                .col_expr(Column::LastSyncTime, Expr::value(Some(stamp)))
                .col_expr(Column::UpdatedAt, Expr::value(stamp))
                .filter(Column::Id.eq(id))
                .exec(&self.db)
                .await?;
        }

        Ok(())
    }

    pub async fn set_enabled(&self, id: Uuid, enabled: bool) -> Result<bool, DbErr> {
        let result = Entity::update_many()
            .col_expr(Column::IsEnabled, Expr::value(enabled))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
            .filter(Column::Id.eq(id))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected == 1)
    }

    /// Moves connections left in SYNCING by an interrupted process to ERROR.
    pub async fn reset_stuck_syncing(&self, now: DateTime<Utc>) -> Result<u64, DbErr> {
        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(ConnectionStatus::Error.as_str()))
            .col_expr(Column::UpdatedAt, Expr::value(now.fixed_offset()))
            .filter(Column::Status.eq(ConnectionStatus::Syncing.as_str()))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }
}
