//! Connection entity model
//!
//! A connection is one configured extraction job: a source account, a per-source configuration,
//! a schedule descriptor and the warehouse table its rows land in.

use std::str::FromStr;

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::source_config::SourceType;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "connections")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Account that owns the connection in the surrounding application
    pub owner_ref: String,

    /// Source-type tag, e.g. `FACEBOOK_ADS`
    pub source_type: String,

    pub display_name: String,

    pub target_dataset: String,

    pub target_table: String,

    /// Source-specific settings, see [`super::source_config::SourceConfig`]
    #[sea_orm(column_type = "JsonBinary")]
    pub config: JsonValue,

    /// Schedule descriptor, see [`super::schedule::Schedule`]
    #[sea_orm(column_type = "JsonBinary")]
    pub schedule: JsonValue,

    /// Credential identity used for delegated authorization
    pub linked_identity: Option<String>,

    pub is_enabled: bool,

    /// One of PENDING, ACTIVE, SYNCING, ERROR
    pub status: String,

    pub last_sync_time: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::execution::Entity")]
    Executions,
}

impl Related<super::execution::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Executions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Parsed lifecycle status; unknown values read as `Error`.
    pub fn lifecycle_status(&self) -> ConnectionStatus {
        self.status.parse().unwrap_or(ConnectionStatus::Error)
    }

    pub fn parsed_source_type(&self) -> Result<SourceType, super::source_config::SourceConfigError> {
        self.source_type.parse()
    }
}

/// Connection lifecycle. `Syncing` is held exactly while an attempt is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionStatus {
    Pending,
    Active,
    Syncing,
    Error,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Pending => "PENDING",
            ConnectionStatus::Active => "ACTIVE",
            ConnectionStatus::Syncing => "SYNCING",
            ConnectionStatus::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(ConnectionStatus::Pending),
            "ACTIVE" => Ok(ConnectionStatus::Active),
            "SYNCING" => Ok(ConnectionStatus::Syncing),
            "ERROR" => Ok(ConnectionStatus::Error),
            other => Err(format!("unknown connection status '{other}'")),
        }
    }
}
