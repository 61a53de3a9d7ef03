//! # Data Models
//!
//! SeaORM entities for the persisted state (connections, credentials, execution records) and the
//! typed views parsed out of their JSON columns.

pub mod connection;
pub mod credential;
pub mod execution;
pub mod schedule;
pub mod source_config;

pub use connection::{ConnectionStatus, Entity as Connection};
pub use credential::Entity as Credential;
pub use execution::{Entity as ConnectionExecution, ExecutionStatus, TriggerSource};
pub use schedule::{Frequency, Schedule, ScheduleError};
pub use source_config::{SourceConfig, SourceConfigError, SourceType};
