//! # Warehouse Loader
//!
//! Creates destination tables and loads row sets into them. The executor talks to the
//! [`Warehouse`] trait only; [`bigquery::BigQueryWarehouse`] is the production backend and
//! [`memory::MemoryWarehouse`] keeps tables in process for tests and dry runs.

pub mod bigquery;
pub mod memory;
pub mod schema;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::SyncError;
use crate::service_account::ServiceAccountError;

pub use schema::{ColumnSpec, ColumnType, TableSchema};

/// One fetched record: field name to JSON value.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Destination `dataset.table`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    pub dataset: String,
    pub table: String,
}

impl TableRef {
    pub fn new(dataset: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            table: table.into(),
        }
    }
}

impl std::fmt::Display for TableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.dataset, self.table)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WritePolicy {
    /// Truncate existing data, then load.
    Replace,
    /// Add rows, keeping prior data.
    Append,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    Created,
    Existing,
}

#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error("warehouse project is not configured")]
    NotConfigured,
    #[error("cannot create {table} without a schema hint or sample row")]
    MissingSchema { table: String },
    #[error("warehouse API returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("load job {job_id} failed: {message}")]
    JobFailed { job_id: String, message: String },
    #[error("load job {job_id} did not finish within {seconds}s")]
    JobTimeout { job_id: String, seconds: u64 },
    #[error("warehouse request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("failed to encode rows: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Identity(#[from] ServiceAccountError),
}

impl From<WarehouseError> for SyncError {
    fn from(err: WarehouseError) -> Self {
        match err {
            WarehouseError::Identity(inner) => SyncError::from(inner),
            other => SyncError::warehouse(other.to_string()),
        }
    }
}

#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Creates the table when missing. `schema_hint` is used verbatim; otherwise the schema is
    /// inferred from `sample`. An existing table is reused as-is.
    async fn ensure_table(
        &self,
        target: &TableRef,
        schema_hint: Option<&TableSchema>,
        sample: Option<&Row>,
    ) -> Result<EnsureOutcome, WarehouseError>;

    /// Loads rows under the write policy and returns the number of rows written.
    async fn load(
        &self,
        target: &TableRef,
        rows: &[Row],
        policy: WritePolicy,
    ) -> Result<u64, WarehouseError>;
}

/// Schema for a table about to be created.
pub(crate) fn creation_schema(
    target: &TableRef,
    schema_hint: Option<&TableSchema>,
    sample: Option<&Row>,
) -> Result<TableSchema, WarehouseError> {
    match (schema_hint, sample) {
        (Some(hint), _) => Ok(hint.clone()),
        (None, Some(row)) => Ok(TableSchema::infer_from_row(row)),
        (None, None) => Err(WarehouseError::MissingSchema {
            table: target.to_string(),
        }),
    }
}
