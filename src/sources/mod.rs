//! # Source Adapters
//!
//! One [`SourceAdapter`] implementation per source type, looked up through the
//! [`AdapterRegistry`]. The executor depends only on the trait: it hands an adapter the typed
//! connection configuration plus any delegated access token, and gets rows and a [`LoadPlan`]
//! describing how those rows land in the warehouse.

pub mod facebook_ads;
pub mod google_ads;
pub mod google_sheets;
pub mod registry;
pub mod retry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::models::{SourceConfig, SourceType};
use crate::warehouse::{Row, TableSchema, WritePolicy};

pub use facebook_ads::FacebookAdsAdapter;
pub use google_ads::GoogleAdsAdapter;
pub use google_sheets::GoogleSheetsAdapter;
pub use registry::{AdapterRegistry, RegistryError};
pub use retry::{RetryEvent, RetryPolicy, with_retry};

/// Everything an adapter needs for one fetch.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub config: SourceConfig,
    /// Delegated access token, present for sources that require one.
    pub access_token: Option<String>,
}

impl FetchRequest {
    pub(crate) fn bearer(&self) -> Result<&str, SyncError> {
        self.access_token
            .as_deref()
            .ok_or_else(|| SyncError::unauthorized("no access token available for this source"))
    }
}

/// How fetched rows are written.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadPlan {
    pub write_policy: WritePolicy,
    /// Explicit schema; `None` means infer from the first row.
    pub schema_hint: Option<TableSchema>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSummary {
    pub id: String,
    pub name: String,
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source_type(&self) -> SourceType;

    /// Fetch all rows for the configured report. Errors are classified so the caller can decide
    /// whether to retry.
    async fn fetch_records(&self, request: &FetchRequest) -> Result<Vec<Row>, SyncError>;

    fn load_plan(&self, config: &SourceConfig) -> LoadPlan;

    /// Accounts reachable with the given token, for account selection outside the sync path.
    async fn list_accounts(&self, _access_token: &str) -> Result<Vec<AccountSummary>, SyncError> {
        Err(SyncError::configuration(format!(
            "{} does not support listing accounts",
            self.source_type()
        )))
    }
}

/// Reads a `Retry-After` header in seconds.
pub(crate) fn retry_after_secs(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
}

pub(crate) fn mismatched_config(expected: SourceType, config: &SourceConfig) -> SyncError {
    SyncError::configuration(format!(
        "{} adapter received {} configuration",
        expected,
        config.source_type()
    ))
}
