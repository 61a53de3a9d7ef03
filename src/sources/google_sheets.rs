//! Google Sheets adapter.
//!
//! Reads one tab from row 2 onward (row 1 is the user's header) and maps each row positionally
//! onto the connection's declared schema. Calls are made as the service identity; the sheet must
//! be shared with it.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use super::google_ads::error_from_response;
use super::{FetchRequest, LoadPlan, SourceAdapter, mismatched_config};
use crate::error::SyncError;
use crate::models::source_config::GoogleSheetConfig;
use crate::models::{SourceConfig, SourceType};
use crate::service_account::AccessTokenProvider;
use crate::warehouse::{ColumnSpec, Row, WritePolicy};

const WRITE_ROLES: &[&str] = &["writer", "owner"];

pub struct GoogleSheetsAdapter {
    sheets_base: String,
    drive_base: String,
    tokens: Arc<dyn AccessTokenProvider>,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct FilePermissions {
    #[serde(default)]
    permissions: Vec<Permission>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Permission {
    #[serde(default)]
    email_address: Option<String>,
    #[serde(default)]
    role: String,
}

impl GoogleSheetsAdapter {
    pub fn new(sheets_base: &str, drive_base: &str, tokens: Arc<dyn AccessTokenProvider>) -> Self {
        Self {
            sheets_base: sheets_base.trim_end_matches('/').to_string(),
            drive_base: drive_base.trim_end_matches('/').to_string(),
            tokens,
            http: reqwest::Client::new(),
        }
    }

    fn values_url(&self, config: &GoogleSheetConfig) -> Result<reqwest::Url, SyncError> {
        let mut url = reqwest::Url::parse(&format!("{}/v4/spreadsheets", self.sheets_base))
            .map_err(|e| SyncError::configuration(format!("invalid Sheets API base: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| SyncError::configuration("Sheets API base cannot carry a path"))?
            .push(&config.sheet_id)
            .push("values")
            .push(&data_range(&config.tab_name, config.schema.columns().len()));
        Ok(url)
    }

    /// True when the service identity can write to the sheet. A sheet the identity cannot see at
    /// all (403/404) is reported as `false`, not as an error.
    pub async fn check_permissions(&self, sheet_id: &str) -> Result<bool, SyncError> {
        let email = self.tokens.service_email().ok_or_else(|| {
            SyncError::configuration("service identity email is not configured")
        })?;
        let token = self.tokens.access_token().await?;

        let mut url = reqwest::Url::parse(&format!("{}/drive/v3/files", self.drive_base))
            .map_err(|e| SyncError::configuration(format!("invalid Drive API base: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| SyncError::configuration("Drive API base cannot carry a path"))?
            .push(sheet_id);

        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .query(&[
                ("fields", "permissions(emailAddress,role)"),
                ("supportsAllDrives", "true"),
            ])
            .send()
            .await?;

        match response.status() {
            StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => {
                warn!(sheet_id, "Sheet is not visible to the service identity");
                return Ok(false);
            }
            status if !status.is_success() => return Err(error_from_response(response).await),
            _ => {}
        }

        let file: FilePermissions = response.json().await?;
        let allowed = file.permissions.iter().any(|p| {
            p.email_address
                .as_deref()
                .is_some_and(|e| e.eq_ignore_ascii_case(email))
                && WRITE_ROLES.contains(&p.role.as_str())
        });
        info!(sheet_id, allowed, "Checked sheet permissions");
        Ok(allowed)
    }
}

/// A1 range covering every data row of the tab: columns A through Z, or through the last schema
/// column when the schema is wider than that.
pub fn data_range(tab_name: &str, width: usize) -> String {
    format!(
        "'{}'!A2:{}",
        tab_name.replace('\'', "''"),
        column_letters(width.max(26))
    )
}

/// Spreadsheet column name for a 1-based index: 1 is `A`, 26 is `Z`, 27 is `AA`.
fn column_letters(mut index: usize) -> String {
    let mut letters = Vec::new();
    while index > 0 {
        let rem = (index - 1) % 26;
        letters.push(b'A' + rem as u8);
        index = (index - 1) / 26;
    }
    letters.reverse();
    String::from_utf8_lossy(&letters).into_owned()
}

/// Maps raw cells onto the schema by position: short rows are padded with nulls, long rows are
/// truncated. Empty cells load as nulls.
pub fn rows_from_values(columns: &[ColumnSpec], values: Vec<Vec<Value>>) -> Vec<Row> {
    values
        .into_iter()
        .map(|cells| {
            let mut cells = cells.into_iter();
            columns
                .iter()
                .map(|column| {
                    let value = match cells.next() {
                        Some(Value::String(s)) if s.is_empty() => Value::Null,
                        Some(value) => value,
                        None => Value::Null,
                    };
                    (column.name.clone(), value)
                })
                .collect()
        })
        .collect()
}

#[async_trait]
impl SourceAdapter for GoogleSheetsAdapter {
    fn source_type(&self) -> SourceType {
        SourceType::GoogleSheet
    }

    async fn fetch_records(&self, request: &FetchRequest) -> Result<Vec<Row>, SyncError> {
        let SourceConfig::GoogleSheet(config) = &request.config else {
            return Err(mismatched_config(SourceType::GoogleSheet, &request.config));
        };
        let columns = config.schema.columns();
        if columns.is_empty() {
            return Err(SyncError::configuration(
                "schema: at least one column must be defined",
            ));
        }

        let token = self.tokens.access_token().await?;
        let response = self
            .http
            .get(self.values_url(config)?)
            .bearer_auth(token)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let range: ValueRange = response.json().await?;
        let rows = rows_from_values(columns, range.values);
        info!(
            sheet_id = %config.sheet_id,
            tab = %config.tab_name,
            rows = rows.len(),
            "Fetched sheet rows"
        );
        Ok(rows)
    }

    fn load_plan(&self, config: &SourceConfig) -> LoadPlan {
        let schema_hint = match config {
            SourceConfig::GoogleSheet(sheet) => Some(sheet.table_schema()),
            _ => None,
        };
        LoadPlan {
            write_policy: WritePolicy::Replace,
            schema_hint,
        }
    }
}
