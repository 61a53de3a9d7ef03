//! Google Ads adapter (GAQL over `googleAds:searchStream`).
//!
//! The query is assembled from the metric, segment and attribute selections; each streamed result
//! row is flattened into snake_case columns with micro-unit amounts converted to currency units.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{info, warn};

use super::{
    AccountSummary, FetchRequest, LoadPlan, SourceAdapter, mismatched_config, retry_after_secs,
};
use crate::error::SyncError;
use crate::models::source_config::GoogleAdsConfig;
use crate::models::{SourceConfig, SourceType};
use crate::warehouse::{Row, WritePolicy};

const DATE_FIELD: &str = "segments.date";
const MICROS_SUFFIX: &str = "Micros";
const MICROS_PER_UNIT: f64 = 1_000_000.0;

pub struct GoogleAdsAdapter {
    api_base: String,
    version: String,
    developer_token: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct StreamBatch {
    #[serde(default)]
    results: Vec<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccessibleCustomers {
    #[serde(default)]
    resource_names: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

impl GoogleAdsAdapter {
    pub fn new(api_base: &str, version: &str, developer_token: String) -> Self {
        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            version: version.to_string(),
            developer_token,
            http: reqwest::Client::new(),
        }
    }

    fn authorized(&self, request: reqwest::RequestBuilder, token: &str) -> reqwest::RequestBuilder {
        request
            .bearer_auth(token)
            .header("developer-token", &self.developer_token)
    }
}

/// Builds the GAQL statement. The selected field list is the sorted, de-duplicated union of all
/// three selections plus `segments.date`.
pub fn build_query(config: &GoogleAdsConfig) -> Result<String, SyncError> {
    let resource = config
        .resource_name
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .ok_or_else(|| SyncError::configuration("resource_name: a report resource is required"))?;

    let mut fields: BTreeSet<&str> = config
        .metrics
        .iter()
        .chain(&config.segments)
        .chain(&config.attributes)
        .map(|f| f.trim())
        .filter(|f| !f.is_empty())
        .collect();
    if fields.is_empty() {
        return Err(SyncError::configuration(
            "metrics/segments/attributes: at least one field must be selected",
        ));
    }
    fields.insert(DATE_FIELD);

    let select = fields.into_iter().collect::<Vec<_>>().join(", ");
    Ok(format!(
        "SELECT {select} FROM {resource} WHERE {DATE_FIELD} DURING {}",
        config.date_range
    ))
}

fn strip_dashes(customer_id: &str) -> String {
    customer_id.chars().filter(|c| *c != '-').collect()
}

fn snake_case(key: &str) -> String {
    static BOUNDARY: OnceLock<Regex> = OnceLock::new();
    let boundary =
        BOUNDARY.get_or_init(|| Regex::new(r"([a-z0-9])([A-Z])").expect("valid case boundary pattern"));
    boundary.replace_all(key, "${1}_${2}").to_lowercase()
}

fn flatten_into(prefix: &str, value: Map<String, Value>, out: &mut Vec<(String, Value)>) {
    for (key, value) in value {
        let path = if prefix.is_empty() {
            key
        } else {
            format!("{prefix}_{key}")
        };
        match value {
            Value::Object(nested) => flatten_into(&path, nested, out),
            other => out.push((path, other)),
        }
    }
}

/// Flattens one API result into a warehouse row.
///
/// `{"metrics": {"costMicros": "1500000"}}` becomes `{"metrics_cost": 1.5}`.
pub fn flatten_result(result: Map<String, Value>) -> Row {
    let mut pairs = Vec::new();
    flatten_into("", result, &mut pairs);

    pairs
        .into_iter()
        .map(|(key, value)| match key.strip_suffix(MICROS_SUFFIX) {
            Some(base) => (snake_case(base), micros_to_units(&key, &value)),
            None => (snake_case(&key), value),
        })
        .collect()
}

/// int64 fields arrive as JSON strings. Anything that is not a number loads as null.
fn micros_to_units(field: &str, value: &Value) -> Value {
    let micros = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        Value::Null => return Value::Null,
        _ => None,
    };
    match micros {
        Some(m) => json!(m / MICROS_PER_UNIT),
        None => {
            warn!(field, %value, "micros value is not numeric; loading null");
            Value::Null
        }
    }
}

/// Classifies a Google API error body (`{"error": {"status": ...}}`, possibly inside an array).
pub(crate) fn classify_google_error(
    status: StatusCode,
    body: &str,
    retry_after: Option<u64>,
) -> SyncError {
    // searchStream wraps errors in an array.
    let parsed = serde_json::from_str::<ApiErrorEnvelope>(body).ok().or_else(|| {
        serde_json::from_str::<Vec<ApiErrorEnvelope>>(body)
            .ok()
            .and_then(|mut v| (!v.is_empty()).then(|| v.remove(0)))
    });
    let (api_status, message) = match parsed {
        Some(envelope) => (envelope.error.status, envelope.error.message),
        None => (String::new(), body.to_string()),
    };
    let message = format!("Google API {status}: {message}");

    let classified = match api_status.as_str() {
        "UNAUTHENTICATED" | "PERMISSION_DENIED" => SyncError::unauthorized(message),
        "RESOURCE_EXHAUSTED" => SyncError::rate_limited(retry_after, message),
        "UNAVAILABLE" | "INTERNAL" | "DEADLINE_EXCEEDED" => SyncError::transient(message),
        _ if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN => {
            SyncError::unauthorized(message)
        }
        _ if status == StatusCode::TOO_MANY_REQUESTS => SyncError::rate_limited(retry_after, message),
        _ if status.is_server_error() => SyncError::transient(message),
        _ => SyncError::permanent(message),
    };
    classified.with_details(json!({"http_status": status.as_u16(), "status": api_status}))
}

pub(crate) async fn error_from_response(response: reqwest::Response) -> SyncError {
    let status = response.status();
    let retry_after = retry_after_secs(&response);
    let body = response.text().await.unwrap_or_default();
    classify_google_error(status, &body, retry_after)
}

#[async_trait]
impl SourceAdapter for GoogleAdsAdapter {
    fn source_type(&self) -> SourceType {
        SourceType::GoogleAds
    }

    async fn fetch_records(&self, request: &FetchRequest) -> Result<Vec<Row>, SyncError> {
        let SourceConfig::GoogleAds(config) = &request.config else {
            return Err(mismatched_config(SourceType::GoogleAds, &request.config));
        };
        let query = build_query(config)?;
        let token = request.bearer()?;
        let customer_id = strip_dashes(&config.customer_id);

        let url = format!(
            "{}/{}/customers/{}/googleAds:searchStream",
            self.api_base, self.version, customer_id
        );
        let mut http_request = self
            .authorized(self.http.post(&url), token)
            .json(&json!({ "query": query }));
        if let Some(login) = config.login_customer_id.as_deref() {
            http_request = http_request.header("login-customer-id", strip_dashes(login));
        }

        let response = http_request.send().await?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let batches: Vec<StreamBatch> = response.json().await?;
        let rows: Vec<Row> = batches
            .into_iter()
            .flat_map(|b| b.results)
            .map(flatten_result)
            .collect();

        info!(customer_id = %customer_id, rows = rows.len(), "Fetched Google Ads report");
        Ok(rows)
    }

    fn load_plan(&self, _config: &SourceConfig) -> LoadPlan {
        LoadPlan {
            write_policy: WritePolicy::Replace,
            schema_hint: None,
        }
    }

    async fn list_accounts(&self, access_token: &str) -> Result<Vec<AccountSummary>, SyncError> {
        let url = format!(
            "{}/{}/customers:listAccessibleCustomers",
            self.api_base, self.version
        );
        let response = self
            .authorized(self.http.get(&url), access_token)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let customers: AccessibleCustomers = response.json().await?;
        Ok(customers
            .resource_names
            .into_iter()
            .map(|resource| {
                let id = resource
                    .strip_prefix("customers/")
                    .unwrap_or(&resource)
                    .to_string();
                AccountSummary {
                    id,
                    name: resource,
                }
            })
            .collect())
    }
}
