//! Facebook Ads adapter (Graph API ad insights).
//!
//! Report parameters come from the connection configuration verbatim. Results are paginated via
//! `paging.next`, which already carries every query parameter, so follow-up pages are fetched as
//! returned.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};

use super::{
    AccountSummary, FetchRequest, LoadPlan, SourceAdapter, mismatched_config, retry_after_secs,
};
use crate::error::SyncError;
use crate::models::source_config::FacebookAdsConfig;
use crate::models::{SourceConfig, SourceType};
use crate::warehouse::{Row, WritePolicy};

const PAGE_LIMIT: &str = "500";
const ACCOUNT_STATUS_ACTIVE: i64 = 1;

/// Graph error codes that mean the token is invalid or expired.
const AUTH_ERROR_CODES: &[i64] = &[190, 102];
/// Application, user and account level throttling codes.
const THROTTLE_ERROR_CODES: &[i64] = &[4, 17, 32, 613, 80004];

pub struct FacebookAdsAdapter {
    graph_base: String,
    version: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
    #[serde(default)]
    paging: Option<Paging>,
}

#[derive(Debug, Deserialize)]
struct Paging {
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphErrorEnvelope {
    error: GraphError,
}

#[derive(Debug, Deserialize)]
struct GraphError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    error_subcode: Option<i64>,
    #[serde(default)]
    is_transient: bool,
}

#[derive(Debug, Deserialize)]
struct AdAccount {
    account_id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    account_status: i64,
}

impl FacebookAdsAdapter {
    pub fn new(graph_base: &str, version: &str) -> Self {
        Self {
            graph_base: graph_base.trim_end_matches('/').to_string(),
            version: version.to_string(),
            http: reqwest::Client::new(),
        }
    }

    fn insights_url(&self, config: &FacebookAdsConfig) -> Result<reqwest::Url, SyncError> {
        let account = normalize_account_id(&config.ad_account_id);
        let base = format!("{}/{}/{}/insights", self.graph_base, self.version, account);
        reqwest::Url::parse(&base)
            .map_err(|e| SyncError::configuration(format!("invalid Graph API URL {base}: {e}")))
    }

    async fn get_page<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<Page<T>, SyncError> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }
        let retry_after = retry_after_secs(&response);
        let body = response.text().await.unwrap_or_default();
        Err(classify_graph_error(status, &body, retry_after))
    }
}

/// Ensures the `act_` prefix the insights edge expects.
pub fn normalize_account_id(id: &str) -> String {
    let id = id.trim();
    if id.starts_with("act_") {
        id.to_string()
    } else {
        format!("act_{id}")
    }
}

/// Query parameters for an insights request, excluding the token.
pub fn insights_params(config: &FacebookAdsConfig) -> Result<Vec<(&'static str, String)>, SyncError> {
    if config.fields.is_empty() {
        return Err(SyncError::configuration(
            "fields: at least one insights field must be selected",
        ));
    }

    let mut params = vec![
        ("fields", config.fields.join(",")),
        ("level", config.level.clone()),
        ("time_increment", config.time_increment.clone()),
        ("limit", PAGE_LIMIT.to_string()),
    ];
    match (&config.time_range, &config.date_preset) {
        (Some(range), _) => params.push((
            "time_range",
            json!({"since": range.since, "until": range.until}).to_string(),
        )),
        (None, Some(preset)) => params.push(("date_preset", preset.clone())),
        (None, None) => {}
    }
    if !config.breakdowns.is_empty() {
        params.push(("breakdowns", config.breakdowns.join(",")));
    }
    if !config.action_breakdowns.is_empty() {
        params.push(("action_breakdowns", config.action_breakdowns.join(",")));
    }
    Ok(params)
}

pub(crate) fn classify_graph_error(
    status: StatusCode,
    body: &str,
    retry_after: Option<u64>,
) -> SyncError {
    let Ok(envelope) = serde_json::from_str::<GraphErrorEnvelope>(body) else {
        return match status {
            StatusCode::UNAUTHORIZED => SyncError::unauthorized(format!("Graph API returned {status}")),
            StatusCode::TOO_MANY_REQUESTS => {
                SyncError::rate_limited(retry_after, format!("Graph API returned {status}"))
            }
            s if s.is_server_error() => SyncError::transient(format!("Graph API returned {status}")),
            _ => SyncError::permanent(format!("Graph API returned {status}: {body}")),
        };
    };

    let error = envelope.error;
    let details = json!({
        "http_status": status.as_u16(),
        "code": error.code,
        "error_subcode": error.error_subcode,
        "is_transient": error.is_transient,
    });
    let code = error.code.unwrap_or_default();
    let message = format!("{} (code {})", error.message, code);

    let classified = if AUTH_ERROR_CODES.contains(&code) {
        SyncError::unauthorized(message)
    } else if THROTTLE_ERROR_CODES.contains(&code) || status == StatusCode::TOO_MANY_REQUESTS {
        SyncError::rate_limited(retry_after, message)
    } else if error.is_transient || status.is_server_error() {
        SyncError::transient(message)
    } else {
        SyncError::permanent(message)
    };
    classified.with_details(details)
}

/// Nested values (action lists, breakdown objects) are stored as JSON text.
fn flatten_insight(mut row: Row) -> Row {
    for value in row.values_mut() {
        if value.is_array() || value.is_object() {
            *value = Value::String(value.to_string());
        }
    }
    row
}

#[async_trait]
impl SourceAdapter for FacebookAdsAdapter {
    fn source_type(&self) -> SourceType {
        SourceType::FacebookAds
    }

    async fn fetch_records(&self, request: &FetchRequest) -> Result<Vec<Row>, SyncError> {
        let SourceConfig::FacebookAds(config) = &request.config else {
            return Err(mismatched_config(SourceType::FacebookAds, &request.config));
        };
        let params = insights_params(config)?;
        let token = request.bearer()?;

        let mut rows = Vec::new();
        let mut page: Page<Row> = self
            .get_page(
                self.http
                    .get(self.insights_url(config)?)
                    .query(&params)
                    .query(&[("access_token", token)]),
            )
            .await?;
        let mut pages = 1;

        loop {
            rows.extend(page.data.into_iter().map(flatten_insight));
            let Some(next) = page.paging.and_then(|p| p.next) else {
                break;
            };
            debug!(pages, rows = rows.len(), "Following insights pagination");
            page = self.get_page(self.http.get(next)).await?;
            pages += 1;
        }

        info!(
            account = %normalize_account_id(&config.ad_account_id),
            pages,
            rows = rows.len(),
            "Fetched ad insights"
        );
        Ok(rows)
    }

    fn load_plan(&self, _config: &SourceConfig) -> LoadPlan {
        LoadPlan {
            write_policy: WritePolicy::Append,
            schema_hint: None,
        }
    }

    async fn list_accounts(&self, access_token: &str) -> Result<Vec<AccountSummary>, SyncError> {
        let url = format!("{}/{}/me/adaccounts", self.graph_base, self.version);
        let mut accounts = Vec::new();
        let mut page: Page<AdAccount> = self
            .get_page(self.http.get(&url).query(&[
                ("fields", "account_id,name,account_status"),
                ("limit", PAGE_LIMIT),
                ("access_token", access_token),
            ]))
            .await?;

        loop {
            accounts.extend(
                page.data
                    .into_iter()
                    .filter(|a| a.account_status == ACCOUNT_STATUS_ACTIVE)
                    .map(|a| AccountSummary {
                        id: a.account_id,
                        name: a.name,
                    }),
            );
            let Some(next) = page.paging.and_then(|p| p.next) else {
                break;
            };
            page = self.get_page(self.http.get(next)).await?;
        }
        Ok(accounts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncErrorKind;
    use crate::models::source_config::TimeRange;

    fn config() -> FacebookAdsConfig {
        FacebookAdsConfig {
            ad_account_id: "12345".to_string(),
            fields: vec!["impressions".to_string(), "spend".to_string()],
            level: "ad".to_string(),
            time_increment: "1".to_string(),
            date_preset: Some("last_7d".to_string()),
            time_range: None,
            breakdowns: vec!["age".to_string(), "gender".to_string()],
            action_breakdowns: Vec::new(),
        }
    }

    #[test]
    fn account_id_gets_act_prefix_once() {
        assert_eq!(normalize_account_id("12345"), "act_12345");
        assert_eq!(normalize_account_id("act_12345"), "act_12345");
    }

    #[test]
    fn params_pass_config_through() {
        let params = insights_params(&config()).unwrap();
        assert!(params.contains(&("fields", "impressions,spend".to_string())));
        assert!(params.contains(&("level", "ad".to_string())));
        assert!(params.contains(&("date_preset", "last_7d".to_string())));
        assert!(params.contains(&("breakdowns", "age,gender".to_string())));
        assert!(!params.iter().any(|(k, _)| *k == "action_breakdowns"));
    }

    #[test]
    fn explicit_time_range_replaces_preset() {
        let mut config = config();
        config.time_range = Some(TimeRange {
            since: "2024-01-01".to_string(),
            until: "2024-01-31".to_string(),
        });
        let params = insights_params(&config).unwrap();
        assert!(!params.iter().any(|(k, _)| *k == "date_preset"));
        let (_, range) = params.iter().find(|(k, _)| *k == "time_range").unwrap();
        assert_eq!(range, r#"{"since":"2024-01-01","until":"2024-01-31"}"#);
    }

    #[test]
    fn empty_fields_is_a_configuration_error() {
        let mut config = config();
        config.fields.clear();
        let err = insights_params(&config).unwrap_err();
        assert_eq!(err.kind, SyncErrorKind::Configuration);
        assert!(err.message.contains("fields"));
    }

    #[test]
    fn graph_errors_are_classified() {
        let expired = classify_graph_error(
            StatusCode::BAD_REQUEST,
            r#"{"error":{"message":"Session has expired","type":"OAuthException","code":190}}"#,
            None,
        );
        assert_eq!(expired.kind, SyncErrorKind::Unauthorized);

        let throttled = classify_graph_error(
            StatusCode::BAD_REQUEST,
            r#"{"error":{"message":"User request limit reached","code":17}}"#,
            Some(30),
        );
        assert_eq!(
            throttled.kind,
            SyncErrorKind::RateLimited {
                retry_after_secs: Some(30)
            }
        );

        let flagged = classify_graph_error(
            StatusCode::BAD_REQUEST,
            r#"{"error":{"message":"Please retry","code":2,"is_transient":true}}"#,
            None,
        );
        assert_eq!(flagged.kind, SyncErrorKind::Transient);

        let invalid = classify_graph_error(
            StatusCode::BAD_REQUEST,
            r#"{"error":{"message":"Invalid field","code":100}}"#,
            None,
        );
        assert_eq!(invalid.kind, SyncErrorKind::Permanent);
        assert_eq!(invalid.details.unwrap()["code"], 100);
    }

    #[test]
    fn nested_values_become_json_text() {
        let row = serde_json::json!({"impressions": "120", "actions": [{"action_type": "link_click", "value": "3"}]})
            .as_object()
            .cloned()
            .unwrap();
        let flat = flatten_insight(row);
        assert_eq!(flat["impressions"], "120");
        assert!(flat["actions"].as_str().unwrap().contains("link_click"));
    }
}
