//! Typed per-source connection configuration.
//!
//! The `config` column is stored as JSON; [`SourceConfig::parse`] turns it into the struct for the
//! connection's source type so adapters never look fields up by string.

use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::warehouse::schema::{ColumnSpec, TableSchema};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceType {
    FacebookAds,
    GoogleAds,
    GoogleSheet,
    Csv,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::FacebookAds => "FACEBOOK_ADS",
            SourceType::GoogleAds => "GOOGLE_ADS",
            SourceType::GoogleSheet => "GOOGLE_SHEET",
            SourceType::Csv => "CSV",
        }
    }

    /// Sources that call the provider on behalf of a user and need a stored credential.
    pub fn requires_delegated_auth(&self) -> bool {
        matches!(self, SourceType::FacebookAds | SourceType::GoogleAds)
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = SourceConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FACEBOOK_ADS" => Ok(SourceType::FacebookAds),
            "GOOGLE_ADS" => Ok(SourceType::GoogleAds),
            "GOOGLE_SHEET" => Ok(SourceType::GoogleSheet),
            "CSV" => Ok(SourceType::Csv),
            other => Err(SourceConfigError::UnknownSourceType(other.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum SourceConfigError {
    #[error("unsupported source type '{0}'")]
    UnknownSourceType(String),
    #[error("source type {0} has no configurable adapter")]
    NotConfigurable(SourceType),
    #[error("invalid {source_type} configuration: {reason}")]
    Invalid {
        source_type: SourceType,
        reason: String,
    },
}

/// Connection configuration, one variant per source type.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SourceConfig {
    FacebookAds(FacebookAdsConfig),
    GoogleAds(GoogleAdsConfig),
    GoogleSheet(GoogleSheetConfig),
}

impl SourceConfig {
    pub fn parse(source_type: SourceType, value: &JsonValue) -> Result<Self, SourceConfigError> {
        let invalid = |err: serde_json::Error| SourceConfigError::Invalid {
            source_type,
            reason: err.to_string(),
        };
        match source_type {
            SourceType::FacebookAds => serde_json::from_value(value.clone())
                .map(SourceConfig::FacebookAds)
                .map_err(invalid),
            SourceType::GoogleAds => serde_json::from_value(value.clone())
                .map(SourceConfig::GoogleAds)
                .map_err(invalid),
            SourceType::GoogleSheet => serde_json::from_value(value.clone())
                .map(SourceConfig::GoogleSheet)
                .map_err(invalid),
            SourceType::Csv => Err(SourceConfigError::NotConfigurable(source_type)),
        }
    }

    pub fn source_type(&self) -> SourceType {
        match self {
            SourceConfig::FacebookAds(_) => SourceType::FacebookAds,
            SourceConfig::GoogleAds(_) => SourceType::GoogleAds,
            SourceConfig::GoogleSheet(_) => SourceType::GoogleSheet,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub since: String,
    pub until: String,
}

/// Ad insights report request, passed to the Graph API verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacebookAdsConfig {
    pub ad_account_id: String,
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default = "default_time_increment", deserialize_with = "string_or_number")]
    pub time_increment: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_preset: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_range: Option<TimeRange>,
    #[serde(default)]
    pub breakdowns: Vec<String>,
    #[serde(default)]
    pub action_breakdowns: Vec<String>,
}

/// GAQL report built from metric, segment and attribute selections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoogleAdsConfig {
    pub customer_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login_customer_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_name: Option<String>,
    #[serde(default)]
    pub metrics: Vec<String>,
    #[serde(default)]
    pub segments: Vec<String>,
    #[serde(default)]
    pub attributes: Vec<String>,
    #[serde(default = "default_date_range")]
    pub date_range: String,
}

/// Sheet tab mirrored into a table with a user-defined schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoogleSheetConfig {
    pub sheet_id: String,
    pub tab_name: String,
    pub schema: SheetSchema,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_column: Option<String>,
}

/// Sheet schemas are stored either as a bare column list or wrapped in `{"columns": [...]}`.
/// The wrapped form may carry its own `date_column`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SheetSchema {
    Wrapped {
        columns: Vec<ColumnSpec>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        date_column: Option<String>,
    },
    Columns(Vec<ColumnSpec>),
}

impl SheetSchema {
    pub fn columns(&self) -> &[ColumnSpec] {
        match self {
            SheetSchema::Wrapped { columns, .. } | SheetSchema::Columns(columns) => columns,
        }
    }

    pub fn date_column(&self) -> Option<&str> {
        match self {
            SheetSchema::Wrapped { date_column, .. } => date_column.as_deref(),
            SheetSchema::Columns(_) => None,
        }
    }
}

impl GoogleSheetConfig {
    pub fn table_schema(&self) -> TableSchema {
        TableSchema {
            columns: self.schema.columns().to_vec(),
            partition_column: self
                .date_column
                .as_deref()
                .or_else(|| self.schema.date_column())
                .map(str::to_string),
        }
    }
}

fn default_level() -> String {
    "campaign".to_string()
}

fn default_time_increment() -> String {
    "1".to_string()
}

fn default_date_range() -> String {
    "LAST_30_DAYS".to_string()
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match JsonValue::deserialize(deserializer)? {
        JsonValue::String(s) => Ok(s),
        JsonValue::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warehouse::schema::ColumnType;
    use serde_json::json;

    #[test]
    fn facebook_config_applies_defaults() {
        let config = SourceConfig::parse(
            SourceType::FacebookAds,
            &json!({"ad_account_id": "123", "fields": ["impressions"], "time_increment": 7}),
        )
        .unwrap();

        let SourceConfig::FacebookAds(fb) = config else {
            panic!("expected facebook config");
        };
        assert_eq!(fb.level, "campaign");
        assert_eq!(fb.time_increment, "7");
        assert!(fb.breakdowns.is_empty());
    }

    #[test]
    fn missing_required_field_names_the_field() {
        let err = SourceConfig::parse(SourceType::GoogleAds, &json!({"metrics": ["metrics.clicks"]}))
            .unwrap_err();
        assert!(err.to_string().contains("customer_id"), "{err}");
    }

    #[test]
    fn csv_has_no_adapter_configuration() {
        assert!(matches!(
            SourceConfig::parse(SourceType::Csv, &json!({})),
            Err(SourceConfigError::NotConfigurable(SourceType::Csv))
        ));
    }

    #[test]
    fn sheet_schema_accepts_both_shapes() {
        let wrapped = SourceConfig::parse(
            SourceType::GoogleSheet,
            &json!({
                "sheet_id": "abc",
                "tab_name": "Data",
                "schema": {"columns": [{"name": "day", "type": "DATE"}]},
                "date_column": "day"
            }),
        )
        .unwrap();
        let bare = SourceConfig::parse(
            SourceType::GoogleSheet,
            &json!({
                "sheet_id": "abc",
                "tab_name": "Data",
                "schema": [{"name": "day", "type": "DATE"}],
                "date_column": "day"
            }),
        )
        .unwrap();

        for config in [wrapped, bare] {
            let SourceConfig::GoogleSheet(sheet) = config else {
                panic!("expected sheet config");
            };
            let schema = sheet.table_schema();
            assert_eq!(schema.columns[0].column_type, ColumnType::Date);
            assert_eq!(schema.partition_column.as_deref(), Some("day"));
        }
    }

    #[test]
    fn date_column_nested_in_schema_sets_the_partition() {
        let parse = |config: serde_json::Value| {
            let SourceConfig::GoogleSheet(sheet) =
                SourceConfig::parse(SourceType::GoogleSheet, &config).unwrap()
            else {
                panic!("expected sheet config");
            };
            sheet.table_schema().partition_column
        };

        let nested = parse(json!({
            "sheet_id": "abc",
            "tab_name": "Data",
            "schema": {"columns": [{"name": "day", "type": "DATE"}], "date_column": "day"}
        }));
        assert_eq!(nested.as_deref(), Some("day"));

        let both = parse(json!({
            "sheet_id": "abc",
            "tab_name": "Data",
            "schema": {
                "columns": [{"name": "day", "type": "DATE"}, {"name": "booked", "type": "DATE"}],
                "date_column": "day"
            },
            "date_column": "booked"
        }));
        assert_eq!(both.as_deref(), Some("booked"));
    }

    #[test]
    fn source_type_tags_round_trip() {
        for tag in ["FACEBOOK_ADS", "GOOGLE_ADS", "GOOGLE_SHEET", "CSV"] {
            assert_eq!(tag.parse::<SourceType>().unwrap().as_str(), tag);
        }
        assert!("TIKTOK_ADS".parse::<SourceType>().is_err());
    }
}
