//! Warehouse table schemas: explicit column lists and name-based inference.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::Row;

/// Column types understood by the loader, named the way BigQuery names them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ColumnType {
    #[default]
    String,
    Integer,
    Float,
    Numeric,
    Boolean,
    Date,
    Datetime,
    Timestamp,
    Time,
    Json,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::String => "STRING",
            ColumnType::Integer => "INTEGER",
            ColumnType::Float => "FLOAT",
            ColumnType::Numeric => "NUMERIC",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Date => "DATE",
            ColumnType::Datetime => "DATETIME",
            ColumnType::Timestamp => "TIMESTAMP",
            ColumnType::Time => "TIME",
            ColumnType::Json => "JSON",
        }
    }

    /// Types that can back day-granularity time partitioning.
    pub fn is_temporal(&self) -> bool {
        matches!(
            self,
            ColumnType::Date | ColumnType::Datetime | ColumnType::Timestamp
        )
    }
}

impl FromStr for ColumnType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "STRING" => Ok(ColumnType::String),
            "INTEGER" | "INT64" => Ok(ColumnType::Integer),
            "FLOAT" | "FLOAT64" => Ok(ColumnType::Float),
            "NUMERIC" | "BIGNUMERIC" => Ok(ColumnType::Numeric),
            "BOOLEAN" | "BOOL" => Ok(ColumnType::Boolean),
            "DATE" => Ok(ColumnType::Date),
            "DATETIME" => Ok(ColumnType::Datetime),
            "TIMESTAMP" => Ok(ColumnType::Timestamp),
            "TIME" => Ok(ColumnType::Time),
            "JSON" => Ok(ColumnType::Json),
            other => Err(format!("unknown column type '{other}'")),
        }
    }
}

impl TryFrom<String> for ColumnType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ColumnType> for String {
    fn from(value: ColumnType) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColumnMode {
    #[default]
    #[serde(alias = "nullable")]
    Nullable,
    #[serde(alias = "required")]
    Required,
    #[serde(alias = "repeated")]
    Repeated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type", default)]
    pub column_type: ColumnType,
    #[serde(default)]
    pub mode: ColumnMode,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            mode: ColumnMode::Nullable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TableSchema {
    pub columns: Vec<ColumnSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_column: Option<String>,
}

const INTEGER_FIELDS: &[&str] = &[
    "impressions",
    "clicks",
    "reach",
    "interactions",
    "conversions",
    "unique_clicks",
    "inline_link_clicks",
    "video_plays",
    "video_views",
];

const FLOAT_FIELDS: &[&str] = &[
    "spend",
    "cpc",
    "cpm",
    "ctr",
    "cpp",
    "cost",
    "frequency",
    "conversions_value",
    "all_conversions",
    "all_conversions_value",
];

const DATE_FIELDS: &[&str] = &["date_start", "date_stop", "date"];

/// Preferred partitioning columns for inferred schemas, in priority order.
const PARTITION_CANDIDATES: &[&str] = &["date_start", "segments_date", "date"];

/// Looks a field name up in the type table; unknown names are strings.
pub fn infer_column_type(name: &str) -> ColumnType {
    let lowered = name.to_ascii_lowercase();
    let base = lowered
        .strip_prefix("metrics_")
        .or_else(|| lowered.strip_prefix("segments_"))
        .unwrap_or(lowered.as_str());

    if DATE_FIELDS.contains(&base) || base.ends_with("_date") {
        ColumnType::Date
    } else if INTEGER_FIELDS.contains(&base)
        || base.ends_with("_count")
        || (base.starts_with("video_") && base.ends_with("_watched_actions"))
    {
        ColumnType::Integer
    } else if FLOAT_FIELDS.contains(&base)
        || base.starts_with("cost_per_")
        || base.starts_with("average_")
        || base.ends_with("_rate")
    {
        ColumnType::Float
    } else {
        ColumnType::String
    }
}

impl TableSchema {
    pub fn new(columns: Vec<ColumnSpec>) -> Self {
        Self {
            columns,
            partition_column: None,
        }
    }

    pub fn with_partition_column(mut self, column: impl Into<String>) -> Self {
        self.partition_column = Some(column.into());
        self
    }

    /// Builds a schema from the field names of one sample row.
    pub fn infer_from_row(row: &Row) -> Self {
        let columns: Vec<ColumnSpec> = row
            .keys()
            .map(|name| ColumnSpec::new(name.clone(), infer_column_type(name)))
            .collect();

        let partition_column = PARTITION_CANDIDATES
            .iter()
            .find(|candidate| {
                columns
                    .iter()
                    .any(|c| c.name == **candidate && c.column_type.is_temporal())
            })
            .map(|candidate| candidate.to_string());

        Self {
            columns,
            partition_column,
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Partitioning column to apply at creation, if it exists and has a date/time type.
    pub fn resolved_partition(&self) -> Option<&ColumnSpec> {
        let name = self.partition_column.as_deref()?;
        match self.column(name) {
            Some(column) if column.column_type.is_temporal() => Some(column),
            Some(column) => {
                tracing::warn!(
                    column = %name,
                    column_type = column.column_type.as_str(),
                    "Partition column is not a date/time type; creating table without partitioning"
                );
                None
            }
            None => {
                tracing::warn!(
                    column = %name,
                    "Partition column is not part of the schema; creating table without partitioning"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: serde_json::Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn ad_insight_row_infers_integer_date_and_partition() {
        let schema =
            TableSchema::infer_from_row(&row(json!({"impressions": 120, "date_start": "2024-01-01"})));

        assert_eq!(
            schema.column("impressions").map(|c| c.column_type),
            Some(ColumnType::Integer)
        );
        assert_eq!(
            schema.column("date_start").map(|c| c.column_type),
            Some(ColumnType::Date)
        );
        assert_eq!(schema.partition_column.as_deref(), Some("date_start"));
        assert_eq!(
            schema.resolved_partition().map(|c| c.name.as_str()),
            Some("date_start")
        );
    }

    #[test]
    fn flattened_query_fields_use_base_name() {
        assert_eq!(infer_column_type("metrics_clicks"), ColumnType::Integer);
        assert_eq!(infer_column_type("metrics_cost"), ColumnType::Float);
        assert_eq!(infer_column_type("metrics_average_cpc"), ColumnType::Float);
        assert_eq!(infer_column_type("segments_date"), ColumnType::Date);
        assert_eq!(infer_column_type("campaign_name"), ColumnType::String);
        assert_eq!(infer_column_type("campaign_id"), ColumnType::String);
    }

    #[test]
    fn conversions_and_video_watch_counts_are_integers() {
        assert_eq!(infer_column_type("conversions"), ColumnType::Integer);
        assert_eq!(infer_column_type("metrics_conversions"), ColumnType::Integer);
        assert_eq!(infer_column_type("video_30_sec_watched_actions"), ColumnType::Integer);
        assert_eq!(infer_column_type("video_p75_watched_actions"), ColumnType::Integer);
        assert_eq!(infer_column_type("conversions_value"), ColumnType::Float);
    }

    #[test]
    fn unknown_fields_default_to_string_without_partition() {
        let schema = TableSchema::infer_from_row(&row(json!({"campaign": "spring", "notes": 3})));
        assert!(schema.columns.iter().all(|c| c.column_type == ColumnType::String));
        assert!(schema.partition_column.is_none());
    }

    #[test]
    fn non_temporal_partition_column_is_skipped() {
        let schema = TableSchema::new(vec![
            ColumnSpec::new("day", ColumnType::String),
            ColumnSpec::new("spend", ColumnType::Float),
        ])
        .with_partition_column("day");

        assert!(schema.resolved_partition().is_none());
    }

    #[test]
    fn column_specs_accept_lowercase_and_aliases() {
        let spec: ColumnSpec =
            serde_json::from_value(json!({"name": "spend", "type": "float64", "mode": "required"}))
                .unwrap();
        assert_eq!(spec.column_type, ColumnType::Float);
        assert_eq!(spec.mode, ColumnMode::Required);

        let defaulted: ColumnSpec = serde_json::from_value(json!({"name": "label"})).unwrap();
        assert_eq!(defaulted.column_type, ColumnType::String);
        assert_eq!(defaulted.mode, ColumnMode::Nullable);

        assert!(serde_json::from_value::<ColumnSpec>(json!({"name": "x", "type": "blob"})).is_err());
    }
}
