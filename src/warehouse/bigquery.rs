//! BigQuery backend: REST v2 table creation and multipart NDJSON load jobs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use super::{
    EnsureOutcome, Row, TableRef, TableSchema, Warehouse, WarehouseError, WritePolicy,
    creation_schema,
};
use crate::config::WarehouseConfig;
use crate::service_account::AccessTokenProvider;

pub struct BigQueryWarehouse {
    project_id: String,
    api_base: String,
    upload_base: String,
    location: Option<String>,
    poll_interval: Duration,
    job_deadline: Duration,
    tokens: Arc<dyn AccessTokenProvider>,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobResource {
    job_reference: JobReference,
    #[serde(default)]
    status: JobStatus,
    #[serde(default)]
    statistics: Option<JobStatistics>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatus {
    #[serde(default)]
    state: String,
    #[serde(default)]
    error_result: Option<ErrorProto>,
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct JobStatistics {
    #[serde(default)]
    load: Option<LoadStatistics>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoadStatistics {
    /// int64 values are encoded as strings in the REST API.
    #[serde(default)]
    output_rows: Option<String>,
}

impl BigQueryWarehouse {
    pub fn new(
        config: &WarehouseConfig,
        tokens: Arc<dyn AccessTokenProvider>,
    ) -> Result<Self, WarehouseError> {
        let project_id = config
            .project_id
            .clone()
            .ok_or(WarehouseError::NotConfigured)?;
        Ok(Self {
            project_id,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            upload_base: config.upload_base.trim_end_matches('/').to_string(),
            location: config.location.clone(),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            job_deadline: Duration::from_secs(config.job_deadline_seconds),
            tokens,
            http: reqwest::Client::new(),
        })
    }

    fn tables_url(&self, dataset: &str) -> String {
        format!(
            "{}/bigquery/v2/projects/{}/datasets/{}/tables",
            self.api_base, self.project_id, dataset
        )
    }

    fn table_resource(&self, target: &TableRef, schema: &TableSchema) -> Value {
        let fields: Vec<Value> = schema
            .columns
            .iter()
            .map(|c| {
                json!({
                    "name": c.name,
                    "type": c.column_type.as_str(),
                    "mode": c.mode,
                })
            })
            .collect();

        let mut resource = json!({
            "tableReference": {
                "projectId": self.project_id,
                "datasetId": target.dataset,
                "tableId": target.table,
            },
            "schema": { "fields": fields },
        });
        if let Some(partition) = schema.resolved_partition() {
            resource["timePartitioning"] = json!({"type": "DAY", "field": partition.name});
        }
        resource
    }

    fn load_configuration(&self, target: &TableRef, policy: WritePolicy, job_id: &str) -> Value {
        let write_disposition = match policy {
            WritePolicy::Replace => "WRITE_TRUNCATE",
            WritePolicy::Append => "WRITE_APPEND",
        };
        let mut job_reference = json!({"projectId": self.project_id, "jobId": job_id});
        if let Some(location) = &self.location {
            job_reference["location"] = json!(location);
        }
        json!({
            "jobReference": job_reference,
            "configuration": {
                "load": {
                    "destinationTable": {
                        "projectId": self.project_id,
                        "datasetId": target.dataset,
                        "tableId": target.table,
                    },
                    "sourceFormat": "NEWLINE_DELIMITED_JSON",
                    "writeDisposition": write_disposition,
                    "createDisposition": "CREATE_NEVER",
                }
            }
        })
    }

    async fn wait_for_job(&self, mut job: JobResource) -> Result<u64, WarehouseError> {
        let deadline = tokio::time::Instant::now() + self.job_deadline;
        while job.status.state != "DONE" {
            if tokio::time::Instant::now() >= deadline {
                return Err(WarehouseError::JobTimeout {
                    job_id: job.job_reference.job_id,
                    seconds: self.job_deadline.as_secs(),
                });
            }
            tokio::time::sleep(self.poll_interval).await;

            let url = format!(
                "{}/bigquery/v2/projects/{}/jobs/{}",
                self.api_base, self.project_id, job.job_reference.job_id
            );
            let mut request = self
                .http
                .get(&url)
                .bearer_auth(self.tokens.access_token().await?);
            if let Some(location) = job.job_reference.location.as_deref() {
                request = request.query(&[("location", location)]);
            }
            let response = request.send().await?;
            job = parse_response(response).await?;
        }

        if let Some(error) = job.status.error_result {
            return Err(WarehouseError::JobFailed {
                job_id: job.job_reference.job_id,
                message: error.message,
            });
        }

        Ok(job
            .statistics
            .and_then(|s| s.load)
            .and_then(|l| l.output_rows)
            .and_then(|rows| rows.parse().ok())
            .unwrap_or_default())
    }
}

#[async_trait]
impl Warehouse for BigQueryWarehouse {
    async fn ensure_table(
        &self,
        target: &TableRef,
        schema_hint: Option<&TableSchema>,
        sample: Option<&Row>,
    ) -> Result<EnsureOutcome, WarehouseError> {
        let token = self.tokens.access_token().await?;
        let table_url = format!("{}/{}", self.tables_url(&target.dataset), target.table);

        let existing = self.http.get(&table_url).bearer_auth(&token).send().await?;
        match existing.status() {
            status if status.is_success() => return Ok(EnsureOutcome::Existing),
            StatusCode::NOT_FOUND => {}
            _ => return Err(api_error(existing).await),
        }

        let schema = creation_schema(target, schema_hint, sample)?;
        let created = self
            .http
            .post(self.tables_url(&target.dataset))
            .bearer_auth(&token)
            .json(&self.table_resource(target, &schema))
            .send()
            .await?;

        match created.status() {
            status if status.is_success() => {
                tracing::info!(
                    table = %target,
                    columns = schema.columns.len(),
                    partition = ?schema.resolved_partition().map(|c| c.name.as_str()),
                    "Created warehouse table"
                );
                Ok(EnsureOutcome::Created)
            }
            StatusCode::CONFLICT => Ok(EnsureOutcome::Existing),
            _ => Err(api_error(created).await),
        }
    }

    async fn load(
        &self,
        target: &TableRef,
        rows: &[Row],
        policy: WritePolicy,
    ) -> Result<u64, WarehouseError> {
        let job_id = format!("adsync_{}", Uuid::new_v4().simple());
        let boundary = format!("adsync_{}", Uuid::new_v4().simple());

        let mut body = String::new();
        body.push_str(&format!(
            "--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{}\r\n",
            self.load_configuration(target, policy, &job_id)
        ));
        body.push_str(&format!(
            "--{boundary}\r\nContent-Type: application/octet-stream\r\n\r\n"
        ));
        for row in rows {
            body.push_str(&serde_json::to_string(row)?);
            body.push('\n');
        }
        body.push_str(&format!("\r\n--{boundary}--\r\n"));

        let response = self
            .http
            .post(format!(
                "{}/bigquery/v2/projects/{}/jobs",
                self.upload_base, self.project_id
            ))
            .query(&[("uploadType", "multipart")])
            .bearer_auth(self.tokens.access_token().await?)
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={boundary}"),
            )
            .body(body)
            .send()
            .await?;

        let job = parse_response(response).await?;
        tracing::debug!(table = %target, job_id = %job.job_reference.job_id, "Load job submitted");
        self.wait_for_job(job).await
    }
}

async fn parse_response(response: reqwest::Response) -> Result<JobResource, WarehouseError> {
    if !response.status().is_success() {
        return Err(api_error(response).await);
    }
    Ok(response.json().await?)
}

async fn api_error(response: reqwest::Response) -> WarehouseError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or(body);
    WarehouseError::Api { status, message }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service_account::StaticTokenProvider;
    use crate::warehouse::{ColumnSpec, ColumnType};

    fn warehouse() -> BigQueryWarehouse {
        let config = WarehouseConfig {
            project_id: Some("proj".to_string()),
            location: Some("EU".to_string()),
            ..WarehouseConfig::default()
        };
        BigQueryWarehouse::new(&config, Arc::new(StaticTokenProvider::new("t", None))).unwrap()
    }

    #[test]
    fn table_resource_partitions_on_temporal_hint() {
        let schema = TableSchema::new(vec![
            ColumnSpec::new("day", ColumnType::Date),
            ColumnSpec::new("spend", ColumnType::Float),
        ])
        .with_partition_column("day");

        let resource = warehouse().table_resource(&TableRef::new("ds", "t"), &schema);
        assert_eq!(resource["timePartitioning"]["field"], "day");
        assert_eq!(resource["schema"]["fields"][1]["type"], "FLOAT");
    }

    #[test]
    fn string_partition_column_is_dropped() {
        let schema = TableSchema::new(vec![ColumnSpec::new("day", ColumnType::String)])
            .with_partition_column("day");

        let resource = warehouse().table_resource(&TableRef::new("ds", "t"), &schema);
        assert!(resource.get("timePartitioning").is_none());
    }

    #[test]
    fn write_policy_maps_to_disposition() {
        let bq = warehouse();
        let target = TableRef::new("ds", "t");
        let replace = bq.load_configuration(&target, WritePolicy::Replace, "j1");
        let append = bq.load_configuration(&target, WritePolicy::Append, "j2");

        assert_eq!(
            replace["configuration"]["load"]["writeDisposition"],
            "WRITE_TRUNCATE"
        );
        assert_eq!(append["configuration"]["load"]["writeDisposition"], "WRITE_APPEND");
        assert_eq!(append["jobReference"]["location"], "EU");
    }

    #[test]
    fn missing_project_is_not_configured() {
        let result = BigQueryWarehouse::new(
            &WarehouseConfig::default(),
            Arc::new(StaticTokenProvider::new("t", None)),
        );
        assert!(matches!(result, Err(WarehouseError::NotConfigured)));
    }
}
