//! Sync Executor
//!
//! Runs one sync attempt for one connection: claim the connection, open an execution record,
//! resolve the adapter, refresh the delegated credential if needed, fetch with retry, load into
//! the warehouse, then finalize the record and release the connection.
//!
//! Steps between claim and release run in their own task under a hard time limit, so a panic or
//! a hung provider call still ends in a FAILED record and a released connection.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use metrics::{counter, gauge, histogram};
use sea_orm::{DatabaseConnection, DbErr};
use tracing::{Instrument, debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::credential_store::CredentialStore;
use crate::error::SyncError;
use crate::models::connection::Model as ConnectionModel;
use crate::models::execution::Model as ExecutionModel;
use crate::models::{ExecutionStatus, SourceConfig, TriggerSource};
use crate::repositories::{ConnectionRepository, ExecutionOutcome, ExecutionRepository};
use crate::sources::{AdapterRegistry, FetchRequest, RetryEvent, RetryPolicy, with_retry};
use crate::warehouse::{TableRef, Warehouse};

/// Configuration for the sync executor
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Hard ceiling for one attempt, adapter and warehouse calls included
    pub max_run: Duration,
    /// In-attempt retry for `fetch_records`
    pub retry: RetryPolicy,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_run: Duration::from_secs(1_800),
            retry: RetryPolicy::default(),
        }
    }
}

impl From<&SyncConfig> for ExecutorConfig {
    fn from(config: &SyncConfig) -> Self {
        Self {
            max_run: Duration::from_secs(config.max_run_seconds),
            retry: RetryPolicy::new(
                config.retry_max_attempts,
                Duration::from_millis(config.retry_base_delay_ms),
            ),
        }
    }
}

type RetryObserver = Arc<dyn Fn(&RetryEvent) + Send + Sync>;

/// Sync executor; cheap to clone, every field is shared.
#[derive(Clone)]
pub struct SyncExecutor {
    connections: ConnectionRepository,
    executions: ExecutionRepository,
    credentials: Arc<CredentialStore>,
    registry: Arc<AdapterRegistry>,
    warehouse: Arc<dyn Warehouse>,
    config: ExecutorConfig,
    retry_observer: Option<RetryObserver>,
}

/// What a completed fetch-and-load produced.
struct AttemptSummary {
    fetched: usize,
    loaded: u64,
}

impl SyncExecutor {
    pub fn new(
        db: DatabaseConnection,
        credentials: Arc<CredentialStore>,
        registry: Arc<AdapterRegistry>,
        warehouse: Arc<dyn Warehouse>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            connections: ConnectionRepository::new(db.clone()),
            executions: ExecutionRepository::new(db),
            credentials,
            registry,
            warehouse,
            config,
            retry_observer: None,
        }
    }

    /// Registers a callback invoked before every fetch retry delay.
    pub fn with_retry_observer(mut self, observer: RetryObserver) -> Self {
        self.retry_observer = Some(observer);
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Startup recovery: a previous process that died mid-attempt leaves RUNNING records and
    /// SYNCING connections behind. Must run before any worker starts.
    pub async fn recover_interrupted(&self) -> Result<(u64, u64), DbErr> {
        let now = Utc::now();
        let records = self.executions.fail_abandoned(now).await?;
        let connections = self.connections.reset_stuck_syncing(now).await?;
        if records > 0 || connections > 0 {
            warn!(records, connections, "Recovered attempts interrupted by a previous shutdown");
        }
        Ok((records, connections))
    }

    /// Executes one attempt and returns its finalized record.
    ///
    /// Returns `Ok(None)` without recording anything when the connection is missing, disabled
    /// or already syncing. Attempt failures are captured in the record; only storage errors
    /// around the record itself are returned as `Err`.
    #[instrument(skip_all, fields(connection_id = %connection_id, trigger = %trigger))]
    pub async fn execute(
        &self,
        connection_id: Uuid,
        trigger: TriggerSource,
        triggered_by: Option<String>,
    ) -> Result<Option<ExecutionModel>, DbErr> {
        let Some(connection) = self.connections.find_by_id(connection_id).await? else {
            debug!("Connection no longer exists; nothing to run");
            return Ok(None);
        };
        if !connection.is_enabled {
            info!("Connection is disabled; skipping sync");
            counter!("sync_skipped_total", "reason" => "disabled").increment(1);
            return Ok(None);
        }

        let started = Utc::now();
        if !self.connections.try_claim(connection_id, started).await? {
            info!("Connection is already syncing or was disabled; skipping sync");
            counter!("sync_skipped_total", "reason" => "already_syncing").increment(1);
            return Ok(None);
        }

        let record = match self
            .executions
            .start(&connection, trigger, triggered_by, started)
            .await
        {
            Ok(record) => record,
            Err(e) => {
                self.connections
                    .release(connection_id, false, Utc::now())
                    .await?;
                return Err(e);
            }
        };

        gauge!("syncs_in_flight").increment(1.0);
        let _in_flight = scopeguard::guard((), |_| gauge!("syncs_in_flight").decrement(1.0));

        let timer = Instant::now();
        let source_type = connection.source_type.clone();
        let outcome = self.run_guarded(connection).await;
        let elapsed = timer.elapsed();

        let succeeded = outcome.status == ExecutionStatus::Success;
        let finished = Utc::now();
        let finalized = self.executions.finalize(record.id, &outcome, finished).await;
        let released = self
            .connections
            .release(connection_id, succeeded, finished)
            .await;

        let status = outcome.status.as_str();
        counter!("sync_executions_total", "status" => status, "source_type" => source_type.clone())
            .increment(1);
        histogram!("sync_attempt_duration_seconds", "source_type" => source_type)
            .record(elapsed.as_secs_f64());

        if succeeded {
            info!(
                execution_id = %record.id,
                rows = outcome.row_count,
                elapsed_ms = elapsed.as_millis() as u64,
                "Sync attempt succeeded"
            );
        } else {
            warn!(
                execution_id = %record.id,
                message = %outcome.message,
                elapsed_ms = elapsed.as_millis() as u64,
                "Sync attempt failed"
            );
        }

        if !finalized? {
            warn!(execution_id = %record.id, "Execution record was already finalized");
        }
        released?;

        self.executions.find_by_id(record.id).await
    }

    /// Runs the attempt in its own task so panics and the time ceiling are contained.
    async fn run_guarded(&self, connection: ConnectionModel) -> ExecutionOutcome {
        let this = self.clone();
        let mut handle = tokio::spawn(
            async move { this.run_attempt(&connection).await }.instrument(tracing::Span::current()),
        );

        match tokio::time::timeout(self.config.max_run, &mut handle).await {
            Ok(Ok(Ok(summary))) => {
                counter!("sync_rows_loaded_total").increment(summary.loaded);
                if summary.fetched == 0 {
                    ExecutionOutcome::success(
                        "Successfully connected, but no data returned for the period.",
                        0,
                    )
                } else {
                    ExecutionOutcome::success(
                        format!("Successfully fetched and loaded {} rows.", summary.loaded),
                        i64::try_from(summary.loaded).unwrap_or(i64::MAX),
                    )
                }
            }
            Ok(Ok(Err(err))) => {
                counter!("sync_failures_total", "kind" => err.kind_label()).increment(1);
                ExecutionOutcome::failed(err.to_string())
            }
            Ok(Err(join_error)) => {
                error!(error = %join_error, "Sync attempt task aborted");
                counter!("sync_failures_total", "kind" => "internal").increment(1);
                ExecutionOutcome::failed(
                    SyncError::internal("sync attempt aborted unexpectedly").to_string(),
                )
            }
            Err(_) => {
                handle.abort();
                counter!("sync_failures_total", "kind" => "timeout").increment(1);
                ExecutionOutcome::failed(
                    SyncError::internal(format!(
                        "sync attempt timed out after {}s",
                        self.config.max_run.as_secs()
                    ))
                    .to_string(),
                )
            }
        }
    }

    async fn run_attempt(&self, connection: &ConnectionModel) -> Result<AttemptSummary, SyncError> {
        let source_type = connection
            .parsed_source_type()
            .map_err(|e| SyncError::configuration(e.to_string()))?;
        let adapter = self.registry.get(source_type)?;
        let config = SourceConfig::parse(source_type, &connection.config)
            .map_err(|e| SyncError::configuration(e.to_string()))?;

        let access_token = if source_type.requires_delegated_auth() {
            let identity = connection.linked_identity.as_deref().ok_or_else(|| {
                SyncError::configuration(
                    "linked_identity: connection is not linked to an authorized account",
                )
            })?;
            let credential = self.credentials.get_fresh(identity, Utc::now()).await?;
            Some(credential.access_token)
        } else {
            None
        };

        let request = FetchRequest {
            config,
            access_token,
        };
        let rows = with_retry(
            &self.config.retry,
            |attempt| {
                debug!(attempt, "Fetching records");
                adapter.fetch_records(&request)
            },
            |event| {
                if let Some(observer) = &self.retry_observer {
                    observer(event);
                }
            },
        )
        .await?;

        if rows.is_empty() {
            return Ok(AttemptSummary {
                fetched: 0,
                loaded: 0,
            });
        }

        let plan = adapter.load_plan(&request.config);
        let target = TableRef::new(&connection.target_dataset, &connection.target_table);
        let ensured = self
            .warehouse
            .ensure_table(&target, plan.schema_hint.as_ref(), rows.first())
            .await?;
        debug!(table = %target, outcome = ?ensured, "Warehouse table ready");

        let loaded = self
            .warehouse
            .load(&target, &rows, plan.write_policy)
            .await?;

        Ok(AttemptSummary {
            fetched: rows.len(),
            loaded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;

    #[test]
    fn executor_config_follows_sync_settings() {
        let config = ExecutorConfig::from(&SyncConfig {
            max_run_seconds: 120,
            retry_max_attempts: 4,
            retry_base_delay_ms: 250,
        });
        assert_eq!(config.max_run, Duration::from_secs(120));
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.retry.base_delay, Duration::from_millis(250));
    }

    #[test]
    fn default_retry_matches_three_attempts_five_seconds() {
        let config = ExecutorConfig::default();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay, Duration::from_secs(5));
    }
}
