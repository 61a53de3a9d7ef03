//! Shared fixtures for integration tests: an in-memory SQLite database with migrations applied,
//! connection builders, and a scripted source adapter.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use adsync::config::OAuthClientConfig;
use adsync::credential_store::CredentialStore;
use adsync::crypto::CryptoKey;
use adsync::error::SyncError;
use adsync::models::connection::Model as ConnectionModel;
use adsync::models::{ConnectionStatus, SourceConfig, SourceType};
use adsync::repositories::{ConnectionRepository, NewConnection};
use adsync::sources::{AdapterRegistry, FetchRequest, LoadPlan, RetryPolicy, SourceAdapter};
use adsync::sync_executor::{ExecutorConfig, SyncExecutor};
use adsync::warehouse::memory::MemoryWarehouse;
use adsync::warehouse::{Row, WritePolicy};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, Statement};
use serde_json::{Value, json};

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;

    db.execute(Statement::from_string(
        db.get_database_backend(),
        "PRAGMA foreign_keys = OFF".to_string(),
    ))
    .await?;

    Ok(db)
}

pub fn test_crypto_key() -> CryptoKey {
    CryptoKey::new(vec![42u8; 32]).expect("32-byte key")
}

/// Credential store whose `google` client refreshes against `token_url`.
pub fn credential_store(db: DatabaseConnection, token_url: &str) -> CredentialStore {
    let client = OAuthClientConfig {
        client_id: Some("client-id".to_string()),
        client_secret: Some("client-secret".to_string()),
        token_url: token_url.to_string(),
    };
    CredentialStore::new(
        db,
        test_crypto_key(),
        HashMap::from([("google".to_string(), client)]),
    )
    .expect("credential store builds")
}

pub fn facebook_config() -> Value {
    json!({
        "ad_account_id": "123",
        "level": "campaign",
        "fields": ["campaign_name", "impressions", "spend"],
        "date_preset": "yesterday",
        "time_increment": "1"
    })
}

pub fn sheet_config() -> Value {
    json!({
        "sheet_id": "sheet-1",
        "tab_name": "Data",
        "schema": [
            {"name": "day", "type": "DATE"},
            {"name": "campaign", "type": "STRING"},
            {"name": "spend", "type": "FLOAT"}
        ],
        "date_column": "day"
    })
}

pub fn daily_at(hour: &str, minute: &str) -> Value {
    json!({"frequency": "daily", "hour": hour, "minute": minute})
}

/// Builder for connection fixtures with sensible defaults.
pub struct ConnectionFixture {
    new: NewConnection,
}

impl ConnectionFixture {
    pub fn new(source_type: SourceType) -> Self {
        let config = match source_type {
            SourceType::GoogleSheet => sheet_config(),
            _ => facebook_config(),
        };
        Self {
            new: NewConnection {
                owner_ref: "owner-1".to_string(),
                source_type,
                display_name: format!("{source_type} test"),
                target_dataset: "marketing".to_string(),
                target_table: "daily_spend".to_string(),
                config,
                schedule: daily_at("09", "00"),
                linked_identity: Some("user@example.com".to_string()),
                is_enabled: true,
                status: ConnectionStatus::Active,
                last_sync_time: None,
            },
        }
    }

    pub fn schedule(mut self, schedule: Value) -> Self {
        self.new.schedule = schedule;
        self
    }

    pub fn config(mut self, config: Value) -> Self {
        self.new.config = config;
        self
    }

    pub fn status(mut self, status: ConnectionStatus) -> Self {
        self.new.status = status;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.new.is_enabled = enabled;
        self
    }

    pub fn last_sync(mut self, at: DateTime<Utc>) -> Self {
        self.new.last_sync_time = Some(at);
        self
    }

    pub fn linked_identity(mut self, identity: Option<&str>) -> Self {
        self.new.linked_identity = identity.map(str::to_string);
        self
    }

    pub fn table(mut self, dataset: &str, table: &str) -> Self {
        self.new.target_dataset = dataset.to_string();
        self.new.target_table = table.to_string();
        self
    }

    pub async fn insert(self, db: &DatabaseConnection) -> Result<ConnectionModel> {
        Ok(ConnectionRepository::new(db.clone()).insert(self.new).await?)
    }
}

/// Inserts a connection whose source-type tag has no adapter model (e.g. `CSV`).
pub async fn insert_raw_source_connection(
    db: &DatabaseConnection,
    source_type: &str,
) -> Result<ConnectionModel> {
    let model = ConnectionFixture::new(SourceType::FacebookAds).insert(db).await?;
    db.execute(Statement::from_sql_and_values(
        db.get_database_backend(),
        "UPDATE connections SET source_type = ? WHERE id = ?",
        [source_type.into(), model.id.into()],
    ))
    .await?;
    Ok(ConnectionRepository::new(db.clone())
        .find_by_id(model.id)
        .await?
        .expect("connection exists"))
}

/// What a scripted fetch returns.
pub enum Step {
    Rows(Vec<Row>),
    Fail(SyncError),
    Sleep(Duration),
    Panic,
}

/// Adapter that replays a script of fetch outcomes and records what it was asked.
pub struct ScriptedAdapter {
    source_type: SourceType,
    write_policy: WritePolicy,
    script: Mutex<VecDeque<Step>>,
    pub calls: Mutex<Vec<Option<String>>>,
}

impl ScriptedAdapter {
    pub fn new(source_type: SourceType, steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            source_type,
            write_policy: WritePolicy::Append,
            script: Mutex::new(steps.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn tokens_seen(&self) -> Vec<Option<String>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SourceAdapter for ScriptedAdapter {
    fn source_type(&self) -> SourceType {
        self.source_type
    }

    async fn fetch_records(&self, request: &FetchRequest) -> Result<Vec<Row>, SyncError> {
        self.calls
            .lock()
            .unwrap()
            .push(request.access_token.clone());
        let step = self.script.lock().unwrap().pop_front();
        match step {
            Some(Step::Rows(rows)) => Ok(rows),
            Some(Step::Fail(err)) => Err(err),
            Some(Step::Sleep(duration)) => {
                tokio::time::sleep(duration).await;
                Ok(Vec::new())
            }
            Some(Step::Panic) => panic!("scripted adapter panic"),
            None => Ok(Vec::new()),
        }
    }

    fn load_plan(&self, config: &SourceConfig) -> LoadPlan {
        let schema_hint = match config {
            SourceConfig::GoogleSheet(sheet) => Some(sheet.table_schema()),
            _ => None,
        };
        LoadPlan {
            write_policy: self.write_policy,
            schema_hint,
        }
    }
}

pub fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        other => panic!("row fixture must be an object, got {other}"),
    }
}

/// Millisecond retry delays so retry paths run quickly.
pub fn fast_config() -> ExecutorConfig {
    ExecutorConfig {
        max_run: Duration::from_secs(30),
        retry: RetryPolicy::new(3, Duration::from_millis(5)),
    }
}

/// Executor over the given adapter and an in-memory warehouse.
pub fn executor_with(
    db: &DatabaseConnection,
    adapter: Arc<dyn SourceAdapter>,
    warehouse: Arc<MemoryWarehouse>,
    token_url: &str,
) -> SyncExecutor {
    executor_with_config(db, adapter, warehouse, token_url, fast_config())
}

pub fn executor_with_config(
    db: &DatabaseConnection,
    adapter: Arc<dyn SourceAdapter>,
    warehouse: Arc<MemoryWarehouse>,
    token_url: &str,
    config: ExecutorConfig,
) -> SyncExecutor {
    let mut registry = AdapterRegistry::new();
    registry.register(adapter);
    SyncExecutor::new(
        db.clone(),
        Arc::new(credential_store(db.clone(), token_url)),
        Arc::new(registry),
        warehouse,
        config,
    )
}
