//! # adsync
//!
//! Command-line entry point: the long-running matcher service plus one-shot maintenance commands.

use std::sync::Arc;

use adsync::config::{AppConfig, ConfigLoader};
use adsync::credential_store::CredentialStore;
use adsync::crypto::CryptoKey;
use adsync::db;
use adsync::dispatch::{self, WorkerPool};
use adsync::models::SourceType;
use adsync::repositories::{ConnectionRepository, ExecutionRepository};
use adsync::scheduler::ScheduleMatcher;
use adsync::service_account::{self, AccessTokenProvider};
use adsync::sources::{AdapterRegistry, GoogleSheetsAdapter};
use adsync::sync_executor::{ExecutorConfig, SyncExecutor};
use adsync::telemetry;
use adsync::warehouse::bigquery::BigQueryWarehouse;
use anyhow::{Context, Result, anyhow, bail};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "adsync", version, about = "Scheduled ad-platform to warehouse sync engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the schedule matcher and worker pool until interrupted
    Serve,
    /// Evaluate schedules once and wait for the dispatched syncs to finish
    Tick,
    /// Run one connection now and print its execution record
    RunNow {
        connection_id: Uuid,
        /// Who requested the run, recorded on the execution record
        #[arg(long)]
        actor: Option<String>,
    },
    /// Apply pending database migrations
    Migrate,
    /// Report whether the service identity can write to a spreadsheet
    CheckSheetAccess { sheet_id: String },
    /// List the ad accounts a linked identity can reach
    ListAccounts {
        /// FACEBOOK_ADS or GOOGLE_ADS
        #[arg(long)]
        source: String,
        #[arg(long)]
        identity: String,
    },
    /// Store a delegated credential obtained outside this tool
    StoreCredential {
        #[arg(long)]
        identity: String,
        /// OAuth client name: google or facebook
        #[arg(long)]
        provider: String,
        #[arg(long, env = "ADSYNC_ACCESS_TOKEN", hide_env_values = true)]
        access_token: String,
        #[arg(long, env = "ADSYNC_REFRESH_TOKEN", hide_env_values = true)]
        refresh_token: Option<String>,
        /// Access token lifetime in seconds
        #[arg(long)]
        expires_in: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ConfigLoader::new()
        .load()
        .context("loading configuration")?;
    telemetry::init_tracing(&config).context("initializing telemetry")?;

    if let Ok(redacted) = config.redacted_json() {
        info!(profile = %config.profile, config = %redacted, "Loaded configuration");
    }

    let db = db::init_pool(&config)
        .await
        .context("initializing database connection pool")?;

    match cli.command {
        Command::Migrate => {
            db::run_migrations(&db).await?;
            info!("Migrations applied");
        }
        Command::Serve => serve(&config, db).await?,
        Command::Tick => tick_once(&config, db).await?,
        Command::RunNow {
            connection_id,
            actor,
        } => run_now(&config, db, connection_id, actor).await?,
        Command::CheckSheetAccess { sheet_id } => {
            let tokens = service_identity(&config)?;
            let adapter = GoogleSheetsAdapter::new(
                &config.providers.sheets_api_base,
                &config.providers.drive_api_base,
                tokens,
            );
            let allowed = adapter.check_permissions(&sheet_id).await?;
            println!("{}", serde_json::json!({ "sheet_id": sheet_id, "writable": allowed }));
        }
        Command::ListAccounts { source, identity } => {
            let source_type: SourceType = source.parse().map_err(|e| anyhow!("{e}"))?;
            if !source_type.requires_delegated_auth() {
                bail!("{source_type} does not list accounts through a linked identity");
            }
            let registry = AdapterRegistry::from_config(&config, None);
            let adapter = registry.get(source_type)?;
            let credential = credential_store(&config, db)?
                .get_fresh(&identity, Utc::now())
                .await?;
            let accounts = adapter.list_accounts(&credential.access_token).await?;
            println!("{}", serde_json::to_string_pretty(&accounts)?);
        }
        Command::StoreCredential {
            identity,
            provider,
            access_token,
            refresh_token,
            expires_in,
        } => {
            let expires_at = expires_in.map(|secs| Utc::now() + Duration::seconds(secs));
            let credential = credential_store(&config, db)?
                .store(
                    &identity,
                    &provider,
                    &access_token,
                    refresh_token.as_deref(),
                    expires_at,
                )
                .await?;
            info!(identity = %credential.identity, provider = %credential.provider, "Credential stored");
        }
    }

    Ok(())
}

fn service_identity(config: &AppConfig) -> Result<Arc<dyn AccessTokenProvider>> {
    service_account::provider_from_config(config).context("loading service identity")
}

fn credential_store(config: &AppConfig, db: DatabaseConnection) -> Result<CredentialStore> {
    let key_bytes = config
        .crypto_key
        .clone()
        .context("crypto key not present in configuration")?;
    let key = CryptoKey::new(key_bytes).context("initializing crypto key")?;
    CredentialStore::from_config(db, key, config).context("building credential store")
}

fn build_executor(config: &AppConfig, db: DatabaseConnection) -> Result<SyncExecutor> {
    let tokens = service_identity(config)?;
    let warehouse = BigQueryWarehouse::new(&config.warehouse, tokens.clone())
        .context("configuring warehouse")?;
    let registry = AdapterRegistry::from_config(config, Some(tokens));
    info!(sources = ?registry.source_types(), "Registered source adapters");

    Ok(SyncExecutor::new(
        db.clone(),
        Arc::new(credential_store(config, db)?),
        Arc::new(registry),
        Arc::new(warehouse),
        ExecutorConfig::from(&config.sync),
    ))
}

async fn serve(config: &AppConfig, db: DatabaseConnection) -> Result<()> {
    db::ping(&db).await?;
    let executor = build_executor(config, db.clone())?;
    executor
        .recover_interrupted()
        .await
        .context("recovering interrupted syncs")?;

    let shutdown = CancellationToken::new();
    let connections = ConnectionRepository::new(db);
    let (dispatcher, queue) = dispatch::channel(config.scheduler.queue_capacity, connections.clone());
    let pool = WorkerPool::spawn(executor, queue, config.scheduler.workers, shutdown.clone());
    let matcher = ScheduleMatcher::from_config(&config.scheduler, connections, dispatcher);
    let matcher_task = tokio::spawn(matcher.run(shutdown.clone()));

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Shutdown signal received; waiting for in-flight syncs");
    shutdown.cancel();

    if let Err(err) = matcher_task.await {
        warn!(error = %err, "Schedule matcher task ended abnormally");
    }
    pool.join().await;
    Ok(())
}

async fn tick_once(config: &AppConfig, db: DatabaseConnection) -> Result<()> {
    let executor = build_executor(config, db.clone())?;
    let connections = ConnectionRepository::new(db);
    let (dispatcher, queue) = dispatch::channel(config.scheduler.queue_capacity, connections.clone());
    let pool = WorkerPool::spawn(
        executor,
        queue,
        config.scheduler.workers,
        CancellationToken::new(),
    );

    let stats = ScheduleMatcher::from_config(&config.scheduler, connections, dispatcher)
        .tick()
        .await?;
    info!(due = stats.due, dispatched = stats.dispatched, "Tick complete; draining queue");

    // The matcher owned the only dispatcher, so workers stop once the queue is empty.
    pool.join().await;
    Ok(())
}

async fn run_now(
    config: &AppConfig,
    db: DatabaseConnection,
    connection_id: Uuid,
    actor: Option<String>,
) -> Result<()> {
    let connections = ConnectionRepository::new(db.clone());
    let executions = ExecutionRepository::new(db.clone());
    let previous = executions
        .latest_for_connection(connection_id)
        .await?
        .map(|record| record.id);

    let executor = build_executor(config, db)?;
    dispatch::run_once(executor, connections, connection_id, actor).await?;

    let record = executions
        .latest_for_connection(connection_id)
        .await?
        .filter(|record| Some(record.id) != previous)
        .context("connection was claimed by another sync before it could start")?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}
