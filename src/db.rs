//! Database pool setup.
//!
//! Connections, credentials and execution records live in the database `ADSYNC_DATABASE_URL`
//! points at: Postgres in production, SQLite locally and in tests.

use std::time::Duration;

use anyhow::{Context, Result};
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr, Statement};

use crate::config::AppConfig;

const CONNECT_ATTEMPTS: u32 = 5;
const FIRST_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("ADSYNC_DATABASE_URL is empty")]
    MissingUrl,
    #[error("database unreachable after {attempts} attempts: {source}")]
    Unreachable { attempts: u32, source: DbErr },
}

fn connect_options(cfg: &AppConfig) -> ConnectOptions {
    let mut opt = ConnectOptions::new(&cfg.database_url);
    opt.max_connections(cfg.db_max_connections)
        .acquire_timeout(Duration::from_millis(cfg.db_acquire_timeout_ms))
        .idle_timeout(Duration::from_secs(600))
        .sqlx_logging(true)
        .sqlx_logging_level(log::LevelFilter::Debug);
    opt
}

/// Opens the pool. The database may still be starting when the service boots, so failed
/// connects are retried with doubling backoff before giving up.
pub async fn init_pool(cfg: &AppConfig) -> Result<DatabaseConnection> {
    if cfg.database_url.trim().is_empty() {
        return Err(DatabaseError::MissingUrl.into());
    }

    let opt = connect_options(cfg);
    let mut backoff = FIRST_BACKOFF;
    let mut attempt = 1;
    loop {
        match Database::connect(opt.clone()).await {
            Ok(db) => {
                log::info!("database connected on attempt {attempt}");
                return Ok(db);
            }
            Err(source) if attempt >= CONNECT_ATTEMPTS => {
                return Err(DatabaseError::Unreachable {
                    attempts: attempt,
                    source,
                }
                .into());
            }
            Err(err) => {
                log::warn!("database connect attempt {attempt} failed: {err}; retrying in {backoff:?}");
                tokio::time::sleep(backoff).await;
                backoff *= 2;
                attempt += 1;
            }
        }
    }
}

pub async fn run_migrations(db: &DatabaseConnection) -> Result<()> {
    Migrator::up(db, None)
        .await
        .context("applying connection, credential and execution migrations")
}

/// Round-trips a trivial query; used before startup recovery touches any rows.
pub async fn ping(db: &DatabaseConnection) -> Result<()> {
    let backend = db.get_database_backend();
    db.query_one(Statement::from_string(backend, "SELECT 1"))
        .await
        .context("database did not answer SELECT 1")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn blank_url_is_rejected_without_connecting() {
        let config = AppConfig {
            database_url: "   ".to_string(),
            ..AppConfig::default()
        };

        let err = init_pool(&config).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DatabaseError>(),
            Some(DatabaseError::MissingUrl)
        ));
    }

    #[tokio::test]
    async fn sqlite_memory_pool_migrates_and_answers() {
        let config = AppConfig {
            database_url: "sqlite::memory:".to_string(),
            db_max_connections: 1,
            ..AppConfig::default()
        };

        let db = init_pool(&config).await.expect("sqlite pool");
        run_migrations(&db).await.expect("migrations apply");
        ping(&db).await.expect("database answers");
    }
}
