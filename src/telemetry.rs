//! Tracing subscriber and metric descriptions.
//!
//! `log::` records from dependencies (sqlx, reqwest, oauth2) are bridged into `tracing`, so one
//! filter and one formatter govern every event the process emits.

use std::sync::Once;

use log::LevelFilter;
use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use thiserror::Error;
use tracing_log::LogTracer;
use tracing_subscriber::{
    EnvFilter, Registry, fmt,
    layer::{Layer, SubscriberExt},
    util::{SubscriberInitExt, TryInitError},
};

use crate::config::AppConfig;

/// Dependencies that are chatty at `info`/`debug` and rarely useful for sync triage.
const QUIET_TARGETS: &[&str] = &["sqlx=warn", "hyper_util=warn", "h2=warn", "rustls=warn"];

#[derive(Debug, Error)]
pub enum TelemetryInitError {
    #[error("invalid log filter '{filter}': {source}")]
    Filter {
        filter: String,
        source: tracing_subscriber::filter::ParseError,
    },
    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(#[from] TryInitError),
}

/// Installs the global subscriber. `RUST_LOG` overrides `ADSYNC_LOG_LEVEL`. Calling this more
/// than once is a no-op.
pub fn init_tracing(config: &AppConfig) -> Result<(), TelemetryInitError> {
    static INIT: Once = Once::new();
    let mut result = Ok(());
    INIT.call_once(|| result = install(config));
    result
}

fn install(config: &AppConfig) -> Result<(), TelemetryInitError> {
    install_log_bridge();

    tracing_subscriber::registry()
        .with(format_layer(&config.log_format))
        .with(env_filter(&config.log_level)?)
        .try_init()?;

    describe_metrics();
    Ok(())
}

fn install_log_bridge() {
    if let Err(err) = LogTracer::builder()
        .with_max_level(LevelFilter::Trace)
        .init()
    {
        // Tests may have installed a logger already.
        eprintln!("log bridge not installed ({err}); `log::` records will bypass tracing");
    }
}

fn env_filter(level: &str) -> Result<EnvFilter, TelemetryInitError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => level_filter(level),
    }
}

fn level_filter(level: &str) -> Result<EnvFilter, TelemetryInitError> {
    let directives = std::iter::once(level)
        .chain(QUIET_TARGETS.iter().copied())
        .collect::<Vec<_>>()
        .join(",");
    EnvFilter::try_new(&directives).map_err(|source| TelemetryInitError::Filter {
        filter: directives,
        source,
    })
}

fn format_layer(format: &str) -> Box<dyn Layer<Registry> + Send + Sync> {
    match format {
        "pretty" => fmt::layer().pretty().boxed(),
        "compact" => fmt::layer().compact().boxed(),
        _ => fmt::layer().json().with_current_span(true).boxed(),
    }
}

/// Registers units and help text for the metrics the matcher, dispatcher and executor emit.
pub fn describe_metrics() {
    describe_counter!("sync_scheduler_ticks_total", "Schedule matcher ticks completed");
    describe_gauge!(
        "sync_scheduler_due_connections",
        "Connections found due on the latest tick"
    );
    describe_histogram!(
        "sync_scheduler_tick_duration_ms",
        Unit::Milliseconds,
        "Time spent evaluating one tick"
    );
    describe_counter!(
        "sync_scheduler_skipped_total",
        "Connections not dispatched on a tick, by reason"
    );
    describe_counter!("sync_dispatch_total", "Dispatch attempts, by result");
    describe_gauge!("sync_queue_depth", "Requests queued or running");
    describe_gauge!("syncs_in_flight", "Sync attempts currently executing");
    describe_counter!("sync_executions_total", "Finished sync attempts, by status");
    describe_counter!("sync_failures_total", "Failed sync attempts, by error kind");
    describe_counter!("sync_skipped_total", "Triggers that did not start an attempt");
    describe_counter!("sync_rows_loaded_total", "Rows written to the warehouse");
    describe_counter!("fetch_retries_total", "In-attempt fetch retries, by error kind");
    describe_counter!("credential_refresh_total", "Credential refreshes, by outcome");
    describe_histogram!(
        "sync_attempt_duration_seconds",
        Unit::Seconds,
        "Wall time of one sync attempt"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_quiets_dependency_targets() {
        let filter = level_filter("debug").expect("valid directives").to_string();
        assert!(filter.contains("sqlx=warn"));
        assert!(filter.contains("debug"));
    }

    #[test]
    fn malformed_level_is_reported() {
        assert!(matches!(
            level_filter("sqlx=loud"),
            Err(TelemetryInitError::Filter { .. })
        ));
    }
}
