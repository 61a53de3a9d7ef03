//! # Schedule Matcher
//!
//! Background task that wakes once per tick, evaluates every enabled ACTIVE/ERROR connection's
//! schedule against the wall clock, and hands due connections to the dispatcher. Matching is
//! exact on hour and minute; a missed tick is not caught up.
//!
//! Schedules are written in a single fixed UTC offset (`scheduler.utc_offset_minutes`), and the
//! "already ran today" guard compares calendar dates in that same offset.

use std::time::Duration;

use chrono::{DateTime, FixedOffset, Offset, Utc};
use metrics::{counter, gauge, histogram};
use sea_orm::DbErr;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::SchedulerConfig;
use crate::dispatch::{DispatchError, SyncDispatcher, SyncRequest};
use crate::models::Schedule;
use crate::models::connection::Model as ConnectionModel;
use crate::repositories::ConnectionRepository;

/// Outcome of evaluating one connection at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Due,
    /// `once` schedules only run on manual request.
    NotRecurring,
    WrongTime,
    AlreadyRanToday,
    WrongDay,
}

impl Decision {
    fn label(&self) -> &'static str {
        match self {
            Decision::Due => "due",
            Decision::NotRecurring => "not_recurring",
            Decision::WrongTime => "wrong_time",
            Decision::AlreadyRanToday => "already_ran_today",
            Decision::WrongDay => "wrong_day",
        }
    }
}

/// Applies the time, same-day and frequency gates in that order.
pub fn evaluate(
    schedule: &Schedule,
    last_sync_time: Option<DateTime<Utc>>,
    now: &DateTime<FixedOffset>,
) -> Decision {
    if matches!(schedule, Schedule::Once) {
        return Decision::NotRecurring;
    }
    if !schedule.matches_time(now) {
        return Decision::WrongTime;
    }
    if let Some(last) = last_sync_time {
        if last.with_timezone(&now.timezone()).date_naive() == now.date_naive() {
            return Decision::AlreadyRanToday;
        }
    }
    if !schedule.matches_day(now) {
        return Decision::WrongDay;
    }
    Decision::Due
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickStats {
    pub evaluated: u64,
    pub due: u64,
    pub dispatched: u64,
    pub skipped_pending: u64,
    pub skipped_queue_full: u64,
    pub invalid_schedules: u64,
    pub dispatch_errors: u64,
}

pub struct ScheduleMatcher {
    connections: ConnectionRepository,
    dispatcher: SyncDispatcher,
    offset: FixedOffset,
    tick_interval: Duration,
}

impl ScheduleMatcher {
    pub fn new(
        connections: ConnectionRepository,
        dispatcher: SyncDispatcher,
        offset: FixedOffset,
        tick_interval: Duration,
    ) -> Self {
        Self {
            connections,
            dispatcher,
            offset,
            tick_interval: tick_interval.max(Duration::from_secs(1)),
        }
    }

    pub fn from_config(
        config: &SchedulerConfig,
        connections: ConnectionRepository,
        dispatcher: SyncDispatcher,
    ) -> Self {
        // validate() keeps the offset within -12h..+14h
        let offset =
            FixedOffset::east_opt(config.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix());
        Self::new(
            connections,
            dispatcher,
            offset,
            Duration::from_secs(config.tick_interval_seconds),
        )
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Runs the matcher loop until the shutdown token fires. Ticks are aligned to multiples of
    /// the interval so a one-minute tick lands at the top of each minute.
    #[instrument(skip_all)]
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.tick_interval.as_secs(),
            offset = %self.offset,
            "Starting schedule matcher"
        );

        loop {
            let wait = until_next_boundary(Utc::now(), self.tick_interval);
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Schedule matcher shutdown requested");
                    break;
                }
                _ = sleep(wait) => {
                    let tick_started = Instant::now();
                    if let Err(err) = self.tick().await {
                        error!(error = %err, "Schedule matcher tick failed");
                    }
                    histogram!("sync_scheduler_tick_duration_ms")
                        .record(tick_started.elapsed().as_secs_f64() * 1_000.0);
                }
            }
        }

        info!("Schedule matcher stopped");
    }

    pub async fn tick(&self) -> Result<TickStats, DbErr> {
        self.tick_at(Utc::now()).await
    }

    /// Evaluates every schedulable connection at `now`. Only the initial listing can fail; one
    /// connection's bad schedule or dispatch error never stops the others.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<TickStats, DbErr> {
        counter!("sync_scheduler_ticks_total").increment(1);
        let local = now.with_timezone(&self.offset);
        let mut stats = TickStats::default();

        for connection in self.connections.list_schedulable().await? {
            stats.evaluated += 1;
            self.process_connection(&connection, &local, &mut stats);
        }

        gauge!("sync_scheduler_due_connections").set(stats.due as f64);
        debug!(
            at = %local,
            evaluated = stats.evaluated,
            due = stats.due,
            dispatched = stats.dispatched,
            skipped_pending = stats.skipped_pending,
            skipped_queue_full = stats.skipped_queue_full,
            invalid = stats.invalid_schedules,
            "Schedule matcher tick completed"
        );
        Ok(stats)
    }

    fn process_connection(
        &self,
        connection: &ConnectionModel,
        now: &DateTime<FixedOffset>,
        stats: &mut TickStats,
    ) {
        let schedule = match Schedule::from_json(&connection.schedule) {
            Ok(schedule) => schedule,
            Err(err) => {
                stats.invalid_schedules += 1;
                counter!("sync_scheduler_skipped_total", "reason" => "invalid_schedule").increment(1);
                warn!(
                    connection_id = %connection.id,
                    error = %err,
                    "Skipping connection with an invalid schedule"
                );
                return;
            }
        };

        let last_sync = connection.last_sync_time.map(|t| t.with_timezone(&Utc));
        let decision = evaluate(&schedule, last_sync, now);
        if decision != Decision::Due {
            if decision != Decision::WrongTime {
                counter!("sync_scheduler_skipped_total", "reason" => decision.label())
                    .increment(1);
            }
            return;
        }

        stats.due += 1;
        match self.dispatcher.dispatch(SyncRequest::scheduled(connection.id)) {
            Ok(()) => {
                stats.dispatched += 1;
                info!(
                    connection_id = %connection.id,
                    frequency = schedule.frequency().as_str(),
                    "Dispatched scheduled sync"
                );
            }
            Err(DispatchError::AlreadyPending(_)) => {
                stats.skipped_pending += 1;
                debug!(connection_id = %connection.id, "Connection already queued or running");
            }
            Err(DispatchError::QueueFull) => {
                stats.skipped_queue_full += 1;
                warn!(connection_id = %connection.id, "Sync queue is full; skipping this tick");
            }
            Err(err) => {
                stats.dispatch_errors += 1;
                error!(connection_id = %connection.id, error = %err, "Failed to dispatch sync");
            }
        }
    }
}

fn until_next_boundary(now: DateTime<Utc>, interval: Duration) -> Duration {
    let interval_ms = interval.as_millis().max(1) as i64;
    let elapsed = now.timestamp_millis().rem_euclid(interval_ms);
    Duration::from_millis((interval_ms - elapsed) as u64)
}
