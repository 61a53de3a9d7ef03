//! # Dispatch
//!
//! Bounded work queue between triggers (the schedule matcher, manual runs) and a fixed pool of
//! workers running [`SyncExecutor::execute`]. A connection already queued or running is not
//! queued again, and a full queue rejects new work instead of growing.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use metrics::{counter, gauge};
use sea_orm::DbErr;
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span};
use uuid::Uuid;

use crate::models::connection::Model as ConnectionModel;
use crate::models::{ConnectionStatus, TriggerSource};
use crate::repositories::ConnectionRepository;
use crate::sync_executor::SyncExecutor;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
    pub connection_id: Uuid,
    pub trigger: TriggerSource,
    pub triggered_by: Option<String>,
}

impl SyncRequest {
    pub fn scheduled(connection_id: Uuid) -> Self {
        Self {
            connection_id,
            trigger: TriggerSource::System,
            triggered_by: None,
        }
    }

    pub fn manual(connection_id: Uuid, actor: Option<String>) -> Self {
        Self {
            connection_id,
            trigger: TriggerSource::Manual,
            triggered_by: actor,
        }
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("connection {0} is already queued or running")]
    AlreadyPending(Uuid),
    #[error("sync queue is full")]
    QueueFull,
    #[error("sync queue is closed")]
    Closed,
    #[error("connection {0} does not exist")]
    NotFound(Uuid),
    #[error("connection {0} is disabled")]
    Disabled(Uuid),
    #[error("connection {0} is already syncing")]
    AlreadySyncing(Uuid),
    #[error("database error: {0}")]
    Database(#[from] DbErr),
}

type PendingSet = Arc<Mutex<HashSet<Uuid>>>;

fn lock(pending: &PendingSet) -> MutexGuard<'_, HashSet<Uuid>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Producer side of the work queue.
#[derive(Clone)]
pub struct SyncDispatcher {
    tx: mpsc::Sender<SyncRequest>,
    pending: PendingSet,
    connections: ConnectionRepository,
}

/// Consumer side, handed to [`WorkerPool::spawn`].
pub struct WorkQueue {
    rx: mpsc::Receiver<SyncRequest>,
    pending: PendingSet,
}

/// Creates a dispatcher and its queue with room for `capacity` waiting requests.
pub fn channel(capacity: usize, connections: ConnectionRepository) -> (SyncDispatcher, WorkQueue) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let pending: PendingSet = Arc::new(Mutex::new(HashSet::new()));
    (
        SyncDispatcher {
            tx,
            pending: pending.clone(),
            connections,
        },
        WorkQueue { rx, pending },
    )
}

impl SyncDispatcher {
    /// Queues a request without waiting.
    pub fn dispatch(&self, request: SyncRequest) -> Result<(), DispatchError> {
        let connection_id = request.connection_id;
        if !lock(&self.pending).insert(connection_id) {
            counter!("sync_dispatch_total", "result" => "already_pending").increment(1);
            return Err(DispatchError::AlreadyPending(connection_id));
        }

        match self.tx.try_send(request) {
            Ok(()) => {
                counter!("sync_dispatch_total", "result" => "queued").increment(1);
                gauge!("sync_queue_depth").increment(1.0);
                Ok(())
            }
            Err(err) => {
                lock(&self.pending).remove(&connection_id);
                match err {
                    mpsc::error::TrySendError::Full(_) => {
                        counter!("sync_dispatch_total", "result" => "queue_full").increment(1);
                        Err(DispatchError::QueueFull)
                    }
                    mpsc::error::TrySendError::Closed(_) => Err(DispatchError::Closed),
                }
            }
        }
    }

    /// Manual trigger: applies the same guards as scheduled dispatch before queueing.
    pub async fn run_now(
        &self,
        connection_id: Uuid,
        actor: Option<String>,
    ) -> Result<(), DispatchError> {
        ensure_runnable(&self.connections, connection_id).await?;
        self.dispatch(SyncRequest::manual(connection_id, actor))?;
        info!(connection_id = %connection_id, "Manual sync queued");
        Ok(())
    }

    pub fn is_pending(&self, connection_id: Uuid) -> bool {
        lock(&self.pending).contains(&connection_id)
    }
}

/// Runs one manual sync through a single-worker queue and waits for it to finish.
pub async fn run_once(
    executor: SyncExecutor,
    connections: ConnectionRepository,
    connection_id: Uuid,
    actor: Option<String>,
) -> Result<(), DispatchError> {
    let (dispatcher, queue) = channel(1, connections);
    let pool = WorkerPool::spawn(executor, queue, 1, CancellationToken::new());

    let queued = dispatcher.run_now(connection_id, actor).await;
    drop(dispatcher);
    pool.join().await;
    queued
}

/// Checks that a connection exists, is enabled and is not mid-sync. The executor's atomic
/// claim remains the final arbiter.
pub async fn ensure_runnable(
    connections: &ConnectionRepository,
    connection_id: Uuid,
) -> Result<ConnectionModel, DispatchError> {
    let connection = connections
        .find_by_id(connection_id)
        .await?
        .ok_or(DispatchError::NotFound(connection_id))?;
    if !connection.is_enabled {
        return Err(DispatchError::Disabled(connection_id));
    }
    if connection.lifecycle_status() == ConnectionStatus::Syncing {
        return Err(DispatchError::AlreadySyncing(connection_id));
    }
    Ok(connection)
}

/// Fixed set of workers draining the queue.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Starts `workers` tasks. They stop when `shutdown` fires or every dispatcher is dropped
    /// and the queue is drained.
    pub fn spawn(
        executor: SyncExecutor,
        queue: WorkQueue,
        workers: usize,
        shutdown: CancellationToken,
    ) -> Self {
        let WorkQueue { rx, pending } = queue;
        let rx = Arc::new(AsyncMutex::new(rx));

        let handles = (0..workers.max(1))
            .map(|worker| {
                let executor = executor.clone();
                let rx = rx.clone();
                let pending = pending.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(
                    worker_loop(executor, rx, pending, shutdown)
                        .instrument(info_span!("sync_worker", worker)),
                )
            })
            .collect();

        Self { handles }
    }

    /// Waits for every worker to exit.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(err) = handle.await {
                error!(error = %err, "Sync worker terminated abnormally");
            }
        }
    }
}

async fn worker_loop(
    executor: SyncExecutor,
    rx: Arc<AsyncMutex<mpsc::Receiver<SyncRequest>>>,
    pending: PendingSet,
    shutdown: CancellationToken,
) {
    debug!("Sync worker started");
    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => None,
            request = async { rx.lock().await.recv().await } => request,
        };
        let Some(request) = next else {
            break;
        };
        gauge!("sync_queue_depth").decrement(1.0);

        let connection_id = request.connection_id;
        match executor
            .execute(connection_id, request.trigger, request.triggered_by)
            .await
        {
            Ok(Some(record)) => debug!(
                connection_id = %connection_id,
                execution_id = %record.id,
                status = %record.status,
                "Sync request completed"
            ),
            Ok(None) => debug!(connection_id = %connection_id, "Sync request skipped"),
            Err(err) => error!(
                connection_id = %connection_id,
                error = %err,
                "Sync request failed to record its outcome"
            ),
        }
        lock(&pending).remove(&connection_id);
    }
    debug!("Sync worker stopped");
}

impl std::fmt::Debug for SyncDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncDispatcher")
            .field("pending", &lock(&self.pending).len())
            .field("capacity", &self.tx.max_capacity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase};

    fn dispatcher(capacity: usize) -> (SyncDispatcher, WorkQueue) {
        let db = MockDatabase::new(DatabaseBackend::Sqlite).into_connection();
        channel(capacity, ConnectionRepository::new(db))
    }

    #[test]
    fn duplicate_connection_is_rejected_while_pending() {
        let (dispatcher, _queue) = dispatcher(4);
        let id = Uuid::new_v4();

        dispatcher.dispatch(SyncRequest::scheduled(id)).unwrap();
        assert!(matches!(
            dispatcher.dispatch(SyncRequest::manual(id, None)),
            Err(DispatchError::AlreadyPending(other)) if other == id
        ));
        assert!(dispatcher.is_pending(id));
    }

    #[test]
    fn full_queue_applies_back_pressure_and_frees_the_slot() {
        let (dispatcher, _queue) = dispatcher(1);
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        dispatcher.dispatch(SyncRequest::scheduled(first)).unwrap();
        assert!(matches!(
            dispatcher.dispatch(SyncRequest::scheduled(second)),
            Err(DispatchError::QueueFull)
        ));
        assert!(!dispatcher.is_pending(second));
    }

    #[test]
    fn closed_queue_is_reported() {
        let (dispatcher, queue) = dispatcher(1);
        drop(queue);
        assert!(matches!(
            dispatcher.dispatch(SyncRequest::scheduled(Uuid::new_v4())),
            Err(DispatchError::Closed)
        ));
    }
}
