use std::future::Future;

use thiserror::Error;

use crate::db_types::{NewWorker, ProcessedEvent, Task, TaskHistory, TaskId, Worker, WorkerId};

/// The result of a successful [`DispatchDatabase::assign_task`] transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub task: Task,
    pub worker: Worker,
    /// `true` when this invocation bound the worker; `false` when the task already carried an
    /// assignee and the call was an idempotent replay.
    pub newly_assigned: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignOutcome {
    Assigned(Assignment),
    /// Every registered worker is busy. Not an error.
    NoWorkerAvailable,
    /// The triggering event had already been recorded as processed by a concurrent copy of the same
    /// message; nothing was written.
    AlreadyProcessed,
}

/// The identity of the queue event that triggered a state change. When passed to
/// [`DispatchDatabase::assign_task`], the processed-event record is written inside the same
/// transaction as the domain writes, so a failed assignment leaves no dedup record behind and
/// redelivery retries cleanly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub event_id: String,
    pub event_type: String,
    pub source_service: Option<String>,
}

impl EventRecord {
    pub fn new(event_id: &str, event_type: &str, source_service: Option<&str>) -> Self {
        Self {
            event_id: event_id.to_string(),
            event_type: event_type.to_string(),
            source_service: source_service.map(|s| s.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredTask {
    pub task: Task,
    pub worker: Worker,
}

/// This trait defines the highest level of behaviour for backends supporting the dispatch engine.
///
/// This behaviour includes:
/// * Recording consumed events for dedup purposes (at most one record per event identity).
/// * The atomic assignment flow: worker selection, task upsert, ledger append, worker busy flag.
/// * The atomic completion flow that returns the worker to the available pool.
///
/// Methods are declared in the desugared `impl Future + Send` form rather than as `async fn` so that
/// generic callers can hand the futures to `tokio::spawn`; implementations can still use `async fn`.
pub trait DispatchDatabase: Clone {
    /// The URL of the database
    fn url(&self) -> &str;

    /// Records that the event with the given identity has been processed by this service.
    ///
    /// The insert is atomic with the existence check: returns `true` if the record was created now, and `false`
    /// if an event with this identity had already been recorded. Records are never deleted.
    fn record_event_processed(
        &self,
        event_id: &str,
        event_type: &str,
        source_service: Option<&str>,
    ) -> impl Future<Output = Result<bool, DispatchError>> + Send;

    /// Fetches the processed-event record for the given identity, if any.
    fn fetch_processed_event(
        &self,
        event_id: &str,
    ) -> impl Future<Output = Result<Option<ProcessedEvent>, DispatchError>> + Send;

    /// Attempts to bind an available worker to the task, in a single atomic transaction:
    ///
    /// 1. If `trigger` is given, record it as processed. A pre-existing record aborts with
    ///    [`AssignOutcome::AlreadyProcessed`] and no writes.
    /// 2. Select the available worker that registered first (FIFO). If none, commit the trigger
    ///    record alone and return [`AssignOutcome::NoWorkerAvailable`].
    /// 3. Upsert the task row. If the task already carries an assignee, that assignee wins and the
    ///    newly selected worker is left untouched; repeated delivery of assignment triggers is
    ///    therefore safe.
    /// 4. Append a ledger record, unconditionally, so the audit trail reflects every invocation.
    /// 5. Mark the resolved worker `Busy`.
    ///
    /// Any failure rolls the whole transaction back, dedup record included.
    fn assign_task(
        &self,
        task_id: &TaskId,
        trigger: Option<&EventRecord>,
    ) -> impl Future<Output = Result<AssignOutcome, DispatchError>> + Send;

    /// Completes the delivery of an assigned task, in a single atomic transaction: the task moves to
    /// `Delivered` with a timestamp, a ledger record is appended, and the assignee returns to
    /// `Available`.
    ///
    /// Fails with [`DispatchError::TaskNotAssigned`] if the task is not currently `Assigned`; status
    /// never moves backwards.
    fn complete_delivery(&self, task_id: &TaskId) -> impl Future<Output = Result<DeliveredTask, DispatchError>> + Send;

    /// Registers a new worker, `Available` by default. Idempotent on `worker_id`.
    fn register_worker(&self, worker: NewWorker) -> impl Future<Output = Result<Worker, DispatchError>> + Send;

    fn fetch_task(&self, task_id: &TaskId) -> impl Future<Output = Result<Option<Task>, DispatchError>> + Send;

    fn fetch_worker(&self, worker_id: &WorkerId) -> impl Future<Output = Result<Option<Worker>, DispatchError>> + Send;

    /// The append-only assignment ledger for the task, oldest first.
    fn history_for_task(&self, task_id: &TaskId)
    -> impl Future<Output = Result<Vec<TaskHistory>, DispatchError>> + Send;

    /// Closes the connection pool.
    fn close(&mut self) -> impl Future<Output = Result<(), DispatchError>> + Send;
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
    #[error("Task [{0}] does not exist")]
    TaskNotFound(TaskId),
    #[error("Task [{0}] is not in Assigned status")]
    TaskNotAssigned(TaskId),
    #[error("Worker [{0}] does not exist")]
    WorkerNotFound(WorkerId),
    #[error("The requested status change for task [{0}] would move its status backwards")]
    StatusRegression(TaskId),
    #[error("Could not serialize event payload: {0}")]
    SerializationError(#[from] serde_json::Error),
}
