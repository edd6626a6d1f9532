use std::{fmt::Debug, time::Duration};

use log::*;
use rand::Rng;

use crate::{
    db_types::{NewWorker, Task, TaskHistory, TaskId, Worker, WorkerId},
    dispatch_api::CompletionScheduler,
    events::{
        EventProducers,
        TaskAssignedEvent,
        TaskDeliveredEvent,
        TaskFailedEvent,
        TaskPendingEvent,
        WorkerAvailableEvent,
    },
    traits::{AssignOutcome, DispatchDatabase, DispatchError, EventRecord},
};

/// The bounds for the randomized delivery delay between assignment and completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryWindow {
    pub min: Duration,
    pub max: Duration,
}

impl Default for DeliveryWindow {
    fn default() -> Self {
        Self { min: Duration::from_secs(60), max: Duration::from_secs(120) }
    }
}

impl DeliveryWindow {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self { min, max: max.max(min) }
    }

    fn sample(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        rand::thread_rng().gen_range(self.min..=self.max)
    }
}

/// `DispatchApi` is the primary API for handling driver assignment in response to order and payment
/// events consumed from the queue.
#[derive(Clone)]
pub struct DispatchApi<B> {
    db: B,
    producers: EventProducers,
    scheduler: CompletionScheduler,
    delivery_window: DeliveryWindow,
}

impl<B> Debug for DispatchApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DispatchApi")
    }
}

impl<B> DispatchApi<B> {
    pub fn new(db: B, producers: EventProducers) -> Self {
        Self { db, producers, scheduler: CompletionScheduler::new(), delivery_window: DeliveryWindow::default() }
    }

    pub fn with_delivery_window(mut self, window: DeliveryWindow) -> Self {
        self.delivery_window = window;
        self
    }

    pub fn db(&self) -> &B {
        &self.db
    }

    pub fn db_mut(&mut self) -> &mut B {
        &mut self.db
    }

    pub fn scheduler(&self) -> &CompletionScheduler {
        &self.scheduler
    }
}

impl<B> DispatchApi<B>
where B: DispatchDatabase + Send + Sync + 'static
{
    /// Attempts to bind an available worker to the task.
    ///
    /// On success the `assignment.updated` event is published and, if the assignment is new (not an
    /// idempotent replay), a delayed completion is scheduled. With no available worker, a
    /// `task.pending` event is published and `Ok(None)` is returned: lack of capacity is a domain
    /// outcome, not an error. A database failure publishes `task.failed` and is returned to the
    /// caller; the engine itself does not retry — redelivery of the triggering message does.
    pub async fn assign(&self, task_id: &TaskId) -> Result<Option<Task>, DispatchError> {
        self.assign_with_trigger(task_id, None).await
    }

    /// [`Self::assign`], with the identity of the triggering queue event recorded inside the same
    /// transaction as the assignment writes. If a concurrent copy of the same event got there first,
    /// nothing is written or published and `Ok(None)` is returned.
    pub async fn assign_with_trigger(
        &self,
        task_id: &TaskId,
        trigger: Option<&EventRecord>,
    ) -> Result<Option<Task>, DispatchError> {
        match self.db.assign_task(task_id, trigger).await {
            Ok(AssignOutcome::AlreadyProcessed) => {
                debug!("🚚️ Trigger event for task [{task_id}] was already processed; nothing to do");
                Ok(None)
            },
            Ok(AssignOutcome::NoWorkerAvailable) => {
                info!("🚚️ No worker available for task [{task_id}]; task remains pending");
                let event = TaskPendingEvent::new(task_id.clone(), "no available workers");
                self.call_task_pending_hook(event).await;
                Ok(None)
            },
            Ok(AssignOutcome::Assigned(assignment)) => {
                let worker_id = assignment.worker.worker_id.clone();
                debug!(
                    "🚚️ Task [{task_id}] assigned to [{worker_id}] (newly_assigned: {})",
                    assignment.newly_assigned
                );
                let event = TaskAssignedEvent::new(assignment.task.clone(), worker_id);
                self.call_task_assigned_hook(event).await;
                if assignment.newly_assigned {
                    self.schedule_completion(task_id.clone()).await;
                }
                Ok(Some(assignment.task))
            },
            Err(e) => {
                error!("🚚️ Assignment of task [{task_id}] failed: {e}");
                let event = TaskFailedEvent::new(task_id.clone(), &e.to_string());
                self.call_task_failed_hook(event).await;
                Err(e)
            },
        }
    }

    /// Schedules the delayed assignment → delivered transition for the task. The timer runs detached
    /// from the caller and opens a fresh transaction only when it fires; its failure is logged, not
    /// retried — a stuck `Assigned` task is an observable anomaly, not silently corrected.
    async fn schedule_completion(&self, task_id: TaskId) {
        let delay = self.delivery_window.sample();
        let db = self.db.clone();
        let producers = self.producers.clone();
        let tid = task_id.clone();
        self.scheduler.schedule(task_id, delay, async move { run_completion(db, producers, tid).await }).await;
    }

    /// Completes the delivery of the task immediately, bypassing the delivery timer. Used by tests
    /// and operational tooling; the scheduled path goes through the same flow.
    pub async fn complete_now(&self, task_id: &TaskId) -> Result<Task, DispatchError> {
        let delivered = self.db.complete_delivery(task_id).await?;
        let task = delivered.task.clone();
        self.publish_delivery_events(delivered.task, delivered.worker.worker_id).await;
        Ok(task)
    }

    /// Registers a new worker (idempotent on worker id).
    pub async fn register_worker(&self, worker: NewWorker) -> Result<Worker, DispatchError> {
        let worker = self.db.register_worker(worker).await?;
        debug!("🚚️ Worker [{}] is registered and available", worker.worker_id);
        Ok(worker)
    }

    pub async fn fetch_task(&self, task_id: &TaskId) -> Result<Option<Task>, DispatchError> {
        self.db.fetch_task(task_id).await
    }

    pub async fn fetch_worker(&self, worker_id: &WorkerId) -> Result<Option<Worker>, DispatchError> {
        self.db.fetch_worker(worker_id).await
    }

    pub async fn history_for_task(&self, task_id: &TaskId) -> Result<Vec<TaskHistory>, DispatchError> {
        self.db.history_for_task(task_id).await
    }

    async fn publish_delivery_events(&self, task: Task, worker_id: WorkerId) {
        publish_delivery_events(&self.producers, task, worker_id).await;
    }

    async fn call_task_pending_hook(&self, event: TaskPendingEvent) {
        for emitter in &self.producers.task_pending_producer {
            emitter.publish_event(event.clone()).await;
        }
    }

    async fn call_task_assigned_hook(&self, event: TaskAssignedEvent) {
        for emitter in &self.producers.task_assigned_producer {
            emitter.publish_event(event.clone()).await;
        }
    }

    async fn call_task_failed_hook(&self, event: TaskFailedEvent) {
        for emitter in &self.producers.task_failed_producer {
            emitter.publish_event(event.clone()).await;
        }
    }
}

/// The delayed-completion action. Runs in its own transaction at fire time; failure is logged only.
async fn run_completion<B>(db: B, producers: EventProducers, task_id: TaskId)
where B: DispatchDatabase + Send + Sync + 'static {
    match db.complete_delivery(&task_id).await {
        Ok(delivered) => {
            info!("🕰️ Task [{task_id}] delivered by [{}]", delivered.worker.worker_id);
            publish_delivery_events(&producers, delivered.task, delivered.worker.worker_id).await;
        },
        Err(e) => {
            error!("🕰️ Completion of task [{task_id}] failed: {e}. The task remains assigned.");
        },
    }
}

async fn publish_delivery_events(producers: &EventProducers, task: Task, worker_id: WorkerId) {
    let delivered = TaskDeliveredEvent::new(task, worker_id.clone());
    for emitter in &producers.task_delivered_producer {
        emitter.publish_event(delivered.clone()).await;
    }
    let available = WorkerAvailableEvent { worker_id };
    for emitter in &producers.worker_available_producer {
        emitter.publish_event(available.clone()).await;
    }
}
