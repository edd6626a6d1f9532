//! `SqliteDatabase` is a concrete implementation of a dispatch engine backend.
//!
//! Unsurprisingly, it uses SQLite as the backend and implements the traits defined in the [`crate::traits`] module.
use std::fmt::Debug;

use chrono::Utc;
use log::*;
use sqlx::SqlitePool;

use super::db::{new_pool, processed_events, tasks, workers};
use crate::{
    db_types::{NewWorker, ProcessedEvent, Task, TaskHistory, TaskId, TaskStatus, Worker, WorkerId, WorkerStatus},
    traits::{AssignOutcome, Assignment, DeliveredTask, DispatchDatabase, DispatchError, EventRecord},
};

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDatabase ({:?})", self.pool)
    }
}

impl SqliteDatabase {
    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, DispatchError> {
        let pool = new_pool(url, max_connections).await?;
        Ok(Self { url: url.to_string(), pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl DispatchDatabase for SqliteDatabase {
    fn url(&self) -> &str {
        self.url.as_str()
    }

    async fn record_event_processed(
        &self,
        event_id: &str,
        event_type: &str,
        source_service: Option<&str>,
    ) -> Result<bool, DispatchError> {
        let mut conn = self.pool.acquire().await?;
        let inserted = processed_events::insert_if_new(event_id, event_type, source_service, Utc::now(), &mut conn).await?;
        if inserted {
            debug!("🗃️ Event [{event_id}] recorded as processed");
        }
        Ok(inserted)
    }

    async fn fetch_processed_event(&self, event_id: &str) -> Result<Option<ProcessedEvent>, DispatchError> {
        let mut conn = self.pool.acquire().await?;
        let record = processed_events::fetch_by_event_id(event_id, &mut conn).await?;
        Ok(record)
    }

    async fn assign_task(&self, task_id: &TaskId, trigger: Option<&EventRecord>) -> Result<AssignOutcome, DispatchError> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();
        if let Some(trigger) = trigger {
            let recorded = processed_events::insert_if_new(
                &trigger.event_id,
                &trigger.event_type,
                trigger.source_service.as_deref(),
                now,
                &mut tx,
            )
            .await?;
            if !recorded {
                tx.rollback().await?;
                debug!("🗃️ Event [{}] was already processed; skipping assignment", trigger.event_id);
                return Ok(AssignOutcome::AlreadyProcessed);
            }
        }
        let existing = tasks::fetch_task_by_task_id(task_id, &mut tx).await?;
        let existing_assignee = existing.as_ref().and_then(|t| t.assignee_id.clone());
        let outcome = match (existing, existing_assignee) {
            // The task already has an assignee: the previous assignment wins, and this invocation only leaves
            // its mark on the ledger. This is what makes double-delivery of assignment triggers safe.
            (Some(task), Some(assignee)) => {
                tasks::insert_history(task_id, task.status, Some(&assignee), Some("assignment replayed"), now, &mut tx)
                    .await?;
                let worker = workers::fetch_worker_by_worker_id(&assignee, &mut tx)
                    .await?
                    .ok_or_else(|| DispatchError::WorkerNotFound(assignee.clone()))?;
                debug!("🗃️ Task [{task_id}] already assigned to [{assignee}]; reusing existing assignment");
                AssignOutcome::Assigned(Assignment { task, worker, newly_assigned: false })
            },
            _ => match workers::first_available_worker(&mut tx).await? {
                None => AssignOutcome::NoWorkerAvailable,
                Some(worker) => {
                    let task = tasks::upsert_assignment(task_id, &worker.worker_id, now, &mut tx).await?;
                    tasks::insert_history(task_id, TaskStatus::Assigned, Some(&worker.worker_id), None, now, &mut tx)
                        .await?;
                    let worker = workers::set_worker_status(&worker.worker_id, WorkerStatus::Busy, now, &mut tx).await?;
                    AssignOutcome::Assigned(Assignment { task, worker, newly_assigned: true })
                },
            },
        };
        tx.commit().await?;
        Ok(outcome)
    }

    async fn complete_delivery(&self, task_id: &TaskId) -> Result<DeliveredTask, DispatchError> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();
        let task = tasks::mark_delivered(task_id, now, &mut tx).await?;
        let assignee = task.assignee_id.clone().ok_or_else(|| DispatchError::TaskNotAssigned(task_id.clone()))?;
        tasks::insert_history(task_id, TaskStatus::Delivered, Some(&assignee), None, now, &mut tx).await?;
        let worker = workers::set_worker_status(&assignee, WorkerStatus::Available, now, &mut tx).await?;
        tx.commit().await?;
        debug!("🗃️ Task [{task_id}] delivered by [{assignee}]");
        Ok(DeliveredTask { task, worker })
    }

    async fn register_worker(&self, worker: NewWorker) -> Result<Worker, DispatchError> {
        let mut conn = self.pool.acquire().await?;
        let (worker, _created) = workers::idempotent_insert(worker, Utc::now(), &mut conn).await?;
        Ok(worker)
    }

    async fn fetch_task(&self, task_id: &TaskId) -> Result<Option<Task>, DispatchError> {
        let mut conn = self.pool.acquire().await?;
        let task = tasks::fetch_task_by_task_id(task_id, &mut conn).await?;
        Ok(task)
    }

    async fn fetch_worker(&self, worker_id: &WorkerId) -> Result<Option<Worker>, DispatchError> {
        let mut conn = self.pool.acquire().await?;
        let worker = workers::fetch_worker_by_worker_id(worker_id, &mut conn).await?;
        Ok(worker)
    }

    async fn history_for_task(&self, task_id: &TaskId) -> Result<Vec<TaskHistory>, DispatchError> {
        let mut conn = self.pool.acquire().await?;
        let records = tasks::history_for_task(task_id, &mut conn).await?;
        Ok(records)
    }

    async fn close(&mut self) -> Result<(), DispatchError> {
        self.pool.close().await;
        Ok(())
    }
}
