use chrono::{DateTime, Utc};
use log::debug;
use sqlx::SqliteConnection;

use crate::{
    db_types::{NewWorker, Worker, WorkerId, WorkerStatus},
    traits::DispatchError,
};

/// Inserts the worker into the database, returning `false` in the second parameter if the worker already exists.
/// The existence check and the write are one statement, so two registrations of the same worker racing each
/// other both land on the same row rather than one of them tripping the UNIQUE constraint.
pub async fn idempotent_insert(
    worker: NewWorker,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<(Worker, bool), DispatchError> {
    let NewWorker { worker_id, capabilities } = worker;
    let result = sqlx::query(
        r#"
            INSERT INTO workers (worker_id, capabilities, status, created_at, updated_at)
            VALUES ($1, $2, 'Available', $3, $3)
            ON CONFLICT (worker_id) DO NOTHING;
        "#,
    )
    .bind(worker_id.as_str())
    .bind(capabilities)
    .bind(now)
    .execute(&mut *conn)
    .await?;
    let created = result.rows_affected() == 1;
    if created {
        debug!("🗃️ Worker [{worker_id}] registered");
    }
    let worker = fetch_worker_by_worker_id(&worker_id, conn)
        .await?
        .ok_or_else(|| DispatchError::WorkerNotFound(worker_id.clone()))?;
    Ok((worker, created))
}

pub async fn fetch_worker_by_worker_id(
    worker_id: &WorkerId,
    conn: &mut SqliteConnection,
) -> Result<Option<Worker>, sqlx::Error> {
    let worker = sqlx::query_as("SELECT * FROM workers WHERE worker_id = $1")
        .bind(worker_id.as_str())
        .fetch_optional(conn)
        .await?;
    Ok(worker)
}

/// Returns the available worker that registered first (FIFO tie-break), if any.
pub async fn first_available_worker(conn: &mut SqliteConnection) -> Result<Option<Worker>, sqlx::Error> {
    let worker = sqlx::query_as("SELECT * FROM workers WHERE status = 'Available' ORDER BY id ASC LIMIT 1")
        .fetch_optional(conn)
        .await?;
    Ok(worker)
}

pub async fn set_worker_status(
    worker_id: &WorkerId,
    status: WorkerStatus,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Worker, DispatchError> {
    let worker: Option<Worker> =
        sqlx::query_as("UPDATE workers SET status = $2, updated_at = $3 WHERE worker_id = $1 RETURNING *")
            .bind(worker_id.as_str())
            .bind(status)
            .bind(now)
            .fetch_optional(conn)
            .await?;
    worker.ok_or_else(|| DispatchError::WorkerNotFound(worker_id.clone()))
}
