use chrono::{DateTime, Utc};
use log::debug;
use sqlx::SqliteConnection;

use crate::{
    db_types::{Task, TaskHistory, TaskId, TaskStatus, WorkerId},
    traits::DispatchError,
};

/// Returns the task row for the corresponding `task_id`, if it exists.
pub async fn fetch_task_by_task_id(
    task_id: &TaskId,
    conn: &mut SqliteConnection,
) -> Result<Option<Task>, sqlx::Error> {
    let task =
        sqlx::query_as("SELECT * FROM tasks WHERE task_id = $1").bind(task_id.as_str()).fetch_optional(conn).await?;
    Ok(task)
}

/// Inserts the task with `Assigned` status, or promotes an existing `Unassigned` row. This is not atomic on its
/// own. Embed the call inside a transaction and pass `&mut *tx` as the connection argument.
///
/// The caller is responsible for resolving the assignee before calling this (an existing assignee must win over a
/// freshly selected worker) and for never calling it on a `Delivered` task; status only moves forward.
pub async fn upsert_assignment(
    task_id: &TaskId,
    assignee: &WorkerId,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Task, DispatchError> {
    let task = sqlx::query_as(
        r#"
            INSERT INTO tasks (task_id, assignee_id, status, created_at, updated_at)
            VALUES ($1, $2, 'Assigned', $3, $3)
            ON CONFLICT (task_id) DO UPDATE
                SET assignee_id = excluded.assignee_id,
                    status      = 'Assigned',
                    updated_at  = excluded.updated_at
            RETURNING *;
        "#,
    )
    .bind(task_id.as_str())
    .bind(assignee.as_str())
    .bind(now)
    .fetch_one(conn)
    .await?;
    debug!("🗃️ Task [{task_id}] assigned to [{assignee}]");
    Ok(task)
}

/// Moves an `Assigned` task to `Delivered`, stamping `delivered_at`. The status guard is part of the query, so a
/// task that has already been delivered (or was never assigned) is left untouched and an error is returned.
pub async fn mark_delivered(
    task_id: &TaskId,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Task, DispatchError> {
    let delivered: Option<Task> = sqlx::query_as(
        r#"
            UPDATE tasks
            SET status = 'Delivered', delivered_at = $2, updated_at = $2
            WHERE task_id = $1 AND status = 'Assigned'
            RETURNING *;
        "#,
    )
    .bind(task_id.as_str())
    .bind(now)
    .fetch_optional(&mut *conn)
    .await?;
    match delivered {
        Some(task) => Ok(task),
        None => match fetch_task_by_task_id(task_id, conn).await? {
            Some(_) => Err(DispatchError::TaskNotAssigned(task_id.clone())),
            None => Err(DispatchError::TaskNotFound(task_id.clone())),
        },
    }
}

/// Appends a record to the assignment ledger. Records are never updated or deleted.
pub async fn insert_history(
    task_id: &TaskId,
    status: TaskStatus,
    assignee: Option<&WorkerId>,
    note: Option<&str>,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<TaskHistory, DispatchError> {
    let record = sqlx::query_as(
        r#"
            INSERT INTO task_history (task_id, status, assignee_id, note, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *;
        "#,
    )
    .bind(task_id.as_str())
    .bind(status)
    .bind(assignee.map(|w| w.as_str()))
    .bind(note)
    .bind(now)
    .fetch_one(conn)
    .await?;
    Ok(record)
}

/// The full ledger for the task, oldest entry first.
pub async fn history_for_task(
    task_id: &TaskId,
    conn: &mut SqliteConnection,
) -> Result<Vec<TaskHistory>, sqlx::Error> {
    let records = sqlx::query_as("SELECT * FROM task_history WHERE task_id = $1 ORDER BY id ASC")
        .bind(task_id.as_str())
        .fetch_all(conn)
        .await?;
    Ok(records)
}
