//! Request handler definitions
//!
//! Define each route and its handler here. Handlers that are more than a line or two MUST go into a
//! separate module. Keep this module neat and tidy 🙏
//!
//! Mutations to the dispatch state flow through the event queue; the routes here exist for
//! observability (task, ledger and worker lookups), worker registration, and event injection. The
//! `/event` route is the producer-facing door onto the queue: whatever lands there is consumed by
//! the same loop that serves external producers.
use actix_web::{get, post, web, HttpResponse, Responder};
use courier_engine::{
    db_types::{NewWorker, TaskId, WorkerId},
    events::EventMessage,
    queue::{EventQueue, SqliteQueue},
    DispatchApi,
    SqliteDatabase,
};
use log::*;
use serde_json::json;

use crate::errors::ServerError;

#[get("/health")]
pub async fn health() -> impl Responder {
    trace!("🏥️ Health check");
    HttpResponse::Ok().body("👍️\n")
}

/// Route handler for `GET /task/{task_id}`
#[get("/task/{task_id}")]
pub async fn get_task(
    path: web::Path<String>,
    api: web::Data<DispatchApi<SqliteDatabase>>,
) -> Result<HttpResponse, ServerError> {
    let task_id = TaskId::from(path.into_inner());
    let task = api
        .fetch_task(&task_id)
        .await?
        .ok_or_else(|| ServerError::NoRecordFound(format!("Task [{task_id}]")))?;
    Ok(HttpResponse::Ok().json(task))
}

/// Route handler for `GET /task/{task_id}/history`. Returns the append-only assignment ledger for
/// the task, oldest entry first.
#[get("/task/{task_id}/history")]
pub async fn get_task_history(
    path: web::Path<String>,
    api: web::Data<DispatchApi<SqliteDatabase>>,
) -> Result<HttpResponse, ServerError> {
    let task_id = TaskId::from(path.into_inner());
    let history = api.history_for_task(&task_id).await?;
    Ok(HttpResponse::Ok().json(json!({ "task_id": task_id, "count": history.len(), "history": history })))
}

/// Route handler for `GET /worker/{worker_id}`
#[get("/worker/{worker_id}")]
pub async fn get_worker(
    path: web::Path<String>,
    api: web::Data<DispatchApi<SqliteDatabase>>,
) -> Result<HttpResponse, ServerError> {
    let worker_id = WorkerId::from(path.into_inner());
    let worker = api
        .fetch_worker(&worker_id)
        .await?
        .ok_or_else(|| ServerError::NoRecordFound(format!("Worker [{worker_id}]")))?;
    Ok(HttpResponse::Ok().json(worker))
}

/// Route handler for `POST /worker`. Registers a new driver; idempotent on `worker_id`.
#[post("/worker")]
pub async fn register_worker(
    body: web::Json<NewWorker>,
    api: web::Data<DispatchApi<SqliteDatabase>>,
) -> Result<HttpResponse, ServerError> {
    let worker = api.register_worker(body.into_inner()).await?;
    info!("🛵️ Worker [{}] registered via API", worker.worker_id);
    Ok(HttpResponse::Ok().json(worker))
}

/// Route handler for `POST /task/{task_id}/assign`. Operational shortcut that runs the same
/// assignment flow the consumer does, without a triggering queue event.
#[post("/task/{task_id}/assign")]
pub async fn assign_task(
    path: web::Path<String>,
    api: web::Data<DispatchApi<SqliteDatabase>>,
) -> Result<HttpResponse, ServerError> {
    let task_id = TaskId::from(path.into_inner());
    match api.assign(&task_id).await? {
        Some(task) => Ok(HttpResponse::Ok().json(task)),
        None => Ok(HttpResponse::Ok().json(json!({ "task_id": task_id, "status": "Pending" }))),
    }
}

/// Route handler for `POST /event`. Accepts a wire envelope from an upstream producer and places it
/// on the queue; the consumer loop picks it up like any other message.
#[post("/event")]
pub async fn ingest_event(
    body: web::Json<EventMessage>,
    queue: web::Data<SqliteQueue>,
) -> Result<HttpResponse, ServerError> {
    let envelope = body.into_inner();
    let body = envelope.to_body().map_err(|e| ServerError::InvalidRequestBody(e.to_string()))?;
    queue.send(&body).await.map_err(|e| ServerError::QueueError(e.to_string()))?;
    debug!("📨️ Queued inbound '{}' event", envelope.event_type);
    Ok(HttpResponse::Accepted().json(json!({ "queued": true, "event_id": envelope.event_id })))
}
