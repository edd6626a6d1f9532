//! Event integrations.
//!
//! The engine publishes strongly-typed events through its hook system as assignments progress. The
//! only integration this service ships is the queue mirror: every domain event is wrapped in a wire
//! envelope and placed back on the message queue, where downstream services (the notification
//! service chief among them) consume it. Mirroring happens on dedicated tasks, so a slow queue never
//! stalls the assignment flow.
use courier_engine::{
    events::{EventHandlers, EventHooks, EventMessage},
    queue::{EventQueue, SqliteQueue},
};
use log::*;

const QUEUE_EVENT_BUFFER_SIZE: usize = 25;
const SOURCE_SERVICE: &str = "courier-dispatch";

pub fn create_queue_event_handlers(queue: SqliteQueue) -> EventHandlers {
    let mut hooks = EventHooks::default();
    let q = queue.clone();
    hooks.on_task_pending(move |ev| {
        let q = q.clone();
        Box::pin(async move { publish(&q, EventMessage::task_pending(&ev)).await })
    });
    let q = queue.clone();
    hooks.on_task_assigned(move |ev| {
        let q = q.clone();
        Box::pin(async move { publish(&q, EventMessage::assignment_updated(&ev)).await })
    });
    let q = queue.clone();
    hooks.on_task_delivered(move |ev| {
        let q = q.clone();
        Box::pin(async move { publish(&q, EventMessage::task_delivered(&ev)).await })
    });
    let q = queue.clone();
    hooks.on_worker_available(move |ev| {
        let q = q.clone();
        Box::pin(async move { publish(&q, EventMessage::worker_available(&ev)).await })
    });
    let q = queue;
    hooks.on_task_failed(move |ev| {
        let q = q.clone();
        Box::pin(async move { publish(&q, EventMessage::task_failed(&ev)).await })
    });
    EventHandlers::new(QUEUE_EVENT_BUFFER_SIZE, hooks)
}

/// A failed mirror publish is logged and dropped. The authoritative state lives in the database;
/// the mirrored event stream is a notification channel, not a ledger.
async fn publish(queue: &SqliteQueue, msg: EventMessage) {
    let msg = msg.with_source(SOURCE_SERVICE);
    let body = match msg.to_body() {
        Ok(body) => body,
        Err(e) => {
            error!("📨️ Could not serialize outbound '{}' event: {e}", msg.event_type);
            return;
        },
    };
    match queue.send(&body).await {
        Ok(()) => debug!("📨️ Mirrored '{}' event onto the queue", msg.event_type),
        Err(e) => error!("📨️ Error mirroring '{}' event onto the queue: {e}", msg.event_type),
    }
}
