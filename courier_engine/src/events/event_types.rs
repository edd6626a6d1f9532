//! Event types emitted and consumed by the dispatch engine.
//!
//! Two families live here:
//! * The strongly-typed domain events ([`TaskAssignedEvent`] et al.) that flow through the in-process hook system
//!   and are mirrored onto the queue for downstream services.
//! * The [`EventMessage`] wire envelope: the JSON body that actually travels over the message queue, together with
//!   the [`InboundEvent`] classification of the event types this service consumes.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::db_types::{Task, TaskId, WorkerId};

/// Event type tags as they appear on the wire.
pub mod tags {
    pub const ORDER_CREATED: &str = "order.created";
    pub const PAYMENT_COMPLETED: &str = "payment.completed";
    pub const TASK_PENDING: &str = "task.pending";
    pub const ASSIGNMENT_UPDATED: &str = "assignment.updated";
    pub const TASK_DELIVERED: &str = "task.delivered";
    pub const WORKER_AVAILABLE: &str = "worker.available";
    pub const TASK_FAILED: &str = "task.failed";
}

//--------------------------------------   Outbound events    ---------------------------------------------------------

/// No worker was available for the task. Not an error; the attempt will be retried when the
/// triggering event is redelivered or a follow-up trigger arrives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPendingEvent {
    pub task_id: TaskId,
    pub reason: String,
}

impl TaskPendingEvent {
    pub fn new(task_id: TaskId, reason: &str) -> Self {
        Self { task_id, reason: reason.to_string() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskAssignedEvent {
    pub task: Task,
    pub worker_id: WorkerId,
}

impl TaskAssignedEvent {
    pub fn new(task: Task, worker_id: WorkerId) -> Self {
        Self { task, worker_id }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDeliveredEvent {
    pub task: Task,
    pub worker_id: WorkerId,
}

impl TaskDeliveredEvent {
    pub fn new(task: Task, worker_id: WorkerId) -> Self {
        Self { task, worker_id }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerAvailableEvent {
    pub worker_id: WorkerId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailedEvent {
    pub task_id: TaskId,
    pub reason: String,
}

impl TaskFailedEvent {
    pub fn new(task_id: TaskId, reason: &str) -> Self {
        Self { task_id, reason: reason.to_string() }
    }
}

//--------------------------------------    Wire envelope     ---------------------------------------------------------

/// The envelope for every message travelling over the queue, serialized as JSON text.
///
/// Identity is `event_id`. When a producer omits it, [`EventMessage::identity`] falls back to a key derived from
/// the event type and the task id in the payload. The fallback weakens dedup for event types that can legitimately
/// recur for the same task, so consumers log a warning when they have to use it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMessage {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occurred_at: Option<DateTime<Utc>>,
}

impl EventMessage {
    /// Creates a new envelope with a fresh event id and the current timestamp.
    pub fn new(event_type: &str, data: Value) -> Self {
        Self {
            event_type: event_type.to_string(),
            data,
            event_id: Some(Uuid::new_v4().to_string()),
            source: None,
            occurred_at: Some(Utc::now()),
        }
    }

    pub fn with_source(mut self, source: &str) -> Self {
        self.source = Some(source.to_string());
        self
    }

    /// The dedup identity of this event. Returns the explicit event id if present, otherwise a fallback key of the
    /// form `{type}:{task_id}` derived from the payload, and `None` if no task id can be found either. The boolean
    /// indicates whether the fallback was used.
    pub fn identity(&self) -> Option<(String, bool)> {
        if let Some(id) = &self.event_id {
            return Some((id.clone(), false));
        }
        self.payload_task_id().map(|tid| (format!("{}:{tid}", self.event_type), true))
    }

    fn payload_task_id(&self) -> Option<String> {
        ["task_id", "order_id"]
            .iter()
            .find_map(|k| self.data.get(k))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    }

    pub fn to_body(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_body(body: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(body)
    }

    pub fn task_pending(ev: &TaskPendingEvent) -> Self {
        Self::new(tags::TASK_PENDING, json!({ "task_id": ev.task_id, "reason": ev.reason }))
    }

    pub fn assignment_updated(ev: &TaskAssignedEvent) -> Self {
        Self::new(
            tags::ASSIGNMENT_UPDATED,
            json!({
                "task_id": ev.task.task_id,
                "assignee_id": ev.worker_id,
                "status": ev.task.status.to_string(),
            }),
        )
    }

    pub fn task_delivered(ev: &TaskDeliveredEvent) -> Self {
        Self::new(
            tags::TASK_DELIVERED,
            json!({
                "task_id": ev.task.task_id,
                "assignee_id": ev.worker_id,
                "status": ev.task.status.to_string(),
                "delivered_at": ev.task.delivered_at,
            }),
        )
    }

    pub fn worker_available(ev: &WorkerAvailableEvent) -> Self {
        Self::new(tags::WORKER_AVAILABLE, json!({ "worker_id": ev.worker_id, "status": "Available" }))
    }

    pub fn task_failed(ev: &TaskFailedEvent) -> Self {
        Self::new(tags::TASK_FAILED, json!({ "task_id": ev.task_id, "reason": ev.reason }))
    }
}

//--------------------------------------    Inbound events    ---------------------------------------------------------

/// An order has been placed upstream. `paid` reflects whether payment had already settled when the order was
/// published; `assignee_id` is non-empty when the producer knows a driver is already bound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCreatedEvent {
    pub task_id: TaskId,
    #[serde(default)]
    pub paid: bool,
    #[serde(default)]
    pub assignee_id: Option<WorkerId>,
}

/// Payment for an order has settled downstream of order creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentCompletedEvent {
    pub task_id: TaskId,
}

/// The closed set of event kinds this service consumes. Anything else classifies as `Unknown`,
/// which is logged and acknowledged rather than retried, so that schema evolution upstream
/// never wedges the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    OrderCreated(OrderCreatedEvent),
    PaymentCompleted(PaymentCompletedEvent),
    Unknown { event_type: String, raw: Value },
}

impl InboundEvent {
    pub fn classify(msg: &EventMessage) -> Result<Self, serde_json::Error> {
        let event = match msg.event_type.as_str() {
            tags::ORDER_CREATED => InboundEvent::OrderCreated(serde_json::from_value(msg.data.clone())?),
            tags::PAYMENT_COMPLETED => InboundEvent::PaymentCompleted(serde_json::from_value(msg.data.clone())?),
            other => InboundEvent::Unknown { event_type: other.to_string(), raw: msg.data.clone() },
        };
        Ok(event)
    }
}
