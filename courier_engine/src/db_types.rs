use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
use log::error;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use thiserror::Error;

//--------------------------------------        TaskId        ---------------------------------------------------------
/// A lightweight wrapper around the merchant-side identifier of a fulfillment task (usually the order id).
#[derive(Clone, Debug, Type, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[sqlx(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<S: Into<String>> From<S> for TaskId {
    fn from(value: S) -> Self {
        Self(value.into())
    }
}

//--------------------------------------       WorkerId       ---------------------------------------------------------
/// A lightweight wrapper around a driver's registered identifier.
#[derive(Clone, Debug, Type, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[sqlx(transparent)]
pub struct WorkerId(pub String);

impl WorkerId {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<S: Into<String>> From<S> for WorkerId {
    fn from(value: S) -> Self {
        Self(value.into())
    }
}

//--------------------------------------      TaskStatus      ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum TaskStatus {
    /// The task exists but no driver has been bound to it yet.
    Unassigned,
    /// A driver has been bound to the task and is en route.
    Assigned,
    /// The task has been delivered. Terminal.
    Delivered,
}

impl Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Unassigned => write!(f, "Unassigned"),
            TaskStatus::Assigned => write!(f, "Assigned"),
            TaskStatus::Delivered => write!(f, "Delivered"),
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("Invalid conversion: {0}")]
pub struct ConversionError(String);

impl FromStr for TaskStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Unassigned" => Ok(TaskStatus::Unassigned),
            "Assigned" => Ok(TaskStatus::Assigned),
            "Delivered" => Ok(TaskStatus::Delivered),
            s => Err(ConversionError(format!("Invalid task status: {s}"))),
        }
    }
}

impl From<String> for TaskStatus {
    fn from(value: String) -> Self {
        value.parse().unwrap_or_else(|_| {
            error!("Invalid task status: {value}. But this conversion cannot fail. Defaulting to Unassigned");
            TaskStatus::Unassigned
        })
    }
}

//--------------------------------------     WorkerStatus     ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum WorkerStatus {
    /// The worker can accept a new assignment.
    Available,
    /// The worker currently holds an assigned task.
    Busy,
}

impl Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerStatus::Available => write!(f, "Available"),
            WorkerStatus::Busy => write!(f, "Busy"),
        }
    }
}

impl FromStr for WorkerStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Available" => Ok(WorkerStatus::Available),
            "Busy" => Ok(WorkerStatus::Busy),
            s => Err(ConversionError(format!("Invalid worker status: {s}"))),
        }
    }
}

impl From<String> for WorkerStatus {
    fn from(value: String) -> Self {
        value.parse().unwrap_or_else(|_| {
            error!("Invalid worker status: {value}. But this conversion cannot fail. Defaulting to Busy");
            WorkerStatus::Busy
        })
    }
}

//--------------------------------------         Task         ---------------------------------------------------------
/// A fulfillment task as stored in the database. Status only ever moves forward
/// (`Unassigned → Assigned → Delivered`) and `assignee_id` is written exactly once.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub task_id: TaskId,
    pub assignee_id: Option<WorkerId>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
}

//--------------------------------------      TaskHistory     ---------------------------------------------------------
/// One entry in the append-only assignment ledger. A record is written for every transition
/// (and for every assignment invocation, including idempotent replays); records are never
/// updated or deleted.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct TaskHistory {
    pub id: i64,
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub assignee_id: Option<WorkerId>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

//--------------------------------------        Worker        ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Worker {
    pub id: i64,
    pub worker_id: WorkerId,
    pub capabilities: String,
    pub status: WorkerStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewWorker {
    pub worker_id: WorkerId,
    pub capabilities: String,
}

impl NewWorker {
    pub fn new<I: Into<WorkerId>>(worker_id: I, capabilities: &str) -> Self {
        Self { worker_id: worker_id.into(), capabilities: capabilities.to_string() }
    }
}

//--------------------------------------    ProcessedEvent    ---------------------------------------------------------
/// Dedup record for a consumed event. At most one row exists per event identity for this
/// service; rows are never deleted, so the table doubles as an audit trail of everything
/// this consumer has applied.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct ProcessedEvent {
    pub id: i64,
    pub event_id: String,
    pub event_type: String,
    pub source_service: Option<String>,
    pub processed_at: DateTime<Utc>,
}
