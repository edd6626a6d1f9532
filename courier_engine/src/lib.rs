//! Courier Dispatch Engine
//!
//! The dispatch engine contains the core logic of the courier fulfillment workflow: consuming order
//! and payment events from a durable message queue, binding available drivers to fulfillment tasks,
//! and publishing the resulting state changes as new events.
//!
//! The library is divided into three main sections:
//! 1. Database management and control ([`mod@sqlite`]). SQLite is the supported backend. You should
//!    never need to access the database directly; use the public API instead. The exception is the
//!    data types used in the database, defined in the [`mod@db_types`] module.
//! 2. The engine public API ([`DispatchApi`]) together with the idempotent consumer loop
//!    ([`mod@consumer`]) and the queue contract ([`mod@queue`]). Backends implement the traits in
//!    [`mod@traits`] to support the engine.
//! 3. A set of events that can be subscribed to ([`mod@events`]). These are emitted as assignments
//!    progress; the dispatch service hooks into them to mirror state changes onto the queue.
pub mod consumer;
pub mod db_types;
mod dispatch_api;
pub mod events;
pub mod queue;
pub mod sqlite;
pub mod traits;

pub use dispatch_api::{CompletionScheduler, DeliveryWindow, DispatchApi};
pub use sqlite::SqliteDatabase;
pub use traits::{AssignOutcome, Assignment, DeliveredTask, DispatchDatabase, DispatchError, EventRecord};
