//! Interface contracts for dispatch engine database backends.
//!
//! A backend must expose transactional read/write/upsert semantics over the dispatch entities (tasks, workers,
//! the assignment ledger and the processed-event log). The [`DispatchDatabase`] trait defines that behaviour;
//! the SQLite backend in [`crate::sqlite`] is the reference implementation.
mod dispatch_database;

pub use dispatch_database::{AssignOutcome, Assignment, DeliveredTask, DispatchDatabase, DispatchError, EventRecord};
