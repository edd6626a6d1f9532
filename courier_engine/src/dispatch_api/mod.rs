//! The dispatch engine public API.
//!
//! [`DispatchApi`] orchestrates the assignment flow on top of a [`crate::traits::DispatchDatabase`]
//! backend and publishes domain events through the hook system as durable state changes commit.
//! [`CompletionScheduler`] owns the detached timers that turn assignments into deliveries.
mod api;
mod scheduler;

pub use api::{DeliveryWindow, DispatchApi};
pub use scheduler::CompletionScheduler;
