//! # Courier dispatch server
//! This module hosts the HTTP server and background workers for the dispatch service. It is
//! responsible for:
//! * Running the queue consumer that reacts to order and payment events.
//! * Mirroring the engine's domain events onto the outbound queue topic for downstream services.
//! * Serving read endpoints for tasks, the assignment ledger, and workers, plus worker
//!   registration and event injection.
//!
//! ## Configuration
//! The server is configured via environment variables. See [config](config/index.html) for more
//! information.

pub mod config;
pub mod consumer_worker;
pub mod errors;
pub mod integrations;
pub mod routes;
pub mod server;

#[cfg(test)]
mod endpoint_tests;
