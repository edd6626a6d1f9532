//! # Courier relay gateway
//! The gateway sits between browser clients and the backend services' real-time WebSocket streams.
//! It owns the backend connections (reconnection, backoff, retry budgets) so clients only ever deal
//! with a single stable socket:
//! * `GET /ws/{backend}` — a transparent 1:1 relay against one named backend.
//! * `GET /ws` — a fan-in relay aggregating every configured backend into one stream, each frame
//!   tagged with its source.
//! * `/health` — reports the configured backends and live session count.
//!
//! ## Configuration
//! The gateway is configured via environment variables. See [config](config/index.html) for more
//! information.

pub mod config;
pub mod errors;
pub mod relay;
pub mod server;
