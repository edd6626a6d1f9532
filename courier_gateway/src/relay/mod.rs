//! Relay sessions.
//!
//! A relay session pairs one client WebSocket with one backend stream (direct mode, served at
//! `/ws/{backend}`) or with every configured backend at once (fan-in mode, served at `/ws`).
//! Backend connections are maintained by the gateway; their outages are invisible to the client
//! apart from gaps in the stream, with one exception: a direct-mode target that cannot ever be
//! reached (bad address) closes the client connection.
mod registry;
mod session;

use std::time::Duration;

use serde_json::{json, Value};

pub use self::{
    registry::{SessionInfo, SessionRegistry},
    session::{run_session, BackendRetry, RelayFrame, RelayMode},
};

/// Direct mode: first reconnect delay after a backend drops.
pub const DIRECT_BACKOFF_START: Duration = Duration::from_secs(1);
/// Direct mode: reconnect delay ceiling.
pub const DIRECT_BACKOFF_CEILING: Duration = Duration::from_secs(8);
/// Fan-in mode: connection attempts per backend before it is dropped from the set.
pub const FANIN_RETRY_ATTEMPTS: u32 = 60;
/// Fan-in mode: fixed spacing between fan-in connection attempts.
pub const FANIN_RETRY_SPACING: Duration = Duration::from_millis(500);

/// The next reconnect delay: doubles until the ceiling.
pub fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(DIRECT_BACKOFF_CEILING)
}

/// Decorates a backend text frame with its source name for the fan-in stream.
///
/// JSON objects are annotated in place with a `source` field. Anything else (non-JSON text, or
/// JSON that is not an object) cannot carry the tag, so it is wrapped whole.
pub fn tag_text_frame(source: &str, text: &str) -> String {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(mut map)) => {
            map.insert("source".to_string(), Value::String(source.to_string()));
            Value::Object(map).to_string()
        },
        _ => json!({ "type": "unknown", "source": source, "raw": text }).to_string(),
    }
}
