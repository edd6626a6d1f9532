//! The relay session and its backend pumps.
//!
//! Layout per session: one task per backend owns that backend's socket and pumps frames into the
//! client sink channel; the session loop drains the sink into the actix-ws session and feeds
//! client frames back to the backends over a broadcast channel. A cancellation token ties the
//! pieces together: whichever side ends first cancels it, and every pump shuts its socket down.
use std::{ops::ControlFlow, sync::Arc, time::Duration};

use actix_ws::{CloseCode, CloseReason, Message, MessageStream, Session};
use futures_util::{SinkExt, StreamExt};
use log::*;
use tokio::{
    net::TcpStream,
    sync::{broadcast, mpsc},
};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message as BackendMessage},
    MaybeTlsStream,
    WebSocketStream,
};
use tokio_util::sync::CancellationToken;

use super::{
    next_backoff,
    tag_text_frame,
    SessionRegistry,
    DIRECT_BACKOFF_START,
    FANIN_RETRY_ATTEMPTS,
    FANIN_RETRY_SPACING,
};
use crate::config::BackendConfig;

type BackendStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CLIENT_SINK_BUFFER: usize = 64;
const CLIENT_BROADCAST_BUFFER: usize = 64;

/// A frame travelling between the backend pumps and the client writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayFrame {
    Text(String),
    Binary(Vec<u8>),
    /// Direct mode only: the backend target is irrecoverable and the session must close.
    Fatal(String),
}

#[derive(Debug, Clone)]
pub enum RelayMode {
    /// One named backend, relayed transparently. The gateway reconnects forever on failure.
    Direct(BackendConfig),
    /// Every configured backend at once, frames tagged with their source name.
    FanIn(Vec<BackendConfig>),
}

impl RelayMode {
    fn label(&self) -> String {
        match self {
            RelayMode::Direct(backend) => format!("direct:{}", backend.name),
            RelayMode::FanIn(_) => "fan-in".to_string(),
        }
    }
}

/// Connection retry behaviour for fan-in backends. Production uses the module constants; tests
/// shrink them.
#[derive(Debug, Clone, Copy)]
pub struct BackendRetry {
    pub attempts: u32,
    pub spacing: Duration,
}

impl Default for BackendRetry {
    fn default() -> Self {
        Self { attempts: FANIN_RETRY_ATTEMPTS, spacing: FANIN_RETRY_SPACING }
    }
}

/// Runs a relay session to completion. Spawn this; it ends when the client disconnects, every
/// backend is gone, or a direct-mode target proves irrecoverable.
pub async fn run_session(
    mut session: Session,
    mut msg_stream: MessageStream,
    mode: RelayMode,
    registry: Arc<SessionRegistry>,
) {
    let cancel = CancellationToken::new();
    let id = registry.register(&mode.label(), cancel.clone());
    let (to_client_tx, mut to_client_rx) = mpsc::channel::<RelayFrame>(CLIENT_SINK_BUFFER);
    let (from_client_tx, _) = broadcast::channel::<RelayFrame>(CLIENT_BROADCAST_BUFFER);
    let mut pumps = Vec::new();
    match &mode {
        RelayMode::Direct(backend) => {
            pumps.push(tokio::spawn(run_direct_backend(
                backend.clone(),
                to_client_tx.clone(),
                from_client_tx.subscribe(),
                cancel.child_token(),
            )));
        },
        RelayMode::FanIn(backends) => {
            for backend in backends {
                pumps.push(tokio::spawn(run_fanin_backend(
                    backend.clone(),
                    BackendRetry::default(),
                    to_client_tx.clone(),
                    from_client_tx.subscribe(),
                    cancel.child_token(),
                )));
            }
        },
    }
    // The pumps hold the remaining senders; when the last backend gives up, recv() below sees the
    // channel close and the session ends.
    drop(to_client_tx);

    let close_reason = loop {
        tokio::select! {
            _ = cancel.cancelled() => break None,
            frame = to_client_rx.recv() => match frame {
                Some(RelayFrame::Text(text)) => {
                    if session.text(text).await.is_err() {
                        break None;
                    }
                },
                Some(RelayFrame::Binary(bytes)) => {
                    if session.binary(bytes).await.is_err() {
                        break None;
                    }
                },
                Some(RelayFrame::Fatal(reason)) => {
                    warn!("🔌️ Session {id} closing: {reason}");
                    break Some(CloseReason { code: CloseCode::Error, description: Some(reason) });
                },
                None => {
                    info!("🔌️ Session {id} has no live backends left; closing");
                    break None;
                },
            },
            msg = msg_stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    // A send error only means no backend is currently subscribed; the frame is
                    // dropped, per-backend delivery failures are not the client's problem.
                    let _ = from_client_tx.send(RelayFrame::Text(text.to_string()));
                },
                Some(Ok(Message::Binary(bytes))) => {
                    let _ = from_client_tx.send(RelayFrame::Binary(bytes.to_vec()));
                },
                Some(Ok(Message::Ping(bytes))) => {
                    if session.pong(&bytes).await.is_err() {
                        break None;
                    }
                },
                Some(Ok(Message::Close(reason))) => {
                    debug!("🔌️ Session {id} client closed the connection: {reason:?}");
                    break None;
                },
                Some(Ok(_)) => {},
                Some(Err(e)) => {
                    warn!("🔌️ Session {id} protocol error: {e}");
                    break None;
                },
                None => break None,
            },
        }
    };
    cancel.cancel();
    // Every backend socket is shut before the client connection goes away.
    for pump in pumps {
        let _ = pump.await;
    }
    registry.deregister(id);
    let _ = session.close(close_reason).await;
}

// An unparsable target comes back as HttpFormat; a parsed-but-unusable one (bad scheme, no host)
// as Url. Neither can ever succeed on retry.
fn is_fatal(e: &WsError) -> bool {
    matches!(e, WsError::Url(_) | WsError::HttpFormat(_))
}

/// Direct-mode backend driver: reconnects forever with exponential backoff, except for an invalid
/// target, which reports [`RelayFrame::Fatal`] and gives up.
pub async fn run_direct_backend(
    backend: BackendConfig,
    to_client: mpsc::Sender<RelayFrame>,
    mut from_client: broadcast::Receiver<RelayFrame>,
    cancel: CancellationToken,
) {
    let mut delay = DIRECT_BACKOFF_START;
    loop {
        let stream = tokio::select! {
            _ = cancel.cancelled() => return,
            result = connect_async(backend.url.as_str()) => match result {
                Ok((stream, _)) => stream,
                Err(e) if is_fatal(&e) => {
                    error!("🔌️ Relay target '{}' ({}) is invalid: {e}", backend.name, backend.url);
                    let _ = to_client.send(RelayFrame::Fatal(format!("invalid relay target '{}'", backend.name))).await;
                    return;
                },
                Err(e) => {
                    warn!("🔌️ Could not connect to backend '{}': {e}. Retrying in {delay:?}", backend.name);
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {},
                    }
                    delay = next_backoff(delay);
                    continue;
                },
            },
        };
        info!("🔌️ Connected to backend '{}'", backend.name);
        delay = DIRECT_BACKOFF_START;
        if pump(&backend.name, stream, &to_client, &mut from_client, &cancel, false).await.is_break() {
            return;
        }
        warn!("🔌️ Backend '{}' dropped; reconnecting in {delay:?}", backend.name);
    }
}

/// Fan-in backend driver: a bounded connection budget, shared across initial connect and
/// mid-stream reconnects. When the budget runs out the backend is dropped from the set; the
/// session carries on with whatever remains.
pub async fn run_fanin_backend(
    backend: BackendConfig,
    retry: BackendRetry,
    to_client: mpsc::Sender<RelayFrame>,
    mut from_client: broadcast::Receiver<RelayFrame>,
    cancel: CancellationToken,
) {
    let mut attempts_left = retry.attempts;
    loop {
        let stream = loop {
            if attempts_left == 0 {
                warn!(
                    "🔌️ Backend '{}' exhausted its {} connection attempts and is dropped from the fan-in set",
                    backend.name, retry.attempts
                );
                return;
            }
            attempts_left -= 1;
            tokio::select! {
                _ = cancel.cancelled() => return,
                result = connect_async(backend.url.as_str()) => match result {
                    Ok((stream, _)) => break stream,
                    Err(e) => {
                        debug!(
                            "🔌️ Fan-in connect to '{}' failed: {e}. {attempts_left} attempts left.",
                            backend.name
                        );
                        tokio::select! {
                            _ = cancel.cancelled() => return,
                            _ = tokio::time::sleep(retry.spacing) => {},
                        }
                    },
                },
            }
        };
        info!("🔌️ Fan-in backend '{}' connected", backend.name);
        if pump(&backend.name, stream, &to_client, &mut from_client, &cancel, true).await.is_break() {
            return;
        }
        warn!("🔌️ Fan-in backend '{}' dropped mid-stream; reconnecting with the remaining budget", backend.name);
    }
}

/// Pumps one live backend socket. `Break` means the session itself is over (cancelled, or the
/// client side is gone); `Continue` means only this backend connection died and the caller may
/// reconnect.
async fn pump(
    name: &str,
    stream: BackendStream,
    to_client: &mpsc::Sender<RelayFrame>,
    from_client: &mut broadcast::Receiver<RelayFrame>,
    cancel: &CancellationToken,
    tag: bool,
) -> ControlFlow<()> {
    let (mut write, mut read) = stream.split();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = write.close().await;
                return ControlFlow::Break(());
            },
            msg = read.next() => match msg {
                Some(Ok(BackendMessage::Text(text))) => {
                    let text = if tag { tag_text_frame(name, &text) } else { text };
                    if to_client.send(RelayFrame::Text(text)).await.is_err() {
                        return ControlFlow::Break(());
                    }
                },
                Some(Ok(BackendMessage::Binary(bytes))) => {
                    if to_client.send(RelayFrame::Binary(bytes)).await.is_err() {
                        return ControlFlow::Break(());
                    }
                },
                Some(Ok(BackendMessage::Close(_))) | None => return ControlFlow::Continue(()),
                Some(Ok(_)) => {},
                Some(Err(e)) => {
                    warn!("🔌️ Error on backend '{name}' stream: {e}");
                    return ControlFlow::Continue(());
                },
            },
            frame = from_client.recv() => match frame {
                Ok(RelayFrame::Text(text)) => {
                    if let Err(e) = write.send(BackendMessage::Text(text)).await {
                        warn!("🔌️ Could not forward client frame to backend '{name}': {e}");
                        return ControlFlow::Continue(());
                    }
                },
                Ok(RelayFrame::Binary(bytes)) => {
                    if let Err(e) = write.send(BackendMessage::Binary(bytes)).await {
                        warn!("🔌️ Could not forward client frame to backend '{name}': {e}");
                        return ControlFlow::Continue(());
                    }
                },
                Ok(RelayFrame::Fatal(_)) => {},
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("🔌️ Backend '{name}' fell behind; dropped {n} client frames");
                },
                Err(broadcast::error::RecvError::Closed) => return ControlFlow::Break(()),
            },
        }
    }
}

#[cfg(test)]
mod test {
    use tokio::{net::TcpListener, task::JoinHandle, time::timeout};

    use super::*;

    const TICK: Duration = Duration::from_secs(2);

    /// A WebSocket server that echoes text and binary frames on every connection it accepts.
    async fn spawn_echo_server() -> (String, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                    while let Some(Ok(msg)) = ws.next().await {
                        if (msg.is_text() || msg.is_binary()) && ws.send(msg).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });
        (format!("ws://{addr}"), handle)
    }

    fn channels() -> (mpsc::Sender<RelayFrame>, mpsc::Receiver<RelayFrame>, broadcast::Sender<RelayFrame>) {
        let (to_client_tx, to_client_rx) = mpsc::channel(16);
        let (from_client_tx, _) = broadcast::channel(16);
        (to_client_tx, to_client_rx, from_client_tx)
    }

    #[tokio::test]
    async fn direct_backend_relays_both_ways_untagged() {
        let (url, server) = spawn_echo_server().await;
        let (to_client_tx, mut to_client_rx, from_client_tx) = channels();
        let cancel = CancellationToken::new();
        let backend = BackendConfig { name: "orders".into(), url };
        let pump = tokio::spawn(run_direct_backend(backend, to_client_tx, from_client_tx.subscribe(), cancel.clone()));

        // Wait for the connection before publishing the client frame.
        tokio::time::sleep(Duration::from_millis(200)).await;
        from_client_tx.send(RelayFrame::Text("hello".into())).unwrap();
        let frame = timeout(TICK, to_client_rx.recv()).await.unwrap().unwrap();
        assert_eq!(frame, RelayFrame::Text("hello".into()));

        from_client_tx.send(RelayFrame::Binary(vec![1, 2, 3])).unwrap();
        let frame = timeout(TICK, to_client_rx.recv()).await.unwrap().unwrap();
        assert_eq!(frame, RelayFrame::Binary(vec![1, 2, 3]));

        cancel.cancel();
        timeout(TICK, pump).await.unwrap().unwrap();
        server.abort();
    }

    #[tokio::test]
    async fn direct_backend_resumes_after_backend_recovery() {
        // First incarnation of the backend: echo one frame, then die.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let url = format!("ws://{addr}");
        let first = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            if let Some(Ok(msg)) = ws.next().await {
                let _ = ws.send(msg).await;
            }
        });
        let (to_client_tx, mut to_client_rx, from_client_tx) = channels();
        let cancel = CancellationToken::new();
        let backend = BackendConfig { name: "orders".into(), url };
        let driver =
            tokio::spawn(run_direct_backend(backend, to_client_tx, from_client_tx.subscribe(), cancel.clone()));

        tokio::time::sleep(Duration::from_millis(200)).await;
        from_client_tx.send(RelayFrame::Text("before".into())).unwrap();
        let frame = timeout(TICK, to_client_rx.recv()).await.unwrap().unwrap();
        assert_eq!(frame, RelayFrame::Text("before".into()));
        timeout(TICK, first).await.unwrap().unwrap();

        // Resurrect the backend on the same address. The driver reconnects on its backoff schedule
        // and the buffered client frame flows through; the client channel never closed.
        let listener = TcpListener::bind(addr).await.unwrap();
        let second = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                if (msg.is_text() || msg.is_binary()) && ws.send(msg).await.is_err() {
                    break;
                }
            }
        });
        from_client_tx.send(RelayFrame::Text("after".into())).unwrap();
        let frame = timeout(Duration::from_secs(10), to_client_rx.recv()).await.unwrap().unwrap();
        assert_eq!(frame, RelayFrame::Text("after".into()));

        cancel.cancel();
        timeout(TICK, driver).await.unwrap().unwrap();
        second.abort();
    }

    #[tokio::test]
    async fn cancellation_closes_the_backend_socket_before_the_pump_ends() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (closed_tx, closed_rx) = tokio::sync::oneshot::channel();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                if msg.is_close() {
                    break;
                }
            }
            let _ = closed_tx.send(());
        });
        let (to_client_tx, _to_client_rx, from_client_tx) = channels();
        let cancel = CancellationToken::new();
        let backend = BackendConfig { name: "orders".into(), url: format!("ws://{addr}") };
        let driver =
            tokio::spawn(run_direct_backend(backend, to_client_tx, from_client_tx.subscribe(), cancel.clone()));
        tokio::time::sleep(Duration::from_millis(200)).await;

        cancel.cancel();
        timeout(TICK, driver).await.unwrap().unwrap();
        // The backend saw the close frame by the time the pump finished, so awaiting the pump
        // handles means no socket outlives the session.
        timeout(TICK, closed_rx).await.unwrap().unwrap();
        server.abort();
    }

    #[tokio::test]
    async fn invalid_direct_target_reports_fatal() {
        let (to_client_tx, mut to_client_rx, from_client_tx) = channels();
        let backend = BackendConfig { name: "orders".into(), url: "this is not a url".into() };
        tokio::spawn(run_direct_backend(backend, to_client_tx, from_client_tx.subscribe(), CancellationToken::new()));
        let frame = timeout(TICK, to_client_rx.recv()).await.unwrap().unwrap();
        assert!(matches!(frame, RelayFrame::Fatal(reason) if reason.contains("orders")));
    }

    #[tokio::test]
    async fn fanin_tags_frames_and_survives_a_dead_backend() {
        let (url, server) = spawn_echo_server().await;
        let (to_client_tx, mut to_client_rx, from_client_tx) = channels();
        let cancel = CancellationToken::new();
        let retry = BackendRetry { attempts: 3, spacing: Duration::from_millis(10) };
        let live = BackendConfig { name: "orders".into(), url };
        // Nothing listens on port 9; this backend burns its budget and drops out.
        let dead = BackendConfig { name: "drivers".into(), url: "ws://127.0.0.1:9".into() };
        tokio::spawn(run_fanin_backend(
            live,
            retry,
            to_client_tx.clone(),
            from_client_tx.subscribe(),
            cancel.clone(),
        ));
        tokio::spawn(run_fanin_backend(dead, retry, to_client_tx, from_client_tx.subscribe(), cancel.clone()));

        tokio::time::sleep(Duration::from_millis(200)).await;
        from_client_tx.send(RelayFrame::Text(r#"{"ping":1}"#.into())).unwrap();
        let frame = timeout(TICK, to_client_rx.recv()).await.unwrap().unwrap();
        let RelayFrame::Text(text) = frame else { panic!("Expected a text frame") };
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["source"], "orders");
        assert_eq!(value["ping"], 1);

        cancel.cancel();
        server.abort();
    }

    #[tokio::test]
    async fn fanin_budget_exhaustion_ends_the_backend_task() {
        let (to_client_tx, to_client_rx, from_client_tx) = channels();
        let retry = BackendRetry { attempts: 2, spacing: Duration::from_millis(5) };
        let dead = BackendConfig { name: "drivers".into(), url: "ws://127.0.0.1:9".into() };
        let handle = tokio::spawn(run_fanin_backend(
            dead,
            retry,
            to_client_tx,
            from_client_tx.subscribe(),
            CancellationToken::new(),
        ));
        timeout(TICK, handle).await.unwrap().unwrap();
        drop(to_client_rx);
    }

    #[tokio::test]
    async fn fanin_wraps_non_json_backend_text() {
        let (url, server) = spawn_echo_server().await;
        let (to_client_tx, mut to_client_rx, from_client_tx) = channels();
        let cancel = CancellationToken::new();
        let backend = BackendConfig { name: "orders".into(), url };
        tokio::spawn(run_fanin_backend(
            backend,
            BackendRetry::default(),
            to_client_tx,
            from_client_tx.subscribe(),
            cancel.clone(),
        ));
        tokio::time::sleep(Duration::from_millis(200)).await;
        from_client_tx.send(RelayFrame::Text("plain words".into())).unwrap();
        let frame = timeout(TICK, to_client_rx.recv()).await.unwrap().unwrap();
        let RelayFrame::Text(text) = frame else { panic!("Expected a text frame") };
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "unknown");
        assert_eq!(value["source"], "orders");
        assert_eq!(value["raw"], "plain words");
        cancel.cancel();
        server.abort();
    }
}
