// src/connection/manager.rs
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use backoff::{backoff::Backoff, ExponentialBackoff};
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::codec::{self, EnginePacket, Handshake, SocketPacket};
use super::subscription::{SimulatorEvent, Subscription, SubscriptionId, SubscriptionRegistry};
use crate::config::ConnectionSettings;
use crate::error::{ClientError, Result};
use crate::protocol::Action;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const OUTBOUND_CAPACITY: usize = 100;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
const RECONNECTION_DELAY_MAX: Duration = Duration::from_secs(5);

// Parse `base_url` and switch it to the matching websocket scheme
fn websocket_base(base_url: &str) -> Result<reqwest::Url> {
    let mut url = reqwest::Url::parse(base_url)
        .map_err(|e| ClientError::Transport(format!("invalid base url {base_url}: {e}")))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(ClientError::Transport(format!(
                "unsupported url scheme {other}"
            )));
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| ClientError::Transport(format!("cannot use scheme {scheme}")))?;
    Ok(url)
}

/// Build the websocket URL for a Socket.IO endpoint.
///
/// `http` maps to `ws` and `https` to `wss`; the socket path always ends up
/// as `/<path>/`.
pub fn socket_url(base_url: &str, socket_path: &str) -> Result<String> {
    let mut url = websocket_base(base_url)?;
    let trimmed = socket_path.trim_matches('/');
    let path = if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{trimmed}/")
    };
    url.set_path(&path);
    url.set_query(Some("EIO=4&transport=websocket"));
    Ok(url.to_string())
}

/// Like [`socket_url`], but appends `socket_path` to the host exactly as
/// written. Used to find out which spelling of the path a server accepts.
pub fn raw_socket_url(base_url: &str, socket_path: &str) -> Result<String> {
    let url = websocket_base(base_url)?;
    let host = url
        .host_str()
        .ok_or_else(|| ClientError::Transport(format!("base url {base_url} has no host")))?;
    let authority = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    Ok(format!(
        "{}://{}{}?EIO=4&transport=websocket",
        url.scheme(),
        authority,
        socket_path
    ))
}

// Handle to a running connection task
struct Link {
    outbound_tx: mpsc::Sender<String>,
    shutdown_tx: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

// State the connection task shares with the manager
#[derive(Clone)]
struct TaskContext {
    endpoint: String,
    settings: ConnectionSettings,
    subscriptions: SubscriptionRegistry,
    connected: Arc<AtomicBool>,
}

// Why a single websocket session ended
#[derive(Debug)]
enum SessionEnd {
    Shutdown,
    ServerDisconnect,
    Lost(String),
}

/// Connection manager for the simulator's Socket.IO endpoint
pub struct ConnectionManager {
    endpoint: String,
    settings: ConnectionSettings,
    subscriptions: SubscriptionRegistry,
    connected: Arc<AtomicBool>,
    link: Mutex<Option<Link>>,
}

impl ConnectionManager {
    /// Create a manager for the given websocket endpoint (see [`socket_url`]).
    /// Nothing is opened until [`connect`](Self::connect).
    pub fn new(endpoint: String, settings: ConnectionSettings) -> Result<Self> {
        if endpoint.is_empty() {
            return Err(ClientError::Transport("empty websocket endpoint".into()));
        }
        Ok(Self {
            endpoint,
            settings,
            subscriptions: SubscriptionRegistry::new(),
            connected: Arc::new(AtomicBool::new(false)),
            link: Mutex::new(None),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.subscriptions
    }

    /// Register a listener for a named event
    pub async fn add_listener<F>(
        &self,
        event: SimulatorEvent,
        description: impl Into<String>,
        handler: F,
    ) -> SubscriptionId
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscriptions
            .add(Subscription::new(event, description, handler))
            .await
    }

    pub async fn remove_listener(&self, id: SubscriptionId) -> bool {
        self.subscriptions.remove(id).await
    }

    /// Open the connection. Returns immediately if one is already open or
    /// still reconnecting.
    ///
    /// In the reconnecting case `is_connected()` stays false until the
    /// transport is back, and sends made in the meantime fail with
    /// [`ClientError::NotConnected`].
    pub async fn connect(&self) -> Result<()> {
        let mut link = self.link.lock().await;
        if let Some(existing) = link.as_ref() {
            if !existing.handle.is_finished() {
                return Ok(());
            }
        }

        info!("Connecting to {}", self.endpoint);
        let (ws, handshake) = match open_socket(&self.endpoint, self.settings.connect_timeout()).await
        {
            Ok(opened) => opened,
            Err(e) => {
                drop(link);
                error!("Failed to connect to {}: {}", self.endpoint, e);
                self.subscriptions
                    .dispatch(&SimulatorEvent::Error, &json!({ "message": e.to_string() }))
                    .await;
                return Err(e);
            }
        };
        info!("WebSocket connected (sid={})", handshake.sid);
        self.connected.store(true, Ordering::SeqCst);
        // Listeners hear `connect` before any server event; nothing is read
        // from the socket until the task below starts.
        self.subscriptions
            .dispatch(&SimulatorEvent::Connect, &Value::Null)
            .await;

        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let ctx = TaskContext {
            endpoint: self.endpoint.clone(),
            settings: self.settings.clone(),
            subscriptions: self.subscriptions.clone(),
            connected: Arc::clone(&self.connected),
        };
        let handle = tokio::spawn(run_connection(ws, handshake, ctx, outbound_rx, shutdown_rx));

        *link = Some(Link {
            outbound_tx,
            shutdown_tx,
            handle,
        });
        Ok(())
    }

    /// Tear down the connection and clear local state.
    pub async fn disconnect(&self) {
        let Some(link) = self.link.lock().await.take() else {
            return;
        };
        let was_connected = self.connected.swap(false, Ordering::SeqCst);

        let _ = link.shutdown_tx.send(());
        let mut handle = link.handle;
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await.is_err() {
            error!("Timeout waiting for connection task to complete, forcing shutdown");
            handle.abort();
        }

        if was_connected {
            info!("WebSocket disconnected");
            self.subscriptions
                .dispatch(
                    &SimulatorEvent::Disconnect,
                    &json!({ "reason": "io client disconnect" }),
                )
                .await;
        }
    }

    /// Emit a named event with one argument. Rejects without sending when
    /// not connected.
    pub async fn emit(&self, event: &str, data: &Value) -> Result<()> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        let frame = codec::encode_event(event, data)?;
        let outbound_tx = {
            let link = self.link.lock().await;
            link.as_ref().map(|l| l.outbound_tx.clone())
        }
        .ok_or(ClientError::NotConnected)?;

        outbound_tx
            .send(frame)
            .await
            .map_err(|_| ClientError::NotConnected)
    }

    /// Send an action envelope as the `message` event.
    pub async fn send(&self, action: &Action) -> Result<()> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        debug!("Sending action `{}`", action.name());
        let envelope = action.to_envelope()?;
        self.emit("message", &Value::String(envelope)).await
    }

    /// Open a connection, complete the handshake and close it again.
    pub async fn probe(endpoint: &str, timeout: Duration) -> Result<Handshake> {
        let (mut ws, handshake) = open_socket(endpoint, timeout).await?;
        let _ = ws.send(Message::Text(codec::DISCONNECT_FRAME.into())).await;
        let _ = ws.close(None).await;
        Ok(handshake)
    }
}

// Connect the websocket and join the default namespace
async fn open_socket(endpoint: &str, timeout: Duration) -> Result<(WsStream, Handshake)> {
    let handshake = async {
        let (mut ws, _) = connect_async(endpoint).await?;

        let handshake = loop {
            match next_packet(&mut ws).await? {
                EnginePacket::Open(hs) => break hs,
                other => debug!("Ignoring {:?} before open", other),
            }
        };
        debug!(
            "Engine.IO open: sid={}, ping_interval={}ms, ping_timeout={}ms",
            handshake.sid, handshake.ping_interval, handshake.ping_timeout
        );

        ws.send(Message::Text(codec::CONNECT_FRAME.into())).await?;
        loop {
            match next_packet(&mut ws).await? {
                EnginePacket::Message(SocketPacket::Connect(_)) => break,
                EnginePacket::Message(SocketPacket::ConnectError(data)) => {
                    let message = data
                        .get("message")
                        .and_then(Value::as_str)
                        .map(str::to_owned)
                        .unwrap_or_else(|| data.to_string());
                    return Err(ClientError::Handshake(message));
                }
                EnginePacket::Ping => {
                    ws.send(Message::Text(codec::PONG_FRAME.into())).await?;
                }
                other => debug!("Ignoring {:?} before namespace connect", other),
            }
        }
        Ok::<_, ClientError>((ws, handshake))
    };

    tokio::time::timeout(timeout, handshake)
        .await
        .map_err(|_| ClientError::Timeout {
            event: "connect".into(),
            after: timeout,
        })?
}

async fn next_packet(ws: &mut WsStream) -> Result<EnginePacket> {
    loop {
        match ws.next().await {
            None => return Err(ClientError::Transport("connection closed".into())),
            Some(Err(e)) => return Err(e.into()),
            Some(Ok(Message::Text(text))) => return codec::decode(text.as_str()),
            Some(Ok(Message::Close(frame))) => {
                return Err(ClientError::Transport(format!(
                    "connection closed by server: {frame:?}"
                )));
            }
            Some(Ok(_)) => continue,
        }
    }
}

// Owns the websocket for the lifetime of one logical connection, including
// transport-level reconnection.
async fn run_connection(
    ws: WsStream,
    handshake: Handshake,
    ctx: TaskContext,
    mut outbound_rx: mpsc::Receiver<String>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut ws = ws;
    let mut handshake = handshake;

    'manager_loop: loop {
        let end = run_session(ws, &handshake, &ctx, &mut outbound_rx, &mut shutdown_rx).await;

        let reason = match end {
            SessionEnd::Shutdown => break 'manager_loop,
            SessionEnd::ServerDisconnect => {
                ctx.connected.store(false, Ordering::SeqCst);
                info!("Server closed the connection");
                ctx.subscriptions
                    .dispatch(
                        &SimulatorEvent::Disconnect,
                        &json!({ "reason": "io server disconnect" }),
                    )
                    .await;
                break 'manager_loop;
            }
            SessionEnd::Lost(reason) => reason,
        };

        ctx.connected.store(false, Ordering::SeqCst);
        warn!("Connection lost ({}), will reconnect", reason);
        ctx.subscriptions
            .dispatch(&SimulatorEvent::Disconnect, &json!({ "reason": reason }))
            .await;

        match reconnect(&ctx, &mut outbound_rx, &mut shutdown_rx).await {
            Some((new_ws, new_handshake)) => {
                ws = new_ws;
                handshake = new_handshake;
                ctx.connected.store(true, Ordering::SeqCst);
                info!("Reconnected (sid={})", handshake.sid);
                ctx.subscriptions
                    .dispatch(&SimulatorEvent::Connect, &Value::Null)
                    .await;
            }
            None => break 'manager_loop,
        }
    }

    debug!("Connection task exiting");
}

async fn run_session(
    ws: WsStream,
    handshake: &Handshake,
    ctx: &TaskContext,
    outbound_rx: &mut mpsc::Receiver<String>,
    shutdown_rx: &mut broadcast::Receiver<()>,
) -> SessionEnd {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let heartbeat = Duration::from_millis(handshake.ping_interval + handshake.ping_timeout);
    let mut deadline = Instant::now() + heartbeat;

    loop {
        tokio::select! {
            frame = outbound_rx.recv() => {
                let Some(frame) = frame else {
                    let _ = ws_tx.send(Message::Text(codec::DISCONNECT_FRAME.into())).await;
                    let _ = ws_tx.close().await;
                    return SessionEnd::Shutdown;
                };
                debug!("Sending frame: {}", frame);
                if let Err(e) = ws_tx.send(Message::Text(frame.into())).await {
                    return SessionEnd::Lost(e.to_string());
                }
            }

            msg = ws_rx.next() => {
                deadline = Instant::now() + heartbeat;
                match msg {
                    None => return SessionEnd::Lost("transport close".into()),
                    Some(Err(e)) => return SessionEnd::Lost(e.to_string()),
                    Some(Ok(Message::Close(_))) => return SessionEnd::Lost("transport close".into()),
                    Some(Ok(Message::Text(text))) => match codec::decode(text.as_str()) {
                        Ok(EnginePacket::Ping) => {
                            if let Err(e) = ws_tx.send(Message::Text(codec::PONG_FRAME.into())).await {
                                return SessionEnd::Lost(e.to_string());
                            }
                        }
                        Ok(EnginePacket::Message(SocketPacket::Event { name, data, .. })) => {
                            let event = SimulatorEvent::from_name(&name);
                            debug!("Received `{}` event", event);
                            ctx.subscriptions.dispatch(&event, &data).await;
                        }
                        Ok(EnginePacket::Message(SocketPacket::Disconnect)) => {
                            return SessionEnd::ServerDisconnect;
                        }
                        Ok(EnginePacket::Close) => return SessionEnd::Lost("transport close".into()),
                        Ok(other) => debug!("Ignoring {:?}", other),
                        Err(e) => warn!("Dropping undecodable frame: {}", e),
                    },
                    Some(Ok(_)) => {}
                }
            }

            _ = tokio::time::sleep_until(deadline) => {
                return SessionEnd::Lost("ping timeout".into());
            }

            _ = shutdown_rx.recv() => {
                let _ = ws_tx.send(Message::Text(codec::DISCONNECT_FRAME.into())).await;
                let _ = ws_tx.close().await;
                return SessionEnd::Shutdown;
            }
        }
    }
}

// Retry the handshake with backoff. Frames queued while disconnected are dropped.
async fn reconnect(
    ctx: &TaskContext,
    outbound_rx: &mut mpsc::Receiver<String>,
    shutdown_rx: &mut broadcast::Receiver<()>,
) -> Option<(WsStream, Handshake)> {
    let initial = ctx.settings.reconnection_delay();
    let mut backoff = ExponentialBackoff {
        initial_interval: initial,
        max_interval: initial.max(RECONNECTION_DELAY_MAX),
        multiplier: 2.0,
        randomization_factor: 0.5,
        max_elapsed_time: None,
        ..ExponentialBackoff::default()
    };
    backoff.reset();

    for attempt in 1..=ctx.settings.reconnection_attempts {
        let delay = backoff.next_backoff().unwrap_or(backoff.max_interval);
        info!(
            "Will attempt reconnection in {} ms (attempt #{}/{})",
            delay.as_millis(),
            attempt,
            ctx.settings.reconnection_attempts
        );

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                frame = outbound_rx.recv() => match frame {
                    Some(frame) => warn!("Dropping frame while disconnected: {}", frame),
                    None => return None,
                },
                _ = shutdown_rx.recv() => return None,
            }
        }

        match open_socket(&ctx.endpoint, ctx.settings.connect_timeout()).await {
            Ok(opened) => return Some(opened),
            Err(e) => warn!("Reconnection attempt #{} failed: {}", attempt, e),
        }
    }

    error!(
        "Giving up after {} reconnection attempts",
        ctx.settings.reconnection_attempts
    );
    ctx.subscriptions
        .dispatch(
            &SimulatorEvent::Error,
            &json!({ "message": "reconnection attempts exhausted" }),
        )
        .await;
    None
}
