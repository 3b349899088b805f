// tests/helpers.rs
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use charge_sim_client::config::Settings;
use charge_sim_client::connection::codec::{self, EnginePacket, SocketPacket};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;

/// Builds reply frames for an inbound action envelope.
pub type Responder = Arc<dyn Fn(&Value) -> Vec<(String, Value)> + Send + Sync>;

#[derive(Clone)]
pub struct ServerOptions {
    pub ping_interval_ms: u64,
    pub ping_timeout_ms: u64,
    pub connect_error: Option<String>,
    /// Events sent right after the namespace connect is acknowledged.
    pub greeting: Vec<(String, Value)>,
    pub responder: Responder,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            ping_interval_ms: 25_000,
            ping_timeout_ms: 20_000,
            connect_error: None,
            greeting: Vec::new(),
            responder: Arc::new(|_| Vec::new()),
        }
    }
}

/// In-process Socket.IO server answering on `/ws/`.
pub struct FakeServer {
    pub addr: SocketAddr,
    pub connections: Arc<AtomicUsize>,
    refusing: Arc<AtomicBool>,
    actions: Mutex<mpsc::UnboundedReceiver<Value>>,
    push_tx: broadcast::Sender<String>,
    kick_tx: broadcast::Sender<()>,
}

impl FakeServer {
    pub async fn start(options: ServerOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(AtomicUsize::new(0));
        let refusing = Arc::new(AtomicBool::new(false));
        let (actions_tx, actions_rx) = mpsc::unbounded_channel();
        let (push_tx, _) = broadcast::channel(64);
        let (kick_tx, _) = broadcast::channel(4);

        let accepted = Arc::clone(&connections);
        let push = push_tx.clone();
        let kick = kick_tx.clone();
        let refuse = Arc::clone(&refusing);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                if refuse.load(Ordering::SeqCst) {
                    drop(stream);
                    continue;
                }
                tokio::spawn(serve(
                    stream,
                    options.clone(),
                    Arc::clone(&accepted),
                    actions_tx.clone(),
                    push.subscribe(),
                    kick.subscribe(),
                ));
            }
        });

        Self {
            addr,
            connections,
            refusing,
            actions: Mutex::new(actions_rx),
            push_tx,
            kick_tx,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Settings pointing at this server with short timeouts.
    pub fn settings(&self) -> Settings {
        let mut settings = Settings::defaults().unwrap();
        settings.server.base_url = self.base_url();
        settings.server.socket_path = "/ws".into();
        settings.connection.connect_timeout_ms = 2000;
        settings.connection.reconnection_delay_ms = 20;
        settings.connection.reconnection_attempts = 3;
        settings.requests.search_timeout_ms = 2000;
        settings.requests.rul_optimization_timeout_ms = 2000;
        settings
    }

    /// Emit an event to every connected client.
    pub fn push(&self, name: &str, data: Value) {
        let frame = codec::encode_event(name, &data).unwrap();
        let _ = self.push_tx.send(frame);
    }

    /// Drop every open socket without a Socket.IO disconnect.
    pub fn drop_connections(&self) {
        let _ = self.kick_tx.send(());
    }

    /// Close new TCP connections right after accepting them.
    pub fn refuse_connections(&self) {
        self.refusing.store(true, Ordering::SeqCst);
    }

    pub fn accept_connections(&self) {
        self.refusing.store(false, Ordering::SeqCst);
    }

    /// Send a namespace DISCONNECT to every connected client.
    pub fn disconnect_clients(&self) {
        let _ = self.push_tx.send(codec::DISCONNECT_FRAME.to_string());
    }

    /// Next action envelope received from any client.
    pub async fn next_action(&self) -> Value {
        let mut actions = self.actions.lock().await;
        tokio::time::timeout(Duration::from_secs(5), actions.recv())
            .await
            .expect("no action received")
            .expect("server stopped")
    }
}

async fn serve(
    stream: TcpStream,
    options: ServerOptions,
    connections: Arc<AtomicUsize>,
    actions_tx: mpsc::UnboundedSender<Value>,
    mut push_rx: broadcast::Receiver<String>,
    mut kick_rx: broadcast::Receiver<()>,
) {
    let check_path = |req: &Request, resp: Response| {
        if req.uri().path() == "/ws/" {
            Ok(resp)
        } else {
            let mut err = ErrorResponse::new(Some("not found".into()));
            *err.status_mut() = StatusCode::NOT_FOUND;
            Err(err)
        }
    };
    let Ok(mut ws) = accept_hdr_async(stream, check_path).await else {
        return;
    };

    let n = connections.fetch_add(1, Ordering::SeqCst) + 1;
    let open = json!({
        "sid": format!("engine-{n}"),
        "upgrades": [],
        "pingInterval": options.ping_interval_ms,
        "pingTimeout": options.ping_timeout_ms,
        "maxPayload": 1_000_000
    });
    if ws.send(Message::Text(format!("0{open}").into())).await.is_err() {
        return;
    }

    // Namespace connect
    match ws.next().await {
        Some(Ok(Message::Text(text))) if text.as_str() == codec::CONNECT_FRAME => {}
        _ => return,
    }
    if let Some(message) = &options.connect_error {
        let frame = format!("44{}", json!({ "message": message }));
        let _ = ws.send(Message::Text(frame.into())).await;
        return;
    }
    let ack = format!("40{}", json!({ "sid": format!("socket-{n}") }));
    if ws.send(Message::Text(ack.into())).await.is_err() {
        return;
    }
    for (event, payload) in &options.greeting {
        let frame = codec::encode_event(event, payload).unwrap();
        if ws.send(Message::Text(frame.into())).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            msg = ws.next() => {
                let Some(Ok(Message::Text(text))) = msg else { return };
                match codec::decode(text.as_str()) {
                    Ok(EnginePacket::Message(SocketPacket::Event { name, data, .. })) if name == "message" => {
                        let envelope: Value = match data {
                            Value::String(raw) => serde_json::from_str(&raw).unwrap(),
                            other => other,
                        };
                        for (event, payload) in (options.responder)(&envelope) {
                            let frame = codec::encode_event(&event, &payload).unwrap();
                            if ws.send(Message::Text(frame.into())).await.is_err() {
                                return;
                            }
                        }
                        let _ = actions_tx.send(envelope);
                    }
                    Ok(EnginePacket::Message(SocketPacket::Disconnect)) => {
                        let _ = ws.close(None).await;
                        return;
                    }
                    _ => {}
                }
            }
            frame = push_rx.recv() => {
                let Ok(frame) = frame else { return };
                if ws.send(Message::Text(frame.into())).await.is_err() {
                    return;
                }
            }
            _ = kick_rx.recv() => return,
        }
    }
}

/// Poll `check` until it holds or five seconds pass.
pub async fn wait_until<F: Fn() -> bool>(check: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Async variant of [`wait_until`].
pub async fn wait_until_async<F, Fut>(check: F)
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
