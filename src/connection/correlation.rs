// src/connection/correlation.rs
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use uuid::Uuid;

use super::manager::ConnectionManager;
use super::subscription::{SimulatorEvent, SubscriptionId, SubscriptionRegistry};
use crate::error::{ClientError, Result};
use crate::protocol::Action;

/// Opaque token matching a request to its response event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

// Detaches a one-shot listener when dropped, so an abandoned request never
// leaves it behind.
struct ListenerGuard {
    registry: SubscriptionRegistry,
    id: Option<SubscriptionId>,
}

impl ListenerGuard {
    async fn release(&mut self) {
        if let Some(id) = self.id.take() {
            self.registry.remove(id).await;
        }
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            debug!("Detaching abandoned listener {}", id);
            self.registry.detach(id);
        }
    }
}

/// A request waiting on a one-shot listener.
///
/// The listener is removed by [`wait`](Self::wait) or [`cancel`](Self::cancel),
/// or when the request is dropped unfinished.
pub struct PendingRequest {
    id: CorrelationId,
    response_event: SimulatorEvent,
    listener: ListenerGuard,
    response_rx: oneshot::Receiver<Value>,
}

impl PendingRequest {
    /// Register a one-shot listener for `response_event`.
    ///
    /// Responses tagged with another `request_id` are ignored; untagged ones
    /// are accepted. Only the first accepted response is delivered.
    pub async fn register(connection: &ConnectionManager, response_event: SimulatorEvent) -> Self {
        let id = CorrelationId::generate();
        let (response_tx, response_rx) = oneshot::channel();
        let slot = Mutex::new(Some(response_tx));
        let expected = id.clone();

        let listener = connection
            .add_listener(
                response_event.clone(),
                format!("one-shot {response_event} for {id}"),
                move |data| {
                    if let Some(tagged) = data.get("request_id").and_then(Value::as_str) {
                        if tagged != expected.as_str() {
                            return Ok(());
                        }
                    }
                    let sender = slot
                        .lock()
                        .map_err(|_| anyhow::anyhow!("response slot poisoned"))?
                        .take();
                    if let Some(sender) = sender {
                        let _ = sender.send(data.clone());
                    }
                    Ok(())
                },
            )
            .await;

        Self {
            id,
            response_event,
            listener: ListenerGuard {
                registry: connection.subscriptions().clone(),
                id: Some(listener),
            },
            response_rx,
        }
    }

    pub fn id(&self) -> &CorrelationId {
        &self.id
    }

    /// Race the response against `timeout`. The listener is detached on
    /// both outcomes.
    pub async fn wait(mut self, timeout: Duration) -> Result<Value> {
        let outcome = tokio::time::timeout(timeout, &mut self.response_rx).await;
        self.listener.release().await;

        match outcome {
            Ok(Ok(data)) => {
                debug!("Request {} answered by `{}`", self.id, self.response_event);
                Ok(data)
            }
            Ok(Err(_)) => Err(ClientError::Transport(format!(
                "listener for `{}` dropped",
                self.response_event
            ))),
            Err(_) => Err(ClientError::Timeout {
                event: self.response_event.to_string(),
                after: timeout,
            }),
        }
    }

    pub async fn cancel(mut self) {
        self.listener.release().await;
    }
}

/// Send a correlated action and wait for its response event.
pub async fn request<B>(
    connection: &ConnectionManager,
    response_event: SimulatorEvent,
    timeout: Duration,
    build: B,
) -> Result<Value>
where
    B: FnOnce(CorrelationId) -> Action,
{
    if !connection.is_connected() {
        return Err(ClientError::NotConnected);
    }

    let pending = PendingRequest::register(connection, response_event).await;
    let action = build(pending.id().clone());
    if let Err(e) = connection.send(&action).await {
        pending.cancel().await;
        return Err(e);
    }
    pending.wait(timeout).await
}
