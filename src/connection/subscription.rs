// src/connection/subscription.rs
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, error, warn};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::RwLock;

// Generate unique subscription IDs
static NEXT_SUB_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(NEXT_SUB_ID.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub_{}", self.0)
    }
}

/// Named events a subscriber can listen to.
///
/// `Connect`, `Disconnect` and `Error` are raised locally by the connection
/// manager; everything else is forwarded from the server under its wire name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SimulatorEvent {
    Connect,
    Disconnect,
    Error,
    BatteryState,
    ChargingRecords,
    ChargingRecord,
    ChargingRecordsSearchResult,
    ChargingStatistics,
    ChargingPhasesStatistics,
    ChargingRecordDeleted,
    ChargingRecordsDeleted,
    AllChargingRecordsDeleted,
    ChargingRecordsExported,
    ChargingRecordsImported,
    RulOptimizationResponse,
    TrainProgress,
    TrainCompleted,
    Other(String),
}

impl SimulatorEvent {
    pub fn as_str(&self) -> &str {
        match self {
            SimulatorEvent::Connect => "connect",
            SimulatorEvent::Disconnect => "disconnect",
            SimulatorEvent::Error => "error",
            SimulatorEvent::BatteryState => "battery_state",
            SimulatorEvent::ChargingRecords => "charging_records",
            SimulatorEvent::ChargingRecord => "charging_record",
            SimulatorEvent::ChargingRecordsSearchResult => "charging_records_search_result",
            SimulatorEvent::ChargingStatistics => "charging_statistics",
            SimulatorEvent::ChargingPhasesStatistics => "charging_phases_statistics",
            SimulatorEvent::ChargingRecordDeleted => "charging_record_deleted",
            SimulatorEvent::ChargingRecordsDeleted => "charging_records_deleted",
            SimulatorEvent::AllChargingRecordsDeleted => "all_charging_records_deleted",
            SimulatorEvent::ChargingRecordsExported => "charging_records_exported",
            SimulatorEvent::ChargingRecordsImported => "charging_records_imported",
            SimulatorEvent::RulOptimizationResponse => "rul_optimization_response",
            SimulatorEvent::TrainProgress => "train_progress",
            SimulatorEvent::TrainCompleted => "train_completed",
            SimulatorEvent::Other(name) => name,
        }
    }

    pub fn from_name(name: &str) -> Self {
        match name {
            "connect" => SimulatorEvent::Connect,
            "disconnect" => SimulatorEvent::Disconnect,
            "error" => SimulatorEvent::Error,
            "battery_state" => SimulatorEvent::BatteryState,
            "charging_records" => SimulatorEvent::ChargingRecords,
            "charging_record" => SimulatorEvent::ChargingRecord,
            "charging_records_search_result" => SimulatorEvent::ChargingRecordsSearchResult,
            "charging_statistics" => SimulatorEvent::ChargingStatistics,
            "charging_phases_statistics" => SimulatorEvent::ChargingPhasesStatistics,
            "charging_record_deleted" => SimulatorEvent::ChargingRecordDeleted,
            "charging_records_deleted" => SimulatorEvent::ChargingRecordsDeleted,
            "all_charging_records_deleted" => SimulatorEvent::AllChargingRecordsDeleted,
            "charging_records_exported" => SimulatorEvent::ChargingRecordsExported,
            "charging_records_imported" => SimulatorEvent::ChargingRecordsImported,
            "rul_optimization_response" => SimulatorEvent::RulOptimizationResponse,
            "train_progress" => SimulatorEvent::TrainProgress,
            "train_completed" => SimulatorEvent::TrainCompleted,
            other => SimulatorEvent::Other(other.to_owned()),
        }
    }
}

impl fmt::Display for SimulatorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Function type for handling events from a subscription
pub struct SubscriptionEventHandler {
    // Using a string description for better debug output
    description: String,
    #[allow(clippy::type_complexity)]
    handler: Box<dyn Fn(&Value) -> anyhow::Result<()> + Send + Sync>,
}

impl SubscriptionEventHandler {
    pub fn new<F, S>(description: S, handler: F) -> Self
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
        S: Into<String>,
    {
        Self {
            description: description.into(),
            handler: Box::new(handler),
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn handle(&self, data: &Value) -> anyhow::Result<()> {
        (self.handler)(data)
    }
}

impl fmt::Debug for SubscriptionEventHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionEventHandler")
            .field("description", &self.description)
            .finish()
    }
}

/// A single registered listener
#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub event: SimulatorEvent,
    pub event_handler: Arc<SubscriptionEventHandler>,
}

impl Subscription {
    pub fn new<F>(event: SimulatorEvent, description: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            id: SubscriptionId::new(),
            event,
            event_handler: Arc::new(SubscriptionEventHandler::new(description, handler)),
        }
    }
}

/// Listener registry shared between the client and the connection task.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionRegistry {
    subscriptions: Arc<RwLock<HashMap<SimulatorEvent, Vec<Subscription>>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, subscription: Subscription) -> SubscriptionId {
        let id = subscription.id;
        debug!(
            "Adding subscription {} for `{}` ({})",
            id,
            subscription.event,
            subscription.event_handler.description()
        );
        let mut subs = self.subscriptions.write().await;
        subs.entry(subscription.event.clone())
            .or_default()
            .push(subscription);
        id
    }

    /// Returns false if the id was not registered.
    pub async fn remove(&self, id: SubscriptionId) -> bool {
        let mut subs = self.subscriptions.write().await;
        remove_locked(&mut subs, id)
    }

    /// Remove without awaiting, for use from `Drop`.
    ///
    /// Takes the lock right away when it is free; otherwise the removal is
    /// spawned onto the current runtime.
    pub fn detach(&self, id: SubscriptionId) {
        if let Ok(mut subs) = self.subscriptions.try_write() {
            remove_locked(&mut subs, id);
            return;
        }
        match Handle::try_current() {
            Ok(handle) => {
                let registry = self.clone();
                handle.spawn(async move {
                    registry.remove(id).await;
                });
            }
            Err(_) => warn!("No runtime to detach subscription {}", id),
        }
    }

    pub async fn count(&self, event: &SimulatorEvent) -> usize {
        self.subscriptions
            .read()
            .await
            .get(event)
            .map_or(0, Vec::len)
    }

    /// Dispatch an event to every subscriber of that name.
    ///
    /// Handlers run outside the registry lock; a failing or panicking handler
    /// is logged and does not stop the others. Returns how many handlers ran.
    pub async fn dispatch(&self, event: &SimulatorEvent, data: &Value) -> usize {
        let handlers: Vec<(SubscriptionId, Arc<SubscriptionEventHandler>)> = {
            let subs = self.subscriptions.read().await;
            match subs.get(event) {
                Some(list) => list
                    .iter()
                    .map(|s| (s.id, Arc::clone(&s.event_handler)))
                    .collect(),
                None => return 0,
            }
        };

        for (id, handler) in &handlers {
            match catch_unwind(AssertUnwindSafe(|| handler.handle(data))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(
                    "Error handling `{}` for subscription {} ({}): {:?}",
                    event,
                    id,
                    handler.description(),
                    e
                ),
                Err(_) => error!(
                    "Handler for subscription {} ({}) panicked on `{}`",
                    id,
                    handler.description(),
                    event
                ),
            }
        }
        handlers.len()
    }
}

fn remove_locked(subs: &mut HashMap<SimulatorEvent, Vec<Subscription>>, id: SubscriptionId) -> bool {
    let mut removed = false;
    subs.retain(|_, list| {
        let before = list.len();
        list.retain(|s| s.id != id);
        removed |= list.len() != before;
        !list.is_empty()
    });
    if removed {
        debug!("Removed subscription {}", id);
    }
    removed
}
