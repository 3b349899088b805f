// src/watch.rs
use std::time::Duration;

use anyhow::{Context, Result};
use log::info;

use crate::connection::{SimulatorEvent, SubscriptionId};
use crate::SimulatorClient;

/// Events logged by `watch`.
pub const WATCHED_EVENTS: [SimulatorEvent; 12] = [
    SimulatorEvent::Connect,
    SimulatorEvent::Disconnect,
    SimulatorEvent::Error,
    SimulatorEvent::BatteryState,
    SimulatorEvent::ChargingRecords,
    SimulatorEvent::ChargingRecord,
    SimulatorEvent::ChargingRecordsSearchResult,
    SimulatorEvent::ChargingStatistics,
    SimulatorEvent::ChargingPhasesStatistics,
    SimulatorEvent::RulOptimizationResponse,
    SimulatorEvent::TrainProgress,
    SimulatorEvent::TrainCompleted,
];

/// Connect, log every watched event until Ctrl+C (or `duration`), then
/// disconnect.
pub async fn run(client: &SimulatorClient, duration: Option<Duration>) -> Result<()> {
    let mut listeners: Vec<SubscriptionId> = Vec::with_capacity(WATCHED_EVENTS.len());
    for event in WATCHED_EVENTS {
        let name = event.to_string();
        let id = client
            .add_event_listener(event, "watch logger", move |data| {
                info!("[{}] {}", name, data);
                Ok(())
            })
            .await;
        listeners.push(id);
    }

    client
        .connect()
        .await
        .context("Failed to connect to the simulator")?;
    client.get_charging_records().await?;
    client.get_charging_statistics().await?;

    match duration {
        Some(duration) => {
            info!("Watching events for {:?}...", duration);
            tokio::select! {
                _ = tokio::time::sleep(duration) => {}
                res = tokio::signal::ctrl_c() => res?,
            }
        }
        None => {
            info!("Watching events. Press Ctrl+C to stop...");
            tokio::signal::ctrl_c().await?;
        }
    }

    info!("Stopping watch, disconnecting");
    client.disconnect().await;
    for id in listeners {
        client.remove_event_listener(id).await;
    }
    Ok(())
}
