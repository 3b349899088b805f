// src/diagnostics.rs
//! Connection diagnostics: try the configured socket path, and if that does
//! not produce a `battery_state` event, probe the usual path variants.

use std::sync::Mutex;
use std::time::Duration;

use log::{error, info, warn};
use serde_json::Value;
use tokio::sync::oneshot;

use crate::config::Settings;
use crate::connection::{raw_socket_url, ConnectionManager, SimulatorEvent};
use crate::SimulatorClient;

/// Socket paths tried when the configured one fails.
pub const CANDIDATE_PATHS: [&str; 4] = ["/ws", "/ws/", "ws", "/socket.io"];

const PRIMARY_TIMEOUT: Duration = Duration::from_secs(10);
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Connected { sid: String },
    Failed(String),
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub path: String,
    /// Endpoint actually tried, empty when it could not be built.
    pub url: String,
    pub outcome: ProbeOutcome,
}

#[derive(Debug, Clone, Default)]
pub struct DiagnosticReport {
    pub primary_ok: bool,
    pub probes: Vec<ProbeResult>,
}

/// Connect with the configured settings and wait for the first
/// `battery_state`. Returns whether one arrived in time.
pub async fn test_primary_connection(settings: &Settings, wait: Duration) -> bool {
    info!(
        "Connecting to {} with path {}",
        settings.server.base_url, settings.server.socket_path
    );
    let client = match SimulatorClient::new(settings) {
        Ok(client) => client,
        Err(e) => {
            error!("Invalid client configuration: {}", e);
            return false;
        }
    };

    let (state_tx, state_rx) = oneshot::channel::<Value>();
    let slot = Mutex::new(Some(state_tx));
    let listener = client
        .add_event_listener(SimulatorEvent::BatteryState, "diagnostics", move |data| {
            let sender = slot
                .lock()
                .map_err(|_| anyhow::anyhow!("battery_state slot poisoned"))?
                .take();
            if let Some(sender) = sender {
                let _ = sender.send(data.clone());
            }
            Ok(())
        })
        .await;
    let records = client
        .add_event_listener(SimulatorEvent::ChargingRecords, "diagnostics", |data| {
            let count = data.as_array().map_or(0, Vec::len);
            info!("Received charging records: {} records", count);
            Ok(())
        })
        .await;

    let ok = match client.connect().await {
        Ok(()) => {
            info!("WebSocket connected");
            if let Err(e) = client.get_charging_records().await {
                warn!("Requesting charging records failed: {}", e);
            }
            match tokio::time::timeout(wait, state_rx).await {
                Ok(Ok(state)) => {
                    info!(
                        "Received battery state: SOC={}%, voltage={}V",
                        state.get("soc").unwrap_or(&Value::Null),
                        state.get("voltage").unwrap_or(&Value::Null)
                    );
                    true
                }
                _ => {
                    warn!("No battery state within {:?}", wait);
                    false
                }
            }
        }
        Err(e) => {
            error!("Connection failed: {}", e);
            false
        }
    };

    client.remove_event_listener(listener).await;
    client.remove_event_listener(records).await;
    client.disconnect().await;
    ok
}

/// Try each socket path once, without reconnection.
///
/// Paths are used as written, so `/ws`, `/ws/` and `ws` hit different URLs.
pub async fn probe_paths(base_url: &str, paths: &[&str], timeout: Duration) -> Vec<ProbeResult> {
    let mut results = Vec::with_capacity(paths.len());
    for path in paths {
        info!("Trying {} with path {}", base_url, path);
        let (url, outcome) = match raw_socket_url(base_url, path) {
            Err(e) => (String::new(), ProbeOutcome::Failed(e.to_string())),
            Ok(endpoint) => {
                let outcome = match ConnectionManager::probe(&endpoint, timeout).await {
                    Ok(handshake) => ProbeOutcome::Connected { sid: handshake.sid },
                    Err(crate::ClientError::Timeout { .. }) => ProbeOutcome::TimedOut,
                    Err(e) => ProbeOutcome::Failed(e.to_string()),
                };
                (endpoint, outcome)
            }
        };
        match &outcome {
            ProbeOutcome::Connected { .. } => info!("OK: path {} connects ({})", path, url),
            ProbeOutcome::Failed(reason) => warn!("FAILED: path {} ({}): {}", path, url, reason),
            ProbeOutcome::TimedOut => warn!("TIMEOUT: path {} ({})", path, url),
        }
        results.push(ProbeResult {
            path: (*path).to_owned(),
            url,
            outcome,
        });
    }
    results
}

pub fn log_environment() {
    info!("Client version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        "Platform: {} {}",
        std::env::consts::OS,
        std::env::consts::ARCH
    );
}

pub async fn run(settings: &Settings) -> DiagnosticReport {
    info!("Starting WebSocket connection test");
    log_environment();

    let primary_ok = test_primary_connection(settings, PRIMARY_TIMEOUT).await;
    let probes = if primary_ok {
        Vec::new()
    } else {
        probe_paths(&settings.server.base_url, &CANDIDATE_PATHS, PROBE_TIMEOUT).await
    };

    info!("Test finished. Suggestions:");
    info!("1. Make sure the backend server is running");
    info!("2. Check the server's socketio_path (expected \"ws\")");
    info!(
        "3. Check the configured socket path (currently \"{}\")",
        settings.server.socket_path
    );
    info!("4. Make sure {} is reachable", settings.server.base_url);

    DiagnosticReport { primary_ok, probes }
}
