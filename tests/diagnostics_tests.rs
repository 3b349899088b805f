// tests/diagnostics_tests.rs
use std::collections::HashSet;
use std::time::Duration;

use charge_sim_client::diagnostics::{self, ProbeOutcome, CANDIDATE_PATHS};
use serde_json::json;

mod helpers;
use helpers::{FakeServer, ServerOptions};

#[tokio::test]
async fn probes_report_which_paths_connect() {
    let server = FakeServer::start(ServerOptions::default()).await;

    let results =
        diagnostics::probe_paths(&server.base_url(), &CANDIDATE_PATHS, Duration::from_secs(2)).await;

    let outcomes: Vec<(&str, bool)> = results
        .iter()
        .map(|r| (r.path.as_str(), matches!(r.outcome, ProbeOutcome::Connected { .. })))
        .collect();
    // The server only answers on `/ws/`.
    assert_eq!(
        outcomes,
        vec![("/ws", false), ("/ws/", true), ("ws", false), ("/socket.io", false)]
    );

    let urls: HashSet<&str> = results.iter().map(|r| r.url.as_str()).collect();
    assert_eq!(urls.len(), CANDIDATE_PATHS.len());
    assert!(results[1].url.ends_with("/ws/?EIO=4&transport=websocket"));
}

#[tokio::test]
async fn unreachable_server_fails_every_probe() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let results = diagnostics::probe_paths(&base_url, &["/ws"], Duration::from_secs(2)).await;
    assert!(matches!(results[0].outcome, ProbeOutcome::Failed(_)));
}

#[tokio::test]
async fn primary_connection_waits_for_battery_state() {
    let options = ServerOptions {
        responder: std::sync::Arc::new(|envelope| {
            if envelope["action"] == "get_charging_records" {
                vec![
                    ("charging_records".to_string(), json!([])),
                    ("battery_state".to_string(), json!({"soc": 80.0, "voltage": 4.1})),
                ]
            } else {
                Vec::new()
            }
        }),
        ..ServerOptions::default()
    };
    let server = FakeServer::start(options).await;

    assert!(diagnostics::test_primary_connection(&server.settings(), Duration::from_secs(2)).await);
}

#[tokio::test]
async fn primary_connection_without_state_fails() {
    let server = FakeServer::start(ServerOptions::default()).await;

    assert!(
        !diagnostics::test_primary_connection(&server.settings(), Duration::from_millis(100)).await
    );
}
