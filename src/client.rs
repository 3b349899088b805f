// src/client.rs
use std::path::Path;
use std::time::Duration;

use chrono::NaiveDate;
use log::info;
use rand::Rng;
use rand::distr::Alphanumeric;
use serde_json::{json, Map, Value};

use crate::config::{PollingSettings, RequestSettings, Settings};
use crate::connection::rest::{RestClient, TrainJob, TrainRequest, TrainStatus, UploadedDataset};
use crate::connection::{self, socket_url, ConnectionManager, SimulatorEvent, SubscriptionId};
use crate::error::{ClientError, Result};
use crate::polling::{TrainOutcome, TrainProgress, TrainStatusPoller};
use crate::protocol::{Action, SearchParams};

/// Client for the battery-charging simulator backend.
///
/// Fire-and-forget actions resolve once the frame is queued; their answers
/// arrive later as events, so subscribe before calling them. Search and
/// RUL-optimization wait for their response event.
pub struct SimulatorClient {
    client_id: String,
    connection: ConnectionManager,
    rest: RestClient,
    poller: TrainStatusPoller,
    requests: RequestSettings,
    polling: PollingSettings,
}

impl SimulatorClient {
    pub fn new(settings: &Settings) -> Result<Self> {
        let endpoint = socket_url(&settings.server.base_url, &settings.server.socket_path)?;
        let rest = RestClient::new(&settings.server.base_url)?;
        let client_id = generate_client_id();
        info!("Created simulator client {} for {}", client_id, endpoint);

        Ok(Self {
            client_id,
            connection: ConnectionManager::new(endpoint, settings.connection.clone())?,
            poller: TrainStatusPoller::new(rest.clone()),
            rest,
            requests: settings.requests.clone(),
            polling: settings.polling.clone(),
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn rest(&self) -> &RestClient {
        &self.rest
    }

    pub async fn connect(&self) -> Result<()> {
        self.connection.connect().await
    }

    pub async fn disconnect(&self) {
        self.connection.disconnect().await;
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub async fn add_event_listener<F>(
        &self,
        event: SimulatorEvent,
        description: impl Into<String>,
        handler: F,
    ) -> SubscriptionId
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.connection.add_listener(event, description, handler).await
    }

    pub async fn remove_event_listener(&self, id: SubscriptionId) -> bool {
        self.connection.remove_listener(id).await
    }

    // Battery control

    pub async fn start_charging(&self) -> Result<()> {
        self.connection.send(&Action::StartCharging).await
    }

    pub async fn start_discharging(&self) -> Result<()> {
        self.connection.send(&Action::StartDischarging).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.connection.send(&Action::Stop).await
    }

    pub async fn reset(&self) -> Result<()> {
        self.connection.send(&Action::Reset).await
    }

    pub async fn update_battery_params(&self, params: Map<String, Value>) -> Result<()> {
        self.connection.send(&Action::UpdateParams { params }).await
    }

    pub async fn set_time_acceleration_factor(&self, factor: f64) -> Result<()> {
        let mut params = Map::new();
        params.insert("time_acceleration_factor".into(), json!(factor));
        self.update_battery_params(params).await
    }

    /// Toggle RUL-optimized charging and wait for the server to confirm.
    pub async fn set_rul_optimization(&self, enable: bool) -> Result<Value> {
        let response = connection::request(
            &self.connection,
            SimulatorEvent::RulOptimizationResponse,
            self.requests.rul_optimization_timeout(),
            |request_id| Action::SetRulOptimization { enable, request_id },
        )
        .await?;

        if response.get("success").and_then(Value::as_bool) == Some(true) {
            Ok(response)
        } else {
            let message = response
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("failed to set RUL-optimized charging");
            Err(ClientError::Rejected(message.to_owned()))
        }
    }

    // Charging records

    pub async fn get_charging_records(&self) -> Result<()> {
        self.connection.send(&Action::GetChargingRecords).await
    }

    /// Answered by a `charging_record` event.
    pub async fn get_charging_record_by_id(&self, record_id: i64) -> Result<()> {
        self.connection
            .send(&Action::GetChargingRecordById { record_id })
            .await
    }

    pub async fn get_recent_charging_records(&self, limit: u32) -> Result<()> {
        self.connection
            .send(&Action::GetRecentChargingRecords { limit })
            .await
    }

    pub async fn get_charging_records_by_date_range(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<()> {
        self.connection
            .send(&Action::GetChargingRecordsByDateRange {
                start_date,
                end_date,
            })
            .await
    }

    /// Search records and wait for the matching `charging_records_search_result`.
    pub async fn search_charging_records(&self, search_params: SearchParams) -> Result<Value> {
        connection::request(
            &self.connection,
            SimulatorEvent::ChargingRecordsSearchResult,
            self.requests.search_timeout(),
            |request_id| Action::SearchChargingRecords {
                search_params,
                request_id,
            },
        )
        .await
    }

    pub async fn delete_charging_record(&self, record_id: i64) -> Result<()> {
        self.connection
            .send(&Action::DeleteChargingRecord { record_id })
            .await
    }

    pub async fn delete_charging_records(&self, record_ids: &[i64]) -> Result<()> {
        self.connection
            .send(&Action::DeleteChargingRecordsByIds {
                record_ids: record_ids.to_vec(),
            })
            .await
    }

    pub async fn delete_all_charging_records(&self) -> Result<()> {
        self.connection.send(&Action::DeleteAllChargingRecords).await
    }

    pub async fn get_charging_statistics(&self) -> Result<()> {
        self.connection.send(&Action::GetChargingStatistics).await
    }

    pub async fn get_charging_phases_statistics(&self) -> Result<()> {
        self.connection
            .send(&Action::GetChargingPhasesStatistics)
            .await
    }

    /// `None` exports every record.
    pub async fn export_charging_records_to_json(&self, record_ids: Option<Vec<i64>>) -> Result<()> {
        self.connection
            .send(&Action::ExportChargingRecordsToJson { record_ids })
            .await
    }

    /// `file_path` is resolved on the server.
    pub async fn import_charging_records_from_json(&self, file_path: &str) -> Result<()> {
        self.connection
            .send(&Action::ImportChargingRecordsFromJson {
                file_path: file_path.to_owned(),
            })
            .await
    }

    // RUL dataset and training (REST)

    pub async fn upload_dataset(&self, dataset_id: &str, path: &Path) -> Result<UploadedDataset> {
        self.rest.upload_dataset_file(dataset_id, path).await
    }

    pub async fn trigger_train(&self, request: &TrainRequest) -> Result<TrainJob> {
        self.rest.trigger_train(request).await
    }

    pub async fn get_train_status(&self, job_id: &str) -> Result<TrainStatus> {
        self.rest.get_train_status(job_id).await
    }

    pub async fn get_server_status(&self) -> Result<Value> {
        self.rest.get_server_status().await
    }

    /// Poll training status at the configured interval.
    pub fn start_train_status_polling<P, C>(&self, job_id: &str, on_progress: P, on_completed: C)
    where
        P: Fn(TrainProgress) + Send + 'static,
        C: FnOnce(TrainOutcome) + Send + 'static,
    {
        self.start_train_status_polling_every(job_id, on_progress, on_completed, self.polling.interval());
    }

    pub fn start_train_status_polling_every<P, C>(
        &self,
        job_id: &str,
        on_progress: P,
        on_completed: C,
        interval: Duration,
    ) where
        P: Fn(TrainProgress) + Send + 'static,
        C: FnOnce(TrainOutcome) + Send + 'static,
    {
        self.poller.start(job_id, on_progress, on_completed, interval);
    }

    pub fn stop_train_status_polling(&self) {
        self.poller.stop();
    }

    pub fn is_polling_train_status(&self) -> bool {
        self.poller.is_running()
    }
}

fn generate_client_id() -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    format!("client_{suffix}")
}
