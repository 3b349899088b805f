// src/protocol.rs
use chrono::NaiveDate;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::connection::CorrelationId;

/// Outbound action envelope, serialized as `{"action": "...", ...params}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    StartCharging,
    StartDischarging,
    Stop,
    Reset,
    UpdateParams {
        params: Map<String, Value>,
    },
    GetChargingRecords,
    GetChargingRecordById {
        record_id: i64,
    },
    GetRecentChargingRecords {
        limit: u32,
    },
    GetChargingRecordsByDateRange {
        start_date: NaiveDate,
        end_date: NaiveDate,
    },
    SearchChargingRecords {
        search_params: SearchParams,
        request_id: CorrelationId,
    },
    DeleteChargingRecord {
        record_id: i64,
    },
    DeleteChargingRecordsByIds {
        record_ids: Vec<i64>,
    },
    DeleteAllChargingRecords,
    GetChargingStatistics,
    GetChargingPhasesStatistics,
    ExportChargingRecordsToJson {
        record_ids: Option<Vec<i64>>,
    },
    ImportChargingRecordsFromJson {
        file_path: String,
    },
    SetRulOptimization {
        enable: bool,
        request_id: CorrelationId,
    },
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::StartCharging => "start_charging",
            Action::StartDischarging => "start_discharging",
            Action::Stop => "stop",
            Action::Reset => "reset",
            Action::UpdateParams { .. } => "update_params",
            Action::GetChargingRecords => "get_charging_records",
            Action::GetChargingRecordById { .. } => "get_charging_record_by_id",
            Action::GetRecentChargingRecords { .. } => "get_recent_charging_records",
            Action::GetChargingRecordsByDateRange { .. } => "get_charging_records_by_date_range",
            Action::SearchChargingRecords { .. } => "search_charging_records",
            Action::DeleteChargingRecord { .. } => "delete_charging_record",
            Action::DeleteChargingRecordsByIds { .. } => "delete_charging_records_by_ids",
            Action::DeleteAllChargingRecords => "delete_all_charging_records",
            Action::GetChargingStatistics => "get_charging_statistics",
            Action::GetChargingPhasesStatistics => "get_charging_phases_statistics",
            Action::ExportChargingRecordsToJson { .. } => "export_charging_records_to_json",
            Action::ImportChargingRecordsFromJson { .. } => "import_charging_records_from_json",
            Action::SetRulOptimization { .. } => "set_rul_optimization",
        }
    }

    /// JSON text sent as the single argument of the `message` event.
    pub fn to_envelope(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Filters for `search_charging_records`. Unset fields are left out of the
/// request and the server applies its own defaults (limit 50, offset 0).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_soc: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_soc: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_duration: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_duration: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
}
