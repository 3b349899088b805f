// src/connection/rest.rs
use std::path::Path;

use log::{debug, info};
use reqwest::multipart::{Form, Part};
use reqwest::{Response, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ClientError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedDataset {
    pub dataset_id: String,
    pub stored_at: String,
}

/// Body of `POST /api/rul/train`. Unset hyperparameters are sent as `null`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainRequest {
    pub dataset_id: String,
    pub k: Option<u32>,
    pub epochs: Option<u32>,
    pub batch_size: Option<u32>,
}

impl TrainRequest {
    pub fn new(dataset_id: impl Into<String>) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainJob {
    pub job_id: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Failed,
    #[serde(other)]
    Unknown,
}

impl JobState {
    pub fn is_finished(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainStatus {
    pub status: JobState,
    #[serde(default)]
    pub dataset_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<i64>,
    #[serde(default)]
    pub logs: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub model_count: Option<u64>,
    #[serde(default)]
    pub duration_sec: Option<u64>,
}

/// REST side of the simulator backend
#[derive(Debug, Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: Url,
}

impl RestClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ClientError::Transport(format!("invalid base url {base_url}: {e}")))?;
        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
        })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| ClientError::Transport(format!("invalid path {path}: {e}")))
    }

    /// Upload a dataset archive (zip or 7z with the NASA layout).
    pub async fn upload_dataset(
        &self,
        dataset_id: &str,
        file_name: &str,
        contents: Vec<u8>,
    ) -> Result<UploadedDataset> {
        info!("Uploading dataset {} ({} bytes)", dataset_id, contents.len());
        let form = Form::new()
            .text("datasetId", dataset_id.to_owned())
            .part("file", Part::bytes(contents).file_name(file_name.to_owned()));

        let resp = self
            .http
            .post(self.url("/api/rul/dataset/upload")?)
            .multipart(form)
            .send()
            .await?;
        Ok(check(resp).await?.json().await?)
    }

    pub async fn upload_dataset_file(&self, dataset_id: &str, path: &Path) -> Result<UploadedDataset> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("dataset.zip")
            .to_owned();
        let contents = tokio::fs::read(path).await?;
        self.upload_dataset(dataset_id, &file_name, contents).await
    }

    pub async fn trigger_train(&self, request: &TrainRequest) -> Result<TrainJob> {
        info!("Triggering training on dataset {}", request.dataset_id);
        let resp = self
            .http
            .post(self.url("/api/rul/train")?)
            .json(request)
            .send()
            .await?;
        Ok(check(resp).await?.json().await?)
    }

    pub async fn get_train_status(&self, job_id: &str) -> Result<TrainStatus> {
        let resp = self
            .http
            .get(self.url(&format!("/api/rul/train/{job_id}/status"))?)
            .send()
            .await?;
        Ok(check(resp).await?.json().await?)
    }

    pub async fn get_server_status(&self) -> Result<Value> {
        let resp = self.http.get(self.url("/api/status")?).send().await?;
        let status: Value = check(resp).await?.json().await?;
        debug!("Server status: {}", status);
        Ok(status)
    }
}

// Non-2xx responses become `Http` errors carrying the response body.
async fn check(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ClientError::Http {
        status: status.as_u16(),
        body,
    })
}
