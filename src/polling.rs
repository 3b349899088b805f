// src/polling.rs
//! Training status polling, the REST fallback for `train_progress` /
//! `train_completed` events.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::connection::rest::{JobState, RestClient, TrainStatus};

/// Log lines reported per poll.
const RECENT_LOG_LINES: usize = 5;

/// Used in place of a zero interval.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainProgress {
    pub job_id: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainOutcome {
    pub job_id: String,
    pub success: bool,
    pub error: Option<String>,
    pub model_count: u64,
    pub duration_sec: u64,
}

impl TrainOutcome {
    fn from_status(job_id: &str, status: &TrainStatus) -> Self {
        Self {
            job_id: job_id.to_owned(),
            success: status.status == JobState::Completed,
            error: status.error.clone(),
            model_count: status.model_count.unwrap_or(0),
            duration_sec: status.duration_sec.unwrap_or(0),
        }
    }
}

/// Runs at most one polling timer at a time.
pub struct TrainStatusPoller {
    rest: RestClient,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl TrainStatusPoller {
    pub fn new(rest: RestClient) -> Self {
        Self {
            rest,
            timer: Mutex::new(None),
        }
    }

    fn timer(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.timer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start polling `job_id` every `interval`, replacing any running timer.
    ///
    /// Each poll reports the most recent log lines through `on_progress`.
    /// Once the job is completed or failed the timer stops itself and
    /// `on_completed` runs. Failed polls are logged and retried on the next
    /// tick.
    pub fn start<P, C>(&self, job_id: impl Into<String>, on_progress: P, on_completed: C, interval: Duration)
    where
        P: Fn(TrainProgress) + Send + 'static,
        C: FnOnce(TrainOutcome) + Send + 'static,
    {
        let mut timer = self.timer();
        if let Some(previous) = timer.take() {
            previous.abort();
        }

        let job_id = job_id.into();
        let rest = self.rest.clone();
        let interval = if interval.is_zero() {
            warn!("Zero polling interval, using {:?}", DEFAULT_POLL_INTERVAL);
            DEFAULT_POLL_INTERVAL
        } else {
            interval
        };
        info!("Polling training status of {} every {:?}", job_id, interval);

        *timer = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; the first poll happens
            // one interval after start.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let status = match rest.get_train_status(&job_id).await {
                    Ok(status) => status,
                    Err(e) => {
                        error!("Polling training status of {} failed: {}", job_id, e);
                        continue;
                    }
                };

                let skip = status.logs.len().saturating_sub(RECENT_LOG_LINES);
                for line in &status.logs[skip..] {
                    on_progress(TrainProgress {
                        job_id: job_id.clone(),
                        message: line.clone(),
                    });
                }

                if status.status.is_finished() {
                    debug!("Training job {} finished: {:?}", job_id, status.status);
                    on_completed(TrainOutcome::from_status(&job_id, &status));
                    return;
                }
            }
        }));
    }

    pub fn stop(&self) {
        if let Some(timer) = self.timer().take() {
            timer.abort();
            debug!("Training status polling stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.timer().as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for TrainStatusPoller {
    fn drop(&mut self) {
        self.stop();
    }
}
