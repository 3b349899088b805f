// src/main.rs
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use tokio::main;
use tokio::sync::oneshot;

use charge_sim_client::config::Settings;
use charge_sim_client::connection::rest::TrainRequest;
use charge_sim_client::{diagnostics, watch, SimulatorClient};

#[derive(Debug, Parser)]
#[command(name = "charge-sim", about = "Client for the battery-charging simulator backend")]
struct Cli {
    /// Overrides `server.base_url`
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Overrides `server.socket_path`
    #[arg(long, global = true)]
    socket_path: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the backend status
    Status,
    /// Log real-time events until Ctrl+C
    Watch {
        #[arg(long)]
        seconds: Option<u64>,
    },
    /// Test the connection and probe alternative socket paths
    Diagnose,
    /// Upload a dataset archive
    Upload {
        #[arg(long)]
        dataset_id: String,
        file: PathBuf,
    },
    /// Start a training job and follow it to completion
    Train {
        #[arg(long)]
        dataset_id: String,
        #[arg(long)]
        k: Option<u32>,
        #[arg(long)]
        epochs: Option<u32>,
        #[arg(long)]
        batch_size: Option<u32>,
    },
}

#[main]
async fn main() -> Result<()> {
    dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    let mut settings = Settings::new().context("Failed to load settings")?;
    if let Some(base_url) = cli.base_url {
        settings.server.base_url = base_url;
    }
    if let Some(socket_path) = cli.socket_path {
        settings.server.socket_path = socket_path;
    }

    match cli.command {
        Command::Status => {
            let client = SimulatorClient::new(&settings)?;
            let status = client.get_server_status().await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Command::Watch { seconds } => {
            let client = SimulatorClient::new(&settings)?;
            watch::run(&client, seconds.map(Duration::from_secs)).await?;
        }
        Command::Diagnose => {
            let report = diagnostics::run(&settings).await;
            let any_probe_ok = report
                .probes
                .iter()
                .any(|p| matches!(p.outcome, diagnostics::ProbeOutcome::Connected { .. }));
            if !report.primary_ok && !any_probe_ok {
                bail!("no socket path could connect");
            }
        }
        Command::Upload { dataset_id, file } => {
            let client = SimulatorClient::new(&settings)?;
            let uploaded = client
                .upload_dataset(&dataset_id, &file)
                .await
                .with_context(|| format!("Upload of {} failed", file.display()))?;
            println!("dataset {} stored at {}", uploaded.dataset_id, uploaded.stored_at);
        }
        Command::Train {
            dataset_id,
            k,
            epochs,
            batch_size,
        } => {
            let client = SimulatorClient::new(&settings)?;
            train(&client, TrainRequest {
                dataset_id,
                k,
                epochs,
                batch_size,
            })
            .await?;
        }
    }

    Ok(())
}

async fn train(client: &SimulatorClient, request: TrainRequest) -> Result<()> {
    let job = client
        .trigger_train(&request)
        .await
        .context("Failed to trigger training")?;
    info!("Training job {} is {}", job.job_id, job.status);

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner} [{elapsed}] {msg}")?);
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner.set_message(format!("job {} {}", job.job_id, job.status));

    let (done_tx, done_rx) = oneshot::channel();
    let progress = spinner.clone();
    client.start_train_status_polling(
        &job.job_id,
        move |p| progress.set_message(p.message),
        move |outcome| {
            let _ = done_tx.send(outcome);
        },
    );

    let outcome = tokio::select! {
        outcome = done_rx => outcome.context("Polling stopped unexpectedly")?,
        res = tokio::signal::ctrl_c() => {
            res?;
            client.stop_train_status_polling();
            spinner.abandon_with_message("interrupted");
            return Ok(());
        }
    };

    if outcome.success {
        spinner.finish_with_message(format!(
            "job {} completed: {} models in {}s",
            outcome.job_id, outcome.model_count, outcome.duration_sec
        ));
        Ok(())
    } else {
        spinner.abandon_with_message(format!("job {} failed", outcome.job_id));
        bail!(
            "training failed: {}",
            outcome.error.unwrap_or_else(|| "unknown error".into())
        )
    }
}
