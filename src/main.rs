//! `orderflow-status` - consumes the unified status topic, keeps order state current
//! and flags stalled orders.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};

use orderflow::event_log::KafkaEventConsumer;
use orderflow::runtime::{init_logging, ServiceOptions, StatusService};
use orderflow::stores::{StoreOptions, StoreRegistry};
use orderflow::SystemConfig;

#[derive(Debug, Parser)]
#[command(name = "orderflow-status", version, about = "Order status tracker and liveness watchdog")]
struct Cli {
    /// Path to the YAML system configuration
    #[arg(short, long, default_value = "config/orderflow.yaml")]
    config: PathBuf,

    /// Write the process id to this file while running
    #[arg(long)]
    pid_file: Option<PathBuf>,
}

struct PidFile(PathBuf);

impl PidFile {
    fn create(path: &Path) -> Result<Self> {
        std::fs::write(path, std::process::id().to_string())
            .with_context(|| format!("failed to write pid file {}", path.display()))?;
        Ok(Self(path.to_path_buf()))
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

async fn wait_for_termination() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res.context("failed to listen for Ctrl-C")?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await.context("failed to listen for Ctrl-C")?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = SystemConfig::from_file(&cli.config)?;

    if let Err(e) = init_logging(&config.logging) {
        eprintln!("{e}");
    }

    let _pid_file = cli.pid_file.as_deref().map(PidFile::create).transpose()?;

    let codes = config.status_codes()?;
    let store = StoreRegistry::with_defaults()
        .open(
            &config.state_store.backend,
            config.state_store.url.as_deref(),
            StoreOptions::from_config(&config.state_store),
        )
        .await
        .context("failed to open state store")?;

    let consumer = KafkaEventConsumer::new(
        &config.kafka_settings(),
        &config.consumer.group_id,
        &config.consumer.client_id,
        &[config.topics.status.as_str()],
    )
    .context("failed to create Kafka consumer")?;

    let service = StatusService::start(store, codes, Box::new(consumer), ServiceOptions::from_config(&config))
        .await
        .context("failed to start status service")?;

    tracing::info!(
        topic = %config.topics.status,
        group_id = %config.consumer.group_id,
        "orderflow-status running; waiting for SIGINT/SIGTERM"
    );
    wait_for_termination().await?;

    tracing::info!("Termination signal received; draining");
    service.clone().shutdown().await;
    tracing::info!(metrics = ?service.metrics(), "orderflow-status stopped");
    Ok(())
}
