mod args_parse;
mod duties;
mod http;

use std::{net::SocketAddr, sync::Arc, time::Duration};

use crate::{args_parse::Args, duties::QueueDrainer, http::AppState};

use anyhow::{Context, Result};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use steward_core::coordination::{Connector, MemoryCoordinator};
use steward_leadership::{leadership_metrics, ElectionConfig, LeadershipProbe, LifecycleDriver};
use tokio::net::TcpListener;
use tracing::{error, info};

const DRAIN_INTERVAL: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Parse command line arguments
    let args = Args::parse();

    // Load the configuration from the YAML file, if any, then the environment
    let mut config = match &args.config_file {
        Some(path) => ElectionConfig::from_file(path)
            .with_context(|| format!("Failed to load config file {}", path))?,
        None => ElectionConfig::default(),
    };
    config
        .apply_env()
        .context("Invalid STEWARD_* environment variable")?;

    // Command-line args override the config file and the environment
    if let Some(addr) = args.coordination_addr.clone() {
        config.coordination_addr = Some(addr).filter(|a| !a.trim().is_empty());
    }
    if let Some(path) = args.election_path.clone() {
        config.election_path = path;
    }
    config.validate().context("Invalid election configuration")?;

    let prom_exporter = match &args.prom_exporter {
        Some(addr) => Some(addr.parse::<SocketAddr>().context(format!(
            "Failed to parse into Socket address: {}",
            addr
        ))?),
        None => None,
    };
    init_metrics(prom_exporter)?;

    let http_addr: SocketAddr = args.http_addr.parse().context(format!(
        "Failed to parse into Socket address: {}",
        args.http_addr
    ))?;

    // every contender of this process shares the in-process coordination service
    let connector: Arc<dyn Connector> = Arc::new(MemoryCoordinator::new());

    let contenders = if config.is_distributed() {
        args.contenders.max(1)
    } else {
        1
    };
    info!(
        mode = if config.is_distributed() { "distributed" } else { "single-instance" },
        contenders,
        path = %config.election_path,
        "starting Steward agent"
    );

    let mut drivers = Vec::with_capacity(contenders);
    for i in 0..contenders {
        let mut contender_config = config.clone();
        if contenders > 1 {
            contender_config.contender_id = format!("{}#{}", config.contender_id, i);
        }
        let duties = Arc::new(QueueDrainer::new(
            contender_config.contender_id.clone(),
            DRAIN_INTERVAL,
        ));
        let driver = Arc::new(LifecycleDriver::new(
            contender_config,
            connector.clone(),
            duties,
        ));

        driver.start().await.context("Failed to join the election")?;
        drivers.push(driver);
    }

    let probes: Vec<Arc<dyn LeadershipProbe>> = drivers
        .iter()
        .map(|driver| driver.clone() as Arc<dyn LeadershipProbe>)
        .collect();
    let app = http::router(Arc::new(AppState { probes }));

    let listener = TcpListener::bind(http_addr)
        .await
        .with_context(|| format!("Failed to bind {}", http_addr))?;
    info!("listening on http://{}", http_addr);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for the shutdown signal")?;
    info!("shutdown requested, relinquishing leadership");

    for driver in &drivers {
        if let Err(err) = driver.stop().await {
            error!(contender = %driver.config().contender_id, error = %err, "failed to stop cleanly");
        }
    }

    let _ = shutdown_tx.send(());
    server
        .await
        .context("HTTP server task failed")?
        .context("HTTP server error")?;

    info!("Steward agent stopped");
    Ok(())
}

fn init_metrics(prom_addr: Option<SocketAddr>) -> Result<()> {
    info!("initializing metrics exporter");

    if let Some(addr) = prom_addr {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("failed to install Prometheus recorder")?;
    }

    leadership_metrics::register_metrics();
    metrics::describe_counter!(
        duties::DRAINED_ITEMS_TOTAL,
        "Total number of work items drained by the leader"
    );
    Ok(())
}
