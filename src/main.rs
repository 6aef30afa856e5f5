//! Parking gate controller daemon
//!
//! Drives a serial-connected gate controller, tracks slot occupancy and
//! pushes gate/sensor/slot events to observers.
//!
//! Module structure:
//! - `domain/` - Core types (Slot, Session, tokens, events)
//! - `io/` - External interfaces (serial link, classifier, fan-out, console)
//! - `services/` - Business logic (sensors, reservations, API)
//! - `infra/` - Infrastructure (Config, Metrics)

use clap::Parser;
use parkgate::infra::{Config, Metrics};
use parkgate::io::console::{run_console, run_event_log};
use parkgate::io::{Broadcaster, GateCommander, LinkSettings, SerialConnector, SerialLink};
use parkgate::services::tokens::run_sweeper;
use parkgate::services::{
    ClaimTokenStore, EventRouter, MemoryStore, MemoryTokenStore, ParkingApi, Reservations,
    SensorBoard, SensorOracle,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Parking gate controller
#[derive(Parser, Debug)]
#[command(name = "parkgate", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,

    /// Do not read operator commands from stdin
    #[arg(long)]
    no_console: bool,
}

fn main() -> anyhow::Result<()> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    let result = runtime.block_on(run(args));
    // The stdin reader can sit in a blocking read forever
    runtime.shutdown_timeout(Duration::from_secs(1));
    result
}

async fn run(args: Args) -> anyhow::Result<()> {
    info!(git_hash = %env!("GIT_HASH"), "parkgate starting");

    let config = Config::load_from_path(&args.config);
    info!(
        config_file = %config.config_file(),
        serial_device = %config.serial_device(),
        serial_baud = %config.serial_baud(),
        total_slots = %config.total_slots(),
        token_ttl_secs = %config.token_ttl_secs(),
        snapshot_timeout_ms = %config.snapshot_timeout().as_millis(),
        "config_loaded"
    );

    // Create shutdown signal
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let metrics = Arc::new(Metrics::new());

    // Serial link: reader task feeds a bounded frame queue
    let link = Arc::new(SerialLink::new(
        SerialConnector::from_config(&config),
        LinkSettings::from_config(&config),
        metrics.clone(),
    ));
    let (frame_tx, frame_rx) = mpsc::channel(config.frame_queue_size());
    let link_handle = tokio::spawn(link.clone().run(frame_tx, shutdown_rx.clone()));
    let gate: Arc<dyn GateCommander> = link;

    // Sensor state, snapshot oracle and observer fan-out
    let board = Arc::new(SensorBoard::new());
    let oracle = Arc::new(SensorOracle::new(gate.clone(), config.snapshot_timeout(), metrics.clone()));
    let fanout = Arc::new(Broadcaster::new(config.observer_buffer(), metrics.clone()));

    let router = EventRouter::new(board.clone(), oracle.clone(), fanout.clone(), metrics.clone());
    let router_handle = tokio::spawn(router.run(frame_rx));

    // Claim tokens with periodic expiry sweep
    let tokens: Arc<dyn ClaimTokenStore> = Arc::new(MemoryTokenStore::new(config.token_ttl_secs()));
    tokio::spawn(run_sweeper(tokens.clone(), config.token_sweep_interval(), shutdown_rx.clone()));

    // Reservation state machine over the slot pool
    let reservations = Arc::new(Reservations::new(
        Box::new(MemoryStore::new()),
        tokens.clone(),
        gate.clone(),
        oracle,
        fanout.clone(),
        metrics.clone(),
        config.session_ttl_secs(),
    ));
    reservations.init_pool(config.total_slots())?;
    let pool = reservations.summary()?;
    info!(total = pool.total, free = pool.free, "slot_pool_ready");

    // Log every observer message
    let (_observer, observer_rx) = fanout.subscribe();
    tokio::spawn(run_event_log(observer_rx));

    let api = Arc::new(ParkingApi::new(reservations, tokens, gate, board, config.public_base_url()));

    if !args.no_console {
        let console_shutdown = shutdown_rx.clone();
        let console_api = api.clone();
        tokio::spawn(async move {
            run_console(console_api, BufReader::new(tokio::io::stdin()), tokio::io::stdout(), console_shutdown)
                .await;
        });
    }

    // Start metrics reporter
    let metrics_clone = metrics.clone();
    let metrics_fanout = fanout.clone();
    let metrics_interval = config.metrics_interval_secs().max(1);
    let mut metrics_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    metrics_clone.report(metrics_fanout.observer_count()).log();
                }
                _ = metrics_shutdown.changed() => break,
            }
        }
    });

    // Handle shutdown on Ctrl+C
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    while !*shutdown_rx.borrow() {
        if shutdown_rx.changed().await.is_err() {
            break;
        }
    }

    // Link stops first; its frame sender drops and the router drains out
    if tokio::time::timeout(Duration::from_secs(5), link_handle).await.is_err() {
        warn!("serial_link_shutdown_timeout");
    }
    let _ = tokio::time::timeout(Duration::from_secs(1), router_handle).await;

    metrics.report(fanout.observer_count()).log();
    info!("parkgate shutdown complete");
    Ok(())
}
