//! gps-watch - geofence monitoring daemon
//!
//! Polls gpsd (or a replay file), tracks the configured watches and logs
//! ARRIVE/DEPART events as they are confirmed.
//!
//! Module structure:
//! - `domain/` - Fix, geo math, watch state machine
//! - `io/` - Position sources (gpsd, replay, channel)
//! - `services/` - Registry, poll loop, coordinator
//! - `infra/` - Config, metrics

use anyhow::Context;
use clap::Parser;
use gps_watch::domain::{WatchAlarm, WatchSink};
use gps_watch::infra::Config;
use gps_watch::services::{GpsCoordinator, NoopHandler};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// gps-watch - arrival/departure events for GPS geofences
#[derive(Parser, Debug)]
#[command(name = "gps-watch", version, about)]
struct Args {
    /// Path to TOML configuration file (default: $CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

fn logging_sink() -> WatchSink {
    Arc::new(|alarm: &WatchAlarm<'_>| {
        info!(
            watch = %alarm.name,
            event = %alarm.event,
            distance_m = %format!("{:.1}", alarm.distance_m),
            "watch_event"
        );
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Default: INFO, use RUST_LOG=debug for per-fix visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false);
    if args.json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!(version = env!("CARGO_PKG_VERSION"), git_hash = env!("GIT_HASH"), "gps_watch_starting");

    let config_path = args.config.clone().unwrap_or_else(|| Config::resolve_config_path(&[]));
    let config = Config::load_from_path(&config_path);

    info!(
        config_file = %config.config_file(),
        gpsd_host = %config.gpsd_host(),
        gpsd_port = %config.gpsd_port(),
        replay_file = ?config.replay_file(),
        poll_timeout_ms = %config.poll_timeout().as_millis(),
        poll_sleep_ms = %config.poll_sleep().as_millis(),
        backend = ?config.distance_backend(),
        watches = %config.watches().len(),
        "config_loaded"
    );

    let coordinator = GpsCoordinator::from_config(&config, Arc::new(NoopHandler))
        .await
        .context("Failed to create coordinator")?;

    for watch in config.watches() {
        if !coordinator.add_watch(&watch.name, watch.lat, watch.lon, watch.radius_m, logging_sink()) {
            warn!(watch = %watch.name, "configured_watch_skipped");
        }
    }
    if coordinator.watch_count() == 0 {
        warn!("no_watches_configured");
    } else {
        info!(watches = ?coordinator.watch_names(), "watches_registered");
    }

    // Metrics reporter (lock-free reads)
    let metrics = coordinator.metrics().clone();
    let metrics_interval = config.metrics_interval_secs().max(1);
    let watch_count = coordinator.watch_count();
    let reporter = tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
        interval.tick().await;
        loop {
            interval.tick().await;
            metrics.report(watch_count).log();
        }
    });

    coordinator.start();

    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl+C")?;
    info!("shutdown_signal_received");

    coordinator.stop().await;
    reporter.abort();

    let last_fix = coordinator.last_fix();
    info!(valid = %last_fix.valid, fix = %last_fix.report().to_json_pretty(), "last_fix");
    coordinator.metrics().report(coordinator.watch_count()).log();

    info!("gps_watch shutdown complete");
    Ok(())
}
