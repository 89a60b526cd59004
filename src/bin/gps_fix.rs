//! gps-fix - print GPS fix data from gpsd
//!
//! Single-shot by default: prints the first valid fix as JSON and exits 0.
//! With `--loop`, prints every valid fix until interrupted.
//! Either way, a poll timeout prints "Timeout" to stderr and exits 1.
//!
//! Usage:
//!   cargo run --bin gps-fix -- --timeout 5 --host localhost --port 2947

use clap::Parser;
use gps_watch::domain::Fix;
use gps_watch::io::GpsdSource;
use gps_watch::infra::Config;
use gps_watch::services::{GpsCoordinator, GpsHandler};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "gps-fix")]
#[command(about = "Output GPS fix data")]
struct Args {
    /// Run in a loop, outputting fix information
    #[arg(short = 'l', long = "loop")]
    run_loop: bool,

    /// Timeout waiting for GPS data (seconds)
    #[arg(short, long, default_value = "5")]
    timeout: u64,

    /// gpsd host
    #[arg(short = 'x', long, default_value = "localhost")]
    host: String,

    /// gpsd port
    #[arg(short, long, default_value = "2947")]
    port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    FixFound,
    Timeout,
}

/// Prints valid fixes and reports the outcome to `main`
struct FixPrinter {
    oneshot: bool,
    fix_found: AtomicBool,
    outcome_tx: mpsc::UnboundedSender<Outcome>,
}

impl GpsHandler for FixPrinter {
    fn on_fix(&self, fix: &Fix) {
        if !fix.valid {
            return;
        }
        self.fix_found.store(true, Ordering::Relaxed);
        println!("{}", fix.report().to_json_pretty());
        if self.oneshot {
            let _ = self.outcome_tx.send(Outcome::FixFound);
        }
    }

    fn on_timeout(&self) {
        eprintln!("Timeout");
        let _ = self.outcome_tx.send(Outcome::Timeout);
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // stdout carries the fix JSON; logs go to stderr
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let timeout = Duration::from_secs(args.timeout.max(1));

    let (outcome_tx, mut outcome_rx) = mpsc::unbounded_channel();
    let printer = Arc::new(FixPrinter { oneshot: !args.run_loop, fix_found: AtomicBool::new(false), outcome_tx });

    let config =
        Config::default().with_gpsd(args.host.as_str(), args.port).with_poll(timeout, Duration::from_millis(500));
    let coordinator = GpsCoordinator::builder(Box::new(GpsdSource::new(config.gpsd_host(), config.gpsd_port())))
        .config(&config)
        .handler(printer.clone())
        .build();

    let oneshot = !args.run_loop;
    info!(source = %coordinator.source_description(), oneshot = %oneshot, "gps_fix_starting");
    coordinator.start();

    // Invalid fixes keep the loop busy without timing out; single-shot mode
    // gives up after twice the timeout
    let give_up = tokio::time::sleep(timeout * 2);
    tokio::pin!(give_up);

    let outcome = tokio::select! {
        outcome = outcome_rx.recv() => outcome,
        _ = &mut give_up, if oneshot => None,
        _ = tokio::signal::ctrl_c() => None,
    };

    coordinator.stop().await;

    match outcome {
        Some(Outcome::FixFound) => ExitCode::SUCCESS,
        Some(Outcome::Timeout) => ExitCode::FAILURE,
        None if printer.fix_found.load(Ordering::Relaxed) => ExitCode::SUCCESS,
        None => ExitCode::FAILURE,
    }
}
