//! GPS coordinator
//!
//! Composes a position source, the watch registry and the poll loop.
//! Watch management and `last_fix` may be called from any thread while the
//! loop runs; `start`/`stop` control the loop's lifecycle.

use crate::domain::geo::{self, DistanceStrategy, SphericalCosines};
use crate::domain::types::{Fix, FixRejected};
use crate::domain::watch::WatchSink;
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::gpsd::GpsdSource;
use crate::io::replay::ReplaySource;
use crate::io::source::PositionSource;
use crate::services::poller::{PollSink, PollTiming, Poller};
use crate::services::registry::WatchRegistry;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Caller hooks run by the poll loop.
///
/// `on_fix` runs after every dispatched fix, outside the registry lock, so it
/// may call back into the coordinator. `on_timeout` runs on every poll cycle
/// that saw no data.
pub trait GpsHandler: Send + Sync {
    fn on_fix(&self, _fix: &Fix) {}

    fn on_timeout(&self) {}
}

/// Handler that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

impl GpsHandler for NoopHandler {}

/// State shared between the coordinator and its poll task
struct Core {
    registry: WatchRegistry,
    handler: Arc<dyn GpsHandler>,
    metrics: Arc<Metrics>,
}

impl PollSink for Core {
    fn on_fix(&self, fix: Fix) {
        let start = Instant::now();
        let summary = self.registry.dispatch(&fix);
        let latency_us = start.elapsed().as_micros() as u64;
        self.metrics.record_dispatch(latency_us, summary.arrivals, summary.departures);

        debug!(
            lat = %fix.latitude,
            lon = %fix.longitude,
            eph = %fix.eph,
            watches = %summary.watches,
            latency_us = %latency_us,
            "fix_dispatched"
        );
        self.handler.on_fix(&fix);
    }

    fn on_timeout(&self) {
        self.metrics.record_timeout();
        debug!("poll_timeout");
        self.handler.on_timeout();
    }

    fn on_rejected(&self, _reason: FixRejected) {
        self.metrics.record_rejected();
    }
}

enum LoopState {
    Idle(Box<dyn PositionSource>),
    Running { shutdown: watch::Sender<bool>, task: JoinHandle<Box<dyn PositionSource>>, runtime: Handle },
    /// Shutdown sent; `stopped` flips to true once the loop has exited
    Stopping { stopped: watch::Receiver<bool> },
    /// The poll task panicked and took the source with it
    Failed,
}

type SharedState = Arc<Mutex<LoopState>>;

/// Join the poll task and settle the state, independent of any caller
async fn reap_poller(
    state: SharedState,
    task: JoinHandle<Box<dyn PositionSource>>,
    stopped: watch::Sender<bool>,
    source_description: String,
) {
    let next = match task.await {
        Ok(source) => LoopState::Idle(source),
        Err(e) => {
            warn!(source = %source_description, error = %e, "poller_task_failed");
            LoopState::Failed
        }
    };
    *state.lock() = next;
    let _ = stopped.send(true);
    info!(source = %source_description, "coordinator_stopped");
}

pub struct GpsCoordinator {
    core: Arc<Core>,
    timing: PollTiming,
    source_description: String,
    state: SharedState,
}

pub struct GpsCoordinatorBuilder {
    source: Box<dyn PositionSource>,
    timing: PollTiming,
    handler: Arc<dyn GpsHandler>,
    strategy: Arc<dyn DistanceStrategy>,
    metrics: Arc<Metrics>,
}

impl GpsCoordinatorBuilder {
    pub fn timing(mut self, timing: PollTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn handler(mut self, handler: Arc<dyn GpsHandler>) -> Self {
        self.handler = handler;
        self
    }

    pub fn distance(mut self, strategy: Arc<dyn DistanceStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Apply timing and distance backend from configuration
    pub fn config(self, config: &Config) -> Self {
        self.timing(PollTiming {
            poll_timeout: config.poll_timeout(),
            inter_poll_delay: config.poll_sleep(),
        })
        .distance(Arc::new(config.distance_backend()))
    }

    pub fn build(self) -> GpsCoordinator {
        let source_description = self.source.describe();
        GpsCoordinator {
            core: Arc::new(Core {
                registry: WatchRegistry::new(self.strategy),
                handler: self.handler,
                metrics: self.metrics,
            }),
            timing: self.timing,
            source_description,
            state: Arc::new(Mutex::new(LoopState::Idle(self.source))),
        }
    }
}

impl GpsCoordinator {
    pub fn builder(source: Box<dyn PositionSource>) -> GpsCoordinatorBuilder {
        GpsCoordinatorBuilder {
            source,
            timing: PollTiming::default(),
            handler: Arc::new(NoopHandler),
            strategy: Arc::new(SphericalCosines),
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// Build a coordinator for the configured source: the replay file when
    /// one is set, gpsd otherwise.
    pub async fn from_config(config: &Config, handler: Arc<dyn GpsHandler>) -> anyhow::Result<Self> {
        let source: Box<dyn PositionSource> = match config.replay_file() {
            Some(path) => Box::new(ReplaySource::open(path).await?),
            None => Box::new(GpsdSource::new(config.gpsd_host(), config.gpsd_port())),
        };
        Ok(Self::builder(source).config(config).handler(handler).build())
    }

    /// Register a geofence, replacing (and resetting) any watch with the
    /// same name. Returns false and changes nothing if the arguments are
    /// unusable.
    pub fn add_watch(&self, name: &str, latitude: f64, longitude: f64, radius_m: f64, sink: WatchSink) -> bool {
        if name.is_empty() {
            warn!("watch_name_empty");
            return false;
        }
        if !geo::is_finite(latitude) || !geo::is_finite(longitude) {
            warn!(watch = %name, lat = %latitude, lon = %longitude, "watch_center_invalid");
            return false;
        }
        if !geo::is_finite(radius_m) || radius_m < 0.0 {
            warn!(watch = %name, radius_m = %radius_m, "watch_radius_invalid");
            return false;
        }

        let replaced = self.core.registry.add(name, latitude, longitude, radius_m, sink);
        info!(
            watch = %name,
            lat = %latitude,
            lon = %longitude,
            radius_m = %radius_m,
            replaced = %replaced,
            "watch_added"
        );
        true
    }

    /// Remove a watch; unknown names are a no-op
    pub fn remove_watch(&self, name: &str) -> bool {
        let removed = self.core.registry.remove(name);
        if removed {
            info!(watch = %name, "watch_removed");
        } else {
            debug!(watch = %name, "watch_remove_unknown");
        }
        removed
    }

    /// Copy of the most recent valid fix, or the zero (invalid) fix
    pub fn last_fix(&self) -> Fix {
        self.core.registry.last_fix()
    }

    pub fn watch_count(&self) -> usize {
        self.core.registry.len()
    }

    pub fn watch_names(&self) -> Vec<String> {
        self.core.registry.names()
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.core.metrics
    }

    pub fn source_description(&self) -> &str {
        &self.source_description
    }

    /// True from `start` until the poll loop has fully exited
    pub fn is_running(&self) -> bool {
        matches!(*self.state.lock(), LoopState::Running { .. } | LoopState::Stopping { .. })
    }

    /// Spawn the poll loop on the current tokio runtime.
    ///
    /// Returns false (with a warning) if already running or if called
    /// outside a runtime.
    pub fn start(&self) -> bool {
        let runtime = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!("coordinator_start_outside_runtime");
                return false;
            }
        };

        let mut state = self.state.lock();
        let source = match std::mem::replace(&mut *state, LoopState::Failed) {
            LoopState::Idle(source) => source,
            other => {
                match other {
                    LoopState::Running { .. } => warn!(source = %self.source_description, "coordinator_already_started"),
                    LoopState::Stopping { .. } => warn!(source = %self.source_description, "coordinator_still_stopping"),
                    _ => warn!(source = %self.source_description, "coordinator_not_startable"),
                }
                *state = other;
                return false;
            }
        };

        let (shutdown, shutdown_rx) = watch::channel(false);
        let poller = Poller::new(source, self.timing, self.core.clone());
        let task = runtime.spawn(poller.run(shutdown_rx));
        *state = LoopState::Running { shutdown, task, runtime };

        info!(source = %self.source_description, watches = %self.watch_count(), "coordinator_started");
        true
    }

    /// Signal the poll loop and wait for it to exit.
    ///
    /// The join runs on a detached task, so dropping this future part way
    /// never strands the coordinator: the loop still exits and the source
    /// comes back for the next `start`. A second `stop` issued while one is
    /// in flight waits for the same exit.
    ///
    /// Returns false (with a warning) if the loop was not running.
    pub async fn stop(&self) -> bool {
        let mut stopped = {
            let mut state = self.state.lock();
            match std::mem::replace(&mut *state, LoopState::Failed) {
                LoopState::Running { shutdown, task, runtime } => {
                    let _ = shutdown.send(true);
                    let (stopped_tx, stopped_rx) = watch::channel(false);
                    runtime.spawn(reap_poller(
                        self.state.clone(),
                        task,
                        stopped_tx,
                        self.source_description.clone(),
                    ));
                    *state = LoopState::Stopping { stopped: stopped_rx.clone() };
                    stopped_rx
                }
                LoopState::Stopping { stopped } => {
                    debug!(source = %self.source_description, "coordinator_stop_in_progress");
                    *state = LoopState::Stopping { stopped: stopped.clone() };
                    stopped
                }
                other => {
                    *state = other;
                    warn!(source = %self.source_description, "coordinator_not_running");
                    return false;
                }
            }
        };

        // Err means the reaper is gone, which only happens after it settled the state
        let _ = stopped.wait_for(|done| *done).await;
        true
    }
}

impl Drop for GpsCoordinator {
    fn drop(&mut self) {
        if let LoopState::Running { shutdown, .. } = &*self.state.lock() {
            let _ = shutdown.send(true);
        }
    }
}
