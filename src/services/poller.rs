//! Poll-and-dispatch loop
//!
//! One task per coordinator:
//! 1. wait on the source for up to `poll_timeout`
//! 2. data: read, validate, hand the fix to the sink (invalid data is skipped)
//! 3. no data: report a timeout
//! 4. sleep `inter_poll_delay`
//!
//! Shutdown is raced against the wait and the sleep, and checked again after
//! waking, so no fix is dispatched once shutdown has been observed. The loop
//! hands its source back on exit so the owner can restart it.

use crate::domain::types::{Fix, FixRejected};
use crate::io::source::PositionSource;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTiming {
    /// How long to wait for data before reporting a timeout
    pub poll_timeout: Duration,
    /// Pacing delay after every cycle, whatever the outcome
    pub inter_poll_delay: Duration,
}

impl Default for PollTiming {
    fn default() -> Self {
        Self { poll_timeout: Duration::from_secs(2), inter_poll_delay: Duration::from_millis(500) }
    }
}

/// Receiver of poll outcomes
pub trait PollSink: Send + Sync {
    fn on_fix(&self, fix: Fix);

    fn on_timeout(&self);

    fn on_rejected(&self, _reason: FixRejected) {}
}

pub struct Poller {
    source: Box<dyn PositionSource>,
    timing: PollTiming,
    sink: Arc<dyn PollSink>,
}

/// Resolves once shutdown is requested or the sender is gone
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

impl Poller {
    pub fn new(source: Box<dyn PositionSource>, timing: PollTiming, sink: Arc<dyn PollSink>) -> Self {
        Self { source, timing, sink }
    }

    /// Run until shutdown, then return the source
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Box<dyn PositionSource> {
        info!(
            source = %self.source.describe(),
            poll_timeout_ms = %self.timing.poll_timeout.as_millis(),
            inter_poll_delay_ms = %self.timing.inter_poll_delay.as_millis(),
            "poller_started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let arrived = tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => break,
                arrived = self.source.wait(self.timing.poll_timeout) => arrived,
            };

            if *shutdown.borrow() {
                break;
            }

            if arrived {
                self.ingest();
            } else {
                self.sink.on_timeout();
            }

            tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => break,
                _ = tokio::time::sleep(self.timing.inter_poll_delay) => {}
            }
        }

        info!(source = %self.source.describe(), "poller_stopped");
        self.source
    }

    fn ingest(&mut self) {
        let Some(raw) = self.source.read() else {
            debug!("position_null_read");
            return;
        };

        match Fix::validate(&raw) {
            Ok(fix) => self.sink.on_fix(fix),
            Err(reason) => {
                debug!(reason = %reason.as_str(), "fix_rejected");
                self.sink.on_rejected(reason);
            }
        }
    }
}
