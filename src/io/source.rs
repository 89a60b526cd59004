//! Position source abstraction
//!
//! A source is polled by exactly one task. `wait` blocks (asynchronously) for
//! up to the given timeout and reports whether data arrived; `read` then
//! yields the raw report, or `None` when the data did not carry a position
//! report (status messages, malformed lines, null reads).
//!
//! `wait` must be cancel safe: the poller races it against the shutdown
//! signal and drops the future on shutdown.

use crate::domain::types::RawFix;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

#[async_trait]
pub trait PositionSource: Send {
    /// Wait up to `timeout` for data. Returns `true` if data is ready to `read`.
    async fn wait(&mut self, timeout: Duration) -> bool;

    /// Take the data received by the last successful `wait`
    fn read(&mut self) -> Option<RawFix>;

    /// Human readable description for logs (e.g. `gpsd://localhost:2947`)
    fn describe(&self) -> String;
}

/// Source fed through a channel.
///
/// Each `Some(raw)` sent is one report; `None` models a null read.
/// Useful for embedding applications that acquire positions themselves.
pub struct ChannelSource {
    rx: mpsc::UnboundedReceiver<Option<RawFix>>,
    pending: Option<Option<RawFix>>,
    closed: bool,
}

impl ChannelSource {
    pub fn new() -> (mpsc::UnboundedSender<Option<RawFix>>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx, pending: None, closed: false })
    }
}

#[async_trait]
impl PositionSource for ChannelSource {
    async fn wait(&mut self, timeout: Duration) -> bool {
        if self.pending.is_some() {
            return true;
        }
        if self.closed {
            tokio::time::sleep(timeout).await;
            return false;
        }

        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(item)) => {
                self.pending = Some(item);
                true
            }
            Ok(None) => {
                tracing::debug!("channel_source_closed");
                self.closed = true;
                false
            }
            Err(_) => false,
        }
    }

    fn read(&mut self) -> Option<RawFix> {
        self.pending.take().flatten()
    }

    fn describe(&self) -> String {
        "channel".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_source_delivers_in_order() {
        let (tx, mut source) = ChannelSource::new();
        let raw = RawFix { latitude: Some(1.0), ..RawFix::default() };
        tx.send(Some(raw.clone())).unwrap();
        tx.send(None).unwrap();

        assert!(source.wait(Duration::from_millis(50)).await);
        assert_eq!(source.read(), Some(raw));

        assert!(source.wait(Duration::from_millis(50)).await);
        assert_eq!(source.read(), None);
    }

    #[tokio::test]
    async fn test_channel_source_times_out() {
        let (_tx, mut source) = ChannelSource::new();
        assert!(!source.wait(Duration::from_millis(20)).await);
        assert_eq!(source.read(), None);
    }

    #[tokio::test]
    async fn test_channel_source_closed_reports_timeout() {
        let (tx, mut source) = ChannelSource::new();
        drop(tx);
        assert!(!source.wait(Duration::from_millis(10)).await);
        assert!(!source.wait(Duration::from_millis(10)).await);
    }
}
