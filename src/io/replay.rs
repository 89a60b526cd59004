//! Replay of recorded gpsd JSON lines
//!
//! Each line of the file is delivered as one report, one per poll cycle, so
//! the poll pacing sets the replay speed. Once the file is exhausted every
//! wait times out.

use crate::domain::types::RawFix;
use crate::io::gpsd::parse_report;
use crate::io::source::PositionSource;
use anyhow::Context;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tracing::{info, warn};

pub struct ReplaySource {
    path: PathBuf,
    lines: Option<Lines<BufReader<File>>>,
    pending: Option<String>,
    satellites_used: u32,
    lines_read: u64,
}

impl ReplaySource {
    /// Open a replay file
    pub async fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)
            .await
            .with_context(|| format!("Failed to open replay file {}", path.display()))?;

        info!(file = %path.display(), "replay_opened");
        Ok(Self {
            path,
            lines: Some(BufReader::new(file).lines()),
            pending: None,
            satellites_used: 0,
            lines_read: 0,
        })
    }

    pub fn lines_read(&self) -> u64 {
        self.lines_read
    }

    pub fn is_exhausted(&self) -> bool {
        self.lines.is_none() && self.pending.is_none()
    }
}

#[async_trait]
impl PositionSource for ReplaySource {
    async fn wait(&mut self, timeout: Duration) -> bool {
        if self.pending.is_some() {
            return true;
        }

        let Some(lines) = self.lines.as_mut() else {
            tokio::time::sleep(timeout).await;
            return false;
        };

        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    self.lines_read += 1;
                    self.pending = Some(line);
                    return true;
                }
                Ok(None) => {
                    info!(file = %self.path.display(), lines = %self.lines_read, "replay_finished");
                    break;
                }
                Err(e) => {
                    warn!(file = %self.path.display(), error = %e, "replay_read_error");
                    break;
                }
            }
        }

        self.lines = None;
        tokio::time::sleep(timeout).await;
        false
    }

    fn read(&mut self) -> Option<RawFix> {
        let line = self.pending.take()?;
        parse_report(&line, &mut self.satellites_used)
    }

    fn describe(&self) -> String {
        format!("replay://{}", self.path.display())
    }
}
