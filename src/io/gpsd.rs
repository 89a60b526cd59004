//! gpsd JSON protocol client
//!
//! Protocol:
//! - TCP, default port 2947
//! - Client enables streaming with `?WATCH={"enable":true,"json":true};`
//! - Daemon sends one JSON object per line, tagged by `class`
//! - `TPV` carries position, error estimates, speed and track
//! - `SKY` carries satellite usage (`uSat`, or `used` flags per satellite)
//!
//! Every line counts as "data arrived"; only TPV lines produce a raw fix.

use crate::domain::types::{FixMode, FixStatus, RawFix};
use crate::io::source::PositionSource;
use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

pub const DEFAULT_GPSD_PORT: u16 = 2947;

const WATCH_COMMAND: &[u8] = b"?WATCH={\"enable\":true,\"json\":true};\n";

/// Repeated connection failures are only logged this often
const FAILURE_WARN_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
#[serde(tag = "class")]
enum GpsdReport {
    #[serde(rename = "TPV")]
    Tpv(TpvReport),
    #[serde(rename = "SKY")]
    Sky(SkyReport),
    #[serde(other)]
    Other,
}

#[derive(Debug, Default, Deserialize)]
struct TpvReport {
    mode: Option<u8>,
    status: Option<u8>,
    lat: Option<f64>,
    lon: Option<f64>,
    epx: Option<f64>,
    epy: Option<f64>,
    speed: Option<f64>,
    eps: Option<f64>,
    track: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct SkyReport {
    #[serde(rename = "uSat")]
    used_count: Option<u32>,
    #[serde(default)]
    satellites: Vec<SkySatellite>,
}

#[derive(Debug, Deserialize)]
struct SkySatellite {
    #[serde(default)]
    used: bool,
}

impl SkyReport {
    fn satellites_used(&self) -> Option<u32> {
        self.used_count.or_else(|| {
            if self.satellites.is_empty() {
                None
            } else {
                Some(self.satellites.iter().filter(|s| s.used).count() as u32)
            }
        })
    }
}

impl TpvReport {
    fn into_raw(self, satellites_used: u32) -> RawFix {
        let mode = self.mode.and_then(FixMode::from_gpsd);
        // Newer daemons omit `status` for a plain fix
        let status = match self.status {
            None => match mode {
                Some(FixMode::TwoD) | Some(FixMode::ThreeD) => Some(FixStatus::Fix),
                Some(_) => Some(FixStatus::NoFix),
                None => None,
            },
            Some(0) => Some(FixStatus::NoFix),
            Some(2) => Some(FixStatus::DgpsFix),
            Some(_) => Some(FixStatus::Fix),
        };

        RawFix {
            status,
            mode,
            latitude: self.lat,
            longitude: self.lon,
            epx: self.epx,
            epy: self.epy,
            speed: self.speed,
            eps: self.eps,
            track: self.track,
            satellites_used,
        }
    }
}

/// Parse one gpsd JSON line.
///
/// SKY reports update `satellites_used`; TPV reports become a [`RawFix`]
/// carrying the latest satellite count. Everything else yields `None`.
pub fn parse_report(line: &str, satellites_used: &mut u32) -> Option<RawFix> {
    let report: GpsdReport = match serde_json::from_str(line) {
        Ok(r) => r,
        Err(e) => {
            debug!(error = %e, "gpsd_unparsed_line");
            return None;
        }
    };

    match report {
        GpsdReport::Tpv(tpv) => Some(tpv.into_raw(*satellites_used)),
        GpsdReport::Sky(sky) => {
            if let Some(count) = sky.satellites_used() {
                *satellites_used = count;
            }
            None
        }
        GpsdReport::Other => None,
    }
}

/// Position source backed by a gpsd daemon.
///
/// Connects lazily on the first `wait` and reconnects after any read
/// failure; failures are reported as warnings and surface to the poller as
/// timeouts.
pub struct GpsdSource {
    host: String,
    port: u16,
    lines: Option<Lines<BufReader<TcpStream>>>,
    pending: Option<String>,
    satellites_used: u32,
    last_failure_warn: Option<Instant>,
}

impl GpsdSource {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            lines: None,
            pending: None,
            satellites_used: 0,
            last_failure_warn: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.lines.is_some()
    }

    async fn connect(&mut self, timeout: Duration) -> anyhow::Result<()> {
        let addr = format!("{}:{}", self.host, self.port);
        let mut stream = tokio::time::timeout(timeout, TcpStream::connect(&addr))
            .await
            .with_context(|| format!("connect to {} timed out", addr))?
            .with_context(|| format!("connect to {}", addr))?;
        stream.write_all(WATCH_COMMAND).await.context("send WATCH command")?;

        info!(endpoint = %addr, "gpsd_connected");
        self.lines = Some(BufReader::new(stream).lines());
        self.last_failure_warn = None;
        Ok(())
    }

    /// Rate-limit failure warnings to one per FAILURE_WARN_INTERVAL
    fn should_warn(&mut self) -> bool {
        let due = self.last_failure_warn.map_or(true, |t| t.elapsed() >= FAILURE_WARN_INTERVAL);
        if due {
            self.last_failure_warn = Some(Instant::now());
        }
        due
    }
}

#[async_trait]
impl PositionSource for GpsdSource {
    async fn wait(&mut self, timeout: Duration) -> bool {
        if self.pending.is_some() {
            return true;
        }

        let deadline = tokio::time::Instant::now() + timeout;

        if self.lines.is_none() {
            if let Err(e) = self.connect(timeout).await {
                if self.should_warn() {
                    warn!(endpoint = %self.describe(), error = %format!("{:#}", e), "gpsd_connect_failed");
                }
                tokio::time::sleep_until(deadline).await;
                return false;
            }
        }

        let Some(lines) = self.lines.as_mut() else {
            return false;
        };

        // Lines::next_line is cancel safe: a dropped wait loses no data
        let received = tokio::time::timeout_at(deadline, lines.next_line()).await;
        match received {
            Ok(Ok(Some(line))) => {
                self.pending = Some(line);
                true
            }
            Ok(Ok(None)) => {
                warn!(endpoint = %self.describe(), "gpsd_connection_closed");
                self.lines = None;
                tokio::time::sleep_until(deadline).await;
                false
            }
            Ok(Err(e)) => {
                warn!(endpoint = %self.describe(), error = %e, "gpsd_read_error");
                self.lines = None;
                tokio::time::sleep_until(deadline).await;
                false
            }
            Err(_) => false,
        }
    }

    fn read(&mut self) -> Option<RawFix> {
        let line = self.pending.take()?;
        parse_report(&line, &mut self.satellites_used)
    }

    fn describe(&self) -> String {
        format!("gpsd://{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    const TPV_3D: &str = r#"{"class":"TPV","device":"/dev/ttyUSB0","mode":3,"time":"2024-05-01T10:00:00.000Z","lat":51.398,"lon":-1.323,"alt":92.1,"epx":3.0,"epy":4.0,"track":87.5,"speed":1.25,"eps":0.5}"#;

    #[test]
    fn test_parse_tpv() {
        let mut sats = 7;
        let raw = parse_report(TPV_3D, &mut sats).unwrap();
        assert_eq!(raw.mode, Some(FixMode::ThreeD));
        assert_eq!(raw.status, Some(FixStatus::Fix));
        assert_eq!(raw.latitude, Some(51.398));
        assert_eq!(raw.longitude, Some(-1.323));
        assert_eq!(raw.epx, Some(3.0));
        assert_eq!(raw.epy, Some(4.0));
        assert_eq!(raw.speed, Some(1.25));
        assert_eq!(raw.eps, Some(0.5));
        assert_eq!(raw.track, Some(87.5));
        assert_eq!(raw.satellites_used, 7);
    }

    #[test]
    fn test_parse_tpv_status_mapping() {
        let mut sats = 0;
        let dgps = r#"{"class":"TPV","mode":2,"status":2,"lat":1.0,"lon":2.0}"#;
        assert_eq!(parse_report(dgps, &mut sats).unwrap().status, Some(FixStatus::DgpsFix));

        let no_fix = r#"{"class":"TPV","mode":1}"#;
        let raw = parse_report(no_fix, &mut sats).unwrap();
        assert_eq!(raw.mode, Some(FixMode::NoFix));
        assert_eq!(raw.status, Some(FixStatus::NoFix));
        assert_eq!(raw.latitude, None);

        let no_mode = r#"{"class":"TPV","lat":1.0,"lon":2.0}"#;
        let raw = parse_report(no_mode, &mut sats).unwrap();
        assert_eq!(raw.mode, None);
        assert_eq!(raw.status, None);

        let bogus_mode = r#"{"class":"TPV","mode":9,"lat":1.0,"lon":2.0}"#;
        assert_eq!(parse_report(bogus_mode, &mut sats).unwrap().mode, None);
    }

    #[test]
    fn test_parse_sky_updates_satellites() {
        let mut sats = 0;
        assert!(parse_report(r#"{"class":"SKY","uSat":11,"nSat":20}"#, &mut sats).is_none());
        assert_eq!(sats, 11);

        let listed = r#"{"class":"SKY","satellites":[{"PRN":1,"used":true},{"PRN":2,"used":false},{"PRN":3,"used":true}]}"#;
        assert!(parse_report(listed, &mut sats).is_none());
        assert_eq!(sats, 2);

        // SKY without satellite data leaves the count alone
        assert!(parse_report(r#"{"class":"SKY","hdop":1.2}"#, &mut sats).is_none());
        assert_eq!(sats, 2);

        let raw = parse_report(TPV_3D, &mut sats).unwrap();
        assert_eq!(raw.satellites_used, 2);
    }

    #[test]
    fn test_parse_other_and_garbage() {
        let mut sats = 0;
        assert!(parse_report(r#"{"class":"VERSION","release":"3.25"}"#, &mut sats).is_none());
        assert!(parse_report(r#"{"class":"DEVICES","devices":[]}"#, &mut sats).is_none());
        assert!(parse_report("not json", &mut sats).is_none());
        assert!(parse_report(r#"{"no_class":true}"#, &mut sats).is_none());
    }

    #[test]
    fn test_describe() {
        let source = GpsdSource::new("localhost", DEFAULT_GPSD_PORT);
        assert_eq!(source.describe(), "gpsd://localhost:2947");
        assert!(!source.is_connected());
    }

    #[tokio::test]
    async fn test_gpsd_session() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = socket.into_split();
            let mut lines = BufReader::new(read_half).lines();
            let watch = lines.next_line().await.unwrap().unwrap();
            assert!(watch.starts_with("?WATCH="));

            write_half.write_all(b"{\"class\":\"VERSION\",\"release\":\"3.25\"}\n").await.unwrap();
            write_half.write_all(b"{\"class\":\"SKY\",\"uSat\":8}\n").await.unwrap();
            write_half.write_all(TPV_3D.as_bytes()).await.unwrap();
            write_half.write_all(b"\n").await.unwrap();
            // Keep the connection open until the client is done
            let _ = lines.next_line().await;
        });

        let mut source = GpsdSource::new("127.0.0.1", port);
        let timeout = Duration::from_secs(2);

        assert!(source.wait(timeout).await);
        assert!(source.is_connected());
        assert_eq!(source.read(), None); // VERSION

        assert!(source.wait(timeout).await);
        assert_eq!(source.read(), None); // SKY

        assert!(source.wait(timeout).await);
        let raw = source.read().unwrap();
        assert_eq!(raw.latitude, Some(51.398));
        assert_eq!(raw.satellites_used, 8);

        // Nothing more: timeout
        assert!(!source.wait(Duration::from_millis(50)).await);

        drop(source);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_failure_reports_timeout() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut source = GpsdSource::new("127.0.0.1", port);
        let start = Instant::now();
        assert!(!source.wait(Duration::from_millis(100)).await);
        assert!(start.elapsed() >= Duration::from_millis(90));
        assert!(!source.is_connected());
        assert_eq!(source.read(), None);
    }
}
