//! End-to-end tests: source -> poll loop -> registry -> watch sinks

use gps_watch::domain::geo::EARTH_RADIUS_M;
use gps_watch::domain::types::{FixMode, FixStatus, RawFix};
use gps_watch::domain::{Fix, WatchAlarm, WatchEvent, WatchSink};
use gps_watch::infra::Config;
use gps_watch::io::ChannelSource;
use gps_watch::services::{GpsCoordinator, GpsHandler, NoopHandler, PollTiming};
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::sync::mpsc;
use tokio::time::timeout;

const NEWBURY: (f64, f64) = (51.398, -1.323);
const THEALE: (f64, f64) = (51.433, -1.075);

type Alarm = (String, WatchEvent, f64);

fn fast() -> PollTiming {
    PollTiming { poll_timeout: Duration::from_millis(50), inter_poll_delay: Duration::from_millis(1) }
}

fn channel_sink(tx: mpsc::UnboundedSender<Alarm>) -> WatchSink {
    Arc::new(move |alarm: &WatchAlarm<'_>| {
        let _ = tx.send((alarm.name.to_string(), alarm.event, alarm.distance_m));
    })
}

/// Raw 3D fix `meters` north of `origin` with per-axis error `err`
fn raw_north_of(origin: (f64, f64), meters: f64, err: f64) -> RawFix {
    RawFix {
        status: Some(FixStatus::Fix),
        mode: Some(FixMode::ThreeD),
        latitude: Some(origin.0 + (meters / EARTH_RADIUS_M).to_degrees()),
        longitude: Some(origin.1),
        epx: Some(err),
        epy: Some(err),
        satellites_used: 8,
        ..RawFix::default()
    }
}

async fn next_alarm(rx: &mut mpsc::UnboundedReceiver<Alarm>) -> Alarm {
    timeout(Duration::from_secs(2), rx.recv()).await.expect("no alarm within 2s").expect("sink channel closed")
}

/// Wait until the coordinator has dispatched `count` fixes in total
async fn wait_dispatched(coordinator: &GpsCoordinator, count: u64) {
    for _ in 0..400 {
        if coordinator.metrics().fixes_dispatched() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("only {} of {} fixes dispatched", coordinator.metrics().fixes_dispatched(), count);
}

#[tokio::test]
async fn test_arrive_depart_with_hysteresis() {
    let (tx, source) = ChannelSource::new();
    let coordinator = GpsCoordinator::builder(Box::new(source)).timing(fast()).build();
    let (alarm_tx, mut alarms) = mpsc::unbounded_channel();
    assert!(coordinator.add_watch("NEWBURY", NEWBURY.0, NEWBURY.1, 500.0, channel_sink(alarm_tx)));
    assert!(coordinator.start());

    // Far first: silent
    tx.send(Some(raw_north_of(NEWBURY, 10_000.0, 7.0))).unwrap();
    wait_dispatched(&coordinator, 1).await;
    assert!(alarms.try_recv().is_err());

    // At the center: ARRIVE
    tx.send(Some(raw_north_of(NEWBURY, 0.0, 0.0))).unwrap();
    let (name, event, distance) = next_alarm(&mut alarms).await;
    assert_eq!(name, "NEWBURY");
    assert_eq!(event, WatchEvent::Arrive);
    assert!(distance < 1.0);

    // Straddling the boundary, then back inside: nothing
    tx.send(Some(raw_north_of(NEWBURY, 495.0, 7.0))).unwrap();
    tx.send(Some(raw_north_of(NEWBURY, 100.0, 1.0))).unwrap();
    wait_dispatched(&coordinator, 4).await;
    assert!(alarms.try_recv().is_err());

    // Well outside: DEPART
    tx.send(Some(raw_north_of(NEWBURY, 2_000.0, 3.0))).unwrap();
    let (_, event, distance) = next_alarm(&mut alarms).await;
    assert_eq!(event, WatchEvent::Depart);
    assert!((distance - 2_000.0).abs() < 1.0);

    assert!(coordinator.stop().await);
    let metrics = coordinator.metrics();
    assert_eq!(metrics.arrivals(), 1);
    assert_eq!(metrics.departures(), 1);
}

#[tokio::test]
async fn test_invalid_fix_changes_nothing() {
    let (tx, source) = ChannelSource::new();
    let coordinator = GpsCoordinator::builder(Box::new(source)).timing(fast()).build();
    let (alarm_tx, mut alarms) = mpsc::unbounded_channel();
    coordinator.add_watch("NEWBURY", NEWBURY.0, NEWBURY.1, 500.0, channel_sink(alarm_tx));
    coordinator.start();

    let mut bad = raw_north_of(NEWBURY, 0.0, 0.0);
    bad.latitude = Some(f64::NAN);
    tx.send(Some(bad)).unwrap();
    let mut no_errors = raw_north_of(NEWBURY, 0.0, 0.0);
    no_errors.epx = None;
    tx.send(Some(no_errors)).unwrap();
    tx.send(None).unwrap();

    for _ in 0..400 {
        if coordinator.metrics().fixes_rejected() >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    coordinator.stop().await;

    assert_eq!(coordinator.metrics().fixes_rejected(), 2);
    assert_eq!(coordinator.metrics().fixes_dispatched(), 0);
    assert!(!coordinator.last_fix().valid);
    assert!(alarms.try_recv().is_err());
}

struct TimeoutCounter {
    fixes: AtomicU64,
    timeouts: AtomicU64,
}

impl GpsHandler for TimeoutCounter {
    fn on_fix(&self, _fix: &Fix) {
        self.fixes.fetch_add(1, Ordering::Relaxed);
    }

    fn on_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }
}

#[tokio::test]
async fn test_timeout_notifies_handler_without_dispatch() {
    let (_tx, source) = ChannelSource::new();
    let handler = Arc::new(TimeoutCounter { fixes: AtomicU64::new(0), timeouts: AtomicU64::new(0) });
    let timing = PollTiming { poll_timeout: Duration::from_millis(30), inter_poll_delay: Duration::from_secs(30) };
    let coordinator = GpsCoordinator::builder(Box::new(source)).timing(timing).handler(handler.clone()).build();
    coordinator.start();

    for _ in 0..200 {
        if handler.timeouts.load(Ordering::Relaxed) > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // Stop interrupts the 30 s pacing sleep
    assert!(timeout(Duration::from_secs(1), coordinator.stop()).await.unwrap());
    assert_eq!(handler.timeouts.load(Ordering::Relaxed), 1);
    assert_eq!(handler.fixes.load(Ordering::Relaxed), 0);
    assert_eq!(coordinator.metrics().fixes_dispatched(), 0);
}

/// Handler that calls back into the coordinator from `on_fix`
struct LastFixReader {
    coordinator: parking_lot::Mutex<Option<Arc<GpsCoordinator>>>,
    seen: mpsc::UnboundedSender<Fix>,
}

impl GpsHandler for LastFixReader {
    fn on_fix(&self, _fix: &Fix) {
        if let Some(coordinator) = self.coordinator.lock().as_ref() {
            let _ = self.seen.send(coordinator.last_fix());
        }
    }
}

#[tokio::test]
async fn test_handler_may_read_last_fix() {
    let (tx, source) = ChannelSource::new();
    let (seen_tx, mut seen) = mpsc::unbounded_channel();
    let handler = Arc::new(LastFixReader { coordinator: parking_lot::Mutex::new(None), seen: seen_tx });
    let coordinator =
        Arc::new(GpsCoordinator::builder(Box::new(source)).timing(fast()).handler(handler.clone()).build());
    *handler.coordinator.lock() = Some(coordinator.clone());
    coordinator.start();

    tx.send(Some(raw_north_of(THEALE, 0.0, 2.0))).unwrap();
    let fix = timeout(Duration::from_secs(2), seen.recv()).await.unwrap().unwrap();
    assert!(fix.valid);
    assert_eq!(fix.latitude, THEALE.0);
    assert_eq!(fix.satellites_used, 8);

    coordinator.stop().await;
    // Break the handler -> coordinator cycle
    handler.coordinator.lock().take();
}

#[tokio::test]
async fn test_watches_added_while_running() {
    let (tx, source) = ChannelSource::new();
    let coordinator = Arc::new(GpsCoordinator::builder(Box::new(source)).timing(fast()).build());
    let (alarm_tx, mut alarms) = mpsc::unbounded_channel();
    coordinator.start();

    // Hammer the registry from other threads while fixes flow
    let mut workers = Vec::new();
    for t in 0..3 {
        let coordinator = coordinator.clone();
        workers.push(std::thread::spawn(move || {
            for i in 0..100 {
                let name = format!("scratch-{}-{}", t, i % 5);
                let sink: WatchSink = Arc::new(|_alarm: &WatchAlarm<'_>| {});
                coordinator.add_watch(&name, NEWBURY.0, NEWBURY.1, 500.0, sink);
                coordinator.remove_watch(&name);
            }
        }));
    }
    for i in 0..20 {
        tx.send(Some(raw_north_of(NEWBURY, f64::from(i) * 100.0, 1.0))).unwrap();
    }
    for worker in workers {
        worker.join().unwrap();
    }
    wait_dispatched(&coordinator, 20).await;

    // Every scratch watch was removed after being added
    assert_eq!(coordinator.watch_count(), 0);

    // A watch added now sees the next fix
    coordinator.add_watch("THEALE", THEALE.0, THEALE.1, 500.0, channel_sink(alarm_tx));
    tx.send(Some(raw_north_of(THEALE, 10.0, 1.0))).unwrap();
    let (name, event, _) = next_alarm(&mut alarms).await;
    assert_eq!((name.as_str(), event), ("THEALE", WatchEvent::Arrive));

    coordinator.stop().await;
}

#[tokio::test]
async fn test_replay_from_config() {
    let mut track = NamedTempFile::new().unwrap();
    writeln!(track, r#"{{"class":"VERSION","release":"3.25"}}"#).unwrap();
    writeln!(track, r#"{{"class":"SKY","uSat":10}}"#).unwrap();
    writeln!(track, r#"{{"class":"TPV","mode":3,"lat":51.50,"lon":-1.323,"epx":4.0,"epy":4.0}}"#).unwrap();
    writeln!(track, r#"{{"class":"TPV","mode":3,"lat":51.398,"lon":-1.323,"epx":4.0,"epy":4.0,"speed":1.5,"eps":0.3}}"#)
        .unwrap();
    track.flush().unwrap();

    let mut config_file = NamedTempFile::new().unwrap();
    write!(
        config_file,
        "[poll]\ntimeout_ms = 20\nsleep_ms = 1\n\n[replay]\nfile = \"{}\"\n",
        track.path().display()
    )
    .unwrap();
    config_file.flush().unwrap();
    let config = Config::from_file(config_file.path()).unwrap();

    let coordinator = GpsCoordinator::from_config(&config, Arc::new(NoopHandler)).await.unwrap();
    assert!(coordinator.source_description().starts_with("replay://"));
    let (alarm_tx, mut alarms) = mpsc::unbounded_channel();
    coordinator.add_watch("NEWBURY", NEWBURY.0, NEWBURY.1, 500.0, channel_sink(alarm_tx));
    coordinator.start();

    let (_, event, _) = next_alarm(&mut alarms).await;
    assert_eq!(event, WatchEvent::Arrive);
    coordinator.stop().await;

    let fix = coordinator.last_fix();
    assert_eq!(fix.satellites_used, 10);
    let report = fix.report();
    assert_eq!(report.speed, Some(1.5));
    assert_eq!(report.eph, Some(5.657));
}
