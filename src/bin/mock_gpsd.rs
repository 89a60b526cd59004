//! Mock gpsd server
//!
//! Speaks the subset of the gpsd JSON protocol that `GpsdSource` reads.
//!
//! Behavior:
//! 1. Listens on configurable port (default 2947)
//! 2. Sends a VERSION banner on connect, then waits for `?WATCH=`
//! 3. Walks a straight track between two points and back, one TPV report
//!    per interval, with a SKY report every 10 steps
//!
//! The default track runs from Newbury to Theale, so `config/dev.toml`
//! watches see DEPART/ARRIVE events along the way.
//!
//! Usage:
//!   cargo run --bin mock-gpsd -- --port 2947 --interval-ms 500

use clap::Parser;
use serde_json::json;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

#[derive(Parser, Debug, Clone)]
#[command(name = "mock-gpsd")]
#[command(about = "Mock gpsd daemon walking a straight track")]
struct Args {
    /// TCP port to listen on
    #[arg(short, long, default_value = "2947")]
    port: u16,

    /// Track start latitude
    #[arg(long, default_value = "51.398", allow_negative_numbers = true)]
    from_lat: f64,

    /// Track start longitude
    #[arg(long, default_value = "-1.323", allow_negative_numbers = true)]
    from_lon: f64,

    /// Track end latitude
    #[arg(long, default_value = "51.433", allow_negative_numbers = true)]
    to_lat: f64,

    /// Track end longitude
    #[arg(long, default_value = "-1.075", allow_negative_numbers = true)]
    to_lon: f64,

    /// Reports per leg of the track
    #[arg(long, default_value = "60")]
    steps: u32,

    /// Interval between reports (ms)
    #[arg(long, default_value = "1000")]
    interval_ms: u64,

    /// Horizontal error per axis reported as epx/epy (meters)
    #[arg(long, default_value = "5.0")]
    error_m: f64,

    /// Satellites reported as used
    #[arg(long, default_value = "9")]
    satellites: u32,
}

/// Position at `step` of a back-and-forth walk with `steps` per leg
fn track_position(args: &Args, step: u64) -> (f64, f64, f64) {
    let steps = u64::from(args.steps.max(1));
    let leg = step / steps;
    let within = (step % steps) as f64 / steps as f64;
    let t = if leg % 2 == 0 { within } else { 1.0 - within };

    let lat = args.from_lat + (args.to_lat - args.from_lat) * t;
    let lon = args.from_lon + (args.to_lon - args.from_lon) * t;
    let track = if leg % 2 == 0 { bearing_deg(args.from_lat, args.from_lon, args.to_lat, args.to_lon) } else {
        bearing_deg(args.to_lat, args.to_lon, args.from_lat, args.from_lon)
    };
    (lat, lon, track)
}

/// Initial great-circle bearing in degrees [0, 360)
fn bearing_deg(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let dlon = (lon2 - lon1).to_radians();
    let y = dlon.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * dlon.cos();
    (y.atan2(x).to_degrees() + 360.0) % 360.0
}

fn tpv_line(args: &Args, step: u64) -> String {
    let (lat, lon, track) = track_position(args, step);
    let leg_m = 6_378_137.0
        * ((args.to_lat - args.from_lat).to_radians().powi(2)
            + ((args.to_lon - args.from_lon).to_radians() * args.from_lat.to_radians().cos()).powi(2))
        .sqrt();
    let speed = leg_m / f64::from(args.steps.max(1)) / (args.interval_ms.max(1) as f64 / 1000.0);

    let now = OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default();

    json!({
        "class": "TPV",
        "device": "/dev/mock0",
        "mode": 3,
        "time": now,
        "lat": lat,
        "lon": lon,
        "alt": 90.0,
        "epx": args.error_m,
        "epy": args.error_m,
        "track": track,
        "speed": speed,
        "eps": 0.5,
    })
    .to_string()
}

fn sky_line(args: &Args) -> String {
    json!({ "class": "SKY", "device": "/dev/mock0", "uSat": args.satellites, "nSat": args.satellites + 3 })
        .to_string()
}

async fn handle_client(stream: TcpStream, args: Args) {
    let peer = stream.peer_addr().map(|a| a.to_string()).unwrap_or_else(|_| "unknown".to_string());
    println!("[MOCK] Client connected from {}", peer);

    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    let banner = json!({ "class": "VERSION", "release": "mock", "proto_major": 3, "proto_minor": 14 });
    if write_half.write_all(format!("{}\n", banner).as_bytes()).await.is_err() {
        println!("[MOCK] Connection closed (write failed)");
        return;
    }

    // Wait for ?WATCH before streaming
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.starts_with("?WATCH") => {
                println!("[MOCK] WATCH received: {}", line.trim());
                break;
            }
            Ok(Some(line)) => println!("[MOCK] Ignoring command: {}", line.trim()),
            Ok(None) => {
                println!("[MOCK] Client disconnected before WATCH");
                return;
            }
            Err(e) => {
                eprintln!("[MOCK] Read error: {}", e);
                return;
            }
        }
    }

    let mut interval = tokio::time::interval(Duration::from_millis(args.interval_ms.max(1)));
    let mut step: u64 = 0;
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let mut payload = String::new();
                if step % 10 == 0 {
                    payload.push_str(&sky_line(&args));
                    payload.push('\n');
                }
                payload.push_str(&tpv_line(&args, step));
                payload.push('\n');

                if write_half.write_all(payload.as_bytes()).await.is_err() {
                    println!("[MOCK] Connection closed (write failed)");
                    return;
                }
                if step % u64::from(args.steps.max(1)) == 0 {
                    let (lat, lon, _) = track_position(&args, step);
                    println!("[MOCK] Step {} at {:.5},{:.5}", step, lat, lon);
                }
                step += 1;
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => println!("[MOCK] Ignoring command: {}", line.trim()),
                    Ok(None) => {
                        println!("[MOCK] Client disconnected");
                        return;
                    }
                    Err(e) => {
                        eprintln!("[MOCK] Read error: {}", e);
                        return;
                    }
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    println!("[MOCK] gpsd mock listening on port {}", args.port);
    println!(
        "[MOCK] Track {:.5},{:.5} -> {:.5},{:.5} in {} steps of {} ms",
        args.from_lat, args.from_lon, args.to_lat, args.to_lon, args.steps, args.interval_ms
    );

    let listener = TcpListener::bind(("0.0.0.0", args.port)).await?;
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _)) => {
                        tokio::spawn(handle_client(stream, args.clone()));
                    }
                    Err(e) => eprintln!("[MOCK] Accept error: {}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("[MOCK] Shutting down");
                return Ok(());
            }
        }
    }
}
