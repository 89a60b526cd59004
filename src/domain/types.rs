//! Shared types for GPS fixes, proximity classification and watch events

use crate::domain::geo;
use serde::Serialize;

/// Receiver fix mode as reported by the location daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixMode {
    NotSeen,
    NoFix,
    TwoD,
    ThreeD,
}

impl FixMode {
    /// Map the numeric gpsd `mode` field (0..=3)
    pub fn from_gpsd(mode: u8) -> Option<Self> {
        match mode {
            0 => Some(FixMode::NotSeen),
            1 => Some(FixMode::NoFix),
            2 => Some(FixMode::TwoD),
            3 => Some(FixMode::ThreeD),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FixMode::NotSeen => "not_seen",
            FixMode::NoFix => "no_fix",
            FixMode::TwoD => "2d",
            FixMode::ThreeD => "3d",
        }
    }
}

/// Receiver fix status (plain or differential)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixStatus {
    NoFix,
    Fix,
    DgpsFix,
}

/// Raw position report as delivered by a position source.
///
/// Every field the daemon may omit is an `Option`; presence is checked
/// by [`Fix::validate`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawFix {
    pub status: Option<FixStatus>,
    pub mode: Option<FixMode>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Longitude error estimate (meters)
    pub epx: Option<f64>,
    /// Latitude error estimate (meters)
    pub epy: Option<f64>,
    pub speed: Option<f64>,
    pub eps: Option<f64>,
    pub track: Option<f64>,
    pub satellites_used: u32,
}

/// Ground speed with its error estimate (m/s)
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SpeedEstimate {
    pub speed: f64,
    pub eps: f64,
}

/// Validated snapshot of position knowledge.
///
/// `Fix::default()` is the zero, invalid fix returned before anything
/// was received.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Fix {
    pub valid: bool,
    pub latitude: f64,
    pub longitude: f64,
    /// 1-sigma horizontal position error (meters)
    pub eph: f64,
    pub speed: Option<SpeedEstimate>,
    /// Course over ground (degrees)
    pub track: Option<f64>,
    pub satellites_used: u32,
}

/// Why a raw report did not produce a valid fix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixRejected {
    MissingStatus,
    NoFix,
    MissingMode,
    ModeNotSeen,
    ModeNoFix,
    MissingPosition,
    MissingHorizontalError,
    HorizontalErrorNaN,
    NonFinitePosition,
}

impl FixRejected {
    pub fn as_str(&self) -> &'static str {
        match self {
            FixRejected::MissingStatus => "missing_status",
            FixRejected::NoFix => "no_fix",
            FixRejected::MissingMode => "missing_mode",
            FixRejected::ModeNotSeen => "mode_not_seen",
            FixRejected::ModeNoFix => "mode_no_fix",
            FixRejected::MissingPosition => "missing_position",
            FixRejected::MissingHorizontalError => "missing_horizontal_error",
            FixRejected::HorizontalErrorNaN => "horizontal_error_nan",
            FixRejected::NonFinitePosition => "non_finite_position",
        }
    }
}

impl Fix {
    /// Validate a raw report into a fix.
    ///
    /// Requires a fix status, a 2D/3D mode, latitude/longitude and both
    /// horizontal error components. Speed is only carried when its error
    /// estimate is present too.
    pub fn validate(raw: &RawFix) -> Result<Fix, FixRejected> {
        match raw.status {
            None => return Err(FixRejected::MissingStatus),
            Some(FixStatus::NoFix) => return Err(FixRejected::NoFix),
            Some(FixStatus::Fix) | Some(FixStatus::DgpsFix) => {}
        }

        match raw.mode {
            None => return Err(FixRejected::MissingMode),
            Some(FixMode::NotSeen) => return Err(FixRejected::ModeNotSeen),
            Some(FixMode::NoFix) => return Err(FixRejected::ModeNoFix),
            Some(FixMode::TwoD) | Some(FixMode::ThreeD) => {}
        }

        let (Some(latitude), Some(longitude)) = (raw.latitude, raw.longitude) else {
            return Err(FixRejected::MissingPosition);
        };
        let (Some(epx), Some(epy)) = (raw.epx, raw.epy) else {
            return Err(FixRejected::MissingHorizontalError);
        };
        let eph = geo::rms(epx, epy).ok_or(FixRejected::HorizontalErrorNaN)?;

        if !geo::is_finite(latitude) || !geo::is_finite(longitude) {
            return Err(FixRejected::NonFinitePosition);
        }

        let speed = match (raw.speed, raw.eps) {
            (Some(speed), Some(eps)) => Some(SpeedEstimate { speed, eps }),
            _ => None,
        };

        Ok(Fix {
            valid: true,
            latitude,
            longitude,
            eph,
            speed,
            track: raw.track,
            satellites_used: raw.satellites_used,
        })
    }

    /// Validate a raw report, degrading any failure to the invalid fix
    pub fn from_raw(raw: &RawFix) -> Fix {
        Self::validate(raw).unwrap_or_default()
    }

    /// Display view with nulls for missing or non-finite data
    pub fn report(&self) -> FixReport {
        let position_ok = geo::is_finite(self.latitude) && geo::is_finite(self.longitude);
        FixReport {
            latitude: position_ok.then(|| round3(self.latitude)),
            longitude: position_ok.then(|| round3(self.longitude)),
            eph: position_ok.then(|| round3(self.eph)),
            speed: self.speed.map(|s| round3(s.speed)),
            eps: self.speed.map(|s| round3(s.eps)),
            track: self.track.map(round3),
            satellites_used: self.satellites_used,
        }
    }
}

fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

/// Serializable rendering of a [`Fix`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FixReport {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub eph: Option<f64>,
    pub speed: Option<f64>,
    pub eps: Option<f64>,
    pub track: Option<f64>,
    pub satellites_used: u32,
}

impl FixReport {
    pub fn to_json_pretty(&self) -> String {
        // Only f64/u32/Option fields: serialization cannot fail
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Tri-state relationship between a position and a geofence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Proximity {
    #[default]
    Unknown,
    Far,
    Near,
}

impl Proximity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Proximity::Unknown => "unknown",
            Proximity::Far => "far",
            Proximity::Near => "near",
        }
    }
}

/// Event produced by a watch state transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEvent {
    None,
    Arrive,
    Depart,
}

impl WatchEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            WatchEvent::None => "NONE",
            WatchEvent::Arrive => "ARRIVE",
            WatchEvent::Depart => "DEPART",
        }
    }
}

impl std::fmt::Display for WatchEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
