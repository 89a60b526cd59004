//! Single geofence watch and its arrival/departure state machine
//!
//! A watch remembers the last *definite* classification (`Far` or `Near`).
//! An `Unknown` computation never changes the stored state and never fires
//! an event, so a position wandering through the uncertainty band around
//! the boundary cannot make the watch flap.

use crate::domain::geo::{self, DistanceStrategy};
use crate::domain::types::{Fix, Proximity, WatchEvent};
use std::sync::Arc;

/// Payload delivered to a watch sink
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WatchAlarm<'a> {
    pub name: &'a str,
    /// Unsigned distance from the fix to the watch center (meters)
    pub distance_m: f64,
    /// Always `Arrive` or `Depart`
    pub event: WatchEvent,
}

/// Event sink for a watch.
///
/// Invoked synchronously while the registry lock is held: it must not block
/// and must not call back into the registry. Any per-watch user data is
/// whatever the closure captures.
pub type WatchSink = Arc<dyn Fn(&WatchAlarm<'_>) + Send + Sync>;

pub struct Watch {
    latitude: f64,
    longitude: f64,
    radius_m: f64,
    sink: WatchSink,
    state: Proximity,
}

impl std::fmt::Debug for Watch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watch")
            .field("latitude", &self.latitude)
            .field("longitude", &self.longitude)
            .field("radius_m", &self.radius_m)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Watch {
    pub fn new(latitude: f64, longitude: f64, radius_m: f64, sink: WatchSink) -> Self {
        Self { latitude, longitude, radius_m, sink, state: Proximity::Unknown }
    }

    pub fn state(&self) -> Proximity {
        self.state
    }

    /// Transition table: (stored, computed) -> (event, next stored)
    pub fn transition(stored: Proximity, computed: Proximity) -> (WatchEvent, Proximity) {
        match (stored, computed) {
            (_, Proximity::Unknown) => (WatchEvent::None, stored),
            (Proximity::Near, Proximity::Near) => (WatchEvent::None, Proximity::Near),
            (_, Proximity::Near) => (WatchEvent::Arrive, Proximity::Near),
            (Proximity::Near, Proximity::Far) => (WatchEvent::Depart, Proximity::Far),
            (_, Proximity::Far) => (WatchEvent::None, Proximity::Far),
        }
    }

    /// Apply a fix to this watch, invoking the sink if an event fires
    pub fn handle_fix(&mut self, name: &str, fix: &Fix, strategy: &dyn DistanceStrategy) -> WatchEvent {
        let (distance_m, computed) = geo::distance_and_classify_with(
            strategy,
            fix,
            self.latitude,
            self.longitude,
            self.radius_m,
        );

        let (event, next) = Self::transition(self.state, computed);

        tracing::trace!(
            watch = %name,
            distance_m = %distance_m,
            stored = %self.state.as_str(),
            computed = %computed.as_str(),
            "watch_classified"
        );

        if event != WatchEvent::None {
            (self.sink)(&WatchAlarm { name, distance_m, event });
        }
        self.state = next;
        event
    }
}
