//! Domain models - fixes, geofence math and watches
//!
//! This module contains the pure, lock-free parts of the system:
//! - `types` - `Fix`, `RawFix`, `Proximity`, `WatchEvent` and fix rendering
//! - `geo` - great-circle distance and tri-state classification
//! - `watch` - per-geofence arrival/departure state machine

pub mod geo;
pub mod types;
pub mod watch;

// Re-export commonly used types at module level
pub use geo::{DistanceBackend, DistanceStrategy};
pub use types::{Fix, FixReport, Proximity, RawFix, WatchEvent};
pub use watch::{Watch, WatchAlarm, WatchSink};
