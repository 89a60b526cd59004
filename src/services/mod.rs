//! Services - geofence state and the polling pipeline
//!
//! - `registry` - Watch registry and last-fix slot behind one lock
//! - `poller` - Poll-and-dispatch loop with shutdown at safe points
//! - `coordinator` - Lifecycle, watch management and caller hooks

pub mod coordinator;
pub mod poller;
pub mod registry;

// Re-export commonly used types
pub use coordinator::{GpsCoordinator, GpsCoordinatorBuilder, GpsHandler, NoopHandler};
pub use poller::{PollTiming, Poller};
pub use registry::{DispatchSummary, WatchRegistry};
