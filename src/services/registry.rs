//! Watch registry
//!
//! Maps watch names to watches and holds the last dispatched fix. One mutex
//! guards both, so add/remove and dispatch never overlap and a watch added
//! before a dispatch returns sees that fix or a later one.

use crate::domain::geo::{DistanceStrategy, SphericalCosines};
use crate::domain::types::{Fix, WatchEvent};
use crate::domain::watch::{Watch, WatchSink};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Outcome of applying one fix to every watch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub watches: usize,
    pub arrivals: u64,
    pub departures: u64,
}

#[derive(Default)]
struct RegistryInner {
    watches: BTreeMap<String, Watch>,
    last_fix: Fix,
}

pub struct WatchRegistry {
    inner: Mutex<RegistryInner>,
    strategy: Arc<dyn DistanceStrategy>,
}

impl Default for WatchRegistry {
    fn default() -> Self {
        Self::new(Arc::new(SphericalCosines))
    }
}

impl WatchRegistry {
    pub fn new(strategy: Arc<dyn DistanceStrategy>) -> Self {
        Self { inner: Mutex::new(RegistryInner::default()), strategy }
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Insert or replace a watch. A replaced watch loses its learned state.
    ///
    /// Returns true if an existing watch was replaced.
    pub fn add(&self, name: &str, latitude: f64, longitude: f64, radius_m: f64, sink: WatchSink) -> bool {
        let watch = Watch::new(latitude, longitude, radius_m, sink);
        self.inner.lock().watches.insert(name.to_string(), watch).is_some()
    }

    /// Remove a watch; returns false if no watch had that name
    pub fn remove(&self, name: &str) -> bool {
        self.inner.lock().watches.remove(name).is_some()
    }

    /// Record `fix` as the latest and apply it to every watch.
    ///
    /// Sinks run under the registry lock.
    pub fn dispatch(&self, fix: &Fix) -> DispatchSummary {
        let mut inner = self.inner.lock();
        inner.last_fix = *fix;

        let mut summary = DispatchSummary { watches: inner.watches.len(), ..Default::default() };
        for (name, watch) in inner.watches.iter_mut() {
            match watch.handle_fix(name, fix, self.strategy.as_ref()) {
                WatchEvent::Arrive => summary.arrivals += 1,
                WatchEvent::Depart => summary.departures += 1,
                WatchEvent::None => {}
            }
        }

        debug!(
            watches = %summary.watches,
            arrivals = %summary.arrivals,
            departures = %summary.departures,
            "fix_applied"
        );
        summary
    }

    /// Copy of the most recently dispatched fix (zero fix if none yet)
    pub fn last_fix(&self) -> Fix {
        self.inner.lock().last_fix
    }

    pub fn len(&self) -> usize {
        self.inner.lock().watches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().watches.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.lock().watches.contains_key(name)
    }

    /// Watch names in dispatch order
    pub fn names(&self) -> Vec<String> {
        self.inner.lock().watches.keys().cloned().collect()
    }
}
