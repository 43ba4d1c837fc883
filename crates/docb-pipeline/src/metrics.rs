//! Fire-and-forget metrics.
//!
//! [`Metrics`] is the seam; [`NoopMetrics`] discards everything and
//! [`MetricsRegistry`] keeps values in memory for inspection. Registries are
//! constructed explicitly and handed to whatever records into them.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;

/// Sink for counters, histograms, and gauges. Recording never fails.
pub trait Metrics: Send + Sync {
    fn increment_counter(&self, name: &str);
    fn record_histogram(&self, name: &str, value: f64);
    fn set_gauge(&self, name: &str, value: f64);
}

/// Discards every measurement.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopMetrics;

impl Metrics for NoopMetrics {
    fn increment_counter(&self, _name: &str) {}
    fn record_histogram(&self, _name: &str, _value: f64) {}
    fn set_gauge(&self, _name: &str, _value: f64) {}
}

/// Point-in-time copy of a [`MetricsRegistry`].
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub counters: BTreeMap<String, u64>,
    pub histograms: BTreeMap<String, Vec<f64>>,
    pub gauges: BTreeMap<String, f64>,
}

/// In-memory metrics store.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    inner: RwLock<MetricsSnapshot>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.read().counters.get(name).copied().unwrap_or(0)
    }

    pub fn histogram(&self, name: &str) -> Vec<f64> {
        self.read().histograms.get(name).cloned().unwrap_or_default()
    }

    pub fn gauge(&self, name: &str) -> Option<f64> {
        self.read().gauges.get(name).copied()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.read().clone()
    }

    pub fn reset(&self) {
        *self.write() = MetricsSnapshot::default();
    }

    // A poisoned lock only means a recording thread panicked mid-update;
    // the maps themselves are still usable.
    fn read(&self) -> RwLockReadGuard<'_, MetricsSnapshot> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, MetricsSnapshot> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Metrics for MetricsRegistry {
    fn increment_counter(&self, name: &str) {
        *self.write().counters.entry(name.to_string()).or_insert(0) += 1;
    }

    fn record_histogram(&self, name: &str, value: f64) {
        self.write()
            .histograms
            .entry(name.to_string())
            .or_default()
            .push(value);
    }

    fn set_gauge(&self, name: &str, value: f64) {
        self.write().gauges.insert(name.to_string(), value);
    }
}
