//! Counters and gauges reported by agents and stage drivers.
//!
//! Names are explicit, dotted strings (`stage.<group>.<index>.envelopes_out`).
//! [`InMemoryMetrics`] keeps them in a registry so listing never scans keys.

use std::collections::BTreeMap;

use conduit_types::StageKey;
use dashmap::DashMap;

/// Destination for runtime metrics. Recording never fails.
pub trait MetricsSink: Send + Sync {
    fn increment(&self, name: &str, delta: u64);
    fn set_gauge(&self, name: &str, value: i64);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn increment(&self, _name: &str, _delta: u64) {}
    fn set_gauge(&self, _name: &str, _value: i64) {}
}

/// Process-local metric registry.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    counters: DashMap<String, u64>,
    gauges: DashMap<String, i64>,
}

impl InMemoryMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current counter value; zero if never incremented.
    #[must_use]
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).map_or(0, |v| *v)
    }

    #[must_use]
    pub fn gauge(&self, name: &str) -> Option<i64> {
        self.gauges.get(name).map(|v| *v)
    }

    /// Remove a counter or gauge. Returns whether anything was removed.
    pub fn reset(&self, name: &str) -> bool {
        let counter = self.counters.remove(name).is_some();
        let gauge = self.gauges.remove(name).is_some();
        counter || gauge
    }

    /// Every registered metric, sorted by name.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, i64> {
        let mut out: BTreeMap<String, i64> = self
            .gauges
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        for entry in &self.counters {
            let value = i64::try_from(*entry.value()).unwrap_or(i64::MAX);
            out.insert(entry.key().clone(), value);
        }
        out
    }
}

impl MetricsSink for InMemoryMetrics {
    fn increment(&self, name: &str, delta: u64) {
        if let Some(mut v) = self.counters.get_mut(name) {
            *v = v.saturating_add(delta);
            return;
        }
        let mut v = self.counters.entry(name.to_string()).or_insert(0);
        *v = v.saturating_add(delta);
    }

    fn set_gauge(&self, name: &str, value: i64) {
        self.gauges.insert(name.to_string(), value);
    }
}

/// `stage.<group>.<index>.<metric>`
#[must_use]
pub fn stage_metric(key: &StageKey, metric: &str) -> String {
    format!("stage.{}.{}.{metric}", key.group, key.index)
}
