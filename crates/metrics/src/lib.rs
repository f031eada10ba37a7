#![deny(
    trivial_numeric_casts,
    missing_docs,
    unsafe_code,
    unstable_features,
    unused_import_braces,
    unused_qualifications,
    unused_extern_crates,
    unused_results
)]
#![warn(rust_2021_compatibility, unreachable_pub)]

//! Process-wide metric registry.
//!
//! Three metric shapes are supported: [`Counter`] (a fixed set of named
//! monotonic values), [`Gauge`] (named floats set at will) and
//! [`DutyCycle`] (the fraction of time a boolean was on since the last
//! flush). Metrics are created through the [`Registry`], which keeps a
//! handle to each of them so the host can snapshot and flush them all.
//!
//! Counters are cumulative: a flush reads them without resetting. Only
//! duty cycles reset on flush, because their ratio is defined per flush
//! window.

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

/// Tags attached to a metric (e.g. `pipeline=<id>`).
pub type Tags = BTreeMap<String, String>;

/// A snapshot of one metric, as handed to the metrics flusher.
#[derive(Clone, Debug)]
pub struct MetricSnapshot {
    /// The name of the metric.
    pub name: String,
    /// The tags of the metric.
    pub tags: Tags,
    /// The current values of the metric, keyed by value name.
    pub values: BTreeMap<String, f64>,
}

/// A set of named monotonic counters created with a fixed key set.
pub struct Counter {
    name: String,
    tags: Tags,
    values: BTreeMap<String, AtomicU64>,
}

impl Counter {
    fn new(name: &str, tags: Tags, keys: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            tags,
            values: keys
                .iter()
                .map(|key| (key.to_string(), AtomicU64::new(0)))
                .collect(),
        }
    }

    /// Returns the name of the counter.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the tags of the counter.
    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    /// Adds `delta` to the value named `key`. Unknown keys are ignored
    /// with a warning: the key set is fixed at creation.
    pub fn add(&self, key: &str, delta: u64) {
        match self.values.get(key) {
            Some(value) => {
                let _ = value.fetch_add(delta, Ordering::Relaxed);
            }
            None => tracing::warn!(counter = %self.name, %key, "unknown counter key"),
        }
    }

    /// Returns the current value named `key`, or 0 for an unknown key.
    pub fn get(&self, key: &str) -> u64 {
        self.values
            .get(key)
            .map(|value| value.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Returns the current values of the counter.
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.values
            .iter()
            .map(|(key, value)| (key.clone(), value.load(Ordering::Relaxed)))
            .collect()
    }

    fn flush(&self) -> MetricSnapshot {
        MetricSnapshot {
            name: self.name.clone(),
            tags: self.tags.clone(),
            values: self
                .values
                .iter()
                .map(|(key, value)| (key.clone(), value.load(Ordering::Relaxed) as f64))
                .collect(),
        }
    }
}

/// A set of named float values set at will.
pub struct Gauge {
    name: String,
    tags: Tags,
    values: Mutex<BTreeMap<String, f64>>,
}

impl Gauge {
    fn new(name: &str, tags: Tags, keys: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            tags,
            values: Mutex::new(keys.iter().map(|key| (key.to_string(), 0.0)).collect()),
        }
    }

    /// Returns the name of the gauge.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sets the value named `key`.
    pub fn set(&self, key: &str, value: f64) {
        let _ = self
            .values
            .lock()
            .expect("gauge values lock failed")
            .insert(key.to_string(), value);
    }

    /// Returns the value named `key`, or 0.0 for an unknown key.
    pub fn get(&self, key: &str) -> f64 {
        self.values
            .lock()
            .expect("gauge values lock failed")
            .get(key)
            .copied()
            .unwrap_or(0.0)
    }

    /// Returns the current values of the gauge.
    pub fn snapshot(&self) -> BTreeMap<String, f64> {
        self.values.lock().expect("gauge values lock failed").clone()
    }

    fn flush(&self) -> MetricSnapshot {
        MetricSnapshot {
            name: self.name.clone(),
            tags: self.tags.clone(),
            values: self.snapshot(),
        }
    }
}

struct DutyState {
    value: bool,
    since: Instant,
    on_time: Duration,
    off_time: Duration,
}

/// Tracks the fraction of time a named boolean was on.
///
/// The ratio is accumulated between flushes; each flush resets the
/// accumulation window.
pub struct DutyCycle {
    name: String,
    tags: Tags,
    key: String,
    state: Mutex<DutyState>,
}

impl DutyCycle {
    fn new(name: &str, tags: Tags, key: &str, initial: bool) -> Self {
        Self {
            name: name.to_string(),
            tags,
            key: key.to_string(),
            state: Mutex::new(DutyState {
                value: initial,
                since: Instant::now(),
                on_time: Duration::ZERO,
                off_time: Duration::ZERO,
            }),
        }
    }

    /// Returns the name of the duty cycle.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Records a transition of the tracked boolean.
    pub fn set(&self, value: bool) {
        let mut state = self.state.lock().expect("duty cycle state lock failed");
        Self::accumulate(&mut state);
        state.value = value;
    }

    /// Returns the on-ratio of the current window without resetting it.
    pub fn ratio(&self) -> f64 {
        let mut state = self.state.lock().expect("duty cycle state lock failed");
        Self::accumulate(&mut state);
        Self::window_ratio(&state)
    }

    fn accumulate(state: &mut DutyState) {
        let now = Instant::now();
        let elapsed = now - state.since;
        if state.value {
            state.on_time += elapsed;
        } else {
            state.off_time += elapsed;
        }
        state.since = now;
    }

    fn window_ratio(state: &DutyState) -> f64 {
        let total = state.on_time + state.off_time;
        if total.is_zero() {
            if state.value {
                1.0
            } else {
                0.0
            }
        } else {
            state.on_time.as_secs_f64() / total.as_secs_f64()
        }
    }

    fn flush(&self) -> MetricSnapshot {
        let mut state = self.state.lock().expect("duty cycle state lock failed");
        Self::accumulate(&mut state);
        let ratio = Self::window_ratio(&state);
        state.on_time = Duration::ZERO;
        state.off_time = Duration::ZERO;
        MetricSnapshot {
            name: self.name.clone(),
            tags: self.tags.clone(),
            values: std::iter::once((self.key.clone(), ratio)).collect(),
        }
    }
}

enum Metric {
    Counter(Arc<Counter>),
    Gauge(Arc<Gauge>),
    DutyCycle(Arc<DutyCycle>),
}

impl Metric {
    fn flush(&self) -> MetricSnapshot {
        match self {
            Metric::Counter(counter) => counter.flush(),
            Metric::Gauge(gauge) => gauge.flush(),
            Metric::DutyCycle(duty_cycle) => duty_cycle.flush(),
        }
    }
}

/// The registry owning every metric of the process.
///
/// Cloning a `Registry` is cheap and every clone shares the same metric
/// table.
#[derive(Clone, Default)]
pub struct Registry {
    metrics: Arc<Mutex<Vec<Metric>>>,
}

impl Registry {
    /// Creates a new empty registry.
    pub fn new() -> Self {
        Default::default()
    }

    /// Creates a counter with a fixed set of value keys and registers it.
    pub fn create_counter(&self, name: &str, tags: Tags, keys: &[&str]) -> Arc<Counter> {
        let counter = Arc::new(Counter::new(name, tags, keys));
        self.register(Metric::Counter(counter.clone()));
        counter
    }

    /// Creates a gauge with a fixed set of value keys and registers it.
    pub fn create_gauge(&self, name: &str, tags: Tags, keys: &[&str]) -> Arc<Gauge> {
        let gauge = Arc::new(Gauge::new(name, tags, keys));
        self.register(Metric::Gauge(gauge.clone()));
        gauge
    }

    /// Creates a duty cycle tracking one named boolean and registers it.
    pub fn create_duty_cycle(&self, name: &str, tags: Tags, key: &str, initial: bool) -> Arc<DutyCycle> {
        let duty_cycle = Arc::new(DutyCycle::new(name, tags, key, initial));
        self.register(Metric::DutyCycle(duty_cycle.clone()));
        duty_cycle
    }

    /// Snapshots every registered metric, resetting duty cycle windows.
    pub fn flush(&self) -> Vec<MetricSnapshot> {
        self.metrics
            .lock()
            .expect("metric registry lock failed")
            .iter()
            .map(Metric::flush)
            .collect()
    }

    /// Returns the number of registered metrics.
    pub fn len(&self) -> usize {
        self.metrics.lock().expect("metric registry lock failed").len()
    }

    /// Returns true when no metric is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn register(&self, metric: Metric) {
        self.metrics
            .lock()
            .expect("metric registry lock failed")
            .push(metric);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_counter_add_and_snapshot() {
        let registry = Registry::new();
        let counter = registry.create_counter("pump", Tags::new(), &["event.in", "event.out"]);

        counter.add("event.in", 3);
        counter.add("event.out", 1);
        counter.add("event.out", 1);
        counter.add("no-such-key", 5);

        assert_eq!(counter.get("event.in"), 3);
        assert_eq!(counter.get("event.out"), 2);
        assert_eq!(counter.get("no-such-key"), 0);

        let snapshot = counter.snapshot();
        assert_eq!(snapshot.get("event.in"), Some(&3));
    }

    #[test]
    fn test_counter_is_cumulative_across_flushes() {
        let registry = Registry::new();
        let counter = registry.create_counter("pump", Tags::new(), &["event.in"]);

        counter.add("event.in", 2);
        let _ = registry.flush();
        counter.add("event.in", 1);

        let snapshots = registry.flush();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].values.get("event.in"), Some(&3.0));
    }

    #[test]
    fn test_gauge_set_get() {
        let registry = Registry::new();
        let gauge = registry.create_gauge("pump.gauge", Tags::new(), &["error.ratio"]);

        assert_eq!(gauge.get("error.ratio"), 0.0);
        gauge.set("error.ratio", 0.25);
        assert_eq!(gauge.get("error.ratio"), 0.25);
    }

    #[test]
    fn test_duty_cycle_ratio_bounds() {
        let registry = Registry::new();
        let duty_cycle = registry.create_duty_cycle("pump.dutycycle", Tags::new(), "ready", true);

        std::thread::sleep(Duration::from_millis(5));
        let ratio = duty_cycle.ratio();
        assert!(ratio > 0.99, "ratio was {}", ratio);

        duty_cycle.set(false);
        std::thread::sleep(Duration::from_millis(5));
        let ratio = duty_cycle.ratio();
        assert!(ratio < 1.0);

        // Flush resets the window: an all-off window follows.
        let _ = registry.flush();
        std::thread::sleep(Duration::from_millis(5));
        assert!(duty_cycle.ratio() < 0.01);
    }
}
