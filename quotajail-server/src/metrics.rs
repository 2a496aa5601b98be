//! Decision metrics in Prometheus text format
//!
//! A [`Metrics`] registry is built once per admission service and passed in,
//! so several services in one process (as in tests) never share counters.
//! Recording is lock-free once an action key has been seen; the first
//! decision for a new action key takes a short write lock.

use crate::types::Status;
use parking_lot::RwLock;
use ahash::AHashMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Upper bounds of the latency histogram, in seconds
pub const LATENCY_BUCKETS: [f64; 11] = [
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

const DEFAULT_MAX_ACTION_KEYS: usize = 1_000;
const MAX_ACTION_KEYS_LIMIT: usize = 100_000;

/// Label used once the action key limit is reached
pub const OVERFLOW_ACTION_KEY: &str = "__other__";

/// Per-action counters, indexed like [`Status::ALL`]
type StatusCounters = [AtomicU64; 4];

/// Metrics collected by one admission service
pub struct Metrics {
    start_time: Instant,
    max_action_keys: usize,

    /// `requests_total{status, action_key}`
    requests: RwLock<AHashMap<String, StatusCounters>>,

    /// `decision_duration_seconds`, one slot per bucket plus +Inf
    latency_buckets: [AtomicU64; LATENCY_BUCKETS.len() + 1],
    latency_sum_micros: AtomicU64,
    latency_count: AtomicU64,
}

/// Builder for [`Metrics`]
pub struct MetricsBuilder {
    max_action_keys: usize,
}

impl MetricsBuilder {
    /// Cap the number of distinct `action_key` label values
    ///
    /// Further action keys are counted under [`OVERFLOW_ACTION_KEY`]. The cap
    /// itself is clamped to 100,000.
    pub fn max_action_keys(mut self, max: usize) -> Self {
        self.max_action_keys = max.clamp(1, MAX_ACTION_KEYS_LIMIT);
        self
    }

    pub fn build(self) -> Metrics {
        Metrics {
            start_time: Instant::now(),
            max_action_keys: self.max_action_keys,
            requests: RwLock::new(AHashMap::new()),
            latency_buckets: Default::default(),
            latency_sum_micros: AtomicU64::new(0),
            latency_count: AtomicU64::new(0),
        }
    }
}

impl Metrics {
    /// Create a new metrics instance
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> MetricsBuilder {
        MetricsBuilder {
            max_action_keys: DEFAULT_MAX_ACTION_KEYS,
        }
    }

    /// Record one decision and how long it took
    pub fn record(&self, status: Status, action_key: &str, latency: Duration) {
        self.count_request(status, action_key);
        self.observe_latency(latency);
    }

    fn count_request(&self, status: Status, action_key: &str) {
        let slot = status_index(status);

        {
            let requests = self.requests.read();
            if let Some(counters) = requests.get(action_key) {
                counters[slot].fetch_add(1, Ordering::Relaxed);
                return;
            }
        }

        let mut requests = self.requests.write();
        let label = if requests.contains_key(action_key) || requests.len() < self.max_action_keys
        {
            action_key
        } else {
            OVERFLOW_ACTION_KEY
        };
        requests.entry(label.to_string()).or_default()[slot].fetch_add(1, Ordering::Relaxed);
    }

    fn observe_latency(&self, latency: Duration) {
        let seconds = latency.as_secs_f64();
        let slot = LATENCY_BUCKETS
            .iter()
            .position(|bound| seconds <= *bound)
            .unwrap_or(LATENCY_BUCKETS.len());

        self.latency_buckets[slot].fetch_add(1, Ordering::Relaxed);
        self.latency_sum_micros
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
        self.latency_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Value of `requests_total` for one label pair
    pub fn requests(&self, status: Status, action_key: &str) -> u64 {
        self.requests
            .read()
            .get(action_key)
            .map(|counters| counters[status_index(status)].load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Sum of `requests_total` over all action keys for one status
    pub fn requests_with_status(&self, status: Status) -> u64 {
        let slot = status_index(status);
        self.requests
            .read()
            .values()
            .map(|counters| counters[slot].load(Ordering::Relaxed))
            .sum()
    }

    /// Number of latency observations
    pub fn decisions(&self) -> u64 {
        self.latency_count.load(Ordering::Relaxed)
    }

    /// Get server uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        let mut output = String::with_capacity(2048);

        // Writing into a String cannot fail
        let _ = self.write_prometheus(&mut output);
        output
    }

    fn write_prometheus(&self, output: &mut String) -> std::fmt::Result {
        writeln!(output, "# HELP uptime_seconds Time since server start in seconds")?;
        writeln!(output, "# TYPE uptime_seconds gauge")?;
        writeln!(output, "uptime_seconds {}\n", self.uptime_seconds())?;

        writeln!(
            output,
            "# HELP requests_total Total number of admission decisions by status and action"
        )?;
        writeln!(output, "# TYPE requests_total counter")?;
        {
            let requests = self.requests.read();
            let mut actions: Vec<_> = requests.keys().collect();
            actions.sort();

            for action in actions {
                let counters = &requests[action];
                for status in Status::ALL {
                    writeln!(
                        output,
                        "requests_total{{status=\"{}\",action_key=\"{}\"}} {}",
                        status,
                        escape_label(action),
                        counters[status_index(status)].load(Ordering::Relaxed)
                    )?;
                }
            }
        }
        writeln!(output)?;

        writeln!(
            output,
            "# HELP decision_duration_seconds Time taken to reach an admission decision"
        )?;
        writeln!(output, "# TYPE decision_duration_seconds histogram")?;
        let mut cumulative = 0;
        for (bound, bucket) in LATENCY_BUCKETS.iter().zip(&self.latency_buckets) {
            cumulative += bucket.load(Ordering::Relaxed);
            writeln!(
                output,
                "decision_duration_seconds_bucket{{le=\"{bound}\"}} {cumulative}"
            )?;
        }
        cumulative += self.latency_buckets[LATENCY_BUCKETS.len()].load(Ordering::Relaxed);
        writeln!(
            output,
            "decision_duration_seconds_bucket{{le=\"+Inf\"}} {cumulative}"
        )?;

        let sum_seconds = self.latency_sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0;
        writeln!(output, "decision_duration_seconds_sum {sum_seconds:.6}")?;
        writeln!(
            output,
            "decision_duration_seconds_count {}",
            self.latency_count.load(Ordering::Relaxed)
        )?;

        Ok(())
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn status_index(status: Status) -> usize {
    match status {
        Status::Admitted => 0,
        Status::Denied => 1,
        Status::Banned => 2,
        Status::Error => 3,
    }
}

fn escape_label(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            c => escaped.push(c),
        }
    }
    escaped
}
