// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! fab-telemetry
#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Tracing init
// ---------------------------------------------------------------------------

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable text.
    Text,
    /// One JSON object per line.
    Json,
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise `level` applies to the `fab`
/// targets. Idempotent: a second call is a no-op so tests can race.
pub fn init_tracing(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("fab={level}")));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    // Already initialised (tests, embedding hosts): keep the existing one.
    drop(result);
}

// ---------------------------------------------------------------------------
// Metrics aggregation
// ---------------------------------------------------------------------------

/// One observed latency sample, labelled by intent type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencySample {
    /// Intent type the sample belongs to.
    pub intent_type: String,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

/// Aggregated latency statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    /// Number of samples recorded.
    pub count: usize,
    /// Mean duration in milliseconds.
    pub mean_ms: f64,
    /// Median (p50) duration in milliseconds.
    pub p50_ms: f64,
    /// 99th-percentile duration in milliseconds.
    pub p99_ms: f64,
    /// Per-intent-type sample counts (deterministic ordering).
    pub intent_counts: BTreeMap<String, usize>,
}

/// Compute a percentile value from a **sorted** slice.
fn percentile(sorted: &[u64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0] as f64;
    }
    let rank = pct / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let frac = rank - lower as f64;
    sorted[lower] as f64 * (1.0 - frac) + sorted[upper] as f64 * frac
}

/// Thread-safe collector for latency samples.
#[derive(Debug, Clone, Default)]
pub struct LatencyCollector {
    inner: Arc<Mutex<Vec<LatencySample>>>,
}

impl LatencyCollector {
    /// Create an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one sample.
    pub fn record(&self, intent_type: impl Into<String>, duration_ms: u64) {
        self.inner
            .lock()
            .expect("latency lock poisoned")
            .push(LatencySample {
                intent_type: intent_type.into(),
                duration_ms,
            });
    }

    /// Number of samples recorded so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().expect("latency lock poisoned").len()
    }

    /// Whether the collector is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Aggregate all recorded samples.
    #[must_use]
    pub fn summary(&self) -> LatencySummary {
        let samples = self.inner.lock().expect("latency lock poisoned");
        if samples.is_empty() {
            return LatencySummary::default();
        }

        let mut durations: Vec<u64> = samples.iter().map(|s| s.duration_ms).collect();
        durations.sort_unstable();
        let total: u64 = durations.iter().sum();

        let mut intent_counts = BTreeMap::new();
        for sample in samples.iter() {
            *intent_counts.entry(sample.intent_type.clone()).or_insert(0) += 1;
        }

        LatencySummary {
            count: durations.len(),
            mean_ms: total as f64 / durations.len() as f64,
            p50_ms: percentile(&durations, 50.0),
            p99_ms: percentile(&durations, 99.0),
            intent_counts,
        }
    }
}
