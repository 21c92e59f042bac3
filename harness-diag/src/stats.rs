//! Statistics engine
//!
//! Per derived metric: a time-bounded sliding window, an EWMA and an endpoint
//! trend slope. All times are in seconds on the frame source's clock.

use crate::config::{MetricConfig, StatsConfig};
use crate::live_values::LiveValueStore;
use std::collections::{HashMap, VecDeque};

/// One derived value at one instant
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricSample {
    /// Seconds on the source clock
    pub timestamp: f64,
    pub value: f64,
}

/// Samples covering the last `span` seconds
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    span: f64,
    samples: VecDeque<MetricSample>,
}

impl SlidingWindow {
    pub fn new(span_seconds: f64) -> Self {
        Self {
            span: span_seconds,
            samples: VecDeque::new(),
        }
    }

    /// Append a sample and evict everything older than `sample.timestamp - span`
    pub fn push(&mut self, sample: MetricSample) {
        if let Some(last) = self.samples.back() {
            if sample.timestamp < last.timestamp {
                log::debug!(
                    "Source clock went backwards ({:.3}s -> {:.3}s), restarting window",
                    last.timestamp,
                    sample.timestamp
                );
                self.samples.clear();
            }
        }

        self.samples.push_back(sample);

        let cutoff = sample.timestamp - self.span;
        while let Some(oldest) = self.samples.front() {
            if oldest.timestamp < cutoff {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Endpoint slope `(v_last - v_first) / (t_last - t_first)`
    ///
    /// `None` with fewer than two samples or zero elapsed time.
    pub fn trend(&self) -> Option<f64> {
        if self.samples.len() < 2 {
            return None;
        }
        let first = self.samples.front()?;
        let last = self.samples.back()?;
        let dt = last.timestamp - first.timestamp;
        if dt > 0.0 {
            Some((last.value - first.value) / dt)
        } else {
            None
        }
    }

    pub fn span(&self) -> f64 {
        self.span
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn first(&self) -> Option<&MetricSample> {
        self.samples.front()
    }

    pub fn last(&self) -> Option<&MetricSample> {
        self.samples.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MetricSample> {
        self.samples.iter()
    }
}

/// Exponentially weighted moving average
/// New value weighted by α, history by (1-α)
#[derive(Debug, Clone)]
pub struct Ewma {
    alpha: f64,
    value: Option<f64>,
}

impl Ewma {
    pub fn new(alpha: f64) -> Self {
        Self { alpha, value: None }
    }

    /// Fold in a sample; the first sample initializes the average
    pub fn update(&mut self, sample: f64) -> f64 {
        let next = match self.value {
            None => sample,
            // Same as α·new + (1-α)·current, but exact when new == current
            Some(current) => current + self.alpha * (sample - current),
        };
        self.value = Some(next);
        next
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }
}

/// Rolling state of one derived metric
#[derive(Debug, Clone)]
pub struct MetricState {
    definition: MetricConfig,
    window: SlidingWindow,
    ewma: Ewma,
    latest: Option<MetricSample>,
}

impl MetricState {
    fn new(definition: MetricConfig, config: &StatsConfig) -> Self {
        Self {
            definition,
            window: SlidingWindow::new(config.window_seconds),
            ewma: Ewma::new(config.ewma_alpha),
            latest: None,
        }
    }

    /// Compute the metric from live values, or `None` while an input is missing
    fn compute(&self, live: &LiveValueStore) -> Option<f64> {
        let [a, b] = &self.definition.inputs;
        Some(self.definition.kind.apply(live.value(a)?, live.value(b)?))
    }

    fn record(&mut self, sample: MetricSample) {
        self.window.push(sample);
        self.ewma.update(sample.value);
        self.latest = Some(sample);
    }

    pub fn definition(&self) -> &MetricConfig {
        &self.definition
    }

    pub fn window(&self) -> &SlidingWindow {
        &self.window
    }

    /// Most recent derived value
    pub fn value(&self) -> Option<f64> {
        self.latest.map(|s| s.value)
    }

    pub fn ewma(&self) -> Option<f64> {
        self.ewma.value()
    }

    pub fn trend(&self) -> Option<f64> {
        self.window.trend()
    }

    pub fn snapshot(&self) -> MetricSnapshot {
        MetricSnapshot {
            value: self.value(),
            ewma: self.ewma(),
            trend: self.trend(),
            window_len: self.window.len(),
        }
    }
}

/// Point-in-time view of one metric
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricSnapshot {
    pub value: Option<f64>,
    pub ewma: Option<f64>,
    pub trend: Option<f64>,
    pub window_len: usize,
}

/// Owns the rolling state of every configured metric
#[derive(Debug, Clone)]
pub struct StatisticsEngine {
    metrics: Vec<MetricState>,
    index: HashMap<String, usize>,
}

impl StatisticsEngine {
    pub fn new(config: &StatsConfig, metrics: &[MetricConfig]) -> Self {
        let states: Vec<MetricState> = metrics
            .iter()
            .cloned()
            .map(|definition| MetricState::new(definition, config))
            .collect();
        let index = states
            .iter()
            .enumerate()
            .map(|(idx, state)| (state.definition.name.clone(), idx))
            .collect();
        Self {
            metrics: states,
            index,
        }
    }

    /// Update every metric whose inputs are all present
    ///
    /// Returns the number of metrics that received a sample.
    pub fn update(&mut self, live: &LiveValueStore, timestamp_ms: u64) -> usize {
        let timestamp = timestamp_ms as f64 / 1000.0;
        let mut updated = 0;
        for state in &mut self.metrics {
            if let Some(value) = state.compute(live) {
                state.record(MetricSample { timestamp, value });
                updated += 1;
            }
        }
        updated
    }

    pub fn metric(&self, name: &str) -> Option<&MetricState> {
        self.index.get(name).map(|&idx| &self.metrics[idx])
    }

    pub fn snapshot(&self, name: &str) -> Option<MetricSnapshot> {
        self.metric(name).map(MetricState::snapshot)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MetricState> {
        self.metrics.iter()
    }
}
