//! Rule engine
//!
//! Two independent rule families run against the live values and the metric
//! statistics after every decoded frame:
//!
//! - **Threshold rules** compare the current value of two metrics against an
//!   alert threshold and localize the fault to A, B, or both (combined).
//! - **Drift rules** look at each metric's EWMA and trend and raise early
//!   warnings for sustained directional change.
//!
//! Both families are gated on the rule's reference signal sitting inside its
//! nominal band. A rule whose inputs are not available yet produces nothing.

use crate::config::{
    ClassificationCodes, DiagnosticsConfig, DriftRuleConfig, ReferenceBand, ThresholdRuleConfig,
};
use crate::live_values::LiveValueStore;
use crate::stats::{MetricState, StatisticsEngine};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventLevel {
    /// Hard threshold breach
    Alert,
    /// Statistical drift ahead of a breach
    #[serde(rename = "EARLY")]
    EarlyWarning,
}

impl EventLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventLevel::Alert => "ALERT",
            EventLevel::EarlyWarning => "EARLY",
        }
    }
}

impl fmt::Display for EventLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named value that contributed to an event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContributingValue {
    pub name: String,
    pub value: f64,
}

impl ContributingValue {
    fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// A fired rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub level: EventLevel,
    /// Classification code, e.g. "HARNESS_A"
    pub code: String,
    /// Name of the rule that fired
    pub rule: String,
    pub message: String,
    pub values: Vec<ContributingValue>,
    /// Source timestamp of the frame that triggered the rule (milliseconds)
    pub timestamp_ms: u64,
}

impl Event {
    /// Look up a contributing value by name
    pub fn value(&self, name: &str) -> Option<f64> {
        self.values.iter().find(|v| v.name == name).map(|v| v.value)
    }
}

/// Which side of a two-metric rule is at fault
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    A,
    B,
    Combined,
}

impl Classification {
    /// At most one outcome for any pair of flags
    pub fn from_flags(a: bool, b: bool) -> Option<Self> {
        match (a, b) {
            (true, false) => Some(Classification::A),
            (false, true) => Some(Classification::B),
            (true, true) => Some(Classification::Combined),
            (false, false) => None,
        }
    }

    fn code(self, codes: &ClassificationCodes) -> &str {
        match self {
            Classification::A => &codes.a,
            Classification::B => &codes.b,
            Classification::Combined => &codes.combined,
        }
    }
}

/// Evaluates the configured rules
#[derive(Debug, Clone, Default)]
pub struct RuleEngine {
    threshold_rules: Vec<ThresholdRuleConfig>,
    drift_rules: Vec<DriftRuleConfig>,
}

impl RuleEngine {
    pub fn new(config: &DiagnosticsConfig) -> Self {
        Self {
            threshold_rules: config.threshold_rules.clone(),
            drift_rules: config.drift_rules.clone(),
        }
    }

    /// Run every rule; all matching rules fire
    pub fn evaluate(
        &self,
        live: &LiveValueStore,
        stats: &StatisticsEngine,
        timestamp_ms: u64,
    ) -> Vec<Event> {
        let mut events = Vec::new();

        for rule in &self.threshold_rules {
            if let Some(event) = evaluate_threshold(rule, live, stats, timestamp_ms) {
                events.push(event);
            }
        }
        for rule in &self.drift_rules {
            events.extend(evaluate_drift(rule, live, stats, timestamp_ms));
        }

        events
    }

    pub fn rule_count(&self) -> usize {
        self.threshold_rules.len() + self.drift_rules.len()
    }
}

/// Reference value if present and inside its band
fn stable_reference(
    rule: &str,
    band: &ReferenceBand,
    live: &LiveValueStore,
) -> Option<f64> {
    let reference = live.value(&band.signal)?;
    if band.contains(reference) {
        Some(reference)
    } else {
        log::trace!(
            "Rule '{}' skipped: {}={:.2} outside {:.2}±{:.2}",
            rule,
            band.signal,
            reference,
            band.nominal,
            band.tolerance
        );
        None
    }
}

fn evaluate_threshold(
    rule: &ThresholdRuleConfig,
    live: &LiveValueStore,
    stats: &StatisticsEngine,
    timestamp_ms: u64,
) -> Option<Event> {
    let reference = stable_reference(&rule.name, &rule.reference, live)?;
    let metric_a = stats.metric(&rule.metric_a)?;
    let metric_b = stats.metric(&rule.metric_b)?;
    let (a, b) = (metric_a.value()?, metric_b.value()?);

    let classification = Classification::from_flags(a > rule.threshold, b > rule.threshold)?;
    let summary = match classification {
        Classification::A => format!("{} above {:.2}", rule.metric_a, rule.threshold),
        Classification::B => format!("{} above {:.2}", rule.metric_b, rule.threshold),
        Classification::Combined => format!(
            "{} and {} above {:.2}",
            rule.metric_a, rule.metric_b, rule.threshold
        ),
    };
    let message = format!(
        "{} ({}={:+.2}, {}={:+.2}, {}≈{:.1})",
        summary, rule.metric_a, a, rule.metric_b, b, rule.reference.signal, reference
    );

    let mut values = contributing_inputs(&rule.reference.signal, reference, live, [metric_a, metric_b]);
    values.push(ContributingValue::new(rule.metric_a.as_str(), a));
    values.push(ContributingValue::new(rule.metric_b.as_str(), b));

    Some(Event {
        level: EventLevel::Alert,
        code: classification.code(&rule.codes).to_string(),
        rule: rule.name.clone(),
        message,
        values,
        timestamp_ms,
    })
}

fn evaluate_drift(
    rule: &DriftRuleConfig,
    live: &LiveValueStore,
    stats: &StatisticsEngine,
    timestamp_ms: u64,
) -> Vec<Event> {
    let Some(reference) = stable_reference(&rule.name, &rule.reference, live) else {
        return Vec::new();
    };
    let (Some(metric_a), Some(metric_b)) = (stats.metric(&rule.metric_a), stats.metric(&rule.metric_b))
    else {
        return Vec::new();
    };

    let drifting = |metric: &MetricState| match (metric.ewma(), metric.trend()) {
        (Some(ewma), Some(trend)) => ewma > rule.magnitude_floor && trend > rule.velocity_floor,
        _ => false,
    };
    // The other metric must be nearly flat for a single-side classification
    let quiet = |metric: &MetricState| {
        matches!(metric.trend(), Some(trend) if trend.abs() < rule.velocity_floor * 0.5)
    };

    let (drift_a, drift_b) = (drifting(metric_a), drifting(metric_b));
    let mut fired = Vec::new();
    if drift_a && quiet(metric_b) {
        fired.push(Classification::A);
    }
    if drift_b && quiet(metric_a) {
        fired.push(Classification::B);
    }
    if drift_a && drift_b {
        fired.push(Classification::Combined);
    }

    fired
        .into_iter()
        .map(|classification| {
            let (lead, other) = match classification {
                Classification::B => (metric_b, metric_a),
                _ => (metric_a, metric_b),
            };
            let message = format!("{}; {}", describe_drift(lead), describe_drift(other));

            let mut values = contributing_inputs(&rule.reference.signal, reference, live, [metric_a, metric_b]);
            for metric in [metric_a, metric_b] {
                let name = &metric.definition().name;
                if let Some(ewma) = metric.ewma() {
                    values.push(ContributingValue::new(format!("{}_ewma", name), ewma));
                }
                if let Some(trend) = metric.trend() {
                    values.push(ContributingValue::new(format!("{}_trend", name), trend));
                }
            }

            Event {
                level: EventLevel::EarlyWarning,
                code: classification.code(&rule.codes).to_string(),
                rule: rule.name.clone(),
                message,
                values,
                timestamp_ms,
            }
        })
        .collect()
}

fn describe_drift(metric: &MetricState) -> String {
    let name = &metric.definition().name;
    format!(
        "{}_ewma={:.2}, {}_trend={:.4}/s",
        name,
        metric.ewma().unwrap_or(f64::NAN),
        name,
        metric.trend().unwrap_or(f64::NAN)
    )
}

/// Reference plus every live input of the metrics, without repeats
fn contributing_inputs(
    reference_signal: &str,
    reference: f64,
    live: &LiveValueStore,
    metrics: [&MetricState; 2],
) -> Vec<ContributingValue> {
    let mut values = vec![ContributingValue::new(reference_signal, reference)];
    for input in metrics.iter().flat_map(|m| m.definition().inputs.iter()) {
        if values.iter().any(|v| v.name == *input) {
            continue;
        }
        if let Some(value) = live.value(input) {
            values.push(ContributingValue::new(input.as_str(), value));
        }
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MetricConfig;

    const DCDC: &str = "DCDC_Output_Voltage";
    const ECU_A: &str = "ECUA_Supply_Voltage";
    const ECU_B: &str = "ECUB_Supply_Voltage";

    struct Harness {
        config: DiagnosticsConfig,
        live: LiveValueStore,
        stats: StatisticsEngine,
        rules: RuleEngine,
    }

    impl Harness {
        fn new(config: DiagnosticsConfig) -> Self {
            let stats = StatisticsEngine::new(&config.stats, &config.metrics);
            let rules = RuleEngine::new(&config);
            Self {
                config,
                live: LiveValueStore::new(),
                stats,
                rules,
            }
        }

        /// Set all three voltages at once and run the chain
        fn step(&mut self, t_ms: u64, dcdc: f64, a: f64, b: f64) -> Vec<Event> {
            self.live.set(DCDC, dcdc, t_ms);
            self.live.set(ECU_A, a, t_ms);
            self.live.set(ECU_B, b, t_ms);
            self.stats.update(&self.live, t_ms);
            self.rules.evaluate(&self.live, &self.stats, t_ms)
        }
    }

    fn threshold_only() -> DiagnosticsConfig {
        let mut config = DiagnosticsConfig::harness_demo();
        config.drift_rules.clear();
        config
    }

    fn drift_only() -> DiagnosticsConfig {
        let mut config = DiagnosticsConfig::harness_demo();
        config.threshold_rules.clear();
        config
    }

    #[test]
    fn test_classification_is_exclusive() {
        for a in [false, true] {
            for b in [false, true] {
                let fired: Vec<Classification> = Classification::from_flags(a, b).into_iter().collect();
                assert!(fired.len() <= 1);
            }
        }
        assert_eq!(Classification::from_flags(true, true), Some(Classification::Combined));
        assert_eq!(Classification::from_flags(false, false), None);
    }

    #[test]
    fn test_threshold_rule_fires_at_most_once_across_sweep() {
        let mut harness = Harness::new(threshold_only());
        let deltas = [0.0, 0.5, 0.79, 0.81, 1.0, 2.5];
        let mut t_ms = 0;
        for delta_a in deltas {
            for delta_b in deltas {
                t_ms += 100;
                let events = harness.step(t_ms, 14.0, 14.0 - delta_a, 14.0 - delta_b);
                let expected = match (delta_a > 0.8, delta_b > 0.8) {
                    (false, false) => None,
                    (true, false) => Some("HARNESS_A"),
                    (false, true) => Some("HARNESS_B"),
                    (true, true) => Some("HARNESS_C"),
                };
                assert!(events.len() <= 1, "a={} b={}: {:?}", delta_a, delta_b, events);
                assert_eq!(events.first().map(|e| e.code.as_str()), expected, "a={} b={}", delta_a, delta_b);
            }
        }
    }

    #[test]
    fn test_level_names_match_display() {
        for level in [EventLevel::Alert, EventLevel::EarlyWarning] {
            let json = serde_json::to_value(level).unwrap();
            assert_eq!(json, level.as_str());
            assert_eq!(serde_json::from_value::<EventLevel>(json).unwrap(), level);
        }
    }

    #[test]
    fn test_threshold_a_only() {
        let mut harness = Harness::new(threshold_only());
        // delta_a = 1.0, delta_b = 0.1
        let events = harness.step(1000, 14.0, 13.0, 13.9);
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.level, EventLevel::Alert);
        assert_eq!(event.code, "HARNESS_A");
        assert_eq!(event.rule, "HARNESS_LOW_VS_DCDC");
        assert_eq!(event.value(DCDC), Some(14.0));
        assert_eq!(event.value(ECU_A), Some(13.0));
        assert!((event.value("delta_a").unwrap() - 1.0).abs() < 1e-9);
        assert!(event.message.contains("delta_a above 0.80"));
    }

    #[test]
    fn test_threshold_b_and_combined() {
        let mut harness = Harness::new(threshold_only());
        let events = harness.step(1000, 14.0, 13.9, 13.0);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].code, "HARNESS_B");

        let events = harness.step(2000, 14.0, 13.0, 13.0);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].code, "HARNESS_C");

        let events = harness.step(3000, 14.0, 13.9, 13.9);
        assert!(events.is_empty());
    }

    #[test]
    fn test_threshold_is_strictly_greater() {
        let mut harness = Harness::new(threshold_only());
        harness.config.threshold_rules[0].threshold = 1.0;
        harness.rules = RuleEngine::new(&harness.config);
        // delta_a == threshold does not fire
        let events = harness.step(1000, 14.0, 13.0, 14.0);
        assert!(events.is_empty());
    }

    #[test]
    fn test_reference_out_of_band_skips_threshold_rules() {
        let mut harness = Harness::new(threshold_only());
        let events = harness.step(1000, 10.0, 9.0, 9.0);
        assert!(events.is_empty());
    }

    #[test]
    fn test_missing_inputs_produce_nothing() {
        let harness = Harness::new(DiagnosticsConfig::harness_demo());
        assert!(harness.rules.evaluate(&harness.live, &harness.stats, 0).is_empty());

        let mut harness = Harness::new(DiagnosticsConfig::harness_demo());
        harness.live.set(DCDC, 14.0, 0);
        harness.live.set(ECU_A, 12.0, 0);
        harness.stats.update(&harness.live, 0);
        assert!(harness.rules.evaluate(&harness.live, &harness.stats, 0).is_empty());
    }

    #[test]
    fn test_single_metric_drift() {
        let mut harness = Harness::new(drift_only());
        let mut last = Vec::new();
        // delta_a climbs 0.5 V -> 0.7 V over 10 s (0.02 V/s), delta_b flat at 0.1 V
        for step in 0..=10u64 {
            let delta_a = 0.5 + 0.02 * step as f64;
            last = harness.step(step * 1000, 14.0, 14.0 - delta_a, 13.9);
        }
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].level, EventLevel::EarlyWarning);
        assert_eq!(last[0].code, "HARNESS_A_DRIFT");
        assert!(last[0].value("delta_a_trend").unwrap() > 0.01);
        assert_eq!(last[0].value("delta_b_trend"), Some(0.0));
    }

    #[test]
    fn test_combined_drift_suppresses_single_side() {
        let mut harness = Harness::new(drift_only());
        let mut last = Vec::new();
        for step in 0..=10u64 {
            let delta = 0.5 + 0.02 * step as f64;
            last = harness.step(step * 1000, 14.0, 14.0 - delta, 14.0 - delta);
        }
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].code, "HARNESS_C_DRIFT");
    }

    #[test]
    fn test_drift_needs_a_quiet_complement() {
        let mut harness = Harness::new(drift_only());
        let mut last = Vec::new();
        // delta_b creeps at 0.008 V/s: above half the velocity floor, below the floor
        for step in 0..=10u64 {
            let delta_a = 0.5 + 0.02 * step as f64;
            let delta_b = 0.1 + 0.008 * step as f64;
            last = harness.step(step * 1000, 14.0, 14.0 - delta_a, 14.0 - delta_b);
        }
        assert!(last.is_empty());
    }

    #[test]
    fn test_drift_gated_on_reference() {
        let mut harness = Harness::new(drift_only());
        let mut last = Vec::new();
        for step in 0..=10u64 {
            let delta_a = 0.5 + 0.02 * step as f64;
            last = harness.step(step * 1000, 15.0, 15.0 - delta_a, 14.9);
        }
        assert!(last.is_empty());
    }

    #[test]
    fn test_drift_waits_for_trend() {
        let mut harness = Harness::new(drift_only());
        let events = harness.step(0, 14.0, 13.0, 13.9);
        assert!(events.is_empty());
    }

    #[test]
    fn test_abs_difference_metric_rules() {
        let config = DiagnosticsConfig::new()
            .add_metric(MetricConfig::abs_difference("da", DCDC, ECU_A))
            .add_metric(MetricConfig::abs_difference("db", DCDC, ECU_B))
            .add_threshold_rule(ThresholdRuleConfig {
                name: "abs".to_string(),
                reference: ReferenceBand::new(DCDC, 14.0, 0.5),
                metric_a: "da".to_string(),
                metric_b: "db".to_string(),
                threshold: 0.8,
                codes: ClassificationCodes::new("A", "B", "C"),
            });
        let mut harness = Harness::new(config);
        // ECU_A reads high rather than low
        let events = harness.step(0, 14.0, 15.0, 14.0);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].code, "A");
    }
}
