//! Diagnostics configuration types
//!
//! Derived metrics, rule parameters and dispatch policy. Everything here is
//! plain data: it deserializes from the application's TOML file and can be
//! built programmatically with the builder methods.

use crate::types::{DiagError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Configuration for the decode-and-diagnose pipeline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticsConfig {
    /// Which decoded signals are kept in the live value store
    #[serde(default)]
    pub track: SignalTrackMode,

    #[serde(default)]
    pub decode: DecodeConfig,

    #[serde(default)]
    pub stats: StatsConfig,

    /// Derived metrics computed from live values
    #[serde(default)]
    pub metrics: Vec<MetricConfig>,

    /// Instantaneous threshold rules (alerts)
    #[serde(default)]
    pub threshold_rules: Vec<ThresholdRuleConfig>,

    /// EWMA + trend drift rules (early warnings)
    #[serde(default)]
    pub drift_rules: Vec<DriftRuleConfig>,

    #[serde(default)]
    pub dispatch: DispatchConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignalTrackMode {
    All(String), // "all"
    List(Vec<String>),
}

impl Default for SignalTrackMode {
    fn default() -> Self {
        SignalTrackMode::All("all".to_string())
    }
}

impl SignalTrackMode {
    pub fn is_tracked(&self, signal: &str) -> bool {
        match self {
            SignalTrackMode::All(_) => true,
            SignalTrackMode::List(signals) => signals.iter().any(|s| s == signal),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecodeConfig {
    /// Reject frames whose DLC does not cover every signal instead of
    /// zero-filling the missing bytes
    #[serde(default)]
    pub strict_dlc: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsConfig {
    /// Sliding window length in seconds
    #[serde(default = "default_window_seconds")]
    pub window_seconds: f64,

    /// EWMA smoothing factor, 0 < alpha <= 1
    #[serde(default = "default_ewma_alpha")]
    pub ewma_alpha: f64,
}

fn default_window_seconds() -> f64 {
    20.0
}

fn default_ewma_alpha() -> f64 {
    0.2
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            window_seconds: default_window_seconds(),
            ewma_alpha: default_ewma_alpha(),
        }
    }
}

/// A derived metric over two live values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricConfig {
    pub name: String,
    pub kind: MetricKind,
    /// Operand signal names, in order (a, b)
    pub inputs: [String; 2],
}

impl MetricConfig {
    /// Signed difference `a - b`
    pub fn difference(name: impl Into<String>, a: impl Into<String>, b: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: MetricKind::Difference,
            inputs: [a.into(), b.into()],
        }
    }

    /// Absolute difference `|a - b|`
    pub fn abs_difference(name: impl Into<String>, a: impl Into<String>, b: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: MetricKind::AbsDifference,
            inputs: [a.into(), b.into()],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Difference,
    AbsDifference,
}

impl MetricKind {
    pub fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            MetricKind::Difference => a - b,
            MetricKind::AbsDifference => (a - b).abs(),
        }
    }
}

/// Acceptable band for a reference signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceBand {
    pub signal: String,
    pub nominal: f64,
    pub tolerance: f64,
}

impl ReferenceBand {
    pub fn new(signal: impl Into<String>, nominal: f64, tolerance: f64) -> Self {
        Self {
            signal: signal.into(),
            nominal,
            tolerance,
        }
    }

    /// `|value - nominal| <= tolerance`
    pub fn contains(&self, value: f64) -> bool {
        (value - self.nominal).abs() <= self.tolerance
    }
}

/// Classification codes for the A / B / combined outcomes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationCodes {
    pub a: String,
    pub b: String,
    pub combined: String,
}

impl ClassificationCodes {
    pub fn new(a: impl Into<String>, b: impl Into<String>, combined: impl Into<String>) -> Self {
        Self {
            a: a.into(),
            b: b.into(),
            combined: combined.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRuleConfig {
    pub name: String,
    pub reference: ReferenceBand,
    pub metric_a: String,
    pub metric_b: String,
    /// A metric above this value is a fault
    pub threshold: f64,
    pub codes: ClassificationCodes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftRuleConfig {
    pub name: String,
    pub reference: ReferenceBand,
    pub metric_a: String,
    pub metric_b: String,
    /// EWMA must exceed this
    pub magnitude_floor: f64,
    /// Trend (units per second) must exceed this
    pub velocity_floor: f64,
    pub codes: ClassificationCodes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Minimum spacing between forwarded events with the same throttle key
    #[serde(default = "default_cooldown")]
    pub cooldown_seconds: f64,

    #[serde(default)]
    pub throttle_key: ThrottleKeyMode,
}

fn default_cooldown() -> f64 {
    10.0
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            cooldown_seconds: default_cooldown(),
            throttle_key: ThrottleKeyMode::default(),
        }
    }
}

/// Which event fields form the throttle key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThrottleKeyMode {
    /// (level, classification code)
    #[default]
    LevelCode,
    /// (level, classification code, rule name)
    LevelCodeRule,
}

impl DiagnosticsConfig {
    /// Create an empty configuration with default statistics and dispatch settings
    pub fn new() -> Self {
        Self::default()
    }

    /// The three-ECU supply harness deployment: two ECU supply voltages
    /// cross-checked against the DC/DC converter output
    pub fn harness_demo() -> Self {
        const DCDC: &str = "DCDC_Output_Voltage";
        let reference = ReferenceBand::new(DCDC, 14.0, 0.5);

        Self::new()
            .with_window_seconds(20.0)
            .with_ewma_alpha(0.2)
            .add_metric(MetricConfig::difference("delta_a", DCDC, "ECUA_Supply_Voltage"))
            .add_metric(MetricConfig::difference("delta_b", DCDC, "ECUB_Supply_Voltage"))
            .add_threshold_rule(ThresholdRuleConfig {
                name: "HARNESS_LOW_VS_DCDC".to_string(),
                reference: reference.clone(),
                metric_a: "delta_a".to_string(),
                metric_b: "delta_b".to_string(),
                threshold: 0.8,
                codes: ClassificationCodes::new("HARNESS_A", "HARNESS_B", "HARNESS_C"),
            })
            .add_drift_rule(DriftRuleConfig {
                name: "HARNESS_DRIFT".to_string(),
                reference,
                metric_a: "delta_a".to_string(),
                metric_b: "delta_b".to_string(),
                magnitude_floor: 0.3,
                velocity_floor: 0.01,
                codes: ClassificationCodes::new(
                    "HARNESS_A_DRIFT",
                    "HARNESS_B_DRIFT",
                    "HARNESS_C_DRIFT",
                ),
            })
            .with_cooldown(10.0)
    }

    /// Builder method: set the sliding window length
    pub fn with_window_seconds(mut self, seconds: f64) -> Self {
        self.stats.window_seconds = seconds;
        self
    }

    /// Builder method: set the EWMA smoothing factor
    pub fn with_ewma_alpha(mut self, alpha: f64) -> Self {
        self.stats.ewma_alpha = alpha;
        self
    }

    /// Builder method: add a derived metric
    pub fn add_metric(mut self, metric: MetricConfig) -> Self {
        self.metrics.push(metric);
        self
    }

    /// Builder method: add a threshold rule
    pub fn add_threshold_rule(mut self, rule: ThresholdRuleConfig) -> Self {
        self.threshold_rules.push(rule);
        self
    }

    /// Builder method: add a drift rule
    pub fn add_drift_rule(mut self, rule: DriftRuleConfig) -> Self {
        self.drift_rules.push(rule);
        self
    }

    /// Builder method: set the dispatcher cooldown
    pub fn with_cooldown(mut self, seconds: f64) -> Self {
        self.dispatch.cooldown_seconds = seconds;
        self
    }

    /// Builder method: set the throttle key composition
    pub fn with_throttle_key(mut self, mode: ThrottleKeyMode) -> Self {
        self.dispatch.throttle_key = mode;
        self
    }

    /// Builder method: restrict the live value store to these signals
    pub fn with_tracked_signals(mut self, signals: Vec<String>) -> Self {
        self.track = SignalTrackMode::List(signals);
        self
    }

    /// Builder method: enable strict DLC checking
    pub fn with_strict_dlc(mut self, strict: bool) -> Self {
        self.decode.strict_dlc = strict;
        self
    }

    /// Check internal consistency
    pub fn validate(&self) -> Result<()> {
        if let SignalTrackMode::All(keyword) = &self.track {
            if keyword != "all" {
                return invalid(format!("track must be \"all\" or a list, got \"{}\"", keyword));
            }
        }

        let stats = &self.stats;
        if !(stats.window_seconds.is_finite() && stats.window_seconds > 0.0) {
            return invalid(format!("window_seconds must be > 0, got {}", stats.window_seconds));
        }
        if !(stats.ewma_alpha > 0.0 && stats.ewma_alpha <= 1.0) {
            return invalid(format!("ewma_alpha must be in (0, 1], got {}", stats.ewma_alpha));
        }
        if !(self.dispatch.cooldown_seconds.is_finite() && self.dispatch.cooldown_seconds >= 0.0) {
            return invalid(format!(
                "cooldown_seconds must be >= 0, got {}",
                self.dispatch.cooldown_seconds
            ));
        }

        let mut metric_names = HashSet::new();
        for metric in &self.metrics {
            if !metric_names.insert(metric.name.as_str()) {
                return invalid(format!("duplicate metric '{}'", metric.name));
            }
        }

        let check_metric = |rule: &str, metric: &str| -> Result<()> {
            if metric_names.contains(metric) {
                Ok(())
            } else {
                invalid(format!("rule '{}' references unknown metric '{}'", rule, metric))
            }
        };
        let check_band = |rule: &str, band: &ReferenceBand| -> Result<()> {
            if band.tolerance >= 0.0 && band.nominal.is_finite() {
                Ok(())
            } else {
                invalid(format!("rule '{}' has an invalid reference band", rule))
            }
        };

        for rule in &self.threshold_rules {
            check_metric(&rule.name, &rule.metric_a)?;
            check_metric(&rule.name, &rule.metric_b)?;
            check_band(&rule.name, &rule.reference)?;
            if !(rule.threshold.is_finite() && rule.threshold >= 0.0) {
                return invalid(format!(
                    "rule '{}' threshold must be finite and >= 0, got {}",
                    rule.name, rule.threshold
                ));
            }
        }
        for rule in &self.drift_rules {
            check_metric(&rule.name, &rule.metric_a)?;
            check_metric(&rule.name, &rule.metric_b)?;
            check_band(&rule.name, &rule.reference)?;
            if !(rule.velocity_floor >= 0.0 && rule.magnitude_floor.is_finite()) {
                return invalid(format!("rule '{}' has invalid drift floors", rule.name));
            }
        }

        Ok(())
    }

    /// Every signal name the metrics and rules read
    pub fn referenced_signals(&self) -> Vec<&str> {
        let mut signals: Vec<&str> = self
            .metrics
            .iter()
            .flat_map(|m| m.inputs.iter().map(String::as_str))
            .chain(self.threshold_rules.iter().map(|r| r.reference.signal.as_str()))
            .chain(self.drift_rules.iter().map(|r| r.reference.signal.as_str()))
            .collect();
        signals.sort_unstable();
        signals.dedup();
        signals
    }
}

fn invalid<T>(message: String) -> Result<T> {
    Err(DiagError::InvalidConfig(message))
}
