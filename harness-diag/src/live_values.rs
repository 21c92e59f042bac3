//! Live value store
//!
//! Latest physical value per tracked signal. Updates are last-write-wins and
//! entries are never removed; a missing entry means the signal has not been
//! observed yet.

use crate::types::DecodedSample;
use std::collections::BTreeMap;

/// Most recent value of one signal
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiveValue {
    pub value: f64,
    pub timestamp_ms: u64,
}

/// Signal name -> latest value
#[derive(Debug, Clone, Default)]
pub struct LiveValueStore {
    values: BTreeMap<String, LiveValue>,
}

impl LiveValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the stored value for the sample's signal
    pub fn update(&mut self, sample: &DecodedSample) {
        self.set(&sample.signal, sample.value, sample.timestamp_ms);
    }

    /// Overwrite the stored value for a signal
    pub fn set(&mut self, signal: &str, value: f64, timestamp_ms: u64) {
        let entry = LiveValue {
            value,
            timestamp_ms,
        };
        match self.values.get_mut(signal) {
            Some(existing) => *existing = entry,
            None => {
                self.values.insert(signal.to_string(), entry);
            }
        }
    }

    pub fn get(&self, signal: &str) -> Option<LiveValue> {
        self.values.get(signal).copied()
    }

    /// Just the value, for rule evaluation
    pub fn value(&self, signal: &str) -> Option<f64> {
        self.values.get(signal).map(|live| live.value)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// All observed signals in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, LiveValue)> {
        self.values.iter().map(|(name, live)| (name.as_str(), *live))
    }
}
