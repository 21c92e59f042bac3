//! Event dispatcher
//!
//! Throttles events per key and forwards the survivors to every registered
//! sink. A key is marked as sent when the event is accepted, before any sink
//! sees it, so a failing sink never causes a resend.

use crate::config::{DispatchConfig, ThrottleKeyMode};
use crate::rules::{Event, EventLevel};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Sink-local delivery failure
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Sink closed")]
    Closed,
}

/// A destination for forwarded events
pub trait EventSink: Send {
    /// Short name used in log lines
    fn name(&self) -> &str;

    /// Hand one event to the sink; must not block on slow I/O
    fn deliver(&mut self, event: &Event) -> Result<(), SinkError>;

    /// Flush any buffered output
    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Identity used to deduplicate repeated events
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThrottleKey {
    pub level: EventLevel,
    pub code: String,
    pub rule: Option<String>,
}

impl ThrottleKey {
    pub fn for_event(event: &Event, mode: ThrottleKeyMode) -> Self {
        Self {
            level: event.level,
            code: event.code.clone(),
            rule: match mode {
                ThrottleKeyMode::LevelCode => None,
                ThrottleKeyMode::LevelCodeRule => Some(event.rule.clone()),
            },
        }
    }
}

/// What happened to a submitted event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Passed the throttle; `failed` sinks reported an error
    Forwarded { delivered: usize, failed: usize },
    /// Dropped because the key was forwarded less than a cooldown ago
    Throttled,
}

/// Throttles and fans out events
pub struct EventDispatcher {
    cooldown_ms: u64,
    key_mode: ThrottleKeyMode,
    last_forwarded: HashMap<ThrottleKey, u64>,
    sinks: Vec<Box<dyn EventSink>>,
}

impl EventDispatcher {
    pub fn new(config: &DispatchConfig) -> Self {
        Self {
            cooldown_ms: (config.cooldown_seconds * 1000.0).round() as u64,
            key_mode: config.throttle_key,
            last_forwarded: HashMap::new(),
            sinks: Vec::new(),
        }
    }

    pub fn add_sink(&mut self, sink: Box<dyn EventSink>) {
        log::debug!("Registered event sink '{}'", sink.name());
        self.sinks.push(sink);
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// Submit an event, using its source timestamp as "now"
    pub fn submit(&mut self, event: &Event) -> DispatchOutcome {
        self.submit_at(event, event.timestamp_ms)
    }

    /// Submit an event at an explicit time (milliseconds on the source clock)
    pub fn submit_at(&mut self, event: &Event, now_ms: u64) -> DispatchOutcome {
        let key = ThrottleKey::for_event(event, self.key_mode);

        if let Some(&last) = self.last_forwarded.get(&key) {
            // A clock that went backwards means the source restarted
            if now_ms >= last && now_ms - last < self.cooldown_ms {
                log::trace!("Throttled {} {} ({} ms since last)", event.level, event.code, now_ms - last);
                return DispatchOutcome::Throttled;
            }
        }
        self.last_forwarded.insert(key, now_ms);

        let mut delivered = 0;
        let mut failed = 0;
        for sink in &mut self.sinks {
            match sink.deliver(event) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    failed += 1;
                    log::warn!(
                        "Sink '{}' failed to deliver {} {}: {}",
                        sink.name(),
                        event.level,
                        event.code,
                        e
                    );
                }
            }
        }

        DispatchOutcome::Forwarded { delivered, failed }
    }

    /// Flush every sink, logging failures
    pub fn flush(&mut self) {
        for sink in &mut self.sinks {
            if let Err(e) = sink.flush() {
                log::warn!("Sink '{}' failed to flush: {}", sink.name(), e);
            }
        }
    }
}

/// Sink that keeps every delivered event in shared memory
///
/// Clones share the same buffer, so a handle can be kept after the sink is
/// moved into a dispatcher.
#[derive(Debug, Clone, Default)]
pub struct CollectingSink {
    events: Arc<Mutex<Vec<Event>>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything delivered so far
    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl EventSink for CollectingSink {
    fn name(&self) -> &str {
        "collect"
    }

    fn deliver(&mut self, event: &Event) -> Result<(), SinkError> {
        let mut events = self.events.lock().map_err(|_| SinkError::Closed)?;
        events.push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(level: EventLevel, code: &str, rule: &str, timestamp_ms: u64) -> Event {
        Event {
            level,
            code: code.to_string(),
            rule: rule.to_string(),
            message: String::new(),
            values: Vec::new(),
            timestamp_ms,
        }
    }

    fn dispatcher(cooldown_seconds: f64, mode: ThrottleKeyMode) -> (EventDispatcher, CollectingSink) {
        let mut dispatcher = EventDispatcher::new(&DispatchConfig {
            cooldown_seconds,
            throttle_key: mode,
        });
        let sink = CollectingSink::new();
        dispatcher.add_sink(Box::new(sink.clone()));
        (dispatcher, sink)
    }

    struct FailingSink;

    impl EventSink for FailingSink {
        fn name(&self) -> &str {
            "failing"
        }

        fn deliver(&mut self, _event: &Event) -> Result<(), SinkError> {
            Err(SinkError::Status {
                status: 500,
                body: "boom".to_string(),
            })
        }
    }

    #[test]
    fn test_same_key_within_cooldown_is_dropped() {
        let (mut dispatcher, sink) = dispatcher(10.0, ThrottleKeyMode::LevelCode);
        let first = event(EventLevel::Alert, "HARNESS_A", "r", 1_000);
        let second = event(EventLevel::Alert, "HARNESS_A", "r", 5_000);

        assert_eq!(
            dispatcher.submit(&first),
            DispatchOutcome::Forwarded { delivered: 1, failed: 0 }
        );
        assert_eq!(dispatcher.submit(&second), DispatchOutcome::Throttled);
        assert_eq!(sink.events().len(), 1);
        assert_eq!(sink.events()[0].timestamp_ms, 1_000);
    }

    #[test]
    fn test_forwarded_again_after_cooldown() {
        let (mut dispatcher, sink) = dispatcher(10.0, ThrottleKeyMode::LevelCode);
        dispatcher.submit(&event(EventLevel::Alert, "HARNESS_A", "r", 0));
        dispatcher.submit(&event(EventLevel::Alert, "HARNESS_A", "r", 9_999));
        dispatcher.submit(&event(EventLevel::Alert, "HARNESS_A", "r", 10_000));
        // The throttled submission at 9.999 s did not move the window
        dispatcher.submit(&event(EventLevel::Alert, "HARNESS_A", "r", 15_000));
        let times: Vec<u64> = sink.events().iter().map(|e| e.timestamp_ms).collect();
        assert_eq!(times, vec![0, 10_000]);
    }

    #[test]
    fn test_keys_are_independent() {
        let (mut dispatcher, sink) = dispatcher(10.0, ThrottleKeyMode::LevelCode);
        dispatcher.submit(&event(EventLevel::Alert, "HARNESS_A", "r", 0));
        dispatcher.submit(&event(EventLevel::Alert, "HARNESS_B", "r", 1));
        dispatcher.submit(&event(EventLevel::EarlyWarning, "HARNESS_A", "r", 2));
        assert_eq!(sink.events().len(), 3);
    }

    #[test]
    fn test_rule_name_in_key() {
        let (mut coarse, coarse_sink) = dispatcher(10.0, ThrottleKeyMode::LevelCode);
        let (mut fine, fine_sink) = dispatcher(10.0, ThrottleKeyMode::LevelCodeRule);
        for d in [&mut coarse, &mut fine] {
            d.submit(&event(EventLevel::Alert, "HARNESS_A", "rule_one", 0));
            d.submit(&event(EventLevel::Alert, "HARNESS_A", "rule_two", 1));
        }
        assert_eq!(coarse_sink.events().len(), 1);
        assert_eq!(fine_sink.events().len(), 2);
    }

    #[test]
    fn test_failing_sink_does_not_block_others_or_unmark_key() {
        let mut dispatcher = EventDispatcher::new(&DispatchConfig::default());
        dispatcher.add_sink(Box::new(FailingSink));
        let sink = CollectingSink::new();
        dispatcher.add_sink(Box::new(sink.clone()));

        let outcome = dispatcher.submit(&event(EventLevel::Alert, "HARNESS_C", "r", 0));
        assert_eq!(outcome, DispatchOutcome::Forwarded { delivered: 1, failed: 1 });
        assert_eq!(sink.events().len(), 1);

        // Still counted as sent for throttling
        let outcome = dispatcher.submit(&event(EventLevel::Alert, "HARNESS_C", "r", 1_000));
        assert_eq!(outcome, DispatchOutcome::Throttled);
    }

    #[test]
    fn test_clock_reset_is_not_throttled() {
        let (mut dispatcher, sink) = dispatcher(10.0, ThrottleKeyMode::LevelCode);
        dispatcher.submit(&event(EventLevel::Alert, "HARNESS_A", "r", 50_000));
        dispatcher.submit(&event(EventLevel::Alert, "HARNESS_A", "r", 100));
        assert_eq!(sink.events().len(), 2);
    }

    #[test]
    fn test_zero_cooldown_forwards_everything() {
        let (mut dispatcher, sink) = dispatcher(0.0, ThrottleKeyMode::LevelCode);
        for _ in 0..3 {
            dispatcher.submit(&event(EventLevel::Alert, "HARNESS_A", "r", 0));
        }
        assert_eq!(sink.events().len(), 3);
    }
}
