//! Decode-and-diagnose pipeline
//!
//! The `Pipeline` owns every piece of cross-frame state (live values, metric
//! statistics, throttle state) and runs the full chain for one frame at a
//! time:
//!
//! ```text
//! RawFrame -> FrameDecoder -> LiveValueStore -> StatisticsEngine -> RuleEngine -> EventDispatcher -> sinks
//! ```
//!
//! It is a single-writer object: callers that receive frames from several
//! threads funnel them through one owner. Decoding alone is pure, so
//! [`Pipeline::decoder`] can be shared with worker threads and the results
//! handed back through [`Pipeline::apply_decoded`] in arrival order.

use crate::config::DiagnosticsConfig;
use crate::dispatch::{DispatchOutcome, EventDispatcher, EventSink};
use crate::frame_decoder::FrameDecoder;
use crate::live_values::LiveValueStore;
use crate::rules::{Event, RuleEngine};
use crate::signals::Catalog;
use crate::stats::StatisticsEngine;
use crate::types::{DecodeError, DecodedSample, RawFrame, Result};

/// Aggregate counters for the periodic reporter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineCounters {
    pub frames_seen: u64,
    /// Frames that matched a catalog message
    pub frames_decoded: u64,
    pub unknown_frames: u64,
    /// Frames rejected for an invalid DLC or a short payload
    pub malformed_frames: u64,
    pub samples_decoded: u64,
    pub events_raised: u64,
    pub events_forwarded: u64,
    pub events_throttled: u64,
}

impl PipelineCounters {
    /// Return the current counts and start a new interval
    pub fn take(&mut self) -> Self {
        std::mem::take(self)
    }
}

/// Everything that happened while processing one frame
#[derive(Debug, Clone, Default)]
pub struct FrameOutcome {
    /// Name of the catalog message the frame matched
    pub message: Option<String>,
    pub samples: Vec<DecodedSample>,
    /// Every event raised, throttled or not
    pub events: Vec<Event>,
    /// How many of `events` passed the throttle
    pub forwarded: usize,
    pub error: Option<DecodeError>,
}

impl FrameOutcome {
    pub fn is_decoded(&self) -> bool {
        self.message.is_some()
    }

    /// Classification codes raised for this frame
    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.events.iter().map(|e| e.code.as_str())
    }
}

/// Owner of all diagnostic state
pub struct Pipeline {
    catalog: Catalog,
    config: DiagnosticsConfig,
    live: LiveValueStore,
    stats: StatisticsEngine,
    rules: RuleEngine,
    dispatcher: EventDispatcher,
    counters: PipelineCounters,
}

impl Pipeline {
    /// Build a pipeline from a loaded catalog and a configuration
    ///
    /// # Returns
    /// * `Err(DiagError::InvalidConfig)` if the configuration is inconsistent
    ///
    /// # Example
    /// ```no_run
    /// use harness_diag::{Catalog, DiagnosticsConfig, Pipeline};
    ///
    /// let catalog = Catalog::from_dbc_files(&["harness.dbc"]).unwrap();
    /// let pipeline = Pipeline::new(catalog, DiagnosticsConfig::harness_demo()).unwrap();
    /// assert_eq!(pipeline.counters().frames_seen, 0);
    /// ```
    pub fn new(catalog: Catalog, config: DiagnosticsConfig) -> Result<Self> {
        config.validate()?;

        for signal in config.referenced_signals() {
            if !catalog.has_signal(signal) {
                log::warn!(
                    "Signal '{}' is used by the diagnostics but not defined in the catalog",
                    signal
                );
            } else if !config.track.is_tracked(signal) {
                log::warn!("Signal '{}' is used by the diagnostics but not tracked", signal);
            }
        }

        let stats = StatisticsEngine::new(&config.stats, &config.metrics);
        let rules = RuleEngine::new(&config);
        let dispatcher = EventDispatcher::new(&config.dispatch);

        log::info!(
            "Pipeline ready: {} messages, {} metrics, {} rules",
            catalog.stats().num_messages,
            config.metrics.len(),
            rules.rule_count()
        );

        Ok(Self {
            catalog,
            config,
            live: LiveValueStore::new(),
            stats,
            rules,
            dispatcher,
            counters: PipelineCounters::default(),
        })
    }

    pub fn add_sink(&mut self, sink: Box<dyn EventSink>) {
        self.dispatcher.add_sink(sink);
    }

    /// Stateless decoder over this pipeline's catalog
    pub fn decoder(&self) -> FrameDecoder<'_> {
        FrameDecoder::new(&self.catalog).with_strict_dlc(self.config.decode.strict_dlc)
    }

    /// Decode a frame without touching any state
    pub fn decode(&self, frame: &RawFrame) -> std::result::Result<Vec<DecodedSample>, DecodeError> {
        self.decoder().decode(frame).map(Iterator::collect)
    }

    /// Run the full chain for one frame
    pub fn process_frame(&mut self, frame: &RawFrame) -> FrameOutcome {
        let decoded = self.decode(frame);
        self.apply_decoded(frame, decoded)
    }

    /// Apply an already-decoded frame to the pipeline state
    ///
    /// Frames must be applied in arrival order.
    pub fn apply_decoded(
        &mut self,
        frame: &RawFrame,
        decoded: std::result::Result<Vec<DecodedSample>, DecodeError>,
    ) -> FrameOutcome {
        self.counters.frames_seen += 1;

        let samples = match decoded {
            Ok(samples) => samples,
            Err(e) => {
                if e.is_unknown_identifier() {
                    self.counters.unknown_frames += 1;
                    log::trace!("{}", e);
                } else {
                    self.counters.malformed_frames += 1;
                    log::debug!("Dropping frame: {}", e);
                }
                return FrameOutcome {
                    error: Some(e),
                    ..FrameOutcome::default()
                };
            }
        };

        self.counters.frames_decoded += 1;
        self.counters.samples_decoded += samples.len() as u64;
        let message = self
            .catalog
            .get_message(frame.id)
            .map(|m| m.name.clone());

        if samples.is_empty() {
            return FrameOutcome {
                message,
                ..FrameOutcome::default()
            };
        }

        for sample in samples.iter().filter(|s| self.config.track.is_tracked(&s.signal)) {
            self.live.update(sample);
        }

        self.stats.update(&self.live, frame.timestamp_ms);
        let events = self.rules.evaluate(&self.live, &self.stats, frame.timestamp_ms);

        let mut forwarded = 0;
        for event in &events {
            self.counters.events_raised += 1;
            match self.dispatcher.submit(event) {
                DispatchOutcome::Forwarded { .. } => {
                    self.counters.events_forwarded += 1;
                    forwarded += 1;
                }
                DispatchOutcome::Throttled => self.counters.events_throttled += 1,
            }
        }

        FrameOutcome {
            message,
            samples,
            events,
            forwarded,
            error: None,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn config(&self) -> &DiagnosticsConfig {
        &self.config
    }

    pub fn live_values(&self) -> &LiveValueStore {
        &self.live
    }

    pub fn statistics(&self) -> &StatisticsEngine {
        &self.stats
    }

    pub fn counters(&self) -> &PipelineCounters {
        &self.counters
    }

    /// Snapshot the counters and reset them for the next interval
    pub fn take_counters(&mut self) -> PipelineCounters {
        self.counters.take()
    }

    pub fn flush_sinks(&mut self) {
        self.dispatcher.flush();
    }
}
