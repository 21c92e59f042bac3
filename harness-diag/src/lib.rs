//! Harness Diagnostics Library
//!
//! Decodes CAN frames from a supply harness into physical signal values and
//! runs a predictive fault-diagnosis chain over them: rolling statistics per
//! derived metric, threshold and drift rules, and a throttling dispatcher
//! that forwards events to pluggable sinks.
//!
//! # Architecture
//!
//! Data flows strictly downstream, one frame at a time:
//! - [`Catalog`] maps CAN IDs to message and signal definitions (DBC)
//! - [`FrameDecoder`] turns a [`RawFrame`] into [`DecodedSample`]s
//! - [`LiveValueStore`] keeps the latest value per signal
//! - [`StatisticsEngine`] maintains a sliding window, EWMA and trend per metric
//! - [`RuleEngine`] raises [`Event`]s
//! - [`EventDispatcher`] throttles events and hands them to [`EventSink`]s
//!
//! [`Pipeline`] owns all of that state and is the usual entry point.
//!
//! The library does NOT:
//! - Read frames from a transport
//! - Persist frames or format reports
//! - Talk to the network
//!
//! Those collaborators live in the application layer (harness-monitor).
//!
//! # Example Usage
//!
//! ```no_run
//! use harness_diag::{Catalog, DiagnosticsConfig, Pipeline, RawFrame};
//!
//! // Load signal definitions
//! let catalog = Catalog::from_dbc_files(&["harness.dbc"]).unwrap();
//!
//! // Build the pipeline with the three-ECU harness rules
//! let mut pipeline = Pipeline::new(catalog, DiagnosticsConfig::harness_demo()).unwrap();
//!
//! let frame = RawFrame::new(0x111, 2, [0x78, 0x05, 0, 0, 0, 0, 0, 0], 0, 1000);
//! let outcome = pipeline.process_frame(&frame);
//!
//! for event in &outcome.events {
//!     println!("[{}][{}] {}", event.level, event.code, event.message);
//! }
//! ```

// Public modules
pub mod config;
pub mod dispatch;
pub mod frame_decoder;
pub mod live_values;
pub mod pipeline;
pub mod rules;
pub mod signals;
pub mod stats;
pub mod types;

// Re-export main types for convenience
pub use config::{
    ClassificationCodes, DecodeConfig, DiagnosticsConfig, DispatchConfig, DriftRuleConfig,
    MetricConfig, MetricKind, ReferenceBand, SignalTrackMode, StatsConfig, ThresholdRuleConfig,
    ThrottleKeyMode,
};
pub use dispatch::{CollectingSink, DispatchOutcome, EventDispatcher, EventSink, SinkError};
pub use frame_decoder::FrameDecoder;
pub use live_values::{LiveValue, LiveValueStore};
pub use pipeline::{FrameOutcome, Pipeline, PipelineCounters};
pub use rules::{Classification, ContributingValue, Event, EventLevel, RuleEngine};
pub use signals::{ByteOrder, Catalog, CatalogStats, MessageDefinition, SignalDefinition, ValueType};
pub use stats::{Ewma, MetricSample, MetricSnapshot, SlidingWindow, StatisticsEngine};
pub use types::{
    format_iso, wall_clock_iso, DecodeError, DecodedSample, DiagError, RawFrame, Result, Timestamp,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
