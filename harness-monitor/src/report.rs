//! Periodic statistics report
//!
//! Runs on the pipeline thread between frames, so the live values it reads
//! are never half-updated.

use harness_diag::{LiveValueStore, Pipeline, PipelineCounters};
use std::time::{Duration, Instant};

/// Format one `[STATS]` line
pub fn format_stats(counters: &PipelineCounters, live: &LiveValueStore) -> String {
    let mut line = format!(
        "[STATS] frames_seen={} decoded={} unknown={} malformed={} events={} forwarded={}",
        counters.frames_seen,
        counters.frames_decoded,
        counters.unknown_frames,
        counters.malformed_frames,
        counters.events_raised,
        counters.events_forwarded
    );
    for (name, value) in live.iter() {
        line.push_str(&format!(" {}={:.3}", name, value.value));
    }
    line
}

/// Prints counters and live values once per interval
pub struct StatsReporter {
    interval: Duration,
    last: Instant,
    totals: PipelineCounters,
}

impl StatsReporter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Instant::now(),
            totals: PipelineCounters::default(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now.duration_since(self.last) >= self.interval
    }

    /// Print a report if the interval has elapsed; returns whether it did
    pub fn tick(&mut self, pipeline: &mut Pipeline) -> bool {
        let now = Instant::now();
        if !self.is_due(now) {
            return false;
        }
        self.last = now;
        println!("{}", self.report(pipeline));
        true
    }

    /// Take the interval counters from the pipeline and format them
    pub fn report(&mut self, pipeline: &mut Pipeline) -> String {
        let counters = pipeline.take_counters();
        accumulate(&mut self.totals, &counters);
        format_stats(&counters, pipeline.live_values())
    }

    /// Counters summed over every reported interval
    pub fn totals(&self) -> &PipelineCounters {
        &self.totals
    }
}

fn accumulate(totals: &mut PipelineCounters, interval: &PipelineCounters) {
    totals.frames_seen += interval.frames_seen;
    totals.frames_decoded += interval.frames_decoded;
    totals.unknown_frames += interval.unknown_frames;
    totals.malformed_frames += interval.malformed_frames;
    totals.samples_decoded += interval.samples_decoded;
    totals.events_raised += interval.events_raised;
    totals.events_forwarded += interval.events_forwarded;
    totals.events_throttled += interval.events_throttled;
}

#[cfg(test)]
mod tests {
    use super::*;
    use harness_diag::{Catalog, DiagnosticsConfig, RawFrame};

    #[test]
    fn test_format_stats() {
        let counters = PipelineCounters {
            frames_seen: 12,
            frames_decoded: 9,
            unknown_frames: 3,
            ..PipelineCounters::default()
        };
        let mut live = LiveValueStore::new();
        live.set("ECUA_Supply_Voltage", 13.1, 0);
        live.set("DCDC_Output_Voltage", 14.0, 0);

        assert_eq!(
            format_stats(&counters, &live),
            "[STATS] frames_seen=12 decoded=9 unknown=3 malformed=0 events=0 forwarded=0 \
             DCDC_Output_Voltage=14.000 ECUA_Supply_Voltage=13.100"
        );
    }

    #[test]
    fn test_report_resets_interval_and_keeps_totals() {
        let mut pipeline = Pipeline::new(Catalog::new(), DiagnosticsConfig::new()).unwrap();
        let mut reporter = StatsReporter::new(Duration::from_secs(3600));
        assert!(!reporter.tick(&mut pipeline));

        pipeline.process_frame(&RawFrame::new(0x7FF, 8, [0; 8], 0, 0));
        reporter.report(&mut pipeline);
        pipeline.process_frame(&RawFrame::new(0x7FF, 8, [0; 8], 0, 1));
        let line = reporter.report(&mut pipeline);

        assert!(line.starts_with("[STATS] frames_seen=1 "));
        assert_eq!(reporter.totals().frames_seen, 2);
        assert_eq!(reporter.totals().unknown_frames, 2);
    }
}
