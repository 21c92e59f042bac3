//! End-to-end scenarios: DBC file -> Catalog -> Pipeline -> sink

use harness_diag::{
    Catalog, CollectingSink, DecodeError, DiagnosticsConfig, EventLevel, FrameOutcome, Pipeline,
    RawFrame,
};
use std::io::Write;
use tempfile::NamedTempFile;

const HARNESS_DBC: &str = r#"
VERSION ""

NS_ :

BS_:

BU_: ECU_A ECU_B DCDC MON

BO_ 273 ECU_A_STATUS: 2 ECU_A
 SG_ ECUA_Supply_Voltage : 0|16@1+ (0.01,0) [0|30] "V" MON

BO_ 274 ECU_B_STATUS: 2 ECU_B
 SG_ ECUB_Supply_Voltage : 0|16@1+ (0.01,0) [0|30] "V" MON

BO_ 275 DCDC_STATUS: 4 DCDC
 SG_ DCDC_Output_Voltage : 0|16@1+ (0.01,0) [0|30] "V" MON
 SG_ DCDC_Temperature : 23|8@0- (1,-40) [0|0] "C" MON
"#;

const ECU_A: u32 = 0x111;
const ECU_B: u32 = 0x112;
const DCDC: u32 = 0x113;

struct Bench {
    pipeline: Pipeline,
    sink: CollectingSink,
    _dbc: NamedTempFile,
}

impl Bench {
    fn new() -> Self {
        let mut dbc = NamedTempFile::new().unwrap();
        dbc.write_all(HARNESS_DBC.as_bytes()).unwrap();
        dbc.flush().unwrap();

        let catalog = Catalog::from_dbc_files(&[dbc.path()]).unwrap();
        let mut pipeline = Pipeline::new(catalog, DiagnosticsConfig::harness_demo()).unwrap();
        let sink = CollectingSink::new();
        pipeline.add_sink(Box::new(sink.clone()));

        Self {
            pipeline,
            sink,
            _dbc: dbc,
        }
    }

    fn send(&mut self, id: u32, volts: f64, timestamp_ms: u64) -> FrameOutcome {
        let [lo, hi] = ((volts * 100.0).round() as u16).to_le_bytes();
        let frame = RawFrame::new(id, 2, [lo, hi, 0, 0, 0, 0, 0, 0], 0, timestamp_ms);
        self.pipeline.process_frame(&frame)
    }
}

#[test]
fn test_single_harness_fault_raises_one_alert() {
    let mut bench = Bench::new();
    bench.send(DCDC, 14.0, 0);
    bench.send(ECU_B, 13.9, 10);
    let outcome = bench.send(ECU_A, 13.0, 20);

    assert_eq!(outcome.events.len(), 1);
    let event = &outcome.events[0];
    assert_eq!(event.level, EventLevel::Alert);
    assert_eq!(event.code, "HARNESS_A");
    assert!((event.value("delta_a").unwrap() - 1.0).abs() < 1e-9);
    assert!((event.value("delta_b").unwrap() - 0.1).abs() < 1e-9);
    assert_eq!(bench.sink.events(), outcome.events);
}

#[test]
fn test_reference_out_of_band_suppresses_alerts() {
    let mut bench = Bench::new();
    bench.send(DCDC, 10.0, 0);
    bench.send(ECU_B, 9.0, 10);
    let outcome = bench.send(ECU_A, 9.0, 20);

    assert!(outcome.events.is_empty());
    assert!(bench.sink.events().is_empty());
}

#[test]
fn test_steady_single_drift_raises_one_early_warning() {
    let mut bench = Bench::new();
    bench.send(DCDC, 14.0, 0);
    bench.send(ECU_B, 14.0, 0);

    // delta_a holds above the 0.3 V floor and grows by 0.02 V/s; delta_b is flat
    let mut codes = Vec::new();
    for step in 0..=5u64 {
        let outcome = bench.send(ECU_A, 13.6 - 0.02 * step as f64, step * 1000);
        codes.extend(outcome.codes().map(str::to_string));
    }

    assert!(codes.iter().all(|c| c == "HARNESS_A_DRIFT"));
    assert!(!codes.is_empty());

    // Raised on every frame after the first, forwarded once per cooldown
    let forwarded = bench.sink.events();
    assert_eq!(forwarded.len(), 1);
    assert_eq!(forwarded[0].level, EventLevel::EarlyWarning);
    assert_eq!(forwarded[0].code, "HARNESS_A_DRIFT");
    assert_eq!(bench.pipeline.counters().events_throttled, codes.len() as u64 - 1);
}

#[test]
fn test_alert_repeats_after_cooldown() {
    let mut bench = Bench::new();
    bench.send(DCDC, 14.0, 0);
    bench.send(ECU_B, 13.9, 0);
    for ts in [0, 3_000, 9_999, 10_000, 12_000] {
        bench.send(ECU_A, 13.0, ts);
    }

    let times: Vec<u64> = bench
        .sink
        .events()
        .iter()
        .filter(|e| e.code == "HARNESS_A")
        .map(|e| e.timestamp_ms)
        .collect();
    assert_eq!(times, vec![0, 10_000]);
}

#[test]
fn test_unknown_and_short_frames_keep_running() {
    let mut bench = Bench::new();

    let unknown = bench
        .pipeline
        .process_frame(&RawFrame::new(0x7DF, 8, [0xFF; 8], 0, 0));
    assert!(unknown.samples.is_empty());
    assert_eq!(unknown.error, Some(DecodeError::UnknownIdentifier(0x7DF)));

    // DLC 2 on a 4-byte message: the temperature byte is zero-filled
    let short = bench
        .pipeline
        .process_frame(&RawFrame::new(DCDC, 2, [0x78, 0x05, 0xAA, 0xAA, 0, 0, 0, 0], 0, 0));
    assert_eq!(short.samples.len(), 2);
    let temp = short
        .samples
        .iter()
        .find(|s| s.signal == "DCDC_Temperature")
        .unwrap();
    assert_eq!(temp.value, -40.0);

    let volts = bench.pipeline.live_values().value("DCDC_Output_Voltage").unwrap();
    assert!((volts - 14.0).abs() < 1e-9);
    assert_eq!(bench.pipeline.counters().frames_seen, 2);
}

#[test]
fn test_strict_dlc_rejects_short_frames() {
    let mut dbc = NamedTempFile::new().unwrap();
    dbc.write_all(HARNESS_DBC.as_bytes()).unwrap();
    dbc.flush().unwrap();
    let catalog = Catalog::from_dbc_files(&[dbc.path()]).unwrap();
    let config = DiagnosticsConfig::harness_demo().with_strict_dlc(true);
    let mut pipeline = Pipeline::new(catalog, config).unwrap();

    let outcome = pipeline.process_frame(&RawFrame::new(DCDC, 2, [0x78, 0x05, 0, 0, 0, 0, 0, 0], 0, 0));
    assert!(matches!(
        outcome.error,
        Some(DecodeError::ShortPayload { required: 3, .. })
    ));
    assert_eq!(pipeline.counters().malformed_frames, 1);
}

#[test]
fn test_parallel_decode_matches_sequential() {
    let bench = Bench::new();
    let frames: Vec<RawFrame> = (0..64u64)
        .map(|i| {
            let [lo, hi] = (1300u16 + i as u16).to_le_bytes();
            let id = [ECU_A, ECU_B, DCDC, 0x7FF][i as usize % 4];
            RawFrame::new(id, 4, [lo, hi, 0x10, 0, 0, 0, 0, 0], 0, i * 10)
        })
        .collect();

    let decoder = bench.pipeline.decoder();
    let parallel: Vec<Vec<_>> = std::thread::scope(|scope| {
        let handles: Vec<_> = frames
            .chunks(16)
            .map(|chunk| {
                scope.spawn(move || {
                    chunk
                        .iter()
                        .map(|f| decoder.samples(f).collect::<Vec<_>>())
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect()
    });
    let sequential: Vec<Vec<_>> = frames
        .iter()
        .map(|f| decoder.samples(f).collect())
        .collect();

    assert_eq!(parallel, sequential);
}

#[test]
fn test_event_serializes_for_sinks() {
    let mut bench = Bench::new();
    bench.send(DCDC, 14.0, 0);
    bench.send(ECU_B, 13.0, 0);
    let outcome = bench.send(ECU_A, 13.0, 0);

    assert_eq!(outcome.events.len(), 1);
    assert_eq!(outcome.events[0].code, "HARNESS_C");
    let json = serde_json::to_value(&outcome.events[0]).unwrap();
    assert_eq!(json["level"], "ALERT");
    assert_eq!(json["code"], "HARNESS_C");
    assert_eq!(json["rule"], "HARNESS_LOW_VS_DCDC");
}
