//! Harness Monitor CLI Application
//!
//! Feeds CAN frames from the MCU bridge (or a recorded CSV log) through the
//! harness-diag pipeline and adds the I/O around it:
//! - Console alerts and periodic statistics
//! - CSV frame log
//! - Webhook delivery of forwarded events

use anyhow::{Context, Result};
use clap::Parser;
use harness_diag::{Catalog, Pipeline, RawFrame};
use rayon::prelude::*;
use std::io::{self, BufReader};
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

mod config;
mod persist;
mod report;
mod sinks;
mod source;

use config::{AppConfig, WebhookConfig};
use persist::CsvFrameLog;
use report::StatsReporter;
use sinks::{ConsoleSink, WebhookSink};

/// Frames decoded in parallel per replay batch
const REPLAY_CHUNK: usize = 4096;

/// Bridge frames buffered between the reader thread and the pipeline
const BRIDGE_QUEUE: usize = 1024;

/// Harness Monitor - Predictive fault diagnosis for a supply harness
#[derive(Parser, Debug)]
#[command(name = "harness-monitor")]
#[command(about = "Decode CAN frames and diagnose supply harness faults", long_about = None)]
#[command(version)]
struct Args {
    /// Path to configuration file (config.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Path to DBC file(s) (can be repeated; replaces the config list)
    #[arg(long, value_name = "FILE")]
    dbc: Vec<PathBuf>,

    /// Replay a CSV frame log instead of reading the bridge on stdin
    #[arg(short, long, value_name = "FILE")]
    replay: Option<PathBuf>,

    /// Directory for the CSV frame log
    #[arg(long, value_name = "DIR")]
    csv_dir: Option<PathBuf>,

    /// Webhook URL for forwarded events
    #[arg(long, value_name = "URL")]
    webhook: Option<String>,

    /// Maximum number of frames to process
    #[arg(long, value_name = "COUNT")]
    max_frames: Option<usize>,

    /// Seconds between [STATS] lines
    #[arg(long, value_name = "SECS")]
    report_interval: Option<u64>,

    /// Verbosity level (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(args.verbose, args.quiet);

    log::info!("Harness Monitor v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Using diagnostics library v{}", harness_diag::VERSION);

    let config = resolve_config(&args)?;
    if config.catalog.dbc_files.is_empty() {
        anyhow::bail!("No DBC files given; use --dbc or [catalog] dbc_files");
    }

    let catalog = Catalog::from_dbc_files(&config.catalog.dbc_files)
        .context("Failed to load signal catalog")?;
    let stats = catalog.stats();
    if !args.quiet {
        println!("Signal catalog:");
        println!("  Messages: {}", stats.num_messages);
        println!("  Signals:  {}", stats.num_signals);
    }

    let mut pipeline =
        Pipeline::new(catalog, config.diagnostics.clone()).context("Invalid diagnostics config")?;
    pipeline.add_sink(Box::new(ConsoleSink::new()));
    if let Some(webhook) = &config.webhook {
        pipeline.add_sink(Box::new(WebhookSink::spawn(webhook)));
    }

    let mut frame_log = match &config.output.csv_dir {
        Some(dir) => Some(CsvFrameLog::create(dir)?),
        None => None,
    };
    let mut reporter =
        StatsReporter::new(Duration::from_secs(config.output.report_interval_secs.max(1)));

    let mut run = Run {
        pipeline: &mut pipeline,
        frame_log: frame_log.as_mut(),
        reporter: &mut reporter,
        max_frames: args.max_frames,
        processed: 0,
    };
    match &args.replay {
        Some(path) => run.replay(path)?,
        None => run.live()?,
    }
    let processed = run.processed;

    // Final report and shutdown
    if !args.quiet {
        println!("{}", reporter.report(&mut pipeline));
    }
    pipeline.flush_sinks();
    if let Some(log) = frame_log.as_mut() {
        log.flush()?;
        println!("Frame log: {:?} ({} rows)", log.path(), log.rows());
    }

    let totals = reporter.totals();
    println!(
        "Processed {} frames: {} decoded, {} unknown, {} malformed, {} events ({} forwarded, {} throttled)",
        processed,
        totals.frames_decoded,
        totals.unknown_frames,
        totals.malformed_frames,
        totals.events_raised,
        totals.events_forwarded,
        totals.events_throttled
    );

    // Dropping the pipeline joins the webhook worker
    drop(pipeline);
    Ok(())
}

/// Merge the config file (or the harness preset) with command line overrides
fn resolve_config(args: &Args) -> Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => {
            log::info!("Loading configuration from: {:?}", path);
            config::load_config(path)?
        }
        None => AppConfig::default(),
    };

    if !args.dbc.is_empty() {
        config.catalog.dbc_files = args.dbc.clone();
    }
    if let Some(dir) = &args.csv_dir {
        config.output.csv_dir = Some(dir.clone());
    }
    if let Some(url) = &args.webhook {
        config.webhook = Some(match config.webhook.take() {
            Some(existing) => WebhookConfig {
                url: url.clone(),
                ..existing
            },
            None => WebhookConfig::new(url.clone()),
        });
    }
    if let Some(secs) = args.report_interval {
        config.output.report_interval_secs = secs;
    }

    Ok(config)
}

/// State shared by both frame sources
struct Run<'a> {
    pipeline: &'a mut Pipeline,
    frame_log: Option<&'a mut CsvFrameLog>,
    reporter: &'a mut StatsReporter,
    max_frames: Option<usize>,
    processed: usize,
}

impl Run<'_> {
    fn limit_reached(&self) -> bool {
        self.max_frames.is_some_and(|max| self.processed >= max)
    }

    fn apply(
        &mut self,
        frame: &RawFrame,
        decoded: std::result::Result<Vec<harness_diag::DecodedSample>, harness_diag::DecodeError>,
    ) -> Result<()> {
        let outcome = self.pipeline.apply_decoded(frame, decoded);
        if let Some(log) = self.frame_log.as_deref_mut() {
            log.record(frame, &outcome)?;
        }
        self.processed += 1;
        Ok(())
    }

    fn tick(&mut self) -> Result<()> {
        if self.reporter.tick(self.pipeline) {
            if let Some(log) = self.frame_log.as_deref_mut() {
                log.flush()?;
            }
        }
        Ok(())
    }

    /// Decode in parallel, apply in file order
    fn replay(&mut self, path: &std::path::Path) -> Result<()> {
        let frames = source::read_replay_csv(path, self.max_frames)?;
        log::info!("Replaying {} frames from {:?}", frames.len(), path);

        for chunk in frames.chunks(REPLAY_CHUNK) {
            let decoded: Vec<_> = {
                let decoder = self.pipeline.decoder();
                chunk
                    .par_iter()
                    .map(|frame| decoder.decode(frame).map(|samples| samples.collect::<Vec<_>>()))
                    .collect()
            };
            for (frame, decoded) in chunk.iter().zip(decoded) {
                self.apply(frame, decoded)?;
            }
            self.tick()?;
        }
        Ok(())
    }

    /// Read bridge lines from stdin until EOF
    fn live(&mut self) -> Result<()> {
        let (tx, rx) = mpsc::sync_channel(BRIDGE_QUEUE);
        let _reader = source::spawn_bridge_reader(BufReader::new(io::stdin()), tx);
        log::info!("Waiting for bridge frames on stdin");

        let poll = self.reporter.interval().min(Duration::from_millis(250));
        while !self.limit_reached() {
            match rx.recv_timeout(poll) {
                Ok(frame) => {
                    let decoded = self.pipeline.decode(&frame);
                    self.apply(&frame, decoded)?;
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    log::info!("Bridge stream closed");
                    break;
                }
            }
            self.tick()?;
        }
        Ok(())
    }
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::io::Write;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_config() {
        let args = Args::parse_from([
            "harness-monitor",
            "--dbc",
            "a.dbc",
            "--dbc",
            "b.dbc",
            "--webhook",
            "http://localhost:9/hook",
            "--report-interval",
            "5",
            "-vv",
        ]);
        assert_eq!(args.verbose, 2);

        let config = resolve_config(&args).unwrap();
        assert_eq!(config.catalog.dbc_files.len(), 2);
        assert_eq!(config.output.report_interval_secs, 5);
        assert!(config.output.csv_dir.is_none());
        let webhook = config.webhook.unwrap();
        assert_eq!(webhook.url, "http://localhost:9/hook");
        assert_eq!(webhook.queue_capacity, 64);
    }
}
