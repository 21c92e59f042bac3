//! CSV frame log
//!
//! One row per frame, raw and decoded, in the format the replay source reads
//! back.

use anyhow::{Context, Result};
use chrono::Utc;
use harness_diag::{format_iso, FrameOutcome, RawFrame};
use std::fs::{self, File};
use std::path::{Path, PathBuf};

const HEADER: [&str; 16] = [
    "ts_iso",
    "ts_mcu_ms",
    "can_id",
    "is_extended",
    "dlc",
    "b0",
    "b1",
    "b2",
    "b3",
    "b4",
    "b5",
    "b6",
    "b7",
    "msg_name",
    "signals",
    "codes",
];

/// Buffered CSV writer for every processed frame
pub struct CsvFrameLog {
    path: PathBuf,
    writer: csv::Writer<File>,
    rows: u64,
}

impl CsvFrameLog {
    /// Create a new timestamped log file inside `dir`
    pub fn create(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create log directory: {:?}", dir))?;
        let name = format!("harness_log_{}.csv", Utc::now().format("%Y-%m-%d_%H-%M-%S"));
        Self::create_at(&dir.join(name))
    }

    /// Create a log at an exact path
    pub fn create_at(path: &Path) -> Result<Self> {
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("Failed to create CSV log: {:?}", path))?;
        writer.write_record(HEADER)?;
        writer.flush()?;

        log::info!("Logging frames to {:?}", path);
        Ok(Self {
            path: path.to_path_buf(),
            writer,
            rows: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Append one frame and whatever the pipeline made of it
    pub fn record(&mut self, frame: &RawFrame, outcome: &FrameOutcome) -> Result<()> {
        let signals = outcome
            .samples
            .iter()
            .map(|s| format!("{}={:.3}", s.signal, s.value))
            .collect::<Vec<_>>()
            .join(";");
        let codes = outcome.codes().collect::<Vec<_>>().join(";");

        let mut row = Vec::with_capacity(HEADER.len());
        row.push(format_iso(&Utc::now()));
        row.push(frame.timestamp_ms.to_string());
        row.push(format!("0x{:X}", frame.id));
        row.push(u8::from(frame.is_extended()).to_string());
        row.push(frame.dlc.to_string());
        row.extend(frame.data.iter().map(|b| format!("0x{:02X}", b)));
        row.push(outcome.message.clone().unwrap_or_default());
        row.push(signals);
        row.push(codes);

        self.writer.write_record(&row)?;
        self.rows += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer
            .flush()
            .with_context(|| format!("Failed to flush CSV log: {:?}", self.path))
    }
}

impl Drop for CsvFrameLog {
    fn drop(&mut self) {
        if let Err(e) = self.writer.flush() {
            log::warn!("Failed to flush CSV log {:?}: {}", self.path, e);
        }
    }
}
