//! Frame sources
//!
//! Two ways to feed the pipeline:
//! - replay of a CSV frame log written by [`crate::persist::CsvFrameLog`]
//! - the live bridge stream, one notification per line on stdin

use anyhow::{Context, Result};
use harness_diag::RawFrame;
use serde::Deserialize;
use std::io::BufRead;
use std::path::Path;
use std::sync::mpsc::SyncSender;
use std::thread::{self, JoinHandle};

/// Bridge notification version understood by this reader
pub const BRIDGE_VERSION: u64 = 0;

/// Fields per bridge line: version, ts, id, dlc, 8 bytes, flags
const BRIDGE_FIELDS: usize = 13;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Expected {expected} fields, got {got}")]
    FieldCount { expected: usize, got: usize },

    #[error("Invalid {field}: '{value}'")]
    InvalidField { field: &'static str, value: String },

    #[error("Unsupported bridge version {0}")]
    UnsupportedVersion(u64),
}

/// Parse a decimal or `0x`-prefixed hexadecimal integer
pub fn parse_int(text: &str) -> Option<u64> {
    let text = text.trim();
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

fn field<T: TryFrom<u64>>(name: &'static str, text: &str) -> std::result::Result<T, SourceError> {
    parse_int(text)
        .and_then(|v| T::try_from(v).ok())
        .ok_or_else(|| SourceError::InvalidField {
            field: name,
            value: text.trim().to_string(),
        })
}

fn check_frame(frame: RawFrame) -> std::result::Result<RawFrame, SourceError> {
    if frame.id > RawFrame::MAX_ID {
        return Err(SourceError::InvalidField {
            field: "can_id",
            value: format!("0x{:X}", frame.id),
        });
    }
    if frame.dlc > RawFrame::MAX_DLC {
        return Err(SourceError::InvalidField {
            field: "dlc",
            value: frame.dlc.to_string(),
        });
    }
    Ok(frame)
}

/// Parse one bridge notification: `version,ts_mcu_ms,can_id,dlc,b0,..,b7,flags`
pub fn parse_bridge_line(line: &str) -> std::result::Result<RawFrame, SourceError> {
    let parts: Vec<&str> = line.trim().split(',').collect();
    if parts.len() != BRIDGE_FIELDS {
        return Err(SourceError::FieldCount {
            expected: BRIDGE_FIELDS,
            got: parts.len(),
        });
    }

    let version: u64 = field("version", parts[0])?;
    if version != BRIDGE_VERSION {
        return Err(SourceError::UnsupportedVersion(version));
    }

    let mut data = [0u8; 8];
    for (slot, text) in data.iter_mut().zip(&parts[4..12]) {
        *slot = field("byte", text)?;
    }

    check_frame(RawFrame::new(
        field("can_id", parts[2])?,
        field("dlc", parts[3])?,
        data,
        field("flags", parts[12])?,
        field("ts_mcu_ms", parts[1])?,
    ))
}

/// Read bridge lines on a background thread and send frames to the pipeline
///
/// Malformed lines are logged and skipped. The thread ends at EOF or when
/// the receiving side hangs up.
pub fn spawn_bridge_reader<R>(reader: R, tx: SyncSender<RawFrame>) -> JoinHandle<()>
where
    R: BufRead + Send + 'static,
{
    thread::spawn(move || {
        for (line_no, line) in reader.lines().enumerate() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    log::error!("Bridge read failed: {}", e);
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match parse_bridge_line(&line) {
                Ok(frame) => {
                    if tx.send(frame).is_err() {
                        log::debug!("Pipeline stopped, closing bridge reader");
                        break;
                    }
                }
                Err(e) => log::warn!("Skipping bridge line {}: {}", line_no + 1, e),
            }
        }
        log::debug!("Bridge reader finished");
    })
}

/// One row of a persisted frame log; extra columns are ignored
#[derive(Debug, Deserialize)]
struct ReplayRow {
    ts_mcu_ms: String,
    can_id: String,
    #[serde(default)]
    is_extended: Option<String>,
    dlc: String,
    b0: String,
    b1: String,
    b2: String,
    b3: String,
    b4: String,
    b5: String,
    b6: String,
    b7: String,
}

impl ReplayRow {
    fn into_frame(self) -> std::result::Result<RawFrame, SourceError> {
        let extended = match self.is_extended.as_deref().map(str::trim) {
            None | Some("") => false,
            Some(text) => field::<u8>("is_extended", text)? != 0,
        };
        let bytes = [
            &self.b0, &self.b1, &self.b2, &self.b3, &self.b4, &self.b5, &self.b6, &self.b7,
        ];
        let mut data = [0u8; 8];
        for (slot, text) in data.iter_mut().zip(bytes) {
            *slot = field("byte", text)?;
        }

        check_frame(RawFrame::new(
            field("can_id", &self.can_id)?,
            field("dlc", &self.dlc)?,
            data,
            if extended { RawFrame::FLAG_EXTENDED } else { 0 },
            field("ts_mcu_ms", &self.ts_mcu_ms)?,
        ))
    }
}

/// Load frames from a CSV frame log, in file order
pub fn read_replay_csv(path: &Path, max_frames: Option<usize>) -> Result<Vec<RawFrame>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open replay file: {:?}", path))?;

    let limit = max_frames.unwrap_or(usize::MAX);
    let mut frames = Vec::new();
    let mut skipped = 0usize;

    for (idx, row) in reader.deserialize::<ReplayRow>().enumerate() {
        if frames.len() >= limit {
            break;
        }
        let row = row.with_context(|| format!("Failed to read row {} of {:?}", idx + 1, path))?;
        match row.into_frame() {
            Ok(frame) => frames.push(frame),
            Err(e) => {
                skipped += 1;
                log::warn!("Skipping replay row {}: {}", idx + 1, e);
            }
        }
    }

    log::info!(
        "Loaded {} frames from {:?} ({} skipped)",
        frames.len(),
        path,
        skipped
    );
    Ok(frames)
}
