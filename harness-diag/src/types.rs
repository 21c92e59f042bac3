//! Core types for the harness diagnostics library
//!
//! This module defines the raw frame delivered by the bridge, the decoded
//! sample produced for every catalog signal, and the error types shared by the
//! rest of the crate.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Wall-clock timestamp type used by sinks
pub type Timestamp = DateTime<Utc>;

/// Result type for catalog and configuration operations
pub type Result<T> = std::result::Result<T, DiagError>;

/// Raw CAN frame as delivered by the inter-processor bridge
///
/// The bridge always hands over all 8 payload slots; only the first `dlc`
/// bytes are meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawFrame {
    /// CAN identifier (11-bit or 29-bit)
    pub id: u32,
    /// Data length code (0-8)
    pub dlc: u8,
    /// Payload slots
    pub data: [u8; 8],
    /// Flags word, bit 0 = extended identifier
    pub flags: u32,
    /// Source timestamp in milliseconds, monotonic per source
    pub timestamp_ms: u64,
}

impl RawFrame {
    /// Extended-identifier flag bit
    pub const FLAG_EXTENDED: u32 = 0x01;
    /// Largest identifier a frame can carry (29 bits)
    pub const MAX_ID: u32 = 0x1FFF_FFFF;
    /// Classic CAN payload width in bytes
    pub const MAX_DLC: u8 = 8;

    pub fn new(id: u32, dlc: u8, data: [u8; 8], flags: u32, timestamp_ms: u64) -> Self {
        Self {
            id,
            dlc,
            data,
            flags,
            timestamp_ms,
        }
    }

    /// True if the extended-identifier flag is set
    pub fn is_extended(&self) -> bool {
        self.flags & Self::FLAG_EXTENDED != 0
    }

    /// Source timestamp converted to seconds
    pub fn timestamp_secs(&self) -> f64 {
        self.timestamp_ms as f64 / 1000.0
    }

    /// The meaningful part of the payload
    pub fn payload(&self) -> &[u8] {
        let len = usize::from(self.dlc.min(Self::MAX_DLC));
        &self.data[..len]
    }
}

/// One physical value decoded from a frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedSample {
    /// Signal name from the catalog
    pub signal: String,
    /// Physical value (raw * scale + offset)
    pub value: f64,
    /// Capture timestamp, copied from the frame (milliseconds)
    pub timestamp_ms: u64,
    /// Name of the message that carried the signal
    pub message: String,
}

/// Errors raised while loading the catalog or validating configuration
///
/// All of these are fatal at startup; nothing in the per-frame path returns
/// a `DiagError`.
#[derive(Debug, thiserror::Error)]
pub enum DiagError {
    #[error("Failed to parse catalog file: {0}")]
    CatalogParse(String),

    #[error("Invalid signal definition: {0}")]
    InvalidSignalDefinition(String),

    #[error("Duplicate signal '{signal}' in message '{message}'")]
    DuplicateSignal { message: String, signal: String },

    #[error("Duplicate message definition for CAN ID 0x{0:X}")]
    DuplicateMessage(u32),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Per-frame decode failures
///
/// The pipeline never propagates these; they are counted and logged so that
/// callers can tell unknown traffic apart from malformed frames.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Unknown CAN ID 0x{0:X}")]
    UnknownIdentifier(u32),

    #[error("Invalid DLC {dlc} for CAN ID 0x{id:X}")]
    InvalidDlc { id: u32, dlc: u8 },

    #[error("Signal '{signal}' of CAN ID 0x{id:X} needs {required} bytes but DLC is {dlc}")]
    ShortPayload {
        id: u32,
        signal: String,
        required: usize,
        dlc: u8,
    },
}

impl DecodeError {
    /// Unknown traffic is expected and not a fault
    pub fn is_unknown_identifier(&self) -> bool {
        matches!(self, DecodeError::UnknownIdentifier(_))
    }
}

/// Current wall-clock time as an ISO-8601 UTC string with a `Z` suffix
pub fn wall_clock_iso() -> String {
    format_iso(&Utc::now())
}

/// Format a wall-clock timestamp as ISO-8601 UTC with millisecond precision
pub fn format_iso(ts: &Timestamp) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}
