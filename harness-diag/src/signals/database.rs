//! Signal catalog
//!
//! Static mapping from CAN identifier to message schema. The catalog is built
//! once at startup, validated as definitions are added, and read-only for the
//! rest of the process.

use crate::types::{DiagError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Payload width covered by a signal's bit positions
pub const PAYLOAD_BITS: u16 = 64;

/// A CAN message definition
#[derive(Debug, Clone, PartialEq)]
pub struct MessageDefinition {
    /// CAN message ID
    pub id: u32,
    /// Message name
    pub name: String,
    /// Expected message size in bytes
    pub size: usize,
    /// Sender ECU name (optional)
    pub sender: Option<String>,
    /// Signals in declaration order
    pub signals: Vec<SignalDefinition>,
    /// Source file (DBC filename, or "inline" for programmatic definitions)
    pub source: String,
}

impl MessageDefinition {
    pub fn new(id: u32, name: impl Into<String>, size: usize) -> Self {
        Self {
            id,
            name: name.into(),
            size,
            sender: None,
            signals: Vec::new(),
            source: "inline".to_string(),
        }
    }

    /// Builder method: append a signal
    pub fn with_signal(mut self, signal: SignalDefinition) -> Self {
        self.signals.push(signal);
        self
    }

    /// Builder method: set the sender ECU
    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }
}

/// A CAN signal definition
///
/// Bit positions index the 64-bit word formed from the 8 payload bytes in the
/// signal's byte order: bit 0 is the least-significant bit of that word, so
/// for little-endian signals it is the LSB of byte 0 and for big-endian
/// signals the LSB of byte 7.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalDefinition {
    /// Signal name, unique within its message
    pub name: String,
    /// Position of the signal's least-significant bit (0-63)
    pub start_bit: u16,
    /// Length in bits (1-64)
    pub length: u16,
    /// Byte order used to assemble the payload word
    pub byte_order: ByteOrder,
    /// Raw value interpretation
    pub value_type: ValueType,
    /// Scale factor to convert raw value to physical value
    pub factor: f64,
    /// Offset to add after scaling
    pub offset: f64,
    /// Advisory minimum physical value
    pub min: Option<f64>,
    /// Advisory maximum physical value
    pub max: Option<f64>,
    /// Engineering unit (e.g. "V")
    pub unit: Option<String>,
}

impl SignalDefinition {
    /// Create an unsigned, unscaled signal
    pub fn new(name: impl Into<String>, start_bit: u16, length: u16, byte_order: ByteOrder) -> Self {
        Self {
            name: name.into(),
            start_bit,
            length,
            byte_order,
            value_type: ValueType::Unsigned,
            factor: 1.0,
            offset: 0.0,
            min: None,
            max: None,
            unit: None,
        }
    }

    /// Builder method: set the linear conversion
    pub fn with_scale(mut self, factor: f64, offset: f64) -> Self {
        self.factor = factor;
        self.offset = offset;
        self
    }

    /// Builder method: set the raw value interpretation
    pub fn with_value_type(mut self, value_type: ValueType) -> Self {
        self.value_type = value_type;
        self
    }

    /// Builder method: set the advisory physical range
    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    /// Builder method: set the engineering unit
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Number of leading payload bytes that must be present to cover the signal
    pub fn required_bytes(&self) -> usize {
        let low = usize::from(self.start_bit);
        let high = low + usize::from(self.length).max(1) - 1;
        match self.byte_order {
            ByteOrder::LittleEndian => high / 8 + 1,
            // Byte 0 carries the most significant bits of the word
            ByteOrder::BigEndian => 8 - low / 8,
        }
    }

    /// Check the definition against the payload width
    pub fn validate(&self) -> Result<()> {
        if self.length == 0 || self.length > PAYLOAD_BITS {
            return Err(DiagError::InvalidSignalDefinition(format!(
                "signal '{}' has length {} (expected 1-{})",
                self.name, self.length, PAYLOAD_BITS
            )));
        }
        let end = u32::from(self.start_bit) + u32::from(self.length);
        if end > u32::from(PAYLOAD_BITS) {
            return Err(DiagError::InvalidSignalDefinition(format!(
                "signal '{}' spans bits {}..{} beyond the {}-bit payload",
                self.name, self.start_bit, end, PAYLOAD_BITS
            )));
        }
        if !self.factor.is_finite() || !self.offset.is_finite() {
            return Err(DiagError::InvalidSignalDefinition(format!(
                "signal '{}' has a non-finite scale or offset",
                self.name
            )));
        }
        Ok(())
    }
}

/// Byte order for signal extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteOrder {
    /// Little-endian (Intel format), byte 0 least significant
    LittleEndian,
    /// Big-endian (Motorola format), byte 0 most significant
    BigEndian,
}

/// Value type for signal interpretation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    /// Two's-complement signed integer
    Signed,
    /// Unsigned integer
    #[default]
    Unsigned,
}

/// The signal catalog
#[derive(Debug, Default)]
pub struct Catalog {
    /// Message definitions by CAN ID
    messages: HashMap<u32, MessageDefinition>,

    /// Signal name lookup
    /// Key: Signal name, Value: List of (CAN ID, signal index) tuples
    signal_lookup: HashMap<String, Vec<(u32, usize)>>,

    /// Message name lookup
    message_lookup: HashMap<String, u32>,
}

impl Catalog {
    /// Create a new empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog from one or more DBC files
    pub fn from_dbc_files<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let mut catalog = Self::new();
        for path in paths {
            catalog.add_dbc(path.as_ref())?;
        }
        Ok(catalog)
    }

    /// Load a DBC file and add its messages to the catalog
    pub fn add_dbc(&mut self, path: &Path) -> Result<()> {
        log::info!("Loading DBC file: {:?}", path);

        let messages = crate::signals::dbc::parse_dbc_file(path)?;
        for message in messages {
            self.add_message(message)?;
        }

        log::info!("DBC file loaded successfully: {:?}", path);
        Ok(())
    }

    /// Validate and add a message definition
    pub fn add_message(&mut self, message: MessageDefinition) -> Result<()> {
        let can_id = message.id;
        if self.messages.contains_key(&can_id) {
            return Err(DiagError::DuplicateMessage(can_id));
        }

        for (sig_idx, signal) in message.signals.iter().enumerate() {
            signal.validate()?;
            if message.signals[..sig_idx].iter().any(|s| s.name == signal.name) {
                return Err(DiagError::DuplicateSignal {
                    message: message.name.clone(),
                    signal: signal.name.clone(),
                });
            }
        }

        for (sig_idx, signal) in message.signals.iter().enumerate() {
            let locations = self.signal_lookup.entry(signal.name.clone()).or_default();
            if !locations.is_empty() {
                log::warn!(
                    "Signal '{}' is defined by more than one message; live values will be shared",
                    signal.name
                );
            }
            locations.push((can_id, sig_idx));
        }

        self.message_lookup.insert(message.name.clone(), can_id);
        self.messages.insert(can_id, message);
        Ok(())
    }

    /// Get the message definition for a CAN ID
    pub fn get_message(&self, can_id: u32) -> Option<&MessageDefinition> {
        self.messages.get(&can_id)
    }

    /// Get a message definition by name
    pub fn get_message_by_name(&self, message_name: &str) -> Option<&MessageDefinition> {
        self.message_lookup
            .get(message_name)
            .and_then(|can_id| self.messages.get(can_id))
    }

    /// Find all messages containing a specific signal name
    pub fn find_signal(&self, signal_name: &str) -> Vec<(u32, &SignalDefinition)> {
        self.signal_lookup
            .get(signal_name)
            .map(|locations| {
                locations
                    .iter()
                    .filter_map(|(can_id, sig_idx)| {
                        self.get_message(*can_id)
                            .and_then(|msg| msg.signals.get(*sig_idx))
                            .map(|sig| (*can_id, sig))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// True if any message defines the signal
    pub fn has_signal(&self, signal_name: &str) -> bool {
        self.signal_lookup.contains_key(signal_name)
    }

    /// Get catalog statistics
    pub fn stats(&self) -> CatalogStats {
        CatalogStats {
            num_messages: self.messages.len(),
            num_signals: self.messages.values().map(|msg| msg.signals.len()).sum(),
        }
    }

    /// Messages ordered by CAN ID
    pub fn messages(&self) -> Vec<&MessageDefinition> {
        let mut messages: Vec<&MessageDefinition> = self.messages.values().collect();
        messages.sort_unstable_by_key(|msg| msg.id);
        messages
    }
}

/// Catalog statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogStats {
    /// Total number of message definitions
    pub num_messages: usize,
    /// Total number of signal definitions
    pub num_signals: usize,
}
