//! DBC file parser
//!
//! Parses Vector DBC files and converts them into catalog definitions.

use crate::signals::database::{ByteOrder, MessageDefinition, SignalDefinition, ValueType, PAYLOAD_BITS};
use crate::types::{DiagError, Result};
use std::path::Path;

/// DBC marks extended identifiers by setting bit 31
const DBC_EXTENDED_ID_MASK: u32 = 0x1FFF_FFFF;

/// Parse a DBC file and return message definitions
pub fn parse_dbc_file(path: &Path) -> Result<Vec<MessageDefinition>> {
    log::info!("Parsing DBC file: {:?}", path);

    let bytes = std::fs::read(path).map_err(|e| {
        DiagError::CatalogParse(format!("Failed to read file {:?}: {}", path, e))
    })?;

    // Try UTF-8 first, then fall back to Latin-1 (compatible with Windows-1252)
    let content = match String::from_utf8(bytes) {
        Ok(content) => content,
        Err(err) => {
            log::warn!("DBC file is not UTF-8, trying Latin-1 encoding");
            err.into_bytes().iter().map(|&b| b as char).collect()
        }
    };

    let source = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown.dbc");

    let messages = parse_dbc_str(&content, source)?;
    log::info!("Parsed {} messages from {:?}", messages.len(), path);
    Ok(messages)
}

/// Parse DBC text
pub fn parse_dbc_str(content: &str, source: &str) -> Result<Vec<MessageDefinition>> {
    let dbc = can_dbc::DBC::from_slice(content.as_bytes()).map_err(|e| {
        DiagError::CatalogParse(format!("Failed to parse DBC {}: {:?}", source, e))
    })?;

    dbc.messages()
        .iter()
        .map(|dbc_msg| convert_message(dbc_msg, source))
        .collect()
}

/// Convert a can-dbc message to our MessageDefinition
fn convert_message(dbc_msg: &can_dbc::Message, source: &str) -> Result<MessageDefinition> {
    let mut signals = Vec::new();

    for dbc_sig in dbc_msg.signals() {
        if matches!(
            dbc_sig.multiplexer_indicator(),
            can_dbc::MultiplexIndicator::MultiplexedSignal(_)
        ) {
            log::warn!(
                "Skipping multiplexed signal '{}' in message '{}'",
                dbc_sig.name(),
                dbc_msg.message_name()
            );
            continue;
        }
        signals.push(convert_signal(dbc_sig)?);
    }

    Ok(MessageDefinition {
        id: dbc_msg.message_id().0 & DBC_EXTENDED_ID_MASK,
        name: dbc_msg.message_name().to_string(),
        size: *dbc_msg.message_size() as usize,
        sender: match dbc_msg.transmitter() {
            can_dbc::Transmitter::NodeName(name) => Some(name.to_string()),
            _ => None,
        },
        signals,
        source: source.to_string(),
    })
}

/// Convert a can-dbc signal to our SignalDefinition
fn convert_signal(dbc_sig: &can_dbc::Signal) -> Result<SignalDefinition> {
    let length = *dbc_sig.signal_size();
    if length == 0 || length > u64::from(PAYLOAD_BITS) {
        return Err(DiagError::InvalidSignalDefinition(format!(
            "signal '{}' has length {}",
            dbc_sig.name(),
            length
        )));
    }

    let (byte_order, start_bit) = match *dbc_sig.byte_order() {
        can_dbc::ByteOrder::LittleEndian => (ByteOrder::LittleEndian, *dbc_sig.start_bit()),
        can_dbc::ByteOrder::BigEndian => (
            ByteOrder::BigEndian,
            motorola_lsb_position(dbc_sig.name(), *dbc_sig.start_bit(), length)?,
        ),
    };

    let value_type = match *dbc_sig.value_type() {
        can_dbc::ValueType::Signed => ValueType::Signed,
        can_dbc::ValueType::Unsigned => ValueType::Unsigned,
    };

    let (min, max) = (*dbc_sig.min(), *dbc_sig.max());
    // DBC writes [0|0] when no range is declared
    let range = if min == 0.0 && max == 0.0 {
        (None, None)
    } else {
        (Some(min), Some(max))
    };

    let start_bit = u16::try_from(start_bit).map_err(|_| {
        DiagError::InvalidSignalDefinition(format!(
            "signal '{}' has start bit {} beyond the {}-bit payload",
            dbc_sig.name(),
            start_bit,
            PAYLOAD_BITS
        ))
    })?;

    let signal = SignalDefinition {
        name: dbc_sig.name().to_string(),
        start_bit,
        length: length as u16,
        byte_order,
        value_type,
        factor: *dbc_sig.factor(),
        offset: *dbc_sig.offset(),
        min: range.0,
        max: range.1,
        unit: if dbc_sig.unit().is_empty() {
            None
        } else {
            Some(dbc_sig.unit().to_string())
        },
    };
    signal.validate()?;
    Ok(signal)
}

/// Translate a DBC Motorola start bit into an LSB position in the big-endian word
///
/// DBC numbers Motorola bits per byte (byte = bit / 8, bit 7 = MSB of the
/// byte) and the start bit names the signal's most significant bit.
fn motorola_lsb_position(name: &str, dbc_start: u64, length: u64) -> Result<u64> {
    let byte = dbc_start / 8;
    if byte > 7 {
        return Err(DiagError::InvalidSignalDefinition(format!(
            "signal '{}' starts in byte {} beyond the 8-byte payload",
            name, byte
        )));
    }
    let msb = (7 - byte) * 8 + dbc_start % 8;
    msb.checked_sub(length - 1).ok_or_else(|| {
        DiagError::InvalidSignalDefinition(format!(
            "signal '{}' ({} bits from Motorola start bit {}) runs past the payload end",
            name, length, dbc_start
        ))
    })
}
