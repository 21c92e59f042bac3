//! Frame Decoding Engine
//!
//! Extracts physical signal values from raw frames using catalog definitions.
//! Decoding is a pure function of the frame and the read-only catalog, so a
//! `FrameDecoder` can be shared across threads.

use crate::signals::database::{ByteOrder, Catalog, MessageDefinition, SignalDefinition, ValueType};
use crate::types::{DecodeError, DecodedSample, RawFrame};
use byteorder::{BigEndian, ByteOrder as _, LittleEndian};

/// Decodes raw frames against a catalog
#[derive(Debug, Clone, Copy)]
pub struct FrameDecoder<'a> {
    catalog: &'a Catalog,
    strict_dlc: bool,
}

impl<'a> FrameDecoder<'a> {
    /// Create a lenient decoder (short frames are zero-filled)
    pub fn new(catalog: &'a Catalog) -> Self {
        Self {
            catalog,
            strict_dlc: false,
        }
    }

    /// Builder method: reject frames whose DLC does not cover every signal
    pub fn with_strict_dlc(mut self, strict: bool) -> Self {
        self.strict_dlc = strict;
        self
    }

    /// Decode a frame into a lazy sequence of samples
    ///
    /// # Returns
    /// * `Ok(DecodedSamples)` - one sample per signal of the matching message
    /// * `Err(DecodeError::UnknownIdentifier)` - the catalog has no such message
    /// * `Err(DecodeError::InvalidDlc)` - DLC above 8
    /// * `Err(DecodeError::ShortPayload)` - strict mode only
    pub fn decode(&self, frame: &RawFrame) -> Result<DecodedSamples<'a>, DecodeError> {
        let message = self
            .catalog
            .get_message(frame.id)
            .ok_or(DecodeError::UnknownIdentifier(frame.id))?;

        if frame.dlc > RawFrame::MAX_DLC {
            return Err(DecodeError::InvalidDlc {
                id: frame.id,
                dlc: frame.dlc,
            });
        }

        let dlc = usize::from(frame.dlc);
        if let Some(short) = message.signals.iter().find(|s| s.required_bytes() > dlc) {
            if self.strict_dlc {
                return Err(DecodeError::ShortPayload {
                    id: frame.id,
                    signal: short.name.clone(),
                    required: short.required_bytes(),
                    dlc: frame.dlc,
                });
            }
            log::trace!(
                "Frame 0x{:X} has DLC {} but '{}' needs {} bytes, zero-filling",
                frame.id,
                frame.dlc,
                short.name,
                short.required_bytes()
            );
        }

        // Bytes beyond the DLC are padding; decode them as zero
        let mut payload = [0u8; 8];
        payload[..dlc].copy_from_slice(&frame.data[..dlc]);

        Ok(DecodedSamples {
            payload,
            timestamp_ms: frame.timestamp_ms,
            message,
            signals: message.signals.iter(),
        })
    }

    /// Decode a frame, treating any decode error as "no samples"
    pub fn samples(&self, frame: &RawFrame) -> impl Iterator<Item = DecodedSample> + 'a {
        self.decode(frame).into_iter().flatten()
    }
}

/// Lazy iterator over the samples of one decoded frame
#[derive(Debug, Clone)]
pub struct DecodedSamples<'a> {
    payload: [u8; 8],
    timestamp_ms: u64,
    message: &'a MessageDefinition,
    signals: std::slice::Iter<'a, SignalDefinition>,
}

impl<'a> DecodedSamples<'a> {
    /// The message definition that matched the frame
    pub fn message(&self) -> &'a MessageDefinition {
        self.message
    }
}

impl Iterator for DecodedSamples<'_> {
    type Item = DecodedSample;

    fn next(&mut self) -> Option<Self::Item> {
        let signal = self.signals.next()?;
        Some(DecodedSample {
            signal: signal.name.clone(),
            value: physical_value(&self.payload, signal),
            timestamp_ms: self.timestamp_ms,
            message: self.message.name.clone(),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.signals.size_hint()
    }
}

impl ExactSizeIterator for DecodedSamples<'_> {}

/// Apply the linear conversion to the extracted raw value
pub fn physical_value(payload: &[u8; 8], signal: &SignalDefinition) -> f64 {
    let raw = extract_raw(payload, signal);
    let raw = match signal.value_type {
        ValueType::Unsigned => raw as f64,
        ValueType::Signed => sign_extend(raw, usize::from(signal.length)) as f64,
    };
    raw * signal.factor + signal.offset
}

/// Extract the raw unsigned bits of a signal
///
/// The payload is read as one 64-bit word in the signal's byte order and the
/// signal occupies `length` bits upwards from `start_bit`.
pub fn extract_raw(payload: &[u8; 8], signal: &SignalDefinition) -> u64 {
    let word = match signal.byte_order {
        ByteOrder::LittleEndian => LittleEndian::read_u64(payload),
        ByteOrder::BigEndian => BigEndian::read_u64(payload),
    };
    let shifted = word >> signal.start_bit;
    if signal.length >= 64 {
        shifted
    } else {
        shifted & ((1u64 << signal.length) - 1)
    }
}

/// Sign-extend a value from N bits to 64 bits
fn sign_extend(value: u64, bit_length: usize) -> i64 {
    if bit_length >= 64 {
        return value as i64;
    }

    let sign_bit = 1u64 << (bit_length - 1);
    if (value & sign_bit) != 0 {
        let mask = !0u64 << bit_length;
        (value | mask) as i64
    } else {
        value as i64
    }
}
