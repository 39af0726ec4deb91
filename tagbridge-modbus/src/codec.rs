//! Read planning and raw word decoding.
//!
//! Tags sharing a register function are read with one bulk request covering
//! `[min(address), max(address + width - 1)]`; each tag is then decoded at its
//! offset into the response.

use tagbridge_common::TagValue;

use crate::tags::{DataType, RegisterFunction, TagDefinition};

/// Modbus limit for one holding/input register read.
pub const MAX_REGISTERS_PER_READ: u32 = 125;

/// Modbus limit for one coil/discrete read.
pub const MAX_BITS_PER_READ: u32 = 2000;

/// Inclusive address span of one bulk read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressRange {
    pub start: u16,
    /// Last covered address; may exceed `u16::MAX` for a malformed tag set.
    pub end: u32,
}

impl AddressRange {
    /// Number of points covered.
    pub fn count(&self) -> u32 {
        self.end - u32::from(self.start) + 1
    }

    /// Offset of `address` from the start of the range.
    pub fn offset_of(&self, address: u16) -> usize {
        usize::from(address - self.start)
    }
}

/// Smallest range covering every tag's full footprint.
///
/// Returns `None` for an empty tag set.
pub fn covering_range<'a, I>(tags: I) -> Option<AddressRange>
where
    I: IntoIterator<Item = &'a TagDefinition>,
{
    tags.into_iter().fold(None, |acc, tag| {
        let start = tag.address;
        let end = u32::from(tag.address) + u32::from(tag.width()) - 1;
        Some(match acc {
            None => AddressRange { start, end },
            Some(r) => AddressRange {
                start: r.start.min(start),
                end: r.end.max(end),
            },
        })
    })
}

/// Per-request point limit for a function.
pub fn read_limit(function: RegisterFunction) -> u32 {
    if function.is_bit() {
        MAX_BITS_PER_READ
    } else {
        MAX_REGISTERS_PER_READ
    }
}

/// Split tags into one group per register function, preserving order.
///
/// Functions without tags are omitted.
pub fn group_by_function(
    tags: &[TagDefinition],
) -> Vec<(RegisterFunction, Vec<&TagDefinition>)> {
    RegisterFunction::ALL
        .iter()
        .filter_map(|&function| {
            let group: Vec<_> = tags.iter().filter(|t| t.function == function).collect();
            (!group.is_empty()).then_some((function, group))
        })
        .collect()
}

/// Reassemble an IEEE-754 float from two words, high word first.
pub fn f32_from_words(high: u16, low: u16) -> f32 {
    f32::from_bits((u32::from(high) << 16) | u32::from(low))
}

/// Split a float into two words, high word first.
pub fn f32_to_words(value: f32) -> [u16; 2] {
    let bits = value.to_bits();
    [(bits >> 16) as u16, (bits & 0xFFFF) as u16]
}

/// Two's-complement interpretation of a register.
pub fn i16_from_word(word: u16) -> i16 {
    word as i16
}

/// Decode a tag from a register response.
///
/// `None` when the response is too short to cover the tag.
pub fn decode_register(words: &[u16], offset: usize, data_type: DataType) -> Option<TagValue> {
    let value = match data_type {
        DataType::Float32 => {
            let high = *words.get(offset)?;
            let low = *words.get(offset + 1)?;
            TagValue::Float(f64::from(f32_from_words(high, low)))
        }
        DataType::Int16 => TagValue::Integer(i64::from(i16_from_word(*words.get(offset)?))),
        DataType::UInt16 => TagValue::Integer(i64::from(*words.get(offset)?)),
        DataType::Bool => TagValue::Bool(*words.get(offset)? != 0),
    };
    Some(value)
}

/// Decode a tag from a coil/discrete response.
///
/// Numeric tags placed in a bit table read as 0 or 1.
pub fn decode_bit(bits: &[bool], offset: usize, data_type: DataType) -> Option<TagValue> {
    let bit = *bits.get(offset)?;
    Some(match data_type {
        DataType::Bool => TagValue::Bool(bit),
        _ => TagValue::Integer(i64::from(bit)),
    })
}
