use std::fmt::{Debug, Display, Formatter};
use std::ops::Range;

use log::debug;
use serde::Serialize;

use crate::geometry::{distances_between_rects, median, Rect};

/// Number of metadata bits encoded in the bottom row of a ballot card.
pub const METADATA_BITS: usize = 32;

/// Fixed bit pattern ending the metadata on the back of a ballot card.
pub const ENDER_CODE: [bool; 11] = [
    false, true, true, true, true, false, true, true, true, true, false,
];

fn bits_to_string(bits: &[bool]) -> String {
    bits.iter().map(|&bit| if bit { '1' } else { '0' }).collect()
}

/// Reads the little-endian number stored in `bits[range]`.
fn read_field(bits: &[bool; METADATA_BITS], range: Range<usize>) -> u16 {
    bits[range]
        .iter()
        .rev()
        .fold(0, |acc, &bit| (acc << 1) | u16::from(bit))
}

/// Metadata encoded by the bottom row of the front of a ballot card.
#[derive(Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrontMarksMetadata {
    /// Raw bits 0-31, least significant first.
    pub bits: [bool; METADATA_BITS],

    /// Mod 4 checksum from bits 0-1.
    pub mod_4_checksum: u8,

    /// Number of 1 bits in bits 2-31, mod 4.
    pub computed_mod_4_checksum: u8,

    /// Bits 2-14.
    pub batch_or_precinct_number: u16,

    /// Bits 15-27.
    pub card_number: u16,

    /// Bits 28-30, expected to be 0.
    pub sequence_number: u8,

    /// Bit 31, expected to be 1.
    pub start_bit: u8,
}

impl FrontMarksMetadata {
    /// Decodes `bits` as the front of a ballot card. The checksum must match,
    /// the sequence number must be 0 and the start bit must be set.
    pub fn decode(bits: &[bool; METADATA_BITS]) -> Result<FrontMarksMetadata, MetadataError> {
        let computed_mod_4_checksum = (bits[2..].iter().filter(|&&bit| bit).count() % 4) as u8;
        let metadata = FrontMarksMetadata {
            bits: *bits,
            mod_4_checksum: read_field(bits, 0..2) as u8,
            computed_mod_4_checksum,
            batch_or_precinct_number: read_field(bits, 2..15),
            card_number: read_field(bits, 15..28),
            sequence_number: read_field(bits, 28..31) as u8,
            start_bit: u8::from(bits[31]),
        };

        if metadata.mod_4_checksum != metadata.computed_mod_4_checksum {
            return Err(MetadataError::InvalidChecksum {
                expected: metadata.computed_mod_4_checksum,
                actual: metadata.mod_4_checksum,
            });
        }

        if metadata.sequence_number != 0 {
            return Err(MetadataError::ValueOutOfRange {
                field: "sequence_number",
                value: metadata.sequence_number.into(),
                min: 0,
                max: 0,
            });
        }

        if metadata.start_bit != 1 {
            return Err(MetadataError::ValueOutOfRange {
                field: "start_bit",
                value: metadata.start_bit.into(),
                min: 1,
                max: 1,
            });
        }

        Ok(metadata)
    }
}

impl Debug for FrontMarksMetadata {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrontMarksMetadata")
            .field("bits", &bits_to_string(&self.bits))
            .field("mod_4_checksum", &self.mod_4_checksum)
            .field("computed_mod_4_checksum", &self.computed_mod_4_checksum)
            .field("batch_or_precinct_number", &self.batch_or_precinct_number)
            .field("card_number", &self.card_number)
            .field("sequence_number", &self.sequence_number)
            .field("start_bit", &self.start_bit)
            .finish()
    }
}

/// Metadata encoded by the bottom row of the back of a ballot card.
#[derive(Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackMarksMetadata {
    /// Raw bits 0-31, least significant first.
    pub bits: [bool; METADATA_BITS],

    /// Day of month (1..31) from bits 0-4.
    pub election_day: u8,

    /// Month (1..12) from bits 5-8.
    pub election_month: u8,

    /// Two digit year from bits 9-15.
    pub election_year: u8,

    /// Election type from bits 16-20, an index into A-Z.
    pub election_type: u8,

    /// Bits 21-31.
    pub ender_code: [bool; 11],

    pub expected_ender_code: [bool; 11],
}

impl BackMarksMetadata {
    /// Decodes `bits` as the back of a ballot card. Only the ender code decides
    /// whether the bits are valid.
    pub fn decode(bits: &[bool; METADATA_BITS]) -> Result<BackMarksMetadata, MetadataError> {
        let mut ender_code = [false; 11];
        ender_code.copy_from_slice(&bits[21..32]);

        let metadata = BackMarksMetadata {
            bits: *bits,
            election_day: read_field(bits, 0..5) as u8,
            election_month: read_field(bits, 5..9) as u8,
            election_year: read_field(bits, 9..16) as u8,
            election_type: read_field(bits, 16..21) as u8,
            ender_code,
            expected_ender_code: ENDER_CODE,
        };

        if metadata.ender_code != metadata.expected_ender_code {
            return Err(MetadataError::InvalidEnderCode { actual: ender_code });
        }

        Ok(metadata)
    }

    /// The election type as a letter, e.g. 'G' for a general election. Values
    /// past 'Z' have no letter.
    pub fn election_type_letter(&self) -> Option<char> {
        (self.election_type < 26).then(|| char::from(b'A' + self.election_type))
    }
}

impl Debug for BackMarksMetadata {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackMarksMetadata")
            .field("bits", &bits_to_string(&self.bits))
            .field("election_day", &self.election_day)
            .field("election_month", &self.election_month)
            .field("election_year", &self.election_year)
            .field("election_type", &self.election_type_letter())
            .field("ender_code", &bits_to_string(&self.ender_code))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "side", rename_all = "camelCase")]
pub enum BallotPageMetadata {
    Front(FrontMarksMetadata),
    Back(BackMarksMetadata),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataError {
    InvalidBitCount { expected: usize, actual: usize },
    InvalidChecksum { expected: u8, actual: u8 },
    InvalidEnderCode { actual: [bool; 11] },
    ValueOutOfRange {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },
    AmbiguousMetadata {
        front: FrontMarksMetadata,
        back: BackMarksMetadata,
    },
    NoValidInterpretation { bits: Vec<bool> },
}

impl Display for MetadataError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            MetadataError::InvalidBitCount { expected, actual } => {
                write!(f, "expected {} metadata bits, got {}", expected, actual)
            }
            MetadataError::InvalidChecksum { expected, actual } => {
                write!(f, "invalid checksum: expected {}, got {}", expected, actual)
            }
            MetadataError::InvalidEnderCode { actual } => {
                write!(
                    f,
                    "invalid ender code: expected {}, got {}",
                    bits_to_string(&ENDER_CODE),
                    bits_to_string(actual)
                )
            }
            MetadataError::ValueOutOfRange {
                field,
                value,
                min,
                max,
            } => {
                write!(
                    f,
                    "value {} for field {} is out of range [{}, {}]",
                    value, field, min, max
                )
            }
            MetadataError::AmbiguousMetadata { front, back } => {
                write!(
                    f,
                    "bits are both front metadata {:?} and back metadata {:?}",
                    front, back
                )
            }
            MetadataError::NoValidInterpretation { bits } => {
                write!(
                    f,
                    "bits {} are neither front nor back metadata in either direction",
                    bits_to_string(bits)
                )
            }
        }
    }
}

impl std::error::Error for MetadataError {}

/// Reads the bits encoded by the bottom row of timing marks, using the top row
/// as the reference for where each mark would be and the bottom left corner
/// mark as the origin. Returns one bit per non-corner column, least
/// significant first for an upright page.
///
/// Returns `None` if the top row is too short to measure spacing against.
pub fn decode_bottom_row_timing_marks(
    top: &[Rect],
    bottom: &[Rect],
    bottom_left_corner: &Rect,
) -> Option<Vec<bool>> {
    if top.len() < 3 {
        return None;
    }
    let spacing = median(&distances_between_rects(top)).filter(|spacing| *spacing > 0.0)?;
    let bit_count = top.len() - 2;

    let mut bits_left_to_right = vec![false; bit_count];
    for mark in bottom {
        let index = ((mark.right() - bottom_left_corner.right()) as f32 / spacing - 1.0).round();
        if index >= 0.0 && (index as usize) < bit_count {
            bits_left_to_right[index as usize] = true;
        }
    }

    // The least significant bit is on the right of an upright page. If the
    // top row sits below the bottom row, the page is upside down and the
    // order flips.
    let upside_down = top[0].top() > bottom_left_corner.top();
    if !upside_down {
        bits_left_to_right.reverse();
    }
    Some(bits_left_to_right)
}

/// Decodes metadata bits as front or back metadata, first in the given order
/// and then reversed. Bits that are valid as both a front and a back are
/// rejected as ambiguous.
pub fn decode_metadata_bits(bits: &[bool]) -> Result<BallotPageMetadata, MetadataError> {
    let forward: [bool; METADATA_BITS] =
        bits.try_into().map_err(|_| MetadataError::InvalidBitCount {
            expected: METADATA_BITS,
            actual: bits.len(),
        })?;
    let mut reversed = forward;
    reversed.reverse();

    let mut front = None;
    let mut back = None;
    for (direction, candidate) in [("forward", &forward), ("reversed", &reversed)] {
        if front.is_none() {
            match FrontMarksMetadata::decode(candidate) {
                Ok(metadata) => front = Some(metadata),
                Err(e) => debug!("bits {} are not front metadata: {}", direction, e),
            }
        }
        if back.is_none() {
            match BackMarksMetadata::decode(candidate) {
                Ok(metadata) => back = Some(metadata),
                Err(e) => debug!("bits {} are not back metadata: {}", direction, e),
            }
        }
    }

    match (front, back) {
        (Some(front), Some(back)) => Err(MetadataError::AmbiguousMetadata { front, back }),
        (Some(front), None) => Ok(BallotPageMetadata::Front(front)),
        (None, Some(back)) => Ok(BallotPageMetadata::Back(back)),
        (None, None) => Err(MetadataError::NoValidInterpretation {
            bits: bits.to_vec(),
        }),
    }
}
