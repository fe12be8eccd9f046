//! Note number mapping between PMD and Furnace

use crate::pmd::ChannelKind;

/// Highest playable Furnace note (B-9)
pub const NOTE_MAX: i32 = 179;

/// Semitones per octave
pub const OCTAVE: i32 = 12;

/// Octave offset from PMD to Furnace numbering.
///
/// SSG parts sound one octave above FM parts for the same PMD octave.
pub fn octave_offset(kind: ChannelKind) -> i32 {
    match kind {
        ChannelKind::Ssg => 6,
        _ => 5,
    }
}

/// Map a PMD octave/pitch pair plus transpose to a Furnace note number
pub fn to_furnace(kind: ChannelKind, octave: u8, pitch: u8, transpose: i32) -> Option<u8> {
    let note = (octave as i32 + octave_offset(kind)) * OCTAVE + pitch as i32 + transpose;
    if (0..=NOTE_MAX).contains(&note) {
        Some(note as u8)
    } else {
        None
    }
}

/// Split a packed portamento note byte (octave in the high nibble)
pub fn unpack(byte: u8) -> (u8, u8) {
    ((byte >> 4) & 0x07, byte & 0x0F)
}
