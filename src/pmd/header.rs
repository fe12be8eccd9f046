//! PMD module header layout

use serde::Serialize;
use std::fmt;

/// Number of u16 pointers in the channel pointer table
pub const POINTER_COUNT: usize = 12;

/// Header size: version byte, pointer table, instrument pointer
pub const HEADER_SIZE: usize = 1 + POINTER_COUNT * 2 + 2;

/// Pointers are stored relative to this offset
pub const POINTER_BASE: usize = 1;

/// Header offsets (in bytes)
pub mod offset {
    /// Format version byte
    pub const VERSION: usize = 0x00;
    /// First channel pointer (FM A)
    pub const POINTERS: usize = 0x01;
    /// Rhythm pattern table pointer (last entry of the table)
    pub const RHYTHM_TABLE: usize = 0x17;
    /// FM instrument table pointer
    pub const INSTRUMENTS: usize = 0x19;
}

/// Channel family, which decides pitch mapping and volume scale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Fm,
    Ssg,
    Adpcm,
    Rhythm,
}

/// One of the eleven PMD parts (A-K)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ChannelId(pub u8);

impl ChannelId {
    pub const COUNT: usize = 11;

    pub fn all() -> impl Iterator<Item = Self> {
        (0..Self::COUNT as u8).map(Self)
    }

    pub fn kind(self) -> ChannelKind {
        match self.0 {
            0..=5 => ChannelKind::Fm,
            6..=8 => ChannelKind::Ssg,
            9 => ChannelKind::Adpcm,
            _ => ChannelKind::Rhythm,
        }
    }

    /// Part letter as written in MML (A-K)
    pub fn letter(self) -> char {
        (b'A' + self.0) as char
    }

    pub fn name(self) -> &'static str {
        const NAMES: [&str; ChannelId::COUNT] = [
            "FM-A", "FM-B", "FM-C", "FM-D", "FM-E", "FM-F", "SSG-G", "SSG-H", "SSG-I", "ADPCM-J",
            "Rhythm-K",
        ];
        NAMES.get(self.0 as usize).copied().unwrap_or("?")
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parsed PMD header
#[derive(Debug, Clone, Default, Serialize)]
pub struct PmdHeader {
    pub version: u8,
    /// Absolute stream offsets per part (None when absent)
    pub channel_offsets: [Option<usize>; ChannelId::COUNT],
    pub rhythm_table_offset: Option<usize>,
    pub instrument_offset: Option<usize>,
}

impl PmdHeader {
    pub fn channel_offset(&self, id: ChannelId) -> Option<usize> {
        self.channel_offsets.get(id.0 as usize).copied().flatten()
    }
}

/// Convert a stored pointer into an absolute offset
pub fn resolve_pointer(raw: u16) -> Option<usize> {
    if raw == 0 {
        None
    } else {
        Some(raw as usize + POINTER_BASE)
    }
}
