//! Furnace module constants

/// File magic at offset 0
pub const FUR_MAGIC: &[u8; 16] = b"-Furnace module-";

/// Format version written to every header and instrument
pub const FUR_VERSION: u16 = 228;

/// Magic, version, reserved, info pointer, reserved
pub const FUR_HEADER_SIZE: usize = 32;

/// Maximum chip slots in the INFO block
pub const MAX_CHIPS: usize = 32;

/// YM2608 (OPNA) chip id
pub const CHIP_YM2608: u8 = 0x8E;

/// YM2608 channels: 6 FM, 3 SSG, 1 ADPCM-B, 6 ADPCM-A
pub const CHANNEL_COUNT: usize = 16;

/// Engine tick rate in Hz
pub const TICK_RATE: f32 = 60.0;

/// Order list length limit
pub const MAX_ORDERS: usize = 256;

/// Row count limit of one pattern
pub const MAX_PATTERN_LENGTH: usize = 256;

/// Effect columns per channel limit
pub const MAX_EFFECT_COLUMNS: usize = 8;

/// Special note values
pub mod note {
    pub const OFF: u8 = 180;
    pub const RELEASE: u8 = 181;
}

/// Block identifiers
pub mod block {
    pub const INFO: &[u8; 4] = b"INFO";
    pub const INS2: &[u8; 4] = b"INS2";
    pub const PATN: &[u8; 4] = b"PATN";
    pub const ADIR: &[u8; 4] = b"ADIR";
}

/// Instrument types
pub mod ins_type {
    pub const FM: u16 = 1;
    pub const AY: u16 = 6;
}

/// Effect codes used by the converter
pub mod effect {
    /// 08xy: panning (x = left, y = right)
    pub const PAN: u8 = 0x08;
    /// 0Bxx: jump to order
    pub const JUMP: u8 = 0x0B;
    /// E1xy: note slide up (x = speed, y = semitones)
    pub const SLIDE_UP: u8 = 0xE1;
    /// E2xy: note slide down; E200 stops a slide
    pub const SLIDE_DOWN: u8 = 0xE2;
    /// E5xx: pitch offset, 80 = centre
    pub const DETUNE: u8 = 0xE5;
    /// ECxx: cut after xx ticks
    pub const NOTE_CUT: u8 = 0xEC;
    /// FDxx: virtual tempo numerator
    pub const VIRTUAL_TEMPO: u8 = 0xFD;
}

/// Furnace channel for a PMD part; ADPCM and rhythm have none
pub fn channel_for(id: crate::pmd::ChannelId) -> Option<usize> {
    use crate::pmd::ChannelKind;
    match id.kind() {
        ChannelKind::Fm | ChannelKind::Ssg => Some(id.0 as usize),
        _ => None,
    }
}
