//! PATN row data encoding
//!
//! Each row starts with a mask byte: bit 0 note, bit 1 instrument, bit 2
//! volume, bits 3/4 effect 0 type/value, bit 5 an extra mask byte for
//! effects 0-3 follows, bit 6 one for effects 4-7 follows. A byte with bit 7
//! set skips `(b & 0x7F) + 2` rows, 0x00 skips one row and 0xFF ends the
//! pattern.

use crate::converter::quantize::Effect;
use crate::error::{Error, Result};

/// End of pattern marker
pub const PATTERN_END: u8 = 0xFF;

/// Longest run one skip byte can express
const MAX_SKIP: usize = 128;

mod mask {
    pub const NOTE: u16 = 1;
    pub const INSTRUMENT: u16 = 2;
    pub const VOLUME: u16 = 4;
    pub const EFFECT0_TYPE: u16 = 8;
    pub const EFFECT0_VALUE: u16 = 16;
    pub const EFFECTS_LOW: u16 = 32;
    pub const EFFECTS_HIGH: u16 = 64;
    pub const SKIP: u8 = 0x80;
}

/// A row with instrument indices and note values already resolved
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatternRow {
    pub note: Option<u8>,
    pub instrument: Option<u8>,
    pub volume: Option<u8>,
    pub effects: Vec<Effect>,
}

impl PatternRow {
    pub fn is_empty(&self) -> bool {
        self.note.is_none()
            && self.instrument.is_none()
            && self.volume.is_none()
            && self.effects.is_empty()
    }
}

/// Append skip bytes covering `count` empty rows
pub fn write_skip(out: &mut Vec<u8>, mut count: usize) {
    while count > 0 {
        if count >= MAX_SKIP {
            out.push(mask::SKIP | 0x7E);
            count -= MAX_SKIP;
        } else if count >= 2 {
            out.push(mask::SKIP | (count - 2) as u8);
            count = 0;
        } else {
            out.push(0x00);
            count -= 1;
        }
    }
}

/// Append one non-empty row
pub fn write_row(out: &mut Vec<u8>, row: &PatternRow) {
    let mut bits: u32 = 0;
    let mut payload = Vec::with_capacity(20);

    if let Some(note) = row.note {
        bits |= mask::NOTE as u32;
        payload.push(note);
    }
    if let Some(ins) = row.instrument {
        bits |= mask::INSTRUMENT as u32;
        payload.push(ins);
    }
    if let Some(vol) = row.volume {
        bits |= mask::VOLUME as u32;
        payload.push(vol);
    }

    let effects = &row.effects[..row.effects.len().min(8)];
    let mut mask_len = 1;
    match effects.len() {
        0 => {}
        1 => bits |= (mask::EFFECT0_TYPE | mask::EFFECT0_VALUE) as u32,
        n => {
            bits |= (mask::EFFECT0_TYPE | mask::EFFECT0_VALUE | mask::EFFECTS_LOW) as u32;
            mask_len = 2;
            if n > 4 {
                bits |= mask::EFFECTS_HIGH as u32;
                mask_len = 3;
            }
            for i in 0..n {
                bits |= 0b11 << (8 + 2 * i);
            }
        }
    }
    for fx in effects {
        payload.push(fx.code);
        payload.push(fx.value);
    }

    out.extend_from_slice(&bits.to_le_bytes()[..mask_len]);
    out.extend_from_slice(&payload);
}

/// Encode a full pattern, compressing empty runs
pub fn encode(rows: &[PatternRow]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut empty = 0;
    for row in rows {
        if row.is_empty() {
            empty += 1;
            continue;
        }
        write_skip(&mut out, empty);
        empty = 0;
        write_row(&mut out, row);
    }
    out.push(PATTERN_END);
    out
}

/// Decode pattern data into exactly `length` rows
pub fn decode(data: &[u8], length: usize) -> Result<Vec<PatternRow>> {
    let mut rows = Vec::with_capacity(length);
    let mut pos = 0;
    let truncated = || Error::FurParse("pattern data ended early".into());

    while rows.len() < length {
        let b = *data.get(pos).ok_or_else(truncated)?;
        pos += 1;
        if b == PATTERN_END {
            break;
        }
        if b & mask::SKIP != 0 {
            let count = (b & 0x7F) as usize + 2;
            rows.extend(std::iter::repeat_with(PatternRow::default).take(count));
            continue;
        }
        if b == 0 {
            rows.push(PatternRow::default());
            continue;
        }

        let bits = b as u16;
        let mut fx_bits: u16 = 0;
        if bits & mask::EFFECTS_LOW != 0 {
            fx_bits |= *data.get(pos).ok_or_else(truncated)? as u16;
            pos += 1;
        }
        if bits & mask::EFFECTS_HIGH != 0 {
            fx_bits |= (*data.get(pos).ok_or_else(truncated)? as u16) << 8;
            pos += 1;
        }
        if bits & mask::EFFECT0_TYPE != 0 {
            fx_bits |= 1;
        }
        if bits & mask::EFFECT0_VALUE != 0 {
            fx_bits |= 2;
        }

        let mut next = || -> Result<u8> {
            let v = *data.get(pos).ok_or_else(truncated)?;
            pos += 1;
            Ok(v)
        };

        let mut row = PatternRow::default();
        if bits & mask::NOTE != 0 {
            row.note = Some(next()?);
        }
        if bits & mask::INSTRUMENT != 0 {
            row.instrument = Some(next()?);
        }
        if bits & mask::VOLUME != 0 {
            row.volume = Some(next()?);
        }
        for i in 0..8 {
            let has_type = fx_bits & (1 << (2 * i)) != 0;
            let has_value = fx_bits & (2 << (2 * i)) != 0;
            if !has_type && !has_value {
                continue;
            }
            let code = if has_type { next()? } else { 0 };
            let value = if has_value { next()? } else { 0 };
            row.effects.push(Effect::new(code, value));
        }
        rows.push(row);
    }

    rows.resize_with(length, PatternRow::default);
    Ok(rows)
}
