//! Furnace module reader
//!
//! Understands the subset of the format this crate writes: one YM2608
//! song, FM and AY instruments, PATN pattern blocks.

use super::header::{block, ins_type, CHANNEL_COUNT, FUR_MAGIC, MAX_CHIPS};
use super::pattern::{self, PatternRow};
use crate::error::{Error, Result};
use crate::pmd::{FmOperator, FmVoice};
use flate2::read::ZlibDecoder;
use std::io::Read;

/// Volume macro of an instrument
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroInfo {
    pub steps: Vec<u8>,
    pub release_point: Option<u8>,
}

/// Parsed instrument
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentInfo {
    pub kind: u16,
    pub name: String,
    pub fm: Option<FmVoice>,
    pub volume_macro: Option<MacroInfo>,
}

/// Parsed pattern block
#[derive(Debug, Clone)]
pub struct PatternInfo {
    pub channel: u8,
    pub index: u16,
    pub rows: Vec<PatternRow>,
}

/// Parsed module
#[derive(Debug, Clone, Default)]
pub struct FurSong {
    pub version: u16,
    pub name: String,
    pub author: String,
    pub comment: String,
    pub speed: u8,
    pub tick_rate: f32,
    pub pattern_length: usize,
    pub chips: Vec<u8>,
    /// Pattern index per order, per channel
    pub orders: Vec<Vec<u8>>,
    pub effect_columns: Vec<u8>,
    pub virtual_tempo: (u16, u16),
    pub instruments: Vec<InstrumentInfo>,
    pub patterns: Vec<PatternInfo>,
}

impl FurSong {
    pub fn order_count(&self) -> usize {
        self.orders.first().map_or(0, Vec::len)
    }

    pub fn pattern(&self, channel: u8, index: u8) -> Option<&PatternInfo> {
        self.patterns
            .iter()
            .find(|p| p.channel == channel && p.index == index as u16)
    }

    /// A channel's rows in play order; missing patterns are empty
    pub fn channel_rows(&self, channel: usize) -> Vec<PatternRow> {
        let mut rows = Vec::new();
        let Some(orders) = self.orders.get(channel) else {
            return rows;
        };
        for &index in orders {
            match self.pattern(channel as u8, index) {
                Some(p) => rows.extend(p.rows.iter().cloned()),
                None => rows.resize(rows.len() + self.pattern_length, PatternRow::default()),
            }
        }
        rows
    }
}

/// Cursor over module bytes
pub struct FurReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> FurReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Inflate zlib-compressed module data; other data is returned as is
    pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
        if data.first() != Some(&0x78) {
            return Ok(data.to_vec());
        }
        let mut decoder = ZlibDecoder::new(data);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|e| Error::FurParse(format!("zlib: {}", e)))?;
        Ok(out)
    }

    fn eof(&self, what: &str) -> Error {
        Error::FurParse(format!("unexpected end of data reading {} at 0x{:X}", what, self.pos))
    }

    pub fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(len).filter(|&e| e <= self.data.len());
        let end = end.ok_or_else(|| self.eof("bytes"))?;
        let data = self.data;
        let slice = &data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        let b = self.read_bytes(4)?;
        Ok(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_str(&mut self) -> Result<String> {
        let rest = &self.data[self.pos.min(self.data.len())..];
        let len = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| self.eof("string"))?;
        let s = String::from_utf8_lossy(&rest[..len]).into_owned();
        self.pos += len + 1;
        Ok(s)
    }

    /// Check a block id and return the end offset of its body
    fn expect_block(&mut self, id: &[u8; 4]) -> Result<usize> {
        let found = self.read_bytes(4)?;
        if found != id {
            return Err(Error::FurParse(format!(
                "expected {} block at 0x{:X}, found {:?}",
                String::from_utf8_lossy(id),
                self.pos - 4,
                String::from_utf8_lossy(found)
            )));
        }
        let len = self.read_u32()? as usize;
        Ok(self.pos + len)
    }

    /// Parse the whole module
    pub fn parse(&mut self) -> Result<FurSong> {
        if self.read_bytes(16)? != FUR_MAGIC {
            return Err(Error::FurParse("not a Furnace module".into()));
        }
        let mut song = FurSong {
            version: self.read_u16()?,
            ..FurSong::default()
        };
        self.read_u16()?;
        let info_ptr = self.read_u32()? as usize;
        self.seek(info_ptr);
        self.expect_block(block::INFO)?;

        self.read_u8()?; // time base
        song.speed = self.read_u8()?;
        self.read_u8()?;
        self.read_u8()?;
        song.tick_rate = self.read_f32()?;
        song.pattern_length = self.read_u16()? as usize;
        let order_count = self.read_u16()? as usize;
        self.read_bytes(2)?;
        let instrument_count = self.read_u16()? as usize;
        self.read_u16()?;
        self.read_u16()?;
        let pattern_count = self.read_u32()? as usize;

        song.chips = self
            .read_bytes(MAX_CHIPS)?
            .iter()
            .copied()
            .take_while(|&c| c != 0)
            .collect();
        self.read_bytes(MAX_CHIPS * 6)?; // volumes, panning, flag pointers

        song.name = self.read_str()?;
        song.author = self.read_str()?;
        self.read_f32()?;
        self.read_bytes(20)?;

        let mut instrument_ptrs = Vec::with_capacity(instrument_count);
        for _ in 0..instrument_count {
            instrument_ptrs.push(self.read_u32()? as usize);
        }
        let mut pattern_ptrs = Vec::with_capacity(pattern_count);
        for _ in 0..pattern_count {
            pattern_ptrs.push(self.read_u32()? as usize);
        }

        for _ in 0..CHANNEL_COUNT {
            song.orders.push(self.read_bytes(order_count)?.to_vec());
        }
        song.effect_columns = self.read_bytes(CHANNEL_COUNT)?.to_vec();
        self.read_bytes(CHANNEL_COUNT * 2)?;
        for _ in 0..CHANNEL_COUNT * 2 {
            self.read_str()?;
        }
        song.comment = self.read_str()?;
        self.read_f32()?;
        self.read_bytes(28)?;
        song.virtual_tempo = (self.read_u16()?, self.read_u16()?);

        for ptr in instrument_ptrs {
            self.seek(ptr);
            song.instruments.push(self.parse_instrument()?);
        }
        for ptr in pattern_ptrs {
            self.seek(ptr);
            song.patterns.push(self.parse_pattern(song.pattern_length)?);
        }
        Ok(song)
    }

    fn parse_instrument(&mut self) -> Result<InstrumentInfo> {
        let end = self.expect_block(block::INS2)?;
        self.read_u16()?; // version
        let mut ins = InstrumentInfo {
            kind: self.read_u16()?,
            name: String::new(),
            fm: None,
            volume_macro: None,
        };

        while self.pos + 2 <= end {
            let code = self.read_bytes(2)?;
            if code == b"EN" {
                break;
            }
            let len = self.read_u16()? as usize;
            let next = self.pos + len;
            match code {
                b"NA" => ins.name = self.read_str()?,
                b"FM" if ins.kind == ins_type::FM => ins.fm = Some(self.parse_fm()?),
                b"MA" => ins.volume_macro = self.parse_volume_macro(next)?,
                _ => {}
            }
            self.seek(next);
        }
        Ok(ins)
    }

    fn parse_fm(&mut self) -> Result<FmVoice> {
        self.read_u8()?; // operator count and enable flags
        let alg_fb = self.read_u8()?;
        self.read_bytes(3)?;
        let mut voice = FmVoice {
            alg: (alg_fb >> 4) & 0x07,
            fb: alg_fb & 0x07,
            operators: [FmOperator::default(); 4],
        };
        for op in voice.operators.iter_mut() {
            let b = self.read_bytes(8)?;
            let dt = (b[0] >> 4) & 0x07;
            *op = FmOperator {
                dt: if dt >= 3 { dt - 3 } else { 7 - dt },
                mul: b[0] & 0x0F,
                tl: b[1] & 0x7F,
                ks: b[2] >> 6,
                ar: b[2] & 0x1F,
                am: b[3] >> 7,
                dr: b[3] & 0x1F,
                sr: b[4] & 0x1F,
                sl: b[5] >> 4,
                rr: b[5] & 0x0F,
            };
        }
        Ok(voice)
    }

    fn parse_volume_macro(&mut self, end: usize) -> Result<Option<MacroInfo>> {
        let header_len = self.read_u16()? as usize;
        let mut found = None;
        while self.pos < end {
            let code = self.read_u8()?;
            if code == 0xFF {
                break;
            }
            let start = self.pos;
            let len = self.read_u8()? as usize;
            self.read_u8()?; // loop
            let release = self.read_u8()?;
            self.read_u8()?; // mode
            let word = self.read_u8()?;
            self.seek(start - 1 + header_len);
            let width = match (word >> 6) & 0x03 {
                0 => 1,
                1 => 1,
                2 => 2,
                _ => 4,
            };
            let data = self.read_bytes(len * width)?;
            if code == 0 {
                found = Some(MacroInfo {
                    steps: data.iter().step_by(width).copied().collect(),
                    release_point: (release != 0xFF).then_some(release),
                });
            }
        }
        Ok(found)
    }

    fn parse_pattern(&mut self, length: usize) -> Result<PatternInfo> {
        let end = self.expect_block(block::PATN)?;
        self.read_u8()?; // subsong
        let channel = self.read_u8()?;
        let index = self.read_u16()?;
        self.read_str()?;
        let body = &self.data[self.pos.min(end)..end.min(self.data.len())];
        Ok(PatternInfo {
            channel,
            index,
            rows: pattern::decode(body, length)?,
        })
    }
}

/// Parse module bytes, inflating them first when compressed
pub fn parse(data: &[u8]) -> Result<FurSong> {
    let data = FurReader::decompress(data)?;
    FurReader::new(&data).parse()
}
