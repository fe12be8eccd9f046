//! Furnace module writer

use super::header::{
    block, CHANNEL_COUNT, CHIP_YM2608, FUR_HEADER_SIZE, FUR_MAGIC, FUR_VERSION, MAX_CHIPS,
    TICK_RATE,
};
use super::instrument::FurInstrument;
use super::pattern::{self, PatternRow};
use crate::error::Result;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::Write;

/// Little-endian byte builder for block bodies
#[derive(Debug, Default)]
pub struct BlockWriter {
    buf: Vec<u8>,
}

impl BlockWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn f32(&mut self, value: f32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// NUL-terminated UTF-8 string
    pub fn str(&mut self, value: &str) {
        self.buf.extend_from_slice(value.as_bytes());
        self.buf.push(0);
    }

    pub fn bytes(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn zeros(&mut self, count: usize) {
        self.buf.resize(self.buf.len() + count, 0);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    /// Wrap the body in a block: 4-byte id, u32 length, body
    pub fn finish(self, id: &[u8; 4]) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.buf.len() + 8);
        out.extend_from_slice(id);
        out.extend_from_slice(&(self.buf.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.buf);
        out
    }
}

/// Song-level settings written to the INFO block
#[derive(Debug, Clone)]
pub struct SongInfo {
    pub name: String,
    pub author: String,
    pub comment: String,
    /// Ticks per row
    pub speed: u8,
    pub pattern_length: usize,
    /// Virtual tempo numerator (human tempo)
    pub tempo: u16,
    /// Virtual tempo denominator
    pub tempo_baseline: u16,
    pub effect_columns: [u8; CHANNEL_COUNT],
}

impl Default for SongInfo {
    fn default() -> Self {
        Self {
            name: String::new(),
            author: String::new(),
            comment: String::new(),
            speed: 3,
            pattern_length: 64,
            tempo: 75,
            tempo_baseline: 75,
            effect_columns: [1; CHANNEL_COUNT],
        }
    }
}

/// Pattern data for one channel at one order
#[derive(Debug, Clone)]
pub struct FurPattern {
    pub channel: u8,
    pub index: u16,
    pub rows: Vec<PatternRow>,
}

impl FurPattern {
    fn encode(&self) -> Vec<u8> {
        let mut patn = BlockWriter::new();
        patn.u8(0); // subsong
        patn.u8(self.channel);
        patn.u16(self.index);
        patn.str("");
        patn.bytes(&pattern::encode(&self.rows));
        patn.finish(block::PATN)
    }
}

/// Block offsets the INFO block points at
#[derive(Debug, Default, Clone, Copy)]
struct Layout {
    instrument_dir: u32,
    wavetable_dir: u32,
    sample_dir: u32,
}

/// Furnace module writer
#[derive(Debug)]
pub struct FurWriter {
    info: SongInfo,
    order_count: usize,
    instruments: Vec<FurInstrument>,
    patterns: Vec<FurPattern>,
}

impl FurWriter {
    pub fn new(info: SongInfo) -> Self {
        Self {
            info,
            order_count: 1,
            instruments: Vec::new(),
            patterns: Vec::new(),
        }
    }

    /// Number of orders; pattern `i` of every channel plays at order `i`
    pub fn set_order_count(&mut self, count: usize) {
        self.order_count = count.max(1);
    }

    pub fn add_instrument(&mut self, instrument: FurInstrument) {
        self.instruments.push(instrument);
    }

    /// Add a pattern; all-empty patterns are omitted since absent means empty
    pub fn add_pattern(&mut self, channel: u8, index: u16, rows: Vec<PatternRow>) {
        if rows.iter().all(PatternRow::is_empty) {
            return;
        }
        self.patterns.push(FurPattern {
            channel,
            index,
            rows,
        });
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    /// Assemble the uncompressed module
    pub fn to_bytes(&self) -> Vec<u8> {
        let instruments: Vec<Vec<u8>> = self.instruments.iter().map(|i| i.encode()).collect();
        let patterns: Vec<Vec<u8>> = self.patterns.iter().map(FurPattern::encode).collect();
        let instrument_dir = asset_dir(self.instruments.len());
        let empty_dir = asset_dir(0);

        // INFO size does not depend on pointer values
        let info_len = self
            .info_block(&[], &[], Layout::default(), instruments.len(), patterns.len())
            .len();
        let mut pos = (FUR_HEADER_SIZE + info_len) as u32;
        let layout = Layout {
            instrument_dir: pos,
            wavetable_dir: pos + instrument_dir.len() as u32,
            sample_dir: pos + (instrument_dir.len() + empty_dir.len()) as u32,
        };
        pos = layout.sample_dir + empty_dir.len() as u32;

        let mut instrument_ptrs = Vec::with_capacity(instruments.len());
        for data in &instruments {
            instrument_ptrs.push(pos);
            pos += data.len() as u32;
        }
        let mut pattern_ptrs = Vec::with_capacity(patterns.len());
        for data in &patterns {
            pattern_ptrs.push(pos);
            pos += data.len() as u32;
        }

        let info = self.info_block(
            &instrument_ptrs,
            &pattern_ptrs,
            layout,
            instruments.len(),
            patterns.len(),
        );

        let mut out = Vec::with_capacity(pos as usize);
        out.extend_from_slice(FUR_MAGIC);
        out.extend_from_slice(&FUR_VERSION.to_le_bytes());
        out.extend_from_slice(&[0, 0]);
        out.extend_from_slice(&(FUR_HEADER_SIZE as u32).to_le_bytes());
        out.extend_from_slice(&[0; 8]);
        out.extend_from_slice(&info);
        out.extend_from_slice(&instrument_dir);
        out.extend_from_slice(&empty_dir);
        out.extend_from_slice(&empty_dir);
        for data in instruments.iter().chain(patterns.iter()) {
            out.extend_from_slice(data);
        }

        log::debug!(
            "Module: {} bytes, {} instruments, {} patterns, {} orders",
            out.len(),
            instruments.len(),
            patterns.len(),
            self.order_count
        );
        out
    }

    /// Module bytes, zlib-compressed when `compress` is set
    pub fn finish(&self, compress: bool) -> Result<Vec<u8>> {
        let data = self.to_bytes();
        if !compress {
            return Ok(data);
        }
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&data)?;
        Ok(encoder.finish()?)
    }

    fn info_block(
        &self,
        instrument_ptrs: &[u32],
        pattern_ptrs: &[u32],
        layout: Layout,
        instrument_count: usize,
        pattern_count: usize,
    ) -> Vec<u8> {
        let info = &self.info;
        let mut w = BlockWriter::new();

        w.u8(0); // time base
        w.u8(info.speed);
        w.u8(info.speed);
        w.u8(1); // arpeggio speed
        w.f32(TICK_RATE);
        w.u16(info.pattern_length as u16);
        w.u16(self.order_count as u16);
        w.u8(4); // highlight A
        w.u8(16); // highlight B
        w.u16(instrument_count as u16);
        w.u16(0); // wavetables
        w.u16(0); // samples
        w.u32(pattern_count as u32);

        w.u8(CHIP_YM2608);
        w.zeros(MAX_CHIPS - 1);
        w.bytes(&[0x40; MAX_CHIPS]); // chip volumes
        w.zeros(MAX_CHIPS); // chip panning
        w.zeros(MAX_CHIPS * 4); // chip flag pointers

        w.str(&info.name);
        w.str(&info.author);
        w.f32(440.0);
        w.zeros(20); // compatibility flags

        for &ptr in instrument_ptrs.iter().chain(pattern_ptrs) {
            w.u32(ptr);
        }
        // placeholders keep the size identical on the sizing pass
        w.zeros((instrument_count - instrument_ptrs.len()) * 4);
        w.zeros((pattern_count - pattern_ptrs.len()) * 4);

        for _ in 0..CHANNEL_COUNT {
            for order in 0..self.order_count {
                w.u8(order as u8);
            }
        }
        w.bytes(&info.effect_columns);
        w.bytes(&[3; CHANNEL_COUNT]); // shown in pattern and oscilloscope
        w.zeros(CHANNEL_COUNT); // collapsed
        for _ in 0..CHANNEL_COUNT * 2 {
            w.str(""); // channel names, short names
        }
        w.str(&info.comment);
        w.f32(1.0); // master volume
        w.zeros(28); // extended compatibility flags

        w.u16(info.tempo);
        w.u16(info.tempo_baseline);
        w.str(""); // first subsong name
        w.str(""); // first subsong comment
        w.u8(0); // additional subsongs
        w.zeros(3);

        w.str("PC-98");
        w.str(""); // album
        w.str(""); // name (Japanese)
        w.str(""); // author (Japanese)
        w.str("PC-98");
        w.str(""); // album (Japanese)

        w.f32(1.0); // chip volume
        w.f32(0.0); // chip panning
        w.f32(0.0); // chip front/rear balance
        w.u32(0); // patchbay connections
        w.u8(1); // automatic patchbay
        w.zeros(8); // more compatibility flags

        w.u8(1); // speed pattern length
        w.u8(info.speed);
        w.zeros(15);
        w.u8(0); // grooves

        w.u32(layout.instrument_dir);
        w.u32(layout.wavetable_dir);
        w.u32(layout.sample_dir);

        w.finish(block::INFO)
    }
}

/// ADIR block listing assets `0..count` in a single unnamed directory
fn asset_dir(count: usize) -> Vec<u8> {
    let mut w = BlockWriter::new();
    if count == 0 {
        w.u32(0);
        return w.finish(block::ADIR);
    }
    w.u32(1);
    w.str("");
    w.u16(count as u16);
    for i in 0..count {
        w.u8(i as u8);
    }
    w.finish(block::ADIR)
}
