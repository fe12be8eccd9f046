//! PMD file reader and parser

use super::header::{offset, resolve_pointer, ChannelId, PmdHeader, HEADER_SIZE, POINTER_COUNT};
use super::instrument::FmInstrument;
use crate::error::{Error, Result};
use serde::Serialize;

/// How far back from the end of file metadata strings are searched for
const METADATA_SCAN_WINDOW: usize = 500;

/// Upper bound on collected metadata strings
const METADATA_MAX_STRINGS: usize = 10;

/// Characters that mark a string as leftover MML rather than text
const MML_PUNCTUATION: &[char] = &['=', '<', '>', '{', '}', '[', ']'];

/// A read went past the end of the reader's range
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unexpected end of data at offset {offset:#06x}")]
pub struct OutOfRange {
    pub offset: usize,
}

/// Byte range of one channel's command stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChannelSource {
    pub id: ChannelId,
    pub start: usize,
    pub end: usize,
}

/// Text found after the music data
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Metadata {
    pub title: String,
    pub composer: String,
    pub arranger: String,
    pub memos: Vec<String>,
}

/// Everything the interpreter needs besides the raw bytes
#[derive(Debug, Clone, Default, Serialize)]
pub struct PmdModule {
    pub header: PmdHeader,
    pub channels: Vec<ChannelSource>,
    pub instruments: Vec<FmInstrument>,
    pub metadata: Metadata,
}

impl PmdModule {
    pub fn instrument(&self, id: u8) -> Option<&FmInstrument> {
        self.instruments.iter().find(|ins| ins.id == id)
    }
}

/// PMD file reader
pub struct PmdReader<'a> {
    data: &'a [u8],
    pos: usize,
    end: usize,
}

impl<'a> PmdReader<'a> {
    /// Create a reader over the whole buffer
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            end: data.len(),
        }
    }

    /// Create a reader limited to `start..end`
    pub fn with_range(data: &'a [u8], start: usize, end: usize) -> Self {
        let end = end.min(data.len());
        Self {
            data,
            pos: start.min(end),
            end,
        }
    }

    /// Check if we've reached the end of the range
    pub fn is_eof(&self) -> bool {
        self.pos >= self.end
    }

    /// Get current position
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Seek to a position
    pub fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    /// Peek at the next byte without advancing
    pub fn peek_u8(&self) -> Option<u8> {
        if self.pos < self.end {
            Some(self.data[self.pos])
        } else {
            None
        }
    }

    /// Read a single byte
    pub fn read_u8(&mut self) -> std::result::Result<u8, OutOfRange> {
        let b = self.peek_u8().ok_or(OutOfRange { offset: self.pos })?;
        self.pos += 1;
        Ok(b)
    }

    /// Borrow the next `len` bytes
    pub fn read_bytes(&mut self, len: usize) -> std::result::Result<&'a [u8], OutOfRange> {
        if self.pos + len > self.end {
            return Err(OutOfRange { offset: self.pos });
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    /// Read a u16 at a specific offset without advancing position
    fn peek_u16_at(&self, offset: usize) -> Result<u16> {
        if offset + 2 > self.data.len() {
            return Err(Error::MalformedHeader(format!(
                "header field at {:#x} lies past end of file",
                offset
            )));
        }
        Ok(u16::from_le_bytes([self.data[offset], self.data[offset + 1]]))
    }

    /// Parse the fixed header and validate every pointer against the file size
    pub fn parse_header(&self) -> Result<PmdHeader> {
        if self.data.len() < HEADER_SIZE {
            return Err(Error::MalformedHeader(format!(
                "file is {} bytes, header needs {}",
                self.data.len(),
                HEADER_SIZE
            )));
        }

        let mut header = PmdHeader {
            version: self.data[offset::VERSION],
            ..Default::default()
        };

        for i in 0..POINTER_COUNT {
            let raw = self.peek_u16_at(offset::POINTERS + i * 2)?;
            let resolved = self.check_pointer(raw, i)?;
            if i < ChannelId::COUNT {
                header.channel_offsets[i] = resolved;
            } else {
                header.rhythm_table_offset = resolved;
            }
        }

        let raw = self.peek_u16_at(offset::INSTRUMENTS)?;
        header.instrument_offset = resolve_pointer(raw);
        if let Some(pos) = header.instrument_offset {
            if pos > self.data.len() {
                return Err(Error::MalformedHeader(format!(
                    "instrument table pointer {:#x} beyond file length {:#x}",
                    pos,
                    self.data.len()
                )));
            }
        }

        Ok(header)
    }

    fn check_pointer(&self, raw: u16, index: usize) -> Result<Option<usize>> {
        let resolved = resolve_pointer(raw);
        if let Some(pos) = resolved {
            if pos >= self.data.len() {
                let name = if index < ChannelId::COUNT {
                    ChannelId(index as u8).name()
                } else {
                    "rhythm table"
                };
                return Err(Error::MalformedHeader(format!(
                    "{} pointer {:#x} beyond file length {:#x}",
                    name,
                    pos,
                    self.data.len()
                )));
            }
        }
        Ok(resolved)
    }

    /// Compute each present channel's byte range.
    ///
    /// A channel runs until the next greater channel start, else the rhythm
    /// table, else end of file.
    pub fn channel_ranges(&self, header: &PmdHeader) -> Vec<ChannelSource> {
        let starts: Vec<usize> = header.channel_offsets.iter().flatten().copied().collect();

        ChannelId::all()
            .filter_map(|id| {
                let start = header.channel_offset(id)?;
                let end = starts
                    .iter()
                    .copied()
                    .filter(|&s| s > start)
                    .min()
                    .or_else(|| header.rhythm_table_offset.filter(|&r| r > start))
                    .unwrap_or(self.data.len());
                Some(ChannelSource { id, start, end })
            })
            .collect()
    }

    /// Parse the FM instrument table.
    ///
    /// Records are read until the 0x00,0xFF end marker or until less than one
    /// full record remains.
    pub fn parse_instruments(&self, header: &PmdHeader) -> Vec<FmInstrument> {
        let mut instruments = Vec::new();
        let Some(mut pos) = header.instrument_offset else {
            return instruments;
        };

        while pos + FmInstrument::RECORD_SIZE <= self.data.len() {
            if self.data[pos] == 0x00 && self.data[pos + 1] == 0xFF {
                break;
            }
            if let Some(ins) = FmInstrument::parse(&self.data[pos..pos + FmInstrument::RECORD_SIZE]) {
                instruments.push(ins);
            }
            pos += FmInstrument::RECORD_SIZE;
        }

        log::debug!("Parsed {} FM instruments", instruments.len());
        instruments
    }

    /// Scan the tail of the file for NUL-separated text strings
    pub fn parse_metadata(&self) -> Metadata {
        let data = self.data;
        let floor = data.len().saturating_sub(METADATA_SCAN_WINDOW).max(HEADER_SIZE);
        let mut strings = Vec::new();

        let mut end = data.len();
        while end > floor && data[end - 1] == 0 {
            end -= 1;
        }

        while end > floor && strings.len() < METADATA_MAX_STRINGS {
            let start = data[floor..end]
                .iter()
                .rposition(|&b| b == 0)
                .map_or(floor, |p| floor + p + 1);
            if let Some(text) = accept_text(&data[start..end]) {
                strings.push(text);
            }
            if start <= floor {
                break;
            }
            end = start - 1;
        }
        strings.reverse();

        let n = strings.len();
        let mut meta = Metadata::default();
        match n {
            0 => {}
            1 | 2 => meta.title = strings[n - 1].clone(),
            3 | 4 => {
                meta.title = strings[n - 3].clone();
                meta.composer = strings[n - 2].clone();
                meta.arranger = strings[n - 1].clone();
            }
            _ => {
                meta.title = strings[n - 5].clone();
                meta.composer = strings[n - 4].clone();
                meta.arranger = strings[n - 3].clone();
                meta.memos = strings[n - 2..].to_vec();
            }
        }
        meta
    }

    /// Parse header, channel table, instruments and metadata
    pub fn parse_module(&self) -> Result<PmdModule> {
        let header = self.parse_header()?;
        let channels = self.channel_ranges(&header);
        let instruments = self.parse_instruments(&header);
        let metadata = self.parse_metadata();
        Ok(PmdModule {
            header,
            channels,
            instruments,
            metadata,
        })
    }
}

fn accept_text(bytes: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(bytes).ok()?.trim();
    let total = text.chars().count();
    if total < 2 || text.contains(MML_PUNCTUATION) {
        return None;
    }
    let printable = text.chars().filter(|c| !c.is_control()).count();
    if printable * 10 <= total * 7 {
        return None;
    }
    Some(text.to_string())
}
