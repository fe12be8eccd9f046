//! INS2 instrument blocks and the deduplicating instrument table

use super::header::{block, ins_type, FUR_VERSION};
use super::writer::BlockWriter;
use crate::converter::envelope::{SsgEnvelope, MAX_MACRO_STEPS};
use crate::converter::quantize::InstrumentRef;
use crate::error::{Warning, Warnings};
use crate::pmd::{FmInstrument, FmOperator, FmVoice};
use std::collections::HashMap;

/// Instruments addressable from a pattern row
const MAX_INSTRUMENTS: usize = 256;

/// Macro header size stored in the MA feature
const MACRO_HEADER_SIZE: u16 = 8;

/// A Furnace instrument derived from PMD data
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FurInstrument {
    Fm { name: String, voice: FmVoice },
    Ssg { name: String, envelope: SsgEnvelope },
}

impl FurInstrument {
    pub fn name(&self) -> &str {
        match self {
            FurInstrument::Fm { name, .. } | FurInstrument::Ssg { name, .. } => name,
        }
    }

    /// Serialize as an INS2 block
    pub fn encode(&self) -> Vec<u8> {
        let mut ins = BlockWriter::new();
        ins.u16(FUR_VERSION);
        match self {
            FurInstrument::Fm { name, voice } => {
                ins.u16(ins_type::FM);
                ins.bytes(&name_feature(name));
                ins.bytes(&fm_feature(voice));
            }
            FurInstrument::Ssg { name, envelope } => {
                ins.u16(ins_type::AY);
                ins.bytes(&name_feature(name));
                ins.bytes(&macro_feature(envelope));
            }
        }
        ins.bytes(b"EN");
        ins.finish(block::INS2)
    }
}

fn feature(code: &[u8; 2], body: BlockWriter) -> Vec<u8> {
    let body = body.into_inner();
    let mut out = Vec::with_capacity(body.len() + 4);
    out.extend_from_slice(code);
    out.extend_from_slice(&(body.len() as u16).to_le_bytes());
    out.extend_from_slice(&body);
    out
}

fn name_feature(name: &str) -> Vec<u8> {
    let mut body = BlockWriter::new();
    body.str(name);
    feature(b"NA", body)
}

/// Furnace stores DT with 3 as centre; the OPN register uses sign-magnitude
fn furnace_dt(reg: u8) -> u8 {
    if reg < 4 {
        3 + reg
    } else {
        7 - reg
    }
}

fn operator_bytes(op: &FmOperator) -> [u8; 8] {
    [
        (op.mul & 0x0F) | ((furnace_dt(op.dt & 0x07) & 0x07) << 4),
        op.tl & 0x7F,
        (op.ar & 0x1F) | ((op.ks & 0x03) << 6),
        (op.dr & 0x1F) | ((op.am & 0x01) << 7),
        (op.sr & 0x1F) | (2 << 5),
        (op.rr & 0x0F) | ((op.sl & 0x0F) << 4),
        0,
        0,
    ]
}

fn fm_feature(voice: &FmVoice) -> Vec<u8> {
    let mut body = BlockWriter::new();
    // 4 operators, all enabled
    body.u8(4 | (0x0F << 4));
    body.u8((voice.fb & 0x07) | ((voice.alg & 0x07) << 4));
    body.bytes(&[0, 0, 0]);
    for op in &voice.operators {
        body.bytes(&operator_bytes(op));
    }
    feature(b"FM", body)
}

fn macro_feature(envelope: &SsgEnvelope) -> Vec<u8> {
    let mac = envelope.volume_macro();
    let mut body = BlockWriter::new();
    body.u16(MACRO_HEADER_SIZE);
    // volume macro: code, length, loop, release, mode, open/word size, delay, speed
    body.u8(0);
    body.u8(mac.steps.len() as u8);
    body.u8(0xFF);
    body.u8(mac.release_point.unwrap_or(0xFF));
    body.u8(0);
    body.u8(0x01);
    body.u8(0);
    body.u8(1);
    body.bytes(&mac.steps);
    body.u8(0xFF);
    feature(b"MA", body)
}

/// Deduplicated instruments in output order
#[derive(Debug, Default)]
pub struct InstrumentTable {
    entries: Vec<FurInstrument>,
    fm_by_id: HashMap<u8, u8>,
    ssg_by_envelope: HashMap<SsgEnvelope, u8>,
    fallback_fm: Option<u8>,
}

impl InstrumentTable {
    /// Build the table: FM voices first in PMD id order, then one SSG
    /// instrument per envelope in the order they are first referenced
    pub fn build<'r>(
        fm: &[FmInstrument],
        refs: impl IntoIterator<Item = &'r InstrumentRef>,
        warnings: &mut Warnings,
    ) -> Self {
        let mut table = Self::default();
        let mut by_voice: HashMap<FmVoice, u8> = HashMap::new();

        let mut sorted: Vec<&FmInstrument> = fm.iter().collect();
        sorted.sort_by_key(|ins| ins.id);
        for ins in sorted {
            if let Some(&index) = by_voice.get(&ins.voice) {
                table.fm_by_id.insert(ins.id, index);
                continue;
            }
            let name = format!("FM {:02X}", ins.id);
            if let Some(index) = table.push(FurInstrument::Fm { name, voice: ins.voice }, warnings) {
                by_voice.insert(ins.voice, index);
                table.fm_by_id.insert(ins.id, index);
            }
        }

        let refs: Vec<&InstrumentRef> = refs.into_iter().collect();

        // Undefined ids play the first FM voice, or a default one
        table.fallback_fm = if table.entries.is_empty() {
            let needed = refs.iter().any(|r| matches!(r, InstrumentRef::Fm(_)));
            if needed {
                let default = FurInstrument::Fm {
                    name: "FM default".into(),
                    voice: FmVoice::default(),
                };
                table.push(default, warnings)
            } else {
                None
            }
        } else {
            Some(0)
        };

        for r in refs {
            let InstrumentRef::Ssg(envelope) = *r else {
                continue;
            };
            if table.ssg_by_envelope.contains_key(&envelope) {
                continue;
            }
            let name = format!("SSG {}", envelope);
            if envelope.volume_macro().truncated {
                warnings.push(Warning::overflow(
                    "module",
                    format!("volume macro of '{}' cut to {} steps", name, MAX_MACRO_STEPS),
                ));
            }
            if let Some(index) = table.push(FurInstrument::Ssg { name, envelope }, warnings) {
                table.ssg_by_envelope.insert(envelope, index);
            }
        }

        log::debug!("Instrument table: {} entries", table.entries.len());
        table
    }

    fn push(&mut self, instrument: FurInstrument, warnings: &mut Warnings) -> Option<u8> {
        if self.entries.len() >= MAX_INSTRUMENTS {
            warnings.push(Warning::overflow(
                "module",
                format!("instrument '{}' dropped: table full", instrument.name()),
            ));
            return None;
        }
        self.entries.push(instrument);
        Some((self.entries.len() - 1) as u8)
    }

    /// Output index for a row's instrument reference
    pub fn resolve(&self, r: &InstrumentRef) -> Option<u8> {
        match r {
            InstrumentRef::Fm(id) => self.fm_by_id.get(id).copied().or(self.fallback_fm),
            InstrumentRef::Ssg(envelope) => self.ssg_by_envelope.get(envelope).copied(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FurInstrument> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fm(id: u8, alg: u8) -> FmInstrument {
        FmInstrument {
            id,
            voice: FmVoice {
                alg,
                ..FmVoice::default()
            },
        }
    }

    #[test]
    fn test_identical_voices_share_an_index() {
        let table = InstrumentTable::build(
            &[fm(3, 4), fm(1, 4), fm(2, 5)],
            &[],
            &mut Warnings::new(),
        );
        assert_eq!(table.len(), 2);
        assert_eq!(table.resolve(&InstrumentRef::Fm(1)), Some(0));
        assert_eq!(table.resolve(&InstrumentRef::Fm(3)), Some(0));
        assert_eq!(table.resolve(&InstrumentRef::Fm(2)), Some(1));
        assert_eq!(table.iter().next().map(FurInstrument::name), Some("FM 01"));
    }

    #[test]
    fn test_ssg_envelopes_after_fm() {
        let a = SsgEnvelope {
            attack: 1,
            decay: -2,
            sustain: 2,
            release: 1,
        };
        let refs = [
            InstrumentRef::Ssg(a),
            InstrumentRef::Ssg(SsgEnvelope::default()),
            InstrumentRef::Ssg(a),
        ];
        let table = InstrumentTable::build(&[fm(0, 7)], &refs, &mut Warnings::new());
        assert_eq!(table.len(), 3);
        assert_eq!(table.resolve(&InstrumentRef::Ssg(a)), Some(1));
        assert_eq!(table.resolve(&InstrumentRef::Ssg(SsgEnvelope::default())), Some(2));
        assert_eq!(table.iter().nth(1).map(FurInstrument::name), Some("SSG E1,-2,2,1"));
    }

    #[test]
    fn test_default_fm_when_table_empty() {
        let table = InstrumentTable::build(&[], &[InstrumentRef::Fm(0)], &mut Warnings::new());
        assert_eq!(table.len(), 1);
        assert_eq!(table.resolve(&InstrumentRef::Fm(9)), Some(0));
    }

    #[test]
    fn test_default_fm_precedes_ssg() {
        let refs = [InstrumentRef::Ssg(SsgEnvelope::default()), InstrumentRef::Fm(0)];
        let table = InstrumentTable::build(&[], &refs, &mut Warnings::new());
        assert_eq!(table.resolve(&InstrumentRef::Fm(0)), Some(0));
        assert_eq!(table.resolve(&InstrumentRef::Ssg(SsgEnvelope::default())), Some(1));
    }

    #[test]
    fn test_undefined_id_falls_back_to_first_fm() {
        let table = InstrumentTable::build(&[fm(4, 1)], &[InstrumentRef::Fm(7)], &mut Warnings::new());
        assert_eq!(table.len(), 1);
        assert_eq!(table.resolve(&InstrumentRef::Fm(7)), Some(0));
    }

    #[test]
    fn test_fm_block_layout() {
        let ins = FurInstrument::Fm {
            name: "FM 00".into(),
            voice: FmVoice::default(),
        };
        let data = ins.encode();
        assert_eq!(&data[0..4], b"INS2");
        let len = u32::from_le_bytes([data[4], data[5], data[6], data[7]]) as usize;
        assert_eq!(len, data.len() - 8);
        assert_eq!(u16::from_le_bytes([data[8], data[9]]), FUR_VERSION);
        assert_eq!(u16::from_le_bytes([data[10], data[11]]), ins_type::FM);
        assert_eq!(&data[12..14], b"NA");
        assert_eq!(&data[data.len() - 2..], b"EN");
    }

    #[test]
    fn test_detune_register_mapping() {
        assert_eq!(furnace_dt(0), 3);
        assert_eq!(furnace_dt(3), 6);
        assert_eq!(furnace_dt(4), 3);
        assert_eq!(furnace_dt(7), 0);
    }
}
