//! PMD sequence opcode definitions and decoding

use super::header::ChannelKind;
use super::reader::PmdReader;

/// PMD sequence opcodes
pub mod opcode {
    pub const TRACK_END: u8 = 0x80;
    pub const INSTRUMENT: u8 = 0xFF;
    pub const GATE_TICKS: u8 = 0xFE;
    pub const VOLUME: u8 = 0xFD;
    pub const TEMPO: u8 = 0xFC;
    pub const TIE: u8 = 0xFB;
    pub const DETUNE: u8 = 0xFA;
    pub const LOOP_START: u8 = 0xF9;
    pub const LOOP_END: u8 = 0xF8;
    pub const LOOP_BREAK: u8 = 0xF7;
    pub const SONG_LOOP: u8 = 0xF6;
    pub const TRANSPOSE: u8 = 0xF5;
    pub const VOLUME_UP: u8 = 0xF4;
    pub const VOLUME_DOWN: u8 = 0xF3;
    pub const SSG_ENVELOPE: u8 = 0xF0;
    pub const PAN: u8 = 0xEC;
    pub const TRANSPOSE_ADD: u8 = 0xE7;
    pub const VOLUME_UP_BY: u8 = 0xE3;
    pub const VOLUME_DOWN_BY: u8 = 0xE2;
    pub const PORTAMENTO: u8 = 0xDA;
    pub const DETUNE_ADD: u8 = 0xD5;
    pub const GATE_EIGHTHS: u8 = 0xC4;
    pub const SLUR: u8 = 0xC1;
    pub const PART_MASK: u8 = 0xC0;
    pub const MASTER_TRANSPOSE: u8 = 0xB2;

    /// Gate operand that introduces two more bytes
    pub const GATE_EXTENDED: u8 = 0xB1;

    /// Tempo sub-selectors following 0xFC
    pub const TEMPO_HUMAN: u8 = 0xFF;
    pub const TEMPO_TIMER_DELTA: u8 = 0xFE;
    pub const TEMPO_HUMAN_DELTA: u8 = 0xFD;
}

/// Low nibble of a note byte that marks a rest
pub const REST_PITCH: u8 = 0x0F;

/// Tempo update carried by 0xFC
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TempoChange {
    /// `T n`: absolute Timer-B value
    TimerB(u8),
    /// `t n`: absolute human tempo
    Human(u8),
    /// `T± n`: relative Timer-B value
    TimerBDelta(i8),
    /// `t± n`: relative human tempo
    HumanDelta(i8),
}

/// One decoded instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Opcode {
    Note { octave: u8, pitch: u8, length: u8 },
    Rest { length: u8 },
    TrackEnd,
    Tie,
    Slur,
    SetInstrument(u8),
    SetVolume(u8),
    VolumeUp,
    VolumeDown,
    VolumeUpBy(u8),
    VolumeDownBy(u8),
    SetTempo(TempoChange),
    SetDetune(i16),
    DetuneAdd(i16),
    SetTranspose(i8),
    TransposeAdd(i8),
    SetMasterTranspose(i8),
    SetPan(u8),
    SetGateTicks(u8),
    SetGatePercent(u8),
    LoopStart,
    LoopEnd { count: u8 },
    LoopBreak,
    SongLoopMark,
    Portamento { from: u8, to: u8, length: u8 },
    EnvelopeSet { attack: u8, decay: i8, sustain: u8, release: u8 },
    /// Rhythm part reference to an entry of the rhythm pattern table
    RhythmPattern(u8),
    /// Recognised and fully consumed, but not translated
    Ignored { op: u8, name: &'static str },
}

/// A decoded opcode with its position and encoded size
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub offset: usize,
    pub len: usize,
    pub opcode: Opcode,
}

/// Why an instruction could not be decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeFault {
    #[error("opcode {op:#04x} needs operands past the end of the channel")]
    Truncated { op: u8 },
    #[error("unknown opcode {op:#04x}")]
    Unknown { op: u8 },
}

/// Operand byte count and description for every command byte.
///
/// 0xFC and 0xC0 take one extra byte when their first operand is a sub-selector;
/// 0xFE takes two when its operand is 0xB1.
pub fn command_info(op: u8) -> Option<(usize, &'static str)> {
    let info = match op {
        0xFF => (1, "instrument"),
        0xFE => (1, "gate time (ticks)"),
        0xFD => (1, "volume"),
        0xFC => (1, "tempo"),
        0xFB => (0, "tie"),
        0xFA => (2, "detune"),
        0xF9 => (2, "loop start"),
        0xF8 => (4, "loop end"),
        0xF7 => (2, "loop break"),
        0xF6 => (0, "song loop point"),
        0xF5 => (1, "transpose"),
        0xF4 => (0, "volume up"),
        0xF3 => (0, "volume down"),
        0xF2 => (4, "software LFO parameters"),
        0xF1 => (1, "software LFO switch"),
        0xF0 => (4, "SSG envelope"),
        0xEF => (2, "direct register write"),
        0xEE => (1, "SSG noise frequency"),
        0xED => (1, "SSG tone/noise mix"),
        0xEC => (1, "pan"),
        0xEB => (1, "rhythm key on"),
        0xEA => (1, "rhythm volume"),
        0xE9 => (1, "rhythm pan"),
        0xE8 => (1, "rhythm master volume"),
        0xE7 => (1, "relative transpose"),
        0xE6 => (1, "rhythm master volume add"),
        0xE5 => (2, "rhythm volume add"),
        0xE4 => (1, "hardware LFO delay"),
        0xE3 => (1, "volume up by"),
        0xE2 => (1, "volume down by"),
        0xE1 => (1, "hardware LFO sensitivity"),
        0xE0 => (1, "hardware LFO frequency"),
        0xDF => (1, "whole-note length"),
        0xDE => (1, "fine volume up"),
        0xDD => (1, "fine volume down"),
        0xDC => (1, "status write"),
        0xDB => (1, "status add"),
        0xDA => (3, "portamento"),
        0xD9 => (1, "hardware LFO waveform"),
        0xD8 => (1, "hardware LFO depth"),
        0xD7 => (1, "hardware LFO speed"),
        0xD6 => (2, "LFO depth change"),
        0xD5 => (2, "relative detune"),
        0xD4 => (1, "SSG sound effect"),
        0xD3 => (1, "FM sound effect"),
        0xD2 => (1, "fade out"),
        0xD1 => (1, "reserved"),
        0xD0 => (1, "noise frequency add"),
        0xCF => (1, "FM slot mask"),
        0xCE => (6, "PCM repeat"),
        0xCD => (5, "extended SSG envelope"),
        0xCC => (1, "extended detune mode"),
        0xCB => (1, "software LFO waveform"),
        0xCA => (1, "software LFO mode"),
        0xC9 => (1, "envelope speed mode"),
        0xC8 => (3, "slot detune"),
        0xC7 => (3, "relative slot detune"),
        0xC6 => (6, "FM3 extended parts"),
        0xC5 => (1, "volume mask"),
        0xC4 => (1, "gate time (eighths)"),
        0xC3 => (2, "extended pan"),
        0xC2 => (1, "software LFO delay"),
        0xC1 => (0, "slur"),
        0xC0 => (1, "part mask"),
        0xBF => (4, "software LFO B parameters"),
        0xBE => (1, "software LFO B switch"),
        0xBD => (2, "LFO B depth change"),
        0xBC => (1, "software LFO B waveform"),
        0xBB => (1, "software LFO B mode"),
        0xBA => (1, "LFO B volume mask"),
        0xB9 => (1, "software LFO B delay"),
        0xB8 => (2, "FM total level"),
        0xB7 => (1, "LFO depth count"),
        0xB6 => (1, "FM feedback"),
        0xB5 => (2, "slot key-on delay"),
        0xB4 => (16, "PPZ extension"),
        0xB3 => (1, "minimum gate time"),
        0xB2 => (1, "master transpose"),
        0xB1 => (1, "random gate time"),
        _ => return None,
    };
    Some(info)
}

/// Decode the instruction under the reader's cursor and advance past it.
///
/// On the rhythm part, bytes below 0x80 are single-byte pattern references
/// instead of note/length pairs.
pub fn decode(reader: &mut PmdReader<'_>, kind: ChannelKind) -> Result<Instruction, DecodeFault> {
    let offset = reader.position();
    let op = reader.read_u8().map_err(|_| DecodeFault::Truncated { op: 0 })?;

    if op < opcode::TRACK_END && kind == ChannelKind::Rhythm {
        return Ok(Instruction {
            offset,
            len: 1,
            opcode: Opcode::RhythmPattern(op),
        });
    }

    if op < opcode::TRACK_END {
        let length = reader.read_u8().map_err(|_| DecodeFault::Truncated { op })?;
        let pitch = op & 0x0F;
        let opcode = if pitch == REST_PITCH {
            Opcode::Rest { length }
        } else {
            Opcode::Note {
                octave: (op >> 4) & 0x07,
                pitch,
                length,
            }
        };
        return Ok(Instruction {
            offset,
            len: reader.position() - offset,
            opcode,
        });
    }

    if op == opcode::TRACK_END {
        return Ok(Instruction {
            offset,
            len: 1,
            opcode: Opcode::TrackEnd,
        });
    }

    let (size, name) = command_info(op).ok_or(DecodeFault::Unknown { op })?;
    let truncated = |_| DecodeFault::Truncated { op };
    let operands = reader.read_bytes(size).map_err(truncated)?;

    let opcode = match op {
        opcode::INSTRUMENT => Opcode::SetInstrument(operands[0]),
        opcode::GATE_TICKS if operands[0] == opcode::GATE_EXTENDED => {
            reader.read_bytes(2).map_err(truncated)?;
            Opcode::Ignored {
                op,
                name: "extended gate time",
            }
        }
        opcode::GATE_TICKS => Opcode::SetGateTicks(operands[0]),
        opcode::VOLUME => Opcode::SetVolume(operands[0]),
        opcode::TEMPO => {
            let first = operands[0];
            if first >= opcode::TEMPO_HUMAN_DELTA {
                let value = reader.read_u8().map_err(truncated)?;
                Opcode::SetTempo(match first {
                    opcode::TEMPO_HUMAN => TempoChange::Human(value),
                    opcode::TEMPO_TIMER_DELTA => TempoChange::TimerBDelta(value as i8),
                    _ => TempoChange::HumanDelta(value as i8),
                })
            } else {
                Opcode::SetTempo(TempoChange::TimerB(first))
            }
        }
        opcode::TIE => Opcode::Tie,
        opcode::SLUR => Opcode::Slur,
        opcode::DETUNE => Opcode::SetDetune(i16::from_le_bytes([operands[0], operands[1]])),
        opcode::DETUNE_ADD => Opcode::DetuneAdd(i16::from_le_bytes([operands[0], operands[1]])),
        opcode::LOOP_START => Opcode::LoopStart,
        opcode::LOOP_END => Opcode::LoopEnd { count: operands[0] },
        opcode::LOOP_BREAK => Opcode::LoopBreak,
        opcode::SONG_LOOP => Opcode::SongLoopMark,
        opcode::TRANSPOSE => Opcode::SetTranspose(operands[0] as i8),
        opcode::TRANSPOSE_ADD => Opcode::TransposeAdd(operands[0] as i8),
        opcode::MASTER_TRANSPOSE => Opcode::SetMasterTranspose(operands[0] as i8),
        opcode::VOLUME_UP => Opcode::VolumeUp,
        opcode::VOLUME_DOWN => Opcode::VolumeDown,
        opcode::VOLUME_UP_BY => Opcode::VolumeUpBy(operands[0]),
        opcode::VOLUME_DOWN_BY => Opcode::VolumeDownBy(operands[0]),
        opcode::SSG_ENVELOPE => Opcode::EnvelopeSet {
            attack: operands[0],
            decay: operands[1] as i8,
            sustain: operands[2],
            release: operands[3],
        },
        opcode::PAN => Opcode::SetPan(operands[0]),
        opcode::PORTAMENTO => Opcode::Portamento {
            from: operands[0],
            to: operands[1],
            length: operands[2],
        },
        opcode::GATE_EIGHTHS => Opcode::SetGatePercent(operands[0]),
        opcode::PART_MASK => {
            // Values from 0xF5 up select a sub-command with one more operand
            if operands[0] >= 0xF5 {
                reader.read_u8().map_err(truncated)?;
            }
            Opcode::Ignored { op, name }
        }
        _ => Opcode::Ignored { op, name },
    };

    Ok(Instruction {
        offset,
        len: reader.position() - offset,
        opcode,
    })
}
