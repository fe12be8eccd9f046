//! Channel state management

use super::envelope::SsgEnvelope;
use crate::pmd::commands::TempoChange;
use crate::pmd::{ChannelId, ChannelKind};
use serde::Serialize;

/// Timer-B/tempo conversion constant of the PMD driver
pub const TEMPO_CONSTANT: u32 = 4396;

/// Human tempo the driver starts with
pub const DEFAULT_TEMPO: u8 = 75;

/// Starting volume per channel family
pub fn default_volume(kind: ChannelKind) -> u8 {
    match kind {
        ChannelKind::Ssg => 8,
        _ => 108,
    }
}

/// Highest volume per channel family
pub fn max_volume(kind: ChannelKind) -> u8 {
    match kind {
        ChannelKind::Ssg => 15,
        _ => 127,
    }
}

/// Step used by `)` and `(`
pub fn volume_step(kind: ChannelKind) -> u8 {
    match kind {
        ChannelKind::Ssg => 1,
        _ => 4,
    }
}

/// Song tempo.
///
/// Only the human value is stored; the Timer-B value is always derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Tempo {
    human: u8,
}

impl Default for Tempo {
    fn default() -> Self {
        Self {
            human: DEFAULT_TEMPO,
        }
    }
}

impl Tempo {
    pub fn from_human(human: u8) -> Self {
        Self {
            human: human.max(1),
        }
    }

    /// `tempo_human = 4396 / (256 - timer_b)`, rounded
    pub fn from_timer_b(timer_b: u8) -> Self {
        let divisor = 256 - timer_b as u32;
        let human = (TEMPO_CONSTANT + divisor / 2) / divisor;
        Self::from_human(human.min(255) as u8)
    }

    pub fn human(self) -> u8 {
        self.human
    }

    /// `timer_b = 256 - 4396 / tempo_human`, rounded
    pub fn timer_b(self) -> u8 {
        let human = self.human as u32;
        let period = (TEMPO_CONSTANT + human / 2) / human;
        256u32.saturating_sub(period).min(255) as u8
    }

    /// Apply a 0xFC update. Relative Timer-B changes are converted through the
    /// human value so that both representations never disagree.
    pub fn apply(self, change: TempoChange) -> Self {
        match change {
            TempoChange::TimerB(value) => Self::from_timer_b(value),
            TempoChange::Human(value) => Self::from_human(value),
            TempoChange::HumanDelta(delta) => {
                Self::from_human(self.human.saturating_add_signed(delta))
            }
            TempoChange::TimerBDelta(delta) => {
                Self::from_timer_b(self.timer_b().saturating_add_signed(delta))
            }
        }
    }
}

/// Gate time, in whichever encoding was last set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Gate {
    /// `q n`: key off n ticks before the note ends
    Ticks(u8),
    /// `Q n`: sound for n/8 of the note
    Eighths(u8),
}

impl Default for Gate {
    fn default() -> Self {
        Gate::Ticks(0)
    }
}

impl Gate {
    /// Ticks between key-off and the nominal end of a note of `duration` ticks
    pub fn ticks_before_end(self, duration: u32) -> u32 {
        match self {
            Gate::Ticks(n) => (n as u32).min(duration),
            Gate::Eighths(q) if q == 0 || q >= 8 => 0,
            Gate::Eighths(q) => duration - duration * q as u32 / 8,
        }
    }

    /// Absolute key-off tick, never earlier than one tick after the start
    pub fn keyoff_tick(self, start: u32, duration: u32) -> u32 {
        let end = start + duration;
        end.saturating_sub(self.ticks_before_end(duration)).max(start + 1)
    }
}

/// Stereo output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Pan {
    Off,
    Right,
    Left,
    Center,
}

impl Default for Pan {
    fn default() -> Self {
        Pan::Center
    }
}

impl Pan {
    /// Decode the `p` operand
    pub fn from_pmd(value: u8) -> Option<Self> {
        match value {
            0 => Some(Pan::Off),
            1 => Some(Pan::Right),
            2 => Some(Pan::Left),
            3 => Some(Pan::Center),
            _ => None,
        }
    }

    /// Operand of the Furnace 08xy effect (x = left, y = right)
    pub fn effect_value(self) -> u8 {
        match self {
            Pan::Off => 0x00,
            Pan::Right => 0x0F,
            Pan::Left => 0xF0,
            Pan::Center => 0xFF,
        }
    }
}

/// One active `[ ... ]` loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoopFrame {
    /// First byte after the loop start opcode
    pub start: usize,
    /// First byte after the matching loop end opcode
    pub exit: usize,
    /// Passes left including the current one
    pub remaining: u8,
}

impl LoopFrame {
    pub fn is_final_pass(&self) -> bool {
        self.remaining <= 1
    }
}

/// Interpreter state for one channel
#[derive(Debug, Clone, Serialize)]
pub struct ChannelState {
    pub channel: ChannelId,
    pub kind: ChannelKind,
    /// Current position in ticks
    pub tick: u32,
    pub instrument: u8,
    pub volume: u8,
    /// `_` transpose
    pub transpose: i8,
    /// `_M` master transpose
    pub master_transpose: i8,
    pub detune: i16,
    pub pan: Pan,
    pub gate: Gate,
    pub envelope: SsgEnvelope,
    pub tempo: Tempo,
    pub loop_stack: Vec<LoopFrame>,
    /// Tick of the `L` mark
    pub loop_tick: Option<u32>,
    /// Next note continues the previous one
    pub tie_pending: bool,
    pub note_count: usize,
}

impl ChannelState {
    pub fn new(channel: ChannelId) -> Self {
        let kind = channel.kind();
        Self {
            channel,
            kind,
            tick: 0,
            instrument: 0,
            volume: default_volume(kind),
            transpose: 0,
            master_transpose: 0,
            detune: 0,
            pan: Pan::default(),
            gate: Gate::default(),
            envelope: SsgEnvelope::default(),
            tempo: Tempo::default(),
            loop_stack: Vec::new(),
            loop_tick: None,
            tie_pending: false,
            note_count: 0,
        }
    }

    /// Combined transpose in semitones
    pub fn total_transpose(&self) -> i32 {
        self.transpose as i32 + self.master_transpose as i32
    }

    pub fn volume_up(&mut self, amount: u8) {
        self.volume = self.volume.saturating_add(amount).min(max_volume(self.kind));
    }

    pub fn volume_down(&mut self, amount: u8) {
        self.volume = self.volume.saturating_sub(amount);
    }

    pub fn set_volume(&mut self, value: u8) {
        self.volume = value.min(max_volume(self.kind));
    }
}
