//! Timeline events produced by the interpreter

use super::channel::{ChannelState, Gate, Pan};
use super::envelope::SsgEnvelope;
use crate::pmd::ChannelId;
use serde::Serialize;

/// Pitch slide towards `target` over `ticks`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Slide {
    pub target: u8,
    pub ticks: u32,
}

/// Channel parameter update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "param", content = "value", rename_all = "snake_case")]
pub enum Param {
    /// PMD `@` number
    Instrument(u8),
    Volume(u8),
    /// Human tempo value
    Tempo(u8),
    Detune(i16),
    Pan(Pan),
    Envelope(SsgEnvelope),
}

/// Event data types
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// Key-on of a new note (Furnace note number)
    NoteOn {
        note: u8,
        duration: u32,
        gate: Gate,
        #[serde(skip_serializing_if = "Option::is_none")]
        slide: Option<Slide>,
    },
    /// Continuation of the sounding note, possibly at a new pitch
    Tie {
        note: u8,
        duration: u32,
        gate: Gate,
        #[serde(skip_serializing_if = "Option::is_none")]
        slide: Option<Slide>,
    },
    /// Silence (rest)
    NoteOff { duration: u32 },
    ParamChange(Param),
}

/// Event with timing and channel info
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    /// Absolute tick
    pub tick: u32,
    pub channel: ChannelId,
    pub kind: EventKind,
}

impl Event {
    pub fn new(tick: u32, channel: ChannelId, kind: EventKind) -> Self {
        Self {
            tick,
            channel,
            kind,
        }
    }

    pub fn param(tick: u32, channel: ChannelId, param: Param) -> Self {
        Self::new(tick, channel, EventKind::ParamChange(param))
    }

    /// Duration of a note, tie or rest
    pub fn duration(&self) -> Option<u32> {
        match self.kind {
            EventKind::NoteOn { duration, .. }
            | EventKind::Tie { duration, .. }
            | EventKind::NoteOff { duration } => Some(duration),
            EventKind::ParamChange(_) => None,
        }
    }

    /// Note number of a sounding event
    pub fn note(&self) -> Option<u8> {
        match self.kind {
            EventKind::NoteOn { note, .. } | EventKind::Tie { note, .. } => Some(note),
            _ => None,
        }
    }
}

/// One channel's fully unrolled event list
#[derive(Debug, Clone, Serialize)]
pub struct Timeline {
    pub channel: ChannelId,
    pub events: Vec<Event>,
    /// Tick of the song loop mark, if any
    pub loop_tick: Option<u32>,
    /// Tick after the last event
    pub end_tick: u32,
    /// State when the channel ended
    pub state: ChannelState,
}

impl Timeline {
    pub fn note_count(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e.kind, EventKind::NoteOn { .. }))
            .count()
    }

    pub fn has_notes(&self) -> bool {
        self.note_count() > 0
    }

    /// First tempo set before any time has passed
    pub fn initial_tempo(&self) -> Option<u8> {
        self.events
            .iter()
            .take_while(|e| e.tick == 0)
            .find_map(|e| match e.kind {
                EventKind::ParamChange(Param::Tempo(t)) => Some(t),
                _ => None,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note_on(tick: u32, note: u8, duration: u32) -> Event {
        Event::new(
            tick,
            ChannelId(0),
            EventKind::NoteOn {
                note,
                duration,
                gate: Gate::default(),
                slide: None,
            },
        )
    }

    #[test]
    fn test_event_accessors() {
        let ev = note_on(0, 108, 24);
        assert_eq!(ev.duration(), Some(24));
        assert_eq!(ev.note(), Some(108));
        let rest = Event::new(24, ChannelId(0), EventKind::NoteOff { duration: 12 });
        assert_eq!(rest.duration(), Some(12));
        assert_eq!(rest.note(), None);
    }

    #[test]
    fn test_initial_tempo() {
        let timeline = Timeline {
            channel: ChannelId(0),
            events: vec![
                Event::param(0, ChannelId(0), Param::Volume(100)),
                Event::param(0, ChannelId(0), Param::Tempo(120)),
                note_on(0, 108, 24),
                Event::param(24, ChannelId(0), Param::Tempo(90)),
            ],
            loop_tick: None,
            end_tick: 24,
            state: ChannelState::new(ChannelId(0)),
        };
        assert_eq!(timeline.initial_tempo(), Some(120));
        assert_eq!(timeline.note_count(), 1);
    }
}
