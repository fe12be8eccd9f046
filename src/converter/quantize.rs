//! Timeline quantizer: tick-stamped events to fixed-size rows

use super::channel::Pan;
use super::envelope::SsgEnvelope;
use super::event::{EventKind, Param, Slide, Timeline};
use crate::error::{Warning, Warnings};
use crate::fur::header::effect;
use crate::pmd::{ChannelId, ChannelKind};

/// Instrument a row asks for, resolved to an index by the encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstrumentRef {
    /// PMD `@` number on an FM part
    Fm(u8),
    /// Envelope-driven instrument on an SSG part
    Ssg(SsgEnvelope),
}

/// Note cell contents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowNote {
    On(u8),
    /// Key off (FM)
    Off,
    /// Macro release (SSG)
    Release,
}

/// Effect column entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Effect {
    pub code: u8,
    pub value: u8,
}

impl Effect {
    pub fn new(code: u8, value: u8) -> Self {
        Self { code, value }
    }

    /// Jumps and tempo changes must stay on their row
    pub fn is_urgent(&self) -> bool {
        matches!(self.code, effect::JUMP | effect::VIRTUAL_TEMPO)
    }
}

/// One row of one channel
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    pub note: Option<RowNote>,
    pub instrument: Option<InstrumentRef>,
    pub volume: Option<u8>,
    pub effects: Vec<Effect>,
}

impl Row {
    pub fn is_empty(&self) -> bool {
        self.note.is_none()
            && self.instrument.is_none()
            && self.volume.is_none()
            && self.effects.is_empty()
    }
}

/// Quantizer settings shared by every channel
#[derive(Debug, Clone, Copy)]
pub struct Grid {
    pub ticks_per_row: u32,
    pub total_rows: usize,
    /// Tempo already in effect at row 0
    pub initial_tempo: u8,
}

impl Grid {
    pub fn row_of(&self, tick: u32) -> usize {
        (tick / self.ticks_per_row) as usize
    }

    /// First row starting at or after `tick`
    pub fn row_at_or_after(&self, tick: u32) -> usize {
        tick.div_ceil(self.ticks_per_row) as usize
    }
}

/// Widest pitch distance a single E1xy/E2xy can express
pub const MAX_SLIDE_SEMITONES: u8 = 15;

/// Slide speed for a one-row slide; longer slides divide it by their row count
const SLIDE_SPEED_SCALE: u32 = 32;

/// E5xx operand for a PMD detune value; None when it does not fit
pub fn detune_value(detune: i16) -> Option<u8> {
    u8::try_from(0x80 + (detune as i32).div_euclid(4)).ok()
}

/// E1xy/E2xy for a slide from `from`; None when the pitch does not move
pub fn slide_effect(from: u8, slide: Slide, ticks_per_row: u32) -> Option<Effect> {
    let diff = slide.target as i32 - from as i32;
    if diff == 0 {
        return None;
    }
    let semitones = diff.unsigned_abs().min(MAX_SLIDE_SEMITONES as u32) as u8;
    let rows = (slide.ticks / ticks_per_row).max(1);
    let speed = (SLIDE_SPEED_SCALE / rows).clamp(1, 15) as u8;
    let code = if diff > 0 {
        effect::SLIDE_UP
    } else {
        effect::SLIDE_DOWN
    };
    Some(Effect::new(code, (speed << 4) | semitones))
}

/// What has already been written to the pattern
struct Written {
    instrument: Option<InstrumentRef>,
    volume: Option<u8>,
    detune: i16,
    tempo: u8,
}

/// Quantize one channel's timeline onto `grid`
pub fn quantize(timeline: &Timeline, grid: &Grid, warnings: &mut Warnings) -> Vec<Row> {
    let channel = timeline.channel;
    let kind = channel.kind();
    let tpr = grid.ticks_per_row;
    let mut rows = vec![Row::default(); grid.total_rows];

    // Ticks at which a note cell (or a continuation) begins
    let starts: Vec<u32> = timeline
        .events
        .iter()
        .filter(|e| e.note().is_some())
        .map(|e| e.tick)
        .collect();
    let next_start_after = |tick: u32| {
        let index = starts.partition_point(|&s| s <= tick);
        starts.get(index).copied()
    };

    let mut written = Written {
        instrument: None,
        volume: None,
        detune: 0,
        tempo: grid.initial_tempo,
    };
    let mut fm_instrument = 0u8;
    let mut envelope = SsgEnvelope::default();
    let mut volume = super::channel::default_volume(kind);
    let mut detune = 0i16;
    let mut pending_pan: Option<Pan> = None;
    // (note, end tick) of the note currently sounding
    let mut sounding: Option<(u8, u32)> = None;

    for event in &timeline.events {
        let tick = event.tick;
        let row = grid.row_of(tick);

        match event.kind {
            EventKind::ParamChange(param) => match param {
                Param::Instrument(id) => fm_instrument = id,
                Param::Envelope(env) => envelope = env,
                Param::Volume(v) => volume = v,
                Param::Detune(d) => detune = d,
                Param::Tempo(t) => {
                    if t != written.tempo && row < rows.len() {
                        written.tempo = t;
                        rows[row]
                            .effects
                            .push(Effect::new(effect::VIRTUAL_TEMPO, t));
                    }
                }
                Param::Pan(pan) => {
                    let mid_note = sounding.is_some_and(|(_, end)| tick < end);
                    if mid_note && row < rows.len() {
                        rows[row]
                            .effects
                            .push(Effect::new(effect::PAN, pan.effect_value()));
                        pending_pan = None;
                    } else {
                        pending_pan = Some(pan);
                    }
                }
            },

            EventKind::NoteOff { .. } => sounding = None,

            EventKind::NoteOn {
                note,
                duration,
                gate,
                slide,
            }
            | EventKind::Tie {
                note,
                duration,
                gate,
                slide,
            } => {
                if row >= rows.len() {
                    warnings.push(Warning::overflow(
                        channel,
                        format!("notes past row {} dropped", rows.len()),
                    ));
                    continue;
                }
                let end = tick + duration;
                let continues = matches!(event.kind, EventKind::Tie { .. })
                    && sounding.is_some_and(|(n, _)| n == note);

                if !continues {
                    if let Some(RowNote::On(_)) = rows[row].note {
                        warnings.push(Warning::overflow(
                            channel,
                            format!("two notes start in row {}; the later one is kept", row),
                        ));
                    }
                    let target = &mut rows[row];
                    target.note = Some(RowNote::On(note));

                    let instrument = match kind {
                        ChannelKind::Ssg => InstrumentRef::Ssg(envelope),
                        _ => InstrumentRef::Fm(fm_instrument),
                    };
                    if written.instrument != Some(instrument) {
                        target.instrument = Some(instrument);
                        written.instrument = Some(instrument);
                    }
                    if written.volume != Some(volume) {
                        target.volume = Some(volume);
                        written.volume = Some(volume);
                    }
                    if detune != written.detune {
                        let value = match detune_value(detune) {
                            Some(value) => value,
                            None => {
                                warnings.push(Warning::overflow(
                                    channel,
                                    format!("detune {} clamped to the E5 range", detune),
                                ));
                                if detune < 0 { 0x00 } else { 0xFF }
                            }
                        };
                        target.effects.push(Effect::new(effect::DETUNE, value));
                        written.detune = detune;
                    }
                    if let Some(pan) = pending_pan.take() {
                        target
                            .effects
                            .push(Effect::new(effect::PAN, pan.effect_value()));
                    }
                }

                let next_start = next_start_after(tick);

                if let Some(slide) = slide {
                    if slide.target.abs_diff(note) > MAX_SLIDE_SEMITONES {
                        warnings.push(Warning::overflow(
                            channel,
                            format!(
                                "slide from {} to {} limited to {} semitones",
                                note, slide.target, MAX_SLIDE_SEMITONES
                            ),
                        ));
                    }
                    if let Some(fx) = slide_effect(note, slide, tpr) {
                        rows[row].effects.push(fx);
                        let slide_end = tick + slide.ticks;
                        let stop_row = grid.row_at_or_after(slide_end);
                        let cancelled = next_start.is_some_and(|s| s < slide_end);
                        if !cancelled && stop_row < rows.len() {
                            rows[stop_row]
                                .effects
                                .push(Effect::new(effect::SLIDE_DOWN, 0x00));
                        }
                    }
                }

                place_keyoff(
                    &mut rows,
                    grid,
                    kind,
                    tick,
                    duration,
                    gate.keyoff_tick(tick, duration),
                    next_start.map(|s| grid.row_of(s)),
                );
                sounding = Some((note, end));
            }
        }
    }

    rows
}

/// Place the key-off for a note starting at `start`
fn place_keyoff(
    rows: &mut [Row],
    grid: &Grid,
    kind: ChannelKind,
    start: u32,
    duration: u32,
    keyoff: u32,
    next_start_row: Option<usize>,
) {
    let end = start + duration;
    let start_row = grid.row_of(start);
    let end_row = grid.row_at_or_after(end).max(start_row + 1);
    let keyoff_row = grid.row_of(keyoff);
    let marker = match kind {
        ChannelKind::Ssg => RowNote::Release,
        _ => RowNote::Off,
    };

    if keyoff < end && keyoff_row == start_row {
        let row_start = start_row as u32 * grid.ticks_per_row;
        let delay = (keyoff - row_start).min(255) as u8;
        rows[start_row]
            .effects
            .push(Effect::new(effect::NOTE_CUT, delay));
        return;
    }

    let target = if keyoff < end && keyoff_row + 1 < end_row {
        keyoff_row
    } else {
        end_row
    };
    if next_start_row.is_some_and(|r| r <= target) {
        return;
    }
    if let Some(row) = rows.get_mut(target) {
        if row.note.is_none() {
            row.note = Some(marker);
        }
    }
}

/// Resolve effect-column overflow.
///
/// Non-urgent effects beyond `max_columns` move to the next row; whatever
/// still does not fit on the last row is dropped with a warning.
pub fn fit_effects(rows: &mut [Row], max_columns: usize, channel: ChannelId, warnings: &mut Warnings) {
    let count = rows.len();
    for i in 0..count {
        while rows[i].effects.len() > max_columns {
            let movable = rows[i].effects.iter().rposition(|fx| !fx.is_urgent());
            let index = movable.unwrap_or(rows[i].effects.len() - 1);
            let fx = rows[i].effects.remove(index);
            if movable.is_some() && i + 1 < count {
                rows[i + 1].effects.insert(0, fx);
            } else {
                warnings.push(Warning::overflow(
                    channel,
                    format!(
                        "effect {:02X}{:02X} dropped at row {}: no free effect column",
                        fx.code, fx.value, i
                    ),
                ));
            }
        }
    }
}
