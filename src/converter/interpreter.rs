//! Bytecode interpreter: one channel's command stream to an event timeline
//!
//! Loops are unrolled while executing, so the produced timeline never
//! references back into the stream. Every `[ ... ]n` body is replayed n times
//! with advancing ticks.

use super::channel::{volume_step, ChannelState, Gate, LoopFrame, Pan};
use super::event::{Event, EventKind, Param, Slide, Timeline};
use super::note;
use crate::error::{Error, Result, Warning, Warnings};
use crate::pmd::commands::{decode, DecodeFault, Opcode};
use crate::pmd::{ChannelId, ChannelKind, ChannelSource, PmdModule, PmdReader};

/// Deepest supported loop nesting
pub const MAX_LOOP_DEPTH: usize = 32;

/// Executed-instruction ceiling per channel
pub const MAX_INSTRUCTIONS: usize = 1_000_000;

/// Read-only context shared by every channel of one module
pub struct Interpreter<'a> {
    data: &'a [u8],
    module: &'a PmdModule,
}

fn decode_error(channel: ChannelId, offset: usize, message: impl ToString) -> Error {
    Error::Decode {
        channel: channel.to_string(),
        offset,
        message: message.to_string(),
    }
}

/// Per-run mutable state
struct Run<'w> {
    state: ChannelState,
    events: Vec<Event>,
    /// Index of the event for the note currently sounding
    sounding: Option<usize>,
    warnings: &'w mut Warnings,
}

impl Run<'_> {
    fn push(&mut self, kind: EventKind) -> usize {
        self.events
            .push(Event::new(self.state.tick, self.state.channel, kind));
        self.events.len() - 1
    }

    fn param(&mut self, param: Param) {
        self.push(EventKind::ParamChange(param));
    }

    fn warn_unsupported(&mut self, feature: impl Into<String>) {
        self.warnings
            .push(Warning::unsupported(self.state.channel, feature));
    }

    fn rest(&mut self, length: u8) {
        self.state.tie_pending = false;
        self.sounding = None;
        self.push(EventKind::NoteOff {
            duration: length as u32,
        });
        self.state.tick += length as u32;
    }

    /// Clear the key-off of the sounding note so it runs into the next one
    fn hold_sounding(&mut self) {
        if let Some(index) = self.sounding {
            match &mut self.events[index].kind {
                EventKind::NoteOn { gate, .. } | EventKind::Tie { gate, .. } => {
                    *gate = Gate::default();
                }
                _ => {}
            }
        }
    }

    /// Start or continue a note
    fn sound(&mut self, note: u8, length: u8, slide: Option<Slide>) {
        let gate = self.state.gate;
        let duration = length as u32;
        let tied = std::mem::take(&mut self.state.tie_pending);

        if tied {
            if let Some(index) = self.sounding {
                let event = &mut self.events[index];
                if slide.is_none() && event.note() == Some(note) {
                    if let EventKind::NoteOn {
                        duration: d,
                        gate: g,
                        ..
                    }
                    | EventKind::Tie {
                        duration: d,
                        gate: g,
                        ..
                    } = &mut event.kind
                    {
                        *d += duration;
                        *g = gate;
                    }
                    self.state.tick += duration;
                    return;
                }

                self.hold_sounding();
                let index = self.push(EventKind::Tie {
                    note,
                    duration,
                    gate,
                    slide,
                });
                self.sounding = Some(index);
                self.state.tick += duration;
                return;
            }
        }

        let index = self.push(EventKind::NoteOn {
            note,
            duration,
            gate,
            slide,
        });
        self.sounding = Some(index);
        self.state.note_count += 1;
        self.state.tick += duration;
    }
}

impl<'a> Interpreter<'a> {
    pub fn new(data: &'a [u8], module: &'a PmdModule) -> Self {
        Self { data, module }
    }

    /// Execute one channel and return its unrolled timeline
    pub fn run(&self, source: &ChannelSource, warnings: &mut Warnings) -> Result<Timeline> {
        let channel = source.id;
        let kind = channel.kind();
        let mut reader = PmdReader::with_range(self.data, source.start, source.end);
        let mut run = Run {
            state: ChannelState::new(channel),
            events: Vec::new(),
            sounding: None,
            warnings,
        };
        let mut executed = 0usize;

        while !reader.is_eof() {
            executed += 1;
            if executed > MAX_INSTRUCTIONS {
                return Err(decode_error(
                    channel,
                    reader.position(),
                    format!("more than {} instructions executed", MAX_INSTRUCTIONS),
                ));
            }

            let offset = reader.position();
            let ins = decode(&mut reader, kind).map_err(|fault| decode_error(channel, offset, fault))?;

            match ins.opcode {
                Opcode::TrackEnd => break,

                Opcode::Note {
                    octave,
                    pitch,
                    length,
                } => {
                    if pitch >= 12 {
                        run.warn_unsupported(format!("pitch nibble {:#x} played as rest", pitch));
                        run.rest(length);
                        continue;
                    }
                    match note::to_furnace(kind, octave, pitch, run.state.total_transpose()) {
                        Some(n) => run.sound(n, length, None),
                        None => {
                            run.warnings.push(Warning::overflow(
                                channel,
                                format!("note o{} {} outside playable range dropped", octave, pitch),
                            ));
                            run.rest(length);
                        }
                    }
                }
                Opcode::Rest { length } => run.rest(length),
                Opcode::Tie | Opcode::Slur => run.state.tie_pending = true,

                Opcode::Portamento { from, to, length } => {
                    let transpose = run.state.total_transpose();
                    let (o1, p1) = note::unpack(from);
                    let (o2, p2) = note::unpack(to);
                    let start = note::to_furnace(kind, o1, p1, transpose).filter(|_| p1 < 12);
                    let target = note::to_furnace(kind, o2, p2, transpose).filter(|_| p2 < 12);
                    match (start, target) {
                        (Some(start), Some(target)) => {
                            let slide = Slide {
                                target,
                                ticks: length as u32,
                            };
                            run.sound(start, length, Some(slide));
                        }
                        _ => {
                            run.warnings.push(Warning::overflow(
                                channel,
                                "portamento outside playable range dropped",
                            ));
                            run.rest(length);
                        }
                    }
                }

                Opcode::SetInstrument(id) => match kind {
                    ChannelKind::Ssg => {
                        run.warn_unsupported(format!("SSG instrument preset @{}", id));
                    }
                    _ => {
                        if kind == ChannelKind::Fm && self.module.instrument(id).is_none() {
                            run.warn_unsupported(format!("undefined FM instrument @{}", id));
                        }
                        run.state.instrument = id;
                        run.param(Param::Instrument(id));
                    }
                },

                Opcode::SetVolume(value) => {
                    run.state.set_volume(value);
                    run.param(Param::Volume(run.state.volume));
                }
                Opcode::VolumeUp => {
                    run.state.volume_up(volume_step(kind));
                    run.param(Param::Volume(run.state.volume));
                }
                Opcode::VolumeDown => {
                    run.state.volume_down(volume_step(kind));
                    run.param(Param::Volume(run.state.volume));
                }
                Opcode::VolumeUpBy(amount) => {
                    run.state.volume_up(amount);
                    run.param(Param::Volume(run.state.volume));
                }
                Opcode::VolumeDownBy(amount) => {
                    run.state.volume_down(amount);
                    run.param(Param::Volume(run.state.volume));
                }

                Opcode::SetTempo(change) => {
                    run.state.tempo = run.state.tempo.apply(change);
                    run.param(Param::Tempo(run.state.tempo.human()));
                }

                Opcode::SetDetune(value) => {
                    run.state.detune = value;
                    run.param(Param::Detune(value));
                }
                Opcode::DetuneAdd(delta) => {
                    run.state.detune = run.state.detune.saturating_add(delta);
                    run.param(Param::Detune(run.state.detune));
                }

                Opcode::SetTranspose(value) => run.state.transpose = value,
                Opcode::TransposeAdd(delta) => {
                    run.state.transpose = run.state.transpose.saturating_add(delta);
                }
                Opcode::SetMasterTranspose(value) => run.state.master_transpose = value,

                Opcode::SetPan(value) => match Pan::from_pmd(value) {
                    Some(pan) => {
                        run.state.pan = pan;
                        run.param(Param::Pan(pan));
                    }
                    None => run.warn_unsupported(format!("pan value {}", value)),
                },

                Opcode::SetGateTicks(ticks) => run.state.gate = Gate::Ticks(ticks),
                Opcode::SetGatePercent(eighths) => run.state.gate = Gate::Eighths(eighths),

                Opcode::LoopStart => {
                    if run.state.loop_stack.len() >= MAX_LOOP_DEPTH {
                        return Err(decode_error(
                            channel,
                            offset,
                            format!("loops nested deeper than {}", MAX_LOOP_DEPTH),
                        ));
                    }
                    let body = reader.position();
                    match self.find_loop_end(channel, body, source.end)? {
                        Some((count, exit)) => {
                            if count == 0 {
                                run.warn_unsupported("endless loop played once");
                            }
                            run.state.loop_stack.push(LoopFrame {
                                start: body,
                                exit,
                                remaining: count.max(1),
                            });
                        }
                        None => run.warn_unsupported("loop without matching end"),
                    }
                }
                Opcode::LoopEnd { .. } => match run.state.loop_stack.last_mut() {
                    Some(frame) if frame.remaining > 1 => {
                        frame.remaining -= 1;
                        reader.seek(frame.start);
                    }
                    Some(_) => {
                        run.state.loop_stack.pop();
                    }
                    None => run.warn_unsupported("loop end without matching start"),
                },
                Opcode::LoopBreak => match run.state.loop_stack.last() {
                    Some(frame) => {
                        if frame.is_final_pass() {
                            reader.seek(frame.exit);
                            run.state.loop_stack.pop();
                        }
                    }
                    None => run.warn_unsupported("loop break outside a loop"),
                },

                Opcode::SongLoopMark => {
                    if run.state.loop_tick.is_none() {
                        log::debug!("{}: song loop mark at tick {}", channel, run.state.tick);
                        run.state.loop_tick = Some(run.state.tick);
                    }
                }

                Opcode::EnvelopeSet {
                    attack,
                    decay,
                    sustain,
                    release,
                } => {
                    if kind == ChannelKind::Ssg {
                        run.state.envelope = super::envelope::SsgEnvelope {
                            attack,
                            decay,
                            sustain,
                            release,
                        };
                        run.param(Param::Envelope(run.state.envelope));
                    } else {
                        run.warn_unsupported("SSG envelope on a non-SSG part");
                    }
                }

                Opcode::RhythmPattern(_) => run.warn_unsupported("rhythm part not converted"),
                Opcode::Ignored { name, .. } => run.warn_unsupported(name),
            }
        }

        if !run.state.loop_stack.is_empty() {
            run.warn_unsupported("channel ended inside a loop");
            run.state.loop_stack.clear();
        }

        match kind {
            ChannelKind::Adpcm if run.state.note_count > 0 => {
                run.warn_unsupported("ADPCM part not converted");
            }
            _ => {}
        }

        let end_tick = run.state.tick;
        let loop_tick = run.state.loop_tick;
        Ok(Timeline {
            channel,
            events: run.events,
            loop_tick,
            end_tick,
            state: run.state,
        })
    }

    /// Locate the loop end matching a loop start whose body begins at `from`.
    ///
    /// Returns the repeat count and the offset just past the loop end.
    fn find_loop_end(&self, channel: ChannelId, from: usize, end: usize) -> Result<Option<(u8, usize)>> {
        let mut reader = PmdReader::with_range(self.data, from, end);
        let mut depth = 0usize;

        while !reader.is_eof() {
            let offset = reader.position();
            let ins = decode(&mut reader, channel.kind())
                .map_err(|fault: DecodeFault| decode_error(channel, offset, fault))?;
            match ins.opcode {
                Opcode::LoopStart => depth += 1,
                Opcode::LoopEnd { count } => {
                    if depth == 0 {
                        return Ok(Some((count, reader.position())));
                    }
                    depth -= 1;
                }
                Opcode::TrackEnd => break,
                _ => {}
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_bytes(id: u8, stream: &[u8]) -> (Timeline, Warnings) {
        let module = PmdModule::default();
        let source = ChannelSource {
            id: ChannelId(id),
            start: 0,
            end: stream.len(),
        };
        let mut warnings = Warnings::new();
        let timeline = Interpreter::new(stream, &module)
            .run(&source, &mut warnings)
            .unwrap();
        (timeline, warnings)
    }

    fn notes(timeline: &Timeline) -> Vec<(u32, u8, u32)> {
        timeline
            .events
            .iter()
            .filter_map(|e| match e.kind {
                EventKind::NoteOn { note, duration, .. } => Some((e.tick, note, duration)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_notes_advance_ticks() {
        let (timeline, _) = run_bytes(0, &[0x40, 24, 0x4F, 12, 0x42, 6, 0x80]);
        assert_eq!(notes(&timeline), vec![(0, 108, 24), (36, 110, 6)]);
        assert_eq!(timeline.end_tick, 42);
    }

    #[test]
    fn test_ticks_never_decrease() {
        let (timeline, _) = run_bytes(
            6,
            &[0x30, 6, 0xFD, 12, 0x3F, 3, 0xFC, 0xFF, 100, 0x35, 12, 0x80],
        );
        let ticks: Vec<u32> = timeline.events.iter().map(|e| e.tick).collect();
        assert!(ticks.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_loop_repeats_body() {
        // [ c8 d8 ]3
        let stream = [
            0xF9, 0, 0, 0x40, 12, 0x42, 12, 0xF8, 3, 0, 0, 0, 0x80,
        ];
        let (timeline, _) = run_bytes(0, &stream);
        let got = notes(&timeline);
        assert_eq!(got.len(), 6);
        for (i, pair) in got.chunks(2).enumerate() {
            let base = i as u32 * 24;
            assert_eq!(pair[0], (base, 108, 12));
            assert_eq!(pair[1], (base + 12, 110, 12));
        }
    }

    #[test]
    fn test_loop_break_on_final_pass_only() {
        // [ c8 : d8 ]3 e8
        let stream = [
            0xF9, 0, 0, 0x40, 12, 0xF7, 0, 0, 0x42, 12, 0xF8, 3, 0, 0, 0, 0x44, 12, 0x80,
        ];
        let (timeline, _) = run_bytes(0, &stream);
        let pitches: Vec<u8> = notes(&timeline).iter().map(|n| n.1).collect();
        assert_eq!(pitches, vec![108, 110, 108, 110, 108, 112]);
        assert!(timeline.state.loop_stack.is_empty());
    }

    #[test]
    fn test_nested_loops() {
        // [ [ c16 ]2 d16 ]2
        let stream = [
            0xF9, 0, 0, 0xF9, 0, 0, 0x40, 6, 0xF8, 2, 0, 0, 0, 0x42, 6, 0xF8, 2, 0, 0, 0, 0x80,
        ];
        let (timeline, _) = run_bytes(0, &stream);
        let pitches: Vec<u8> = notes(&timeline).iter().map(|n| n.1).collect();
        assert_eq!(pitches, vec![108, 108, 110, 108, 108, 110]);
        assert_eq!(timeline.end_tick, 36);
    }

    fn nested(depth: usize, count: u8, body: &[u8]) -> Vec<u8> {
        let mut stream = [0xF9, 0, 0].repeat(depth);
        stream.extend_from_slice(body);
        for _ in 0..depth {
            stream.extend_from_slice(&[0xF8, count, 0, 0, 0]);
        }
        stream.push(0x80);
        stream
    }

    fn run_err(id: u8, stream: &[u8]) -> Error {
        let module = PmdModule::default();
        let source = ChannelSource {
            id: ChannelId(id),
            start: 0,
            end: stream.len(),
        };
        Interpreter::new(stream, &module)
            .run(&source, &mut Warnings::new())
            .unwrap_err()
    }

    #[test]
    fn test_eight_deep_loops() {
        let (timeline, warnings) = run_bytes(0, &nested(8, 2, &[0x40, 1]));
        let got = notes(&timeline);
        assert_eq!(got.len(), 256);
        assert_eq!(got.last(), Some(&(255, 108, 1)));
        assert_eq!(timeline.end_tick, 256);
        assert!(timeline.state.loop_stack.is_empty());
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_loop_depth_limit() {
        let (timeline, _) = run_bytes(0, &nested(MAX_LOOP_DEPTH, 1, &[0x40, 1]));
        assert_eq!(notes(&timeline).len(), 1);

        match run_err(0, &nested(MAX_LOOP_DEPTH + 1, 1, &[0x40, 1])) {
            Error::Decode { offset, message, .. } => {
                assert_eq!(offset, MAX_LOOP_DEPTH * 3);
                assert!(message.contains("nested deeper"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_runaway_loops_stop() {
        // 255^3 passes over an empty body
        match run_err(0, &nested(3, 255, &[])) {
            Error::Decode { message, .. } => {
                assert!(message.contains("instructions executed"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_endless_loop_plays_once() {
        let stream = [0xF9, 0, 0, 0x40, 12, 0xF8, 0, 0, 0, 0, 0x80];
        let (timeline, warnings) = run_bytes(0, &stream);
        assert_eq!(notes(&timeline).len(), 1);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_tie_merges_same_pitch() {
        let stream = [0x40, 4, 0xFB, 0x40, 4, 0xFB, 0x40, 4, 0x80];
        let (timeline, _) = run_bytes(0, &stream);
        assert_eq!(notes(&timeline), vec![(0, 108, 12)]);
        assert_eq!(timeline.events.len(), 1);
    }

    #[test]
    fn test_tie_across_loop_iterations() {
        // [ c4 & ]2 c4
        let stream = [0xF9, 0, 0, 0x40, 24, 0xFB, 0xF8, 2, 0, 0, 0, 0x40, 24, 0x80];
        let (timeline, _) = run_bytes(0, &stream);
        assert_eq!(notes(&timeline), vec![(0, 108, 72)]);
    }

    #[test]
    fn test_tie_to_new_pitch() {
        let stream = [0xFE, 3, 0x40, 12, 0xFB, 0x42, 12, 0x80];
        let (timeline, _) = run_bytes(0, &stream);
        assert_eq!(timeline.events.len(), 2);
        match timeline.events[0].kind {
            EventKind::NoteOn { gate, .. } => assert_eq!(gate, Gate::Ticks(0)),
            ref other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            timeline.events[1].kind,
            EventKind::Tie {
                note: 110,
                duration: 12,
                gate: Gate::Ticks(3),
                ..
            }
        ));
    }

    #[test]
    fn test_transpose_and_ssg_octave() {
        let stream = [0xF5, 2, 0x40, 6, 0xE7, 0xFF, 0x40, 6, 0x80];
        let (timeline, _) = run_bytes(6, &stream);
        let pitches: Vec<u8> = notes(&timeline).iter().map(|n| n.1).collect();
        assert_eq!(pitches, vec![122, 121]);
    }

    #[test]
    fn test_tempo_and_volume_params() {
        let stream = [0xFC, 0xFF, 120, 0xFD, 100, 0xF4, 0x40, 6, 0x80];
        let (timeline, _) = run_bytes(0, &stream);
        assert_eq!(timeline.initial_tempo(), Some(120));
        let volumes: Vec<u8> = timeline
            .events
            .iter()
            .filter_map(|e| match e.kind {
                EventKind::ParamChange(Param::Volume(v)) => Some(v),
                _ => None,
            })
            .collect();
        assert_eq!(volumes, vec![100, 104]);
    }

    #[test]
    fn test_song_loop_mark() {
        let stream = [0x40, 24, 0xF6, 0x42, 24, 0x80];
        let (timeline, _) = run_bytes(0, &stream);
        assert_eq!(timeline.loop_tick, Some(24));
    }

    #[test]
    fn test_portamento_event() {
        // { c e }8
        let stream = [0xDA, 0x40, 0x44, 12, 0x80];
        let (timeline, _) = run_bytes(0, &stream);
        assert_eq!(
            timeline.events[0].kind,
            EventKind::NoteOn {
                note: 108,
                duration: 12,
                gate: Gate::Ticks(0),
                slide: Some(Slide {
                    target: 112,
                    ticks: 12
                }),
            }
        );
    }

    #[test]
    fn test_unmapped_opcode_warns_and_keeps_alignment() {
        let stream = [0xE0, 3, 0x40, 6, 0xEF, 0x28, 0x01, 0x42, 6, 0x80];
        let (timeline, warnings) = run_bytes(0, &stream);
        assert_eq!(notes(&timeline).len(), 2);
        assert_eq!(warnings.len(), 2);
    }

    #[test]
    fn test_invalid_pitch_is_rest() {
        let stream = [0x4C, 6, 0x40, 6, 0x80];
        let (timeline, warnings) = run_bytes(0, &stream);
        assert_eq!(notes(&timeline), vec![(6, 108, 6)]);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_unknown_opcode_error() {
        let module = PmdModule::default();
        let stream = [0x40, 6, 0x95, 0x80];
        let source = ChannelSource {
            id: ChannelId(1),
            start: 0,
            end: stream.len(),
        };
        let err = Interpreter::new(&stream, &module)
            .run(&source, &mut Warnings::new())
            .unwrap_err();
        match err {
            Error::Decode {
                channel, offset, ..
            } => {
                assert_eq!(channel, "FM-B");
                assert_eq!(offset, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_truncated_stream_error() {
        let module = PmdModule::default();
        let stream = [0x40, 6, 0xF0, 1, 2];
        let source = ChannelSource {
            id: ChannelId(6),
            start: 0,
            end: stream.len(),
        };
        let result = Interpreter::new(&stream, &module).run(&source, &mut Warnings::new());
        assert!(matches!(result, Err(Error::Decode { offset: 2, .. })));
    }
}
