//! Integration tests for PMD conversion
//!
//! These tests build PMD images in memory, convert them and verify the
//! output by parsing it back with the Furnace reader.

use pmd2fur::converter::quantize::Effect;
use pmd2fur::fur::header::{effect, ins_type, note};
use pmd2fur::fur::{reader, FurSong, PatternRow};
use pmd2fur::{ConvertOptions, Conversion, Converter, Error, Warning};
use tempfile::tempdir;

const HEADER_SIZE: usize = 27;

/// Build a PMD image from (part index, stream) pairs plus an optional FM
/// voice table and trailing bytes
fn pmd_image(parts: &[(usize, &[u8])], voices: &[[u8; 26]], tail: &[u8]) -> Vec<u8> {
    let mut data = vec![0u8; HEADER_SIZE];
    for &(part, stream) in parts {
        let raw = (data.len() - 1) as u16;
        data[1 + part * 2..3 + part * 2].copy_from_slice(&raw.to_le_bytes());
        data.extend_from_slice(stream);
    }
    if !voices.is_empty() {
        let raw = (data.len() - 1) as u16;
        data[25..27].copy_from_slice(&raw.to_le_bytes());
        for voice in voices {
            data.extend_from_slice(voice);
        }
        data.extend_from_slice(&[0x00, 0xFF]);
    }
    data.extend_from_slice(tail);
    data
}

fn voice(id: u8, alg: u8) -> [u8; 26] {
    let mut record = [0u8; 26];
    record[0] = id;
    for slot in 0..4 {
        record[1 + slot] = 0x01; // MUL 1
        record[9 + slot] = 0x1F; // AR 31
        record[21 + slot] = 0x0F; // RR 15
    }
    record[25] = alg;
    record
}

fn convert_with(options: ConvertOptions, data: &[u8]) -> (Conversion, FurSong) {
    let conversion = Converter::new(options)
        .convert(data)
        .expect("Conversion failed");
    let song = reader::parse(&conversion.data).expect("Failed to parse output");
    (conversion, song)
}

fn convert(data: &[u8]) -> (Conversion, FurSong) {
    convert_with(ConvertOptions::default(), data)
}

/// Rows of a channel that carry a note, as (row, note)
fn notes(song: &FurSong, channel: usize) -> Vec<(usize, u8)> {
    song.channel_rows(channel)
        .iter()
        .enumerate()
        .filter_map(|(i, row)| row.note.map(|n| (i, n)))
        .collect()
}

fn all_effects(song: &FurSong, channel: usize) -> Vec<(usize, Effect)> {
    song.channel_rows(channel)
        .iter()
        .enumerate()
        .flat_map(|(i, row)| row.effects.iter().map(move |fx| (i, *fx)))
        .collect()
}

fn has_unsupported(conversion: &Conversion, text: &str) -> bool {
    conversion.warnings.iter().any(|w| {
        matches!(w, Warning::UnsupportedFeature { feature, .. } if feature.contains(text))
    })
}

// =============================================================================
// End-to-end conversions
// =============================================================================

#[test]
fn test_looped_scale() {
    // t120 v100 [c d e f]2 with 24-tick notes
    let stream = [
        0xFC, 0xFF, 120, 0xFD, 100, 0xF9, 0x00, 0x00, 0x40, 24, 0x42, 24, 0x44, 24, 0x45, 24,
        0xF8, 2, 2, 0x00, 0x00, 0x80,
    ];
    let (conversion, song) = convert(&pmd_image(&[(0, &stream)], &[], &[]));

    assert_eq!(song.version, 228);
    assert_eq!(song.chips, vec![0x8E]);
    assert_eq!(song.speed, 3);
    assert_eq!(song.virtual_tempo, (120, 75));
    assert_eq!(song.name, "PMD Import");
    assert_eq!(song.order_count(), 1);
    assert_eq!(conversion.total_rows, 64);

    let expected: Vec<(usize, u8)> = [108, 110, 112, 113, 108, 110, 112, 113]
        .iter()
        .enumerate()
        .map(|(i, &n)| (i * 8, n))
        .collect();
    assert_eq!(notes(&song, 0), expected);

    let rows = song.channel_rows(0);
    assert_eq!(rows[0].volume, Some(100));
    assert_eq!(rows[0].instrument, Some(0));
    assert_eq!(rows[8].volume, None);
    assert!(all_effects(&song, 0).is_empty());
    assert!(conversion.warnings.is_empty());
}

#[test]
fn test_loop_break_skips_tail_on_last_pass() {
    // [c : d]3
    let stream = [
        0xF9, 0x00, 0x00, 0x40, 12, 0xF7, 0x00, 0x00, 0x42, 12, 0xF8, 3, 3, 0x00, 0x00, 0x80,
    ];
    let (conversion, song) = convert(&pmd_image(&[(0, &stream)], &[], &[]));

    assert_eq!(conversion.timelines[0].note_count(), 5);
    assert_eq!(conversion.timelines[0].end_tick, 60);
    assert_eq!(
        notes(&song, 0),
        vec![(0, 108), (4, 110), (8, 108), (12, 110), (16, 108)]
    );
}

#[test]
fn test_tie_extends_note() {
    // c24 & c24, r24
    let stream = [0x40, 24, 0xFB, 0x40, 24, 0x4F, 24, 0x80];
    let (conversion, song) = convert(&pmd_image(&[(0, &stream)], &[], &[]));

    assert_eq!(conversion.timelines[0].note_count(), 1);
    assert_eq!(notes(&song, 0), vec![(0, 108), (16, note::OFF)]);
}

#[test]
fn test_gate_places_early_keyoff() {
    // q6 c24 r24
    let stream = [0xFE, 6, 0x40, 24, 0x4F, 24, 0x80];
    let (_, song) = convert(&pmd_image(&[(0, &stream)], &[], &[]));
    assert_eq!(notes(&song, 0), vec![(0, 108), (6, note::OFF)]);
}

#[test]
fn test_ssg_envelope_instrument() {
    // E1,-2,2,1 c24 r24 on SSG-G
    let stream = [0xF0, 1, 0xFE, 2, 1, 0x40, 24, 0x4F, 24, 0x80];
    let (_, song) = convert(&pmd_image(&[(6, &stream)], &[], &[]));

    assert_eq!(song.instruments.len(), 1);
    let ins = &song.instruments[0];
    assert_eq!(ins.kind, ins_type::AY);
    assert_eq!(ins.name, "SSG E1,-2,2,1");
    let mac = ins.volume_macro.as_ref().expect("volume macro");
    assert_eq!(&mac.steps[..10], &[15, 13, 13, 12, 12, 11, 11, 10, 10, 9]);
    assert_eq!(mac.release_point, Some(27));
    assert_eq!(mac.steps.last(), Some(&0));

    assert_eq!(notes(&song, 6), vec![(0, 120), (8, note::RELEASE)]);
    assert_eq!(song.channel_rows(6)[0].instrument, Some(0));
}

#[test]
fn test_fm_voices_deduplicated() {
    // @1 c  @2 d  @3 e, voices 1 and 2 identical
    let stream = [
        0xFF, 1, 0x40, 24, 0xFF, 2, 0x42, 24, 0xFF, 3, 0x44, 24, 0x80,
    ];
    let voices = [voice(1, 4), voice(2, 4), voice(3, 7)];
    let (conversion, song) = convert(&pmd_image(&[(0, &stream)], &voices, &[]));

    assert_eq!(conversion.instrument_count, 2);
    assert_eq!(song.instruments.len(), 2);
    assert_eq!(song.instruments[0].name, "FM 01");
    assert_eq!(song.instruments[0].fm.map(|v| v.alg), Some(4));
    assert_eq!(song.instruments[1].fm.map(|v| v.alg), Some(7));

    let rows = song.channel_rows(0);
    assert_eq!(rows[0].instrument, Some(0));
    assert_eq!(rows[8].instrument, Some(0));
    assert_eq!(rows[16].instrument, Some(1));
}

#[test]
fn test_song_loop_jump() {
    // c L d e with 8-row patterns
    let stream = [0x40, 24, 0xF6, 0x42, 24, 0x44, 24, 0x80];
    let options = ConvertOptions {
        pattern_length: 8,
        ..ConvertOptions::default()
    };
    let (conversion, song) = convert_with(options, &pmd_image(&[(0, &stream)], &[], &[]));

    assert_eq!(song.order_count(), 3);
    assert_eq!(song.pattern_length, 8);
    assert_eq!(
        all_effects(&song, 0),
        vec![(23, Effect::new(effect::JUMP, 1))]
    );
    assert!(conversion.warnings.is_empty());
}

#[test]
fn test_tempo_pan_and_detune_effects() {
    // t100 p2 D8 c  t150 d
    let stream = [
        0xFC, 0xFF, 100, 0xEC, 2, 0xFA, 8, 0, 0x40, 24, 0xFC, 0xFF, 150, 0x42, 24, 0x80,
    ];
    let (_, song) = convert(&pmd_image(&[(0, &stream)], &[], &[]));

    assert_eq!(song.virtual_tempo, (100, 75));
    let effects = all_effects(&song, 0);
    assert!(effects.contains(&(0, Effect::new(effect::PAN, 0xF0))));
    assert!(effects.contains(&(0, Effect::new(effect::DETUNE, 0x82))));
    assert!(effects.contains(&(8, Effect::new(effect::VIRTUAL_TEMPO, 150))));
    assert_eq!(song.effect_columns[0], 2);
}

#[test]
fn test_multiple_parts_share_the_grid() {
    let fm = [0x40, 48, 0x80];
    let ssg = [0x40, 24, 0x47, 24, 0x80];
    let (conversion, song) = convert(&pmd_image(&[(0, &fm), (7, &ssg)], &[], &[]));

    assert_eq!(conversion.total_rows, 16);
    assert_eq!(notes(&song, 0), vec![(0, 108)]);
    assert_eq!(notes(&song, 7), vec![(0, 120), (8, 127)]);
    assert!(notes(&song, 6).is_empty());
}

// =============================================================================
// Recoverable features
// =============================================================================

#[test]
fn test_registered_opcode_is_skipped() {
    // PPZ extension block with 16 operand bytes, then a note
    let mut stream = vec![0xB4];
    stream.extend_from_slice(&[0x40; 16]);
    stream.extend_from_slice(&[0x40, 24, 0x80]);
    let (conversion, song) = convert(&pmd_image(&[(0, &stream)], &[], &[]));

    assert!(has_unsupported(&conversion, "PPZ"));
    assert_eq!(notes(&song, 0), vec![(0, 108)]);
}

#[test]
fn test_adpcm_and_rhythm_parts_reported() {
    let fm = [0x40, 24, 0x80];
    let adpcm = [0x40, 24, 0x80];
    let rhythm = [0x01, 0x80];
    let (conversion, song) =
        convert(&pmd_image(&[(0, &fm), (9, &adpcm), (10, &rhythm)], &[], &[]));

    assert!(has_unsupported(&conversion, "ADPCM"));
    assert!(has_unsupported(&conversion, "rhythm"));
    assert_eq!(conversion.timelines.len(), 3);
    assert!(song.channel_rows(9).iter().all(PatternRow::is_empty));
}

#[test]
fn test_endless_loop_played_once() {
    let stream = [0xF9, 0x00, 0x00, 0x40, 24, 0xF8, 0, 0, 0x00, 0x00, 0x80];
    let (conversion, song) = convert(&pmd_image(&[(0, &stream)], &[], &[]));

    assert!(has_unsupported(&conversion, "endless loop"));
    assert_eq!(notes(&song, 0), vec![(0, 108)]);
}

// =============================================================================
// Fatal errors
// =============================================================================

#[test]
fn test_short_file_is_malformed() {
    let result = Converter::default().convert(&[0u8; 10]);
    assert!(matches!(result, Err(Error::MalformedHeader(_))));
}

#[test]
fn test_pointer_past_end_is_malformed() {
    let mut data = vec![0u8; HEADER_SIZE];
    data[1..3].copy_from_slice(&0x1000u16.to_le_bytes());
    let result = Converter::default().convert(&data);
    assert!(matches!(result, Err(Error::MalformedHeader(_))));
}

#[test]
fn test_unknown_opcode_aborts() {
    let stream = [0x40, 24, 0x90, 0x80];
    let result = Converter::default().convert(&pmd_image(&[(1, &stream)], &[], &[]));
    match result {
        Err(Error::Decode {
            channel, offset, ..
        }) => {
            assert_eq!(channel, "FM-B");
            assert_eq!(offset, HEADER_SIZE + 2);
        }
        other => panic!("expected decode error, got {:?}", other.map(|c| c.warnings)),
    }
}

#[test]
fn test_invalid_options_rejected() {
    let options = ConvertOptions {
        pattern_length: 0,
        ..ConvertOptions::default()
    };
    let data = pmd_image(&[(0, &[0x40, 24, 0x80])], &[], &[]);
    let result = Converter::new(options).convert(&data);
    assert!(matches!(result, Err(Error::Config(_))));
}

// =============================================================================
// File round trip
// =============================================================================

#[test]
fn test_compressed_file_round_trip() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("song.m");
    let output = dir.path().join("song.fur");

    let data = pmd_image(
        &[(0, &[0x40, 24, 0x80])],
        &[],
        b"\0My Song\0Composer\0Arranger\0",
    );
    std::fs::write(&input, &data).unwrap();

    let options = ConvertOptions {
        compress: true,
        ..ConvertOptions::default()
    };
    Converter::new(options)
        .convert_file(&input, &output)
        .expect("Conversion failed");

    let written = std::fs::read(&output).unwrap();
    assert_eq!(written[0], 0x78);

    let song = reader::parse(&written).unwrap();
    assert_eq!(song.name, "My Song");
    assert_eq!(song.author, "Composer");
    assert_eq!(song.comment, "Arranger: Arranger");
    assert_eq!(notes(&song, 0), vec![(0, 108)]);
}
