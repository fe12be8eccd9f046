//! PMD to Furnace conversion pipeline
//!
//! Reads the module header, interprets every channel into a tick timeline,
//! quantizes the timelines onto a shared row grid and hands the rows to the
//! Furnace writer.

pub mod channel;
pub mod envelope;
pub mod event;
pub mod interpreter;
pub mod note;
pub mod quantize;

use crate::error::{Error, Result, Warning, Warnings};
use crate::fur::header::{
    channel_for, effect, note as fur_note, CHANNEL_COUNT, MAX_EFFECT_COLUMNS, MAX_ORDERS,
    MAX_PATTERN_LENGTH,
};
use crate::fur::{FurWriter, InstrumentTable, PatternRow, SongInfo};
use crate::pmd::{ChannelId, Metadata, PmdModule, PmdReader};
use channel::DEFAULT_TEMPO;
use event::Timeline;
use interpreter::Interpreter;
use quantize::{Effect, Grid, Row, RowNote};
use std::fs;
use std::path::Path;

/// Song name used when the module carries no title
pub const DEFAULT_SONG_NAME: &str = "PMD Import";

/// Conversion settings
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    /// PMD ticks per Furnace row (also the song speed)
    pub ticks_per_row: u32,
    /// Rows per pattern
    pub pattern_length: usize,
    /// Effect columns available per channel
    pub max_effect_columns: usize,
    /// Virtual tempo denominator
    pub tempo_baseline: u16,
    /// Write the module zlib-compressed
    pub compress: bool,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            ticks_per_row: 3,
            pattern_length: 64,
            max_effect_columns: MAX_EFFECT_COLUMNS,
            tempo_baseline: DEFAULT_TEMPO as u16,
            compress: false,
        }
    }
}

impl ConvertOptions {
    pub fn validate(&self) -> Result<()> {
        if !(1..=255).contains(&self.ticks_per_row) {
            return Err(Error::Config(format!(
                "ticks per row must be 1-255, got {}",
                self.ticks_per_row
            )));
        }
        if !(1..=MAX_PATTERN_LENGTH).contains(&self.pattern_length) {
            return Err(Error::Config(format!(
                "pattern length must be 1-{}, got {}",
                MAX_PATTERN_LENGTH, self.pattern_length
            )));
        }
        if !(1..=MAX_EFFECT_COLUMNS).contains(&self.max_effect_columns) {
            return Err(Error::Config(format!(
                "effect columns must be 1-{}, got {}",
                MAX_EFFECT_COLUMNS, self.max_effect_columns
            )));
        }
        if self.tempo_baseline == 0 {
            return Err(Error::Config("tempo baseline must be positive".into()));
        }
        Ok(())
    }
}

/// Result of a successful conversion
#[derive(Debug)]
pub struct Conversion {
    /// Module bytes, compressed if requested
    pub data: Vec<u8>,
    pub warnings: Vec<Warning>,
    /// Timelines of every channel present in the module
    pub timelines: Vec<Timeline>,
    pub total_rows: usize,
    pub order_count: usize,
    pub instrument_count: usize,
    pub pattern_count: usize,
    pub initial_tempo: u8,
}

/// PMD to Furnace converter
#[derive(Debug, Clone, Default)]
pub struct Converter {
    options: ConvertOptions,
}

impl Converter {
    pub fn new(options: ConvertOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ConvertOptions {
        &self.options
    }

    /// Read `input`, convert it and write the module to `output`
    pub fn convert_file(&self, input: &Path, output: &Path) -> Result<Conversion> {
        let data = fs::read(input)?;
        let conversion = self.convert(&data)?;
        fs::write(output, &conversion.data)?;
        log::info!("Wrote {} ({} bytes)", output.display(), conversion.data.len());
        Ok(conversion)
    }

    /// Convert a PMD image held in memory
    pub fn convert(&self, data: &[u8]) -> Result<Conversion> {
        self.options.validate()?;
        let opts = &self.options;

        let module = PmdReader::new(data).parse_module()?;
        let mut warnings = Warnings::new();
        let timelines = interpret(data, &module, &mut warnings)?;

        let output: Vec<&Timeline> = timelines
            .iter()
            .filter(|t| channel_for(t.channel).is_some())
            .collect();

        let initial_tempo = output
            .iter()
            .find_map(|t| t.initial_tempo())
            .unwrap_or(DEFAULT_TEMPO);
        let end_tick = output.iter().map(|t| t.end_tick).max().unwrap_or(0);

        let tpr = opts.ticks_per_row;
        let mut total_rows = (end_tick.div_ceil(tpr) as usize).max(1);
        let row_limit = MAX_ORDERS * opts.pattern_length;
        if total_rows > row_limit {
            warnings.push(Warning::overflow(
                "module",
                format!(
                    "song needs {} orders, truncated to {}",
                    total_rows.div_ceil(opts.pattern_length),
                    MAX_ORDERS
                ),
            ));
            total_rows = row_limit;
        }
        let order_count = total_rows.div_ceil(opts.pattern_length);

        let grid = Grid {
            ticks_per_row: tpr,
            total_rows,
            initial_tempo,
        };

        let mut channel_rows: Vec<Vec<Row>> = vec![Vec::new(); CHANNEL_COUNT];
        for timeline in &output {
            if let Some(index) = channel_for(timeline.channel) {
                channel_rows[index] = quantize::quantize(timeline, &grid, &mut warnings);
            }
        }
        for rows in channel_rows.iter_mut() {
            rows.resize(total_rows, Row::default());
        }

        let loop_tick = output.iter().find_map(|t| t.loop_tick);
        if let Some(loop_tick) = loop_tick {
            place_loop_jump(&mut channel_rows[0], &grid, opts.pattern_length, loop_tick, &mut warnings);
        }

        let mut effect_columns = [1u8; CHANNEL_COUNT];
        for (index, rows) in channel_rows.iter_mut().enumerate() {
            if index < ChannelId::COUNT {
                quantize::fit_effects(rows, opts.max_effect_columns, ChannelId(index as u8), &mut warnings);
            }
            let used = rows.iter().map(|r| r.effects.len()).max().unwrap_or(0);
            effect_columns[index] = used.clamp(1, opts.max_effect_columns) as u8;
        }

        let table = InstrumentTable::build(
            &module.instruments,
            channel_rows
                .iter()
                .flat_map(|rows| rows.iter().filter_map(|r| r.instrument.as_ref())),
            &mut warnings,
        );

        let mut writer = FurWriter::new(SongInfo {
            name: song_name(&module.metadata),
            author: module.metadata.composer.clone(),
            comment: song_comment(&module.metadata),
            speed: tpr as u8,
            pattern_length: opts.pattern_length,
            tempo: initial_tempo as u16,
            tempo_baseline: opts.tempo_baseline,
            effect_columns,
        });
        writer.set_order_count(order_count);
        for instrument in table.iter() {
            writer.add_instrument(instrument.clone());
        }
        for (index, rows) in channel_rows.iter().enumerate() {
            for (order, chunk) in rows.chunks(opts.pattern_length).enumerate() {
                let mut pattern: Vec<PatternRow> =
                    chunk.iter().map(|row| pattern_row(row, &table)).collect();
                pattern.resize(opts.pattern_length, PatternRow::default());
                writer.add_pattern(index as u8, order as u16, pattern);
            }
        }

        let data = writer.finish(opts.compress)?;
        log::info!(
            "{} rows in {} orders, {} instruments, {} patterns, tempo {}",
            total_rows,
            order_count,
            table.len(),
            writer.pattern_count(),
            initial_tempo
        );

        Ok(Conversion {
            data,
            warnings: warnings.into_vec(),
            timelines,
            total_rows,
            order_count,
            instrument_count: table.len(),
            pattern_count: writer.pattern_count(),
            initial_tempo,
        })
    }
}

/// Interpret every channel of the module
pub fn interpret(data: &[u8], module: &PmdModule, warnings: &mut Warnings) -> Result<Vec<Timeline>> {
    let interpreter = Interpreter::new(data, module);
    let mut timelines = Vec::with_capacity(module.channels.len());
    for source in &module.channels {
        let timeline = interpreter.run(source, warnings)?;
        log::info!(
            "{:<9} | notes {:5} | end {:7} | loop {}",
            source.id.name(),
            timeline.note_count(),
            timeline.end_tick,
            timeline
                .loop_tick
                .map_or_else(|| "-".to_string(), |t| t.to_string())
        );
        timelines.push(timeline);
    }
    Ok(timelines)
}

/// Put the song-loop jump on the final row
fn place_loop_jump(
    rows: &mut [Row],
    grid: &Grid,
    pattern_length: usize,
    loop_tick: u32,
    warnings: &mut Warnings,
) {
    let loop_row = grid.row_of(loop_tick);
    if loop_row >= grid.total_rows {
        log::debug!("song loop mark at row {} is past the end", loop_row);
        return;
    }
    let order = loop_row / pattern_length;
    if loop_row % pattern_length != 0 {
        warnings.push(Warning::overflow(
            "module",
            format!(
                "song loop at row {} approximated by the start of order {}",
                loop_row, order
            ),
        ));
    }
    if let Some(last) = rows.last_mut() {
        last.effects.insert(0, Effect::new(effect::JUMP, order as u8));
    }
}

fn pattern_row(row: &Row, table: &InstrumentTable) -> PatternRow {
    PatternRow {
        note: row.note.map(|n| match n {
            RowNote::On(value) => value,
            RowNote::Off => fur_note::OFF,
            RowNote::Release => fur_note::RELEASE,
        }),
        instrument: row.instrument.as_ref().and_then(|r| table.resolve(r)),
        volume: row.volume,
        effects: row.effects.clone(),
    }
}

fn song_name(metadata: &Metadata) -> String {
    if metadata.title.is_empty() {
        DEFAULT_SONG_NAME.to_string()
    } else {
        metadata.title.clone()
    }
}

fn song_comment(metadata: &Metadata) -> String {
    let mut lines = Vec::new();
    if !metadata.arranger.is_empty() {
        lines.push(format!("Arranger: {}", metadata.arranger));
    }
    lines.extend(metadata.memos.iter().cloned());
    lines.join("\n")
}
