//! JSON serialization types for decoded PMD data

use super::header::{ChannelKind, PmdHeader};
use super::instrument::FmInstrument;
use super::reader::{Metadata, PmdModule};
use crate::converter::channel::ChannelState;
use crate::converter::event::{Event, Timeline};
use crate::error::Warning;
use serde::Serialize;

/// Top-level JSON structure for a PMD file
#[derive(Debug, Clone, Serialize)]
pub struct PmdJson {
    pub version: u8,
    pub header: PmdHeader,
    pub metadata: Metadata,
    /// FM voice table
    pub instruments: Vec<FmInstrument>,
    pub channels: Vec<ChannelJson>,
    /// Recoverable problems found while interpreting
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// One part's stream location and interpreted timeline
#[derive(Debug, Clone, Serialize)]
pub struct ChannelJson {
    pub name: &'static str,
    pub kind: ChannelKind,
    pub start: usize,
    pub end: usize,
    pub notes: usize,
    pub end_tick: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loop_tick: Option<u32>,
    pub events: Vec<Event>,
    /// Interpreter state when the part ended
    pub final_state: ChannelState,
}

impl PmdJson {
    pub fn new(module: &PmdModule, timelines: Vec<Timeline>, warnings: &[Warning]) -> Self {
        let channels = module
            .channels
            .iter()
            .zip(timelines)
            .map(|(source, timeline)| ChannelJson {
                name: source.id.name(),
                kind: source.id.kind(),
                start: source.start,
                end: source.end,
                notes: timeline.note_count(),
                end_tick: timeline.end_tick,
                loop_tick: timeline.loop_tick,
                events: timeline.events,
                final_state: timeline.state,
            })
            .collect();

        Self {
            version: module.header.version,
            header: module.header.clone(),
            metadata: module.metadata.clone(),
            instruments: module.instruments.clone(),
            channels,
            warnings: warnings.iter().map(|w| w.to_string()).collect(),
        }
    }
}
