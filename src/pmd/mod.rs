pub mod commands;
pub mod header;
pub mod instrument;
pub mod json;
pub mod reader;

pub use commands::{Instruction, Opcode, TempoChange};
pub use header::{ChannelId, ChannelKind, PmdHeader};
pub use instrument::{FmInstrument, FmOperator, FmVoice};
pub use json::PmdJson;
pub use reader::{ChannelSource, Metadata, PmdModule, PmdReader};
