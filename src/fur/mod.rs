//! Furnace module encoding

pub mod header;
pub mod instrument;
pub mod pattern;
pub mod reader;
pub mod writer;

pub use instrument::{FurInstrument, InstrumentTable};
pub use pattern::PatternRow;
pub use reader::{FurReader, FurSong};
pub use writer::{FurWriter, SongInfo};
