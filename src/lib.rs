pub mod converter;
pub mod error;
pub mod fur;
pub mod pmd;

pub use converter::{ConvertOptions, Conversion, Converter};
pub use error::{Error, Warning};
