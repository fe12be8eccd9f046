use std::fmt;
use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Malformed header: {0}")]
    MalformedHeader(String),

    #[error("Decode error in channel {channel} at offset {offset:#06x}: {message}")]
    Decode {
        channel: String,
        offset: usize,
        message: String,
    },

    #[error("Invalid option: {0}")]
    Config(String),

    #[error("FUR parse error: {0}")]
    FurParse(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Recoverable condition attached to a successful conversion.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Warning {
    /// Feature acknowledged and skipped; its bytes were still consumed.
    #[error("{channel}: unsupported feature: {feature}")]
    UnsupportedFeature { channel: String, feature: String },

    /// Output had to be truncated, moved or approximated to fit the target format.
    #[error("{channel}: encoding overflow: {message}")]
    EncodingOverflow { channel: String, message: String },
}

impl Warning {
    pub fn unsupported(channel: impl fmt::Display, feature: impl Into<String>) -> Self {
        Self::UnsupportedFeature {
            channel: channel.to_string(),
            feature: feature.into(),
        }
    }

    pub fn overflow(channel: impl fmt::Display, message: impl Into<String>) -> Self {
        Self::EncodingOverflow {
            channel: channel.to_string(),
            message: message.into(),
        }
    }
}

/// Ordered, de-duplicated warning list.
#[derive(Debug, Clone, Default)]
pub struct Warnings {
    items: Vec<Warning>,
}

impl Warnings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a warning unless an identical one is already present
    pub fn push(&mut self, warning: Warning) {
        if !self.items.contains(&warning) {
            log::warn!("{}", warning);
            self.items.push(warning);
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Warning> {
        self.items.iter()
    }

    pub fn into_vec(self) -> Vec<Warning> {
        self.items
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_warnings_collapse() {
        let mut warnings = Warnings::new();
        warnings.push(Warning::unsupported("FM-A", "hardware LFO"));
        warnings.push(Warning::unsupported("FM-A", "hardware LFO"));
        warnings.push(Warning::unsupported("FM-B", "hardware LFO"));
        assert_eq!(warnings.len(), 2);
    }

    #[test]
    fn test_decode_error_message() {
        let err = Error::Decode {
            channel: "SSG-G".into(),
            offset: 0x1A,
            message: "truncated operand".into(),
        };
        assert_eq!(
            err.to_string(),
            "Decode error in channel SSG-G at offset 0x001a: truncated operand"
        );
    }
}
