//! SSG software envelope handling
//!
//! PMD's `E al,dd,sr,rr` envelope runs in the driver once per tick. It is
//! approximated here by a Furnace volume macro with a release point.

use serde::Serialize;
use std::fmt;

/// Highest SSG volume and the level every macro starts from
pub const SSG_MAX_VOLUME: u8 = 15;

/// Macro length limit of the target format
pub const MAX_MACRO_STEPS: usize = 255;

/// PMD software envelope parameters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct SsgEnvelope {
    /// Ticks to hold the starting level
    pub attack: u8,
    /// Level change applied when the attack ends (signed)
    pub decay: i8,
    /// Ticks per sustain step, 0 = hold
    pub sustain: u8,
    /// Ticks per release step, 0 = instant silence
    pub release: u8,
}

impl fmt::Display for SsgEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "E{},{},{},{}",
            self.attack, self.decay, self.sustain, self.release
        )
    }
}

/// One level held for a number of ticks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MacroSegment {
    pub level: u8,
    pub hold: u32,
}

/// Expanded per-tick volume macro
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VolumeMacro {
    pub steps: Vec<u8>,
    /// Step the macro waits on until the note is released
    pub release_point: Option<u8>,
    /// Steps were cut to fit MAX_MACRO_STEPS
    pub truncated: bool,
}

impl SsgEnvelope {
    fn decayed(&self, start: u8) -> i32 {
        (start as i32 + self.decay as i32).clamp(0, SSG_MAX_VOLUME as i32)
    }

    /// Key-held and release portions as (level, hold) pairs.
    ///
    /// Returns the segments and the index of the first release segment.
    pub fn segments(&self) -> (Vec<MacroSegment>, usize) {
        let mut segments = Vec::new();
        if self.attack > 0 {
            segments.push(MacroSegment {
                level: SSG_MAX_VOLUME,
                hold: self.attack as u32,
            });
        }

        let decayed = self.decayed(SSG_MAX_VOLUME);
        if self.sustain == 0 {
            segments.push(MacroSegment {
                level: decayed as u8,
                hold: 1,
            });
        } else {
            // One level lower every `sustain` ticks
            for level in (1..=decayed).rev() {
                segments.push(MacroSegment {
                    level: level as u8,
                    hold: self.sustain as u32,
                });
            }
            segments.push(MacroSegment { level: 0, hold: 1 });
        }

        let release_start = segments.len();
        if self.release == 0 {
            segments.push(MacroSegment { level: 0, hold: 1 });
        } else {
            // Release descends from the post-attack level
            for level in (0..decayed).rev() {
                segments.push(MacroSegment {
                    level: level as u8,
                    hold: self.release as u32,
                });
            }
            if segments.len() == release_start {
                segments.push(MacroSegment { level: 0, hold: 1 });
            }
        }

        (segments, release_start)
    }

    /// Expand the segments into a per-tick macro
    pub fn volume_macro(&self) -> VolumeMacro {
        let (segments, release_start) = self.segments();
        let mut steps = Vec::new();
        let mut release_point = None;
        let mut truncated = false;

        'outer: for (i, segment) in segments.iter().enumerate() {
            if i == release_start {
                release_point = steps.len().checked_sub(1);
            }
            for _ in 0..segment.hold {
                if steps.len() >= MAX_MACRO_STEPS {
                    truncated = true;
                    break 'outer;
                }
                steps.push(segment.level);
            }
        }

        VolumeMacro {
            steps,
            release_point: release_point.map(|p| p as u8),
            truncated,
        }
    }
}
