pub mod chart;
pub mod midi;

use std::path::Path;

use thiserror::Error;

use crate::song::{Difficulty, Song, SongError};

#[derive(Error, Debug)]
pub enum FormatError {
    #[error("unrecognized chart extension: {0}")]
    UnknownExtension(String),
    #[error("chart text is not valid UTF-8 or Windows-1252")]
    Encoding,
    #[error("missing required section [{0}]")]
    MissingSection(String),
    #[error("missing difficulty track {0}")]
    MissingTrack(String),
    #[error("invalid chart structure: {0}")]
    Structure(String),
    #[error("MIDI parse error: {0}")]
    Midi(String),
    #[error("SMPTE timing is not supported")]
    SmpteTiming,
    #[error("invalid song data: {0}")]
    Song(#[from] SongError),
}

/// The two chart formats we decode. Dispatch is by this closed tag; callers
/// that start from a file path use `from_path` to reject anything else
/// before decoding is attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartFormat {
    Chart,
    Midi,
}

impl ChartFormat {
    pub fn from_path(path: &Path) -> Result<Self, FormatError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();
        match ext.as_str() {
            "chart" => Ok(ChartFormat::Chart),
            "mid" | "midi" => Ok(ChartFormat::Midi),
            _ => Err(FormatError::UnknownExtension(
                path.to_string_lossy().to_string(),
            )),
        }
    }
}

/// Decode-time settings: which difficulty track to read and the two
/// lane-interpretation modifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions {
    pub difficulty: Difficulty,
    /// Honor cymbal/tom markers (pro drums). Off, every pad is a tom.
    pub pro_drums: bool,
    /// Admit the 2x bass kick note.
    pub double_kick: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            difficulty: Difficulty::Expert,
            pro_drums: true,
            double_kick: false,
        }
    }
}

/// Decode raw chart bytes into the canonical Song. Both variants yield
/// Songs satisfying the same invariants, so everything downstream is
/// format-agnostic.
pub fn decode(bytes: &[u8], format: ChartFormat, options: &DecodeOptions) -> Result<Song, FormatError> {
    match format {
        ChartFormat::Chart => chart::decode(bytes, options),
        ChartFormat::Midi => midi::decode(bytes, options),
    }
}
