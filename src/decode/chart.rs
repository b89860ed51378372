//! Text-chart decoder: the section-keyed `.chart` grammar.

use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use regex::Regex;

use super::{DecodeOptions, FormatError};
use crate::song::{Chord, Dynamic, Note, NoteColor, Song, SongBuilder, Tick};

static DISCO_ON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[?mix.[0-9].drums[0-9]?d\]?$").unwrap());
static DISCO_OFF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[?mix.[0-9].drums[0-9]?\]?$").unwrap());

/// Decode chart text bytes, trying UTF-8 (with or without BOM) and then
/// Windows-1252. Fails only if no codec accepts the bytes.
pub(crate) fn decode_text(bytes: &[u8]) -> Result<String, FormatError> {
    let body = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
    if let Ok(s) = std::str::from_utf8(body) {
        return Ok(s.to_owned());
    }
    windows_1252(body).ok_or(FormatError::Encoding)
}

/// Windows-1252 has five undefined code points; their presence fails the
/// codec instead of being silently replaced.
fn windows_1252(bytes: &[u8]) -> Option<String> {
    const C1: [Option<char>; 32] = [
        Some('€'), None, Some('‚'), Some('ƒ'), Some('„'), Some('…'), Some('†'), Some('‡'),
        Some('ˆ'), Some('‰'), Some('Š'), Some('‹'), Some('Œ'), None, Some('Ž'), None,
        None, Some('‘'), Some('’'), Some('“'), Some('”'), Some('•'), Some('–'), Some('—'),
        Some('˜'), Some('™'), Some('š'), Some('›'), Some('œ'), None, Some('ž'), Some('Ÿ'),
    ];
    bytes
        .iter()
        .map(|&b| match b {
            0x80..=0x9F => C1[(b - 0x80) as usize],
            _ => char::from_u32(b as u32),
        })
        .collect()
}

/// One section's contents: named properties plus tick-keyed event values.
#[derive(Debug, Default)]
struct RawSection {
    properties: HashMap<String, String>,
    events: BTreeMap<Tick, Vec<String>>,
}

/// Split the chart text into sections. Unknown sections are kept (and later
/// ignored); structural damage is a FormatError.
fn split_sections(text: &str) -> Result<HashMap<String, RawSection>, FormatError> {
    let mut sections: HashMap<String, RawSection> = HashMap::new();
    let mut current: Option<(String, RawSection)> = None;
    let mut in_block = false;

    for (lineno, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if current.is_none() {
            if line.starts_with('[') && line.ends_with(']') {
                let name = line[1..line.len() - 1].to_string();
                current = Some((name, RawSection::default()));
            } else {
                return Err(FormatError::Structure(format!(
                    "expected section header at line {}",
                    lineno + 1
                )));
            }
        } else if !in_block {
            if line == "{" {
                in_block = true;
            } else {
                return Err(FormatError::Structure(format!(
                    "expected '{{' at line {}",
                    lineno + 1
                )));
            }
        } else if line == "}" {
            let (name, section) = current.take().unwrap();
            sections.insert(name, section);
            in_block = false;
        } else {
            let (lhs, rhs) = line.split_once('=').ok_or_else(|| {
                FormatError::Structure(format!("entry without '=' at line {}", lineno + 1))
            })?;
            let key = lhs.trim();
            let value = rhs.trim().to_string();
            let section = &mut current.as_mut().unwrap().1;
            match key.parse::<Tick>() {
                Ok(tick) => section.events.entry(tick).or_default().push(value),
                Err(_) => {
                    section.properties.insert(key.to_string(), value);
                }
            }
        }
    }

    if current.is_some() {
        return Err(FormatError::Structure("unterminated section".into()));
    }
    Ok(sections)
}

/// A tick-keyed entry interpreted into the action it stands for. Unknown
/// values map to `Other` and are ignored for forward compatibility.
#[derive(Debug, PartialEq)]
enum TickEntry {
    Note { value: u32, length: Tick },
    Phrase { value: u32, length: Tick },
    Tempo(f64),
    TimeSig { numerator: u32, denominator: u32 },
    SoloStart,
    SoloEnd,
    DiscoOn,
    DiscoOff,
    Other,
}

fn parse_tick_entry(value: &str) -> TickEntry {
    let words: Vec<&str> = value.split_whitespace().collect();
    match words.as_slice() {
        ["N", v, len] => match (v.parse(), len.parse()) {
            (Ok(value), Ok(length)) => TickEntry::Note { value, length },
            _ => TickEntry::Other,
        },
        ["S", v, len] => match (v.parse(), len.parse()) {
            (Ok(value), Ok(length)) => TickEntry::Phrase { value, length },
            _ => TickEntry::Other,
        },
        ["B", millibpm] => match millibpm.parse::<u32>() {
            Ok(v) => TickEntry::Tempo(v as f64 / 1000.0),
            Err(_) => TickEntry::Other,
        },
        ["TS", n] => match n.parse() {
            Ok(numerator) => TickEntry::TimeSig {
                numerator,
                denominator: 4,
            },
            Err(_) => TickEntry::Other,
        },
        ["TS", n, d] => match (n.parse(), d.parse::<u32>()) {
            (Ok(numerator), Ok(pow)) if pow < 8 => TickEntry::TimeSig {
                numerator,
                denominator: 1 << pow,
            },
            _ => TickEntry::Other,
        },
        ["E", "solo"] => TickEntry::SoloStart,
        ["E", "soloend"] => TickEntry::SoloEnd,
        ["E", rest @ ..] => {
            let event = rest.join(" ");
            if DISCO_ON.is_match(&event) {
                TickEntry::DiscoOn
            } else if DISCO_OFF.is_match(&event) {
                TickEntry::DiscoOff
            } else {
                TickEntry::Other
            }
        }
        _ => TickEntry::Other,
    }
}

fn lane_for_note_value(value: u32) -> Option<NoteColor> {
    match value {
        0 => Some(NoteColor::Kick),
        1 => Some(NoteColor::Red),
        2 => Some(NoteColor::Yellow),
        3 => Some(NoteColor::Blue),
        4 => Some(NoteColor::Green),
        _ => None,
    }
}

fn lane_for_accent(value: u32) -> Option<NoteColor> {
    match value {
        34 => Some(NoteColor::Red),
        35 => Some(NoteColor::Yellow),
        36 => Some(NoteColor::Blue),
        37 => Some(NoteColor::Green),
        _ => None,
    }
}

fn lane_for_ghost(value: u32) -> Option<NoteColor> {
    match value {
        40 => Some(NoteColor::Red),
        41 => Some(NoteColor::Yellow),
        42 => Some(NoteColor::Blue),
        43 => Some(NoteColor::Green),
        _ => None,
    }
}

fn lane_for_cymbal(value: u32) -> Option<NoteColor> {
    match value {
        66 => Some(NoteColor::Yellow),
        67 => Some(NoteColor::Blue),
        68 => Some(NoteColor::Green),
        _ => None,
    }
}

pub(super) fn decode(bytes: &[u8], options: &DecodeOptions) -> Result<Song, FormatError> {
    let text = decode_text(bytes)?;
    let sections = split_sections(&text)?;

    let song_section = sections
        .get("Song")
        .ok_or_else(|| FormatError::MissingSection("Song".into()))?;
    let resolution: u32 = song_section
        .properties
        .get("Resolution")
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| FormatError::Structure("missing or invalid Resolution".into()))?;

    let sync = sections
        .get("SyncTrack")
        .ok_or_else(|| FormatError::MissingSection("SyncTrack".into()))?;

    let section_name = options.difficulty.chart_section();
    let track = sections
        .get(section_name)
        .ok_or_else(|| FormatError::MissingTrack(section_name.into()))?;

    let mut builder = SongBuilder::new(resolution);

    for (&tick, values) in &sync.events {
        for value in values {
            match parse_tick_entry(value) {
                TickEntry::Tempo(bpm) => builder.set_tempo(tick, bpm),
                TickEntry::TimeSig {
                    numerator,
                    denominator,
                } => builder.set_meter(tick, numerator, denominator),
                _ => {}
            }
        }
    }

    let mut solo = false;
    let mut disco = false;

    for (&tick, values) in &track.events {
        let entries: Vec<TickEntry> = values.iter().map(|v| parse_tick_entry(v)).collect();

        // Flags and phrases first, so they apply to this tick's chord.
        for entry in &entries {
            match *entry {
                TickEntry::SoloStart => solo = true,
                TickEntry::SoloEnd => solo = false,
                TickEntry::DiscoOn => disco = true,
                TickEntry::DiscoOff => disco = false,
                TickEntry::Phrase { value: 2, length } => builder.push_phrase(tick, tick + length),
                _ => {}
            }
        }

        // Notes.
        let mut chord = Chord::default();
        for entry in &entries {
            if let TickEntry::Note { value, length } = *entry {
                if let Some(color) = lane_for_note_value(value) {
                    let note = Note {
                        sustain: length,
                        ..Note::default()
                    };
                    if !chord.add(color, note) {
                        log::debug!("duplicate {color:?} note at tick {tick}, ignored");
                    }
                } else if value == 32 && options.double_kick {
                    let note = Note {
                        double_kick: true,
                        sustain: length,
                        ..Note::default()
                    };
                    if !chord.add(NoteColor::Kick, note) {
                        log::debug!("duplicate kick at tick {tick}, ignored");
                    }
                }
            }
        }

        // Note modifiers act on lanes created above.
        for entry in &entries {
            if let TickEntry::Note { value, .. } = *entry {
                if let Some(color) = lane_for_accent(value) {
                    if let Some(note) = chord.lane_mut(color) {
                        note.dynamic = Dynamic::Accent;
                    }
                } else if let Some(color) = lane_for_ghost(value) {
                    if let Some(note) = chord.lane_mut(color) {
                        note.dynamic = Dynamic::Ghost;
                    }
                } else if options.pro_drums {
                    if let Some(color) = lane_for_cymbal(value) {
                        if let Some(note) = chord.lane_mut(color) {
                            note.cymbal = true;
                        }
                    }
                }
            }
        }

        if !chord.is_empty() {
            if disco {
                chord.apply_disco_flip();
            }
            builder.push_chord(tick, chord, solo)?;
        }
    }

    Ok(builder.build()?)
}
