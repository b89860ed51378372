//! Binary-event decoder: standard MIDI files with a `PART DRUMS` track.

use std::sync::LazyLock;

use midly::{MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind};
use regex::Regex;

use super::{DecodeOptions, FormatError};
use crate::song::{Chord, Dynamic, Note, NoteColor, Song, SongBuilder, Tick};

static DYNAMICS_ENABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[?ENABLE_CHART_DYNAMICS\]?$").unwrap());
static DISCO_ON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[?mix.[0-9].drums[0-9]?d\]?$").unwrap());
static DISCO_OFF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[?mix.[0-9].drums[0-9]?\]?$").unwrap());

/// Marker and span keys shared by every difficulty layout.
const KEY_SOLO: u8 = 103;
const KEY_TOM_YELLOW: u8 = 110;
const KEY_TOM_BLUE: u8 = 111;
const KEY_TOM_GREEN: u8 = 112;
const KEY_STAR_POWER: u8 = 116;
const KEY_DOUBLE_KICK: u8 = 95;

/// A drum-track event normalized to what the decoder acts on. Note-on with
/// velocity zero is already folded into `Off`.
#[derive(Debug, Clone)]
enum DrumEvent {
    On { key: u8, velocity: u8 },
    Off { key: u8 },
    Text(String),
}

pub(super) fn decode(bytes: &[u8], options: &DecodeOptions) -> Result<Song, FormatError> {
    let smf = Smf::parse(bytes).map_err(|e| FormatError::Midi(e.to_string()))?;

    let resolution = match smf.header.timing {
        Timing::Metrical(ticks_per_beat) => ticks_per_beat.as_int() as u32,
        Timing::Timecode(..) => return Err(FormatError::SmpteTiming),
    };

    let mut builder = SongBuilder::new(resolution);

    // Tempo and time signatures live on the first track.
    if let Some(track) = smf.tracks.first() {
        let mut tick: Tick = 0;
        for event in track {
            tick += event.delta.as_int();
            match event.kind {
                TrackEventKind::Meta(MetaMessage::Tempo(us_per_beat)) => {
                    builder.set_tempo(tick, 60_000_000.0 / us_per_beat.as_int() as f64);
                }
                TrackEventKind::Meta(MetaMessage::TimeSignature(numerator, den_pow, _, _)) => {
                    builder.set_meter(tick, numerator as u32, 1u32 << den_pow);
                }
                _ => {}
            }
        }
    }

    let drum_track = smf
        .tracks
        .iter()
        .find(|t| track_name(t).as_deref() == Some("PART DRUMS"))
        .ok_or_else(|| FormatError::MissingTrack("PART DRUMS".into()))?;

    decode_drum_track(drum_track, options, &mut builder)?;

    Ok(builder.build()?)
}

fn track_name(track: &[TrackEvent]) -> Option<String> {
    track.iter().find_map(|event| match event.kind {
        TrackEventKind::Meta(MetaMessage::TrackName(name)) => {
            Some(String::from_utf8_lossy(name).to_string())
        }
        _ => None,
    })
}

fn decode_drum_track(
    track: &[TrackEvent],
    options: &DecodeOptions,
    builder: &mut SongBuilder,
) -> Result<(), FormatError> {
    // Flatten to absolute ticks so simultaneous events can be grouped.
    let mut events: Vec<(Tick, DrumEvent)> = Vec::new();
    let mut tick: Tick = 0;
    for event in track {
        tick += event.delta.as_int();
        match event.kind {
            TrackEventKind::Midi {
                message: MidiMessage::NoteOn { key, vel },
                ..
            } => {
                let ev = if vel.as_int() == 0 {
                    DrumEvent::Off { key: key.as_int() }
                } else {
                    DrumEvent::On {
                        key: key.as_int(),
                        velocity: vel.as_int(),
                    }
                };
                events.push((tick, ev));
            }
            TrackEventKind::Midi {
                message: MidiMessage::NoteOff { key, .. },
                ..
            } => {
                events.push((tick, DrumEvent::Off { key: key.as_int() }));
            }
            TrackEventKind::Meta(MetaMessage::Text(text)) => {
                events.push((tick, DrumEvent::Text(String::from_utf8_lossy(text).to_string())));
            }
            _ => {}
        }
    }

    let base_key = options.difficulty.midi_base_key();

    // Tom markers: while a marker span is open the pad is a tom; outside it
    // defaults to a cymbal.
    let mut tom_active = [false; 3];
    let mut solo = false;
    let mut disco = false;
    let mut dynamics_enabled = false;
    let mut phrase_start: Option<Tick> = None;

    let mut i = 0;
    while i < events.len() {
        let group_tick = events[i].0;
        let mut j = i;
        while j < events.len() && events[j].0 == group_tick {
            j += 1;
        }
        let group = &events[i..j];
        i = j;

        // Texts and marker spans first, so they apply to this tick's notes.
        for (_, event) in group {
            match event {
                DrumEvent::Text(text) => {
                    if DYNAMICS_ENABLE.is_match(text) {
                        dynamics_enabled = true;
                    } else if DISCO_ON.is_match(text) {
                        disco = true;
                    } else if DISCO_OFF.is_match(text) {
                        disco = false;
                    }
                }
                DrumEvent::On { key, .. } => match *key {
                    KEY_TOM_YELLOW | KEY_TOM_BLUE | KEY_TOM_GREEN => {
                        tom_active[(*key - KEY_TOM_YELLOW) as usize] = true;
                    }
                    KEY_SOLO => solo = true,
                    KEY_STAR_POWER => phrase_start = Some(group_tick),
                    _ => {}
                },
                DrumEvent::Off { key } => match *key {
                    KEY_TOM_YELLOW | KEY_TOM_BLUE | KEY_TOM_GREEN => {
                        tom_active[(*key - KEY_TOM_YELLOW) as usize] = false;
                    }
                    KEY_SOLO => solo = false,
                    KEY_STAR_POWER => {
                        if let Some(start) = phrase_start.take() {
                            builder.push_phrase(start, group_tick);
                        }
                    }
                    _ => {}
                },
            }
        }

        // Lane notes.
        let mut chord = Chord::default();
        for (_, event) in group {
            let DrumEvent::On { key, velocity } = event else {
                continue;
            };
            let color = match key.checked_sub(base_key) {
                Some(0) => Some(NoteColor::Kick),
                Some(1) => Some(NoteColor::Red),
                Some(2) => Some(NoteColor::Yellow),
                Some(3) => Some(NoteColor::Blue),
                Some(4) => Some(NoteColor::Green),
                _ => None,
            };
            if let Some(color) = color {
                let dynamic = if dynamics_enabled && color.allows_dynamics() {
                    match velocity {
                        1 => Dynamic::Ghost,
                        127 => Dynamic::Accent,
                        _ => Dynamic::Normal,
                    }
                } else {
                    Dynamic::Normal
                };
                let cymbal = options.pro_drums
                    && color.allows_cymbals()
                    && !tom_active[tom_index(color)];
                let note = Note {
                    dynamic,
                    cymbal,
                    ..Note::default()
                };
                if !chord.add(color, note) {
                    log::debug!("duplicate {color:?} note at tick {group_tick}, ignored");
                }
            } else if *key == KEY_DOUBLE_KICK && options.double_kick {
                let note = Note {
                    double_kick: true,
                    ..Note::default()
                };
                if !chord.add(NoteColor::Kick, note) {
                    log::debug!("duplicate kick at tick {group_tick}, ignored");
                }
            }
        }

        if !chord.is_empty() {
            if disco {
                chord.apply_disco_flip();
            }
            builder.push_chord(group_tick, chord, solo)?;
        }
    }

    Ok(())
}

fn tom_index(color: NoteColor) -> usize {
    match color {
        NoteColor::Yellow => 0,
        NoteColor::Blue => 1,
        NoteColor::Green => 2,
        _ => unreachable!("only cymbal lanes have tom markers"),
    }
}
