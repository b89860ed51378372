use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Absolute time position in format-native resolution units.
pub type Tick = u32;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SongError {
    #[error("resolution must be positive")]
    ZeroResolution,
    #[error("duplicate chord at tick {0}")]
    DuplicateChord(Tick),
    #[error("empty chord at tick {0}")]
    EmptyChord(Tick),
    #[error("star power phrase at tick {start} has non-positive length")]
    BadPhrase { start: Tick, end: Tick },
    #[error("star power phrases overlap at tick {0}")]
    OverlappingPhrases(Tick),
}

/// Lane identifiers for the drum highway.
///
/// The color determines what kinds of notes are possible: the kick lane has
/// no cymbals or dynamics, red has dynamics but no cymbals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteColor {
    Kick,
    Red,
    Yellow,
    Blue,
    Green,
}

impl NoteColor {
    pub const ALL: [NoteColor; 5] = [
        NoteColor::Kick,
        NoteColor::Red,
        NoteColor::Yellow,
        NoteColor::Blue,
        NoteColor::Green,
    ];

    pub fn allows_cymbals(self) -> bool {
        matches!(self, NoteColor::Yellow | NoteColor::Blue | NoteColor::Green)
    }

    pub fn allows_dynamics(self) -> bool {
        !matches!(self, NoteColor::Kick)
    }

    /// Single-letter notation used in path printouts.
    pub fn notation(self) -> char {
        match self {
            NoteColor::Kick => 'K',
            NoteColor::Red => 'R',
            NoteColor::Yellow => 'Y',
            NoteColor::Blue => 'B',
            NoteColor::Green => 'G',
        }
    }
}

/// A note's dynamic type. Ghosts and accents double the base value when the
/// chart has dynamics enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dynamic {
    #[default]
    Normal,
    Ghost,
    Accent,
}

/// One note within a chord.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Note {
    pub dynamic: Dynamic,
    pub cymbal: bool,
    pub double_kick: bool,
    /// Sustain length in ticks. The text format supplies it; percussion
    /// notes in the binary format have none and store 0.
    pub sustain: Tick,
}

impl Note {
    /// Base point value: 65 for cymbals, 50 otherwise, doubled for
    /// ghost/accent notes unless `no_dynamics` strips them.
    pub fn base_value(&self, no_dynamics: bool) -> u32 {
        let base = if self.cymbal { 65 } else { 50 };
        if !no_dynamics && self.dynamic != Dynamic::Normal {
            base * 2
        } else {
            base
        }
    }
}

/// The set of notes simultaneously active at one tick, at most one per lane.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Chord {
    pub kick: Option<Note>,
    pub red: Option<Note>,
    pub yellow: Option<Note>,
    pub blue: Option<Note>,
    pub green: Option<Note>,
}

impl Chord {
    pub fn get(&self, color: NoteColor) -> Option<&Note> {
        match color {
            NoteColor::Kick => self.kick.as_ref(),
            NoteColor::Red => self.red.as_ref(),
            NoteColor::Yellow => self.yellow.as_ref(),
            NoteColor::Blue => self.blue.as_ref(),
            NoteColor::Green => self.green.as_ref(),
        }
    }

    pub fn lane_mut(&mut self, color: NoteColor) -> &mut Option<Note> {
        match color {
            NoteColor::Kick => &mut self.kick,
            NoteColor::Red => &mut self.red,
            NoteColor::Yellow => &mut self.yellow,
            NoteColor::Blue => &mut self.blue,
            NoteColor::Green => &mut self.green,
        }
    }

    pub fn has(&self, color: NoteColor) -> bool {
        self.get(color).is_some()
    }

    /// Add a note to an empty lane. Returns false (and leaves the chord
    /// unchanged) if the lane is already occupied.
    pub fn add(&mut self, color: NoteColor, note: Note) -> bool {
        let lane = self.lane_mut(color);
        if lane.is_some() {
            return false;
        }
        *lane = Some(note);
        true
    }

    pub fn notes(&self) -> impl Iterator<Item = (NoteColor, &Note)> {
        NoteColor::ALL
            .iter()
            .filter_map(|&c| self.get(c).map(|n| (c, n)))
    }

    pub fn len(&self) -> usize {
        self.notes().count()
    }

    pub fn is_empty(&self) -> bool {
        self.notes().next().is_none()
    }

    /// Base values of the chord's notes sorted ascending, so a mid-chord
    /// combo threshold upgrades the remaining higher-value notes.
    pub fn point_spread(&self, no_dynamics: bool) -> Vec<u32> {
        let mut values: Vec<u32> = self.notes().map(|(_, n)| n.base_value(no_dynamics)).collect();
        values.sort_unstable();
        values
    }

    /// Swap the red and yellow lanes under a disco flip region: red becomes
    /// a yellow cymbal, yellow becomes a red tom.
    pub fn apply_disco_flip(&mut self) {
        let red = self.red.take();
        let yellow = self.yellow.take();
        self.yellow = red.map(|mut n| {
            n.cymbal = true;
            n
        });
        self.red = yellow.map(|mut n| {
            n.cymbal = false;
            n
        });
    }

    /// Compact lane notation, e.g. `[ R  G]`.
    pub fn notation(&self) -> String {
        let mut out = String::from("[");
        for color in NoteColor::ALL {
            out.push(if self.has(color) { color.notation() } else { ' ' });
        }
        out.push(']');
        out
    }
}

/// A chord placed in the song, with the solo flag of its surrounding region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChordEvent {
    pub tick: Tick,
    pub chord: Chord,
    pub solo: bool,
}

/// A star power phrase. `end` is exclusive; completing the phrase grants
/// meter, and its end is a potential activation point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phrase {
    pub start: Tick,
    pub end: Tick,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TempoChange {
    pub tick: Tick,
    pub bpm: f64,
}

/// Ordered tick-keyed tempo changes, always anchored at tick 0.
#[derive(Debug, Clone, PartialEq)]
pub struct TempoMap {
    changes: Vec<TempoChange>,
}

impl TempoMap {
    fn from_changes(mut map: BTreeMap<Tick, f64>) -> Self {
        map.entry(0).or_insert(120.0);
        Self {
            changes: map
                .into_iter()
                .map(|(tick, bpm)| TempoChange { tick, bpm })
                .collect(),
        }
    }

    pub fn changes(&self) -> &[TempoChange] {
        &self.changes
    }

    pub fn bpm_at(&self, tick: Tick) -> f64 {
        self.changes
            .iter()
            .take_while(|c| c.tick <= tick)
            .last()
            .map(|c| c.bpm)
            .unwrap_or(120.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeterChange {
    pub tick: Tick,
    pub numerator: u32,
    pub denominator: u32,
    pub ticks_per_measure: u32,
}

/// Ordered tick-keyed time signature changes, always anchored at tick 0.
/// Converts ticks to decimal measure positions for star power bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSignatureMap {
    changes: Vec<MeterChange>,
}

impl TimeSignatureMap {
    fn from_changes(mut map: BTreeMap<Tick, (u32, u32)>, resolution: u32) -> Self {
        map.entry(0).or_insert((4, 4));
        Self {
            changes: map
                .into_iter()
                .map(|(tick, (numerator, denominator))| MeterChange {
                    tick,
                    numerator,
                    denominator,
                    ticks_per_measure: resolution * numerator * 4 / denominator,
                })
                .collect(),
        }
    }

    pub fn changes(&self) -> &[MeterChange] {
        &self.changes
    }

    pub fn meter_at(&self, tick: Tick) -> &MeterChange {
        self.changes
            .iter()
            .take_while(|c| c.tick <= tick)
            .last()
            .unwrap_or(&self.changes[0])
    }

    /// Decimal measure position of a tick: whole measures elapsed plus the
    /// fraction of the current measure.
    pub fn measures_at(&self, tick: Tick) -> f64 {
        let mut measures = 0.0;
        let mut seg_start = 0u32;
        let mut seg_tpm = self.changes[0].ticks_per_measure;
        for change in &self.changes[1..] {
            if change.tick >= tick {
                break;
            }
            measures += (change.tick - seg_start) as f64 / seg_tpm as f64;
            seg_start = change.tick;
            seg_tpm = change.ticks_per_measure;
        }
        measures + (tick - seg_start) as f64 / seg_tpm as f64
    }
}

/// The difficulty track to decode, selecting the `.chart` section name or
/// the MIDI lane layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
    Expert,
}

impl Difficulty {
    pub fn chart_section(self) -> &'static str {
        match self {
            Difficulty::Easy => "EasyDrums",
            Difficulty::Medium => "MediumDrums",
            Difficulty::Hard => "HardDrums",
            Difficulty::Expert => "ExpertDrums",
        }
    }

    /// MIDI key of the kick lane; the colored lanes follow at +1..+4.
    pub fn midi_base_key(self) -> u8 {
        match self {
            Difficulty::Easy => 60,
            Difficulty::Medium => 72,
            Difficulty::Hard => 84,
            Difficulty::Expert => 96,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
            Difficulty::Expert => "expert",
        }
    }
}

/// The canonical decoded chart: a tick-ordered chord sequence plus tempo,
/// meter, and star power phrases. Immutable once built; `SongBuilder`
/// enforces every invariant before a Song exists.
#[derive(Debug, Clone, PartialEq)]
pub struct Song {
    resolution: u32,
    tempo_map: TempoMap,
    time_signature_map: TimeSignatureMap,
    chords: Vec<ChordEvent>,
    phrases: Vec<Phrase>,
}

impl Song {
    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    pub fn tempo_map(&self) -> &TempoMap {
        &self.tempo_map
    }

    pub fn time_signature_map(&self) -> &TimeSignatureMap {
        &self.time_signature_map
    }

    /// Chords in strictly increasing tick order.
    pub fn chords(&self) -> &[ChordEvent] {
        &self.chords
    }

    /// Star power phrases, ordered and non-overlapping.
    pub fn phrases(&self) -> &[Phrase] {
        &self.phrases
    }

    pub fn note_count(&self) -> usize {
        self.chords.iter().map(|c| c.chord.len()).sum()
    }
}

/// Accumulates decoded events and validates the Song invariants on `build`.
pub struct SongBuilder {
    resolution: u32,
    tempo: BTreeMap<Tick, f64>,
    meter: BTreeMap<Tick, (u32, u32)>,
    chords: BTreeMap<Tick, (Chord, bool)>,
    phrases: Vec<Phrase>,
}

impl SongBuilder {
    pub fn new(resolution: u32) -> Self {
        Self {
            resolution,
            tempo: BTreeMap::new(),
            meter: BTreeMap::new(),
            chords: BTreeMap::new(),
            phrases: Vec::new(),
        }
    }

    pub fn set_tempo(&mut self, tick: Tick, bpm: f64) {
        self.tempo.insert(tick, bpm);
    }

    pub fn set_meter(&mut self, tick: Tick, numerator: u32, denominator: u32) {
        self.meter.insert(tick, (numerator, denominator));
    }

    pub fn push_chord(&mut self, tick: Tick, chord: Chord, solo: bool) -> Result<(), SongError> {
        if chord.is_empty() {
            return Err(SongError::EmptyChord(tick));
        }
        if self.chords.insert(tick, (chord, solo)).is_some() {
            return Err(SongError::DuplicateChord(tick));
        }
        Ok(())
    }

    pub fn push_phrase(&mut self, start: Tick, end: Tick) {
        self.phrases.push(Phrase { start, end });
    }

    pub fn build(mut self) -> Result<Song, SongError> {
        if self.resolution == 0 {
            return Err(SongError::ZeroResolution);
        }

        self.phrases.sort_by_key(|p| p.start);
        for phrase in &self.phrases {
            if phrase.end <= phrase.start {
                return Err(SongError::BadPhrase {
                    start: phrase.start,
                    end: phrase.end,
                });
            }
        }
        for pair in self.phrases.windows(2) {
            if pair[1].start < pair[0].end {
                return Err(SongError::OverlappingPhrases(pair[1].start));
            }
        }

        Ok(Song {
            resolution: self.resolution,
            tempo_map: TempoMap::from_changes(self.tempo),
            time_signature_map: TimeSignatureMap::from_changes(self.meter, self.resolution),
            chords: self
                .chords
                .into_iter()
                .map(|(tick, (chord, solo))| ChordEvent { tick, chord, solo })
                .collect(),
            phrases: self.phrases,
        })
    }
}
