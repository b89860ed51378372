//! Resolves which chord a star power activation is judged against.
//!
//! Exact coincidence with the phrase end is not required: the game falls
//! back to the nearest chord within an asymmetric window around the
//! boundary, and ties go to the chord ahead of it.

use thiserror::Error;

use crate::song::{ChordEvent, Tick};

/// Search windows around a phrase end, in ticks.
///
/// The backward window scales with resolution (6 ticks at 192, 15 at 480,
/// 30 at 960). The forward bound is only evidenced at resolution 192
/// (89 ticks in, 90 out); the default extrapolates proportionally, and
/// callers with better evidence can override either field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlignmentWindows {
    pub back: Tick,
    pub forward: Tick,
}

impl AlignmentWindows {
    pub fn for_resolution(resolution: u32) -> Self {
        Self {
            back: resolution / 32,
            forward: 89 * resolution / 192,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error(
    "no chord within {back} ticks before or {forward} ticks after the phrase ending at tick {phrase_end}"
)]
pub struct UnresolvedActivation {
    pub phrase_end: Tick,
    pub back: Tick,
    pub forward: Tick,
}

/// Find the activation chord for a phrase ending at `phrase_end`.
///
/// Returns the index into `chords` of the nearest candidate; on an exact
/// distance tie the forward candidate wins. `chords` must be tick-ordered,
/// which the Song invariants guarantee.
pub fn resolve_activation(
    chords: &[ChordEvent],
    phrase_end: Tick,
    windows: &AlignmentWindows,
) -> Result<usize, UnresolvedActivation> {
    let split = chords.partition_point(|c| c.tick < phrase_end);

    let ahead = chords
        .get(split)
        .map(|c| (split, c.tick - phrase_end))
        .filter(|&(_, distance)| distance <= windows.forward);
    let behind = split
        .checked_sub(1)
        .map(|i| (i, phrase_end - chords[i].tick))
        .filter(|&(_, distance)| distance <= windows.back);

    match (behind, ahead) {
        (Some((bi, bd)), Some((_, ad))) if bd < ad => Ok(bi),
        (_, Some((ai, _))) => Ok(ai),
        (Some((bi, _)), None) => Ok(bi),
        (None, None) => Err(UnresolvedActivation {
            phrase_end,
            back: windows.back,
            forward: windows.forward,
        }),
    }
}
