//! The end result of an analysis: ranked activation paths for one chart.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::song::{Chord, Tick};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("activation index {index} out of range for a path with {len} activations")]
pub struct IndexOutOfRange {
    pub index: usize,
    pub len: usize,
}

/// One star power deployment within a path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activation {
    /// Tick of the resolved activation chord.
    pub tick: Tick,
    /// The chord the activation is judged against; per-lane presence tells
    /// the player what must be hit.
    pub chord: Chord,
    /// Star power score gained by this deployment.
    pub score_contribution: u32,
    /// Meter at activation, in quantized units.
    pub meter: u32,
    /// Feasible activations deliberately held since the previous one.
    pub skips: u32,
}

/// An ordered sequence of activations with its star power score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Path {
    activations: Vec<Activation>,
    pub sp_score: u32,
    pub total_score: u32,
}

impl Path {
    pub(crate) fn new(activations: Vec<Activation>, sp_score: u32, total_score: u32) -> Self {
        Self {
            activations,
            sp_score,
            total_score,
        }
    }

    pub fn activations(&self) -> &[Activation] {
        &self.activations
    }

    pub fn activation(&self, index: usize) -> Result<&Activation, IndexOutOfRange> {
        self.activations.get(index).ok_or(IndexOutOfRange {
            index,
            len: self.activations.len(),
        })
    }

    /// Skip-count notation, e.g. `2 0 1`: each number is how many feasible
    /// activations were held before that deployment.
    pub fn notation(&self) -> String {
        if self.activations.is_empty() {
            return "(no activations)".into();
        }
        self.activations
            .iter()
            .map(|a| a.skips.to_string())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// One analyzed chart's results. Each unique chart can have one Record per
/// combination of difficulty and decode modifiers; multiple ranked paths for
/// the chart live within the same Record, best first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Version of the analyzer that produced this record.
    pub version: String,
    pub base_score: u32,
    pub dynamics_bonus: u32,
    pub solo_bonus: u32,
    paths: Vec<Path>,
}

impl Record {
    pub(crate) fn new(
        base_score: u32,
        dynamics_bonus: u32,
        solo_bonus: u32,
        paths: Vec<Path>,
    ) -> Self {
        debug_assert!(!paths.is_empty());
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            base_score,
            dynamics_bonus,
            solo_bonus,
            paths,
        }
    }

    /// The top-ranked path. Deterministic for identical input: ranking
    /// tie-breaks are fixed by the search.
    pub fn best_path(&self) -> &Path {
        &self.paths[0]
    }

    /// Ranked alternates beyond the best path.
    pub fn alternates(&self) -> &[Path] {
        &self.paths[1..]
    }

    pub fn paths(&self) -> &[Path] {
        &self.paths
    }

    pub fn optimal_score(&self) -> u32 {
        self.best_path().total_score
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::song::{Note, NoteColor};

    fn activation(tick: Tick, skips: u32) -> Activation {
        let mut chord = Chord::default();
        chord.add(NoteColor::Green, Note::default());
        Activation {
            tick,
            chord,
            score_contribution: 100,
            meter: 512,
            skips,
        }
    }

    #[test]
    fn test_activation_accessor_bounds() {
        let path = Path::new(vec![activation(576, 0)], 100, 600);
        assert_eq!(path.activation(0).unwrap().tick, 576);
        assert_eq!(
            path.activation(1).unwrap_err(),
            IndexOutOfRange { index: 1, len: 1 }
        );
        assert_eq!(
            path.activation(7).unwrap_err(),
            IndexOutOfRange { index: 7, len: 1 }
        );
    }

    #[test]
    fn test_notation() {
        let empty = Path::new(vec![], 0, 500);
        assert_eq!(empty.notation(), "(no activations)");

        let path = Path::new(vec![activation(576, 2), activation(2000, 0)], 200, 700);
        assert_eq!(path.notation(), "2 0");
    }

    #[test]
    fn test_best_and_alternates() {
        let best = Path::new(vec![activation(576, 0)], 200, 700);
        let alt = Path::new(vec![activation(2000, 1)], 150, 650);
        let record = Record::new(400, 50, 50, vec![best.clone(), alt.clone()]);
        assert_eq!(record.best_path(), &best);
        assert_eq!(record.alternates(), &[alt]);
        assert_eq!(record.optimal_score(), 700);
    }

    #[test]
    fn test_record_json_round_trip() {
        let record = Record::new(400, 0, 100, vec![Path::new(vec![activation(576, 1)], 200, 700)]);
        let json = serde_json::to_string(&record).unwrap();
        let back: Record = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
        assert!(back.best_path().activation(0).unwrap().chord.has(NoteColor::Green));
    }
}
