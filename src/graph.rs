//! Builds the decision graph searched for the optimal star power path.
//!
//! One node per phrase boundary, plus a virtual terminal addressed as
//! `node_count()`. Nodes and edges live in index-addressed arenas; the
//! structure is a linear DAG in phrase order. Note-level detail is collapsed
//! into precomputed per-edge score deltas, so graph size is bounded by
//! phrase count rather than note count.

use std::collections::{BTreeSet, HashMap};

use crate::align::{self, AlignmentWindows, UnresolvedActivation};
use crate::song::{Chord, Song, Tick};

/// Meter units per full bar of star power.
pub const DEFAULT_METER_QUANT: u32 = 1024;

/// A full meter lasts this many measures of song time.
const SP_FULL_MEASURES: f64 = 8.0;

/// Star power expiring within this fraction of a measure of a boundary
/// counts as expired there (1/1024 of a measure).
const MEASURE_EPSILON: f64 = 0.0009765625;

#[derive(Debug, Clone, Copy)]
pub struct GraphConfig {
    pub meter_quant: u32,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            meter_quant: DEFAULT_METER_QUANT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Hold,
    Activate,
}

/// One decision out of a (node, meter state). Activate edges span the whole
/// active window: no decision exists while star power runs, since phrase
/// completion extends it automatically and re-activation is infeasible, so
/// the edge lands on the first node after depletion with zero meter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Edge {
    pub from_node: usize,
    pub from_meter: u32,
    /// Destination node index; `node_count()` is the terminal.
    pub to_node: usize,
    /// Meter on arrival, before the destination phrase's grant.
    pub to_meter: u32,
    pub decision: Decision,
    /// Star power score gained by taking this edge.
    pub score_delta: u32,
}

/// A feasible meter value at a node and the decisions available from it.
#[derive(Debug, Clone)]
pub struct MeterState {
    pub meter: u32,
    pub edges: Vec<usize>,
}

/// A decision point: the end boundary of one phrase.
#[derive(Debug, Clone)]
pub struct Node {
    pub phrase_index: usize,
    pub boundary: Tick,
    pub measure: f64,
    /// The chord this node's activation is judged against.
    pub activation_tick: Tick,
    pub activation_chord: Chord,
    /// Feasible meter states, ascending, closed under all incoming edges.
    pub states: Vec<MeterState>,
}

#[derive(Debug)]
pub struct ScoreGraph {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    meter_quant: u32,
    base_score: u32,
    dynamics_bonus: u32,
    solo_bonus: u32,
}

impl ScoreGraph {
    pub fn build(
        song: &Song,
        windows: &AlignmentWindows,
        config: &GraphConfig,
    ) -> Result<Self, UnresolvedActivation> {
        // Quantization must admit quarter grants.
        let quant = (config.meter_quant / 4).max(1) * 4;
        let grant = quant / 4;
        let threshold = quant / 2;

        let scores = ChordScores::precompute(song);

        let mut nodes: Vec<Node> = Vec::with_capacity(song.phrases().len());
        let tsm = song.time_signature_map();
        for (phrase_index, phrase) in song.phrases().iter().enumerate() {
            let chord_index = align::resolve_activation(song.chords(), phrase.end, windows)?;
            let event = &song.chords()[chord_index];
            nodes.push(Node {
                phrase_index,
                boundary: phrase.end,
                measure: tsm.measures_at(phrase.end),
                activation_tick: event.tick,
                activation_chord: event.chord.clone(),
                states: Vec::new(),
            });
        }

        // Forward closure over reachable meter states. Inactive meter only
        // moves in grant steps and activations always deplete to zero, so
        // the per-node state space stays tiny.
        let node_count = nodes.len();
        let mut state_sets: Vec<BTreeSet<u32>> = vec![BTreeSet::new(); node_count];
        if node_count > 0 {
            state_sets[0].insert(0);
        }
        let mut edges: Vec<Edge> = Vec::new();

        for p in 0..node_count {
            let meters: Vec<u32> = state_sets[p].iter().copied().collect();
            for meter in meters {
                let granted = (meter + grant).min(quant);

                edges.push(Edge {
                    from_node: p,
                    from_meter: meter,
                    to_node: p + 1,
                    to_meter: granted,
                    decision: Decision::Hold,
                    score_delta: 0,
                });
                if p + 1 < node_count {
                    state_sets[p + 1].insert(granted);
                }

                if granted >= threshold {
                    let activation_chord = activation_chord_index(song, &nodes[p]);
                    let (to_node, score_delta) = simulate_activation(
                        &nodes,
                        &scores,
                        p,
                        activation_chord,
                        granted,
                        quant,
                        grant,
                    );
                    edges.push(Edge {
                        from_node: p,
                        from_meter: meter,
                        to_node,
                        to_meter: 0,
                        decision: Decision::Activate,
                        score_delta,
                    });
                    if to_node < node_count {
                        state_sets[to_node].insert(0);
                    }
                }
            }
        }

        // Attach edges to their source states.
        let mut by_state: HashMap<(usize, u32), Vec<usize>> = HashMap::new();
        for (id, edge) in edges.iter().enumerate() {
            by_state
                .entry((edge.from_node, edge.from_meter))
                .or_default()
                .push(id);
        }
        for (p, node) in nodes.iter_mut().enumerate() {
            node.states = state_sets[p]
                .iter()
                .map(|&meter| MeterState {
                    meter,
                    edges: by_state.remove(&(p, meter)).unwrap_or_default(),
                })
                .collect();
        }

        Ok(Self {
            nodes,
            edges,
            meter_quant: quant,
            base_score: scores.base_score,
            dynamics_bonus: scores.dynamics_bonus,
            solo_bonus: scores.solo_bonus,
        })
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge(&self, id: usize) -> &Edge {
        &self.edges[id]
    }

    pub fn meter_quant(&self) -> u32 {
        self.meter_quant
    }

    pub fn meter_grant(&self) -> u32 {
        self.meter_quant / 4
    }

    pub fn activation_threshold(&self) -> u32 {
        self.meter_quant / 2
    }

    /// Score from plain note values under the combo multiplier, dynamics
    /// stripped.
    pub fn base_score(&self) -> u32 {
        self.base_score
    }

    /// Extra points from ghost/accent notes.
    pub fn dynamics_bonus(&self) -> u32 {
        self.dynamics_bonus
    }

    /// Flat 100-per-note bonus from solo regions.
    pub fn solo_bonus(&self) -> u32 {
        self.solo_bonus
    }

    /// Index of `meter` within a node's state list.
    pub fn state_index(&self, node: usize, meter: u32) -> Option<usize> {
        self.nodes[node]
            .states
            .binary_search_by_key(&meter, |s| s.meter)
            .ok()
    }
}

fn activation_chord_index(song: &Song, node: &Node) -> usize {
    song.chords()
        .partition_point(|c| c.tick < node.activation_tick)
}

/// Walk forward from an activation at node `p` with `granted` meter.
/// Phrase boundaries crossed while active extend the window by the phrase
/// grant; returns the first node index at/after depletion (possibly the
/// terminal) and the doubled score inside the active window.
fn simulate_activation(
    nodes: &[Node],
    scores: &ChordScores,
    p: usize,
    activation_chord: usize,
    granted: u32,
    quant: u32,
    grant: u32,
) -> (usize, u32) {
    let grant_measures = SP_FULL_MEASURES * grant as f64 / quant as f64;
    let start_measure = scores.measures[activation_chord];

    let mut remaining = SP_FULL_MEASURES * granted as f64 / quant as f64;
    let mut cursor = start_measure;
    let mut q = p + 1;
    let depletion = loop {
        if q >= nodes.len() {
            break cursor + remaining;
        }
        let segment = (nodes[q].measure - cursor).max(0.0);
        if remaining - segment > MEASURE_EPSILON {
            remaining = (remaining - segment + grant_measures).min(SP_FULL_MEASURES);
            cursor = cursor.max(nodes[q].measure);
            q += 1;
        } else {
            break cursor + remaining;
        }
    };

    let end = scores
        .measures
        .partition_point(|&m| m < depletion - MEASURE_EPSILON);
    let bonus = (scores.prefix[end] - scores.prefix[activation_chord]) as u32;
    (q, bonus)
}

/// Per-chord scores under the full-combo multiplier, with prefix sums so an
/// activation window's doubled score is two lookups.
struct ChordScores {
    measures: Vec<f64>,
    prefix: Vec<u64>,
    base_score: u32,
    dynamics_bonus: u32,
    solo_bonus: u32,
}

impl ChordScores {
    fn precompute(song: &Song) -> Self {
        let tsm = song.time_signature_map();
        let mut measures = Vec::with_capacity(song.chords().len());
        let mut prefix = Vec::with_capacity(song.chords().len() + 1);
        prefix.push(0u64);

        let mut combo = 0u32;
        let mut base_score = 0u32;
        let mut dynamics_bonus = 0u32;
        let mut solo_bonus = 0u32;

        for event in song.chords() {
            let with_dynamics = combo_score(&event.chord.point_spread(false), combo);
            let plain = combo_score(&event.chord.point_spread(true), combo);
            base_score += plain;
            dynamics_bonus += with_dynamics - plain;
            if event.solo {
                solo_bonus += 100 * event.chord.len() as u32;
            }
            combo += event.chord.len() as u32;

            measures.push(tsm.measures_at(event.tick));
            prefix.push(prefix.last().unwrap() + with_dynamics as u64);
        }

        Self {
            measures,
            prefix,
            base_score,
            dynamics_bonus,
            solo_bonus,
        }
    }
}

/// Combo-based score multiplier, capped at 4x.
pub fn multiplier(combo: u32) -> u32 {
    match combo {
        0..=9 => 1,
        10..=19 => 2,
        20..=29 => 3,
        _ => 4,
    }
}

/// Score of one chord's notes entering at `combo_before`. Values are sorted
/// ascending so a threshold crossed mid-chord upgrades the remaining
/// higher-value notes.
fn combo_score(values: &[u32], combo_before: u32) -> u32 {
    values
        .iter()
        .enumerate()
        .map(|(i, &v)| v * multiplier(combo_before + i as u32 + 1))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::song::{Chord, Note, NoteColor, Song, SongBuilder};

    fn red_chord() -> Chord {
        let mut chord = Chord::default();
        chord.add(NoteColor::Red, Note::default());
        chord
    }

    fn song_with(chord_ticks: &[Tick], phrases: &[(Tick, Tick)]) -> Song {
        let mut b = SongBuilder::new(192);
        b.set_meter(0, 4, 4);
        b.set_tempo(0, 120.0);
        for &tick in chord_ticks {
            b.push_chord(tick, red_chord(), false).unwrap();
        }
        for &(start, end) in phrases {
            b.push_phrase(start, end);
        }
        b.build().unwrap()
    }

    fn build(song: &Song) -> ScoreGraph {
        ScoreGraph::build(
            song,
            &AlignmentWindows::for_resolution(song.resolution()),
            &GraphConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_multiplier_thresholds() {
        assert_eq!(multiplier(0), 1);
        assert_eq!(multiplier(9), 1);
        assert_eq!(multiplier(10), 2);
        assert_eq!(multiplier(19), 2);
        assert_eq!(multiplier(20), 3);
        assert_eq!(multiplier(30), 4);
        assert_eq!(multiplier(1000), 4);
    }

    #[test]
    fn test_base_score_multiplier_ramp() {
        // 40 single notes at 50 points: 9 at 1x, 10 at 2x, 10 at 3x, 11 at 4x.
        let ticks: Vec<Tick> = (0..40).map(|i| i * 48).collect();
        let song = song_with(&ticks, &[]);
        let graph = build(&song);
        assert_eq!(graph.base_score(), 450 + 1000 + 1500 + 2200);
        assert_eq!(graph.dynamics_bonus(), 0);
        assert_eq!(graph.solo_bonus(), 0);
    }

    #[test]
    fn test_mid_chord_threshold_upgrades_high_notes() {
        // 9 notes in, then a kick+cymbal chord straddles the 10-combo
        // threshold: the kick (50) lands at 1x, the cymbal (65) at 2x.
        let mut b = SongBuilder::new(192);
        for i in 0..9 {
            b.push_chord(i * 48, red_chord(), false).unwrap();
        }
        let mut chord = Chord::default();
        chord.add(NoteColor::Kick, Note::default());
        chord.add(
            NoteColor::Yellow,
            Note {
                cymbal: true,
                ..Note::default()
            },
        );
        b.push_chord(9 * 48, chord, false).unwrap();
        let song = b.build().unwrap();
        let graph = build(&song);
        assert_eq!(graph.base_score(), 9 * 50 + 50 + 65 * 2);
    }

    #[test]
    fn test_dynamics_and_solo_totals() {
        let mut b = SongBuilder::new(192);
        let mut accented = Chord::default();
        accented.add(
            NoteColor::Red,
            Note {
                dynamic: crate::song::Dynamic::Accent,
                ..Note::default()
            },
        );
        b.push_chord(0, accented, true).unwrap();
        b.push_chord(192, red_chord(), true).unwrap();
        b.push_chord(384, red_chord(), false).unwrap();
        let song = b.build().unwrap();
        let graph = build(&song);
        assert_eq!(graph.base_score(), 150);
        assert_eq!(graph.dynamics_bonus(), 50);
        assert_eq!(graph.solo_bonus(), 200);
    }

    #[test]
    fn test_empty_song_graph() {
        let song = song_with(&[], &[]);
        let graph = build(&song);
        assert_eq!(graph.node_count(), 0);
        assert_eq!(graph.base_score(), 0);
    }

    #[test]
    fn test_unresolved_activation_surfaces() {
        // Phrase ends at 576 with no chord anywhere near it.
        let song = song_with(&[0, 5000], &[(0, 576)]);
        let err = ScoreGraph::build(
            &song,
            &AlignmentWindows::for_resolution(192),
            &GraphConfig::default(),
        )
        .unwrap_err();
        assert_eq!(err.phrase_end, 576);
    }

    #[test]
    fn test_state_closure_and_fanout() {
        // Boundaries at 192 and 576, chords at both so alignment resolves.
        let song = song_with(&[0, 192, 576, 1000], &[(0, 192), (300, 576)]);
        let graph = build(&song);
        assert_eq!(graph.node_count(), 2);

        // Node 0: zero meter, grant leaves 25% — activation gated off.
        let node0 = &graph.nodes()[0];
        assert_eq!(node0.states.len(), 1);
        assert_eq!(node0.states[0].meter, 0);
        assert_eq!(node0.states[0].edges.len(), 1);
        assert_eq!(
            graph.edge(node0.states[0].edges[0]).decision,
            Decision::Hold
        );

        // Node 1: arrives with 25%, grant reaches 50% — both decisions.
        let node1 = &graph.nodes()[1];
        assert_eq!(node1.states.len(), 1);
        assert_eq!(node1.states[0].meter, graph.meter_grant());
        assert_eq!(node1.states[0].edges.len(), 2);
    }

    #[test]
    fn test_activation_bonus_window() {
        // Activation at node 1 (boundary 576, measure 0.75) with 50% meter
        // runs 4 measures: depletion at measure 4.75 = tick 3648. Chords at
        // 576, 1000, 2000, 3600 are doubled; 3648 sits exactly on the
        // depletion boundary and 4000 is past it.
        let song = song_with(
            &[0, 192, 576, 1000, 2000, 3600, 3648, 4000],
            &[(0, 192), (300, 576)],
        );
        let graph = build(&song);

        let node1 = &graph.nodes()[1];
        let activate = node1.states[0]
            .edges
            .iter()
            .map(|&id| graph.edge(id))
            .find(|e| e.decision == Decision::Activate)
            .expect("activate edge");

        // All eight chords stay below 10 combo, so every note is 1x 50.
        assert_eq!(activate.score_delta, 4 * 50);
        assert_eq!(activate.to_node, graph.node_count()); // terminal
        assert_eq!(activate.to_meter, 0);
    }

    #[test]
    fn test_activation_extends_across_boundary() {
        // Third phrase boundary at 2000 (measure ~2.6) is crossed while
        // active, extending depletion to measure 6.75 = tick 5184.
        let song = song_with(
            &[0, 192, 576, 2000, 5100, 5200],
            &[(0, 192), (300, 576), (600, 2000)],
        );
        let graph = build(&song);

        let node1 = &graph.nodes()[1];
        let activate = node1.states[0]
            .edges
            .iter()
            .map(|&id| graph.edge(id))
            .find(|e| e.decision == Decision::Activate)
            .expect("activate edge");

        // Doubled: 576, 2000, 5100. Not doubled: 5200 (past 5184).
        assert_eq!(activate.score_delta, 3 * 50);
        assert_eq!(activate.to_node, graph.node_count());
    }

    #[test]
    fn test_backward_aligned_activation_starts_early() {
        // The activation chord resolves 6 ticks before the boundary and the
        // window starts there, so that chord is doubled too.
        let song = song_with(&[0, 192, 570, 1000], &[(0, 192), (300, 576)]);
        let graph = build(&song);
        let node1 = &graph.nodes()[1];
        assert_eq!(node1.activation_tick, 570);
        let activate = node1.states[0]
            .edges
            .iter()
            .map(|&id| graph.edge(id))
            .find(|e| e.decision == Decision::Activate)
            .unwrap();
        assert_eq!(activate.score_delta, 2 * 50);
    }

    #[test]
    fn test_meter_caps_at_full() {
        // Six held phrases: meter caps at 100%, states never exceed quant.
        let boundaries: Vec<(Tick, Tick)> = (0..6).map(|i| (i * 768, i * 768 + 192)).collect();
        let chord_ticks: Vec<Tick> = boundaries.iter().map(|&(_, end)| end).collect();
        let song = song_with(&chord_ticks, &boundaries);
        let graph = build(&song);
        for node in graph.nodes() {
            for state in &node.states {
                assert!(state.meter <= graph.meter_quant());
            }
        }
        let last = graph.nodes().last().unwrap();
        assert!(last.states.iter().any(|s| s.meter == graph.meter_quant()));
    }
}
