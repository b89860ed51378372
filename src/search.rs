//! Optimal-path search over the decision graph.
//!
//! The graph is a linear DAG in phrase order and the objective is additive,
//! so one forward dynamic-programming sweep suffices: per (node, meter
//! state) keep the best attainable star power score and a back-pointer.
//! Meter is the only state carried besides the accumulated score.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::graph::{Decision, ScoreGraph};
use crate::record::{Activation, Path, Record};
use crate::song::Tick;

/// What the search maximizes. Closed for now; the parameter riding along in
/// `Objective` selects breadth, not mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectiveMode {
    Score,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Objective {
    pub mode: ObjectiveMode,
    /// Ranked alternate paths to retain beyond the best.
    pub alternates: usize,
}

impl Default for Objective {
    fn default() -> Self {
        Self {
            mode: ObjectiveMode::Score,
            alternates: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchLimits {
    /// Bound on distinct meter states at any decision node.
    pub max_meter_states: usize,
}

impl Default for SearchLimits {
    fn default() -> Self {
        Self {
            max_meter_states: 64,
        }
    }
}

/// Passed to the progress callback once per processed decision node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchProgress {
    pub node: usize,
    pub node_count: usize,
}

pub type ProgressFn<'a> = dyn FnMut(SearchProgress) -> anyhow::Result<()> + 'a;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("meter state count {states} exceeds limit {limit} at decision node {node}")]
    ResourceExceeded {
        node: usize,
        states: usize,
        limit: usize,
    },
    #[error("search aborted by progress callback: {0}")]
    Aborted(String),
}

#[derive(Debug, Clone)]
struct DpEntry {
    score: u64,
    /// Activation ticks so far, the tie-break key.
    acts: Vec<Tick>,
    back: Option<(usize, usize, usize)>,
}

/// Tie-break between equal scores: lexicographically earlier activation
/// ticks win, and on a shared prefix the path that activated wins over the
/// one that held. Earlier activation is earlier attainment of the doubled
/// multiplier, mirroring the alignment resolver's "ahead wins" rule.
fn prefers(a: &[Tick], b: &[Tick]) -> bool {
    for (x, y) in a.iter().zip(b.iter()) {
        if x != y {
            return x < y;
        }
    }
    a.len() > b.len()
}

fn relax(slot: &mut Option<DpEntry>, candidate: DpEntry) {
    let replace = match slot {
        None => true,
        Some(current) => {
            candidate.score > current.score
                || (candidate.score == current.score && prefers(&candidate.acts, &current.acts))
        }
    };
    if replace {
        *slot = Some(candidate);
    }
}

/// Run the DP sweep and assemble the ranked Record.
pub fn search(
    graph: &ScoreGraph,
    objective: &Objective,
    limits: &SearchLimits,
    mut on_progress: Option<&mut ProgressFn<'_>>,
) -> Result<Record, SearchError> {
    match objective.mode {
        ObjectiveMode::Score => {}
    }

    let constant = graph.base_score() + graph.dynamics_bonus() + graph.solo_bonus();
    let node_count = graph.node_count();

    if node_count == 0 {
        let path = Path::new(Vec::new(), 0, constant);
        return Ok(Record::new(
            graph.base_score(),
            graph.dynamics_bonus(),
            graph.solo_bonus(),
            vec![path],
        ));
    }

    let mut dp: Vec<Vec<Option<DpEntry>>> = graph
        .nodes()
        .iter()
        .map(|node| vec![None; node.states.len()])
        .collect();
    // Terminal arrivals keyed by final meter.
    let mut terminal: BTreeMap<u32, Option<DpEntry>> = BTreeMap::new();

    let start = graph
        .state_index(0, 0)
        .expect("start state exists at the first node");
    dp[0][start] = Some(DpEntry {
        score: 0,
        acts: Vec::new(),
        back: None,
    });

    for p in 0..node_count {
        if let Some(callback) = on_progress.as_deref_mut() {
            callback(SearchProgress {
                node: p,
                node_count,
            })
            .map_err(|e| SearchError::Aborted(e.to_string()))?;
        }

        let states = graph.nodes()[p].states.len();
        if states > limits.max_meter_states {
            return Err(SearchError::ResourceExceeded {
                node: p,
                states,
                limit: limits.max_meter_states,
            });
        }

        for si in 0..states {
            let Some(entry) = dp[p][si].clone() else {
                continue;
            };
            for &edge_id in &graph.nodes()[p].states[si].edges {
                let edge = graph.edge(edge_id);
                let mut candidate = DpEntry {
                    score: entry.score + edge.score_delta as u64,
                    acts: entry.acts.clone(),
                    back: Some((p, si, edge_id)),
                };
                if edge.decision == Decision::Activate {
                    candidate.acts.push(graph.nodes()[p].activation_tick);
                }
                if edge.to_node == node_count {
                    relax(terminal.entry(edge.to_meter).or_insert(None), candidate);
                } else {
                    let ti = graph
                        .state_index(edge.to_node, edge.to_meter)
                        .expect("meter states are closed under edges");
                    relax(&mut dp[edge.to_node][ti], candidate);
                }
            }
        }
    }

    // Rank terminal arrivals: best score first, then the activation
    // tie-break, then leftover meter so the order is total.
    let mut finishers: Vec<(u32, DpEntry)> = terminal
        .into_iter()
        .filter_map(|(meter, entry)| entry.map(|e| (meter, e)))
        .collect();
    finishers.sort_by(|(meter_a, a), (meter_b, b)| {
        b.score
            .cmp(&a.score)
            .then_with(|| {
                use std::cmp::Ordering;
                if a.acts == b.acts {
                    Ordering::Equal
                } else if prefers(&a.acts, &b.acts) {
                    Ordering::Less
                } else {
                    Ordering::Greater
                }
            })
            .then_with(|| meter_b.cmp(meter_a))
    });

    let paths: Vec<Path> = finishers
        .iter()
        .take(1 + objective.alternates)
        .map(|(_, entry)| reconstruct(graph, &dp, entry, constant))
        .collect();

    Ok(Record::new(
        graph.base_score(),
        graph.dynamics_bonus(),
        graph.solo_bonus(),
        paths,
    ))
}

fn reconstruct(
    graph: &ScoreGraph,
    dp: &[Vec<Option<DpEntry>>],
    entry: &DpEntry,
    constant: u32,
) -> Path {
    let mut edges = Vec::new();
    let mut back = entry.back;
    while let Some((node, state, edge_id)) = back {
        edges.push(edge_id);
        back = dp[node][state]
            .as_ref()
            .expect("back-pointer chain stays valid")
            .back;
    }
    edges.reverse();

    let mut activations = Vec::new();
    let mut pending_skips = 0u32;
    for edge_id in edges {
        let edge = graph.edge(edge_id);
        let node = &graph.nodes()[edge.from_node];
        let granted = (edge.from_meter + graph.meter_grant()).min(graph.meter_quant());
        match edge.decision {
            Decision::Hold => {
                if granted >= graph.activation_threshold() {
                    pending_skips += 1;
                }
            }
            Decision::Activate => {
                activations.push(Activation {
                    tick: node.activation_tick,
                    chord: node.activation_chord.clone(),
                    score_contribution: edge.score_delta,
                    meter: granted,
                    skips: pending_skips,
                });
                pending_skips = 0;
            }
        }
    }

    let sp_score = entry.score as u32;
    Path::new(activations, sp_score, constant + sp_score)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::align::AlignmentWindows;
    use crate::graph::GraphConfig;
    use crate::song::{Chord, Note, NoteColor, Song, SongBuilder, Tick};

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

    fn run(graph: &ScoreGraph, alternates: usize) -> Record {
        search(
            graph,
            &Objective {
                mode: ObjectiveMode::Score,
                alternates,
            },
            &SearchLimits::default(),
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_zero_phrases_degenerate_record() {
        let song = song_with(&[0, 192, 384], &[]);
        let record = run(&build(&song), 3);
        assert_eq!(record.paths().len(), 1);
        assert!(record.best_path().activations().is_empty());
        assert_eq!(record.best_path().sp_score, 0);
        assert_eq!(record.optimal_score(), 150);
    }

    #[test]
    fn test_single_activation_is_taken() {
        // Activating at node 1 doubles the chords inside the window; holding
        // gains nothing, so the best path activates.
        let song = song_with(&[0, 192, 576, 1000, 2000], &[(0, 192), (300, 576)]);
        let record = run(&build(&song), 0);
        let best = record.best_path();
        assert_eq!(best.activations().len(), 1);
        let act = best.activation(0).unwrap();
        assert_eq!(act.tick, 576);
        assert_eq!(act.skips, 0);
        // Window covers chords at 576, 1000, 2000 (all 1x 50).
        assert_eq!(best.sp_score, 150);
        assert_eq!(record.optimal_score(), 5 * 50 + 150);
    }

    #[test]
    fn test_equal_score_tie_prefers_earlier_activation() {
        // Both activation spots double exactly one 50-point chord.
        let song = song_with(
            &[192, 576, 10192],
            &[(0, 192), (300, 576), (10000, 10192)],
        );
        let record = run(&build(&song), 3);
        let best = record.best_path();
        assert_eq!(best.sp_score, 50);
        assert_eq!(best.activation(0).unwrap().tick, 576);

        // The equal-scoring late activation survives as an alternate.
        assert!(record
            .alternates()
            .iter()
            .any(|p| p.sp_score == 50
                && p.activations().first().map(|a| a.tick) == Some(10192)));
    }

    #[test]
    fn test_holding_through_a_feasible_activation() {
        // Late chords sit beyond the early activation's reach (even with its
        // boundary extension) but inside the later, fuller window.
        let song = song_with(
            &[192, 576, 960, 5300, 5400, 5500],
            &[(0, 192), (300, 576), (700, 960)],
        );
        let record = run(&build(&song), 0);
        let best = record.best_path();
        assert_eq!(best.activations().len(), 1);
        let act = best.activation(0).unwrap();
        assert_eq!(act.tick, 960);
        assert_eq!(act.skips, 1);
        assert_eq!(act.meter, 768);
        assert_eq!(best.sp_score, 200);
        assert_eq!(best.notation(), "1");
    }

    #[test]
    fn test_dp_matches_exhaustive_enumeration() {
        let song = song_with(
            &[
                0, 100, 192, 400, 576, 800, 960, 1500, 2000, 2500, 3000, 3500, 4000, 4500, 5000,
                5300, 5500, 6000, 7000, 8000, 9000, 10000,
            ],
            &[(0, 192), (300, 576), (700, 960), (1200, 2000), (2200, 3000), (4800, 5000)],
        );
        let graph = build(&song);
        let record = run(&graph, 0);

        fn dfs(graph: &ScoreGraph, node: usize, meter: u32, acc: u64, best: &mut u64) {
            if node == graph.node_count() {
                *best = (*best).max(acc);
                return;
            }
            let si = graph.state_index(node, meter).unwrap();
            for &edge_id in &graph.nodes()[node].states[si].edges {
                let edge = graph.edge(edge_id);
                dfs(
                    graph,
                    edge.to_node,
                    edge.to_meter,
                    acc + edge.score_delta as u64,
                    best,
                );
            }
        }
        let mut best = 0u64;
        dfs(&graph, 0, 0, 0, &mut best);

        assert_eq!(record.best_path().sp_score as u64, best);
    }

    #[test]
    fn test_alternates_are_ranked() {
        let song = song_with(
            &[192, 576, 960, 5300, 5400, 5500],
            &[(0, 192), (300, 576), (700, 960)],
        );
        let record = run(&build(&song), 8);
        let scores: Vec<u32> = record.paths().iter().map(|p| p.sp_score).collect();
        let mut sorted = scores.clone();
        sorted.sort_unstable_by(|a, b| b.cmp(a));
        assert_eq!(scores, sorted);
        assert!(record.paths().len() >= 2);
    }

    #[test]
    fn test_progress_callback_fires_per_node() {
        let song = song_with(&[192, 576, 960], &[(0, 192), (300, 576), (700, 960)]);
        let graph = build(&song);
        let mut seen = Vec::new();
        let mut callback = |p: SearchProgress| -> anyhow::Result<()> {
            seen.push(p.node);
            Ok(())
        };
        search(
            &graph,
            &Objective::default(),
            &SearchLimits::default(),
            Some(&mut callback),
        )
        .unwrap();
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[test]
    fn test_callback_failure_aborts() {
        let song = song_with(&[192, 576], &[(0, 192), (300, 576)]);
        let graph = build(&song);
        let mut callback =
            |_: SearchProgress| -> anyhow::Result<()> { anyhow::bail!("stop requested") };
        let err = search(
            &graph,
            &Objective::default(),
            &SearchLimits::default(),
            Some(&mut callback),
        )
        .unwrap_err();
        assert!(matches!(err, SearchError::Aborted(_)));
    }

    #[test]
    fn test_state_bound_exceeded() {
        let song = song_with(&[192, 576], &[(0, 192), (300, 576)]);
        let graph = build(&song);
        let err = search(
            &graph,
            &Objective::default(),
            &SearchLimits {
                max_meter_states: 0,
            },
            None,
        )
        .unwrap_err();
        assert!(matches!(err, SearchError::ResourceExceeded { .. }));
    }
}
