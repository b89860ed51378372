//! The analysis entry point: chart bytes in, Record out.
//!
//! The chain is Chart -> Song -> ScoreGraph -> Record. Each invocation owns
//! its Song, graph, and Record outright, so many charts can be analyzed in
//! parallel with no locking — which is exactly what `batch_analyze` does.

use std::path::Path;

use indicatif::{ProgressBar, ProgressStyle};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::align::{AlignmentWindows, UnresolvedActivation};
use crate::db::models::ChartRow;
use crate::db::{Database, DbError};
use crate::decode::{self, ChartFormat, DecodeOptions, FormatError};
use crate::graph::{GraphConfig, ScoreGraph};
use crate::record::Record;
use crate::search::{self, Objective, SearchError, SearchProgress, SearchLimits};
use crate::song::{Difficulty, Song};

#[derive(Error, Debug)]
pub enum AnalyzeError {
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error(transparent)]
    Alignment(#[from] UnresolvedActivation),
    #[error(transparent)]
    Search(#[from] SearchError),
    #[error("analysis aborted by parse callback: {0}")]
    Callback(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything one analysis run needs besides the bytes.
#[derive(Debug, Clone, Copy)]
pub struct AnalyzeOptions {
    pub difficulty: Difficulty,
    pub pro_drums: bool,
    pub double_kick: bool,
    pub objective: Objective,
    /// Override the resolution-derived alignment windows.
    pub windows: Option<AlignmentWindows>,
    pub graph: GraphConfig,
    pub limits: SearchLimits,
}

impl Default for AnalyzeOptions {
    fn default() -> Self {
        Self {
            difficulty: Difficulty::Expert,
            pro_drums: true,
            double_kick: false,
            objective: Objective::default(),
            windows: None,
            graph: GraphConfig::default(),
            limits: SearchLimits::default(),
        }
    }
}

impl AnalyzeOptions {
    fn decode_options(&self) -> DecodeOptions {
        DecodeOptions {
            difficulty: self.difficulty,
            pro_drums: self.pro_drums,
            double_kick: self.double_kick,
        }
    }

    /// Key identifying this decode mode in the catalog.
    pub fn mode_label(&self) -> String {
        format!(
            "{}{}{}",
            self.difficulty.label(),
            if self.pro_drums { "+pro" } else { "" },
            if self.double_kick { "+2x" } else { "" },
        )
    }
}

/// Observability hooks. Both run synchronously on the caller's thread; a
/// callback error hard-aborts the single analysis with no partial Record.
#[derive(Default)]
pub struct Callbacks<'a> {
    pub on_parsed: Option<&'a mut dyn FnMut(&Song) -> anyhow::Result<()>>,
    pub on_search_progress:
        Option<&'a mut (dyn FnMut(SearchProgress) -> anyhow::Result<()> + 'a)>,
}

/// Analyze one chart from raw bytes. The sole surface the core exposes.
pub fn analyze(
    bytes: &[u8],
    format: ChartFormat,
    options: &AnalyzeOptions,
    callbacks: Callbacks<'_>,
) -> Result<Record, AnalyzeError> {
    let song = decode::decode(bytes, format, &options.decode_options())?;

    if let Some(on_parsed) = callbacks.on_parsed {
        on_parsed(&song).map_err(|e| AnalyzeError::Callback(e.to_string()))?;
    }

    let windows = options
        .windows
        .unwrap_or_else(|| AlignmentWindows::for_resolution(song.resolution()));
    let graph = ScoreGraph::build(&song, &windows, &options.graph)?;

    let record = search::search(
        &graph,
        &options.objective,
        &options.limits,
        callbacks.on_search_progress,
    )?;
    Ok(record)
}

/// Analyze a chart file, detecting the format from its extension.
pub fn analyze_file(path: &Path, options: &AnalyzeOptions) -> Result<Record, AnalyzeError> {
    let format = ChartFormat::from_path(path)?;
    let bytes = std::fs::read(path)?;
    analyze(&bytes, format, options, Callbacks::default())
}

/// Content hash of chart bytes (SHA-256 hex), the catalog key. Independent
/// of every decode and search option.
pub fn chart_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

pub struct BatchResult {
    pub analyzed: u64,
    pub failed: u64,
}

/// Analyze cataloged charts in parallel and store their Records.
///
/// Processes charts in chunks: analyze a chunk with rayon, write results to
/// the DB, move on. Incremental progress survives a crash and memory stays
/// bounded by the chunk size. A chart that fails is logged and counted; it
/// never aborts the batch.
pub fn batch_analyze(
    db: &Database,
    jobs: usize,
    force: bool,
    options: &AnalyzeOptions,
) -> Result<BatchResult, DbError> {
    let mode = options.mode_label();
    let charts = if force {
        db.get_all_charts()?
    } else {
        db.get_unanalyzed_charts(&mode)?
    };

    if charts.is_empty() {
        log::info!("No charts to analyze for mode {mode}");
        return Ok(BatchResult {
            analyzed: 0,
            failed: 0,
        });
    }

    log::info!(
        "Analyzing {} charts ({mode}) with {} workers",
        charts.len(),
        jobs
    );

    let pb = ProgressBar::new(charts.len() as u64);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        )
        .unwrap()
        .progress_chars("#>-"),
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs)
        .build()
        .unwrap();

    let mut analyzed: u64 = 0;
    let mut failed: u64 = 0;
    let chunk_size = jobs.max(1) * 2;

    for chunk in charts.chunks(chunk_size) {
        let results: Vec<(&ChartRow, Result<Record, AnalyzeError>)> = pool.install(|| {
            use rayon::prelude::*;
            chunk
                .par_iter()
                .map(|chart| {
                    let result = analyze_file(Path::new(&chart.file_path), options);
                    pb.inc(1);
                    (chart, result)
                })
                .collect()
        });

        for (chart, result) in results {
            match result {
                Ok(record) => match db.store_record(&chart.hash, &mode, &record) {
                    Ok(()) => analyzed += 1,
                    Err(e) => {
                        log::error!("DB error storing record for {}: {}", chart.file_path, e);
                        failed += 1;
                    }
                },
                Err(e) => {
                    log::warn!("Analysis failed for {}: {}", chart.file_path, e);
                    failed += 1;
                }
            }
        }

        pb.set_message(format!("{} stored, {} failed", analyzed, failed));
    }

    pb.finish_with_message(format!("Done: {} analyzed, {} failed", analyzed, failed));

    Ok(BatchResult { analyzed, failed })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::song::NoteColor;

    /// A two-phrase chart whose second phrase ends at tick 576, with the
    /// activation-candidate chords supplied per scenario.
    fn scenario_chart(extra_drums: &str) -> String {
        format!(
            "[Song]\n{{\n  Resolution = 192\n}}\n\
             [SyncTrack]\n{{\n  0 = TS 4\n  0 = B 120000\n}}\n\
             [ExpertDrums]\n{{\n  0 = S 2 192\n  192 = N 1 0\n  384 = S 2 192\n{extra_drums}}}\n"
        )
    }

    fn best_activation_has_green(drums: &str) -> bool {
        let text = scenario_chart(drums);
        let record = analyze(
            text.as_bytes(),
            ChartFormat::Chart,
            &AnalyzeOptions::default(),
            Callbacks::default(),
        )
        .unwrap();
        record
            .best_path()
            .activation(0)
            .unwrap()
            .chord
            .has(NoteColor::Green)
    }

    #[test]
    fn test_control_activation_on_boundary() {
        assert!(best_activation_has_green(
            "  576 = N 4 0\n  700 = N 1 0\n  800 = N 1 0\n"
        ));
    }

    #[test]
    fn test_six_ticks_early_resolves() {
        assert!(best_activation_has_green(
            "  570 = N 4 0\n  700 = N 1 0\n  800 = N 1 0\n"
        ));
    }

    #[test]
    fn test_seven_ticks_early_does_not_resolve() {
        // The green chord at 569 is out of window; the red at 600 wins.
        assert!(!best_activation_has_green(
            "  569 = N 4 0\n  600 = N 1 0\n  700 = N 1 0\n"
        ));
    }

    #[test]
    fn test_eighty_nine_ticks_late_resolves() {
        assert!(best_activation_has_green("  665 = N 4 0\n  800 = N 1 0\n"));
    }

    #[test]
    fn test_ninety_ticks_late_does_not_resolve() {
        // The green chord at 666 is out of window; the red at 573 wins.
        assert!(!best_activation_has_green(
            "  573 = N 1 0\n  666 = N 4 0\n  800 = N 1 0\n"
        ));
    }

    #[test]
    fn test_equal_distance_tie_resolves_ahead() {
        assert!(best_activation_has_green(
            "  570 = N 1 0\n  582 = N 4 0\n  700 = N 1 0\n"
        ));
    }

    #[test]
    fn test_unresolved_phrase_fails() {
        let text = scenario_chart("  1000 = N 1 0\n");
        let err = analyze(
            text.as_bytes(),
            ChartFormat::Chart,
            &AnalyzeOptions::default(),
            Callbacks::default(),
        )
        .unwrap_err();
        assert!(matches!(err, AnalyzeError::Alignment(_)));
    }

    #[test]
    fn test_missing_difficulty_is_format_error() {
        let text = "[Song]\n{\n  Resolution = 192\n}\n[SyncTrack]\n{\n  0 = B 120000\n}\n";
        let err = analyze(
            text.as_bytes(),
            ChartFormat::Chart,
            &AnalyzeOptions::default(),
            Callbacks::default(),
        )
        .unwrap_err();
        assert!(matches!(err, AnalyzeError::Format(_)));
    }

    #[test]
    fn test_idempotence() {
        let text = scenario_chart("  576 = N 4 0\n  700 = N 1 0\n  800 = N 1 0\n");
        let options = AnalyzeOptions {
            objective: Objective {
                alternates: 4,
                ..Objective::default()
            },
            ..AnalyzeOptions::default()
        };
        let a = analyze(text.as_bytes(), ChartFormat::Chart, &options, Callbacks::default())
            .unwrap();
        let b = analyze(text.as_bytes(), ChartFormat::Chart, &options, Callbacks::default())
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_parse_callback_abort() {
        let text = scenario_chart("  576 = N 4 0\n");
        let mut on_parsed =
            |_: &Song| -> anyhow::Result<()> { anyhow::bail!("not this one") };
        let err = analyze(
            text.as_bytes(),
            ChartFormat::Chart,
            &AnalyzeOptions::default(),
            Callbacks {
                on_parsed: Some(&mut on_parsed),
                on_search_progress: None,
            },
        )
        .unwrap_err();
        assert!(matches!(err, AnalyzeError::Callback(_)));
    }

    #[test]
    fn test_chart_hash_is_stable_sha256() {
        assert_eq!(
            chart_hash(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(chart_hash(b"abc").len(), 64);
        assert_ne!(chart_hash(b"abc"), chart_hash(b"abd"));
    }

    #[test]
    fn test_format_equivalence() {
        // The same song in both formats produces the same Record.
        let chart_text = "[Song]\n{\n  Resolution = 192\n}\n\
             [SyncTrack]\n{\n  0 = TS 4\n  0 = B 120000\n}\n\
             [ExpertDrums]\n{\n  0 = S 2 192\n  192 = N 1 0\n  384 = S 2 192\n  576 = N 1 0\n  1000 = N 0 0\n}\n";

        // Hand-assembled SMF with identical content.
        fn vlq(mut value: u32) -> Vec<u8> {
            let mut buf = vec![(value & 0x7F) as u8];
            value >>= 7;
            while value > 0 {
                buf.push(((value & 0x7F) | 0x80) as u8);
                value >>= 7;
            }
            buf.reverse();
            buf
        }
        fn meta(delta: u32, kind: u8, data: &[u8]) -> Vec<u8> {
            let mut out = vlq(delta);
            out.extend_from_slice(&[0xFF, kind]);
            out.extend(vlq(data.len() as u32));
            out.extend_from_slice(data);
            out
        }
        fn on(delta: u32, key: u8) -> Vec<u8> {
            let mut out = vlq(delta);
            out.extend_from_slice(&[0x99, key, 96]);
            out
        }
        fn off(delta: u32, key: u8) -> Vec<u8> {
            let mut out = vlq(delta);
            out.extend_from_slice(&[0x89, key, 64]);
            out
        }
        fn track(chunks: &[Vec<u8>]) -> Vec<u8> {
            let mut body: Vec<u8> = chunks.concat();
            body.extend(meta(0, 0x2F, &[]));
            let mut out = b"MTrk".to_vec();
            out.extend_from_slice(&(body.len() as u32).to_be_bytes());
            out.extend(body);
            out
        }

        let tempo = track(&[
            meta(0, 0x58, &[4, 2, 24, 8]),
            meta(0, 0x51, &[0x07, 0xA1, 0x20]),
        ]);
        let drums = track(&[
            meta(0, 0x03, b"PART DRUMS"),
            on(0, 116),
            off(192, 116),
            on(0, 97),
            on(192, 116),
            off(192, 116),
            on(0, 97),
            on(424, 96),
        ]);
        let mut midi = b"MThd".to_vec();
        midi.extend_from_slice(&6u32.to_be_bytes());
        midi.extend_from_slice(&1u16.to_be_bytes());
        midi.extend_from_slice(&2u16.to_be_bytes());
        midi.extend_from_slice(&192u16.to_be_bytes());
        midi.extend(tempo);
        midi.extend(drums);

        let options = AnalyzeOptions::default();
        let from_chart = analyze(
            chart_text.as_bytes(),
            ChartFormat::Chart,
            &options,
            Callbacks::default(),
        )
        .unwrap();
        let from_midi =
            analyze(&midi, ChartFormat::Midi, &options, Callbacks::default()).unwrap();
        assert_eq!(from_chart, from_midi);
    }
}
