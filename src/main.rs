use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use starpath::analyze::{self, AnalyzeOptions};
use starpath::record::Record;
use starpath::search::Objective;
use starpath::song::Difficulty;

#[derive(Parser)]
#[command(name = "starpath", version, about = "Rhythm-game chart star power path optimizer")]
struct Cli {
    /// Path to the SQLite database
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum DifficultyArg {
    Easy,
    Medium,
    Hard,
    Expert,
}

impl From<DifficultyArg> for Difficulty {
    fn from(value: DifficultyArg) -> Self {
        match value {
            DifficultyArg::Easy => Difficulty::Easy,
            DifficultyArg::Medium => Difficulty::Medium,
            DifficultyArg::Hard => Difficulty::Hard,
            DifficultyArg::Expert => Difficulty::Expert,
        }
    }
}

#[derive(clap::Args, Clone, Copy)]
struct ModeArgs {
    /// Difficulty track to analyze
    #[arg(short, long, value_enum, default_value = "expert")]
    difficulty: DifficultyArg,

    /// Ignore cymbal/tom markers (non-pro drums)
    #[arg(long)]
    no_pro: bool,

    /// Enable the 2x bass kick lane
    #[arg(long = "double-kick", alias = "2x")]
    double_kick: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan directories for chart folders and add them to the catalog
    Scan {
        /// Directories to scan (defaults to config file chart_dirs)
        paths: Vec<String>,

        /// Force re-scan even if files haven't changed
        #[arg(long)]
        force: bool,
    },

    /// Analyze a single chart file and print its optimal path
    Analyze {
        /// Path to a .chart or .mid file
        path: PathBuf,

        #[command(flatten)]
        mode: ModeArgs,

        /// Ranked alternate paths to print (overrides config)
        #[arg(short = 'n', long)]
        alternates: Option<usize>,
    },

    /// Analyze all cataloged charts and store their records
    Batch {
        /// Number of parallel workers (0 = auto-detect from config)
        #[arg(short = 'j', long, default_value = "0")]
        jobs: usize,

        /// Re-analyze charts that already have records
        #[arg(long)]
        force: bool,

        #[command(flatten)]
        mode: ModeArgs,
    },

    /// Show top cataloged charts ranked by optimal score
    Best {
        /// Filter by song name or artist (substring match)
        pattern: Option<String>,

        /// Number of results
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },

    /// Show catalog statistics
    Stats,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load config file (optional, defaults if missing)
    let config = starpath::config::AppConfig::load();

    // Resolve database path: CLI > config > XDG default
    let db_path = cli
        .db_path
        .or(config.db_path.clone())
        .unwrap_or_else(starpath::config::default_db_path);
    log::info!("Database: {}", db_path.display());

    let db = starpath::db::Database::open(&db_path).context("Failed to open database")?;

    match cli.command {
        Commands::Scan { paths, force } => {
            // Resolve scan paths: CLI args > config chart_dirs
            let scan_paths = if !paths.is_empty() {
                paths
            } else if !config.chart_dirs.is_empty() {
                config
                    .chart_dirs
                    .iter()
                    .map(|p| p.to_string_lossy().to_string())
                    .collect()
            } else {
                anyhow::bail!(
                    "No directories to scan. Pass paths as arguments or set chart_dirs in config."
                );
            };

            let result = starpath::scanner::scan(&db, &scan_paths, force).context("Scan failed")?;
            println!(
                "Scan complete: {} scanned, {} new, {} updated, {} skipped, {} errors",
                result.scanned, result.new, result.updated, result.skipped, result.errors
            );
        }

        Commands::Analyze {
            path,
            mode,
            alternates,
        } => {
            let options = analyze_options(&mode, alternates.unwrap_or(config.search.alternates), &config);
            let record = analyze::analyze_file(&path, &options)
                .with_context(|| format!("Failed to analyze {}", path.display()))?;

            println!("Chart: {}", path.display());
            println!("Mode:  {}", options.mode_label());
            println!();
            print_record(&record, &options);
        }

        Commands::Batch { jobs, force, mode } => {
            let workers = if jobs > 0 { jobs } else { config.resolve_workers() };
            let options = analyze_options(&mode, config.search.alternates, &config);
            let result = analyze::batch_analyze(&db, workers, force, &options)
                .context("Batch analysis failed")?;
            println!(
                "Batch complete: {} analyzed, {} failed",
                result.analyzed, result.failed
            );
        }

        Commands::Best { pattern, limit } => {
            let rows = db
                .query_best(pattern.as_deref(), limit)
                .context("Query failed")?;

            if rows.is_empty() {
                println!("No analyzed charts found. Run `starpath scan` and `starpath batch` first.");
                return Ok(());
            }

            println!(
                "{:<30} {:<20} {:<12} {:>10}  {}",
                "Song", "Artist", "Mode", "Score", "Path"
            );
            println!("{}", "-".repeat(90));
            for row in &rows {
                println!(
                    "{:<30} {:<20} {:<12} {:>10}  {}",
                    truncate(&row.name, 30),
                    truncate(&row.artist, 20),
                    row.mode,
                    row.total_score,
                    row.notation,
                );
            }
        }

        Commands::Stats => {
            let stats = db.stats().context("Failed to get stats")?;
            println!("Catalog Statistics");
            println!("==================");
            println!("Total charts:     {}", stats.total_charts);
            println!("Stored records:   {}", stats.analyzed_records);

            if !stats.formats.is_empty() {
                println!();
                println!("Formats:");
                for (format, count) in &stats.formats {
                    println!("  {:<8} {}", format, count);
                }
            }
        }
    }

    Ok(())
}

fn analyze_options(
    mode: &ModeArgs,
    alternates: usize,
    config: &starpath::config::AppConfig,
) -> AnalyzeOptions {
    AnalyzeOptions {
        difficulty: mode.difficulty.into(),
        pro_drums: !mode.no_pro,
        double_kick: mode.double_kick,
        objective: Objective {
            alternates,
            ..Objective::default()
        },
        limits: starpath::search::SearchLimits {
            max_meter_states: config.search.max_meter_states,
        },
        ..AnalyzeOptions::default()
    }
}

/// Print one record: score breakdown, best path, then alternates.
fn print_record(record: &Record, options: &AnalyzeOptions) {
    let best = record.best_path();

    println!("Optimal score: {}", record.optimal_score());
    println!("  Notes:      {}", record.base_score);
    println!("  Dynamics:   {}", record.dynamics_bonus);
    println!("  Solo bonus: {}", record.solo_bonus);
    println!("  Star power: {}", best.sp_score);
    println!();
    println!("Best path: {}", best.notation());

    if !best.activations().is_empty() {
        println!();
        println!(
            "{:>3} {:>8} {:<9} {:>5} {:>6} {:>8}",
            "#", "Tick", "Chord", "SP", "Skips", "Points"
        );
        for (i, act) in best.activations().iter().enumerate() {
            println!(
                "{:>3} {:>8} {:<9} {:>4}% {:>6} {:>8}",
                i,
                act.tick,
                act.chord.notation(),
                act.meter * 100 / options.graph.meter_quant,
                act.skips,
                act.score_contribution,
            );
        }
    }

    if !record.alternates().is_empty() {
        println!();
        println!("Alternates:");
        for (i, path) in record.alternates().iter().enumerate() {
            println!(
                "  {}. {} ({} points)",
                i + 2,
                path.notation(),
                path.total_score
            );
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() > max {
        format!("{}...", &s[..max.saturating_sub(3)])
    } else {
        s.to_string()
    }
}
