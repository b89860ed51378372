//! Chart discovery and cataloging: the glue around the analyzer core.

pub mod metadata;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use thiserror::Error;
use walkdir::WalkDir;

use crate::analyze::chart_hash;
use crate::db::models::NewChart;
use crate::db::{queries, Database};
use crate::SUPPORTED_EXTENSIONS;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Database error: {0}")]
    Db(#[from] crate::db::DbError),
}

pub struct ScanResult {
    pub scanned: u64,
    pub new: u64,
    pub updated: u64,
    pub skipped: u64,
    pub errors: u64,
}

/// A chart folder: the chart file paired with its companion song.ini.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartFolder {
    pub chart: PathBuf,
    pub ini: PathBuf,
}

/// Walk the roots and group chart files with their song.ini by parent
/// folder. Folders missing either half are skipped; the first chart file
/// found wins when a folder carries several.
pub fn discover(roots: &[String]) -> Vec<ChartFolder> {
    let mut by_folder: HashMap<PathBuf, (Option<PathBuf>, Option<PathBuf>)> = HashMap::new();

    for root in roots {
        for entry in WalkDir::new(root)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let Some(parent) = path.parent() else {
                continue;
            };
            let file_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("")
                .to_lowercase();
            let ext = path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("")
                .to_lowercase();

            if file_name == "song.ini" {
                let slot = by_folder.entry(parent.to_path_buf()).or_default();
                slot.1.get_or_insert_with(|| path.to_path_buf());
            } else if SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
                let slot = by_folder.entry(parent.to_path_buf()).or_default();
                slot.0.get_or_insert_with(|| path.to_path_buf());
            }
        }
    }

    let mut folders: Vec<ChartFolder> = by_folder
        .into_values()
        .filter_map(|(chart, ini)| match (chart, ini) {
            (Some(chart), Some(ini)) => Some(ChartFolder { chart, ini }),
            (Some(chart), None) => {
                log::debug!("No song.ini next to {}, skipped", chart.display());
                None
            }
            _ => None,
        })
        .collect();
    folders.sort_by(|a, b| a.chart.cmp(&b.chart));
    folders
}

/// Scan directories for chart folders and insert/update them in the catalog.
pub fn scan(db: &Database, roots: &[String], force: bool) -> Result<ScanResult, ScanError> {
    let folders = discover(roots);

    let pb = ProgressBar::new(folders.len() as u64);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({per_sec}) ({eta}) {msg}",
        )
        .unwrap()
        .progress_chars("#>-"),
    );
    pb.set_message("Scanning...");

    let mut result = ScanResult {
        scanned: 0,
        new: 0,
        updated: 0,
        skipped: 0,
        errors: 0,
    };

    // Wrap all inserts in a single transaction for dramatic speedup
    let tx = db.conn.unchecked_transaction().map_err(crate::db::DbError::from)?;

    for folder in &folders {
        result.scanned += 1;

        match process_folder(&tx, folder, force) {
            Ok(FolderAction::New) => result.new += 1,
            Ok(FolderAction::Updated) => result.updated += 1,
            Ok(FolderAction::Skipped) => result.skipped += 1,
            Err(e) => {
                log::warn!("Error scanning {}: {}", folder.chart.display(), e);
                result.errors += 1;
            }
        }

        pb.inc(1);
    }

    tx.commit().map_err(crate::db::DbError::from)?;

    pb.finish_with_message(format!(
        "Done: {} new, {} updated, {} skipped, {} errors",
        result.new, result.updated, result.skipped, result.errors
    ));

    Ok(result)
}

enum FolderAction {
    New,
    Updated,
    Skipped,
}

fn process_folder(
    conn: &rusqlite::Connection,
    folder: &ChartFolder,
    force: bool,
) -> Result<FolderAction, ScanError> {
    let meta = std::fs::metadata(&folder.chart)?;
    let file_size = meta.len() as i64;
    let file_modified = format_mtime(&meta);
    let file_path = folder.chart.to_string_lossy().to_string();

    // Single query: does the chart exist, and is it unchanged?
    let existing: Option<(i64, String)> = conn
        .query_row(
            "SELECT file_size, file_modified FROM charts WHERE file_path = ?1",
            rusqlite::params![file_path],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .ok();

    let is_new = existing.is_none();

    if !force {
        if let Some((size, mtime)) = &existing {
            if *size == file_size && *mtime == file_modified {
                return Ok(FolderAction::Skipped);
            }
        }
    }

    let bytes = std::fs::read(&folder.chart)?;
    let tags = metadata::read_song_ini(&folder.ini);

    let new_chart = NewChart {
        hash: chart_hash(&bytes),
        file_path,
        folder: folder
            .chart
            .parent()
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_default(),
        format: folder
            .chart
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase(),
        file_size,
        file_modified,
        name: tags.name,
        artist: tags.artist,
        charter: tags.charter,
    };

    queries::upsert_chart_on(conn, &new_chart).map_err(crate::db::DbError::from)?;

    if is_new {
        Ok(FolderAction::New)
    } else {
        Ok(FolderAction::Updated)
    }
}

fn format_mtime(meta: &std::fs::Metadata) -> String {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs().to_string())
        .unwrap_or_default()
}
