use rusqlite::params;

use super::models::{BestRow, ChartRow, LibraryStats, NewChart};
use super::{Database, Result};
use crate::record::Record;

/// Upsert a chart on any connection, so the scanner can batch inserts
/// inside one transaction.
pub(crate) fn upsert_chart_on(conn: &rusqlite::Connection, c: &NewChart) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO charts (
            hash, file_path, folder, format, file_size, file_modified,
            name, artist, charter, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, datetime('now'))
        ON CONFLICT(file_path) DO UPDATE SET
            hash = excluded.hash,
            folder = excluded.folder,
            format = excluded.format,
            file_size = excluded.file_size,
            file_modified = excluded.file_modified,
            name = excluded.name,
            artist = excluded.artist,
            charter = excluded.charter,
            updated_at = datetime('now')
        ",
        params![
            c.hash, c.file_path, c.folder, c.format, c.file_size, c.file_modified,
            c.name, c.artist, c.charter,
        ],
    )?;
    Ok(())
}

impl Database {
    /// Insert or update a chart. Returns the chart id.
    pub fn upsert_chart(&self, c: &NewChart) -> Result<i64> {
        upsert_chart_on(&self.conn, c)?;

        let id: i64 = self.conn.query_row(
            "SELECT id FROM charts WHERE file_path = ?1",
            params![c.file_path],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Size and mtime of a cataloged chart, for unchanged-file skipping.
    pub fn chart_file_state(&self, file_path: &str) -> Result<Option<(i64, String)>> {
        let state = self
            .conn
            .query_row(
                "SELECT file_size, file_modified FROM charts WHERE file_path = ?1",
                params![file_path],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .ok();
        Ok(state)
    }

    /// Charts with no record yet for the given mode.
    pub fn get_unanalyzed_charts(&self, mode: &str) -> Result<Vec<ChartRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT c.id, c.hash, c.file_path, c.name, c.artist
             FROM charts c
             LEFT JOIN records r ON r.chart_hash = c.hash AND r.mode = ?1
             WHERE r.id IS NULL
             ORDER BY c.id",
        )?;

        let charts = stmt
            .query_map(params![mode], |row| {
                Ok(ChartRow {
                    id: row.get(0)?,
                    hash: row.get(1)?,
                    file_path: row.get(2)?,
                    name: row.get(3)?,
                    artist: row.get(4)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(charts)
    }

    /// Get all charts (for --force re-analysis).
    pub fn get_all_charts(&self) -> Result<Vec<ChartRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, hash, file_path, name, artist FROM charts ORDER BY id",
        )?;

        let charts = stmt
            .query_map([], |row| {
                Ok(ChartRow {
                    id: row.get(0)?,
                    hash: row.get(1)?,
                    file_path: row.get(2)?,
                    name: row.get(3)?,
                    artist: row.get(4)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(charts)
    }

    /// Store a Record for one chart content and decode mode.
    pub fn store_record(&self, chart_hash: &str, mode: &str, record: &Record) -> Result<()> {
        let json = serde_json::to_string(record)?;
        self.conn.execute(
            "INSERT INTO records (
                chart_hash, mode, total_score, notation, record_json, version, analyzed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, datetime('now'))
            ON CONFLICT(chart_hash, mode) DO UPDATE SET
                total_score = excluded.total_score,
                notation = excluded.notation,
                record_json = excluded.record_json,
                version = excluded.version,
                analyzed_at = datetime('now')
            ",
            params![
                chart_hash,
                mode,
                record.optimal_score() as i64,
                record.best_path().notation(),
                json,
                record.version,
            ],
        )?;
        Ok(())
    }

    /// Load a stored Record back, if one exists for this chart and mode.
    pub fn get_record(&self, chart_hash: &str, mode: &str) -> Result<Option<Record>> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT record_json FROM records WHERE chart_hash = ?1 AND mode = ?2",
                params![chart_hash, mode],
                |row| row.get(0),
            )
            .ok();
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Top analyzed charts by optimal score, optionally filtered by a
    /// name/artist substring.
    pub fn query_best(&self, pattern: Option<&str>, limit: usize) -> Result<Vec<BestRow>> {
        let like = pattern
            .map(|p| format!("%{}%", p.to_lowercase()))
            .unwrap_or_else(|| "%".into());
        let mut stmt = self.conn.prepare(
            "SELECT c.name, c.artist, r.mode, r.total_score, r.notation
             FROM records r
             JOIN charts c ON c.hash = r.chart_hash
             WHERE lower(c.name) LIKE ?1 OR lower(c.artist) LIKE ?1
             GROUP BY r.chart_hash, r.mode
             ORDER BY r.total_score DESC
             LIMIT ?2",
        )?;

        let rows = stmt
            .query_map(params![like, limit as i64], |row| {
                Ok(BestRow {
                    name: row.get(0)?,
                    artist: row.get(1)?,
                    mode: row.get(2)?,
                    total_score: row.get(3)?,
                    notation: row.get(4)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    pub fn stats(&self) -> Result<LibraryStats> {
        let total_charts: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM charts", [], |row| row.get(0))?;
        let analyzed_records: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;

        let mut stmt = self.conn.prepare(
            "SELECT format, COUNT(*) FROM charts GROUP BY format ORDER BY COUNT(*) DESC",
        )?;
        let formats = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(LibraryStats {
            total_charts,
            analyzed_records,
            formats,
        })
    }
}
