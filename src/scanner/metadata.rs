//! Display metadata from the chart folder's companion `song.ini`.

use std::collections::HashMap;
use std::path::Path;

/// Metadata extracted from song.ini. Missing fields fall back to literal
/// placeholder strings so catalog rows are always printable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SongMetadata {
    pub name: String,
    pub artist: String,
    pub charter: String,
}

impl Default for SongMetadata {
    fn default() -> Self {
        Self {
            name: "<unknown name>".into(),
            artist: "<unknown artist>".into(),
            charter: "<unknown charter>".into(),
        }
    }
}

/// Read song.ini metadata. Returns placeholders on any failure — a broken
/// ini never fails a scan.
pub fn read_song_ini(path: &Path) -> SongMetadata {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            log::debug!("Could not read {}: {}", path.display(), e);
            return SongMetadata::default();
        }
    };
    let text = match crate::decode::chart::decode_text(&bytes) {
        Ok(text) => text,
        Err(e) => {
            log::debug!("Could not decode {}: {}", path.display(), e);
            return SongMetadata::default();
        }
    };

    let fields = parse_song_section(&text);
    let mut meta = SongMetadata::default();
    if let Some(name) = fields.get("name") {
        meta.name = name.clone();
    }
    if let Some(artist) = fields.get("artist") {
        meta.artist = artist.clone();
    }
    if let Some(charter) = fields.get("charter") {
        meta.charter = charter.clone();
    }
    meta
}

/// song.ini has a single `[song]` section of key=value pairs. Keys are
/// matched case-insensitively; lines outside the section are ignored.
fn parse_song_section(text: &str) -> HashMap<String, String> {
    let mut fields = HashMap::new();
    let mut in_song = false;
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }
        if line.starts_with('[') {
            in_song = line.eq_ignore_ascii_case("[song]");
            continue;
        }
        if in_song {
            if let Some((key, value)) = line.split_once('=') {
                fields.insert(key.trim().to_lowercase(), value.trim().to_string());
            }
        }
    }
    fields
}
