/// Data for inserting or updating a chart (scan phase).
pub struct NewChart {
    pub hash: String,
    pub file_path: String,
    pub folder: String,
    pub format: String,
    pub file_size: i64,
    pub file_modified: String,

    pub name: String,
    pub artist: String,
    pub charter: String,
}

/// A chart row read from the database.
#[derive(Debug, Clone)]
pub struct ChartRow {
    pub id: i64,
    pub hash: String,
    pub file_path: String,
    pub name: String,
    pub artist: String,
}

/// A record summary row for ranking queries.
#[derive(Debug, Clone)]
pub struct BestRow {
    pub name: String,
    pub artist: String,
    pub mode: String,
    pub total_score: i64,
    pub notation: String,
}

/// Library-wide counters for the stats command.
#[derive(Debug, Default)]
pub struct LibraryStats {
    pub total_charts: i64,
    pub analyzed_records: i64,
    pub formats: Vec<(String, i64)>,
}
