//! Keyword lookup over facility CSV files, without touching the store.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::warn;

use crate::aggregate::{COL_ADDRESS, COL_ID, COL_NAME, COL_PREFECTURE};
use crate::csv_source::CsvSource;
use crate::normalize::StringNormalization;

const NORMALIZATION: StringNormalization = StringNormalization::Trim;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchHit {
    pub file: PathBuf,
    /// 1-based data row, header excluded.
    pub row: usize,
    pub id: String,
    pub name: String,
    pub address: String,
    pub prefecture: String,
}

#[derive(Debug, Default)]
pub struct SearchReport {
    pub hits: Vec<SearchHit>,
    pub missing: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

/// Substring match on the formal name, or on the ID when a row has no name.
pub fn search_file(path: &Path, keyword: &str) -> Result<Vec<SearchHit>, csv::Error> {
    let source = CsvSource::open(path, NORMALIZATION)?;
    let mut hits = Vec::new();

    for (i, row) in source.rows().enumerate() {
        let row = row?;
        let field = |column| NORMALIZATION.apply_opt(row.get(column));
        let id = field(COL_ID).unwrap_or_default();
        let name = field(COL_NAME).unwrap_or_else(|| id.clone());

        if name.contains(keyword) {
            hits.push(SearchHit {
                file: path.to_path_buf(),
                row: i + 1,
                id,
                name,
                address: field(COL_ADDRESS).unwrap_or_default(),
                prefecture: field(COL_PREFECTURE).unwrap_or_default(),
            });
        }
    }
    Ok(hits)
}

/// Missing files are listed and skipped; a file that fails mid-read keeps
/// no hits and is listed with its error.
pub fn search_files(paths: &[PathBuf], keyword: &str) -> SearchReport {
    let mut report = SearchReport::default();
    for path in paths {
        if !path.exists() {
            warn!(file = %path.display(), "search file not found");
            report.missing.push(path.clone());
            continue;
        }
        match search_file(path, keyword) {
            Ok(hits) => report.hits.extend(hits),
            Err(e) => {
                warn!(file = %path.display(), error = %e, "search file unreadable");
                report.failed.push((path.clone(), e.to_string()));
            }
        }
    }
    report
}
