//! Single-pass CSV row producer with normalized header lookup.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use csv::StringRecord;

use crate::normalize::StringNormalization;

/// Normalized header name -> column index. The first occurrence of a name wins.
#[derive(Debug, Default)]
pub struct HeaderIndex(HashMap<String, usize>);

impl HeaderIndex {
    fn build(headers: &StringRecord, normalization: StringNormalization) -> Self {
        let mut index = HashMap::with_capacity(headers.len());
        for (i, header) in headers.iter().enumerate() {
            index.entry(normalization.header(header)).or_insert(i);
        }
        Self(index)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.0.contains_key(column)
    }
}

/// One data row. Fields are raw; callers normalize what they read.
#[derive(Debug, Clone)]
pub struct CsvRow {
    headers: Arc<HeaderIndex>,
    record: StringRecord,
}

impl CsvRow {
    pub fn get(&self, column: &str) -> Option<&str> {
        self.headers.0.get(column).and_then(|&i| self.record.get(i))
    }
}

pub struct CsvSource<R: Read> {
    reader: csv::Reader<R>,
    headers: Arc<HeaderIndex>,
}

impl CsvSource<File> {
    pub fn open(path: &Path, normalization: StringNormalization) -> Result<Self, csv::Error> {
        let file = File::open(path)?;
        Self::new(file, normalization)
    }
}

impl<R: Read> CsvSource<R> {
    /// Reads the header row eagerly; data rows are pulled one at a time.
    pub fn new(input: R, normalization: StringNormalization) -> Result<Self, csv::Error> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(input);
        let headers = HeaderIndex::build(reader.headers()?, normalization);
        Ok(Self {
            reader,
            headers: Arc::new(headers),
        })
    }

    pub fn headers(&self) -> &HeaderIndex {
        &self.headers
    }

    /// Finite, non-restartable sequence of rows. A malformed row is an error
    /// item; callers stop on the first one.
    pub fn rows(self) -> Rows<R> {
        Rows {
            records: self.reader.into_records(),
            headers: self.headers,
        }
    }
}

pub struct Rows<R: Read> {
    records: csv::StringRecordsIntoIter<R>,
    headers: Arc<HeaderIndex>,
}

impl<R: Read> Iterator for Rows<R> {
    type Item = Result<CsvRow, csv::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = self.records.next()?;
        Some(record.map(|record| CsvRow {
            headers: Arc::clone(&self.headers),
            record,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_are_normalized_for_lookup() {
        let data = "\u{feff}ID,\" 正式名称 \",所在地\n0001,Test Clinic,1 Main St\n";
        let source = CsvSource::new(data.as_bytes(), StringNormalization::Trim).unwrap();
        assert!(source.headers().contains("ID"));
        assert!(source.headers().contains("正式名称"));

        let rows: Vec<_> = source.rows().collect::<Result<_, _>>().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("ID"), Some("0001"));
        assert_eq!(rows[0].get("正式名称"), Some("Test Clinic"));
        assert_eq!(rows[0].get("missing"), None);
    }

    #[test]
    fn test_short_rows_are_tolerated() {
        let data = "ID,name,address\n0001,A\n";
        let source = CsvSource::new(data.as_bytes(), StringNormalization::Trim).unwrap();
        let rows: Vec<_> = source.rows().collect::<Result<_, _>>().unwrap();
        assert_eq!(rows[0].get("name"), Some("A"));
        assert_eq!(rows[0].get("address"), None);
    }

    #[test]
    fn test_invalid_utf8_row_is_an_error() {
        let mut data = b"ID,name\n".to_vec();
        data.extend_from_slice(&[0xff, 0xfe, b',', b'x', b'\n']);
        let source = CsvSource::new(data.as_slice(), StringNormalization::Trim).unwrap();
        let first = source.rows().next().unwrap();
        assert!(first.is_err());
    }

    #[test]
    fn test_open_missing_file_fails() {
        let result = CsvSource::open(Path::new("/nonexistent/file.csv"), StringNormalization::Trim);
        assert!(result.is_err());
    }
}
