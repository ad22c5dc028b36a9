use std::path::{Path, PathBuf};

use encoding_rs::Encoding;
use log::debug;

use crate::{error::SourceError, io_utils};

// Header names are dropped; only their count matters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceTable {
    pub path: PathBuf,
    pub column_count: usize,
    pub rows: Vec<Vec<String>>,
}

impl SourceTable {
    pub fn new(path: impl Into<PathBuf>, column_count: usize, rows: Vec<Vec<String>>) -> Self {
        Self {
            path: path.into(),
            column_count,
            rows,
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column(&self, idx: usize) -> impl Iterator<Item = Option<&str>> + '_ {
        self.rows.iter().map(move |row| row.get(idx).map(String::as_str))
    }
}

pub fn read_source(
    path: &Path,
    delimiter: u8,
    encoding: &'static Encoding,
) -> Result<SourceTable, SourceError> {
    let mut reader = io_utils::open_csv_reader_from_path(path, delimiter)?;
    let column_count = reader
        .byte_headers()
        .map_err(|source| SourceError::Read {
            path: path.to_path_buf(),
            row: 1,
            source,
        })?
        .len();
    if column_count == 0 {
        return Err(SourceError::Empty {
            path: path.to_path_buf(),
        });
    }

    let mut rows = Vec::new();
    for (idx, record) in reader.byte_records().enumerate() {
        // Line 1 is the header.
        let row = idx + 2;
        let record = record.map_err(|source| SourceError::Read {
            path: path.to_path_buf(),
            row,
            source,
        })?;
        if record.len() > column_count {
            return Err(SourceError::RaggedRow {
                path: path.to_path_buf(),
                row,
                found: record.len(),
                expected: column_count,
            });
        }
        let decoded =
            io_utils::decode_record(&record, encoding).ok_or_else(|| SourceError::Decode {
                path: path.to_path_buf(),
                row,
                encoding: encoding.name(),
            })?;
        rows.push(decoded);
    }
    debug!(
        "Read {} row(s) across {} column(s) from {:?}",
        rows.len(),
        column_count,
        path
    );
    Ok(SourceTable::new(path, column_count, rows))
}
