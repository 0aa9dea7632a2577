//! Synchronous CSV reader with iterator interface
//!
//! Streams replay operations from a CSV file one row at a time, delegating
//! format concerns to the csv_format module.
//!
//! # Error Handling
//!
//! - Fatal errors (file not found, I/O errors) are returned from `new()`
//! - Individual row errors are yielded as `Err` items carrying the line number,
//!   so the caller can log them and carry on

use std::fs::File;
use std::io::ErrorKind as IoErrorKind;
use std::path::Path;

use csv::{ReaderBuilder, Trim};

use crate::io::csv_format::{convert_csv_record, CsvRecord};
use crate::types::{LedgerError, ReplayOperation};

/// Open a replay input, mapping a missing file to `FileNotFound`
pub(crate) fn open_input(path: &Path) -> Result<File, LedgerError> {
    File::open(path).map_err(|e| match e.kind() {
        IoErrorKind::NotFound => LedgerError::FileNotFound {
            path: path.display().to_string(),
        },
        _ => LedgerError::IoError {
            message: format!("Failed to open file '{}': {}", path.display(), e),
        },
    })
}

/// Iterator over the operations of a replay CSV
#[derive(Debug)]
pub struct SyncReader {
    reader: csv::Reader<File>,
    line_num: u64,
}

impl SyncReader {
    pub fn new(path: &Path) -> Result<Self, LedgerError> {
        let file = open_input(path)?;

        let reader = ReaderBuilder::new()
            .trim(Trim::All)
            .flexible(true)
            .buffer_capacity(8 * 1024)
            .from_reader(file);

        // Line 1 is the header
        Ok(Self {
            reader,
            line_num: 1,
        })
    }
}

impl Iterator for SyncReader {
    type Item = Result<ReplayOperation, LedgerError>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut deserializer = self.reader.deserialize::<CsvRecord>();
        let next = deserializer.next()?;
        self.line_num += 1;

        let line = self.line_num;
        Some(
            next.map_err(LedgerError::from)
                .and_then(convert_csv_record)
                .map_err(|e| match e {
                    LedgerError::ParseError { message, .. } => LedgerError::ParseError {
                        line: Some(line),
                        message,
                    },
                    other => other,
                }),
        )
    }
}
