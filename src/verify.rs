//! Sorted output verification.

use std::fs;
use std::io;
use std::path::Path;

use crate::record::{Record, RECORD_WIDTH};
use crate::sort::SortError;

/// Checks that a records file is in non-decreasing order.
///
/// Returns the index of the first record smaller than its predecessor, or [`None`] if the file is
/// sorted. The index counts records, the byte offset of that record is `index * RECORD_WIDTH`.
pub fn check_sorted(path: &Path) -> Result<Option<u64>, SortError> {
    let file = fs::File::open(path).map_err(SortError::io(path))?;
    let len = file.metadata().map_err(SortError::io(path))?.len();
    let partial = len % RECORD_WIDTH as u64;
    if partial != 0 {
        return Err(SortError::MalformedInput {
            path: path.to_path_buf(),
            len,
            offset: len - partial,
        });
    }

    let mut reader = io::BufReader::new(file);
    let mut prev: Option<Record> = None;
    let mut idx = 0u64;

    while let Some(record) = Record::read_from(&mut reader).map_err(SortError::io(path))? {
        if prev.map_or(false, |prev| record < prev) {
            return Ok(Some(idx));
        }
        prev = Some(record);
        idx += 1;
    }

    return Ok(None);
}
