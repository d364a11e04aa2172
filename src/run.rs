//! Sorted runs stored on the file system.

use std::fs;
use std::io;
use std::io::prelude::*;
use std::path::{Path, PathBuf};

use crate::record::{Record, RECORD_WIDTH};
use crate::sort::SortError;

/// Default run file read/write buffer size.
pub const DEFAULT_RW_BUF_SIZE: usize = 64 * 1024;

/// Handle of a complete run file: a non-decreasing sequence of records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Run {
    path: PathBuf,
    len: u64,
}

impl Run {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of records in the run.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Opens the run for sequential reading.
    pub fn open(&self, buf_size: usize) -> Result<RunReader, SortError> {
        let file = fs::File::open(&self.path).map_err(SortError::io(&self.path))?;
        let reader = io::BufReader::with_capacity(buf_size, file);

        return Ok(RunReader {
            path: self.path.clone(),
            reader: reader.take(self.len * RECORD_WIDTH as u64),
            consumed: 0,
        });
    }

    /// Deletes the run file.
    pub fn remove(&self) -> io::Result<()> {
        fs::remove_file(&self.path)
    }
}

/// Run writer. Records are written to a `.part` file which is renamed to the run path by
/// [`RunWriter::finish`], so a run path never refers to a partially written run.
pub struct RunWriter {
    path: PathBuf,
    part_path: PathBuf,
    writer: io::BufWriter<fs::File>,
    len: u64,
}

impl RunWriter {
    pub fn create(path: impl Into<PathBuf>, buf_size: usize) -> io::Result<Self> {
        let path = path.into();
        let part_path = path.with_extension("part");
        let file = fs::File::create(&part_path)?;

        return Ok(RunWriter {
            path,
            part_path,
            writer: io::BufWriter::with_capacity(buf_size, file),
            len: 0,
        });
    }

    pub fn write(&mut self, record: Record) -> io::Result<()> {
        record.write_to(&mut self.writer)?;
        self.len += 1;
        return Ok(());
    }

    pub fn write_all(&mut self, records: impl IntoIterator<Item = Record>) -> io::Result<()> {
        for record in records.into_iter() {
            self.write(record)?;
        }
        return Ok(());
    }

    /// Flushes the written data and publishes the run under its final path.
    pub fn finish(self) -> io::Result<Run> {
        let file = self.writer.into_inner().map_err(|err| err.into_error())?;
        drop(file);
        fs::rename(&self.part_path, &self.path)?;

        return Ok(Run {
            path: self.path,
            len: self.len,
        });
    }
}

/// Sequential run reader.
pub struct RunReader {
    path: PathBuf,
    reader: io::Take<io::BufReader<fs::File>>,
    consumed: u64,
}

impl RunReader {
    /// Number of records read so far.
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Returns up to `limit` upcoming records without consuming them.
    pub fn peek(&mut self, limit: usize) -> Result<Vec<Record>, SortError> {
        let remaining = self.reader.limit() / RECORD_WIDTH as u64;
        let count = usize::try_from(remaining).unwrap_or(usize::MAX).min(limit);

        let reader = self.reader.get_mut();
        let position = reader.stream_position().map_err(SortError::io(&self.path))?;

        let mut records = Vec::with_capacity(count);
        for _ in 0..count {
            match Record::read_from(reader).map_err(SortError::io(&self.path))? {
                Some(record) => records.push(record),
                None => break,
            }
        }
        reader
            .seek(io::SeekFrom::Start(position))
            .map_err(SortError::io(&self.path))?;

        return Ok(records);
    }
}

impl Iterator for RunReader {
    type Item = Result<Record, SortError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.reader.limit() == 0 {
            return None;
        }
        let result = match Record::read_from(&mut self.reader) {
            Ok(Some(record)) => {
                self.consumed += 1;
                return Some(Ok(record));
            }
            Ok(None) => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "run file is shorter than expected",
            )),
            Err(err) => Err(err),
        };

        Some(result.map_err(SortError::io(&self.path)))
    }
}
