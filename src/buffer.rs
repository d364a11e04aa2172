//! Run-sized record buffer.

use std::io;
use std::io::prelude::*;

use rayon;

use crate::record::{Record, RECORD_WIDTH};

/// Number of records decoded per read. Bounds the raw bytes held next to the decoded records.
const DECODE_CHUNK_LEN: usize = 4096;

/// Buffer holding at most `limit` records, the in-memory part of an initial run.
///
/// Input bytes are decoded in chunks of [`DECODE_CHUNK_LEN`] records, so filling the buffer takes
/// `limit` records plus one chunk of memory.
pub struct RecordBuffer {
    limit: usize,
    inner: Vec<Record>,
    chunk: Vec<u8>,
}

/// Outcome of a [`RecordBuffer::fill`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fill {
    /// Number of records read into the buffer, zero at the end of the input.
    Records(usize),
    /// The input ended inside a record, the value is the offset of that record within the block.
    Partial(usize),
}

impl RecordBuffer {
    pub fn with_capacity(limit: usize) -> Self {
        RecordBuffer {
            limit,
            inner: Vec::with_capacity(limit),
            chunk: Vec::with_capacity(limit.min(DECODE_CHUNK_LEN) * RECORD_WIDTH),
        }
    }

    pub fn is_full(&self) -> bool {
        self.inner.len() >= self.limit
    }

    pub fn records(&self) -> &[Record] {
        &self.inner
    }

    /// Replaces the buffer content with the next block of at most `limit` records.
    pub fn fill<R: Read>(&mut self, reader: &mut R) -> io::Result<Fill> {
        self.inner.clear();

        while !self.is_full() {
            let chunk_len = (self.limit - self.inner.len()).min(DECODE_CHUNK_LEN) * RECORD_WIDTH;
            self.chunk.clear();
            reader.by_ref().take(chunk_len as u64).read_to_end(&mut self.chunk)?;

            Record::decode_slice(&self.chunk, &mut self.inner);
            if self.chunk.len() % RECORD_WIDTH != 0 {
                return Ok(Fill::Partial(self.inner.len() * RECORD_WIDTH));
            }
            if self.chunk.len() < chunk_len {
                break;
            }
        }

        return Ok(Fill::Records(self.inner.len()));
    }
}

impl rayon::slice::ParallelSliceMut<Record> for RecordBuffer {
    fn as_parallel_slice_mut(&mut self) -> &mut [Record] {
        self.inner.as_mut_slice()
    }
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use rayon::slice::ParallelSliceMut;

    use super::{Fill, RecordBuffer, DECODE_CHUNK_LEN};
    use crate::record::{Record, RECORD_WIDTH};

    fn encode(values: &[f64]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for value in values {
            Record(*value).write_to(&mut bytes).unwrap();
        }
        bytes
    }

    #[test]
    fn test_record_buffer() {
        let mut input = Cursor::new(encode(&[5.0, 3.0, 1.0, 4.0, 2.0]));
        let mut buffer = RecordBuffer::with_capacity(2);

        assert_eq!(buffer.fill(&mut input).unwrap(), Fill::Records(2));
        assert_eq!(buffer.is_full(), true);
        assert_eq!(buffer.fill(&mut input).unwrap(), Fill::Records(2));
        buffer.par_sort_unstable();
        assert_eq!(buffer.records(), &[Record(1.0), Record(4.0)]);

        assert_eq!(buffer.fill(&mut input).unwrap(), Fill::Records(1));
        assert_eq!(buffer.is_full(), false);
        assert_eq!(buffer.fill(&mut input).unwrap(), Fill::Records(0));
        assert!(buffer.records().is_empty());
    }

    #[test]
    fn test_partial_record() {
        let mut bytes = encode(&[1.0]);
        bytes.extend_from_slice(&[0u8; 3]);
        let mut input = Cursor::new(bytes);
        let mut buffer = RecordBuffer::with_capacity(4);

        assert_eq!(buffer.fill(&mut input).unwrap(), Fill::Partial(8));
    }

    #[test]
    fn test_multi_chunk_block() {
        let values = Vec::from_iter((0..DECODE_CHUNK_LEN * 2 + 10).map(|i| i as f64));
        let mut input = Cursor::new(encode(&values));
        let mut buffer = RecordBuffer::with_capacity(DECODE_CHUNK_LEN * 2 + 3);

        assert_eq!(buffer.fill(&mut input).unwrap(), Fill::Records(DECODE_CHUNK_LEN * 2 + 3));
        assert_eq!(buffer.records()[DECODE_CHUNK_LEN + 1], Record((DECODE_CHUNK_LEN + 1) as f64));
        assert_eq!(buffer.fill(&mut input).unwrap(), Fill::Records(7));
        assert_eq!(buffer.records()[0], Record((DECODE_CHUNK_LEN * 2 + 3) as f64));
        assert_eq!(buffer.fill(&mut input).unwrap(), Fill::Records(0));
    }

    #[test]
    fn test_partial_record_after_full_chunk() {
        let mut bytes = encode(&vec![1.0; DECODE_CHUNK_LEN + 2]);
        bytes.extend_from_slice(&[0u8; 5]);
        let mut input = Cursor::new(bytes);
        let mut buffer = RecordBuffer::with_capacity(DECODE_CHUNK_LEN * 4);

        assert_eq!(
            buffer.fill(&mut input).unwrap(),
            Fill::Partial((DECODE_CHUNK_LEN + 2) * RECORD_WIDTH)
        );
    }
}
