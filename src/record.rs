//! Fixed-width record type and its on-disk codec.

use std::cmp::Ordering;
use std::io;
use std::io::prelude::*;

use byteorder::{ByteOrder, NativeEndian, ReadBytesExt, WriteBytesExt};

/// Record width in bytes.
pub const RECORD_WIDTH: usize = 8;

/// A single sortable value: an IEEE-754 double stored in native byte order.
///
/// Records are totally ordered: every `NaN` sorts after all other values (including `+inf`),
/// `-0.0` sorts before `+0.0` and negative `NaN`s sort before positive ones.
#[derive(Debug, Clone, Copy)]
pub struct Record(pub f64);

impl Record {
    pub fn value(self) -> f64 {
        self.0
    }

    /// Reads one record. Returns `Ok(None)` at the end of the stream.
    /// Callers validate the stream length, so a partial trailing record is never expected here.
    pub fn read_from<R: Read>(reader: &mut R) -> io::Result<Option<Record>> {
        match reader.read_f64::<NativeEndian>() {
            Ok(value) => Ok(Some(Record(value))),
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub fn write_to<W: Write>(self, writer: &mut W) -> io::Result<()> {
        writer.write_f64::<NativeEndian>(self.0)
    }

    /// Appends the records encoded in `bytes` to `records`. A trailing partial record is skipped.
    pub fn decode_slice(bytes: &[u8], records: &mut Vec<Record>) {
        records.extend(
            bytes
                .chunks_exact(RECORD_WIDTH)
                .map(|chunk| Record(NativeEndian::read_f64(chunk))),
        );
    }
}

impl Ord for Record {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.0.is_nan(), other.0.is_nan()) {
            (false, false) => self.0.total_cmp(&other.0),
            (false, true) => Ordering::Less,
            (true, false) => Ordering::Greater,
            (true, true) => self.0.total_cmp(&other.0),
        }
    }
}

impl PartialOrd for Record {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Record {}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use rstest::*;

    use super::Record;

    #[rstest]
    #[case(1.0, 2.0)]
    #[case(-1.0, 1.0)]
    #[case(-0.0, 0.0)]
    #[case(f64::NEG_INFINITY, f64::MIN)]
    #[case(f64::INFINITY, f64::NAN)]
    #[case(-f64::NAN, f64::NAN)]
    #[case(1.0e300, -f64::NAN)]
    fn test_record_order(#[case] smaller: f64, #[case] larger: f64) {
        assert!(Record(smaller) < Record(larger));
        assert!(Record(larger) > Record(smaller));
    }

    #[test]
    fn test_nan_sorts_last() {
        let mut records = vec![Record(f64::NAN), Record(3.0), Record(f64::INFINITY), Record(-7.5)];
        records.sort();

        assert_eq!(records[0].value(), -7.5);
        assert_eq!(records[1].value(), 3.0);
        assert_eq!(records[2].value(), f64::INFINITY);
        assert!(records[3].value().is_nan());
    }

    #[test]
    fn test_record_codec() {
        let mut buf = Vec::new();
        Record(1.5).write_to(&mut buf).unwrap();
        Record(-2.25).write_to(&mut buf).unwrap();

        let mut decoded = Vec::new();
        Record::decode_slice(&buf, &mut decoded);
        assert_eq!(decoded, vec![Record(1.5), Record(-2.25)]);

        // a trailing partial record is not decoded
        Record::decode_slice(&buf[..12], &mut decoded);
        assert_eq!(decoded, vec![Record(1.5), Record(-2.25), Record(1.5)]);

        let mut reader = Cursor::new(buf);
        assert_eq!(Record::read_from(&mut reader).unwrap(), Some(Record(1.5)));
        assert_eq!(Record::read_from(&mut reader).unwrap(), Some(Record(-2.25)));
        assert_eq!(Record::read_from(&mut reader).unwrap(), None);
    }
}
