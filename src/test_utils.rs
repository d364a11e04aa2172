//! Helpers shared by unit tests.

use std::fs;
use std::path::Path;

use crate::record::Record;

pub fn write_records(path: &Path, values: &[f64]) {
    let mut bytes = Vec::with_capacity(values.len() * 8);
    for value in values {
        Record(*value).write_to(&mut bytes).unwrap();
    }
    fs::write(path, bytes).unwrap();
}

pub fn read_records(path: &Path) -> Vec<f64> {
    let bytes = fs::read(path).unwrap();
    let mut records = Vec::new();
    Record::decode_slice(&bytes, &mut records);
    records.into_iter().map(Record::value).collect()
}
