//! `ext-merge-sort` is an external merge sort for flat binary files of `f64` records.
//!
//! External sorting is a class of sorting algorithms that can handle massive amounts of data. External sorting
//! is required when the data being sorted do not fit into the main memory (RAM) of a computer and instead must be
//! resided in slower external memory, usually a hard disk drive. The input is split into memory-sized chunks
//! which are sorted and saved as runs, then the runs are merged in passes, at most `fan-in` runs at a time,
//! until a single sorted run remains. For more information see
//! [External Sorting](https://en.wikipedia.org/wiki/External_sorting).
//!
//! # Overview
//!
//! * **File format:**
//!   input and output files are a raw concatenation of 8-byte IEEE-754 doubles in native byte order.
//!   Inputs whose length is not a multiple of 8 bytes are rejected.
//! * **Total order:**
//!   `NaN`s sort after every other value, `-0.0` before `+0.0`. Equal values keep their input order.
//! * **Auto-tuning:**
//!   run size and merge fan-in are derived from the input size and a memory budget unless set explicitly.
//!   The default budget is half of the available system memory, the [`Tuner`] can be replaced.
//! * **Multithreading support:**
//!   chunks are sorted in multiple threads.
//! * **Diagnostics:**
//!   progress events are streamed to a [`SortObserver`].
//! * **Cancellation:**
//!   a running sort can be cancelled through a [`CancelToken`].
//!
//! The destination file is only replaced once the sort succeeds, temporary data is removed on every exit path.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use ext_merge_sort::{ExternalSorter, ExternalSorterBuilder};
//!
//! fn main() {
//!     let sorter: ExternalSorter = ExternalSorterBuilder::new()
//!         .with_tmp_dir(Path::new("./"))
//!         .with_memory_limit(50 * 1024 * 1024)
//!         .build()
//!         .unwrap();
//!
//!     let stats = sorter.sort(Path::new("input.bin"), Path::new("output.bin")).unwrap();
//!     println!("sorted {} records in {} passes", stats.records, stats.passes);
//! }
//! ```

pub mod buffer;
pub mod cancel;
pub mod event;
pub mod finalize;
pub mod generator;
pub mod merger;
pub mod record;
pub mod run;
pub mod scheduler;
pub mod sort;
pub mod tune;
pub mod verify;

#[cfg(test)]
mod test_utils;

pub use buffer::RecordBuffer;
pub use cancel::CancelToken;
pub use event::{JsonLinesObserver, LogObserver, NoopObserver, SortEvent, SortObserver};
pub use merger::BinaryHeapMerger;
pub use record::{Record, RECORD_WIDTH};
pub use run::{Run, RunReader, RunWriter};
pub use sort::{sort, ExternalSorter, ExternalSorterBuilder, SortContext, SortError, SortStats};
pub use tune::{AutoTuner, SortParams, Tuner};
pub use verify::check_sorted;
