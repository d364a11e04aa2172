//! Sort diagnostics side-channel.
//!
//! The sorter reports its progress as a stream of [`SortEvent`]s delivered to a [`SortObserver`].
//! Observers are passive: they can not influence the sort result and nothing is accumulated on
//! the sorter side, so memory usage does not depend on the number of events.

use std::io;
use std::io::prelude::*;
use std::sync::mpsc;

use serde::Serialize;

use crate::record::Record;
use crate::tune::SortParams;

/// Maximum number of values carried by a block sample.
pub const SAMPLE_LIMIT: usize = 18;
/// Maximum number of entries carried by a heap snapshot.
pub const HEAP_SNAPSHOT_LIMIT: usize = 20;
/// Number of upcoming records of every merge input reported when a merge starts.
pub const LOOKAHEAD_LIMIT: usize = 8;
/// Number of output records previewed by the [`SortEvent::Finished`] event.
pub const PREVIEW_LIMIT: usize = 120;

/// Heap entry as reported to observers: `(value, source index)`.
pub type HeapEntry = (f64, usize);

/// Sort progress event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SortEvent {
    /// Sort parameters were chosen.
    ParamsChosen {
        run_size: usize,
        fan_in: usize,
        input_size: u64,
    },
    /// Run generation finished.
    Meta {
        run_size: usize,
        fan_in: usize,
        runs_count: usize,
    },
    /// A block was read from the input.
    ReadBlock {
        run_index: usize,
        sample: Vec<f64>,
        count: usize,
    },
    /// A block was sorted and saved as an initial run.
    SortBlock {
        run_index: usize,
        sorted_sample: Vec<f64>,
        count: usize,
    },
    /// A merge pass is about to start.
    PassInfo {
        pass_id: usize,
        runs_before: usize,
        fan_in: usize,
    },
    /// A group of runs is about to be merged.
    ///
    /// `input_buffers` holds the records following the heap head of every input.
    MergeStart {
        pass_id: usize,
        group_id: usize,
        inputs: Vec<String>,
        input_buffers: Vec<Vec<f64>>,
        initial_heap: Vec<HeapEntry>,
    },
    /// A record entered the merge heap, `heap_snapshot` is the heap after the push.
    HeapPush {
        pass_id: usize,
        group_id: usize,
        value: f64,
        src: usize,
        heap_snapshot: Vec<HeapEntry>,
    },
    /// The smallest record left the merge heap, `heap_snapshot` is the heap after the pop.
    HeapPop {
        pass_id: usize,
        group_id: usize,
        value: f64,
        src: usize,
        heap_snapshot: Vec<HeapEntry>,
    },
    OutputEmit {
        pass_id: usize,
        group_id: usize,
        value: f64,
        emitted_count: u64,
    },
    /// A merge source advanced, `consumed` records of it are read so far.
    InputBufferUpdate {
        pass_id: usize,
        group_id: usize,
        src: usize,
        consumed: u64,
        exhausted: bool,
    },
    MergeEnd {
        pass_id: usize,
        group_id: usize,
        merged_count: u64,
    },
    /// The sort completed.
    Finished {
        records: u64,
        passes: usize,
        final_preview: Vec<f64>,
    },
}

impl SortEvent {
    pub fn params_chosen(params: &SortParams, input_size: u64) -> Self {
        SortEvent::ParamsChosen {
            run_size: params.run_size,
            fan_in: params.fan_in,
            input_size,
        }
    }
}

/// Sort event observer.
pub trait SortObserver {
    /// Handles a single event.
    fn on_event(&mut self, event: SortEvent);

    /// Whether per-record merge events (heap pushes and pops, emitted records, input buffer
    /// updates) should be produced. Returning `false` keeps the merge loop free of event
    /// construction.
    fn wants_record_events(&self) -> bool {
        true
    }
}

/// Observer discarding all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SortObserver for NoopObserver {
    fn on_event(&mut self, _event: SortEvent) {}

    fn wants_record_events(&self) -> bool {
        false
    }
}

impl<F> SortObserver for F
where
    F: FnMut(SortEvent),
{
    fn on_event(&mut self, event: SortEvent) {
        self(event)
    }
}

/// Bounded channel observer. Blocks while the channel is full, a disconnected receiver is ignored.
impl SortObserver for mpsc::SyncSender<SortEvent> {
    fn on_event(&mut self, event: SortEvent) {
        let _ = self.send(event);
    }
}

/// Observer forwarding events to the `log` facade at trace level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl SortObserver for LogObserver {
    fn on_event(&mut self, event: SortEvent) {
        log::trace!("{:?}", event);
    }

    fn wants_record_events(&self) -> bool {
        log::log_enabled!(log::Level::Trace)
    }
}

/// Observer writing every event as a single JSON line.
///
/// Write errors do not abort the sort; the first one is kept and can be inspected with
/// [`JsonLinesObserver::into_inner`].
pub struct JsonLinesObserver<W: Write> {
    writer: W,
    record_events: bool,
    error: Option<io::Error>,
}

impl<W: Write> JsonLinesObserver<W> {
    pub fn new(writer: W, record_events: bool) -> Self {
        JsonLinesObserver {
            writer,
            record_events,
            error: None,
        }
    }

    /// Flushes the writer and returns it together with the first write error, if any.
    pub fn into_inner(mut self) -> Result<W, io::Error> {
        if let Some(err) = self.error.take() {
            return Err(err);
        }
        self.writer.flush()?;
        return Ok(self.writer);
    }

    fn write_event(&mut self, event: &SortEvent) -> io::Result<()> {
        serde_json::to_writer(&mut self.writer, event)?;
        self.writer.write_all(b"\n")
    }
}

impl<W: Write> SortObserver for JsonLinesObserver<W> {
    fn on_event(&mut self, event: SortEvent) {
        if self.error.is_some() {
            return;
        }
        if let Err(err) = self.write_event(&event) {
            log::warn!("event stream write failed: {}", err);
            self.error = Some(err);
        }
    }

    fn wants_record_events(&self) -> bool {
        self.record_events
    }
}

pub(crate) fn sample(values: impl IntoIterator<Item = f64>) -> Vec<f64> {
    values.into_iter().take(SAMPLE_LIMIT).collect()
}

/// Sorts heap entries and keeps the [`HEAP_SNAPSHOT_LIMIT`] smallest.
pub(crate) fn heap_snapshot(entries: impl IntoIterator<Item = (Record, usize)>) -> Vec<HeapEntry> {
    let mut entries = Vec::from_iter(entries);
    entries.sort();
    entries.truncate(HEAP_SNAPSHOT_LIMIT);

    entries.into_iter().map(|(record, src)| (record.value(), src)).collect()
}

#[cfg(test)]
mod test {
    use std::sync::mpsc;

    use super::{heap_snapshot, sample, JsonLinesObserver, SortEvent, SortObserver, HEAP_SNAPSHOT_LIMIT, SAMPLE_LIMIT};
    use crate::record::Record;

    #[test]
    fn test_sample_truncation() {
        let values = sample((0..100).map(|i| i as f64));
        assert_eq!(values.len(), SAMPLE_LIMIT);
        assert_eq!(values[SAMPLE_LIMIT - 1], (SAMPLE_LIMIT - 1) as f64);

        assert_eq!(sample([2.0, 1.0]), vec![2.0, 1.0]);
    }

    #[test]
    fn test_heap_snapshot_truncation() {
        let entries = (0..50).rev().map(|src| (Record(src as f64 / 2.0), src));
        let snapshot = heap_snapshot(entries);

        assert_eq!(snapshot.len(), HEAP_SNAPSHOT_LIMIT);
        assert_eq!(snapshot[0], (0.0, 0));
        assert_eq!(snapshot[HEAP_SNAPSHOT_LIMIT - 1], ((HEAP_SNAPSHOT_LIMIT - 1) as f64 / 2.0, HEAP_SNAPSHOT_LIMIT - 1));

        // equal values are ordered by source
        assert_eq!(
            heap_snapshot([(Record(f64::NAN), 0), (Record(1.0), 3), (Record(1.0), 1)])[..2],
            [(1.0, 1), (1.0, 3)]
        );
    }

    #[test]
    fn test_json_lines_observer() {
        let mut observer = JsonLinesObserver::new(Vec::new(), false);
        observer.on_event(SortEvent::PassInfo {
            pass_id: 0,
            runs_before: 3,
            fan_in: 2,
        });
        observer.on_event(SortEvent::MergeEnd {
            pass_id: 0,
            group_id: 1,
            merged_count: 10,
        });

        let output = String::from_utf8(observer.into_inner().unwrap()).unwrap();
        let lines: Vec<&str> = output.lines().collect();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], r#"{"type":"pass_info","pass_id":0,"runs_before":3,"fan_in":2}"#);
        assert_eq!(lines[1], r#"{"type":"merge_end","pass_id":0,"group_id":1,"merged_count":10}"#);
    }

    #[test]
    fn test_channel_observer() {
        let (mut sender, receiver) = mpsc::sync_channel(4);
        sender.on_event(SortEvent::Finished {
            records: 0,
            passes: 0,
            final_preview: vec![],
        });
        drop(receiver);
        // disconnected receiver must not panic
        sender.on_event(SortEvent::Finished {
            records: 0,
            passes: 0,
            final_preview: vec![],
        });
    }

    #[test]
    fn test_closure_observer() {
        let mut events = Vec::new();
        {
            let mut observer = |event: SortEvent| events.push(event);
            observer.on_event(SortEvent::Meta {
                run_size: 2,
                fan_in: 2,
                runs_count: 3,
            });
        }
        assert_eq!(events.len(), 1);
    }
}
