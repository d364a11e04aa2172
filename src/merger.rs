//! Binary heap merger.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::error::Error;
use std::path::Path;

use crate::event::{heap_snapshot, SortEvent, LOOKAHEAD_LIMIT};
use crate::record::Record;
use crate::run::{Run, RunReader, RunWriter};
use crate::sort::{SortContext, SortError};

/// Number of merged records between two cancellation checks.
const CANCEL_CHECK_INTERVAL: u64 = 64 * 1024;

/// Record produced by the merger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Merged {
    /// Emitted record.
    pub value: Record,
    /// Index of the input the record came from.
    pub src: usize,
    /// Next record of the same input, pushed to the heap in place of the emitted one.
    pub refill: Option<Record>,
}

/// Binary heap merger implementation.
/// Merges multiple sorted inputs into a single sorted output.
/// Time complexity is *m* \* log(*n*) in worst case where *m* is the number of items,
/// *n* is the number of chunks (inputs).
///
/// Equal records are emitted in input order: the heap is keyed by `(record, input index)`.
pub struct BinaryHeapMerger<E, C>
where
    E: Error,
    C: IntoIterator<Item = Result<Record, E>>,
{
    // binary heap is max-heap by default so we reverse it to convert it to min-heap
    items: BinaryHeap<Reverse<(Record, usize)>>,
    chunks: Vec<C::IntoIter>,
    initiated: bool,
}

impl<E, C> BinaryHeapMerger<E, C>
where
    E: Error,
    C: IntoIterator<Item = Result<Record, E>>,
{
    /// Creates an instance of a binary heap merger using chunks as inputs.
    /// Chunk items should be sorted in ascending order otherwise the result is undefined.
    ///
    /// # Arguments
    /// * `chunks` - Chunks to be merged in a single sorted one
    pub fn new<I>(chunks: I) -> Self
    where
        I: IntoIterator<Item = C>,
    {
        let chunks = Vec::from_iter(chunks.into_iter().map(|c| c.into_iter()));
        let items = BinaryHeap::with_capacity(chunks.len());

        return BinaryHeapMerger {
            chunks,
            items,
            initiated: false,
        };
    }

    /// Loads the first item of every chunk into the heap. Called lazily by the first `next`.
    pub fn init(&mut self) -> Result<(), E> {
        if self.initiated {
            return Ok(());
        }
        self.initiated = true;

        for (idx, chunk) in self.chunks.iter_mut().enumerate() {
            if let Some(item) = chunk.next() {
                self.items.push(Reverse((item?, idx)));
            }
        }

        return Ok(());
    }

    /// Returns the chunk with the given index.
    pub fn chunk(&self, idx: usize) -> &C::IntoIter {
        &self.chunks[idx]
    }

    pub fn chunk_mut(&mut self, idx: usize) -> &mut C::IntoIter {
        &mut self.chunks[idx]
    }

    pub fn chunks_len(&self) -> usize {
        self.chunks.len()
    }

    /// Returns the heap entries in arbitrary order.
    pub fn heap_entries(&self) -> impl Iterator<Item = (Record, usize)> + '_ {
        self.items.iter().map(|Reverse(entry)| *entry)
    }
}

impl<E, C> Iterator for BinaryHeapMerger<E, C>
where
    E: Error,
    C: IntoIterator<Item = Result<Record, E>>,
{
    type Item = Result<Merged, E>;

    /// Returns the next item from the inputs in ascending order.
    fn next(&mut self) -> Option<Self::Item> {
        if let Err(err) = self.init() {
            return Some(Err(err));
        }

        let Reverse((value, src)) = self.items.pop()?;
        let refill = match self.chunks[src].next() {
            Some(Ok(item)) => {
                self.items.push(Reverse((item, src)));
                Some(item)
            }
            Some(Err(err)) => return Some(Err(err)),
            None => None,
        };

        return Some(Ok(Merged { value, src, refill }));
    }
}

/// Merges sorted runs into a new run at `output`.
///
/// At most `inputs.len() + 1` files are open at once, all of them are closed before returning.
/// A single input is copied.
///
/// # Arguments
/// * `inputs` - Runs to be merged
/// * `output` - Path of the merged run
/// * `pass_id` - Merge pass the group belongs to, reported to the observer
/// * `group_id` - Group index within the pass, reported to the observer
/// * `ctx` - Sort context
pub fn merge_runs(
    inputs: &[Run],
    output: &Path,
    pass_id: usize,
    group_id: usize,
    ctx: &mut SortContext,
) -> Result<Run, SortError> {
    let readers = inputs
        .iter()
        .map(|run| run.open(ctx.rw_buf_size))
        .collect::<Result<Vec<RunReader>, SortError>>()?;
    let mut writer = RunWriter::create(output, ctx.rw_buf_size).map_err(SortError::io(output))?;

    let record_events = ctx.observer.wants_record_events();
    let mut merger = BinaryHeapMerger::new(readers);
    merger.init()?;

    if record_events {
        // replay the heap loading input by input
        let mut initial = Vec::from_iter(merger.heap_entries());
        initial.sort_by_key(|(_, src)| *src);
        for (idx, (value, src)) in initial.iter().enumerate() {
            ctx.observer.on_event(SortEvent::HeapPush {
                pass_id,
                group_id,
                value: value.value(),
                src: *src,
                heap_snapshot: heap_snapshot(initial[..=idx].iter().copied()),
            });
        }
    }

    let input_buffers = (0..merger.chunks_len())
        .map(|idx| -> Result<Vec<f64>, SortError> {
            let upcoming = merger.chunk_mut(idx).peek(LOOKAHEAD_LIMIT)?;
            Ok(upcoming.into_iter().map(Record::value).collect())
        })
        .collect::<Result<Vec<Vec<f64>>, SortError>>()?;
    ctx.observer.on_event(SortEvent::MergeStart {
        pass_id,
        group_id,
        inputs: inputs.iter().map(Run::file_name).collect(),
        input_buffers,
        initial_heap: heap_snapshot(merger.heap_entries()),
    });

    let mut merged_count = 0u64;
    while let Some(item) = merger.next() {
        let merged = item?;
        writer.write(merged.value).map_err(SortError::io(output))?;
        merged_count += 1;

        if record_events {
            report_merged(ctx, &merger, &merged, merged_count, pass_id, group_id);
        }
        if merged_count % CANCEL_CHECK_INTERVAL == 0 {
            ctx.cancel.check()?;
        }
    }
    drop(merger);

    let run = writer.finish().map_err(SortError::io(output))?;
    log::debug!(
        "merged {} runs into {} ({} records)",
        inputs.len(),
        output.display(),
        run.len()
    );
    ctx.observer.on_event(SortEvent::MergeEnd {
        pass_id,
        group_id,
        merged_count,
    });

    return Ok(run);
}

fn report_merged(
    ctx: &mut SortContext,
    merger: &BinaryHeapMerger<SortError, RunReader>,
    merged: &Merged,
    merged_count: u64,
    pass_id: usize,
    group_id: usize,
) {
    let value = merged.value.value();
    // the merger has already pushed the refill, the heap right after the pop lacks it
    ctx.observer.on_event(SortEvent::HeapPop {
        pass_id,
        group_id,
        value,
        src: merged.src,
        heap_snapshot: heap_snapshot(merger.heap_entries().filter(|(_, src)| *src != merged.src)),
    });
    ctx.observer.on_event(SortEvent::OutputEmit {
        pass_id,
        group_id,
        value,
        emitted_count: merged_count,
    });
    ctx.observer.on_event(SortEvent::InputBufferUpdate {
        pass_id,
        group_id,
        src: merged.src,
        consumed: merger.chunk(merged.src).consumed(),
        exhausted: merged.refill.is_none(),
    });
    if let Some(refill) = merged.refill {
        ctx.observer.on_event(SortEvent::HeapPush {
            pass_id,
            group_id,
            value: refill.value(),
            src: merged.src,
            heap_snapshot: heap_snapshot(merger.heap_entries()),
        });
    }
}
