//! Initial runs generation.

use std::fs;
use std::path::Path;

use rayon::slice::ParallelSliceMut;

use crate::buffer::{Fill, RecordBuffer};
use crate::event::{sample, SortEvent};
use crate::record::RECORD_WIDTH;
use crate::run::{Run, RunWriter};
use crate::sort::{SortContext, SortError};

/// Splits the input into blocks of `run_size` records, sorts every block in memory and saves it
/// as a run file `run{N}.bin` in `work_dir`. Runs are returned in input order.
///
/// # Arguments
/// * `input` - Input records file
/// * `run_size` - Number of records per run, the last run may be shorter
/// * `work_dir` - Directory the run files are created in
/// * `ctx` - Sort context
pub fn generate_runs(
    input: &Path,
    run_size: usize,
    work_dir: &Path,
    ctx: &mut SortContext,
) -> Result<Vec<Run>, SortError> {
    if run_size == 0 {
        return Err(SortError::Configuration("run size must be positive".into()));
    }

    let mut input_file = fs::File::open(input).map_err(SortError::io(input))?;
    let input_len = input_file.metadata().map_err(SortError::io(input))?.len();

    // blocks never exceed the input, small inputs do not allocate a full run
    let block_limit = usize::try_from(input_len / RECORD_WIDTH as u64)
        .unwrap_or(usize::MAX)
        .min(run_size)
        .max(1);
    let mut buffer = RecordBuffer::with_capacity(block_limit);
    let mut runs = Vec::new();
    let mut offset = 0u64;

    loop {
        ctx.cancel.check()?;

        let count = match buffer.fill(&mut input_file).map_err(SortError::io(input))? {
            Fill::Records(0) => break,
            Fill::Records(count) => count,
            Fill::Partial(partial_offset) => {
                return Err(SortError::MalformedInput {
                    path: input.to_path_buf(),
                    len: input_len,
                    offset: offset + partial_offset as u64,
                })
            }
        };
        offset += (count * RECORD_WIDTH) as u64;

        let run_index = runs.len();
        ctx.observer.on_event(SortEvent::ReadBlock {
            run_index,
            sample: sample(buffer.records().iter().map(|record| record.value())),
            count,
        });

        log::debug!("sorting run {} ({} records) ...", run_index, count);
        // equal records are bit-identical, an unstable in-place sort gives the same output
        ctx.thread_pool.install(|| {
            buffer.par_sort_unstable();
        });

        let run_path = work_dir.join(format!("run{}.bin", run_index));
        log::debug!("saving run {}", run_path.display());
        let mut writer = RunWriter::create(&run_path, ctx.rw_buf_size).map_err(SortError::io(&run_path))?;
        writer
            .write_all(buffer.records().iter().copied())
            .map_err(SortError::io(&run_path))?;
        let run = writer.finish().map_err(SortError::io(&run_path))?;

        ctx.observer.on_event(SortEvent::SortBlock {
            run_index,
            sorted_sample: sample(buffer.records().iter().map(|record| record.value())),
            count,
        });

        runs.push(run);
    }

    log::debug!("{} runs generated from {}", runs.len(), input.display());

    return Ok(runs);
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::generate_runs;
    use crate::cancel::CancelToken;
    use crate::event::SortEvent;
    use crate::sort::{SortContext, SortError};
    use crate::test_utils::{read_records, write_records};

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir_in("./").unwrap()
    }

    #[fixture]
    fn thread_pool() -> rayon::ThreadPool {
        rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap()
    }

    #[rstest]
    fn test_generate_runs(tmp_dir: tempfile::TempDir, thread_pool: rayon::ThreadPool) {
        let input = tmp_dir.path().join("input.bin");
        write_records(&input, &[5.0, 3.0, 1.0, 4.0, 2.0]);

        let cancel = CancelToken::new();
        let mut events = Vec::new();
        let mut observer = |event: SortEvent| events.push(event);
        let mut ctx = SortContext::new(&thread_pool, &cancel, &mut observer);

        let runs = generate_runs(&input, 2, tmp_dir.path(), &mut ctx).unwrap();
        drop(ctx);

        let names: Vec<String> = runs.iter().map(|run| run.file_name()).collect();
        assert_eq!(names, vec!["run0.bin", "run1.bin", "run2.bin"]);
        assert_eq!(read_records(runs[0].path()), vec![3.0, 5.0]);
        assert_eq!(read_records(runs[1].path()), vec![1.0, 4.0]);
        assert_eq!(read_records(runs[2].path()), vec![2.0]);

        // one read and one sort event per block
        assert_eq!(events.len(), 6);
        assert_eq!(
            events[0],
            SortEvent::ReadBlock {
                run_index: 0,
                sample: vec![5.0, 3.0],
                count: 2
            }
        );
        assert_eq!(
            events[5],
            SortEvent::SortBlock {
                run_index: 2,
                sorted_sample: vec![2.0],
                count: 1
            }
        );
    }

    #[rstest]
    fn test_generate_runs_nan_last(tmp_dir: tempfile::TempDir, thread_pool: rayon::ThreadPool) {
        let input = tmp_dir.path().join("input.bin");
        write_records(&input, &[f64::NAN, 2.0, f64::INFINITY, -1.0]);

        let cancel = CancelToken::new();
        let mut observer = crate::event::NoopObserver;
        let mut ctx = SortContext::new(&thread_pool, &cancel, &mut observer);

        let runs = generate_runs(&input, 16, tmp_dir.path(), &mut ctx).unwrap();
        assert_eq!(runs.len(), 1);

        let records = read_records(runs[0].path());
        assert_eq!(&records[..3], &[-1.0, 2.0, f64::INFINITY]);
        assert!(records[3].is_nan());
    }

    #[rstest]
    fn test_generate_runs_empty(tmp_dir: tempfile::TempDir, thread_pool: rayon::ThreadPool) {
        let input = tmp_dir.path().join("input.bin");
        write_records(&input, &[]);

        let cancel = CancelToken::new();
        let mut observer = crate::event::NoopObserver;
        let mut ctx = SortContext::new(&thread_pool, &cancel, &mut observer);

        let runs = generate_runs(&input, 4, tmp_dir.path(), &mut ctx).unwrap();
        assert!(runs.is_empty());
    }

    #[rstest]
    fn test_generate_runs_cancelled(tmp_dir: tempfile::TempDir, thread_pool: rayon::ThreadPool) {
        let input = tmp_dir.path().join("input.bin");
        write_records(&input, &[1.0, 2.0]);

        let cancel = CancelToken::new();
        cancel.cancel();
        let mut observer = crate::event::NoopObserver;
        let mut ctx = SortContext::new(&thread_pool, &cancel, &mut observer);

        let result = generate_runs(&input, 4, tmp_dir.path(), &mut ctx);
        assert!(matches!(result, Err(SortError::Cancelled)));
    }

    #[rstest]
    fn test_generate_runs_missing_input(tmp_dir: tempfile::TempDir, thread_pool: rayon::ThreadPool) {
        let cancel = CancelToken::new();
        let mut observer = crate::event::NoopObserver;
        let mut ctx = SortContext::new(&thread_pool, &cancel, &mut observer);

        let missing = tmp_dir.path().join("missing.bin");
        match generate_runs(&missing, 4, tmp_dir.path(), &mut ctx) {
            Err(SortError::IO { path, .. }) => assert_eq!(path, missing),
            other => panic!("unexpected result: {:?}", other.map(|runs| runs.len())),
        }
    }
}
