//! Multi-pass merge scheduling.

use std::path::Path;

use crate::event::SortEvent;
use crate::merger::merge_runs;
use crate::run::Run;
use crate::sort::{SortContext, SortError};

/// Result of [`multi_pass_merge`].
#[derive(Debug)]
pub struct MergeOutcome {
    /// The fully merged run, [`None`] if there were no runs to merge.
    pub run: Option<Run>,
    /// Number of merge passes performed.
    pub passes: usize,
}

/// Merges runs in passes until a single run remains.
///
/// Every pass splits the current runs into contiguous groups of at most `fan_in` runs and merges
/// each group into a `pass{P}_run{G}.bin` run. Runs are deleted as soon as their group is merged,
/// so at most one generation of inputs and one of outputs exists on disk. `R > 1` initial runs
/// take `ceil(log_fan_in(R))` passes.
///
/// # Arguments
/// * `runs` - Initial runs in input order
/// * `fan_in` - Maximum number of runs merged at once
/// * `work_dir` - Directory the merged runs are created in
/// * `ctx` - Sort context
pub fn multi_pass_merge(
    runs: Vec<Run>,
    fan_in: usize,
    work_dir: &Path,
    ctx: &mut SortContext,
) -> Result<MergeOutcome, SortError> {
    if fan_in < 2 {
        return Err(SortError::Configuration(format!("fan-in must be at least 2, got {}", fan_in)));
    }

    let mut current = runs;
    let mut pass_id = 0;

    while current.len() > 1 {
        ctx.cancel.check()?;

        log::debug!("merge pass {} ({} runs, fan-in {})", pass_id, current.len(), fan_in);
        ctx.observer.on_event(SortEvent::PassInfo {
            pass_id,
            runs_before: current.len(),
            fan_in,
        });

        let mut next = Vec::with_capacity(current.len().div_ceil(fan_in));
        for (group_id, group) in current.chunks(fan_in).enumerate() {
            ctx.cancel.check()?;

            let output = work_dir.join(format!("pass{}_run{}.bin", pass_id, group_id));
            next.push(merge_runs(group, &output, pass_id, group_id, ctx)?);

            for run in group {
                if let Err(err) = run.remove() {
                    log::warn!("merged run {} not removed: {}", run.path().display(), err);
                }
            }
        }

        current = next;
        pass_id += 1;
    }

    return Ok(MergeOutcome {
        run: current.pop(),
        passes: pass_id,
    });
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::multi_pass_merge;
    use crate::cancel::CancelToken;
    use crate::event::{NoopObserver, SortEvent};
    use crate::record::Record;
    use crate::run::{Run, RunWriter};
    use crate::sort::{SortContext, SortError};
    use crate::test_utils::read_records;

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir_in("./").unwrap()
    }

    fn create_runs(dir: &tempfile::TempDir, runs: &[&[f64]]) -> Vec<Run> {
        runs.iter()
            .enumerate()
            .map(|(idx, values)| {
                let mut writer = RunWriter::create(dir.path().join(format!("run{}.bin", idx)), 64).unwrap();
                writer.write_all(values.iter().copied().map(Record)).unwrap();
                writer.finish().unwrap()
            })
            .collect()
    }

    fn dir_entries(dir: &tempfile::TempDir) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[rstest]
    fn test_two_pass_scenario(tmp_dir: tempfile::TempDir) {
        let runs = create_runs(&tmp_dir, &[&[3.0, 5.0], &[1.0, 4.0], &[2.0]]);
        let thread_pool = rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap();
        let cancel = CancelToken::new();
        let mut events = Vec::new();
        let mut observer = |event: SortEvent| {
            if !matches!(
                event,
                SortEvent::HeapPush { .. }
                    | SortEvent::HeapPop { .. }
                    | SortEvent::OutputEmit { .. }
                    | SortEvent::InputBufferUpdate { .. }
            ) {
                events.push(event)
            }
        };
        let mut ctx = SortContext::new(&thread_pool, &cancel, &mut observer);

        let outcome = multi_pass_merge(runs, 2, tmp_dir.path(), &mut ctx).unwrap();
        drop(ctx);

        assert_eq!(outcome.passes, 2);
        let run = outcome.run.unwrap();
        assert_eq!(run.file_name(), "pass1_run0.bin");
        assert_eq!(read_records(run.path()), vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        // consumed runs are removed
        assert_eq!(dir_entries(&tmp_dir), vec!["pass1_run0.bin"]);

        let merges: Vec<(usize, usize, Vec<String>)> = events
            .iter()
            .filter_map(|event| match event {
                SortEvent::MergeStart {
                    pass_id,
                    group_id,
                    inputs,
                    ..
                } => Some((*pass_id, *group_id, inputs.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(
            merges,
            vec![
                (0, 0, vec!["run0.bin".to_string(), "run1.bin".to_string()]),
                (0, 1, vec!["run2.bin".to_string()]),
                (1, 0, vec!["pass0_run0.bin".to_string(), "pass0_run1.bin".to_string()]),
            ]
        );
        assert_eq!(
            events[0],
            SortEvent::PassInfo {
                pass_id: 0,
                runs_before: 3,
                fan_in: 2
            }
        );
    }

    #[rstest]
    #[case(0, 2, 0)]
    #[case(1, 2, 0)]
    #[case(2, 2, 1)]
    #[case(5, 2, 3)]
    #[case(8, 2, 3)]
    #[case(9, 3, 2)]
    #[case(10, 3, 3)]
    #[case(7, 8, 1)]
    fn test_pass_count(
        tmp_dir: tempfile::TempDir,
        #[case] runs_number: usize,
        #[case] fan_in: usize,
        #[case] expected_passes: usize,
    ) {
        let values: Vec<Vec<f64>> = (0..runs_number).map(|idx| vec![(runs_number - idx) as f64]).collect();
        let slices: Vec<&[f64]> = values.iter().map(|values| values.as_slice()).collect();
        let runs = create_runs(&tmp_dir, &slices);

        let thread_pool = rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap();
        let cancel = CancelToken::new();
        let mut observer = NoopObserver;
        let mut ctx = SortContext::new(&thread_pool, &cancel, &mut observer);

        let outcome = multi_pass_merge(runs, fan_in, tmp_dir.path(), &mut ctx).unwrap();
        assert_eq!(outcome.passes, expected_passes);

        match outcome.run {
            Some(run) => {
                let expected: Vec<f64> = (1..=runs_number).map(|value| value as f64).collect();
                assert_eq!(read_records(run.path()), expected);
            }
            None => assert_eq!(runs_number, 0),
        }
    }

    #[rstest]
    fn test_invalid_fan_in(tmp_dir: tempfile::TempDir) {
        let runs = create_runs(&tmp_dir, &[&[1.0], &[2.0]]);
        let thread_pool = rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap();
        let cancel = CancelToken::new();
        let mut observer = NoopObserver;
        let mut ctx = SortContext::new(&thread_pool, &cancel, &mut observer);

        let result = multi_pass_merge(runs, 1, tmp_dir.path(), &mut ctx);
        assert!(matches!(result, Err(SortError::Configuration(_))));
    }

    #[rstest]
    fn test_cancelled_merge(tmp_dir: tempfile::TempDir) {
        let runs = create_runs(&tmp_dir, &[&[1.0], &[2.0]]);
        let thread_pool = rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut observer = NoopObserver;
        let mut ctx = SortContext::new(&thread_pool, &cancel, &mut observer);

        let result = multi_pass_merge(runs, 2, tmp_dir.path(), &mut ctx);
        assert!(matches!(result, Err(SortError::Cancelled)));
    }
}
