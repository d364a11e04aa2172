//! External sorter.

use log;
use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::cancel::CancelToken;
use crate::event::{NoopObserver, SortEvent, SortObserver, PREVIEW_LIMIT};
use crate::finalize::finalize;
use crate::generator::generate_runs;
use crate::record::RECORD_WIDTH;
use crate::run::{Run, DEFAULT_RW_BUF_SIZE};
use crate::scheduler::multi_pass_merge;
use crate::tune::{AutoTuner, SortParams, Tuner};

/// Sorting error.
#[derive(Debug)]
pub enum SortError {
    /// Invalid sorter configuration or tuning parameters.
    Configuration(String),
    /// Input length is not a multiple of the record width.
    MalformedInput {
        path: PathBuf,
        /// Input length in bytes.
        len: u64,
        /// Byte offset of the trailing partial record.
        offset: u64,
    },
    /// I/O operation on an input, run or output file failed.
    IO { path: PathBuf, source: io::Error },
    /// Temporary directory creation error.
    TempDir(io::Error),
    /// Memory budget is too small for any valid configuration.
    Resource { budget: u64, required: u64 },
    /// Workers thread pool initialization error.
    ThreadPoolBuildError(rayon::ThreadPoolBuildError),
    /// The sort was cancelled through its [`CancelToken`].
    Cancelled,
}

impl SortError {
    pub(crate) fn io(path: &Path) -> impl FnOnce(io::Error) -> SortError + '_ {
        move |source| SortError::IO {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl Error for SortError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            SortError::IO { source, .. } => Some(source),
            SortError::TempDir(err) => Some(err),
            SortError::ThreadPoolBuildError(err) => Some(err),
            _ => None,
        }
    }
}

impl Display for SortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            SortError::Configuration(reason) => write!(f, "invalid configuration: {}", reason),
            SortError::MalformedInput { path, len, offset } => write!(
                f,
                "malformed input {}: length {} is not a multiple of {} (partial record at offset {})",
                path.display(),
                len,
                RECORD_WIDTH,
                offset
            ),
            SortError::IO { path, source } => write!(f, "I/O operation on {} failed: {}", path.display(), source),
            SortError::TempDir(err) => write!(f, "temporary directory not created: {}", err),
            SortError::Resource { budget, required } => write!(
                f,
                "memory budget of {} bytes is too small (at least {} bytes required)",
                budget, required
            ),
            SortError::ThreadPoolBuildError(err) => write!(f, "thread pool initialization failed: {}", err),
            SortError::Cancelled => write!(f, "sort cancelled"),
        }
    }
}

/// Summary of a completed sort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SortStats {
    /// Parameters the sort ran with.
    pub params: SortParams,
    /// Number of sorted records.
    pub records: u64,
    /// Number of runs produced by the run generator.
    pub initial_runs: usize,
    /// Number of merge passes.
    pub passes: usize,
}

/// State shared by the sort stages of a single sort invocation.
pub struct SortContext<'a> {
    pub(crate) thread_pool: &'a rayon::ThreadPool,
    pub(crate) cancel: &'a CancelToken,
    pub(crate) observer: &'a mut dyn SortObserver,
    pub(crate) rw_buf_size: usize,
}

impl<'a> SortContext<'a> {
    pub fn new(thread_pool: &'a rayon::ThreadPool, cancel: &'a CancelToken, observer: &'a mut dyn SortObserver) -> Self {
        SortContext {
            thread_pool,
            cancel,
            observer,
            rw_buf_size: DEFAULT_RW_BUF_SIZE,
        }
    }

    /// Sets run file read/write buffer size.
    pub fn with_rw_buf_size(mut self, buf_size: usize) -> Self {
        self.rw_buf_size = buf_size.max(RECORD_WIDTH);
        return self;
    }
}

/// External sorter builder. Provides methods for [`ExternalSorter`] initialization.
#[derive(Clone)]
pub struct ExternalSorterBuilder<T = AutoTuner>
where
    T: Tuner,
{
    /// Number of threads to be used to sort run data in parallel.
    threads_number: Option<usize>,
    /// Directory to be used to store temporary data.
    tmp_dir: Option<Box<Path>>,
    /// Run file read/write buffer size.
    rw_buf_size: Option<usize>,
    /// Records per initial run, tuned when not set.
    run_size: Option<usize>,
    /// Merge fan-in, tuned when not set.
    fan_in: Option<usize>,
    /// Memory budget passed to the tuner.
    memory_limit: Option<u64>,
    /// Sort parameters tuner.
    tuner: T,
    /// Cancellation token.
    cancel: CancelToken,
}

impl<T> ExternalSorterBuilder<T>
where
    T: Tuner + Default,
{
    /// Creates an instance of a builder with default parameters.
    pub fn new() -> Self {
        ExternalSorterBuilder::default()
    }
}

impl<T> ExternalSorterBuilder<T>
where
    T: Tuner,
{
    /// Builds an [`ExternalSorter`] instance using provided configuration.
    pub fn build(self) -> Result<ExternalSorter<T>, SortError> {
        if self.run_size == Some(0) {
            return Err(SortError::Configuration("run size must be positive".into()));
        }
        if let Some(fan_in) = self.fan_in.filter(|fan_in| *fan_in < 2) {
            return Err(SortError::Configuration(format!("fan-in must be at least 2, got {}", fan_in)));
        }
        if self.rw_buf_size == Some(0) {
            return Err(SortError::Configuration("read/write buffer size must be positive".into()));
        }
        if self.threads_number == Some(0) {
            return Err(SortError::Configuration("threads number must be positive".into()));
        }

        ExternalSorter::new(
            self.threads_number,
            self.tmp_dir.as_deref(),
            self.rw_buf_size,
            self.run_size,
            self.fan_in,
            self.memory_limit,
            self.tuner,
            self.cancel,
        )
    }

    /// Sets number of threads to be used to sort run data in parallel.
    pub fn with_threads_number(mut self, threads_number: usize) -> ExternalSorterBuilder<T> {
        self.threads_number = Some(threads_number);
        return self;
    }

    /// Sets directory to be used to store temporary data.
    pub fn with_tmp_dir(mut self, path: &Path) -> ExternalSorterBuilder<T> {
        self.tmp_dir = Some(path.into());
        return self;
    }

    /// Sets run file read/write buffer size.
    pub fn with_rw_buf_size(mut self, buf_size: usize) -> ExternalSorterBuilder<T> {
        self.rw_buf_size = Some(buf_size);
        return self;
    }

    /// Sets number of records per initial run.
    pub fn with_run_size(mut self, run_size: usize) -> ExternalSorterBuilder<T> {
        self.run_size = Some(run_size);
        return self;
    }

    /// Sets maximum number of runs merged at once.
    pub fn with_fan_in(mut self, fan_in: usize) -> ExternalSorterBuilder<T> {
        self.fan_in = Some(fan_in);
        return self;
    }

    /// Sets memory budget in bytes the tuner should fit the sort into.
    pub fn with_memory_limit(mut self, memory_limit: u64) -> ExternalSorterBuilder<T> {
        self.memory_limit = Some(memory_limit);
        return self;
    }

    /// Sets cancellation token.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> ExternalSorterBuilder<T> {
        self.cancel = cancel;
        return self;
    }

    /// Sets sort parameters tuner.
    pub fn with_tuner<U: Tuner>(self, tuner: U) -> ExternalSorterBuilder<U> {
        ExternalSorterBuilder {
            threads_number: self.threads_number,
            tmp_dir: self.tmp_dir,
            rw_buf_size: self.rw_buf_size,
            run_size: self.run_size,
            fan_in: self.fan_in,
            memory_limit: self.memory_limit,
            tuner,
            cancel: self.cancel,
        }
    }
}

impl<T> Default for ExternalSorterBuilder<T>
where
    T: Tuner + Default,
{
    fn default() -> Self {
        ExternalSorterBuilder {
            threads_number: None,
            tmp_dir: None,
            rw_buf_size: None,
            run_size: None,
            fan_in: None,
            memory_limit: None,
            tuner: T::default(),
            cancel: CancelToken::default(),
        }
    }
}

/// External sorter.
///
/// Every [`ExternalSorter::sort`] call owns a fresh work directory, so a sorter can be reused
/// sequentially; concurrent sorts should use independent sorter instances.
pub struct ExternalSorter<T = AutoTuner>
where
    T: Tuner,
{
    /// Sorting thread pool.
    thread_pool: rayon::ThreadPool,
    /// Directory to be used to store temporary data.
    tmp_dir: Option<PathBuf>,
    /// Run file read/write buffer size.
    rw_buf_size: Option<usize>,
    run_size: Option<usize>,
    fan_in: Option<usize>,
    memory_limit: Option<u64>,
    tuner: T,
    cancel: CancelToken,
}

impl<T> ExternalSorter<T>
where
    T: Tuner,
{
    /// Creates a new external sorter instance.
    ///
    /// # Arguments
    /// * `threads_number` - Number of threads to be used to sort data in parallel. If the parameter is [`None`]
    ///   threads number will be selected based on available CPU core number.
    /// * `tmp_path` - Directory to be used to store temporary data. If paramater is [`None`] default OS temporary
    ///   directory will be used.
    /// * `rw_buf_size` - Run files read/write buffer size.
    /// * `run_size` - Records per initial run. Tuned from the input size if [`None`].
    /// * `fan_in` - Maximum number of runs merged at once. Tuned from the input size if [`None`].
    /// * `memory_limit` - Memory budget the tuner fits the sort into.
    /// * `tuner` - Sort parameters tuner.
    /// * `cancel` - Cancellation token.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        threads_number: Option<usize>,
        tmp_path: Option<&Path>,
        rw_buf_size: Option<usize>,
        run_size: Option<usize>,
        fan_in: Option<usize>,
        memory_limit: Option<u64>,
        tuner: T,
        cancel: CancelToken,
    ) -> Result<Self, SortError> {
        return Ok(ExternalSorter {
            thread_pool: Self::init_thread_pool(threads_number)?,
            tmp_dir: tmp_path.map(Path::to_path_buf),
            rw_buf_size,
            run_size,
            fan_in,
            memory_limit,
            tuner,
            cancel,
        });
    }

    fn init_thread_pool(threads_number: Option<usize>) -> Result<rayon::ThreadPool, SortError> {
        let mut thread_pool_builder = rayon::ThreadPoolBuilder::new();

        if let Some(threads_number) = threads_number {
            log::info!("initializing thread-pool (threads: {})", threads_number);
            thread_pool_builder = thread_pool_builder.num_threads(threads_number);
        } else {
            log::info!("initializing thread-pool (threads: default)");
        }
        let thread_pool = thread_pool_builder
            .build()
            .map_err(|err| SortError::ThreadPoolBuildError(err))?;

        return Ok(thread_pool);
    }

    fn init_work_dir(&self) -> Result<tempfile::TempDir, SortError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("extsort_");

        let work_dir = if let Some(tmp_path) = &self.tmp_dir {
            builder.tempdir_in(tmp_path)
        } else {
            builder.tempdir()
        }
        .map_err(|err| SortError::TempDir(err))?;

        log::info!("using {} as a work directory", work_dir.path().display());

        return Ok(work_dir);
    }

    /// Returns the cancellation token of the sorter.
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Chooses sort parameters for an input of `input_size` bytes.
    pub fn params(&self, input_size: u64) -> Result<SortParams, SortError> {
        let params = match (self.run_size, self.fan_in) {
            (Some(run_size), Some(fan_in)) => SortParams { run_size, fan_in },
            (run_size, fan_in) => {
                let tuned = self.tuner.tune(input_size, self.memory_limit, fan_in)?;
                SortParams {
                    run_size: run_size.unwrap_or(tuned.run_size),
                    fan_in: tuned.fan_in,
                }
            }
        };
        params.validate()?;

        return Ok(params);
    }

    /// Sorts the records of the `input` file into the `output` file.
    ///
    /// The output file is replaced only if the whole sort succeeds.
    ///
    /// # Arguments
    /// * `input` - File of native-endian `f64` records
    /// * `output` - Destination of the sorted records
    pub fn sort(&self, input: &Path, output: &Path) -> Result<SortStats, SortError> {
        self.sort_with_observer(input, output, &mut NoopObserver)
    }

    /// Sorts the records of the `input` file into the `output` file reporting progress to an observer.
    ///
    /// # Arguments
    /// * `input` - File of native-endian `f64` records
    /// * `output` - Destination of the sorted records
    /// * `observer` - Sort events observer
    pub fn sort_with_observer(
        &self,
        input: &Path,
        output: &Path,
        observer: &mut dyn SortObserver,
    ) -> Result<SortStats, SortError> {
        let work_dir = self.init_work_dir()?;
        let result = self.sort_in(input, output, work_dir.path(), observer);

        let work_dir_path = work_dir.path().to_path_buf();
        if let Err(err) = work_dir.close() {
            log::warn!("work directory {} not removed: {}", work_dir_path.display(), err);
        }

        match &result {
            Ok(stats) => log::info!(
                "sorted {} records ({} runs, {} passes)",
                stats.records,
                stats.initial_runs,
                stats.passes
            ),
            Err(err) => log::error!("sort of {} failed: {}", input.display(), err),
        }

        return result;
    }

    fn sort_in(
        &self,
        input: &Path,
        output: &Path,
        work_dir: &Path,
        observer: &mut dyn SortObserver,
    ) -> Result<SortStats, SortError> {
        let input_size = fs::metadata(input).map_err(SortError::io(input))?.len();
        let partial = input_size % RECORD_WIDTH as u64;
        if partial != 0 {
            return Err(SortError::MalformedInput {
                path: input.to_path_buf(),
                len: input_size,
                offset: input_size - partial,
            });
        }

        let params = self.params(input_size)?;
        log::info!(
            "sorting {} (records: {}, run size: {}, fan-in: {})",
            input.display(),
            input_size / RECORD_WIDTH as u64,
            params.run_size,
            params.fan_in
        );
        observer.on_event(SortEvent::params_chosen(&params, input_size));

        let mut ctx = SortContext::new(&self.thread_pool, &self.cancel, observer)
            .with_rw_buf_size(self.io_buf_size(&params));

        let runs = generate_runs(input, params.run_size, work_dir, &mut ctx)?;
        let initial_runs = runs.len();
        ctx.observer.on_event(SortEvent::Meta {
            run_size: params.run_size,
            fan_in: params.fan_in,
            runs_count: initial_runs,
        });

        let outcome = multi_pass_merge(runs, params.fan_in, work_dir, &mut ctx)?;
        let final_preview = match &outcome.run {
            Some(run) => preview(run, ctx.rw_buf_size)?,
            None => Vec::new(),
        };

        self.cancel.check()?;
        finalize(outcome.run, output)?;

        let records = input_size / RECORD_WIDTH as u64;
        ctx.observer.on_event(SortEvent::Finished {
            records,
            passes: outcome.passes,
            final_preview,
        });

        return Ok(SortStats {
            params,
            records,
            initial_runs,
            passes: outcome.passes,
        });
    }

    /// Read/write buffers never exceed the memory share of a single run.
    fn io_buf_size(&self, params: &SortParams) -> usize {
        let run_bytes = params.run_size.saturating_mul(RECORD_WIDTH);
        self.rw_buf_size.unwrap_or(DEFAULT_RW_BUF_SIZE).min(run_bytes)
    }
}

fn preview(run: &Run, buf_size: usize) -> Result<Vec<f64>, SortError> {
    run.open(buf_size)?
        .take(PREVIEW_LIMIT)
        .map(|record| record.map(|record| record.value()))
        .collect()
}

/// Sorts `input` into `output` with a default sorter.
///
/// Omitted parameters are tuned from the input size and the available system memory.
pub fn sort(input: &Path, output: &Path, run_size: Option<usize>, fan_in: Option<usize>) -> Result<SortStats, SortError> {
    let mut builder: ExternalSorterBuilder = ExternalSorterBuilder::new();
    if let Some(run_size) = run_size {
        builder = builder.with_run_size(run_size);
    }
    if let Some(fan_in) = fan_in {
        builder = builder.with_fan_in(fan_in);
    }

    builder.build()?.sort(input, output)
}
