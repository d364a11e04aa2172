//! Sort parameter tuning.

use serde::Serialize;
use sysinfo::{System, SystemExt};

use crate::record::RECORD_WIDTH;
use crate::sort::SortError;

const MB: u64 = 1024 * 1024;

/// Smallest run size the [`AutoTuner`] picks, in records.
pub const MIN_RUN_SIZE: usize = 4096;
/// Memory budget used when neither the caller nor the system provides one.
pub const DEFAULT_MEMORY_BUDGET: u64 = 64 * MB;
/// Share of the available system memory the [`AutoTuner`] uses as a budget.
pub const DEFAULT_RAM_RATIO: f64 = 0.5;
/// Lower fan-in clamp.
pub const MIN_FAN_IN: usize = 4;
/// Upper fan-in clamp, bounds the number of simultaneously open runs.
pub const MAX_FAN_IN: usize = 96;

/// Parameters driving one sort invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SortParams {
    /// Number of records sorted in memory to form one initial run.
    pub run_size: usize,
    /// Maximum number of runs merged together.
    pub fan_in: usize,
}

impl SortParams {
    /// Memory required to hold `fan_in` read buffers and one write buffer of `run_size` records.
    pub fn memory_required(&self) -> u64 {
        memory_required(self.run_size as u64, self.fan_in)
    }

    pub fn validate(&self) -> Result<(), SortError> {
        if self.run_size == 0 {
            return Err(SortError::Configuration("run size must be positive".into()));
        }
        if self.fan_in < 2 {
            return Err(SortError::Configuration(format!(
                "fan-in must be at least 2, got {}",
                self.fan_in
            )));
        }
        return Ok(());
    }
}

/// Tuner interface. Chooses sort parameters from the input size and memory budget.
///
/// The heuristics only affect performance, never the sorted result.
pub trait Tuner {
    /// # Arguments
    /// * `input_size` - Input file size in bytes
    /// * `memory_budget` - Available memory in bytes, [`None`] if unknown
    /// * `fan_in` - Fan-in fixed by the caller, if any
    fn tune(&self, input_size: u64, memory_budget: Option<u64>, fan_in: Option<usize>)
        -> Result<SortParams, SortError>;
}

fn memory_required(run_size: u64, fan_in: usize) -> u64 {
    run_size.saturating_mul(buffer_width(fan_in))
}

/// Bytes taken by one record slot in each of the `fan_in + 1` buffers.
fn buffer_width(fan_in: usize) -> u64 {
    (fan_in as u64).saturating_add(1).saturating_mul(RECORD_WIDTH as u64)
}

/// Default tuner.
///
/// The fan-in grows with the input size. The run size is the smaller of the memory-safety bound
/// `budget / (8 * (k + 1))` and the two-pass target `ceil(n / k^2)`, floored at `min_run_size`.
///
/// Without an explicit budget the tuner takes `ram_ratio` of the currently available system
/// memory, or `default_budget` when the available memory can not be determined.
#[derive(Debug, Clone)]
pub struct AutoTuner {
    min_run_size: usize,
    default_budget: u64,
    ram_ratio: Option<f64>,
}

impl AutoTuner {
    /// Creates a tuner with a fixed fallback budget and system memory detection disabled.
    pub fn new(min_run_size: usize, default_budget: u64) -> Self {
        AutoTuner {
            min_run_size: min_run_size.max(1),
            default_budget,
            ram_ratio: None,
        }
    }

    /// Enables system memory detection: the budget becomes `ratio` of the available memory.
    pub fn with_ram_ratio(mut self, ratio: f64) -> Self {
        self.ram_ratio = Some(ratio);
        return self;
    }

    /// Available system memory in bytes, [`None`] if the platform does not report it.
    pub fn available_memory() -> Option<u64> {
        let mut system = System::new();
        system.refresh_memory();

        Some(system.available_memory()).filter(|available| *available > 0)
    }

    /// Resolves the memory budget: the explicit one, a share of the available memory, or the fallback.
    pub fn memory_budget(&self, memory_budget: Option<u64>) -> Result<u64, SortError> {
        if let Some(budget) = memory_budget {
            return Ok(budget);
        }
        let ratio = match self.ram_ratio {
            Some(ratio) if ratio > 0.0 && ratio <= 1.0 => ratio,
            Some(ratio) => {
                return Err(SortError::Configuration(format!(
                    "memory ratio must be in (0, 1], got {}",
                    ratio
                )))
            }
            None => return Ok(self.default_budget),
        };

        match Self::available_memory() {
            Some(available) => {
                let budget = (available as f64 * ratio) as u64;
                log::debug!("{} bytes of memory available, budget: {} bytes", available, budget);
                Ok(budget)
            }
            None => {
                log::warn!(
                    "available memory unknown, falling back to {} bytes budget",
                    self.default_budget
                );
                Ok(self.default_budget)
            }
        }
    }

    /// Fan-in step function over the input size.
    pub fn choose_fan_in(input_size: u64) -> usize {
        let fan_in = if input_size < 50 * MB {
            6
        } else if input_size < 200 * MB {
            8
        } else if input_size < 500 * MB {
            12
        } else if input_size < 2048 * MB {
            16
        } else {
            24
        };

        fan_in.clamp(MIN_FAN_IN, MAX_FAN_IN)
    }

    fn memory_bound(budget: u64, fan_in: usize) -> u64 {
        budget / buffer_width(fan_in)
    }
}

impl Default for AutoTuner {
    fn default() -> Self {
        AutoTuner::new(MIN_RUN_SIZE, DEFAULT_MEMORY_BUDGET).with_ram_ratio(DEFAULT_RAM_RATIO)
    }
}

impl Tuner for AutoTuner {
    fn tune(
        &self,
        input_size: u64,
        memory_budget: Option<u64>,
        fan_in: Option<usize>,
    ) -> Result<SortParams, SortError> {
        let budget = self.memory_budget(memory_budget)?;
        let records = input_size / RECORD_WIDTH as u64;
        let min_run_size = self.min_run_size as u64;

        // smallest valid configuration: a two-way merge of minimal runs
        let required = memory_required(min_run_size, 2);
        if budget < required {
            return Err(SortError::Resource { budget, required });
        }

        let fixed = fan_in.is_some();
        let mut fan_in = match fan_in {
            Some(fan_in) if fan_in < 2 => {
                return Err(SortError::Configuration(format!(
                    "fan-in must be at least 2, got {}",
                    fan_in
                )))
            }
            Some(fan_in) => fan_in,
            None => Self::choose_fan_in(input_size),
        };

        // a floored run must still fit next to k + 1 buffers
        while !fixed && fan_in > 2 && Self::memory_bound(budget, fan_in) < min_run_size {
            fan_in -= 1;
        }

        let memory_bound = Self::memory_bound(budget, fan_in);
        if memory_bound < min_run_size {
            return Err(SortError::Resource {
                budget,
                required: memory_required(min_run_size, fan_in),
            });
        }

        let k = fan_in as u64;
        let target = records.div_ceil(k.saturating_mul(k)).max(1);
        let run_size = memory_bound.min(target).max(min_run_size);

        let params = SortParams {
            run_size: usize::try_from(run_size).unwrap_or(usize::MAX),
            fan_in,
        };

        log::debug!(
            "tuned parameters (input: {} bytes, budget: {} bytes, run size: {}, fan-in: {})",
            input_size,
            budget,
            params.run_size,
            params.fan_in
        );

        return Ok(params);
    }
}
