use std::fs;
use std::io;
use std::path;
use std::process;

use bytesize::ByteSize;
use clap::ArgEnum;
use env_logger;
use log;

use ext_merge_sort::{
    check_sorted, AutoTuner, ExternalSorter, ExternalSorterBuilder, JsonLinesObserver, NoopObserver,
};

fn main() {
    let arg_parser = build_arg_parser();

    let log_level: LogLevel = arg_parser.value_of_t_or_exit("log_level");
    init_logger(log_level);

    let input = path::Path::new(arg_parser.value_of("input").expect("value is required"));
    let output = path::Path::new(arg_parser.value_of("output").expect("value is required"));
    let tmp_dir: Option<&str> = arg_parser.value_of("tmp_dir");
    let threads: Option<usize> = arg_parser
        .is_present("threads")
        .then(|| arg_parser.value_of_t_or_exit("threads"));
    let run_size: Option<usize> = arg_parser
        .is_present("run_size")
        .then(|| arg_parser.value_of_t_or_exit("run_size"));
    let fan_in: Option<usize> = arg_parser
        .is_present("fan_in")
        .then(|| arg_parser.value_of_t_or_exit("fan_in"));
    let memory: Option<u64> = arg_parser
        .value_of("memory")
        .map(|v| v.parse::<ByteSize>().expect("value is pre-validated").as_u64());
    let ram_ratio: Option<f64> = arg_parser
        .is_present("ram_ratio")
        .then(|| arg_parser.value_of_t_or_exit("ram_ratio"));

    let mut sorter_builder: ExternalSorterBuilder = ExternalSorterBuilder::new();
    if let Some(ram_ratio) = ram_ratio {
        sorter_builder = sorter_builder.with_tuner(AutoTuner::default().with_ram_ratio(ram_ratio));
    }
    if let Some(threads) = threads {
        sorter_builder = sorter_builder.with_threads_number(threads);
    }
    if let Some(tmp_dir) = tmp_dir {
        sorter_builder = sorter_builder.with_tmp_dir(path::Path::new(tmp_dir));
    }
    if let Some(run_size) = run_size {
        sorter_builder = sorter_builder.with_run_size(run_size);
    }
    if let Some(fan_in) = fan_in {
        sorter_builder = sorter_builder.with_fan_in(fan_in);
    }
    if let Some(memory) = memory {
        sorter_builder = sorter_builder.with_memory_limit(memory);
    }

    let sorter: ExternalSorter = match sorter_builder.build() {
        Ok(sorter) => sorter,
        Err(err) => {
            log::error!("sorter initialization error: {}", err);
            process::exit(1);
        }
    };

    let result = match arg_parser.value_of("events") {
        Some(events) => {
            let events_stream = match fs::File::create(events) {
                Ok(file) => io::BufWriter::new(file),
                Err(err) => {
                    log::error!("events file creation error: {}", err);
                    process::exit(1);
                }
            };
            let mut observer = JsonLinesObserver::new(events_stream, arg_parser.is_present("record_events"));
            let result = sorter.sort_with_observer(input, output, &mut observer);
            if let Err(err) = observer.into_inner() {
                log::error!("events saving error: {}", err);
                process::exit(1);
            }
            result
        }
        None => sorter.sort_with_observer(input, output, &mut NoopObserver),
    };

    let stats = match result {
        Ok(stats) => stats,
        Err(err) => {
            log::error!("data sorting error: {}", err);
            process::exit(1);
        }
    };
    log::info!(
        "{} records sorted (run size: {}, fan-in: {}, runs: {}, passes: {})",
        stats.records,
        stats.params.run_size,
        stats.params.fan_in,
        stats.initial_runs,
        stats.passes
    );

    if arg_parser.is_present("check") {
        match check_sorted(output) {
            Ok(None) => log::info!("output check passed"),
            Ok(Some(idx)) => {
                log::error!("output check failed: record {} is out of order", idx);
                process::exit(2);
            }
            Err(err) => {
                log::error!("output check error: {}", err);
                process::exit(1);
            }
        }
    }
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Self::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <LogLevel as clap::ArgEnum>::from_str(s, false)
    }
}

fn build_arg_parser() -> clap::ArgMatches {
    clap::App::new("ext-merge-sort")
        .about("external merge sort of f64 record files")
        .arg(
            clap::Arg::new("input")
                .short('i')
                .long("input")
                .help("file to be sorted")
                .required(true)
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("output")
                .short('o')
                .long("output")
                .help("result file")
                .required(true)
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("log_level")
                .short('l')
                .long("loglevel")
                .help("logging level")
                .takes_value(true)
                .default_value("info")
                .possible_values(LogLevel::possible_values()),
        )
        .arg(
            clap::Arg::new("threads")
                .short('t')
                .long("threads")
                .help("number of threads to use for parallel run sorting")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("tmp_dir")
                .short('d')
                .long("tmp-dir")
                .help("directory to be used to store temporary data")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("run_size")
                .short('r')
                .long("run-size")
                .help("number of records per initial run (tuned if omitted)")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("fan_in")
                .short('k')
                .long("fan-in")
                .help("maximum number of runs merged at once (tuned if omitted)")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("memory")
                .short('m')
                .long("memory")
                .help("memory budget used for tuning")
                .takes_value(true)
                .validator(|v| match v.parse::<ByteSize>() {
                    Ok(_) => Ok(()),
                    Err(err) => Err(format!("Memory size format incorrect: {}", err)),
                }),
        )
        .arg(
            clap::Arg::new("ram_ratio")
                .long("ram-ratio")
                .help("share of the available memory used for tuning when --memory is omitted")
                .takes_value(true)
                .conflicts_with("memory"),
        )
        .arg(
            clap::Arg::new("events")
                .short('e')
                .long("events")
                .help("file to stream sort events to as JSON lines")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("record_events")
                .long("record-events")
                .help("include per-record merge events in the events stream")
                .requires("events"),
        )
        .arg(
            clap::Arg::new("check")
                .short('c')
                .long("check")
                .help("verify the output order after sorting"),
        )
        .get_matches()
}

fn init_logger(log_level: LogLevel) {
    env_logger::Builder::new()
        .filter_level(match log_level {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        })
        .format_timestamp_millis()
        .init();
}
