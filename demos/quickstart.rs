use std::fs;
use std::path;

use env_logger;
use log;

use ext_merge_sort::{ExternalSorter, ExternalSorterBuilder, LogObserver};

fn main() {
    env_logger::Builder::new().filter_level(log::LevelFilter::Debug).init();

    let input: Vec<u8> = (0..100_000u32)
        .rev()
        .flat_map(|i| (i as f64 * 0.5).to_ne_bytes())
        .collect();
    fs::write("input.bin", input).unwrap();

    let sorter: ExternalSorter = ExternalSorterBuilder::new()
        .with_tmp_dir(path::Path::new("./"))
        .with_run_size(10_000)
        .with_fan_in(4)
        .build()
        .unwrap();

    let stats = sorter
        .sort_with_observer(path::Path::new("input.bin"), path::Path::new("output.bin"), &mut LogObserver)
        .unwrap();

    println!(
        "sorted {} records: {} runs, {} merge passes",
        stats.records, stats.initial_runs, stats.passes
    );
}
