use super::{run_test, BenchError};
use crate::config::set::{BenchWriter, Config, SetKind, TableRow, Workload};
use crate::ds_impl::{CoarseGrainedSet, OptimisticSet};

use log::info;

/// Every `(writers, readers)` split with at least one of each and at most `limit` threads in
/// total, ordered by total then by writer count.
pub fn mixed_splits(limit: usize) -> impl Iterator<Item = (usize, usize)> {
    (2..=limit).flat_map(|sum| (1..sum).map(move |writers| (writers, sum - writers)))
}

fn measure(
    config: &Config,
    set: SetKind,
    workload: Workload,
    write_threads: usize,
    read_threads: usize,
    repeat: usize,
    random_partition: bool,
) -> Result<f64, BenchError> {
    let result = match set {
        SetKind::CoarseGrained => run_test::<CoarseGrainedSet<usize>>(
            config,
            workload,
            write_threads,
            read_threads,
            repeat,
            random_partition,
        ),
        SetKind::Optimistic => run_test::<OptimisticSet<usize>>(
            config,
            workload,
            write_threads,
            read_threads,
            repeat,
            random_partition,
        ),
    };
    result.map_err(|source| BenchError::Test {
        set,
        workload,
        source: Box::new(source),
    })
}

/// One pass over every workload and split, without timing output.
pub fn functionality_tests(config: &Config) -> Result<(), BenchError> {
    for workload in [Workload::Write, Workload::Read] {
        for set in [SetKind::CoarseGrained, SetKind::Optimistic] {
            measure(config, set, workload, 0, 0, 1, true)?;
        }
    }
    for (writers, readers) in mixed_splits(config.threads_limit) {
        for set in [SetKind::CoarseGrained, SetKind::Optimistic] {
            measure(config, set, Workload::Mixed, writers, readers, 1, true)?;
        }
    }
    info!("functionality tests passed");
    Ok(())
}

fn row(
    config: &Config,
    workload: Workload,
    write_threads: usize,
    read_threads: usize,
) -> Result<TableRow, BenchError> {
    let cell = |set, random_partition| {
        measure(
            config,
            set,
            workload,
            write_threads,
            read_threads,
            config.repeat,
            random_partition,
        )
    };
    Ok(TableRow {
        write_threads,
        read_threads,
        random_coarse_grained: cell(SetKind::CoarseGrained, true)?,
        even_coarse_grained: cell(SetKind::CoarseGrained, false)?,
        random_optimistic: cell(SetKind::Optimistic, true)?,
        even_optimistic: cell(SetKind::Optimistic, false)?,
    })
}

/// Prints the results table (pure write, pure read, then every mixed split) and appends each
/// row to `output`.
pub fn timed_tests(
    config: &Config,
    output: &mut BenchWriter,
) -> Result<Vec<TableRow>, BenchError> {
    let shapes = [
        (Workload::Write, config.write_threads, 0),
        (Workload::Read, 0, config.read_threads),
    ]
    .into_iter()
    .chain(
        mixed_splits(config.threads_limit)
            .map(|(writers, readers)| (Workload::Mixed, writers, readers)),
    );

    println!("{}", TableRow::header());
    let mut table = Vec::new();
    for (workload, writers, readers) in shapes {
        let row = row(config, workload, writers, readers)?;
        println!("{}", row);
        output.write_row(config, &row)?;
        table.push(row);
    }
    Ok(table)
}
