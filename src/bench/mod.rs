//! Multi-threaded correctness and timing harness for the set implementations.

pub mod partition;
pub mod suite;
pub mod worker;

pub use self::partition::{initial_sample, partition};
pub use self::suite::{functionality_tests, mixed_splits, timed_tests};
pub use self::worker::{run_workers, Job, Role};

use crate::config::set::{Config, Order, SetKind, Workload};
use crate::ds_impl::{ConcurrentSet, SetError};

use log::error;
use rand::prelude::*;
use rand::rngs::StdRng;
use std::cmp::Ordering;
use std::sync::atomic::{self, AtomicUsize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BenchError {
    #[error(transparent)]
    Set(#[from] SetError),
    #[error("failed to add {0}: already present")]
    DuplicateAdd(usize),
    #[error("failed to remove {0}: not present")]
    MissingRemove(usize),
    #[error("missing: {0}")]
    Missing(usize),
    #[error("not empty: {0}")]
    NotEmpty(usize),
    #[error("{key} read {count} times")]
    ReadCount { key: usize, count: usize },
    #[error("{expected} nodes expected, {found} found")]
    Length { expected: usize, found: usize },
    #[error("cancelled")]
    Cancelled,
    #[error("worker panicked")]
    WorkerPanicked,
    #[error("{set} {workload} test failed: {source}")]
    Test {
        set: SetKind,
        workload: Workload,
        source: Box<BenchError>,
    },
    #[error("failed to write results: {0}")]
    Output(#[from] csv::Error),
}

pub fn key_cmp(a: &usize, b: &usize) -> Ordering {
    a.cmp(b)
}

fn check_len<S: ConcurrentSet<usize>>(set: &S, expected: usize) -> Result<(), BenchError> {
    let found = set.len()?;
    if found != expected {
        return Err(BenchError::Length { expected, found });
    }
    Ok(())
}

/// Writers add disjoint parts of the sample; afterwards every key must be present exactly once.
///
/// Returns the mean time of one repetition, in seconds.
pub fn write_test<S>(
    config: &Config,
    repeat: usize,
    random_partition: bool,
) -> Result<f64, BenchError>
where
    S: ConcurrentSet<usize> + Sync,
{
    let mut rng = StdRng::seed_from_u64(0);
    let mut sample = initial_sample(config.sample_size);
    let mut total = 0.0;
    for _ in 0..repeat {
        let set = S::new(key_cmp);
        if config.order == Order::Random {
            sample.shuffle(&mut rng);
        }
        let jobs: Vec<Job> = partition(&sample, config.write_threads, &mut rng, random_partition)
            .into_iter()
            .map(Job::writer)
            .collect();
        let elapsed = run_workers(&set, &jobs, None, |_| Ok(()))?;
        total += elapsed.as_secs_f64() / repeat as f64;

        for &key in &sample {
            if !set.contains(&key)? {
                error!("Missing: {}", key);
                return Err(BenchError::Missing(key));
            }
        }
        check_len(&set, sample.len())?;
    }
    Ok(total)
}

/// Readers remove disjoint parts of a pre-populated set; afterwards the set must be empty.
///
/// No per-key counters here: every key is present before the barrier, so a failed removal is
/// reported directly as [`BenchError::MissingRemove`].
pub fn read_test<S>(
    config: &Config,
    repeat: usize,
    random_partition: bool,
) -> Result<f64, BenchError>
where
    S: ConcurrentSet<usize> + Sync,
{
    let mut rng = StdRng::seed_from_u64(0);
    let mut sample = initial_sample(config.sample_size);
    let mut total = 0.0;
    for _ in 0..repeat {
        let set = S::new(key_cmp);
        if config.order == Order::Random {
            sample.shuffle(&mut rng);
        }
        let jobs: Vec<Job> = partition(&sample, config.read_threads, &mut rng, random_partition)
            .into_iter()
            .map(Job::reader)
            .collect();
        let elapsed = run_workers(&set, &jobs, None, |set| {
            for &key in &sample {
                if !set.add(key)? {
                    return Err(BenchError::DuplicateAdd(key));
                }
            }
            Ok(())
        })?;
        total += elapsed.as_secs_f64() / repeat as f64;

        for &key in &sample {
            if set.contains(&key)? {
                error!("Not empty: {}", key);
                return Err(BenchError::NotEmpty(key));
            }
        }
        check_len(&set, 0)?;
    }
    Ok(total)
}

/// Writers and retrying readers race over the same sample; every key must be removed exactly
/// once in aggregate.
///
/// # Panics
///
/// Panics if `write_threads` or `read_threads` is zero.
pub fn read_write_test<S>(
    config: &Config,
    write_threads: usize,
    read_threads: usize,
    repeat: usize,
    random_partition: bool,
) -> Result<f64, BenchError>
where
    S: ConcurrentSet<usize> + Sync,
{
    let mut rng = StdRng::seed_from_u64(0);
    let counters: Vec<AtomicUsize> =
        (0..config.sample_size).map(|_| AtomicUsize::new(0)).collect();
    let mut sample = initial_sample(config.sample_size);
    let mut total = 0.0;
    for _ in 0..repeat {
        let set = S::new(key_cmp);
        for counter in &counters {
            counter.store(0, atomic::Ordering::Relaxed);
        }
        if config.order == Order::Random {
            sample.shuffle(&mut rng);
        }
        let readers = partition(&sample, read_threads, &mut rng, random_partition);
        let writers = partition(&sample, write_threads, &mut rng, random_partition);
        let jobs: Vec<Job> = readers
            .into_iter()
            .map(Job::reader)
            .chain(writers.into_iter().map(Job::writer))
            .collect();
        let elapsed = run_workers(&set, &jobs, Some(&counters), |_| Ok(()))?;
        total += elapsed.as_secs_f64() / repeat as f64;

        for (key, counter) in counters.iter().enumerate() {
            let count = counter.load(atomic::Ordering::Relaxed);
            if count != 1 {
                error!("Error: {} read {} times!", key, count);
                return Err(BenchError::ReadCount { key, count });
            }
        }
        check_len(&set, 0)?;
    }
    Ok(total)
}

/// Runs one workload against set type `S`. `write_threads`/`read_threads` only matter for the
/// mixed workload; the pure ones use the configured counts.
///
/// # Panics
///
/// Panics if the thread count used by `workload` is zero. [`Config`] values built by
/// [`setup`](crate::config::set::setup) are always at least one.
pub fn run_test<S>(
    config: &Config,
    workload: Workload,
    write_threads: usize,
    read_threads: usize,
    repeat: usize,
    random_partition: bool,
) -> Result<f64, BenchError>
where
    S: ConcurrentSet<usize> + Sync,
{
    match workload {
        Workload::Write => write_test::<S>(config, repeat, random_partition),
        Workload::Read => read_test::<S>(config, repeat, random_partition),
        Workload::Mixed => {
            read_write_test::<S>(config, write_threads, read_threads, repeat, random_partition)
        }
    }
}
