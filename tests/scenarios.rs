use crossbeam_utils::thread;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use sync_set_bench::bench::{initial_sample, key_cmp, partition, run_workers, BenchError, Job};
use sync_set_bench::ds_impl::{CoarseGrainedSet, ConcurrentSet, OptimisticSet};

const SAMPLE: usize = 2000;

fn counters() -> Vec<AtomicUsize> {
    (0..SAMPLE).map(|_| AtomicUsize::new(0)).collect()
}

fn eight_writers<S: ConcurrentSet<usize> + Sync>() {
    let set = S::new(key_cmp);
    let sample = initial_sample(SAMPLE);
    let jobs: Vec<Job> = partition(&sample, 8, &mut StdRng::seed_from_u64(0), false)
        .into_iter()
        .map(Job::writer)
        .collect();
    run_workers(&set, &jobs, None, |_| Ok(())).unwrap();

    for key in &sample {
        assert!(set.contains(key).unwrap(), "missing {}", key);
    }
    assert_eq!(set.len().unwrap(), SAMPLE);
}

fn eight_readers<S: ConcurrentSet<usize> + Sync>() {
    let set = S::new(key_cmp);
    let sample = initial_sample(SAMPLE);
    let counters = counters();
    let jobs: Vec<Job> = partition(&sample, 8, &mut StdRng::seed_from_u64(0), false)
        .into_iter()
        .map(Job::reader)
        .collect();
    run_workers(&set, &jobs, Some(&counters), |set| {
        for &key in &sample {
            if !set.add(key)? {
                return Err(BenchError::DuplicateAdd(key));
            }
        }
        Ok(())
    })
    .unwrap();

    assert!(counters.iter().all(|c| c.load(Ordering::Relaxed) == 1));
    for key in &sample {
        assert!(!set.contains(key).unwrap());
    }
    assert!(set.is_empty().unwrap());
}

fn four_writers_four_readers<S: ConcurrentSet<usize> + Sync>(random_partition: bool) {
    let set = S::new(key_cmp);
    let sample = initial_sample(SAMPLE);
    let counters = counters();
    let rng = &mut StdRng::seed_from_u64(1);
    let jobs: Vec<Job> = partition(&sample, 4, rng, random_partition)
        .into_iter()
        .map(Job::reader)
        .chain(
            partition(&sample, 4, rng, random_partition)
                .into_iter()
                .map(Job::writer),
        )
        .collect();
    run_workers(&set, &jobs, Some(&counters), |_| Ok(())).unwrap();

    for (key, counter) in counters.iter().enumerate() {
        assert_eq!(counter.load(Ordering::Relaxed), 1, "key {}", key);
    }
    assert!(set.is_empty().unwrap());
}

fn idempotent_rejection<S: ConcurrentSet<usize>>() {
    let set = S::new(key_cmp);
    for key in [5, 1, 9] {
        assert!(set.add(key).unwrap());
    }
    assert!(!set.add(5).unwrap());
    assert_eq!(set.len().unwrap(), 3);
    assert!(!set.remove(&4).unwrap());
    assert_eq!(set.len().unwrap(), 3);
    assert!(set.contains(&1).unwrap() && set.contains(&5).unwrap() && set.contains(&9).unwrap());
}

/// A reader that sees a key must never stop seeing it while nobody removes it, and a removed key
/// must stay gone while nobody adds it back.
fn visibility<S: ConcurrentSet<usize> + Sync>() {
    let set = &S::new(key_cmp);
    let done = &AtomicBool::new(false);
    for key in (0..SAMPLE).step_by(2) {
        assert!(set.add(key).unwrap());
    }

    thread::scope(|s| {
        // Churn on odd keys only.
        for t in 0..4 {
            s.spawn(move |_| {
                for round in 0..20 {
                    for key in (1..SAMPLE).step_by(2).skip(t).step_by(4) {
                        if round % 2 == 0 {
                            assert!(set.add(key).unwrap());
                        } else {
                            assert!(set.remove(&key).unwrap());
                        }
                    }
                }
            });
        }
        for _ in 0..4 {
            s.spawn(move |_| {
                while !done.load(Ordering::Acquire) {
                    for key in (0..SAMPLE).step_by(2) {
                        assert!(set.contains(&key).unwrap());
                    }
                    assert!(!set.contains(&SAMPLE).unwrap());
                }
            });
        }
        s.spawn(move |_| {
            std::thread::sleep(std::time::Duration::from_millis(200));
            done.store(true, Ordering::Release);
        });
    })
    .unwrap();

    assert_eq!(set.len().unwrap(), SAMPLE / 2);
}

#[test]
fn eight_writers_coarse_grained() {
    eight_writers::<CoarseGrainedSet<usize>>();
}

#[test]
fn eight_writers_optimistic() {
    eight_writers::<OptimisticSet<usize>>();
}

#[test]
fn eight_readers_coarse_grained() {
    eight_readers::<CoarseGrainedSet<usize>>();
}

#[test]
fn eight_readers_optimistic() {
    eight_readers::<OptimisticSet<usize>>();
}

#[test]
fn four_writers_four_readers_coarse_grained() {
    four_writers_four_readers::<CoarseGrainedSet<usize>>(false);
    four_writers_four_readers::<CoarseGrainedSet<usize>>(true);
}

#[test]
fn four_writers_four_readers_optimistic() {
    four_writers_four_readers::<OptimisticSet<usize>>(false);
    four_writers_four_readers::<OptimisticSet<usize>>(true);
}

#[test]
fn idempotent_rejection_both() {
    idempotent_rejection::<CoarseGrainedSet<usize>>();
    idempotent_rejection::<OptimisticSet<usize>>();
}

#[test]
fn visibility_coarse_grained() {
    visibility::<CoarseGrainedSet<usize>>();
}

#[test]
fn visibility_optimistic() {
    visibility::<OptimisticSet<usize>>();
}

#[test]
fn optimistic_retains_removed_nodes() {
    let mut set = OptimisticSet::new(key_cmp);
    let sample = initial_sample(SAMPLE);
    let jobs: Vec<Job> = partition(&sample, 4, &mut StdRng::seed_from_u64(0), true)
        .into_iter()
        .map(Job::reader)
        .collect();
    run_workers(&set, &jobs, None, |set| {
        for &key in &sample {
            set.add(key)?;
        }
        Ok(())
    })
    .unwrap();
    assert_eq!(set.retired_len(), SAMPLE);
    assert_eq!(set.purge_retired(), SAMPLE);
    assert!(set.is_empty().unwrap());
}
