use super::BenchError;
use crate::ds_impl::ConcurrentSet;

use crossbeam_utils::thread::scope;
use log::{debug, error};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

/// How long a retrying reader spins before it yields and checks for cancellation.
pub const HUNGER_TIME: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Adds every key of its part.
    Writer,
    /// Removes every key of its part.
    Reader,
}

#[derive(Debug, Clone)]
pub struct Job {
    pub role: Role,
    pub keys: Vec<usize>,
}

impl Job {
    pub fn writer(keys: Vec<usize>) -> Self {
        Self {
            role: Role::Writer,
            keys,
        }
    }

    pub fn reader(keys: Vec<usize>) -> Self {
        Self {
            role: Role::Reader,
            keys,
        }
    }
}

/// State shared by the coordinator and the workers of one run.
struct Control<'a> {
    barrier: Barrier,
    cancel: AtomicBool,
    errors: AtomicUsize,
    /// Per-key removal counts. When present, readers retry until their key shows up.
    counters: Option<&'a [AtomicUsize]>,
}

impl<'a> Control<'a> {
    fn new(workers: usize, counters: Option<&'a [AtomicUsize]>) -> Self {
        Self {
            barrier: Barrier::new(workers + 1),
            cancel: AtomicBool::new(false),
            errors: AtomicUsize::new(0),
            counters,
        }
    }

    #[inline]
    fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    /// Cancellation point.
    #[inline]
    fn check(&self) -> Result<(), BenchError> {
        if self.cancel.load(Ordering::Acquire) {
            Err(BenchError::Cancelled)
        } else {
            Ok(())
        }
    }
}

fn write<S: ConcurrentSet<usize>>(
    set: &S,
    keys: &[usize],
    ctl: &Control,
) -> Result<(), BenchError> {
    for &key in keys {
        ctl.check()?;
        if !set.add(key)? {
            return Err(BenchError::DuplicateAdd(key));
        }
    }
    Ok(())
}

fn read<S: ConcurrentSet<usize>>(
    set: &S,
    keys: &[usize],
    ctl: &Control,
) -> Result<(), BenchError> {
    for &key in keys {
        ctl.check()?;
        match ctl.counters {
            None => {
                if !set.remove(&key)? {
                    return Err(BenchError::MissingRemove(key));
                }
            }
            Some(counters) => {
                // The key may not have been added yet. Spin on it without a retry cap.
                let mut start = Instant::now();
                while !set.remove(&key)? {
                    if start.elapsed() >= HUNGER_TIME {
                        ctl.check()?;
                        thread::yield_now();
                        start = Instant::now();
                    }
                }
                counters[key].fetch_add(1, Ordering::Relaxed);
            }
        }
    }
    Ok(())
}

/// Runs `jobs` on one thread each against `set` and returns the wall-clock time from the barrier
/// release until every worker is done.
///
/// `prefill` runs on the calling thread after the workers are spawned and before they are
/// released; it is not timed. The first worker error cancels all the others. If `prefill`
/// panics, the workers are cancelled and joined before the panic resumes.
pub fn run_workers<S, F>(
    set: &S,
    jobs: &[Job],
    counters: Option<&[AtomicUsize]>,
    prefill: F,
) -> Result<Duration, BenchError>
where
    S: ConcurrentSet<usize> + Sync,
    F: FnOnce(&S) -> Result<(), BenchError>,
{
    let ctl = &Control::new(jobs.len(), counters);
    let (sender, receiver) = mpsc::channel();

    let outcome = scope(|s| {
        for job in jobs {
            let sender = sender.clone();
            s.spawn(move |_| {
                let _cancel_on_panic = scopeguard::guard_on_unwind((), |_| ctl.cancel());
                ctl.barrier.wait();
                let result = match job.role {
                    Role::Writer => write(set, &job.keys, ctl),
                    Role::Reader => read(set, &job.keys, ctl),
                };
                if result.is_err() {
                    ctl.errors.fetch_add(1, Ordering::AcqRel);
                    ctl.cancel();
                }
                // The coordinator only stops listening once every sender is gone.
                let _ = sender.send(result);
            });
        }
        drop(sender);

        let prefilled = {
            // A panicking prefill must still release the workers parked on the barrier.
            let _release = scopeguard::guard_on_unwind((), |_| {
                ctl.cancel();
                ctl.barrier.wait();
            });
            prefill(set)
        };
        if prefilled.is_err() {
            // Workers still pass the barrier, then stop at their first cancellation point.
            ctl.cancel();
        }

        let start = Instant::now();
        ctl.barrier.wait();
        let mut failure = prefilled.err();
        for result in receiver.iter() {
            if let Err(e) = result {
                ctl.cancel();
                // Keep the root cause rather than the cancellations it triggered.
                if failure
                    .as_ref()
                    .map_or(true, |f| matches!(f, BenchError::Cancelled))
                {
                    failure = Some(e);
                }
            }
        }
        (start.elapsed(), failure)
    });

    let (elapsed, failure) = outcome.map_err(|_| {
        error!("a worker panicked");
        BenchError::WorkerPanicked
    })?;
    match failure {
        Some(e) => {
            error!(
                "{} of {} workers failed, first error: {}",
                ctl.errors.load(Ordering::Acquire),
                jobs.len(),
                e
            );
            Err(e)
        }
        None => {
            debug!("{} workers finished in {:?}", jobs.len(), elapsed);
            Ok(elapsed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{run_workers, Job};
    use crate::bench::{key_cmp, BenchError};
    use crate::ds_impl::{CoarseGrainedSet, ConcurrentSet, OptimisticSet};
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn duplicate_add_cancels_siblings() {
        let set = OptimisticSet::new(key_cmp);
        // Both writers own key 0; exactly one of them must fail.
        let jobs = vec![
            Job::writer(vec![0, 1, 2]),
            Job::writer(vec![0, 3, 4]),
            Job::writer((100..5000).collect()),
        ];
        let result = run_workers(&set, &jobs, None, |_| Ok(()));
        assert!(matches!(result, Err(BenchError::DuplicateAdd(0))));
    }

    #[test]
    fn missing_remove_is_reported() {
        let set = CoarseGrainedSet::new(key_cmp);
        let jobs = vec![Job::reader(vec![1, 2, 3])];
        let result = run_workers(&set, &jobs, None, |set| {
            set.add(1)?;
            set.add(3)?;
            Ok(())
        });
        assert!(matches!(result, Err(BenchError::MissingRemove(2))));
    }

    #[test]
    fn prefill_failure_releases_workers() {
        let set = CoarseGrainedSet::new(key_cmp);
        let jobs = vec![Job::writer(vec![1]), Job::writer(vec![2])];
        let result = run_workers(&set, &jobs, None, |_| Err(BenchError::NotEmpty(9)));
        assert!(matches!(result, Err(BenchError::NotEmpty(9))));
    }

    #[test]
    fn panicking_prefill_releases_workers() {
        let set = CoarseGrainedSet::new(key_cmp);
        let jobs = vec![Job::writer(vec![1, 2]), Job::reader(vec![3])];
        let result = catch_unwind(AssertUnwindSafe(|| {
            run_workers(&set, &jobs, None, |set| {
                assert!(set.add(1)?);
                assert!(set.add(1)?, "duplicate prefill");
                Ok(())
            })
        }));
        assert!(result.is_err());
        // Workers were cancelled before touching the set.
        assert_eq!(set.len().unwrap(), 1);
    }

    #[test]
    fn retrying_readers_wait_for_writers() {
        let set = OptimisticSet::new(key_cmp);
        let counters: Vec<AtomicUsize> = (0..100).map(|_| AtomicUsize::new(0)).collect();
        let jobs = vec![
            Job::reader((0..100).rev().collect()),
            Job::writer((0..100).collect()),
        ];
        run_workers(&set, &jobs, Some(&counters), |_| Ok(())).unwrap();
        assert!(counters.iter().all(|c| c.load(Ordering::Relaxed) == 1));
        assert!(set.is_empty().unwrap());
    }
}
