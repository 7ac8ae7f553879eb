pub mod concurrent_set;

pub mod coarse_grained;
pub mod optimistic;
pub mod retired;

pub use self::concurrent_set::{Comparator, ConcurrentSet, SetError};

pub use self::coarse_grained::CoarseGrainedSet;
pub use self::optimistic::OptimisticSet;
