use rand::prelude::*;

/// The keys `0..n` in increasing order.
pub fn initial_sample(n: usize) -> Vec<usize> {
    (0..n).collect()
}

/// Splits `sample` into `parts` disjoint parts whose sizes differ by at most one.
///
/// Element `j` goes to part `j % parts`. With `random_partition` the assignment is shuffled, so
/// each part gets an arbitrary subset while keeping the relative order of the sample.
///
/// # Panics
///
/// Panics if `parts` is zero.
pub fn partition<R: Rng + ?Sized>(
    sample: &[usize],
    parts: usize,
    rng: &mut R,
    random_partition: bool,
) -> Vec<Vec<usize>> {
    assert!(parts > 0, "cannot partition into zero parts");
    let mut indexes: Vec<usize> = (0..sample.len()).map(|j| j % parts).collect();
    if random_partition {
        indexes.shuffle(rng);
    }
    let mut partition: Vec<Vec<usize>> = (0..parts)
        .map(|_| Vec::with_capacity(sample.len() / parts + 1))
        .collect();
    for (&key, &part) in sample.iter().zip(indexes.iter()) {
        partition[part].push(key);
    }
    partition
}
