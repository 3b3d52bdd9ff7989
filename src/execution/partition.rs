use smallvec::SmallVec;

/// Fixed batch size target. The partition depends on `paths` alone, never on
/// how many workers run it, which is what makes results independent of pool size.
pub const PATHS_PER_BATCH: usize = 1_000;

/// One independent unit of work. Stack-allocated, Copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSpec {
    pub index: usize,
    pub size: usize,
    pub seed: u64,
}

pub type BatchPlan = SmallVec<[BatchSpec; 16]>;

/// Split `paths` into B = ceil(paths / PATHS_PER_BATCH) batches whose sizes
/// differ by at most one. The first `paths % B` batches take the extra path.
pub fn partition(paths: usize, global_seed: u64) -> BatchPlan {
    partition_with(paths, PATHS_PER_BATCH, global_seed)
}

pub fn partition_with(paths: usize, per_batch: usize, global_seed: u64) -> BatchPlan {
    let mut plan = BatchPlan::new();
    if paths == 0 {
        return plan;
    }
    let per_batch = per_batch.max(1);
    let count = paths.div_ceil(per_batch);
    let base = paths / count;
    let rem = paths % count;

    for index in 0..count {
        plan.push(BatchSpec {
            index,
            size: if index < rem { base + 1 } else { base },
            seed: batch_seed(global_seed, index),
        });
    }
    plan
}

/// Stream seed for a batch: splitmix64 over (global_seed, index).
/// Pure, so a retried batch replays the identical sample.
#[inline]
pub fn batch_seed(global_seed: u64, index: usize) -> u64 {
    let stream = splitmix64((index as u64).wrapping_add(1));
    splitmix64(global_seed ^ stream)
}

#[inline]
fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes_cover_paths() {
        for paths in [1, 999, 1_000, 1_001, 10_000, 12_345] {
            let plan = partition(paths, 7);
            let total: usize = plan.iter().map(|b| b.size).sum();
            assert_eq!(total, paths, "paths={paths}");
            assert_eq!(plan.len(), paths.div_ceil(PATHS_PER_BATCH));
            let max = plan.iter().map(|b| b.size).max().unwrap();
            let min = plan.iter().map(|b| b.size).min().unwrap();
            assert!(max - min <= 1, "sizes must be near-equal: {min}..{max}");
            assert!(max <= PATHS_PER_BATCH);
        }
    }

    #[test]
    fn test_indices_sequential() {
        let plan = partition(5_500, 1);
        for (i, b) in plan.iter().enumerate() {
            assert_eq!(b.index, i);
        }
    }

    #[test]
    fn test_seeds_distinct_and_stable() {
        let a = partition(10_000, 42);
        let b = partition(10_000, 42);
        assert_eq!(a, b);
        let mut seeds: Vec<u64> = a.iter().map(|s| s.seed).collect();
        seeds.sort_unstable();
        seeds.dedup();
        assert_eq!(seeds.len(), a.len());
        assert_ne!(partition(10_000, 43)[0].seed, a[0].seed);
    }

    #[test]
    fn test_empty() {
        assert!(partition(0, 1).is_empty());
    }
}
