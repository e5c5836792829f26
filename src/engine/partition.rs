//! Batch partitioning.
//!
//! A selection of items is split into chunks, one task per chunk. Items whose
//! operation would produce the same destination are always kept in one chunk
//! so that a single worker handles them in order.

use std::collections::HashMap;
use std::hash::Hash;

/// Ordered items handled by exactly one task.
pub type Chunk<I> = Vec<I>;

/// Default upper bound on items per chunk.
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 5;

/// Worker count derived from the logical CPUs
///
/// `thread_percentage` is applied to the number of logical CPUs. The result is
/// always at least 1. An explicit thread limit bypasses this entirely.
pub fn calculate_optimal_workers(thread_percentage: u8) -> usize {
    let available_cores = num_cpus::get();
    std::cmp::max(1, (available_cores * thread_percentage as usize) / 100)
}

/// Splits selections into chunks for a given parallelism.
#[derive(Debug, Clone, Copy)]
pub struct Partitioner {
    parallelism: usize,
    max_chunk_size: usize,
}

impl Partitioner {
    /// `parallelism = min(item_count, max_threads)`, never below 1.
    pub fn new(item_count: usize, max_threads: usize, max_chunk_size: usize) -> Self {
        Self {
            parallelism: item_count.min(max_threads).max(1),
            max_chunk_size: max_chunk_size.max(1),
        }
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    pub fn max_chunk_size(&self) -> usize {
        self.max_chunk_size
    }

    /// Default policy: roughly equal chunks over the full parallelism budget.
    pub fn split<I>(&self, items: Vec<I>) -> Vec<Chunk<I>> {
        self.split_with_budget(items, self.parallelism)
    }

    /// Collision-aware policy.
    ///
    /// Every set of two or more items sharing a destination key becomes one
    /// chunk, in selection order and regardless of the size cap. Items without
    /// a key, or with a unique key, are split over the remaining budget.
    pub fn split_by_destination<I, K, F>(&self, items: Vec<I>, destination: F) -> Vec<Chunk<I>>
    where
        K: Eq + Hash,
        F: Fn(&I) -> Option<K>,
    {
        let keys: Vec<Option<K>> = items.iter().map(&destination).collect();

        let mut occurrences: HashMap<&K, usize> = HashMap::new();
        for key in keys.iter().flatten() {
            *occurrences.entry(key).or_insert(0) += 1;
        }

        let mut group_index: HashMap<&K, usize> = HashMap::new();
        let mut groups: Vec<Chunk<I>> = Vec::new();
        let mut independent = Vec::new();

        for (item, key) in items.into_iter().zip(keys.iter()) {
            match key {
                Some(key) if occurrences.get(key).copied().unwrap_or(0) > 1 => {
                    let index = *group_index.entry(key).or_insert_with(|| {
                        groups.push(Vec::new());
                        groups.len() - 1
                    });
                    groups[index].push(item);
                }
                _ => independent.push(item),
            }
        }

        if !groups.is_empty() {
            tracing::debug!(
                "{} destination collision group(s), {} independent item(s)",
                groups.len(),
                independent.len()
            );
        }

        let leftover_budget = self.parallelism.saturating_sub(groups.len()).max(1);
        groups.extend(self.split_with_budget(independent, leftover_budget));
        groups
    }

    fn split_with_budget<I>(&self, items: Vec<I>, budget: usize) -> Vec<Chunk<I>> {
        if items.is_empty() {
            return Vec::new();
        }

        let chunk_size = items
            .len()
            .div_ceil(budget.max(1))
            .clamp(1, self.max_chunk_size);

        let mut chunks = Vec::with_capacity(items.len().div_ceil(chunk_size));
        let mut current = Vec::with_capacity(chunk_size);
        for item in items {
            current.push(item);
            if current.len() == chunk_size {
                chunks.push(std::mem::replace(&mut current, Vec::with_capacity(chunk_size)));
            }
        }
        if !current.is_empty() {
            chunks.push(current);
        }
        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flatten_sorted(chunks: &[Chunk<usize>]) -> Vec<usize> {
        let mut all: Vec<usize> = chunks.iter().flatten().copied().collect();
        all.sort_unstable();
        all
    }

    #[test]
    fn test_optimal_workers_calculation() {
        assert!(calculate_optimal_workers(75) >= 1);
        assert_eq!(calculate_optimal_workers(100), num_cpus::get().max(1));
        assert_eq!(calculate_optimal_workers(0), 1);
        assert!(calculate_optimal_workers(50) <= calculate_optimal_workers(100));
    }

    #[test]
    fn test_parallelism_bounded_by_items_and_threads() {
        assert_eq!(Partitioner::new(3, 8, 5).parallelism(), 3);
        assert_eq!(Partitioner::new(30, 8, 5).parallelism(), 8);
        assert_eq!(Partitioner::new(0, 8, 5).parallelism(), 1);
        assert_eq!(Partitioner::new(4, 4, 0).max_chunk_size(), 1);
    }

    #[test]
    fn test_split_even_chunks() {
        let partitioner = Partitioner::new(8, 4, 5);
        let chunks = partitioner.split((0..8).collect());
        assert_eq!(chunks, vec![vec![0, 1], vec![2, 3], vec![4, 5], vec![6, 7]]);
    }

    #[test]
    fn test_split_respects_chunk_cap() {
        let partitioner = Partitioner::new(40, 2, 5);
        let chunks = partitioner.split((0..40).collect());
        assert_eq!(chunks.len(), 8);
        assert!(chunks.iter().all(|chunk| chunk.len() == 5));
        assert_eq!(flatten_sorted(&chunks), (0..40).collect::<Vec<_>>());
    }

    #[test]
    fn test_split_empty_selection() {
        let partitioner = Partitioner::new(0, 4, 5);
        assert!(partitioner.split(Vec::<usize>::new()).is_empty());
        assert!(
            partitioner
                .split_by_destination(Vec::<usize>::new(), |i| Some(*i))
                .is_empty()
        );
    }

    #[test]
    fn test_colliding_items_share_a_chunk() {
        // Destination is the value modulo 10, so 3, 13 and 23 collide.
        let items: Vec<usize> = vec![3, 1, 13, 2, 23, 4, 5, 6, 7, 8, 9, 10];
        for threads in 1..=8 {
            for cap in 1..=6 {
                let partitioner = Partitioner::new(items.len(), threads, cap);
                let chunks = partitioner.split_by_destination(items.clone(), |i| Some(i % 10));

                let holder: Vec<_> = chunks.iter().filter(|chunk| chunk.contains(&3)).collect();
                assert_eq!(holder.len(), 1);
                assert!(holder[0].contains(&13) && holder[0].contains(&23));

                // 10 has no partner and stays an independent item.
                let zero_holder: Vec<_> = chunks.iter().filter(|chunk| chunk.contains(&10)).collect();
                assert_eq!(zero_holder.len(), 1);

                let mut expected = items.clone();
                expected.sort_unstable();
                assert_eq!(flatten_sorted(&chunks), expected);
            }
        }
    }

    #[test]
    fn test_collision_group_keeps_selection_order_and_ignores_cap() {
        let items = vec!["a/x.iso", "b/x.iso", "c/y.iso", "d/x.iso"];
        let partitioner = Partitioner::new(items.len(), 4, 1);
        let chunks = partitioner.split_by_destination(items, |path| path.rsplit('/').next().map(str::to_string));

        assert_eq!(chunks[0], vec!["a/x.iso", "b/x.iso", "d/x.iso"]);
        assert_eq!(chunks[1], vec!["c/y.iso"]);
    }

    #[test]
    fn test_items_without_destination_are_independent() {
        let items: Vec<usize> = (0..6).collect();
        let partitioner = Partitioner::new(items.len(), 3, 5);
        let chunks = partitioner.split_by_destination(items, |_| None::<usize>);
        assert_eq!(chunks.len(), 3);
        assert_eq!(flatten_sorted(&chunks), (0..6).collect::<Vec<_>>());
    }
}
