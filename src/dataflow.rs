//! # In-Process Dataflow
//!
//! A minimal keyed data-parallel collection standing in for the
//! distributed substrate: pairs are sharded across partitions, pure
//! transformations run per-partition on the rayon pool, and the keyed
//! combinators (`group_by_key`, `cogroup`, `reduce_by_key`) shuffle
//! pairs to the partition their key maps to before combining. A
//! shuffle completes before its output can be read, so every call
//! boundary is a synchronization barrier.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use rayon::prelude::*;

/// Deterministic, total assignment of keys to worker partitions
pub trait Partitioner<K>: Send + Sync {
    fn num_partitions(&self) -> usize;
    /// Must return a value in `[0, num_partitions)`.
    fn partition(&self, key: &K) -> usize;
}

/// Partitioned in-memory collection of key-value pairs
#[derive(Debug, Clone)]
pub struct KeyedVec<K, V> {
    parts: Arc<Vec<Vec<(K, V)>>>,
    parallel: bool,
}

fn per_partition<A, B, F>(parallel: bool, parts: Vec<A>, f: F) -> Vec<B>
where
    A: Send,
    B: Send,
    F: Fn(A) -> B + Send + Sync,
{
    if parallel {
        parts.into_par_iter().map(f).collect()
    } else {
        parts.into_iter().map(f).collect()
    }
}

impl<K, V> KeyedVec<K, V>
where
    K: Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    /// Shard `pairs` round-robin over `num_partitions` shards. Key
    /// affinity is only established later, by the first shuffle.
    pub fn from_pairs(pairs: Vec<(K, V)>, num_partitions: usize, parallel: bool) -> Self {
        let n = num_partitions.max(1);
        let mut parts: Vec<Vec<(K, V)>> = (0..n).map(|_| Vec::new()).collect();
        for (i, pair) in pairs.into_iter().enumerate() {
            parts[i % n].push(pair);
        }
        Self {
            parts: Arc::new(parts),
            parallel,
        }
    }

    pub fn partition_count(&self) -> usize {
        self.parts.len()
    }

    pub fn len(&self) -> usize {
        self.parts.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.iter().all(Vec::is_empty)
    }

    pub fn parallel(&self) -> bool {
        self.parallel
    }

    /// Gather every pair onto the calling host.
    pub fn collect(&self) -> Vec<(K, V)> {
        self.parts.iter().flatten().cloned().collect()
    }

    /// The collection is already materialized and shared by reference,
    /// so marking it cached is a cheap handle clone.
    pub fn cache(&self) -> Self {
        self.clone()
    }

    /// Alias of [`KeyedVec::cache`].
    pub fn persist(&self) -> Self {
        self.cache()
    }

    fn run<T, F>(&self, f: F) -> Vec<Vec<T>>
    where
        T: Send,
        F: Fn(&[(K, V)]) -> Vec<T> + Send + Sync,
    {
        if self.parallel {
            self.parts.par_iter().map(|part| f(part)).collect()
        } else {
            self.parts.iter().map(|part| f(part)).collect()
        }
    }

    pub fn map<K2, V2, F>(&self, f: F) -> KeyedVec<K2, V2>
    where
        K2: Send,
        V2: Send,
        F: Fn(&K, &V) -> (K2, V2) + Send + Sync,
    {
        let parts = self.run(|part| part.iter().map(|(k, v)| f(k, v)).collect());
        KeyedVec {
            parts: Arc::new(parts),
            parallel: self.parallel,
        }
    }

    pub fn flat_map<K2, V2, F>(&self, f: F) -> KeyedVec<K2, V2>
    where
        K2: Send,
        V2: Send,
        F: Fn(&K, &V) -> Vec<(K2, V2)> + Send + Sync,
    {
        let parts = self.run(|part| part.iter().flat_map(|(k, v)| f(k, v)).collect());
        KeyedVec {
            parts: Arc::new(parts),
            parallel: self.parallel,
        }
    }

    /// Fallible [`KeyedVec::flat_map`]: the first error aborts the
    /// whole transformation.
    pub fn try_flat_map<K2, V2, F, E>(&self, f: F) -> Result<KeyedVec<K2, V2>, E>
    where
        K2: Send,
        V2: Send,
        E: Send,
        F: Fn(&K, &V) -> Result<Vec<(K2, V2)>, E> + Send + Sync,
    {
        let mapped = self.run(|part| {
            part.iter()
                .map(|(k, v)| f(k, v))
                .collect::<Vec<Result<Vec<(K2, V2)>, E>>>()
        });
        let mut parts = Vec::with_capacity(mapped.len());
        for partition in mapped {
            let mut out = Vec::new();
            for pairs in partition {
                out.extend(pairs?);
            }
            parts.push(out);
        }
        Ok(KeyedVec {
            parts: Arc::new(parts),
            parallel: self.parallel,
        })
    }

    /// Redistribute every pair to the partition its key maps to.
    fn shuffle<P>(&self, partitioner: &P) -> Vec<Vec<(K, V)>>
    where
        P: Partitioner<K> + ?Sized,
    {
        let n = partitioner.num_partitions();
        let bucketed: Vec<Vec<Vec<(K, V)>>> = self.run(|part| {
            let mut buckets: Vec<Vec<(K, V)>> = (0..n).map(|_| Vec::new()).collect();
            for (k, v) in part {
                buckets[partitioner.partition(k)].push((k.clone(), v.clone()));
            }
            buckets
        });
        let mut merged: Vec<Vec<(K, V)>> = (0..n).map(|_| Vec::new()).collect();
        for buckets in bucketed {
            for (target, bucket) in buckets.into_iter().enumerate() {
                merged[target].extend(bucket);
            }
        }
        merged
    }

    pub fn group_by_key<P>(&self, partitioner: &P) -> KeyedVec<K, Vec<V>>
    where
        K: Hash + Eq,
        P: Partitioner<K> + ?Sized,
    {
        let shuffled = self.shuffle(partitioner);
        let parts = per_partition(self.parallel, shuffled, |part| {
            let mut groups: HashMap<K, Vec<V>> = HashMap::new();
            for (k, v) in part {
                groups.entry(k).or_default().push(v);
            }
            groups.into_iter().collect::<Vec<_>>()
        });
        KeyedVec {
            parts: Arc::new(parts),
            parallel: self.parallel,
        }
    }

    /// Join-style grouping of two collections sharing a key space.
    /// Neither side is assumed to hold at most one value per key.
    pub fn cogroup<V2, P>(
        &self,
        other: &KeyedVec<K, V2>,
        partitioner: &P,
    ) -> KeyedVec<K, (Vec<V>, Vec<V2>)>
    where
        K: Hash + Eq,
        V2: Clone + Send + Sync,
        P: Partitioner<K> + ?Sized,
    {
        let left = self.shuffle(partitioner);
        let right = other.shuffle(partitioner);
        let zipped: Vec<(Vec<(K, V)>, Vec<(K, V2)>)> =
            left.into_iter().zip(right.into_iter()).collect();
        let parts = per_partition(self.parallel, zipped, |(lhs, rhs)| {
            let mut groups: HashMap<K, (Vec<V>, Vec<V2>)> = HashMap::new();
            for (k, v) in lhs {
                groups.entry(k).or_default().0.push(v);
            }
            for (k, v) in rhs {
                groups.entry(k).or_default().1.push(v);
            }
            groups.into_iter().collect::<Vec<_>>()
        });
        KeyedVec {
            parts: Arc::new(parts),
            parallel: self.parallel,
        }
    }

    /// Combine all values sharing a key with `f`, which must be
    /// associative and commutative: partial results may merge in any
    /// order and on any partition.
    pub fn reduce_by_key<P, F, E>(&self, partitioner: &P, f: F) -> Result<KeyedVec<K, V>, E>
    where
        K: Hash + Eq,
        P: Partitioner<K> + ?Sized,
        F: Fn(V, V) -> Result<V, E> + Send + Sync,
        E: Send,
    {
        let shuffled = self.shuffle(partitioner);
        let reduced = per_partition(self.parallel, shuffled, |part| {
            let mut acc: HashMap<K, V> = HashMap::new();
            for (k, v) in part {
                let merged = match acc.remove(&k) {
                    Some(prev) => f(prev, v)?,
                    None => v,
                };
                acc.insert(k, merged);
            }
            Ok(acc.into_iter().collect::<Vec<_>>())
        });
        let parts = reduced.into_iter().collect::<Result<Vec<_>, E>>()?;
        Ok(KeyedVec {
            parts: Arc::new(parts),
            parallel: self.parallel,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ModPartitioner {
        n: usize,
    }

    impl Partitioner<usize> for ModPartitioner {
        fn num_partitions(&self) -> usize {
            self.n
        }
        fn partition(&self, key: &usize) -> usize {
            key % self.n
        }
    }

    fn pairs() -> Vec<(usize, i64)> {
        vec![(0, 1), (1, 10), (2, 100), (0, 2), (1, 20), (0, 3)]
    }

    #[test]
    fn test_from_pairs_and_collect() {
        let kv = KeyedVec::from_pairs(pairs(), 3, true);
        assert_eq!(kv.partition_count(), 3);
        assert_eq!(kv.len(), 6);
        let mut collected = kv.collect();
        collected.sort();
        assert_eq!(
            collected,
            vec![(0, 1), (0, 2), (0, 3), (1, 10), (1, 20), (2, 100)]
        );
    }

    #[test]
    fn test_group_by_key_lands_on_key_partition() {
        let kv = KeyedVec::from_pairs(pairs(), 2, true);
        let grouped = kv.group_by_key(&ModPartitioner { n: 3 });
        assert_eq!(grouped.partition_count(), 3);
        let mut groups = grouped.collect();
        groups.sort_by_key(|(k, _)| *k);
        assert_eq!(groups.len(), 3);
        let mut zeros = groups[0].1.clone();
        zeros.sort();
        assert_eq!(zeros, vec![1, 2, 3]);
        assert_eq!(groups[2].1, vec![100]);
    }

    #[test]
    fn test_cogroup_keeps_one_sided_keys() {
        let left = KeyedVec::from_pairs(vec![(0usize, 1), (1, 2)], 2, false);
        let right = KeyedVec::from_pairs(vec![(1usize, "a"), (2, "b")], 3, false);
        let joined = left.cogroup(&right, &ModPartitioner { n: 2 });
        let mut out = joined.collect();
        out.sort_by_key(|(k, _)| *k);
        assert_eq!(out.len(), 3);
        assert_eq!(out[0], (0, (vec![1], vec![])));
        assert_eq!(out[1], (1, (vec![2], vec!["a"])));
        assert_eq!(out[2], (2, (vec![], vec!["b"])));
    }

    #[test]
    fn test_reduce_by_key_sums() {
        let kv = KeyedVec::from_pairs(pairs(), 4, true);
        let reduced = kv
            .reduce_by_key(&ModPartitioner { n: 2 }, |a, b| Ok::<_, ()>(a + b))
            .unwrap();
        let mut out = reduced.collect();
        out.sort_by_key(|(k, _)| *k);
        assert_eq!(out, vec![(0, 6), (1, 30), (2, 100)]);
    }

    #[test]
    fn test_reduce_by_key_propagates_error() {
        let kv = KeyedVec::from_pairs(vec![(0usize, 1), (0, 2)], 1, false);
        let out = kv.reduce_by_key(&ModPartitioner { n: 1 }, |_, _| Err("boom"));
        assert_eq!(out.err(), Some("boom"));
    }

    #[test]
    fn test_flat_map_and_cache() {
        let kv = KeyedVec::from_pairs(vec![(1usize, 2i64)], 2, true);
        let expanded = kv.flat_map(|k, v| (0..*v).map(|j| (k + j as usize, j)).collect());
        assert_eq!(expanded.len(), 2);
        let cached = expanded.cache();
        assert_eq!(cached.len(), expanded.len());
    }

    #[test]
    fn test_sequential_matches_parallel() {
        let par = KeyedVec::from_pairs(pairs(), 3, true);
        let seq = KeyedVec::from_pairs(pairs(), 3, false);
        let p = ModPartitioner { n: 2 };
        let mut a = par
            .reduce_by_key(&p, |x, y| Ok::<_, ()>(x + y))
            .unwrap()
            .collect();
        let mut b = seq
            .reduce_by_key(&p, |x, y| Ok::<_, ()>(x + y))
            .unwrap()
            .collect();
        a.sort();
        b.sort();
        assert_eq!(a, b);
    }
}
