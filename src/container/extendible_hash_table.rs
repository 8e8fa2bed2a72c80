use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash};

use parking_lot::Mutex;

/// Deepest the directory may grow, at 2^20 slots
pub const MAX_GLOBAL_DEPTH: usize = 20;

/// A fixed-capacity bucket with its own local depth.
#[derive(Debug)]
struct Bucket<K, V> {
    depth: usize,
    items: Vec<(K, V)>,
}

impl<K, V> Bucket<K, V> {
    fn new(depth: usize, capacity: usize) -> Self {
        Self {
            depth,
            items: Vec::with_capacity(capacity),
        }
    }
}

/// Directory state guarded by the table mutex.
///
/// Directory slots hold indices into the bucket arena, so several slots can
/// share one bucket the same way shared pointers would.
#[derive(Debug)]
struct Directory<K, V> {
    global_depth: usize,
    slots: Vec<usize>,
    buckets: Vec<Bucket<K, V>>,
}

impl<K, V> Directory<K, V> {
    fn index_of(&self, hash: u64) -> usize {
        let mask = (1u64 << self.global_depth) - 1;
        (hash & mask) as usize
    }
}

/// Extendible hash table.
///
/// Keys are addressed by the low `global_depth` bits of their hash. A full
/// bucket is split on insert, doubling the directory first when its local
/// depth has caught up with the global depth. Buckets are never merged back.
pub struct ExtendibleHashTable<K, V, S = RandomState> {
    bucket_size: usize,
    hash_builder: S,
    inner: Mutex<Directory<K, V>>,
}

impl<K, V> ExtendibleHashTable<K, V, RandomState>
where
    K: Hash + Eq,
    V: Clone,
{
    /// Creates a table with one bucket of `bucket_size` entries.
    pub fn new(bucket_size: usize) -> Self {
        Self::with_hasher(bucket_size, RandomState::new())
    }
}

impl<K, V, S> ExtendibleHashTable<K, V, S>
where
    K: Hash + Eq,
    V: Clone,
    S: BuildHasher,
{
    pub fn with_hasher(bucket_size: usize, hash_builder: S) -> Self {
        assert!(bucket_size > 0, "bucket size must be positive");
        Self {
            bucket_size,
            hash_builder,
            inner: Mutex::new(Directory {
                global_depth: 0,
                slots: vec![0],
                buckets: vec![Bucket::new(0, bucket_size)],
            }),
        }
    }

    fn hash_of(&self, key: &K) -> u64 {
        self.hash_builder.hash_one(key)
    }

    /// Looks up the value stored for `key`.
    pub fn find(&self, key: &K) -> Option<V> {
        let inner = self.inner.lock();
        let bucket = &inner.buckets[inner.slots[inner.index_of(self.hash_of(key))]];
        bucket
            .items
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    /// Removes `key`, returning whether it was present.
    pub fn remove(&self, key: &K) -> bool {
        let mut inner = self.inner.lock();
        let target = inner.slots[inner.index_of(self.hash_of(key))];
        let items = &mut inner.buckets[target].items;
        match items.iter().position(|(k, _)| k == key) {
            Some(pos) => {
                items.swap_remove(pos);
                true
            }
            None => false,
        }
    }

    /// Inserts or overwrites the value for `key`.
    pub fn insert(&self, key: K, value: V) {
        let hash = self.hash_of(&key);
        let mut inner = self.inner.lock();

        loop {
            let target = inner.slots[inner.index_of(hash)];
            let bucket = &mut inner.buckets[target];

            if let Some(entry) = bucket.items.iter_mut().find(|(k, _)| *k == key) {
                entry.1 = value;
                return;
            }
            if bucket.items.len() < self.bucket_size {
                bucket.items.push((key, value));
                return;
            }
            // no number of splits separates keys with equal hashes
            if bucket.items.iter().all(|(k, _)| self.hash_of(k) == hash) {
                panic!(
                    "more than {} keys share hash {:#x}, bucket cannot be split",
                    self.bucket_size, hash
                );
            }

            self.split_bucket(&mut inner, target);
        }
    }

    /// Splits a full bucket in two on its next hash bit, growing the
    /// directory first if the bucket is already at global depth.
    fn split_bucket(&self, inner: &mut Directory<K, V>, target: usize) {
        let local_depth = inner.buckets[target].depth;
        if local_depth == inner.global_depth {
            assert!(
                inner.global_depth < MAX_GLOBAL_DEPTH,
                "hash directory cannot grow past depth {}",
                MAX_GLOBAL_DEPTH
            );
            inner.slots.extend_from_within(..);
            inner.global_depth += 1;
        }

        let high_bit = 1u64 << local_depth;
        let image = inner.buckets.len();
        let items = std::mem::take(&mut inner.buckets[target].items);
        inner.buckets[target].depth = local_depth + 1;
        inner
            .buckets
            .push(Bucket::new(local_depth + 1, self.bucket_size));

        for (k, v) in items {
            if self.hash_of(&k) & high_bit != 0 {
                inner.buckets[image].items.push((k, v));
            } else {
                inner.buckets[target].items.push((k, v));
            }
        }

        for (i, slot) in inner.slots.iter_mut().enumerate() {
            if *slot == target && (i as u64) & high_bit != 0 {
                *slot = image;
            }
        }
    }

    pub fn global_depth(&self) -> usize {
        self.inner.lock().global_depth
    }

    /// Local depth of the bucket behind directory slot `dir_index`.
    pub fn local_depth(&self, dir_index: usize) -> usize {
        let inner = self.inner.lock();
        inner.buckets[inner.slots[dir_index]].depth
    }

    pub fn num_buckets(&self) -> usize {
        self.inner.lock().buckets.len()
    }

    /// Total number of stored entries.
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .buckets
            .iter()
            .map(|b| b.items.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::hash::{BuildHasherDefault, Hasher};

    /// Hashes integers to themselves so bucket placement is predictable.
    #[derive(Default)]
    struct IdentityHasher(u64);

    impl Hasher for IdentityHasher {
        fn finish(&self) -> u64 {
            self.0
        }

        fn write(&mut self, bytes: &[u8]) {
            for &b in bytes.iter().rev() {
                self.0 = (self.0 << 8) | b as u64;
            }
        }

        fn write_i32(&mut self, i: i32) {
            self.0 = i as u32 as u64;
        }

        fn write_u64(&mut self, i: u64) {
            self.0 = i;
        }
    }

    type IdentityTable<V> = ExtendibleHashTable<u64, V, BuildHasherDefault<IdentityHasher>>;

    #[test]
    fn test_hash_table_starts_with_one_bucket() {
        let table: ExtendibleHashTable<i32, String> = ExtendibleHashTable::new(2);
        assert_eq!(table.global_depth(), 0);
        assert_eq!(table.num_buckets(), 1);
        assert!(table.is_empty());
        assert_eq!(table.find(&1), None);
    }

    #[test]
    fn test_hash_table_overwrite() {
        let table = ExtendibleHashTable::new(2);
        table.insert(1, "a");
        table.insert(1, "b");
        assert_eq!(table.find(&1), Some("b"));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_hash_table_directory_doubling() {
        let table: IdentityTable<u64> = ExtendibleHashTable::with_hasher(2, Default::default());

        // 0 and 2 fill the single bucket, 1 forces a split on bit 0
        table.insert(0, 0);
        table.insert(2, 2);
        table.insert(1, 1);
        assert_eq!(table.global_depth(), 1);
        assert_eq!(table.num_buckets(), 2);

        // 4 collides with 0 and 2 on bit 0, forcing a split on bit 1
        table.insert(4, 4);
        assert_eq!(table.global_depth(), 2);
        assert_eq!(table.num_buckets(), 3);
        assert_eq!(table.local_depth(0), 2);
        assert_eq!(table.local_depth(2), 2);
        // odd slots still share the depth-1 bucket
        assert_eq!(table.local_depth(1), 1);
        assert_eq!(table.local_depth(3), 1);

        for k in [0, 1, 2, 4] {
            assert_eq!(table.find(&k), Some(k));
        }
    }

    #[test]
    fn test_hash_table_cascading_split() {
        let table: IdentityTable<u64> = ExtendibleHashTable::with_hasher(2, Default::default());

        // 0, 8 and 16 share their low three bits, so one insert splits repeatedly
        table.insert(0, 0);
        table.insert(8, 8);
        table.insert(16, 16);
        assert_eq!(table.global_depth(), 4);
        for k in [0, 8, 16] {
            assert_eq!(table.find(&k), Some(k));
        }
    }

    #[test]
    fn test_hash_table_remove_does_not_shrink() {
        let table: IdentityTable<u64> = ExtendibleHashTable::with_hasher(1, Default::default());
        for k in 0..8 {
            table.insert(k, k * 10);
        }
        let depth = table.global_depth();
        let buckets = table.num_buckets();

        for k in 0..8 {
            assert!(table.remove(&k));
            assert!(!table.remove(&k));
        }
        assert!(table.is_empty());
        assert_eq!(table.global_depth(), depth);
        assert_eq!(table.num_buckets(), buckets);
    }

    /// Sends every key to the same hash.
    #[derive(Default)]
    struct ConstantHasher;

    impl Hasher for ConstantHasher {
        fn finish(&self) -> u64 {
            7
        }

        fn write(&mut self, _bytes: &[u8]) {}
    }

    #[test]
    fn test_hash_table_equal_hashes_within_bucket_size() {
        let table: ExtendibleHashTable<u64, u64, BuildHasherDefault<ConstantHasher>> =
            ExtendibleHashTable::with_hasher(3, Default::default());
        for k in 0..3 {
            table.insert(k, k);
        }
        assert_eq!(table.global_depth(), 0);
        for k in 0..3 {
            assert_eq!(table.find(&k), Some(k));
        }
    }

    #[test]
    #[should_panic(expected = "bucket cannot be split")]
    fn test_hash_table_too_many_equal_hashes() {
        let table: ExtendibleHashTable<u64, u64, BuildHasherDefault<ConstantHasher>> =
            ExtendibleHashTable::with_hasher(2, Default::default());
        for k in 0..3 {
            table.insert(k, k);
        }
    }

    #[test]
    #[should_panic(expected = "cannot grow past depth")]
    fn test_hash_table_depth_is_capped() {
        // the two keys differ only above the deepest directory bit
        let table: IdentityTable<u64> = ExtendibleHashTable::with_hasher(1, Default::default());
        table.insert(0, 0);
        table.insert(1 << 40, 1);
    }

    #[test]
    #[should_panic]
    fn test_hash_table_zero_bucket_size() {
        let _table: ExtendibleHashTable<i32, i32> = ExtendibleHashTable::new(0);
    }
}
