// src/kademlia/table.rs
//
// Routing table: 160 k-buckets indexed by prefix-match length, each
// ordered least-recently-seen first (spec.md §3, §4.3.2, §4.3.3).

use crate::key::{Key, KEY_BITS};
use crate::message::Address;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BucketEntry {
    pub key: Key,
    pub address: Address,
    pub last_seen: u64,
}

/// A single k-bucket: insertion order is significance, not a sort key.
/// Index 0 is least-recently-seen, the back is most-recently-seen.
#[derive(Default)]
pub struct Bucket {
    entries: Vec<BucketEntry>,
}

impl Bucket {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn front(&self) -> Option<&BucketEntry> {
        self.entries.first()
    }

    pub fn back(&self) -> Option<&BucketEntry> {
        self.entries.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BucketEntry> {
        self.entries.iter()
    }

    fn position(&self, key: &Key) -> Option<usize> {
        self.entries.iter().position(|e| &e.key == key)
    }

    /// Removes any existing entry for `key` and appends `entry` as the new
    /// most-recently-seen — "hoist" in spec.md §4.3.2 terms.
    fn hoist(&mut self, entry: BucketEntry) {
        if let Some(pos) = self.position(&entry.key) {
            self.entries.remove(pos);
        }
        self.entries.push(entry);
    }

    fn push(&mut self, entry: BucketEntry) {
        self.entries.push(entry);
    }

    fn remove(&mut self, key: &Key) -> Option<BucketEntry> {
        let pos = self.position(key)?;
        Some(self.entries.remove(pos))
    }
}

/// Outcome of `RoutingTable::observe`, telling the caller whether a liveness
/// probe of the bucket's least-recently-seen entry is needed before the
/// observation can be finalized.
pub enum ObserveOutcome {
    /// The entry was hoisted or appended directly; nothing further to do.
    Done,
    /// The bucket was full and unrelated to `challenger`; the caller must
    /// ping `incumbent` and call `resolve_challenge` with the result.
    NeedsChallenge {
        bucket_index: usize,
        incumbent: BucketEntry,
        challenger: BucketEntry,
    },
}

pub struct RoutingTable {
    local_key: Key,
    buckets: Vec<Bucket>,
    k: usize,
}

impl RoutingTable {
    pub fn new(local_key: Key, k: usize) -> Self {
        let mut buckets = Vec::with_capacity(KEY_BITS as usize);
        for _ in 0..KEY_BITS {
            buckets.push(Bucket::default());
        }
        RoutingTable { local_key, buckets, k }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn bucket_index(&self, key: &Key) -> Option<usize> {
        let i = self.local_key.longest_matching_prefix(key);
        if i >= KEY_BITS {
            None
        } else {
            Some(i as usize)
        }
    }

    pub fn bucket(&self, index: usize) -> &Bucket {
        &self.buckets[index]
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// spec.md §4.3.2. Returns `ObserveOutcome::NeedsChallenge` when the
    /// bucket is full of unrelated entries and a liveness probe of the
    /// incumbent is required before deciding who keeps the slot.
    pub fn observe(&mut self, address: Address, key: Key, now: u64) -> ObserveOutcome {
        let Some(idx) = self.bucket_index(&key) else {
            return ObserveOutcome::Done;
        };
        let entry = BucketEntry { key, address, last_seen: now };
        let bucket = &mut self.buckets[idx];

        if bucket.position(&key).is_some() {
            bucket.hoist(entry);
            return ObserveOutcome::Done;
        }
        if bucket.len() < self.k {
            bucket.push(entry);
            return ObserveOutcome::Done;
        }
        let incumbent = bucket.front().expect("full bucket is nonempty").clone();
        ObserveOutcome::NeedsChallenge {
            bucket_index: idx,
            incumbent,
            challenger: entry,
        }
    }

    /// Resolves a pending `NeedsChallenge` outcome. `incumbent_alive` is
    /// the result of pinging the incumbent: if alive, it wins and the
    /// challenger is dropped; otherwise the incumbent is evicted and the
    /// challenger appended.
    pub fn resolve_challenge(&mut self, bucket_index: usize, incumbent: &Key, challenger: BucketEntry, incumbent_alive: bool) {
        let bucket = &mut self.buckets[bucket_index];
        if incumbent_alive {
            return;
        }
        bucket.remove(incumbent);
        bucket.push(challenger);
    }

    /// spec.md §4.3.2 `unobserve`: removes every entry matching `address`
    /// from every bucket.
    pub fn unobserve(&mut self, address: Address) {
        for bucket in &mut self.buckets {
            bucket.entries.retain(|e| e.address != address);
        }
    }

    /// spec.md §4.3.3 `get_nearest`.
    pub fn get_nearest(&self, n: usize, target: &Key, exclude: &Key) -> Vec<BucketEntry> {
        let mut all: Vec<BucketEntry> = self
            .buckets
            .iter()
            .flat_map(|b| b.iter().cloned())
            .filter(|e| &e.key != exclude)
            .collect();
        all.sort_by_key(|e| e.key.xor(target));
        all.truncate(n);
        all
    }

    pub fn contains_address(&self, address: Address) -> bool {
        self.buckets.iter().any(|b| b.iter().any(|e| e.address == address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_with_prefix(local: &Key, bucket: usize) -> Key {
        // A key whose prefix-match with `local` is exactly `bucket` bits:
        // share `bucket` bits, then flip the next bit.
        let mut k = local.random_with_shared_prefix(bucket as u32);
        let byte = bucket / 8;
        let bit = bucket % 8;
        k.0[byte] ^= 1 << (7 - bit);
        // Ensure the flipped bit actually differs from local (it should,
        // since the shared-prefix key matched local up to `bucket` bits
        // and this flips bit index `bucket`).
        k
    }

    #[test]
    fn bucket_invariant_holds_after_inserts() {
        let local = Key::random();
        let mut table = RoutingTable::new(local, 20);
        for b in [0usize, 5, 63, 159] {
            let k = key_with_prefix(&local, b);
            let idx = table.bucket_index(&k).unwrap();
            assert_eq!(idx, b, "expected prefix match length {b}, got {idx}");
            table.observe(1, k, 0);
        }
    }

    #[test]
    fn bucket_capacity_is_respected() {
        let local = Key::random();
        let mut table = RoutingTable::new(local, 2);
        let k0 = key_with_prefix(&local, 10);
        let k1 = key_with_prefix(&local, 10);
        let k2 = key_with_prefix(&local, 10);
        assert!(matches!(table.observe(1, k0, 0), ObserveOutcome::Done));
        assert!(matches!(table.observe(2, k1, 0), ObserveOutcome::Done));
        match table.observe(3, k2, 0) {
            ObserveOutcome::NeedsChallenge { .. } => {}
            ObserveOutcome::Done => panic!("expected bucket to be full"),
        }
        assert_eq!(table.bucket(10).len(), 2);
    }

    #[test]
    fn eviction_challenge_keeps_incumbent_when_alive() {
        let local = Key::random();
        let mut table = RoutingTable::new(local, 1);
        let k0 = key_with_prefix(&local, 3);
        table.observe(1, k0, 0);
        let k1 = key_with_prefix(&local, 3);
        let outcome = table.observe(2, k1, 0);
        let ObserveOutcome::NeedsChallenge { bucket_index, incumbent, challenger } = outcome else {
            panic!("expected challenge");
        };
        table.resolve_challenge(bucket_index, &incumbent.key, challenger, true);
        assert_eq!(table.bucket(3).len(), 1);
        assert_eq!(table.bucket(3).front().unwrap().key, k0);
    }

    #[test]
    fn eviction_challenge_replaces_incumbent_when_dead() {
        let local = Key::random();
        let mut table = RoutingTable::new(local, 1);
        let k0 = key_with_prefix(&local, 3);
        table.observe(1, k0, 0);
        let k1 = key_with_prefix(&local, 3);
        let outcome = table.observe(2, k1, 0);
        let ObserveOutcome::NeedsChallenge { bucket_index, incumbent, challenger } = outcome else {
            panic!("expected challenge");
        };
        table.resolve_challenge(bucket_index, &incumbent.key, challenger, false);
        assert_eq!(table.bucket(3).len(), 1);
        assert_eq!(table.bucket(3).front().unwrap().key, k1);
    }

    #[test]
    fn unobserve_removes_all_entries_for_address() {
        let local = Key::random();
        let mut table = RoutingTable::new(local, 20);
        let k0 = key_with_prefix(&local, 3);
        table.observe(9, k0, 0);
        assert!(table.contains_address(9));
        table.unobserve(9);
        assert!(!table.contains_address(9));
    }

    #[test]
    fn get_nearest_excludes_self_and_sorts_by_distance() {
        let local = Key::random();
        let mut table = RoutingTable::new(local, 20);
        for b in 0..10 {
            table.observe(b as u32 + 1, key_with_prefix(&local, b), 0);
        }
        let nearest = table.get_nearest(5, &local, &local);
        assert_eq!(nearest.len(), 5);
        for w in nearest.windows(2) {
            assert!(w[0].key.xor(&local) <= w[1].key.xor(&local));
        }
    }
}
