//! Consistent hash ring
//!
//! Maps routing keys to shard ids. Each shard is inserted at several
//! deterministic points so the key space spreads evenly across members.
//! Membership is fixed once a link goes active; only the in-flight counters
//! change afterwards, so lookups need no locking.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};

use contracts::ShardId;

/// Ring points per shard.
const REPLICATION_FACTOR: usize = 20;

/// How many distinct shards `get_least` considers, walking clockwise from
/// the key's position.
const CANDIDATE_COUNT: usize = 3;

/// Consistent hash ring over shard ids with per-shard in-flight counters.
#[derive(Default)]
pub struct Ring {
    /// (point hash, member index), sorted by hash
    points: Vec<(u64, usize)>,
    members: Vec<Member>,
    index: HashMap<ShardId, usize>,
}

struct Member {
    id: ShardId,
    in_flight: AtomicUsize,
}

impl Ring {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a shard at `REPLICATION_FACTOR` points on the ring.
    ///
    /// Adding the same shard id twice is a no-op.
    pub fn add(&mut self, id: ShardId) {
        if self.index.contains_key(&id) {
            return;
        }
        let member = self.members.len();
        for replica in 0..REPLICATION_FACTOR {
            let point = hash_of(&format!("{id}|{replica}"));
            self.points.push((point, member));
        }
        self.points.sort_unstable();
        self.index.insert(id.clone(), member);
        self.members.push(Member {
            id,
            in_flight: AtomicUsize::new(0),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Shard owning the first ring point at or after the key's hash,
    /// wrapping at the top of the ring. Deterministic while membership is
    /// unchanged.
    pub fn get(&self, key: &str) -> Option<&ShardId> {
        let start = self.start_point(key)?;
        let (_, member) = self.points[start];
        Some(&self.members[member].id)
    }

    /// Like `get`, but among the first few distinct shards clockwise from
    /// the key's position, pick the one with the lowest in-flight counter.
    /// Ties go to the shard encountered first.
    pub fn get_least(&self, key: &str) -> Option<&ShardId> {
        let start = self.start_point(key)?;

        let mut candidates: Vec<usize> = Vec::with_capacity(CANDIDATE_COUNT);
        for offset in 0..self.points.len() {
            let (_, member) = self.points[(start + offset) % self.points.len()];
            if !candidates.contains(&member) {
                candidates.push(member);
                if candidates.len() == CANDIDATE_COUNT {
                    break;
                }
            }
        }

        let mut best = candidates[0];
        let mut best_load = self.members[best].in_flight.load(Ordering::Relaxed);
        for &member in &candidates[1..] {
            let load = self.members[member].in_flight.load(Ordering::Relaxed);
            if load < best_load {
                best = member;
                best_load = load;
            }
        }
        Some(&self.members[best].id)
    }

    /// Note a request admitted to the shard's queue.
    pub fn inc(&self, id: &ShardId) {
        if let Some(&member) = self.index.get(id) {
            self.members[member].in_flight.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Note a previously admitted request handed off.
    pub fn done(&self, id: &ShardId) {
        if let Some(&member) = self.index.get(id) {
            let _ = self.members[member].in_flight.fetch_update(
                Ordering::Relaxed,
                Ordering::Relaxed,
                |n| n.checked_sub(1),
            );
        }
    }

    #[cfg(test)]
    fn in_flight(&self, id: &ShardId) -> usize {
        let member = self.index[id];
        self.members[member].in_flight.load(Ordering::Relaxed)
    }

    fn start_point(&self, key: &str) -> Option<usize> {
        if self.points.is_empty() {
            return None;
        }
        let hash = hash_of(key);
        let at = self.points.partition_point(|&(point, _)| point < hash);
        Some(at % self.points.len())
    }
}

fn hash_of(value: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn ring_of(n: usize) -> (Ring, Vec<ShardId>) {
        let mut ring = Ring::new();
        let ids: Vec<ShardId> = (0..n).map(|_| ShardId::generate()).collect();
        for id in &ids {
            ring.add(id.clone());
        }
        (ring, ids)
    }

    #[test]
    fn test_empty_ring_has_no_owner() {
        let ring = Ring::new();
        assert!(ring.is_empty());
        assert!(ring.get("anything").is_none());
        assert!(ring.get_least("anything").is_none());
    }

    #[test]
    fn test_get_is_deterministic() {
        let (ring, _) = ring_of(5);
        for i in 0..100 {
            let key = format!("key-{i}");
            assert_eq!(ring.get(&key), ring.get(&key));
        }
    }

    #[test]
    fn test_add_twice_is_noop() {
        let (mut ring, ids) = ring_of(2);
        let points = ring.points.len();
        ring.add(ids[0].clone());
        assert_eq!(ring.len(), 2);
        assert_eq!(ring.points.len(), points);
    }

    #[test]
    fn test_keys_spread_across_all_shards() {
        let (ring, _) = ring_of(3);
        let mut counts: HashMap<ShardId, usize> = HashMap::new();
        for i in 0..1000 {
            let shard = ring.get(&format!("key-{i}")).unwrap();
            *counts.entry(shard.clone()).or_default() += 1;
        }
        assert_eq!(counts.len(), 3, "every shard should own some keys");
        assert_eq!(counts.values().sum::<usize>(), 1000);
    }

    #[test]
    fn test_get_least_prefers_idle_shard() {
        let (ring, _) = ring_of(2);
        // With two members every key sees both as candidates, so loading
        // one shard must steer every lookup to the other.
        for i in 0..20 {
            let key = format!("key-{i}");
            let busy = ring.get_least(&key).unwrap().clone();
            ring.inc(&busy);
            ring.inc(&busy);
            let picked = ring.get_least(&key).unwrap().clone();
            assert_ne!(picked, busy);
            ring.done(&busy);
            ring.done(&busy);
        }
    }

    #[test]
    fn test_get_least_matches_get_when_unloaded() {
        let (ring, _) = ring_of(4);
        for i in 0..50 {
            let key = format!("key-{i}");
            assert_eq!(ring.get(&key), ring.get_least(&key));
        }
    }

    #[test]
    fn test_counters_never_underflow() {
        let (ring, ids) = ring_of(1);
        ring.done(&ids[0]);
        assert_eq!(ring.in_flight(&ids[0]), 0);
        ring.inc(&ids[0]);
        assert_eq!(ring.in_flight(&ids[0]), 1);
        ring.done(&ids[0]);
        ring.done(&ids[0]);
        assert_eq!(ring.in_flight(&ids[0]), 0);
    }

    #[test]
    fn test_unknown_shard_counter_ignored() {
        let (ring, _) = ring_of(1);
        // Must not panic.
        ring.inc(&ShardId::generate());
        ring.done(&ShardId::generate());
    }
}
