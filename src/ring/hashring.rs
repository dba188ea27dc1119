//! Consistent hashing with weighted virtual nodes.
//!
//! Each shard is represented by `weight × virtual_nodes` positions on the
//! ring. A key is hashed (or just its `{tag}`, see [`routing_key`]) and
//! served by the first position at or after its hash, wrapping around to
//! the start of the ring.

use crate::error::{Error, Result};
use crate::types::{ShardId, ShardInfo};
use std::collections::{BTreeMap, HashMap};
use std::hash::Hasher;
use std::sync::Arc;
use twox_hash::XxHash64;

/// Number of virtual nodes per unit of shard weight.
pub const DEFAULT_VIRTUAL_NODES_PER_SHARD: usize = 160;

/// One position on the ring.
#[derive(Debug, Clone)]
pub struct RingEntry {
    /// Hash position.
    pub hash: u64,
    /// Shard serving keys that land on this position.
    pub shard: Arc<ShardInfo>,
}

/// A consistent hash ring mapping keys to shards.
#[derive(Debug, Clone)]
pub struct HashRing {
    /// Positions sorted by ascending hash.
    entries: Vec<RingEntry>,

    /// Virtual nodes per unit of weight the ring was built with.
    virtual_nodes: usize,
}

impl HashRing {
    /// Build a ring over `shards`.
    ///
    /// Untagged shards derive their labels from their position in `shards`,
    /// so the order of the slice is part of the routing.
    pub fn build(shards: &[Arc<ShardInfo>], virtual_nodes: usize) -> Result<Self> {
        if shards.is_empty() {
            return Err(Error::Config("cannot build a ring without shards".into()));
        }
        if virtual_nodes == 0 {
            return Err(Error::Config("virtual node count must be positive".into()));
        }

        // Colliding labels resolve last-writer-wins.
        let mut positions: BTreeMap<u64, Arc<ShardInfo>> = BTreeMap::new();
        for (index, shard) in shards.iter().enumerate() {
            let count = shard.weight as usize * virtual_nodes;
            for n in 0..count {
                let label = Self::vnode_label(index, shard, n);
                positions.insert(hash_key(label.as_bytes()), shard.clone());
            }
        }

        if positions.is_empty() {
            return Err(Error::Config("all shards have zero weight".into()));
        }

        let entries = positions
            .into_iter()
            .map(|(hash, shard)| RingEntry { hash, shard })
            .collect();

        Ok(Self {
            entries,
            virtual_nodes,
        })
    }

    fn vnode_label(index: usize, shard: &ShardInfo, n: usize) -> String {
        if shard.tag.is_empty() {
            format!("SHARD-{}-NODE-{}", index, n)
        } else {
            format!("{}*{}{}", shard.tag, shard.weight, n)
        }
    }

    /// Get the shard serving `key`.
    pub fn lookup(&self, key: &[u8]) -> Arc<ShardInfo> {
        let hash = hash_key(routing_key(key));
        self.entries[self.position_for(hash)].shard.clone()
    }

    /// Index of the first entry at or after `hash`, wrapping to 0.
    fn position_for(&self, hash: u64) -> usize {
        let idx = self.entries.partition_point(|entry| entry.hash < hash);
        if idx == self.entries.len() {
            0
        } else {
            idx
        }
    }

    /// Point every entry currently served by `old` at `new`.
    ///
    /// Hash positions are untouched, so keys keep their positions and only
    /// the keys of `old` change target. Returns the number of entries rewritten.
    pub fn replace_shard(&mut self, old: &Arc<ShardInfo>, new: Arc<ShardInfo>) -> usize {
        let mut rewritten = 0;
        for entry in self.entries.iter_mut() {
            if Arc::ptr_eq(&entry.shard, old) {
                entry.shard = new.clone();
                rewritten += 1;
            }
        }
        rewritten
    }

    /// Number of positions on the ring.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the ring has no positions.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Virtual nodes per unit of weight.
    pub fn virtual_nodes(&self) -> usize {
        self.virtual_nodes
    }

    /// The ring entries in ascending hash order.
    pub fn entries(&self) -> &[RingEntry] {
        &self.entries
    }

    /// Ids of the shards on the ring, in first-position order.
    pub fn shard_ids(&self) -> Vec<ShardId> {
        let mut ids: Vec<ShardId> = Vec::new();
        for entry in &self.entries {
            if !ids.contains(&entry.shard.id) {
                ids.push(entry.shard.id.clone());
            }
        }
        ids
    }

    /// Number of ring positions held by each shard.
    pub fn positions_per_shard(&self) -> HashMap<ShardId, usize> {
        let mut counts = HashMap::new();
        for entry in &self.entries {
            *counts.entry(entry.shard.id.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Get the distribution of keys across shards for a sample.
    ///
    /// This is useful for testing/monitoring key distribution.
    pub fn distribution(&self, sample_size: usize) -> HashMap<ShardId, usize> {
        let mut distribution = HashMap::new();
        for i in 0..sample_size {
            let key = format!("sample_key_{}", i);
            let shard = self.lookup(key.as_bytes());
            *distribution.entry(shard.id.clone()).or_insert(0) += 1;
        }
        distribution
    }
}

/// Extract the part of `key` used for hashing.
///
/// If the key contains `{...}` with a non-empty body, only the body is
/// hashed, so keys sharing a tag always land on the same shard. Otherwise
/// the whole key is hashed.
pub fn routing_key(key: &[u8]) -> &[u8] {
    if let Some(open) = key.iter().position(|&b| b == b'{') {
        if let Some(len) = key[open + 1..].iter().position(|&b| b == b'}') {
            if len > 0 {
                return &key[open + 1..open + 1 + len];
            }
        }
    }
    key
}

/// Hash bytes onto the ring using xxHash64.
pub fn hash_key(bytes: &[u8]) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(bytes);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryBackend;

    fn shard(id: &str, weight: u32) -> Arc<ShardInfo> {
        Arc::new(
            ShardInfo::new(id, format!("{}:6379", id), Arc::new(MemoryBackend::new(id)))
                .with_weight(weight),
        )
    }

    fn ring(shards: &[Arc<ShardInfo>]) -> HashRing {
        HashRing::build(shards, DEFAULT_VIRTUAL_NODES_PER_SHARD).unwrap()
    }

    #[test]
    fn test_empty_ring_is_rejected() {
        assert!(HashRing::build(&[], 160).is_err());
        assert!(HashRing::build(&[shard("a", 1)], 0).is_err());
        assert!(HashRing::build(&[shard("a", 0)], 160).is_err());
    }

    #[test]
    fn test_entries_sorted_and_weighted() {
        let shards = vec![shard("a", 1), shard("b", 2), shard("c", 1)];
        let ring = ring(&shards);

        assert!(ring.entries().windows(2).all(|w| w[0].hash < w[1].hash));

        let counts = ring.positions_per_shard();
        // xxHash64 collisions over a few hundred labels are not expected.
        assert_eq!(counts["a"], 160);
        assert_eq!(counts["b"], 320);
        assert_eq!(counts["c"], 160);
        assert_eq!(ring.len(), 640);

        let mut ids = ring.shard_ids();
        ids.sort();
        assert_eq!(ids, ["a", "b", "c"]);
    }

    #[test]
    fn test_lookup_deterministic() {
        let shards = vec![shard("a", 1), shard("b", 1), shard("c", 1)];
        let first = ring(&shards);
        let second = ring(&shards);

        for i in 0..500 {
            let key = format!("key-{}", i);
            let a = first.lookup(key.as_bytes());
            let b = first.lookup(key.as_bytes());
            let c = second.lookup(key.as_bytes());
            assert_eq!(a.id, b.id);
            assert_eq!(a.id, c.id);
        }
    }

    #[test]
    fn test_lookup_wraps_past_max_hash() {
        let shards = vec![shard("a", 1), shard("b", 1)];
        let ring = ring(&shards);

        let last = ring.entries().last().unwrap().hash;
        assert_eq!(ring.position_for(last), ring.len() - 1);
        if last < u64::MAX {
            assert_eq!(ring.position_for(last + 1), 0);
        }
        assert_eq!(ring.position_for(0), 0);
    }

    #[test]
    fn test_routing_key_extraction() {
        assert_eq!(routing_key(b"{user42}profile"), b"user42");
        assert_eq!(routing_key(b"prefix{tag}suffix"), b"tag");
        assert_eq!(routing_key(b"plain"), b"plain");
        assert_eq!(routing_key(b"{}empty"), b"{}empty");
        assert_eq!(routing_key(b"open{only"), b"open{only");
        assert_eq!(routing_key(b"a{b}{c}"), b"b");
    }

    #[test]
    fn test_tag_colocation() {
        let shards = vec![shard("a", 1), shard("b", 1), shard("c", 1)];
        let ring = ring(&shards);

        for i in 0..200 {
            let tag = format!("user{}", i);
            let profile = ring.lookup(format!("{{{}}}profile", tag).as_bytes());
            let settings = ring.lookup(format!("{{{}}}settings", tag).as_bytes());
            let bare = ring.lookup(tag.as_bytes());
            assert_eq!(profile.id, settings.id);
            assert_eq!(profile.id, bare.id);
        }
    }

    #[test]
    fn test_tagged_shards_ignore_position() {
        let a = Arc::new(
            ShardInfo::new("a", "a:6379", Arc::new(MemoryBackend::new("a"))).with_tag("alpha"),
        );
        let b = Arc::new(
            ShardInfo::new("b", "b:6379", Arc::new(MemoryBackend::new("b"))).with_tag("beta"),
        );
        let forward = ring(&[a.clone(), b.clone()]);
        let reversed = ring(&[b, a]);

        for i in 0..200 {
            let key = format!("key-{}", i);
            assert_eq!(
                forward.lookup(key.as_bytes()).id,
                reversed.lookup(key.as_bytes()).id
            );
        }
    }

    #[test]
    fn test_replace_keeps_positions() {
        let shards = vec![shard("a", 1), shard("b", 1), shard("c", 1)];
        let mut ring = ring(&shards);
        let before: Vec<u64> = ring.entries().iter().map(|e| e.hash).collect();

        let keys: Vec<String> = (0..1000).map(|i| format!("key-{}", i)).collect();
        let owners_before: Vec<ShardId> =
            keys.iter().map(|k| ring.lookup(k.as_bytes()).id.clone()).collect();

        let new_b = shard("b", 1);
        let rewritten = ring.replace_shard(&shards[1], new_b.clone());
        assert_eq!(rewritten, 160);

        let after: Vec<u64> = ring.entries().iter().map(|e| e.hash).collect();
        assert_eq!(before, after);

        for (key, owner) in keys.iter().zip(owners_before) {
            let now = ring.lookup(key.as_bytes());
            assert_eq!(now.id, owner);
            if owner == "b" {
                assert!(Arc::ptr_eq(&now, &new_b));
            } else {
                assert!(!Arc::ptr_eq(&now, &new_b));
            }
        }
    }

    #[test]
    fn test_distribution() {
        let shards = vec![shard("a", 1), shard("b", 1), shard("c", 1)];
        let ring = ring(&shards);

        let distribution = ring.distribution(10000);

        // Each shard should have roughly 1/3 of keys (with some variance)
        for id in ["a", "b", "c"] {
            let count = distribution.get(id).copied().unwrap_or(0);
            assert!(count > 2500 && count < 4500, "Shard {} has {} keys", id, count);
        }
    }
}
