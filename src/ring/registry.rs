//! Authoritative shard registry.
//!
//! The registry maps a stable shard id to the `ShardInfo` currently serving
//! it. Ring entries point at the same `Arc`s, which is what lets a
//! replacement find and rewrite them.

use crate::error::{Error, Result};
use crate::types::{ShardId, ShardInfo};
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of shards by id, in configuration order.
#[derive(Debug, Clone, Default)]
pub struct ShardRegistry {
    /// Shards indexed by id.
    shards: HashMap<ShardId, Arc<ShardInfo>>,
    /// Ids in the order the shards were configured.
    order: Vec<ShardId>,
}

impl ShardRegistry {
    /// Create a registry from shards, rejecting duplicate ids.
    pub fn from_shards(shards: &[Arc<ShardInfo>]) -> Result<Self> {
        let mut registry = Self::default();
        for shard in shards {
            if registry.shards.contains_key(&shard.id) {
                return Err(Error::Config(format!("duplicate shard id: {}", shard.id)));
            }
            registry.order.push(shard.id.clone());
            registry.shards.insert(shard.id.clone(), shard.clone());
        }
        Ok(registry)
    }

    /// Get the shard registered under `id`.
    pub fn get(&self, id: &str) -> Option<&Arc<ShardInfo>> {
        self.shards.get(id)
    }

    /// Check if a shard id is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.shards.contains_key(id)
    }

    /// Swap the shard registered under `shard.id`.
    ///
    /// Returns the previous shard, or `ShardNotFound` if the id is unknown.
    pub fn replace(&mut self, shard: Arc<ShardInfo>) -> Result<Arc<ShardInfo>> {
        match self.shards.get_mut(&shard.id) {
            Some(slot) => Ok(std::mem::replace(slot, shard)),
            None => Err(Error::ShardNotFound(shard.id.clone())),
        }
    }

    /// Shard ids in configuration order.
    pub fn ids(&self) -> &[ShardId] {
        &self.order
    }

    /// All shards in configuration order.
    pub fn all(&self) -> Vec<Arc<ShardInfo>> {
        self.order
            .iter()
            .filter_map(|id| self.shards.get(id).cloned())
            .collect()
    }

    /// Number of registered shards.
    pub fn len(&self) -> usize {
        self.shards.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }
}
