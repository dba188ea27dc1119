//! Configuration types for the sharded client.
//!
//! Loading configuration from files or the environment is the caller's job;
//! these structs derive `serde` so any loader can produce them.

use crate::error::{Error, Result};
use crate::ring::DEFAULT_VIRTUAL_NODES_PER_SHARD;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Main configuration for a sharded client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardedConfig {
    /// Static shard list, in ring order. Position matters for untagged shards.
    pub shards: Vec<ShardConfig>,

    /// Virtual nodes generated per unit of shard weight.
    pub virtual_nodes_per_shard: usize,

    /// Pool and timeout settings applied to every backend connection.
    pub pool: PoolConfig,

    /// Failover watching.
    pub failover: FailoverConfig,
}

impl Default for ShardedConfig {
    fn default() -> Self {
        Self {
            shards: Vec::new(),
            virtual_nodes_per_shard: DEFAULT_VIRTUAL_NODES_PER_SHARD,
            pool: PoolConfig::default(),
            failover: FailoverConfig::default(),
        }
    }
}

impl ShardedConfig {
    /// Create a configuration for the given shards.
    pub fn new(shards: Vec<ShardConfig>) -> Self {
        Self {
            shards,
            ..Default::default()
        }
    }

    /// Add a shard.
    pub fn with_shard(mut self, shard: ShardConfig) -> Self {
        self.shards.push(shard);
        self
    }

    /// Set the number of virtual nodes per unit of weight.
    pub fn with_virtual_nodes(mut self, virtual_nodes: usize) -> Self {
        self.virtual_nodes_per_shard = virtual_nodes;
        self
    }

    /// Set pool configuration.
    pub fn with_pool_config(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Set failover configuration.
    pub fn with_failover_config(mut self, failover: FailoverConfig) -> Self {
        self.failover = failover;
        self
    }

    /// Check the configuration before any connection is made.
    pub fn validate(&self) -> Result<()> {
        if self.shards.is_empty() {
            return Err(Error::Config("at least one shard is required".into()));
        }
        if self.virtual_nodes_per_shard == 0 {
            return Err(Error::Config(
                "virtual_nodes_per_shard must be positive".into(),
            ));
        }

        let mut seen = HashSet::new();
        for shard in &self.shards {
            if shard.id.is_empty() {
                return Err(Error::Config("shard id must not be empty".into()));
            }
            if !seen.insert(shard.id.as_str()) {
                return Err(Error::Config(format!("duplicate shard id: {}", shard.id)));
            }
            if shard.weight == 0 {
                return Err(Error::Config(format!(
                    "shard {} has zero weight",
                    shard.id
                )));
            }
        }
        Ok(())
    }
}

/// Static configuration of one shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardConfig {
    /// Logical shard id (also the master name the discovery service uses).
    pub id: String,

    /// Initial backend address.
    pub address: String,

    /// Relative share of the ring.
    pub weight: u32,

    /// Hash tag seeding the virtual nodes. Empty keeps position-derived labels.
    #[serde(default)]
    pub tag: String,
}

impl ShardConfig {
    /// Create a shard config with weight 1 and no tag.
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            weight: 1,
            tag: String::new(),
        }
    }

    /// Set the weight.
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    /// Set the hash tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }
}

/// Backend pool settings, handed to the [`ConnectionFactory`](crate::backend::ConnectionFactory).
///
/// The sharding layer adds no timeouts of its own; these are the only ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum connections per shard.
    pub pool_size: usize,

    /// Idle connections kept open per shard.
    pub min_idle: usize,

    /// Timeout for establishing a connection.
    pub connect_timeout: Duration,

    /// Timeout for reading a reply.
    pub read_timeout: Duration,

    /// Timeout for writing a request.
    pub write_timeout: Duration,

    /// Backend password.
    pub password: Option<String>,

    /// Logical database index.
    pub database: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 10,
            min_idle: 0,
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(3),
            write_timeout: Duration::from_secs(3),
            password: None,
            database: 0,
        }
    }
}

impl PoolConfig {
    /// Set the pool size.
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    /// Set the minimum number of idle connections.
    pub fn with_min_idle(mut self, min_idle: usize) -> Self {
        self.min_idle = min_idle;
        self
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set read and write timeouts.
    pub fn with_io_timeouts(mut self, read: Duration, write: Duration) -> Self {
        self.read_timeout = read;
        self.write_timeout = write;
        self
    }

    /// Set the password.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the database index.
    pub fn with_database(mut self, database: u32) -> Self {
        self.database = database;
        self
    }
}

/// Failover watching configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailoverConfig {
    /// Discovery endpoints; one watcher runs per endpoint.
    pub endpoints: Vec<String>,

    /// Pause before resubscribing after a subscription ends or fails.
    pub resubscribe_backoff: Duration,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            resubscribe_backoff: Duration::from_secs(1),
        }
    }
}

impl FailoverConfig {
    /// Create a failover config for the given endpoints.
    pub fn new(endpoints: Vec<String>) -> Self {
        Self {
            endpoints,
            ..Default::default()
        }
    }

    /// Set the resubscribe backoff.
    pub fn with_resubscribe_backoff(mut self, backoff: Duration) -> Self {
        self.resubscribe_backoff = backoff;
        self
    }

    /// Check if any endpoint is configured.
    pub fn is_enabled(&self) -> bool {
        !self.endpoints.is_empty()
    }
}
